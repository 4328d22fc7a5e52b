//! rollcall-core: pose classification, guided enrollment, identity matching
//! and attendance deduplication.
//!
//! Pure logic only: the face engine, frame source and persistence are
//! injected through the traits in [`detector`] and [`records`].

pub mod attendance;
pub mod calendar;
pub mod detector;
pub mod enrollment;
pub mod frame;
pub mod index;
pub mod policy;
pub mod pose;
pub mod records;
pub mod types;

pub use attendance::{AttendanceDecision, AttendanceResolver, SessionDedupState};
pub use calendar::{AttendanceCalendar, Holiday};
pub use detector::{DetectorError, FaceEngine};
pub use enrollment::{EnrollmentError, EnrollmentEvent, EnrollmentSequencer, Observation};
pub use frame::{Frame, FrameError};
pub use index::{
    EuclideanMatcher, IdentityIndex, LabeledDescriptors, MatchResult, Matcher,
    ATTENDANCE_MATCH_THRESHOLD, ENROLLMENT_MATCH_THRESHOLD,
};
pub use policy::{EnrollmentPolicy, EnrollmentStep, Policy, PolicyError};
pub use pose::{classify, Pose, PoseRatios};
pub use records::{
    AttendanceStatus, AttendanceStore, Identity, IdentityAttributes, IdentityStore, NewEnrollment,
    StoreError,
};
pub use types::{BoundingBox, Descriptor, Detection, Landmarks, Point};
