//! Events emitted to the presentation layer.

use chrono::NaiveDate;
use rollcall_core::{BoundingBox, EnrollmentEvent};
use std::fmt;

/// Overlay colour category for a detected face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayTone {
    /// No enrolled identity within the threshold.
    Unknown,
    /// Enrollment mode: a new face, eligible for capture.
    NewFace,
    /// Attendance mode: known, mark pending.
    Recognized,
    /// Known and already present, or already enrolled.
    Present,
}

impl OverlayTone {
    pub fn hex(self) -> &'static str {
        match self {
            OverlayTone::Unknown => "#E74C3C",
            OverlayTone::NewFace | OverlayTone::Recognized => "#3498DB",
            OverlayTone::Present => "#2ECC71",
        }
    }
}

impl fmt::Display for OverlayTone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hex())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaceOverlay {
    pub bbox: BoundingBox,
    pub text: String,
    pub tone: OverlayTone,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// Boxes for every face in the latest processed frame. Empty clears the overlay.
    Overlay(Vec<FaceOverlay>),
    Enrollment(EnrollmentEvent),
    AttendanceMarked {
        label: String,
        date: NaiveDate,
    },
    AttendanceFailed {
        label: String,
        date: NaiveDate,
        error: String,
    },
    Saved {
        label: String,
        images: usize,
    },
    SaveFailed {
        label: String,
        error: String,
    },
}
