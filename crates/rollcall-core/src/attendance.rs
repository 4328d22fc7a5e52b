//! Attendance resolution with per-session deduplication.
//!
//! Every face in a sampled frame is matched against the identity index.
//! A known label is marked present at most once per session; while a mark
//! is outstanding an in-flight lock suppresses duplicates, and the lock
//! expires after a fixed cool-down whether or not the mark succeeded.

use crate::index::{EuclideanMatcher, IdentityIndex, Matcher, ATTENDANCE_MATCH_THRESHOLD};
use crate::types::Descriptor;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Reference in-flight cool-down.
pub const DEFAULT_IN_FLIGHT_COOLDOWN: Duration = Duration::from_millis(2000);

/// Session-scoped record of who has been marked present.
///
/// Owned by the scan session and passed in explicitly on every resolve.
#[derive(Debug, Clone)]
pub struct SessionDedupState {
    confirmed: HashSet<String>,
    in_flight: HashMap<String, Instant>,
    cooldown: Duration,
}

impl Default for SessionDedupState {
    fn default() -> Self {
        Self::new(DEFAULT_IN_FLIGHT_COOLDOWN)
    }
}

impl SessionDedupState {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            confirmed: HashSet::new(),
            in_flight: HashMap::new(),
            cooldown,
        }
    }

    /// Preload labels already marked present before this session began.
    pub fn seed_confirmed<I, S>(&mut self, labels: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.confirmed.extend(labels.into_iter().map(Into::into));
    }

    pub fn is_confirmed(&self, label: &str) -> bool {
        self.confirmed.contains(label)
    }

    pub fn is_in_flight(&self, label: &str) -> bool {
        self.in_flight.contains_key(label)
    }

    pub fn confirmed(&self) -> impl Iterator<Item = &str> {
        self.confirmed.iter().map(String::as_str)
    }

    pub fn confirmed_count(&self) -> usize {
        self.confirmed.len()
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Drop in-flight locks older than the cool-down.
    pub fn expire(&mut self, now: Instant) {
        let cooldown = self.cooldown;
        self.in_flight
            .retain(|_, since| now.saturating_duration_since(*since) < cooldown);
    }

    /// Explicit external retry: allow `label` to be marked again this session.
    /// An unexpired in-flight lock still applies.
    pub fn forget(&mut self, label: &str) -> bool {
        self.confirmed.remove(label)
    }

    /// Session end.
    pub fn clear(&mut self) {
        self.confirmed.clear();
        self.in_flight.clear();
    }
}

/// What to do about one detected face.
#[derive(Debug, Clone, PartialEq)]
pub enum AttendanceDecision {
    /// No enrolled identity within the threshold.
    Unidentified { distance: f32 },
    /// Already marked this session.
    AlreadyPresent { label: String, distance: f32 },
    /// A mark for this label is still outstanding.
    InFlight { label: String, distance: f32 },
    /// Issue the mark-present side effect now.
    MarkPresent { label: String, distance: f32 },
}

impl AttendanceDecision {
    pub fn label(&self) -> Option<&str> {
        match self {
            AttendanceDecision::Unidentified { .. } => None,
            AttendanceDecision::AlreadyPresent { label, .. }
            | AttendanceDecision::InFlight { label, .. }
            | AttendanceDecision::MarkPresent { label, .. } => Some(label),
        }
    }
}

pub struct AttendanceResolver<M = EuclideanMatcher> {
    matcher: M,
    threshold: f32,
}

impl Default for AttendanceResolver {
    fn default() -> Self {
        Self::new(ATTENDANCE_MATCH_THRESHOLD)
    }
}

impl AttendanceResolver {
    pub fn new(threshold: f32) -> Self {
        Self {
            matcher: EuclideanMatcher,
            threshold,
        }
    }
}

impl<M: Matcher> AttendanceResolver<M> {
    pub fn with_matcher(matcher: M, threshold: f32) -> Self {
        Self { matcher, threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Decide, per detected face, whether to mark attendance.
    ///
    /// `MarkPresent` is returned at most once per label per session: the label
    /// is locked and confirmed before this returns.
    pub fn resolve<'d, I>(
        &self,
        index: &IdentityIndex,
        descriptors: I,
        state: &mut SessionDedupState,
        now: Instant,
    ) -> Vec<AttendanceDecision>
    where
        I: IntoIterator<Item = &'d Descriptor>,
    {
        state.expire(now);

        descriptors
            .into_iter()
            .map(|descriptor| {
                let result = self.matcher.compare(descriptor, index, self.threshold);
                let distance = result.distance;
                let Some(label) = result.label else {
                    return AttendanceDecision::Unidentified { distance };
                };

                if state.confirmed.contains(&label) {
                    AttendanceDecision::AlreadyPresent { label, distance }
                } else if state.in_flight.contains_key(&label) {
                    AttendanceDecision::InFlight { label, distance }
                } else {
                    state.in_flight.insert(label.clone(), now);
                    state.confirmed.insert(label.clone());
                    tracing::debug!(label = %label, distance, "attendance: marking present");
                    AttendanceDecision::MarkPresent { label, distance }
                }
            })
            .collect()
    }
}
