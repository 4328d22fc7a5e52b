//! Scan policy: the ordered enrollment pose sequence, the hold duration and
//! the attendance calendar.
//!
//! The reference policy ships as `policy/default.toml` and is embedded at
//! compile time; deployments may load their own file instead.

use crate::calendar::AttendanceCalendar;
use crate::pose::Pose;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// The reference policy file, embedded verbatim.
pub const DEFAULT_POLICY_TOML: &str = include_str!("../policy/default.toml");

const DEFAULT_HOLD_MS: u64 = 2000;

const REFERENCE_SEQUENCE: [Pose; 7] = [
    Pose::Front,
    Pose::Left,
    Pose::Right,
    Pose::Up,
    Pose::Down,
    Pose::JawLeft,
    Pose::JawRight,
];

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("failed to read policy file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid policy TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid policy: {0}")]
    Invalid(String),
}

/// One entry of the enrollment sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentStep {
    pub pose: Pose,
    /// Text shown while this step is active. Defaults to the pose's own instruction.
    #[serde(default)]
    pub instruction: String,
}

impl EnrollmentStep {
    pub fn new(pose: Pose) -> Self {
        Self {
            pose,
            instruction: pose.instruction().to_string(),
        }
    }
}

/// Ordered poses to capture and how long each must be held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentPolicy {
    pub steps: Vec<EnrollmentStep>,
    pub hold: Duration,
}

impl Default for EnrollmentPolicy {
    fn default() -> Self {
        Self {
            steps: REFERENCE_SEQUENCE.iter().map(|&p| EnrollmentStep::new(p)).collect(),
            hold: Duration::from_millis(DEFAULT_HOLD_MS),
        }
    }
}

impl EnrollmentPolicy {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    fn validate(&self) -> Result<(), PolicyError> {
        if self.steps.is_empty() {
            return Err(PolicyError::Invalid("enrollment needs at least one step".into()));
        }
        if let Some(i) = self.steps.iter().position(|s| s.pose == Pose::Unknown) {
            return Err(PolicyError::Invalid(format!(
                "step {i} requires pose \"unknown\", which can never be held"
            )));
        }
        Ok(())
    }
}

/// Full scan policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    pub enrollment: EnrollmentPolicy,
    pub calendar: AttendanceCalendar,
}

#[derive(Deserialize)]
struct PolicyFile {
    enrollment: EnrollmentSection,
    #[serde(default)]
    calendar: AttendanceCalendar,
}

#[derive(Deserialize)]
struct EnrollmentSection {
    #[serde(default = "default_hold_ms")]
    hold_ms: u64,
    steps: Vec<EnrollmentStep>,
}

fn default_hold_ms() -> u64 {
    DEFAULT_HOLD_MS
}

impl Policy {
    pub fn from_toml(src: &str) -> Result<Self, PolicyError> {
        let file: PolicyFile = toml::from_str(src)?;
        let steps = file
            .enrollment
            .steps
            .into_iter()
            .map(|mut step| {
                if step.instruction.trim().is_empty() {
                    step.instruction = step.pose.instruction().to_string();
                }
                step
            })
            .collect();

        let enrollment = EnrollmentPolicy {
            steps,
            hold: Duration::from_millis(file.enrollment.hold_ms),
        };
        enrollment.validate()?;

        Ok(Self {
            enrollment,
            calendar: file.calendar,
        })
    }

    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let src = std::fs::read_to_string(path).map_err(|source| PolicyError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let policy = Self::from_toml(&src)?;
        tracing::info!(
            path = %path.display(),
            steps = policy.enrollment.len(),
            hold_ms = policy.enrollment.hold.as_millis() as u64,
            holidays = policy.calendar.holidays.len(),
            "loaded scan policy"
        );
        Ok(policy)
    }

    /// The embedded reference policy.
    pub fn reference() -> Result<Self, PolicyError> {
        Self::from_toml(DEFAULT_POLICY_TOML)
    }
}
