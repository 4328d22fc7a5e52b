//! Guided multi-pose enrollment.
//!
//! The sequencer walks an ordered list of required poses. A step is captured
//! when its pose has been held continuously for the policy's hold duration,
//! or on an explicit manual trigger. Any pose break resets the hold timer.
//! While the face in view already matches an enrolled identity, capture is
//! suspended; the hold timer is left as it was.

use crate::frame::Frame;
use crate::policy::{EnrollmentPolicy, EnrollmentStep};
use crate::pose::Pose;
use crate::records::{IdentityAttributes, NewEnrollment};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EnrollmentError {
    #[error("face is already enrolled as {0}")]
    AlreadyEnrolled(String),
    #[error("no face in view")]
    NoFace,
    #[error("enrollment already complete")]
    Complete,
    #[error("enrollment incomplete: {captured}/{total} poses captured")]
    Incomplete { captured: usize, total: usize },
    #[error("identity label must not be empty")]
    EmptyLabel,
}

/// What the detector saw in one sampled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation<'a> {
    NoFace,
    Face {
        pose: Pose,
        /// Label of an enrolled identity this face matches, if any.
        known_as: Option<&'a str>,
    },
}

/// Feedback produced for one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentEvent {
    AlreadyEnrolled {
        label: String,
    },
    Countdown {
        step: usize,
        pose: Pose,
        remaining_secs: u64,
    },
    Instruction {
        step: usize,
        pose: Pose,
        text: String,
    },
    Captured {
        step: usize,
        pose: Pose,
        captured: usize,
        total: usize,
    },
    /// Final pose captured; the sequencer is now terminal.
    ReadyToSave {
        images: usize,
    },
}

pub struct EnrollmentSequencer {
    policy: EnrollmentPolicy,
    step: usize,
    captured: Vec<Frame>,
    pose_held_since: Option<Instant>,
    already_enrolled: Option<String>,
    face_in_view: bool,
    mirror_captures: bool,
}

impl EnrollmentSequencer {
    pub fn new(policy: EnrollmentPolicy) -> Self {
        let capacity = policy.len();
        Self {
            policy,
            step: 0,
            captured: Vec::with_capacity(capacity),
            pose_held_since: None,
            already_enrolled: None,
            face_in_view: false,
            mirror_captures: false,
        }
    }

    /// Store captures mirrored, matching what a user-facing camera preview shows.
    pub fn with_mirrored_captures(mut self, mirror: bool) -> Self {
        self.mirror_captures = mirror;
        self
    }

    pub fn policy(&self) -> &EnrollmentPolicy {
        &self.policy
    }

    pub fn step_index(&self) -> usize {
        self.step
    }

    /// The step being worked on, or `None` once terminal.
    pub fn current_step(&self) -> Option<&EnrollmentStep> {
        if self.is_complete() {
            None
        } else {
            self.policy.steps.get(self.step)
        }
    }

    pub fn captured(&self) -> &[Frame] {
        &self.captured
    }

    pub fn total_steps(&self) -> usize {
        self.policy.len()
    }

    pub fn is_complete(&self) -> bool {
        self.captured.len() >= self.policy.len()
    }

    pub fn already_enrolled(&self) -> Option<&str> {
        self.already_enrolled.as_deref()
    }

    pub fn is_holding(&self) -> bool {
        self.pose_held_since.is_some()
    }

    /// Feed one sampled frame. Returns `None` once terminal.
    pub fn observe(
        &mut self,
        observation: Observation<'_>,
        frame: &Frame,
        now: Instant,
    ) -> Option<EnrollmentEvent> {
        if self.is_complete() {
            return None;
        }

        let pose = match observation {
            Observation::NoFace => {
                self.face_in_view = false;
                self.already_enrolled = None;
                self.pose_held_since = None;
                return Some(self.instruction_event());
            }
            Observation::Face {
                known_as: Some(label),
                ..
            } => {
                self.face_in_view = true;
                self.already_enrolled = Some(label.to_string());
                return Some(EnrollmentEvent::AlreadyEnrolled {
                    label: label.to_string(),
                });
            }
            Observation::Face {
                pose,
                known_as: None,
            } => {
                self.face_in_view = true;
                self.already_enrolled = None;
                pose
            }
        };

        let required = self.policy.steps[self.step].pose;
        if pose != required {
            self.pose_held_since = None;
            return Some(self.instruction_event());
        }

        let hold = self.policy.hold;
        match self.pose_held_since {
            None => {
                self.pose_held_since = Some(now);
                Some(self.countdown_event(hold))
            }
            Some(since) => {
                let elapsed = now.saturating_duration_since(since);
                if elapsed >= hold {
                    Some(self.capture(frame))
                } else {
                    Some(self.countdown_event(hold - elapsed))
                }
            }
        }
    }

    /// Manual capture trigger; bypasses the hold timer.
    pub fn capture_now(&mut self, frame: &Frame) -> Result<EnrollmentEvent, EnrollmentError> {
        if self.is_complete() {
            return Err(EnrollmentError::Complete);
        }
        if let Some(label) = &self.already_enrolled {
            return Err(EnrollmentError::AlreadyEnrolled(label.clone()));
        }
        if !self.face_in_view {
            return Err(EnrollmentError::NoFace);
        }
        Ok(self.capture(frame))
    }

    /// Build the create-or-append request from a completed sequence.
    ///
    /// Captures are kept until [`reset`](Self::reset), so a failed save can be
    /// retried with the same images.
    pub fn take_enrollment(
        &self,
        label: &str,
        attributes: IdentityAttributes,
    ) -> Result<NewEnrollment, EnrollmentError> {
        if !self.is_complete() {
            return Err(EnrollmentError::Incomplete {
                captured: self.captured.len(),
                total: self.policy.len(),
            });
        }
        let label = label.trim();
        if label.is_empty() {
            return Err(EnrollmentError::EmptyLabel);
        }
        Ok(NewEnrollment {
            label: label.to_string(),
            attributes,
            images: self.captured.clone(),
        })
    }

    /// Back to step 0 with no captures.
    pub fn reset(&mut self) {
        self.step = 0;
        self.captured.clear();
        self.pose_held_since = None;
        self.already_enrolled = None;
        self.face_in_view = false;
    }

    fn capture(&mut self, frame: &Frame) -> EnrollmentEvent {
        let image = if self.mirror_captures {
            frame.mirrored()
        } else {
            frame.clone()
        };
        self.captured.push(image);
        self.pose_held_since = None;

        let step = self.step;
        let pose = self.policy.steps[step].pose;
        let total = self.policy.len();
        tracing::info!(step, pose = %pose, captured = self.captured.len(), total, "enrollment pose captured");

        if self.is_complete() {
            tracing::info!(images = self.captured.len(), "enrollment sequence complete");
            EnrollmentEvent::ReadyToSave {
                images: self.captured.len(),
            }
        } else {
            self.step += 1;
            EnrollmentEvent::Captured {
                step,
                pose,
                captured: self.captured.len(),
                total,
            }
        }
    }

    fn instruction_event(&self) -> EnrollmentEvent {
        let step = &self.policy.steps[self.step];
        EnrollmentEvent::Instruction {
            step: self.step,
            pose: step.pose,
            text: step.instruction.clone(),
        }
    }

    fn countdown_event(&self, remaining: Duration) -> EnrollmentEvent {
        EnrollmentEvent::Countdown {
            step: self.step,
            pose: self.policy.steps[self.step].pose,
            remaining_secs: ceil_secs(remaining),
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let ms = d.as_millis() as u64;
    ms.div_ceil(1000)
}
