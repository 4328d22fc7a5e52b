//! Head-pose classification from landmark geometry.
//!
//! A geometric heuristic, not a learned model: nose-tip offset from the eye
//! midpoint, normalised by inter-eye distance, so the result does not depend
//! on face size or distance from the camera.

use crate::types::Landmarks;
use serde::{Deserialize, Serialize};
use std::fmt;

// --- Thresholds, as fractions of inter-eye distance ---
const PITCH_DOWN: f32 = 0.35;
const PITCH_UP: f32 = -0.10;
const YAW_TURN: f32 = 0.25;
const YAW_JAW: f32 = 0.10;
const FRONT_YAW: f32 = 0.10;
const FRONT_PITCH_MIN: f32 = -0.10;
const FRONT_PITCH_MAX: f32 = 0.40;

/// Coarse head-orientation category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pose {
    Front,
    Left,
    Right,
    Up,
    Down,
    JawLeft,
    JawRight,
    Unknown,
}

impl Pose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pose::Front => "front",
            Pose::Left => "left",
            Pose::Right => "right",
            Pose::Up => "up",
            Pose::Down => "down",
            Pose::JawLeft => "jaw_left",
            Pose::JawRight => "jaw_right",
            Pose::Unknown => "unknown",
        }
    }

    /// Corrective instruction shown while the user is not holding this pose.
    pub fn instruction(&self) -> &'static str {
        match self {
            Pose::Front => "Look straight at the camera",
            Pose::Left => "Turn your head to the left",
            Pose::Right => "Turn your head to the right",
            Pose::Up => "Tilt your head up",
            Pose::Down => "Tilt your head down",
            Pose::JawLeft => "Turn slightly left to show your jawline",
            Pose::JawRight => "Turn slightly right to show your jawline",
            Pose::Unknown => "Position your face in the frame",
        }
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Yaw and pitch offsets of the nose tip, in units of inter-eye distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseRatios {
    pub yaw: f32,
    pub pitch: f32,
}

impl PoseRatios {
    /// Returns `None` if a reference point is missing or the eyes coincide.
    pub fn from_landmarks(landmarks: &Landmarks) -> Option<Self> {
        let left = landmarks.left_eye?;
        let right = landmarks.right_eye?;
        let nose = landmarks.nose_tip?;

        let eye_mid = left.midpoint(&right);
        let eye_dist = left.distance(&right);
        if !eye_dist.is_finite() || eye_dist <= f32::EPSILON {
            return None;
        }

        let ratios = Self {
            yaw: (nose.x - eye_mid.x) / eye_dist,
            pitch: (nose.y - eye_mid.y) / eye_dist,
        };
        if ratios.yaw.is_finite() && ratios.pitch.is_finite() {
            Some(ratios)
        } else {
            None
        }
    }

    /// First match wins: pitch is checked before yaw.
    pub fn pose(&self) -> Pose {
        let Self { yaw, pitch } = *self;

        if pitch > PITCH_DOWN {
            Pose::Down
        } else if pitch < PITCH_UP {
            Pose::Up
        } else if yaw > YAW_TURN {
            Pose::Left
        } else if yaw < -YAW_TURN {
            Pose::Right
        } else if yaw.abs() > YAW_JAW && yaw.abs() < YAW_TURN {
            if yaw > 0.0 {
                Pose::JawLeft
            } else {
                Pose::JawRight
            }
        } else if yaw.abs() < FRONT_YAW && pitch > FRONT_PITCH_MIN && pitch < FRONT_PITCH_MAX {
            Pose::Front
        } else {
            Pose::Unknown
        }
    }
}

/// Classify head pose. Fails closed to [`Pose::Unknown`].
pub fn classify(landmarks: &Landmarks) -> Pose {
    PoseRatios::from_landmarks(landmarks)
        .map(|r| r.pose())
        .unwrap_or(Pose::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Point;

    /// Eyes at (0,0) and (100,0): inter-eye distance 100, midpoint (50,0).
    fn face(yaw: f32, pitch: f32) -> Landmarks {
        Landmarks::new(
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(50.0 + yaw * 100.0, pitch * 100.0),
        )
    }

    #[test]
    fn test_front() {
        assert_eq!(classify(&face(0.0, 0.15)), Pose::Front);
        assert_eq!(classify(&face(0.02, 0.15)), Pose::Front);
        assert_eq!(classify(&face(-0.05, 0.0)), Pose::Front);
    }

    #[test]
    fn test_left_regardless_of_pitch_below_down() {
        for pitch in [-0.09, 0.0, 0.15, 0.30, 0.34] {
            assert_eq!(classify(&face(0.30, pitch)), Pose::Left, "pitch {pitch}");
        }
    }

    #[test]
    fn test_right() {
        assert_eq!(classify(&face(-0.30, 0.1)), Pose::Right);
    }

    #[test]
    fn test_pitch_precedes_yaw() {
        assert_eq!(classify(&face(0.30, 0.36)), Pose::Down);
        assert_eq!(classify(&face(-0.30, -0.11)), Pose::Up);
    }

    #[test]
    fn test_jaw() {
        assert_eq!(classify(&face(0.15, 0.1)), Pose::JawLeft);
        assert_eq!(classify(&face(-0.15, 0.1)), Pose::JawRight);
    }

    #[test]
    fn test_boundaries_fall_through_to_unknown() {
        // Exactly on a threshold matches neither neighbouring band.
        assert_eq!(classify(&face(0.25, 0.1)), Pose::Unknown);
        assert_eq!(classify(&face(0.10, 0.1)), Pose::Unknown);
        assert_eq!(classify(&face(0.0, -0.10)), Pose::Unknown);
    }

    #[test]
    fn test_scale_invariant() {
        let small = Landmarks::new(
            Point::new(10.0, 10.0),
            Point::new(20.0, 10.0),
            Point::new(18.0, 11.0),
        );
        let large = Landmarks::new(
            Point::new(100.0, 100.0),
            Point::new(200.0, 100.0),
            Point::new(180.0, 110.0),
        );
        assert_eq!(classify(&small), classify(&large));
        assert_eq!(classify(&small), Pose::Left);
    }

    #[test]
    fn test_missing_points_fail_closed() {
        let mut lm = face(0.0, 0.1);
        lm.nose_tip = None;
        assert_eq!(classify(&lm), Pose::Unknown);
        assert_eq!(classify(&Landmarks::default()), Pose::Unknown);
    }

    #[test]
    fn test_coincident_eyes_fail_closed() {
        let lm = Landmarks::new(Point::new(5.0, 5.0), Point::new(5.0, 5.0), Point::new(5.0, 9.0));
        assert_eq!(classify(&lm), Pose::Unknown);
    }

    #[test]
    fn test_pose_serde_snake_case() {
        let json = serde_json::to_string(&Pose::JawLeft).unwrap();
        assert_eq!(json, "\"jaw_left\"");
        let back: Pose = serde_json::from_str("\"jaw_right\"").unwrap();
        assert_eq!(back, Pose::JawRight);
    }
}
