use crate::scan::ScanMode;
use rollcall_core::attendance::DEFAULT_IN_FLIGHT_COOLDOWN;
use rollcall_core::{EnrollmentPolicy, ATTENDANCE_MATCH_THRESHOLD, ENROLLMENT_MATCH_THRESHOLD};
use std::time::Duration;

/// Scan loop tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    /// Sampling period in enrollment mode.
    pub enrollment_interval: Duration,
    /// Sampling period in attendance mode.
    pub attendance_interval: Duration,
    /// Match threshold used to detect already-enrolled faces.
    pub enrollment_threshold: f32,
    /// Match threshold used to mark attendance.
    pub attendance_threshold: f32,
    /// Lifetime of an attendance in-flight lock.
    pub in_flight_cooldown: Duration,
    pub enrollment: EnrollmentPolicy,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            enrollment_interval: Duration::from_millis(500),
            attendance_interval: Duration::from_millis(1000),
            enrollment_threshold: ENROLLMENT_MATCH_THRESHOLD,
            attendance_threshold: ATTENDANCE_MATCH_THRESHOLD,
            in_flight_cooldown: DEFAULT_IN_FLIGHT_COOLDOWN,
            enrollment: EnrollmentPolicy::default(),
        }
    }
}

impl ScanConfig {
    /// Load from `ROLLCALL_*` environment variables, falling back to the
    /// reference values. `enrollment` is the policy to use for capture; a
    /// `ROLLCALL_HOLD_MS` override replaces its hold duration.
    pub fn from_env(enrollment: EnrollmentPolicy) -> Self {
        Self::from_lookup(enrollment, |key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup<F>(enrollment: EnrollmentPolicy, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let hold = millis(&lookup, "ROLLCALL_HOLD_MS", enrollment.hold);
        Self {
            enrollment_interval: millis(&lookup, "ROLLCALL_ENROLL_INTERVAL_MS", defaults.enrollment_interval),
            attendance_interval: millis(&lookup, "ROLLCALL_ATTEND_INTERVAL_MS", defaults.attendance_interval),
            enrollment_threshold: float(&lookup, "ROLLCALL_ENROLL_THRESHOLD", defaults.enrollment_threshold),
            attendance_threshold: float(&lookup, "ROLLCALL_ATTEND_THRESHOLD", defaults.attendance_threshold),
            in_flight_cooldown: millis(&lookup, "ROLLCALL_COOLDOWN_MS", defaults.in_flight_cooldown),
            enrollment: enrollment.with_hold(hold),
        }
    }

    pub fn interval(&self, mode: ScanMode) -> Duration {
        match mode {
            ScanMode::Enrollment => self.enrollment_interval,
            ScanMode::Attendance => self.attendance_interval,
        }
    }
}

fn float<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: f32) -> f32 {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn millis<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: Duration) -> Duration {
    lookup(key)
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&ms| ms > 0)
        .map(Duration::from_millis)
        .unwrap_or(default)
}
