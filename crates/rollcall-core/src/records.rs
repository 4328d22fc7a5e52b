//! Identity and attendance records, and the persistence interfaces the
//! scan loop talks to.

use crate::frame::Frame;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Descriptive attributes of an enrolled identity. Opaque to matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityAttributes {
    pub class: String,
    pub roll_no: String,
}

/// An enrolled identity as held by the persistence layer.
#[derive(Debug, Clone)]
pub struct Identity {
    pub label: String,
    pub attributes: IdentityAttributes,
    pub images: Vec<Frame>,
}

/// A create-or-append request produced by a completed enrollment.
#[derive(Debug, Clone)]
pub struct NewEnrollment {
    pub label: String,
    pub attributes: IdentityAttributes,
    pub images: Vec<Frame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Leave,
    Holiday,
    #[serde(rename = "Not Marked")]
    NotMarked,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Absent => "Absent",
            AttendanceStatus::Leave => "Leave",
            AttendanceStatus::Holiday => "Holiday",
            AttendanceStatus::NotMarked => "Not Marked",
        }
    }

    /// Statuses that can be written by a mark operation.
    pub fn is_recordable(&self) -> bool {
        matches!(
            self,
            AttendanceStatus::Present | AttendanceStatus::Absent | AttendanceStatus::Leave
        )
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "leave" => Ok(AttendanceStatus::Leave),
            "holiday" => Ok(AttendanceStatus::Holiday),
            "not marked" | "not_marked" => Ok(AttendanceStatus::NotMarked),
            other => Err(StoreError::Invalid(format!("unknown attendance status: {other}"))),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity not found: {0}")]
    NotFound(String),
    #[error("invalid record: {0}")]
    Invalid(String),
    #[error("storage backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Durable storage of enrolled identities.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn list_identities(&self) -> Result<Vec<Identity>, StoreError>;

    /// Create the identity, or append images and overwrite attributes if the
    /// label already exists.
    async fn create_or_append_identity(&self, enrollment: NewEnrollment) -> Result<(), StoreError>;

    async fn update_identity(
        &self,
        label: &str,
        attributes: IdentityAttributes,
    ) -> Result<(), StoreError>;

    async fn rename_identity(&self, label: &str, new_label: &str) -> Result<(), StoreError>;

    async fn delete_identity(&self, label: &str) -> Result<(), StoreError>;
}

/// Durable attendance log.
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    async fn mark_attendance(
        &self,
        label: &str,
        date: NaiveDate,
        status: AttendanceStatus,
    ) -> Result<(), StoreError>;

    async fn attendance_status(
        &self,
        label: &str,
        date: NaiveDate,
    ) -> Result<AttendanceStatus, StoreError>;

    /// Status of every enrolled identity on `date`, keyed by label.
    async fn attendance_for_date(
        &self,
        date: NaiveDate,
    ) -> Result<BTreeMap<String, AttendanceStatus>, StoreError>;

    /// Status of one identity for each day in `from..=to`.
    async fn attendance_history(
        &self,
        label: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<(NaiveDate, AttendanceStatus)>, StoreError>;
}
