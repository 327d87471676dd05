//! Typed attendance rows and write outcomes.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::Serialize;
use std::fmt;

/// Local timestamp format stored in the `timestamp` column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    /// Recorded locally, not yet synced.
    Pending,
    Success,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for AttendanceStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for AttendanceStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// One attendance row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub id: i64,
    /// Student number (`nim` column).
    pub identity_id: String,
    pub display_name: String,
    pub meeting: u32,
    pub timestamp: String,
    pub status: AttendanceStatus,
}

/// Result of [`record_attendance`](crate::AttendanceStore::record_attendance).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded { id: i64 },
    /// A row for this person and meeting already exists; nothing was written.
    AlreadyRecorded { id: i64 },
    Failed { message: String },
}

impl RecordOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    pub fn id(&self) -> Option<i64> {
        match self {
            Self::Recorded { id } | Self::AlreadyRecorded { id } => Some(*id),
            Self::Failed { .. } => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Recorded { .. } => "attendance recorded",
            Self::AlreadyRecorded { .. } => "already recorded",
            Self::Failed { message } => message,
        }
    }
}

/// Per-class totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassSummary {
    pub class_code: String,
    pub records: u64,
    pub pending: u64,
    pub synced: u64,
    pub meetings: u64,
    pub identities: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_messages() {
        assert!(RecordOutcome::Recorded { id: 1 }.is_success());
        let again = RecordOutcome::AlreadyRecorded { id: 1 };
        assert!(again.is_success());
        assert_eq!(again.message(), "already recorded");
        assert_eq!(again.id(), Some(1));

        let failed = RecordOutcome::Failed {
            message: "disk full".into(),
        };
        assert!(!failed.is_success());
        assert_eq!(failed.message(), "disk full");
        assert_eq!(failed.id(), None);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&AttendanceStatus::Pending).unwrap(),
            "\"pending\""
        );
    }
}
