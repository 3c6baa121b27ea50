use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-day status of one person. A closed set of tags; anything else is
/// rejected at the boundary rather than stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    #[default]
    Unmarked,
    Present,
    Absent,
    Sick,
    Leave,
}

#[derive(Error, Debug)]
#[error("unknown attendance status: {0}")]
pub struct UnknownStatus(pub String);

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Unmarked => "unmarked",
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Sick => "sick",
            AttendanceStatus::Leave => "leave",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unmarked" => Ok(AttendanceStatus::Unmarked),
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "sick" => Ok(AttendanceStatus::Sick),
            "leave" => Ok(AttendanceStatus::Leave),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Status of one person on one calendar date within one sheet.
///
/// `updated_at` is an RFC 3339 timestamp assigned at the moment of the local
/// write; last-writer-wins comparisons happen on this value, never on the
/// time the record eventually reaches the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub sheet_id: String,
    pub person_code: String,
    /// ISO date string, `YYYY-MM-DD`.
    pub date: String,
    pub status: AttendanceStatus,
    pub updated_at: String,
    /// Session that produced the update. Empty means unattributed (legacy);
    /// such records never appear in incremental change feeds.
    pub session_id: String,
}

/// One row of an incremental change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceChange {
    pub person_code: String,
    pub date: String,
    pub status: AttendanceStatus,
    pub updated_at: String,
}

/// Caller-supplied cell for a batched attendance write. The timestamp and
/// session are assigned once per batch by the store.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceUpdate {
    pub person_code: String,
    pub date: String,
    pub status: AttendanceStatus,
}

/// person code -> date -> status, the shape clients render from.
pub type AttendanceMap = HashMap<String, HashMap<String, AttendanceStatus>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_tags() {
        for tag in ["unmarked", "present", "absent", "sick", "leave"] {
            let status: AttendanceStatus = tag.parse().unwrap();
            assert_eq!(status.as_str(), tag);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!("late".parse::<AttendanceStatus>().is_err());
        assert!("Present".parse::<AttendanceStatus>().is_err());
    }

    #[test]
    fn status_serializes_as_lowercase_tag() {
        let json = serde_json::to_string(&AttendanceStatus::Present).unwrap();
        assert_eq!(json, r#""present""#);
    }
}
