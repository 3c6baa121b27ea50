//! Data models for attendance tracking.
//!
//! This module contains the typed records the store layers pass around:
//!
//! - `Sheet`: one tracked roster, keyed by its upstream spreadsheet id
//! - `TeamMember`: one person within a sheet
//! - `AttendanceStatus`, `AttendanceRecord`, `AttendanceChange`: per-day status
//! - `ActiveUser`: ephemeral per-session presence heartbeat

pub mod attendance;
pub mod presence;
pub mod sheet;

pub use attendance::{
    AttendanceChange, AttendanceMap, AttendanceRecord, AttendanceStatus, AttendanceUpdate,
};
pub use presence::{ActiveUser, PRESENCE_TIMEOUT_SECS};
pub use sheet::{Sheet, TeamMember, DEFAULT_END_DATE, DEFAULT_START_DATE};
