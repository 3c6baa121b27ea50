use serde::{Deserialize, Serialize};

/// Sessions with no heartbeat for this long are considered gone and are
/// reaped lazily the next time presence is read.
pub const PRESENCE_TIMEOUT_SECS: f64 = 30.0;

/// Ephemeral heartbeat record for one client session viewing one sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUser {
    pub session_id: String,
    /// Display string shown to other viewers, usually an email.
    pub email: String,
    pub sheet_id: String,
    /// Unix seconds of the last heartbeat.
    pub last_seen: f64,
}
