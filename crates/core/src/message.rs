use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::STATUS_NONE;

/// Flat record posted to the receiver.
///
/// Every field is always serialized; fields that do not apply to a given
/// message carry their zero value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub token: String,
    pub action: String,
    pub pid: u32,
    pub status: String,
    /// Produced snapshot on backup completion, restored snapshot on restore.
    pub snapshot: String,
    #[serde(rename = "start-time")]
    pub start_time: DateTime<Utc>,
    pub successful: bool,
    pub error_msg: String,

    #[serde(rename = "elapsed")]
    pub elapsed_seconds: u64,
    pub files_processed: u64,
    pub bytes_processed: u64,
    pub errors: u64,

    pub eta: u64,
    pub has_eta: bool,

    // Only populated for status=done.
    pub files_new: u64,
    pub files_changed: u64,
    pub files_unmodified: u64,
    pub dirs_new: u64,
    pub dirs_changed: u64,
    pub dirs_unmodified: u64,
}

impl StatusMessage {
    pub fn new(token: &str, action: &str, status: &str, start_time: DateTime<Utc>) -> Self {
        Self {
            token: token.to_string(),
            action: action.to_string(),
            pid: std::process::id(),
            status: status.to_string(),
            snapshot: String::new(),
            start_time,
            successful: true,
            error_msg: String::new(),
            elapsed_seconds: 0,
            files_processed: 0,
            bytes_processed: 0,
            errors: 0,
            eta: 0,
            has_eta: false,
            files_new: 0,
            files_changed: 0,
            files_unmodified: 0,
            dirs_new: 0,
            dirs_changed: 0,
            dirs_unmodified: 0,
        }
    }

    /// Messages built while the reporter is idle must never leave the process.
    pub fn is_sentinel(&self) -> bool {
        self.status == STATUS_NONE
    }
}
