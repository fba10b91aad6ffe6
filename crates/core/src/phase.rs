use std::fmt;

use crate::{Error, Result};

/// Status string of the idle phase. Reserved: never transmitted.
pub const STATUS_NONE: &str = "none";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Backup,
    Restore,
}

impl JobKind {
    pub fn action(self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Restore => "restore",
        }
    }

    fn working_status(self) -> &'static str {
        match self {
            Self::Backup => "doing_backup",
            Self::Restore => "doing_restore",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action())
    }
}

/// Lifecycle stage summarized by a reporter.
///
/// Phases only move forward: `None -> ReadingIndex -> ScanningData ->
/// DoingWork -> Done`. `Done` is entered transiently while the completion
/// message is built and the reporter then falls back to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    #[default]
    None,
    ReadingIndex,
    ScanningData,
    DoingWork,
    Done,
}

impl Phase {
    pub fn status(self, kind: JobKind) -> &'static str {
        match self {
            Self::None => STATUS_NONE,
            Self::ReadingIndex => "indexing",
            Self::ScanningData => "scanning",
            Self::DoingWork => kind.working_status(),
            Self::Done => "done",
        }
    }

    pub fn from_status(kind: JobKind, status: &str) -> Result<Self> {
        [
            Self::None,
            Self::ReadingIndex,
            Self::ScanningData,
            Self::DoingWork,
            Self::Done,
        ]
        .into_iter()
        .find(|p| p.status(kind) == status)
        .ok_or_else(|| Error::InvalidPhase {
            value: status.to_string(),
        })
    }

    fn rank(self) -> u8 {
        match self {
            Self::None => 0,
            Self::ReadingIndex => 1,
            Self::ScanningData => 2,
            Self::DoingWork => 3,
            Self::Done => 4,
        }
    }

    /// Whether a job may move from `self` to `next` on its own.
    ///
    /// `Done` and the reset to `None` belong to the completion path only.
    pub fn can_advance_to(self, next: Phase) -> bool {
        !matches!(next, Self::None | Self::Done) && next.rank() > self.rank()
    }
}
