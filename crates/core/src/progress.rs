use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub files: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub files: u64,
    pub dirs: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCounts {
    pub new: u64,
    pub changed: u64,
    pub unchanged: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub files: ChangeCounts,
    pub dirs: ChangeCounts,
}

/// Read-only view of a running job's counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub started_at: DateTime<Utc>,
    /// Files/bytes actually backed up or restored so far.
    pub processed: Counts,
    /// Files/bytes found by the discovery scan so far.
    pub scanned: Counts,
    pub total: Totals,
    pub errors: u64,
    pub eta_seconds: Option<u64>,
    pub summary: ChangeSummary,
}

impl ProgressSnapshot {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            processed: Counts::default(),
            scanned: Counts::default(),
            total: Totals::default(),
            errors: 0,
            eta_seconds: None,
            summary: ChangeSummary::default(),
        }
    }

    /// Remaining-time estimate, if one is worth publishing.
    ///
    /// Requires a known total, a positive estimate, and bytes still outstanding.
    pub fn publishable_eta(&self) -> Option<u64> {
        let has_total = self.total.files != 0 || self.total.dirs != 0;
        match self.eta_seconds {
            Some(eta) if has_total && eta > 0 && self.processed.bytes < self.total.bytes => {
                Some(eta)
            }
            _ => None,
        }
    }
}

pub trait ProgressSource: Send + Sync {
    fn snapshot(&self) -> ProgressSnapshot;
}

/// Thread-safe counters a job can update while a reporter polls them.
#[derive(Debug)]
pub struct ProgressCounters {
    inner: Mutex<ProgressSnapshot>,
}

impl Default for ProgressCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(started_at: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(ProgressSnapshot::new(started_at)),
        }
    }

    fn update(&self, f: impl FnOnce(&mut ProgressSnapshot)) {
        // A poisoned lock still holds plain counters; keep counting.
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }

    pub fn record_scanned(&self, files: u64, bytes: u64) {
        self.update(|s| {
            s.scanned.files += files;
            s.scanned.bytes += bytes;
        });
    }

    pub fn record_processed(&self, files: u64, bytes: u64) {
        self.update(|s| {
            s.processed.files += files;
            s.processed.bytes += bytes;
        });
    }

    pub fn record_error(&self) {
        self.update(|s| s.errors += 1);
    }

    pub fn set_total(&self, total: Totals) {
        self.update(|s| s.total = total);
    }

    pub fn set_eta(&self, eta_seconds: Option<u64>) {
        self.update(|s| s.eta_seconds = eta_seconds);
    }

    pub fn set_summary(&self, summary: ChangeSummary) {
        self.update(|s| s.summary = summary);
    }
}

impl ProgressSource for ProgressCounters {
    fn snapshot(&self) -> ProgressSnapshot {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
