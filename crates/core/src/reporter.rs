use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::delivery::{Courier, DeliveryPolicy};
use crate::message::StatusMessage;
use crate::phase::{JobKind, Phase};
use crate::progress::{ProgressSnapshot, ProgressSource};
use crate::scheduler::Ticker;
use crate::transport::{HttpTransport, Transport};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct ReporterOptions {
    /// Receiver URL. Empty disables reporting.
    pub url: String,
    pub token: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub delivery: DeliveryPolicy,
}

impl Default for ReporterOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(10),
            delivery: DeliveryPolicy::default(),
        }
    }
}

/// The job a reporter observes.
#[derive(Clone)]
pub struct JobContext {
    pub kind: JobKind,
    pub source: Arc<dyn ProgressSource>,
    /// Snapshot being restored; stamped on every restore message.
    pub snapshot: Option<String>,
}

impl JobContext {
    pub fn backup(source: Arc<dyn ProgressSource>) -> Self {
        Self {
            kind: JobKind::Backup,
            source,
            snapshot: None,
        }
    }

    pub fn restore(source: Arc<dyn ProgressSource>, snapshot: impl Into<String>) -> Self {
        Self {
            kind: JobKind::Restore,
            source,
            snapshot: Some(snapshot.into()),
        }
    }
}

struct Shared {
    kind: JobKind,
    token: String,
    snapshot: String,
    started_at: DateTime<Utc>,
    source: Arc<dyn ProgressSource>,
    phase: Mutex<Phase>,
    courier: Courier,
}

impl Shared {
    fn lock_phase(&self) -> MutexGuard<'_, Phase> {
        // Phase is Copy, so a poisoned lock still holds a valid value.
        self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn base_message(&self, phase: Phase) -> StatusMessage {
        let mut msg = StatusMessage::new(
            &self.token,
            self.kind.action(),
            phase.status(self.kind),
            self.started_at,
        );
        msg.snapshot = self.snapshot.clone();
        msg
    }

    fn progress_message(&self, phase: Phase) -> StatusMessage {
        let snap = self.source.snapshot();
        let mut msg = self.base_message(phase);
        msg.elapsed_seconds = elapsed_seconds(&snap);

        let counts = if phase == Phase::ScanningData {
            snap.scanned
        } else {
            snap.processed
        };
        msg.files_processed = counts.files;
        msg.bytes_processed = counts.bytes;
        msg.errors = snap.errors;

        if let Some(eta) = snap.publishable_eta() {
            msg.has_eta = true;
            msg.eta = eta;
        }
        msg
    }

    fn completion_message(&self, phase: Phase, produced: Option<&str>) -> StatusMessage {
        let snap = self.source.snapshot();
        let mut msg = self.base_message(phase);
        match (self.kind, produced) {
            (JobKind::Backup, Some(id)) => msg.snapshot = id.to_string(),
            (JobKind::Restore, Some(id)) if id != self.snapshot => {
                tracing::warn!(
                    event = "reporter.snapshot_ignored",
                    restored = %self.snapshot,
                    produced = id,
                    "reporter.snapshot_ignored"
                );
            }
            _ => {}
        }
        msg.elapsed_seconds = elapsed_seconds(&snap);
        msg.files_processed = snap.processed.files;
        msg.bytes_processed = snap.processed.bytes;
        msg.errors = snap.errors;

        let summary = snap.summary;
        msg.files_new = summary.files.new;
        msg.files_changed = summary.files.changed;
        msg.files_unmodified = summary.files.unchanged;
        msg.dirs_new = summary.dirs.new;
        msg.dirs_changed = summary.dirs.changed;
        msg.dirs_unmodified = summary.dirs.unchanged;
        msg
    }

    async fn report_update(&self) {
        let msg = {
            let phase = self.lock_phase();
            self.progress_message(*phase)
        };
        self.courier.send(&msg).await;
    }
}

fn elapsed_seconds(snap: &ProgressSnapshot) -> u64 {
    (Utc::now() - snap.started_at).num_seconds().max(0) as u64
}

/// Publishes the progress of one backup or restore job to an HTTP receiver.
///
/// A reporter built without a receiver URL is disabled and every operation
/// is a no-op. An enabled reporter sends an update every `interval` until it
/// is finished or dropped.
pub struct Reporter {
    shared: Option<Arc<Shared>>,
    ticker: Option<Ticker>,
}

impl Reporter {
    pub fn disabled() -> Self {
        Self {
            shared: None,
            ticker: None,
        }
    }

    /// Starts a reporter delivering over HTTP. See [`Reporter::with_transport`].
    pub fn start(job: JobContext, options: ReporterOptions) -> Result<Self> {
        if options.url.is_empty() {
            return Ok(Self::disabled());
        }
        let transport = Arc::new(HttpTransport::new(options.timeout)?);
        Self::with_transport(job, options, transport)
    }

    /// Starts a reporter over `transport`.
    ///
    /// An enabled reporter spawns its periodic task on the current Tokio
    /// runtime; without one this returns `Error::NoRuntime`.
    pub fn with_transport(
        job: JobContext,
        options: ReporterOptions,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        if options.url.is_empty() {
            return Ok(Self::disabled());
        }
        if options.interval.is_zero() {
            return Err(Error::InvalidConfig {
                message: "report interval must be > 0".to_string(),
            });
        }
        tokio::runtime::Handle::try_current().map_err(|e| Error::NoRuntime {
            message: e.to_string(),
        })?;

        tracing::info!(
            event = "reporter.start",
            action = job.kind.action(),
            url = %options.url,
            transport = transport.name(),
            interval_ms = options.interval.as_millis() as u64,
            "reporter.start"
        );

        let shared = Arc::new(Shared {
            kind: job.kind,
            token: options.token,
            snapshot: job.snapshot.unwrap_or_default(),
            started_at: Utc::now(),
            source: job.source,
            phase: Mutex::new(Phase::None),
            courier: Courier::new(options.url, transport, options.delivery),
        });

        let ticking = shared.clone();
        let ticker = Ticker::spawn(options.interval, move || {
            let shared = ticking.clone();
            async move { shared.report_update().await }
        });

        Ok(Self {
            shared: Some(shared),
            ticker: Some(ticker),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.is_some()
    }

    pub fn phase(&self) -> Phase {
        match &self.shared {
            Some(shared) => *shared.lock_phase(),
            None => Phase::None,
        }
    }

    /// True once repeated delivery failures have switched delivery off.
    pub fn delivery_suspended(&self) -> bool {
        self.shared
            .as_ref()
            .is_some_and(|s| s.courier.is_open())
    }

    /// Moves the job forward. Backward moves and `Done` are ignored.
    pub fn set_phase(&self, next: Phase) {
        let Some(shared) = &self.shared else {
            return;
        };
        let mut phase = shared.lock_phase();
        let current = *phase;
        if !current.can_advance_to(next) {
            tracing::warn!(
                event = "reporter.invalid_transition",
                from = ?current,
                to = ?next,
                "reporter.invalid_transition"
            );
            return;
        }
        tracing::debug!(
            event = "reporter.phase",
            action = shared.kind.action(),
            from = ?current,
            to = ?next,
            "reporter.phase"
        );
        *phase = next;
    }

    pub async fn report_update(&self) {
        if let Some(shared) = &self.shared {
            shared.report_update().await;
        }
    }

    /// Sends a failure notice for the current phase. The phase is unchanged.
    pub async fn report_error(&self, err: impl fmt::Display) {
        let Some(shared) = &self.shared else {
            return;
        };
        let msg = {
            let phase = shared.lock_phase();
            let mut msg = shared.progress_message(*phase);
            msg.successful = false;
            msg.error_msg = err.to_string();
            msg
        };
        shared.courier.send(&msg).await;
    }

    /// Sends the completion message and returns the reporter to `Phase::None`.
    ///
    /// `snapshot` is the snapshot a backup produced. Restores always report
    /// the snapshot being restored and ignore it.
    pub async fn report_done(&self, snapshot: Option<&str>) {
        let Some(shared) = &self.shared else {
            return;
        };
        // Done must never be observable outside this critical section.
        let msg = {
            let mut phase = shared.lock_phase();
            *phase = Phase::Done;
            let msg = shared.completion_message(*phase, snapshot);
            *phase = Phase::None;
            msg
        };
        tracing::info!(
            event = "reporter.done",
            action = shared.kind.action(),
            snapshot = %msg.snapshot,
            "reporter.done"
        );
        shared.courier.send(&msg).await;
    }

    /// Stops periodic updates and waits for an in-flight one to finish.
    pub async fn finish(mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::STATUS_NONE;
    use crate::progress::{ChangeCounts, ChangeSummary, ProgressCounters, Totals};
    use crate::transport::InMemoryTransport;
    use std::sync::atomic::Ordering;

    const QUIET: Duration = Duration::from_secs(3600);

    fn options(interval: Duration) -> ReporterOptions {
        ReporterOptions {
            url: "http://receiver.test/status".to_string(),
            token: "tok-1".to_string(),
            interval,
            timeout: Duration::from_secs(1),
            delivery: DeliveryPolicy {
                max_attempts: 1,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
                failure_threshold: 100,
            },
        }
    }

    fn backup_reporter(
        counters: Arc<ProgressCounters>,
        interval: Duration,
    ) -> (Reporter, Arc<InMemoryTransport>) {
        let transport = Arc::new(InMemoryTransport::new());
        let reporter = Reporter::with_transport(
            JobContext::backup(counters),
            options(interval),
            transport.clone(),
        )
        .unwrap();
        (reporter, transport)
    }

    fn split_counters() -> Arc<ProgressCounters> {
        let counters = Arc::new(ProgressCounters::new());
        counters.record_scanned(50, 1000);
        counters.record_processed(10, 200);
        counters
    }

    #[tokio::test]
    async fn update_status_follows_phase() {
        let (reporter, transport) = backup_reporter(split_counters(), QUIET);

        reporter.report_update().await;
        assert!(transport.messages().is_empty());

        for phase in [Phase::ReadingIndex, Phase::ScanningData, Phase::DoingWork] {
            reporter.set_phase(phase);
            reporter.report_update().await;
        }
        assert_eq!(
            transport.statuses(),
            vec!["indexing", "scanning", "doing_backup"]
        );
        for msg in transport.messages() {
            assert_eq!(msg.action, "backup");
            assert_eq!(msg.token, "tok-1");
            assert_eq!(msg.pid, std::process::id());
            assert!(msg.successful);
            assert!(msg.error_msg.is_empty());
        }
        reporter.finish().await;
    }

    #[tokio::test]
    async fn restore_update_status_follows_phase() {
        let transport = Arc::new(InMemoryTransport::new());
        let reporter = Reporter::with_transport(
            JobContext::restore(split_counters(), "snap-3"),
            options(QUIET),
            transport.clone(),
        )
        .unwrap();

        reporter.report_update().await;
        for phase in [Phase::ReadingIndex, Phase::ScanningData, Phase::DoingWork] {
            reporter.set_phase(phase);
            reporter.report_update().await;
        }

        assert_eq!(
            transport.statuses(),
            vec!["indexing", "scanning", "doing_restore"]
        );
        let msgs = transport.messages();
        assert_eq!((msgs[1].files_processed, msgs[1].bytes_processed), (50, 1000));
        assert_eq!((msgs[2].files_processed, msgs[2].bytes_processed), (10, 200));
        assert!(msgs.iter().all(|m| m.action == "restore"));
        reporter.finish().await;
    }

    #[tokio::test]
    async fn scanning_reports_discovery_counters() {
        let (reporter, transport) = backup_reporter(split_counters(), QUIET);

        reporter.set_phase(Phase::ScanningData);
        reporter.report_update().await;
        reporter.set_phase(Phase::DoingWork);
        reporter.report_update().await;

        let msgs = transport.messages();
        assert_eq!((msgs[0].files_processed, msgs[0].bytes_processed), (50, 1000));
        assert_eq!((msgs[1].files_processed, msgs[1].bytes_processed), (10, 200));
    }

    #[tokio::test]
    async fn eta_attached_only_when_meaningful() {
        let counters = split_counters();
        let (reporter, transport) = backup_reporter(counters.clone(), QUIET);
        reporter.set_phase(Phase::DoingWork);

        counters.set_eta(Some(40));
        reporter.report_update().await;

        counters.set_total(Totals {
            files: 50,
            dirs: 4,
            bytes: 1000,
        });
        reporter.report_update().await;

        counters.record_processed(40, 800);
        reporter.report_update().await;

        let msgs = transport.messages();
        assert!(!msgs[0].has_eta);
        assert_eq!(msgs[0].eta, 0);
        assert!(msgs[1].has_eta);
        assert_eq!(msgs[1].eta, 40);
        assert!(!msgs[2].has_eta);
        assert_eq!(msgs[2].eta, 0);
    }

    #[tokio::test]
    async fn done_resets_phase_and_suppresses_following_ticks() {
        let (reporter, transport) = backup_reporter(split_counters(), QUIET);
        reporter.set_phase(Phase::DoingWork);

        reporter.report_done(Some("snap-1")).await;
        assert_eq!(reporter.phase(), Phase::None);

        reporter.report_update().await;
        assert_eq!(transport.statuses(), vec!["done"]);
    }

    #[tokio::test]
    async fn backup_completion_carries_tallies_and_snapshot() {
        let counters = split_counters();
        counters.set_summary(ChangeSummary {
            files: ChangeCounts {
                new: 3,
                changed: 2,
                unchanged: 5,
            },
            dirs: ChangeCounts {
                new: 1,
                changed: 0,
                unchanged: 4,
            },
        });
        counters.set_total(Totals {
            files: 10,
            dirs: 5,
            bytes: 5000,
        });
        counters.set_eta(Some(9));
        let (reporter, transport) = backup_reporter(counters, QUIET);
        reporter.set_phase(Phase::DoingWork);

        reporter.report_done(Some("abc123")).await;

        let msg = &transport.messages()[0];
        assert_eq!(msg.status, "done");
        assert_eq!(msg.snapshot, "abc123");
        assert!(msg.successful);
        assert_eq!(
            (msg.files_new, msg.files_changed, msg.files_unmodified),
            (3, 2, 5)
        );
        assert_eq!(
            (msg.dirs_new, msg.dirs_changed, msg.dirs_unmodified),
            (1, 0, 4)
        );
        assert_eq!((msg.files_processed, msg.bytes_processed), (10, 200));
        assert!(!msg.has_eta);
    }

    #[tokio::test]
    async fn error_keeps_current_phase() {
        let (reporter, transport) = backup_reporter(split_counters(), QUIET);
        reporter.set_phase(Phase::DoingWork);

        let err = std::io::Error::other("disk on fire");
        reporter.report_error(&err).await;

        assert_eq!(reporter.phase(), Phase::DoingWork);
        let msg = &transport.messages()[0];
        assert!(!msg.successful);
        assert_eq!(msg.error_msg, "disk on fire");
        assert_eq!(msg.status, "doing_backup");
        assert_eq!(msg.files_processed, 10);
    }

    #[tokio::test]
    async fn error_before_start_is_suppressed() {
        let (reporter, transport) = backup_reporter(split_counters(), QUIET);
        reporter.report_error("early").await;
        assert!(transport.messages().is_empty());
        assert_eq!(transport.attempts.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn restore_stamps_restored_snapshot() {
        let transport = Arc::new(InMemoryTransport::new());
        let reporter = Reporter::with_transport(
            JobContext::restore(split_counters(), "snap-9"),
            options(QUIET),
            transport.clone(),
        )
        .unwrap();

        reporter.set_phase(Phase::DoingWork);
        reporter.report_update().await;
        reporter.report_error("checksum mismatch").await;
        reporter.report_done(None).await;

        let msgs = transport.messages();
        assert_eq!(
            transport.statuses(),
            vec!["doing_restore", "doing_restore", "done"]
        );
        assert!(msgs.iter().all(|m| m.action == "restore"));
        assert!(msgs.iter().all(|m| m.snapshot == "snap-9"));
    }

    #[tokio::test]
    async fn restore_completion_keeps_restored_snapshot() {
        let transport = Arc::new(InMemoryTransport::new());
        let reporter = Reporter::with_transport(
            JobContext::restore(split_counters(), "snap-9"),
            options(QUIET),
            transport.clone(),
        )
        .unwrap();
        reporter.set_phase(Phase::DoingWork);

        reporter.report_done(Some("other")).await;

        let msg = &transport.messages()[0];
        assert_eq!(msg.status, "done");
        assert_eq!(msg.snapshot, "snap-9");
    }

    #[test]
    fn enabled_reporter_outside_runtime_is_an_error() {
        let transport = Arc::new(InMemoryTransport::new());
        let res = Reporter::with_transport(
            JobContext::backup(split_counters()),
            options(QUIET),
            transport.clone(),
        );
        assert!(matches!(res, Err(Error::NoRuntime { .. })));

        let mut opts = options(QUIET);
        opts.url.clear();
        let disabled =
            Reporter::with_transport(JobContext::backup(split_counters()), opts, transport).unwrap();
        assert!(!disabled.is_enabled());
    }

    #[tokio::test]
    async fn finish_waits_for_in_flight_update() {
        let transport = Arc::new(SlowTransport {
            inner: InMemoryTransport::new(),
            delay: Duration::from_millis(50),
        });
        let reporter = Reporter::with_transport(
            JobContext::backup(split_counters()),
            options(Duration::from_millis(10)),
            transport.clone(),
        )
        .unwrap();
        reporter.set_phase(Phase::DoingWork);

        tokio::time::sleep(Duration::from_millis(20)).await;
        reporter.finish().await;

        assert_eq!(transport.inner.statuses(), vec!["doing_backup"]);
    }

    struct SlowTransport {
        inner: InMemoryTransport,
        delay: Duration,
    }

    impl Transport for SlowTransport {
        fn name(&self) -> &'static str {
            "test.slow"
        }

        fn deliver<'a>(
            &'a self,
            url: &'a str,
            message: &'a StatusMessage,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                self.inner.deliver(url, message).await
            })
        }
    }

    #[tokio::test]
    async fn disabled_reporter_never_sends() {
        let transport = Arc::new(InMemoryTransport::new());
        let mut opts = options(Duration::from_millis(5));
        opts.url.clear();
        let reporter =
            Reporter::with_transport(JobContext::backup(split_counters()), opts, transport.clone())
                .unwrap();

        assert!(!reporter.is_enabled());
        reporter.set_phase(Phase::DoingWork);
        reporter.report_update().await;
        reporter.report_error("boom").await;
        reporter.report_done(Some("x")).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(reporter.phase(), Phase::None);
        assert_eq!(transport.attempts.load(Ordering::Relaxed), 0);
        reporter.finish().await;
    }

    #[tokio::test]
    async fn backward_transitions_are_ignored() {
        let (reporter, _transport) = backup_reporter(split_counters(), QUIET);
        reporter.set_phase(Phase::DoingWork);
        reporter.set_phase(Phase::ScanningData);
        assert_eq!(reporter.phase(), Phase::DoingWork);
        reporter.set_phase(Phase::Done);
        assert_eq!(reporter.phase(), Phase::DoingWork);
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let transport = Arc::new(InMemoryTransport::new());
        let res = Reporter::with_transport(
            JobContext::backup(split_counters()),
            options(Duration::ZERO),
            transport,
        );
        assert!(matches!(res, Err(Error::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn periodic_ticks_stop_after_done() {
        let (reporter, transport) = backup_reporter(split_counters(), Duration::from_millis(5));
        reporter.set_phase(Phase::DoingWork);
        tokio::time::sleep(Duration::from_millis(40)).await;

        reporter.report_done(Some("s")).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let settled = transport.messages().len();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let statuses = transport.statuses();
        assert_eq!(statuses.len(), settled);
        assert!(statuses.iter().filter(|s| *s == "doing_backup").count() >= 1);
        assert_eq!(statuses.iter().filter(|s| *s == "done").count(), 1);
        assert!(!statuses.iter().any(|s| s == STATUS_NONE));
        reporter.finish().await;
    }
}
