use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use crate::message::StatusMessage;
use crate::transport::Transport;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    /// Attempts per message, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Consecutive undeliverable messages before delivery is switched off.
    pub failure_threshold: u32,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
            failure_threshold: 5,
        }
    }
}

impl DeliveryPolicy {
    fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Best-effort delivery: bounded retries, then a circuit breaker.
///
/// Failures are logged and swallowed so the observed job never notices them.
pub struct Courier {
    url: String,
    transport: Arc<dyn Transport>,
    policy: DeliveryPolicy,
    consecutive_failures: AtomicU32,
    open: AtomicBool,
}

impl Courier {
    pub fn new(url: String, transport: Arc<dyn Transport>, policy: DeliveryPolicy) -> Self {
        Self {
            url,
            transport,
            policy,
            consecutive_failures: AtomicU32::new(0),
            open: AtomicBool::new(false),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    pub async fn send(&self, message: &StatusMessage) {
        if message.is_sentinel() {
            tracing::debug!(
                event = "reporter.suppressed",
                action = %message.action,
                "reporter.suppressed"
            );
            return;
        }

        match self.try_send(message).await {
            Ok(()) => {}
            Err(Error::CircuitOpen) => {
                tracing::debug!(
                    event = "reporter.skipped",
                    status = %message.status,
                    "reporter.skipped"
                );
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    event = "reporter.deliver_failed",
                    error = %e,
                    status = %message.status,
                    failures,
                    "reporter.deliver_failed"
                );
                if failures >= self.policy.failure_threshold
                    && !self.open.swap(true, Ordering::Relaxed)
                {
                    tracing::warn!(
                        event = "reporter.circuit_open",
                        failures,
                        url = %self.url,
                        "reporter.circuit_open"
                    );
                }
            }
        }
    }

    async fn try_send(&self, message: &StatusMessage) -> Result<()> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_err = None;

        for attempt in 0..attempts {
            if self.is_open() {
                return Err(Error::CircuitOpen);
            }
            if attempt > 0 {
                tokio::time::sleep(self.policy.backoff(attempt - 1)).await;
            }

            match self.transport.deliver(&self.url, message).await {
                Ok(()) => {
                    self.consecutive_failures.store(0, Ordering::Relaxed);
                    tracing::debug!(
                        event = "reporter.delivered",
                        transport = self.transport.name(),
                        status = %message.status,
                        attempt = attempt + 1,
                        "reporter.delivered"
                    );
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(
                        event = "reporter.attempt_failed",
                        error = %e,
                        attempt = attempt + 1,
                        "reporter.attempt_failed"
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or(Error::CircuitOpen))
    }
}
