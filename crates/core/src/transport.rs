use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;

use crate::message::StatusMessage;
use crate::{Error, Result};

pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    fn deliver<'a>(
        &'a self,
        url: &'a str,
        message: &'a StatusMessage,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http {
                message: format!("build client failed: {e}"),
            })?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    fn deliver<'a>(
        &'a self,
        url: &'a str,
        message: &'a StatusMessage,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let body = serde_json::to_vec(message)?;

            let res = self
                .client
                .post(url)
                .header(CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await
                .map_err(|e| Error::Http {
                    message: format!("request failed: {e}"),
                })?;

            // The receiver's answer is not interpreted.
            let status = res.status();
            if !status.is_success() {
                tracing::debug!(
                    event = "transport.http_status",
                    status = %status,
                    url,
                    "transport.http_status"
                );
            }
            Ok(())
        })
    }
}

/// Records delivered messages instead of sending them.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    pub attempts: AtomicUsize,
    fail_next: AtomicUsize,
    delivered: Mutex<Vec<StatusMessage>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` delivery attempts fail.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::Relaxed);
    }

    pub fn messages(&self) -> Vec<StatusMessage> {
        self.delivered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.status).collect()
    }
}

impl Transport for InMemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn deliver<'a>(
        &'a self,
        _url: &'a str,
        message: &'a StatusMessage,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            let failing = self
                .fail_next
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(Error::Http {
                    message: "injected failure".to_string(),
                });
            }
            self.delivered
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(message.clone());
            Ok(())
        })
    }
}
