use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::{Result, StatusMap, TransportError};

/// Session-based link to the physical fan.
///
/// Implementations may assume they are only ever driven by one caller at a
/// time; the device layer reaches them exclusively through the session lock.
#[async_trait]
pub trait FanTransport: Send {
    /// Open a session with the device. Succeeds without a new session if one
    /// is already open on this transport.
    async fn connect(&mut self) -> Result<()>;

    /// Close the session. Must be safe to call when no session is open.
    async fn disconnect(&mut self);

    /// Read every attribute the device reports
    async fn get_status(&mut self) -> Result<StatusMap>;

    /// Write a single attribute
    async fn set_attribute(&mut self, id: &str, value: Value) -> Result<()>;

    /// Out-of-band error notifications, if the transport produces any
    fn error_events(&self) -> Option<broadcast::Receiver<TransportError>> {
        None
    }
}

/// Builds a fresh transport object, used when the current one has to be discarded
pub type TransportFactory = Arc<dyn Fn() -> Box<dyn FanTransport> + Send + Sync>;

/// The transport plus the bookkeeping its lock holder needs.
///
/// This is the value protected by the session lock, so nothing can reach the
/// transport without holding the lock.
pub struct Connection {
    label: String,
    transport: Box<dyn FanTransport>,
    factory: TransportFactory,
    consecutive_failures: u32,
    rebuilds: u64,
    transport_errors: Arc<AtomicU64>,
}

impl Connection {
    pub fn new(label: impl Into<String>, factory: TransportFactory) -> Self {
        let transport = factory();
        Self {
            label: label.into(),
            transport,
            factory,
            consecutive_failures: 0,
            rebuilds: 0,
            transport_errors: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn transport_mut(&mut self) -> &mut dyn FanTransport {
        self.transport.as_mut()
    }

    /// Close the session, giving up after `limit`
    pub async fn teardown(&mut self, limit: Duration) {
        if tokio::time::timeout(limit, self.transport.disconnect())
            .await
            .is_err()
        {
            log::debug!("[{}] disconnect did not finish within {:?}", self.label, limit);
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Count a failed exchange. Once `threshold` failures have happened in a
    /// row the transport object is replaced; returns whether that happened.
    pub fn record_failure(&mut self, threshold: u32) -> bool {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= threshold {
            log::warn!(
                "[{}] {} consecutive failures, rebuilding transport",
                self.label,
                self.consecutive_failures
            );
            self.rebuild();
            true
        } else {
            false
        }
    }

    /// Discard the transport object and build a new one
    pub fn rebuild(&mut self) {
        self.transport = (self.factory)();
        self.consecutive_failures = 0;
        self.rebuilds += 1;
        self.watch_errors();
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Error events seen so far, across every transport object this connection has had
    pub fn transport_errors(&self) -> u64 {
        self.transport_errors.load(Ordering::Relaxed)
    }

    /// Log the transport's error events until it is dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn watch_errors(&self) {
        let Some(mut events) = self.transport.error_events() else {
            return;
        };
        let label = self.label.clone();
        let seen = self.transport_errors.clone();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(error) => {
                        seen.fetch_add(1, Ordering::Relaxed);
                        log::debug!("[{}] transport error: {}", label, error);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log::debug!("[{}] skipped {} transport error events", label, skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }
}
