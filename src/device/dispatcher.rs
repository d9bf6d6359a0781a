use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};

use crate::config::FanConfig;
use crate::session::{with_timeout, Connection, ExclusiveLock};

use super::{DeviceError, FanCommand, Result};

/// Sends single-attribute changes to the device.
///
/// The dispatcher never touches the state cache; the next poll picks up
/// whatever the device actually did.
#[derive(Clone)]
pub struct CommandDispatcher {
    session: ExclusiveLock<Connection>,
    config: Arc<FanConfig>,
}

/// Point in time a bounded dispatch has to be done by
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    limit: Duration,
}

impl Deadline {
    fn after(limit: Duration) -> Self {
        Self {
            at: Instant::now() + limit,
            limit,
        }
    }

    async fn bound<T>(self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        timeout_at(self.at, operation)
            .await
            .unwrap_or(Err(DeviceError::Timeout(self.limit)))
    }
}

impl CommandDispatcher {
    pub fn new(session: ExclusiveLock<Connection>, config: Arc<FanConfig>) -> Self {
        Self { session, config }
    }

    /// Write one attribute while holding the session lock
    pub async fn send(&self, command: FanCommand) -> Result<()> {
        self.dispatch(command, None).await
    }

    /// [`send`](Self::send) with the whole exchange, lock wait included,
    /// bounded by the configured set timeout. The session is still closed
    /// before the lock is released when the deadline hits mid-exchange.
    pub async fn send_with_timeout(&self, command: FanCommand) -> Result<()> {
        let result = self
            .dispatch(command, Some(Deadline::after(self.config.set_timeout())))
            .await;
        if let Err(DeviceError::Timeout(after)) = &result {
            log::debug!("[{}] {:?} gave up after {:?}", self.config.name, command, after);
        }
        result
    }

    async fn dispatch(&self, command: FanCommand, deadline: Option<Deadline>) -> Result<()> {
        let id = command.attribute().data_point(&self.config.data_points).to_string();
        let value = command.value();

        let acquire = async { Ok::<_, DeviceError>(self.session.acquire().await) };
        let mut connection = match deadline {
            Some(deadline) => deadline.bound(acquire).await?,
            None => acquire.await?,
        };

        let exchange = async {
            with_timeout(self.config.connect_timeout(), connection.transport_mut().connect()).await?;
            connection
                .transport_mut()
                .set_attribute(&id, value)
                .await
                .map_err(DeviceError::from)
        };
        let result = match deadline {
            Some(deadline) => deadline.bound(exchange).await,
            None => exchange.await,
        };

        connection.teardown(self.config.connect_timeout()).await;
        connection.release();

        if let Err(e) = &result {
            log::debug!("[{}] {:?} failed: {}", self.config.name, command, e);
        }
        result
    }
}
