use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};

use crate::config::FanConfig;
use crate::session::{with_timeout, Connection, ExclusiveLock};

use super::{DeviceError, DeviceState, FanEvent};

/// Where the poller is in its read cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    Acquiring,
    Reading,
    Updating,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Success,
    Failure(DeviceError),
}

impl PollOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PollOutcome::Success)
    }
}

/// Reads the full device status into the state cache, one read at a time
#[derive(Clone)]
pub struct StatusPoller {
    inner: Arc<PollerInner>,
}

struct PollerInner {
    session: ExclusiveLock<Connection>,
    config: Arc<FanConfig>,
    state: watch::Sender<DeviceState>,
    events: broadcast::Sender<FanEvent>,
    phase: Mutex<PollPhase>,
    reschedule: Mutex<Option<mpsc::UnboundedSender<Duration>>>,
    runtime: Handle,
}

impl StatusPoller {
    /// Must be called from within a tokio runtime; fire-and-forget refreshes
    /// are spawned onto it.
    pub fn new(
        session: ExclusiveLock<Connection>,
        config: Arc<FanConfig>,
        state: watch::Sender<DeviceState>,
        events: broadcast::Sender<FanEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                session,
                config,
                state,
                events,
                phase: Mutex::new(PollPhase::Idle),
                reschedule: Mutex::new(None),
                runtime: Handle::current(),
            }),
        }
    }

    pub fn phase(&self) -> PollPhase {
        *self.inner.phase()
    }

    /// Start a refresh in the background unless one is already running.
    ///
    /// Returns immediately; the result lands in the state cache.
    pub fn request_refresh(&self) {
        let Some(flight) = self.inner.begin_flight() else {
            log::trace!("[{}] refresh already in flight", self.inner.config.name);
            return;
        };
        let poller = self.clone();
        self.inner.runtime.spawn(async move {
            poller.run_cycle(flight).await;
        });
    }

    /// Run a refresh in the caller's task. Returns `None` without touching
    /// the device if another refresh is in flight.
    pub async fn poll_now(&self) -> Option<PollOutcome> {
        let flight = self.inner.begin_flight()?;
        Some(self.run_cycle(flight).await)
    }

    async fn run_cycle(&self, flight: Flight) -> PollOutcome {
        let config = &self.inner.config;
        let mut connection = self.inner.session.acquire().await;

        flight.enter(PollPhase::Reading);
        let result = async {
            with_timeout(config.connect_timeout(), connection.transport_mut().connect()).await?;
            with_timeout(config.read_timeout(), connection.transport_mut().get_status()).await
        }
        .await;
        connection.teardown(config.connect_timeout()).await;

        flight.enter(PollPhase::Updating);
        let previous = self.inner.state.borrow().clone();
        let refreshed = result.and_then(|status| {
            previous
                .refreshed(&status, &config.data_points)
                .map_err(DeviceError::from)
        });

        let outcome = match refreshed {
            Ok(next) => {
                connection.record_success();
                if !previous.valid {
                    log::info!("[{}] device is responding", config.name);
                }
                self.inner.state.send_replace(next.clone());
                let _ = self.inner.events.send(FanEvent::StateRefreshed(next));
                PollOutcome::Success
            }
            Err(e) => {
                if previous.valid {
                    log::warn!("[{}] device stopped responding: {}", config.name, e);
                } else {
                    log::debug!("[{}] poll failed: {}", config.name, e);
                }
                connection.record_failure(config.rebuild_threshold);
                self.inner.state.send_replace(previous.invalidated());
                let _ = self.inner.events.send(FanEvent::Unreachable);
                PollOutcome::Failure(e)
            }
        };
        connection.release();

        let next_poll = if outcome.is_success() {
            config.poll_interval()
        } else {
            config.fast_retry_interval()
        };
        self.inner.reschedule(next_poll);

        outcome
    }

    /// Spawn the periodic poll timer. It fires immediately, then follows the
    /// cadence chosen by each completed refresh.
    ///
    /// Only one timer may run per poller; the owning device enforces that.
    pub(crate) fn start_timer(&self) -> PollTimer {
        let (reschedule_tx, reschedule_rx) = mpsc::unbounded_channel();
        *self
            .inner
            .reschedule
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reschedule_tx);

        let (stop_tx, stop_rx) = mpsc::channel(1);
        let task = self
            .inner
            .runtime
            .spawn(Self::timer_loop(self.clone(), reschedule_rx, stop_rx));

        PollTimer {
            stop_tx,
            task: Some(task),
        }
    }

    async fn timer_loop(
        poller: StatusPoller,
        mut reschedule: mpsc::UnboundedReceiver<Duration>,
        mut stop_rx: mpsc::Receiver<()>,
    ) {
        let mut deadline = Instant::now();

        loop {
            tokio::select! {
                _ = stop_rx.recv() => break,
                Some(delay) = reschedule.recv() => {
                    deadline = Instant::now() + delay;
                }
                _ = sleep_until(deadline) => {
                    // Re-armed on the normal period in case no refresh reports back
                    deadline = Instant::now() + poller.inner.config.poll_interval();
                    poller.request_refresh();
                }
            }
        }

        log::debug!("[{}] poll timer stopped", poller.inner.config.name);
    }
}

impl PollerInner {
    fn phase(&self) -> MutexGuard<'_, PollPhase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_flight(self: &Arc<Self>) -> Option<Flight> {
        let mut phase = self.phase();
        if *phase != PollPhase::Idle {
            return None;
        }
        *phase = PollPhase::Acquiring;
        Some(Flight {
            poller: self.clone(),
        })
    }

    fn reschedule(&self, delay: Duration) {
        let reschedule = self.reschedule.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = reschedule.as_ref() {
            let _ = tx.send(delay);
        }
    }
}

/// Claim on the single in-flight refresh; puts the poller back to idle when dropped
struct Flight {
    poller: Arc<PollerInner>,
}

impl Flight {
    fn enter(&self, phase: PollPhase) {
        *self.poller.phase() = phase;
    }
}

impl Drop for Flight {
    fn drop(&mut self) {
        *self.poller.phase() = PollPhase::Idle;
    }
}

/// Handle to the background poll timer
pub struct PollTimer {
    stop_tx: mpsc::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl PollTimer {
    /// Stop the timer and wait briefly for it to wind down
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(()).await;
        if let Some(task) = self.task.take() {
            let _ = timeout(Duration::from_secs(2), task).await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
