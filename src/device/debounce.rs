use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{quantize_speed, CommandDispatcher, FanCommand, FanEvent, SpeedStep};

/// The slider value waiting for the debounce period to run out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSpeedInput {
    pub raw: u8,
    pub deadline: Instant,
}

/// Turns a burst of slider movements into one speed command.
///
/// Every input snaps the slider to its quantized level right away; the
/// device only hears about the last input once the slider has been still for
/// the debounce period.
#[derive(Clone)]
pub struct SpeedDebouncer {
    inner: Arc<DebounceInner>,
}

struct DebounceInner {
    label: String,
    period: Duration,
    dispatcher: CommandDispatcher,
    events: broadcast::Sender<FanEvent>,
    pending: Mutex<Pending>,
    runtime: Handle,
}

#[derive(Default)]
struct Pending {
    generation: u64,
    input: Option<PendingSpeedInput>,
    timer: Option<JoinHandle<()>>,
}

impl SpeedDebouncer {
    /// Must be called from within a tokio runtime
    pub fn new(
        label: impl Into<String>,
        period: Duration,
        dispatcher: CommandDispatcher,
        events: broadcast::Sender<FanEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(DebounceInner {
                label: label.into(),
                period,
                dispatcher,
                events,
                pending: Mutex::new(Pending::default()),
                runtime: Handle::current(),
            }),
        }
    }

    /// Feed a raw 0-100 slider value.
    ///
    /// Zero only cancels whatever was pending; turning the fan off goes
    /// through the power attribute. Returns the step the input snapped to.
    pub fn input(&self, raw: u8) -> Option<SpeedStep> {
        let mut pending = self.inner.pending();
        pending.cancel();

        let step = quantize_speed(raw)?;
        let _ = self.inner.events.send(FanEvent::RotationSpeed(step.level));

        let generation = pending.generation;
        pending.input = Some(PendingSpeedInput {
            raw,
            deadline: Instant::now() + self.inner.period,
        });

        let inner = self.inner.clone();
        pending.timer = Some(self.inner.runtime.spawn(async move {
            inner.commit(generation, step).await;
        }));

        Some(step)
    }

    /// Drop any pending input without sending it
    pub fn cancel(&self) {
        self.inner.pending().cancel();
    }

    pub fn pending_input(&self) -> Option<PendingSpeedInput> {
        self.inner.pending().input
    }
}

impl DebounceInner {
    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn commit(&self, generation: u64, step: SpeedStep) {
        tokio::time::sleep(self.period).await;

        {
            let mut pending = self.pending();
            if pending.generation != generation {
                return;
            }
            // Past this point newer input no longer aborts this task
            pending.input = None;
            pending.timer = None;
        }

        log::debug!("[{}] slider settled at {}, setting speed {}", self.label, step.level, step.speed);
        if let Err(e) = self
            .dispatcher
            .send_with_timeout(FanCommand::Speed(step.speed))
            .await
        {
            log::warn!("[{}] failed to set speed {}: {}", self.label, step.speed, e);
        }
    }
}

impl Pending {
    /// Supersede the current input, stopping its timer if it has not fired
    fn cancel(&mut self) {
        self.generation += 1;
        self.input = None;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
