use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::config::{ConfigError, FanConfig};
use crate::session::{Connection, ExclusiveLock, TransportFactory};

use super::poller::PollTimer;
use super::{
    Active, CommandDispatcher, DeviceError, DeviceState, FanCommand, FanEvent, PollOutcome,
    Result, RotationDirection, SpeedDebouncer, StatusPoller,
};

const EVENT_CAPACITY: usize = 64;

/// One managed fan: its session lock, state cache, poller, dispatcher and
/// speed debouncer. Nothing here is shared between devices.
pub struct FanDevice {
    id: Uuid,
    config: Arc<FanConfig>,
    session: ExclusiveLock<Connection>,
    state: watch::Receiver<DeviceState>,
    events: broadcast::Sender<FanEvent>,
    poller: StatusPoller,
    dispatcher: CommandDispatcher,
    debouncer: SpeedDebouncer,
    timer: Mutex<Option<PollTimer>>,
}

impl FanDevice {
    /// Set up the device session without polling yet.
    ///
    /// Must be called from within a tokio runtime. Fails if `config` does not
    /// pass [`FanConfig::validate`].
    pub fn new(config: FanConfig, factory: TransportFactory) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let config = Arc::new(config);
        let id = Uuid::new_v4();

        let connection = Connection::new(config.name.clone(), factory);
        connection.watch_errors();
        let session = ExclusiveLock::new(connection);

        let (state_tx, state) = watch::channel(DeviceState::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let poller = StatusPoller::new(session.clone(), config.clone(), state_tx, events.clone());
        let dispatcher = CommandDispatcher::new(session.clone(), config.clone());
        let debouncer = SpeedDebouncer::new(
            config.name.clone(),
            config.debounce(),
            dispatcher.clone(),
            events.clone(),
        );

        log::info!("[{}] device session {} created", config.name, id);

        Ok(Self {
            id,
            config,
            session,
            state,
            events,
            poller,
            dispatcher,
            debouncer,
            timer: Mutex::new(None),
        })
    }

    /// Create the device and start polling it
    pub fn start(config: FanConfig, factory: TransportFactory) -> std::result::Result<Self, ConfigError> {
        let device = Self::new(config, factory)?;
        device.start_polling();
        Ok(device)
    }

    /// Start the poll timer unless it is already running
    pub fn start_polling(&self) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if timer.is_none() {
            *timer = Some(self.poller.start_timer());
            log::debug!("[{}] polling every {:?}", self.config.name, self.config.poll_interval());
        }
    }

    /// Stop polling and drop any pending speed input
    pub async fn shutdown(&self) {
        self.debouncer.cancel();
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            timer.stop().await;
        }
        log::info!("[{}] device session {} stopped", self.config.name, self.id);
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &FanConfig {
        &self.config
    }

    /// Current cache contents, valid or not
    pub fn state(&self) -> DeviceState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<DeviceState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FanEvent> {
        self.events.subscribe()
    }

    pub fn poller(&self) -> &StatusPoller {
        &self.poller
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn debouncer(&self) -> &SpeedDebouncer {
        &self.debouncer
    }

    /// Whether some task currently holds the device session
    pub fn session_busy(&self) -> bool {
        self.session.is_held()
    }

    /// Refresh in the background; see [`StatusPoller::request_refresh`]
    pub fn request_refresh(&self) {
        self.poller.request_refresh();
    }

    /// Refresh and wait for the result, unless a refresh is already running
    pub async fn refresh(&self) -> Option<PollOutcome> {
        self.poller.poll_now().await
    }

    pub fn get_power(&self) -> Result<Active> {
        self.cached(DeviceState::active)
    }

    /// Slider position for the current speed
    pub fn get_speed(&self) -> Result<u8> {
        self.cached(DeviceState::rotation_speed)
    }

    pub fn get_direction(&self) -> Result<RotationDirection> {
        self.cached(DeviceState::rotation_direction)
    }

    pub fn get_light(&self) -> Result<bool> {
        self.require_light()?;
        self.cached(DeviceState::light_on)
    }

    pub async fn set_power(&self, on: bool) -> Result<()> {
        self.dispatcher.send_with_timeout(FanCommand::Power(on)).await
    }

    /// Feed a slider value through the debouncer. Returns once the input is
    /// queued; the command itself goes out when the slider settles.
    pub async fn set_speed(&self, raw: u8) -> Result<()> {
        self.debouncer.input(raw);
        Ok(())
    }

    pub async fn set_direction(&self, direction: RotationDirection) -> Result<()> {
        self.dispatcher
            .send_with_timeout(FanCommand::Direction(direction))
            .await
    }

    pub async fn set_light(&self, on: bool) -> Result<()> {
        self.require_light()?;
        self.dispatcher.send_with_timeout(FanCommand::Light(on)).await
    }

    /// Kick off a refresh, then answer from the cache as it stands
    fn cached<T>(&self, project: impl FnOnce(&DeviceState) -> T) -> Result<T> {
        self.poller.request_refresh();
        let state = self.state.borrow();
        if !state.valid {
            return Err(DeviceError::Unresponsive);
        }
        Ok(project(&state))
    }

    fn require_light(&self) -> Result<()> {
        if self.config.has_light {
            Ok(())
        } else {
            Err(DeviceError::NotSupported("light"))
        }
    }
}

impl Drop for FanDevice {
    fn drop(&mut self) {
        self.debouncer.cancel();
    }
}
