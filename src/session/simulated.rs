//! In-process stand-in for the physical fan.
//!
//! Enforces the single-session rule and lets callers inject the faults the
//! real device is known for: rejected sessions, dropped reads and writes,
//! slow responses and exchanges that never complete.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::{FanTransport, Result, StatusMap, TransportError, TransportFactory};
use crate::config::DataPoints;

/// Counters describing what the simulated device has seen
#[derive(Debug, Clone, Default)]
pub struct SimulationStats {
    pub connects: u64,
    pub reads: u64,
    pub read_times: Vec<Instant>,
    pub writes: Vec<(String, Value)>,
    pub transports_built: u64,
}

#[derive(Debug, Default)]
struct Faults {
    connect_failures: u32,
    read_failures: u32,
    write_failures: u32,
    stalled: bool,
}

#[derive(Debug, Default)]
struct Latency {
    connect: Duration,
    read: Duration,
    write: Duration,
}

#[derive(Debug)]
struct FanInner {
    attributes: StatusMap,
    active_session: Option<u64>,
    next_session: u64,
    faults: Faults,
    latency: Latency,
    stats: SimulationStats,
}

/// Shared handle to one simulated fan; clones refer to the same device
#[derive(Clone)]
pub struct SimulatedFan {
    inner: Arc<Mutex<FanInner>>,
}

impl SimulatedFan {
    /// A fan that is off, at speed 1, blowing forward, light off
    pub fn new(data_points: &DataPoints) -> Self {
        let mut attributes = StatusMap::new();
        attributes.insert(data_points.power.clone(), Value::Bool(false));
        attributes.insert(data_points.speed.clone(), Value::from(1u8));
        attributes.insert(data_points.direction.clone(), Value::from("forward"));
        attributes.insert(data_points.light.clone(), Value::Bool(false));

        Self {
            inner: Arc::new(Mutex::new(FanInner {
                attributes,
                active_session: None,
                next_session: 1,
                faults: Faults::default(),
                latency: Latency::default(),
                stats: SimulationStats::default(),
            })),
        }
    }

    fn inner(&self) -> MutexGuard<'_, FanInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new transport object to this fan
    pub fn connection(&self) -> SimulatedConnection {
        let id = {
            let mut inner = self.inner();
            inner.stats.transports_built += 1;
            let id = inner.next_session;
            inner.next_session += 1;
            id
        };
        let (errors, _) = broadcast::channel(16);

        SimulatedConnection {
            fan: self.clone(),
            id,
            connected: false,
            errors,
        }
    }

    pub fn factory(&self) -> TransportFactory {
        let fan = self.clone();
        Arc::new(move || Box::new(fan.connection()) as Box<dyn FanTransport>)
    }

    /// Change an attribute as if someone used the wall remote
    pub fn set_value(&self, id: &str, value: Value) {
        self.inner().attributes.insert(id.to_string(), value);
    }

    pub fn value(&self, id: &str) -> Option<Value> {
        self.inner().attributes.get(id).cloned()
    }

    /// Drop a data point from status reports entirely
    pub fn remove_value(&self, id: &str) {
        self.inner().attributes.remove(id);
    }

    pub fn fail_connects(&self, count: u32) {
        self.inner().faults.connect_failures = count;
    }

    pub fn fail_reads(&self, count: u32) {
        self.inner().faults.read_failures = count;
    }

    pub fn fail_writes(&self, count: u32) {
        self.inner().faults.write_failures = count;
    }

    /// While stalled, every exchange hangs forever
    pub fn set_stalled(&self, stalled: bool) {
        self.inner().faults.stalled = stalled;
    }

    pub fn set_connect_latency(&self, latency: Duration) {
        self.inner().latency.connect = latency;
    }

    pub fn set_read_latency(&self, latency: Duration) {
        self.inner().latency.read = latency;
    }

    pub fn set_write_latency(&self, latency: Duration) {
        self.inner().latency.write = latency;
    }

    /// Whether some transport currently holds the device session
    pub fn session_open(&self) -> bool {
        self.inner().active_session.is_some()
    }

    pub fn stats(&self) -> SimulationStats {
        self.inner().stats.clone()
    }

    async fn exchange_delay(&self, pick: fn(&Latency) -> Duration) {
        let (stalled, delay) = {
            let inner = self.inner();
            (inner.faults.stalled, pick(&inner.latency))
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// One transport object talking to a [`SimulatedFan`]
pub struct SimulatedConnection {
    fan: SimulatedFan,
    id: u64,
    connected: bool,
    errors: broadcast::Sender<TransportError>,
}

impl SimulatedConnection {
    fn fail(&self, error: TransportError) -> TransportError {
        let _ = self.errors.send(error.clone());
        error
    }

    fn drop_session(&mut self) {
        if self.connected {
            self.connected = false;
            let mut inner = self.fan.inner();
            if inner.active_session == Some(self.id) {
                inner.active_session = None;
            }
        }
    }
}

#[async_trait]
impl FanTransport for SimulatedConnection {
    async fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }
        self.fan.exchange_delay(|latency| latency.connect).await;

        let outcome = {
            let mut inner = self.fan.inner();
            inner.stats.connects += 1;
            if inner.faults.connect_failures > 0 {
                inner.faults.connect_failures -= 1;
                Err(TransportError::ConnectionFailed("device did not answer".to_string()))
            } else if inner.active_session.is_some() {
                Err(TransportError::SessionBusy)
            } else {
                inner.active_session = Some(self.id);
                Ok(())
            }
        };

        match outcome {
            Ok(()) => {
                self.connected = true;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn disconnect(&mut self) {
        self.drop_session();
    }

    async fn get_status(&mut self) -> Result<StatusMap> {
        if !self.connected {
            return Err(self.fail(TransportError::Disconnected));
        }
        self.fan.exchange_delay(|latency| latency.read).await;

        let outcome = {
            let mut inner = self.fan.inner();
            inner.stats.reads += 1;
            inner.stats.read_times.push(Instant::now());
            if inner.faults.read_failures > 0 {
                inner.faults.read_failures -= 1;
                None
            } else {
                Some(inner.attributes.clone())
            }
        };

        match outcome {
            Some(status) => Ok(status),
            None => {
                self.drop_session();
                Err(self.fail(TransportError::Disconnected))
            }
        }
    }

    async fn set_attribute(&mut self, id: &str, value: Value) -> Result<()> {
        if !self.connected {
            return Err(self.fail(TransportError::Disconnected));
        }
        self.fan.exchange_delay(|latency| latency.write).await;

        let rejected = {
            let mut inner = self.fan.inner();
            if inner.faults.write_failures > 0 {
                inner.faults.write_failures -= 1;
                true
            } else {
                inner.stats.writes.push((id.to_string(), value.clone()));
                inner.attributes.insert(id.to_string(), value);
                false
            }
        };

        if rejected {
            Err(self.fail(TransportError::Rejected(format!("write to {} refused", id))))
        } else {
            Ok(())
        }
    }

    fn error_events(&self) -> Option<broadcast::Receiver<TransportError>> {
        Some(self.errors.subscribe())
    }
}

impl Drop for SimulatedConnection {
    fn drop(&mut self) {
        self.drop_session();
    }
}
