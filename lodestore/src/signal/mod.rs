//! Synchronous change-notification bus. `send` invokes every connected
//! sensor interested in the signal's kind, in registration order, before
//! returning. Every signal carries the initiator identity of whatever
//! emitted it, so sensors can suppress their own echoes.

use std::sync::{Arc, Mutex};

/// What happened to the named elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Added,
    Removed,
    Updated,
}

/// A change notification: which elements of which context changed, and who
/// initiated the change.
#[derive(Debug, Clone)]
pub struct Signal {
    pub kind: SignalKind,
    pub context: String,
    pub ids: Vec<String>,
    pub initiator: String,
}

impl Signal {
    pub fn new(
        kind: SignalKind,
        context: impl Into<String>,
        ids: Vec<String>,
        initiator: impl Into<String>,
    ) -> Self {
        Signal {
            kind,
            context: context.into(),
            ids,
            initiator: initiator.into(),
        }
    }
}

/// A connected receiver. `wants` filters by kind; `notify` runs inline with
/// the triggering send.
pub trait Sensor: Send + Sync {
    fn wants(&self, _kind: SignalKind) -> bool {
        true
    }

    fn notify(&self, signal: &Signal);
}

/// The shared bus. Passed by `Arc` via constructor injection; there is no
/// ambient global bus.
#[derive(Default)]
pub struct SignalBus {
    sensors: Mutex<Vec<Arc<dyn Sensor>>>,
}

impl SignalBus {
    pub fn new() -> Arc<Self> {
        Arc::new(SignalBus::default())
    }

    pub fn connect(&self, sensor: Arc<dyn Sensor>) {
        self.sensors.lock().unwrap().push(sensor);
    }

    /// Deliver a signal to every interested sensor, in registration order.
    /// The sensor list is snapshotted first so a sensor may itself send.
    pub fn send(&self, signal: &Signal) {
        let sensors: Vec<Arc<dyn Sensor>> = self.sensors.lock().unwrap().clone();
        for sensor in sensors {
            if sensor.wants(signal.kind) {
                sensor.notify(signal);
            }
        }
    }
}

/// A fresh initiator identity for tagging emitted signals.
pub fn new_initiator() -> String {
    uuid::Uuid::new_v4().to_string()
}
