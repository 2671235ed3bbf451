use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use types::{LinkStatus, SensorName, SensorReading, SwitchState, Target, Validity};

/// Receives every cache publication as it happens.
pub trait StateSink: Send + Sync {
    fn publish_sensor(&self, name: SensorName, value: Option<f64>);
    fn publish_state(&self, target: Target, state: SwitchState);
    fn publish_link(&self, status: LinkStatus);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl StateSink for NullSink {
    fn publish_sensor(&self, _name: SensorName, _value: Option<f64>) {}
    fn publish_state(&self, _target: Target, _state: SwitchState) {}
    fn publish_link(&self, _status: LinkStatus) {}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SinkEvent {
    Sensor(SensorName, Option<f64>),
    State(Target, SwitchState),
    Link(LinkStatus),
}

/// Sink that keeps every publication in memory, in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn push(&self, event: SinkEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl StateSink for RecordingSink {
    fn publish_sensor(&self, name: SensorName, value: Option<f64>) {
        self.push(SinkEvent::Sensor(name, value));
    }

    fn publish_state(&self, target: Target, state: SwitchState) {
        self.push(SinkEvent::State(target, state));
    }

    fn publish_link(&self, status: LinkStatus) {
        self.push(SinkEvent::Link(status));
    }
}

/// A derived on/off state that differs from the previously cached one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub target: Target,
    pub from: SwitchState,
    pub to: SwitchState,
}

#[derive(Debug)]
struct CacheInner {
    readings: HashMap<SensorName, SensorReading>,
    states: HashMap<Target, SwitchState>,
    /// Targets shown as Off until their status sensor is read again.
    masked: HashSet<Target>,
    link: LinkStatus,
}

/// Last-known device telemetry and derived states.
///
/// Clones share storage. The poll loop is the only writer; hosts read.
#[derive(Clone)]
pub struct DeviceCache {
    inner: Arc<RwLock<CacheInner>>,
    sink: Arc<dyn StateSink>,
}

impl DeviceCache {
    pub fn new(sink: Arc<dyn StateSink>) -> Self {
        let readings = SensorName::ALL
            .iter()
            .map(|name| (*name, SensorReading::unavailable(*name)))
            .collect();
        let states = Target::ALL
            .iter()
            .map(|target| (*target, SwitchState::Off))
            .collect();

        Self {
            inner: Arc::new(RwLock::new(CacheInner {
                readings,
                states,
                masked: HashSet::new(),
                link: LinkStatus::Unavailable,
            })),
            sink,
        }
    }

    /// Loads host-persisted values and republishes them. `None` seeds 0.0
    /// as unavailable. Derived states are not touched.
    pub fn seed<I>(&self, values: I)
    where
        I: IntoIterator<Item = (SensorName, Option<f64>)>,
    {
        let mut seeded = Vec::new();
        {
            let mut inner = self.write();
            for (name, value) in values {
                let reading = match value {
                    Some(value) => SensorReading {
                        name,
                        value,
                        validity: Validity::Valid,
                    },
                    None => SensorReading::unavailable(name),
                };
                inner.readings.insert(name, reading);
                seeded.push((name, value));
            }
        }
        for (name, value) in &seeded {
            self.sink.publish_sensor(*name, *value);
        }
        info!(seeded = seeded.len(), "cache seeded from host state");
    }

    /// Upserts one reading and publishes it.
    pub fn update(&self, name: SensorName, value: Option<f64>) {
        {
            let mut inner = self.write();
            let reading = inner
                .readings
                .entry(name)
                .or_insert_with(|| SensorReading::unavailable(name));
            match value {
                Some(value) => {
                    reading.value = value;
                    reading.validity = Validity::Valid;
                }
                None => reading.validity = Validity::Unavailable,
            }
        }
        self.sink.publish_sensor(name, value);
    }

    pub fn mark_unavailable<I>(&self, names: I)
    where
        I: IntoIterator<Item = SensorName>,
    {
        for name in names {
            self.update(name, None);
        }
    }

    pub fn mark_all_unavailable(&self) {
        self.mark_unavailable(SensorName::ALL);
    }

    /// Publishes both targets as Off while the line is down.
    ///
    /// The stored states are kept, so the next status reading only reports a
    /// change if the device really changed. Reads return Off until then.
    pub fn publish_states_off(&self) {
        self.write().masked.extend(Target::ALL);
        for target in Target::ALL {
            self.sink.publish_state(target, SwitchState::Off);
        }
    }

    /// Derives the on/off state carried by a status sensor and stores it.
    ///
    /// Returns a change only when the derived state differs from the cached
    /// one. Other sensors are ignored.
    pub fn derive_transition(&self, name: SensorName, value: f64) -> Option<StateChange> {
        let target = name.status_target()?;
        let next = target.state_from_raw(value);

        let previous = {
            let mut inner = self.write();
            inner.masked.remove(&target);
            inner.states.insert(target, next).unwrap_or_default()
        };
        self.sink.publish_state(target, next);

        if previous == next {
            return None;
        }

        debug!(switch = %target, from = ?previous, to = ?next, "state transition");
        Some(StateChange {
            target,
            from: previous,
            to: next,
        })
    }

    pub fn read_sensor(&self, name: SensorName) -> Option<f64> {
        self.reading(name).current()
    }

    pub fn reading(&self, name: SensorName) -> SensorReading {
        self.read()
            .readings
            .get(&name)
            .copied()
            .unwrap_or_else(|| SensorReading::unavailable(name))
    }

    /// The state the host sees: Off while masked by a reconnect.
    pub fn read_state(&self, target: Target) -> SwitchState {
        let inner = self.read();
        if inner.masked.contains(&target) {
            return SwitchState::Off;
        }
        inner.states.get(&target).copied().unwrap_or_default()
    }

    /// All readings in poll order.
    pub fn snapshot(&self) -> Vec<SensorReading> {
        let inner = self.read();
        SensorName::ALL
            .iter()
            .map(|name| {
                inner
                    .readings
                    .get(name)
                    .copied()
                    .unwrap_or_else(|| SensorReading::unavailable(*name))
            })
            .collect()
    }

    pub fn set_link(&self, status: LinkStatus) {
        self.write().link = status;
        self.sink.publish_link(status);
    }

    pub fn link(&self) -> LinkStatus {
        self.read().link
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for DeviceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCache")
            .field("link", &self.link())
            .finish_non_exhaustive()
    }
}
