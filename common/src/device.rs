use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info, warn};

use crate::{
    error::{ConfigurationError, DeviceError, HandlerError},
    event::{Event, PAYLOAD_OFF, PAYLOAD_ON},
    thermostat::{ControlDecision, ThermostatControl},
    types::{DeviceKind, DeviceState},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(usize);

impl DeviceId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
enum Control {
    Relay,
    Thermostat(ThermostatControl),
}

#[derive(Debug, Clone)]
pub struct Device {
    name: String,
    state: DeviceState,
    hardware_topics: Vec<String>,
    sensor_topic: Option<String>,
    dependencies: Vec<DeviceId>,
    state_changed_timeout_ms: u64,
    last_dependency_turned_on_ms: Option<u64>,
    last_sensor_ms: Option<u64>,
    control: Control,
}

impl Device {
    pub fn relay(name: impl Into<String>, hardware_topics: Vec<String>) -> Self {
        Self {
            name: name.into(),
            state: DeviceState::Disabled,
            hardware_topics,
            sensor_topic: None,
            dependencies: Vec::new(),
            state_changed_timeout_ms: 0,
            last_dependency_turned_on_ms: None,
            last_sensor_ms: None,
            control: Control::Relay,
        }
    }

    pub fn thermostat(
        name: impl Into<String>,
        hardware_topics: Vec<String>,
        target_temperature: f32,
        hysteresis: f32,
    ) -> Self {
        Self {
            control: Control::Thermostat(ThermostatControl::new(target_temperature, hysteresis)),
            ..Self::relay(name, hardware_topics)
        }
    }

    pub fn with_sensor(mut self, topic: impl Into<String>) -> Self {
        self.sensor_topic = Some(topic.into());
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<DeviceId>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_state_changed_timeout(mut self, seconds: u64) -> Self {
        self.state_changed_timeout_ms = seconds.saturating_mul(1_000);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DeviceKind {
        match self.control {
            Control::Relay => DeviceKind::Relay,
            Control::Thermostat(_) => DeviceKind::Thermostat,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    pub fn is_turned_on(&self) -> bool {
        self.state.is_turned_on()
    }

    pub fn sensor_topic(&self) -> Option<&str> {
        self.sensor_topic.as_deref()
    }

    pub fn dependencies(&self) -> &[DeviceId] {
        &self.dependencies
    }

    pub fn last_sensor_ms(&self) -> Option<u64> {
        self.last_sensor_ms
    }

    pub fn last_dependency_turned_on_ms(&self) -> Option<u64> {
        self.last_dependency_turned_on_ms
    }

    pub fn enable(&mut self) -> Vec<Event> {
        if self.state == DeviceState::Disabled {
            self.state = DeviceState::Idle;
            debug!(device = %self.name, "device enabled");
        }
        Vec::new()
    }

    pub fn disable(&mut self) -> Vec<Event> {
        let events = self.turn_off();
        if self.state != DeviceState::Disabled {
            self.state = DeviceState::Disabled;
            debug!(device = %self.name, "device disabled");
        }
        events
    }

    pub fn turn_on(&mut self) -> Result<Vec<Event>, DeviceError> {
        match self.state {
            DeviceState::Disabled => Err(DeviceError::Disabled(self.name.clone())),
            DeviceState::Active => Ok(Vec::new()),
            DeviceState::Idle => {
                info!(device = %self.name, "turning device on");
                self.state = DeviceState::Active;
                Ok(self.actuation(PAYLOAD_ON))
            }
        }
    }

    pub fn turn_off(&mut self) -> Vec<Event> {
        if self.state != DeviceState::Active {
            return Vec::new();
        }

        info!(device = %self.name, "turning device off");
        self.state = DeviceState::Idle;
        self.actuation(PAYLOAD_OFF)
    }

    fn actuation(&self, payload: &str) -> Vec<Event> {
        self.hardware_topics
            .iter()
            .map(|topic| Event::send(topic.as_str(), payload))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Subscription {
    Sample(DeviceId),
    Reevaluate(DeviceId),
}

/// Arena of devices. Dependencies are stored as indices into the arena and
/// must be inserted before their dependents, so the graph is acyclic.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
    by_name: HashMap<String, DeviceId>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, device: Device) -> Result<DeviceId, ConfigurationError> {
        if self.by_name.contains_key(device.name()) {
            return Err(ConfigurationError::DuplicateDevice(device.name.clone()));
        }

        let id = DeviceId(self.devices.len());
        if let Some(dependency) = device.dependencies.iter().find(|dep| dep.0 >= id.0) {
            return Err(ConfigurationError::UnknownDependency {
                device: device.name.clone(),
                dependency: format!("#{}", dependency.0),
            });
        }

        self.by_name.insert(device.name.clone(), id);
        self.devices.push(device);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn ids(&self) -> impl DoubleEndedIterator<Item = DeviceId> {
        (0..self.devices.len()).map(DeviceId)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub fn id(&self, name: &str) -> Option<DeviceId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: DeviceId) -> &Device {
        &self.devices[id.0]
    }

    pub fn get_mut(&mut self, id: DeviceId) -> &mut Device {
        &mut self.devices[id.0]
    }

    pub fn by_name(&self, name: &str) -> Option<&Device> {
        self.id(name).map(|id| self.get(id))
    }

    /// Whether any direct dependency is on. Seeing one on refreshes the
    /// device's decay timestamp.
    pub fn dependencies_turned_on(&mut self, id: DeviceId, now_ms: u64) -> bool {
        let any_on = self.devices[id.0]
            .dependencies
            .iter()
            .any(|dependency| self.devices[dependency.0].is_turned_on());

        if any_on {
            self.devices[id.0].last_dependency_turned_on_ms = Some(now_ms);
        }
        any_on
    }

    pub fn is_need_work(&mut self, id: DeviceId, now_ms: u64) -> bool {
        let device = &self.devices[id.0];
        if !device.is_enabled() {
            return false;
        }
        if device.dependencies.is_empty() {
            return true;
        }

        if self.dependencies_turned_on(id, now_ms) {
            return true;
        }

        let device = &self.devices[id.0];
        device
            .last_dependency_turned_on_ms
            .map(|last| now_ms.saturating_sub(last) < device.state_changed_timeout_ms)
            .unwrap_or(false)
    }

    pub fn subscriptions(&self, id: DeviceId) -> Vec<(String, Subscription)> {
        let mut subscriptions = Vec::new();
        if let Some(topic) = self.get(id).sensor_topic() {
            subscriptions.push((topic.to_string(), Subscription::Sample(id)));
        }

        let mut visited = BTreeSet::new();
        let mut pending: Vec<DeviceId> =
            self.get(id).dependencies.iter().rev().copied().collect();
        while let Some(ancestor) = pending.pop() {
            if !visited.insert(ancestor) {
                continue;
            }
            let device = self.get(ancestor);
            if let Some(topic) = device.sensor_topic() {
                let entry = (topic.to_string(), Subscription::Reevaluate(id));
                if !subscriptions.contains(&entry) {
                    subscriptions.push(entry);
                }
            }
            pending.extend(device.dependencies.iter().rev().copied());
        }

        subscriptions
    }

    pub fn on_sensor_sample(
        &mut self,
        id: DeviceId,
        topic: &str,
        payload: &str,
        now_ms: u64,
    ) -> Result<Vec<Event>, HandlerError> {
        let temperature = parse_temperature(topic, payload)?;
        let device = &mut self.devices[id.0];
        device.last_sensor_ms = Some(now_ms);

        let decision = match &mut device.control {
            Control::Relay => return Ok(Vec::new()),
            Control::Thermostat(control) => control.sample(temperature, now_ms),
        };

        match decision {
            ControlDecision::SafetyCutoff { rate } => {
                warn!(
                    device = %device.name,
                    temperature,
                    rate,
                    "temperature is rising too quick, forcing turn off"
                );
                Ok(device.turn_off())
            }
            ControlDecision::TurnOff => Ok(device.turn_off()),
            ControlDecision::TurnOn => {
                if !device.is_enabled() {
                    return Ok(Vec::new());
                }
                if self.is_need_work(id, now_ms) {
                    Ok(self.devices[id.0].turn_on()?)
                } else {
                    Ok(self.devices[id.0].turn_off())
                }
            }
            ControlDecision::Hold => Ok(Vec::new()),
        }
    }

    pub fn reevaluate(&mut self, id: DeviceId, now_ms: u64) -> Result<Vec<Event>, DeviceError> {
        let need_work = self.is_need_work(id, now_ms);
        let device = &mut self.devices[id.0];

        match device.control {
            Control::Relay if need_work => device.turn_on(),
            Control::Relay => Ok(device.turn_off()),
            Control::Thermostat(_) if !need_work => Ok(device.turn_off()),
            Control::Thermostat(_) => Ok(Vec::new()),
        }
    }
}

fn parse_temperature(topic: &str, payload: &str) -> Result<f32, HandlerError> {
    payload
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| HandlerError::InvalidPayload {
            topic: topic.to_string(),
            payload: payload.to_string(),
        })
}
