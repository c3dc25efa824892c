use std::{collections::BTreeMap, fmt};

use serde::{
    de::{MapAccess, Visitor},
    Deserialize, Deserializer, Serialize,
};

use crate::types::DeviceKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_ms: u64,
    pub round_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            round_interval_ms: 100,
        }
    }
}

impl SchedulerConfig {
    pub fn sanitize(&mut self) {
        self.tick_interval_ms = self.tick_interval_ms.clamp(10, 10_000);
        self.round_interval_ms = self.round_interval_ms.clamp(10, 10_000);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub user: String,
    pub pass: String,
    pub keep_alive_secs: u64,
    pub request_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "heating-controller".to_string(),
            user: String::new(),
            pass: String::new(),
            keep_alive_secs: 10,
            request_capacity: 64,
        }
    }
}

impl MqttConfig {
    pub fn sanitize(&mut self) {
        self.keep_alive_secs = self.keep_alive_secs.clamp(5, 600);
        self.request_capacity = self.request_capacity.clamp(8, 4_096);
    }
}

fn default_hysteresis() -> f32 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceParams {
    pub name: String,
    #[serde(default, alias = "device_topics")]
    pub hardware_topics: Vec<String>,
    #[serde(default)]
    pub sensor_topic: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub state_changed_timeout: u64,
    #[serde(default)]
    pub target_temperature: Option<f32>,
    #[serde(default = "default_hysteresis")]
    pub hysteresis: f32,
}

impl DeviceParams {
    pub fn new(name: impl Into<String>, hardware_topic: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hardware_topics: vec![hardware_topic.into()],
            sensor_topic: None,
            dependencies: Vec::new(),
            state_changed_timeout: 0,
            target_temperature: None,
            hysteresis: default_hysteresis(),
        }
    }

    pub fn with_sensor(mut self, topic: impl Into<String>) -> Self {
        self.sensor_topic = Some(topic.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_state_changed_timeout(mut self, seconds: u64) -> Self {
        self.state_changed_timeout = seconds;
        self
    }

    pub fn with_target(mut self, target_temperature: f32, hysteresis: f32) -> Self {
        self.target_temperature = Some(target_temperature);
        self.hysteresis = hysteresis;
        self
    }

    pub fn sanitize(&mut self) {
        if !self.hysteresis.is_finite() {
            self.hysteresis = default_hysteresis();
        }
        self.hysteresis = self.hysteresis.clamp(0.1, 10.0);
    }
}

pub type DevicesConfig = BTreeMap<DeviceKind, Vec<DeviceParams>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeatingConfig {
    #[serde(default, deserialize_with = "merge_device_lists")]
    pub devices: DevicesConfig,
}

// "relay" and "pump" name the same kind; their lists are concatenated in file
// order instead of the later key replacing the earlier one.
fn merge_device_lists<'de, D>(deserializer: D) -> Result<DevicesConfig, D::Error>
where
    D: Deserializer<'de>,
{
    struct DevicesVisitor;

    impl<'de> Visitor<'de> for DevicesVisitor {
        type Value = DevicesConfig;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map of device kind to device declarations")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut devices = DevicesConfig::new();
            while let Some((kind, params)) = map.next_entry::<DeviceKind, Vec<DeviceParams>>()? {
                devices.entry(kind).or_default().extend(params);
            }
            Ok(devices)
        }
    }

    deserializer.deserialize_map(DevicesVisitor)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub heating: HeatingConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.scheduler.sanitize();
        self.mqtt.sanitize();
        for params in self.heating.devices.values_mut().flatten() {
            params.sanitize();
        }
    }
}
