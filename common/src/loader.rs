use std::collections::{HashMap, HashSet};

use tracing::info;

use crate::{
    config::{DeviceParams, DevicesConfig},
    device::{Device, DeviceId, DeviceRegistry},
    error::ConfigurationError,
    types::DeviceKind,
};

pub struct DeviceLoader<'a> {
    params_by_name: HashMap<&'a str, (DeviceKind, &'a DeviceParams)>,
    declaration_order: Vec<&'a str>,
    visiting: HashSet<&'a str>,
    registry: DeviceRegistry,
}

impl<'a> DeviceLoader<'a> {
    pub fn new(config: &'a DevicesConfig) -> Result<Self, ConfigurationError> {
        let mut params_by_name = HashMap::new();
        let mut declaration_order = Vec::new();

        for (kind, declarations) in config {
            for params in declarations {
                let name = params.name.as_str();
                if params_by_name.insert(name, (*kind, params)).is_some() {
                    return Err(ConfigurationError::DuplicateDevice(params.name.clone()));
                }
                declaration_order.push(name);
            }
        }

        Ok(Self {
            params_by_name,
            declaration_order,
            visiting: HashSet::new(),
            registry: DeviceRegistry::new(),
        })
    }

    pub fn load_devices(mut self) -> Result<DeviceRegistry, ConfigurationError> {
        for name in std::mem::take(&mut self.declaration_order) {
            self.load_device(name)?;
        }
        Ok(self.registry)
    }

    fn load_device(&mut self, name: &'a str) -> Result<DeviceId, ConfigurationError> {
        if let Some(id) = self.registry.id(name) {
            return Ok(id);
        }
        if !self.visiting.insert(name) {
            return Err(ConfigurationError::DependencyCycle {
                device: name.to_string(),
            });
        }

        let (kind, params) = self.params_by_name[name];
        let mut dependencies = Vec::with_capacity(params.dependencies.len());
        for dependency in &params.dependencies {
            if !self.params_by_name.contains_key(dependency.as_str()) {
                return Err(ConfigurationError::UnknownDependency {
                    device: name.to_string(),
                    dependency: dependency.clone(),
                });
            }
            dependencies.push(self.load_device(dependency.as_str())?);
        }
        self.visiting.remove(name);

        let device = build_device(kind, params, dependencies)?;
        let id = self.registry.insert(device)?;
        info!(device = name, kind = kind.as_str(), "device loaded");
        Ok(id)
    }
}

pub fn load_devices(config: &DevicesConfig) -> Result<DeviceRegistry, ConfigurationError> {
    DeviceLoader::new(config)?.load_devices()
}

fn build_device(
    kind: DeviceKind,
    params: &DeviceParams,
    dependencies: Vec<DeviceId>,
) -> Result<Device, ConfigurationError> {
    if params.hardware_topics.is_empty() {
        return Err(ConfigurationError::MissingParameter {
            device: params.name.clone(),
            parameter: "hardware_topics",
        });
    }

    let device = match kind {
        DeviceKind::Relay => Device::relay(params.name.as_str(), params.hardware_topics.clone()),
        DeviceKind::Thermostat => {
            let Some(target_temperature) = params.target_temperature else {
                return Err(ConfigurationError::MissingParameter {
                    device: params.name.clone(),
                    parameter: "target_temperature",
                });
            };
            Device::thermostat(
                params.name.as_str(),
                params.hardware_topics.clone(),
                target_temperature,
                params.hysteresis,
            )
        }
    };

    let device = match &params.sensor_topic {
        Some(topic) => device.with_sensor(topic.as_str()),
        None => device,
    };

    Ok(device
        .with_dependencies(dependencies)
        .with_state_changed_timeout(params.state_changed_timeout))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn relays(params: Vec<DeviceParams>) -> DevicesConfig {
        DevicesConfig::from([(DeviceKind::Relay, params)])
    }

    fn names(registry: &DeviceRegistry) -> Vec<&str> {
        registry.iter().map(Device::name).collect()
    }

    #[test]
    fn loads_dependencies_first() {
        let config = relays(vec![
            DeviceParams::new("c", "c/on").with_dependencies(["b"]),
            DeviceParams::new("b", "b/on").with_dependencies(["a"]),
            DeviceParams::new("a", "a/on"),
        ]);

        let registry = load_devices(&config).unwrap();

        assert_eq!(names(&registry), vec!["a", "b", "c"]);
        let b = registry.id("b").unwrap();
        let c = registry.by_name("c").unwrap();
        assert_eq!(c.dependencies(), &[b]);
    }

    #[test]
    fn shared_dependency_is_loaded_once() {
        let mut config = relays(vec![
            DeviceParams::new("pump", "pump/on").with_dependencies(["kitchen", "bathroom"]),
        ]);
        config.insert(
            DeviceKind::Thermostat,
            vec![
                DeviceParams::new("kitchen", "kitchen/on")
                    .with_target(35.0, 1.0)
                    .with_dependencies(["main"]),
                DeviceParams::new("bathroom", "bathroom/on")
                    .with_target(32.0, 1.0)
                    .with_dependencies(["main"]),
                DeviceParams::new("main", "main/on").with_target(28.0, 1.0),
            ],
        );

        let registry = load_devices(&config).unwrap();

        assert_eq!(names(&registry), vec!["main", "kitchen", "bathroom", "pump"]);
        let main = registry.id("main").unwrap();
        assert_eq!(registry.by_name("kitchen").unwrap().dependencies(), &[main]);
        assert_eq!(registry.by_name("bathroom").unwrap().dependencies(), &[main]);
        assert_eq!(registry.by_name("main").unwrap().kind(), DeviceKind::Thermostat);
    }

    #[test]
    fn unknown_dependency_names_missing_device() {
        let config = relays(vec![DeviceParams::new("a", "a/on").with_dependencies(["b"])]);

        let err = load_devices(&config).unwrap_err();

        assert_eq!(
            err,
            ConfigurationError::UnknownDependency {
                device: "a".to_string(),
                dependency: "b".to_string(),
            }
        );
        assert!(err.to_string().contains("\"b\""));
    }

    #[test]
    fn cyclic_dependencies_fail() {
        let config = relays(vec![
            DeviceParams::new("a", "a/on").with_dependencies(["b"]),
            DeviceParams::new("b", "b/on").with_dependencies(["a"]),
        ]);

        assert_eq!(
            load_devices(&config).unwrap_err(),
            ConfigurationError::DependencyCycle {
                device: "a".to_string()
            }
        );
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let config = relays(vec![DeviceParams::new("a", "a/on").with_dependencies(["a"])]);

        assert!(matches!(
            load_devices(&config),
            Err(ConfigurationError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn duplicate_names_fail() {
        let mut config = relays(vec![DeviceParams::new("a", "a/on")]);
        config.insert(
            DeviceKind::Thermostat,
            vec![DeviceParams::new("a", "t/on").with_target(20.0, 1.0)],
        );

        assert!(matches!(
            load_devices(&config),
            Err(ConfigurationError::DuplicateDevice(name)) if name == "a"
        ));
    }

    #[test]
    fn thermostat_requires_target() {
        let config = DevicesConfig::from([(
            DeviceKind::Thermostat,
            vec![DeviceParams::new("mixer", "mixer/on")],
        )]);

        assert_eq!(
            load_devices(&config).unwrap_err(),
            ConfigurationError::MissingParameter {
                device: "mixer".to_string(),
                parameter: "target_temperature",
            }
        );
    }

    #[test]
    fn device_requires_hardware_topics() {
        let mut params = DeviceParams::new("pump", "pump/on");
        params.hardware_topics.clear();

        assert!(matches!(
            load_devices(&relays(vec![params])),
            Err(ConfigurationError::MissingParameter { parameter: "hardware_topics", .. })
        ));
    }
}
