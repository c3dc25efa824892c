use std::{collections::HashSet, sync::Arc};

use tracing::{error, info};

use crate::{
    clock::Clock,
    config::HeatingConfig,
    device::{DeviceId, DeviceRegistry, Subscription},
    error::{ConfigurationError, HandlerError, PluginError},
    event::Event,
    exchange::EventSender,
    loader::load_devices,
    plugin::{Plugin, Registrar},
};

pub struct HeatingPlugin {
    devices: DeviceRegistry,
    clock: Arc<dyn Clock>,
}

impl HeatingPlugin {
    pub fn new(config: &HeatingConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigurationError> {
        let mut devices = load_devices(&config.devices)?;
        for id in devices.ids() {
            devices.get_mut(id).enable();
        }
        info!("heating plugin loaded {} devices", devices.len());

        Ok(Self { devices, clock })
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    fn on_sensor_data(
        &mut self,
        id: DeviceId,
        event: &Event,
        events: &EventSender,
    ) -> Result<(), HandlerError> {
        let Event::MessageReceived { topic, payload } = event else {
            return Err(HandlerError::UnexpectedEvent(event.to_string()));
        };

        let now_ms = self.clock.now_ms();
        let messages = self.devices.on_sensor_sample(id, topic, payload, now_ms)?;
        events.send_events(messages);
        Ok(())
    }

    fn on_dependency_data(
        &mut self,
        id: DeviceId,
        _event: &Event,
        events: &EventSender,
    ) -> Result<(), HandlerError> {
        let now_ms = self.clock.now_ms();
        events.send_events(self.devices.reevaluate(id, now_ms)?);
        Ok(())
    }
}

impl Plugin for HeatingPlugin {
    fn name(&self) -> &str {
        "heating"
    }

    fn setup(&mut self, registrar: &mut Registrar<'_, Self>) {
        let mut subscribed = HashSet::new();

        for id in self.devices.ids() {
            let device_name = self.devices.get(id).name().to_string();
            for (topic, subscription) in self.devices.subscriptions(id) {
                let first = subscribed.insert(topic.clone());
                match subscription {
                    Subscription::Sample(id) => {
                        let name = format!("{device_name}.on_sensor_data");
                        let handler =
                            move |plugin: &mut Self, event: &Event, events: &EventSender| {
                                plugin.on_sensor_data(id, event, events)
                            };
                        if first {
                            registrar.subscribe_to_topic(topic, name, handler);
                        } else {
                            registrar.add_topic_handler(topic, name, handler);
                        }
                    }
                    Subscription::Reevaluate(id) => {
                        let name = format!("{device_name}.on_dependency_data");
                        let handler =
                            move |plugin: &mut Self, event: &Event, events: &EventSender| {
                                plugin.on_dependency_data(id, event, events)
                            };
                        if first {
                            registrar.subscribe_to_topic(topic, name, handler);
                        } else {
                            registrar.add_topic_handler(topic, name, handler);
                        }
                    }
                }
            }
        }
    }

    fn tick(&mut self, events: &EventSender) -> Result<(), PluginError> {
        let now_ms = self.clock.now_ms();
        for id in self.devices.ids() {
            match self.devices.reevaluate(id, now_ms) {
                Ok(messages) => events.send_events(messages),
                Err(err) => error!(
                    device = self.devices.get(id).name(),
                    "reevaluation failed: {err}"
                ),
            }
        }
        Ok(())
    }

    fn on_stop(&mut self, events: &EventSender) {
        for id in self.devices.ids().rev() {
            events.send_events(self.devices.get_mut(id).turn_off());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        clock::ManualClock,
        config::DeviceParams,
        event::QoS,
        exchange::{event_exchange, ExchangeEndpoint},
        plugin::PluginRunner,
        types::DeviceKind,
    };

    fn config() -> HeatingConfig {
        let mut config = HeatingConfig::default();
        config.devices.insert(
            DeviceKind::Thermostat,
            vec![
                DeviceParams::new("main_mixer", "mixer/main/on")
                    .with_sensor("sensors/main")
                    .with_target(28.0, 1.0),
                DeviceParams::new("corridor_mixer", "mixer/corridor/on")
                    .with_sensor("sensors/slave")
                    .with_target(35.0, 1.0)
                    .with_dependencies(["main_mixer"]),
                DeviceParams::new("bathroom_mixer", "mixer/bathroom/on")
                    .with_sensor("sensors/slave")
                    .with_target(32.0, 1.0)
                    .with_dependencies(["main_mixer"]),
            ],
        );
        config.devices.insert(
            DeviceKind::Relay,
            vec![DeviceParams::new("mixer_pump", "pump/on")
                .with_dependencies(["main_mixer"])
                .with_state_changed_timeout(30)],
        );
        config
    }

    fn runner(clock: &ManualClock) -> (PluginRunner<HeatingPlugin>, ExchangeEndpoint) {
        let plugin = HeatingPlugin::new(&config(), Arc::new(clock.clone())).unwrap();
        let (exchange, endpoint) = event_exchange();
        (
            PluginRunner::new(plugin, exchange, Duration::from_millis(100)),
            endpoint,
        )
    }

    #[test]
    fn subscribes_once_per_sensor_topic() {
        let clock = ManualClock::new(0);
        let (runner, mut endpoint) = runner(&clock);

        assert_eq!(
            endpoint.drain(),
            vec![
                Event::subscribe("sensors/main", QoS::AtLeastOnce),
                Event::subscribe("sensors/slave", QoS::AtLeastOnce),
            ]
        );
        assert!(runner.plugin().devices().iter().all(|device| device.is_enabled()));
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let mut config = config();
        config
            .devices
            .get_mut(&DeviceKind::Relay)
            .unwrap()
            .push(DeviceParams::new("floor_pump", "floor/on").with_dependencies(["boiler"]));

        let err = HeatingPlugin::new(&config, Arc::new(ManualClock::new(0))).err();
        assert_eq!(
            err,
            Some(ConfigurationError::UnknownDependency {
                device: "floor_pump".to_string(),
                dependency: "boiler".to_string(),
            })
        );
    }

    #[test]
    fn sensor_sample_drives_mixers_and_pump() {
        let clock = ManualClock::new(0);
        let (mut runner, mut endpoint) = runner(&clock);
        endpoint.drain();

        endpoint.put(Event::received("sensors/main", "20"));
        runner.run_tick();
        assert_eq!(
            endpoint.drain(),
            vec![Event::send("mixer/main/on", "1"), Event::send("pump/on", "1")]
        );

        clock.advance_secs(1);
        endpoint.put(Event::received("sensors/slave", "33"));
        runner.run_tick();
        assert_eq!(endpoint.drain(), vec![Event::send("mixer/corridor/on", "1")]);
    }

    #[test]
    fn tick_reevaluates_devices_after_a_disabled_one() {
        let mut config = config();
        config
            .devices
            .get_mut(&DeviceKind::Relay)
            .unwrap()
            .push(DeviceParams::new("floor_pump", "floor/on").with_dependencies(["main_mixer"]));
        let mut plugin = HeatingPlugin::new(&config, Arc::new(ManualClock::new(0))).unwrap();
        let (exchange, mut endpoint) = event_exchange();

        let main = plugin.devices.id("main_mixer").unwrap();
        let mixer_pump = plugin.devices.id("mixer_pump").unwrap();
        plugin.devices.get_mut(mixer_pump).disable();
        plugin.devices.get_mut(main).turn_on().unwrap();

        plugin.tick(&exchange.sender()).unwrap();

        assert_eq!(endpoint.drain(), vec![Event::send("floor/on", "1")]);
        assert!(!plugin.devices().by_name("mixer_pump").unwrap().is_turned_on());
    }

    #[test]
    fn pump_holds_over_after_main_mixer_turns_off() {
        let clock = ManualClock::new(0);
        let (mut runner, mut endpoint) = runner(&clock);
        endpoint.drain();

        endpoint.put(Event::received("sensors/main", "20"));
        runner.run_tick();
        endpoint.drain();

        clock.advance_secs(100);
        runner.run_tick();
        endpoint.put(Event::received("sensors/main", "29.5"));
        runner.run_tick();
        assert_eq!(endpoint.drain(), vec![Event::send("mixer/main/on", "0")]);

        clock.advance_secs(29);
        runner.run_tick();
        assert!(endpoint.drain().is_empty());

        clock.advance_secs(1);
        runner.run_tick();
        assert_eq!(endpoint.drain(), vec![Event::send("pump/on", "0")]);
    }

    #[test]
    fn invalid_sample_is_logged_and_skipped() {
        let clock = ManualClock::new(0);
        let (mut runner, mut endpoint) = runner(&clock);
        endpoint.drain();

        endpoint.put(Event::received("sensors/main", "20"));
        runner.run_tick();
        endpoint.drain();

        endpoint.put(Event::received("sensors/slave", "n/a"));
        runner.run_tick();
        assert!(endpoint.drain().is_empty());

        endpoint.put(Event::received("sensors/slave", "30"));
        runner.run_tick();
        assert_eq!(
            endpoint.drain(),
            vec![
                Event::send("mixer/corridor/on", "1"),
                Event::send("mixer/bathroom/on", "1"),
            ]
        );
    }

    #[test]
    fn stop_turns_every_active_device_off() {
        let clock = ManualClock::new(0);
        let (mut runner, mut endpoint) = runner(&clock);
        endpoint.drain();

        endpoint.put(Event::received("sensors/main", "20"));
        runner.run_tick();
        endpoint.drain();

        runner.stop();
        assert_eq!(
            endpoint.drain(),
            vec![Event::send("pump/on", "0"), Event::send("mixer/main/on", "0")]
        );
        assert!(runner.plugin().devices().iter().all(|device| !device.is_turned_on()));
    }
}
