pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod exchange;
pub mod heating;
pub mod loader;
pub mod manager;
pub mod plugin;
pub mod thermostat;
pub mod types;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{
    DeviceParams, DevicesConfig, HeatingConfig, MqttConfig, RuntimeConfig, SchedulerConfig,
};
pub use device::{Device, DeviceId, DeviceRegistry, Subscription};
pub use error::{ConfigurationError, DeviceError, HandlerError, PluginError};
pub use event::{Event, EventKind, QoS, PAYLOAD_OFF, PAYLOAD_ON};
pub use exchange::{event_exchange, EventExchange, EventSender, ExchangeEndpoint};
pub use heating::HeatingPlugin;
pub use loader::{load_devices, DeviceLoader};
pub use manager::{PluginRunManager, ScheduledPlugin};
pub use plugin::{HandlerRegistry, Plugin, PluginHandle, PluginRunner, Registrar};
pub use thermostat::{ControlDecision, ThermostatControl};
pub use types::{DeviceKind, DeviceState};
