use serde::{Deserialize, Serialize};

/// Administrative and actuation state of a device.
///
/// `Idle` and `Active` are both enabled; only `Active` is turned on, so a
/// device can never be turned on while disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceState {
    #[default]
    Disabled,
    Idle,
    Active,
}

impl DeviceState {
    pub fn is_enabled(self) -> bool {
        !matches!(self, Self::Disabled)
    }

    pub fn is_turned_on(self) -> bool {
        matches!(self, Self::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    #[serde(alias = "pump")]
    Relay,
    Thermostat,
}

impl DeviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Relay => "relay",
            Self::Thermostat => "thermostat",
        }
    }
}
