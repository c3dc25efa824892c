use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("device \"{device}\" depends on \"{dependency}\", which is not declared")]
    UnknownDependency { device: String, dependency: String },

    #[error("dependency cycle detected at device \"{device}\"")]
    DependencyCycle { device: String },

    #[error("device \"{0}\" is declared more than once")]
    DuplicateDevice(String),

    #[error("device \"{device}\" is missing required parameter \"{parameter}\"")]
    MissingParameter {
        device: String,
        parameter: &'static str,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device \"{0}\" is disabled and cannot be turned on")]
    Disabled(String),
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid payload \"{payload}\" on topic \"{topic}\"")]
    InvalidPayload { topic: String, payload: String },

    #[error("unexpected event {0}")]
    UnexpectedEvent(String),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error(transparent)]
    Device(#[from] DeviceError),
}
