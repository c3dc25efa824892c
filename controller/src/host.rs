use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use tracing::{info, warn};

use heating_common::{HeatingPlugin, MonotonicClock, MqttConfig, PluginRunManager, RuntimeConfig};

use crate::mqtt::MqttPlugin;

const DEFAULT_CONFIG_PATH: &str = "./heating.json";

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let path = std::env::var("HEATING_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut runtime = load_runtime_config(&path)
        .await
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    apply_mqtt_overrides(&mut runtime.mqtt, |key| std::env::var(key).ok());
    runtime.sanitize();

    let heating = HeatingPlugin::new(&runtime.heating, Arc::new(MonotonicClock))
        .context("invalid heating device configuration")?;
    let mqtt = MqttPlugin::new(&runtime.mqtt);

    let tick_interval = Duration::from_millis(runtime.scheduler.tick_interval_ms);
    let mut manager =
        PluginRunManager::new(Duration::from_millis(runtime.scheduler.round_interval_ms));
    manager
        .add_plugin(mqtt, tick_interval)
        .add_plugin(heating, tick_interval);

    info!(
        "starting plugins [{}], mqtt broker {}:{}",
        manager.plugin_names().join(", "),
        runtime.mqtt.host,
        runtime.mqtt.port
    );
    manager.start();
    manager.run_until(shutdown_signal()).await;

    info!("shutdown requested");
    manager.stop().await;
    Ok(())
}

async fn load_runtime_config(path: &Path) -> anyhow::Result<RuntimeConfig> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!("{} not found, using default configuration", path.display());
            Ok(RuntimeConfig::default())
        }
        Err(err) => Err(err.into()),
    }
}

fn apply_mqtt_overrides(mqtt: &mut MqttConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(host) = lookup("MQTT_HOST") {
        mqtt.host = host;
    }
    if let Some(port) = lookup("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
        mqtt.port = port;
    }
    if let Some(user) = lookup("MQTT_USER") {
        mqtt.user = user;
    }
    if let Some(pass) = lookup("MQTT_PASS") {
        mqtt.pass = pass;
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn env_overrides_replace_broker_settings() {
        let env = HashMap::from([
            ("MQTT_HOST", "broker.local"),
            ("MQTT_PORT", "8883"),
            ("MQTT_USER", "heating"),
        ]);
        let mut mqtt = MqttConfig::default();

        apply_mqtt_overrides(&mut mqtt, |key| env.get(key).map(|value| value.to_string()));

        assert_eq!(mqtt.host, "broker.local");
        assert_eq!(mqtt.port, 8883);
        assert_eq!(mqtt.user, "heating");
        assert_eq!(mqtt.pass, "");
    }

    #[test]
    fn unparsable_port_keeps_configured_value() {
        let mut mqtt = MqttConfig::default();

        apply_mqtt_overrides(&mut mqtt, |key| {
            (key == "MQTT_PORT").then(|| "not-a-port".to_string())
        });

        assert_eq!(mqtt.port, 1883);
    }

    #[tokio::test]
    async fn missing_config_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("heating-controller-missing-config.json");

        let runtime = load_runtime_config(&path).await.unwrap();

        assert!(runtime.heating.devices.is_empty());
        assert_eq!(runtime.scheduler.tick_interval_ms, 100);
    }

    #[tokio::test]
    async fn malformed_config_file_is_an_error() {
        let path = std::env::temp_dir().join(format!(
            "heating-controller-malformed-{}.json",
            std::process::id()
        ));
        tokio::fs::write(&path, b"{ \"heating\": ").await.unwrap();

        let result = load_runtime_config(&path).await;
        tokio::fs::remove_file(&path).await.unwrap();

        assert!(result.is_err());
    }
}
