use std::{future::Future, time::Duration};

use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::{
    exchange::{event_exchange, ExchangeEndpoint},
    plugin::{Plugin, PluginHandle, PluginRunner},
};

pub trait ScheduledPlugin: Send {
    fn name(&self) -> &str;

    fn spawn(self: Box<Self>) -> PluginHandle;
}

impl<P: Plugin> ScheduledPlugin for PluginRunner<P> {
    fn name(&self) -> &str {
        PluginRunner::name(self)
    }

    fn spawn(self: Box<Self>) -> PluginHandle {
        PluginRunner::spawn(*self)
    }
}

enum Lifecycle {
    Created(Box<dyn ScheduledPlugin>),
    Running(PluginHandle),
    Stopped,
}

struct ManagedPlugin {
    name: String,
    endpoint: ExchangeEndpoint,
    lifecycle: Lifecycle,
}

pub struct PluginRunManager {
    plugins: Vec<ManagedPlugin>,
    round_interval: Duration,
}

impl PluginRunManager {
    pub fn new(round_interval: Duration) -> Self {
        Self {
            plugins: Vec::new(),
            round_interval,
        }
    }

    pub fn add_plugin<P: Plugin>(&mut self, plugin: P, tick_interval: Duration) -> &mut Self {
        let (exchange, endpoint) = event_exchange();
        let runner = PluginRunner::new(plugin, exchange, tick_interval);
        self.add_runner(Box::new(runner), endpoint)
    }

    pub fn add_runner(
        &mut self,
        runner: Box<dyn ScheduledPlugin>,
        endpoint: ExchangeEndpoint,
    ) -> &mut Self {
        self.plugins.push(ManagedPlugin {
            name: runner.name().to_string(),
            endpoint,
            lifecycle: Lifecycle::Created(runner),
        });
        self
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|plugin| plugin.name.as_str()).collect()
    }

    pub fn start(&mut self) {
        for plugin in &mut self.plugins {
            let lifecycle = std::mem::replace(&mut plugin.lifecycle, Lifecycle::Stopped);
            plugin.lifecycle = match lifecycle {
                Lifecycle::Created(runner) => {
                    info!("starting plugin {}", plugin.name);
                    Lifecycle::Running(runner.spawn())
                }
                other => other,
            };
        }
    }

    pub fn step(&mut self) -> usize {
        (0..self.plugins.len())
            .map(|index| self.send_out_plugin_events(index))
            .sum()
    }

    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut interval = tokio::time::interval(self.round_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    self.step();
                }
            }
        }
    }

    /// Stops plugins in reverse start order. Whatever a plugin emits while
    /// stopping is routed before the next plugin is stopped.
    pub async fn stop(&mut self) {
        for index in (0..self.plugins.len()).rev() {
            let lifecycle =
                std::mem::replace(&mut self.plugins[index].lifecycle, Lifecycle::Stopped);
            if let Lifecycle::Running(handle) = lifecycle {
                if let Err(err) = handle.stop().await {
                    error!("plugin {} failed: {err}", self.plugins[index].name);
                }
            }
            self.send_out_plugin_events(index);
        }
    }

    fn send_out_plugin_events(&mut self, index: usize) -> usize {
        let events = self.plugins[index].endpoint.drain();
        for (other, plugin) in self.plugins.iter().enumerate() {
            if other == index {
                continue;
            }
            for event in &events {
                plugin.endpoint.put(event.clone());
            }
        }
        events.len()
    }
}
