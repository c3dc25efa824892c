use std::{collections::HashMap, time::Duration};

use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, error, info};

use crate::{
    error::{HandlerError, PluginError},
    event::{Event, EventKind, QoS},
    exchange::{EventExchange, EventSender},
};

pub type Handler<P> =
    Box<dyn FnMut(&mut P, &Event, &EventSender) -> Result<(), HandlerError> + Send>;

struct NamedHandler<P> {
    name: String,
    handler: Handler<P>,
}

pub struct HandlerRegistry<P> {
    by_kind: HashMap<EventKind, Vec<NamedHandler<P>>>,
    by_topic: HashMap<String, Vec<NamedHandler<P>>>,
}

impl<P> Default for HandlerRegistry<P> {
    fn default() -> Self {
        Self {
            by_kind: HashMap::new(),
            by_topic: HashMap::new(),
        }
    }
}

impl<P> HandlerRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_event_handler<F>(&mut self, kind: EventKind, name: impl Into<String>, handler: F)
    where
        F: FnMut(&mut P, &Event, &EventSender) -> Result<(), HandlerError> + Send + 'static,
    {
        let name = name.into();
        info!("added handler {name} for event kind {}", kind.as_str());
        self.by_kind.entry(kind).or_default().push(NamedHandler {
            name,
            handler: Box::new(handler),
        });
    }

    pub fn add_topic_handler<F>(
        &mut self,
        topic: impl Into<String>,
        name: impl Into<String>,
        handler: F,
    )
    where
        F: FnMut(&mut P, &Event, &EventSender) -> Result<(), HandlerError> + Send + 'static,
    {
        self.by_topic.entry(topic.into()).or_default().push(NamedHandler {
            name: name.into(),
            handler: Box::new(handler),
        });
    }

    /// Runs every matching handler. A failing handler is logged and the
    /// remaining ones still run. Returns how many handlers were invoked.
    pub fn dispatch(
        &mut self,
        plugin: &mut P,
        event: &Event,
        events: &EventSender,
        plugin_name: &str,
    ) -> usize {
        let by_kind = self.by_kind.get_mut(&event.kind());
        let by_topic = match event {
            Event::MessageReceived { topic, .. } => self.by_topic.get_mut(topic),
            _ => None,
        };

        let mut invoked = 0;
        for named in by_kind.into_iter().chain(by_topic).flatten() {
            invoked += 1;
            if let Err(err) = (named.handler)(plugin, event, events) {
                error!(
                    "{plugin_name}: on handle event {event} by handler {} error: {err}",
                    named.name
                );
            }
        }

        if invoked == 0 {
            debug!("{plugin_name}: no handler for event {event}");
        }
        invoked
    }
}

pub struct Registrar<'a, P> {
    handlers: &'a mut HandlerRegistry<P>,
    events: &'a EventSender,
}

impl<P> Registrar<'_, P> {
    pub fn add_event_handler<F>(&mut self, kind: EventKind, name: impl Into<String>, handler: F)
    where
        F: FnMut(&mut P, &Event, &EventSender) -> Result<(), HandlerError> + Send + 'static,
    {
        self.handlers.add_event_handler(kind, name, handler);
    }

    pub fn add_topic_handler<F>(
        &mut self,
        topic: impl Into<String>,
        name: impl Into<String>,
        handler: F,
    )
    where
        F: FnMut(&mut P, &Event, &EventSender) -> Result<(), HandlerError> + Send + 'static,
    {
        self.handlers.add_topic_handler(topic, name, handler);
    }

    pub fn subscribe_to_topic<F>(
        &mut self,
        topic: impl Into<String>,
        name: impl Into<String>,
        handler: F,
    )
    where
        F: FnMut(&mut P, &Event, &EventSender) -> Result<(), HandlerError> + Send + 'static,
    {
        let topic = topic.into();
        self.handlers.add_topic_handler(topic.as_str(), name, handler);
        self.events.send_event(Event::subscribe(topic, QoS::AtLeastOnce));
    }

    pub fn events(&self) -> &EventSender {
        self.events
    }
}

pub trait Plugin: Send + Sized + 'static {
    fn name(&self) -> &str;

    fn setup(&mut self, _registrar: &mut Registrar<'_, Self>) {}

    fn tick(&mut self, _events: &EventSender) -> Result<(), PluginError> {
        Ok(())
    }

    fn on_stop(&mut self, _events: &EventSender) {}
}

pub struct PluginRunner<P: Plugin> {
    name: String,
    plugin: P,
    handlers: HandlerRegistry<P>,
    exchange: EventExchange,
    events: EventSender,
    tick_interval: Duration,
}

impl<P: Plugin> PluginRunner<P> {
    pub fn new(mut plugin: P, exchange: EventExchange, tick_interval: Duration) -> Self {
        let events = exchange.sender();
        let mut handlers = HandlerRegistry::new();
        plugin.setup(&mut Registrar {
            handlers: &mut handlers,
            events: &events,
        });

        Self {
            name: plugin.name().to_string(),
            plugin,
            handlers,
            exchange,
            events,
            tick_interval,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plugin(&self) -> &P {
        &self.plugin
    }

    pub fn handlers_mut(&mut self) -> &mut HandlerRegistry<P> {
        &mut self.handlers
    }

    pub fn drain_inbound(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.exchange.receive_message() {
            self.handlers
                .dispatch(&mut self.plugin, &event, &self.events, &self.name);
            handled += 1;
        }
        handled
    }

    pub fn run_tick(&mut self) {
        self.drain_inbound();
        if let Err(err) = self.plugin.tick(&self.events) {
            error!("{}: on run tick: {err}", self.name);
        }
    }

    pub fn stop(&mut self) {
        self.drain_inbound();
        self.plugin.on_stop(&self.events);
        info!("plugin {} stopped", self.name);
    }

    pub fn spawn(self) -> PluginHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let name = self.name.clone();
        let mut runner = self;

        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(runner.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("plugin {} started", runner.name);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    _ = interval.tick() => runner.run_tick(),
                }
            }

            runner.stop();
        });

        PluginHandle {
            name,
            stop_tx,
            join,
        }
    }
}

pub struct PluginHandle {
    name: String,
    stop_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl PluginHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn stop(self) -> Result<(), tokio::task::JoinError> {
        info!("stopping plugin {}", self.name);
        let _ = self.stop_tx.send(());
        self.join.await
    }
}
