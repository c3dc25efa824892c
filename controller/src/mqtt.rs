use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use rumqttc::{AsyncClient, EventLoop, Incoming, MqttOptions, Outgoing};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use heating_common::{
    Event, EventKind, EventSender, HandlerError, MqttConfig, Plugin, PluginError, QoS, Registrar,
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;

pub trait Transport: Send + 'static {
    fn try_subscribe(&self, topic: &str, qos: QoS) -> bool;

    fn try_publish(&self, topic: &str, payload: &str) -> bool;

    fn try_disconnect(&self) -> bool;
}

impl Transport for AsyncClient {
    fn try_subscribe(&self, topic: &str, qos: QoS) -> bool {
        match AsyncClient::try_subscribe(self, topic, mqtt_qos(qos)) {
            Ok(()) => true,
            Err(err) => {
                debug!("mqtt subscribe to {topic} deferred: {err}");
                false
            }
        }
    }

    fn try_publish(&self, topic: &str, payload: &str) -> bool {
        match AsyncClient::try_publish(self, topic, rumqttc::QoS::AtLeastOnce, false, payload) {
            Ok(()) => true,
            Err(err) => {
                debug!("mqtt publish to {topic} deferred: {err}");
                false
            }
        }
    }

    fn try_disconnect(&self) -> bool {
        match AsyncClient::try_disconnect(self) {
            Ok(()) => true,
            Err(err) => {
                warn!("mqtt disconnect failed: {err}");
                false
            }
        }
    }
}

fn mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

#[derive(Debug, Default)]
struct TopicState {
    topics: BTreeMap<String, QoS>,
    restore_pending: bool,
}

// Shared with the event loop task, which flags a restore on every ConnAck.
#[derive(Debug, Clone, Default)]
struct SubscribedTopics(Arc<Mutex<TopicState>>);

impl SubscribedTopics {
    fn insert(&self, topic: &str, qos: QoS) -> bool {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        state.topics.insert(topic.to_string(), qos) != Some(qos)
    }

    fn snapshot(&self) -> Vec<(String, QoS)> {
        let state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .topics
            .iter()
            .map(|(topic, qos)| (topic.clone(), *qos))
            .collect()
    }

    fn request_restore(&self) {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        state.restore_pending = true;
    }

    fn take_restore(&self) -> bool {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut state.restore_pending)
    }
}

#[derive(Debug, Default)]
struct Outbox {
    subscribes: VecDeque<(String, QoS)>,
    publishes: VecDeque<(String, String)>,
}

impl Outbox {
    fn len(&self) -> usize {
        self.subscribes.len() + self.publishes.len()
    }

    fn flush(&mut self, transport: &impl Transport) -> usize {
        let mut sent = 0;

        while let Some((topic, qos)) = self.subscribes.front() {
            if !transport.try_subscribe(topic, *qos) {
                return sent;
            }
            self.subscribes.pop_front();
            sent += 1;
        }

        while let Some((topic, payload)) = self.publishes.front() {
            if !transport.try_publish(topic, payload) {
                return sent;
            }
            self.publishes.pop_front();
            sent += 1;
        }

        sent
    }
}

type EventLoopStarter = Box<dyn FnOnce(EventSender) -> JoinHandle<()> + Send>;

pub struct MqttPlugin<T: Transport = AsyncClient> {
    transport: T,
    event_loop: Option<EventLoopStarter>,
    poller: Option<JoinHandle<()>>,
    topics: SubscribedTopics,
    outbox: Outbox,
}

impl MqttPlugin {
    pub fn new(config: &MqttConfig) -> Self {
        let mut options = MqttOptions::new(
            config.client_id.as_str(),
            config.host.as_str(),
            config.port,
        );
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if !config.user.is_empty() {
            options.set_credentials(config.user.as_str(), config.pass.as_str());
        }

        let (client, eventloop) = AsyncClient::new(options, config.request_capacity);
        let topics = SubscribedTopics::default();
        let starter: EventLoopStarter = {
            let topics = topics.clone();
            Box::new(move |events| spawn_event_loop(eventloop, topics, events))
        };

        Self {
            transport: client,
            event_loop: Some(starter),
            poller: None,
            topics,
            outbox: Outbox::default(),
        }
    }
}

impl<T: Transport> MqttPlugin<T> {
    fn start_event_loop(&mut self, events: &EventSender) {
        if let Some(start) = self.event_loop.take() {
            self.poller = Some(start(events.clone()));
        }
    }

    fn on_subscribe(&mut self, event: &Event) -> Result<(), HandlerError> {
        let Event::Subscribe { topic, qos } = event else {
            return Err(HandlerError::UnexpectedEvent(event.to_string()));
        };

        if self.topics.insert(topic, *qos) {
            info!("mqtt subscribing to {topic}");
            self.outbox.subscribes.push_back((topic.clone(), *qos));
        }
        Ok(())
    }

    fn on_message_send(&mut self, event: &Event) -> Result<(), HandlerError> {
        let Event::MessageSend { topic, payload } = event else {
            return Err(HandlerError::UnexpectedEvent(event.to_string()));
        };

        self.outbox
            .publishes
            .push_back((topic.clone(), payload.clone()));
        Ok(())
    }

    // Requeues every known topic after a reconnect. Refused requests stay
    // in the outbox and are retried on the next flush.
    fn restore_subscriptions(&mut self) {
        if !self.topics.take_restore() {
            return;
        }

        let topics = self.topics.snapshot();
        info!("mqtt connected, restoring {} subscriptions", topics.len());
        for entry in topics {
            if !self.outbox.subscribes.contains(&entry) {
                self.outbox.subscribes.push_back(entry);
            }
        }
    }

    fn flush(&mut self) {
        self.restore_subscriptions();
        self.outbox.flush(&self.transport);
    }
}

impl<T: Transport> Plugin for MqttPlugin<T> {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn setup(&mut self, registrar: &mut Registrar<'_, Self>) {
        registrar.add_event_handler(EventKind::Subscribe, "mqtt.on_subscribe", |plugin, event, _| {
            plugin.on_subscribe(event)
        });
        registrar.add_event_handler(
            EventKind::MessageSend,
            "mqtt.on_message_send",
            |plugin, event, _| plugin.on_message_send(event),
        );
    }

    fn tick(&mut self, events: &EventSender) -> Result<(), PluginError> {
        self.start_event_loop(events);
        self.flush();
        Ok(())
    }

    fn on_stop(&mut self, _events: &EventSender) {
        self.flush();
        if self.outbox.len() > 0 {
            warn!("mqtt stopping with {} unsent requests", self.outbox.len());
        }
        if !self.transport.try_disconnect() {
            if let Some(poller) = self.poller.take() {
                poller.abort();
            }
        }
    }
}

fn received_event(topic: &str, payload: &[u8]) -> Option<Event> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return None;
    }

    match std::str::from_utf8(payload) {
        Ok(text) => Some(Event::received(topic, text)),
        Err(err) => {
            warn!("dropping non UTF-8 MQTT payload on topic {topic}: {err}");
            None
        }
    }
}

fn spawn_event_loop(
    mut eventloop: EventLoop,
    topics: SubscribedTopics,
    events: EventSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(rumqttc::Event::Incoming(Incoming::Publish(message))) => {
                    if let Some(event) = received_event(&message.topic, &message.payload) {
                        events.send_event(event);
                    }
                }
                Ok(rumqttc::Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    topics.request_restore();
                }
                Ok(rumqttc::Event::Outgoing(Outgoing::Disconnect)) => {
                    info!("mqtt disconnected");
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    })
}
