use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::event::Event;

pub fn event_exchange() -> (EventExchange, ExchangeEndpoint) {
    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

    (
        EventExchange {
            incoming: incoming_rx,
            outgoing: EventSender(outgoing_tx),
        },
        ExchangeEndpoint {
            incoming: incoming_tx,
            outgoing: outgoing_rx,
        },
    )
}

#[derive(Debug)]
pub struct EventExchange {
    incoming: UnboundedReceiver<Event>,
    outgoing: EventSender,
}

impl EventExchange {
    pub fn receive_message(&mut self) -> Option<Event> {
        self.incoming.try_recv().ok()
    }

    pub fn send_message(&self, event: Event) {
        self.outgoing.send_event(event);
    }

    pub fn sender(&self) -> EventSender {
        self.outgoing.clone()
    }
}

#[derive(Debug, Clone)]
pub struct EventSender(UnboundedSender<Event>);

impl EventSender {
    pub fn send_event(&self, event: Event) {
        if let Err(err) = self.0.send(event) {
            debug!("dropping event {}, broker is gone", err.0);
        }
    }

    pub fn send_events(&self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.send_event(event);
        }
    }
}

#[derive(Debug)]
pub struct ExchangeEndpoint {
    incoming: UnboundedSender<Event>,
    outgoing: UnboundedReceiver<Event>,
}

impl ExchangeEndpoint {
    pub fn put(&self, event: Event) {
        if let Err(err) = self.incoming.send(event) {
            debug!("dropping event {}, plugin is gone", err.0);
        }
    }

    pub fn get(&mut self) -> Option<Event> {
        self.outgoing.try_recv().ok()
    }

    pub fn drain(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.get()).collect()
    }
}
