//! Translation between broker publishes and internal events
//!
//! Outbound, an event becomes a publish on the topic its kind maps to. Inbound, every
//! admitted publish is offered to the rule engine, observed as a generic
//! [`EventKind::MqttMessage`] and, when its topic starts with a known prefix, posted as the
//! typed event that prefix maps to.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::conf;
use crate::event::{Event, EventBus, EventHandler, EventKind, Origin};
use crate::router::Router;
use crate::topic;
use crate::types::TopicName;
use crate::Result;

/// The host's automation engine. The broker offers it every admitted publish and does not
/// care whether it acts on it.
#[async_trait]
pub trait RuleEngine: Sync + Send {
    async fn handle_message(&self, topic: &str, payload: &Bytes);
}

pub struct NoopRuleEngine;

#[async_trait]
impl RuleEngine for NoopRuleEngine {
    async fn handle_message(&self, _topic: &str, _payload: &Bytes) {}
}

#[derive(Clone)]
pub struct Bridge {
    outgoing: Arc<Vec<(EventKind, TopicName)>>,
    incoming: Arc<Vec<(String, EventKind)>>,
    bus: EventBus,
    engine: Arc<dyn RuleEngine>,
}

impl Bridge {
    pub fn new(cfg: &conf::Bridge, bus: EventBus, engine: Arc<dyn RuleEngine>) -> Result<Self> {
        let outgoing = cfg
            .outgoing
            .iter()
            .map(|r| Ok((r.event.parse::<EventKind>()?, TopicName::from(r.topic.as_str()))))
            .collect::<Result<Vec<_>>>()?;
        let incoming = cfg
            .incoming
            .iter()
            .map(|r| Ok((r.prefix.clone(), r.event.parse::<EventKind>()?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { outgoing: Arc::new(outgoing), incoming: Arc::new(incoming), bus, engine })
    }

    #[inline]
    pub fn event_to_topic(&self, kind: EventKind) -> Option<&TopicName> {
        event_to_topic(&self.outgoing, kind)
    }

    #[inline]
    pub fn topic_prefix_to_event(&self, topic: &str) -> Option<EventKind> {
        self.incoming.iter().find(|(prefix, _)| topic.starts_with(prefix.as_str())).map(|(_, k)| *k)
    }

    #[inline]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Called once for every publish a session has admitted.
    pub async fn inject_message(&self, topic: &TopicName, payload: &Bytes) {
        self.engine.handle_message(topic, payload).await;

        let observed = Event::new(EventKind::MqttMessage, payload.clone()).topic(topic.clone()).origin(Origin::Broker);
        self.bus.post(observed).await;

        if let Some(kind) = self.topic_prefix_to_event(topic) {
            log::debug!("{} -> {}", topic, kind);
            let ev = Event::new(kind, payload.clone()).topic(topic.clone()).origin(Origin::Broker);
            self.bus.post(ev).await;
        }
    }

    /// The bus handler that turns host events into broker publishes.
    ///
    /// It holds only the outgoing table, never the bus it is registered on.
    pub fn outbound(&self, router: Router) -> Arc<dyn EventHandler> {
        Arc::new(Outbound { outgoing: self.outgoing.clone(), router })
    }
}

#[inline]
fn event_to_topic(outgoing: &[(EventKind, TopicName)], kind: EventKind) -> Option<&TopicName> {
    outgoing.iter().find(|(k, _)| *k == kind).map(|(_, t)| t)
}

struct Outbound {
    outgoing: Arc<Vec<(EventKind, TopicName)>>,
    router: Router,
}

#[async_trait]
impl EventHandler for Outbound {
    async fn handle(&self, event: &Event) {
        if event.origin == Origin::Broker {
            return;
        }
        let topic = match event.topic.as_ref().or_else(|| event_to_topic(&self.outgoing, event.kind)) {
            Some(t) => t.clone(),
            None => return,
        };
        if !topic::is_valid_topic(&topic) {
            log::warn!("event {} carries an invalid topic {:?}, dropped", event.kind, topic);
            return;
        }
        let n = self.router.publish_message(topic.clone(), event.payload.clone());
        log::debug!("event {} published to {}, {} subscribers", event.kind, topic, n);
    }
}
