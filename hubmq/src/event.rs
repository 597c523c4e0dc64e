//! Internal event bus
//!
//! Host components and the broker exchange typed [`Event`]s through one bounded queue.
//! A single worker drains the queue and hands every event to the registered handlers in
//! registration order. Posting waits at most the configured timeout; an event that does
//! not fit in time is dropped and counted.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::types::TopicName;
use crate::utils::DropTally;
use crate::{Error, Result};

macro_rules! event_kinds {
    ($($kind:ident),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EventKind {
            $($kind),+
        }

        impl EventKind {
            pub const ALL: &'static [EventKind] = &[$(EventKind::$kind),+];

            #[inline]
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(EventKind::$kind => stringify!($kind)),+
                }
            }
        }

        impl FromStr for EventKind {
            type Err = Error;
            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $(stringify!($kind) => Ok(EventKind::$kind),)+
                    _ => Err(anyhow!("unknown event kind '{}'", s)),
                }
            }
        }
    };
}

event_kinds!(
    CardOk,
    CardBad,
    LaserTrigger,
    RelayCmd,
    AudioPlay,
    VolumeSet,
    WebCommand,
    SystemStatus,
    DeviceConfigChanged,
    MqttMessage,
);

impl fmt::Display for EventKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an event was posted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Translated from a client publish
    Broker,
    /// Any host component
    Host,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub topic: Option<TopicName>,
    pub payload: Bytes,
    pub origin: Origin,
}

impl Event {
    #[inline]
    pub fn new<P: Into<Bytes>>(kind: EventKind, payload: P) -> Self {
        Self { kind, topic: None, payload: payload.into(), origin: Origin::Host }
    }

    #[inline]
    pub fn topic<T: Into<TopicName>>(mut self, topic: T) -> Self {
        self.topic = Some(topic.into());
        self
    }

    #[inline]
    pub fn origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }
}

#[async_trait]
pub trait EventHandler: Sync + Send {
    async fn handle(&self, event: &Event);
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

pub struct EventBusInner {
    tx: mpsc::Sender<Event>,
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
    max_handlers: usize,
    post_timeout: Duration,
    dropped: DropTally,
}

impl EventBus {
    /// Creates the bus and spawns its dispatch worker. Must be called inside a tokio runtime.
    ///
    /// The worker ends once every clone of the bus has been dropped.
    pub fn start(queue: usize, max_handlers: usize, post_timeout: Duration) -> (EventBus, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue.max(1));
        let bus = EventBus {
            inner: Arc::new(EventBusInner {
                tx,
                handlers: RwLock::new(Vec::new()),
                max_handlers,
                post_timeout,
                dropped: DropTally::default(),
            }),
        };
        let worker = tokio::spawn(dispatch(Arc::downgrade(&bus.inner), rx));
        (bus, worker)
    }

    pub fn register(&self, handler: Arc<dyn EventHandler>) -> Result<()> {
        let mut handlers = self.inner.handlers.write();
        if handlers.len() >= self.inner.max_handlers {
            return Err(anyhow!("event bus handler table is full, max {}", self.inner.max_handlers));
        }
        handlers.push(handler);
        Ok(())
    }

    /// Queues `event`, waiting at most the post timeout. Returns false when it was dropped.
    pub async fn post(&self, event: Event) -> bool {
        self.post_timeout(event, self.inner.post_timeout).await
    }

    pub async fn post_timeout(&self, event: Event, timeout: Duration) -> bool {
        match self.inner.tx.send_timeout(event, timeout).await {
            Ok(()) => true,
            Err(e) => {
                if let Some(n) = self.inner.dropped.record() {
                    log::warn!("event queue full, dropped {:?}, {} dropped so far", e.into_inner().kind, n);
                }
                false
            }
        }
    }

    #[inline]
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.total()
    }

    #[inline]
    pub fn handlers(&self) -> usize {
        self.inner.handlers.read().len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus {{ handlers: {}, dropped: {} }}", self.handlers(), self.dropped())
    }
}

async fn dispatch(bus: std::sync::Weak<EventBusInner>, mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        let Some(bus) = bus.upgrade() else {
            break;
        };
        let handlers = bus.handlers.read().clone();
        drop(bus);
        log::debug!("dispatch {:?} to {} handlers", event.kind, handlers.len());
        for h in handlers.iter() {
            h.handle(&event).await;
        }
    }
    log::debug!("event dispatch worker exit");
}
