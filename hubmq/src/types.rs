use std::fmt;
use std::net::SocketAddr;
use std::num::NonZeroU16;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use bytestring::ByteString;
use serde::Serialize;
use tokio::time::Instant;

use crate::codec::v3::Publish;
use crate::codec::QoS;
use crate::utils::{serialize_duration, TimestampMillis};

pub type ClientId = ByteString;
pub type TopicName = ByteString;
pub type TopicFilter = ByteString;

/// Router-assigned number that tells two sessions of the same client id apart.
pub type SessionId = u64;

/// Identity of a connected client, `client_id@remote_addr`.
#[derive(Clone)]
pub struct Id(Arc<_Id>);

pub struct _Id {
    id: ByteString,
    pub client_id: ClientId,
    pub remote_addr: Option<SocketAddr>,
}

impl Id {
    #[inline]
    pub fn new(client_id: ClientId, remote_addr: Option<SocketAddr>) -> Self {
        let id = ByteString::from(format!(
            "{}@{}",
            client_id,
            remote_addr.map(|addr| addr.to_string()).unwrap_or_default()
        ));
        Self(Arc::new(_Id { id, client_id, remote_addr }))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl Deref for Id {
    type Target = _Id;
    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Id {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl fmt::Debug for Id {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl PartialEq for Id {
    #[inline]
    fn eq(&self, other: &Id) -> bool {
        self.id == other.id
    }
}

impl Eq for Id {}

/// Who forced a session to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KickedBy {
    /// The periodic idle sweep
    Supervisor,
    /// A newer CONNECT with the same client id
    Takeover,
}

/// Why a session reached `Closed`. Logged once during cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    /// Orderly DISCONNECT from the client
    Disconnect,
    RemoteClose,
    KeepaliveTimeout,
    Kicked(KickedBy),
    ProtocolError(ByteString),
    Io(ByteString),
}

impl Reason {
    /// Only an orderly DISCONNECT suppresses the Will.
    #[inline]
    pub fn fires_will(&self) -> bool {
        !matches!(self, Reason::Disconnect)
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Disconnect => write!(f, "Disconnect"),
            Reason::RemoteClose => write!(f, "RemoteClose"),
            Reason::KeepaliveTimeout => write!(f, "KeepaliveTimeout"),
            Reason::Kicked(KickedBy::Supervisor) => write!(f, "Kicked(by supervisor)"),
            Reason::Kicked(KickedBy::Takeover) => write!(f, "Kicked(by takeover)"),
            Reason::ProtocolError(r) => write!(f, "ProtocolError({r})"),
            Reason::Io(r) => write!(f, "Io({r})"),
        }
    }
}

impl From<anyhow::Error> for Reason {
    #[inline]
    fn from(e: anyhow::Error) -> Self {
        Reason::Io(ByteString::from(e.to_string()))
    }
}

/// One application message on its way to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: TopicName,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl Message {
    #[inline]
    pub fn new(topic: TopicName, payload: Bytes, qos: QoS, retain: bool) -> Self {
        Self { topic, payload, qos, retain }
    }

    /// Builds the PUBLISH frame for one subscriber.
    ///
    /// `packet_id` is only used when `qos` is above 0.
    #[inline]
    pub fn to_publish(&self, qos: QoS, retain: bool, packet_id: NonZeroU16) -> Publish {
        Publish {
            dup: false,
            retain,
            qos,
            topic: self.topic.clone(),
            packet_id: if qos == QoS::AtMostOnce { None } else { Some(packet_id) },
            payload: self.payload.clone(),
        }
    }
}

impl From<&Publish> for Message {
    #[inline]
    fn from(p: &Publish) -> Self {
        Message::new(p.topic.clone(), p.payload.clone(), p.qos, p.retain)
    }
}

/// What the router queues for a session: the message and the QoS it was granted at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub msg: Message,
    pub qos: QoS,
}

/// Last activity time shared between a session and the idle sweep.
#[derive(Debug)]
pub struct Activity {
    base: Instant,
    elapsed_ms: AtomicU64,
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

impl Activity {
    #[inline]
    pub fn new() -> Self {
        Self { base: Instant::now(), elapsed_ms: AtomicU64::new(0) }
    }

    #[inline]
    pub fn touch(&self) {
        let ms = self.base.elapsed().as_millis() as u64;
        self.elapsed_ms.fetch_max(ms, Ordering::Relaxed);
    }

    /// Time since the last [`touch`](Self::touch), or since creation.
    #[inline]
    pub fn idle(&self) -> Duration {
        let last = Duration::from_millis(self.elapsed_ms.load(Ordering::Relaxed));
        self.base.elapsed().saturating_sub(last)
    }
}

/// Counters exposed by [`crate::router::Router::stats`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub timestamp: TimestampMillis,
    pub started_at: String,
    #[serde(serialize_with = "serialize_duration")]
    pub uptime: Duration,
    pub clients: usize,
    pub clients_max: isize,
    pub connections_accepted: u64,
    pub connections_refused: u64,
    pub publishes_received: u64,
    pub deliveries: u64,
    pub deliveries_dropped: u64,
    pub retained: usize,
    pub retained_dropped: u64,
    pub oversize_dropped: u64,
    pub events_dropped: u64,
}
