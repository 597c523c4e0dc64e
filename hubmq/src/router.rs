//! Session table, subscriptions and fan-out
//!
//! All mutation and every fan-out run under one exclusive lock, so two publishes accepted
//! in sequence reach every subscriber in that sequence, and a SUBSCRIBE either sees the
//! retained value or the live publish. Fan-out never writes to a socket: it queues a
//! [`Delivery`] on the subscriber's bounded outbound queue and moves on.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::codec::v3::Packet;
use crate::codec::QoS;
use crate::conf;
use crate::retain::{RetainOutcome, RetainedStore};
use crate::topic;
use crate::types::{
    Activity, ClientId, Delivery, Id, KickedBy, Message, SessionId, StatsSnapshot, TopicFilter, TopicName,
};
use crate::utils::{format_timestamp_millis, timestamp_millis, Counter, DropTally, TimestampMillis};

/// Handed to a session by [`Router::register`].
pub struct Registration {
    pub sid: SessionId,
    pub deliveries: mpsc::Receiver<Delivery>,
    pub kicked: oneshot::Receiver<KickedBy>,
}

struct Entry {
    sid: SessionId,
    id: Id,
    subs: Vec<(TopicFilter, QoS)>,
    tx: mpsc::Sender<Delivery>,
    kick: Option<oneshot::Sender<KickedBy>>,
    activity: Arc<Activity>,
    idle_threshold: Duration,
}

impl Entry {
    #[inline]
    fn kick(&mut self, by: KickedBy) -> bool {
        match self.kick.take() {
            Some(tx) => tx.send(by).is_ok(),
            None => false,
        }
    }
}

struct State {
    sessions: HashMap<ClientId, Entry, ahash::RandomState>,
    retained: RetainedStore,
}

#[derive(Default)]
struct Stats {
    clients: Counter,
    connections_accepted: AtomicU64,
    connections_refused: AtomicU64,
    publishes_received: AtomicU64,
    deliveries: AtomicU64,
}

#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

pub struct RouterInner {
    pub cfg: conf::Broker,
    max_packet_size: u32,
    state: Mutex<State>,
    slots: Arc<Semaphore>,
    next_sid: AtomicU64,
    started: TimestampMillis,
    boot: Instant,
    stats: Stats,
    table_full: DropTally,
    retained_full: DropTally,
    queue_full: DropTally,
    oversize: DropTally,
}

impl Deref for Router {
    type Target = RouterInner;
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Router {{ clients: {} }}", self.client_count())
    }
}

impl Router {
    /// `max_packet_size` is the frame cap of the listener, `0` for none. Messages that would
    /// not fit in one frame are refused before fan-out.
    pub fn new(cfg: conf::Broker, max_packet_size: u32) -> Self {
        let state = State { sessions: HashMap::default(), retained: RetainedStore::new(cfg.retain_max) };
        Router {
            inner: Arc::new(RouterInner {
                slots: Arc::new(Semaphore::new(cfg.max_sessions)),
                cfg,
                max_packet_size,
                state: Mutex::new(state),
                next_sid: AtomicU64::new(1),
                started: timestamp_millis(),
                boot: Instant::now(),
                stats: Stats::default(),
                table_full: DropTally::default(),
                retained_full: DropTally::default(),
                queue_full: DropTally::default(),
                oversize: DropTally::default(),
            }),
        }
    }

    /// Reserves a session slot for a freshly accepted connection.
    ///
    /// `None` means the table is full and the connection must be closed unread.
    pub fn try_acquire_slot(&self) -> Option<OwnedSemaphorePermit> {
        match self.slots.clone().try_acquire_owned() {
            Ok(permit) => {
                self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
                Some(permit)
            }
            Err(_) => {
                self.stats.connections_refused.fetch_add(1, Ordering::Relaxed);
                if let Some(n) = self.table_full.record() {
                    log::warn!(
                        "session table full ({} sessions), connection refused, {} refused so far",
                        self.cfg.max_sessions,
                        n
                    );
                }
                None
            }
        }
    }

    /// Adds a connected session. A live session with the same client id is kicked out first.
    pub fn register(&self, id: Id, keep_alive: u16, activity: Arc<Activity>) -> Registration {
        let sid = self.next_sid.fetch_add(1, Ordering::Relaxed);
        let (tx, deliveries) = mpsc::channel(self.cfg.session_queue.max(1));
        let (kick_tx, kicked) = oneshot::channel();
        let entry = Entry {
            sid,
            id: id.clone(),
            subs: Vec::new(),
            tx,
            kick: Some(kick_tx),
            activity,
            idle_threshold: self.cfg.idle_threshold(keep_alive),
        };

        let mut state = self.state.lock();
        if let Some(mut prev) = state.sessions.insert(id.client_id.clone(), entry) {
            log::info!("{} takes over the session of {}", id, prev.id);
            prev.kick(KickedBy::Takeover);
        } else {
            self.stats.clients.inc();
        }
        Registration { sid, deliveries, kicked }
    }

    /// Removes the session, unless the client id already belongs to a newer session.
    pub fn deregister(&self, client_id: &str, sid: SessionId) -> bool {
        let mut state = self.state.lock();
        match state.sessions.get(client_id) {
            Some(e) if e.sid == sid => {
                state.sessions.remove(client_id);
                self.stats.clients.dec();
                true
            }
            _ => false,
        }
    }

    /// Adds or replaces one subscription of the session and returns the retained messages
    /// it covers.
    ///
    /// `None` when the session is gone or already holds the maximum number of filters.
    pub fn subscribe(&self, client_id: &str, sid: SessionId, filter: TopicFilter, qos: QoS) -> Option<Vec<Message>> {
        let mut state = self.state.lock();
        let State { sessions, retained } = &mut *state;
        let entry = sessions.get_mut(client_id).filter(|e| e.sid == sid)?;
        if let Some(sub) = entry.subs.iter_mut().find(|(f, _)| *f == filter) {
            sub.1 = qos;
        } else if entry.subs.len() >= self.cfg.max_subscriptions {
            log::debug!("{} subscription limit {} reached, {} refused", entry.id, self.cfg.max_subscriptions, filter);
            return None;
        } else {
            entry.subs.push((filter.clone(), qos));
        }
        Some(retained.matches(&filter))
    }

    /// Stores the retained copy when asked to, then queues the message for every session
    /// with a matching filter. Returns the number of sessions it was queued for.
    ///
    /// A session gets at most one copy, at the QoS of the first of its filters that
    /// matches, capped by the QoS of the message. A message whose PUBLISH frame would exceed
    /// the packet size cap is neither retained nor queued.
    pub fn publish(&self, msg: Message, excluding: Option<SessionId>) -> usize {
        if !self.fits(&msg) {
            if let Some(n) = self.oversize.record() {
                log::warn!(
                    "{} with {} payload bytes is over the {} byte packet size, dropped, {} dropped so far",
                    msg.topic,
                    msg.payload.len(),
                    self.max_packet_size,
                    n
                );
            }
            return 0;
        }

        let mut state = self.state.lock();
        if msg.retain {
            if state.retained.set(msg.clone()) == RetainOutcome::Full {
                if let Some(n) = self.retained_full.record() {
                    log::warn!("retained store full, dropped retained {}, {} dropped so far", msg.topic, n);
                }
            }
        }

        let live = Message { retain: false, ..msg };
        let mut delivered = 0;
        for entry in state.sessions.values() {
            if Some(entry.sid) == excluding {
                continue;
            }
            let Some((_, granted)) = entry.subs.iter().find(|(f, _)| topic::matches(f, &live.topic)) else {
                continue;
            };
            let delivery = Delivery { msg: live.clone(), qos: live.qos.less_value(*granted) };
            match entry.tx.try_send(delivery) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    if let Some(n) = self.queue_full.record() {
                        log::warn!("{} outbound queue full, dropped {}, {} dropped so far", entry.id, live.topic, n);
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    log::debug!("{} is closing, skipped {}", entry.id, live.topic);
                }
            }
        }
        self.stats.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Broker publish API for host components, QoS 0 and never retained.
    #[inline]
    pub fn publish_message(&self, topic: TopicName, payload: Bytes) -> usize {
        self.publish(Message::new(topic, payload, QoS::AtMostOnce, false), None)
    }

    /// Whether the PUBLISH frame for `msg` fits under the packet size cap. Checked at the
    /// QoS of the message, which no subscriber copy exceeds.
    #[inline]
    fn fits(&self, msg: &Message) -> bool {
        if self.max_packet_size == 0 {
            return true;
        }
        let frame = msg.to_publish(msg.qos, msg.retain, std::num::NonZeroU16::MIN);
        Packet::Publish(frame).frame_size() <= self.max_packet_size as usize
    }

    /// Kicks every session idle for longer than its keepalive threshold.
    pub fn sweep_idle(&self) -> usize {
        let mut state = self.state.lock();
        let mut kicked = 0;
        for entry in state.sessions.values_mut() {
            let idle = entry.activity.idle();
            if idle > entry.idle_threshold && entry.kick(KickedBy::Supervisor) {
                log::info!("{} idle for {:?}, over {:?}, closing", entry.id, idle, entry.idle_threshold);
                kicked += 1;
            }
        }
        kicked
    }

    #[inline]
    pub fn received(&self) {
        self.stats.publishes_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn client_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    #[inline]
    pub fn retained(&self, topic: &str) -> Option<Message> {
        self.state.lock().retained.get(topic).cloned()
    }

    pub fn stats(&self) -> StatsSnapshot {
        let (clients, retained) = {
            let state = self.state.lock();
            (state.sessions.len(), state.retained.len())
        };
        StatsSnapshot {
            timestamp: timestamp_millis(),
            started_at: format_timestamp_millis(self.started),
            uptime: self.boot.elapsed(),
            clients,
            clients_max: self.stats.clients.max(),
            connections_accepted: self.stats.connections_accepted.load(Ordering::Relaxed),
            connections_refused: self.stats.connections_refused.load(Ordering::Relaxed),
            publishes_received: self.stats.publishes_received.load(Ordering::Relaxed),
            deliveries: self.stats.deliveries.load(Ordering::Relaxed),
            deliveries_dropped: self.queue_full.total(),
            retained,
            retained_dropped: self.retained_full.total(),
            oversize_dropped: self.oversize.total(),
            events_dropped: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Router {
        Router::new(
            conf::Broker { max_sessions: 2, max_subscriptions: 2, session_queue: 2, ..Default::default() },
            64,
        )
    }

    fn id(client_id: &str) -> Id {
        Id::new(client_id.into(), None)
    }

    fn msg(topic: &str, payload: &'static str, qos: QoS, retain: bool) -> Message {
        Message::new(topic.into(), Bytes::from_static(payload.as_bytes()), qos, retain)
    }

    #[test]
    fn slots_are_bounded() {
        let r = router();
        let a = r.try_acquire_slot();
        let b = r.try_acquire_slot();
        assert!(a.is_some() && b.is_some());
        assert!(r.try_acquire_slot().is_none());
        drop(a);
        assert!(r.try_acquire_slot().is_some());
        assert_eq!(r.stats().connections_refused, 1);
    }

    #[tokio::test]
    async fn takeover_kicks_previous_session() {
        let r = router();
        let mut first = r.register(id("puppet"), 30, Arc::default());
        let second = r.register(id("puppet"), 30, Arc::default());
        assert_eq!((&mut first.kicked).await, Ok(KickedBy::Takeover));
        assert_eq!(r.client_count(), 1);

        // the old session cleaning up must not remove the new one
        assert!(!r.deregister("puppet", first.sid));
        assert_eq!(r.client_count(), 1);
        assert!(r.deregister("puppet", second.sid));
        assert_eq!(r.client_count(), 0);
    }

    #[tokio::test]
    async fn fan_out_once_per_session_with_capped_qos() {
        let r = router();
        let mut a = r.register(id("a"), 0, Arc::default());
        let mut b = r.register(id("b"), 0, Arc::default());
        assert!(r.subscribe("a", a.sid, "web/#".into(), QoS::AtMostOnce).is_some());
        assert!(r.subscribe("a", a.sid, "web/cmd".into(), QoS::AtLeastOnce).is_some());
        assert!(r.subscribe("b", b.sid, "web/+".into(), QoS::AtLeastOnce).is_some());

        assert_eq!(r.publish(msg("web/cmd", "hello", QoS::AtLeastOnce, false), None), 2);
        let d = a.deliveries.try_recv().unwrap();
        assert_eq!(d.qos, QoS::AtMostOnce);
        assert!(a.deliveries.try_recv().is_err());
        let d = b.deliveries.try_recv().unwrap();
        assert_eq!(d.qos, QoS::AtLeastOnce);
        assert_eq!(d.msg.payload, Bytes::from_static(b"hello"));

        assert_eq!(r.publish(msg("web/cmd", "x", QoS::AtMostOnce, false), Some(b.sid)), 1);
        assert!(b.deliveries.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscription_limit_and_replace() {
        let r = router();
        let a = r.register(id("a"), 0, Arc::default());
        assert!(r.subscribe("a", a.sid, "x/1".into(), QoS::AtMostOnce).is_some());
        assert!(r.subscribe("a", a.sid, "x/2".into(), QoS::AtMostOnce).is_some());
        assert!(r.subscribe("a", a.sid, "x/3".into(), QoS::AtMostOnce).is_none());
        assert!(r.subscribe("a", a.sid, "x/1".into(), QoS::AtLeastOnce).is_some());
        assert!(r.subscribe("a", a.sid + 100, "x/4".into(), QoS::AtMostOnce).is_none());
    }

    #[tokio::test]
    async fn retained_is_stored_and_returned_on_subscribe() {
        let r = router();
        r.publish(msg("sys/health", "ok", QoS::AtMostOnce, true), None);
        let a = r.register(id("a"), 0, Arc::default());
        let retained = r.subscribe("a", a.sid, "sys/#".into(), QoS::AtLeastOnce).unwrap();
        assert_eq!(retained.len(), 1);
        assert_eq!(retained[0].payload, Bytes::from_static(b"ok"));

        r.publish(msg("sys/health", "", QoS::AtMostOnce, true), None);
        assert_eq!(r.retained("sys/health").map(|m| m.payload), Some(Bytes::new()));
        let retained = r.subscribe("a", a.sid, "sys/health".into(), QoS::AtMostOnce).unwrap();
        assert_eq!(retained.len(), 1);
        assert!(retained[0].payload.is_empty());
    }

    #[tokio::test]
    async fn oversize_message_is_refused_before_fan_out() {
        let r = router();
        let mut a = r.register(id("a"), 0, Arc::default());
        r.subscribe("a", a.sid, "sys/#".into(), QoS::AtLeastOnce);

        // 1 header byte, 1 length byte, 2 + 5 topic bytes, 2 packet id bytes
        let fits = Bytes::from(vec![b'x'; 64 - 11]);
        let over = Bytes::from(vec![b'x'; 64 - 10]);
        assert_eq!(r.publish(Message::new("sys/a".into(), fits, QoS::AtLeastOnce, false), None), 1);
        assert_eq!(r.publish(Message::new("sys/a".into(), over.clone(), QoS::AtLeastOnce, true), None), 0);
        assert!(r.retained("sys/a").is_none());
        // the same payload fits once the packet id is gone
        assert_eq!(r.publish_message("sys/a".into(), over), 1);
        assert_eq!(r.publish_message("sys/a".into(), Bytes::from(vec![b'x'; 2000])), 0);

        assert_eq!(a.deliveries.try_recv().map(|d| d.qos), Ok(QoS::AtLeastOnce));
        assert_eq!(a.deliveries.try_recv().map(|d| d.qos), Ok(QoS::AtMostOnce));
        assert!(a.deliveries.try_recv().is_err());
        assert_eq!(r.stats().oversize_dropped, 2);
        assert_eq!(r.client_count(), 1);
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let r = router();
        let mut a = r.register(id("a"), 0, Arc::default());
        r.subscribe("a", a.sid, "t".into(), QoS::AtMostOnce);
        for _ in 0..5 {
            r.publish(msg("t", "x", QoS::AtMostOnce, false), None);
        }
        assert_eq!(r.stats().deliveries, 2);
        assert_eq!(r.stats().deliveries_dropped, 3);
        assert!(a.deliveries.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_kicks_idle_sessions_once() {
        let r = router();
        let active = Arc::new(Activity::new());
        let mut quiet = r.register(id("quiet"), 10, Arc::default());
        let mut busy = r.register(id("busy"), 10, active.clone());

        tokio::time::advance(Duration::from_secs(14)).await;
        active.touch();
        assert_eq!(r.sweep_idle(), 0);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(r.sweep_idle(), 1);
        assert_eq!((&mut quiet.kicked).await, Ok(KickedBy::Supervisor));
        assert_eq!(r.sweep_idle(), 0);
        assert!(busy.kicked.try_recv().is_err());
    }
}
