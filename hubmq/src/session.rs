//! One client connection from CONNECT to cleanup
//!
//! `AwaitingConnect` reads exactly one frame. A framing error, a timeout or an early close
//! ends the connection silently, anything else that is not a valid CONNECT gets CONNACK(2).
//! `Connected` multiplexes three sources: a kick from the router, the outbound delivery
//! queue and the socket, read with a bounded timeout so the session can check its own
//! idleness. Every way out of `Connected` ends in [`Session::cleanup`], which runs once.

use std::num::NonZeroU16;
use std::sync::Arc;
use std::time::Duration;

use bytestring::ByteString;
use nonzero_ext::nonzero;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::OwnedSemaphorePermit;
use uuid::Uuid;

use crate::codec::error::DecodeError;
use crate::codec::v3::{Connect, ConnectAckReason, Packet, Publish, SubscribeReturnCode};
use crate::codec::QoS;
use crate::context::ServerContext;
use crate::net::{MqttError, MqttStream};
use crate::router::Registration;
use crate::topic;
use crate::types::{Activity, Delivery, Id, KickedBy, Message, Reason, SessionId, TopicFilter};
use crate::Result;

pub(crate) async fn process<Io>(scx: ServerContext, mut sink: MqttStream<Io>, permit: OwnedSemaphorePermit) -> Result<()>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    let connect = match handshake(&mut sink).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            let _ = sink.close().await;
            return Ok(());
        }
        Err(e) => {
            if refusable(&e) {
                log::warn!("{} Connection Refused, handshake error, reason: {}", sink.remote_addr, e);
                let _ = sink.send_connect_ack(ConnectAckReason::PROTOCOL_ERROR).await;
            } else {
                log::info!("{} closed during handshake, reason: {}", sink.remote_addr, e);
            }
            let _ = sink.close().await;
            return Err(e);
        }
    };

    let (session, reg) = Session::connect(scx, &sink, *connect);
    sink.send_connect_ack(ConnectAckReason::ConnectionAccepted).await.inspect_err(|_| {
        session.scx.router.deregister(&session.id.client_id, session.sid);
    })?;
    log::info!("{} connected, keepalive {}s", session.id, session.keep_alive);
    session.run(sink, reg).await;
    drop(permit);
    Ok(())
}

/// Reads the first frame. An empty client id with clean session set gets a generated one.
async fn handshake<Io>(sink: &mut MqttStream<Io>) -> Result<Option<Box<Connect>>>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    let Some(mut c) = sink.recv_connect(sink.cfg.handshake_timeout).await? else {
        return Ok(None);
    };
    if c.client_id.is_empty() {
        if !c.clean_session {
            return Err(MqttError::Decode(DecodeError::InvalidClientId).into());
        }
        c.client_id = ByteString::from(Uuid::new_v4().as_simple().to_string());
    }
    log::debug!(
        "{} CONNECT {}, clean_session: {}, username: {}, password: {}",
        sink.remote_addr,
        c.client_id,
        c.clean_session,
        if c.username.is_some() { "present" } else { "absent" },
        if c.password.is_some() { "present" } else { "absent" },
    );
    Ok(Some(c))
}

/// Body errors and a non-CONNECT first packet still get an answer, framing errors do not.
fn refusable(e: &anyhow::Error) -> bool {
    match e.downcast_ref::<MqttError>() {
        Some(MqttError::InvalidProtocol) => true,
        Some(MqttError::Decode(d)) => !d.is_framing(),
        _ => false,
    }
}

pub struct Session {
    scx: ServerContext,
    id: Id,
    sid: SessionId,
    keep_alive: u16,
    idle_threshold: Duration,
    will: Option<Message>,
    activity: Arc<Activity>,
    packet_id: NonZeroU16,
}

impl Session {
    fn connect<Io>(scx: ServerContext, sink: &MqttStream<Io>, c: Connect) -> (Session, Registration) {
        let id = Id::new(c.client_id, Some(sink.remote_addr));
        let will = c.last_will.map(|w| {
            Message::new(w.topic, w.message, w.qos.less_value(QoS::AtLeastOnce), w.retain)
        });
        let activity = Arc::new(Activity::new());
        let reg = scx.router.register(id.clone(), c.keep_alive, activity.clone());
        let session = Session {
            idle_threshold: scx.settings.broker.idle_threshold(c.keep_alive),
            scx,
            id,
            sid: reg.sid,
            keep_alive: c.keep_alive,
            will,
            activity,
            packet_id: nonzero!(1u16),
        };
        (session, reg)
    }

    async fn run<Io>(mut self, mut sink: MqttStream<Io>, mut reg: Registration)
    where
        Io: AsyncRead + AsyncWrite + Unpin,
    {
        let reason = match self.run_loop(&mut sink, &mut reg).await {
            Ok(()) => Reason::RemoteClose,
            Err(reason) => reason,
        };
        self.cleanup(&mut sink, reason).await;
    }

    async fn run_loop<Io>(&mut self, sink: &mut MqttStream<Io>, reg: &mut Registration) -> std::result::Result<(), Reason>
    where
        Io: AsyncRead + AsyncWrite + Unpin,
    {
        let recv_timeout = sink.cfg.recv_timeout;
        let mut kick_open = true;
        loop {
            tokio::select! {
                biased;

                by = &mut reg.kicked, if kick_open => match by {
                    Ok(by) => return Err(Reason::Kicked(by)),
                    Err(_) => kick_open = false,
                },

                delivery = reg.deliveries.recv() => match delivery {
                    Some(d) => self.deliver(sink, d).await?,
                    None => return Err(Reason::Kicked(KickedBy::Takeover)),
                },

                pkt = sink.recv(recv_timeout) => match pkt {
                    Ok(Some(pkt)) => {
                        self.activity.touch();
                        self.process_packet(sink, pkt).await?;
                    }
                    Ok(None) => return Ok(()),
                    Err(e) if MqttError::is_read_timeout(&e) => {
                        let idle = self.activity.idle();
                        if idle > self.idle_threshold {
                            log::debug!("{} idle for {:?}, threshold {:?}", self.id, idle, self.idle_threshold);
                            return Err(Reason::KeepaliveTimeout);
                        }
                    }
                    Err(e) if matches!(e.downcast_ref::<MqttError>(), Some(MqttError::Decode(d)) if !matches!(d, DecodeError::Io(_))) => {
                        return Err(Reason::ProtocolError(ByteString::from(e.to_string())));
                    }
                    Err(e) => return Err(e.into()),
                },
            }
        }
    }

    async fn process_packet<Io>(&mut self, sink: &mut MqttStream<Io>, pkt: Packet) -> std::result::Result<(), Reason>
    where
        Io: AsyncRead + AsyncWrite + Unpin,
    {
        match pkt {
            Packet::Publish(publish) => self.process_publish(sink, publish).await,
            Packet::Subscribe { packet_id, topic_filters } => {
                self.process_subscribe(sink, packet_id, topic_filters).await
            }
            Packet::PingRequest => Ok(sink.send_ping_response().await?),
            Packet::PublishAck { packet_id } => {
                log::debug!("{} PUBACK {}", self.id, packet_id);
                Ok(())
            }
            Packet::Disconnect => Err(Reason::Disconnect),
            other => Err(Reason::ProtocolError(ByteString::from(format!("unexpected {}", other.name())))),
        }
    }

    async fn process_publish<Io>(&mut self, sink: &mut MqttStream<Io>, publish: Publish) -> std::result::Result<(), Reason>
    where
        Io: AsyncRead + AsyncWrite + Unpin,
    {
        log::debug!("{} publish: {:?}", self.id, publish);
        if publish.qos == QoS::ExactlyOnce {
            return Err(Reason::ProtocolError(ByteString::from_static("QoS 2 is not supported")));
        }
        self.scx.router.received();
        if !self.scx.acl.can_publish(&self.id.client_id, &publish.topic) {
            log::debug!("{} publish to {} denied, dropped", self.id, publish.topic);
            return Ok(());
        }

        self.scx.bridge.inject_message(&publish.topic, &publish.payload).await;
        let n = self.scx.router.publish(Message::from(&publish), None);
        log::debug!("{} {} delivered to {} sessions", self.id, publish.topic, n);

        if let Some(packet_id) = publish.packet_id {
            sink.send_publish_ack(packet_id).await?;
        }
        Ok(())
    }

    async fn process_subscribe<Io>(
        &mut self,
        sink: &mut MqttStream<Io>,
        packet_id: NonZeroU16,
        topic_filters: Vec<(TopicFilter, QoS)>,
    ) -> std::result::Result<(), Reason>
    where
        Io: AsyncRead + AsyncWrite + Unpin,
    {
        let mut status = Vec::with_capacity(topic_filters.len());
        let mut retained = Vec::new();
        for (filter, requested) in topic_filters {
            if !topic::is_valid_filter(&filter) {
                log::debug!("{} invalid filter {}", self.id, filter);
                status.push(SubscribeReturnCode::Failure);
                continue;
            }
            if !self.scx.acl.can_subscribe(&self.id.client_id, &filter) {
                log::info!("{} subscribe to {} denied", self.id, filter);
                status.push(SubscribeReturnCode::Failure);
                continue;
            }
            let granted = requested.less_value(QoS::AtLeastOnce);
            match self.scx.router.subscribe(&self.id.client_id, self.sid, filter.clone(), granted) {
                Some(msgs) => {
                    log::debug!("{} subscribed {} at {:?}, {} retained", self.id, filter, granted, msgs.len());
                    status.push(SubscribeReturnCode::Success(granted));
                    retained.extend(msgs.into_iter().map(|m| (m, granted)));
                }
                None => status.push(SubscribeReturnCode::Failure),
            }
        }
        sink.send_subscribe_ack(packet_id, status).await?;

        // SUBACK goes first, the retained copies follow it
        for (msg, granted) in retained {
            let qos = msg.qos.less_value(granted);
            let pid = self.next_packet_id();
            sink.send_publish(msg.to_publish(qos, true, pid)).await?;
        }
        Ok(())
    }

    async fn deliver<Io>(&mut self, sink: &mut MqttStream<Io>, d: Delivery) -> std::result::Result<(), Reason>
    where
        Io: AsyncRead + AsyncWrite + Unpin,
    {
        let pid = self.next_packet_id();
        match sink.send_publish(d.msg.to_publish(d.qos, false, pid)).await {
            Ok(()) => Ok(()),
            Err(e) if MqttError::is_oversize_error(&e) => {
                log::warn!("{} {} is over the packet size, skipped", self.id, d.msg.topic);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    #[inline]
    fn next_packet_id(&mut self) -> NonZeroU16 {
        let pid = self.packet_id;
        self.packet_id = pid.checked_add(1).unwrap_or(nonzero!(1u16));
        pid
    }

    async fn cleanup<Io>(self, sink: &mut MqttStream<Io>, reason: Reason)
    where
        Io: AsyncRead + AsyncWrite + Unpin,
    {
        log::info!("{} disconnected, reason: {}", self.id, reason);
        if let Some(will) = self.will {
            if reason.fires_will() {
                log::debug!("{} publishing will to {}", self.id, will.topic);
                self.scx.router.publish(will, Some(self.sid));
            }
        }
        self.scx.router.deregister(&self.id.client_id, self.sid);
        let _ = sink.close().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::{Bytes, BytesMut};
    use futures::{SinkExt, StreamExt};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio_util::codec::Framed;

    use crate::codec::v3::{Codec, ConnectAck, LastWill};
    use crate::conf::Settings;
    use crate::context::ServerContext;
    use crate::net::{Acceptor, Builder};
    use crate::server;

    use super::*;

    type Client = Framed<DuplexStream, Codec>;

    async fn context() -> ServerContext {
        ServerContext::new(Settings::default()).build().unwrap()
    }

    fn open(scx: &ServerContext) -> DuplexStream {
        open_with(scx, Duration::from_secs(5))
    }

    fn open_with(scx: &ServerContext, recv_timeout: Duration) -> DuplexStream {
        let _ = simple_logger::SimpleLogger::new().with_level(log::LevelFilter::Debug).init();
        let (server, client) = tokio::io::duplex(8192);
        let cfg = Arc::new(Builder::new().recv_timeout(recv_timeout));
        let acceptor = Acceptor::new(server, ([127, 0, 0, 1], 40000).into(), cfg);
        let scx = scx.clone();
        tokio::spawn(async move {
            let _ = server::serve(scx, acceptor).await;
        });
        client
    }

    async fn connect(scx: &ServerContext, c: Connect) -> Client {
        connect_with(scx, c, Duration::from_secs(5)).await
    }

    async fn connect_with(scx: &ServerContext, c: Connect, recv_timeout: Duration) -> Client {
        let mut client = Framed::new(open_with(scx, recv_timeout), Codec::new(1024));
        client.send(Packet::Connect(Box::new(c))).await.unwrap();
        let ack = client.next().await.unwrap().unwrap();
        assert_eq!(
            ack,
            Packet::ConnectAck(ConnectAck { session_present: false, return_code: ConnectAckReason::ConnectionAccepted })
        );
        client
    }

    fn conn(client_id: &str) -> Connect {
        Connect::default().client_id(client_id).keep_alive(30)
    }

    async fn subscribe(client: &mut Client, filters: &[(&str, QoS)]) -> Vec<SubscribeReturnCode> {
        let topic_filters = filters.iter().map(|(f, q)| (ByteString::from(*f), *q)).collect();
        client.send(Packet::Subscribe { packet_id: nonzero!(1u16), topic_filters }).await.unwrap();
        match client.next().await.unwrap().unwrap() {
            Packet::SubscribeAck { packet_id, status } => {
                assert_eq!(packet_id, nonzero!(1u16));
                status
            }
            other => panic!("expected SUBACK, got {:?}", other),
        }
    }

    fn publish(topic: &str, payload: &'static str, qos: QoS, retain: bool) -> Packet {
        Packet::Publish(Publish {
            dup: false,
            retain,
            qos,
            topic: topic.into(),
            packet_id: if qos == QoS::AtMostOnce { None } else { Some(nonzero!(42u16)) },
            payload: Bytes::from_static(payload.as_bytes()),
        })
    }

    async fn next(client: &mut Client) -> Option<Packet> {
        match tokio::time::timeout(Duration::from_millis(300), client.next()).await {
            Ok(Some(Ok(p))) => Some(p),
            _ => None,
        }
    }

    async fn sync(client: &mut Client) {
        client.send(Packet::PingRequest).await.unwrap();
        assert_eq!(next(client).await, Some(Packet::PingResponse));
    }

    #[tokio::test]
    async fn end_to_end_publish_reaches_subscriber() {
        let scx = context().await;
        let mut a = connect(&scx, conn("a")).await;
        assert_eq!(subscribe(&mut a, &[("web/#", QoS::AtMostOnce)]).await, vec![SubscribeReturnCode::Success(QoS::AtMostOnce)]);

        let mut b = connect(&scx, conn("b")).await;
        b.send(publish("web/cmd", "hello", QoS::AtMostOnce, false)).await.unwrap();

        match next(&mut a).await {
            Some(Packet::Publish(p)) => {
                assert_eq!(p.topic, "web/cmd");
                assert_eq!(p.payload, Bytes::from_static(b"hello"));
                assert!(!p.retain);
                assert_eq!(p.qos, QoS::AtMostOnce);
            }
            other => panic!("expected PUBLISH, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn qos1_publish_is_acked_once() {
        let scx = context().await;
        let mut c = connect(&scx, conn("sensor")).await;
        c.send(publish("sensor/t", "21", QoS::AtLeastOnce, false)).await.unwrap();
        assert_eq!(next(&mut c).await, Some(Packet::PublishAck { packet_id: nonzero!(42u16) }));
        assert_eq!(next(&mut c).await, None);
    }

    #[tokio::test]
    async fn denied_publish_is_dropped_silently() {
        let scx = context().await;
        let mut watcher = connect(&scx, conn("watcher")).await;
        subscribe(&mut watcher, &[("#", QoS::AtLeastOnce)]).await;

        let mut relay = connect(&scx, conn("relay")).await;
        relay.send(publish("laser/x", "fire", QoS::AtLeastOnce, false)).await.unwrap();
        sync(&mut relay).await;
        assert_eq!(next(&mut watcher).await, None);

        relay.send(publish("relay/x", "on", QoS::AtLeastOnce, false)).await.unwrap();
        assert_eq!(next(&mut relay).await, Some(Packet::PublishAck { packet_id: nonzero!(42u16) }));
        match next(&mut watcher).await {
            Some(Packet::Publish(p)) => {
                assert_eq!(p.topic, "relay/x");
                assert_eq!(p.qos, QoS::AtLeastOnce);
                assert!(p.packet_id.is_some());
            }
            other => panic!("expected PUBLISH, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn subscribe_denials_and_invalid_filters() {
        let scx = context().await;
        let mut c = connect(&scx, conn("webui")).await;
        let status = subscribe(
            &mut c,
            &[("web/#", QoS::ExactlyOnce), ("relay/#", QoS::AtMostOnce), ("web/a#", QoS::AtMostOnce)],
        )
        .await;
        assert_eq!(
            status,
            vec![SubscribeReturnCode::Success(QoS::AtLeastOnce), SubscribeReturnCode::Failure, SubscribeReturnCode::Failure]
        );
        assert_eq!(status.iter().map(|s| s.code()).collect::<Vec<_>>(), vec![1, 0x80, 0x80]);
        sync(&mut c).await;
    }

    #[tokio::test]
    async fn retained_is_delivered_before_live_traffic() {
        let scx = context().await;
        let mut p = connect(&scx, conn("pub")).await;
        p.send(publish("sys/health", "ok", QoS::AtMostOnce, true)).await.unwrap();
        sync(&mut p).await;

        let mut s = connect(&scx, conn("sub")).await;
        subscribe(&mut s, &[("sys/health", QoS::AtLeastOnce)]).await;
        p.send(publish("sys/health", "live", QoS::AtMostOnce, false)).await.unwrap();

        match next(&mut s).await {
            Some(Packet::Publish(m)) => {
                assert_eq!(m.payload, Bytes::from_static(b"ok"));
                assert!(m.retain);
            }
            other => panic!("expected retained PUBLISH, got {:?}", other),
        }
        match next(&mut s).await {
            Some(Packet::Publish(m)) => {
                assert_eq!(m.payload, Bytes::from_static(b"live"));
                assert!(!m.retain);
            }
            other => panic!("expected live PUBLISH, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn bad_protocol_name_gets_connack_2() {
        let scx = context().await;
        let mut raw = open(&scx);
        raw.write_all(b"\x10\x10\x00\x04MQTX\x04\x02\x00\x3c\x00\x04test").await.unwrap();
        let mut buf = Vec::new();
        raw.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"\x20\x02\x00\x02");
    }

    #[tokio::test]
    async fn non_connect_first_packet_gets_connack_2() {
        let scx = context().await;
        let mut raw = open(&scx);
        raw.write_all(b"\xc0\x00").await.unwrap();
        let mut buf = Vec::new();
        raw.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"\x20\x02\x00\x02");
    }

    #[tokio::test]
    async fn oversize_frame_closes_without_answer() {
        let scx = context().await;
        let mut raw = open(&scx);
        let mut frame = BytesMut::from(&b"\x10\xff\x0f"[..]);
        frame.extend_from_slice(&[0u8; 64]);
        raw.write_all(&frame).await.unwrap();
        let mut buf = Vec::new();
        raw.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn takeover_closes_first_and_fires_its_will() {
        let scx = context().await;
        let mut watcher = connect(&scx, conn("watcher")).await;
        subscribe(&mut watcher, &[("puppet/#", QoS::AtMostOnce)]).await;

        let will = LastWill {
            qos: QoS::AtMostOnce,
            retain: false,
            topic: "puppet/lwt".into(),
            message: Bytes::from_static(b"gone"),
        };
        let mut first = connect(&scx, conn("puppet").last_will(will)).await;
        let _second = connect(&scx, conn("puppet")).await;

        assert!(matches!(first.next().await, None | Some(Err(_))));
        match next(&mut watcher).await {
            Some(Packet::Publish(p)) => {
                assert_eq!(p.topic, "puppet/lwt");
                assert_eq!(p.payload, Bytes::from_static(b"gone"));
            }
            other => panic!("expected will, got {:?}", other),
        }
        assert_eq!(scx.router.client_count(), 2);
    }

    #[tokio::test]
    async fn clean_disconnect_suppresses_will() {
        let scx = context().await;
        let mut watcher = connect(&scx, conn("watcher")).await;
        subscribe(&mut watcher, &[("#", QoS::AtMostOnce)]).await;

        let will = LastWill { qos: QoS::AtMostOnce, retain: false, topic: "lwt".into(), message: Bytes::from_static(b"x") };
        let mut c = connect(&scx, conn("leaver").last_will(will)).await;
        c.send(Packet::Disconnect).await.unwrap();
        assert!(matches!(c.next().await, None | Some(Err(_))));
        assert_eq!(next(&mut watcher).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn supervisor_evicts_idle_session_and_will_is_seen() {
        let scx = context().await;
        let _sweep = crate::keepalive::start(scx.router.clone(), Duration::from_secs(10));

        let mut watcher = connect(&scx, conn("watcher").keep_alive(0)).await;
        subscribe(&mut watcher, &[("puppet/#", QoS::AtMostOnce)]).await;

        let will = LastWill { qos: QoS::AtMostOnce, retain: false, topic: "puppet/lwt".into(), message: Bytes::from_static(b"idle") };
        // a long receive timeout leaves the eviction to the sweep
        let mut idle = connect_with(&scx, conn("puppet").keep_alive(10).last_will(will), Duration::from_secs(600)).await;

        // keep the watcher alive past the puppet's 15s threshold
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(5)).await;
            sync(&mut watcher).await;
        }
        assert!(matches!(idle.next().await, None | Some(Err(_))));
        match watcher.next().await {
            Some(Ok(Packet::Publish(p))) => assert_eq!(p.payload, Bytes::from_static(b"idle")),
            other => panic!("expected will, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn session_closes_itself_when_idle() {
        let scx = context().await;
        let mut c = connect(&scx, conn("quiet").keep_alive(2)).await;
        let started = tokio::time::Instant::now();
        assert!(matches!(c.next().await, None | Some(Err(_))));
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(scx.router.client_count(), 0);
    }

    #[tokio::test]
    async fn empty_client_id_gets_generated_one() {
        let scx = context().await;
        let _c = connect(&scx, Connect { clean_session: true, ..Connect::default() }.keep_alive(30)).await;
        assert_eq!(scx.router.client_count(), 1);
    }

    #[tokio::test]
    async fn qos2_publish_closes_session() {
        let scx = context().await;
        let mut c = connect(&scx, conn("sensor")).await;
        c.send(publish("sensor/t", "x", QoS::ExactlyOnce, false)).await.unwrap();
        assert!(matches!(c.next().await, None | Some(Err(_))));
    }

    #[test]
    fn packet_ids_wrap_past_zero() {
        let mut pid = NonZeroU16::MAX;
        pid = pid.checked_add(1).unwrap_or(nonzero!(1u16));
        assert_eq!(pid.get(), 1);
    }

    #[tokio::test]
    async fn oversize_host_publish_leaves_subscribers_connected() {
        let scx = context().await;
        let mut watcher = connect(&scx, conn("watcher")).await;
        subscribe(&mut watcher, &[("sys/#", QoS::AtMostOnce)]).await;

        let metrics = Bytes::from(vec![b'x'; 2000]);
        assert_eq!(scx.router.publish_message("sys/broker/metrics".into(), metrics), 0);
        sync(&mut watcher).await;
        assert_eq!(scx.router.client_count(), 1);

        assert_eq!(scx.router.publish_message("sys/broker/metrics".into(), Bytes::from_static(b"{}")), 1);
        assert!(matches!(next(&mut watcher).await, Some(Packet::Publish(p)) if p.payload == Bytes::from_static(b"{}")));
    }

    #[tokio::test]
    async fn delivery_over_connection_cap_is_skipped() {
        // the router admits 4K frames, this connection's codec only 1K
        let mut inner: crate::conf::Inner = (*Settings::default()).clone();
        inner.listener.max_packet_size = 4096usize.into();
        let scx = ServerContext::new(Settings::from_inner(inner)).build().unwrap();
        let mut watcher = connect(&scx, conn("watcher")).await;
        subscribe(&mut watcher, &[("sys/#", QoS::AtMostOnce)]).await;

        assert_eq!(scx.router.publish_message("sys/big".into(), Bytes::from(vec![b'x'; 2000])), 1);
        assert_eq!(scx.router.publish_message("sys/small".into(), Bytes::from_static(b"ok")), 1);
        assert!(matches!(next(&mut watcher).await, Some(Packet::Publish(p)) if p.topic == "sys/small"));
        sync(&mut watcher).await;
        assert_eq!(scx.router.client_count(), 1);
    }
}
