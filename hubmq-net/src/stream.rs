use std::net::SocketAddr;
use std::num::NonZeroU16;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use hubmq_codec::error::SendPacketError;
use hubmq_codec::v3::{Codec, Connect, ConnectAck, ConnectAckReason, Packet, Publish, SubscribeReturnCode};

use crate::error::MqttError;
use crate::{Builder, Error, Result};

/// A framed MQTT 3.1.1 connection.
pub struct MqttStream<Io> {
    pub io: Framed<Io, Codec>,
    pub remote_addr: SocketAddr,
    pub cfg: Arc<Builder>,
}

impl<Io> MqttStream<Io>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: Io, remote_addr: SocketAddr, cfg: Arc<Builder>) -> Self {
        let codec = Codec::new(cfg.max_packet_size);
        MqttStream { io: Framed::new(io, codec), remote_addr, cfg }
    }

    #[inline]
    pub async fn send_publish(&mut self, publish: Publish) -> Result<()> {
        self.send(Packet::Publish(publish)).await
    }

    #[inline]
    pub async fn send_publish_ack(&mut self, packet_id: NonZeroU16) -> Result<()> {
        self.send(Packet::PublishAck { packet_id }).await
    }

    #[inline]
    pub async fn send_subscribe_ack(
        &mut self,
        packet_id: NonZeroU16,
        status: Vec<SubscribeReturnCode>,
    ) -> Result<()> {
        self.send(Packet::SubscribeAck { packet_id, status }).await
    }

    /// `session_present` is always 0, sessions never resume.
    #[inline]
    pub async fn send_connect_ack(&mut self, return_code: ConnectAckReason) -> Result<()> {
        self.send(Packet::ConnectAck(ConnectAck { session_present: false, return_code })).await
    }

    #[inline]
    pub async fn send_ping_response(&mut self) -> Result<()> {
        self.send(Packet::PingResponse).await
    }

    #[inline]
    pub async fn send(&mut self, packet: Packet) -> Result<()> {
        send(&mut self.io, packet, self.cfg.send_timeout).await
    }

    #[inline]
    pub async fn flush(&mut self) -> Result<()> {
        flush(&mut self.io, self.cfg.send_timeout).await
    }

    #[inline]
    pub async fn close(&mut self) -> Result<()> {
        close(&mut self.io, self.cfg.send_timeout).await
    }

    /// Waits up to `tm` for the next packet. `Ok(None)` means the peer closed the connection.
    #[inline]
    pub async fn recv(&mut self, tm: Duration) -> Result<Option<Packet>> {
        match tokio::time::timeout(tm, self.next()).await {
            Ok(Some(Ok(msg))) => Ok(Some(msg)),
            Ok(Some(Err(e))) => Err(e),
            Ok(None) => Ok(None),
            Err(_) => Err(MqttError::ReadTimeout.into()),
        }
    }

    /// Reads the first packet, which must be a CONNECT. `Ok(None)` means the peer closed first.
    #[inline]
    pub async fn recv_connect(&mut self, tm: Duration) -> Result<Option<Box<Connect>>> {
        match self.recv(tm).await? {
            Some(Packet::Connect(connect)) => Ok(Some(connect)),
            Some(_) => Err(MqttError::InvalidProtocol.into()),
            None => Ok(None),
        }
    }
}

impl<Io> futures::Stream for MqttStream<Io>
where
    Io: AsyncRead + Unpin,
{
    type Item = Result<Packet>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let next = Pin::new(&mut self.io).poll_next(cx);
        Poll::Ready(match futures::ready!(next) {
            Some(Ok(packet)) => Some(Ok(packet)),
            Some(Err(e)) => Some(Err(Error::from(MqttError::Decode(e)))),
            None => None,
        })
    }
}

#[inline]
async fn send<Io>(io: &mut Framed<Io, Codec>, packet: Packet, send_timeout: Duration) -> Result<()>
where
    Io: AsyncWrite + Unpin,
{
    if send_timeout.is_zero() {
        io.send(packet).await.map_err(|e| MqttError::SendPacket(SendPacketError::Encode(e)))?;
        Ok(())
    } else {
        match tokio::time::timeout(send_timeout, io.send(packet)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(MqttError::SendPacket(SendPacketError::Encode(e))),
            Err(_) => Err(MqttError::WriteTimeout),
        }?;
        Ok(())
    }
}

#[inline]
async fn flush<Io>(io: &mut Framed<Io, Codec>, send_timeout: Duration) -> Result<()>
where
    Io: AsyncWrite + Unpin,
{
    if send_timeout.is_zero() {
        SinkExt::<Packet>::flush(io).await.map_err(MqttError::Encode)?;
        Ok(())
    } else {
        match tokio::time::timeout(send_timeout, SinkExt::<Packet>::flush(io)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(MqttError::SendPacket(SendPacketError::Encode(e))),
            Err(_) => Err(MqttError::FlushTimeout),
        }?;
        Ok(())
    }
}

#[inline]
async fn close<Io>(io: &mut Framed<Io, Codec>, send_timeout: Duration) -> Result<()>
where
    Io: AsyncWrite + Unpin,
{
    if send_timeout.is_zero() {
        SinkExt::<Packet>::close(io).await.map_err(MqttError::Encode)?;
        Ok(())
    } else {
        match tokio::time::timeout(send_timeout, SinkExt::<Packet>::close(io)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(MqttError::Encode(e)),
            Err(_) => Err(MqttError::CloseTimeout),
        }?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use hubmq_codec::error::DecodeError;

    fn pair(max_packet_size: u32) -> (MqttStream<tokio::io::DuplexStream>, tokio::io::DuplexStream) {
        let (server, client) = tokio::io::duplex(4096);
        let cfg = Arc::new(Builder::new().max_packet_size(max_packet_size));
        (MqttStream::new(server, ([127, 0, 0, 1], 50000).into(), cfg), client)
    }

    #[tokio::test]
    async fn connack_bytes_on_the_wire() {
        let (mut stream, mut client) = pair(1024);
        stream.send_connect_ack(ConnectAckReason::PROTOCOL_ERROR).await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"\x20\x02\x00\x02");
    }

    #[tokio::test]
    async fn oversize_publish_writes_nothing() {
        let (mut stream, mut client) = pair(16);
        let big = Publish::at_most_once("t", bytes::Bytes::from(vec![b'x'; 32]));
        let e = stream.send_publish(big).await.unwrap_err();
        assert!(MqttError::is_oversize_error(&e));

        stream.send_ping_response().await.unwrap();
        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"\xd0\x00");
    }

    #[tokio::test]
    async fn recv_connect_rejects_other_packets() {
        let (mut stream, mut client) = pair(1024);
        client.write_all(b"\xc0\x00").await.unwrap();
        let e = stream.recv_connect(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(e.downcast_ref::<MqttError>(), Some(MqttError::InvalidProtocol)));
    }

    #[tokio::test]
    async fn oversize_frame_is_a_framing_error() {
        let (mut stream, mut client) = pair(16);
        let mut frame = BytesMut::from(&b"\x30\x20\x00\x01a"[..]);
        frame.extend_from_slice(&[b'x'; 29]);
        client.write_all(&frame).await.unwrap();
        let e = stream.recv(Duration::from_secs(1)).await.unwrap_err();
        assert!(MqttError::is_framing_error(&e));
        assert!(matches!(
            e.downcast_ref::<MqttError>(),
            Some(MqttError::Decode(DecodeError::MaxSizeExceeded))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn recv_times_out() {
        let (mut stream, _client) = pair(1024);
        let e = stream.recv(Duration::from_secs(5)).await.unwrap_err();
        assert!(MqttError::is_read_timeout(&e));
    }

    #[tokio::test]
    async fn recv_connect_sees_early_close() {
        let (mut stream, client) = pair(1024);
        drop(client);
        assert!(stream.recv_connect(Duration::from_secs(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn peer_close_ends_the_stream() {
        let (mut stream, client) = pair(1024);
        drop(client);
        assert_eq!(stream.recv(Duration::from_secs(1)).await.unwrap(), None);
    }
}
