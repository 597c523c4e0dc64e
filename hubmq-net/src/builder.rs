use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use hubmq_codec::types::DEFAULT_MAX_PACKET_SIZE;
use socket2::{Domain, SockAddr, Socket, Type};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

use crate::stream::MqttStream;
use crate::{Error, Result};

#[derive(Clone, Debug)]
pub struct Builder {
    /// The name of the listener, used in log lines.
    pub name: String,
    ///The local address the server listens on.
    pub laddr: SocketAddr,
    ///The maximum length of the pending connection queue.
    pub backlog: i32,
    ///Sets the value of the TCP_NODELAY option on accepted sockets.
    pub nodelay: bool,
    ///Whether to enable the SO_REUSEADDR option.
    pub reuseaddr: Option<bool>,
    ///Whether to enable the SO_REUSEPORT option.
    pub reuseport: Option<bool>,
    ///Cap on a whole frame, header included. 0 means unlimited, default: 1K
    pub max_packet_size: u32,
    ///How long a new connection may take to deliver its CONNECT.
    pub handshake_timeout: Duration,
    ///Bounded receive used by connected sessions between keepalive checks.
    pub recv_timeout: Duration,
    ///Send timeout. 0 waits forever.
    pub send_timeout: Duration,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            name: Default::default(),
            laddr: SocketAddr::from(SocketAddrV4::new(Ipv4Addr::new(0, 0, 0, 0), 1883)),
            backlog: 16,
            nodelay: false,
            reuseaddr: Some(true),
            reuseport: None,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            handshake_timeout: Duration::from_secs(5),
            recv_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(5),
        }
    }

    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    pub fn laddr(mut self, laddr: SocketAddr) -> Self {
        self.laddr = laddr;
        self
    }

    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn reuseaddr(mut self, reuseaddr: Option<bool>) -> Self {
        self.reuseaddr = reuseaddr;
        self
    }

    pub fn reuseport(mut self, reuseport: Option<bool>) -> Self {
        self.reuseport = reuseport;
        self
    }

    pub fn max_packet_size(mut self, max_packet_size: u32) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    pub fn handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    pub fn recv_timeout(mut self, recv_timeout: Duration) -> Self {
        self.recv_timeout = recv_timeout;
        self
    }

    pub fn send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    /// Binds the listening socket. Must be called inside a tokio runtime.
    pub fn bind(self) -> Result<Listener> {
        let builder = match self.laddr {
            SocketAddr::V4(_) => Socket::new(Domain::IPV4, Type::STREAM, None)?,
            SocketAddr::V6(_) => Socket::new(Domain::IPV6, Type::STREAM, None)?,
        };

        builder.set_linger(Some(Duration::from_secs(10)))?;
        builder.set_nonblocking(true)?;

        if let Some(reuseaddr) = self.reuseaddr {
            builder.set_reuse_address(reuseaddr)?;
        }

        #[cfg(not(windows))]
        if let Some(reuseport) = self.reuseport {
            builder.set_reuse_port(reuseport)?;
        }

        builder.bind(&SockAddr::from(self.laddr))?;
        builder.listen(self.backlog)?;
        let tcp_listener = TcpListener::from_std(std::net::TcpListener::from(builder))?;
        log::info!("MQTT Broker Listening on {} {}", self.name, tcp_listener.local_addr()?);
        Ok(Listener { cfg: Arc::new(self), tcp_listener })
    }
}

pub struct Listener {
    pub cfg: Arc<Builder>,
    tcp_listener: TcpListener,
}

impl Listener {
    #[inline]
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.tcp_listener.local_addr()?)
    }

    pub async fn accept(&self) -> Result<Acceptor<TcpStream>> {
        let (socket, remote_addr) = self.tcp_listener.accept().await?;
        if let Err(e) = socket.set_nodelay(self.cfg.nodelay) {
            return Err(Error::from(e));
        }
        Ok(Acceptor { socket, remote_addr, cfg: self.cfg.clone() })
    }
}

/// An accepted connection that has not read anything yet.
pub struct Acceptor<S> {
    pub(crate) socket: S,
    pub remote_addr: SocketAddr,
    pub cfg: Arc<Builder>,
}

impl<S> Acceptor<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    #[inline]
    pub fn new(socket: S, remote_addr: SocketAddr, cfg: Arc<Builder>) -> Self {
        Acceptor { socket, remote_addr, cfg }
    }

    /// Frames the connection with the MQTT codec.
    #[inline]
    pub fn mqtt(self) -> MqttStream<S> {
        MqttStream::new(self.socket, self.remote_addr, self.cfg)
    }

    /// Drops the connection without a byte written.
    #[inline]
    pub fn refuse(self) {
        drop(self.socket)
    }
}
