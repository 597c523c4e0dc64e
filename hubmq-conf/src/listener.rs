use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use serde::Deserialize;

use hubmq_utils::{deserialize_addr, deserialize_duration, Bytesize};

/// The single TCP listener of the broker.
#[derive(Debug, Clone, Deserialize)]
pub struct Listener {
    #[serde(default = "Listener::name_default")]
    pub name: String,
    #[serde(default = "Listener::addr_default", deserialize_with = "deserialize_addr")]
    pub addr: SocketAddr,
    #[serde(default = "Listener::backlog_default")]
    pub backlog: i32,
    #[serde(default)]
    pub nodelay: bool,
    #[serde(default = "Listener::reuseaddr_default")]
    pub reuseaddr: bool,
    #[serde(default = "Listener::max_packet_size_default")]
    pub max_packet_size: Bytesize,
    #[serde(default = "Listener::timeout_default", deserialize_with = "deserialize_duration")]
    pub handshake_timeout: Duration,
    #[serde(default = "Listener::timeout_default", deserialize_with = "deserialize_duration")]
    pub recv_timeout: Duration,
    #[serde(default = "Listener::timeout_default", deserialize_with = "deserialize_duration")]
    pub send_timeout: Duration,
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            name: Self::name_default(),
            addr: Self::addr_default(),
            backlog: Self::backlog_default(),
            nodelay: false,
            reuseaddr: Self::reuseaddr_default(),
            max_packet_size: Self::max_packet_size_default(),
            handshake_timeout: Self::timeout_default(),
            recv_timeout: Self::timeout_default(),
            send_timeout: Self::timeout_default(),
        }
    }
}

impl Listener {
    fn name_default() -> String {
        "external".into()
    }
    fn addr_default() -> SocketAddr {
        SocketAddr::from(SocketAddrV4::new(Ipv4Addr::new(0, 0, 0, 0), 1883))
    }
    fn backlog_default() -> i32 {
        16
    }
    fn reuseaddr_default() -> bool {
        true
    }
    fn max_packet_size_default() -> Bytesize {
        Bytesize::from("1K")
    }
    fn timeout_default() -> Duration {
        Duration::from_secs(5)
    }

    #[inline]
    pub fn name(&self) -> String {
        format!("{}/tcp", self.name)
    }

    /// Transport builder carrying this section's socket options and limits.
    pub fn builder(&self) -> hubmq_net::Builder {
        hubmq_net::Builder::new()
            .name(self.name())
            .laddr(self.addr)
            .backlog(self.backlog)
            .nodelay(self.nodelay)
            .reuseaddr(Some(self.reuseaddr))
            .max_packet_size(self.max_packet_size.as_u32())
            .handshake_timeout(self.handshake_timeout)
            .recv_timeout(self.recv_timeout)
            .send_timeout(self.send_timeout)
    }
}
