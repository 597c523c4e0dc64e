#![deny(unsafe_code)]

//! Embedded MQTT 3.1.1 broker core of the installation-control hub.
//!
//! ```rust,no_run
//! use hubmq::conf::Settings;
//! use hubmq::context::ServerContext;
//! use hubmq::server::MqttServer;
//! use hubmq::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let settings = Settings::default();
//!     let scx = ServerContext::new(settings.clone()).build()?;
//!     hubmq::keepalive::start(scx.router.clone(), settings.broker.sweep_interval);
//!     MqttServer::new(scx, settings.listener.builder().bind()?).run().await
//! }
//! ```

pub mod acl;
pub mod bridge;
pub mod context;
pub mod event;
pub mod keepalive;
pub mod logger;
pub mod retain;
pub mod router;
pub mod server;
pub mod session;
pub mod topic;
pub mod types;

pub use net::{Error, Result};

pub use hubmq_codec as codec;
pub use hubmq_conf as conf;
pub use hubmq_net as net;
pub use hubmq_utils as utils;
