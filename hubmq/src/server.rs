//! Accept loop
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
//!     let listener = settings.listener.builder().bind()?;
//!     let scx = ServerContext::new(settings).build()?;
//!     MqttServer::new(scx, listener).run().await
//! }
//! ```

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::context::ServerContext;
use crate::net::{Acceptor, Listener};
use crate::session;
use crate::Result;

pub struct MqttServer {
    scx: ServerContext,
    listener: Listener,
}

impl MqttServer {
    pub fn new(scx: ServerContext, listener: Listener) -> Self {
        Self { scx, listener }
    }

    /// Starts the server in a background tokio task
    pub fn start(self) {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                log::error!("Failed to start the MQTT server! {e}");
                std::process::exit(1);
            }
        });
    }

    /// Accepts connections until the task is dropped, one session task per connection.
    pub async fn run(self) -> Result<()> {
        log::info!("{} accepting on {}", self.listener.cfg.name, self.listener.local_addr()?);
        loop {
            match self.listener.accept().await {
                Ok(acceptor) => {
                    let scx = self.scx.clone();
                    tokio::spawn(async move {
                        let remote_addr = acceptor.remote_addr;
                        if let Err(e) = serve(scx, acceptor).await {
                            log::debug!("{} session ended with error: {:?}", remote_addr, e);
                        }
                    });
                }
                Err(e) => {
                    log::info!("TCP listener error: {e:?}");
                    tokio::time::sleep(Duration::from_millis(1000)).await;
                }
            }
        }
    }
}

/// Runs one accepted connection. A full session table closes it before anything is read.
pub async fn serve<S>(scx: ServerContext, acceptor: Acceptor<S>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    log::debug!("TCP connection from {}", acceptor.remote_addr);
    let Some(permit) = scx.router.try_acquire_slot() else {
        acceptor.refuse();
        return Ok(());
    };
    session::process(scx, acceptor.mqtt(), permit).await
}
