#![deny(unsafe_code)]

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use anyhow::anyhow;
use config::{Config, File, FileFormat};
use once_cell::sync::OnceCell;
use serde::Deserialize;

use hubmq_net::Result;

pub use self::acl::AclRule;
pub use self::bridge::{Bridge, IncomingRoute, OutgoingRoute};
pub use self::broker::Broker;
pub use self::listener::Listener;
pub use self::logging::Log;
pub use self::options::Options;

pub mod acl;
pub mod bridge;
pub mod broker;
pub mod listener;
pub mod logging;
pub mod options;

static SETTINGS: OnceCell<Settings> = OnceCell::new();

#[derive(Clone)]
pub struct Settings(Arc<Inner>);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub listener: Listener,
    #[serde(default)]
    pub broker: Broker,
    #[serde(default)]
    pub bridge: Bridge,
    /// Ordered access rules, first client id prefix match wins
    #[serde(default = "acl::default_rules")]
    pub acl: Vec<AclRule>,
    #[serde(default)]
    pub log: Log,
    #[serde(default, skip)]
    pub opts: Options,
}

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings::from_inner(Inner { acl: acl::default_rules(), ..Default::default() })
    }
}

impl Settings {
    fn new(opts: Options) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("/etc/hubmq/hubmq").required(false))
            .add_source(File::with_name("hubmq").required(false));

        if let Some(cfg) = opts.cfg_name.as_ref() {
            builder = builder.add_source(File::with_name(cfg).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("hubmq").prefix_separator("_").separator("__").try_parsing(true),
        );

        let inner: Inner = builder.build()?.try_deserialize()?;
        Ok(Self::finish(inner, opts))
    }

    /// Builds settings from TOML text alone, no files or environment.
    pub fn from_toml(text: &str) -> Result<Self> {
        let inner: Inner =
            Config::builder().add_source(File::from_str(text, FileFormat::Toml)).build()?.try_deserialize()?;
        Ok(Self::finish(inner, Options::default()))
    }

    #[inline]
    pub fn from_inner(inner: Inner) -> Self {
        Self(Arc::new(inner))
    }

    fn finish(mut inner: Inner, opts: Options) -> Self {
        //Command line configuration overriding file configuration
        if let Some(port) = opts.port {
            inner.listener.addr.set_port(port);
        }
        if inner.acl.is_empty() {
            inner.acl = acl::default_rules();
        }
        inner.opts = opts;
        Self(Arc::new(inner))
    }

    #[inline]
    pub fn instance() -> Result<&'static Self> {
        SETTINGS.get().ok_or_else(|| anyhow!("Settings not initialized"))
    }

    #[inline]
    pub fn init(opts: Options) -> Result<&'static Self> {
        SETTINGS.set(Settings::new(opts)?).map_err(|_| anyhow!("Settings init failed"))?;
        Self::instance()
    }

    #[inline]
    pub fn logs() -> Result<()> {
        let cfg = Self::instance()?;
        log::debug!("Config info is {:?}", cfg.0);
        log::info!("listener is {} {:?}", cfg.listener.name(), cfg.listener);
        log::info!(
            "broker limits: sessions {}, subscriptions {}, retained {}",
            cfg.broker.max_sessions,
            cfg.broker.max_subscriptions,
            cfg.broker.retain_max
        );
        log::info!("bridge event queue {}, post timeout {:?}", cfg.bridge.event_queue, cfg.bridge.post_timeout);
        for (i, rule) in cfg.acl.iter().enumerate() {
            log::info!("acl[{}] {}", i, rule);
        }
        Ok(())
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Settings ...")?;
        Ok(())
    }
}
