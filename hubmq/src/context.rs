use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::acl::AccessTable;
use crate::bridge::{Bridge, NoopRuleEngine, RuleEngine};
use crate::conf::Settings;
use crate::event::EventBus;
use crate::router::Router;
use crate::types::StatsSnapshot;
use crate::Result;

pub struct ServerContextBuilder {
    settings: Settings,
    engine: Arc<dyn RuleEngine>,
}

impl ServerContextBuilder {
    /// Sets the automation engine offered every admitted publish.
    pub fn rule_engine(mut self, engine: Arc<dyn RuleEngine>) -> Self {
        self.engine = engine;
        self
    }

    /// Starts the event bus and hooks the outbound bridge onto it. Must run inside a tokio
    /// runtime.
    pub fn build(self) -> Result<ServerContext> {
        let cfg = &self.settings;
        let router = Router::new(cfg.broker.clone(), cfg.listener.max_packet_size.as_u32());
        let acl = AccessTable::new(cfg.acl.clone());
        let (bus, _dispatcher) =
            EventBus::start(cfg.bridge.event_queue, cfg.bridge.max_handlers, cfg.bridge.post_timeout);
        let bridge = Bridge::new(&cfg.bridge, bus.clone(), self.engine)?;
        bus.register(bridge.outbound(router.clone()))?;

        Ok(ServerContext {
            inner: Arc::new(ServerContextInner { settings: self.settings, router, acl, bridge, bus }),
        })
    }
}

#[derive(Clone)]
pub struct ServerContext {
    inner: Arc<ServerContextInner>,
}

pub struct ServerContextInner {
    pub settings: Settings,
    pub router: Router,
    pub acl: AccessTable,
    pub bridge: Bridge,
    pub bus: EventBus,
}

impl Deref for ServerContext {
    type Target = ServerContextInner;
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl ServerContext {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(settings: Settings) -> ServerContextBuilder {
        ServerContextBuilder { settings, engine: Arc::new(NoopRuleEngine) }
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot { events_dropped: self.bus.dropped(), ..self.router.stats() }
    }
}

impl fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ServerContext ...")?;
        Ok(())
    }
}
