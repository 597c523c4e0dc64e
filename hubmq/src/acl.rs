//! Prefix based access table
//!
//! Rules are consulted in order. The first rule whose client id prefix matches the
//! connecting client decides both publish and subscribe rights for that client. A client
//! no rule matches may do nothing. `*` in any column matches everything.

use crate::conf::AclRule;

const WILDCARD: &str = "*";

#[derive(Debug, Clone, Default)]
pub struct AccessTable {
    rules: Vec<AclRule>,
}

impl AccessTable {
    pub fn new(rules: Vec<AclRule>) -> Self {
        Self { rules }
    }

    #[inline]
    pub fn rules(&self) -> &[AclRule] {
        &self.rules
    }

    #[inline]
    fn rule_for(&self, client_id: &str) -> Option<&AclRule> {
        self.rules.iter().find(|r| prefix_match(&r.clientid, client_id))
    }

    #[inline]
    pub fn can_publish(&self, client_id: &str, topic: &str) -> bool {
        self.rule_for(client_id).map(|r| prefix_match(&r.publish, topic)).unwrap_or(false)
    }

    #[inline]
    pub fn can_subscribe(&self, client_id: &str, topic: &str) -> bool {
        self.rule_for(client_id).map(|r| prefix_match(&r.subscribe, topic)).unwrap_or(false)
    }
}

#[inline]
fn prefix_match(prefix: &str, value: &str) -> bool {
    prefix == WILDCARD || value.starts_with(prefix)
}
