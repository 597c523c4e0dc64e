use std::fmt;

use serde::Deserialize;

/// One row of the access table: a client id prefix and the topic prefixes it may use.
///
/// `"*"` in any column matches everything.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AclRule {
    pub clientid: String,
    pub publish: String,
    pub subscribe: String,
}

impl AclRule {
    pub fn new<C, P, S>(clientid: C, publish: P, subscribe: S) -> Self
    where
        C: Into<String>,
        P: Into<String>,
        S: Into<String>,
    {
        Self { clientid: clientid.into(), publish: publish.into(), subscribe: subscribe.into() }
    }
}

impl fmt::Display for AclRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} pub:{} sub:{}", self.clientid, self.publish, self.subscribe)
    }
}

pub(crate) fn default_rules() -> Vec<AclRule> {
    vec![
        AclRule::new("pn532", "access/", "access/"),
        AclRule::new("laser", "laser/", "laser/"),
        AclRule::new("relay", "relay/", "relay/"),
        AclRule::new("puppet", "puppet/", "puppet/"),
        AclRule::new("webui", "web/", "web/"),
        AclRule::new("*", "*", "*"),
    ]
}
