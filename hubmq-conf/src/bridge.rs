use std::time::Duration;

use serde::Deserialize;

use hubmq_utils::deserialize_duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutgoingRoute {
    pub event: String,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IncomingRoute {
    pub prefix: String,
    pub event: String,
}

/// Event bus sizing and the two translation tables between events and topics.
#[derive(Debug, Clone, Deserialize)]
pub struct Bridge {
    #[serde(default = "Bridge::event_queue_default")]
    pub event_queue: usize,
    #[serde(default = "Bridge::post_timeout_default", deserialize_with = "deserialize_duration")]
    pub post_timeout: Duration,
    #[serde(default = "Bridge::max_handlers_default")]
    pub max_handlers: usize,
    #[serde(default = "Bridge::outgoing_default")]
    pub outgoing: Vec<OutgoingRoute>,
    /// Checked in order, first matching prefix wins
    #[serde(default = "Bridge::incoming_default")]
    pub incoming: Vec<IncomingRoute>,
}

impl Default for Bridge {
    fn default() -> Self {
        Self {
            event_queue: Self::event_queue_default(),
            post_timeout: Self::post_timeout_default(),
            max_handlers: Self::max_handlers_default(),
            outgoing: Self::outgoing_default(),
            incoming: Self::incoming_default(),
        }
    }
}

impl Bridge {
    fn event_queue_default() -> usize {
        64
    }
    fn post_timeout_default() -> Duration {
        Duration::from_millis(100)
    }
    fn max_handlers_default() -> usize {
        8
    }
    fn outgoing_default() -> Vec<OutgoingRoute> {
        [
            ("AudioPlay", "audio/play"),
            ("SystemStatus", "sys/broker/metrics"),
            ("CardOk", "access/card/ok"),
            ("CardBad", "access/card/bad"),
            ("RelayCmd", "relay/cmd"),
            ("WebCommand", "web/cmd"),
        ]
        .into_iter()
        .map(|(event, topic)| OutgoingRoute { event: event.into(), topic: topic.into() })
        .collect()
    }
    fn incoming_default() -> Vec<IncomingRoute> {
        [("audio/play", "AudioPlay"), ("relay/", "RelayCmd"), ("web/cmd", "WebCommand")]
            .into_iter()
            .map(|(prefix, event)| IncomingRoute { prefix: prefix.into(), event: event.into() })
            .collect()
    }
}
