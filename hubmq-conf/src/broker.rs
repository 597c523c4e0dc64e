use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::Deserialize;

use hubmq_utils::deserialize_duration;

/// Capacities and liveness tuning of the broker core.
#[derive(Debug, Clone, Deserialize)]
pub struct Broker {
    /// Concurrent sessions. Connections beyond this are closed before CONNECT is read.
    #[serde(default = "Broker::max_sessions_default")]
    pub max_sessions: usize,
    /// Subscriptions held per session
    #[serde(default = "Broker::max_subscriptions_default")]
    pub max_subscriptions: usize,
    #[serde(default = "Broker::retain_max_default")]
    pub retain_max: usize,
    /// Outbound queue depth of each session
    #[serde(default = "Broker::session_queue_default")]
    pub session_queue: usize,
    /// Idle threshold is keepalive times this factor
    #[serde(default = "Broker::keepalive_backoff_default", deserialize_with = "deserialize_backoff")]
    pub keepalive_backoff: f32,
    /// Idle threshold for clients that declared keepalive 0
    #[serde(default = "Broker::zero_keepalive_idle_default", deserialize_with = "deserialize_duration")]
    pub zero_keepalive_idle: Duration,
    #[serde(default = "Broker::sweep_interval_default", deserialize_with = "deserialize_duration")]
    pub sweep_interval: Duration,
}

impl Default for Broker {
    fn default() -> Self {
        Self {
            max_sessions: Self::max_sessions_default(),
            max_subscriptions: Self::max_subscriptions_default(),
            retain_max: Self::retain_max_default(),
            session_queue: Self::session_queue_default(),
            keepalive_backoff: Self::keepalive_backoff_default(),
            zero_keepalive_idle: Self::zero_keepalive_idle_default(),
            sweep_interval: Self::sweep_interval_default(),
        }
    }
}

impl Broker {
    fn max_sessions_default() -> usize {
        12
    }
    fn max_subscriptions_default() -> usize {
        8
    }
    fn retain_max_default() -> usize {
        32
    }
    fn session_queue_default() -> usize {
        64
    }
    fn keepalive_backoff_default() -> f32 {
        1.5
    }
    fn zero_keepalive_idle_default() -> Duration {
        Duration::from_secs(60)
    }
    fn sweep_interval_default() -> Duration {
        Duration::from_secs(10)
    }

    /// How long a session with the given keepalive may stay silent.
    #[inline]
    pub fn idle_threshold(&self, keepalive: u16) -> Duration {
        if keepalive == 0 {
            self.zero_keepalive_idle
        } else {
            Duration::from_secs(keepalive as u64).mul_f32(self.keepalive_backoff)
        }
    }
}

fn deserialize_backoff<'de, D>(deserializer: D) -> std::result::Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    let v = f32::deserialize(deserializer)?;
    if !v.is_finite() || v < 0.0 {
        return Err(de::Error::custom(format!("keepalive_backoff must be a finite number >= 0, got {v}")));
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_threshold() {
        let b = Broker::default();
        assert_eq!(b.idle_threshold(0), Duration::from_secs(60));
        assert_eq!(b.idle_threshold(10), Duration::from_secs(15));
        assert_eq!(b.idle_threshold(60), Duration::from_secs(90));
    }
}
