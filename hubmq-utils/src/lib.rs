//! Helpers shared by the hubmq crates
//!
//! - [`Bytesize`] / [`to_bytesize`]: `"1K"`, `"2M512K"` style sizes used for packet limits
//! - [`to_duration`]: `"1h30m15s"`, `"100ms"` style intervals used for timeouts and sweeps
//! - serde adapters for both, plus socket addresses
//! - [`Counter`] and [`DropTally`] for broker statistics and rate-limited warnings
//!
//! ```
//! use hubmq_utils::{to_bytesize, to_duration, Bytesize};
//!
//! assert_eq!(Bytesize::from("1K").as_u32(), 1024);
//! assert_eq!(to_bytesize("2M512K"), 2_621_440);
//! assert_eq!(to_duration("100ms").as_millis(), 100);
//! assert_eq!(to_duration("1h30m15s").as_secs(), 5415);
//! ```

#![deny(unsafe_code)]

use std::fmt;
use std::net::SocketAddr;
use std::ops::Deref;
use std::time::Duration;

use serde::{de::Deserializer, ser::Serializer, Deserialize, Serialize};

mod counter;

pub use counter::{Counter, DropTally};

/// Milliseconds since the Unix epoch
pub type TimestampMillis = i64;

const BYTESIZE_K: usize = 1024;
const BYTESIZE_M: usize = 1048576;
const BYTESIZE_G: usize = 1073741824;

/// Byte count that reads and writes as `"1K"`, `"3M"`, `"2G1M"`.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Bytesize(pub usize);

impl Bytesize {
    /// Saturates at `u32::MAX`.
    #[inline]
    pub fn as_u32(&self) -> u32 {
        u32::try_from(self.0).unwrap_or(u32::MAX)
    }

    #[inline]
    pub fn as_usize(&self) -> usize {
        self.0
    }

    pub fn string(&self) -> String {
        let mut v = self.0;
        let mut res = String::new();
        for (unit, size) in [('G', BYTESIZE_G), ('M', BYTESIZE_M), ('K', BYTESIZE_K)] {
            let n = v / size;
            if n > 0 {
                res.push_str(&format!("{}{}", n, unit));
                v %= size;
            }
        }
        if v > 0 || res.is_empty() {
            res.push_str(&format!("{}B", v));
        }
        res
    }
}

impl Deref for Bytesize {
    type Target = usize;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<usize> for Bytesize {
    fn from(v: usize) -> Self {
        Bytesize(v)
    }
}

impl From<&str> for Bytesize {
    fn from(v: &str) -> Self {
        Bytesize(to_bytesize(v))
    }
}

impl fmt::Debug for Bytesize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.string())
    }
}

impl fmt::Display for Bytesize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.string())
    }
}

impl Serialize for Bytesize {
    #[inline]
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.string())
    }
}

impl<'de> Deserialize<'de> for Bytesize {
    #[inline]
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Bytesize(to_bytesize(&String::deserialize(deserializer)?)))
    }
}

/// Parses `"1G500M256K1024B"` style sizes. A bare number counts bytes, garbage counts as 0.
pub fn to_bytesize(text: &str) -> usize {
    let text = text.trim().to_uppercase().replace("GB", "G").replace("MB", "M").replace("KB", "K");
    if let Ok(v) = text.parse::<usize>() {
        return v;
    }
    text.split_inclusive(['G', 'M', 'K', 'B'])
        .map(|x| {
            let mut chars = x.chars();
            let Some(u) = chars.next_back() else {
                return 0;
            };
            let Ok(v) = chars.as_str().parse::<usize>() else {
                return 0;
            };
            match u {
                'B' => v,
                'K' => v * BYTESIZE_K,
                'M' => v * BYTESIZE_M,
                'G' => v * BYTESIZE_G,
                _ => 0,
            }
        })
        .sum()
}

#[inline]
pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let v = String::deserialize(deserializer)?;
    Ok(to_duration(&v))
}

#[inline]
pub fn serialize_duration<S>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    format!("{}ms", d.as_millis()).serialize(s)
}

/// Converts `"1h30m15s"` style text to a [`Duration`].
///
/// Units: `ms`, `s`, `m`, `h`, `d`, `w`. Unknown pieces count as zero.
pub fn to_duration(text: &str) -> Duration {
    // `m` alone is minutes, so milliseconds get a placeholder unit first
    let text = text.trim().to_lowercase().replace("ms", "Y");
    let ms: u64 = text
        .split_inclusive(['s', 'm', 'h', 'd', 'w', 'Y'])
        .map(|x| {
            let mut chars = x.chars();
            let Some(u) = chars.next_back() else {
                return 0;
            };
            let Ok(v) = chars.as_str().parse::<u64>() else {
                return 0;
            };
            match u {
                'Y' => v,
                's' => v * 1000,
                'm' => v * 60_000,
                'h' => v * 3_600_000,
                'd' => v * 86_400_000,
                'w' => v * 604_800_000,
                _ => 0,
            }
        })
        .sum();
    Duration::from_millis(ms)
}

#[inline]
pub fn deserialize_addr<'de, D>(deserializer: D) -> std::result::Result<SocketAddr, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer)?.parse::<SocketAddr>().map_err(serde::de::Error::custom)
}

#[inline]
pub fn timestamp_millis() -> TimestampMillis {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|t| t.as_millis() as i64)
        .unwrap_or_else(|_| chrono::Local::now().timestamp_millis())
}

/// Local time, `2024-05-01 12:00:00.000`. Empty for non-positive input.
pub fn format_timestamp_millis(t: TimestampMillis) -> String {
    use chrono::TimeZone;
    if t <= 0 {
        return String::new();
    }
    match chrono::Local.timestamp_millis_opt(t) {
        chrono::LocalResult::Single(t) => t.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        _ => String::new(),
    }
}
