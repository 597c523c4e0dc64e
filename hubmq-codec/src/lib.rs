#![deny(unsafe_code)]

//! MQTT 3.1.1 packet codec used by the hub broker
//!
//! Only the frame kinds the broker speaks are understood: CONNECT, CONNACK, PUBLISH, PUBACK,
//! SUBSCRIBE, SUBACK, PINGREQ, PINGRESP and DISCONNECT. Anything else is reported as
//! [`error::DecodeError::UnsupportedPacketType`].
//!
//! The codec plugs into `tokio_util::codec::Framed`:
//!
//! ```
//! use bytes::BytesMut;
//! use hubmq_codec::v3::{Codec, Packet};
//! use tokio_util::codec::{Decoder, Encoder};
//!
//! let mut codec = Codec::new(1024);
//! let mut buf = BytesMut::new();
//! codec.encode(Packet::PingRequest, &mut buf).unwrap();
//! assert_eq!(codec.decode(&mut buf).unwrap(), Some(Packet::PingRequest));
//! ```

#[macro_use]
mod utils;

/// Error types for encoding/decoding operations
pub mod error;

/// Shared protocol types and constants
pub mod types;

/// MQTT v3.1.1 frames
pub mod v3;

pub use types::QoS;
