use std::cell::Cell;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{decode, encode, Packet};
use crate::error::{DecodeError, EncodeError};
use crate::types::{packet_type, FixedHeader, DEFAULT_MAX_PACKET_SIZE};
use crate::utils::{decode_variable_length, variable_length_size};

#[derive(Debug, Clone)]
/// Mqtt v3.1.1 protocol codec
pub struct Codec {
    state: Cell<DecodeState>,
    max_size: Cell<u32>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum DecodeState {
    FrameHeader,
    Frame(FixedHeader),
}

impl Codec {
    /// Create `Codec` instance
    ///
    /// `max_packet_size` caps the whole frame, fixed header included. `0` means unlimited.
    pub fn new(max_packet_size: u32) -> Self {
        Codec { state: Cell::new(DecodeState::FrameHeader), max_size: Cell::new(max_packet_size) }
    }

    /// Set max frame size.
    pub fn set_max_size(&mut self, size: u32) {
        self.max_size.set(size);
    }

    #[inline]
    fn exceeds_max(&self, frame_size: usize) -> bool {
        let max_size = self.max_size.get() as usize;
        max_size != 0 && frame_size > max_size
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PACKET_SIZE)
    }
}

impl Decoder for Codec {
    type Item = Packet;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, DecodeError> {
        loop {
            match self.state.get() {
                DecodeState::FrameHeader => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let first_byte = src[0];
                    ensure!(packet_type::is_supported(first_byte), DecodeError::UnsupportedPacketType);
                    let Some((remaining_length, consumed)) = decode_variable_length(&src[1..])? else {
                        return Ok(None);
                    };
                    if self.exceeds_max(1 + consumed + remaining_length as usize) {
                        return Err(DecodeError::MaxSizeExceeded);
                    }
                    src.advance(consumed + 1);
                    self.state.set(DecodeState::Frame(FixedHeader { first_byte, remaining_length }));
                    let remaining_length = remaining_length as usize;
                    if src.len() < remaining_length {
                        src.reserve(remaining_length - src.len());
                        return Ok(None);
                    }
                }
                DecodeState::Frame(fixed) => {
                    if src.len() < fixed.remaining_length as usize {
                        return Ok(None);
                    }
                    let packet_buf = src.split_to(fixed.remaining_length as usize);
                    // the frame is consumed either way, a body error must not wedge the state
                    self.state.set(DecodeState::FrameHeader);
                    let packet = decode::decode_packet(packet_buf.freeze(), fixed.first_byte)?;
                    return Ok(Some(packet));
                }
            }
        }
    }
}

impl Encoder<Packet> for Codec {
    type Error = EncodeError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), EncodeError> {
        let content_size = encode::get_encoded_size(&item);
        let content_size32 = u32::try_from(content_size).map_err(|_| EncodeError::InvalidLength)?;
        let frame_size = 1 + variable_length_size(content_size32) + content_size;
        if self.exceeds_max(frame_size) {
            return Err(EncodeError::OverMaxPacketSize);
        }
        dst.reserve(frame_size);
        encode::encode(&item, dst, content_size32)
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU16;

    use bytes::Bytes;
    use bytestring::ByteString;

    use super::*;
    use crate::types::QoS;
    use crate::v3::Publish;

    #[test]
    fn test_max_size() {
        let mut codec = Codec::default();
        codec.set_max_size(5);

        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"\x30\x09");
        assert!(matches!(codec.decode(&mut buf), Err(DecodeError::MaxSizeExceeded)));
    }

    #[test]
    fn test_total_size_cap() {
        // 1 header byte + 2 length bytes + 1021 body bytes = 1024
        let topic = ByteString::from("t".repeat(10));
        let at_cap = Publish::at_most_once(topic.clone(), Bytes::from(vec![b'x'; 1021 - 12]));
        let mut codec = Codec::new(1024);
        let mut buf = BytesMut::new();
        codec.encode(Packet::Publish(at_cap.clone()), &mut buf).unwrap();
        assert_eq!(buf.len(), 1024);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Packet::Publish(at_cap)));

        let over = Publish::at_most_once(topic, Bytes::from(vec![b'x'; 1021 - 11]));
        assert!(matches!(
            codec.encode(Packet::Publish(over.clone()), &mut BytesMut::new()),
            Err(EncodeError::OverMaxPacketSize)
        ));

        let mut unlimited = Codec::new(0);
        let mut buf = BytesMut::new();
        unlimited.encode(Packet::Publish(over), &mut buf).unwrap();
        assert_eq!(buf.len(), 1025);
        assert!(matches!(codec.decode(&mut buf), Err(DecodeError::MaxSizeExceeded)));
    }

    #[test]
    fn test_five_byte_length_is_rejected() {
        let mut codec = Codec::new(0);
        let mut buf = BytesMut::from(&b"\x30\xff\xff\xff\xff\x01"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(DecodeError::InvalidRemainingLength)));
    }

    #[test]
    fn test_unsupported_first_byte() {
        let mut codec = Codec::default();
        // UNSUBSCRIBE
        let mut buf = BytesMut::from(&b"\xa2\x07\x00\x01\x00\x03a/b"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(DecodeError::UnsupportedPacketType)));
        // SUBSCRIBE with the reserved flags cleared
        let mut buf = BytesMut::from(&b"\x80\x00"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(DecodeError::UnsupportedPacketType)));
    }

    #[test]
    fn test_partial_frames() {
        let mut codec = Codec::default();
        let mut buf = BytesMut::new();
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"\x40");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"\x02\x00");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"\x2a\xc0\x00");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Packet::PublishAck { packet_id: NonZeroU16::new(42).unwrap() })
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Packet::PingRequest));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_body_error_resets_state() {
        let mut codec = Codec::default();
        let mut buf = BytesMut::from(&b"\xc0\x01\x00\xd0\x00"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(DecodeError::InvalidLength)));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Packet::PingResponse));
    }

    #[test]
    fn test_packet() {
        let mut codec = Codec::new(0);
        let mut buf = BytesMut::new();

        let pkt = Publish {
            dup: false,
            retain: false,
            qos: QoS::AtLeastOnce,
            topic: ByteString::from_static("/test"),
            packet_id: NonZeroU16::new(7),
            payload: Bytes::from("a".repeat(260 * 1024)),
        };
        codec.encode(Packet::Publish(pkt.clone()), &mut buf).unwrap();

        let pkt2 = if let Packet::Publish(v) = codec.decode(&mut buf).unwrap().unwrap() { v } else { panic!() };
        assert_eq!(pkt, pkt2);
    }
}
