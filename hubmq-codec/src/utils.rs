use std::io::Cursor;
use std::num::NonZeroU16;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytestring::ByteString;

use crate::error::{DecodeError, EncodeError};
use crate::types::MAX_REMAINING_LENGTH;

macro_rules! ensure {
    ($cond:expr, $e:expr) => {
        if !($cond) {
            return Err($e);
        }
    };
}

macro_rules! prim_enum {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident {
            $(
                $( #[$enum_item_attr:meta] )*
                $var:ident=$val:expr
            ),+
        }) => {
        $( #[$enum_attr] )*
        #[repr(u8)]
        #[derive(Debug, Eq, PartialEq, Copy, Clone)]
        pub enum $name {
            $(
                $( #[$enum_item_attr] )*
                $var = $val
            ),+
        }
        impl std::convert::TryFrom<u8> for $name {
            type Error = $crate::error::DecodeError;
            fn try_from(v: u8) -> Result<Self, Self::Error> {
                match v {
                    $($val => Ok($name::$var)),+
                    ,_ => Err($crate::error::DecodeError::MalformedPacket)
                }
            }
        }
    };
}

/// Bounds-checked reads from a frame body; running out of bytes is an error, never a panic.
pub(crate) trait Decode: Sized {
    fn decode(src: &mut Bytes) -> Result<Self, DecodeError>;
}

impl Decode for u16 {
    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        ensure!(src.remaining() >= 2, DecodeError::InvalidLength);
        Ok(src.get_u16())
    }
}

impl Decode for NonZeroU16 {
    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        NonZeroU16::new(u16::decode(src)?).ok_or(DecodeError::MalformedPacket)
    }
}

impl Decode for Bytes {
    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        let len = u16::decode(src)? as usize;
        ensure!(src.remaining() >= len, DecodeError::InvalidLength);
        Ok(src.split_to(len))
    }
}

impl Decode for ByteString {
    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        ByteString::try_from(Bytes::decode(src)?).map_err(|_| DecodeError::Utf8Error)
    }
}

/// Reads a remaining length from the start of `src`.
///
/// `Ok(None)` means more bytes are needed. On success returns the value and the number of
/// bytes the field occupied.
pub(crate) fn decode_variable_length(src: &[u8]) -> Result<Option<(u32, usize)>, DecodeError> {
    let mut cur = Cursor::new(src);
    match decode_variable_length_cursor(&mut cur) {
        Ok(len) => Ok(Some((len, cur.position() as usize))),
        Err(DecodeError::MalformedPacket) => Ok(None),
        Err(e) => Err(e),
    }
}

pub(crate) fn decode_variable_length_cursor<B: Buf>(src: &mut B) -> Result<u32, DecodeError> {
    let mut shift: u32 = 0;
    let mut len: u32 = 0;
    loop {
        ensure!(src.has_remaining(), DecodeError::MalformedPacket);
        let val = src.get_u8();
        len += ((val & 0b0111_1111u8) as u32) << shift;
        if val & 0b1000_0000 == 0 {
            return Ok(len);
        }
        // a continuation bit on the 4th byte would need a 5th
        ensure!(shift < 21, DecodeError::InvalidRemainingLength);
        shift += 7;
    }
}

/// Number of bytes `len` takes on the wire as a remaining length.
#[inline]
pub(crate) fn variable_length_size(len: u32) -> usize {
    match len {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

pub(crate) trait Encode {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError>;
}

impl Encode for NonZeroU16 {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_u16(self.get());
        Ok(())
    }
}

impl Encode for &[u8] {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let len = u16::try_from(self.len()).map_err(|_| EncodeError::InvalidLength)?;
        buf.put_u16(len);
        buf.extend_from_slice(self);
        Ok(())
    }
}

impl Encode for Bytes {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        self.as_ref().encode(buf)
    }
}

impl Encode for ByteString {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        self.as_bytes().encode(buf)
    }
}

pub(crate) fn write_variable_length(len: u32, dst: &mut BytesMut) -> Result<(), EncodeError> {
    ensure!(len <= MAX_REMAINING_LENGTH, EncodeError::InvalidLength);
    let mut rest = len;
    loop {
        let mut byte = (rest & 0b0111_1111) as u8;
        rest >>= 7;
        if rest > 0 {
            byte |= 0b1000_0000;
        }
        dst.put_u8(byte);
        if rest == 0 {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_variable_length() {
        fn assert_variable_length<B: AsRef<[u8]> + 'static>(bytes: B, res: (u32, usize)) {
            assert_eq!(decode_variable_length(bytes.as_ref()).unwrap(), Some(res));
        }

        assert_variable_length(b"\x7f\x7f", (127, 1));

        assert_eq!(decode_variable_length(b"\xff\xff\xff").unwrap(), None);

        assert_eq!(
            decode_variable_length(b"\xff\xff\xff\xff\xff\xff")
                .map_err(|e| matches!(e, DecodeError::InvalidRemainingLength)),
            Err(true)
        );

        assert_variable_length(b"\x00", (0, 1));
        assert_variable_length(b"\x7f", (127, 1));
        assert_variable_length(b"\x80\x01", (128, 2));
        assert_variable_length(b"\xff\x7f", (16383, 2));
        assert_variable_length(b"\x80\x80\x01", (16384, 3));
        assert_variable_length(b"\xff\xff\x7f", (2_097_151, 3));
        assert_variable_length(b"\xff\xff\xff\x7f", (268_435_455, 4));
    }

    #[test]
    fn test_fifth_length_byte_is_rejected() {
        // four continuation bytes are enough to know the field is too long
        assert!(matches!(
            decode_variable_length(b"\x80\x80\x80\x80"),
            Err(DecodeError::InvalidRemainingLength)
        ));
    }

    #[test]
    fn test_encode_variable_length() {
        let mut v = BytesMut::new();

        write_variable_length(123, &mut v).unwrap();
        assert_eq!(v, [123].as_ref());

        v.clear();
        write_variable_length(129, &mut v).unwrap();
        assert_eq!(v, b"\x81\x01".as_ref());

        v.clear();
        write_variable_length(16_383, &mut v).unwrap();
        assert_eq!(v, b"\xff\x7f".as_ref());

        v.clear();
        write_variable_length(2_097_151, &mut v).unwrap();
        assert_eq!(v, b"\xff\xff\x7f".as_ref());

        v.clear();
        write_variable_length(268_435_455, &mut v).unwrap();
        assert_eq!(v, b"\xff\xff\xff\x7f".as_ref());

        assert!(write_variable_length(268_435_456, &mut v).is_err());
    }

    #[test]
    fn test_variable_length_identity() {
        for len in [0u32, 127, 128, 16_383, 16_384, 2_097_151] {
            let mut v = BytesMut::new();
            write_variable_length(len, &mut v).unwrap();
            assert_eq!(v.len(), variable_length_size(len));
            assert_eq!(decode_variable_length(&v).unwrap(), Some((len, v.len())), "length {len}");
        }
    }

    #[test]
    fn test_truncated_string() {
        let mut src = Bytes::from_static(b"\x00\x05abc");
        assert!(matches!(ByteString::decode(&mut src), Err(DecodeError::InvalidLength)));

        let mut src = Bytes::from_static(b"\x00");
        assert!(matches!(ByteString::decode(&mut src), Err(DecodeError::InvalidLength)));

        let mut src = Bytes::from_static(b"\x00\x02\xff\xfe");
        assert!(matches!(ByteString::decode(&mut src), Err(DecodeError::Utf8Error)));
    }
}
