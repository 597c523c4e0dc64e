use hubmq_codec::error::{DecodeError, EncodeError, SendPacketError};

#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    /// MQTT decoding error
    #[error("Decoding error: {0:?}")]
    Decode(#[from] DecodeError),
    /// MQTT encoding error
    #[error("Encoding error: {0:?}")]
    Encode(#[from] EncodeError),
    /// Send packet error
    #[error("Mqtt send packet error: {}", _0)]
    SendPacket(#[from] SendPacketError),
    /// Read timeout
    #[error("Read timeout")]
    ReadTimeout,
    /// Write timeout
    #[error("Write timeout")]
    WriteTimeout,
    /// Flush timeout
    #[error("Flush timeout")]
    FlushTimeout,
    /// Close timeout
    #[error("Close timeout")]
    CloseTimeout,
    /// First packet on the connection was not a CONNECT
    #[error("invalid protocol, expected CONNECT")]
    InvalidProtocol,
}

impl MqttError {
    /// True when the peer deserves no answer at all, only a closed socket.
    pub fn is_framing(&self) -> bool {
        matches!(self, MqttError::Decode(e) if e.is_framing())
    }

    /// Looks through an `anyhow` chain for a framing error.
    pub fn is_framing_error(e: &anyhow::Error) -> bool {
        e.downcast_ref::<MqttError>().is_some_and(MqttError::is_framing)
    }

    /// A frame refused by the encoder for its size. Nothing was written, the stream is still
    /// usable.
    pub fn is_oversize(&self) -> bool {
        matches!(
            self,
            MqttError::Encode(EncodeError::OverMaxPacketSize)
                | MqttError::SendPacket(SendPacketError::Encode(EncodeError::OverMaxPacketSize))
        )
    }

    /// Looks through an `anyhow` chain for an oversize frame.
    pub fn is_oversize_error(e: &anyhow::Error) -> bool {
        e.downcast_ref::<MqttError>().is_some_and(MqttError::is_oversize)
    }

    /// Looks through an `anyhow` chain for a receive timeout.
    pub fn is_read_timeout(e: &anyhow::Error) -> bool {
        matches!(e.downcast_ref::<MqttError>(), Some(MqttError::ReadTimeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_is_detected_through_anyhow() {
        let e = anyhow::Error::from(MqttError::Decode(DecodeError::MaxSizeExceeded));
        assert!(MqttError::is_framing_error(&e));

        let e = anyhow::Error::from(MqttError::Decode(DecodeError::InvalidProtocol));
        assert!(!MqttError::is_framing_error(&e));

        let e = anyhow::Error::from(MqttError::ReadTimeout);
        assert!(!MqttError::is_framing_error(&e));
        assert!(MqttError::is_read_timeout(&e));
    }

    #[test]
    fn oversize_is_told_apart_from_io() {
        let e = anyhow::Error::from(MqttError::SendPacket(SendPacketError::Encode(EncodeError::OverMaxPacketSize)));
        assert!(MqttError::is_oversize_error(&e));

        let io = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        let e = anyhow::Error::from(MqttError::SendPacket(SendPacketError::Encode(EncodeError::Io(io))));
        assert!(!MqttError::is_oversize_error(&e));
        assert!(!MqttError::is_oversize_error(&anyhow::Error::from(MqttError::WriteTimeout)));
    }
}
