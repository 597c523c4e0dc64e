use bytes::{BufMut, BytesMut};
use bytestring::ByteString;

use crate::error::EncodeError;
use crate::types::{packet_type, ConnectFlags, QoS, WILL_QOS_SHIFT};
use crate::utils::{write_variable_length, Encode};

use super::packet::*;

pub(crate) fn get_encoded_publish_size(p: &Publish) -> usize {
    // Topic + Packet Id + Payload
    if p.qos == QoS::AtMostOnce {
        2 + p.topic.len() + p.payload.len()
    } else {
        4 + p.topic.len() + p.payload.len()
    }
}

pub(crate) fn get_encoded_subscribe_size(topic_filters: &[(ByteString, QoS)]) -> usize {
    2 + topic_filters.iter().fold(0, |acc, (filter, _)| acc + 2 + filter.len() + 1)
}

/// Size of the variable header plus payload, i.e. the remaining length.
pub(crate) fn get_encoded_size(packet: &Packet) -> usize {
    match *packet {
        Packet::Connect(ref connect) => {
            let Connect { ref protocol, ref last_will, ref client_id, ref username, ref password, .. } =
                **connect;

            // Protocol Level + Connect Flags + Keep Alive
            let mut n = 1 + 1 + 2;
            n += 2 + protocol.name().len();
            n += 2 + client_id.len();

            if let Some(LastWill { ref topic, ref message, .. }) = *last_will {
                n += 2 + topic.len() + 2 + message.len();
            }
            if let Some(ref s) = *username {
                n += 2 + s.len();
            }
            if let Some(ref s) = *password {
                n += 2 + s.len();
            }
            n
        }
        Packet::Publish(ref publish) => get_encoded_publish_size(publish),
        // Flags + Return Code, or Packet Id
        Packet::ConnectAck { .. } | Packet::PublishAck { .. } => 2,
        Packet::Subscribe { ref topic_filters, .. } => get_encoded_subscribe_size(topic_filters),
        Packet::SubscribeAck { ref status, .. } => 2 + status.len(),
        Packet::PingRequest | Packet::PingResponse | Packet::Disconnect => 0,
    }
}

pub(crate) fn encode(packet: &Packet, dst: &mut BytesMut, content_size: u32) -> Result<(), EncodeError> {
    match packet {
        Packet::Connect(connect) => {
            dst.put_u8(packet_type::CONNECT);
            write_variable_length(content_size, dst)?;
            encode_connect(connect, dst)?;
        }
        Packet::ConnectAck(ack) => {
            dst.put_u8(packet_type::CONNACK);
            write_variable_length(content_size, dst)?;
            dst.put_slice(&[u8::from(ack.session_present), u8::from(ack.return_code)]);
        }
        Packet::Publish(publish) => {
            dst.put_u8(
                packet_type::PUBLISH_START
                    | (u8::from(publish.qos) << 1)
                    | ((publish.dup as u8) << 3)
                    | (publish.retain as u8),
            );
            write_variable_length(content_size, dst)?;
            publish.topic.encode(dst)?;
            if publish.qos == QoS::AtMostOnce {
                ensure!(publish.packet_id.is_none(), EncodeError::MalformedPacket);
            } else {
                publish.packet_id.ok_or(EncodeError::PacketIdRequired)?.encode(dst)?;
            }
            dst.put(publish.payload.as_ref());
        }
        Packet::PublishAck { packet_id } => {
            dst.put_u8(packet_type::PUBACK);
            write_variable_length(content_size, dst)?;
            packet_id.encode(dst)?;
        }
        Packet::Subscribe { packet_id, ref topic_filters } => {
            dst.put_u8(packet_type::SUBSCRIBE);
            write_variable_length(content_size, dst)?;
            packet_id.encode(dst)?;
            for (filter, qos) in topic_filters {
                filter.encode(dst)?;
                dst.put_u8((*qos).into());
            }
        }
        Packet::SubscribeAck { packet_id, ref status } => {
            dst.put_u8(packet_type::SUBACK);
            write_variable_length(content_size, dst)?;
            packet_id.encode(dst)?;
            for s in status {
                dst.put_u8(s.code());
            }
        }
        Packet::PingRequest => dst.put_slice(&[packet_type::PINGREQ, 0]),
        Packet::PingResponse => dst.put_slice(&[packet_type::PINGRESP, 0]),
        Packet::Disconnect => dst.put_slice(&[packet_type::DISCONNECT, 0]),
    }

    Ok(())
}

fn encode_connect(connect: &Connect, dst: &mut BytesMut) -> Result<(), EncodeError> {
    let Connect { protocol, clean_session, keep_alive, ref last_will, ref client_id, ref username, ref password } =
        *connect;

    protocol.name().as_bytes().encode(dst)?;

    let mut flags = ConnectFlags::empty();
    if username.is_some() {
        flags |= ConnectFlags::USERNAME;
    }
    if password.is_some() {
        flags |= ConnectFlags::PASSWORD;
    }
    if let Some(LastWill { qos, retain, .. }) = *last_will {
        flags |= ConnectFlags::WILL;
        if retain {
            flags |= ConnectFlags::WILL_RETAIN;
        }
        flags |= ConnectFlags::from_bits_truncate(qos.value() << WILL_QOS_SHIFT);
    }
    if clean_session {
        flags |= ConnectFlags::CLEAN_START;
    }

    dst.put_slice(&[protocol.level(), flags.bits()]);
    dst.put_u16(keep_alive);
    client_id.encode(dst)?;

    if let Some(LastWill { ref topic, ref message, .. }) = *last_will {
        topic.encode(dst)?;
        message.encode(dst)?;
    }
    if let Some(ref s) = *username {
        s.encode(dst)?;
    }
    if let Some(ref s) = *password {
        s.encode(dst)?;
    }
    Ok(())
}
