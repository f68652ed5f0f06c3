//! # DSU Packet Encoder
//!
//! Serialises [`DsuPacket`]s into complete datagrams with the checksum filled in.

use bytes::{BufMut, BytesMut};

use super::crc::packet_checksum;
use super::protocol::*;

/// Encode a packet into a complete DSU datagram
///
/// The header is written with a zero checksum, the CRC32 of the whole packet
/// is computed and then patched into bytes 8..12.
///
/// # Examples
///
/// ```
/// use dsu_server::dsu::encoder::encode_packet;
/// use dsu_server::dsu::protocol::{DsuMessage, DsuPacket};
///
/// let packet = DsuPacket::new(7, DsuMessage::VersionResponse { version: 1001 });
/// let bytes = encode_packet(&packet);
/// assert_eq!(&bytes[..4], b"DSUS");
/// assert_eq!(bytes.len(), 22);
/// ```
pub fn encode_packet(packet: &DsuPacket) -> Vec<u8> {
    let mut body = BytesMut::with_capacity(DSU_PAD_DATA_BODY_SIZE);
    encode_body(&packet.message, &mut body);

    let length = (DSU_MESSAGE_TYPE_SIZE + body.len()) as u16;

    let mut frame = BytesMut::with_capacity(DSU_HEADER_SIZE + length as usize);
    frame.put_slice(&packet.message.magic().bytes());
    frame.put_u16_le(packet.protocol_version);
    frame.put_u16_le(length);
    frame.put_u32_le(0); // CRC placeholder
    frame.put_u32_le(packet.sender_id);
    frame.put_u32_le(packet.message.message_type());
    frame.put_slice(&body);

    let crc = packet_checksum(&frame);
    frame[DSU_CRC_OFFSET..DSU_CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());

    frame.to_vec()
}

/// Encode a server → client message from `server_id` at the current protocol version
pub fn encode_server_message(server_id: u32, message: DsuMessage) -> Vec<u8> {
    encode_packet(&DsuPacket::new(server_id, message))
}

fn encode_body(message: &DsuMessage, buf: &mut BytesMut) {
    match message {
        DsuMessage::VersionRequest => {}
        DsuMessage::VersionResponse { version } => {
            buf.put_u16_le(*version);
        }
        DsuMessage::PortInfoRequest { slots } => {
            buf.put_i32_le(slots.len() as i32);
            buf.put_slice(slots);
        }
        DsuMessage::PortInfo(header) => {
            put_slot_header(buf, header);
            buf.put_u8(0);
        }
        DsuMessage::PadDataRequest(registration) | DsuMessage::MotorInfoRequest(registration) => {
            put_registration(buf, registration);
        }
        DsuMessage::PadData(pad) => put_pad_data(buf, pad),
        DsuMessage::MotorInfo { header, motor_count } => {
            put_slot_header(buf, header);
            buf.put_u8(*motor_count);
        }
        DsuMessage::RumbleCommand { registration, motor_id, intensity } => {
            put_registration(buf, registration);
            buf.put_u8(*motor_id);
            buf.put_u8(*intensity);
        }
    }
}

fn put_slot_header(buf: &mut BytesMut, header: &SlotHeader) {
    buf.put_u8(header.slot);
    buf.put_u8(header.state as u8);
    buf.put_u8(header.model as u8);
    buf.put_u8(header.connection_type as u8);
    buf.put_slice(&header.mac);
    buf.put_u8(header.battery as u8);
}

fn put_registration(buf: &mut BytesMut, registration: &Registration) {
    buf.put_u8(registration.flags());
    buf.put_u8(registration.slot);
    buf.put_slice(&registration.mac);
}

fn put_touch(buf: &mut BytesMut, touch: &TouchPoint) {
    buf.put_u8(touch.active as u8);
    buf.put_u8(touch.id);
    buf.put_u16_le(touch.x);
    buf.put_u16_le(touch.y);
}

fn put_pad_data(buf: &mut BytesMut, pad: &PadData) {
    put_slot_header(buf, &pad.header);
    buf.put_u8(pad.connected as u8);
    buf.put_u32_le(pad.packet_counter);

    buf.put_u8(pad.buttons1);
    buf.put_u8(pad.buttons2);
    buf.put_u8(pad.home as u8);
    buf.put_u8(pad.touch_button as u8);
    buf.put_slice(&pad.left_stick);
    buf.put_slice(&pad.right_stick);
    buf.put_slice(&pad.dpad_analog);
    buf.put_slice(&pad.face_analog);
    buf.put_u8(pad.analog_r1);
    buf.put_u8(pad.analog_l1);
    buf.put_u8(pad.analog_r2);
    buf.put_u8(pad.analog_l2);

    for touch in &pad.touches {
        put_touch(buf, touch);
    }

    buf.put_u64_le(pad.motion_timestamp);
    for value in pad.accelerometer.iter().chain(pad.gyroscope.iter()) {
        buf.put_f32_le(*value);
    }
}
