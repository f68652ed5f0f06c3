//! # DSU Packet Decoder
//!
//! Validates and parses inbound DSU datagrams. Every failure is reported as a
//! [`DecodeError`]; the server drops such datagrams and keeps running.

use bytes::Buf;
use thiserror::Error;

use super::crc::packet_checksum;
use super::protocol::*;

/// Reasons a datagram is rejected as malformed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Fewer bytes than the structure being read requires
    #[error("truncated packet: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    /// Magic is neither `DSUC` nor `DSUS`
    #[error("invalid magic: {0:02X?}")]
    BadMagic([u8; 4]),

    /// Protocol version other than 1001
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    /// Length field disagrees with the datagram size
    #[error("length mismatch: header says {declared}, datagram carries {available}")]
    LengthMismatch { declared: usize, available: usize },

    /// Stored CRC32 does not match the computed one
    #[error("checksum mismatch: expected 0x{expected:08X}, got 0x{actual:08X}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Message type not defined for this direction
    #[error("unknown message type 0x{message_type:06X} for {magic:?}")]
    UnknownMessageType { magic: Magic, message_type: u32 },

    /// Enumerated field carries an undefined value
    #[error("invalid {field} value: 0x{value:02X}")]
    InvalidField { field: &'static str, value: u8 },
}

/// Decode a complete DSU datagram
///
/// # Errors
///
/// Returns error if:
/// - Datagram is shorter than header + message type
/// - Magic or protocol version is wrong
/// - Length field does not match the datagram size
/// - CRC32 check fails
/// - Message type is unknown or the body is truncated
pub fn decode_packet(frame: &[u8]) -> Result<DsuPacket, DecodeError> {
    let minimum = DSU_HEADER_SIZE + DSU_MESSAGE_TYPE_SIZE;
    if frame.len() < minimum {
        return Err(DecodeError::Truncated {
            needed: minimum,
            available: frame.len(),
        });
    }

    let mut header = &frame[..DSU_HEADER_SIZE];
    let mut magic_bytes = [0u8; 4];
    header.copy_to_slice(&mut magic_bytes);
    let magic = Magic::from_bytes(magic_bytes).ok_or(DecodeError::BadMagic(magic_bytes))?;

    let protocol_version = header.get_u16_le();
    if protocol_version != DSU_PROTOCOL_VERSION {
        return Err(DecodeError::UnsupportedVersion(protocol_version));
    }

    let declared = header.get_u16_le() as usize;
    let available = frame.len() - DSU_HEADER_SIZE;
    if declared != available {
        return Err(DecodeError::LengthMismatch { declared, available });
    }

    let stored_crc = header.get_u32_le();
    let sender_id = header.get_u32_le();

    let computed_crc = packet_checksum(frame);
    if computed_crc != stored_crc {
        return Err(DecodeError::ChecksumMismatch {
            expected: computed_crc,
            actual: stored_crc,
        });
    }

    let mut body = &frame[DSU_HEADER_SIZE..];
    let message_type = body.get_u32_le();
    let message = decode_body(magic, message_type, body)?;

    Ok(DsuPacket {
        protocol_version,
        sender_id,
        message,
    })
}

fn decode_body(magic: Magic, message_type: u32, mut body: &[u8]) -> Result<DsuMessage, DecodeError> {
    match (magic, message_type) {
        (Magic::Client, DSU_MSG_VERSION) => Ok(DsuMessage::VersionRequest),
        (Magic::Server, DSU_MSG_VERSION) => {
            ensure(body, 2)?;
            Ok(DsuMessage::VersionResponse { version: body.get_u16_le() })
        }
        (Magic::Client, DSU_MSG_PORT_INFO) => {
            ensure(body, 4)?;
            let count = body.get_i32_le().max(0) as usize;
            ensure(body, count)?;
            Ok(DsuMessage::PortInfoRequest { slots: body[..count].to_vec() })
        }
        (Magic::Server, DSU_MSG_PORT_INFO) => Ok(DsuMessage::PortInfo(get_slot_header(&mut body)?)),
        (Magic::Client, DSU_MSG_PAD_DATA) => Ok(DsuMessage::PadDataRequest(get_registration(&mut body)?)),
        (Magic::Server, DSU_MSG_PAD_DATA) => Ok(DsuMessage::PadData(get_pad_data(&mut body)?)),
        (Magic::Client, DSU_MSG_MOTOR_INFO) => Ok(DsuMessage::MotorInfoRequest(get_registration(&mut body)?)),
        (Magic::Server, DSU_MSG_MOTOR_INFO) => {
            let header = get_slot_header(&mut body)?;
            ensure(body, 1)?;
            Ok(DsuMessage::MotorInfo {
                header,
                motor_count: body.get_u8(),
            })
        }
        (Magic::Client, DSU_MSG_RUMBLE) => {
            let registration = get_registration(&mut body)?;
            ensure(body, 2)?;
            Ok(DsuMessage::RumbleCommand {
                registration,
                motor_id: body.get_u8(),
                intensity: body.get_u8(),
            })
        }
        (magic, message_type) => Err(DecodeError::UnknownMessageType { magic, message_type }),
    }
}

fn ensure(body: &[u8], needed: usize) -> Result<(), DecodeError> {
    if body.remaining() < needed {
        return Err(DecodeError::Truncated {
            needed,
            available: body.remaining(),
        });
    }
    Ok(())
}

fn get_mac(body: &mut &[u8]) -> MacAddress {
    let mut mac = DSU_ZERO_MAC;
    body.copy_to_slice(&mut mac);
    mac
}

fn get_slot_header(body: &mut &[u8]) -> Result<SlotHeader, DecodeError> {
    ensure(body, DSU_SLOT_HEADER_SIZE)?;

    let slot = body.get_u8();
    let state = SlotState::try_from(body.get_u8())?;
    let model = DeviceModel::try_from(body.get_u8())?;
    let connection_type = WireConnectionType::try_from(body.get_u8())?;
    let mac = get_mac(body);
    let battery = BatteryStatus::try_from(body.get_u8())?;

    Ok(SlotHeader {
        slot,
        state,
        model,
        connection_type,
        mac,
        battery,
    })
}

fn get_registration(body: &mut &[u8]) -> Result<Registration, DecodeError> {
    ensure(body, DSU_REGISTRATION_BODY_SIZE)?;

    let flags = body.get_u8();
    let slot = body.get_u8();
    let mac = get_mac(body);

    Ok(Registration::from_flags(flags, slot, mac))
}

fn get_touch(body: &mut &[u8]) -> TouchPoint {
    TouchPoint {
        active: body.get_u8() != 0,
        id: body.get_u8(),
        x: body.get_u16_le(),
        y: body.get_u16_le(),
    }
}

fn get_pad_data(body: &mut &[u8]) -> Result<PadData, DecodeError> {
    ensure(body, DSU_PAD_DATA_BODY_SIZE)?;

    let header = get_slot_header(body)?;
    let connected = body.get_u8() != 0;
    let packet_counter = body.get_u32_le();

    let buttons1 = body.get_u8();
    let buttons2 = body.get_u8();
    let home = body.get_u8() != 0;
    let touch_button = body.get_u8() != 0;
    let left_stick = [body.get_u8(), body.get_u8()];
    let right_stick = [body.get_u8(), body.get_u8()];
    let dpad_analog = [body.get_u8(), body.get_u8(), body.get_u8(), body.get_u8()];
    let face_analog = [body.get_u8(), body.get_u8(), body.get_u8(), body.get_u8()];
    let analog_r1 = body.get_u8();
    let analog_l1 = body.get_u8();
    let analog_r2 = body.get_u8();
    let analog_l2 = body.get_u8();

    let touches = [get_touch(body), get_touch(body)];

    let motion_timestamp = body.get_u64_le();
    let accelerometer = [body.get_f32_le(), body.get_f32_le(), body.get_f32_le()];
    let gyroscope = [body.get_f32_le(), body.get_f32_le(), body.get_f32_le()];

    Ok(PadData {
        header,
        connected,
        packet_counter,
        buttons1,
        buttons2,
        home,
        touch_button,
        left_stick,
        right_stick,
        dpad_analog,
        face_analog,
        analog_r1,
        analog_l1,
        analog_r2,
        analog_l2,
        touches,
        motion_timestamp,
        accelerometer,
        gyroscope,
    })
}
