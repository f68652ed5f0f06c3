//! # DSU Protocol Constants and Types
//!
//! Core protocol definitions for DSU (cemuhook) communication. Every packet is
//! a 16-byte header followed by a 4-byte message type and a type-specific body:
//!
//! ```text
//! magic(4) | version(2) | length(2) | crc32(4) | sender id(4) | type(4) | body
//! ```
//!
//! All multi-byte fields are little-endian. `length` counts the bytes after the
//! header, message type included.

use super::decoder::DecodeError;

/// Magic for packets sent by the server
pub const DSU_MAGIC_SERVER: [u8; 4] = *b"DSUS";

/// Magic for packets sent by clients
pub const DSU_MAGIC_CLIENT: [u8; 4] = *b"DSUC";

/// Protocol version spoken by this server
pub const DSU_PROTOCOL_VERSION: u16 = 1001;

/// Header size (magic + version + length + crc + id)
pub const DSU_HEADER_SIZE: usize = 16;

/// Offset of the CRC32 field within the header
pub const DSU_CRC_OFFSET: usize = 8;

/// Size of the message type field that follows the header
pub const DSU_MESSAGE_TYPE_SIZE: usize = 4;

/// Protocol version information
pub const DSU_MSG_VERSION: u32 = 0x0010_0000;

/// Connected controllers information
pub const DSU_MSG_PORT_INFO: u32 = 0x0010_0001;

/// Controller input data
pub const DSU_MSG_PAD_DATA: u32 = 0x0010_0002;

/// Rumble motor information (unofficial)
pub const DSU_MSG_MOTOR_INFO: u32 = 0x0011_0001;

/// Rumble motor command (unofficial, client only)
pub const DSU_MSG_RUMBLE: u32 = 0x0011_0002;

/// Shared slot header size (slot, state, model, connection, mac, battery)
pub const DSU_SLOT_HEADER_SIZE: usize = 11;

/// Port info body size (slot header + one zero byte)
pub const DSU_PORT_INFO_BODY_SIZE: usize = 12;

/// Registration body size (flags + slot + mac)
pub const DSU_REGISTRATION_BODY_SIZE: usize = 8;

/// Pad data body size
pub const DSU_PAD_DATA_BODY_SIZE: usize = 80;

/// Slot indices that fit the one-byte wire field
pub const DSU_MAX_REPORTED_SLOTS: u32 = 256;

/// Largest datagram the server expects to receive
pub const DSU_MAX_DATAGRAM_SIZE: usize = 2048;

/// Six-byte controller identifier
pub type MacAddress = [u8; 6];

/// MAC value meaning "no MAC"
pub const DSU_ZERO_MAC: MacAddress = [0; 6];

/// Packet direction, distinguished by the magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    /// `DSUS`
    Server,
    /// `DSUC`
    Client,
}

impl Magic {
    pub fn bytes(self) -> [u8; 4] {
        match self {
            Magic::Server => DSU_MAGIC_SERVER,
            Magic::Client => DSU_MAGIC_CLIENT,
        }
    }

    pub fn from_bytes(bytes: [u8; 4]) -> Option<Self> {
        match bytes {
            DSU_MAGIC_SERVER => Some(Magic::Server),
            DSU_MAGIC_CLIENT => Some(Magic::Client),
            _ => None,
        }
    }
}

/// Slot state as reported on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SlotState {
    #[default]
    Disconnected = 0,
    Reserved = 1,
    Connected = 2,
}

/// Device model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DeviceModel {
    NotApplicable = 0,
    PartialGyro = 1,
    #[default]
    FullGyro = 2,
}

/// Connection type as reported on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum WireConnectionType {
    #[default]
    NotApplicable = 0,
    Usb = 1,
    Bluetooth = 2,
}

/// Battery status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum BatteryStatus {
    NotApplicable = 0x00,
    Dying = 0x01,
    Low = 0x02,
    Medium = 0x03,
    High = 0x04,
    #[default]
    Full = 0x05,
    Charging = 0xEE,
    Charged = 0xEF,
}

macro_rules! wire_enum_try_from {
    ($ty:ident, $field:literal, { $($value:literal => $variant:ident),+ $(,)? }) => {
        impl TryFrom<u8> for $ty {
            type Error = DecodeError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok($ty::$variant),)+
                    other => Err(DecodeError::InvalidField { field: $field, value: other }),
                }
            }
        }
    };
}

wire_enum_try_from!(SlotState, "slot state", { 0 => Disconnected, 1 => Reserved, 2 => Connected });
wire_enum_try_from!(DeviceModel, "device model", { 0 => NotApplicable, 1 => PartialGyro, 2 => FullGyro });
wire_enum_try_from!(WireConnectionType, "connection type", { 0 => NotApplicable, 1 => Usb, 2 => Bluetooth });
wire_enum_try_from!(BatteryStatus, "battery status", {
    0x00 => NotApplicable,
    0x01 => Dying,
    0x02 => Low,
    0x03 => Medium,
    0x04 => High,
    0x05 => Full,
    0xEE => Charging,
    0xEF => Charged,
});

/// The 11 bytes every per-slot response begins with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotHeader {
    pub slot: u8,
    pub state: SlotState,
    pub model: DeviceModel,
    pub connection_type: WireConnectionType,
    pub mac: MacAddress,
    pub battery: BatteryStatus,
}

impl SlotHeader {
    /// Header reporting `slot` as disconnected with every other field zeroed
    pub fn disconnected(slot: u8) -> Self {
        Self {
            slot,
            state: SlotState::Disconnected,
            model: DeviceModel::NotApplicable,
            connection_type: WireConnectionType::NotApplicable,
            mac: DSU_ZERO_MAC,
            battery: BatteryStatus::NotApplicable,
        }
    }
}

/// Subscription target of a pad data or motor request
///
/// A request with neither flag set registers for every slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Registration {
    pub by_slot: bool,
    pub by_mac: bool,
    pub slot: u8,
    pub mac: MacAddress,
}

impl Registration {
    /// Flag bit for slot-based registration
    pub const FLAG_SLOT: u8 = 0x01;
    /// Flag bit for MAC-based registration
    pub const FLAG_MAC: u8 = 0x02;

    pub fn all() -> Self {
        Self::default()
    }

    pub fn slot(slot: u8) -> Self {
        Self {
            by_slot: true,
            slot,
            ..Self::default()
        }
    }

    pub fn mac(mac: MacAddress) -> Self {
        Self {
            by_mac: true,
            mac,
            ..Self::default()
        }
    }

    pub fn is_all(&self) -> bool {
        !self.by_slot && !self.by_mac
    }

    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.by_slot {
            flags |= Self::FLAG_SLOT;
        }
        if self.by_mac {
            flags |= Self::FLAG_MAC;
        }
        flags
    }

    pub fn from_flags(flags: u8, slot: u8, mac: MacAddress) -> Self {
        Self {
            by_slot: flags & Self::FLAG_SLOT != 0,
            by_mac: flags & Self::FLAG_MAC != 0,
            slot,
            mac,
        }
    }
}

/// One touchpad contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TouchPoint {
    pub active: bool,
    pub id: u8,
    pub x: u16,
    pub y: u16,
}

/// Full input report for one slot
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PadData {
    pub header: SlotHeader,
    pub connected: bool,
    pub packet_counter: u32,
    /// D-pad Left 0x80, Down 0x40, Right 0x20, Up 0x10, Options 0x08, R3 0x04, L3 0x02, Share 0x01
    pub buttons1: u8,
    /// Square 0x80, Cross 0x40, Circle 0x20, Triangle 0x10, R1 0x08, L1 0x04, R2 0x02, L2 0x01
    pub buttons2: u8,
    pub home: bool,
    pub touch_button: bool,
    /// X, Y
    pub left_stick: [u8; 2],
    /// X, Y
    pub right_stick: [u8; 2],
    /// Left, Down, Right, Up
    pub dpad_analog: [u8; 4],
    /// Triangle (Y), Circle (B), Cross (A), Square (X)
    pub face_analog: [u8; 4],
    pub analog_r1: u8,
    pub analog_l1: u8,
    pub analog_r2: u8,
    pub analog_l2: u8,
    pub touches: [TouchPoint; 2],
    /// Microseconds
    pub motion_timestamp: u64,
    pub accelerometer: [f32; 3],
    /// Pitch, yaw, roll
    pub gyroscope: [f32; 3],
}

/// DSU message body, one variant per message type and direction
#[derive(Debug, Clone, PartialEq)]
pub enum DsuMessage {
    VersionRequest,
    VersionResponse { version: u16 },
    PortInfoRequest { slots: Vec<u8> },
    PortInfo(SlotHeader),
    PadDataRequest(Registration),
    PadData(PadData),
    MotorInfoRequest(Registration),
    MotorInfo { header: SlotHeader, motor_count: u8 },
    RumbleCommand { registration: Registration, motor_id: u8, intensity: u8 },
}

impl DsuMessage {
    /// Wire message type code
    pub fn message_type(&self) -> u32 {
        match self {
            DsuMessage::VersionRequest | DsuMessage::VersionResponse { .. } => DSU_MSG_VERSION,
            DsuMessage::PortInfoRequest { .. } | DsuMessage::PortInfo(_) => DSU_MSG_PORT_INFO,
            DsuMessage::PadDataRequest(_) | DsuMessage::PadData(_) => DSU_MSG_PAD_DATA,
            DsuMessage::MotorInfoRequest(_) | DsuMessage::MotorInfo { .. } => DSU_MSG_MOTOR_INFO,
            DsuMessage::RumbleCommand { .. } => DSU_MSG_RUMBLE,
        }
    }

    /// Direction this message travels in
    pub fn magic(&self) -> Magic {
        match self {
            DsuMessage::VersionRequest
            | DsuMessage::PortInfoRequest { .. }
            | DsuMessage::PadDataRequest(_)
            | DsuMessage::MotorInfoRequest(_)
            | DsuMessage::RumbleCommand { .. } => Magic::Client,
            DsuMessage::VersionResponse { .. }
            | DsuMessage::PortInfo(_)
            | DsuMessage::PadData(_)
            | DsuMessage::MotorInfo { .. } => Magic::Server,
        }
    }
}

/// A complete decoded packet
#[derive(Debug, Clone, PartialEq)]
pub struct DsuPacket {
    pub protocol_version: u16,
    pub sender_id: u32,
    pub message: DsuMessage,
}

impl DsuPacket {
    /// Packet carrying `message` at the current protocol version
    pub fn new(sender_id: u32, message: DsuMessage) -> Self {
        Self {
            protocol_version: DSU_PROTOCOL_VERSION,
            sender_id,
            message,
        }
    }
}
