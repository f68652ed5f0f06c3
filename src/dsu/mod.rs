//! # DSU Protocol Module
//!
//! Implementation of the DSU (cemuhook) UDP protocol used by emulators to
//! receive controller input, motion and rumble information.
//!
//! ## Protocol Overview
//!
//! - Transport: UDP, default port 26760
//! - Byte order: little-endian
//! - Integrity: CRC-32 over the whole packet with the checksum field zeroed
//!
//! ## Modules
//!
//! - `protocol`: Constants, wire enums and message types
//! - `encoder`: Packet serialisation
//! - `decoder`: Packet parsing and validation
//! - `crc`: CRC-32 checksum

pub mod crc;
pub mod decoder;
pub mod encoder;
pub mod protocol;

pub use decoder::{decode_packet, DecodeError};
pub use encoder::{encode_packet, encode_server_message};
pub use protocol::{DsuMessage, DsuPacket, MacAddress, PadData, Registration, SlotHeader};
