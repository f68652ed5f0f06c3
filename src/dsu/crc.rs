//! # CRC-32 Implementation
//!
//! CRC-32 (IEEE 802.3, as used by zlib) checksum calculation for DSU packets.
//!
//! **Polynomial**: 0xEDB88320 (reflected form of 0x04C11DB7)
//! **Initial Value**: 0xFFFFFFFF, final XOR 0xFFFFFFFF

use super::protocol::{DSU_CRC_OFFSET, DSU_HEADER_SIZE};

/// CRC-32 polynomial (reflected)
const CRC32_POLY: u32 = 0xEDB8_8320;

/// Precomputed CRC32 lookup table for fast calculation
const CRC32_TABLE: [u32; 256] = generate_crc32_table();

/// Generate CRC32 lookup table at compile time
const fn generate_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;

        while j < 8 {
            if (crc & 1) != 0 {
                crc = (crc >> 1) ^ CRC32_POLY;
            } else {
                crc >>= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// Calculate the CRC-32 checksum of `data` using the lookup table
///
/// # Examples
///
/// ```
/// use dsu_server::dsu::crc::crc32;
///
/// assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
/// ```
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;

    for &byte in data {
        crc = CRC32_TABLE[((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8);
    }

    !crc
}

/// Calculate the checksum of a complete DSU packet
///
/// The four checksum bytes of the header are treated as zero, so this gives
/// the same answer whether or not the field has already been filled in.
///
/// # Arguments
///
/// * `packet` - Complete packet bytes (header + message type + body)
pub fn packet_checksum(packet: &[u8]) -> u32 {
    if packet.len() < DSU_HEADER_SIZE {
        return crc32(packet);
    }

    let mut crc: u32 = 0xFFFF_FFFF;

    for (index, &byte) in packet.iter().enumerate() {
        let byte = if (DSU_CRC_OFFSET..DSU_CRC_OFFSET + 4).contains(&index) {
            0
        } else {
            byte
        };
        crc = CRC32_TABLE[((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8);
    }

    !crc
}

/// Calculate CRC-32 bit by bit (slow, for verification)
#[allow(dead_code)]
fn crc32_slow(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;

    for &byte in data {
        crc ^= byte as u32;

        for _ in 0..8 {
            if (crc & 1) != 0 {
                crc = (crc >> 1) ^ CRC32_POLY;
            } else {
                crc >>= 1;
            }
        }
    }

    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_empty() {
        assert_eq!(crc32(&[]), 0x0000_0000);
    }

    #[test]
    fn test_crc32_check_value() {
        // Standard CRC-32 check value
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32_slow(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_crc32_lookup_table_matches_slow() {
        let test_data = [
            b"DSUS".to_vec(),
            vec![0x00; 20],
            vec![0xFF; 100],
            vec![0x44, 0x53, 0x55, 0x43, 0xE9, 0x03, 0x04, 0x00],
        ];

        for data in test_data.iter() {
            assert_eq!(crc32(data), crc32_slow(data), "CRC mismatch for data: {:?}", data);
        }
    }

    #[test]
    fn test_packet_checksum_ignores_crc_field() {
        let mut packet = vec![0u8; 24];
        packet[..4].copy_from_slice(b"DSUS");
        packet[20] = 0x42;

        let before = packet_checksum(&packet);
        packet[DSU_CRC_OFFSET..DSU_CRC_OFFSET + 4].copy_from_slice(&[1, 2, 3, 4]);
        let after = packet_checksum(&packet);

        assert_eq!(before, after);

        packet[DSU_CRC_OFFSET..DSU_CRC_OFFSET + 4].copy_from_slice(&[0, 0, 0, 0]);
        assert_eq!(before, crc32(&packet));
    }

    #[test]
    fn test_packet_checksum_changes_with_data() {
        let mut packet = vec![0u8; DSU_HEADER_SIZE + 4];
        let crc1 = packet_checksum(&packet);
        packet[DSU_HEADER_SIZE] = 1;
        let crc2 = packet_checksum(&packet);

        assert_ne!(crc1, crc2, "CRC should change when data changes");
    }
}
