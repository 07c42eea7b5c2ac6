//! Encrypted packet header and decrypted message envelope

use crate::byteframe::ByteFrame;
use crate::constants::{HEADER_SIZE, MESSAGE_FOOTER, OPCODE_SIZE};
use crate::crypto::Checksums;
use crate::error::ProtocolError;

/// Cleartext header preceding every encrypted payload (14 bytes, big-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    /// Protocol flag (1 byte)
    pub pf0: u8,
    /// Multiplier for this packet's key rotation (1 byte)
    pub key_rot_delta: u8,
    /// Sender's packet counter (2 bytes)
    pub packet_num: u16,
    /// Length of the encrypted payload following the header (2 bytes)
    pub data_size: u16,
    /// Sender's combined check of the previous packet (2 bytes)
    pub prev_packet_combined_check: u16,
    pub check0: u16,
    pub check1: u16,
    pub check2: u16,
}

impl PacketHeader {
    pub const SIZE: usize = HEADER_SIZE;

    /// Decode the first 14 bytes of `bytes`; anything after is ignored
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < Self::SIZE {
            return Err(ProtocolError::PacketTooSmall {
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }

        let u16_at = |i: usize| u16::from_be_bytes([bytes[i], bytes[i + 1]]);
        Ok(Self {
            pf0: bytes[0],
            key_rot_delta: bytes[1],
            packet_num: u16_at(2),
            data_size: u16_at(4),
            prev_packet_combined_check: u16_at(6),
            check0: u16_at(8),
            check1: u16_at(10),
            check2: u16_at(12),
        })
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0] = self.pf0;
        bytes[1] = self.key_rot_delta;
        bytes[2..4].copy_from_slice(&self.packet_num.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.data_size.to_be_bytes());
        bytes[6..8].copy_from_slice(&self.prev_packet_combined_check.to_be_bytes());
        bytes[8..10].copy_from_slice(&self.check0.to_be_bytes());
        bytes[10..12].copy_from_slice(&self.check1.to_be_bytes());
        bytes[12..14].copy_from_slice(&self.check2.to_be_bytes());
        bytes
    }

    /// The three checksum components carried by this header
    pub fn checksums(&self) -> Checksums {
        Checksums {
            check0: self.check0,
            check1: self.check1,
            check2: self.check2,
        }
    }

    /// Protocol flag the client expects for a payload of `len` bytes
    pub fn pf0_for_len(len: usize) -> u8 {
        (((len >> 12) & 0xF3) | 3) as u8
    }
}

/// A decrypted message: opcode, opcode-specific body, fixed footer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub opcode: u16,
    pub body: Vec<u8>,
}

impl Envelope {
    pub fn new(opcode: u16, body: Vec<u8>) -> Self {
        Self { opcode, body }
    }

    /// Split a decrypted payload into opcode and body, checking the footer
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        let min = OPCODE_SIZE + MESSAGE_FOOTER.len();
        if payload.len() < min {
            return Err(ProtocolError::PacketTooSmall {
                expected: min,
                actual: payload.len(),
            });
        }

        let footer_at = payload.len() - MESSAGE_FOOTER.len();
        let footer = [payload[footer_at], payload[footer_at + 1]];
        if footer != MESSAGE_FOOTER {
            return Err(ProtocolError::InvalidFooter(footer));
        }

        Ok(Self {
            opcode: u16::from_be_bytes([payload[0], payload[1]]),
            body: payload[OPCODE_SIZE..footer_at].to_vec(),
        })
    }

    /// Serialize as opcode + body + footer, ready for `send_packet`
    pub fn build(&self) -> Vec<u8> {
        let mut bf = ByteFrame::new();
        bf.write_u16(self.opcode);
        bf.write_bytes(&self.body);
        bf.write_bytes(&MESSAGE_FOOTER);
        bf.into_inner()
    }

    /// A cursor over the body for opcode-specific parsing
    pub fn frame(&self) -> ByteFrame {
        ByteFrame::from_bytes(&self.body)
    }
}
