//! Protocol error types

use std::any::Any;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Packet too small: expected at least {expected}, got {actual}")]
    PacketTooSmall { expected: usize, actual: usize },

    #[error("Packet too large: maximum {max}, got {actual}")]
    PacketTooLarge { max: usize, actual: usize },

    #[error("Invalid message footer: {0:02x?}")]
    InvalidFooter([u8; 2]),

    #[error("Checksum mismatch on packet {packet_num}")]
    ChecksumMismatch { packet_num: u16 },

    #[error("Checksum chain broken: expected previous check {expected:#06x}, got {actual:#06x}")]
    ChainMismatch { expected: u16, actual: u16 },

    #[error("Seek out of range: target {target}, buffer length {len}")]
    InvalidSeek { target: i64, len: usize },

    #[error("Invalid cipher tables: {0}")]
    InvalidCipherTables(String),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Map a stream error, folding EOF into [`ProtocolError::ConnectionClosed`]
    pub fn from_read(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ProtocolError::ConnectionClosed
        } else {
            ProtocolError::Io(err)
        }
    }
}

/// Errors from the nullcomp blob codec
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CompressionError {
    #[error("Zero-run marker at offset {offset} is missing its count byte")]
    TruncatedRun { offset: usize },

    #[error("Decompressed blob would be {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },
}

/// Errors from applying a deltacomp patch
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PatchError {
    #[error("Patch truncated at offset {offset}: needed {needed} more bytes")]
    Truncated { offset: usize, needed: usize },

    #[error("Patch moved the write offset before the start of the blob ({offset})")]
    NegativeOffset { offset: i64 },

    #[error("Patched blob would be {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },
}

/// Panic payload raised when a [`crate::byteframe::ByteFrame`] read runs
/// past the end of its buffer.
///
/// Connection supervisors catch the unwind and use [`BufferUnderrun::from_panic`]
/// to tell a malformed packet apart from any other fault.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Read of {requested} bytes at offset {position} with only {available} available")]
pub struct BufferUnderrun {
    pub requested: usize,
    pub available: usize,
    pub position: usize,
}

impl BufferUnderrun {
    /// Recover the underrun from a caught panic payload, if that is what it was
    pub fn from_panic(payload: &(dyn Any + Send)) -> Option<BufferUnderrun> {
        payload.downcast_ref::<BufferUnderrun>().copied()
    }
}
