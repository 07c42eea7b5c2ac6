//! Cursor-based byte buffer used to read and write every field on the wire
//!
//! Writes land at the cursor, grow the buffer when needed and advance the
//! cursor. Reads past the end of the buffer do not return an error: they
//! unwind with a [`BufferUnderrun`] payload, and the per-connection fault
//! boundary is expected to catch it and close that connection only.

use crate::error::{BufferUnderrun, ProtocolError};

/// Byte order used by primitive reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Big,
    Little,
}

/// Reference point for [`ByteFrame::seek`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

impl Whence {
    /// Map the numeric whence values used by the `io::Seek` convention
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(Whence::Start),
            1 => Some(Whence::Current),
            2 => Some(Whence::End),
            _ => None,
        }
    }
}

/// Growable byte buffer with a read/write cursor
#[derive(Debug, Clone, Default)]
pub struct ByteFrame {
    buf: Vec<u8>,
    pos: usize,
    endian: Endian,
}

macro_rules! primitives {
    ($($ty:ty, $width:literal => $read:ident, $write:ident;)*) => {
        $(
            #[doc = concat!("Write a `", stringify!($ty), "` at the cursor")]
            pub fn $write(&mut self, value: $ty) {
                let bytes = match self.endian {
                    Endian::Big => value.to_be_bytes(),
                    Endian::Little => value.to_le_bytes(),
                };
                self.write_bytes(&bytes);
            }

            #[doc = concat!("Read a `", stringify!($ty), "` at the cursor")]
            ///
            /// # Panics
            /// Unwinds with [`BufferUnderrun`] if too few bytes remain.
            pub fn $read(&mut self) -> $ty {
                let bytes = self.take::<$width>();
                match self.endian {
                    Endian::Big => <$ty>::from_be_bytes(bytes),
                    Endian::Little => <$ty>::from_le_bytes(bytes),
                }
            }
        )*
    };
}

impl ByteFrame {
    /// Create an empty big-endian frame
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a frame holding a copy of `data`, cursor at the start
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            buf: data.to_vec(),
            pos: 0,
            endian: Endian::Big,
        }
    }

    pub fn set_little_endian(&mut self) {
        self.endian = Endian::Little;
    }

    pub fn set_big_endian(&mut self) {
        self.endian = Endian::Big;
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Current cursor offset
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes between the cursor and the end of the buffer
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// The whole buffer, regardless of cursor position
    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    /// The buffer from the cursor to the end; the cursor does not move
    pub fn data_from_current(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// Move the cursor and return the new absolute position.
    ///
    /// Targets before the start or past the end are rejected and leave the
    /// cursor where it was.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<usize, ProtocolError> {
        let base = match whence {
            Whence::Start => 0,
            Whence::Current => self.pos as i64,
            Whence::End => self.buf.len() as i64,
        };
        let target = base.saturating_add(offset);
        if target < 0 || target > self.buf.len() as i64 {
            return Err(ProtocolError::InvalidSeek {
                target,
                len: self.buf.len(),
            });
        }
        self.pos = target as usize;
        Ok(self.pos)
    }

    /// Seek with a numeric whence; unknown values leave the cursor alone
    pub fn seek_raw(&mut self, offset: i64, whence: i32) -> Result<usize, ProtocolError> {
        match Whence::from_raw(whence) {
            Some(whence) => self.seek(offset, whence),
            None => Ok(self.pos),
        }
    }

    /// Write raw bytes at the cursor, overwriting or extending the buffer
    pub fn write_bytes(&mut self, data: &[u8]) {
        let end = self.pos + data.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
    }

    /// Write `data` followed by a single `0x00`
    pub fn write_null_terminated(&mut self, data: &[u8]) {
        self.write_bytes(data);
        self.write_u8(0);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    primitives! {
        u8, 1 => read_u8, write_u8;
        u16, 2 => read_u16, write_u16;
        u32, 4 => read_u32, write_u32;
        u64, 8 => read_u64, write_u64;
        i8, 1 => read_i8, write_i8;
        i16, 2 => read_i16, write_i16;
        i32, 4 => read_i32, write_i32;
        i64, 8 => read_i64, write_i64;
        f32, 4 => read_f32, write_f32;
        f64, 8 => read_f64, write_f64;
    }

    /// Any nonzero byte reads as `true`
    pub fn read_bool(&mut self) -> bool {
        self.read_u8() != 0
    }

    /// Read the next `n` bytes verbatim.
    ///
    /// # Panics
    /// Unwinds with [`BufferUnderrun`] if fewer than `n` bytes remain.
    pub fn read_bytes(&mut self, n: usize) -> Vec<u8> {
        self.ensure(n);
        let out = self.buf[self.pos..self.pos + n].to_vec();
        self.pos += n;
        out
    }

    /// Read up to the next `0x00`, consuming the terminator.
    ///
    /// When no terminator exists before the end of the buffer the result is
    /// empty and the cursor stays put. Clients rely on this, so it is not
    /// "fixed" to return the trailing bytes.
    pub fn read_null_terminated(&mut self) -> Vec<u8> {
        let rest = &self.buf[self.pos..];
        match rest.iter().position(|&b| b == 0) {
            Some(idx) => {
                let out = rest[..idx].to_vec();
                self.pos += idx + 1;
                out
            }
            None => Vec::new(),
        }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        self.ensure(N);
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn ensure(&self, requested: usize) {
        let available = self.remaining();
        if requested > available {
            std::panic::panic_any(BufferUnderrun {
                requested,
                available,
                position: self.pos,
            });
        }
    }
}
