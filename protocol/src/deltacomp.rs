//! Incremental binary patches the client sends instead of a full save blob
//!
//! A patch is a sequence of operations:
//!
//! ```text
//! count(match) count(diff) literal[diff - 1]
//! ```
//!
//! where `count` is one byte, or `0x00` followed by a big-endian u16 for
//! longer runs. The write offset moves forward by `match - 1` before the
//! literal is copied over the base and by `(diff - 1) - 1` after it. The
//! off-by-one steps are how the client encodes its patches.
//!
//! The result never grows past [`MAX_BLOB_SIZE`].

use crate::constants::MAX_BLOB_SIZE;
use crate::error::PatchError;

/// Bounds-checked reader over a patch
struct PatchReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PatchReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], PatchError> {
        let available = self.data.len() - self.pos;
        if n > available {
            return Err(PatchError::Truncated {
                offset: self.pos,
                needed: n - available,
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, PatchError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, PatchError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// One-byte count, or the two-byte escape when the first byte is zero
    fn read_count(&mut self) -> Result<i64, PatchError> {
        match self.read_u8()? {
            0 => Ok(i64::from(self.read_u16()?)),
            n => Ok(i64::from(n)),
        }
    }
}

/// Apply one patch to `base`, returning the patched blob.
///
/// An empty patch returns `base` unchanged. The result grows, zero-filled,
/// when a literal runs past the end of the base.
pub fn apply_patch(patch: &[u8], base: &[u8]) -> Result<Vec<u8>, PatchError> {
    let mut out = base.to_vec();
    let mut reader = PatchReader::new(patch);
    let mut offset: i64 = 0;

    while !reader.is_empty() {
        offset += reader.read_count()? - 1;
        let literal_len = reader.read_count()? - 1;
        let literal = reader.read_bytes(literal_len.max(0) as usize)?;

        if offset < 0 {
            return Err(PatchError::NegativeOffset { offset });
        }
        let start = offset as usize;
        let end = start + literal.len();
        if end > MAX_BLOB_SIZE {
            return Err(PatchError::TooLarge {
                size: end,
                max: MAX_BLOB_SIZE,
            });
        }
        if end > out.len() {
            out.resize(end, 0);
        }
        out[start..end].copy_from_slice(literal);

        offset += literal_len - 1;
    }

    Ok(out)
}

/// Apply patches in the order the client sent them
pub fn apply_patches<'a, I>(patches: I, base: &[u8]) -> Result<Vec<u8>, PatchError>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut blob = base.to_vec();
    for patch in patches {
        blob = apply_patch(patch, &blob)?;
    }
    Ok(blob)
}
