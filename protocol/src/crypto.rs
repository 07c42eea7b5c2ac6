//! Keyed byte transform, checksums and key rotation for the packet layer
//!
//! The transform is a chained substitution cipher: every output byte depends
//! on a per-byte derived key, a substitution permutation, a shared key table
//! indexed by the previous plaintext byte, and the payload length. The two
//! 256-byte tables come from the client and are loaded at startup; the
//! algorithm around them is fixed. Anything that needs a different transform
//! can implement [`Cipher`] and hand it to the connection.

use crate::constants::{CRYPT_KEY_MODULUS, DEFAULT_KEY_ROT_DELTA, DERIVED_KEY_MULTIPLIER};
use crate::error::ProtocolError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};

/// Table size for every substitution/key table
pub const TABLE_SIZE: usize = 256;

/// Advance a direction's rotating key after one packet.
///
/// `key' = delta * (key + 1)`, wrapping at 32 bits.
pub fn rotate_key(key_rot: u32, delta: u8) -> u32 {
    u32::from(delta).wrapping_mul(key_rot.wrapping_add(1))
}

/// The three checksum components produced while transforming a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Checksums {
    pub check0: u16,
    pub check1: u16,
    pub check2: u16,
}

impl Checksums {
    /// Fold this packet into the direction's checksum chain.
    ///
    /// `prev` is the combined check of the packet before it, so a dropped,
    /// altered or reordered packet changes every later value.
    pub fn combine(&self, prev: u16, packet_num: u16, data_size: u16) -> u16 {
        prev.rotate_left(1)
            .wrapping_add(packet_num)
            .wrapping_add(data_size)
            .wrapping_add(self.check0)
            .wrapping_add(self.check1)
            .wrapping_add(self.check2)
    }
}

/// A keyed, self-inverse payload transform.
///
/// `decrypt(encrypt(data, k), k)` must return `data` together with the same
/// checksums `encrypt` produced.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, data: &[u8], key_rot: u32) -> (Vec<u8>, Checksums);
    fn decrypt(&self, data: &[u8], key_rot: u32) -> (Vec<u8>, Checksums);
}

/// Substitution and shared-key tables for [`TableCipher`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherTables {
    encrypt: [u8; TABLE_SIZE],
    decrypt: [u8; TABLE_SIZE],
    shared: [u8; TABLE_SIZE],
}

impl CipherTables {
    /// Size of a table file: substitution table followed by shared key table
    pub const FILE_SIZE: usize = TABLE_SIZE * 2;

    /// Build tables from a substitution permutation and a shared key table.
    /// The inverse permutation is derived here.
    pub fn new(encrypt: [u8; TABLE_SIZE], shared: [u8; TABLE_SIZE]) -> Result<Self, ProtocolError> {
        let mut decrypt = [0u8; TABLE_SIZE];
        let mut seen = [false; TABLE_SIZE];
        for (i, &value) in encrypt.iter().enumerate() {
            if seen[value as usize] {
                return Err(ProtocolError::InvalidCipherTables(format!(
                    "substitution table maps more than one index to {:#04x}",
                    value
                )));
            }
            seen[value as usize] = true;
            decrypt[value as usize] = i as u8;
        }

        Ok(Self {
            encrypt,
            decrypt,
            shared,
        })
    }

    /// Parse a 512-byte table file
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != Self::FILE_SIZE {
            return Err(ProtocolError::InvalidCipherTables(format!(
                "expected {} bytes, got {}",
                Self::FILE_SIZE,
                bytes.len()
            )));
        }

        let mut encrypt = [0u8; TABLE_SIZE];
        let mut shared = [0u8; TABLE_SIZE];
        encrypt.copy_from_slice(&bytes[..TABLE_SIZE]);
        shared.copy_from_slice(&bytes[TABLE_SIZE..]);
        Self::new(encrypt, shared)
    }

    /// Deterministic tables for tests and local runs.
    ///
    /// These do not match any client build; real deployments configure the
    /// table file extracted from the client they serve.
    pub fn development() -> Self {
        let mut encrypt = [0u8; TABLE_SIZE];
        let mut decrypt = [0u8; TABLE_SIZE];
        let mut shared = [0u8; TABLE_SIZE];
        for i in 0..TABLE_SIZE {
            // 167 is odd, so this is a permutation of 0..=255
            let sub = (i * 167 + 0x5A) as u8;
            encrypt[i] = sub;
            decrypt[sub as usize] = i as u8;
            shared[i] = ((i * 73) as u8) ^ 0xA5;
        }
        Self {
            encrypt,
            decrypt,
            shared,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::FILE_SIZE);
        bytes.extend_from_slice(&self.encrypt);
        bytes.extend_from_slice(&self.shared);
        bytes
    }
}

/// The client's table-driven cipher
#[derive(Debug, Clone)]
pub struct TableCipher {
    tables: CipherTables,
}

impl TableCipher {
    pub fn new(tables: CipherTables) -> Self {
        Self { tables }
    }

    /// Starting value of the per-byte key sequence for one payload
    fn derived_key(len: usize, key_rot: u32) -> u32 {
        let byte_key = ((key_rot >> 1) % CRYPT_KEY_MODULUS) & 0xFF;
        (len as u32).wrapping_mul(byte_key + 1)
    }

    fn next_key(key: u32) -> u32 {
        DERIVED_KEY_MULTIPLIER.wrapping_mul(key.wrapping_add(1))
    }
}

/// Accumulators folded into the three 16-bit checks
#[derive(Default)]
struct Accumulators([u32; 3]);

impl Accumulators {
    fn update(&mut self, i: usize, sub: u8, idx: u8, prev: u8, plain: u8) {
        let [acc0, acc1, acc2] = &mut self.0;
        *acc0 = acc0.wrapping_add(u32::from(sub) << (i & 7));
        *acc1 = acc1.wrapping_add(u32::from(idx));
        *acc2 = acc2.wrapping_add(u32::from(prev) * u32::from(plain));
    }

    fn finish(self) -> Checksums {
        let fold = |acc: u32| ((acc >> 16) ^ acc) as u16;
        Checksums {
            check0: fold(self.0[0]),
            check1: fold(self.0[1]),
            check2: fold(self.0[2]),
        }
    }
}

impl Cipher for TableCipher {
    fn encrypt(&self, data: &[u8], key_rot: u32) -> (Vec<u8>, Checksums) {
        let mut key = Self::derived_key(data.len(), key_rot);
        let mut prev = 1u8;
        let mut acc = Accumulators::default();
        let mut out = Vec::with_capacity(data.len());

        for (i, &plain) in data.iter().enumerate() {
            let idx = (key >> 10) as u8 ^ plain;
            let sub = self.tables.encrypt[idx as usize];
            acc.update(i, sub, idx, prev, plain);
            out.push(self.tables.shared[prev as usize] ^ sub);
            prev = plain;
            key = Self::next_key(key);
        }

        (out, acc.finish())
    }

    fn decrypt(&self, data: &[u8], key_rot: u32) -> (Vec<u8>, Checksums) {
        let mut key = Self::derived_key(data.len(), key_rot);
        let mut prev = 1u8;
        let mut acc = Accumulators::default();
        let mut out = Vec::with_capacity(data.len());

        for (i, &byte) in data.iter().enumerate() {
            let sub = byte ^ self.tables.shared[prev as usize];
            let idx = self.tables.decrypt[sub as usize];
            let plain = (key >> 10) as u8 ^ idx;
            acc.update(i, sub, idx, prev, plain);
            out.push(plain);
            prev = plain;
            key = Self::next_key(key);
        }

        (out, acc.finish())
    }
}

impl Default for TableCipher {
    fn default() -> Self {
        Self::new(CipherTables::development())
    }
}

/// Where each outgoing packet's `KeyRotDelta` comes from.
///
/// Shared between connections behind an `Arc`, so the random variant keeps
/// its generator behind a mutex. Tests seed it for reproducible sessions.
#[derive(Debug)]
pub enum DeltaSource {
    Fixed(u8),
    Random(Mutex<StdRng>),
}

impl DeltaSource {
    pub fn fixed(delta: u8) -> Self {
        DeltaSource::Fixed(delta)
    }

    pub fn seeded(seed: u64) -> Self {
        DeltaSource::Random(Mutex::new(StdRng::seed_from_u64(seed)))
    }

    pub fn from_entropy() -> Self {
        DeltaSource::Random(Mutex::new(StdRng::from_entropy()))
    }

    /// Delta for the next packet; random deltas are drawn from 1..=7
    pub fn next_delta(&self) -> u8 {
        match self {
            DeltaSource::Fixed(delta) => *delta,
            DeltaSource::Random(rng) => rng
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .gen_range(1..=7),
        }
    }
}

impl Default for DeltaSource {
    fn default() -> Self {
        DeltaSource::Fixed(DEFAULT_KEY_ROT_DELTA)
    }
}
