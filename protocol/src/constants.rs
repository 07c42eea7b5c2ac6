//! Protocol constants shared by both peers

/// Initial key rotation value for both directions of every connection.
///
/// Fixed by the client; never configurable per deployment.
pub const KEY_ROT_INIT: u32 = 995117;

/// Key rotation delta the server uses when no other source is configured
pub const DEFAULT_KEY_ROT_DELTA: u8 = 3;

/// Size of the encrypted packet header on the wire
pub const HEADER_SIZE: usize = 14;

/// Largest payload a single packet can carry (`DataSize` is a u16)
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Bytes the client sends once, before the first framed packet
pub const PREAMBLE: [u8; 8] = [0u8; 8];

/// Footer terminating every decrypted message payload
pub const MESSAGE_FOOTER: [u8; 2] = [0x00, 0x10];

/// Size of the opcode at the start of every decrypted message payload
pub const OPCODE_SIZE: usize = 2;

/// Header prefixed to every nullcomp-compressed blob
pub const NULLCOMP_HEADER: &[u8; 16] = b"cmp\x2020110113\x20\x20\x20\x00";

/// Largest decompressed save-data blob accepted from a patch or a stored row.
///
/// Client blobs stay under 150 KB.
pub const MAX_BLOB_SIZE: usize = 1 << 20;

/// Modulus applied when truncating the rotating key to a byte key
pub const CRYPT_KEY_MODULUS: u32 = 999983;

/// Multiplier of the per-byte derived key sequence
pub const DERIVED_KEY_MULTIPLIER: u32 = 0x4FD;
