//! Wyvern Protocol Library
//!
//! Binary transport and codec stack shared by the game server and its test
//! clients: the `ByteFrame` cursor every message field is read and written
//! through, the encrypted packet framing (`CryptConn`), and the two codecs
//! applied to persisted save-data blobs (`nullcomp`, `deltacomp`).

pub mod byteframe;
pub mod conn;
pub mod constants;
pub mod crypto;
pub mod deltacomp;
pub mod error;
pub mod nullcomp;
pub mod packets;

pub use byteframe::{ByteFrame, Endian, Whence};
pub use conn::{CryptConn, CryptReader, CryptWriter, Ratchet};
pub use constants::*;
pub use crypto::{Checksums, Cipher, CipherTables, DeltaSource, TableCipher, rotate_key};
pub use error::{BufferUnderrun, CompressionError, PatchError, ProtocolError};
pub use packets::{Envelope, PacketHeader};
