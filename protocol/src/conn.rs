//! Encrypted, checksum-chained packet transport over a duplex byte stream
//!
//! Each direction owns its own ratchet: a rotating key, the combined check
//! of its last packet and a packet counter. [`CryptConn::into_split`] hands
//! the two directions to separate tasks; neither half can touch the other's
//! state, so one reader task and one writer task never need a shared lock.

use crate::constants::{KEY_ROT_INIT, MAX_PAYLOAD_SIZE};
use crate::crypto::{Cipher, DeltaSource, TableCipher, rotate_key};
use crate::error::ProtocolError;
use crate::packets::PacketHeader;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::{trace, warn};

/// Per-direction ratchet state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ratchet {
    pub key_rot: u32,
    pub prev_combined_check: u16,
    pub packets: u32,
}

impl Default for Ratchet {
    fn default() -> Self {
        Self {
            key_rot: KEY_ROT_INIT,
            prev_combined_check: 0,
            packets: 0,
        }
    }
}

/// Sending half: frames, encrypts and writes packets
pub struct CryptWriter<W> {
    inner: W,
    state: Ratchet,
    cipher: Arc<dyn Cipher>,
    deltas: Arc<DeltaSource>,
}

impl<W: AsyncWrite + Unpin> CryptWriter<W> {
    pub fn new(inner: W, cipher: Arc<dyn Cipher>, deltas: Arc<DeltaSource>) -> Self {
        Self {
            inner,
            state: Ratchet::default(),
            cipher,
            deltas,
        }
    }

    /// Encrypt `data` and write it as one framed packet.
    ///
    /// The ratchet only advances once the whole packet has been written.
    pub async fn send_packet(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        let data_size = u16::try_from(data.len()).map_err(|_| ProtocolError::PacketTooLarge {
            max: MAX_PAYLOAD_SIZE,
            actual: data.len(),
        })?;

        let delta = self.deltas.next_delta();
        let (encrypted, checks) = self.cipher.encrypt(data, self.state.key_rot);
        let packet_num = self.state.packets as u16;

        let header = PacketHeader {
            pf0: PacketHeader::pf0_for_len(encrypted.len()),
            key_rot_delta: delta,
            packet_num,
            data_size,
            prev_packet_combined_check: self.state.prev_combined_check,
            check0: checks.check0,
            check1: checks.check1,
            check2: checks.check2,
        };

        let mut frame = Vec::with_capacity(PacketHeader::SIZE + encrypted.len());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(&encrypted);
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;

        trace!(packet_num, data_size, delta, "sent packet");

        self.state.prev_combined_check =
            checks.combine(self.state.prev_combined_check, packet_num, data_size);
        self.state.key_rot = rotate_key(self.state.key_rot, delta);
        self.state.packets = self.state.packets.wrapping_add(1);
        Ok(())
    }

    pub fn key_rot(&self) -> u32 {
        self.state.key_rot
    }

    pub fn sent_packets(&self) -> u32 {
        self.state.packets
    }

    pub fn state(&self) -> Ratchet {
        self.state
    }

    /// Flush and shut down the write side of the stream
    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Receiving half: reads, verifies and decrypts packets
pub struct CryptReader<R> {
    inner: R,
    state: Ratchet,
    cipher: Arc<dyn Cipher>,
}

impl<R: AsyncRead + Unpin> CryptReader<R> {
    pub fn new(inner: R, cipher: Arc<dyn Cipher>) -> Self {
        Self {
            inner,
            state: Ratchet::default(),
            cipher,
        }
    }

    /// Read the next packet and return its decrypted payload.
    ///
    /// Fails on EOF, on a broken checksum chain, or when the decrypted
    /// payload does not reproduce the checks in the header. The ratchet does
    /// not advance on failure, and the connection should be dropped.
    pub async fn read_packet(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let mut header_bytes = [0u8; PacketHeader::SIZE];
        self.inner
            .read_exact(&mut header_bytes)
            .await
            .map_err(ProtocolError::from_read)?;
        let header = PacketHeader::decode(&header_bytes)?;

        let mut body = vec![0u8; header.data_size as usize];
        self.inner
            .read_exact(&mut body)
            .await
            .map_err(ProtocolError::from_read)?;

        if header.prev_packet_combined_check != self.state.prev_combined_check {
            warn!(
                packet_num = header.packet_num,
                expected = self.state.prev_combined_check,
                actual = header.prev_packet_combined_check,
                "checksum chain broken"
            );
            return Err(ProtocolError::ChainMismatch {
                expected: self.state.prev_combined_check,
                actual: header.prev_packet_combined_check,
            });
        }

        let (decrypted, checks) = self.cipher.decrypt(&body, self.state.key_rot);
        if checks != header.checksums() {
            warn!(
                packet_num = header.packet_num,
                key_rot = self.state.key_rot,
                "decrypted data checksum doesn't match header"
            );
            return Err(ProtocolError::ChecksumMismatch {
                packet_num: header.packet_num,
            });
        }

        trace!(
            packet_num = header.packet_num,
            data_size = header.data_size,
            delta = header.key_rot_delta,
            "received packet"
        );

        self.state.prev_combined_check =
            checks.combine(self.state.prev_combined_check, header.packet_num, header.data_size);
        self.state.key_rot = rotate_key(self.state.key_rot, header.key_rot_delta);
        self.state.packets = self.state.packets.wrapping_add(1);
        Ok(decrypted)
    }

    pub fn key_rot(&self) -> u32 {
        self.state.key_rot
    }

    pub fn received_packets(&self) -> u32 {
        self.state.packets
    }

    pub fn state(&self) -> Ratchet {
        self.state
    }
}

/// Both directions of one connection
pub struct CryptConn<R, W> {
    reader: CryptReader<R>,
    writer: CryptWriter<W>,
}

impl<S: AsyncRead + AsyncWrite> CryptConn<ReadHalf<S>, WriteHalf<S>> {
    /// Wrap a duplex stream with the default cipher and delta source
    pub fn new(stream: S) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self::from_parts(read, write)
    }
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> CryptConn<R, W> {
    /// Wrap already-split stream halves, e.g. `TcpStream::into_split`
    pub fn from_parts(read: R, write: W) -> Self {
        let cipher: Arc<dyn Cipher> = Arc::new(TableCipher::default());
        Self {
            reader: CryptReader::new(read, cipher.clone()),
            writer: CryptWriter::new(write, cipher, Arc::new(DeltaSource::default())),
        }
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.reader.cipher = cipher.clone();
        self.writer.cipher = cipher;
        self
    }

    pub fn with_delta_source(mut self, deltas: Arc<DeltaSource>) -> Self {
        self.writer.deltas = deltas;
        self
    }

    pub async fn send_packet(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.writer.send_packet(data).await
    }

    pub async fn read_packet(&mut self) -> Result<Vec<u8>, ProtocolError> {
        self.reader.read_packet().await
    }

    pub fn reader(&self) -> &CryptReader<R> {
        &self.reader
    }

    pub fn writer(&self) -> &CryptWriter<W> {
        &self.writer
    }

    /// Give each direction to its own task
    pub fn into_split(self) -> (CryptReader<R>, CryptWriter<W>) {
        (self.reader, self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CipherTables;

    #[tokio::test]
    async fn test_send_read_roundtrip() {
        let (a, b) = tokio::io::duplex(4096);
        let mut client = CryptConn::new(a);
        let mut server = CryptConn::new(b);

        let payload: Vec<u8> = (0x00..=0x07).collect();
        client.send_packet(&payload).await.unwrap();
        assert_eq!(server.read_packet().await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_ratchet_advances() {
        let (a, b) = tokio::io::duplex(4096);
        let mut client = CryptConn::new(a);
        let mut server = CryptConn::new(b);

        assert_eq!(client.writer().key_rot(), KEY_ROT_INIT);
        for size in [4usize, 6, 64] {
            let payload = vec![0x5Au8; size];
            client.send_packet(&payload).await.unwrap();
            assert_eq!(server.read_packet().await.unwrap(), payload);
        }

        assert_ne!(client.writer().key_rot(), KEY_ROT_INIT);
        assert_eq!(client.writer().sent_packets(), 3);
        assert_eq!(server.reader().received_packets(), 3);
        assert_eq!(client.writer().state(), server.reader().state());

        // Fixed delta of 3, applied three times
        let expected = rotate_key(rotate_key(rotate_key(KEY_ROT_INIT, 3), 3), 3);
        assert_eq!(client.writer().key_rot(), expected);

        // The other direction has not moved
        assert_eq!(server.writer().key_rot(), KEY_ROT_INIT);
        assert_eq!(client.reader().key_rot(), KEY_ROT_INIT);
    }

    #[tokio::test]
    async fn test_both_directions_independent() {
        let (a, b) = tokio::io::duplex(4096);
        let (mut client_rx, mut client_tx) = CryptConn::new(a).into_split();
        let (mut server_rx, mut server_tx) = CryptConn::new(b)
            .with_delta_source(Arc::new(DeltaSource::seeded(99)))
            .into_split();

        let writer = tokio::spawn(async move {
            for i in 0..10u8 {
                client_tx.send_packet(&[i; 16]).await.unwrap();
            }
            client_tx
        });

        for i in 0..10u8 {
            assert_eq!(server_rx.read_packet().await.unwrap(), vec![i; 16]);
            server_tx.send_packet(&[i, i]).await.unwrap();
            assert_eq!(client_rx.read_packet().await.unwrap(), vec![i, i]);
        }

        let client_tx = writer.await.unwrap();
        assert_eq!(client_tx.sent_packets(), 10);
        assert_eq!(server_tx.sent_packets(), 10);
        assert_eq!(server_tx.state(), client_rx.state());
    }

    #[tokio::test]
    async fn test_empty_payload() {
        let (a, b) = tokio::io::duplex(64);
        let mut client = CryptConn::new(a);
        let mut server = CryptConn::new(b);
        client.send_packet(&[]).await.unwrap();
        assert!(server.read_packet().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let (a, _b) = tokio::io::duplex(64);
        let mut client = CryptConn::new(a);
        let err = client.send_packet(&vec![0u8; MAX_PAYLOAD_SIZE + 1]).await.unwrap_err();
        assert!(matches!(err, ProtocolError::PacketTooLarge { .. }));
        assert_eq!(client.writer().sent_packets(), 0);
        assert_eq!(client.writer().key_rot(), KEY_ROT_INIT);
    }

    #[tokio::test]
    async fn test_peer_close_reports_closed() {
        let (a, b) = tokio::io::duplex(64);
        let mut server = CryptConn::new(b);
        drop(a);
        assert!(matches!(
            server.read_packet().await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_mismatched_tables_fail_checksum() {
        let (a, b) = tokio::io::duplex(4096);
        let mut client = CryptConn::new(a);

        let mut bytes = CipherTables::development().to_bytes();
        bytes[257] ^= 0xFF;
        let tables = CipherTables::from_bytes(&bytes).unwrap();
        let mut server = CryptConn::new(b).with_cipher(Arc::new(TableCipher::new(tables)));

        client.send_packet(b"\x00\x11\xAA\xBB\x00\x10").await.unwrap();
        assert!(matches!(
            server.read_packet().await,
            Err(ProtocolError::ChecksumMismatch { packet_num: 0 })
        ));
    }
}
