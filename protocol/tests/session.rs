//! End-to-end checks of the encrypted transport over an in-memory pipe

use protocol::{
    ByteFrame, CryptConn, DeltaSource, Envelope, KEY_ROT_INIT, PacketHeader, ProtocolError,
};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test]
async fn test_message_survives_transport() {
    let (a, b) = tokio::io::duplex(1 << 16);
    let mut client = CryptConn::new(a);
    let mut server = CryptConn::new(b);

    let mut body = ByteFrame::new();
    body.write_u32(0x0102_0304);
    body.write_null_terminated(b"Rathalos");
    body.write_bool(true);
    let message = Envelope::new(0x0061, body.into_inner());

    client.send_packet(&message.build()).await.unwrap();
    let received = Envelope::parse(&server.read_packet().await.unwrap()).unwrap();
    assert_eq!(received, message);

    let mut bf = received.frame();
    assert_eq!(bf.read_u32(), 0x0102_0304);
    assert_eq!(bf.read_null_terminated(), b"Rathalos".to_vec());
    assert!(bf.read_bool());
}

#[tokio::test]
async fn test_header_on_the_wire() {
    let (a, mut raw) = tokio::io::duplex(1 << 16);
    let mut client = CryptConn::new(a);

    client.send_packet(&[0u8; 6]).await.unwrap();
    client.send_packet(&[1u8; 10]).await.unwrap();

    let mut first = [0u8; PacketHeader::SIZE + 6];
    raw.read_exact(&mut first).await.unwrap();
    let header = PacketHeader::decode(&first).unwrap();
    assert_eq!(header.pf0, 0x03);
    assert_eq!(header.key_rot_delta, 3);
    assert_eq!(header.packet_num, 0);
    assert_eq!(header.data_size, 6);
    assert_eq!(header.prev_packet_combined_check, 0);

    let mut second = [0u8; PacketHeader::SIZE + 10];
    raw.read_exact(&mut second).await.unwrap();
    let next = PacketHeader::decode(&second).unwrap();
    assert_eq!(next.packet_num, 1);
    assert_eq!(next.data_size, 10);
    assert_eq!(
        next.prev_packet_combined_check,
        header.checksums().combine(0, 0, 6)
    );
}

#[tokio::test]
async fn test_dropped_packet_breaks_chain() {
    let (a, mut relay_in) = tokio::io::duplex(1 << 16);
    let (mut relay_out, b) = tokio::io::duplex(1 << 16);
    let mut client = CryptConn::new(a);
    let mut server = CryptConn::new(b);

    client.send_packet(b"first").await.unwrap();
    client.send_packet(b"second").await.unwrap();

    // Swallow the first packet, forward the second
    let mut dropped = vec![0u8; PacketHeader::SIZE + 5];
    relay_in.read_exact(&mut dropped).await.unwrap();
    let mut forwarded = vec![0u8; PacketHeader::SIZE + 6];
    relay_in.read_exact(&mut forwarded).await.unwrap();
    relay_out.write_all(&forwarded).await.unwrap();

    assert!(matches!(
        server.read_packet().await,
        Err(ProtocolError::ChainMismatch { expected: 0, .. })
    ));
}

#[tokio::test]
async fn test_tampered_payload_rejected() {
    let (a, mut relay_in) = tokio::io::duplex(1 << 16);
    let (mut relay_out, b) = tokio::io::duplex(1 << 16);
    let mut client = CryptConn::new(a);
    let mut server = CryptConn::new(b);

    client.send_packet(b"warehouse contents").await.unwrap();
    let mut packet = vec![0u8; PacketHeader::SIZE + 18];
    relay_in.read_exact(&mut packet).await.unwrap();
    packet[PacketHeader::SIZE + 4] ^= 0x01;
    relay_out.write_all(&packet).await.unwrap();

    assert!(matches!(
        server.read_packet().await,
        Err(ProtocolError::ChecksumMismatch { packet_num: 0 })
    ));
    assert_eq!(server.reader().key_rot(), KEY_ROT_INIT);
}

#[tokio::test]
async fn test_short_body_is_an_error() {
    let (mut raw, b) = tokio::io::duplex(1 << 16);
    let mut server = CryptConn::new(b);

    let header = PacketHeader {
        data_size: 32,
        ..PacketHeader::default()
    };
    raw.write_all(&header.encode()).await.unwrap();
    raw.write_all(&[0u8; 8]).await.unwrap();
    drop(raw);

    assert!(matches!(
        server.read_packet().await,
        Err(ProtocolError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_long_session_stays_in_sync() {
    let (a, b) = tokio::io::duplex(1 << 20);
    let mut client = CryptConn::new(a).with_delta_source(Arc::new(DeltaSource::seeded(1)));
    let mut server = CryptConn::new(b).with_delta_source(Arc::new(DeltaSource::seeded(2)));

    // Enough packets to wrap the 16-bit packet number
    for i in 0..70_000u32 {
        let payload = i.to_be_bytes();
        client.send_packet(&payload).await.unwrap();
        assert_eq!(server.read_packet().await.unwrap(), payload);
        if i % 1000 == 0 {
            server.send_packet(&payload[..2]).await.unwrap();
            assert_eq!(client.read_packet().await.unwrap(), &payload[..2]);
        }
    }

    assert_eq!(client.writer().sent_packets(), 70_000);
    assert_eq!(client.writer().state(), server.reader().state());
    assert_eq!(server.writer().state(), client.reader().state());
}
