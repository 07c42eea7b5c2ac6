//! Per-connection processing
//!
//! A connection starts with the client's zero preamble, then carries
//! encrypted packets in both directions. Inbound packets are read, parsed and
//! dispatched on the connection task; replies go through a channel to a single
//! writer task, the only owner of the send ratchet.

use crate::handlers::{Reply, dispatch};
use crate::messages::Message;
use crate::session::SessionManager;
use crate::storage::BlobStore;
use protocol::{
    BufferUnderrun, Cipher, CryptConn, CryptReader, DeltaSource, Envelope, PREAMBLE,
    ProtocolError,
};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Replies queued ahead of the writer task
const OUTBOUND_QUEUE: usize = 64;

/// State shared by every connection
pub struct ServerContext<S> {
    pub store: Arc<S>,
    pub cipher: Arc<dyn Cipher>,
    pub deltas: Arc<DeltaSource>,
    pub sessions: Arc<SessionManager>,
    pub read_timeout: Duration,
    pub log_packets: bool,
    pub log_connections: bool,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Invalid preamble: {0:02x?}")]
    InvalidPreamble([u8; 8]),

    #[error("No packet within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Malformed message: {0}")]
    Underrun(BufferUnderrun),

    #[error("Message parser panicked: {0}")]
    Panic(String),

    #[error("Writer task stopped")]
    WriterClosed,
}

/// Run one connection and release its session afterwards.
///
/// The connection runs on its own task so that a panic anywhere in it ends
/// only this client; the session is removed either way.
pub async fn serve<IO, S>(io: IO, session_id: u64, ctx: Arc<ServerContext<S>>)
where
    IO: AsyncRead + AsyncWrite + Send + 'static,
    S: BlobStore,
{
    let handle = tokio::spawn(handle_connection(io, session_id, ctx.clone()));

    match handle.await {
        Ok(Ok(())) => debug!(session_id, "Connection closed"),
        Ok(Err(e)) => warn!(session_id, "Connection dropped: {}", e),
        Err(e) if e.is_panic() => error!(session_id, "Connection task panicked"),
        Err(e) => error!(session_id, "Connection task failed: {}", e),
    }

    if let Some(session) = ctx.sessions.remove_session(session_id).await {
        if ctx.log_connections {
            info!(
                session_id = session.session_id,
                peer = %session.peer_addr,
                packets_received = session.packets_received,
                bytes_received = session.bytes_received,
                packets_sent = session.packets_sent,
                duration_ms = session.connected_at.elapsed().as_millis() as u64,
                idle_ms = session.last_seen.elapsed().as_millis() as u64,
                "Client disconnected"
            );
        }
    }
}

/// Drive a connection until the client logs out, disconnects or faults
pub async fn handle_connection<IO, S>(
    io: IO,
    session_id: u64,
    ctx: Arc<ServerContext<S>>,
) -> Result<(), ConnectionError>
where
    IO: AsyncRead + AsyncWrite + Send + 'static,
    S: BlobStore,
{
    let (mut read, write) = tokio::io::split(io);
    match read_preamble(&mut read, ctx.read_timeout).await {
        Ok(()) => {}
        Err(ConnectionError::Protocol(ProtocolError::ConnectionClosed)) => return Ok(()),
        Err(e) => return Err(e),
    }

    let conn = CryptConn::from_parts(read, write)
        .with_cipher(ctx.cipher.clone())
        .with_delta_source(ctx.deltas.clone());
    let (mut reader, mut writer) = conn.into_split();

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_QUEUE);
    let sessions = ctx.sessions.clone();
    let writer_task = tokio::spawn(async move {
        while let Some(packet) = rx.recv().await {
            writer.send_packet(&packet).await?;
            sessions.record_sent(session_id).await;
        }
        writer.shutdown().await
    });

    let result = read_loop(&mut reader, &tx, session_id, &ctx).await;

    // Lets the writer drain what is queued, then shut down
    drop(tx);
    match writer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(session_id, "Writer stopped: {}", e),
        Err(e) => error!(session_id, "Writer task failed: {}", e),
    }

    result
}

async fn read_preamble<R>(read: &mut R, limit: Duration) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let mut preamble = [0u8; PREAMBLE.len()];
    timeout(limit, read.read_exact(&mut preamble))
        .await
        .map_err(|_| ConnectionError::Timeout(limit))?
        .map_err(ProtocolError::from_read)?;

    if preamble != PREAMBLE {
        return Err(ConnectionError::InvalidPreamble(preamble));
    }
    Ok(())
}

async fn read_loop<R, S>(
    reader: &mut CryptReader<R>,
    tx: &mpsc::Sender<Vec<u8>>,
    session_id: u64,
    ctx: &ServerContext<S>,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
    S: BlobStore,
{
    loop {
        let packet = match timeout(ctx.read_timeout, reader.read_packet()).await {
            Err(_) => return Err(ConnectionError::Timeout(ctx.read_timeout)),
            Ok(Err(ProtocolError::ConnectionClosed)) => return Ok(()),
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(packet)) => packet,
        };
        ctx.sessions.record_packet(session_id, packet.len()).await;
        if ctx.log_packets {
            debug!(session_id, len = packet.len(), "recv {:02x?}", packet);
        }

        let envelope = Envelope::parse(&packet)?;
        let Some(message) = parse_guarded(&envelope)? else {
            debug!(session_id, "Ignoring opcode {:#06x}", envelope.opcode);
            continue;
        };

        match dispatch(message, ctx.store.as_ref()).await {
            Reply::Send(bytes) => tx
                .send(bytes)
                .await
                .map_err(|_| ConnectionError::WriterClosed)?,
            Reply::Close => return Ok(()),
        }
    }
}

/// Parse a message, turning an unwind into an error
fn parse_guarded(envelope: &Envelope) -> Result<Option<Message>, ConnectionError> {
    panic::catch_unwind(AssertUnwindSafe(|| Message::parse(envelope))).map_err(|payload| {
        match BufferUnderrun::from_panic(payload.as_ref()) {
            Some(underrun) => ConnectionError::Underrun(underrun),
            None => ConnectionError::Panic(panic_message(payload.as_ref())),
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
