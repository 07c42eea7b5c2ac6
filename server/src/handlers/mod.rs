//! Message handlers

pub mod ping;
pub mod savedata;

pub use ping::handle_ping;
pub use savedata::{handle_load, handle_save};

use crate::messages::Message;
use crate::storage::BlobStore;

/// What the connection does after a message has been handled
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    /// Queue this payload for the writer task
    Send(Vec<u8>),
    /// Client asked to disconnect
    Close,
}

/// Route a parsed message to its handler
pub async fn dispatch<S: BlobStore>(message: Message, store: &S) -> Reply {
    match message {
        Message::Ping(ping) => Reply::Send(handle_ping(&ping)),
        Message::SaveData(save) => Reply::Send(handle_save(save, store).await),
        Message::LoadData(load) => Reply::Send(handle_load(&load, store).await),
        Message::Logout => Reply::Close,
    }
}
