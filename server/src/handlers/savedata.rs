//! Save-data pipeline: full and diff saves, blob loads
//!
//! Stored bytes are always nullcomp-compressed. A full save decompresses the
//! client's blob to validate it before recompressing; a diff save applies the
//! client's deltacomp patch to the decompressed stored blob.

use crate::messages::{Ack, LoadData, SaveData, SaveType};
use crate::storage::{BlobColumn, BlobStore};
use anyhow::{Context, Result};
use protocol::{MAX_PAYLOAD_SIZE, deltacomp, nullcomp};
use tracing::{debug, error, warn};

/// Ack framing around the data: opcode, handle, flag, length, footer
const ACK_OVERHEAD: usize = 2 + 4 + 1 + 4 + 2;

/// Handle SAVEDATA and build the ack to send back
pub async fn handle_save<S: BlobStore>(save: SaveData, store: &S) -> Vec<u8> {
    let Some(column) = BlobColumn::from_u8(save.column) else {
        warn!("SAVEDATA for unknown column {:#04x}", save.column);
        return Ack::failed(save.ack_handle).to_bytes();
    };
    let Some(save_type) = SaveType::from_u8(save.save_type) else {
        warn!("SAVEDATA with unknown save type {}", save.save_type);
        return Ack::failed(save.ack_handle).to_bytes();
    };

    match save_blob(store, save.character_id, column, save_type, &save.payload).await {
        Ok(stored) => {
            debug!(
                character_id = save.character_id,
                ?column,
                ?save_type,
                stored,
                "saved blob"
            );
            Ack::ok(save.ack_handle, Vec::new()).to_bytes()
        }
        Err(e) => {
            error!(
                character_id = save.character_id,
                ?column,
                "Failed to save blob: {:#}", e
            );
            Ack::failed(save.ack_handle).to_bytes()
        }
    }
}

/// Run one save through decompress, patch and recompress; returns the stored size
async fn save_blob<S: BlobStore>(
    store: &S,
    character_id: u32,
    column: BlobColumn,
    save_type: SaveType,
    payload: &[u8],
) -> Result<usize> {
    let blob = match save_type {
        SaveType::Full => nullcomp::decompress(payload).context("Malformed full save")?,
        SaveType::Diff => {
            let base = match store.load(character_id, column).await? {
                Some(stored) => nullcomp::decompress(&stored).context("Stored blob is corrupt")?,
                None => Vec::new(),
            };
            deltacomp::apply_patch(payload, &base).context("Malformed diff save")?
        }
    };

    let compressed = nullcomp::compress(&blob)?;
    let stored = compressed.len();
    store.store(character_id, column, compressed).await?;
    Ok(stored)
}

/// Handle LOADDATA: ack with the stored compressed blob, empty if none
pub async fn handle_load<S: BlobStore>(load: &LoadData, store: &S) -> Vec<u8> {
    let Some(column) = BlobColumn::from_u8(load.column) else {
        warn!("LOADDATA for unknown column {:#04x}", load.column);
        return Ack::failed(load.ack_handle).to_bytes();
    };

    match store.load(load.character_id, column).await {
        Ok(Some(blob)) if blob.len() + ACK_OVERHEAD > MAX_PAYLOAD_SIZE => {
            error!(
                character_id = load.character_id,
                ?column,
                size = blob.len(),
                "Stored blob does not fit in one packet"
            );
            Ack::failed(load.ack_handle).to_bytes()
        }
        Ok(blob) => Ack::ok(load.ack_handle, blob.unwrap_or_default()).to_bytes(),
        Err(e) => {
            error!(character_id = load.character_id, ?column, "Failed to load blob: {:#}", e);
            Ack::failed(load.ack_handle).to_bytes()
        }
    }
}
