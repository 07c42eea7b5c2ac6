//! Persisted save-data blobs
//!
//! Columns hold nullcomp-compressed bytes exactly as the client pipeline
//! produces them. SQL persistence lives elsewhere; the server only needs
//! `load` and `store`, and runs against [`MemoryStore`] on its own.

use anyhow::Result;
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::RwLock;

/// Blob columns a character row carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlobColumn {
    SaveData = 0x01,
    HunterProfile = 0x02,
    Decorations = 0x03,
    EquipmentSets = 0x04,
    WarehouseEquipment = 0x05,
}

impl BlobColumn {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::SaveData),
            0x02 => Some(Self::HunterProfile),
            0x03 => Some(Self::Decorations),
            0x04 => Some(Self::EquipmentSets),
            0x05 => Some(Self::WarehouseEquipment),
            _ => None,
        }
    }
}

pub trait BlobStore: Send + Sync + 'static {
    /// Stored (compressed) bytes for a column, if the character has any
    fn load(
        &self,
        character_id: u32,
        column: BlobColumn,
    ) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Replace a column's stored bytes
    fn store(
        &self,
        character_id: u32,
        column: BlobColumn,
        data: Vec<u8>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Process-local store, lost on restart
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<(u32, BlobColumn), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryStore {
    async fn load(&self, character_id: u32, column: BlobColumn) -> Result<Option<Vec<u8>>> {
        let rows = self.rows.read().await;
        Ok(rows.get(&(character_id, column)).cloned())
    }

    async fn store(&self, character_id: u32, column: BlobColumn, data: Vec<u8>) -> Result<()> {
        let mut rows = self.rows.write().await;
        rows.insert((character_id, column), data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.load(1, BlobColumn::SaveData).await.unwrap().is_none());

        store.store(1, BlobColumn::SaveData, vec![1, 2, 3]).await.unwrap();
        store.store(1, BlobColumn::Decorations, vec![9]).await.unwrap();
        assert_eq!(
            store.load(1, BlobColumn::SaveData).await.unwrap(),
            Some(vec![1, 2, 3])
        );
        assert_eq!(
            store.load(1, BlobColumn::Decorations).await.unwrap(),
            Some(vec![9])
        );
        assert!(store.load(2, BlobColumn::SaveData).await.unwrap().is_none());
    }

    #[test]
    fn test_column_from_u8() {
        assert_eq!(BlobColumn::from_u8(0x05), Some(BlobColumn::WarehouseEquipment));
        assert_eq!(BlobColumn::from_u8(0x00), None);
        assert_eq!(BlobColumn::from_u8(0x06), None);
    }
}
