//! LOB streaming (component L): bounded-block upload/download of large
//! values (§4.L).
//!
//! Block-at-a-time buffering keyed by `LobId`, mirroring the donor's
//! `ResultStream` `Data`/`Ack`/`Error` streaming shape from `data_client.rs`
//! (see `mux.rs` for the wire-facing half of that shape).

use ojp_proto::envelope::{LobDataBlock, LobReference, LobType};
use ojp_proto::OjpError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Maximum bytes per streamed block on download, named directly from §4.L.
pub const MAX_BLOCK_SIZE: usize = 64 * 1024;

struct StoredLob {
    lob_type: LobType,
    bytes: Vec<u8>,
    /// Upstreams that invalidate the LOB when the cursor advances must be
    /// fully buffered before any byte is streamed back (§4.L special
    /// case); this is tracked per-lob because it depends on which
    /// resource-kind driver adapter produced it, not on the wire shape.
    fully_buffered: bool,
}

/// Component L. One instance per session (LOBs are session-owned
/// resources, §3).
pub struct LobStore {
    lobs: RwLock<HashMap<u64, StoredLob>>,
    next_id: AtomicU64,
}

impl LobStore {
    pub fn new() -> Self {
        Self {
            lobs: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Handles one uploaded `LobDataBlock`. The first block (no `lob_id`)
    /// allocates a fresh `LobId`; subsequent blocks append at the declared
    /// `position`. Returns the reference to send back to the client.
    pub async fn write_block(&self, block: LobDataBlock) -> Result<LobReference, OjpError> {
        let mut lobs = self.lobs.write().await;
        let lob_id = match block.lob_id {
            Some(id) => id,
            None => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                lobs.insert(
                    id,
                    StoredLob {
                        lob_type: block.lob_type,
                        bytes: Vec::new(),
                        fully_buffered: false,
                    },
                );
                id
            }
        };

        let stored = lobs.get_mut(&lob_id).ok_or_else(|| OjpError::Internal {
            component: "LobStore".to_string(),
            details: format!("lob {lob_id} not found for append"),
        })?;

        let position = block.position as usize;
        if position > stored.bytes.len() {
            stored.bytes.resize(position, 0);
        }
        if position == stored.bytes.len() {
            stored.bytes.extend_from_slice(&block.bytes);
        } else {
            let end = position + block.bytes.len();
            if end > stored.bytes.len() {
                stored.bytes.resize(end, 0);
            }
            stored.bytes[position..end].copy_from_slice(&block.bytes);
        }

        Ok(LobReference {
            lob_id,
            total_bytes: stored.bytes.len() as u64,
        })
    }

    /// Marks a LOB as requiring full in-memory buffering before download,
    /// per the special case in §4.L and §6.L's note that this is a
    /// capability-set flag, not a protocol difference.
    pub async fn mark_fully_buffered(&self, lob_id: u64) {
        if let Some(stored) = self.lobs.write().await.get_mut(&lob_id) {
            stored.fully_buffered = true;
        }
    }

    /// `readLob(lobId, pos, length)`: streams blocks of at most
    /// `MAX_BLOCK_SIZE` bytes until `length` is exhausted or the object
    /// ends.
    pub async fn read_range(&self, lob_id: u64, position: u64, length: u64) -> Result<Vec<LobDataBlock>, OjpError> {
        let lobs = self.lobs.read().await;
        let stored = lobs.get(&lob_id).ok_or_else(|| OjpError::Internal {
            component: "LobStore".to_string(),
            details: format!("lob {lob_id} not found for read"),
        })?;

        let start = position as usize;
        if start >= stored.bytes.len() {
            return Ok(Vec::new());
        }
        let requested_end = start.saturating_add(length as usize).min(stored.bytes.len());

        let mut blocks = Vec::new();
        let mut cursor = start;
        while cursor < requested_end {
            let chunk_end = (cursor + MAX_BLOCK_SIZE).min(requested_end);
            blocks.push(LobDataBlock {
                lob_id: Some(lob_id),
                position: cursor as u64,
                bytes: stored.bytes[cursor..chunk_end].to_vec(),
                lob_type: stored.lob_type,
                metadata: None,
            });
            cursor = chunk_end;
        }
        Ok(blocks)
    }

    pub async fn total_bytes(&self, lob_id: u64) -> Option<u64> {
        self.lobs.read().await.get(&lob_id).map(|s| s.bytes.len() as u64)
    }

    pub async fn remove(&self, lob_id: u64) {
        self.lobs.write().await.remove(&lob_id);
    }
}

impl Default for LobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(lob_id: Option<u64>, position: u64, bytes: &[u8]) -> LobDataBlock {
        LobDataBlock {
            lob_id,
            position,
            bytes: bytes.to_vec(),
            lob_type: LobType::Binary,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn first_block_allocates_a_fresh_id() {
        let store = LobStore::new();
        let reference = store.write_block(block(None, 0, b"hello")).await.unwrap();
        assert_eq!(reference.total_bytes, 5);
    }

    #[tokio::test]
    async fn round_trip_multi_block_upload_then_full_read() {
        let store = LobStore::new();
        let first = store.write_block(block(None, 0, b"hello ")).await.unwrap();
        store.write_block(block(Some(first.lob_id), 6, b"world")).await.unwrap();

        let blocks = store.read_range(first.lob_id, 0, 11).await.unwrap();
        let joined: Vec<u8> = blocks.into_iter().flat_map(|b| b.bytes).collect();
        assert_eq!(joined, b"hello world");
    }

    #[tokio::test]
    async fn read_splits_into_max_block_size_chunks() {
        let store = LobStore::new();
        let payload = vec![7u8; MAX_BLOCK_SIZE * 2 + 10];
        let mut reference = store.write_block(block(None, 0, &payload[..MAX_BLOCK_SIZE])).await.unwrap();
        reference = store
            .write_block(block(Some(reference.lob_id), MAX_BLOCK_SIZE as u64, &payload[MAX_BLOCK_SIZE..]))
            .await
            .unwrap();

        let blocks = store.read_range(reference.lob_id, 0, payload.len() as u64).await.unwrap();
        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|b| b.bytes.len() <= MAX_BLOCK_SIZE));
    }

    #[tokio::test]
    async fn read_past_end_of_object_returns_empty() {
        let store = LobStore::new();
        let reference = store.write_block(block(None, 0, b"short")).await.unwrap();
        let blocks = store.read_range(reference.lob_id, 100, 10).await.unwrap();
        assert!(blocks.is_empty());
    }
}
