use std::collections::BTreeMap;
use std::sync::Mutex;

use alloy_primitives::{Address, B256};

use crate::db::{DbResult, LogFilter, NeonBlockRecord, NeonDb, NeonLogRecord, NeonTxRecord};
use crate::types::StuckSnapshot;

/// In-memory [`NeonDb`]: tests and ephemeral runs without Postgres.
#[derive(Default)]
pub struct MemNeonDb {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    block_map: BTreeMap<u64, NeonBlockRecord>,
    /// slots stored but not yet switched active
    inactive_slot_list: Vec<u64>,
    finalized_cursor: Option<u64>,
    stuck_map: BTreeMap<u64, StuckSnapshot>,
    reindex_range_list: Vec<(u64, u64, String)>,
}

impl MemNeonDb {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl NeonDb for MemNeonDb {
    async fn append_block_batch(
        &self,
        block_list: &[NeonBlockRecord],
        finalized_cursor: u64,
    ) -> DbResult<()> {
        let mut inner = self.inner.lock().expect("db lock");
        for block in block_list {
            if !block.is_finalized {
                inner.inactive_slot_list.push(block.block_slot);
            }
            inner.block_map.insert(block.block_slot, block.clone());
        }
        let cursor = inner.finalized_cursor.unwrap_or(0).max(finalized_cursor);
        inner.finalized_cursor = Some(cursor);
        Ok(())
    }

    async fn activate_block_list(
        &self,
        _finalized_cursor: u64,
        slot_list: &[u64],
    ) -> DbResult<()> {
        let mut inner = self.inner.lock().expect("db lock");
        inner
            .inactive_slot_list
            .retain(|slot| !slot_list.contains(slot));
        Ok(())
    }

    async fn finalize_block_list(
        &self,
        from_slot: u64,
        to_slot: u64,
        slot_list: &[u64],
    ) -> DbResult<()> {
        let mut inner = self.inner.lock().expect("db lock");
        // drop confirmed-only blocks superseded inside the range
        let keep: Vec<u64> = inner
            .block_map
            .range(from_slot..=to_slot)
            .map(|(slot, _)| *slot)
            .filter(|slot| !slot_list.contains(slot))
            .collect();
        for slot in keep {
            inner.block_map.remove(&slot);
        }
        for slot in slot_list {
            if let Some(block) = inner.block_map.get_mut(slot) {
                block.is_finalized = true;
            }
        }
        let cursor = inner.finalized_cursor.unwrap_or(0).max(to_slot);
        inner.finalized_cursor = Some(cursor);
        Ok(())
    }

    async fn drop_not_finalized_history(&self) -> DbResult<()> {
        let mut inner = self.inner.lock().expect("db lock");
        let drop_list: Vec<u64> = inner
            .block_map
            .values()
            .filter(|block| !block.is_finalized)
            .map(|block| block.block_slot)
            .collect();
        for slot in drop_list {
            inner.block_map.remove(&slot);
        }
        inner.inactive_slot_list.clear();
        Ok(())
    }

    async fn get_finalized_cursor(&self) -> DbResult<Option<u64>> {
        Ok(self.inner.lock().expect("db lock").finalized_cursor)
    }

    async fn get_tx_by_sig(&self, neon_tx_sig: &B256) -> DbResult<Option<NeonTxRecord>> {
        let inner = self.inner.lock().expect("db lock");
        Ok(inner
            .block_map
            .values()
            .flat_map(|block| block.tx_list.iter())
            .find(|tx| tx.neon_tx_sig == *neon_tx_sig)
            .cloned())
    }

    async fn get_tx_by_sender_nonce(
        &self,
        sender: &Address,
        nonce: u64,
    ) -> DbResult<Option<NeonTxRecord>> {
        let inner = self.inner.lock().expect("db lock");
        Ok(inner
            .block_map
            .values()
            .flat_map(|block| block.tx_list.iter())
            .find(|tx| tx.sender == *sender && tx.nonce == nonce)
            .cloned())
    }

    async fn get_tx_by_slot_idx(
        &self,
        block_slot: u64,
        tx_idx: u32,
    ) -> DbResult<Option<NeonTxRecord>> {
        let inner = self.inner.lock().expect("db lock");
        Ok(inner.block_map.get(&block_slot).and_then(|block| {
            block
                .tx_list
                .iter()
                .find(|tx| tx.tx_idx == tx_idx)
                .cloned()
        }))
    }

    async fn get_block_by_slot(&self, block_slot: u64) -> DbResult<Option<NeonBlockRecord>> {
        let inner = self.inner.lock().expect("db lock");
        Ok(inner.block_map.get(&block_slot).cloned())
    }

    async fn get_log_list(&self, filter: &LogFilter) -> DbResult<Vec<NeonLogRecord>> {
        let inner = self.inner.lock().expect("db lock");
        Ok(inner
            .block_map
            .range(filter.from_slot..=filter.to_slot)
            .flat_map(|(_, block)| block.tx_list.iter())
            .flat_map(|tx| tx.log_list.iter())
            .filter(|log| filter.matches(log))
            .cloned()
            .collect())
    }

    async fn put_stuck(&self, snapshot: &StuckSnapshot) -> DbResult<()> {
        let mut inner = self.inner.lock().expect("db lock");
        inner.stuck_map.insert(snapshot.block_slot, snapshot.clone());
        Ok(())
    }

    async fn get_stuck_at(&self, block_slot: u64) -> DbResult<Option<StuckSnapshot>> {
        let inner = self.inner.lock().expect("db lock");
        Ok(inner.stuck_map.get(&block_slot).cloned())
    }

    async fn get_latest_stuck(&self) -> DbResult<Option<StuckSnapshot>> {
        let inner = self.inner.lock().expect("db lock");
        Ok(inner.stuck_map.values().next_back().cloned())
    }

    async fn get_reindex_range_list(&self) -> DbResult<Vec<(u64, u64, String)>> {
        Ok(self
            .inner
            .lock()
            .expect("db lock")
            .reindex_range_list
            .clone())
    }

    async fn put_reindex_range(
        &self,
        start_slot: u64,
        stop_slot: u64,
        reindex_ident: &str,
    ) -> DbResult<()> {
        let mut inner = self.inner.lock().expect("db lock");
        inner
            .reindex_range_list
            .push((start_slot, stop_slot, reindex_ident.to_string()));
        Ok(())
    }

    async fn drop_reindex_range(&self, reindex_ident: &str) -> DbResult<()> {
        let mut inner = self.inner.lock().expect("db lock");
        inner
            .reindex_range_list
            .retain(|(_, _, ident)| ident != reindex_ident);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(slot: u64, finalized: bool) -> NeonBlockRecord {
        NeonBlockRecord {
            block_slot: slot,
            block_hash: format!("hash-{slot}"),
            parent_block_hash: format!("hash-{}", slot.saturating_sub(1)),
            parent_block_slot: slot.saturating_sub(1),
            block_time: Some(1_700_000_000),
            is_finalized: finalized,
            tx_list: vec![],
        }
    }

    #[tokio::test]
    async fn finalize_twice_is_a_noop() {
        let db = MemNeonDb::new();
        db.append_block_batch(&[block(10, false), block(11, false)], 9)
            .await
            .expect("append");
        db.finalize_block_list(10, 11, &[10, 11]).await.expect("finalize");
        let cursor_a = db.get_finalized_cursor().await.expect("cursor");
        db.finalize_block_list(10, 11, &[10, 11]).await.expect("finalize again");
        let cursor_b = db.get_finalized_cursor().await.expect("cursor");
        assert_eq!(cursor_a, cursor_b);
        assert!(db.get_block_by_slot(10).await.expect("read").expect("block").is_finalized);
    }

    #[tokio::test]
    async fn drop_not_finalized_clears_overlay() {
        let db = MemNeonDb::new();
        db.append_block_batch(&[block(10, true), block(11, false)], 10)
            .await
            .expect("append");
        db.drop_not_finalized_history().await.expect("drop");
        assert!(db.get_block_by_slot(10).await.expect("read").is_some());
        assert!(db.get_block_by_slot(11).await.expect("read").is_none());
    }
}
