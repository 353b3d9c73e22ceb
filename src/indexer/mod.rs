//! Chain indexer.
//!
//! Tails settlement blocks, decodes the EVM-program instructions they carry
//! and reconstructs Ethereum blocks, transactions and logs. Finalized
//! history is persisted in batches; the confirmed head lives in an
//! in-memory overlay published for `latest` queries and is never written.
//! Stuck holders are exposed through the persistence snapshot, and reindex
//! workers walk historical ranges independently.

mod alt_collector;
pub mod decoder;
mod neon_block;
mod reindexer;

use std::sync::Arc;
use std::time::Duration;

use solana_pubkey::Pubkey;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::chain::{ChainError, Commitment, SolanaAdapter};
use crate::db::{NeonBlockRecord, NeonDb};
use crate::types::{StuckSnapshot, StuckTxInfo};

pub use alt_collector::{AltCollector, AltWatch};
pub use neon_block::{
    HolderHandle, IndexedTxStatus, IndexerArena, NeonIndexedHolder, NeonIndexedTx, TxHandle,
    tx_record,
};
pub use reindexer::{ReindexRange, plan_range_list, run_reindex_worker};

/// Initial cursor selection, from the `start_slot` config key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartSlot {
    Latest,
    Continue,
    Slot(u64),
}

impl std::str::FromStr for StartSlot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LATEST" => Ok(StartSlot::Latest),
            "CONTINUE" => Ok(StartSlot::Continue),
            other => other
                .parse::<u64>()
                .map(StartSlot::Slot)
                .map_err(|_| format!("invalid start slot: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub start_slot: StartSlot,
    pub holder_timeout: u64,
    pub batch_block_cnt: usize,
    pub poll_interval: Duration,
    pub alt_freeing_depth: u64,
    /// Confirmed-head overlay depth; `latest` queries never need more.
    pub overlay_depth: u64,
}

/// Read side of the confirmed overlay.
pub type OverlayRx = watch::Receiver<Arc<Vec<NeonBlockRecord>>>;

pub struct Indexer {
    adapter: SolanaAdapter,
    db: Arc<dyn NeonDb>,
    program_id: Pubkey,
    config: IndexerConfig,
    arena: IndexerArena,
    alt_collector: AltCollector,
    last_finalized_slot: u64,
    batch: Vec<NeonBlockRecord>,
    batch_slot_list: Vec<u64>,
    overlay_tx: watch::Sender<Arc<Vec<NeonBlockRecord>>>,
}

impl Indexer {
    pub fn new(
        adapter: SolanaAdapter,
        db: Arc<dyn NeonDb>,
        program_id: Pubkey,
        config: IndexerConfig,
    ) -> (Self, OverlayRx) {
        let (overlay_tx, overlay_rx) = watch::channel(Arc::new(Vec::new()));
        (
            Self {
                adapter,
                db,
                program_id,
                config,
                arena: IndexerArena::new(),
                alt_collector: AltCollector::new(),
                last_finalized_slot: 0,
                batch: Vec::new(),
                batch_slot_list: Vec::new(),
                overlay_tx,
            },
            overlay_rx,
        )
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        if let Err(e) = self.init_cursor().await {
            tracing::error!(error = %e, "indexer start failed");
            return;
        }
        tracing::info!(start_slot = self.last_finalized_slot, "indexer started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
            if let Err(e) = self.process_finalized().await {
                self.handle_chain_error(e).await;
            }
            if let Err(e) = self.process_confirmed().await {
                tracing::warn!(error = %e, "confirmed overlay pass failed");
            }
        }
        tracing::info!("indexer stopped");
    }

    async fn init_cursor(&mut self) -> Result<(), ChainError> {
        // confirmed-but-unfinalized rows from a previous run are stale
        if let Err(e) = self.db.drop_not_finalized_history().await {
            tracing::warn!(error = %e, "could not drop unfinalized history");
        }
        self.last_finalized_slot = match self.config.start_slot {
            StartSlot::Latest => self.adapter.get_block_slot(Commitment::Finalized).await?,
            StartSlot::Slot(slot) => slot,
            StartSlot::Continue => match self.db.get_finalized_cursor().await {
                Ok(Some(cursor)) => cursor,
                _ => self.adapter.get_block_slot(Commitment::Finalized).await?,
            },
        };
        let first_available = self.adapter.get_first_available_block().await?;
        if self.last_finalized_slot < first_available {
            tracing::warn!(
                cursor = self.last_finalized_slot,
                first_available,
                "cursor below history floor, clamping"
            );
            self.last_finalized_slot = first_available;
        }
        Ok(())
    }

    /// A history gap means the node pruned past our cursor: re-read the
    /// floor, drop partial state and restart from there.
    async fn handle_chain_error(&mut self, e: ChainError) {
        match e {
            ChainError::HistoryNotFound {
                first_available_slot,
            } if first_available_slot > self.last_finalized_slot => {
                tracing::warn!(
                    cursor = self.last_finalized_slot,
                    first_available_slot,
                    "history gap, restarting ingest from the new floor"
                );
                self.arena = IndexerArena::new();
                self.batch.clear();
                self.batch_slot_list.clear();
                self.last_finalized_slot = first_available_slot;
            }
            other => tracing::warn!(error = %other, "finalized ingest pass failed"),
        }
    }

    async fn process_finalized(&mut self) -> Result<(), ChainError> {
        let finalized_head = self.adapter.get_block_slot(Commitment::Finalized).await?;
        if finalized_head <= self.last_finalized_slot {
            return Ok(());
        }

        for block_slot in (self.last_finalized_slot + 1)..=finalized_head {
            let block = self
                .adapter
                .get_block_info(block_slot, Commitment::Finalized)
                .await?;
            if !block.is_empty() {
                for encoded in &block.tx_list {
                    decoder::decode_sol_tx(&mut self.arena, &self.program_id, block_slot, encoded);
                }
                self.complete_block(&block);
            }
            self.batch_slot_list.push(block_slot);

            if self.batch_slot_list.len() >= self.config.batch_block_cnt {
                self.persist_batch(block_slot).await?;
                // only a persisted batch advances the cursor
                self.last_finalized_slot = block_slot;
            }
        }
        self.persist_batch(finalized_head).await?;
        self.last_finalized_slot = finalized_head;

        self.write_stuck_snapshot(finalized_head).await;
        if let Err(e) = self
            .alt_collector
            .collect(&self.adapter, finalized_head, self.config.alt_freeing_depth)
            .await
        {
            tracing::warn!(error = %e, "ALT close-out sweep failed");
        }
        Ok(())
    }

    /// Drains completed transactions into a block record.
    fn complete_block(&mut self, block: &crate::chain::SolBlockInfo) {
        let completed = self.arena.drain_completed();
        if completed.is_empty() {
            return;
        }
        for indexed in &completed {
            for table in &indexed.alt_list {
                self.alt_collector.observe(*table, block.block_slot);
            }
            if let Some(holder) = &indexed.holder {
                self.arena.remove_holder(holder);
            }
        }
        let record = NeonBlockRecord {
            block_slot: block.block_slot,
            block_hash: block.block_hash.clone(),
            parent_block_hash: block.parent_block_hash.clone(),
            parent_block_slot: block.parent_block_slot,
            block_time: block.block_time,
            is_finalized: true,
            tx_list: completed
                .iter()
                .enumerate()
                .map(|(tx_idx, indexed)| tx_record(indexed, block.block_slot, tx_idx as u32))
                .collect(),
        };
        tracing::debug!(
            slot = record.block_slot,
            txs = record.tx_list.len(),
            "block completed"
        );
        self.batch.push(record);
    }

    /// Batch persist, then publish, then the cursor may move.
    async fn persist_batch(&mut self, finalized_cursor: u64) -> Result<(), ChainError> {
        if self.batch_slot_list.is_empty() {
            return Ok(());
        }
        let block_list = std::mem::take(&mut self.batch);
        let slot_list = std::mem::take(&mut self.batch_slot_list);
        let from_slot = *slot_list.first().expect("non-empty batch");
        let to_slot = *slot_list.last().expect("non-empty batch");
        let stored_slot_list: Vec<u64> = block_list.iter().map(|b| b.block_slot).collect();

        self.db
            .append_block_batch(&block_list, finalized_cursor)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        self.db
            .activate_block_list(finalized_cursor, &stored_slot_list)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        self.db
            .finalize_block_list(from_slot, to_slot, &stored_slot_list)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        Ok(())
    }

    /// Publishes unfinished transactions that outlived `holder_timeout`
    /// settlement slots.
    async fn write_stuck_snapshot(&mut self, finalized_head: u64) {
        let deadline = finalized_head.saturating_sub(self.config.holder_timeout);
        let stuck_list: Vec<StuckTxInfo> = self
            .arena
            .stuck_tx_list(deadline)
            .into_iter()
            .map(|indexed| StuckTxInfo {
                neon_tx_sig: indexed.neon_tx_sig,
                holder: indexed.holder.unwrap_or_default(),
                chain_id: indexed.chain_id.unwrap_or_default(),
                rlp: indexed
                    .tx
                    .as_ref()
                    .map(|tx| tx.rlp().to_vec())
                    .unwrap_or_default(),
                alt_address_list: indexed.alt_list.clone(),
                start_time: indexed.start_slot,
            })
            .collect();
        if stuck_list.is_empty() {
            return;
        }
        let snapshot = StuckSnapshot {
            block_slot: finalized_head,
            holder_list: stuck_list.iter().map(|tx| tx.holder).collect(),
            alt_list: stuck_list
                .iter()
                .flat_map(|tx| tx.alt_address_list.iter().copied())
                .collect(),
            tx_list: stuck_list,
        };
        tracing::warn!(
            cnt = snapshot.tx_list.len(),
            slot = finalized_head,
            "stuck transactions detected"
        );
        if let Err(e) = self.db.put_stuck(&snapshot).await {
            tracing::warn!(error = %e, "stuck snapshot write failed");
        }
    }

    /// Rebuilds the confirmed overlay from the finalized cursor to the
    /// confirmed head. A fresh arena keeps replays away from the finalized
    /// state; arrival of a newer finalized head discards the overlay
    /// implicitly on the next rebuild.
    async fn process_confirmed(&mut self) -> Result<(), ChainError> {
        let confirmed_head = self.adapter.get_block_slot(Commitment::Confirmed).await?;
        if confirmed_head <= self.last_finalized_slot {
            self.overlay_tx.send_replace(Arc::new(Vec::new()));
            return Ok(());
        }
        let from_slot = confirmed_head
            .saturating_sub(self.config.overlay_depth)
            .max(self.last_finalized_slot + 1);

        let mut overlay_arena = IndexerArena::new();
        let mut overlay: Vec<NeonBlockRecord> = Vec::new();
        for block_slot in from_slot..=confirmed_head {
            let block = self
                .adapter
                .get_block_info(block_slot, Commitment::Confirmed)
                .await?;
            if block.is_empty() {
                continue;
            }
            for encoded in &block.tx_list {
                decoder::decode_sol_tx(&mut overlay_arena, &self.program_id, block_slot, encoded);
            }
            let completed = overlay_arena.drain_completed();
            overlay.push(NeonBlockRecord {
                block_slot,
                block_hash: block.block_hash.clone(),
                parent_block_hash: block.parent_block_hash.clone(),
                parent_block_slot: block.parent_block_slot,
                block_time: block.block_time,
                is_finalized: false,
                tx_list: completed
                    .iter()
                    .enumerate()
                    .map(|(tx_idx, indexed)| tx_record(indexed, block_slot, tx_idx as u32))
                    .collect(),
            });
        }
        self.overlay_tx.send_replace(Arc::new(overlay));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_slot_parses_all_forms() {
        assert_eq!("LATEST".parse::<StartSlot>(), Ok(StartSlot::Latest));
        assert_eq!("continue".parse::<StartSlot>(), Ok(StartSlot::Continue));
        assert_eq!("12345".parse::<StartSlot>(), Ok(StartSlot::Slot(12345)));
        assert!("nonsense".parse::<StartSlot>().is_err());
    }
}
