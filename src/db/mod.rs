//! Persistence contract.
//!
//! The indexer treats storage as a transactional batch target; the RPC
//! surface reads reconstructed blocks, transactions and logs back out. The
//! contract is the [`NeonDb`] trait; [`postgres::PgNeonDb`] is the
//! production implementation and [`memory::MemNeonDb`] backs tests and
//! ephemeral runs.

pub mod memory;
pub mod postgres;

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use crate::types::StuckSnapshot;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database request failed: {0}")]
    Query(String),
    #[error("database connection failed: {0}")]
    Connect(String),
}

impl From<sqlx::Error> for DbError {
    fn from(e: sqlx::Error) -> Self {
        DbError::Query(e.to_string())
    }
}

/// One mirrored settlement block with its reconstructed Ethereum content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NeonBlockRecord {
    pub block_slot: u64,
    pub block_hash: String,
    pub parent_block_hash: String,
    pub parent_block_slot: u64,
    pub block_time: Option<i64>,
    pub is_finalized: bool,
    pub tx_list: Vec<NeonTxRecord>,
}

/// One reconstructed Ethereum transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeonTxRecord {
    pub neon_tx_sig: B256,
    pub sender: Address,
    pub to_address: Option<Address>,
    pub nonce: u64,
    pub chain_id: Option<u64>,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub status: u8,
    /// Gas accounting reconstructed rather than returned by the program.
    pub is_lost: bool,
    pub block_slot: u64,
    pub tx_idx: u32,
    pub sol_sig_list: Vec<String>,
    pub log_list: Vec<NeonLogRecord>,
}

/// One reconstructed Ethereum log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeonLogRecord {
    pub address: Address,
    pub topic_list: Vec<B256>,
    pub data: Vec<u8>,
    pub block_slot: u64,
    pub tx_idx: u32,
    pub log_idx: u32,
}

/// Log filter as `eth_getLogs` presents it: a slot range, an address set
/// and a positional topic matrix.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub from_slot: u64,
    pub to_slot: u64,
    pub address_list: Vec<Address>,
    /// `topic_matrix[i]` is the allowed set for topic position `i`; an empty
    /// set matches anything at that position.
    pub topic_matrix: Vec<Vec<B256>>,
}

impl LogFilter {
    pub fn matches(&self, log: &NeonLogRecord) -> bool {
        if log.block_slot < self.from_slot || log.block_slot > self.to_slot {
            return false;
        }
        if !self.address_list.is_empty() && !self.address_list.contains(&log.address) {
            return false;
        }
        for (idx, allowed) in self.topic_matrix.iter().enumerate() {
            if allowed.is_empty() {
                continue;
            }
            match log.topic_list.get(idx) {
                Some(topic) if allowed.contains(topic) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Transactional batch target plus the read paths the RPC surface needs.
#[async_trait::async_trait]
pub trait NeonDb: Send + Sync {
    /// Atomically appends a batch of completed blocks and advances the
    /// finalized cursor. Blocks in the batch may be confirmed-only; they
    /// are stored deactivated until [`Self::activate_block_list`].
    async fn append_block_batch(
        &self,
        block_list: &[NeonBlockRecord],
        finalized_cursor: u64,
    ) -> DbResult<()>;

    /// Switches not-finalized rows in `slot_list` to active.
    async fn activate_block_list(&self, finalized_cursor: u64, slot_list: &[u64]) -> DbResult<()>;

    /// Moves activated rows in `[from_slot, to_slot]` to finalized.
    /// Calling it twice with the same cursor is a no-op.
    async fn finalize_block_list(
        &self,
        from_slot: u64,
        to_slot: u64,
        slot_list: &[u64],
    ) -> DbResult<()>;

    /// Startup cleanup before indexing resumes.
    async fn drop_not_finalized_history(&self) -> DbResult<()>;

    /// Cursor to continue from (`start_slot = CONTINUE`).
    async fn get_finalized_cursor(&self) -> DbResult<Option<u64>>;

    async fn get_tx_by_sig(&self, neon_tx_sig: &B256) -> DbResult<Option<NeonTxRecord>>;
    async fn get_tx_by_sender_nonce(
        &self,
        sender: &Address,
        nonce: u64,
    ) -> DbResult<Option<NeonTxRecord>>;
    async fn get_tx_by_slot_idx(&self, block_slot: u64, tx_idx: u32)
    -> DbResult<Option<NeonTxRecord>>;
    async fn get_block_by_slot(&self, block_slot: u64) -> DbResult<Option<NeonBlockRecord>>;
    async fn get_log_list(&self, filter: &LogFilter) -> DbResult<Vec<NeonLogRecord>>;

    /// Stuck-transaction snapshot written by the indexer, read by the
    /// executor's stuck poll.
    async fn put_stuck(&self, snapshot: &StuckSnapshot) -> DbResult<()>;
    async fn get_stuck_at(&self, block_slot: u64) -> DbResult<Option<StuckSnapshot>>;
    async fn get_latest_stuck(&self) -> DbResult<Option<StuckSnapshot>>;

    /// Historical ranges already claimed by reindex workers.
    async fn get_reindex_range_list(&self) -> DbResult<Vec<(u64, u64, String)>>;
    async fn put_reindex_range(
        &self,
        start_slot: u64,
        stop_slot: u64,
        reindex_ident: &str,
    ) -> DbResult<()>;
    async fn drop_reindex_range(&self, reindex_ident: &str) -> DbResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(address_byte: u8, topics: &[u8], slot: u64) -> NeonLogRecord {
        NeonLogRecord {
            address: Address::repeat_byte(address_byte),
            topic_list: topics.iter().map(|b| B256::repeat_byte(*b)).collect(),
            data: vec![],
            block_slot: slot,
            tx_idx: 0,
            log_idx: 0,
        }
    }

    #[test]
    fn filter_by_address_and_topics() {
        let filter = LogFilter {
            from_slot: 10,
            to_slot: 20,
            address_list: vec![Address::repeat_byte(1)],
            topic_matrix: vec![vec![B256::repeat_byte(7)], vec![]],
        };
        assert!(filter.matches(&log(1, &[7, 9], 15)));
        assert!(!filter.matches(&log(2, &[7], 15)), "wrong address");
        assert!(!filter.matches(&log(1, &[8], 15)), "wrong topic");
        assert!(!filter.matches(&log(1, &[7], 9)), "outside the range");
        assert!(!filter.matches(&log(1, &[], 15)), "missing topic position");
    }
}
