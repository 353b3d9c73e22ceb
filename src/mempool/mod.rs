//! Mempool scheduler.
//!
//! Per-sender nonce-ordered pools with two gas-price priority queues across
//! them: one for *pending* transactions (nonce lines up with chain state)
//! and one for *gapped* ones. The whole structure is owned by a single task
//! and reached through the command channel in [`service`]; nothing here is
//! thread-safe on its own.

mod gas_price;
mod sender_pool;
pub mod service;
mod sorted_queue;
mod stuck_dict;

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::Address;

use crate::evm::{ExecConfig, NeonTx, NeonTxHash};

pub use gas_price::GasPriceCalculator;
pub use sender_pool::{SenderPool, SenderPoolState};
pub use service::{MempoolHandle, MpCmd, run_mempool_task};
pub use sorted_queue::SortedQueue;
pub use stuck_dict::StuckTxDict;

/// One accepted transaction with its execution bookkeeping.
#[derive(Debug)]
pub struct MpTxEntry {
    pub tx: NeonTx,
    pub exec_cfg: ExecConfig,
    pub chain_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MpAddError {
    #[error("already known")]
    AlreadyKnown,
    #[error("replacement transaction underpriced")]
    Underprice,
    #[error("nonce too low: state has {state_tx_cnt}")]
    NonceTooLow { state_tx_cnt: u64 },
    #[error("nonce too high for the mempool capacity")]
    NonceTooHigh,
}

/// Snapshot for `txpool_content`: consecutive vs gapped transactions per
/// sender.
#[derive(Debug, Default)]
pub struct MpContent {
    pub pending_list: Vec<(Address, Vec<Arc<MpTxEntry>>)>,
    pub queued_list: Vec<(Address, Vec<Arc<MpTxEntry>>)>,
}

/// The scheduler state for one chain-id.
pub struct Mempool {
    chain_id: u64,
    capacity: usize,
    watermark: usize,
    min_gas_price: u128,
    entry_map: HashMap<NeonTxHash, Arc<MpTxEntry>>,
    sender_nonce_map: HashMap<(Address, u64), NeonTxHash>,
    pending_queue: SortedQueue<Reverse<u128>, NeonTxHash>,
    gapped_queue: SortedQueue<Reverse<u128>, NeonTxHash>,
    pool_map: HashMap<Address, SenderPool>,
    heartbeat_queue: SortedQueue<u64, Address>,
}

impl Mempool {
    pub fn new(chain_id: u64, capacity: usize, capacity_high_watermark: f64) -> Self {
        let watermark = ((capacity as f64) * capacity_high_watermark) as usize;
        Self {
            chain_id,
            capacity,
            watermark: watermark.min(capacity),
            min_gas_price: 0,
            entry_map: HashMap::new(),
            sender_nonce_map: HashMap::new(),
            pending_queue: SortedQueue::new(),
            gapped_queue: SortedQueue::new(),
            pool_map: HashMap::new(),
            heartbeat_queue: SortedQueue::new(),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn tx_cnt(&self) -> usize {
        self.entry_map.len()
    }

    /// Underprice floor, pushed in by the gas-price refresh task.
    pub fn set_min_gas_price(&mut self, min_gas_price: u128) {
        self.min_gas_price = min_gas_price;
    }

    pub fn min_gas_price(&self) -> u128 {
        self.min_gas_price
    }

    /// Accepts one transaction, enforcing dedup, price replacement, nonce
    /// bounds and capacity.
    pub fn add_tx(&mut self, tx: NeonTx, exec_cfg: ExecConfig, now: u64) -> Result<(), MpAddError> {
        let tx_hash = tx.tx_hash();
        let sender = tx.sender();
        let nonce = tx.nonce();
        let gas_price = tx.gas_price();

        if self.entry_map.contains_key(&tx_hash) {
            return Err(MpAddError::AlreadyKnown);
        }
        if gas_price < self.min_gas_price {
            return Err(MpAddError::Underprice);
        }

        let state_tx_cnt = {
            let pool = self
                .pool_map
                .entry(sender)
                .or_insert_with(|| SenderPool::new(sender, exec_cfg.state_tx_cnt, now));
            if exec_cfg.state_tx_cnt > pool.state_tx_cnt() {
                pool.set_state_tx_cnt(exec_cfg.state_tx_cnt);
            }
            pool.state_tx_cnt()
        };
        if state_tx_cnt > nonce {
            self.drop_pool_if_empty(sender);
            return Err(MpAddError::NonceTooLow { state_tx_cnt });
        }

        // same (sender, nonce): only a better-priced replacement wins, and
        // never while the old one is executing
        if let Some(old_hash) = self.sender_nonce_map.get(&(sender, nonce)).copied() {
            let old_entry = self.entry_map.get(&old_hash).expect("index consistency");
            let pool = self.pool_map.get(&sender).expect("pool exists");
            if old_entry.tx.gas_price() >= gas_price || pool.processing_nonce() == Some(nonce) {
                self.drop_pool_if_empty(sender);
                return Err(MpAddError::Underprice);
            }
            self.remove_entry(&old_hash);
        }

        let is_gapped = {
            let pool = self
                .pool_map
                .entry(sender)
                .or_insert_with(|| SenderPool::new(sender, state_tx_cnt, now));
            nonce > pool.pending_nonce()
        };

        if is_gapped && self.tx_cnt() >= self.watermark {
            // a gapped tx enters a full mempool only by outbidding another
            match self.gapped_queue.peek_max() {
                Some((Reverse(lowest_price), victim)) if gas_price > lowest_price => {
                    self.remove_entry(&victim);
                }
                _ => {
                    self.drop_pool_if_empty(sender);
                    return Err(MpAddError::NonceTooHigh);
                }
            }
        }

        let entry = Arc::new(MpTxEntry {
            tx,
            exec_cfg,
            chain_id: self.chain_id,
        });
        self.entry_map.insert(tx_hash, entry.clone());
        self.sender_nonce_map.insert((sender, nonce), tx_hash);
        {
            let pool = self.pool_map.get_mut(&sender).expect("pool exists");
            self.heartbeat_queue.remove(pool.heartbeat(), sender);
            pool.touch(now);
            self.heartbeat_queue.add(pool.heartbeat(), sender);
            pool.insert(entry);
        }
        self.sync_pool_queues(sender);

        // capacity ceiling: push out the cheapest until we fit; when the
        // cheapest is the newcomer itself, the insert was underpriced
        while self.tx_cnt() > self.capacity {
            let victim = self
                .gapped_queue
                .peek_max()
                .or_else(|| self.pending_queue.peek_max())
                .map(|(_, hash)| hash);
            let Some(victim) = victim else { break };
            self.remove_entry(&victim);
            if victim == tx_hash {
                return Err(MpAddError::Underprice);
            }
        }
        Ok(())
    }

    /// Best executable transaction: the highest-priced pending tx whose pool
    /// is Queued and whose nonce is the pool top.
    pub fn peek_top(&self) -> Option<Arc<MpTxEntry>> {
        for (_, tx_hash) in self.pending_queue.iter() {
            let entry = self.entry_map.get(&tx_hash)?;
            let pool = self.pool_map.get(&entry.tx.sender())?;
            if pool.state() == SenderPoolState::Queued
                && pool.top_tx().map(|top| top.tx.nonce()) == Some(entry.tx.nonce())
            {
                return Some(entry.clone());
            }
        }
        None
    }

    /// Moves the pool into Processing and pulls the tx out of the priority
    /// queue; the hash and nonce indices keep the entry visible.
    pub fn acquire(&mut self, tx_hash: &NeonTxHash) -> Option<Arc<MpTxEntry>> {
        let entry = self.entry_map.get(tx_hash)?.clone();
        let pool = self.pool_map.get_mut(&entry.tx.sender())?;
        if pool.state() != SenderPoolState::Queued {
            return None;
        }
        if pool.top_tx().map(|top| top.tx.nonce()) != Some(entry.tx.nonce()) {
            return None;
        }
        pool.begin_processing(entry.tx.nonce());
        self.pending_queue
            .remove(Reverse(entry.tx.gas_price()), *tx_hash);
        Some(entry)
    }

    /// The transaction completed on chain; the sender state advances.
    pub fn done(&mut self, tx_hash: &NeonTxHash) {
        let Some(entry) = self.remove_entry(tx_hash) else {
            return;
        };
        let sender = entry.tx.sender();
        if let Some(pool) = self.pool_map.get_mut(&sender) {
            pool.end_processing();
            let next = entry.tx.nonce() + 1;
            if next > pool.state_tx_cnt() {
                pool.set_state_tx_cnt(next);
            }
        }
        self.sync_pool_queues(sender);
        self.drop_pool_if_empty(sender);
    }

    /// The transaction failed for good; successors stay but become gapped.
    pub fn fail(&mut self, tx_hash: &NeonTxHash) {
        let Some(entry) = self.remove_entry(tx_hash) else {
            return;
        };
        let sender = entry.tx.sender();
        if let Some(pool) = self.pool_map.get_mut(&sender) {
            pool.end_processing();
        }
        self.sync_pool_queues(sender);
        self.drop_pool_if_empty(sender);
    }

    /// Reschedule: the transaction returns to the top of its pool with the
    /// (possibly updated) execution bookkeeping.
    pub fn cancel(&mut self, tx_hash: &NeonTxHash, exec_cfg: Option<ExecConfig>) {
        let Some(old_entry) = self.entry_map.remove(tx_hash) else {
            return;
        };
        let sender = old_entry.tx.sender();
        let entry = match exec_cfg {
            Some(exec_cfg) => Arc::new(MpTxEntry {
                tx: old_entry.tx.clone(),
                exec_cfg,
                chain_id: old_entry.chain_id,
            }),
            None => old_entry.clone(),
        };
        self.entry_map.insert(*tx_hash, entry.clone());
        if let Some(pool) = self.pool_map.get_mut(&sender) {
            pool.end_processing();
            pool.insert(entry);
        }
        self.sync_pool_queues(sender);
    }

    /// Chain-state nonce refresh for one sender; stale transactions drop.
    pub fn set_state_tx_cnt(&mut self, sender: Address, state_tx_cnt: u64) {
        let stale: Vec<NeonTxHash> = match self.pool_map.get_mut(&sender) {
            None => return,
            Some(pool) => {
                if pool.state_tx_cnt() >= state_tx_cnt {
                    return;
                }
                pool.set_state_tx_cnt(state_tx_cnt);
                pool.iter()
                    .filter(|entry| {
                        entry.tx.nonce() < state_tx_cnt
                            && pool.processing_nonce() != Some(entry.tx.nonce())
                    })
                    .map(|entry| entry.tx.tx_hash())
                    .collect()
            }
        };
        for tx_hash in stale {
            self.remove_entry(&tx_hash);
        }
        self.sync_pool_queues(sender);
        self.drop_pool_if_empty(sender);
    }

    /// Drops every pool whose heartbeat expired and that is not Processing.
    /// Returns the dropped transaction hashes.
    pub fn evict_expired(&mut self, now: u64, eviction_timeout_sec: u64) -> Vec<NeonTxHash> {
        let deadline = now.saturating_sub(eviction_timeout_sec);
        let expired: Vec<Address> = self
            .heartbeat_queue
            .iter()
            .take_while(|(heartbeat, _)| *heartbeat < deadline)
            .map(|(_, sender)| sender)
            .collect();
        let mut dropped = Vec::new();
        for sender in expired {
            let Some(pool) = self.pool_map.get(&sender) else {
                continue;
            };
            if pool.is_processing() {
                continue;
            }
            let hash_list: Vec<NeonTxHash> =
                pool.iter().map(|entry| entry.tx.tx_hash()).collect();
            for tx_hash in hash_list {
                self.remove_entry(&tx_hash);
                dropped.push(tx_hash);
            }
            self.drop_pool_if_empty(sender);
        }
        dropped
    }

    pub fn get_tx_by_hash(&self, tx_hash: &NeonTxHash) -> Option<Arc<MpTxEntry>> {
        self.entry_map.get(tx_hash).cloned()
    }

    pub fn get_tx_by_sender_nonce(&self, sender: Address, nonce: u64) -> Option<Arc<MpTxEntry>> {
        let tx_hash = self.sender_nonce_map.get(&(sender, nonce))?;
        self.entry_map.get(tx_hash).cloned()
    }

    /// Next executable nonce for `pending` transaction-count queries.
    pub fn pending_nonce(&self, sender: Address) -> Option<u64> {
        self.pool_map.get(&sender).map(|pool| pool.pending_nonce())
    }

    pub fn last_nonce(&self, sender: Address) -> Option<u64> {
        self.pool_map.get(&sender).and_then(|pool| pool.last_nonce())
    }

    pub fn suspended_senders(&self) -> Vec<Address> {
        self.pool_map
            .values()
            .filter(|pool| pool.state() == SenderPoolState::Suspended)
            .map(|pool| pool.sender())
            .collect()
    }

    pub fn content(&self) -> MpContent {
        let mut content = MpContent::default();
        for pool in self.pool_map.values() {
            let pending: Vec<_> = pool
                .pending_nonce_list()
                .into_iter()
                .filter_map(|nonce| pool.get(nonce).cloned())
                .collect();
            let queued: Vec<_> = pool
                .gapped_nonce_list()
                .into_iter()
                .filter_map(|nonce| pool.get(nonce).cloned())
                .collect();
            if !pending.is_empty() {
                content.pending_list.push((pool.sender(), pending));
            }
            if !queued.is_empty() {
                content.queued_list.push((pool.sender(), queued));
            }
        }
        content
    }

    fn remove_entry(&mut self, tx_hash: &NeonTxHash) -> Option<Arc<MpTxEntry>> {
        let entry = self.entry_map.remove(tx_hash)?;
        let sender = entry.tx.sender();
        let nonce = entry.tx.nonce();
        self.sender_nonce_map.remove(&(sender, nonce));
        let key = Reverse(entry.tx.gas_price());
        self.pending_queue.remove(key, *tx_hash);
        self.gapped_queue.remove(key, *tx_hash);
        if let Some(pool) = self.pool_map.get_mut(&sender) {
            pool.remove(nonce);
        }
        Some(entry)
    }

    /// Re-derives queue membership for one pool: the consecutive run is
    /// pending, the rest is gapped, the Processing tx is in neither.
    fn sync_pool_queues(&mut self, sender: Address) {
        let Some(pool) = self.pool_map.get(&sender) else {
            return;
        };
        let pending_stop = pool.pending_nonce();
        let processing = pool.processing_nonce();
        let mut moves: Vec<(Reverse<u128>, NeonTxHash, bool)> = Vec::with_capacity(pool.tx_cnt());
        for entry in pool.iter() {
            let nonce = entry.tx.nonce();
            let is_pending = nonce < pending_stop && processing != Some(nonce);
            moves.push((
                Reverse(entry.tx.gas_price()),
                entry.tx.tx_hash(),
                is_pending,
            ));
        }
        for (key, tx_hash, is_pending) in moves {
            self.pending_queue.remove(key, tx_hash);
            self.gapped_queue.remove(key, tx_hash);
            if Some(tx_hash)
                == processing.and_then(|nonce| {
                    self.sender_nonce_map.get(&(sender, nonce)).copied()
                })
            {
                continue;
            }
            if is_pending {
                self.pending_queue.add(key, tx_hash);
            } else {
                self.gapped_queue.add(key, tx_hash);
            }
        }
    }

    fn drop_pool_if_empty(&mut self, sender: Address) {
        let Some(pool) = self.pool_map.get(&sender) else {
            return;
        };
        if pool.is_empty() && !pool.is_processing() {
            self.heartbeat_queue.remove(pool.heartbeat(), sender);
            self.pool_map.remove(&sender);
        }
    }

    /// Structural invariants from the scheduler contract; test-only.
    #[cfg(test)]
    pub fn assert_consistency(&self) {
        assert_eq!(self.entry_map.len(), self.sender_nonce_map.len());
        assert!(self.entry_map.len() >= self.pending_queue.len() + self.gapped_queue.len());
        for pool in self.pool_map.values() {
            // nonce uniqueness is the BTreeMap key; check processing state
            if let Some(nonce) = pool.processing_nonce() {
                assert_eq!(pool.top_tx().map(|t| t.tx.nonce()), Some(nonce));
            }
        }
        for (_, tx_hash) in self.pending_queue.iter() {
            let entry = self.entry_map.get(&tx_hash).expect("pending tx indexed");
            let pool = self.pool_map.get(&entry.tx.sender()).expect("pool exists");
            // every lower nonce is processing or absent
            for nonce in pool.state_tx_cnt()..entry.tx.nonce() {
                let lower = pool.get(nonce);
                assert!(
                    lower.is_none() || pool.processing_nonce() == Some(nonce),
                    "pending tx has a non-processing predecessor"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evm::tx::tests::signed_tx_with_key;

    const CHAIN_ID: u64 = 245_022_926;

    fn entry_cfg(state_tx_cnt: u64) -> ExecConfig {
        ExecConfig::new(state_tx_cnt)
    }

    fn mempool() -> Mempool {
        Mempool::new(CHAIN_ID, 16, 0.9)
    }

    #[test]
    fn s5_gapped_then_filled() {
        let mut pool = mempool();
        // nonces 0, 2, 3, 5 with state_tx_cnt = 0
        for nonce in [0u64, 2, 3, 5] {
            let tx = signed_tx_with_key(0x11, nonce, 100, Some(CHAIN_ID));
            pool.add_tx(tx, entry_cfg(0), 1000).expect("accepted");
        }
        pool.assert_consistency();
        let sender = signed_tx_with_key(0x11, 0, 100, Some(CHAIN_ID)).sender();
        assert_eq!(pool.pending_nonce(sender), Some(1));
        assert_eq!(pool.pending_queue.len(), 1);
        assert_eq!(pool.gapped_queue.len(), 3);

        // filling nonce 1 promotes 1, 2, 3; 5 stays gapped
        let tx = signed_tx_with_key(0x11, 1, 100, Some(CHAIN_ID));
        pool.add_tx(tx, entry_cfg(0), 1001).expect("accepted");
        pool.assert_consistency();
        assert_eq!(pool.pending_nonce(sender), Some(4));
        assert_eq!(pool.pending_queue.len(), 4);
        assert_eq!(pool.gapped_queue.len(), 1);

        // execution order 0..=3, then the pool suspends on the gap at 4
        for expected_nonce in 0u64..4 {
            let top = pool.peek_top().expect("top tx");
            assert_eq!(top.tx.nonce(), expected_nonce);
            let tx_hash = top.tx.tx_hash();
            pool.acquire(&tx_hash).expect("acquired");
            pool.done(&tx_hash);
            pool.assert_consistency();
        }
        assert!(pool.peek_top().is_none());
        assert_eq!(pool.suspended_senders(), vec![sender]);
    }

    #[test]
    fn duplicate_hash_is_already_known() {
        let mut pool = mempool();
        let tx = signed_tx_with_key(0x22, 0, 100, Some(CHAIN_ID));
        pool.add_tx(tx.clone(), entry_cfg(0), 1000).expect("accepted");
        assert_eq!(
            pool.add_tx(tx, entry_cfg(0), 1000),
            Err(MpAddError::AlreadyKnown)
        );
    }

    #[test]
    fn nonce_too_low_is_rejected() {
        let mut pool = mempool();
        let tx = signed_tx_with_key(0x22, 3, 100, Some(CHAIN_ID));
        assert_eq!(
            pool.add_tx(tx, entry_cfg(5), 1000),
            Err(MpAddError::NonceTooLow { state_tx_cnt: 5 })
        );
    }

    #[test]
    fn replacement_needs_a_better_price() {
        let mut pool = mempool();
        let tx = signed_tx_with_key(0x22, 0, 100, Some(CHAIN_ID));
        pool.add_tx(tx, entry_cfg(0), 1000).expect("accepted");

        let cheaper_same_sender = signed_tx_with_key(0x22, 0, 90, Some(CHAIN_ID));
        assert_eq!(
            pool.add_tx(cheaper_same_sender, entry_cfg(0), 1001),
            Err(MpAddError::Underprice)
        );

        let better = signed_tx_with_key(0x22, 0, 200, Some(CHAIN_ID));
        let better_hash = better.tx_hash();
        pool.add_tx(better, entry_cfg(0), 1002).expect("replaced");
        pool.assert_consistency();
        assert_eq!(pool.tx_cnt(), 1);
        assert!(pool.get_tx_by_hash(&better_hash).is_some());
    }

    #[test]
    fn s6_capacity_eviction() {
        let mut pool = Mempool::new(CHAIN_ID, 4, 1.0);
        // four pending txs from different senders, prices 10, 20, 30, 40
        for (key, price) in [(0x31u8, 10u128), (0x32, 20), (0x33, 30), (0x34, 40)] {
            let tx = signed_tx_with_key(key, 0, price, Some(CHAIN_ID));
            pool.add_tx(tx, entry_cfg(0), 1000).expect("accepted");
        }
        assert_eq!(pool.tx_cnt(), 4);

        // gas price 11 from a new sender evicts the lowest-priced pending
        let evicted_sender = signed_tx_with_key(0x31, 0, 10, Some(CHAIN_ID)).sender();
        let tx = signed_tx_with_key(0x35, 0, 11, Some(CHAIN_ID));
        pool.add_tx(tx, entry_cfg(0), 1001).expect("accepted");
        pool.assert_consistency();
        assert_eq!(pool.tx_cnt(), 4);
        assert!(pool.pending_nonce(evicted_sender).is_none());

        // gas price 9 cannot outbid anyone
        let tx = signed_tx_with_key(0x36, 0, 9, Some(CHAIN_ID));
        assert_eq!(pool.add_tx(tx, entry_cfg(0), 1002), Err(MpAddError::Underprice));

        // a gapped tx cannot push a pending one out at the watermark
        let tx = signed_tx_with_key(0x37, 4, 1000, Some(CHAIN_ID));
        assert_eq!(
            pool.add_tx(tx, entry_cfg(0), 1003),
            Err(MpAddError::NonceTooHigh)
        );
    }

    #[test]
    fn acquire_then_cancel_restores_the_top() {
        let mut pool = mempool();
        let tx = signed_tx_with_key(0x41, 0, 100, Some(CHAIN_ID));
        let tx_hash = tx.tx_hash();
        pool.add_tx(tx, entry_cfg(0), 1000).expect("accepted");

        pool.acquire(&tx_hash).expect("acquired");
        assert!(pool.peek_top().is_none(), "processing pool is not queued");
        assert!(pool.acquire(&tx_hash).is_none(), "single processing slot");

        let mut updated = ExecConfig::new(0);
        updated.strategy_idx = 2;
        pool.cancel(&tx_hash, Some(updated));
        pool.assert_consistency();
        let top = pool.peek_top().expect("restored");
        assert_eq!(top.tx.tx_hash(), tx_hash);
        assert_eq!(top.exec_cfg.strategy_idx, 2);
    }

    #[test]
    fn eviction_by_heartbeat_skips_processing_pools() {
        let mut pool = mempool();
        let tx_a = signed_tx_with_key(0x51, 0, 100, Some(CHAIN_ID));
        let hash_a = tx_a.tx_hash();
        let tx_b = signed_tx_with_key(0x52, 0, 100, Some(CHAIN_ID));
        let hash_b = tx_b.tx_hash();
        pool.add_tx(tx_a, entry_cfg(0), 1000).expect("accepted");
        pool.add_tx(tx_b, entry_cfg(0), 1000).expect("accepted");

        pool.acquire(&hash_a).expect("acquired");
        let dropped = pool.evict_expired(10_000, 1000);
        assert_eq!(dropped, vec![hash_b]);
        assert!(pool.get_tx_by_hash(&hash_a).is_some());
    }

    #[test]
    fn done_advances_state_and_unblocks_successor() {
        let mut pool = mempool();
        for nonce in [0u64, 1] {
            let tx = signed_tx_with_key(0x61, nonce, 100, Some(CHAIN_ID));
            pool.add_tx(tx, entry_cfg(0), 1000).expect("accepted");
        }
        let top = pool.peek_top().expect("top");
        let tx_hash = top.tx.tx_hash();
        pool.acquire(&tx_hash).expect("acquired");
        pool.done(&tx_hash);
        pool.assert_consistency();
        let next = pool.peek_top().expect("successor");
        assert_eq!(next.tx.nonce(), 1);
    }
}
