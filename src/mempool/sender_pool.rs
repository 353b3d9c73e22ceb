use std::collections::BTreeMap;
use std::sync::Arc;

use alloy_primitives::Address;

use crate::mempool::MpTxEntry;

/// Scheduling state of one sender's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderPoolState {
    Empty,
    /// The lowest nonce lines up with the chain state; executable.
    Queued,
    /// One tx is being executed right now.
    Processing,
    /// The lowest nonce is ahead of the chain state; waiting for the gap.
    Suspended,
}

/// All queued transactions of one (sender, chain-id), ordered by nonce.
///
/// The pool never reorders: the top transaction is always the lowest nonce,
/// and at most one transaction is Processing at any time.
#[derive(Debug)]
pub struct SenderPool {
    sender: Address,
    nonce_map: BTreeMap<u64, Arc<MpTxEntry>>,
    processing_nonce: Option<u64>,
    state_tx_cnt: u64,
    /// Unix seconds of the last insertion; eviction key.
    heartbeat: u64,
}

impl SenderPool {
    pub fn new(sender: Address, state_tx_cnt: u64, now: u64) -> Self {
        Self {
            sender,
            nonce_map: BTreeMap::new(),
            processing_nonce: None,
            state_tx_cnt,
            heartbeat: now,
        }
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    pub fn state(&self) -> SenderPoolState {
        if self.processing_nonce.is_some() {
            return SenderPoolState::Processing;
        }
        match self.top_tx() {
            None => SenderPoolState::Empty,
            Some(top) if top.tx.nonce() == self.state_tx_cnt => SenderPoolState::Queued,
            Some(_) => SenderPoolState::Suspended,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nonce_map.is_empty()
    }

    pub fn tx_cnt(&self) -> usize {
        self.nonce_map.len()
    }

    pub fn heartbeat(&self) -> u64 {
        self.heartbeat
    }

    pub fn touch(&mut self, now: u64) {
        self.heartbeat = now;
    }

    pub fn state_tx_cnt(&self) -> u64 {
        self.state_tx_cnt
    }

    pub fn set_state_tx_cnt(&mut self, state_tx_cnt: u64) {
        self.state_tx_cnt = state_tx_cnt;
    }

    /// Lowest-nonce transaction; what gets executed next.
    pub fn top_tx(&self) -> Option<&Arc<MpTxEntry>> {
        self.nonce_map.values().next()
    }

    pub fn gas_price(&self) -> u128 {
        self.top_tx().map(|tx| tx.tx.gas_price()).unwrap_or(0)
    }

    pub fn get(&self, nonce: u64) -> Option<&Arc<MpTxEntry>> {
        self.nonce_map.get(&nonce)
    }

    pub fn insert(&mut self, entry: Arc<MpTxEntry>) -> Option<Arc<MpTxEntry>> {
        self.nonce_map.insert(entry.tx.nonce(), entry)
    }

    pub fn remove(&mut self, nonce: u64) -> Option<Arc<MpTxEntry>> {
        if self.processing_nonce == Some(nonce) {
            self.processing_nonce = None;
        }
        self.nonce_map.remove(&nonce)
    }

    pub fn is_processing(&self) -> bool {
        self.processing_nonce.is_some()
    }

    pub fn processing_nonce(&self) -> Option<u64> {
        self.processing_nonce
    }

    /// Marks the top transaction as Processing; the caller must have checked
    /// the pool is Queued.
    pub fn begin_processing(&mut self, nonce: u64) {
        debug_assert_eq!(self.top_tx().map(|tx| tx.tx.nonce()), Some(nonce));
        self.processing_nonce = Some(nonce);
    }

    pub fn end_processing(&mut self) {
        self.processing_nonce = None;
    }

    /// Next nonce this sender could execute without a gap: the end of the
    /// consecutive run starting at `state_tx_cnt`.
    pub fn pending_nonce(&self) -> u64 {
        let mut next = self.state_tx_cnt;
        for nonce in self.nonce_map.keys() {
            if *nonce == next {
                next += 1;
            } else if *nonce > next {
                break;
            }
        }
        next
    }

    /// Highest nonce present, if any.
    pub fn last_nonce(&self) -> Option<u64> {
        self.nonce_map.keys().next_back().copied()
    }

    /// Nonces of the consecutive (non-gapped) run, lowest first.
    pub fn pending_nonce_list(&self) -> Vec<u64> {
        let stop = self.pending_nonce();
        self.nonce_map
            .keys()
            .copied()
            .take_while(|nonce| *nonce < stop)
            .collect()
    }

    /// Nonces beyond the first gap.
    pub fn gapped_nonce_list(&self) -> Vec<u64> {
        let stop = self.pending_nonce();
        self.nonce_map
            .keys()
            .copied()
            .filter(|nonce| *nonce >= stop)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<MpTxEntry>> {
        self.nonce_map.values()
    }
}
