use std::collections::HashMap;

use alloy_primitives::B256;
use solana_pubkey::Pubkey;

use crate::db::{NeonLogRecord, NeonTxRecord};
use crate::evm::NeonTx;

pub type TxHandle = u64;
pub type HolderHandle = u64;

/// Progress of one reconstructed Ethereum transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexedTxStatus {
    InProgress,
    Done { status: u8, gas_used: u64 },
    Canceled { gas_used: u64 },
}

/// One Ethereum transaction being reassembled from instruction receipts.
#[derive(Debug)]
pub struct NeonIndexedTx {
    pub neon_tx_sig: B256,
    pub tx: Option<NeonTx>,
    pub chain_id: Option<u64>,
    pub holder: Option<Pubkey>,
    pub status: IndexedTxStatus,
    pub start_slot: u64,
    pub last_slot: u64,
    pub sol_sig_list: Vec<String>,
    pub log_list: Vec<NeonLogRecord>,
    pub alt_list: Vec<Pubkey>,
}

impl NeonIndexedTx {
    pub fn is_completed(&self) -> bool {
        !matches!(self.status, IndexedTxStatus::InProgress)
    }
}

/// Holder account contents being accumulated chunk by chunk.
#[derive(Debug)]
pub struct NeonIndexedHolder {
    pub holder: Pubkey,
    pub neon_tx_sig: B256,
    pub data: Vec<u8>,
    pub start_slot: u64,
    pub last_slot: u64,
}

impl NeonIndexedHolder {
    /// Applies one `HolderWrite` chunk, growing the buffer as needed.
    pub fn write(&mut self, offset: usize, chunk: &[u8], block_slot: u64) {
        let end = offset + chunk.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(chunk);
        self.last_slot = block_slot;
    }
}

/// Arena owning every in-flight transaction and holder reconstruction.
///
/// Handles are plain integers; the cyclic block ↔ tx ↔ holder references of
/// the domain never become pointers.
#[derive(Debug, Default)]
pub struct IndexerArena {
    next_handle: u64,
    tx_map: HashMap<TxHandle, NeonIndexedTx>,
    tx_sig_map: HashMap<B256, TxHandle>,
    holder_map: HashMap<HolderHandle, NeonIndexedHolder>,
    holder_key_map: HashMap<Pubkey, HolderHandle>,
}

impl IndexerArena {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    pub fn get_or_create_tx(
        &mut self,
        neon_tx_sig: B256,
        block_slot: u64,
    ) -> TxHandle {
        if let Some(handle) = self.tx_sig_map.get(&neon_tx_sig) {
            return *handle;
        }
        let handle = self.alloc();
        self.tx_map.insert(
            handle,
            NeonIndexedTx {
                neon_tx_sig,
                tx: None,
                chain_id: None,
                holder: None,
                status: IndexedTxStatus::InProgress,
                start_slot: block_slot,
                last_slot: block_slot,
                sol_sig_list: Vec::new(),
                log_list: Vec::new(),
                alt_list: Vec::new(),
            },
        );
        self.tx_sig_map.insert(neon_tx_sig, handle);
        handle
    }

    pub fn tx(&self, handle: TxHandle) -> Option<&NeonIndexedTx> {
        self.tx_map.get(&handle)
    }

    pub fn tx_mut(&mut self, handle: TxHandle) -> Option<&mut NeonIndexedTx> {
        self.tx_map.get_mut(&handle)
    }

    pub fn tx_by_sig(&self, neon_tx_sig: &B256) -> Option<&NeonIndexedTx> {
        self.tx_sig_map
            .get(neon_tx_sig)
            .and_then(|handle| self.tx_map.get(handle))
    }

    pub fn remove_tx(&mut self, handle: TxHandle) -> Option<NeonIndexedTx> {
        let tx = self.tx_map.remove(&handle)?;
        self.tx_sig_map.remove(&tx.neon_tx_sig);
        Some(tx)
    }

    /// Completed transactions drained out for block assembly, in first-seen
    /// order (handles are monotonic).
    pub fn drain_completed(&mut self) -> Vec<NeonIndexedTx> {
        let mut handle_list: Vec<TxHandle> = self
            .tx_map
            .iter()
            .filter(|(_, tx)| tx.is_completed())
            .map(|(handle, _)| *handle)
            .collect();
        handle_list.sort_unstable();
        handle_list
            .into_iter()
            .filter_map(|handle| self.remove_tx(handle))
            .collect()
    }

    /// Transactions in progress since before `deadline_slot`; stuck-tx
    /// snapshot material.
    pub fn stuck_tx_list(&self, deadline_slot: u64) -> Vec<&NeonIndexedTx> {
        let mut list: Vec<&NeonIndexedTx> = self
            .tx_map
            .values()
            .filter(|tx| !tx.is_completed() && tx.start_slot < deadline_slot)
            .collect();
        list.sort_by_key(|tx| tx.start_slot);
        list
    }

    pub fn get_or_create_holder(
        &mut self,
        holder: Pubkey,
        neon_tx_sig: B256,
        block_slot: u64,
    ) -> HolderHandle {
        if let Some(handle) = self.holder_key_map.get(&holder) {
            let existing = self.holder_map.get_mut(handle).expect("holder indexed");
            if existing.neon_tx_sig == neon_tx_sig {
                return *handle;
            }
            // the holder was reused for a new transaction; restart content
            existing.neon_tx_sig = neon_tx_sig;
            existing.data.clear();
            existing.start_slot = block_slot;
            existing.last_slot = block_slot;
            return *handle;
        }
        let handle = self.alloc();
        self.holder_map.insert(
            handle,
            NeonIndexedHolder {
                holder,
                neon_tx_sig,
                data: Vec::new(),
                start_slot: block_slot,
                last_slot: block_slot,
            },
        );
        self.holder_key_map.insert(holder, handle);
        handle
    }

    pub fn holder_mut(&mut self, handle: HolderHandle) -> Option<&mut NeonIndexedHolder> {
        self.holder_map.get_mut(&handle)
    }

    pub fn holder_by_key(&self, holder: &Pubkey) -> Option<&NeonIndexedHolder> {
        self.holder_key_map
            .get(holder)
            .and_then(|handle| self.holder_map.get(handle))
    }

    pub fn remove_holder(&mut self, holder: &Pubkey) {
        if let Some(handle) = self.holder_key_map.remove(holder) {
            self.holder_map.remove(&handle);
        }
    }

    pub fn holder_key_list(&self) -> Vec<Pubkey> {
        self.holder_key_map.keys().copied().collect()
    }

    pub fn tx_cnt(&self) -> usize {
        self.tx_map.len()
    }
}

/// Converts a finished reconstruction into its persistence record.
pub fn tx_record(indexed_tx: &NeonIndexedTx, block_slot: u64, tx_idx: u32) -> NeonTxRecord {
    let (status, gas_used, is_lost) = match indexed_tx.status {
        IndexedTxStatus::Done { status, gas_used } => (status, gas_used, false),
        IndexedTxStatus::Canceled { gas_used } => (1, gas_used, true),
        IndexedTxStatus::InProgress => (0, 0, true),
    };
    let (sender, to_address, nonce, gas_price, gas_limit) = match &indexed_tx.tx {
        Some(tx) => (
            tx.sender(),
            tx.to_address(),
            tx.nonce(),
            tx.gas_price(),
            tx.gas_limit(),
        ),
        None => (Default::default(), None, 0, 0, 0),
    };
    NeonTxRecord {
        neon_tx_sig: indexed_tx.neon_tx_sig,
        sender,
        to_address,
        nonce,
        chain_id: indexed_tx.chain_id,
        gas_price,
        gas_limit,
        gas_used,
        status,
        is_lost,
        block_slot,
        tx_idx,
        sol_sig_list: indexed_tx.sol_sig_list.clone(),
        log_list: indexed_tx
            .log_list
            .iter()
            .map(|log| NeonLogRecord {
                block_slot,
                tx_idx,
                ..log.clone()
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holder_write_grows_and_overwrites() {
        let mut arena = IndexerArena::new();
        let key = Pubkey::new_unique();
        let sig = B256::repeat_byte(1);
        let handle = arena.get_or_create_holder(key, sig, 10);
        arena.holder_mut(handle).unwrap().write(0, &[1, 2, 3], 10);
        arena.holder_mut(handle).unwrap().write(5, &[9], 11);
        let holder = arena.holder_by_key(&key).unwrap();
        assert_eq!(holder.data, vec![1, 2, 3, 0, 0, 9]);
        assert_eq!(holder.last_slot, 11);
    }

    #[test]
    fn holder_reuse_resets_content() {
        let mut arena = IndexerArena::new();
        let key = Pubkey::new_unique();
        let handle = arena.get_or_create_holder(key, B256::repeat_byte(1), 10);
        arena.holder_mut(handle).unwrap().write(0, &[1, 2, 3], 10);
        let handle = arena.get_or_create_holder(key, B256::repeat_byte(2), 20);
        assert!(arena.holder_mut(handle).unwrap().data.is_empty());
    }

    #[test]
    fn drain_keeps_first_seen_order() {
        let mut arena = IndexerArena::new();
        let first = arena.get_or_create_tx(B256::repeat_byte(1), 10);
        let second = arena.get_or_create_tx(B256::repeat_byte(2), 11);
        arena.tx_mut(second).unwrap().status = IndexedTxStatus::Done {
            status: 1,
            gas_used: 5,
        };
        arena.tx_mut(first).unwrap().status = IndexedTxStatus::Done {
            status: 1,
            gas_used: 7,
        };
        let drained = arena.drain_completed();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].neon_tx_sig, B256::repeat_byte(1));
        assert_eq!(arena.tx_cnt(), 0);
    }

    #[test]
    fn stuck_list_is_age_filtered() {
        let mut arena = IndexerArena::new();
        arena.get_or_create_tx(B256::repeat_byte(1), 10);
        arena.get_or_create_tx(B256::repeat_byte(2), 100);
        let stuck = arena.stuck_tx_list(50);
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].neon_tx_sig, B256::repeat_byte(1));
    }
}
