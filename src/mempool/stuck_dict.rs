use std::collections::HashMap;

use alloy_primitives::B256;

use crate::types::StuckTxInfo;

/// Bookkeeping for stuck transactions, split by provenance.
///
/// *Own* entries come from resource initialization or a strategy run that
/// found a predecessor in the holder; *external* entries arrive from the
/// indexer's stuck snapshot. A completed signature stays in the dictionary
/// so a late snapshot poll cannot resurrect it.
#[derive(Debug, Default)]
pub struct StuckTxDict {
    own: HashMap<B256, StuckTxInfo>,
    external: HashMap<B256, StuckTxInfo>,
    completed: HashMap<B256, u64>,
}

impl StuckTxDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_own(&mut self, stuck_tx: StuckTxInfo) {
        if self.completed.contains_key(&stuck_tx.neon_tx_sig) {
            return;
        }
        self.external.remove(&stuck_tx.neon_tx_sig);
        self.own.insert(stuck_tx.neon_tx_sig, stuck_tx);
    }

    /// Merges the indexer snapshot, skipping what this process already owns
    /// or has completed.
    pub fn add_external_list(&mut self, stuck_tx_list: Vec<StuckTxInfo>) {
        for stuck_tx in stuck_tx_list {
            if self.own.contains_key(&stuck_tx.neon_tx_sig)
                || self.completed.contains_key(&stuck_tx.neon_tx_sig)
            {
                continue;
            }
            self.external.insert(stuck_tx.neon_tx_sig, stuck_tx);
        }
    }

    /// Pops the next stuck transaction to resume, own ones first.
    pub fn acquire(&mut self) -> Option<StuckTxInfo> {
        let sig = self
            .own
            .keys()
            .next()
            .copied()
            .or_else(|| self.external.keys().next().copied())?;
        self.own.remove(&sig).or_else(|| self.external.remove(&sig))
    }

    /// Returns an unfinished stuck transaction after a failed resume.
    pub fn requeue(&mut self, stuck_tx: StuckTxInfo) {
        self.add_own(stuck_tx);
    }

    pub fn complete(&mut self, neon_tx_sig: B256, block_slot: u64) {
        self.own.remove(&neon_tx_sig);
        self.external.remove(&neon_tx_sig);
        self.completed.insert(neon_tx_sig, block_slot);
    }

    /// Drops completion markers older than the given slot so the map cannot
    /// grow without bound.
    pub fn prune_completed(&mut self, min_block_slot: u64) {
        self.completed.retain(|_, slot| *slot >= min_block_slot);
    }

    pub fn len(&self) -> usize {
        self.own.len() + self.external.len()
    }

    pub fn is_empty(&self) -> bool {
        self.own.is_empty() && self.external.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_pubkey::Pubkey;

    fn stuck(sig_byte: u8) -> StuckTxInfo {
        StuckTxInfo {
            neon_tx_sig: B256::repeat_byte(sig_byte),
            holder: Pubkey::new_unique(),
            chain_id: 1,
            rlp: vec![],
            alt_address_list: vec![],
            start_time: 10,
        }
    }

    #[test]
    fn own_wins_over_external() {
        let mut dict = StuckTxDict::new();
        dict.add_external_list(vec![stuck(1), stuck(2)]);
        dict.add_own(stuck(3));
        let first = dict.acquire().expect("stuck tx");
        assert_eq!(first.neon_tx_sig, B256::repeat_byte(3));
    }

    #[test]
    fn completed_is_not_resurrected() {
        let mut dict = StuckTxDict::new();
        dict.complete(B256::repeat_byte(1), 500);
        dict.add_external_list(vec![stuck(1)]);
        assert!(dict.is_empty());
        dict.add_own(stuck(1));
        assert!(dict.is_empty());
    }

    #[test]
    fn external_skips_own_duplicates() {
        let mut dict = StuckTxDict::new();
        dict.add_own(stuck(1));
        dict.add_external_list(vec![stuck(1)]);
        assert_eq!(dict.len(), 1);
    }
}
