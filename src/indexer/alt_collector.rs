use std::collections::HashMap;

use solana_pubkey::Pubkey;

use crate::chain::{ChainError, Commitment, SolanaAdapter};
use crate::loader::parse_alt_account;

/// Watch state of one lookup table referenced by indexed transactions.
#[derive(Debug, Clone)]
pub struct AltWatch {
    pub table: Pubkey,
    pub first_seen_slot: u64,
    /// Settlement signatures that referenced the table, collected once the
    /// table is due for close-out.
    pub sol_sig_list: Vec<String>,
    pub is_closed: bool,
}

/// Tracks lookup tables seen in indexed transactions until they are closed
/// or frozen on chain.
#[derive(Debug, Default)]
pub struct AltCollector {
    watch_map: HashMap<Pubkey, AltWatch>,
}

impl AltCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, table: Pubkey, block_slot: u64) {
        self.watch_map.entry(table).or_insert(AltWatch {
            table,
            first_seen_slot: block_slot,
            sol_sig_list: Vec::new(),
            is_closed: false,
        });
    }

    pub fn watch_cnt(&self) -> usize {
        self.watch_map.len()
    }

    /// Close-out sweep: a table is checked `alt_freeing_depth * 2` slots
    /// after it appeared. Frozen, foreign-owned or deleted tables are
    /// recorded closed; their referencing signatures are collected once and
    /// the entry is dropped.
    pub async fn collect(
        &mut self,
        adapter: &SolanaAdapter,
        current_slot: u64,
        alt_freeing_depth: u64,
    ) -> Result<Vec<AltWatch>, ChainError> {
        let due_list: Vec<Pubkey> = self
            .watch_map
            .values()
            .filter(|watch| {
                !watch.is_closed && watch.first_seen_slot + alt_freeing_depth * 2 <= current_slot
            })
            .map(|watch| watch.table)
            .collect();

        let mut closed_list = Vec::new();
        for table in due_list {
            let account = adapter.get_account(&table, Commitment::Finalized).await?;
            let gone = match account {
                None => true,
                Some(account) => match parse_alt_account(&account.data) {
                    None => true,
                    Some(info) => info.is_frozen() || info.is_deactivated(),
                },
            };
            if !gone {
                continue;
            }
            let sig_list = adapter
                .get_sig_list_for_address(&table, 64, Commitment::Finalized)
                .await?
                .into_iter()
                .map(|status| status.signature)
                .collect();
            if let Some(mut watch) = self.watch_map.remove(&table) {
                watch.sol_sig_list = sig_list;
                watch.is_closed = true;
                tracing::info!(table = %table, sigs = watch.sol_sig_list.len(), "lookup table closed out");
                closed_list.push(watch);
            }
        }
        Ok(closed_list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_is_idempotent() {
        let mut collector = AltCollector::new();
        let table = Pubkey::new_unique();
        collector.observe(table, 10);
        collector.observe(table, 99);
        assert_eq!(collector.watch_cnt(), 1);
    }
}
