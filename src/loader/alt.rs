use solana_address_lookup_table_interface::instruction as alt_instruction;
use solana_instruction::Instruction;
use solana_message::AddressLookupTableAccount;
use solana_pubkey::Pubkey;

/// Account metas beyond this count do not fit a legacy settlement tx; the
/// builder switches to a v0 tx backed by a lookup table.
pub const MAX_TX_ACCOUNT_CNT: usize = 27;

/// `ExtendLookupTable` accepts at most this many keys per instruction.
pub const EXTEND_KEY_LIMIT: usize = 30;

/// Plan for one address lookup table serving one Ethereum transaction.
///
/// Lifecycle: `Create` and `Extend*` are sent, then the table is usable one
/// slot after its last extension; once the transaction completes the owner
/// deactivates it and closes it `alt_freeing_depth` slots later.
#[derive(Debug, Clone)]
pub struct AltPlan {
    table: Pubkey,
    authority: Pubkey,
    key_list: Vec<Pubkey>,
}

impl AltPlan {
    pub fn required(account_cnt: usize) -> bool {
        account_cnt > MAX_TX_ACCOUNT_CNT
    }

    /// Derives the table address from `(authority, recent_slot)` and returns
    /// the plan together with the create instruction.
    pub fn new(
        authority: Pubkey,
        recent_slot: u64,
        key_list: Vec<Pubkey>,
    ) -> (Self, Instruction) {
        let (create_ix, table) =
            alt_instruction::create_lookup_table(authority, authority, recent_slot);
        (
            Self {
                table,
                authority,
                key_list,
            },
            create_ix,
        )
    }

    /// Rebuilds a plan over an existing table (stuck-tx resume).
    pub fn from_existing(table: Pubkey, authority: Pubkey, key_list: Vec<Pubkey>) -> Self {
        Self {
            table,
            authority,
            key_list,
        }
    }

    pub fn table(&self) -> Pubkey {
        self.table
    }

    pub fn key_cnt(&self) -> usize {
        self.key_list.len()
    }

    pub fn extend_ix_list(&self) -> Vec<Instruction> {
        self.key_list
            .chunks(EXTEND_KEY_LIMIT)
            .map(|chunk| {
                alt_instruction::extend_lookup_table(
                    self.table,
                    self.authority,
                    Some(self.authority),
                    chunk.to_vec(),
                )
            })
            .collect()
    }

    pub fn deactivate_ix(&self) -> Instruction {
        alt_instruction::deactivate_lookup_table(self.table, self.authority)
    }

    pub fn close_ix(&self) -> Instruction {
        alt_instruction::close_lookup_table(self.table, self.authority, self.authority)
    }

    /// The resolved table for v0 message compilation.
    pub fn table_account(&self) -> AddressLookupTableAccount {
        AddressLookupTableAccount {
            key: self.table,
            addresses: self.key_list.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_only_above_cap() {
        assert!(!AltPlan::required(MAX_TX_ACCOUNT_CNT));
        assert!(AltPlan::required(MAX_TX_ACCOUNT_CNT + 1));
    }

    #[test]
    fn extends_are_chunked() {
        let keys: Vec<Pubkey> = (0..70).map(|_| Pubkey::new_unique()).collect();
        let (plan, _create) = AltPlan::new(Pubkey::new_unique(), 1000, keys);
        let extends = plan.extend_ix_list();
        assert_eq!(extends.len(), 3); // 30 + 30 + 10
    }

    #[test]
    fn table_account_matches_plan() {
        let keys: Vec<Pubkey> = (0..5).map(|_| Pubkey::new_unique()).collect();
        let (plan, _create) = AltPlan::new(Pubkey::new_unique(), 1000, keys.clone());
        let account = plan.table_account();
        assert_eq!(account.key, plan.table());
        assert_eq!(account.addresses, keys);
    }
}
