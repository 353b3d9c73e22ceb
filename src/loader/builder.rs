use alloy_primitives::{Address, B256};
use solana_compute_budget_interface::ComputeBudgetInstruction;
use solana_instruction::{AccountMeta, Instruction};
use solana_pubkey::Pubkey;

use crate::evm::SolDiscoveredAccount;
use crate::loader::instruction::EvmIxCode;

/// Builds EVM-program instructions for one operator working one Ethereum
/// transaction. Holds the derivation context (program id, payer, holder,
/// treasury) so call sites only supply per-instruction data.
#[derive(Debug, Clone)]
pub struct IxBuilder {
    program_id: Pubkey,
    payer: Pubkey,
    holder: Pubkey,
    neon_tx_sig: B256,
    treasury_pool_cnt: u32,
    treasury_pool_seed: Vec<u8>,
    cu_limit: u32,
    cu_priority_fee: u64,
}

impl IxBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        program_id: Pubkey,
        payer: Pubkey,
        holder: Pubkey,
        neon_tx_sig: B256,
        treasury_pool_cnt: u32,
        treasury_pool_seed: &[u8],
        cu_limit: u32,
        cu_priority_fee: u64,
    ) -> Self {
        Self {
            program_id,
            payer,
            holder,
            neon_tx_sig,
            treasury_pool_cnt,
            treasury_pool_seed: treasury_pool_seed.to_vec(),
            cu_limit,
            cu_priority_fee,
        }
    }

    pub fn payer(&self) -> Pubkey {
        self.payer
    }

    pub fn holder(&self) -> Pubkey {
        self.holder
    }

    /// Compute-budget prefix. Iterative strategies pay the priority fee,
    /// single-shot does not.
    pub fn cu_prefix(&self, with_priority_fee: bool) -> Vec<Instruction> {
        let mut ix_list = vec![
            ComputeBudgetInstruction::request_heap_frame(256 * 1024),
            ComputeBudgetInstruction::set_compute_unit_limit(self.cu_limit),
        ];
        if with_priority_fee && self.cu_priority_fee > 0 {
            ix_list.push(ComputeBudgetInstruction::set_compute_unit_price(
                self.cu_priority_fee,
            ));
        }
        ix_list
    }

    /// The treasury pool index is pinned to the Ethereum tx signature so
    /// every settlement tx of one Ethereum tx pays into the same pool.
    pub fn treasury_pool(&self) -> (Pubkey, u32) {
        let index = u32::from_le_bytes(
            self.neon_tx_sig.as_slice()[..4]
                .try_into()
                .expect("4-byte prefix"),
        ) % self.treasury_pool_cnt;
        let (pubkey, _) = Pubkey::find_program_address(
            &[&self.treasury_pool_seed, &index.to_le_bytes()],
            &self.program_id,
        );
        (pubkey, index)
    }

    /// Balance account PDA for (Ethereum address, chain id).
    pub fn balance_account(&self, address: &Address, chain_id: u64) -> Pubkey {
        let (pubkey, _) = Pubkey::find_program_address(
            &[address.as_slice(), &chain_id.to_le_bytes()],
            &self.program_id,
        );
        pubkey
    }

    /// Contract account PDA for an Ethereum address (chain-agnostic part).
    pub fn contract_account(&self, address: &Address) -> Pubkey {
        let (pubkey, _) = Pubkey::find_program_address(&[address.as_slice()], &self.program_id);
        pubkey
    }

    pub fn holder_create_ix(&self, seed: &str) -> Instruction {
        let mut data = vec![EvmIxCode::HolderCreate as u8];
        data.extend_from_slice(&(seed.len() as u64).to_le_bytes());
        data.extend_from_slice(seed.as_bytes());
        Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(self.holder, false),
                AccountMeta::new_readonly(self.payer, true),
            ],
            data,
        }
    }

    pub fn holder_delete_ix(&self, seed: &str) -> Instruction {
        let mut data = vec![EvmIxCode::HolderDelete as u8];
        data.extend_from_slice(&(seed.len() as u64).to_le_bytes());
        data.extend_from_slice(seed.as_bytes());
        Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(self.holder, false),
                AccountMeta::new(self.payer, true),
            ],
            data,
        }
    }

    /// Appends `chunk` into the holder at `offset`. The holder refuses
    /// writes tagged with a different transaction signature.
    pub fn holder_write_ix(&self, offset: u64, chunk: &[u8]) -> Instruction {
        let mut data = Vec::with_capacity(1 + 32 + 8 + chunk.len());
        data.push(EvmIxCode::HolderWrite as u8);
        data.extend_from_slice(self.neon_tx_sig.as_slice());
        data.extend_from_slice(&offset.to_le_bytes());
        data.extend_from_slice(chunk);
        Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(self.holder, false),
                AccountMeta::new_readonly(self.payer, true),
            ],
            data,
        }
    }

    pub fn create_balance_ix(&self, address: &Address, chain_id: u64) -> Instruction {
        let mut data = Vec::with_capacity(1 + 20 + 8);
        data.push(EvmIxCode::CreateBalance as u8);
        data.extend_from_slice(address.as_slice());
        data.extend_from_slice(&chain_id.to_le_bytes());
        Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(self.payer, true),
                AccountMeta::new_readonly(solana_system_interface::program::ID, false),
                AccountMeta::new(self.balance_account(address, chain_id), false),
                AccountMeta::new(self.contract_account(address), false),
            ],
            data,
        }
    }

    pub fn tx_exec_from_data_ix(
        &self,
        chain_id: u64,
        rlp: &[u8],
        account_list: &[SolDiscoveredAccount],
    ) -> Instruction {
        let (treasury, treasury_index) = self.treasury_pool();
        let mut data = Vec::with_capacity(1 + 4 + rlp.len());
        data.push(EvmIxCode::TxExecFromData as u8);
        data.extend_from_slice(&treasury_index.to_le_bytes());
        data.extend_from_slice(rlp);
        Instruction {
            program_id: self.program_id,
            accounts: self.exec_accounts(None, treasury, chain_id, account_list),
            data,
        }
    }

    pub fn tx_step_from_data_ix(
        &self,
        chain_id: u64,
        step_cnt: u32,
        uniq_idx: u32,
        rlp: &[u8],
        account_list: &[SolDiscoveredAccount],
    ) -> Instruction {
        let (treasury, treasury_index) = self.treasury_pool();
        let mut data = Vec::with_capacity(1 + 4 + 4 + 4 + rlp.len());
        data.push(EvmIxCode::TxStepFromData as u8);
        data.extend_from_slice(&treasury_index.to_le_bytes());
        data.extend_from_slice(&step_cnt.to_le_bytes());
        data.extend_from_slice(&uniq_idx.to_le_bytes());
        data.extend_from_slice(rlp);
        Instruction {
            program_id: self.program_id,
            accounts: self.exec_accounts(Some(self.holder), treasury, chain_id, account_list),
            data,
        }
    }

    pub fn tx_step_from_account_ix(
        &self,
        chain_id: u64,
        step_cnt: u32,
        uniq_idx: u32,
        account_list: &[SolDiscoveredAccount],
    ) -> Instruction {
        self.step_from_account(
            EvmIxCode::TxStepFromAccount,
            chain_id,
            step_cnt,
            uniq_idx,
            account_list,
        )
    }

    pub fn tx_step_from_account_no_chain_id_ix(
        &self,
        chain_id: u64,
        step_cnt: u32,
        uniq_idx: u32,
        account_list: &[SolDiscoveredAccount],
    ) -> Instruction {
        self.step_from_account(
            EvmIxCode::TxStepFromAccountNoChainId,
            chain_id,
            step_cnt,
            uniq_idx,
            account_list,
        )
    }

    fn step_from_account(
        &self,
        code: EvmIxCode,
        chain_id: u64,
        step_cnt: u32,
        uniq_idx: u32,
        account_list: &[SolDiscoveredAccount],
    ) -> Instruction {
        let (treasury, treasury_index) = self.treasury_pool();
        let mut data = Vec::with_capacity(1 + 4 + 4 + 4);
        data.push(code as u8);
        data.extend_from_slice(&treasury_index.to_le_bytes());
        data.extend_from_slice(&step_cnt.to_le_bytes());
        data.extend_from_slice(&uniq_idx.to_le_bytes());
        Instruction {
            program_id: self.program_id,
            accounts: self.exec_accounts(Some(self.holder), treasury, chain_id, account_list),
            data,
        }
    }

    pub fn cancel_ix(&self, locked_account_list: &[(Pubkey, bool)]) -> Instruction {
        let mut data = Vec::with_capacity(1 + 32);
        data.push(EvmIxCode::CancelWithHash as u8);
        data.extend_from_slice(self.neon_tx_sig.as_slice());
        let mut accounts = vec![
            AccountMeta::new(self.holder, false),
            AccountMeta::new(self.payer, true),
        ];
        for (pubkey, is_writable) in locked_account_list {
            accounts.push(if *is_writable {
                AccountMeta::new(*pubkey, false)
            } else {
                AccountMeta::new_readonly(*pubkey, false)
            });
        }
        Instruction {
            program_id: self.program_id,
            accounts,
            data,
        }
    }

    fn exec_accounts(
        &self,
        holder: Option<Pubkey>,
        treasury: Pubkey,
        chain_id: u64,
        account_list: &[SolDiscoveredAccount],
    ) -> Vec<AccountMeta> {
        let operator_balance = {
            // the operator's own balance account collects the gas payments
            let (pubkey, _) = Pubkey::find_program_address(
                &[self.payer.as_ref(), &chain_id.to_le_bytes()],
                &self.program_id,
            );
            pubkey
        };
        let mut accounts = Vec::with_capacity(5 + account_list.len());
        if let Some(holder) = holder {
            accounts.push(AccountMeta::new(holder, false));
        }
        accounts.push(AccountMeta::new(self.payer, true));
        accounts.push(AccountMeta::new(treasury, false));
        accounts.push(AccountMeta::new(operator_balance, false));
        accounts.push(AccountMeta::new_readonly(
            solana_system_interface::program::ID,
            false,
        ));
        for account in account_list {
            accounts.push(if account.is_writable {
                AccountMeta::new(account.pubkey, false)
            } else {
                AccountMeta::new_readonly(account.pubkey, false)
            });
        }
        accounts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> IxBuilder {
        IxBuilder::new(
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            B256::repeat_byte(0x11),
            128,
            b"treasury_pool",
            1_400_000,
            0,
        )
    }

    #[test]
    fn treasury_index_is_stable_and_bounded() {
        let b = builder();
        let (pool_a, index_a) = b.treasury_pool();
        let (pool_b, index_b) = b.treasury_pool();
        assert_eq!(pool_a, pool_b);
        assert_eq!(index_a, index_b);
        assert!(index_a < 128);
    }

    #[test]
    fn holder_write_layout() {
        let b = builder();
        let ix = b.holder_write_ix(900, &[0xab; 16]);
        assert_eq!(ix.data[0], EvmIxCode::HolderWrite as u8);
        assert_eq!(&ix.data[1..33], B256::repeat_byte(0x11).as_slice());
        assert_eq!(u64::from_le_bytes(ix.data[33..41].try_into().unwrap()), 900);
        assert_eq!(&ix.data[41..], &[0xab; 16]);
    }

    #[test]
    fn step_ix_carries_uniq_idx() {
        let b = builder();
        let ix_a = b.tx_step_from_account_ix(1, 500, 0, &[]);
        let ix_b = b.tx_step_from_account_ix(1, 500, 1, &[]);
        assert_ne!(ix_a.data, ix_b.data);
        assert_eq!(ix_a.data[0], EvmIxCode::TxStepFromAccount as u8);
    }

    #[test]
    fn single_shot_prefix_has_no_priority_fee() {
        let b = builder();
        assert_eq!(b.cu_prefix(false).len(), 2);
        assert_eq!(b.cu_prefix(true).len(), 2); // fee configured as zero
    }
}
