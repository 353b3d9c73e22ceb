use std::collections::HashMap;

use solana_pubkey::Pubkey;

/// One settlement account discovered by emulation, with its access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolDiscoveredAccount {
    pub pubkey: Pubkey,
    pub is_writable: bool,
    /// Emulation reported the account does not exist yet; the strategy must
    /// create its balance account before execution.
    pub is_missing: bool,
    /// Ethereum address behind the account, when it is a balance account.
    pub eth_address: Option<alloy_primitives::Address>,
}

/// Mutable execution bookkeeping that travels with one [`crate::evm::NeonTx`]
/// through the mempool, the strategy engine and back on reschedule.
///
/// The transaction itself never changes after acceptance; everything learned
/// about it while trying to execute it accumulates here.
#[derive(Debug, Clone, Default)]
pub struct ExecConfig {
    /// Sender's on-chain transaction count at mempool entry.
    pub state_tx_cnt: u64,
    /// EVM step count reported by the last emulation.
    pub emulated_step_cnt: Option<u64>,
    /// Accounts touched according to the last emulation.
    pub account_list: Vec<SolDiscoveredAccount>,
    /// Extra iterations required for account resizes.
    pub resize_iter_cnt: u64,
    /// Lookup tables created for this transaction, if any.
    pub alt_address_list: Vec<Pubkey>,
    /// How many settlement txs of each kind were sent for this transaction
    /// across attempts. Keyed by instruction name.
    pub sol_tx_cnt: HashMap<&'static str, u32>,
    /// Strategy probing resumes from this index after a strategy failure.
    pub strategy_idx: usize,
    /// The transaction is a recovered stuck one: the holder already carries
    /// its RLP and must not be rewritten.
    pub is_stuck_tx: bool,
    /// Holder the stuck transaction lives in (foreign takeover path).
    pub stuck_holder: Option<Pubkey>,
}

impl ExecConfig {
    pub fn new(state_tx_cnt: u64) -> Self {
        Self {
            state_tx_cnt,
            ..Self::default()
        }
    }

    pub fn has_sol_tx(&self, name: &str) -> bool {
        self.sol_tx_cnt.get(name).copied().unwrap_or(0) > 0
    }

    pub fn mark_sol_tx(&mut self, name: &'static str, cnt: u32) {
        *self.sol_tx_cnt.entry(name).or_insert(0) += cnt;
    }

    /// Writable account keys only, as counted against the legacy tx cap.
    pub fn writable_account_cnt(&self) -> usize {
        self.account_list.iter().filter(|a| a.is_writable).count()
    }
}
