//! Settlement transaction list sender.
//!
//! Takes a batch of [`SolTx`] and drives every one of them to a terminal
//! state: sign with a current blockhash, submit, poll confirmations, fetch
//! receipts, classify, resubmit what is retryable and raise what is not.
//! Retries are bounded loops over explicit states, never recursion.

mod error_parser;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use solana_hash::Hash;
use solana_keypair::Keypair;
use solana_signature::Signature;

use crate::chain::{ChainError, Commitment, SolSendResult, SolTxReceipt, SolanaAdapter};
use crate::loader::{SolTx, SolTxBuildError};

pub use error_parser::TxErrorParser;

/// Wall-clock estimate of one settlement slot, used for the ALT retry sleep.
const ONE_BLOCK_TIME: Duration = Duration::from_millis(400);

/// Terminal or transient state of one settlement tx inside a send round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxSendStatus {
    WaitForReceipt,
    NoReceipt,
    GoodReceipt,
    NodeBehindError { slots_behind: u64 },
    BadNonceError { state_tx_cnt: u64, tx_nonce: u64 },
    AltInvalidIndexError,
    AlreadyFinalizedError,
    LogTruncatedError,
    BlockedAccountError,
    CUBudgetExceededError,
    BlockHashNotFoundError,
    AccountAlreadyExistsError,
    InvalidIxDataError,
    RequireResizeIterError,
    UnknownError,
}

impl TxSendStatus {
    /// The tx landed and did its work; nothing to resend.
    pub fn is_terminal_success(&self) -> bool {
        matches!(
            self,
            TxSendStatus::GoodReceipt
                | TxSendStatus::LogTruncatedError
                | TxSendStatus::AccountAlreadyExistsError
                | TxSendStatus::AlreadyFinalizedError
        )
    }

    fn is_resubmit(&self) -> bool {
        matches!(
            self,
            TxSendStatus::NoReceipt
                | TxSendStatus::BlockHashNotFoundError
                | TxSendStatus::AltInvalidIndexError
        )
    }
}

/// Final state of one settlement tx after [`TxListSender::send`].
#[derive(Debug)]
pub struct TxSendState {
    pub status: TxSendStatus,
    pub tx: SolTx,
    pub receipt: Option<SolTxReceipt>,
}

impl TxSendState {
    pub fn block_slot(&self) -> Option<u64> {
        self.receipt.as_ref().map(|r| r.slot)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("no more retries for the settlement tx list")]
    NoMoreRetries,
    #[error("fresh blockhash is already known to be bad")]
    BlockHashNotFound,
    #[error("settlement node is {slots_behind} slots behind")]
    NodeBehind { slots_behind: u64 },
    #[error("accounts are locked by another transaction")]
    BlockedAccounts,
    #[error("minimum commit level was not reached")]
    CommitLevel,
    #[error("nonce too low: state has {state_tx_cnt}, tx carries {tx_nonce}")]
    NonceTooLow { state_tx_cnt: u64, tx_nonce: u64 },
    #[error("compute budget exceeded")]
    CUBudgetExceeded,
    #[error("invalid instruction data")]
    InvalidIxData,
    #[error("transaction requires resize iterations")]
    RequireResizeIter,
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Build(#[from] SolTxBuildError),
}

/// Tuning for one sender instance; lifted off the global config so tests can
/// drive the loop tightly.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub retry_on_fail: usize,
    pub confirm_timeout: Duration,
    pub confirm_check: Duration,
    pub skip_preflight: bool,
    pub min_commit_for_done: Commitment,
    /// Percentage of sends sabotaged by the fuzz hooks; 0 disables them.
    pub fuzz_fail_pct: u8,
}

pub struct TxListSender {
    adapter: SolanaAdapter,
    signer: Arc<Keypair>,
    config: SenderConfig,
    block_hash: Option<(Hash, u64)>,
    bad_block_hash_set: HashSet<Hash>,
    state_map: HashMap<Signature, TxSendState>,
}

impl TxListSender {
    pub fn new(adapter: SolanaAdapter, signer: Arc<Keypair>, config: SenderConfig) -> Self {
        Self {
            adapter,
            signer,
            config,
            block_hash: None,
            bad_block_hash_set: HashSet::new(),
            state_map: HashMap::new(),
        }
    }

    /// Drives the list to terminal states. Returns every tx's final state on
    /// success; errors say what the caller should do next, not what broke.
    pub async fn send(&mut self, tx_list: Vec<SolTx>) -> Result<Vec<TxSendState>, SendError> {
        self.block_hash = None;
        self.state_map.clear();

        let mut work_list = tx_list;
        let mut retry_idx = 0usize;
        while retry_idx < self.config.retry_on_fail && !work_list.is_empty() {
            retry_idx += 1;
            self.sign_tx_list(&mut work_list).await?;
            self.submit_tx_list(&mut work_list).await?;
            tracing::debug!(retry = retry_idx, stat = %self.fmt_stat(), "sent settlement tx list");

            let (resubmit, mut alt_sleep) = self.collect_resubmit_list()?;
            work_list = resubmit;
            if work_list.is_empty() {
                self.wait_for_receipt_list().await?;
                tracing::debug!(retry = retry_idx, stat = %self.fmt_stat(), "receipt wait finished");
                let (resubmit, alt_sleep_after_wait) = self.collect_resubmit_list()?;
                work_list = resubmit;
                alt_sleep |= alt_sleep_after_wait;
            }
            if alt_sleep {
                // the table needs one slot to warm up after extension
                tokio::time::sleep(ONE_BLOCK_TIME).await;
            }
        }

        if !work_list.is_empty() {
            return Err(SendError::NoMoreRetries);
        }
        self.check_commit_level().await?;
        Ok(self.state_map.values().cloned().collect())
    }

    async fn get_block_hash(&mut self) -> Result<(Hash, u64), SendError> {
        if let Some((hash, _)) = self.block_hash {
            if self.bad_block_hash_set.contains(&hash) {
                self.block_hash = None;
            }
        }
        if self.block_hash.is_none() {
            let fresh = self
                .adapter
                .get_recent_block_hash(Commitment::Finalized)
                .await?;
            if self.bad_block_hash_set.contains(&fresh.0) {
                return Err(SendError::BlockHashNotFound);
            }
            self.block_hash = Some(fresh);
        }
        Ok(self.block_hash.expect("set above"))
    }

    async fn sign_tx_list(&mut self, tx_list: &mut [SolTx]) -> Result<(), SendError> {
        let (block_hash, _) = self.get_block_hash().await?;
        for tx in tx_list.iter_mut() {
            if tx.is_signed() {
                if let Some(sig) = tx.signature() {
                    self.state_map.remove(&sig);
                }
                match tx.recent_block_hash() {
                    Some(hash) if !self.bad_block_hash_set.contains(&hash) => continue,
                    _ => tx.reset(),
                }
            }
            let hash = self.pick_block_hash(block_hash).await;
            tx.sign(&self.signer, hash)?;
        }
        Ok(())
    }

    /// Fuzz hook: occasionally sign against a stale blockhash to exercise the
    /// resubmit path. Inactive when `fuzz_fail_pct` is zero.
    async fn pick_block_hash(&self, fresh: Hash) -> Hash {
        if self.config.fuzz_fail_pct == 0 {
            return fresh;
        }
        if rand::random::<u8>() % 100 >= self.config.fuzz_fail_pct {
            return fresh;
        }
        match self.adapter.get_recent_block_hash(Commitment::Processed).await {
            Ok((old, _)) => {
                tracing::debug!("fuzz: signing with non-finalized blockhash");
                old
            }
            Err(_) => fresh,
        }
    }

    async fn submit_tx_list(&mut self, tx_list: &mut Vec<SolTx>) -> Result<(), SendError> {
        // Fuzz hook: randomly hold back part of the batch so the receipt
        // poll sees gaps.
        let mut skipped: Vec<SolTx> = Vec::new();
        if self.config.fuzz_fail_pct > 0 && tx_list.len() > 1 {
            let pct = self.config.fuzz_fail_pct as u32;
            let mut keep = Vec::with_capacity(tx_list.len());
            for tx in tx_list.drain(..) {
                if rand::random::<u32>() % 100 < pct {
                    skipped.push(tx);
                } else {
                    keep.push(tx);
                }
            }
            *tx_list = keep;
        }

        let versioned: Vec<_> = tx_list
            .iter()
            .filter_map(|tx| tx.versioned().cloned())
            .collect();
        let result_list = self
            .adapter
            .send_tx_list(&versioned, self.config.skip_preflight)
            .await?;

        for (tx, result) in tx_list.iter().zip(result_list) {
            let status = match result {
                SolSendResult::Sig(_) | SolSendResult::AlreadyProcessed => {
                    TxSendStatus::WaitForReceipt
                }
                SolSendResult::Error(text) => {
                    let status = TxErrorParser::classify_send_error(&text);
                    if status == TxSendStatus::BlockHashNotFoundError {
                        if let Some(hash) = tx.recent_block_hash() {
                            self.bad_block_hash_set.insert(hash);
                        }
                    }
                    status
                }
            };
            self.add_state(tx.clone(), status, None);
        }
        for tx in skipped {
            self.add_state(tx, TxSendStatus::WaitForReceipt, None);
        }
        Ok(())
    }

    fn add_state(&mut self, tx: SolTx, status: TxSendStatus, receipt: Option<SolTxReceipt>) {
        let Some(sig) = tx.signature() else { return };
        self.state_map.insert(sig, TxSendState { status, tx, receipt });
    }

    async fn wait_for_receipt_list(&mut self) -> Result<(), SendError> {
        let wait_sig_list: Vec<Signature> = self
            .state_map
            .iter()
            .filter(|(_, state)| state.status == TxSendStatus::WaitForReceipt)
            .map(|(sig, _)| *sig)
            .collect();
        if wait_sig_list.is_empty() {
            return Ok(());
        }

        let commitment_set = Commitment::Confirmed.upper_set();
        let base_height = self.block_hash.map(|(_, height)| height);
        let deadline = tokio::time::Instant::now() + self.config.confirm_timeout;
        loop {
            let confirmed = self
                .adapter
                .check_confirm_of_tx_sig_list(&wait_sig_list, &commitment_set, base_height)
                .await?;
            if confirmed || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(self.config.confirm_check).await;
        }

        let receipt_list = self
            .adapter
            .get_tx_receipt_list(&wait_sig_list, Commitment::Confirmed)
            .await?;
        for (sig, receipt) in wait_sig_list.into_iter().zip(receipt_list) {
            let Some(state) = self.state_map.get_mut(&sig) else {
                continue;
            };
            match receipt {
                None => {
                    state.status = TxSendStatus::NoReceipt;
                    if let Some(hash) = state.tx.recent_block_hash() {
                        self.bad_block_hash_set.insert(hash);
                    }
                }
                Some(receipt) => {
                    state.status = TxErrorParser::classify_receipt(&receipt);
                    state.receipt = Some(receipt);
                }
            }
        }
        Ok(())
    }

    /// Splits the state map by propagation intent: resubmit states return to
    /// the work list, reschedule/strategy/fatal states raise. The second
    /// return is true when an ALT warm-up sleep is owed before resubmitting.
    fn collect_resubmit_list(&mut self) -> Result<(Vec<SolTx>, bool), SendError> {
        let mut has_good_receipt = false;
        let mut blocked = false;
        for state in self.state_map.values() {
            match &state.status {
                TxSendStatus::GoodReceipt => has_good_receipt = true,
                TxSendStatus::BlockedAccountError => blocked = true,
                TxSendStatus::NodeBehindError { slots_behind } => {
                    return Err(SendError::NodeBehind {
                        slots_behind: *slots_behind,
                    });
                }
                TxSendStatus::BadNonceError {
                    state_tx_cnt,
                    tx_nonce,
                } => {
                    return Err(SendError::NonceTooLow {
                        state_tx_cnt: *state_tx_cnt,
                        tx_nonce: *tx_nonce,
                    });
                }
                TxSendStatus::CUBudgetExceededError => return Err(SendError::CUBudgetExceeded),
                TxSendStatus::InvalidIxDataError => return Err(SendError::InvalidIxData),
                TxSendStatus::RequireResizeIterError => return Err(SendError::RequireResizeIter),
                _ => {}
            }
        }

        // An AlreadyFinalized receipt means a predecessor completed the whole
        // run; whatever is still outstanding is moot.
        if self
            .state_map
            .values()
            .any(|s| s.status == TxSendStatus::AlreadyFinalizedError)
        {
            return Ok((Vec::new(), false));
        }

        if blocked && !has_good_receipt {
            return Err(SendError::BlockedAccounts);
        }

        let alt_sleep = self
            .state_map
            .values()
            .any(|s| s.status == TxSendStatus::AltInvalidIndexError);

        let mut resubmit: Vec<SolTx> = Vec::new();
        let sig_list: Vec<Signature> = self
            .state_map
            .iter()
            .filter(|(_, state)| {
                state.status.is_resubmit()
                    || (state.status == TxSendStatus::BlockedAccountError && has_good_receipt)
            })
            .map(|(sig, _)| *sig)
            .collect();
        for sig in sig_list {
            if let Some(state) = self.state_map.remove(&sig) {
                let mut tx = state.tx;
                tx.reset();
                resubmit.push(tx);
            }
        }
        Ok((resubmit, alt_sleep))
    }

    async fn check_commit_level(&self) -> Result<(), SendError> {
        let commitment = self.config.min_commit_for_done;
        if commitment <= Commitment::Confirmed {
            // receipts were fetched at Confirmed already
            return Ok(());
        }
        let good_sig_list: Vec<Signature> = self
            .state_map
            .iter()
            .filter(|(_, state)| state.status.is_terminal_success())
            .map(|(sig, _)| *sig)
            .collect();
        if good_sig_list.is_empty() {
            return Ok(());
        }
        let reached = self
            .adapter
            .check_confirm_of_tx_sig_list(&good_sig_list, &commitment.upper_set(), None)
            .await?;
        if !reached {
            return Err(SendError::CommitLevel);
        }
        Ok(())
    }

    fn fmt_stat(&self) -> String {
        let mut counts: HashMap<&'static str, usize> = HashMap::new();
        for state in self.state_map.values() {
            let name = match state.status {
                TxSendStatus::WaitForReceipt => "WaitForReceipt",
                TxSendStatus::NoReceipt => "NoReceipt",
                TxSendStatus::GoodReceipt => "GoodReceipt",
                TxSendStatus::NodeBehindError { .. } => "NodeBehind",
                TxSendStatus::BadNonceError { .. } => "BadNonce",
                TxSendStatus::AltInvalidIndexError => "AltInvalidIndex",
                TxSendStatus::AlreadyFinalizedError => "AlreadyFinalized",
                TxSendStatus::LogTruncatedError => "LogTruncated",
                TxSendStatus::BlockedAccountError => "BlockedAccount",
                TxSendStatus::CUBudgetExceededError => "CUBudgetExceeded",
                TxSendStatus::BlockHashNotFoundError => "BlockHashNotFound",
                TxSendStatus::AccountAlreadyExistsError => "AccountAlreadyExists",
                TxSendStatus::InvalidIxDataError => "InvalidIxData",
                TxSendStatus::RequireResizeIterError => "RequireResizeIter",
                TxSendStatus::UnknownError => "Unknown",
            };
            *counts.entry(name).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .map(|(name, cnt)| format!("{name} {cnt}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_success_set() {
        assert!(TxSendStatus::GoodReceipt.is_terminal_success());
        assert!(TxSendStatus::LogTruncatedError.is_terminal_success());
        assert!(TxSendStatus::AccountAlreadyExistsError.is_terminal_success());
        assert!(TxSendStatus::AlreadyFinalizedError.is_terminal_success());
        assert!(!TxSendStatus::BlockedAccountError.is_terminal_success());
        assert!(!TxSendStatus::NoReceipt.is_terminal_success());
    }

    #[test]
    fn resubmit_set() {
        assert!(TxSendStatus::NoReceipt.is_resubmit());
        assert!(TxSendStatus::BlockHashNotFoundError.is_resubmit());
        assert!(TxSendStatus::AltInvalidIndexError.is_resubmit());
        assert!(!TxSendStatus::GoodReceipt.is_resubmit());
    }
}
