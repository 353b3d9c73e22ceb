use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use solana_account::Account;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::{
    RpcBlockConfig, RpcSendTransactionConfig, RpcTransactionConfig,
};
use solana_client::rpc_request::{RpcError, RpcRequest};
use solana_client::rpc_response::{RpcBlockCommitment, RpcConfirmedTransactionStatusWithSignature};
use solana_hash::Hash;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_transaction::versioned::VersionedTransaction;
use solana_transaction_status_client_types::{
    EncodedConfirmedTransactionWithStatusMeta, TransactionDetails, UiConfirmedBlock,
    UiTransactionEncoding,
};

use crate::chain::Commitment;

/// Receipt of one settlement transaction as returned by `getTransaction`.
pub type SolTxReceipt = EncodedConfirmedTransactionWithStatusMeta;

/// A slot lagging the Safe cutoff by more than this triggers the per-block
/// voted-stake check instead of the signature-status shortcut.
const SAFE_SLOT_LAG: u64 = 400;

/// `getMultipleAccounts` caps the key list server-side.
const ACCOUNT_BATCH_LIMIT: usize = 50;

/// `getSignatureStatuses` accepts up to 256 signatures; stay well below the
/// 48 KiB payload ceiling.
const SIG_BATCH_LIMIT: usize = 100;

const RETRY_SLEEP: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// The endpoint kept failing after the configured retry budget. The
    /// message deliberately excludes the endpoint URL.
    #[error("settlement chain unavailable: {kind}")]
    Unavailable { kind: String },
    #[error("settlement chain request failed: {0}")]
    Rpc(String),
    #[error("history not available before slot {first_available_slot}")]
    HistoryNotFound { first_available_slot: u64 },
}

impl ChainError {
    fn from_client_error(e: &ClientError) -> ChainError {
        ChainError::Rpc(format!("{}", e.kind()))
    }
}

/// Mirror of one settlement block. A skipped slot yields an empty mirror so
/// callers can keep walking a contiguous slot range.
#[derive(Debug, Clone)]
pub struct SolBlockInfo {
    pub block_slot: u64,
    pub block_hash: String,
    pub parent_block_hash: String,
    pub parent_block_slot: u64,
    pub block_time: Option<i64>,
    pub block_height: Option<u64>,
    pub tx_list: Vec<solana_transaction_status_client_types::EncodedTransactionWithStatusMeta>,
    is_empty: bool,
}

impl SolBlockInfo {
    pub fn empty(block_slot: u64) -> Self {
        Self {
            block_slot,
            block_hash: String::new(),
            parent_block_hash: String::new(),
            parent_block_slot: 0,
            block_time: None,
            block_height: None,
            tx_list: Vec::new(),
            is_empty: true,
        }
    }

    fn from_ui_block(block_slot: u64, block: UiConfirmedBlock) -> Self {
        Self {
            block_slot,
            block_hash: block.blockhash,
            parent_block_hash: block.previous_blockhash,
            parent_block_slot: block.parent_slot,
            block_time: block.block_time,
            block_height: block.block_height,
            tx_list: block.transactions.unwrap_or_default(),
            is_empty: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.is_empty
    }
}

/// One result per submitted transaction, positionally aligned with the input.
#[derive(Debug, Clone)]
pub enum SolSendResult {
    Sig(Signature),
    /// The node has already seen this transaction; treat as submitted.
    AlreadyProcessed,
    Error(String),
}

/// RPC client facade for the settlement chain.
///
/// Cheap to clone; the underlying HTTP client is shared.
#[derive(Clone)]
pub struct SolanaAdapter {
    client: Arc<RpcClient>,
    retry_on_fail: usize,
}

impl std::fmt::Debug for SolanaAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaAdapter")
            .field("retry_on_fail", &self.retry_on_fail)
            .finish()
    }
}

impl SolanaAdapter {
    pub fn new(url: &str, retry_on_fail: usize) -> Self {
        let client = RpcClient::new_with_timeout(url.to_string(), Duration::from_secs(30));
        Self {
            client: Arc::new(client),
            retry_on_fail: retry_on_fail.max(1),
        }
    }

    fn is_transient(e: &ClientError) -> bool {
        matches!(
            e.kind(),
            ClientErrorKind::Io(_)
                | ClientErrorKind::Reqwest(_)
                | ClientErrorKind::RpcError(RpcError::RpcRequestError(_))
        )
    }

    /// Runs `op` retrying transient transport failures with a 1 s back-off.
    /// Non-transient RPC errors surface immediately.
    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, ChainError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, ClientError>>,
    {
        let mut last_kind = String::new();
        for retry_idx in 0..self.retry_on_fail {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if Self::is_transient(&e) => {
                    last_kind = format!("{}", e.kind());
                    tracing::warn!(retry = retry_idx, "transient chain RPC failure, retrying");
                    tokio::time::sleep(RETRY_SLEEP).await;
                }
                Err(e) => return Err(ChainError::from_client_error(&e)),
            }
        }
        Err(ChainError::Unavailable { kind: last_kind })
    }

    pub async fn get_account(
        &self,
        pubkey: &Pubkey,
        commitment: Commitment,
    ) -> Result<Option<Account>, ChainError> {
        let commitment = commitment.to_rpc_commitment();
        let response = self
            .with_retry(|| async {
                self.client
                    .get_account_with_commitment(pubkey, commitment)
                    .await
            })
            .await?;
        Ok(response.value)
    }

    /// Windowed account read: only `length` bytes from `offset`, for large
    /// holder accounts where the tag header is enough.
    pub async fn get_account_slice(
        &self,
        pubkey: &Pubkey,
        commitment: Commitment,
        offset: usize,
        length: usize,
    ) -> Result<Option<Account>, ChainError> {
        let config = solana_client::rpc_config::RpcAccountInfoConfig {
            encoding: Some(solana_account_decoder_client_types::UiAccountEncoding::Base64),
            data_slice: Some(solana_account_decoder_client_types::UiDataSliceConfig {
                offset,
                length,
            }),
            commitment: Some(commitment.to_rpc_commitment()),
            min_context_slot: None,
        };
        let response = self
            .with_retry(|| async {
                self.client
                    .get_account_with_config(pubkey, config.clone())
                    .await
            })
            .await?;
        Ok(response.value)
    }

    /// Batched account read. Chunks the input at the server-side limit,
    /// preserves input order and fills unknown accounts with `None`.
    pub async fn get_account_list(
        &self,
        pubkeys: &[Pubkey],
        commitment: Commitment,
    ) -> Result<Vec<Option<Account>>, ChainError> {
        let commitment = commitment.to_rpc_commitment();
        let mut result = Vec::with_capacity(pubkeys.len());
        for chunk in pubkeys.chunks(ACCOUNT_BATCH_LIMIT) {
            let response = self
                .with_retry(|| async {
                    self.client
                        .get_multiple_accounts_with_commitment(chunk, commitment)
                        .await
                })
                .await?;
            result.extend(response.value);
        }
        Ok(result)
    }

    pub async fn get_balance(
        &self,
        pubkey: &Pubkey,
        commitment: Commitment,
    ) -> Result<u64, ChainError> {
        let commitment = commitment.to_rpc_commitment();
        let response = self
            .with_retry(|| async {
                self.client
                    .get_balance_with_commitment(pubkey, commitment)
                    .await
            })
            .await?;
        Ok(response.value)
    }

    pub async fn get_rent_exempt_balance(&self, data_size: usize) -> Result<u64, ChainError> {
        self.with_retry(|| async {
            self.client
                .get_minimum_balance_for_rent_exemption(data_size)
                .await
        })
        .await
    }

    /// Returns the latest blockhash together with the last block height at
    /// which it is still valid for signing.
    pub async fn get_recent_block_hash(
        &self,
        commitment: Commitment,
    ) -> Result<(Hash, u64), ChainError> {
        let commitment = commitment.to_rpc_commitment();
        self.with_retry(|| async {
            self.client
                .get_latest_blockhash_with_commitment(commitment)
                .await
        })
        .await
    }

    pub async fn get_block_slot(&self, commitment: Commitment) -> Result<u64, ChainError> {
        let commitment = commitment.to_rpc_commitment();
        self.with_retry(|| async { self.client.get_slot_with_commitment(commitment).await })
            .await
    }

    pub async fn get_block_height(&self, commitment: Commitment) -> Result<u64, ChainError> {
        let commitment = commitment.to_rpc_commitment();
        self.with_retry(|| async {
            self.client
                .get_block_height_with_commitment(commitment)
                .await
        })
        .await
    }

    pub async fn get_first_available_block(&self) -> Result<u64, ChainError> {
        self.with_retry(|| async { self.client.get_first_available_block().await })
            .await
    }

    /// Fetches one block with full transactions. A skipped or pruned slot
    /// yields [`SolBlockInfo::empty`] rather than an error, except when the
    /// node reports the slot fell off its history, which the caller must
    /// handle by re-reading the first available slot.
    pub async fn get_block_info(
        &self,
        block_slot: u64,
        commitment: Commitment,
    ) -> Result<SolBlockInfo, ChainError> {
        let config = RpcBlockConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            transaction_details: Some(TransactionDetails::Full),
            rewards: Some(false),
            commitment: Some(commitment.to_rpc_commitment()),
            max_supported_transaction_version: Some(0),
        };
        let result = self
            .client
            .get_block_with_config(block_slot, config.clone())
            .await;
        match result {
            Ok(block) => Ok(SolBlockInfo::from_ui_block(block_slot, block)),
            Err(e) => match e.kind() {
                ClientErrorKind::RpcError(RpcError::RpcResponseError { code, .. }) => {
                    match *code {
                        // slot was skipped, or is not present in long-term storage
                        -32007 | -32009 => Ok(SolBlockInfo::empty(block_slot)),
                        // first available block moved past the requested slot
                        -32001 | -32004 => {
                            let first_available_slot = self.get_first_available_block().await?;
                            Err(ChainError::HistoryNotFound {
                                first_available_slot,
                            })
                        }
                        _ => Err(ChainError::from_client_error(&e)),
                    }
                }
                _ if Self::is_transient(&e) => {
                    // one level of retry for block reads; the indexer walks
                    // slots sequentially and re-requests on its own cadence
                    self.with_retry(|| async {
                        self.client
                            .get_block_with_config(block_slot, config.clone())
                            .await
                    })
                    .await
                    .map(|block| SolBlockInfo::from_ui_block(block_slot, block))
                }
                _ => Err(ChainError::from_client_error(&e)),
            },
        }
    }

    pub async fn get_block_info_list(
        &self,
        slot_list: &[u64],
        commitment: Commitment,
    ) -> Result<Vec<SolBlockInfo>, ChainError> {
        let mut blocks = Vec::with_capacity(slot_list.len());
        for slot in slot_list {
            blocks.push(self.get_block_info(*slot, commitment).await?);
        }
        Ok(blocks)
    }

    /// One receipt per signature, `None` where the node has no record.
    pub async fn get_tx_receipt_list(
        &self,
        sig_list: &[Signature],
        commitment: Commitment,
    ) -> Result<Vec<Option<SolTxReceipt>>, ChainError> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(commitment.to_rpc_commitment()),
            max_supported_transaction_version: Some(0),
        };
        let mut receipts = Vec::with_capacity(sig_list.len());
        for sig in sig_list {
            let result = self
                .client
                .get_transaction_with_config(sig, config.clone())
                .await;
            match result {
                Ok(receipt) => receipts.push(Some(receipt)),
                Err(e) => match e.kind() {
                    ClientErrorKind::RpcError(RpcError::RpcResponseError { code: -32011, .. })
                    | ClientErrorKind::RpcError(RpcError::ForUser(_)) => receipts.push(None),
                    ClientErrorKind::SerdeJson(_) => receipts.push(None),
                    _ if Self::is_transient(&e) => {
                        let receipt = self
                            .with_retry(|| async {
                                self.client
                                    .get_transaction_with_config(sig, config.clone())
                                    .await
                            })
                            .await
                            .ok();
                        receipts.push(receipt);
                    }
                    _ => receipts.push(None),
                },
            }
        }
        Ok(receipts)
    }

    /// Submits the list one by one (the node offers no atomic batch), mapping
    /// each response into a positional [`SolSendResult`].
    pub async fn send_tx_list(
        &self,
        tx_list: &[VersionedTransaction],
        skip_preflight: bool,
    ) -> Result<Vec<SolSendResult>, ChainError> {
        let config = RpcSendTransactionConfig {
            skip_preflight,
            preflight_commitment: Some(
                Commitment::Processed.to_rpc_commitment().commitment,
            ),
            ..RpcSendTransactionConfig::default()
        };
        let mut results = Vec::with_capacity(tx_list.len());
        for tx in tx_list {
            let result = self.client.send_transaction_with_config(tx, config).await;
            match result {
                Ok(sig) => results.push(SolSendResult::Sig(sig)),
                Err(e) => {
                    let text = format!("{}", e.kind());
                    if text.contains("already been processed") {
                        results.push(SolSendResult::AlreadyProcessed);
                    } else {
                        // the sender loop re-signs and retries on its own budget
                        results.push(SolSendResult::Error(text));
                    }
                }
            }
        }
        Ok(results)
    }

    /// True iff every signature reached one of the given commitment levels.
    ///
    /// When a signature's slot trails the Safe cutoff by more than
    /// [`SAFE_SLOT_LAG`] slots the signature-status shortcut cannot answer
    /// and the check escalates to `getBlockCommitment`, treating a block as
    /// Safe when voted stake exceeds 2/3 of the total.
    pub async fn check_confirm_of_tx_sig_list(
        &self,
        sig_list: &[Signature],
        commitment_set: &[Commitment],
        base_block_height: Option<u64>,
    ) -> Result<bool, ChainError> {
        if sig_list.is_empty() {
            return Ok(true);
        }
        if let Some(base) = base_block_height {
            let height = self.get_block_height(Commitment::Confirmed).await?;
            if height > base {
                // blockhash expired; whatever landed has landed
                return Ok(true);
            }
        }

        let safe_slot = self.get_block_slot(Commitment::Safe).await?;
        for chunk in sig_list.chunks(SIG_BATCH_LIMIT) {
            let response = self
                .with_retry(|| async { self.client.get_signature_statuses(chunk).await })
                .await?;
            for status in response.value {
                let Some(status) = status else {
                    return Ok(false);
                };
                let level = Commitment::from_rpc_status(
                    status
                        .confirmation_status
                        .as_ref()
                        .map(|s| match s {
                            solana_transaction_status_client_types::TransactionConfirmationStatus::Processed => "processed",
                            solana_transaction_status_client_types::TransactionConfirmationStatus::Confirmed => "confirmed",
                            solana_transaction_status_client_types::TransactionConfirmationStatus::Finalized => "finalized",
                        }),
                );
                if commitment_set.contains(&level) {
                    continue;
                }
                // Deeply lagging slots never report Safe through the status
                // API; fall back to per-block stake accounting.
                if level >= Commitment::Confirmed
                    && status.slot + SAFE_SLOT_LAG < safe_slot
                    && commitment_set.contains(&Commitment::Safe)
                    && self.is_block_safe(status.slot).await?
                {
                    continue;
                }
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn is_block_safe(&self, block_slot: u64) -> Result<bool, ChainError> {
        let commitment: RpcBlockCommitment<[u64; 32]> = self
            .with_retry(|| async {
                self.client
                    .send(
                        RpcRequest::Custom {
                            method: "getBlockCommitment",
                        },
                        json!([block_slot]),
                    )
                    .await
            })
            .await?;
        let voted_stake: u64 = commitment
            .commitment
            .map(|array| array.iter().sum())
            .unwrap_or(0);
        if commitment.total_stake == 0 {
            return Ok(false);
        }
        Ok(voted_stake * 3 > commitment.total_stake * 2)
    }

    /// Signatures referencing `address`, newest first, as the indexer needs
    /// for ALT close-out bookkeeping.
    pub async fn get_sig_list_for_address(
        &self,
        address: &Pubkey,
        limit: usize,
        commitment: Commitment,
    ) -> Result<Vec<RpcConfirmedTransactionStatusWithSignature>, ChainError> {
        self.with_retry(|| async {
            self.client
                .get_signatures_for_address_with_config(
                    address,
                    GetConfirmedSignaturesForAddress2Config {
                        before: None,
                        until: None,
                        limit: Some(limit),
                        commitment: Some(commitment.to_rpc_commitment()),
                    },
                )
                .await
        })
        .await
    }
}
