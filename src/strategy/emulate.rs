use serde::{Deserialize, Serialize};
use solana_pubkey::Pubkey;
use url::Url;

use crate::evm::{NeonTx, SolDiscoveredAccount};

#[derive(Debug, thiserror::Error)]
pub enum EmulatorError {
    #[error("emulator request failed: {0}")]
    Transport(String),
}

/// Result of emulating one Ethereum transaction against recent chain state.
#[derive(Debug, Clone, Deserialize)]
pub struct EmulatorResult {
    pub exit_status: String,
    pub steps_executed: u64,
    pub used_gas: u64,
    #[serde(default)]
    pub resize_iter_cnt: u64,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub solana_accounts: Vec<EmulatedAccount>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmulatedAccount {
    pub pubkey: String,
    #[serde(default)]
    pub is_writable: bool,
    #[serde(default)]
    pub is_missing: bool,
    #[serde(default)]
    pub eth_address: Option<String>,
}

impl EmulatorResult {
    pub fn is_revert(&self) -> bool {
        self.exit_status == "revert"
    }

    pub fn discovered_accounts(&self) -> Vec<SolDiscoveredAccount> {
        self.solana_accounts
            .iter()
            .filter_map(|acct| {
                let pubkey: Pubkey = acct.pubkey.parse().ok()?;
                let eth_address = acct
                    .eth_address
                    .as_deref()
                    .and_then(|addr| addr.parse().ok());
                Some(SolDiscoveredAccount {
                    pubkey,
                    is_writable: acct.is_writable,
                    is_missing: acct.is_missing,
                    eth_address,
                })
            })
            .collect()
    }
}

/// Current parameters of the on-chain EVM program, re-read periodically and
/// published as an immutable snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvmConfigData {
    #[serde(default)]
    pub chain_id_list: Vec<u64>,
    pub evm_step_min: u64,
    pub treasury_pool_cnt: u32,
    pub treasury_pool_seed: String,
    #[serde(default)]
    pub evm_version: String,
}

impl Default for EvmConfigData {
    fn default() -> Self {
        Self {
            chain_id_list: Vec::new(),
            evm_step_min: 500,
            treasury_pool_cnt: 128,
            treasury_pool_seed: "treasury_pool".to_string(),
            evm_version: String::new(),
        }
    }
}

#[derive(Serialize)]
struct EmulateRequest {
    tx: String,
    chain_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    step_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    block_slot: Option<u64>,
}

/// HTTP client for the core-api service that runs EVM emulation off-chain.
/// The gateway treats it as an external collaborator.
#[derive(Debug, Clone)]
pub struct EmulatorClient {
    http: reqwest::Client,
    url: Url,
}

impl EmulatorClient {
    pub fn new(url: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
        }
    }

    pub async fn emulate(
        &self,
        tx: &NeonTx,
        chain_id: u64,
        block_slot: Option<u64>,
    ) -> Result<EmulatorResult, EmulatorError> {
        let request = EmulateRequest {
            tx: hex::encode(tx.rlp()),
            chain_id: tx.chain_id().or(Some(chain_id)),
            step_limit: None,
            block_slot,
        };
        let url = self
            .url
            .join("api/emulate")
            .map_err(|e| EmulatorError::Transport(e.to_string()))?;
        let response = self
            .http
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EmulatorError::Transport(e.to_string()))?;
        let result: EmulatorResult = response
            .error_for_status()
            .map_err(|e| EmulatorError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| EmulatorError::Transport(e.to_string()))?;
        Ok(result)
    }

    /// On-chain transaction count of one Ethereum account.
    pub async fn get_state_tx_cnt(
        &self,
        address: &alloy_primitives::Address,
        chain_id: u64,
    ) -> Result<u64, EmulatorError> {
        #[derive(Deserialize)]
        struct TxCnt {
            tx_cnt: u64,
        }
        let url = self
            .url
            .join(&format!("api/transaction-count/{address:#x}/{chain_id}"))
            .map_err(|e| EmulatorError::Transport(e.to_string()))?;
        let cnt: TxCnt = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| EmulatorError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| EmulatorError::Transport(e.to_string()))?;
        Ok(cnt.tx_cnt)
    }

    /// Suggested gas price from the oracle behind the core-api.
    pub async fn get_gas_price(&self) -> Result<u128, EmulatorError> {
        #[derive(Deserialize)]
        struct GasPrice {
            suggested_gas_price: u128,
        }
        let url = self
            .url
            .join("api/gas-price")
            .map_err(|e| EmulatorError::Transport(e.to_string()))?;
        let price: GasPrice = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| EmulatorError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| EmulatorError::Transport(e.to_string()))?;
        Ok(price.suggested_gas_price)
    }

    pub async fn get_evm_config(&self) -> Result<EvmConfigData, EmulatorError> {
        let url = self
            .url
            .join("api/config")
            .map_err(|e| EmulatorError::Transport(e.to_string()))?;
        self.http
            .get(url)
            .send()
            .await
            .map_err(|e| EmulatorError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| EmulatorError::Transport(e.to_string()))
    }
}
