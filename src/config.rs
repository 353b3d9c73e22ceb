//! Gateway configuration.
//!
//! Everything arrives env-var style (with CLI overrides); `.env` files are
//! honored at startup. Option names track the deployment documentation, not
//! the internals.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use solana_keypair::Keypair;
use solana_pubkey::Pubkey;
use url::Url;

use crate::chain::Commitment;
use crate::indexer::StartSlot;
use crate::sender::SenderConfig;

#[derive(Debug, Clone, Parser)]
#[command(name = "neon-gateway")]
#[command(about = "Ethereum JSON-RPC gateway over a Solana-resident EVM program")]
pub struct Config {
    /// Settlement chain RPC endpoint.
    #[arg(long, env = "SOLANA_URL", default_value = "http://127.0.0.1:8899")]
    pub solana_url: String,

    /// Address of the on-chain EVM program.
    #[arg(long, env = "EVM_LOADER")]
    pub evm_loader: Pubkey,

    /// Core-api service running emulation off-chain.
    #[arg(long, env = "NEON_CORE_API_URL", default_value = "http://127.0.0.1:8085")]
    pub neon_core_api_url: Url,

    /// Postgres DSN; omit to run with the in-memory store.
    #[arg(long, env = "POSTGRES_DSN")]
    pub postgres_dsn: Option<String>,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    #[arg(long, env = "PORT", default_value_t = 9090)]
    pub port: u16,

    /// Comma-separated base58 operator secret keys.
    #[arg(long, env = "OPERATOR_KEYPAIR_LIST", value_delimiter = ',')]
    pub operator_keypair_list: Vec<String>,

    /// Holder accounts derived per signer.
    #[arg(long, env = "RESOURCE_CNT_PER_SIGNER", default_value_t = 8)]
    pub resource_cnt_per_signer: u32,

    #[arg(long, env = "MIN_OPERATOR_BALANCE", default_value_t = 1_000_000_000)]
    pub min_operator_balance: u64,

    /// Chain id served when a transaction does not carry one.
    #[arg(long, env = "CHAIN_ID", default_value_t = 245_022_926)]
    pub chain_id: u64,

    #[arg(long, env = "START_SLOT", default_value = "LATEST")]
    pub start_slot: StartSlot,

    #[arg(long, env = "REINDEX_START_SLOT", default_value = "CONTINUE")]
    pub reindex_start_slot: String,

    #[arg(long, env = "REINDEX_THREAD_CNT", default_value_t = 3)]
    pub reindex_thread_cnt: usize,

    #[arg(long, env = "REINDEX_RANGE_LEN", default_value_t = 10_800)]
    pub reindex_range_len: u64,

    #[arg(long, env = "REINDEX_MAX_RANGE_CNT", default_value_t = 16)]
    pub reindex_max_range_cnt: usize,

    /// Submission retry budget per settlement tx list.
    #[arg(long, env = "RETRY_ON_FAIL", default_value_t = 64)]
    pub retry_on_fail: usize,

    #[arg(long, env = "CONFIRM_TIMEOUT_SEC", default_value_t = 10)]
    pub confirm_timeout_sec: u64,

    #[arg(long, env = "CONFIRM_CHECK_MSEC", default_value_t = 100)]
    pub confirm_check_msec: u64,

    #[arg(long, env = "MEMPOOL_CAPACITY", default_value_t = 4096)]
    pub mempool_capacity: usize,

    #[arg(long, env = "MEMPOOL_CAPACITY_HIGH_WATERMARK", default_value_t = 0.9)]
    pub mempool_capacity_high_watermark: f64,

    /// Gas-price observation window, minutes.
    #[arg(long, env = "MEMPOOL_GAS_PRICE_WINDOW", default_value_t = 8)]
    pub mempool_gas_price_window: u64,

    #[arg(long, env = "MEMPOOL_EVICTION_TIMEOUT_SEC", default_value_t = 3 * 3600)]
    pub mempool_eviction_timeout_sec: u64,

    #[arg(long, env = "HOLDER_SIZE", default_value_t = 131_072)]
    pub holder_size: usize,

    /// Settlement slots before an Active holder counts as stuck.
    #[arg(long, env = "HOLDER_TIMEOUT", default_value_t = 512)]
    pub holder_timeout: u64,

    /// Slots between lookup-table deactivation and close.
    #[arg(long, env = "ALT_FREEING_DEPTH", default_value_t = 513)]
    pub alt_freeing_depth: u64,

    #[arg(long, env = "CU_LIMIT", default_value_t = 1_400_000)]
    pub cu_limit: u32,

    /// Per-CU priority fee in microlamports, iterative strategies only.
    #[arg(long, env = "CU_PRIORITY_FEE", default_value_t = 0)]
    pub cu_priority_fee: u64,

    /// Minimum commitment for a transaction to count as done.
    #[arg(long, env = "MIN_COMMIT_FOR_DONE", default_value = "confirmed")]
    pub min_commit_for_done: Commitment,

    /// Minimum commitment before a receipt is served over RPC.
    #[arg(long, env = "MIN_COMMIT_FOR_RPC_RECEIPT", default_value = "confirmed")]
    pub min_commit_for_rpc_receipt: Commitment,

    #[arg(long, env = "SKIP_PREFLIGHT", default_value_t = false)]
    pub skip_preflight: bool,

    /// Fault-injection percentage for the sender fuzz hooks; 0 disables.
    #[arg(long, env = "FUZZ_FAIL_PCT", default_value_t = 0)]
    pub fuzz_fail_pct: u8,

    #[arg(long, env = "EXECUTOR_CNT", default_value_t = 8)]
    pub executor_cnt: usize,

    #[arg(long, env = "INDEXER_POLL_MSEC", default_value_t = 400)]
    pub indexer_poll_msec: u64,

    #[arg(long, env = "INDEXER_BATCH_BLOCK_CNT", default_value_t = 32)]
    pub indexer_batch_block_cnt: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("operator keypair {idx} does not parse")]
    BadKeypair { idx: usize },
    #[error("no operator keypairs configured")]
    NoKeypairs,
}

impl Config {
    pub fn load() -> Self {
        Config::parse()
    }

    pub fn sender_config(&self) -> SenderConfig {
        SenderConfig {
            retry_on_fail: self.retry_on_fail,
            confirm_timeout: Duration::from_secs(self.confirm_timeout_sec),
            confirm_check: Duration::from_millis(self.confirm_check_msec),
            skip_preflight: self.skip_preflight,
            min_commit_for_done: self.min_commit_for_done,
            fuzz_fail_pct: self.fuzz_fail_pct,
        }
    }

    /// Decodes the configured operator keys.
    pub fn operator_signers(&self) -> Result<Vec<Arc<Keypair>>, ConfigError> {
        if self.operator_keypair_list.is_empty() {
            return Err(ConfigError::NoKeypairs);
        }
        self.operator_keypair_list
            .iter()
            .enumerate()
            .map(|(idx, encoded)| {
                let trimmed = encoded.trim();
                let mut buf = [0u8; 64];
                let len = bs58::decode(trimmed)
                    .onto(&mut buf)
                    .map_err(|_| ConfigError::BadKeypair { idx })?;
                if len != 64 {
                    return Err(ConfigError::BadKeypair { idx });
                }
                Keypair::try_from(&buf[..])
                    .map(Arc::new)
                    .map_err(|_| ConfigError::BadKeypair { idx })
            })
            .collect()
    }
}
