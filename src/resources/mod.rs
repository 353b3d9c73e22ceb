//! Operator resource pool.
//!
//! A resource is a (signer keypair, holder account) pair. One resource
//! drives at most one Ethereum transaction at a time; the pool hands them
//! out round-robin, pinning a resource to its transaction signature for the
//! transaction's lifetime. Fresh resources start Disabled and go through an
//! on-chain initialization before they are eligible.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use alloy_primitives::B256;
use solana_keypair::Keypair;
use solana_pubkey::Pubkey;
use solana_signer::Signer;

use crate::chain::{ChainError, Commitment, SolanaAdapter};
use crate::evm::NeonTxHash;
use crate::loader::{HolderInfo, HolderStatus, IxBuilder, SolTx};
use crate::sender::{SendError, SenderConfig, TxListSender};
use crate::types::StuckTxInfo;

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("operator balance {balance} below the minimum {min_balance}")]
    LowBalance { balance: u64, min_balance: u64 },
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Send(#[from] SendError),
    #[error("holder in unusable state: {0}")]
    BadHolder(String),
}

/// One (signer, holder) pair. Clones share the keypair.
#[derive(Debug, Clone)]
pub struct OpResource {
    pub signer: Arc<Keypair>,
    pub resource_id: u32,
    pub holder: Pubkey,
    pub holder_seed: String,
}

impl OpResource {
    pub fn new(signer: Arc<Keypair>, resource_id: u32, program_id: &Pubkey) -> Self {
        let holder_seed = format!("holder-{resource_id:08x}");
        let holder = Pubkey::create_with_seed(&signer.pubkey(), &holder_seed, program_id)
            .expect("seed within limits");
        Self {
            signer,
            resource_id,
            holder,
            holder_seed,
        }
    }

    pub fn payer(&self) -> Pubkey {
        self.signer.pubkey()
    }
}

#[derive(Default)]
struct PoolInner {
    disabled: VecDeque<OpResource>,
    enabled: VecDeque<OpResource>,
    taken: HashMap<NeonTxHash, OpResource>,
    /// Last resource id used for a tx signature, so a rescheduled tx gets
    /// the same holder back when it is free.
    pin_map: HashMap<NeonTxHash, u32>,
}

/// Thread-safe pool; the only mutable state shared between executor workers.
pub struct OpResourcePool {
    inner: Mutex<PoolInner>,
}

impl OpResourcePool {
    /// Builds the full resource set from configured signers; everything
    /// starts Disabled until initialization enables it.
    pub fn new(signer_list: &[Arc<Keypair>], resource_cnt_per_signer: u32, program_id: &Pubkey) -> Self {
        let mut disabled = VecDeque::new();
        for signer in signer_list {
            for resource_id in 0..resource_cnt_per_signer {
                disabled.push_back(OpResource::new(signer.clone(), resource_id, program_id));
            }
        }
        Self {
            inner: Mutex::new(PoolInner {
                disabled,
                ..PoolInner::default()
            }),
        }
    }

    /// Pops one Disabled resource for initialization, if any.
    pub fn get_disabled(&self) -> Option<OpResource> {
        self.inner.lock().expect("pool lock").disabled.pop_front()
    }

    pub fn enable(&self, resource: OpResource) {
        self.inner.lock().expect("pool lock").enabled.push_back(resource);
    }

    /// Returns a resource to Disabled; it must pass initialization again.
    pub fn disable(&self, resource: OpResource) {
        let mut inner = self.inner.lock().expect("pool lock");
        inner.pin_map.retain(|_, id| *id != resource.resource_id);
        inner.disabled.push_back(resource);
    }

    /// Round-robin acquire pinned by tx signature: a transaction that held a
    /// resource before gets the same one back if it is currently free.
    pub fn acquire(&self, neon_tx_sig: NeonTxHash) -> Option<OpResource> {
        let mut inner = self.inner.lock().expect("pool lock");
        if inner.taken.contains_key(&neon_tx_sig) {
            // a worker already runs this tx; refuse a second resource
            return None;
        }
        let position = inner.pin_map.get(&neon_tx_sig).and_then(|pinned_id| {
            inner
                .enabled
                .iter()
                .position(|r| r.resource_id == *pinned_id)
        });
        let resource = match position {
            Some(idx) => inner.enabled.remove(idx),
            None => inner.enabled.pop_front(),
        }?;
        inner.pin_map.insert(neon_tx_sig, resource.resource_id);
        inner.taken.insert(neon_tx_sig, resource.clone());
        Some(resource)
    }

    pub fn release(&self, neon_tx_sig: &NeonTxHash) {
        let mut inner = self.inner.lock().expect("pool lock");
        if let Some(resource) = inner.taken.remove(neon_tx_sig) {
            inner.enabled.push_back(resource);
        }
    }

    /// Removes an acquired resource from circulation entirely, for callers
    /// that must disable it instead of returning it to the ring.
    pub fn take(&self, neon_tx_sig: &NeonTxHash) -> Option<OpResource> {
        let mut inner = self.inner.lock().expect("pool lock");
        inner.pin_map.remove(neon_tx_sig);
        inner.taken.remove(neon_tx_sig)
    }

    /// Drops the pin once the transaction left the mempool for good.
    pub fn forget(&self, neon_tx_sig: &NeonTxHash) {
        let mut inner = self.inner.lock().expect("pool lock");
        inner.taken.remove(neon_tx_sig);
        inner.pin_map.remove(neon_tx_sig);
    }

    pub fn enabled_cnt(&self) -> usize {
        self.inner.lock().expect("pool lock").enabled.len()
    }

    pub fn disabled_cnt(&self) -> usize {
        self.inner.lock().expect("pool lock").disabled.len()
    }
}

/// Outcome of one resource initialization.
#[derive(Debug)]
pub struct InitOutcome {
    pub resource: OpResource,
    /// A predecessor's transaction found Active in the holder; the resource
    /// is still enabled, the stuck tx goes to the dictionary.
    pub stuck_tx: Option<StuckTxInfo>,
}

/// Performs the on-chain side of resource initialization: balance check,
/// holder creation or re-creation, holder status read.
pub struct ResourceInitializer {
    adapter: SolanaAdapter,
    program_id: Pubkey,
    holder_size: usize,
    min_balance: u64,
    sender_config: SenderConfig,
    treasury_pool_cnt: u32,
    treasury_pool_seed: Vec<u8>,
    cu_limit: u32,
}

impl ResourceInitializer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adapter: SolanaAdapter,
        program_id: Pubkey,
        holder_size: usize,
        min_balance: u64,
        sender_config: SenderConfig,
        treasury_pool_cnt: u32,
        treasury_pool_seed: Vec<u8>,
        cu_limit: u32,
    ) -> Self {
        Self {
            adapter,
            program_id,
            holder_size,
            min_balance,
            sender_config,
            treasury_pool_cnt,
            treasury_pool_seed,
            cu_limit,
        }
    }

    pub async fn init(&self, resource: OpResource) -> Result<InitOutcome, ResourceError> {
        let balance = self
            .adapter
            .get_balance(&resource.payer(), Commitment::Confirmed)
            .await?;
        if balance < self.min_balance {
            return Err(ResourceError::LowBalance {
                balance,
                min_balance: self.min_balance,
            });
        }

        let holder_info = self.read_holder(&resource).await?;
        let holder_info = match holder_info {
            None => {
                self.create_holder(&resource, false).await?;
                self.read_holder(&resource)
                    .await?
                    .unwrap_or_else(|| HolderInfo::empty(resource.holder))
            }
            Some(info) if info.data_size != self.holder_size && info.is_free_for_use() => {
                self.create_holder(&resource, true).await?;
                self.read_holder(&resource)
                    .await?
                    .unwrap_or_else(|| HolderInfo::empty(resource.holder))
            }
            Some(info) => info,
        };

        let stuck_tx = match &holder_info.status {
            HolderStatus::Active {
                neon_tx_sig,
                chain_id,
            } => {
                tracing::warn!(
                    holder = %resource.holder,
                    neon_tx_sig = %neon_tx_sig,
                    "holder carries a predecessor's active transaction"
                );
                Some(StuckTxInfo {
                    neon_tx_sig: *neon_tx_sig,
                    holder: resource.holder,
                    chain_id: *chain_id,
                    rlp: Vec::new(),
                    alt_address_list: Vec::new(),
                    start_time: 0,
                })
            }
            _ => None,
        };

        Ok(InitOutcome { resource, stuck_tx })
    }

    async fn read_holder(&self, resource: &OpResource) -> Result<Option<HolderInfo>, ResourceError> {
        let account = self
            .adapter
            .get_account(&resource.holder, Commitment::Confirmed)
            .await?;
        Ok(account.map(|acct| HolderInfo::from_account_data(resource.holder, &acct.data)))
    }

    /// Creates the holder, first deleting a wrong-sized one. Creation is
    /// idempotent on chain: `AccountAlreadyExists` counts as success.
    async fn create_holder(
        &self,
        resource: &OpResource,
        delete_first: bool,
    ) -> Result<(), ResourceError> {
        let builder = IxBuilder::new(
            self.program_id,
            resource.payer(),
            resource.holder,
            B256::ZERO,
            self.treasury_pool_cnt,
            &self.treasury_pool_seed,
            self.cu_limit,
            0,
        );
        let rent = self.adapter.get_rent_exempt_balance(self.holder_size).await?;
        let mut tx_list = Vec::new();
        if delete_first {
            tx_list.push(SolTx::new_legacy(
                "HolderDelete",
                resource.payer(),
                vec![builder.holder_delete_ix(&resource.holder_seed)],
            ));
        }
        let create_account_ix = solana_system_interface::instruction::create_account_with_seed(
            &resource.payer(),
            &resource.holder,
            &resource.payer(),
            &resource.holder_seed,
            rent,
            self.holder_size as u64,
            &self.program_id,
        );
        tx_list.push(SolTx::new_legacy(
            "HolderCreate",
            resource.payer(),
            vec![create_account_ix, builder.holder_create_ix(&resource.holder_seed)],
        ));

        let mut sender = TxListSender::new(
            self.adapter.clone(),
            resource.signer.clone(),
            self.sender_config.clone(),
        );
        sender.send(tx_list).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(resource_cnt: u32) -> OpResourcePool {
        let signer = Arc::new(Keypair::new());
        let program_id = Pubkey::new_unique();
        let pool = OpResourcePool::new(&[signer], resource_cnt, &program_id);
        while let Some(resource) = pool.get_disabled() {
            pool.enable(resource);
        }
        pool
    }

    #[test]
    fn acquire_is_exclusive_per_tx() {
        let pool = pool_with(2);
        let sig = B256::repeat_byte(1);
        let first = pool.acquire(sig).expect("resource");
        assert!(pool.acquire(sig).is_none());
        pool.release(&sig);
        let again = pool.acquire(sig).expect("resource");
        assert_eq!(first.resource_id, again.resource_id);
    }

    #[test]
    fn pinning_survives_release() {
        let pool = pool_with(3);
        let sig_a = B256::repeat_byte(1);
        let sig_b = B256::repeat_byte(2);
        let res_a = pool.acquire(sig_a).expect("resource");
        let _res_b = pool.acquire(sig_b).expect("resource");
        pool.release(&sig_a);
        // another tx grabs resources in between
        let sig_c = B256::repeat_byte(3);
        let _res_c = pool.acquire(sig_c).expect("resource");
        let res_a_again = pool.acquire(sig_a).expect("resource");
        assert_eq!(res_a.resource_id, res_a_again.resource_id);
    }

    #[test]
    fn disable_removes_pins() {
        let pool = pool_with(1);
        let sig = B256::repeat_byte(9);
        let resource = pool.acquire(sig).expect("resource");
        pool.release(&sig);
        let resource = pool.acquire(sig).expect("resource again");
        pool.forget(&sig);
        pool.disable(resource);
        assert_eq!(pool.enabled_cnt(), 0);
        assert_eq!(pool.disabled_cnt(), 1);
    }

    #[test]
    fn holder_derivation_is_deterministic() {
        let signer = Arc::new(Keypair::new());
        let program_id = Pubkey::new_unique();
        let res_a = OpResource::new(signer.clone(), 5, &program_id);
        let res_b = OpResource::new(signer, 5, &program_id);
        assert_eq!(res_a.holder, res_b.holder);
    }
}
