//! Periodic upkeep, one cooperative loop.
//!
//! Gas-price refresh, EVM-config snapshot publishing, resource
//! initialization (one Disabled resource per tick), the stuck-tx poll from
//! persistence, mempool eviction and the ALT deactivate/close cycle all
//! share this task; none of them may block it for long.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use solana_keypair::Keypair;
use solana_pubkey::Pubkey;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::chain::Commitment;
use crate::db::NeonDb;
use crate::executor::ExecutorEnv;
use crate::loader::{AltPlan, SolTx, parse_alt_account};
use crate::mempool::GasPriceCalculator;
use crate::resources::{ResourceError, ResourceInitializer};
use crate::sender::TxListSender;
use crate::strategy::EvmConfigData;

/// One lookup table waiting for its deactivate/close sequence.
#[derive(Debug, Clone)]
pub struct AltFreeEntry {
    pub table: Pubkey,
    pub authority: Arc<Keypair>,
    pub deactivated_at_slot: Option<u64>,
}

pub type AltFreeQueue = Arc<Mutex<Vec<AltFreeEntry>>>;

pub struct PeriodicEnv {
    pub exec_env: ExecutorEnv,
    pub db: Arc<dyn NeonDb>,
    pub initializer: Arc<ResourceInitializer>,
    pub evm_config_tx: watch::Sender<EvmConfigData>,
    pub eviction_timeout_sec: u64,
    pub gas_price_window_min: u64,
    pub alt_freeing_depth: u64,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub async fn run_periodic_task(env: PeriodicEnv, cancel: CancellationToken) {
    let mut gas_calc = GasPriceCalculator::new(env.gas_price_window_min);
    let mut gas_tick = tokio::time::interval(Duration::from_secs(10));
    let mut config_tick = tokio::time::interval(Duration::from_secs(60));
    let mut resource_tick = tokio::time::interval(Duration::from_secs(5));
    let mut stuck_tick = tokio::time::interval(Duration::from_secs(30));
    let mut evict_tick = tokio::time::interval(Duration::from_secs(60));
    let mut alt_tick = tokio::time::interval(Duration::from_secs(30));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = gas_tick.tick() => refresh_gas_price(&env, &mut gas_calc).await,
            _ = config_tick.tick() => refresh_evm_config(&env).await,
            _ = resource_tick.tick() => init_one_resource(&env).await,
            _ = stuck_tick.tick() => poll_stuck_txs(&env).await,
            _ = evict_tick.tick() => env.exec_env.mempool.evict_expired(env.eviction_timeout_sec).await,
            _ = alt_tick.tick() => free_alt_tables(&env).await,
        }
    }
    tracing::info!("periodic task stopped");
}

async fn refresh_gas_price(env: &PeriodicEnv, gas_calc: &mut GasPriceCalculator) {
    match env.exec_env.emulator.get_gas_price().await {
        Ok(price) => {
            gas_calc.observe(unix_now(), price);
            let floor = gas_calc.min_executable_gas_price();
            env.exec_env.mempool.set_min_gas_price(floor).await;
        }
        Err(e) => tracing::warn!(error = %e, "gas price refresh failed"),
    }
}

async fn refresh_evm_config(env: &PeriodicEnv) {
    match env.exec_env.emulator.get_evm_config().await {
        Ok(config) => {
            // readers hold the previous snapshot until they next borrow
            let _ = env.evm_config_tx.send(config);
        }
        Err(e) => tracing::warn!(error = %e, "EVM config refresh failed"),
    }
}

/// One Disabled resource per tick keeps initialization from starving the
/// loop.
async fn init_one_resource(env: &PeriodicEnv) {
    let Some(resource) = env.exec_env.resources.get_disabled() else {
        return;
    };
    match env.initializer.init(resource).await {
        Ok(outcome) => {
            if let Some(stuck_tx) = outcome.stuck_tx {
                env.exec_env
                    .stuck_dict
                    .lock()
                    .expect("stuck dict lock")
                    .add_own(stuck_tx);
            }
            tracing::info!(
                resource_id = outcome.resource.resource_id,
                holder = %outcome.resource.holder,
                "resource enabled"
            );
            env.exec_env.resources.enable(outcome.resource);
        }
        Err(ResourceError::LowBalance {
            balance,
            min_balance,
        }) => {
            tracing::warn!(balance, min_balance, "operator balance too low, resource stays disabled");
        }
        Err(e) => tracing::warn!(error = %e, "resource initialization failed"),
    }
}

/// Merges the indexer's stuck snapshot into the external dictionary and
/// resumes one stuck transaction when the pool has capacity.
async fn poll_stuck_txs(env: &PeriodicEnv) {
    match env.db.get_latest_stuck().await {
        Ok(Some(snapshot)) => {
            env.exec_env
                .stuck_dict
                .lock()
                .expect("stuck dict lock")
                .add_external_list(snapshot.tx_list);
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "stuck snapshot poll failed"),
    }

    let stuck_tx = env
        .exec_env
        .stuck_dict
        .lock()
        .expect("stuck dict lock")
        .acquire();
    if let Some(stuck_tx) = stuck_tx {
        crate::executor::resume_stuck_tx(&env.exec_env, stuck_tx).await;
    }
}

/// Walks the ALT free-up queue: deactivate, wait `alt_freeing_depth` slots,
/// then close. Frozen or foreign tables just fall off the queue.
async fn free_alt_tables(env: &PeriodicEnv) {
    let pending: Vec<AltFreeEntry> = {
        let queue = env.exec_env.alt_queue.lock().expect("alt queue lock");
        queue.clone()
    };
    if pending.is_empty() {
        return;
    }
    let current_slot = match env
        .exec_env
        .adapter
        .get_block_slot(Commitment::Finalized)
        .await
    {
        Ok(slot) => slot,
        Err(e) => {
            tracing::warn!(error = %e, "ALT cycle skipped, slot read failed");
            return;
        }
    };

    let mut survivors = Vec::with_capacity(pending.len());
    for mut entry in pending {
        match entry.deactivated_at_slot {
            None => match deactivate_alt(env, &entry).await {
                Ok(()) => {
                    entry.deactivated_at_slot = Some(current_slot);
                    survivors.push(entry);
                }
                Err(e) => {
                    tracing::warn!(table = %entry.table, error = %e, "ALT deactivate failed");
                    survivors.push(entry);
                }
            },
            Some(deactivated_at) if current_slot >= deactivated_at + env.alt_freeing_depth => {
                match close_alt(env, &entry).await {
                    Ok(()) => {
                        tracing::info!(table = %entry.table, "lookup table closed");
                    }
                    Err(e) => {
                        tracing::warn!(table = %entry.table, error = %e, "ALT close failed");
                        survivors.push(entry);
                    }
                }
            }
            Some(_) => survivors.push(entry),
        }
    }
    *env.exec_env.alt_queue.lock().expect("alt queue lock") = survivors;
}

async fn deactivate_alt(env: &PeriodicEnv, entry: &AltFreeEntry) -> Result<(), String> {
    use solana_signer::Signer;
    let account = env
        .exec_env
        .adapter
        .get_account(&entry.table, Commitment::Confirmed)
        .await
        .map_err(|e| e.to_string())?;
    let Some(account) = account else {
        // already closed by someone else
        return Ok(());
    };
    if let Some(info) = parse_alt_account(&account.data) {
        if info.is_frozen() || info.authority != Some(entry.authority.pubkey()) {
            // a frozen or foreign table counts as gone for waiting purposes
            return Ok(());
        }
        if info.is_deactivated() {
            return Ok(());
        }
    }
    let plan = AltPlan::from_existing(entry.table, entry.authority.pubkey(), Vec::new());
    let tx = SolTx::new_legacy("AltDeactivate", entry.authority.pubkey(), vec![plan.deactivate_ix()]);
    send_alt_tx(env, entry, tx).await
}

async fn close_alt(env: &PeriodicEnv, entry: &AltFreeEntry) -> Result<(), String> {
    use solana_signer::Signer;
    let account = env
        .exec_env
        .adapter
        .get_account(&entry.table, Commitment::Confirmed)
        .await
        .map_err(|e| e.to_string())?;
    if account.is_none() {
        return Ok(());
    }
    let plan = AltPlan::from_existing(entry.table, entry.authority.pubkey(), Vec::new());
    let tx = SolTx::new_legacy("AltClose", entry.authority.pubkey(), vec![plan.close_ix()]);
    send_alt_tx(env, entry, tx).await
}

async fn send_alt_tx(env: &PeriodicEnv, entry: &AltFreeEntry, tx: SolTx) -> Result<(), String> {
    let mut sender = TxListSender::new(
        env.exec_env.adapter.clone(),
        entry.authority.clone(),
        env.exec_env.sender_config.clone(),
    );
    sender.send(vec![tx]).await.map(|_| ()).map_err(|e| e.to_string())
}
