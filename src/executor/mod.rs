//! Executor dispatch.
//!
//! Workers bind mempool entries to operator resources and strategies, then
//! apply the result back: done, fail, reschedule, resource disable or
//! stuck-tx hand-over. Periodic upkeep (gas price, EVM config, resource
//! init, stuck poll, eviction) runs on one cooperative loop in
//! [`periodic`].

pub mod periodic;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use solana_keypair::Keypair;
use solana_pubkey::Pubkey;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::chain::SolanaAdapter;
use crate::evm::NeonTx;
use crate::mempool::{MempoolHandle, MpTxEntry, StuckTxDict};
use crate::resources::{OpResource, OpResourcePool};
use crate::sender::SenderConfig;
use crate::strategy::{
    EmulatorClient, EvmConfigData, ExecResult, StrategyCtx, StrategyEngine,
};
use crate::types::StuckTxInfo;

/// Idle sleep when there is nothing to execute or no free resource.
const IDLE_SLEEP: Duration = Duration::from_millis(200);

/// Everything a worker needs, cheap to clone per task.
#[derive(Clone)]
pub struct ExecutorEnv {
    pub adapter: SolanaAdapter,
    pub emulator: EmulatorClient,
    pub mempool: MempoolHandle,
    pub resources: Arc<OpResourcePool>,
    pub stuck_dict: Arc<Mutex<StuckTxDict>>,
    pub alt_queue: periodic::AltFreeQueue,
    pub evm_config_rx: tokio::sync::watch::Receiver<EvmConfigData>,
    pub sender_config: SenderConfig,
    pub program_id: Pubkey,
    pub default_chain_id: u64,
    pub cu_limit: u32,
    pub cu_priority_fee: u64,
}

impl ExecutorEnv {
    fn strategy_ctx(&self, entry: &MpTxEntry, resource: OpResource) -> StrategyCtx {
        StrategyCtx {
            tx: entry.tx.clone(),
            exec_cfg: entry.exec_cfg.clone(),
            resource,
            adapter: self.adapter.clone(),
            emulator: self.emulator.clone(),
            evm_config: self.evm_config_rx.borrow().clone(),
            sender_config: self.sender_config.clone(),
            program_id: self.program_id,
            default_chain_id: self.default_chain_id,
            cu_limit: self.cu_limit,
            cu_priority_fee: self.cu_priority_fee,
        }
    }
}

/// Spawns `worker_cnt` dispatch loops onto the tracker.
pub fn spawn_workers(
    tracker: &TaskTracker,
    env: ExecutorEnv,
    worker_cnt: usize,
    cancel: CancellationToken,
) {
    for worker_idx in 0..worker_cnt {
        let env = env.clone();
        let cancel = cancel.clone();
        tracker.spawn(async move {
            worker_loop(env, worker_idx, cancel).await;
        });
    }
}

async fn worker_loop(env: ExecutorEnv, worker_idx: usize, cancel: CancellationToken) {
    tracing::info!(worker_idx, "executor worker started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = run_one(&env) => {}
        }
    }
    tracing::info!(worker_idx, "executor worker stopped");
}

/// One dispatch round: pick, bind, execute, apply.
async fn run_one(env: &ExecutorEnv) {
    let Some(candidate) = env.mempool.peek_top().await else {
        tokio::time::sleep(IDLE_SLEEP).await;
        return;
    };
    let tx_hash = candidate.tx.tx_hash();

    let Some(resource) = env.resources.acquire(tx_hash) else {
        tokio::time::sleep(IDLE_SLEEP).await;
        return;
    };
    let Some(entry) = env.mempool.acquire(tx_hash).await else {
        // someone else took it between peek and acquire
        env.resources.release(&tx_hash);
        return;
    };

    let signer = resource.signer.clone();
    let ctx = env.strategy_ctx(&entry, resource);
    let engine = StrategyEngine::new(ctx);
    let result = if entry.exec_cfg.is_stuck_tx {
        engine.execute_stuck().await
    } else {
        engine.execute().await
    };
    apply_result(env, tx_hash, signer, result).await;
}

async fn apply_result(
    env: &ExecutorEnv,
    tx_hash: crate::evm::NeonTxHash,
    signer: Arc<Keypair>,
    result: ExecResult,
) {
    match result {
        ExecResult::Done { result, exec_cfg } => {
            tracing::info!(
                tx = %tx_hash,
                status = result.status,
                gas_used = result.gas_used,
                lost = result.is_lost,
                "transaction executed"
            );
            enqueue_alt_free(env, &signer, &exec_cfg.alt_address_list);
            env.mempool.done(tx_hash).await;
            env.resources.release(&tx_hash);
            env.resources.forget(&tx_hash);
        }
        ExecResult::NonceTooLow {
            state_tx_cnt,
            tx_nonce,
        } => {
            tracing::info!(tx = %tx_hash, state_tx_cnt, tx_nonce, "nonce too low");
            env.mempool.fail(tx_hash).await;
            env.resources.release(&tx_hash);
            env.resources.forget(&tx_hash);
        }
        ExecResult::Reschedule { exec_cfg } => {
            env.mempool.cancel(tx_hash, Some(exec_cfg)).await;
            env.resources.release(&tx_hash);
        }
        ExecResult::BadResource { reason, exec_cfg } => {
            tracing::warn!(tx = %tx_hash, reason, "resource disabled");
            env.mempool.cancel(tx_hash, Some(exec_cfg)).await;
            if let Some(resource) = env.resources.take(&tx_hash) {
                env.resources.disable(resource);
            }
        }
        ExecResult::StuckTx { stuck_tx, exec_cfg } => {
            tracing::warn!(
                tx = %tx_hash,
                stuck = %stuck_tx.neon_tx_sig,
                holder = %stuck_tx.holder,
                "stuck transaction discovered, handing over"
            );
            env.stuck_dict
                .lock()
                .expect("stuck dict lock")
                .add_own(stuck_tx);
            env.mempool.cancel(tx_hash, Some(exec_cfg)).await;
            env.resources.release(&tx_hash);
        }
        ExecResult::Failed { reason, .. } => {
            tracing::error!(tx = %tx_hash, reason, "transaction failed");
            env.mempool.fail(tx_hash).await;
            env.resources.release(&tx_hash);
            env.resources.forget(&tx_hash);
        }
    }
}

/// Tables that served a finished transaction move to the deactivate/close
/// cycle owned by the periodic task.
fn enqueue_alt_free(env: &ExecutorEnv, signer: &Arc<Keypair>, table_list: &[Pubkey]) {
    if table_list.is_empty() {
        return;
    }
    let mut queue = env.alt_queue.lock().expect("alt queue lock");
    for table in table_list {
        queue.push(periodic::AltFreeEntry {
            table: *table,
            authority: signer.clone(),
            deactivated_at_slot: None,
        });
    }
}

/// Resumes one stuck transaction on a free resource, holder overridden to
/// the stuck holder. Returns it to the dictionary on failure.
pub async fn resume_stuck_tx(env: &ExecutorEnv, stuck_tx: StuckTxInfo) {
    if stuck_tx.rlp.is_empty() {
        tracing::warn!(
            stuck = %stuck_tx.neon_tx_sig,
            "stuck transaction without RLP; waiting for the indexer snapshot"
        );
        env.stuck_dict
            .lock()
            .expect("stuck dict lock")
            .requeue(stuck_tx);
        return;
    }
    let tx = match NeonTx::from_rlp(&stuck_tx.rlp) {
        Ok(tx) => tx,
        Err(e) => {
            tracing::error!(stuck = %stuck_tx.neon_tx_sig, error = %e, "stuck RLP does not decode");
            return;
        }
    };
    let tx_hash = tx.tx_hash();
    let Some(resource) = env.resources.acquire(tx_hash) else {
        env.stuck_dict
            .lock()
            .expect("stuck dict lock")
            .requeue(stuck_tx);
        return;
    };
    // the run must drive the holder the tx is stuck in, not the resource's
    let resource = OpResource {
        holder: stuck_tx.holder,
        holder_seed: String::new(),
        ..resource
    };

    let mut exec_cfg = crate::evm::ExecConfig::new(0);
    exec_cfg.is_stuck_tx = true;
    exec_cfg.stuck_holder = Some(stuck_tx.holder);
    exec_cfg.alt_address_list = stuck_tx.alt_address_list.clone();
    let entry = MpTxEntry {
        tx,
        exec_cfg,
        chain_id: stuck_tx.chain_id,
    };
    let ctx = env.strategy_ctx(&entry, resource);
    let result = StrategyEngine::new(ctx).execute_stuck().await;

    match result {
        ExecResult::Done { result, .. } => {
            tracing::info!(
                stuck = %stuck_tx.neon_tx_sig,
                gas_used = result.gas_used,
                "stuck transaction finalized"
            );
            env.stuck_dict
                .lock()
                .expect("stuck dict lock")
                .complete(stuck_tx.neon_tx_sig, stuck_tx.start_time);
        }
        _ => {
            tracing::warn!(stuck = %stuck_tx.neon_tx_sig, "stuck resume failed, requeueing");
            env.stuck_dict
                .lock()
                .expect("stuck dict lock")
                .requeue(stuck_tx);
        }
    }
    env.resources.release(&tx_hash);
    env.resources.forget(&tx_hash);
}
