//! Per-transaction execution strategy engine.
//!
//! Every Ethereum transaction is probed against a static, ordered list of
//! strategy descriptors; the first one that validates drives the run. The
//! ALT flavors are the same strategies with a lookup-table prep stage bolted
//! in front, so the list covers two axes without a class hierarchy.

pub mod emulate;
mod receipt;

use solana_pubkey::Pubkey;

use crate::chain::{Commitment, SolanaAdapter};
use crate::evm::{ExecConfig, NeonTx, NeonTxResult};
use crate::loader::{
    AltPlan, HOLDER_WRITE_CHUNK_LEN, HolderInfo, HolderStatus, IxBuilder, MAX_TX_ACCOUNT_CNT,
    SolTx,
};
use crate::resources::OpResource;
use crate::sender::{SendError, SenderConfig, TxListSender, TxSendState};
use crate::types::StuckTxInfo;

pub use emulate::{EmulatorClient, EmulatorError, EmulatorResult, EvmConfigData};
pub use receipt::{decode_tx_result, parse_tx_return, parse_tx_return_from_meta};

/// Execution shape of one strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// One `TxExecFromData` settlement tx does the whole run.
    SingleShot,
    /// `TxStepFromData` iterations carrying the RLP in instruction data.
    Iterative,
    /// `TxStepFromAccount` iterations over a pre-written holder.
    HolderIterative,
    /// `TxStepFromAccountNoChainId` for pre-EIP-155 transactions.
    NoChainId,
}

/// One entry of the ordered strategy list.
#[derive(Debug, Clone, Copy)]
pub struct StrategyDesc {
    pub name: &'static str,
    pub kind: StrategyKind,
    pub use_alt: bool,
}

/// Probe order: cheapest first, ALT flavor after its legacy sibling, the
/// no-chain-id path last.
pub const STRATEGY_LIST: &[StrategyDesc] = &[
    StrategyDesc {
        name: "SingleShot",
        kind: StrategyKind::SingleShot,
        use_alt: false,
    },
    StrategyDesc {
        name: "SingleShotWithALT",
        kind: StrategyKind::SingleShot,
        use_alt: true,
    },
    StrategyDesc {
        name: "Iterative",
        kind: StrategyKind::Iterative,
        use_alt: false,
    },
    StrategyDesc {
        name: "IterativeWithALT",
        kind: StrategyKind::Iterative,
        use_alt: true,
    },
    StrategyDesc {
        name: "HolderIterative",
        kind: StrategyKind::HolderIterative,
        use_alt: false,
    },
    StrategyDesc {
        name: "HolderIterativeWithALT",
        kind: StrategyKind::HolderIterative,
        use_alt: true,
    },
    StrategyDesc {
        name: "NoChainIdWithALT",
        kind: StrategyKind::NoChainId,
        use_alt: true,
    },
];

/// Fixed metas every exec/step instruction carries besides the discovered
/// account list.
const FIXED_ACCOUNT_CNT: usize = 5;

/// Extra iterations beyond the emulated step estimate.
const EXTRA_ITER_CNT: u64 = 2;

/// What the executor should do with the transaction next.
#[derive(Debug)]
pub enum ExecResult {
    Done {
        result: NeonTxResult,
        exec_cfg: ExecConfig,
    },
    /// Sender state advanced past this nonce; user-visible error.
    NonceTooLow { state_tx_cnt: u64, tx_nonce: u64 },
    /// Put the tx back at the top of its pool and release the resource.
    Reschedule { exec_cfg: ExecConfig },
    /// The resource cannot serve; disable it and reschedule the tx.
    BadResource {
        reason: String,
        exec_cfg: ExecConfig,
    },
    /// A foreign transaction occupies the holder.
    StuckTx {
        stuck_tx: StuckTxInfo,
        exec_cfg: ExecConfig,
    },
    /// Unrecoverable; surface to the submitter.
    Failed {
        reason: String,
        exec_cfg: ExecConfig,
    },
}

/// Everything one strategy run needs, bundled once by the executor.
pub struct StrategyCtx {
    pub tx: NeonTx,
    pub exec_cfg: ExecConfig,
    pub resource: OpResource,
    pub adapter: SolanaAdapter,
    pub emulator: EmulatorClient,
    pub evm_config: EvmConfigData,
    pub sender_config: SenderConfig,
    pub program_id: Pubkey,
    pub default_chain_id: u64,
    pub cu_limit: u32,
    pub cu_priority_fee: u64,
}

impl StrategyCtx {
    fn chain_id(&self) -> u64 {
        self.tx.chain_id().unwrap_or(self.default_chain_id)
    }

    fn builder(&self, with_priority_fee: bool) -> IxBuilder {
        IxBuilder::new(
            self.program_id,
            self.resource.payer(),
            self.resource.holder,
            self.tx.tx_hash(),
            self.evm_config.treasury_pool_cnt,
            self.evm_config.treasury_pool_seed.as_bytes(),
            self.cu_limit,
            if with_priority_fee {
                self.cu_priority_fee
            } else {
                0
            },
        )
    }
}

enum RunError {
    Reschedule(String),
    BadResource(String),
    NonceTooLow { state_tx_cnt: u64, tx_nonce: u64 },
    StuckTx(StuckTxInfo),
    Strategy(String),
    Fatal(String),
}

impl From<SendError> for RunError {
    fn from(e: SendError) -> Self {
        match e {
            SendError::NonceTooLow {
                state_tx_cnt,
                tx_nonce,
            } => RunError::NonceTooLow {
                state_tx_cnt,
                tx_nonce,
            },
            SendError::CUBudgetExceeded
            | SendError::InvalidIxData
            | SendError::RequireResizeIter => RunError::Strategy(e.to_string()),
            SendError::NoMoreRetries
            | SendError::BlockHashNotFound
            | SendError::NodeBehind { .. }
            | SendError::BlockedAccounts
            | SendError::CommitLevel
            | SendError::Chain(_) => RunError::Reschedule(e.to_string()),
            SendError::Build(e) => RunError::Fatal(e.to_string()),
        }
    }
}

impl From<crate::chain::ChainError> for RunError {
    fn from(e: crate::chain::ChainError) -> Self {
        RunError::Reschedule(e.to_string())
    }
}

/// Drives one Ethereum transaction through emulation, strategy selection,
/// prep stages, iterative submission and the single permitted cancel.
pub struct StrategyEngine {
    ctx: StrategyCtx,
    /// The holder already carries this transaction; skip the rewrite.
    resume_holder: bool,
    alt_plan: Option<AltPlan>,
}

impl StrategyEngine {
    pub fn new(ctx: StrategyCtx) -> Self {
        Self {
            ctx,
            resume_holder: false,
            alt_plan: None,
        }
    }

    pub async fn execute(mut self) -> ExecResult {
        let run = self.run().await;
        let exec_cfg = self.ctx.exec_cfg.clone();
        match run {
            Ok(result) => ExecResult::Done { result, exec_cfg },
            Err(RunError::NonceTooLow {
                state_tx_cnt,
                tx_nonce,
            }) => ExecResult::NonceTooLow {
                state_tx_cnt,
                tx_nonce,
            },
            Err(RunError::Reschedule(reason)) => {
                tracing::info!(tx = %self.ctx.tx.tx_hash(), reason, "rescheduling transaction");
                ExecResult::Reschedule { exec_cfg }
            }
            Err(RunError::BadResource(reason)) => ExecResult::BadResource { reason, exec_cfg },
            Err(RunError::StuckTx(stuck_tx)) => ExecResult::StuckTx { stuck_tx, exec_cfg },
            Err(RunError::Strategy(reason)) => ExecResult::Failed {
                reason: format!("no strategy could execute the transaction: {reason}"),
                exec_cfg,
            },
            Err(RunError::Fatal(reason)) => ExecResult::Failed { reason, exec_cfg },
        }
    }

    /// Entry for a stuck transaction being resumed: the holder already
    /// carries the RLP and the execution state, so the run goes straight to
    /// holder-backed iterations.
    pub async fn execute_stuck(mut self) -> ExecResult {
        self.resume_holder = true;
        self.ctx.exec_cfg.is_stuck_tx = true;
        // force the holder-backed strategies
        if self.ctx.exec_cfg.strategy_idx < 4 {
            self.ctx.exec_cfg.strategy_idx = 4;
        }
        self.execute().await
    }

    async fn run(&mut self) -> Result<NeonTxResult, RunError> {
        self.check_holder().await?;

        if !self.ctx.exec_cfg.is_stuck_tx {
            self.emulate().await?;
        }

        let mut strategy_idx = self.ctx.exec_cfg.strategy_idx;
        loop {
            let Some(desc) = STRATEGY_LIST.get(strategy_idx) else {
                return Err(RunError::Strategy("strategy list exhausted".to_string()));
            };
            if let Err(reason) = self.validate(desc) {
                tracing::debug!(strategy = desc.name, reason, "strategy rejected");
                strategy_idx += 1;
                continue;
            }
            self.ctx.exec_cfg.strategy_idx = strategy_idx;
            tracing::info!(tx = %self.ctx.tx.tx_hash(), strategy = desc.name, "strategy selected");

            match self.run_strategy(*desc).await {
                Ok(result) => return Ok(result),
                Err(RunError::Strategy(reason)) => {
                    tracing::warn!(strategy = desc.name, reason, "strategy failed, advancing");
                    strategy_idx += 1;
                    self.ctx.exec_cfg.strategy_idx = strategy_idx;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Reads the holder tag. An Active holder with a foreign signature is a
    /// stuck transaction left by a predecessor; with our signature it flips
    /// the run into resume mode.
    async fn check_holder(&mut self) -> Result<(), RunError> {
        // the tag header answers most runs; the account list is only needed
        // when an Active execution has to be adopted
        let header = self
            .ctx
            .adapter
            .get_account_slice(&self.ctx.resource.holder, Commitment::Confirmed, 0, 89)
            .await?;
        let Some(header) = header else {
            return Err(RunError::BadResource("holder account is gone".to_string()));
        };
        let info = HolderInfo::from_account_data(self.ctx.resource.holder, &header.data);
        match &info.status {
            HolderStatus::Active {
                neon_tx_sig,
                chain_id,
            } => {
                if *neon_tx_sig == self.ctx.tx.tx_hash() || self.ctx.exec_cfg.is_stuck_tx {
                    if *neon_tx_sig == self.ctx.tx.tx_hash() {
                        self.resume_holder = true;
                    }
                    let full = self
                        .ctx
                        .adapter
                        .get_account(&self.ctx.resource.holder, Commitment::Confirmed)
                        .await?;
                    if let Some(full) = full {
                        let info =
                            HolderInfo::from_account_data(self.ctx.resource.holder, &full.data);
                        self.adopt_locked_accounts(&info);
                    }
                    Ok(())
                } else {
                    let slot = self
                        .ctx
                        .adapter
                        .get_block_slot(Commitment::Confirmed)
                        .await
                        .unwrap_or(0);
                    Err(RunError::StuckTx(StuckTxInfo {
                        neon_tx_sig: *neon_tx_sig,
                        holder: self.ctx.resource.holder,
                        chain_id: *chain_id,
                        rlp: Vec::new(),
                        alt_address_list: Vec::new(),
                        start_time: slot,
                    }))
                }
            }
            _ => Ok(()),
        }
    }

    /// A resumed run has no emulation; the step instructions must carry the
    /// accounts the holder already locked.
    fn adopt_locked_accounts(&mut self, info: &HolderInfo) {
        if !self.ctx.exec_cfg.account_list.is_empty() {
            return;
        }
        self.ctx.exec_cfg.account_list = info
            .account_list
            .iter()
            .map(|(pubkey, is_writable)| crate::evm::SolDiscoveredAccount {
                pubkey: *pubkey,
                is_writable: *is_writable,
                is_missing: false,
                eth_address: None,
            })
            .collect();
    }

    async fn emulate(&mut self) -> Result<(), RunError> {
        let result = self
            .ctx
            .emulator
            .emulate(&self.ctx.tx, self.ctx.chain_id(), None)
            .await
            .map_err(|e| RunError::Reschedule(e.to_string()))?;
        tracing::debug!(
            tx = %self.ctx.tx.tx_hash(),
            steps = result.steps_executed,
            accounts = result.solana_accounts.len(),
            resize_iter_cnt = result.resize_iter_cnt,
            "emulation finished"
        );
        self.ctx.exec_cfg.emulated_step_cnt = Some(result.steps_executed);
        self.ctx.exec_cfg.resize_iter_cnt = result.resize_iter_cnt;
        self.ctx.exec_cfg.account_list = result.discovered_accounts();
        Ok(())
    }

    fn account_meta_cnt(&self) -> usize {
        self.ctx.exec_cfg.account_list.len() + FIXED_ACCOUNT_CNT
    }

    fn validate(&self, desc: &StrategyDesc) -> Result<(), String> {
        match desc.kind {
            StrategyKind::NoChainId => {
                if self.ctx.tx.has_chain_id() {
                    return Err("transaction carries a chain-id".to_string());
                }
            }
            _ => {
                if !self.ctx.tx.has_chain_id() {
                    return Err("transaction without chain-id".to_string());
                }
            }
        }

        if desc.kind == StrategyKind::SingleShot {
            if self.ctx.exec_cfg.resize_iter_cnt > 0 {
                return Err("resize iterations required".to_string());
            }
            let steps = self.ctx.exec_cfg.emulated_step_cnt.unwrap_or(u64::MAX);
            if steps > self.ctx.evm_config.evm_step_min {
                return Err(format!("emulated step count {steps} needs iterations"));
            }
        }

        // no-chain-id runs always ride a lookup table, whatever their size
        if desc.kind != StrategyKind::NoChainId {
            let account_cnt = self.account_meta_cnt();
            if desc.use_alt {
                if account_cnt <= MAX_TX_ACCOUNT_CNT {
                    return Err("account list fits a legacy transaction".to_string());
                }
            } else if account_cnt > MAX_TX_ACCOUNT_CNT {
                return Err(format!(
                    "account list of {account_cnt} exceeds the legacy cap"
                ));
            }
        }

        // The RLP-carrying shapes must fit the packet with everything else.
        if matches!(
            desc.kind,
            StrategyKind::SingleShot | StrategyKind::Iterative
        ) {
            self.build_size_probe(desc)
                .map_err(|e| format!("does not fit one settlement tx: {e}"))?;
        }
        Ok(())
    }

    fn build_size_probe(&self, desc: &StrategyDesc) -> Result<(), crate::loader::SolTxBuildError> {
        let builder = self.ctx.builder(desc.kind != StrategyKind::SingleShot);
        let chain_id = self.ctx.chain_id();
        let account_list = &self.ctx.exec_cfg.account_list;
        let mut ix_list = builder.cu_prefix(desc.kind != StrategyKind::SingleShot);
        match desc.kind {
            StrategyKind::SingleShot => {
                ix_list.push(builder.tx_exec_from_data_ix(chain_id, self.ctx.tx.rlp(), account_list));
            }
            _ => {
                ix_list.push(builder.tx_step_from_data_ix(
                    chain_id,
                    self.ctx.evm_config.evm_step_min as u32,
                    0,
                    self.ctx.tx.rlp(),
                    account_list,
                ));
            }
        }
        let tx = match (desc.use_alt, &self.alt_plan) {
            (true, Some(plan)) => {
                SolTx::new_v0(desc.name, self.ctx.resource.payer(), ix_list, plan.table_account())
            }
            (true, None) => {
                // plan does not exist yet at validation time; probe with a
                // synthetic table covering the discovered accounts
                let keys: Vec<Pubkey> = account_list.iter().map(|a| a.pubkey).collect();
                let plan = AltPlan::from_existing(
                    Pubkey::new_unique(),
                    self.ctx.resource.payer(),
                    keys,
                );
                SolTx::new_v0(desc.name, self.ctx.resource.payer(), ix_list, plan.table_account())
            }
            (false, _) => SolTx::new_legacy(desc.name, self.ctx.resource.payer(), ix_list),
        };
        tx.check_size(&self.ctx.resource.signer)
    }

    async fn run_strategy(&mut self, desc: StrategyDesc) -> Result<NeonTxResult, RunError> {
        self.prep(&desc).await?;
        let state_list = self.execute_tx_list(&desc).await?;
        if let Some(result) =
            decode_tx_result(&self.ctx.program_id, &state_list, false)
        {
            return Ok(result);
        }

        // iterative shapes get extra iterations before giving up
        if desc.kind != StrategyKind::SingleShot {
            for _ in 0..self.ctx.sender_config.retry_on_fail {
                let state_list = self.send_iterations(&desc, 1).await?;
                if let Some(result) =
                    decode_tx_result(&self.ctx.program_id, &state_list, false)
                {
                    return Ok(result);
                }
            }
            return self.cancel(&desc).await;
        }
        Err(RunError::Strategy(
            "single-shot run yielded no return event".to_string(),
        ))
    }

    async fn prep(&mut self, desc: &StrategyDesc) -> Result<(), RunError> {
        // lookup table first: later stages may reference it
        if desc.use_alt {
            self.prep_alt().await?;
        }

        let holder_backed = matches!(
            desc.kind,
            StrategyKind::HolderIterative | StrategyKind::NoChainId
        );
        if holder_backed && !self.resume_holder {
            self.write_holder().await?;
        }

        self.create_missing_balances().await?;
        Ok(())
    }

    async fn prep_alt(&mut self) -> Result<(), RunError> {
        if self.alt_plan.is_some() {
            return Ok(());
        }
        let builder = self.ctx.builder(false);
        let mut keys: Vec<Pubkey> = self
            .ctx
            .exec_cfg
            .account_list
            .iter()
            .map(|a| a.pubkey)
            .collect();
        keys.push(builder.holder());
        keys.sort();
        keys.dedup();

        // a rescheduled or stuck tx may already own a table
        if let Some(table) = self.ctx.exec_cfg.alt_address_list.first() {
            self.alt_plan = Some(AltPlan::from_existing(
                *table,
                self.ctx.resource.payer(),
                keys,
            ));
            return Ok(());
        }

        let recent_slot = self.ctx.adapter.get_block_slot(Commitment::Finalized).await?;
        let (plan, create_ix) = AltPlan::new(self.ctx.resource.payer(), recent_slot, keys);
        let mut tx_list = vec![SolTx::new_legacy(
            "AltCreate",
            self.ctx.resource.payer(),
            vec![create_ix],
        )];
        for extend_ix in plan.extend_ix_list() {
            tx_list.push(SolTx::new_legacy(
                "AltExtend",
                self.ctx.resource.payer(),
                vec![extend_ix],
            ));
        }
        let cnt = tx_list.len() as u32;
        self.send_list(tx_list).await?;
        self.ctx.exec_cfg.mark_sol_tx("AltCreate", cnt);
        self.ctx.exec_cfg.alt_address_list.push(plan.table());
        self.alt_plan = Some(plan);
        Ok(())
    }

    async fn write_holder(&mut self) -> Result<(), RunError> {
        let builder = self.ctx.builder(false);
        let rlp = self.ctx.tx.rlp();
        let mut tx_list = Vec::new();
        for (idx, chunk) in rlp.chunks(HOLDER_WRITE_CHUNK_LEN).enumerate() {
            let offset = (idx * HOLDER_WRITE_CHUNK_LEN) as u64;
            tx_list.push(SolTx::new_legacy(
                "HolderWrite",
                self.ctx.resource.payer(),
                vec![builder.holder_write_ix(offset, chunk)],
            ));
        }
        let cnt = tx_list.len() as u32;
        self.send_list(tx_list).await?;
        self.ctx.exec_cfg.mark_sol_tx("HolderWrite", cnt);
        Ok(())
    }

    async fn create_missing_balances(&mut self) -> Result<(), RunError> {
        let builder = self.ctx.builder(false);
        let chain_id = self.ctx.chain_id();
        let ix_list: Vec<_> = self
            .ctx
            .exec_cfg
            .account_list
            .iter()
            .filter(|acct| acct.is_missing)
            .filter_map(|acct| acct.eth_address.map(|addr| (addr, acct.pubkey)))
            .map(|(addr, _)| builder.create_balance_ix(&addr, chain_id))
            .collect();
        if ix_list.is_empty() {
            return Ok(());
        }
        let tx_list: Vec<SolTx> = ix_list
            .into_iter()
            .map(|ix| SolTx::new_legacy("CreateBalance", self.ctx.resource.payer(), vec![ix]))
            .collect();
        let cnt = tx_list.len() as u32;
        self.send_list(tx_list).await?;
        self.ctx.exec_cfg.mark_sol_tx("CreateBalance", cnt);
        Ok(())
    }

    fn iteration_cnt(&self) -> u64 {
        let steps = self.ctx.exec_cfg.emulated_step_cnt.unwrap_or(0);
        let step_min = self.ctx.evm_config.evm_step_min.max(1);
        steps.div_ceil(step_min).max(1) + self.ctx.exec_cfg.resize_iter_cnt + EXTRA_ITER_CNT
    }

    async fn execute_tx_list(&mut self, desc: &StrategyDesc) -> Result<Vec<TxSendState>, RunError> {
        match desc.kind {
            StrategyKind::SingleShot => {
                let builder = self.ctx.builder(false);
                let mut ix_list = builder.cu_prefix(false);
                ix_list.push(builder.tx_exec_from_data_ix(
                    self.ctx.chain_id(),
                    self.ctx.tx.rlp(),
                    &self.ctx.exec_cfg.account_list,
                ));
                let tx = self.wrap(desc, "TxExecFromData", ix_list);
                self.ctx.exec_cfg.mark_sol_tx("TxExecFromData", 1);
                self.send_list(vec![tx]).await
            }
            _ => {
                let iter_cnt = if self.ctx.exec_cfg.is_stuck_tx {
                    1
                } else {
                    self.iteration_cnt()
                };
                self.send_iterations(desc, iter_cnt).await
            }
        }
    }

    /// Builds and sends `iter_cnt` step transactions, each with a fresh
    /// `uniq_idx` so identical instructions in one holder run stay distinct.
    async fn send_iterations(
        &mut self,
        desc: &StrategyDesc,
        iter_cnt: u64,
    ) -> Result<Vec<TxSendState>, RunError> {
        let builder = self.ctx.builder(true);
        let chain_id = self.ctx.chain_id();
        let step_cnt = self.ctx.evm_config.evm_step_min as u32;
        let name = match desc.kind {
            StrategyKind::Iterative => "TxStepFromData",
            StrategyKind::HolderIterative => "TxStepFromAccount",
            StrategyKind::NoChainId => "TxStepFromAccountNoChainId",
            StrategyKind::SingleShot => unreachable!("single-shot has no iterations"),
        };
        let base_idx = self
            .ctx
            .exec_cfg
            .sol_tx_cnt
            .get(name)
            .copied()
            .unwrap_or(0);

        let mut tx_list = Vec::with_capacity(iter_cnt as usize);
        for i in 0..iter_cnt {
            let uniq_idx = base_idx + i as u32;
            let mut ix_list = builder.cu_prefix(true);
            let ix = match desc.kind {
                StrategyKind::Iterative => builder.tx_step_from_data_ix(
                    chain_id,
                    step_cnt,
                    uniq_idx,
                    self.ctx.tx.rlp(),
                    &self.ctx.exec_cfg.account_list,
                ),
                StrategyKind::HolderIterative => builder.tx_step_from_account_ix(
                    chain_id,
                    step_cnt,
                    uniq_idx,
                    &self.ctx.exec_cfg.account_list,
                ),
                StrategyKind::NoChainId => builder.tx_step_from_account_no_chain_id_ix(
                    chain_id,
                    step_cnt,
                    uniq_idx,
                    &self.ctx.exec_cfg.account_list,
                ),
                StrategyKind::SingleShot => unreachable!("single-shot has no iterations"),
            };
            ix_list.push(ix);
            tx_list.push(self.wrap(desc, name, ix_list));
        }
        self.ctx.exec_cfg.mark_sol_tx(name, iter_cnt as u32);
        self.send_list(tx_list).await
    }

    fn wrap(
        &self,
        desc: &StrategyDesc,
        name: &'static str,
        ix_list: Vec<solana_instruction::Instruction>,
    ) -> SolTx {
        match (desc.use_alt, &self.alt_plan) {
            (true, Some(plan)) => SolTx::new_v0(
                name,
                self.ctx.resource.payer(),
                ix_list,
                plan.table_account(),
            ),
            _ => SolTx::new_legacy(name, self.ctx.resource.payer(), ix_list),
        }
    }

    async fn send_list(&self, tx_list: Vec<SolTx>) -> Result<Vec<TxSendState>, RunError> {
        if tx_list.is_empty() {
            return Ok(Vec::new());
        }
        let mut sender = TxListSender::new(
            self.ctx.adapter.clone(),
            self.ctx.resource.signer.clone(),
            self.ctx.sender_config.clone(),
        );
        Ok(sender.send(tx_list).await?)
    }

    /// One cancel attempt per transaction. A cancel that lands with usable
    /// gas accounting, or that finds the holder already finalized, counts as
    /// success with the accumulated gas.
    async fn cancel(&mut self, desc: &StrategyDesc) -> Result<NeonTxResult, RunError> {
        let account = self
            .ctx
            .adapter
            .get_account(&self.ctx.resource.holder, Commitment::Confirmed)
            .await?;
        let holder_info = account
            .map(|acct| HolderInfo::from_account_data(self.ctx.resource.holder, &acct.data))
            .unwrap_or_else(|| HolderInfo::empty(self.ctx.resource.holder));

        let builder = self.ctx.builder(true);
        let mut ix_list = builder.cu_prefix(true);
        ix_list.push(builder.cancel_ix(&holder_info.account_list));
        let tx = self.wrap(desc, "CancelWithHash", ix_list);
        self.ctx.exec_cfg.mark_sol_tx("CancelWithHash", 1);

        let state_list = self.send_list(vec![tx]).await.map_err(|e| match e {
            // a cancel raced a predecessor's finish; adopt the result
            RunError::Strategy(reason) => RunError::Fatal(reason),
            other => other,
        })?;
        if let Some(result) = decode_tx_result(&self.ctx.program_id, &state_list, true) {
            return Ok(result);
        }
        // the cancel landed but left nothing readable; take the holder's gas
        Ok(NeonTxResult::lost(holder_info.gas_used))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_order_matches_probing_rules() {
        assert_eq!(STRATEGY_LIST.len(), 7);
        assert_eq!(STRATEGY_LIST[0].kind, StrategyKind::SingleShot);
        assert!(!STRATEGY_LIST[0].use_alt);
        assert_eq!(STRATEGY_LIST[6].kind, StrategyKind::NoChainId);
        assert!(STRATEGY_LIST[6].use_alt);
        // every ALT flavor directly follows its legacy sibling
        for pair in STRATEGY_LIST[..6].chunks(2) {
            assert_eq!(pair[0].kind, pair[1].kind);
            assert!(!pair[0].use_alt);
            assert!(pair[1].use_alt);
        }
    }
}
