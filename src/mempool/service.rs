//! Command-channel front for the mempool.
//!
//! The scheduler state is plain single-threaded data owned by one task;
//! executor workers and the RPC surface talk to it exclusively through
//! [`MempoolHandle`]. That makes the single-writer contract a property of
//! the types instead of a convention.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::Address;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::evm::{ExecConfig, NeonTx, NeonTxHash};
use crate::mempool::{Mempool, MpAddError, MpContent, MpTxEntry};

#[derive(Debug)]
pub enum MpCmd {
    AddTx {
        tx: Box<NeonTx>,
        exec_cfg: ExecConfig,
        resp: oneshot::Sender<Result<(), MpAddError>>,
    },
    PeekTop {
        resp: oneshot::Sender<Option<Arc<MpTxEntry>>>,
    },
    Acquire {
        tx_hash: NeonTxHash,
        resp: oneshot::Sender<Option<Arc<MpTxEntry>>>,
    },
    Done {
        tx_hash: NeonTxHash,
    },
    Fail {
        tx_hash: NeonTxHash,
    },
    Cancel {
        tx_hash: NeonTxHash,
        exec_cfg: Option<ExecConfig>,
    },
    SetStateTxCnt {
        sender: Address,
        state_tx_cnt: u64,
    },
    SetMinGasPrice {
        min_gas_price: u128,
    },
    EvictExpired {
        eviction_timeout_sec: u64,
    },
    PendingNonce {
        sender: Address,
        resp: oneshot::Sender<Option<u64>>,
    },
    LastNonce {
        sender: Address,
        resp: oneshot::Sender<Option<u64>>,
    },
    SuspendedSenders {
        resp: oneshot::Sender<Vec<Address>>,
    },
    Content {
        resp: oneshot::Sender<MpContent>,
    },
    GetTxByHash {
        tx_hash: NeonTxHash,
        resp: oneshot::Sender<Option<Arc<MpTxEntry>>>,
    },
    TxCnt {
        resp: oneshot::Sender<usize>,
    },
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Cloneable sender side of the mempool channel.
#[derive(Clone)]
pub struct MempoolHandle {
    cmd_tx: mpsc::Sender<MpCmd>,
}

impl MempoolHandle {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<MpCmd>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(buffer);
        (Self { cmd_tx }, cmd_rx)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> MpCmd,
    ) -> Option<T> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx.send(build(resp_tx)).await.ok()?;
        resp_rx.await.ok()
    }

    pub async fn add_tx(&self, tx: NeonTx, exec_cfg: ExecConfig) -> Result<(), MpAddError> {
        self.request(|resp| MpCmd::AddTx {
            tx: Box::new(tx),
            exec_cfg,
            resp,
        })
        .await
        // a closed channel means shutdown; report the tx as not accepted
        .unwrap_or(Err(MpAddError::Underprice))
    }

    pub async fn peek_top(&self) -> Option<Arc<MpTxEntry>> {
        self.request(|resp| MpCmd::PeekTop { resp }).await.flatten()
    }

    pub async fn acquire(&self, tx_hash: NeonTxHash) -> Option<Arc<MpTxEntry>> {
        self.request(|resp| MpCmd::Acquire { tx_hash, resp })
            .await
            .flatten()
    }

    pub async fn done(&self, tx_hash: NeonTxHash) {
        let _ = self.cmd_tx.send(MpCmd::Done { tx_hash }).await;
    }

    pub async fn fail(&self, tx_hash: NeonTxHash) {
        let _ = self.cmd_tx.send(MpCmd::Fail { tx_hash }).await;
    }

    pub async fn cancel(&self, tx_hash: NeonTxHash, exec_cfg: Option<ExecConfig>) {
        let _ = self.cmd_tx.send(MpCmd::Cancel { tx_hash, exec_cfg }).await;
    }

    pub async fn set_state_tx_cnt(&self, sender: Address, state_tx_cnt: u64) {
        let _ = self
            .cmd_tx
            .send(MpCmd::SetStateTxCnt {
                sender,
                state_tx_cnt,
            })
            .await;
    }

    pub async fn set_min_gas_price(&self, min_gas_price: u128) {
        let _ = self
            .cmd_tx
            .send(MpCmd::SetMinGasPrice { min_gas_price })
            .await;
    }

    pub async fn evict_expired(&self, eviction_timeout_sec: u64) {
        let _ = self
            .cmd_tx
            .send(MpCmd::EvictExpired {
                eviction_timeout_sec,
            })
            .await;
    }

    pub async fn pending_nonce(&self, sender: Address) -> Option<u64> {
        self.request(|resp| MpCmd::PendingNonce { sender, resp })
            .await
            .flatten()
    }

    pub async fn last_nonce(&self, sender: Address) -> Option<u64> {
        self.request(|resp| MpCmd::LastNonce { sender, resp })
            .await
            .flatten()
    }

    pub async fn suspended_senders(&self) -> Vec<Address> {
        self.request(|resp| MpCmd::SuspendedSenders { resp })
            .await
            .unwrap_or_default()
    }

    pub async fn content(&self) -> MpContent {
        self.request(|resp| MpCmd::Content { resp })
            .await
            .unwrap_or_default()
    }

    pub async fn get_tx_by_hash(&self, tx_hash: NeonTxHash) -> Option<Arc<MpTxEntry>> {
        self.request(|resp| MpCmd::GetTxByHash { tx_hash, resp })
            .await
            .flatten()
    }

    pub async fn tx_cnt(&self) -> usize {
        self.request(|resp| MpCmd::TxCnt { resp })
            .await
            .unwrap_or(0)
    }
}

/// Owns the scheduler until cancellation; the only place mempool state
/// mutates.
pub async fn run_mempool_task(
    mut mempool: Mempool,
    mut cmd_rx: mpsc::Receiver<MpCmd>,
    cancel: CancellationToken,
) {
    loop {
        let cmd = tokio::select! {
            _ = cancel.cancelled() => break,
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => cmd,
                None => break,
            },
        };
        match cmd {
            MpCmd::AddTx { tx, exec_cfg, resp } => {
                let result = mempool.add_tx(*tx, exec_cfg, unix_now());
                let _ = resp.send(result);
            }
            MpCmd::PeekTop { resp } => {
                let _ = resp.send(mempool.peek_top());
            }
            MpCmd::Acquire { tx_hash, resp } => {
                let _ = resp.send(mempool.acquire(&tx_hash));
            }
            MpCmd::Done { tx_hash } => mempool.done(&tx_hash),
            MpCmd::Fail { tx_hash } => mempool.fail(&tx_hash),
            MpCmd::Cancel { tx_hash, exec_cfg } => mempool.cancel(&tx_hash, exec_cfg),
            MpCmd::SetStateTxCnt {
                sender,
                state_tx_cnt,
            } => mempool.set_state_tx_cnt(sender, state_tx_cnt),
            MpCmd::SetMinGasPrice { min_gas_price } => mempool.set_min_gas_price(min_gas_price),
            MpCmd::EvictExpired {
                eviction_timeout_sec,
            } => {
                let dropped = mempool.evict_expired(unix_now(), eviction_timeout_sec);
                if !dropped.is_empty() {
                    tracing::info!(cnt = dropped.len(), "evicted expired sender pools");
                }
            }
            MpCmd::PendingNonce { sender, resp } => {
                let _ = resp.send(mempool.pending_nonce(sender));
            }
            MpCmd::LastNonce { sender, resp } => {
                let _ = resp.send(mempool.last_nonce(sender));
            }
            MpCmd::SuspendedSenders { resp } => {
                let _ = resp.send(mempool.suspended_senders());
            }
            MpCmd::Content { resp } => {
                let _ = resp.send(mempool.content());
            }
            MpCmd::GetTxByHash { tx_hash, resp } => {
                let _ = resp.send(mempool.get_tx_by_hash(&tx_hash));
            }
            MpCmd::TxCnt { resp } => {
                let _ = resp.send(mempool.tx_cnt());
            }
        }
    }
    tracing::info!("mempool task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evm::tx::tests::signed_tx_with_key;

    #[tokio::test]
    async fn add_and_peek_through_the_channel() {
        let (handle, cmd_rx) = MempoolHandle::channel(64);
        let mempool = Mempool::new(245_022_926, 16, 0.9);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_mempool_task(mempool, cmd_rx, cancel.clone()));

        let tx = signed_tx_with_key(0x71, 0, 100, Some(245_022_926));
        let tx_hash = tx.tx_hash();
        handle
            .add_tx(tx, ExecConfig::new(0))
            .await
            .expect("accepted");
        let top = handle.peek_top().await.expect("top");
        assert_eq!(top.tx.tx_hash(), tx_hash);

        let acquired = handle.acquire(tx_hash).await.expect("acquired");
        assert_eq!(acquired.tx.tx_hash(), tx_hash);
        handle.done(tx_hash).await;
        assert_eq!(handle.tx_cnt().await, 0);

        cancel.cancel();
        task.await.expect("task join");
    }
}
