//! Instruction codec for the on-chain EVM program.
//!
//! The program is an opaque instruction set from the gateway's point of
//! view; this module owns the byte layouts both ways: [`IxBuilder`] emits
//! instructions for the submission pipeline, and the indexer uses
//! [`EvmIxCode`] plus the same layouts to decode what landed on chain.

mod alt;
mod builder;
mod holder;
mod instruction;
mod soltx;

pub use alt::{AltPlan, EXTEND_KEY_LIMIT, MAX_TX_ACCOUNT_CNT};
pub use builder::IxBuilder;
pub use holder::{HolderInfo, HolderStatus, parse_alt_account, AltInfo};
pub use instruction::{EvmIxCode, HOLDER_WRITE_CHUNK_LEN, PACKET_DATA_SIZE};
pub use soltx::{SolTx, SolTxBuildError};
