//! Domain types shared across the submission pipeline and the indexer.

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use solana_pubkey::Pubkey;

/// One stuck Ethereum transaction: an iterative execution whose holder
/// stayed Active past its window. Written by the indexer (external) or by
/// resource initialization (own), consumed by the strategy engine to resume
/// and finalize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StuckTxInfo {
    pub neon_tx_sig: B256,
    pub holder: Pubkey,
    pub chain_id: u64,
    /// RLP of the transaction when known; a takeover discovered on-chain may
    /// only know the signature until the holder is read.
    #[serde(with = "hex_bytes")]
    pub rlp: Vec<u8>,
    pub alt_address_list: Vec<Pubkey>,
    /// Slot at which the transaction was first seen stuck.
    pub start_time: u64,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

/// Snapshot of everything stuck at one slot, as persisted for recovery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StuckSnapshot {
    pub block_slot: u64,
    pub tx_list: Vec<StuckTxInfo>,
    pub alt_list: Vec<Pubkey>,
    pub holder_list: Vec<Pubkey>,
}
