use alloy_consensus::transaction::{RlpEcdsaDecodableTx, RlpEcdsaEncodableTx, SignerRecoverable};
use alloy_consensus::{Signed, Transaction, TxLegacy};
use alloy_primitives::{Address, B256, U256};

/// 32-byte Ethereum transaction hash (keccak of the signed RLP).
pub type NeonTxHash = B256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NeonTxDecodeError {
    #[error("invalid transaction rlp: {0}")]
    Rlp(String),
    #[error("invalid transaction signature")]
    Signature,
}

/// A decoded Ethereum transaction as submitted through
/// `eth_sendRawTransaction`. Only the legacy wire format is carried by the
/// EVM program; transactions without an EIP-155 chain-id are accepted and
/// flagged, they can only execute through the no-chain-id strategy.
///
/// Immutable once constructed. The raw RLP is retained byte-for-byte: it is
/// what gets written into the holder account and what
/// `eth_getTransactionByHash` returns.
#[derive(Debug, Clone)]
pub struct NeonTx {
    signed: Signed<TxLegacy>,
    sender: Address,
    rlp: Vec<u8>,
}

impl NeonTx {
    /// Decodes the raw RLP and recovers the sender from the signature.
    pub fn from_rlp(raw: &[u8]) -> Result<Self, NeonTxDecodeError> {
        let mut buf = raw;
        let signed = TxLegacy::rlp_decode_signed(&mut buf)
            .map_err(|e| NeonTxDecodeError::Rlp(e.to_string()))?;
        if !buf.is_empty() {
            return Err(NeonTxDecodeError::Rlp("trailing bytes".to_string()));
        }
        let sender = signed
            .recover_signer()
            .map_err(|_| NeonTxDecodeError::Signature)?;
        Ok(Self {
            signed,
            sender,
            rlp: raw.to_vec(),
        })
    }

    /// Decodes from a buffer that may carry trailing padding, as holder
    /// account contents do. The RLP header bounds the payload.
    pub fn from_rlp_padded(raw: &[u8]) -> Result<Self, NeonTxDecodeError> {
        let mut buf = raw;
        let signed = TxLegacy::rlp_decode_signed(&mut buf)
            .map_err(|e| NeonTxDecodeError::Rlp(e.to_string()))?;
        let consumed = raw.len() - buf.len();
        let sender = signed
            .recover_signer()
            .map_err(|_| NeonTxDecodeError::Signature)?;
        Ok(Self {
            signed,
            sender,
            rlp: raw[..consumed].to_vec(),
        })
    }

    pub fn tx_hash(&self) -> NeonTxHash {
        *self.signed.hash()
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    pub fn nonce(&self) -> u64 {
        self.signed.tx().nonce
    }

    pub fn gas_price(&self) -> u128 {
        self.signed.tx().gas_price
    }

    pub fn gas_limit(&self) -> u64 {
        self.signed.tx().gas_limit
    }

    pub fn to_address(&self) -> Option<Address> {
        self.signed.tx().to()
    }

    pub fn value(&self) -> U256 {
        self.signed.tx().value
    }

    pub fn call_data(&self) -> &[u8] {
        self.signed.tx().input.as_ref()
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.signed.tx().chain_id
    }

    pub fn has_chain_id(&self) -> bool {
        self.chain_id().is_some()
    }

    /// The exact bytes accepted at submission; also the holder message.
    pub fn rlp(&self) -> &[u8] {
        &self.rlp
    }

    /// Re-encodes the decoded form; equals [`Self::rlp`] by construction.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.rlp.len());
        self.signed
            .tx()
            .rlp_encode_signed(self.signed.signature(), &mut out);
        out
    }
}

/// Final result of one Ethereum transaction, reconstructed either from the
/// program's return data or, for "lost" receipts, from accumulated gas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeonTxResult {
    pub status: u8,
    pub gas_used: u64,
    /// Gas accounting was reconstructed rather than returned by the program
    /// (truncated logs, already-finalized holder, canceled run).
    pub is_lost: bool,
}

impl NeonTxResult {
    pub fn returned(status: u8, gas_used: u64) -> Self {
        Self {
            status,
            gas_used,
            is_lost: false,
        }
    }

    pub fn lost(gas_used: u64) -> Self {
        Self {
            status: 1,
            gas_used,
            is_lost: true,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 1
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloy_consensus::SignableTransaction;
    use alloy_primitives::{Signature, TxKind, address};
    use k256::ecdsa::SigningKey;
    use k256::ecdsa::signature::hazmat::PrehashSigner;

    /// Builds a properly signed legacy tx for tests across the crate.
    pub(crate) fn signed_tx_with_key(
        key_byte: u8,
        nonce: u64,
        gas_price: u128,
        chain_id: Option<u64>,
    ) -> NeonTx {
        let tx = TxLegacy {
            chain_id,
            nonce,
            gas_price,
            gas_limit: 30_000,
            to: TxKind::Call(address!("00000000000000000000000000000000000000aa")),
            value: U256::from(1u64),
            input: Default::default(),
        };
        let key = SigningKey::from_slice(&[key_byte; 32]).expect("valid key");
        let sig_hash = tx.signature_hash();
        let (sig, recid): (k256::ecdsa::Signature, k256::ecdsa::RecoveryId) =
            key.sign_prehash(sig_hash.as_slice()).expect("sign");
        let signature = Signature::new(
            U256::from_be_slice(&sig.r().to_bytes()),
            U256::from_be_slice(&sig.s().to_bytes()),
            recid.is_y_odd(),
        );
        let signed = tx.into_signed(signature);
        let mut rlp = Vec::new();
        signed.tx().rlp_encode_signed(signed.signature(), &mut rlp);
        NeonTx::from_rlp(&rlp).expect("valid rlp")
    }

    fn signed_tx(nonce: u64, gas_price: u128, chain_id: Option<u64>) -> NeonTx {
        signed_tx_with_key(0x42, nonce, gas_price, chain_id)
    }

    #[test]
    fn rlp_round_trip() {
        let tx = signed_tx(0, 1_000_000_000, Some(245_022_926));
        assert_eq!(tx.encode(), tx.rlp());
    }

    #[test]
    fn decode_extracts_fields() {
        let tx = signed_tx(7, 2_000, Some(245_022_926));
        assert_eq!(tx.nonce(), 7);
        assert_eq!(tx.gas_price(), 2_000);
        assert_eq!(tx.gas_limit(), 30_000);
        assert!(tx.has_chain_id());
        assert!(tx.to_address().is_some());
    }

    #[test]
    fn legacy_tx_without_chain_id_is_flagged() {
        let tx = signed_tx(0, 1, None);
        assert!(!tx.has_chain_id());
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let tx = signed_tx(0, 1, Some(1));
        let mut raw = tx.rlp().to_vec();
        raw.push(0u8);
        assert!(matches!(
            NeonTx::from_rlp(&raw),
            Err(NeonTxDecodeError::Rlp(_))
        ));
    }
}
