use solana_hash::Hash;
use solana_instruction::Instruction;
use solana_keypair::Keypair;
use solana_message::{AddressLookupTableAccount, Message, VersionedMessage, v0};
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_transaction::versioned::VersionedTransaction;

use crate::loader::PACKET_DATA_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum SolTxBuildError {
    #[error("failed to compile message: {0}")]
    Compile(String),
    #[error("failed to sign transaction: {0}")]
    Sign(String),
    #[error("transaction size {0} exceeds the packet limit")]
    TooLarge(usize),
}

/// One settlement transaction in flight: a named instruction bundle that is
/// signed lazily against whatever blockhash the sender picks at submission
/// time, and re-signed when that blockhash goes bad.
#[derive(Debug, Clone)]
pub struct SolTx {
    name: &'static str,
    payer: Pubkey,
    ix_list: Vec<Instruction>,
    alt: Option<AddressLookupTableAccount>,
    recent_block_hash: Option<Hash>,
    signed: Option<VersionedTransaction>,
}

impl SolTx {
    pub fn new_legacy(name: &'static str, payer: Pubkey, ix_list: Vec<Instruction>) -> Self {
        Self {
            name,
            payer,
            ix_list,
            alt: None,
            recent_block_hash: None,
            signed: None,
        }
    }

    /// A v0 transaction referencing one address lookup table.
    pub fn new_v0(
        name: &'static str,
        payer: Pubkey,
        ix_list: Vec<Instruction>,
        alt: AddressLookupTableAccount,
    ) -> Self {
        Self {
            name,
            payer,
            ix_list,
            alt: Some(alt),
            recent_block_hash: None,
            signed: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_signed(&self) -> bool {
        self.signed.is_some()
    }

    pub fn recent_block_hash(&self) -> Option<Hash> {
        self.recent_block_hash
    }

    /// Drops the signature so the next [`Self::sign`] uses a fresh blockhash.
    pub fn reset(&mut self) {
        self.recent_block_hash = None;
        self.signed = None;
    }

    pub fn sign(&mut self, signer: &Keypair, block_hash: Hash) -> Result<(), SolTxBuildError> {
        let message = match &self.alt {
            None => {
                let mut message = Message::new(&self.ix_list, Some(&self.payer));
                message.recent_blockhash = block_hash;
                VersionedMessage::Legacy(message)
            }
            Some(alt) => {
                let message = v0::Message::try_compile(
                    &self.payer,
                    &self.ix_list,
                    std::slice::from_ref(alt),
                    block_hash,
                )
                .map_err(|e| SolTxBuildError::Compile(e.to_string()))?;
                VersionedMessage::V0(message)
            }
        };
        let tx = VersionedTransaction::try_new(message, &[signer])
            .map_err(|e| SolTxBuildError::Sign(e.to_string()))?;
        let size = bincode::serialized_size(&tx)
            .map_err(|e| SolTxBuildError::Sign(e.to_string()))? as usize;
        if size > PACKET_DATA_SIZE {
            return Err(SolTxBuildError::TooLarge(size));
        }
        self.recent_block_hash = Some(block_hash);
        self.signed = Some(tx);
        Ok(())
    }

    pub fn signature(&self) -> Option<Signature> {
        self.signed
            .as_ref()
            .and_then(|tx| tx.signatures.first().copied())
    }

    pub fn versioned(&self) -> Option<&VersionedTransaction> {
        self.signed.as_ref()
    }

    /// Size check without keeping the signature, for strategy validation
    /// against a placeholder blockhash.
    pub fn check_size(&self, signer: &Keypair) -> Result<(), SolTxBuildError> {
        let mut probe = self.clone();
        probe.sign(signer, Hash::new_from_array([1u8; 32]))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_signer::Signer;

    fn transfer_like_ix(program: Pubkey, payer: Pubkey, data_len: usize) -> Instruction {
        Instruction {
            program_id: program,
            accounts: vec![solana_instruction::AccountMeta::new(payer, true)],
            data: vec![0u8; data_len],
        }
    }

    #[test]
    fn sign_then_resign_with_new_blockhash() {
        let signer = Keypair::new();
        let program = Pubkey::new_unique();
        let mut tx = SolTx::new_legacy(
            "HolderWrite",
            signer.pubkey(),
            vec![transfer_like_ix(program, signer.pubkey(), 16)],
        );
        assert!(!tx.is_signed());

        let hash_a = Hash::new_from_array([1u8; 32]);
        tx.sign(&signer, hash_a).expect("sign");
        let sig_a = tx.signature().expect("signed");
        assert_eq!(tx.recent_block_hash(), Some(hash_a));

        tx.reset();
        let hash_b = Hash::new_from_array([2u8; 32]);
        tx.sign(&signer, hash_b).expect("re-sign");
        let sig_b = tx.signature().expect("signed");
        assert_ne!(sig_a, sig_b);
    }

    #[test]
    fn oversized_tx_is_rejected() {
        let signer = Keypair::new();
        let program = Pubkey::new_unique();
        let mut tx = SolTx::new_legacy(
            "HolderWrite",
            signer.pubkey(),
            vec![transfer_like_ix(program, signer.pubkey(), 1300)],
        );
        assert!(matches!(
            tx.sign(&signer, Hash::new_from_array([3u8; 32])),
            Err(SolTxBuildError::TooLarge(_))
        ));
    }
}
