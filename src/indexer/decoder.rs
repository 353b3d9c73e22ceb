use alloy_primitives::{Address, B256};
use base64::Engine;
use solana_message::VersionedMessage;
use solana_pubkey::Pubkey;
use solana_transaction_status_client_types::option_serializer::OptionSerializer;
use solana_transaction_status_client_types::EncodedTransactionWithStatusMeta;

use crate::db::NeonLogRecord;
use crate::evm::NeonTx;
use crate::indexer::neon_block::{IndexedTxStatus, IndexerArena};
use crate::loader::EvmIxCode;
use crate::strategy::parse_tx_return_from_meta;

/// Decodes the EVM-program instructions of one settlement transaction into
/// arena mutations.
///
/// Receipts are applied in (slot, transaction-index, instruction-index)
/// order by the caller; this function only sees one transaction at a time.
pub fn decode_sol_tx(
    arena: &mut IndexerArena,
    program_id: &Pubkey,
    block_slot: u64,
    encoded: &EncodedTransactionWithStatusMeta,
) {
    let Some(meta) = encoded.meta.as_ref() else {
        return;
    };
    if meta.err.is_some() {
        // failed settlement txs change no state worth mirroring
        return;
    }
    let Some(tx) = encoded.transaction.decode() else {
        return;
    };
    let sol_sig = tx
        .signatures
        .first()
        .map(|sig| sig.to_string())
        .unwrap_or_default();

    let account_key_list = resolve_account_keys(&tx.message, meta);
    let alt_key_list: Vec<Pubkey> = match &tx.message {
        VersionedMessage::V0(message) => message
            .address_table_lookups
            .iter()
            .map(|lookup| lookup.account_key)
            .collect(),
        VersionedMessage::Legacy(_) => Vec::new(),
    };

    let tx_return = parse_tx_return_from_meta(program_id, meta);
    let log_list = parse_event_log_list(meta);
    let logged_gas = parse_logged_gas(meta);

    for ix in tx.message.instructions() {
        let Some(ix_program) = account_key_list.get(ix.program_id_index as usize) else {
            continue;
        };
        if ix_program != program_id {
            continue;
        }
        let Some(code) = ix.data.first().copied().and_then(EvmIxCode::from_u8) else {
            continue;
        };
        let ix_accounts: Vec<Pubkey> = ix
            .accounts
            .iter()
            .filter_map(|idx| account_key_list.get(*idx as usize).copied())
            .collect();

        match code {
            EvmIxCode::HolderWrite => {
                decode_holder_write(arena, block_slot, &ix.data, &ix_accounts);
            }
            EvmIxCode::HolderCreate | EvmIxCode::HolderDelete => {
                if let Some(holder) = ix_accounts.first() {
                    arena.remove_holder(holder);
                }
            }
            EvmIxCode::CreateBalance => {}
            EvmIxCode::TxExecFromData => {
                // op:1 | treasury:4 | rlp
                if ix.data.len() > 5 {
                    decode_exec_from_data(
                        arena,
                        block_slot,
                        &ix.data[5..],
                        &sol_sig,
                        tx_return,
                        &log_list,
                    );
                }
            }
            EvmIxCode::TxExecFromAccount => {
                decode_step_from_account(
                    arena,
                    block_slot,
                    &ix_accounts,
                    &alt_key_list,
                    &sol_sig,
                    tx_return,
                    &log_list,
                );
            }
            EvmIxCode::TxStepFromData => {
                decode_step_from_data(
                    arena,
                    block_slot,
                    &ix.data,
                    &alt_key_list,
                    &sol_sig,
                    tx_return,
                    &log_list,
                );
            }
            EvmIxCode::TxStepFromAccount | EvmIxCode::TxStepFromAccountNoChainId => {
                decode_step_from_account(
                    arena,
                    block_slot,
                    &ix_accounts,
                    &alt_key_list,
                    &sol_sig,
                    tx_return,
                    &log_list,
                );
            }
            EvmIxCode::CancelWithHash => {
                decode_cancel(arena, block_slot, &ix.data, &sol_sig, logged_gas);
            }
        }
    }
}

fn resolve_account_keys(
    message: &VersionedMessage,
    meta: &solana_transaction_status_client_types::UiTransactionStatusMeta,
) -> Vec<Pubkey> {
    let mut key_list: Vec<Pubkey> = message.static_account_keys().to_vec();
    if let OptionSerializer::Some(loaded) = &meta.loaded_addresses {
        for addr in loaded.writable.iter().chain(loaded.readonly.iter()) {
            if let Ok(pubkey) = addr.parse() {
                key_list.push(pubkey);
            }
        }
    }
    key_list
}

fn decode_holder_write(
    arena: &mut IndexerArena,
    block_slot: u64,
    data: &[u8],
    ix_accounts: &[Pubkey],
) {
    let Some(holder) = ix_accounts.first().copied() else {
        return;
    };
    if data.len() < 1 + 32 + 8 {
        return;
    }
    let neon_tx_sig = B256::from_slice(&data[1..33]);
    let offset = u64::from_le_bytes(data[33..41].try_into().expect("8-byte slice")) as usize;
    let chunk = &data[41..];
    let handle = arena.get_or_create_holder(holder, neon_tx_sig, block_slot);
    if let Some(entry) = arena.holder_mut(handle) {
        entry.write(offset, chunk, block_slot);
    }
}

#[allow(clippy::too_many_arguments)]
fn decode_exec_from_data(
    arena: &mut IndexerArena,
    block_slot: u64,
    rlp: &[u8],
    sol_sig: &str,
    tx_return: Option<(u8, u64)>,
    log_list: &[NeonLogRecord],
) {
    let Ok(neon_tx) = NeonTx::from_rlp_padded(rlp) else {
        return;
    };
    let handle = arena.get_or_create_tx(neon_tx.tx_hash(), block_slot);
    if let Some(indexed) = arena.tx_mut(handle) {
        indexed.chain_id = neon_tx.chain_id();
        indexed.tx = Some(neon_tx);
        apply_progress(indexed, block_slot, sol_sig, tx_return, log_list);
    }
}

#[allow(clippy::too_many_arguments)]
fn decode_step_from_data(
    arena: &mut IndexerArena,
    block_slot: u64,
    data: &[u8],
    alt_key_list: &[Pubkey],
    sol_sig: &str,
    tx_return: Option<(u8, u64)>,
    log_list: &[NeonLogRecord],
) {
    // op:1 | treasury:4 | step_cnt:4 | uniq_idx:4 | rlp
    if data.len() < 13 {
        return;
    }
    let Ok(neon_tx) = NeonTx::from_rlp_padded(&data[13..]) else {
        return;
    };
    let handle = arena.get_or_create_tx(neon_tx.tx_hash(), block_slot);
    if let Some(indexed) = arena.tx_mut(handle) {
        indexed.chain_id = neon_tx.chain_id();
        if indexed.tx.is_none() {
            indexed.tx = Some(neon_tx);
        }
        merge_alt_list(indexed, alt_key_list);
        apply_progress(indexed, block_slot, sol_sig, tx_return, log_list);
    }
}

#[allow(clippy::too_many_arguments)]
fn decode_step_from_account(
    arena: &mut IndexerArena,
    block_slot: u64,
    ix_accounts: &[Pubkey],
    alt_key_list: &[Pubkey],
    sol_sig: &str,
    tx_return: Option<(u8, u64)>,
    log_list: &[NeonLogRecord],
) {
    let Some(holder_key) = ix_accounts.first().copied() else {
        return;
    };
    let (neon_tx_sig, neon_tx) = match arena.holder_by_key(&holder_key) {
        Some(holder) => (
            holder.neon_tx_sig,
            NeonTx::from_rlp_padded(&holder.data).ok(),
        ),
        // the holder was written before our history window; the tx signature
        // is unknown until a cancel or return names it
        None => return,
    };
    let handle = arena.get_or_create_tx(neon_tx_sig, block_slot);
    if let Some(indexed) = arena.tx_mut(handle) {
        indexed.holder = Some(holder_key);
        if indexed.tx.is_none() {
            if let Some(neon_tx) = neon_tx {
                indexed.chain_id = neon_tx.chain_id();
                indexed.tx = Some(neon_tx);
            }
        }
        merge_alt_list(indexed, alt_key_list);
        apply_progress(indexed, block_slot, sol_sig, tx_return, log_list);
    }
}

fn decode_cancel(
    arena: &mut IndexerArena,
    block_slot: u64,
    data: &[u8],
    sol_sig: &str,
    logged_gas: u64,
) {
    if data.len() < 33 {
        return;
    }
    let neon_tx_sig = B256::from_slice(&data[1..33]);
    let handle = arena.get_or_create_tx(neon_tx_sig, block_slot);
    if let Some(indexed) = arena.tx_mut(handle) {
        indexed.sol_sig_list.push(sol_sig.to_string());
        indexed.last_slot = block_slot;
        if !indexed.is_completed() {
            indexed.status = IndexedTxStatus::Canceled {
                gas_used: logged_gas,
            };
        }
    }
}

fn apply_progress(
    indexed: &mut crate::indexer::neon_block::NeonIndexedTx,
    block_slot: u64,
    sol_sig: &str,
    tx_return: Option<(u8, u64)>,
    log_list: &[NeonLogRecord],
) {
    indexed.sol_sig_list.push(sol_sig.to_string());
    indexed.last_slot = block_slot;
    for log in log_list {
        let mut log = log.clone();
        log.log_idx = indexed.log_list.len() as u32;
        indexed.log_list.push(log);
    }
    if let Some((status, gas_used)) = tx_return {
        if !indexed.is_completed() {
            indexed.status = IndexedTxStatus::Done { status, gas_used };
        }
    }
}

fn merge_alt_list(indexed: &mut crate::indexer::neon_block::NeonIndexedTx, alt_key_list: &[Pubkey]) {
    for key in alt_key_list {
        if !indexed.alt_list.contains(key) {
            indexed.alt_list.push(*key);
        }
    }
}

/// Event entries logged by the program as `Program data: <base64>` with the
/// layout `address:20 | topic_cnt:u8 | topics:32* | data`.
fn parse_event_log_list(
    meta: &solana_transaction_status_client_types::UiTransactionStatusMeta,
) -> Vec<NeonLogRecord> {
    let log_message_list: &[String] = match &meta.log_messages {
        OptionSerializer::Some(list) => list,
        _ => return Vec::new(),
    };
    let mut result = Vec::new();
    for message in log_message_list {
        let Some(encoded) = message.strip_prefix("Program data: ") else {
            continue;
        };
        let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
            continue;
        };
        if bytes.len() < 21 {
            continue;
        }
        let address = Address::from_slice(&bytes[..20]);
        let topic_cnt = bytes[20] as usize;
        let topics_end = 21 + topic_cnt * 32;
        if topic_cnt > 4 || bytes.len() < topics_end {
            continue;
        }
        let topic_list = (0..topic_cnt)
            .map(|i| B256::from_slice(&bytes[21 + i * 32..21 + (i + 1) * 32]))
            .collect();
        result.push(NeonLogRecord {
            address,
            topic_list,
            data: bytes[topics_end..].to_vec(),
            block_slot: 0,
            tx_idx: 0,
            log_idx: 0,
        });
    }
    result
}

fn parse_logged_gas(
    meta: &solana_transaction_status_client_types::UiTransactionStatusMeta,
) -> u64 {
    let log_message_list: &[String] = match &meta.log_messages {
        OptionSerializer::Some(list) => list,
        _ => return 0,
    };
    log_message_list
        .iter()
        .filter_map(|message| {
            let idx = message.find("total_gas_used ")?;
            let rest = &message[idx + "total_gas_used ".len()..];
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u64>().ok()
        })
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evm::tx::tests::signed_tx_with_key;
    use crate::loader::{HOLDER_WRITE_CHUNK_LEN, IxBuilder, SolTx};
    use solana_hash::Hash;
    use solana_keypair::Keypair;
    use solana_signer::Signer;
    use solana_transaction_status_client_types::{
        EncodedTransaction, TransactionBinaryEncoding, UiReturnDataEncoding,
        UiTransactionReturnData, UiTransactionStatusMeta,
    };

    fn empty_meta() -> UiTransactionStatusMeta {
        serde_json::from_value(serde_json::json!({
            "err": null,
            "status": { "Ok": null },
            "fee": 5000,
            "preBalances": [],
            "postBalances": []
        }))
        .expect("meta json")
    }

    fn encode_sol_tx(
        signer: &Keypair,
        mut sol_tx: SolTx,
        meta: UiTransactionStatusMeta,
    ) -> EncodedTransactionWithStatusMeta {
        sol_tx
            .sign(signer, Hash::new_from_array([7u8; 32]))
            .expect("sign");
        let versioned = sol_tx.versioned().expect("signed").clone();
        let bytes = bincode::serialize(&versioned).expect("serialize");
        EncodedTransactionWithStatusMeta {
            transaction: EncodedTransaction::Binary(
                base64::engine::general_purpose::STANDARD.encode(bytes),
                TransactionBinaryEncoding::Base64,
            ),
            meta: Some(meta),
            version: None,
        }
    }

    #[test]
    fn holder_write_then_step_reconstructs_the_tx() {
        let program_id = Pubkey::new_unique();
        let signer = Keypair::new();
        let holder = Pubkey::new_unique();
        let neon_tx = signed_tx_with_key(0x55, 3, 1_000, Some(245_022_926));
        let builder = IxBuilder::new(
            program_id,
            signer.pubkey(),
            holder,
            neon_tx.tx_hash(),
            128,
            b"treasury_pool",
            1_400_000,
            0,
        );

        let mut arena = IndexerArena::new();

        // the RLP lands in two chunks to exercise offsets
        let rlp = neon_tx.rlp().to_vec();
        let split = rlp.len().min(HOLDER_WRITE_CHUNK_LEN) / 2;
        for (offset, chunk) in [(0usize, &rlp[..split]), (split, &rlp[split..])] {
            let sol_tx = SolTx::new_legacy(
                "HolderWrite",
                signer.pubkey(),
                vec![builder.holder_write_ix(offset as u64, chunk)],
            );
            let encoded = encode_sol_tx(&signer, sol_tx, empty_meta());
            decode_sol_tx(&mut arena, &program_id, 100, &encoded);
        }
        assert_eq!(arena.drain_completed().len(), 0, "no step yet");

        // the step instruction carries the return event
        let step = SolTx::new_legacy(
            "TxStepFromAccount",
            signer.pubkey(),
            vec![builder.tx_step_from_account_ix(245_022_926, 500, 0, &[])],
        );
        let mut meta = empty_meta();
        let mut return_bytes = vec![1u8];
        return_bytes.extend_from_slice(&25_000u64.to_le_bytes());
        meta.return_data = OptionSerializer::Some(UiTransactionReturnData {
            program_id: program_id.to_string(),
            data: (
                base64::engine::general_purpose::STANDARD.encode(&return_bytes),
                UiReturnDataEncoding::Base64,
            ),
        });
        let encoded = encode_sol_tx(&signer, step, meta);
        decode_sol_tx(&mut arena, &program_id, 101, &encoded);

        let completed = arena.drain_completed();
        assert_eq!(completed.len(), 1);
        let indexed = &completed[0];
        assert_eq!(indexed.neon_tx_sig, neon_tx.tx_hash());
        assert_eq!(
            indexed.status,
            IndexedTxStatus::Done {
                status: 1,
                gas_used: 25_000
            }
        );
        // the reconstructed transaction equals the submitted one
        let reconstructed = indexed.tx.as_ref().expect("tx rebuilt from the holder");
        assert_eq!(reconstructed.rlp(), neon_tx.rlp());
        assert_eq!(reconstructed.sender(), neon_tx.sender());
        assert_eq!(reconstructed.nonce(), 3);
        assert_eq!(indexed.holder, Some(holder));
    }

    #[test]
    fn cancel_marks_the_tx_canceled() {
        let program_id = Pubkey::new_unique();
        let signer = Keypair::new();
        let holder = Pubkey::new_unique();
        let neon_tx = signed_tx_with_key(0x56, 0, 1_000, Some(245_022_926));
        let builder = IxBuilder::new(
            program_id,
            signer.pubkey(),
            holder,
            neon_tx.tx_hash(),
            128,
            b"treasury_pool",
            1_400_000,
            0,
        );

        let mut arena = IndexerArena::new();
        let cancel = SolTx::new_legacy(
            "CancelWithHash",
            signer.pubkey(),
            vec![builder.cancel_ix(&[])],
        );
        let mut meta = empty_meta();
        meta.log_messages = OptionSerializer::Some(vec![
            "Program log: total_gas_used 44000".to_string(),
        ]);
        let encoded = encode_sol_tx(&signer, cancel, meta);
        decode_sol_tx(&mut arena, &program_id, 50, &encoded);

        let completed = arena.drain_completed();
        assert_eq!(completed.len(), 1);
        assert_eq!(
            completed[0].status,
            IndexedTxStatus::Canceled { gas_used: 44_000 }
        );
        assert_eq!(completed[0].neon_tx_sig, neon_tx.tx_hash());
    }
}
