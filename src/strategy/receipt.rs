use base64::Engine;
use solana_pubkey::Pubkey;
use solana_transaction_status_client_types::option_serializer::OptionSerializer;

use crate::chain::SolTxReceipt;
use crate::evm::NeonTxResult;
use crate::sender::{TxSendState, TxSendStatus};

/// The EVM program posts its final verdict through the return-data channel:
/// `status:u8 | gas_used:u64 LE`.
pub fn parse_tx_return(program_id: &Pubkey, receipt: &SolTxReceipt) -> Option<(u8, u64)> {
    parse_tx_return_from_meta(program_id, receipt.transaction.meta.as_ref()?)
}

/// Meta-level variant shared with the indexer, which reads block-embedded
/// receipts rather than `getTransaction` responses.
pub fn parse_tx_return_from_meta(
    program_id: &Pubkey,
    meta: &solana_transaction_status_client_types::UiTransactionStatusMeta,
) -> Option<(u8, u64)> {
    let return_data = match &meta.return_data {
        OptionSerializer::Some(data) => data,
        _ => return None,
    };
    if return_data.program_id != program_id.to_string() {
        return None;
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&return_data.data.0)
        .ok()?;
    if bytes.len() < 9 {
        return None;
    }
    let status = bytes[0];
    let gas_used = u64::from_le_bytes(bytes[1..9].try_into().ok()?);
    Some((status, gas_used))
}

/// Reconstructs the Ethereum transaction result from the terminal states of
/// one send round.
///
/// Priority: an explicit return event wins; an `AlreadyFinalized` receipt or
/// a good cancel receipt degrade to a lost result carrying the accumulated
/// gas. Anything else means the run has not finished.
pub fn decode_tx_result(
    program_id: &Pubkey,
    state_list: &[TxSendState],
    is_canceled: bool,
) -> Option<NeonTxResult> {
    let mut accumulated_gas = 0u64;
    let mut has_good_receipt = false;
    let mut is_already_finalized = false;

    for state in state_list {
        match state.status {
            TxSendStatus::AlreadyFinalizedError => {
                is_already_finalized = true;
                continue;
            }
            TxSendStatus::GoodReceipt | TxSendStatus::LogTruncatedError => {}
            _ => continue,
        }
        has_good_receipt = true;
        let Some(receipt) = &state.receipt else {
            continue;
        };
        if let Some((status, gas_used)) = parse_tx_return(program_id, receipt) {
            if state.status == TxSendStatus::LogTruncatedError {
                // gas accounting is unreadable; keep the status, flag the loss
                return Some(NeonTxResult::lost(gas_used.max(accumulated_gas)));
            }
            return Some(NeonTxResult::returned(status, gas_used));
        }
        accumulated_gas = accumulated_gas.max(gas_from_receipt(receipt));
    }

    if is_already_finalized {
        return Some(NeonTxResult::lost(accumulated_gas));
    }
    if is_canceled && has_good_receipt {
        return Some(NeonTxResult::lost(accumulated_gas));
    }
    None
}

/// Best-effort gas estimate from a step receipt without a return event; the
/// program logs cumulative gas as `Program log: total_gas_used <n>`.
fn gas_from_receipt(receipt: &SolTxReceipt) -> u64 {
    let Some(meta) = receipt.transaction.meta.as_ref() else {
        return 0;
    };
    let log_list: &[String] = match &meta.log_messages {
        OptionSerializer::Some(log_list) => log_list,
        _ => return 0,
    };
    log_list
        .iter()
        .filter_map(|log| {
            let idx = log.find("total_gas_used ")?;
            let rest = &log[idx + "total_gas_used ".len()..];
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u64>().ok()
        })
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::loader::SolTx;
    use solana_transaction_status_client_types::{
        EncodedConfirmedTransactionWithStatusMeta, EncodedTransaction,
        EncodedTransactionWithStatusMeta, UiReturnDataEncoding, UiTransactionReturnData,
        UiTransactionStatusMeta,
    };

    pub(crate) fn receipt_with_return(program_id: &Pubkey, status: u8, gas: u64) -> SolTxReceipt {
        let mut bytes = vec![status];
        bytes.extend_from_slice(&gas.to_le_bytes());
        let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let mut meta = empty_meta();
        meta.return_data = OptionSerializer::Some(UiTransactionReturnData {
            program_id: program_id.to_string(),
            data: (data, UiReturnDataEncoding::Base64),
        });
        receipt_with_meta(meta)
    }

    pub(crate) fn receipt_with_logs(log_list: Vec<String>) -> SolTxReceipt {
        let mut meta = empty_meta();
        meta.log_messages = OptionSerializer::Some(log_list);
        receipt_with_meta(meta)
    }

    fn empty_meta() -> UiTransactionStatusMeta {
        // built through serde so the test does not chase the meta struct's
        // optional fields across client-type versions
        serde_json::from_value(serde_json::json!({
            "err": null,
            "status": { "Ok": null },
            "fee": 5000,
            "preBalances": [],
            "postBalances": []
        }))
        .expect("meta json")
    }

    fn receipt_with_meta(meta: UiTransactionStatusMeta) -> SolTxReceipt {
        EncodedConfirmedTransactionWithStatusMeta {
            slot: 100,
            transaction: EncodedTransactionWithStatusMeta {
                transaction: EncodedTransaction::Binary(
                    String::new(),
                    solana_transaction_status_client_types::TransactionBinaryEncoding::Base64,
                ),
                meta: Some(meta),
                version: None,
            },
            block_time: None,
        }
    }

    fn state(status: TxSendStatus, receipt: Option<SolTxReceipt>) -> TxSendState {
        TxSendState {
            status,
            tx: SolTx::new_legacy("TxStepFromAccount", Pubkey::new_unique(), vec![]),
            receipt,
        }
    }

    #[test]
    fn return_event_wins() {
        let program_id = Pubkey::new_unique();
        let receipt = receipt_with_return(&program_id, 1, 25_000);
        let states = vec![state(TxSendStatus::GoodReceipt, Some(receipt))];
        let result = decode_tx_result(&program_id, &states, false).expect("result");
        assert_eq!(result.status, 1);
        assert_eq!(result.gas_used, 25_000);
        assert!(!result.is_lost);
    }

    #[test]
    fn already_finalized_is_lost_success() {
        let program_id = Pubkey::new_unique();
        let states = vec![state(TxSendStatus::AlreadyFinalizedError, None)];
        let result = decode_tx_result(&program_id, &states, false).expect("result");
        assert_eq!(result.status, 1);
        assert!(result.is_lost);
    }

    #[test]
    fn canceled_with_good_receipt_is_lost_success() {
        let program_id = Pubkey::new_unique();
        let receipt = receipt_with_logs(vec![
            "Program log: total_gas_used 44000".to_string(),
        ]);
        let states = vec![state(TxSendStatus::GoodReceipt, Some(receipt))];
        let result = decode_tx_result(&program_id, &states, true).expect("result");
        assert_eq!(result.status, 1);
        assert_eq!(result.gas_used, 44_000);
        assert!(result.is_lost);
    }

    #[test]
    fn no_receipt_no_result() {
        let program_id = Pubkey::new_unique();
        let states = vec![state(TxSendStatus::NoReceipt, None)];
        assert!(decode_tx_result(&program_id, &states, false).is_none());
    }
}
