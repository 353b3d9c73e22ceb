use solana_instruction::error::InstructionError;
use solana_transaction_error::TransactionError;
use solana_transaction_status_client_types::option_serializer::OptionSerializer;

use crate::chain::SolTxReceipt;
use crate::sender::TxSendStatus;

/// Classifies receipts and submit errors by what the caller should do next,
/// not by where the failure originated.
pub struct TxErrorParser;

impl TxErrorParser {
    /// Classification of a fetched receipt.
    pub fn classify_receipt(receipt: &SolTxReceipt) -> TxSendStatus {
        let Some(meta) = receipt.transaction.meta.as_ref() else {
            return TxSendStatus::UnknownError;
        };
        let log_list: &[String] = match &meta.log_messages {
            OptionSerializer::Some(log_list) => log_list,
            _ => &[],
        };

        if let Some(err) = &meta.err {
            let err: TransactionError = err.clone().into();
            return Self::classify_tx_error(&err, log_list);
        }

        if log_list.iter().any(|log| log.contains("Log truncated")) {
            // executed, but the gas accounting is unreadable
            return TxSendStatus::LogTruncatedError;
        }
        TxSendStatus::GoodReceipt
    }

    fn classify_tx_error(err: &TransactionError, log_list: &[String]) -> TxSendStatus {
        match err {
            TransactionError::BlockhashNotFound => TxSendStatus::BlockHashNotFoundError,
            TransactionError::AccountInUse | TransactionError::AccountLoadedTwice => {
                TxSendStatus::BlockedAccountError
            }
            TransactionError::AddressLookupTableNotFound
            | TransactionError::InvalidAddressLookupTableIndex
            | TransactionError::InvalidAddressLookupTableData => {
                TxSendStatus::AltInvalidIndexError
            }
            TransactionError::AlreadyProcessed => TxSendStatus::GoodReceipt,
            TransactionError::InstructionError(_, ix_err) => {
                Self::classify_ix_error(ix_err, log_list)
            }
            _ => Self::classify_log_list(log_list).unwrap_or(TxSendStatus::UnknownError),
        }
    }

    fn classify_ix_error(err: &InstructionError, log_list: &[String]) -> TxSendStatus {
        match err {
            InstructionError::ComputationalBudgetExceeded => TxSendStatus::CUBudgetExceededError,
            InstructionError::InvalidInstructionData => TxSendStatus::InvalidIxDataError,
            InstructionError::AccountAlreadyInitialized => {
                TxSendStatus::AccountAlreadyExistsError
            }
            InstructionError::Custom(1) => {
                // SystemError::AccountAlreadyInUse for create instructions
                TxSendStatus::AccountAlreadyExistsError
            }
            _ => Self::classify_log_list(log_list).unwrap_or(TxSendStatus::UnknownError),
        }
    }

    /// Program-specific failures surface only through logs.
    fn classify_log_list(log_list: &[String]) -> Option<TxSendStatus> {
        for log in log_list {
            if log.contains("already finalized state") {
                return Some(TxSendStatus::AlreadyFinalizedError);
            }
            if log.contains("Log truncated") {
                return Some(TxSendStatus::LogTruncatedError);
            }
            if log.contains("blocked account") || log.contains("rw locked account") {
                return Some(TxSendStatus::BlockedAccountError);
            }
            if log.contains("requires resize iterations") {
                return Some(TxSendStatus::RequireResizeIterError);
            }
            if log.contains("invalid instruction data") {
                return Some(TxSendStatus::InvalidIxDataError);
            }
            if let Some(status) = Self::parse_bad_nonce(log) {
                return Some(status);
            }
        }
        None
    }

    /// `Invalid Nonce, origin 0x… nonce <tx_nonce> != Account nonce <state_tx_cnt>`
    fn parse_bad_nonce(log: &str) -> Option<TxSendStatus> {
        if !log.contains("Invalid Nonce") {
            return None;
        }
        let mut numbers = log.match_indices("nonce ").filter_map(|(idx, pat)| {
            let rest = &log[idx + pat.len()..];
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u64>().ok()
        });
        let tx_nonce = numbers.next()?;
        let state_tx_cnt = numbers.next()?;
        Some(TxSendStatus::BadNonceError {
            state_tx_cnt,
            tx_nonce,
        })
    }

    /// Classification of an error string returned at submit time, before any
    /// receipt exists.
    pub fn classify_send_error(text: &str) -> TxSendStatus {
        if let Some(slots_behind) = Self::parse_slots_behind(text) {
            return TxSendStatus::NodeBehindError { slots_behind };
        }
        if text.contains("Blockhash not found") || text.contains("BlockhashNotFound") {
            return TxSendStatus::BlockHashNotFoundError;
        }
        if text.contains("invalid transaction: AddressLookupTable")
            || text.contains("invalid index")
        {
            return TxSendStatus::AltInvalidIndexError;
        }
        if text.contains("already in use") || text.contains("AccountInUse") {
            return TxSendStatus::BlockedAccountError;
        }
        if text.contains("already exists") {
            return TxSendStatus::AccountAlreadyExistsError;
        }
        // submit failed outright; the tx was not accepted, resubmit
        TxSendStatus::NoReceipt
    }

    fn parse_slots_behind(text: &str) -> Option<u64> {
        let idx = text.find("behind by ")?;
        let rest = &text[idx + "behind by ".len()..];
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_error_node_behind() {
        let status = TxErrorParser::classify_send_error("RPC node is behind by 42 slots");
        assert_eq!(status, TxSendStatus::NodeBehindError { slots_behind: 42 });
    }

    #[test]
    fn send_error_blockhash() {
        let status = TxErrorParser::classify_send_error("Blockhash not found");
        assert_eq!(status, TxSendStatus::BlockHashNotFoundError);
    }

    #[test]
    fn log_bad_nonce_extracts_both_numbers() {
        let log = "Program log: Invalid Nonce, origin 0xaa nonce 7 != Account nonce 9".to_string();
        let status = TxErrorParser::classify_log_list(&[log]).expect("classified");
        assert_eq!(
            status,
            TxSendStatus::BadNonceError {
                state_tx_cnt: 9,
                tx_nonce: 7
            }
        );
    }

    #[test]
    fn log_already_finalized() {
        let log = "Program log: transaction already finalized state".to_string();
        assert_eq!(
            TxErrorParser::classify_log_list(&[log]),
            Some(TxSendStatus::AlreadyFinalizedError)
        );
    }
}
