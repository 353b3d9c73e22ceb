/// Maximum serialized size of one settlement transaction.
pub const PACKET_DATA_SIZE: usize = 1232;

/// Holder writes append at most this many bytes per instruction.
pub const HOLDER_WRITE_CHUNK_LEN: usize = 900;

/// Op-codes of the EVM program instructions the gateway emits and decodes.
///
/// The discriminator is the first byte of the instruction data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EvmIxCode {
    HolderCreate = 0x24,
    HolderDelete = 0x25,
    HolderWrite = 0x26,
    CreateBalance = 0x30,
    TxExecFromData = 0x32,
    TxExecFromAccount = 0x33,
    TxStepFromData = 0x34,
    TxStepFromAccount = 0x35,
    TxStepFromAccountNoChainId = 0x36,
    CancelWithHash = 0x37,
}

impl EvmIxCode {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0x24 => Some(Self::HolderCreate),
            0x25 => Some(Self::HolderDelete),
            0x26 => Some(Self::HolderWrite),
            0x30 => Some(Self::CreateBalance),
            0x32 => Some(Self::TxExecFromData),
            0x33 => Some(Self::TxExecFromAccount),
            0x34 => Some(Self::TxStepFromData),
            0x35 => Some(Self::TxStepFromAccount),
            0x36 => Some(Self::TxStepFromAccountNoChainId),
            0x37 => Some(Self::CancelWithHash),
            _ => None,
        }
    }

    /// Stable name used in logs and in the per-tx send history.
    pub fn name(self) -> &'static str {
        match self {
            Self::HolderCreate => "HolderCreate",
            Self::HolderDelete => "HolderDelete",
            Self::HolderWrite => "HolderWrite",
            Self::CreateBalance => "CreateBalance",
            Self::TxExecFromData => "TxExecFromData",
            Self::TxExecFromAccount => "TxExecFromAccount",
            Self::TxStepFromData => "TxStepFromData",
            Self::TxStepFromAccount => "TxStepFromAccount",
            Self::TxStepFromAccountNoChainId => "TxStepFromAccountNoChainId",
            Self::CancelWithHash => "CancelWithHash",
        }
    }

    /// Step instructions advance iterative execution and may carry the
    /// final return event.
    pub fn is_step(self) -> bool {
        matches!(
            self,
            Self::TxStepFromData | Self::TxStepFromAccount | Self::TxStepFromAccountNoChainId
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_discriminators() {
        for code in [
            EvmIxCode::HolderCreate,
            EvmIxCode::HolderDelete,
            EvmIxCode::HolderWrite,
            EvmIxCode::CreateBalance,
            EvmIxCode::TxExecFromData,
            EvmIxCode::TxExecFromAccount,
            EvmIxCode::TxStepFromData,
            EvmIxCode::TxStepFromAccount,
            EvmIxCode::TxStepFromAccountNoChainId,
            EvmIxCode::CancelWithHash,
        ] {
            assert_eq!(EvmIxCode::from_u8(code as u8), Some(code));
        }
        assert_eq!(EvmIxCode::from_u8(0x00), None);
    }
}
