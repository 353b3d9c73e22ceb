use alloy_primitives::B256;
use solana_address_lookup_table_interface::state::AddressLookupTable;
use solana_pubkey::Pubkey;

/// On-chain tags in the first byte of a holder account.
const TAG_HOLDER: u8 = 1;
const TAG_STATE: u8 = 2;
const TAG_FINALIZED: u8 = 3;

/// Fixed part of the holder layout: tag, operator, current tx signature.
const HOLDER_HEADER_LEN: usize = 1 + 32 + 32;

/// What the holder account currently carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HolderStatus {
    /// Not allocated or zero-length data.
    Empty,
    /// Allocated, accumulating RLP chunks, no execution started.
    Holder,
    /// An iterative execution is in flight.
    Active { neon_tx_sig: B256, chain_id: u64 },
    /// The last execution finished; the holder can be reused.
    Finalized { neon_tx_sig: B256 },
}

/// Parsed view of one holder account.
#[derive(Debug, Clone)]
pub struct HolderInfo {
    pub holder: Pubkey,
    pub operator: Pubkey,
    pub status: HolderStatus,
    pub data_size: usize,
    /// Accounts locked by an Active execution, with their access mode.
    pub account_list: Vec<(Pubkey, bool)>,
    pub gas_used: u64,
}

impl HolderInfo {
    pub fn empty(holder: Pubkey) -> Self {
        Self {
            holder,
            operator: Pubkey::default(),
            status: HolderStatus::Empty,
            data_size: 0,
            account_list: Vec::new(),
            gas_used: 0,
        }
    }

    /// Decodes the holder layout:
    ///
    /// ```text
    /// tag:u8 | operator:32 | neon_tx_sig:32
    /// Active adds: chain_id:u64 | gas_used:u64 | block_slot:u64
    ///            | account_cnt:u64 | (is_writable:u8 pubkey:32)*
    /// ```
    pub fn from_account_data(holder: Pubkey, data: &[u8]) -> Self {
        if data.len() < HOLDER_HEADER_LEN {
            return Self::empty(holder);
        }
        let tag = data[0];
        let operator = Pubkey::try_from(&data[1..33]).unwrap_or_default();
        let neon_tx_sig = B256::from_slice(&data[33..65]);

        let status = match tag {
            TAG_HOLDER => HolderStatus::Holder,
            TAG_FINALIZED => HolderStatus::Finalized { neon_tx_sig },
            TAG_STATE => {
                let chain_id = read_u64(data, 65).unwrap_or(0);
                HolderStatus::Active {
                    neon_tx_sig,
                    chain_id,
                }
            }
            _ => HolderStatus::Empty,
        };

        let (gas_used, account_list) = if tag == TAG_STATE {
            let gas_used = read_u64(data, 73).unwrap_or(0);
            // skip block_slot at 81
            let account_list = read_account_list(data, 89);
            (gas_used, account_list)
        } else {
            (0, Vec::new())
        };

        Self {
            holder,
            operator,
            status,
            data_size: data.len(),
            account_list,
            gas_used,
        }
    }

    pub fn is_free_for_use(&self) -> bool {
        matches!(
            self.status,
            HolderStatus::Empty | HolderStatus::Holder | HolderStatus::Finalized { .. }
        )
    }
}

fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    data.get(offset..offset + 8)
        .map(|bytes| u64::from_le_bytes(bytes.try_into().expect("8-byte slice")))
}

fn read_account_list(data: &[u8], offset: usize) -> Vec<(Pubkey, bool)> {
    let Some(cnt) = read_u64(data, offset) else {
        return Vec::new();
    };
    let mut list = Vec::with_capacity(cnt as usize);
    let mut pos = offset + 8;
    for _ in 0..cnt {
        let Some(entry) = data.get(pos..pos + 33) else {
            break;
        };
        let is_writable = entry[0] != 0;
        let Ok(pubkey) = Pubkey::try_from(&entry[1..33]) else {
            break;
        };
        list.push((pubkey, is_writable));
        pos += 33;
    }
    list
}

/// Lifecycle view of an address lookup table, as the indexer and the ALT
/// free-up cycle need it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AltInfo {
    pub deactivation_slot: u64,
    pub last_extended_slot: u64,
    pub has_authority: bool,
    pub authority: Option<Pubkey>,
    pub address_cnt: usize,
}

impl AltInfo {
    pub fn is_deactivated(&self) -> bool {
        self.deactivation_slot != u64::MAX
    }

    /// A frozen table (authority removed) can never be closed; treat it as
    /// already gone when waiting.
    pub fn is_frozen(&self) -> bool {
        !self.has_authority
    }
}

pub fn parse_alt_account(data: &[u8]) -> Option<AltInfo> {
    let table = AddressLookupTable::deserialize(data).ok()?;
    Some(AltInfo {
        deactivation_slot: table.meta.deactivation_slot,
        last_extended_slot: table.meta.last_extended_slot,
        has_authority: table.meta.authority.is_some(),
        authority: table.meta.authority,
        address_cnt: table.addresses.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holder_data(tag: u8, sig: [u8; 32]) -> Vec<u8> {
        let mut data = vec![tag];
        data.extend_from_slice(&[7u8; 32]); // operator
        data.extend_from_slice(&sig);
        data
    }

    #[test]
    fn parses_finalized_holder() {
        let sig = [3u8; 32];
        let info = HolderInfo::from_account_data(Pubkey::new_unique(), &holder_data(3, sig));
        assert_eq!(
            info.status,
            HolderStatus::Finalized {
                neon_tx_sig: B256::from(sig)
            }
        );
        assert!(info.is_free_for_use());
    }

    #[test]
    fn parses_active_holder_with_accounts() {
        let sig = [9u8; 32];
        let mut data = holder_data(2, sig);
        data.extend_from_slice(&1234u64.to_le_bytes()); // chain_id
        data.extend_from_slice(&55_000u64.to_le_bytes()); // gas_used
        data.extend_from_slice(&77u64.to_le_bytes()); // block_slot
        data.extend_from_slice(&2u64.to_le_bytes()); // account_cnt
        let acct_a = Pubkey::new_unique();
        let acct_b = Pubkey::new_unique();
        data.push(1);
        data.extend_from_slice(acct_a.as_ref());
        data.push(0);
        data.extend_from_slice(acct_b.as_ref());

        let info = HolderInfo::from_account_data(Pubkey::new_unique(), &data);
        assert_eq!(
            info.status,
            HolderStatus::Active {
                neon_tx_sig: B256::from(sig),
                chain_id: 1234
            }
        );
        assert!(!info.is_free_for_use());
        assert_eq!(info.gas_used, 55_000);
        assert_eq!(info.account_list, vec![(acct_a, true), (acct_b, false)]);
    }

    #[test]
    fn short_data_is_empty() {
        let info = HolderInfo::from_account_data(Pubkey::new_unique(), &[1, 2, 3]);
        assert_eq!(info.status, HolderStatus::Empty);
    }
}
