use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use solana_commitment_config::CommitmentConfig;

/// Durability qualification of on-chain state, ordered from weakest to
/// strongest. `Safe` is an internal level meaning "voted on by more than
/// 2/3 of the stake"; the chain RPC has no such level, so it maps to
/// `Confirmed` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    NotProcessed,
    Processed,
    Confirmed,
    Safe,
    Finalized,
}

impl Commitment {
    /// Every commitment level at or above `self`.
    pub fn upper_set(self) -> Vec<Commitment> {
        use Commitment::*;
        [NotProcessed, Processed, Confirmed, Safe, Finalized]
            .into_iter()
            .filter(|level| *level >= self)
            .collect()
    }

    pub fn to_rpc_commitment(self) -> CommitmentConfig {
        match self {
            Commitment::NotProcessed | Commitment::Processed => CommitmentConfig::processed(),
            // Safe is our own refinement of Confirmed
            Commitment::Confirmed | Commitment::Safe => CommitmentConfig::confirmed(),
            Commitment::Finalized => CommitmentConfig::finalized(),
        }
    }

    pub fn from_rpc_status(status: Option<&str>) -> Commitment {
        match status {
            Some("processed") => Commitment::Processed,
            Some("confirmed") => Commitment::Confirmed,
            Some("finalized") => Commitment::Finalized,
            _ => Commitment::NotProcessed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown commitment level: {0}")]
pub struct ParseCommitmentError(String);

impl FromStr for Commitment {
    type Err = ParseCommitmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "not-processed" | "notprocessed" => Ok(Commitment::NotProcessed),
            "processed" => Ok(Commitment::Processed),
            "confirmed" => Ok(Commitment::Confirmed),
            "safe" => Ok(Commitment::Safe),
            "finalized" => Ok(Commitment::Finalized),
            other => Err(ParseCommitmentError(other.to_string())),
        }
    }
}

impl Display for Commitment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Commitment::NotProcessed => "not-processed",
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Safe => "safe",
            Commitment::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_strict() {
        assert!(Commitment::NotProcessed < Commitment::Processed);
        assert!(Commitment::Processed < Commitment::Confirmed);
        assert!(Commitment::Confirmed < Commitment::Safe);
        assert!(Commitment::Safe < Commitment::Finalized);
    }

    #[test]
    fn safe_maps_to_confirmed_on_the_wire() {
        assert_eq!(
            Commitment::Safe.to_rpc_commitment(),
            CommitmentConfig::confirmed()
        );
    }

    #[test]
    fn upper_set_includes_self() {
        let set = Commitment::Confirmed.upper_set();
        assert_eq!(
            set,
            vec![Commitment::Confirmed, Commitment::Safe, Commitment::Finalized]
        );
    }
}
