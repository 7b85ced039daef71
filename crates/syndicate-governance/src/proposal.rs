//! Proposals and their typed payloads.
//!
//! A proposal is a type tag plus borsh-encoded payload bytes. Only its
//! commitment (blake3 over the borsh encoding of the whole proposal) is
//! stored; every call that acts on a proposal resubmits it in full.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;
use syndicate_types::{Address, Amount, Hash, Timestamp};

use crate::error::GovernanceError;
use crate::treasury::AssetRef;

pub type ProposalId = u64;

/// Type of proposal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    BorshSerialize, BorshDeserialize,
)]
pub enum ProposalType {
    /// Make a list of calls to arbitrary targets
    ArbitraryCalls,
    /// Auction first, then fall back to a fixed-price listing
    ListOnMarketplace,
    /// Auction only
    ListOnAuction,
    /// Lock an asset into a vault and distribute its fractions
    Fractionalize,
    /// Move the party to a newer execution engine
    UpgradeEngine,
}

impl ProposalType {
    pub fn name(&self) -> &'static str {
        match self {
            ProposalType::ArbitraryCalls => "arbitrary-calls",
            ProposalType::ListOnMarketplace => "list-on-marketplace",
            ProposalType::ListOnAuction => "list-on-auction",
            ProposalType::Fractionalize => "fractionalize",
            ProposalType::UpgradeEngine => "upgrade-engine",
        }
    }
}

impl fmt::Display for ProposalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One call of an arbitrary-calls proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct ArbitraryCall {
    pub target: Address,
    /// Native value sent along with the call
    pub value: Amount,
    pub data: Vec<u8>,
    /// A failing optional call is skipped instead of failing the step.
    #[serde(default)]
    pub optional: bool,
    /// When set, the blake3 hash of the call's result must equal this.
    #[serde(default)]
    pub expected_result_hash: Option<Hash>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct ListOnMarketplaceData {
    pub asset: AssetRef,
    pub list_price: Amount,
    /// How long the fixed-price listing stays open
    pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct ListOnAuctionData {
    pub asset: AssetRef,
    pub reserve_price: Amount,
    /// How long to wait for the auction before it can be settled or pulled
    pub timeout: u64,
    pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct FractionalizeData {
    pub asset: AssetRef,
    pub reserve_price: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct UpgradeEngineData {
    pub target_version: u32,
}

/// Decoded payload of a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    ArbitraryCalls { calls: Vec<ArbitraryCall> },
    ListOnMarketplace(ListOnMarketplaceData),
    ListOnAuction(ListOnAuctionData),
    Fractionalize(FractionalizeData),
    UpgradeEngine(UpgradeEngineData),
}

impl ProposalKind {
    pub fn proposal_type(&self) -> ProposalType {
        match self {
            ProposalKind::ArbitraryCalls { .. } => ProposalType::ArbitraryCalls,
            ProposalKind::ListOnMarketplace(_) => ProposalType::ListOnMarketplace,
            ProposalKind::ListOnAuction(_) => ProposalType::ListOnAuction,
            ProposalKind::Fractionalize(_) => ProposalType::Fractionalize,
            ProposalKind::UpgradeEngine(_) => ProposalType::UpgradeEngine,
        }
    }

    /// Canonical payload bytes.
    pub fn encode(&self) -> Result<Vec<u8>, GovernanceError> {
        let bytes = match self {
            ProposalKind::ArbitraryCalls { calls } => borsh::to_vec(calls)?,
            ProposalKind::ListOnMarketplace(data) => borsh::to_vec(data)?,
            ProposalKind::ListOnAuction(data) => borsh::to_vec(data)?,
            ProposalKind::Fractionalize(data) => borsh::to_vec(data)?,
            ProposalKind::UpgradeEngine(data) => borsh::to_vec(data)?,
        };
        Ok(bytes)
    }

    /// Decode payload bytes of the given type. Trailing bytes are rejected.
    pub fn decode(proposal_type: ProposalType, bytes: &[u8]) -> Result<Self, GovernanceError> {
        let decode_err =
            |e: std::io::Error| GovernanceError::Decode(format!("{} payload: {}", proposal_type, e));
        let kind = match proposal_type {
            ProposalType::ArbitraryCalls => ProposalKind::ArbitraryCalls {
                calls: borsh::from_slice(bytes).map_err(decode_err)?,
            },
            ProposalType::ListOnMarketplace => {
                ProposalKind::ListOnMarketplace(borsh::from_slice(bytes).map_err(decode_err)?)
            }
            ProposalType::ListOnAuction => {
                ProposalKind::ListOnAuction(borsh::from_slice(bytes).map_err(decode_err)?)
            }
            ProposalType::Fractionalize => {
                ProposalKind::Fractionalize(borsh::from_slice(bytes).map_err(decode_err)?)
            }
            ProposalType::UpgradeEngine => {
                ProposalKind::UpgradeEngine(borsh::from_slice(bytes).map_err(decode_err)?)
            }
        };
        Ok(kind)
    }
}

/// A governance proposal as submitted by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct Proposal {
    pub proposal_type: ProposalType,
    pub encoded_data: Vec<u8>,
    /// Last moment any execution step may run
    pub max_executable_time: Timestamp,
    /// Seconds after the first execution step before an in-progress
    /// proposal may be cancelled
    pub cancel_delay: u64,
}

impl Proposal {
    pub fn new(
        kind: &ProposalKind,
        max_executable_time: Timestamp,
        cancel_delay: u64,
    ) -> Result<Self, GovernanceError> {
        Ok(Self {
            proposal_type: kind.proposal_type(),
            encoded_data: kind.encode()?,
            max_executable_time,
            cancel_delay,
        })
    }

    /// Hash the party stores for this proposal.
    pub fn commitment(&self) -> Result<Hash, GovernanceError> {
        Ok(Hash::commit(self)?)
    }

    pub fn decode(&self) -> Result<ProposalKind, GovernanceError> {
        ProposalKind::decode(self.proposal_type, &self.encoded_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing() -> ProposalKind {
        ProposalKind::ListOnMarketplace(ListOnMarketplaceData {
            asset: AssetRef::new(Address::derive(b"collection"), 7),
            list_price: 1_000,
            duration: 3_600,
        })
    }

    #[test]
    fn test_proposal_decode() {
        let kind = listing();
        let proposal = Proposal::new(&kind, 10_000, 600).unwrap();
        assert_eq!(proposal.proposal_type, ProposalType::ListOnMarketplace);
        assert_eq!(proposal.decode().unwrap(), kind);
    }

    #[test]
    fn test_commitment_covers_every_byte() {
        let proposal = Proposal::new(&listing(), 10_000, 600).unwrap();
        let commitment = proposal.commitment().unwrap();

        for i in 0..proposal.encoded_data.len() {
            let mut flipped = proposal.clone();
            flipped.encoded_data[i] ^= 0x01;
            assert_ne!(flipped.commitment().unwrap(), commitment, "byte {}", i);
        }

        let mut other = proposal.clone();
        other.cancel_delay += 1;
        assert_ne!(other.commitment().unwrap(), commitment);

        let mut other = proposal.clone();
        other.proposal_type = ProposalType::ListOnAuction;
        assert_ne!(other.commitment().unwrap(), commitment);
    }

    #[test]
    fn test_decode_rejects_wrong_type_and_trailing_bytes() {
        let mut proposal = Proposal::new(&listing(), 10_000, 600).unwrap();
        proposal.encoded_data.push(0);
        assert!(matches!(proposal.decode(), Err(GovernanceError::Decode(_))));

        let upgrade = Proposal::new(
            &ProposalKind::UpgradeEngine(UpgradeEngineData { target_version: 2 }),
            1,
            0,
        )
        .unwrap();
        let mismatched = Proposal {
            proposal_type: ProposalType::ArbitraryCalls,
            ..upgrade
        };
        assert!(mismatched.decode().is_err());
    }

    #[test]
    fn test_kind_json_is_tagged() {
        let kind = ProposalKind::UpgradeEngine(UpgradeEngineData { target_version: 2 });
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, r#"{"upgrade_engine":{"target_version":2}}"#);
        let back: ProposalKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kind);
    }
}
