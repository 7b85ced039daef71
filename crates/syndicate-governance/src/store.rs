//! Content-addressed proposal storage with vote tallies.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use syndicate_types::{Address, Amount, Hash, Timestamp};

use crate::error::GovernanceError;
use crate::proposal::{ProposalId, ProposalType};

/// Everything the party remembers about a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalVoteRecord {
    pub proposal_id: ProposalId,
    pub proposal_type: ProposalType,
    /// Commitment of the full proposal
    pub commitment: Hash,
    pub proposer: Address,
    /// Holders that have voted, with the power each cast
    pub votes_for: BTreeMap<Address, Amount>,
    pub total_votes_for: Amount,
    pub proposed_time: Timestamp,
    pub passed_time: Option<Timestamp>,
    pub executed_time: Option<Timestamp>,
    pub completed_time: Option<Timestamp>,
    pub vetoed: bool,
    pub cancelled: bool,
    /// Commitment of the continuation the next execute call must resubmit
    pub continuation_hash: Option<Hash>,
    /// Number of execute steps run so far
    pub steps: u32,
}

impl ProposalVoteRecord {
    pub fn new(
        proposal_id: ProposalId,
        proposal_type: ProposalType,
        commitment: Hash,
        proposer: Address,
        proposed_time: Timestamp,
    ) -> Self {
        Self {
            proposal_id,
            proposal_type,
            commitment,
            proposer,
            votes_for: BTreeMap::new(),
            total_votes_for: 0,
            proposed_time,
            passed_time: None,
            executed_time: None,
            completed_time: None,
            vetoed: false,
            cancelled: false,
            continuation_hash: None,
            steps: 0,
        }
    }

    pub fn has_voted(&self, voter: &Address) -> bool {
        self.votes_for.contains_key(voter)
    }

    pub fn voters(&self) -> BTreeSet<Address> {
        self.votes_for.keys().copied().collect()
    }
}

/// Proposal records keyed by id, plus the single in-progress slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposalStore {
    records: BTreeMap<ProposalId, ProposalVoteRecord>,
    last_proposal_id: ProposalId,
    in_progress: Option<ProposalId>,
}

impl ProposalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next proposal id and store a fresh record.
    pub fn insert(
        &mut self,
        proposal_type: ProposalType,
        commitment: Hash,
        proposer: Address,
        now: Timestamp,
    ) -> ProposalId {
        self.last_proposal_id += 1;
        let id = self.last_proposal_id;
        self.records
            .insert(id, ProposalVoteRecord::new(id, proposal_type, commitment, proposer, now));
        id
    }

    pub fn get(&self, id: ProposalId) -> Result<&ProposalVoteRecord, GovernanceError> {
        self.records
            .get(&id)
            .ok_or_else(|| GovernanceError::not_found("proposal", id))
    }

    pub fn get_mut(&mut self, id: ProposalId) -> Result<&mut ProposalVoteRecord, GovernanceError> {
        self.records
            .get_mut(&id)
            .ok_or_else(|| GovernanceError::not_found("proposal", id))
    }

    /// Check a resubmitted proposal's commitment against the stored one.
    pub fn verify(&self, id: ProposalId, commitment: Hash) -> Result<&ProposalVoteRecord, GovernanceError> {
        let record = self.get(id)?;
        if record.commitment != commitment {
            return Err(GovernanceError::HashMismatch {
                what: "proposal",
                expected: record.commitment,
                actual: commitment,
            });
        }
        Ok(record)
    }

    pub fn in_progress(&self) -> Option<ProposalId> {
        self.in_progress
    }

    pub fn set_in_progress(&mut self, id: Option<ProposalId>) {
        self.in_progress = id;
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProposalVoteRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_allocates_sequential_ids() {
        let mut store = ProposalStore::new();
        let proposer = Address::derive(b"alice");

        let a = store.insert(ProposalType::ArbitraryCalls, Hash::compute(b"a"), proposer, 10);
        let b = store.insert(ProposalType::ListOnAuction, Hash::compute(b"b"), proposer, 11);

        assert_eq!((a, b), (1, 2));
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(b).unwrap().proposed_time, 11);
        assert!(matches!(store.get(3), Err(GovernanceError::NotFound { .. })));
    }

    #[test]
    fn test_verify_commitment() {
        let mut store = ProposalStore::new();
        let id = store.insert(
            ProposalType::ArbitraryCalls,
            Hash::compute(b"proposal"),
            Address::derive(b"alice"),
            10,
        );

        assert!(store.verify(id, Hash::compute(b"proposal")).is_ok());
        assert!(matches!(
            store.verify(id, Hash::compute(b"tampered")),
            Err(GovernanceError::HashMismatch { what: "proposal", .. })
        ));
    }

    #[test]
    fn test_store_json_roundtrip() {
        let mut store = ProposalStore::new();
        let id = store.insert(ProposalType::Fractionalize, Hash::compute(b"p"), Address::derive(b"a"), 1);
        store.get_mut(id).unwrap().votes_for.insert(Address::derive(b"a"), 5);
        store.set_in_progress(Some(id));

        let json = serde_json::to_string(&store).unwrap();
        let back: ProposalStore = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get(id).unwrap(), store.get(id).unwrap());
        assert_eq!(back.in_progress(), Some(id));
    }
}
