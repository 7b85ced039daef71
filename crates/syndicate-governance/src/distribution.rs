//! Pull-based distributions of treasury funds to share holders.
//!
//! A distribution freezes the party's total voting power when it is
//! created. Each share then claims `claimable * share_power / total` once,
//! rounded down; the rounding dust stays unclaimed. Claims are keyed by
//! share, so a transferred share keeps its claim state.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use syndicate_types::{Address, Amount, Timestamp, BPS_DENOMINATOR};
use tracing::{debug, info};

use crate::error::GovernanceError;
use crate::treasury::TokenKind;
use crate::voting::ShareId;

pub type DistributionId = u64;

/// Immutable terms of one distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionInfo {
    pub id: DistributionId,
    pub token: TokenKind,
    pub total_amount: Amount,
    pub fee_bps: u16,
    pub fee_recipient: Address,
    /// Party voting power when the distribution was created
    pub total_voting_power: Amount,
    pub fee_amount: Amount,
    /// `total_amount - fee_amount`, shared among holders
    pub claimable: Amount,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct DistributionState {
    info: DistributionInfo,
    claimed: BTreeSet<ShareId>,
    paid: Amount,
    fee_claimed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionLedger {
    distributions: BTreeMap<DistributionId, DistributionState>,
    last_id: DistributionId,
}

impl DistributionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a distribution of `amount` of `token`.
    pub fn create(
        &mut self,
        token: TokenKind,
        amount: Amount,
        fee_bps: u16,
        fee_recipient: Address,
        total_voting_power: Amount,
        now: Timestamp,
    ) -> Result<DistributionId, GovernanceError> {
        if amount == 0 {
            return Err(GovernanceError::InvalidParameter(
                "distribution amount must be nonzero".to_string(),
            ));
        }
        if fee_bps as Amount > BPS_DENOMINATOR {
            return Err(GovernanceError::InvalidParameter(format!(
                "fee of {} bps exceeds 100%",
                fee_bps
            )));
        }
        if total_voting_power == 0 {
            return Err(GovernanceError::Arithmetic(
                "cannot distribute against zero total voting power".to_string(),
            ));
        }

        let fee_amount = amount
            .checked_mul(fee_bps as Amount)
            .ok_or_else(|| GovernanceError::overflow("distribution fee"))?
            / BPS_DENOMINATOR;

        self.last_id += 1;
        let id = self.last_id;
        let info = DistributionInfo {
            id,
            token,
            total_amount: amount,
            fee_bps,
            fee_recipient,
            total_voting_power,
            fee_amount,
            claimable: amount - fee_amount,
            created_at: now,
        };
        info!(
            distribution = id,
            token = %token,
            amount,
            fee = fee_amount,
            "distribution created"
        );
        self.distributions.insert(
            id,
            DistributionState {
                info,
                claimed: BTreeSet::new(),
                paid: 0,
                fee_claimed: false,
            },
        );
        Ok(id)
    }

    /// Pay out `share_id`'s portion. `share_power` is the share's intrinsic
    /// voting power.
    pub fn claim(
        &mut self,
        id: DistributionId,
        share_id: ShareId,
        share_power: Amount,
    ) -> Result<Amount, GovernanceError> {
        let state = self
            .distributions
            .get_mut(&id)
            .ok_or_else(|| GovernanceError::not_found("distribution", id))?;
        if state.claimed.contains(&share_id) {
            return Err(GovernanceError::AlreadyActed(format!(
                "share {} already claimed from distribution {}",
                share_id, id
            )));
        }

        let info = &state.info;
        let owed = info
            .claimable
            .checked_mul(share_power)
            .ok_or_else(|| GovernanceError::overflow("claim"))?
            / info.total_voting_power;
        let amount = owed.min(info.claimable - state.paid);

        state.claimed.insert(share_id);
        state.paid += amount;
        debug!(distribution = id, share = share_id, amount, "distribution claimed");
        Ok(amount)
    }

    /// Pay the fee to its recipient, once.
    pub fn claim_fee(&mut self, id: DistributionId, caller: Address) -> Result<Amount, GovernanceError> {
        let state = self
            .distributions
            .get_mut(&id)
            .ok_or_else(|| GovernanceError::not_found("distribution", id))?;
        if caller != state.info.fee_recipient {
            return Err(GovernanceError::Unauthorized(format!(
                "{} is not the fee recipient of distribution {}",
                caller, id
            )));
        }
        if state.fee_claimed {
            return Err(GovernanceError::AlreadyActed(format!(
                "fee of distribution {} already claimed",
                id
            )));
        }
        state.fee_claimed = true;
        debug!(distribution = id, fee = state.info.fee_amount, "fee claimed");
        Ok(state.info.fee_amount)
    }

    pub fn get(&self, id: DistributionId) -> Result<&DistributionInfo, GovernanceError> {
        self.distributions
            .get(&id)
            .map(|state| &state.info)
            .ok_or_else(|| GovernanceError::not_found("distribution", id))
    }

    pub fn has_claimed(&self, id: DistributionId, share_id: ShareId) -> bool {
        self.distributions
            .get(&id)
            .is_some_and(|state| state.claimed.contains(&share_id))
    }

    /// Total paid to holders so far.
    pub fn paid(&self, id: DistributionId) -> Amount {
        self.distributions.get(&id).map_or(0, |state| state.paid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DistributionInfo> {
        self.distributions.values().map(|state| &state.info)
    }

    pub fn len(&self) -> usize {
        self.distributions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distributions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fee_recipient() -> Address {
        Address::derive(b"fee")
    }

    #[test]
    fn test_fee_and_dust() {
        let mut ledger = DistributionLedger::new();
        let id = ledger
            .create(TokenKind::Native, 1_000, 250, fee_recipient(), 100, 0)
            .unwrap();

        let info = ledger.get(id).unwrap();
        assert_eq!(info.fee_amount, 25);
        assert_eq!(info.claimable, 975);

        assert_eq!(ledger.claim(id, 1, 50).unwrap(), 487);
        assert_eq!(ledger.claim(id, 2, 50).unwrap(), 487);
        assert_eq!(ledger.paid(id), 974);

        assert_eq!(ledger.claim_fee(id, fee_recipient()).unwrap(), 25);
    }

    #[test]
    fn test_no_double_claim() {
        let mut ledger = DistributionLedger::new();
        let id = ledger
            .create(TokenKind::Native, 1_000, 0, fee_recipient(), 100, 0)
            .unwrap();
        ledger.claim(id, 1, 10).unwrap();
        assert!(ledger.has_claimed(id, 1));
        assert!(matches!(ledger.claim(id, 1, 10), Err(GovernanceError::AlreadyActed(_))));
    }

    #[test]
    fn test_fee_claim_rules() {
        let mut ledger = DistributionLedger::new();
        let id = ledger
            .create(TokenKind::Native, 1_000, 100, fee_recipient(), 100, 0)
            .unwrap();
        assert!(matches!(
            ledger.claim_fee(id, Address::derive(b"someone")),
            Err(GovernanceError::Unauthorized(_))
        ));
        assert_eq!(ledger.claim_fee(id, fee_recipient()).unwrap(), 10);
        assert!(matches!(
            ledger.claim_fee(id, fee_recipient()),
            Err(GovernanceError::AlreadyActed(_))
        ));
    }

    #[test]
    fn test_create_rejects_degenerate_input() {
        let mut ledger = DistributionLedger::new();
        assert!(matches!(
            ledger.create(TokenKind::Native, 0, 0, fee_recipient(), 100, 0),
            Err(GovernanceError::InvalidParameter(_))
        ));
        assert!(matches!(
            ledger.create(TokenKind::Native, 10, 0, fee_recipient(), 0, 0),
            Err(GovernanceError::Arithmetic(_))
        ));
        assert!(matches!(ledger.claim(9, 1, 1), Err(GovernanceError::NotFound { .. })));
        assert!(ledger.is_empty());
    }

    proptest! {
        #[test]
        fn prop_total_paid_bounded(
            amount in 1u128..1_000_000_000,
            fee_bps in 0u16..=10_000,
            powers in proptest::collection::vec(1u128..1_000, 1..20),
        ) {
            let total: Amount = powers.iter().sum();
            let mut ledger = DistributionLedger::new();
            let id = ledger.create(TokenKind::Native, amount, fee_bps, fee_recipient(), total, 0).unwrap();
            let claimable = ledger.get(id).unwrap().claimable;

            let mut paid = 0;
            for (share, power) in powers.iter().enumerate() {
                paid += ledger.claim(id, share as ShareId + 1, *power).unwrap();
            }
            prop_assert!(paid <= claimable);
            // dust is below one unit per share
            prop_assert!(claimable - paid < powers.len() as Amount);
        }
    }
}
