//! Contribution accounting for the crowdfund that forms a party.
//!
//! Contributions are recorded in arrival order together with the running
//! total before them. When the crowdfund wins, only the first `total_used`
//! units across all contributions count; anything past that is refunded.
//! Used contributions become voting power: the split recipient takes
//! `split_bps` off the top, everyone else gets their used amount scaled by
//! the remaining share (rounded down), and the rounding remainder goes to
//! the last contributor processed.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use syndicate_types::{Address, Amount, Timestamp, BPS_DENOMINATOR};
use tracing::{debug, info};

use crate::error::GovernanceError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrowdfundOpts {
    /// Contributions past this are refunded on a win
    pub max_total_contributions: Amount,
    /// Raised total needed to win at the deadline
    pub min_total_contributions: Amount,
    pub deadline: Timestamp,
    pub split_recipient: Option<Address>,
    pub split_bps: u16,
}

impl CrowdfundOpts {
    pub fn validate(&self) -> Result<(), GovernanceError> {
        if self.max_total_contributions == 0 {
            return Err(GovernanceError::InvalidParameter(
                "contribution cap must be nonzero".to_string(),
            ));
        }
        if self.min_total_contributions > self.max_total_contributions {
            return Err(GovernanceError::InvalidParameter(format!(
                "minimum {} exceeds cap {}",
                self.min_total_contributions, self.max_total_contributions
            )));
        }
        if self.split_bps as Amount > BPS_DENOMINATOR {
            return Err(GovernanceError::InvalidParameter(format!(
                "split of {} bps exceeds 100%",
                self.split_bps
            )));
        }
        if self.split_bps > 0 && self.split_recipient.is_none() {
            return Err(GovernanceError::InvalidParameter(
                "split bps set without a split recipient".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrowdfundStatus {
    Active,
    Won,
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub amount: Amount,
    /// Total contributed by everyone before this contribution
    pub previous_total: Amount,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributorRecord {
    pub contributions: Vec<Contribution>,
    /// Latest delegate choice; applied when voting power is minted
    pub delegate: Option<Address>,
}

impl ContributorRecord {
    pub fn total(&self) -> Amount {
        self.contributions.iter().map(|c| c.amount).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrowdfundOutcome {
    /// `total_used` units of contributions became voting power
    Won { total_used: Amount },
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedeemOutcome {
    /// The crowdfund lost; the full contribution comes back
    Refunded { amount: Amount },
    /// The crowdfund won
    Minted {
        voting_power: Amount,
        refund: Amount,
        delegate: Option<Address>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crowdfund {
    opts: CrowdfundOpts,
    status: CrowdfundStatus,
    total_contributions: Amount,
    total_used: Amount,
    contributors: BTreeMap<Address, ContributorRecord>,
    /// Contributors by first contribution
    order: Vec<Address>,
    allocations: BTreeMap<Address, Amount>,
    redeemed: BTreeSet<Address>,
    finalized_at: Option<Timestamp>,
}

impl Crowdfund {
    pub fn new(opts: CrowdfundOpts) -> Result<Self, GovernanceError> {
        opts.validate()?;
        Ok(Self {
            opts,
            status: CrowdfundStatus::Active,
            total_contributions: 0,
            total_used: 0,
            contributors: BTreeMap::new(),
            order: Vec::new(),
            allocations: BTreeMap::new(),
            redeemed: BTreeSet::new(),
            finalized_at: None,
        })
    }

    /// Record a contribution. Returns the contributor's running total.
    pub fn contribute(
        &mut self,
        contributor: Address,
        delegate: Option<Address>,
        amount: Amount,
        now: Timestamp,
    ) -> Result<Amount, GovernanceError> {
        if self.status != CrowdfundStatus::Active {
            return Err(GovernanceError::InvalidState(format!(
                "crowdfund already {:?}",
                self.status
            )));
        }
        if now >= self.opts.deadline {
            return Err(GovernanceError::Expired {
                deadline: self.opts.deadline,
                now,
            });
        }
        if amount == 0 {
            return Err(GovernanceError::InvalidParameter(
                "contribution must be nonzero".to_string(),
            ));
        }

        let previous_total = self.total_contributions;
        self.total_contributions = previous_total
            .checked_add(amount)
            .ok_or_else(|| GovernanceError::overflow("total contributions"))?;

        if !self.contributors.contains_key(&contributor) {
            self.order.push(contributor);
        }
        let record = self.contributors.entry(contributor).or_default();
        record.contributions.push(Contribution {
            amount,
            previous_total,
            timestamp: now,
        });
        if delegate.is_some() {
            record.delegate = delegate;
        }

        let total = record.total();
        debug!(contributor = %contributor, amount, total, "contribution recorded");
        Ok(total)
    }

    /// The party bought the target asset for `price` before the deadline.
    pub fn record_acquisition(&mut self, price: Amount, now: Timestamp) -> Result<CrowdfundOutcome, GovernanceError> {
        self.require_active()?;
        if now >= self.opts.deadline {
            return Err(GovernanceError::Expired {
                deadline: self.opts.deadline,
                now,
            });
        }
        if price == 0 {
            return Err(GovernanceError::InvalidParameter(
                "acquisition price must be nonzero".to_string(),
            ));
        }
        if price > self.opts.max_total_contributions {
            return Err(GovernanceError::InvalidParameter(format!(
                "price {} exceeds contribution cap {}",
                price, self.opts.max_total_contributions
            )));
        }
        if price > self.total_contributions {
            return Err(GovernanceError::ThresholdNotMet {
                actual: self.total_contributions,
                required: price,
            });
        }
        self.win(price, now)
    }

    /// Settle the crowdfund once the deadline passed.
    pub fn finalize(&mut self, now: Timestamp) -> Result<CrowdfundOutcome, GovernanceError> {
        self.require_active()?;
        if now < self.opts.deadline {
            return Err(GovernanceError::TooEarly {
                ready_at: self.opts.deadline,
                now,
            });
        }

        if self.total_contributions > 0 && self.total_contributions >= self.opts.min_total_contributions {
            let used = self.total_contributions.min(self.opts.max_total_contributions);
            self.win(used, now)
        } else {
            self.status = CrowdfundStatus::Lost;
            self.finalized_at = Some(now);
            info!(raised = self.total_contributions, "crowdfund lost");
            Ok(CrowdfundOutcome::Lost)
        }
    }

    fn require_active(&self) -> Result<(), GovernanceError> {
        if self.status != CrowdfundStatus::Active {
            return Err(GovernanceError::AlreadyActed(format!(
                "crowdfund already {:?}",
                self.status
            )));
        }
        Ok(())
    }

    fn win(&mut self, total_used: Amount, now: Timestamp) -> Result<CrowdfundOutcome, GovernanceError> {
        self.total_used = total_used;
        self.allocations = self.compute_allocations()?;
        self.status = CrowdfundStatus::Won;
        self.finalized_at = Some(now);
        info!(total_used, contributors = self.order.len(), "crowdfund won");
        Ok(CrowdfundOutcome::Won { total_used })
    }

    fn compute_allocations(&self) -> Result<BTreeMap<Address, Amount>, GovernanceError> {
        let split_bps = self.opts.split_bps as Amount;
        let keep_bps = BPS_DENOMINATOR - split_bps;
        let split_power = self
            .total_used
            .checked_mul(split_bps)
            .ok_or_else(|| GovernanceError::overflow("split"))?
            / BPS_DENOMINATOR;
        let pool = self.total_used - split_power;

        let mut allocations = BTreeMap::new();
        let mut assigned: Amount = 0;
        let mut last = None;
        for contributor in &self.order {
            let (used, _) = self.final_contribution(contributor);
            if used == 0 {
                continue;
            }
            let power = used
                .checked_mul(keep_bps)
                .ok_or_else(|| GovernanceError::overflow("allocation"))?
                / BPS_DENOMINATOR;
            allocations.insert(*contributor, power);
            assigned += power;
            last = Some(*contributor);
        }

        let remainder = pool
            .checked_sub(assigned)
            .ok_or_else(|| GovernanceError::Arithmetic("allocations exceed pool".to_string()))?;
        if let Some(last) = last {
            *allocations.entry(last).or_insert(0) += remainder;
        }
        if let Some(recipient) = self.opts.split_recipient {
            if split_power > 0 {
                *allocations.entry(recipient).or_insert(0) += split_power;
            }
        }
        Ok(allocations)
    }

    /// `(used, refunded)` parts of a contributor's total. Before a win
    /// nothing is used.
    pub fn final_contribution(&self, contributor: &Address) -> (Amount, Amount) {
        let Some(record) = self.contributors.get(contributor) else {
            return (0, 0);
        };
        let mut used: Amount = 0;
        let mut refund: Amount = 0;
        for c in &record.contributions {
            if c.previous_total >= self.total_used {
                refund += c.amount;
            } else if c.previous_total + c.amount <= self.total_used {
                used += c.amount;
            } else {
                let part = self.total_used - c.previous_total;
                used += part;
                refund += c.amount - part;
            }
        }
        (used, refund)
    }

    /// Settle one contributor. Each address settles exactly once: either a
    /// refund (lost) or voting power plus any unused capital (won).
    pub fn redeem_or_mint(&mut self, contributor: Address, now: Timestamp) -> Result<RedeemOutcome, GovernanceError> {
        if self.status == CrowdfundStatus::Active {
            return Err(if now < self.opts.deadline {
                GovernanceError::TooEarly {
                    ready_at: self.opts.deadline,
                    now,
                }
            } else {
                GovernanceError::InvalidState("crowdfund must be finalized first".to_string())
            });
        }
        if self.redeemed.contains(&contributor) {
            return Err(GovernanceError::AlreadyActed(format!(
                "{} already redeemed",
                contributor
            )));
        }

        let contributed = self
            .contributors
            .get(&contributor)
            .map(ContributorRecord::total)
            .unwrap_or(0);

        let outcome = match self.status {
            CrowdfundStatus::Lost => {
                if contributed == 0 {
                    return Err(GovernanceError::not_found("contributor", contributor));
                }
                RedeemOutcome::Refunded { amount: contributed }
            }
            _ => {
                let voting_power = self.allocations.get(&contributor).copied().unwrap_or(0);
                if contributed == 0 && voting_power == 0 {
                    return Err(GovernanceError::not_found("contributor", contributor));
                }
                let (_, refund) = self.final_contribution(&contributor);
                RedeemOutcome::Minted {
                    voting_power,
                    refund,
                    delegate: self.contributors.get(&contributor).and_then(|r| r.delegate),
                }
            }
        };

        self.redeemed.insert(contributor);
        debug!(contributor = %contributor, ?outcome, "crowdfund redeemed");
        Ok(outcome)
    }

    pub fn opts(&self) -> &CrowdfundOpts {
        &self.opts
    }

    pub fn status(&self) -> CrowdfundStatus {
        self.status
    }

    pub fn total_contributions(&self) -> Amount {
        self.total_contributions
    }

    pub fn total_used(&self) -> Amount {
        self.total_used
    }

    pub fn contributor(&self, address: &Address) -> Option<&ContributorRecord> {
        self.contributors.get(address)
    }

    pub fn allocation(&self, address: &Address) -> Amount {
        self.allocations.get(address).copied().unwrap_or(0)
    }

    pub fn has_redeemed(&self, address: &Address) -> bool {
        self.redeemed.contains(address)
    }
}
