//! Governance options and engine globals.
//!
//! A party's governance options never change after creation. The party only
//! keeps their commitment; every governance call re-supplies the options and
//! they are checked against it.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use syndicate_types::{Address, Amount, Hash, BPS_DENOMINATOR};

use crate::error::GovernanceError;

/// Current layout version of [`GovernanceOpts`].
pub const GOVERNANCE_OPTS_VERSION: u16 = 1;

/// Highest execution engine version this build knows how to run.
pub const LATEST_ENGINE_VERSION: u32 = 2;

/// Governance parameters chosen before the party's total voting power is
/// known (the crowdfund decides it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct GovernanceParams {
    pub hosts: BTreeSet<Address>,
    pub vote_duration: u64,
    pub execution_delay: u64,
    pub pass_threshold_bps: u16,
    pub fee_bps: u16,
    pub fee_recipient: Address,
}

/// Immutable governance options of a party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct GovernanceOpts {
    pub version: u16,
    pub hosts: BTreeSet<Address>,
    /// Seconds a proposal stays open for votes.
    pub vote_duration: u64,
    /// Seconds between passing and becoming executable.
    pub execution_delay: u64,
    pub pass_threshold_bps: u16,
    pub total_voting_power: Amount,
    pub fee_bps: u16,
    pub fee_recipient: Address,
}

impl GovernanceOpts {
    pub fn from_params(params: GovernanceParams, total_voting_power: Amount) -> Self {
        Self {
            version: GOVERNANCE_OPTS_VERSION,
            hosts: params.hosts,
            vote_duration: params.vote_duration,
            execution_delay: params.execution_delay,
            pass_threshold_bps: params.pass_threshold_bps,
            total_voting_power,
            fee_bps: params.fee_bps,
            fee_recipient: params.fee_recipient,
        }
    }

    pub fn validate(&self) -> Result<(), GovernanceError> {
        if self.version != GOVERNANCE_OPTS_VERSION {
            return Err(GovernanceError::InvalidParameter(format!(
                "unsupported governance opts version {}",
                self.version
            )));
        }
        if self.vote_duration == 0 {
            return Err(GovernanceError::InvalidParameter(
                "vote duration must be nonzero".to_string(),
            ));
        }
        check_bps("pass threshold", self.pass_threshold_bps)?;
        check_bps("fee", self.fee_bps)?;
        if self.pass_threshold_bps == 0 {
            return Err(GovernanceError::InvalidParameter(
                "pass threshold must be nonzero".to_string(),
            ));
        }
        if self.fee_bps > 0 && self.fee_recipient.is_zero() {
            return Err(GovernanceError::InvalidParameter(
                "fee recipient required when fee is charged".to_string(),
            ));
        }
        Ok(())
    }

    /// Commitment the party stores in place of the options.
    pub fn hash(&self) -> Result<Hash, GovernanceError> {
        Ok(Hash::commit(self)?)
    }

    pub fn is_host(&self, address: &Address) -> bool {
        self.hosts.contains(address)
    }

    /// Smallest tally that passes, rounded up.
    pub fn votes_required(&self) -> Result<Amount, GovernanceError> {
        let scaled = self
            .total_voting_power
            .checked_mul(self.pass_threshold_bps as Amount)
            .ok_or_else(|| GovernanceError::overflow("votes required"))?;
        Ok(scaled.div_ceil(BPS_DENOMINATOR))
    }
}

fn check_bps(name: &str, bps: u16) -> Result<(), GovernanceError> {
    if bps as Amount > BPS_DENOMINATOR {
        return Err(GovernanceError::InvalidParameter(format!(
            "{} of {} bps exceeds 100%",
            name, bps
        )));
    }
    Ok(())
}

/// Process-wide settings of the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Version the upgrade proposal may move a party to.
    pub latest_engine_version: u32,
    /// How long a listing sits on the auction venue before falling back to
    /// a fixed-price listing.
    pub auction_timeout: u64,
    /// Auction duration once the first bid lands.
    pub auction_duration: u64,
    /// Upper bound on any proposal's cancel delay.
    pub max_cancel_delay: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            latest_engine_version: LATEST_ENGINE_VERSION,
            auction_timeout: 24 * 60 * 60,
            auction_duration: 24 * 60 * 60,
            max_cancel_delay: 6 * 7 * 24 * 60 * 60,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), GovernanceError> {
        if self.latest_engine_version == 0 || self.latest_engine_version > LATEST_ENGINE_VERSION {
            return Err(GovernanceError::InvalidParameter(format!(
                "engine version {} not in 1..={}",
                self.latest_engine_version, LATEST_ENGINE_VERSION
            )));
        }
        if self.auction_duration == 0 {
            return Err(GovernanceError::InvalidParameter(
                "auction duration must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_opts() -> GovernanceOpts {
        GovernanceOpts {
            version: GOVERNANCE_OPTS_VERSION,
            hosts: [Address::derive(b"host")].into_iter().collect(),
            vote_duration: 100,
            execution_delay: 50,
            pass_threshold_bps: 5100,
            total_voting_power: 100,
            fee_bps: 250,
            fee_recipient: Address::derive(b"fee"),
        }
    }

    #[test]
    fn test_opts_validate() {
        assert!(sample_opts().validate().is_ok());

        let mut opts = sample_opts();
        opts.pass_threshold_bps = 10_001;
        assert!(matches!(opts.validate(), Err(GovernanceError::InvalidParameter(_))));

        let mut opts = sample_opts();
        opts.fee_recipient = Address::ZERO;
        assert!(opts.validate().is_err());

        let mut opts = sample_opts();
        opts.version = 9;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_opts_hash_changes_with_any_field() {
        let base = sample_opts().hash().unwrap();
        assert_eq!(base, sample_opts().hash().unwrap());

        let mut opts = sample_opts();
        opts.execution_delay += 1;
        assert_ne!(base, opts.hash().unwrap());

        let mut opts = sample_opts();
        opts.hosts.insert(Address::derive(b"second host"));
        assert_ne!(base, opts.hash().unwrap());
    }

    #[test]
    fn test_votes_required_rounds_up() {
        let mut opts = sample_opts();
        assert_eq!(opts.votes_required().unwrap(), 51);
        opts.total_voting_power = 3;
        opts.pass_threshold_bps = 5000;
        assert_eq!(opts.votes_required().unwrap(), 2);
    }

    #[test]
    fn test_from_params() {
        let opts = sample_opts();
        let params = GovernanceParams {
            hosts: opts.hosts.clone(),
            vote_duration: opts.vote_duration,
            execution_delay: opts.execution_delay,
            pass_threshold_bps: opts.pass_threshold_bps,
            fee_bps: opts.fee_bps,
            fee_recipient: opts.fee_recipient,
        };
        assert_eq!(GovernanceOpts::from_params(params, 100), opts);
    }

    #[test]
    fn test_engine_config_validate() {
        assert!(EngineConfig::default().validate().is_ok());
        let config = EngineConfig { latest_engine_version: 3, ..Default::default() };
        assert!(config.validate().is_err());
    }
}
