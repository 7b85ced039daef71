//! Proposal execution engine.
//!
//! Each proposal type has a handler. A step either completes the proposal
//! (empty continuation) or suspends it, returning continuation bytes that
//! the next execute call must pass back verbatim. Handlers hold no state of
//! their own: everything they need to resume lives in the continuation.

pub mod arbitrary;
pub mod fractionalize;
pub mod listing;
pub mod upgrade;

use std::collections::HashMap;
use std::sync::Arc;

use syndicate_types::{Amount, Timestamp};
use tracing::debug;

use crate::error::GovernanceError;
use crate::market::ExternalMarkets;
use crate::opts::{EngineConfig, LATEST_ENGINE_VERSION};
use crate::proposal::{Proposal, ProposalId, ProposalKind, ProposalType};
use crate::treasury::{AssetRef, TokenKind};

pub use arbitrary::ArbitraryCallsHandler;
pub use fractionalize::FractionalizeHandler;
pub use listing::{ListOnAuctionHandler, ListOnMarketplaceHandler};
pub use upgrade::UpgradeEngineHandler;

/// Everything a handler may look at or touch during one step.
pub struct StepContext<'a> {
    pub proposal_id: ProposalId,
    pub now: Timestamp,
    /// Assets the party controls
    pub controlled_assets: &'a [AssetRef],
    /// Every unit of voting power voted for the proposal
    pub is_unanimous: bool,
    pub total_voting_power: Amount,
    /// Version of the engine running this step
    pub engine_version: u32,
    pub config: &'a EngineConfig,
    /// Caller-supplied bytes, uninterpreted by the party
    pub extra_data: &'a [u8],
    pub markets: &'a mut dyn ExternalMarkets,
}

impl StepContext<'_> {
    pub fn controls(&self, asset: &AssetRef) -> bool {
        self.controlled_assets.contains(asset)
    }

    pub(crate) fn require_controlled(&self, asset: &AssetRef) -> Result<(), GovernanceError> {
        if !self.controls(asset) {
            return Err(GovernanceError::InvalidParameter(format!(
                "asset {} is not controlled by the party",
                asset
            )));
        }
        Ok(())
    }
}

/// Changes a step makes to the party, applied by the caller only if the
/// whole step succeeds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepEffects {
    /// Funds credited to the treasury
    pub proceeds: Vec<(TokenKind, Amount)>,
    /// Funds sent out with calls
    pub spent: Vec<(TokenKind, Amount)>,
    /// Assets handed to a venue
    pub assets_released: Vec<AssetRef>,
    /// Assets back from a venue
    pub assets_returned: Vec<AssetRef>,
    /// Assets sold or locked away
    pub assets_disposed: Vec<AssetRef>,
    /// Distributions to open, per token
    pub distribute: Vec<(TokenKind, Amount)>,
    pub engine_upgrade: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutcome {
    /// Empty when the proposal is complete
    pub continuation: Vec<u8>,
    pub effects: StepEffects,
}

impl StepOutcome {
    pub fn complete(effects: StepEffects) -> Self {
        Self {
            continuation: Vec::new(),
            effects,
        }
    }

    pub fn suspend(continuation: Vec<u8>, effects: StepEffects) -> Self {
        Self { continuation, effects }
    }
}

/// Result of a cancellation hook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelOutcome {
    /// Whether an asset was pulled back from a venue
    pub released: bool,
    pub effects: StepEffects,
}

/// Executes one proposal type.
pub trait ProposalHandler: Send + Sync + std::fmt::Debug {
    fn proposal_type(&self) -> ProposalType;

    /// Terminal handlers must complete in their first step.
    fn is_terminal(&self) -> bool {
        false
    }

    fn step(
        &self,
        ctx: &mut StepContext<'_>,
        kind: &ProposalKind,
        continuation: &[u8],
    ) -> Result<StepOutcome, GovernanceError>;

    /// Undo whatever an in-progress proposal left at a venue.
    fn cancel(
        &self,
        _ctx: &mut StepContext<'_>,
        _kind: &ProposalKind,
        _continuation: &[u8],
    ) -> Result<CancelOutcome, GovernanceError> {
        Ok(CancelOutcome::default())
    }
}

/// Dispatch table from proposal type to handler for one engine version.
#[derive(Debug, Clone)]
pub struct ProposalExecutionEngine {
    version: u32,
    handlers: HashMap<ProposalType, Arc<dyn ProposalHandler>>,
}

impl ProposalExecutionEngine {
    /// Build the engine for `version`. Version 2 adds fractionalization.
    pub fn for_version(version: u32) -> Result<Self, GovernanceError> {
        if version == 0 || version > LATEST_ENGINE_VERSION {
            return Err(GovernanceError::InvalidParameter(format!(
                "unknown engine version {}",
                version
            )));
        }

        let mut handlers: Vec<Arc<dyn ProposalHandler>> = vec![
            Arc::new(ArbitraryCallsHandler),
            Arc::new(ListOnMarketplaceHandler),
            Arc::new(ListOnAuctionHandler),
            Arc::new(UpgradeEngineHandler),
        ];
        if version >= 2 {
            handlers.push(Arc::new(FractionalizeHandler));
        }

        Ok(Self {
            version,
            handlers: handlers
                .into_iter()
                .map(|handler| (handler.proposal_type(), handler))
                .collect(),
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn supports(&self, proposal_type: ProposalType) -> bool {
        self.handlers.contains_key(&proposal_type)
    }

    fn handler(&self, proposal_type: ProposalType) -> Result<&Arc<dyn ProposalHandler>, GovernanceError> {
        self.handlers.get(&proposal_type).ok_or_else(|| {
            GovernanceError::InvalidParameter(format!(
                "engine v{} does not support {} proposals",
                self.version, proposal_type
            ))
        })
    }

    /// Run one step of `proposal`.
    pub fn execute_step(
        &self,
        ctx: &mut StepContext<'_>,
        proposal: &Proposal,
        continuation: &[u8],
    ) -> Result<StepOutcome, GovernanceError> {
        let handler = self.handler(proposal.proposal_type)?;
        let kind = proposal.decode()?;

        debug!(
            proposal = ctx.proposal_id,
            kind = %proposal.proposal_type,
            resume = !continuation.is_empty(),
            "executing step"
        );
        let outcome = handler.step(ctx, &kind, continuation)?;

        if handler.is_terminal() && !outcome.continuation.is_empty() {
            return Err(GovernanceError::InvalidState(format!(
                "{} proposals must complete in a single step",
                proposal.proposal_type
            )));
        }
        if outcome.effects.engine_upgrade.is_some() && !handler.is_terminal() {
            return Err(GovernanceError::InvalidState(
                "only a terminal step may upgrade the engine".to_string(),
            ));
        }
        Ok(outcome)
    }

    /// Run the cancellation hook of `proposal`'s handler.
    pub fn cancel(
        &self,
        ctx: &mut StepContext<'_>,
        proposal: &Proposal,
        continuation: &[u8],
    ) -> Result<CancelOutcome, GovernanceError> {
        let handler = self.handler(proposal.proposal_type)?;
        let kind = proposal.decode()?;
        handler.cancel(ctx, &kind, continuation)
    }
}

pub(crate) fn payload_mismatch(expected: ProposalType, kind: &ProposalKind) -> GovernanceError {
    GovernanceError::InvalidParameter(format!(
        "{} handler given a {} payload",
        expected,
        kind.proposal_type()
    ))
}

pub(crate) fn decode_continuation<T: borsh::BorshDeserialize>(bytes: &[u8]) -> Result<T, GovernanceError> {
    borsh::from_slice(bytes).map_err(|e| GovernanceError::Decode(format!("continuation: {}", e)))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::simulated::SimulatedMarkets;

    pub fn ctx<'a>(
        markets: &'a mut SimulatedMarkets,
        config: &'a EngineConfig,
        assets: &'a [AssetRef],
        now: Timestamp,
        is_unanimous: bool,
    ) -> StepContext<'a> {
        StepContext {
            proposal_id: 1,
            now,
            controlled_assets: assets,
            is_unanimous,
            total_voting_power: 100,
            engine_version: 1,
            config,
            extra_data: &[],
            markets,
        }
    }
}
