use tracing::info;

use super::{payload_mismatch, ProposalHandler, StepContext, StepEffects, StepOutcome};
use crate::error::GovernanceError;
use crate::proposal::{ProposalKind, ProposalType};
use crate::treasury::TokenKind;

/// Locks an asset into a vault that mints one fraction per unit of the
/// party's total voting power, then distributes every fraction to members.
#[derive(Debug, Default, Clone, Copy)]
pub struct FractionalizeHandler;

impl ProposalHandler for FractionalizeHandler {
    fn proposal_type(&self) -> ProposalType {
        ProposalType::Fractionalize
    }

    fn step(
        &self,
        ctx: &mut StepContext<'_>,
        kind: &ProposalKind,
        _continuation: &[u8],
    ) -> Result<StepOutcome, GovernanceError> {
        let ProposalKind::Fractionalize(data) = kind else {
            return Err(payload_mismatch(self.proposal_type(), kind));
        };
        ctx.require_controlled(&data.asset)?;

        let supply = ctx.total_voting_power;
        let vault = ctx.markets.fractionalize(data.asset, supply, data.reserve_price)?;
        info!(proposal = ctx.proposal_id, vault = %vault, supply, "asset fractionalized");

        let fractions = TokenKind::Fungible(vault);
        Ok(StepOutcome::complete(StepEffects {
            proceeds: vec![(fractions, supply)],
            assets_disposed: vec![data.asset],
            distribute: vec![(fractions, supply)],
            ..Default::default()
        }))
    }
}
