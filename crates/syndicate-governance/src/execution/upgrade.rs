use tracing::info;

use super::{payload_mismatch, ProposalHandler, StepContext, StepEffects, StepOutcome};
use crate::error::GovernanceError;
use crate::proposal::{ProposalKind, ProposalType};

/// Moves the party to a newer engine. Always the last and only step of its
/// proposal: the engine that ran it is replaced as soon as it returns.
#[derive(Debug, Default, Clone, Copy)]
pub struct UpgradeEngineHandler;

impl ProposalHandler for UpgradeEngineHandler {
    fn proposal_type(&self) -> ProposalType {
        ProposalType::UpgradeEngine
    }

    fn is_terminal(&self) -> bool {
        true
    }

    fn step(
        &self,
        ctx: &mut StepContext<'_>,
        kind: &ProposalKind,
        continuation: &[u8],
    ) -> Result<StepOutcome, GovernanceError> {
        let ProposalKind::UpgradeEngine(data) = kind else {
            return Err(payload_mismatch(self.proposal_type(), kind));
        };
        if !continuation.is_empty() {
            return Err(GovernanceError::InvalidState(
                "engine upgrade cannot resume".to_string(),
            ));
        }
        if data.target_version <= ctx.engine_version {
            return Err(GovernanceError::InvalidState(format!(
                "engine already at v{}, cannot move to v{}",
                ctx.engine_version, data.target_version
            )));
        }
        if data.target_version > ctx.config.latest_engine_version {
            return Err(GovernanceError::InvalidParameter(format!(
                "engine v{} is not available (latest v{})",
                data.target_version, ctx.config.latest_engine_version
            )));
        }

        info!(
            proposal = ctx.proposal_id,
            from = ctx.engine_version,
            to = data.target_version,
            "upgrading execution engine"
        );
        Ok(StepOutcome::complete(StepEffects {
            engine_upgrade: Some(data.target_version),
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::test_support::ctx;
    use crate::opts::EngineConfig;
    use crate::proposal::UpgradeEngineData;
    use crate::simulated::SimulatedMarkets;

    fn upgrade_to(version: u32) -> ProposalKind {
        ProposalKind::UpgradeEngine(UpgradeEngineData { target_version: version })
    }

    #[test]
    fn test_upgrade_bounds() {
        let mut markets = SimulatedMarkets::new();
        let config = EngineConfig { latest_engine_version: 2, ..Default::default() };
        let mut ctx = ctx(&mut markets, &config, &[], 0, false);

        assert!(matches!(
            UpgradeEngineHandler.step(&mut ctx, &upgrade_to(1), &[]),
            Err(GovernanceError::InvalidState(_))
        ));
        assert!(matches!(
            UpgradeEngineHandler.step(&mut ctx, &upgrade_to(3), &[]),
            Err(GovernanceError::InvalidParameter(_))
        ));
        let outcome = UpgradeEngineHandler.step(&mut ctx, &upgrade_to(2), &[]).unwrap();
        assert_eq!(outcome.effects.engine_upgrade, Some(2));
        assert_eq!(markets.call_count(), 0);
    }
}
