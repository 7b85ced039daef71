use syndicate_types::Hash;
use tracing::warn;

use super::{payload_mismatch, ProposalHandler, StepContext, StepEffects, StepOutcome};
use crate::error::GovernanceError;
use crate::proposal::{ProposalKind, ProposalType};
use crate::treasury::TokenKind;

/// Runs a list of calls in order, in a single step.
///
/// A required call that fails, or whose result hash differs from the
/// expected one, fails the whole step. Optional calls are skipped instead.
/// Unless every unit of voting power approved, no call may target the
/// contract of an asset the party controls.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArbitraryCallsHandler;

impl ProposalHandler for ArbitraryCallsHandler {
    fn proposal_type(&self) -> ProposalType {
        ProposalType::ArbitraryCalls
    }

    fn step(
        &self,
        ctx: &mut StepContext<'_>,
        kind: &ProposalKind,
        _continuation: &[u8],
    ) -> Result<StepOutcome, GovernanceError> {
        let ProposalKind::ArbitraryCalls { calls } = kind else {
            return Err(payload_mismatch(self.proposal_type(), kind));
        };

        let mut effects = StepEffects::default();
        for (index, call) in calls.iter().enumerate() {
            if !ctx.is_unanimous
                && ctx
                    .controlled_assets
                    .iter()
                    .any(|asset| asset.token == call.target)
            {
                return Err(GovernanceError::Unauthorized(format!(
                    "call {} targets a controlled asset contract without unanimous approval",
                    index
                )));
            }

            let result = match ctx.markets.call(call.target, call.value, &call.data) {
                Ok(result) => result,
                Err(e) if call.optional => {
                    warn!(proposal = ctx.proposal_id, index, error = %e, "optional call failed, skipping");
                    continue;
                }
                Err(e) => {
                    return Err(GovernanceError::ExternalCallFailed(format!("call {}: {}", index, e)))
                }
            };

            if let Some(expected) = call.expected_result_hash {
                let actual = Hash::compute(&result);
                if actual != expected {
                    if call.optional {
                        warn!(proposal = ctx.proposal_id, index, "optional call returned unexpected result");
                        continue;
                    }
                    return Err(GovernanceError::ExternalCallFailed(format!(
                        "call {} result hash {} != expected {}",
                        index, actual, expected
                    )));
                }
            }

            if call.value > 0 {
                effects.spent.push((TokenKind::Native, call.value));
            }
        }

        Ok(StepOutcome::complete(effects))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::test_support::ctx;
    use crate::opts::EngineConfig;
    use crate::proposal::ArbitraryCall;
    use crate::simulated::{SimResponse, SimulatedMarkets};
    use crate::treasury::AssetRef;
    use syndicate_types::Address;

    fn call(target: Address, data: &[u8]) -> ArbitraryCall {
        ArbitraryCall {
            target,
            value: 0,
            data: data.to_vec(),
            optional: false,
            expected_result_hash: None,
        }
    }

    #[test]
    fn test_calls_run_in_order() {
        let mut markets = SimulatedMarkets::new();
        let config = EngineConfig::default();
        let target = Address::derive(b"target");
        let mut paid = call(target, b"b");
        paid.value = 7;
        let kind = ProposalKind::ArbitraryCalls {
            calls: vec![call(target, b"a"), paid],
        };

        let outcome = {
            let mut ctx = ctx(&mut markets, &config, &[], 0, false);
            ArbitraryCallsHandler.step(&mut ctx, &kind, &[]).unwrap()
        };

        assert!(outcome.continuation.is_empty());
        assert_eq!(outcome.effects.spent, vec![(TokenKind::Native, 7)]);
        assert_eq!(markets.call_count(), 2);
    }

    #[test]
    fn test_expected_result_hash() {
        let mut markets = SimulatedMarkets::new();
        let config = EngineConfig::default();
        let target = Address::derive(b"target");
        markets.set_response(target, SimResponse::Return(b"ok".to_vec()));

        let mut good = call(target, b"x");
        good.expected_result_hash = Some(Hash::compute(b"ok"));
        let mut bad = call(target, b"x");
        bad.expected_result_hash = Some(Hash::compute(b"something else"));

        let mut ctx = ctx(&mut markets, &config, &[], 0, false);
        let ok = ProposalKind::ArbitraryCalls { calls: vec![good] };
        assert!(ArbitraryCallsHandler.step(&mut ctx, &ok, &[]).is_ok());

        let fails = ProposalKind::ArbitraryCalls { calls: vec![bad.clone()] };
        assert!(matches!(
            ArbitraryCallsHandler.step(&mut ctx, &fails, &[]),
            Err(GovernanceError::ExternalCallFailed(_))
        ));

        bad.optional = true;
        let skipped = ProposalKind::ArbitraryCalls { calls: vec![bad] };
        assert!(ArbitraryCallsHandler.step(&mut ctx, &skipped, &[]).is_ok());
    }

    #[test]
    fn test_optional_revert_is_skipped() {
        let mut markets = SimulatedMarkets::new();
        let config = EngineConfig::default();
        let broken = Address::derive(b"broken");
        markets.set_response(broken, SimResponse::Revert("boom".to_string()));

        let mut optional = call(broken, b"x");
        optional.optional = true;
        let kind = ProposalKind::ArbitraryCalls {
            calls: vec![optional, call(Address::derive(b"fine"), b"y")],
        };
        {
            let mut ctx = ctx(&mut markets, &config, &[], 0, false);
            ArbitraryCallsHandler.step(&mut ctx, &kind, &[]).unwrap();
        }
        assert_eq!(markets.call_count(), 1);

        let required = ProposalKind::ArbitraryCalls { calls: vec![call(broken, b"x")] };
        let mut ctx = ctx(&mut markets, &config, &[], 0, false);
        assert!(ArbitraryCallsHandler.step(&mut ctx, &required, &[]).is_err());
    }

    #[test]
    fn test_controlled_asset_contract_needs_unanimity() {
        let mut markets = SimulatedMarkets::new();
        let config = EngineConfig::default();
        let collection = Address::derive(b"collection");
        let assets = [AssetRef::new(collection, 1)];
        let kind = ProposalKind::ArbitraryCalls {
            calls: vec![call(collection, b"transfer")],
        };

        let mut ctx_split = ctx(&mut markets, &config, &assets, 0, false);
        assert!(matches!(
            ArbitraryCallsHandler.step(&mut ctx_split, &kind, &[]),
            Err(GovernanceError::Unauthorized(_))
        ));

        let mut ctx_unanimous = ctx(&mut markets, &config, &assets, 0, true);
        assert!(ArbitraryCallsHandler.step(&mut ctx_unanimous, &kind, &[]).is_ok());
    }
}
