//! The party: one pooled-capital group and everything it owns.
//!
//! [`Party`] ties the crowdfund, the voting power ledger, the proposal
//! store, the treasury and the distribution ledger together and exposes
//! every operation callers perform. Each operation takes the acting
//! address and the current time explicitly.
//!
//! Operations are atomic. Anything that touches more than one component
//! runs against a staged copy of the party (and of the market handle, for
//! execution) that replaces the live state only if the whole operation
//! succeeds.

use serde::{Deserialize, Serialize};
use syndicate_types::{Address, Amount, Hash, Timestamp};
use tracing::{debug, info};

use crate::crowdfund::{Crowdfund, CrowdfundOpts, CrowdfundOutcome, RedeemOutcome};
use crate::distribution::{DistributionId, DistributionLedger};
use crate::error::GovernanceError;
use crate::execution::{ProposalExecutionEngine, StepContext, StepEffects};
use crate::lifecycle::{continuation_commitment, ProposalStateMachine, ProposalStatusView};
use crate::market::ExternalMarkets;
use crate::opts::{EngineConfig, GovernanceOpts, GovernanceParams};
use crate::proposal::{Proposal, ProposalId};
use crate::store::{ProposalStore, ProposalVoteRecord};
use crate::treasury::{AssetRef, Custody, TokenKind, TransactionType, Treasury};
use crate::voting::{ShareId, VotingPowerLedger};

/// Result of settling the crowdfund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrowdfundSettlement {
    pub outcome: CrowdfundOutcome,
    /// Governance options now in force; callers keep these and pass them to
    /// every governance operation
    pub opts: Option<GovernanceOpts>,
}

/// Inputs of one execute call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub proposal_id: ProposalId,
    pub proposal: Proposal,
    /// The party's controlled-asset list, in its original order
    pub controlled_assets: Vec<AssetRef>,
    /// Continuation returned by the previous step; empty on the first
    pub continuation: Vec<u8>,
    pub extra_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteOutcome {
    /// Pass back on the next execute call; empty once complete
    pub continuation: Vec<u8>,
    /// Distributions the step opened
    pub distributions: Vec<DistributionId>,
}

impl ExecuteOutcome {
    pub fn is_complete(&self) -> bool {
        self.continuation.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Party {
    name: String,
    /// Records acquisitions and mints outside the crowdfund
    authority: Address,
    /// Commitment of the governance options; `None` until governance starts
    opts_hash: Option<Hash>,
    /// Parameters the crowdfund turns into options on a win
    pending_params: Option<GovernanceParams>,
    crowdfund: Option<Crowdfund>,
    engine_config: EngineConfig,
    engine_version: u32,
    ledger: VotingPowerLedger,
    proposals: ProposalStore,
    distributions: DistributionLedger,
    treasury: Treasury,
}

impl Party {
    /// A party governed from the start; voting power is minted by
    /// `authority`.
    pub fn with_governance(
        name: impl Into<String>,
        authority: Address,
        opts: &GovernanceOpts,
        controlled_assets: Vec<AssetRef>,
        engine_config: EngineConfig,
        engine_version: u32,
    ) -> Result<Self, GovernanceError> {
        opts.validate()?;
        let mut party = Self::base(name, authority, controlled_assets, engine_config, engine_version)?;
        party.opts_hash = Some(opts.hash()?);
        info!(party = %party.name, total_voting_power = opts.total_voting_power, "party created");
        Ok(party)
    }

    /// A party formed by a crowdfund. Governance starts once it is won.
    pub fn with_crowdfund(
        name: impl Into<String>,
        authority: Address,
        params: GovernanceParams,
        crowdfund_opts: CrowdfundOpts,
        controlled_assets: Vec<AssetRef>,
        engine_config: EngineConfig,
        engine_version: u32,
    ) -> Result<Self, GovernanceError> {
        // total voting power is unknown until the crowdfund ends
        GovernanceOpts::from_params(params.clone(), 1).validate()?;
        let mut party = Self::base(name, authority, controlled_assets, engine_config, engine_version)?;
        party.crowdfund = Some(Crowdfund::new(crowdfund_opts)?);
        party.pending_params = Some(params);
        info!(party = %party.name, "crowdfund opened");
        Ok(party)
    }

    fn base(
        name: impl Into<String>,
        authority: Address,
        controlled_assets: Vec<AssetRef>,
        engine_config: EngineConfig,
        engine_version: u32,
    ) -> Result<Self, GovernanceError> {
        engine_config.validate()?;
        ProposalExecutionEngine::for_version(engine_version)?;
        Ok(Self {
            name: name.into(),
            authority,
            opts_hash: None,
            pending_params: None,
            crowdfund: None,
            engine_config,
            engine_version,
            ledger: VotingPowerLedger::new(),
            proposals: ProposalStore::new(),
            distributions: DistributionLedger::new(),
            treasury: Treasury::new(controlled_assets)?,
        })
    }

    /// Run `op` on a copy of the party and keep the copy only on success.
    fn stage<T>(
        &mut self,
        op: impl FnOnce(&mut Party) -> Result<T, GovernanceError>,
    ) -> Result<T, GovernanceError> {
        let mut staged = self.clone();
        let value = op(&mut staged)?;
        *self = staged;
        Ok(value)
    }

    /// Like [`stage`](Self::stage), with the market handle staged too.
    fn transact<M, T>(
        &mut self,
        markets: &mut M,
        op: impl FnOnce(&mut Party, &mut M) -> Result<T, GovernanceError>,
    ) -> Result<T, GovernanceError>
    where
        M: ExternalMarkets + Clone,
    {
        let mut staged = self.clone();
        let mut staged_markets = markets.clone();
        let value = op(&mut staged, &mut staged_markets)?;
        *self = staged;
        *markets = staged_markets;
        Ok(value)
    }

    fn check_opts(&self, opts: &GovernanceOpts) -> Result<(), GovernanceError> {
        let expected = self
            .opts_hash
            .ok_or_else(|| GovernanceError::InvalidState(format!("party {} is not governed yet", self.name)))?;
        let actual = opts.hash()?;
        if actual != expected {
            return Err(GovernanceError::HashMismatch {
                what: "governance opts",
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn require_authority(&self, caller: &Address) -> Result<(), GovernanceError> {
        if caller != &self.authority {
            return Err(GovernanceError::Unauthorized(format!(
                "{} is not the party authority",
                caller
            )));
        }
        Ok(())
    }

    fn require_member_or_host(&self, caller: &Address, opts: &GovernanceOpts) -> Result<(), GovernanceError> {
        if !self.ledger.is_member(caller) && !opts.is_host(caller) {
            return Err(GovernanceError::Unauthorized(format!(
                "{} is neither a member nor a host",
                caller
            )));
        }
        Ok(())
    }

    fn crowdfund_mut(&mut self) -> Result<&mut Crowdfund, GovernanceError> {
        self.crowdfund
            .as_mut()
            .ok_or_else(|| GovernanceError::InvalidState("party has no crowdfund".to_string()))
    }

    // ---- crowdfund ----

    /// Contribute native funds. Returns the contributor's running total.
    pub fn contribute(
        &mut self,
        contributor: Address,
        delegate: Option<Address>,
        amount: Amount,
        now: Timestamp,
    ) -> Result<Amount, GovernanceError> {
        self.stage(|party| {
            let total = party.crowdfund_mut()?.contribute(contributor, delegate, amount, now)?;
            party
                .treasury
                .deposit(TokenKind::Native, amount, Some(contributor), TransactionType::Deposit, now)?;
            Ok(total)
        })
    }

    /// Settle the crowdfund after its deadline.
    pub fn finalize_crowdfund(&mut self, now: Timestamp) -> Result<CrowdfundSettlement, GovernanceError> {
        self.stage(|party| {
            let outcome = party.crowdfund_mut()?.finalize(now)?;
            party.settle(outcome)
        })
    }

    /// The authority bought the target asset for `price`; the crowdfund is
    /// won on the spot.
    pub fn record_acquisition(
        &mut self,
        caller: Address,
        price: Amount,
        seller: Option<Address>,
        now: Timestamp,
    ) -> Result<CrowdfundSettlement, GovernanceError> {
        self.require_authority(&caller)?;
        self.stage(|party| {
            let outcome = party.crowdfund_mut()?.record_acquisition(price, now)?;
            party.treasury.withdraw(
                TokenKind::Native,
                price,
                seller,
                TransactionType::Spend,
                now,
                "asset acquisition",
            )?;
            party.settle(outcome)
        })
    }

    fn settle(&mut self, outcome: CrowdfundOutcome) -> Result<CrowdfundSettlement, GovernanceError> {
        let opts = match outcome {
            CrowdfundOutcome::Won { total_used } => {
                let params = self
                    .pending_params
                    .clone()
                    .ok_or_else(|| GovernanceError::InvalidState("no pending governance parameters".to_string()))?;
                let opts = GovernanceOpts::from_params(params, total_used);
                opts.validate()?;
                self.opts_hash = Some(opts.hash()?);
                info!(party = %self.name, total_voting_power = total_used, "governance started");
                Some(opts)
            }
            CrowdfundOutcome::Lost => None,
        };
        Ok(CrowdfundSettlement { outcome, opts })
    }

    /// Refund a contributor of a lost crowdfund, or mint their voting power
    /// and return unused funds after a win.
    pub fn redeem_or_mint(&mut self, contributor: Address, now: Timestamp) -> Result<RedeemOutcome, GovernanceError> {
        self.stage(|party| {
            let outcome = party.crowdfund_mut()?.redeem_or_mint(contributor, now)?;
            let refund = match outcome {
                RedeemOutcome::Refunded { amount } => amount,
                RedeemOutcome::Minted {
                    voting_power,
                    refund,
                    delegate,
                } => {
                    if voting_power > 0 {
                        party.ledger.mint(contributor, voting_power, delegate, now)?;
                    }
                    refund
                }
            };
            if refund > 0 {
                party.treasury.withdraw(
                    TokenKind::Native,
                    refund,
                    Some(contributor),
                    TransactionType::Refund,
                    now,
                    "crowdfund refund",
                )?;
            }
            Ok(outcome)
        })
    }

    // ---- voting power ----

    /// Mint a share directly. Only the authority may, and never past the
    /// party's total voting power.
    pub fn mint(
        &mut self,
        caller: Address,
        opts: &GovernanceOpts,
        owner: Address,
        voting_power: Amount,
        delegate: Option<Address>,
        now: Timestamp,
    ) -> Result<ShareId, GovernanceError> {
        self.require_authority(&caller)?;
        self.check_opts(opts)?;
        let minted = self
            .ledger
            .total_intrinsic()
            .checked_add(voting_power)
            .ok_or_else(|| GovernanceError::overflow("mint"))?;
        if minted > opts.total_voting_power {
            return Err(GovernanceError::InvalidState(format!(
                "minting {} would exceed total voting power {}",
                voting_power, opts.total_voting_power
            )));
        }
        self.stage(|party| party.ledger.mint(owner, voting_power, delegate, now))
    }

    pub fn delegate_voting_power(
        &mut self,
        caller: Address,
        delegate: Address,
        now: Timestamp,
    ) -> Result<(), GovernanceError> {
        self.stage(|party| party.ledger.delegate(caller, delegate, now))
    }

    pub fn transfer_share(
        &mut self,
        caller: Address,
        share_id: ShareId,
        to: Address,
        now: Timestamp,
    ) -> Result<(), GovernanceError> {
        self.stage(|party| party.ledger.transfer_share(share_id, caller, to, now))
    }

    // ---- proposals ----

    /// Create a proposal. The proposer's power one second before now counts
    /// as the first vote.
    pub fn propose(
        &mut self,
        caller: Address,
        opts: &GovernanceOpts,
        proposal: &Proposal,
        hint: Option<usize>,
        now: Timestamp,
    ) -> Result<ProposalId, GovernanceError> {
        self.check_opts(opts)?;
        let engine = ProposalExecutionEngine::for_version(self.engine_version)?;
        if !engine.supports(proposal.proposal_type) {
            return Err(GovernanceError::InvalidParameter(format!(
                "engine v{} cannot execute {} proposals",
                self.engine_version, proposal.proposal_type
            )));
        }
        proposal.decode()?;
        if proposal.max_executable_time <= now {
            return Err(GovernanceError::Expired {
                deadline: proposal.max_executable_time,
                now,
            });
        }

        let power = self
            .ledger
            .power_at_with_hint(&caller, now.saturating_sub(1), hint)?;
        if power == 0 {
            return Err(GovernanceError::Unauthorized(format!(
                "{} has no voting power",
                caller
            )));
        }
        let commitment = proposal.commitment()?;

        self.stage(|party| {
            let id = party
                .proposals
                .insert(proposal.proposal_type, commitment, caller, now);
            let record = party.proposals.get_mut(id)?;
            ProposalStateMachine::new(opts, now).vote(record, caller, power)?;
            info!(proposal = id, kind = %proposal.proposal_type, proposer = %caller, "proposal created");
            Ok(id)
        })
    }

    /// Vote for a proposal with the power held just before it was created.
    /// Returns whether it has passed.
    pub fn accept(
        &mut self,
        caller: Address,
        opts: &GovernanceOpts,
        proposal_id: ProposalId,
        proposal: &Proposal,
        hint: Option<usize>,
        now: Timestamp,
    ) -> Result<bool, GovernanceError> {
        self.check_opts(opts)?;
        let commitment = proposal.commitment()?;
        let proposed_time = self.proposals.verify(proposal_id, commitment)?.proposed_time;
        let power = self
            .ledger
            .power_at_with_hint(&caller, proposed_time.saturating_sub(1), hint)?;

        let record = self.proposals.get_mut(proposal_id)?;
        ProposalStateMachine::new(opts, now).vote(record, caller, power)
    }

    pub fn veto(
        &mut self,
        caller: Address,
        opts: &GovernanceOpts,
        proposal_id: ProposalId,
        now: Timestamp,
    ) -> Result<(), GovernanceError> {
        self.check_opts(opts)?;
        if !opts.is_host(&caller) {
            return Err(GovernanceError::Unauthorized(format!("{} is not a host", caller)));
        }
        let record = self.proposals.get_mut(proposal_id)?;
        ProposalStateMachine::new(opts, now).veto(record)
    }

    /// Run one execution step of a ready or in-progress proposal.
    pub fn execute<M>(
        &mut self,
        caller: Address,
        opts: &GovernanceOpts,
        request: &ExecuteRequest,
        markets: &mut M,
        now: Timestamp,
    ) -> Result<ExecuteOutcome, GovernanceError>
    where
        M: ExternalMarkets + Clone,
    {
        self.check_opts(opts)?;
        self.require_member_or_host(&caller, opts)?;
        self.treasury.verify_precious(&request.controlled_assets)?;

        let proposal_id = request.proposal_id;
        let record = self
            .proposals
            .verify(proposal_id, request.proposal.commitment()?)?;
        if let Some(active) = self.proposals.in_progress() {
            if active != proposal_id {
                return Err(GovernanceError::InvalidState(format!(
                    "proposal {} is already in progress",
                    active
                )));
            }
        }

        let machine = ProposalStateMachine::new(opts, now);
        let phase = machine.begin_step(record, &request.proposal, &request.continuation)?;
        let is_unanimous = machine.is_unanimous(record.total_votes_for);
        let engine = ProposalExecutionEngine::for_version(self.engine_version)?;
        debug!(proposal = proposal_id, ?phase, is_unanimous, "execute");

        self.transact(markets, |party, markets| {
            let outcome = {
                let mut ctx = StepContext {
                    proposal_id,
                    now,
                    controlled_assets: &request.controlled_assets,
                    is_unanimous,
                    total_voting_power: opts.total_voting_power,
                    engine_version: party.engine_version,
                    config: &party.engine_config,
                    extra_data: &request.extra_data,
                    markets,
                };
                engine.execute_step(&mut ctx, &request.proposal, &request.continuation)?
            };

            let distributions = party.apply_effects(proposal_id, &outcome.effects, opts, now)?;
            let record = party.proposals.get_mut(proposal_id)?;
            machine.finish_step(record, &outcome.continuation);
            party.proposals.set_in_progress(if outcome.continuation.is_empty() {
                None
            } else {
                Some(proposal_id)
            });

            Ok(ExecuteOutcome {
                continuation: outcome.continuation,
                distributions,
            })
        })
    }

    /// Abort an in-progress proposal once its cancel delay elapsed, pulling
    /// back whatever it left at a venue. Returns whether an asset came back.
    #[allow(clippy::too_many_arguments)]
    pub fn cancel<M>(
        &mut self,
        caller: Address,
        opts: &GovernanceOpts,
        proposal_id: ProposalId,
        proposal: &Proposal,
        continuation: &[u8],
        markets: &mut M,
        now: Timestamp,
    ) -> Result<bool, GovernanceError>
    where
        M: ExternalMarkets + Clone,
    {
        self.check_opts(opts)?;
        self.require_member_or_host(&caller, opts)?;
        let record = self.proposals.verify(proposal_id, proposal.commitment()?)?;

        let machine = ProposalStateMachine::new(opts, now);
        machine.check_cancel(record, proposal, self.engine_config.max_cancel_delay)?;
        let expected = record
            .continuation_hash
            .unwrap_or_else(|| continuation_commitment(&[]));
        let actual = continuation_commitment(continuation);
        if expected != actual {
            return Err(GovernanceError::HashMismatch {
                what: "continuation",
                expected,
                actual,
            });
        }
        let is_unanimous = machine.is_unanimous(record.total_votes_for);
        let engine = ProposalExecutionEngine::for_version(self.engine_version)?;
        let controlled_assets = self.treasury.precious().to_vec();

        self.transact(markets, |party, markets| {
            let outcome = {
                let mut ctx = StepContext {
                    proposal_id,
                    now,
                    controlled_assets: &controlled_assets,
                    is_unanimous,
                    total_voting_power: opts.total_voting_power,
                    engine_version: party.engine_version,
                    config: &party.engine_config,
                    extra_data: &[],
                    markets,
                };
                engine.cancel(&mut ctx, proposal, continuation)?
            };

            party.apply_effects(proposal_id, &outcome.effects, opts, now)?;
            let record = party.proposals.get_mut(proposal_id)?;
            machine.mark_cancelled(record);
            party.proposals.set_in_progress(None);
            Ok(outcome.released)
        })
    }

    fn apply_effects(
        &mut self,
        proposal_id: ProposalId,
        effects: &StepEffects,
        opts: &GovernanceOpts,
        now: Timestamp,
    ) -> Result<Vec<DistributionId>, GovernanceError> {
        for asset in &effects.assets_returned {
            self.treasury.set_custody(*asset, Custody::Held)?;
        }
        for asset in &effects.assets_released {
            self.treasury.set_custody(*asset, Custody::Escrowed)?;
        }
        for asset in &effects.assets_disposed {
            self.treasury.set_custody(*asset, Custody::Disposed)?;
        }
        for (token, amount) in &effects.proceeds {
            self.treasury
                .deposit(*token, *amount, None, TransactionType::Proceeds, now)?;
        }
        for (token, amount) in &effects.spent {
            self.treasury.withdraw(
                *token,
                *amount,
                None,
                TransactionType::Spend,
                now,
                format!("proposal {}", proposal_id),
            )?;
        }

        let mut opened = Vec::with_capacity(effects.distribute.len());
        for (token, amount) in &effects.distribute {
            opened.push(self.open_distribution(*token, *amount, opts, now)?);
        }

        if let Some(version) = effects.engine_upgrade {
            info!(party = %self.name, from = self.engine_version, to = version, "execution engine upgraded");
            self.engine_version = version;
        }
        Ok(opened)
    }

    /// Status of a proposal; unknown ids report `Invalid`.
    pub fn get_proposal_status(
        &self,
        opts: &GovernanceOpts,
        proposal_id: ProposalId,
        now: Timestamp,
    ) -> Result<ProposalStatusView, GovernanceError> {
        self.check_opts(opts)?;
        let record = self.proposals.get(proposal_id).ok();
        Ok(ProposalStateMachine::new(opts, now).view(record))
    }

    // ---- treasury and distributions ----

    pub fn deposit(
        &mut self,
        from: Address,
        token: TokenKind,
        amount: Amount,
        now: Timestamp,
    ) -> Result<(), GovernanceError> {
        if amount == 0 {
            return Err(GovernanceError::InvalidParameter("deposit must be nonzero".to_string()));
        }
        self.treasury
            .deposit(token, amount, Some(from), TransactionType::Deposit, now)
    }

    /// Move `amount` of `token` from the treasury into a new distribution.
    pub fn distribute(
        &mut self,
        caller: Address,
        opts: &GovernanceOpts,
        token: TokenKind,
        amount: Amount,
        now: Timestamp,
    ) -> Result<DistributionId, GovernanceError> {
        self.check_opts(opts)?;
        self.require_member_or_host(&caller, opts)?;
        self.stage(|party| party.open_distribution(token, amount, opts, now))
    }

    fn open_distribution(
        &mut self,
        token: TokenKind,
        amount: Amount,
        opts: &GovernanceOpts,
        now: Timestamp,
    ) -> Result<DistributionId, GovernanceError> {
        self.treasury.withdraw(
            token,
            amount,
            None,
            TransactionType::Distribution,
            now,
            "distribution",
        )?;
        self.distributions.create(
            token,
            amount,
            opts.fee_bps,
            opts.fee_recipient,
            opts.total_voting_power,
            now,
        )
    }

    /// Claim a share's portion of a distribution; only its owner may.
    pub fn claim(
        &mut self,
        caller: Address,
        distribution_id: DistributionId,
        share_id: ShareId,
    ) -> Result<Amount, GovernanceError> {
        let share = self
            .ledger
            .share(share_id)
            .ok_or_else(|| GovernanceError::not_found("share", share_id))?;
        if share.owner != caller {
            return Err(GovernanceError::Unauthorized(format!(
                "{} does not own share {}",
                caller, share_id
            )));
        }
        let power = share.voting_power;
        self.distributions.claim(distribution_id, share_id, power)
    }

    pub fn claim_fee(&mut self, caller: Address, distribution_id: DistributionId) -> Result<Amount, GovernanceError> {
        self.distributions.claim_fee(distribution_id, caller)
    }

    // ---- accessors ----

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn authority(&self) -> Address {
        self.authority
    }

    pub fn opts_hash(&self) -> Option<Hash> {
        self.opts_hash
    }

    pub fn crowdfund(&self) -> Option<&Crowdfund> {
        self.crowdfund.as_ref()
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine_config
    }

    pub fn engine_version(&self) -> u32 {
        self.engine_version
    }

    pub fn ledger(&self) -> &VotingPowerLedger {
        &self.ledger
    }

    pub fn proposals(&self) -> &ProposalStore {
        &self.proposals
    }

    pub fn proposal(&self, id: ProposalId) -> Result<&ProposalVoteRecord, GovernanceError> {
        self.proposals.get(id)
    }

    pub fn distributions(&self) -> &DistributionLedger {
        &self.distributions
    }

    pub fn treasury(&self) -> &Treasury {
        &self.treasury
    }
}
