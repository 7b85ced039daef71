//! Proposal state machine.
//!
//! Status is never stored; it is derived from a record's timestamps, the
//! governance options and the current time:
//!
//! ```text
//! Invalid -> Voting -> Passed -> Ready -> InProgress -> Complete
//!              |                                |
//!              +-> Defeated                     +-> Cancelled
//! ```
//!
//! A vote that brings the tally to the party's total voting power makes
//! the proposal Ready immediately, skipping the execution delay.

use serde::{Deserialize, Serialize};
use std::fmt;
use syndicate_types::{Address, Amount, Hash, Timestamp, BPS_DENOMINATOR};
use tracing::{debug, info};

use crate::error::GovernanceError;
use crate::opts::GovernanceOpts;
use crate::proposal::Proposal;
use crate::store::ProposalVoteRecord;

/// Status of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalStatus {
    /// Does not exist
    Invalid,
    /// Accepting votes
    Voting,
    /// Vote window closed without passing, or vetoed by a host
    Defeated,
    /// Passed, waiting out the execution delay
    Passed,
    /// Executable
    Ready,
    /// At least one execution step ran and more remain
    InProgress,
    /// Fully executed
    Complete,
    /// Cancelled while in progress
    Cancelled,
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Read-only view returned by status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalStatusView {
    pub status: ProposalStatus,
    pub votes_for: Amount,
    pub proposed_time: Timestamp,
    pub passed_time: Option<Timestamp>,
    pub executed_time: Option<Timestamp>,
    pub completed_time: Option<Timestamp>,
}

/// Whether an execute call starts a proposal or resumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    First,
    Resume,
}

/// Transition rules evaluated against one set of options at one moment.
#[derive(Debug, Clone, Copy)]
pub struct ProposalStateMachine<'a> {
    opts: &'a GovernanceOpts,
    now: Timestamp,
}

impl<'a> ProposalStateMachine<'a> {
    pub fn new(opts: &'a GovernanceOpts, now: Timestamp) -> Self {
        Self { opts, now }
    }

    pub fn status(&self, record: &ProposalVoteRecord) -> ProposalStatus {
        if record.cancelled {
            return ProposalStatus::Cancelled;
        }
        if record.completed_time.is_some() {
            return ProposalStatus::Complete;
        }
        if record.executed_time.is_some() {
            return ProposalStatus::InProgress;
        }
        if record.vetoed {
            return ProposalStatus::Defeated;
        }
        if let Some(passed_time) = record.passed_time {
            if self.is_unanimous(record.total_votes_for) {
                return ProposalStatus::Ready;
            }
            return if self.now < passed_time.saturating_add(self.opts.execution_delay) {
                ProposalStatus::Passed
            } else {
                ProposalStatus::Ready
            };
        }
        if self.now >= record.proposed_time.saturating_add(self.opts.vote_duration) {
            ProposalStatus::Defeated
        } else {
            ProposalStatus::Voting
        }
    }

    pub fn view(&self, record: Option<&ProposalVoteRecord>) -> ProposalStatusView {
        match record {
            Some(record) => ProposalStatusView {
                status: self.status(record),
                votes_for: record.total_votes_for,
                proposed_time: record.proposed_time,
                passed_time: record.passed_time,
                executed_time: record.executed_time,
                completed_time: record.completed_time,
            },
            None => ProposalStatusView {
                status: ProposalStatus::Invalid,
                votes_for: 0,
                proposed_time: 0,
                passed_time: None,
                executed_time: None,
                completed_time: None,
            },
        }
    }

    /// `votes * 1e4 >= threshold_bps * total`. A party with zero total
    /// voting power never passes anything.
    pub fn is_passing(&self, votes: Amount) -> Result<bool, GovernanceError> {
        let total = self.opts.total_voting_power;
        if total == 0 {
            return Ok(false);
        }
        let lhs = votes
            .checked_mul(BPS_DENOMINATOR)
            .ok_or_else(|| GovernanceError::overflow("pass check"))?;
        let rhs = total
            .checked_mul(self.opts.pass_threshold_bps as Amount)
            .ok_or_else(|| GovernanceError::overflow("pass check"))?;
        Ok(lhs >= rhs)
    }

    pub fn is_unanimous(&self, votes: Amount) -> bool {
        self.opts.total_voting_power > 0 && votes >= self.opts.total_voting_power
    }

    /// Count `power` for `voter`. Returns whether the proposal has passed.
    pub fn vote(
        &self,
        record: &mut ProposalVoteRecord,
        voter: Address,
        power: Amount,
    ) -> Result<bool, GovernanceError> {
        match self.status(record) {
            ProposalStatus::Voting | ProposalStatus::Passed | ProposalStatus::Ready => {}
            status => {
                return Err(GovernanceError::InvalidState(format!(
                    "cannot vote on proposal {} in status {}",
                    record.proposal_id, status
                )))
            }
        }
        if record.has_voted(&voter) {
            return Err(GovernanceError::AlreadyActed(format!(
                "{} already voted on proposal {}",
                voter, record.proposal_id
            )));
        }
        if power == 0 {
            return Err(GovernanceError::Unauthorized(format!(
                "{} had no voting power when proposal {} was created",
                voter, record.proposal_id
            )));
        }

        record.total_votes_for = record
            .total_votes_for
            .checked_add(power)
            .ok_or_else(|| GovernanceError::overflow("vote tally"))?;
        record.votes_for.insert(voter, power);

        if record.passed_time.is_none() && self.is_passing(record.total_votes_for)? {
            record.passed_time = Some(self.now);
            info!(proposal = record.proposal_id, votes = record.total_votes_for, "proposal passed");
        }
        if self.is_unanimous(record.total_votes_for) {
            debug!(proposal = record.proposal_id, "unanimous, execution delay skipped");
        }

        debug!(
            proposal = record.proposal_id,
            voter = %voter,
            power,
            total = record.total_votes_for,
            "vote recorded"
        );
        Ok(record.passed_time.is_some())
    }

    /// Host veto of a proposal still in its voting window.
    pub fn veto(&self, record: &mut ProposalVoteRecord) -> Result<(), GovernanceError> {
        let status = self.status(record);
        if status != ProposalStatus::Voting {
            return Err(GovernanceError::InvalidState(format!(
                "cannot veto proposal {} in status {}",
                record.proposal_id, status
            )));
        }
        record.vetoed = true;
        info!(proposal = record.proposal_id, "proposal vetoed");
        Ok(())
    }

    /// Check that an execute step may run with `continuation`.
    pub fn begin_step(
        &self,
        record: &ProposalVoteRecord,
        proposal: &Proposal,
        continuation: &[u8],
    ) -> Result<ExecutionPhase, GovernanceError> {
        let phase = match self.status(record) {
            ProposalStatus::Ready => ExecutionPhase::First,
            ProposalStatus::InProgress => ExecutionPhase::Resume,
            ProposalStatus::Passed => {
                let ready_at = record
                    .passed_time
                    .unwrap_or(self.now)
                    .saturating_add(self.opts.execution_delay);
                return Err(GovernanceError::TooEarly { ready_at, now: self.now });
            }
            ProposalStatus::Voting => {
                return Err(GovernanceError::ThresholdNotMet {
                    actual: record.total_votes_for,
                    required: self.opts.votes_required()?,
                })
            }
            ProposalStatus::Complete | ProposalStatus::Cancelled => {
                return Err(GovernanceError::AlreadyActed(format!(
                    "proposal {} already finished",
                    record.proposal_id
                )))
            }
            status @ (ProposalStatus::Defeated | ProposalStatus::Invalid) => {
                return Err(GovernanceError::InvalidState(format!(
                    "cannot execute proposal {} in status {}",
                    record.proposal_id, status
                )))
            }
        };

        if self.now > proposal.max_executable_time {
            return Err(GovernanceError::Expired {
                deadline: proposal.max_executable_time,
                now: self.now,
            });
        }

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
        Ok(phase)
    }

    /// Record a successful step that produced `continuation`.
    pub fn finish_step(&self, record: &mut ProposalVoteRecord, continuation: &[u8]) {
        if record.executed_time.is_none() {
            record.executed_time = Some(self.now);
        }
        record.steps += 1;
        if continuation.is_empty() {
            record.completed_time = Some(self.now);
            record.continuation_hash = None;
            info!(proposal = record.proposal_id, steps = record.steps, "proposal complete");
        } else {
            record.continuation_hash = Some(continuation_commitment(continuation));
            debug!(proposal = record.proposal_id, steps = record.steps, "proposal in progress");
        }
    }

    /// Check that an in-progress proposal may be cancelled now.
    pub fn check_cancel(
        &self,
        record: &ProposalVoteRecord,
        proposal: &Proposal,
        max_cancel_delay: u64,
    ) -> Result<(), GovernanceError> {
        match self.status(record) {
            ProposalStatus::InProgress => {}
            ProposalStatus::Complete | ProposalStatus::Cancelled => {
                return Err(GovernanceError::AlreadyActed(format!(
                    "proposal {} already finished",
                    record.proposal_id
                )))
            }
            status => {
                return Err(GovernanceError::InvalidState(format!(
                    "cannot cancel proposal {} in status {}",
                    record.proposal_id, status
                )))
            }
        }

        let executed_time = record.executed_time.unwrap_or(self.now);
        let delay = proposal.cancel_delay.min(max_cancel_delay);
        let ready_at = executed_time
            .checked_add(delay)
            .ok_or_else(|| GovernanceError::overflow("cancel delay"))?;
        if self.now < ready_at {
            return Err(GovernanceError::TooEarly { ready_at, now: self.now });
        }
        Ok(())
    }

    pub fn mark_cancelled(&self, record: &mut ProposalVoteRecord) {
        record.cancelled = true;
        record.completed_time = Some(self.now);
        record.continuation_hash = None;
        info!(proposal = record.proposal_id, "proposal cancelled");
    }
}

/// Commitment stored in place of continuation bytes.
pub fn continuation_commitment(continuation: &[u8]) -> Hash {
    Hash::compute(continuation)
}
