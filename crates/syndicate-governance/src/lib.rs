//! Syndicate Governance - Pooled-capital parties and their proposals.
//!
//! This crate provides:
//! - Crowdfund contribution accounting and voting power minting
//! - Snapshot-based voting power with delegation
//! - Hash-committed proposals and their lifecycle
//! - Resumable, multi-step proposal execution against external markets
//! - Treasury tracking and pull-based distributions
//!
//! [`Party`] is the entry point; the other modules are its parts.

pub mod crowdfund;
pub mod distribution;
pub mod error;
pub mod execution;
pub mod lifecycle;
pub mod market;
pub mod opts;
pub mod party;
pub mod proposal;
mod serde_pairs;
pub mod simulated;
pub mod store;
pub mod treasury;
pub mod voting;

pub use crowdfund::{Crowdfund, CrowdfundOpts, CrowdfundOutcome, CrowdfundStatus, RedeemOutcome};
pub use distribution::{DistributionId, DistributionInfo, DistributionLedger};
pub use error::{Disposition, GovernanceError};
pub use execution::{ProposalExecutionEngine, ProposalHandler, StepContext, StepEffects, StepOutcome};
pub use lifecycle::{ProposalStateMachine, ProposalStatus, ProposalStatusView};
pub use market::{AuctionStatus, ExternalMarkets, MarketError, OrderStatus};
pub use opts::{EngineConfig, GovernanceOpts, GovernanceParams, LATEST_ENGINE_VERSION};
pub use party::{CrowdfundSettlement, ExecuteOutcome, ExecuteRequest, Party};
pub use proposal::{ArbitraryCall, Proposal, ProposalId, ProposalKind, ProposalType};
pub use simulated::SimulatedMarkets;
pub use store::{ProposalStore, ProposalVoteRecord};
pub use treasury::{AssetRef, Custody, TokenKind, Treasury};
pub use voting::{Share, ShareId, VotingPowerLedger, VotingPowerSnapshot};
