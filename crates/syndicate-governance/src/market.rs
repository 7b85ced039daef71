//! Seam between the execution engine and outside venues.
//!
//! Auction houses, listing marketplaces, fractionalization vaults and
//! arbitrary call targets all sit behind [`ExternalMarkets`]. Handlers only
//! ever talk to the outside world through it.

use serde::{Deserialize, Serialize};
use syndicate_types::{Address, Amount, Hash, Timestamp};
use thiserror::Error;

use crate::error::GovernanceError;
use crate::treasury::AssetRef;

pub type AuctionId = u64;

/// Errors reported by an external venue.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MarketError {
    #[error("call reverted: {0}")]
    Reverted(String),

    #[error("unknown auction {0}")]
    UnknownAuction(AuctionId),

    #[error("unknown order {0}")]
    UnknownOrder(Hash),

    #[error("rejected: {0}")]
    Rejected(String),
}

impl From<MarketError> for GovernanceError {
    fn from(e: MarketError) -> Self {
        GovernanceError::ExternalCallFailed(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuctionStatus {
    /// Still running
    Open {
        highest_bid: Option<Amount>,
        ends_at: Timestamp,
    },
    /// Ended with a winning bid, waiting to be settled
    Ended { winning_bid: Amount },
    /// Ended without bids; the asset can be pulled back
    Unsold,
    /// Settled or cancelled
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open { expiry: Timestamp },
    Filled { proceeds: Amount },
    Expired,
    Cancelled,
}

/// Outside venues a party's proposals act on.
pub trait ExternalMarkets {
    /// Make an arbitrary call, returning its result bytes.
    fn call(&mut self, target: Address, value: Amount, data: &[u8]) -> Result<Vec<u8>, MarketError>;

    /// Hand `asset` to the auction house.
    fn create_auction(
        &mut self,
        asset: AssetRef,
        reserve_price: Amount,
        duration: u64,
        now: Timestamp,
    ) -> Result<AuctionId, MarketError>;

    fn auction_status(&self, auction_id: AuctionId, now: Timestamp) -> Result<AuctionStatus, MarketError>;

    /// Pull an auction without a winning bid; the asset comes back.
    fn cancel_auction(&mut self, auction_id: AuctionId) -> Result<(), MarketError>;

    /// Settle an ended auction and collect the proceeds.
    fn settle_auction(&mut self, auction_id: AuctionId, now: Timestamp) -> Result<Amount, MarketError>;

    /// List `asset` at a fixed price until `expiry`. Returns the order hash.
    fn list_order(
        &mut self,
        asset: AssetRef,
        price: Amount,
        expiry: Timestamp,
        now: Timestamp,
    ) -> Result<Hash, MarketError>;

    fn order_status(&self, order: &Hash, now: Timestamp) -> Result<OrderStatus, MarketError>;

    /// Withdraw an unfilled order; the asset comes back.
    fn cancel_order(&mut self, order: &Hash) -> Result<(), MarketError>;

    /// Lock `asset` into a new vault minting `supply` fractions to the
    /// party. Returns the fraction token.
    fn fractionalize(
        &mut self,
        asset: AssetRef,
        supply: Amount,
        reserve_price: Amount,
    ) -> Result<Address, MarketError>;
}
