//! In-memory venues implementing [`ExternalMarkets`].
//!
//! Used by the CLI (persisted alongside the party) and by tests, which
//! drive bids and fills directly and count the calls a party makes.

use borsh::BorshSerialize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use syndicate_types::{Address, Amount, Hash, Timestamp};
use tracing::debug;

use crate::market::{AuctionId, AuctionStatus, ExternalMarkets, MarketError, OrderStatus};
use crate::treasury::AssetRef;

/// Scripted result for calls to one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimResponse {
    Return(Vec<u8>),
    Revert(String),
}

/// Every state-changing interaction, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketEvent {
    Call { target: Address, value: Amount, data: Vec<u8> },
    AuctionCreated { auction_id: AuctionId, asset: AssetRef },
    AuctionCancelled { auction_id: AuctionId },
    AuctionSettled { auction_id: AuctionId, proceeds: Amount },
    OrderListed { order: Hash, asset: AssetRef },
    OrderCancelled { order: Hash },
    Fractionalized { vault: Address, asset: AssetRef },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimAuction {
    pub asset: AssetRef,
    pub reserve_price: Amount,
    pub ends_at: Timestamp,
    pub highest_bid: Option<(Address, Amount)>,
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimOrder {
    pub asset: AssetRef,
    pub price: Amount,
    pub expiry: Timestamp,
    pub buyer: Option<Address>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimVault {
    pub asset: AssetRef,
    pub supply: Amount,
    pub reserve_price: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedMarkets {
    responses: BTreeMap<Address, SimResponse>,
    auctions: BTreeMap<AuctionId, SimAuction>,
    orders: BTreeMap<Hash, SimOrder>,
    vaults: BTreeMap<Address, SimVault>,
    events: Vec<MarketEvent>,
    last_auction_id: AuctionId,
    order_nonce: u64,
}

impl SimulatedMarkets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script what calls to `target` return. Unscripted targets echo the
    /// call data.
    pub fn set_response(&mut self, target: Address, response: SimResponse) {
        self.responses.insert(target, response);
    }

    /// Place a bid on a running auction.
    pub fn bid(
        &mut self,
        auction_id: AuctionId,
        bidder: Address,
        amount: Amount,
        now: Timestamp,
    ) -> Result<(), MarketError> {
        let auction = self
            .auctions
            .get_mut(&auction_id)
            .ok_or(MarketError::UnknownAuction(auction_id))?;
        if auction.closed || now >= auction.ends_at {
            return Err(MarketError::Rejected(format!("auction {} is over", auction_id)));
        }
        if amount < auction.reserve_price {
            return Err(MarketError::Rejected("bid below reserve".to_string()));
        }
        if let Some((_, best)) = auction.highest_bid {
            if amount <= best {
                return Err(MarketError::Rejected("bid not above highest bid".to_string()));
            }
        }
        auction.highest_bid = Some((bidder, amount));
        Ok(())
    }

    /// Buy a listed order.
    pub fn fill_order(&mut self, order: &Hash, buyer: Address, now: Timestamp) -> Result<Amount, MarketError> {
        let entry = self.orders.get_mut(order).ok_or(MarketError::UnknownOrder(*order))?;
        if entry.cancelled || entry.buyer.is_some() || now >= entry.expiry {
            return Err(MarketError::Rejected(format!("order {} is not open", order)));
        }
        entry.buyer = Some(buyer);
        Ok(entry.price)
    }

    pub fn auction(&self, auction_id: AuctionId) -> Option<&SimAuction> {
        self.auctions.get(&auction_id)
    }

    pub fn order(&self, order: &Hash) -> Option<&SimOrder> {
        self.orders.get(order)
    }

    pub fn vault(&self, token: &Address) -> Option<&SimVault> {
        self.vaults.get(token)
    }

    pub fn events(&self) -> &[MarketEvent] {
        &self.events
    }

    /// Number of state-changing interactions so far.
    pub fn call_count(&self) -> usize {
        self.events.len()
    }

    /// Most recently created auction.
    pub fn latest_auction(&self) -> Option<AuctionId> {
        self.auctions.keys().next_back().copied()
    }

    /// Most recently listed order.
    pub fn latest_order(&self) -> Option<Hash> {
        self.events.iter().rev().find_map(|event| match event {
            MarketEvent::OrderListed { order, .. } => Some(*order),
            _ => None,
        })
    }

    fn commit<T: BorshSerialize>(value: &T) -> Result<Hash, MarketError> {
        Hash::commit(value).map_err(|e| MarketError::Rejected(e.to_string()))
    }
}

impl ExternalMarkets for SimulatedMarkets {
    fn call(&mut self, target: Address, value: Amount, data: &[u8]) -> Result<Vec<u8>, MarketError> {
        let result = match self.responses.get(&target) {
            Some(SimResponse::Revert(reason)) => return Err(MarketError::Reverted(reason.clone())),
            Some(SimResponse::Return(bytes)) => bytes.clone(),
            None => data.to_vec(),
        };
        self.events.push(MarketEvent::Call {
            target,
            value,
            data: data.to_vec(),
        });
        Ok(result)
    }

    fn create_auction(
        &mut self,
        asset: AssetRef,
        reserve_price: Amount,
        duration: u64,
        now: Timestamp,
    ) -> Result<AuctionId, MarketError> {
        if self
            .auctions
            .values()
            .any(|auction| auction.asset == asset && !auction.closed)
        {
            return Err(MarketError::Rejected(format!("{} already at auction", asset)));
        }
        self.last_auction_id += 1;
        let auction_id = self.last_auction_id;
        self.auctions.insert(
            auction_id,
            SimAuction {
                asset,
                reserve_price,
                ends_at: now.saturating_add(duration),
                highest_bid: None,
                closed: false,
            },
        );
        self.events.push(MarketEvent::AuctionCreated { auction_id, asset });
        debug!(auction_id, asset = %asset, "auction created");
        Ok(auction_id)
    }

    fn auction_status(&self, auction_id: AuctionId, now: Timestamp) -> Result<AuctionStatus, MarketError> {
        let auction = self
            .auctions
            .get(&auction_id)
            .ok_or(MarketError::UnknownAuction(auction_id))?;
        let status = if auction.closed {
            AuctionStatus::Closed
        } else if now < auction.ends_at {
            AuctionStatus::Open {
                highest_bid: auction.highest_bid.map(|(_, amount)| amount),
                ends_at: auction.ends_at,
            }
        } else {
            match auction.highest_bid {
                Some((_, winning_bid)) => AuctionStatus::Ended { winning_bid },
                None => AuctionStatus::Unsold,
            }
        };
        Ok(status)
    }

    fn cancel_auction(&mut self, auction_id: AuctionId) -> Result<(), MarketError> {
        let auction = self
            .auctions
            .get_mut(&auction_id)
            .ok_or(MarketError::UnknownAuction(auction_id))?;
        if auction.closed || auction.highest_bid.is_some() {
            return Err(MarketError::Rejected(format!(
                "auction {} cannot be cancelled",
                auction_id
            )));
        }
        auction.closed = true;
        self.events.push(MarketEvent::AuctionCancelled { auction_id });
        Ok(())
    }

    fn settle_auction(&mut self, auction_id: AuctionId, now: Timestamp) -> Result<Amount, MarketError> {
        let auction = self
            .auctions
            .get_mut(&auction_id)
            .ok_or(MarketError::UnknownAuction(auction_id))?;
        let proceeds = match auction.highest_bid {
            Some((_, amount)) if !auction.closed && now >= auction.ends_at => amount,
            _ => {
                return Err(MarketError::Rejected(format!(
                    "auction {} cannot be settled",
                    auction_id
                )))
            }
        };
        auction.closed = true;
        self.events.push(MarketEvent::AuctionSettled { auction_id, proceeds });
        Ok(proceeds)
    }

    fn list_order(
        &mut self,
        asset: AssetRef,
        price: Amount,
        expiry: Timestamp,
        now: Timestamp,
    ) -> Result<Hash, MarketError> {
        if expiry <= now {
            return Err(MarketError::Rejected("order already expired".to_string()));
        }
        self.order_nonce += 1;
        let order = Self::commit(&(asset, price, expiry, self.order_nonce))?;
        self.orders.insert(
            order,
            SimOrder {
                asset,
                price,
                expiry,
                buyer: None,
                cancelled: false,
            },
        );
        self.events.push(MarketEvent::OrderListed { order, asset });
        debug!(order = %order, asset = %asset, price, "order listed");
        Ok(order)
    }

    fn order_status(&self, order: &Hash, now: Timestamp) -> Result<OrderStatus, MarketError> {
        let entry = self.orders.get(order).ok_or(MarketError::UnknownOrder(*order))?;
        let status = if entry.buyer.is_some() {
            OrderStatus::Filled { proceeds: entry.price }
        } else if entry.cancelled {
            OrderStatus::Cancelled
        } else if now >= entry.expiry {
            OrderStatus::Expired
        } else {
            OrderStatus::Open { expiry: entry.expiry }
        };
        Ok(status)
    }

    fn cancel_order(&mut self, order: &Hash) -> Result<(), MarketError> {
        let entry = self.orders.get_mut(order).ok_or(MarketError::UnknownOrder(*order))?;
        if entry.buyer.is_some() || entry.cancelled {
            return Err(MarketError::Rejected(format!("order {} cannot be cancelled", order)));
        }
        entry.cancelled = true;
        self.events.push(MarketEvent::OrderCancelled { order: *order });
        Ok(())
    }

    fn fractionalize(
        &mut self,
        asset: AssetRef,
        supply: Amount,
        reserve_price: Amount,
    ) -> Result<Address, MarketError> {
        if supply == 0 {
            return Err(MarketError::Rejected("vault supply must be nonzero".to_string()));
        }
        let vault = Address::from_bytes({
            let digest = Self::commit(&(asset, self.vaults.len() as u64))?;
            let mut bytes = [0u8; 20];
            bytes.copy_from_slice(&digest.as_bytes()[..20]);
            bytes
        });
        self.vaults.insert(
            vault,
            SimVault {
                asset,
                supply,
                reserve_price,
            },
        );
        self.events.push(MarketEvent::Fractionalized { vault, asset });
        Ok(vault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset() -> AssetRef {
        AssetRef::new(Address::derive(b"collection"), 1)
    }

    #[test]
    fn test_call_echoes_or_follows_script() {
        let mut markets = SimulatedMarkets::new();
        let target = Address::derive(b"target");

        assert_eq!(markets.call(target, 0, b"ping").unwrap(), b"ping".to_vec());

        markets.set_response(target, SimResponse::Return(b"pong".to_vec()));
        assert_eq!(markets.call(target, 0, b"ping").unwrap(), b"pong".to_vec());

        markets.set_response(target, SimResponse::Revert("nope".to_string()));
        assert!(matches!(markets.call(target, 0, b"ping"), Err(MarketError::Reverted(_))));

        // reverted calls leave no trace
        assert_eq!(markets.call_count(), 2);
    }

    #[test]
    fn test_auction_lifecycle() {
        let mut markets = SimulatedMarkets::new();
        let id = markets.create_auction(asset(), 100, 50, 1000).unwrap();

        assert_eq!(
            markets.auction_status(id, 1000).unwrap(),
            AuctionStatus::Open { highest_bid: None, ends_at: 1050 }
        );
        assert!(markets.bid(id, Address::derive(b"bidder"), 99, 1010).is_err());
        markets.bid(id, Address::derive(b"bidder"), 150, 1010).unwrap();

        assert!(markets.cancel_auction(id).is_err());
        assert!(markets.settle_auction(id, 1049).is_err());
        assert_eq!(markets.auction_status(id, 1050).unwrap(), AuctionStatus::Ended { winning_bid: 150 });
        assert_eq!(markets.settle_auction(id, 1050).unwrap(), 150);
        assert_eq!(markets.auction_status(id, 1050).unwrap(), AuctionStatus::Closed);
    }

    #[test]
    fn test_unsold_auction_can_be_cancelled() {
        let mut markets = SimulatedMarkets::new();
        let id = markets.create_auction(asset(), 100, 50, 1000).unwrap();
        assert_eq!(markets.auction_status(id, 2000).unwrap(), AuctionStatus::Unsold);
        markets.cancel_auction(id).unwrap();
        // the asset may go back on auction
        assert!(markets.create_auction(asset(), 100, 50, 2000).is_ok());
    }

    #[test]
    fn test_order_lifecycle() {
        let mut markets = SimulatedMarkets::new();
        let order = markets.list_order(asset(), 500, 2000, 1000).unwrap();
        assert_eq!(markets.latest_order(), Some(order));

        assert_eq!(markets.order_status(&order, 1500).unwrap(), OrderStatus::Open { expiry: 2000 });
        assert_eq!(markets.order_status(&order, 2000).unwrap(), OrderStatus::Expired);

        assert_eq!(markets.fill_order(&order, Address::derive(b"buyer"), 1500).unwrap(), 500);
        assert_eq!(markets.order_status(&order, 2500).unwrap(), OrderStatus::Filled { proceeds: 500 });
        assert!(markets.cancel_order(&order).is_err());
    }

    #[test]
    fn test_fractionalize_creates_vault() {
        let mut markets = SimulatedMarkets::new();
        let vault = markets.fractionalize(asset(), 1_000, 10).unwrap();
        assert_eq!(markets.vault(&vault).unwrap().supply, 1_000);
        assert!(markets.fractionalize(asset(), 0, 10).is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let mut markets = SimulatedMarkets::new();
        markets.create_auction(asset(), 1, 10, 0).unwrap();
        markets.list_order(AssetRef::new(Address::derive(b"other"), 2), 5, 10, 0).unwrap();

        let json = serde_json::to_string(&markets).unwrap();
        let back: SimulatedMarkets = serde_json::from_str(&json).unwrap();
        assert_eq!(back, markets);
    }
}
