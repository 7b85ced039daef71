//! Selling a controlled asset.
//!
//! Marketplace listings go to the auction house first. If no bid arrives
//! before the auction timeout the auction is pulled and the asset is listed
//! at a fixed price instead. A unanimous proposal skips the auction.
//!
//! Every stage re-reads the venue before acting, so re-running a stage
//! after a failed step repeats nothing that already happened.

use borsh::{BorshDeserialize, BorshSerialize};
use syndicate_types::{Amount, Hash, Timestamp};
use tracing::{debug, info};

use super::{
    decode_continuation, payload_mismatch, CancelOutcome, ProposalHandler, StepContext, StepEffects,
    StepOutcome,
};
use crate::error::GovernanceError;
use crate::market::{AuctionId, AuctionStatus, OrderStatus};
use crate::proposal::{ListOnAuctionData, ListOnMarketplaceData, ProposalKind, ProposalType};
use crate::treasury::{AssetRef, TokenKind};

/// Continuation of a marketplace listing.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ListingProgress {
    OnAuction {
        auction_id: AuctionId,
        /// The auction may not be pulled before this
        min_expiry: Timestamp,
    },
    OnMarketplace {
        order: Hash,
        expiry: Timestamp,
    },
}

/// Continuation of an auction-only listing.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AuctionProgress {
    pub auction_id: AuctionId,
    pub min_expiry: Timestamp,
}

enum AuctionResolution {
    /// Sold and settled
    Sold(Amount),
    /// Pulled without a sale; the asset is back
    Unsold,
}

/// Settle a sold auction or pull an unsold one once `min_expiry` passed.
fn resolve_auction(
    ctx: &mut StepContext<'_>,
    auction_id: AuctionId,
    min_expiry: Timestamp,
) -> Result<AuctionResolution, GovernanceError> {
    if ctx.now < min_expiry {
        return Err(GovernanceError::TooEarly {
            ready_at: min_expiry,
            now: ctx.now,
        });
    }
    match ctx.markets.auction_status(auction_id, ctx.now)? {
        AuctionStatus::Open {
            highest_bid: Some(_),
            ends_at,
        } => Err(GovernanceError::TooEarly {
            ready_at: ends_at,
            now: ctx.now,
        }),
        AuctionStatus::Open {
            highest_bid: None, ..
        }
        | AuctionStatus::Unsold => {
            ctx.markets.cancel_auction(auction_id)?;
            debug!(auction_id, "auction pulled without a sale");
            Ok(AuctionResolution::Unsold)
        }
        AuctionStatus::Ended { .. } => {
            let proceeds = ctx.markets.settle_auction(auction_id, ctx.now)?;
            info!(auction_id, proceeds, "auction settled");
            Ok(AuctionResolution::Sold(proceeds))
        }
        AuctionStatus::Closed => Err(GovernanceError::ExternalCallFailed(format!(
            "auction {} was closed outside the party",
            auction_id
        ))),
    }
}

fn sold(asset: AssetRef, proceeds: Amount) -> StepEffects {
    StepEffects {
        proceeds: vec![(TokenKind::Native, proceeds)],
        assets_disposed: vec![asset],
        ..Default::default()
    }
}

fn list_fixed_price(
    ctx: &mut StepContext<'_>,
    data: &ListOnMarketplaceData,
    effects: &mut StepEffects,
) -> Result<Vec<u8>, GovernanceError> {
    let expiry = ctx
        .now
        .checked_add(data.duration)
        .ok_or_else(|| GovernanceError::overflow("listing expiry"))?;
    let order = ctx.markets.list_order(data.asset, data.list_price, expiry, ctx.now)?;
    effects.assets_released.push(data.asset);
    info!(proposal = ctx.proposal_id, order = %order, price = data.list_price, "listed at fixed price");
    Ok(borsh::to_vec(&ListingProgress::OnMarketplace { order, expiry })?)
}

fn start_auction(
    ctx: &mut StepContext<'_>,
    asset: AssetRef,
    reserve_price: Amount,
    timeout: u64,
    duration: u64,
) -> Result<(AuctionId, Timestamp), GovernanceError> {
    let min_expiry = ctx
        .now
        .checked_add(timeout)
        .ok_or_else(|| GovernanceError::overflow("auction timeout"))?;
    let auction_id = ctx.markets.create_auction(asset, reserve_price, duration, ctx.now)?;
    info!(proposal = ctx.proposal_id, auction_id, min_expiry, "listed at auction");
    Ok((auction_id, min_expiry))
}

/// Cancellation shared by both handlers while an auction is running.
fn cancel_auction_stage(
    ctx: &mut StepContext<'_>,
    asset: AssetRef,
    auction_id: AuctionId,
) -> Result<CancelOutcome, GovernanceError> {
    let outcome = match ctx.markets.auction_status(auction_id, ctx.now)? {
        AuctionStatus::Open {
            highest_bid: None, ..
        }
        | AuctionStatus::Unsold => {
            ctx.markets.cancel_auction(auction_id)?;
            CancelOutcome {
                released: true,
                effects: StepEffects {
                    assets_returned: vec![asset],
                    ..Default::default()
                },
            }
        }
        AuctionStatus::Ended { .. } => {
            let proceeds = ctx.markets.settle_auction(auction_id, ctx.now)?;
            CancelOutcome {
                released: false,
                effects: sold(asset, proceeds),
            }
        }
        // a live bid binds the asset until the auction ends and settles
        AuctionStatus::Open {
            highest_bid: Some(_),
            ends_at,
        } => {
            return Err(GovernanceError::TooEarly {
                ready_at: ends_at,
                now: ctx.now,
            })
        }
        AuctionStatus::Closed => CancelOutcome::default(),
    };
    Ok(outcome)
}

/// Auction first, fixed-price listing as fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct ListOnMarketplaceHandler;

impl ProposalHandler for ListOnMarketplaceHandler {
    fn proposal_type(&self) -> ProposalType {
        ProposalType::ListOnMarketplace
    }

    fn step(
        &self,
        ctx: &mut StepContext<'_>,
        kind: &ProposalKind,
        continuation: &[u8],
    ) -> Result<StepOutcome, GovernanceError> {
        let ProposalKind::ListOnMarketplace(data) = kind else {
            return Err(payload_mismatch(self.proposal_type(), kind));
        };
        let mut effects = StepEffects::default();

        if continuation.is_empty() {
            ctx.require_controlled(&data.asset)?;
            if ctx.is_unanimous {
                let next = list_fixed_price(ctx, data, &mut effects)?;
                return Ok(StepOutcome::suspend(next, effects));
            }
            let timeout = ctx.config.auction_timeout;
            let duration = ctx.config.auction_duration;
            let (auction_id, min_expiry) =
                start_auction(ctx, data.asset, data.list_price, timeout, duration)?;
            effects.assets_released.push(data.asset);
            let next = borsh::to_vec(&ListingProgress::OnAuction { auction_id, min_expiry })?;
            return Ok(StepOutcome::suspend(next, effects));
        }

        match decode_continuation::<ListingProgress>(continuation)? {
            ListingProgress::OnAuction {
                auction_id,
                min_expiry,
            } => match resolve_auction(ctx, auction_id, min_expiry)? {
                AuctionResolution::Sold(proceeds) => Ok(StepOutcome::complete(sold(data.asset, proceeds))),
                AuctionResolution::Unsold => {
                    effects.assets_returned.push(data.asset);
                    let next = list_fixed_price(ctx, data, &mut effects)?;
                    Ok(StepOutcome::suspend(next, effects))
                }
            },
            ListingProgress::OnMarketplace { order, expiry } => {
                match ctx.markets.order_status(&order, ctx.now)? {
                    OrderStatus::Filled { proceeds } => {
                        info!(proposal = ctx.proposal_id, order = %order, proceeds, "listing filled");
                        Ok(StepOutcome::complete(sold(data.asset, proceeds)))
                    }
                    OrderStatus::Open { .. } => Err(GovernanceError::TooEarly {
                        ready_at: expiry,
                        now: ctx.now,
                    }),
                    OrderStatus::Expired => {
                        ctx.markets.cancel_order(&order)?;
                        info!(proposal = ctx.proposal_id, order = %order, "listing expired unsold");
                        effects.assets_returned.push(data.asset);
                        Ok(StepOutcome::complete(effects))
                    }
                    OrderStatus::Cancelled => Err(GovernanceError::ExternalCallFailed(format!(
                        "order {} was cancelled outside the party",
                        order
                    ))),
                }
            }
        }
    }

    fn cancel(
        &self,
        ctx: &mut StepContext<'_>,
        kind: &ProposalKind,
        continuation: &[u8],
    ) -> Result<CancelOutcome, GovernanceError> {
        let ProposalKind::ListOnMarketplace(data) = kind else {
            return Err(payload_mismatch(self.proposal_type(), kind));
        };
        match decode_continuation::<ListingProgress>(continuation)? {
            ListingProgress::OnAuction { auction_id, .. } => {
                cancel_auction_stage(ctx, data.asset, auction_id)
            }
            ListingProgress::OnMarketplace { order, .. } => {
                match ctx.markets.order_status(&order, ctx.now)? {
                    OrderStatus::Open { .. } | OrderStatus::Expired => {
                        ctx.markets.cancel_order(&order)?;
                        Ok(CancelOutcome {
                            released: true,
                            effects: StepEffects {
                                assets_returned: vec![data.asset],
                                ..Default::default()
                            },
                        })
                    }
                    OrderStatus::Filled { proceeds } => Ok(CancelOutcome {
                        released: false,
                        effects: sold(data.asset, proceeds),
                    }),
                    OrderStatus::Cancelled => Ok(CancelOutcome::default()),
                }
            }
        }
    }
}

/// Auction only; an unsold asset comes back to the party.
#[derive(Debug, Default, Clone, Copy)]
pub struct ListOnAuctionHandler;

impl ListOnAuctionHandler {
    fn data<'k>(&self, kind: &'k ProposalKind) -> Result<&'k ListOnAuctionData, GovernanceError> {
        match kind {
            ProposalKind::ListOnAuction(data) => Ok(data),
            other => Err(payload_mismatch(self.proposal_type(), other)),
        }
    }
}

impl ProposalHandler for ListOnAuctionHandler {
    fn proposal_type(&self) -> ProposalType {
        ProposalType::ListOnAuction
    }

    fn step(
        &self,
        ctx: &mut StepContext<'_>,
        kind: &ProposalKind,
        continuation: &[u8],
    ) -> Result<StepOutcome, GovernanceError> {
        let data = self.data(kind)?;

        if continuation.is_empty() {
            ctx.require_controlled(&data.asset)?;
            let (auction_id, min_expiry) =
                start_auction(ctx, data.asset, data.reserve_price, data.timeout, data.duration)?;
            let effects = StepEffects {
                assets_released: vec![data.asset],
                ..Default::default()
            };
            let next = borsh::to_vec(&AuctionProgress { auction_id, min_expiry })?;
            return Ok(StepOutcome::suspend(next, effects));
        }

        let progress = decode_continuation::<AuctionProgress>(continuation)?;
        match resolve_auction(ctx, progress.auction_id, progress.min_expiry)? {
            AuctionResolution::Sold(proceeds) => Ok(StepOutcome::complete(sold(data.asset, proceeds))),
            AuctionResolution::Unsold => Ok(StepOutcome::complete(StepEffects {
                assets_returned: vec![data.asset],
                ..Default::default()
            })),
        }
    }

    fn cancel(
        &self,
        ctx: &mut StepContext<'_>,
        kind: &ProposalKind,
        continuation: &[u8],
    ) -> Result<CancelOutcome, GovernanceError> {
        let data = self.data(kind)?;
        let progress = decode_continuation::<AuctionProgress>(continuation)?;
        cancel_auction_stage(ctx, data.asset, progress.auction_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::test_support::ctx;
    use crate::opts::EngineConfig;
    use crate::simulated::SimulatedMarkets;
    use syndicate_types::Address;

    fn asset() -> AssetRef {
        AssetRef::new(Address::derive(b"collection"), 42)
    }

    fn config() -> EngineConfig {
        EngineConfig {
            auction_timeout: 100,
            auction_duration: 200,
            ..Default::default()
        }
    }

    fn listing() -> ProposalKind {
        ProposalKind::ListOnMarketplace(ListOnMarketplaceData {
            asset: asset(),
            list_price: 1_000,
            duration: 500,
        })
    }

    fn run(
        markets: &mut SimulatedMarkets,
        kind: &ProposalKind,
        continuation: &[u8],
        now: Timestamp,
        unanimous: bool,
    ) -> Result<StepOutcome, GovernanceError> {
        let config = config();
        let assets = [asset()];
        let mut ctx = ctx(markets, &config, &assets, now, unanimous);
        match kind {
            ProposalKind::ListOnAuction(_) => ListOnAuctionHandler.step(&mut ctx, kind, continuation),
            _ => ListOnMarketplaceHandler.step(&mut ctx, kind, continuation),
        }
    }

    #[test]
    fn test_listing_falls_back_to_fixed_price() {
        let mut markets = SimulatedMarkets::new();
        let kind = listing();

        let first = run(&mut markets, &kind, &[], 1000, false).unwrap();
        assert_eq!(first.effects.assets_released, vec![asset()]);
        let progress: ListingProgress = borsh::from_slice(&first.continuation).unwrap();
        assert!(matches!(progress, ListingProgress::OnAuction { min_expiry: 1100, .. }));

        // before the auction timeout
        let early = run(&mut markets, &kind, &first.continuation, 1099, false);
        assert!(matches!(early, Err(GovernanceError::TooEarly { ready_at: 1100, now: 1099 })));

        let second = run(&mut markets, &kind, &first.continuation, 1100, false).unwrap();
        assert_eq!(second.effects.assets_returned, vec![asset()]);
        assert_eq!(second.effects.assets_released, vec![asset()]);
        let order = markets.latest_order().unwrap();
        assert!(matches!(
            borsh::from_slice::<ListingProgress>(&second.continuation).unwrap(),
            ListingProgress::OnMarketplace { expiry: 1600, .. }
        ));

        assert!(matches!(
            run(&mut markets, &kind, &second.continuation, 1200, false),
            Err(GovernanceError::TooEarly { ready_at: 1600, .. })
        ));

        markets.fill_order(&order, Address::derive(b"buyer"), 1300).unwrap();
        let done = run(&mut markets, &kind, &second.continuation, 1300, false).unwrap();
        assert!(done.continuation.is_empty());
        assert_eq!(done.effects.proceeds, vec![(TokenKind::Native, 1_000)]);
        assert_eq!(done.effects.assets_disposed, vec![asset()]);
    }

    #[test]
    fn test_listing_sold_at_auction() {
        let mut markets = SimulatedMarkets::new();
        let kind = listing();

        let first = run(&mut markets, &kind, &[], 1000, false).unwrap();
        let auction_id = markets.latest_auction().unwrap();
        markets.bid(auction_id, Address::derive(b"bidder"), 1_500, 1050).unwrap();

        // bid landed, auction still running
        assert!(matches!(
            run(&mut markets, &kind, &first.continuation, 1100, false),
            Err(GovernanceError::TooEarly { ready_at: 1200, .. })
        ));

        let done = run(&mut markets, &kind, &first.continuation, 1200, false).unwrap();
        assert!(done.continuation.is_empty());
        assert_eq!(done.effects.proceeds, vec![(TokenKind::Native, 1_500)]);
    }

    #[test]
    fn test_unanimous_listing_skips_auction() {
        let mut markets = SimulatedMarkets::new();
        let first = run(&mut markets, &listing(), &[], 1000, true).unwrap();
        assert!(markets.latest_auction().is_none());
        assert!(matches!(
            borsh::from_slice::<ListingProgress>(&first.continuation).unwrap(),
            ListingProgress::OnMarketplace { .. }
        ));
    }

    #[test]
    fn test_expired_listing_returns_asset() {
        let mut markets = SimulatedMarkets::new();
        let kind = listing();
        let first = run(&mut markets, &kind, &[], 1000, true).unwrap();

        let done = run(&mut markets, &kind, &first.continuation, 1500, true).unwrap();
        assert!(done.continuation.is_empty());
        assert_eq!(done.effects.assets_returned, vec![asset()]);
        assert!(done.effects.proceeds.is_empty());
    }

    #[test]
    fn test_failed_resume_repeats_nothing() {
        let mut markets = SimulatedMarkets::new();
        let kind = listing();
        let first = run(&mut markets, &kind, &[], 1000, false).unwrap();
        let calls = markets.call_count();

        for now in [1010, 1050, 1099] {
            assert!(run(&mut markets, &kind, &first.continuation, now, false).is_err());
        }
        assert_eq!(markets.call_count(), calls);
    }

    #[test]
    fn test_uncontrolled_asset_rejected() {
        let mut markets = SimulatedMarkets::new();
        let kind = ProposalKind::ListOnMarketplace(ListOnMarketplaceData {
            asset: AssetRef::new(Address::derive(b"someone else"), 1),
            list_price: 1,
            duration: 1,
        });
        assert!(matches!(
            run(&mut markets, &kind, &[], 1000, false),
            Err(GovernanceError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_auction_only_flow() {
        let mut markets = SimulatedMarkets::new();
        let kind = ProposalKind::ListOnAuction(ListOnAuctionData {
            asset: asset(),
            reserve_price: 10,
            timeout: 300,
            duration: 300,
        });

        let first = run(&mut markets, &kind, &[], 1000, false).unwrap();
        assert!(matches!(
            run(&mut markets, &kind, &first.continuation, 1299, false),
            Err(GovernanceError::TooEarly { ready_at: 1300, .. })
        ));

        let done = run(&mut markets, &kind, &first.continuation, 1300, false).unwrap();
        assert!(done.continuation.is_empty());
        assert_eq!(done.effects.assets_returned, vec![asset()]);
    }

    #[test]
    fn test_cancel_pulls_open_auction() {
        let mut markets = SimulatedMarkets::new();
        let kind = listing();
        let first = run(&mut markets, &kind, &[], 1000, false).unwrap();

        let config = config();
        let assets = [asset()];
        let mut ctx = ctx(&mut markets, &config, &assets, 1010, false);
        let outcome = ListOnMarketplaceHandler
            .cancel(&mut ctx, &kind, &first.continuation)
            .unwrap();
        assert!(outcome.released);
        assert_eq!(outcome.effects.assets_returned, vec![asset()]);
    }

    #[test]
    fn test_cancel_waits_for_live_bid() {
        let mut markets = SimulatedMarkets::new();
        let kind = listing();
        let first = run(&mut markets, &kind, &[], 1000, false).unwrap();
        let auction_id = markets.latest_auction().unwrap();
        markets.bid(auction_id, Address::derive(b"bidder"), 1_500, 1050).unwrap();

        let config = config();
        let assets = [asset()];
        {
            let mut ctx = ctx(&mut markets, &config, &assets, 1100, false);
            assert!(matches!(
                ListOnMarketplaceHandler.cancel(&mut ctx, &kind, &first.continuation),
                Err(GovernanceError::TooEarly { ready_at: 1200, .. })
            ));
        }

        // once the auction ended the cancel settles the sale
        let mut ctx = ctx(&mut markets, &config, &assets, 1200, false);
        let outcome = ListOnMarketplaceHandler
            .cancel(&mut ctx, &kind, &first.continuation)
            .unwrap();
        assert!(!outcome.released);
        assert_eq!(outcome.effects.proceeds, vec![(TokenKind::Native, 1_500)]);
    }
}
