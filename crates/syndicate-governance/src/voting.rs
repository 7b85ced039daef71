//! Voting power ledger.
//!
//! Each holder has an append-only history of snapshots. Power at time `t`
//! is the latest snapshot with `timestamp <= t`, or zero. A write at the
//! same timestamp as the latest snapshot replaces it; anything older is
//! never touched again.
//!
//! Voting power lives on shares. Minting creates a share with a fixed
//! intrinsic power; holders may delegate the sum of their shares' power to
//! another address.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use syndicate_types::{Address, Amount, Timestamp};
use tracing::debug;

use crate::error::GovernanceError;

pub type ShareId = u64;

/// A governance share: the unit distributions pay against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub id: ShareId,
    pub owner: Address,
    pub voting_power: Amount,
    pub minted_at: Timestamp,
}

/// A holder's voting power as of `timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VotingPowerSnapshot {
    pub timestamp: Timestamp,
    /// `delegated + (is_delegated ? 0 : intrinsic)`
    pub total_voting_power: Amount,
    /// Power of the shares the holder owns.
    pub intrinsic_voting_power: Amount,
    /// Power other holders delegated to this one.
    pub delegated_voting_power: Amount,
    /// Whether the holder's own intrinsic power is delegated away.
    pub is_delegated: bool,
}

impl VotingPowerSnapshot {
    fn recompute_total(&mut self) -> Result<(), GovernanceError> {
        let own = if self.is_delegated { 0 } else { self.intrinsic_voting_power };
        self.total_voting_power = own
            .checked_add(self.delegated_voting_power)
            .ok_or_else(|| GovernanceError::overflow("snapshot total"))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VotingPowerLedger {
    snapshots: BTreeMap<Address, Vec<VotingPowerSnapshot>>,
    /// holder -> delegate; absent means self-delegated.
    delegations: BTreeMap<Address, Address>,
    shares: BTreeMap<ShareId, Share>,
    last_share_id: ShareId,
    total_intrinsic: Amount,
}

/// Snapshot and delegation writes of one operation, validated before any
/// of them touch the ledger.
#[derive(Debug, Default)]
struct PendingWrites {
    snapshots: Vec<(Address, VotingPowerSnapshot)>,
    delegations: Vec<(Address, Address)>,
}

impl PendingWrites {
    fn snapshot_of(&self, holder: &Address) -> Option<VotingPowerSnapshot> {
        self.snapshots
            .iter()
            .find(|(addr, _)| addr == holder)
            .map(|(_, snap)| *snap)
    }

    fn delegate_of(&self, holder: &Address) -> Option<Address> {
        self.delegations
            .iter()
            .rev()
            .find(|(addr, _)| addr == holder)
            .map(|(_, delegate)| *delegate)
    }
}

impl VotingPowerLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a new share for `owner`. `delegate` overrides the owner's
    /// current delegate when given.
    pub fn mint(
        &mut self,
        owner: Address,
        voting_power: Amount,
        delegate: Option<Address>,
        now: Timestamp,
    ) -> Result<ShareId, GovernanceError> {
        if voting_power == 0 {
            return Err(GovernanceError::InvalidParameter(
                "cannot mint a share with zero voting power".to_string(),
            ));
        }
        let intrinsic = self
            .intrinsic_power(&owner)
            .checked_add(voting_power)
            .ok_or_else(|| GovernanceError::overflow("mint"))?;
        let total_intrinsic = self
            .total_intrinsic
            .checked_add(voting_power)
            .ok_or_else(|| GovernanceError::overflow("total intrinsic power"))?;

        let mut pending = PendingWrites::default();
        self.stage_adjustment(&mut pending, owner, intrinsic, delegate, now)?;
        self.commit(pending);
        self.total_intrinsic = total_intrinsic;

        self.last_share_id += 1;
        let id = self.last_share_id;
        self.shares.insert(
            id,
            Share {
                id,
                owner,
                voting_power,
                minted_at: now,
            },
        );

        debug!(share = id, owner = %owner, voting_power, "minted share");
        Ok(id)
    }

    /// Burn a share, removing its power from its owner. Not reachable
    /// through a party; shares only leave by transfer there.
    pub fn burn(&mut self, share_id: ShareId, now: Timestamp) -> Result<Share, GovernanceError> {
        let share = self
            .shares
            .get(&share_id)
            .cloned()
            .ok_or_else(|| GovernanceError::not_found("share", share_id))?;

        let intrinsic = self
            .intrinsic_power(&share.owner)
            .checked_sub(share.voting_power)
            .ok_or_else(|| GovernanceError::Arithmetic("burn exceeds owner power".to_string()))?;
        let mut pending = PendingWrites::default();
        self.stage_adjustment(&mut pending, share.owner, intrinsic, None, now)?;
        self.commit(pending);
        self.total_intrinsic = self.total_intrinsic.saturating_sub(share.voting_power);
        self.shares.remove(&share_id);

        debug!(share = share_id, owner = %share.owner, "burned share");
        Ok(share)
    }

    /// Move a share (and its power) from `from` to `to`.
    pub fn transfer_share(
        &mut self,
        share_id: ShareId,
        from: Address,
        to: Address,
        now: Timestamp,
    ) -> Result<(), GovernanceError> {
        let share = self
            .shares
            .get(&share_id)
            .cloned()
            .ok_or_else(|| GovernanceError::not_found("share", share_id))?;
        if share.owner != from {
            return Err(GovernanceError::Unauthorized(format!(
                "{} does not own share {}",
                from, share_id
            )));
        }
        if from == to {
            return Ok(());
        }

        let from_intrinsic = self
            .intrinsic_power(&from)
            .checked_sub(share.voting_power)
            .ok_or_else(|| GovernanceError::Arithmetic("transfer exceeds owner power".to_string()))?;
        let to_intrinsic = self
            .intrinsic_power(&to)
            .checked_add(share.voting_power)
            .ok_or_else(|| GovernanceError::overflow("transfer"))?;

        let mut pending = PendingWrites::default();
        self.stage_adjustment(&mut pending, from, from_intrinsic, None, now)?;
        self.stage_adjustment(&mut pending, to, to_intrinsic, None, now)?;
        self.commit(pending);
        if let Some(share) = self.shares.get_mut(&share_id) {
            share.owner = to;
        }

        debug!(share = share_id, from = %from, to = %to, "transferred share");
        Ok(())
    }

    /// Point `holder`'s intrinsic power at `delegate`. Delegating to oneself
    /// clears the delegation.
    pub fn delegate(
        &mut self,
        holder: Address,
        delegate: Address,
        now: Timestamp,
    ) -> Result<(), GovernanceError> {
        let intrinsic = self.intrinsic_power(&holder);
        let mut pending = PendingWrites::default();
        self.stage_adjustment(&mut pending, holder, intrinsic, Some(delegate), now)?;
        self.commit(pending);
        debug!(holder = %holder, delegate = %delegate, "delegated voting power");
        Ok(())
    }

    pub fn delegate_of(&self, holder: &Address) -> Address {
        self.delegations.get(holder).copied().unwrap_or(*holder)
    }

    /// Stage `holder`'s new intrinsic power and delegate as of `now`, moving
    /// delegated power between the old and new delegates.
    fn stage_adjustment(
        &self,
        pending: &mut PendingWrites,
        holder: Address,
        new_intrinsic: Amount,
        delegate: Option<Address>,
        now: Timestamp,
    ) -> Result<(), GovernanceError> {
        let old_intrinsic = self
            .staged_latest(pending, &holder)
            .map(|snap| snap.intrinsic_voting_power)
            .unwrap_or(0);
        let old_delegate = pending.delegate_of(&holder).unwrap_or_else(|| self.delegate_of(&holder));
        let new_delegate = delegate.unwrap_or(old_delegate);

        self.stage_snapshot(pending, holder, now, |snap| {
            snap.intrinsic_voting_power = new_intrinsic;
            snap.is_delegated = new_delegate != holder;
            Ok(())
        })?;

        if old_delegate != holder && old_intrinsic > 0 {
            self.stage_snapshot(pending, old_delegate, now, |snap| {
                snap.delegated_voting_power = snap
                    .delegated_voting_power
                    .checked_sub(old_intrinsic)
                    .ok_or_else(|| {
                        GovernanceError::Arithmetic("delegated power underflow".to_string())
                    })?;
                Ok(())
            })?;
        }
        if new_delegate != holder && new_intrinsic > 0 {
            self.stage_snapshot(pending, new_delegate, now, |snap| {
                snap.delegated_voting_power = snap
                    .delegated_voting_power
                    .checked_add(new_intrinsic)
                    .ok_or_else(|| GovernanceError::overflow("delegated power"))?;
                Ok(())
            })?;
        }

        pending.delegations.push((holder, new_delegate));
        Ok(())
    }

    fn staged_latest(&self, pending: &PendingWrites, holder: &Address) -> Option<VotingPowerSnapshot> {
        pending
            .snapshot_of(holder)
            .or_else(|| self.latest_snapshot(holder).copied())
    }

    fn stage_snapshot<F>(
        &self,
        pending: &mut PendingWrites,
        holder: Address,
        now: Timestamp,
        update: F,
    ) -> Result<(), GovernanceError>
    where
        F: FnOnce(&mut VotingPowerSnapshot) -> Result<(), GovernanceError>,
    {
        let latest = self.staged_latest(pending, &holder);
        if let Some(latest) = latest {
            if latest.timestamp > now {
                return Err(GovernanceError::InvalidState(format!(
                    "snapshot at {} precedes latest snapshot at {}",
                    now, latest.timestamp
                )));
            }
        }

        let mut next = latest.unwrap_or_default();
        update(&mut next)?;
        next.timestamp = now;
        next.recompute_total()?;

        match pending.snapshots.iter_mut().find(|(addr, _)| *addr == holder) {
            Some((_, staged)) => *staged = next,
            None => pending.snapshots.push((holder, next)),
        }
        Ok(())
    }

    /// Apply staged writes. Nothing here can fail.
    fn commit(&mut self, pending: PendingWrites) {
        for (holder, next) in pending.snapshots {
            let history = self.snapshots.entry(holder).or_default();
            match history.last_mut() {
                Some(last) if last.timestamp == next.timestamp => *last = next,
                _ => history.push(next),
            }
        }
        for (holder, delegate) in pending.delegations {
            if delegate == holder {
                self.delegations.remove(&holder);
            } else {
                self.delegations.insert(holder, delegate);
            }
        }
    }

    pub fn snapshots(&self, holder: &Address) -> &[VotingPowerSnapshot] {
        self.snapshots.get(holder).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn latest_snapshot(&self, holder: &Address) -> Option<&VotingPowerSnapshot> {
        self.snapshots.get(holder).and_then(|history| history.last())
    }

    /// Index of the latest snapshot with `timestamp <= t`.
    pub fn find_snapshot_index(&self, holder: &Address, t: Timestamp) -> Option<usize> {
        let history = self.snapshots(holder);
        history.partition_point(|snap| snap.timestamp <= t).checked_sub(1)
    }

    pub fn snapshot_at(&self, holder: &Address, t: Timestamp) -> Option<&VotingPowerSnapshot> {
        self.find_snapshot_index(holder, t)
            .map(|index| &self.snapshots(holder)[index])
    }

    pub fn power_at(&self, holder: &Address, t: Timestamp) -> Amount {
        self.snapshot_at(holder, t)
            .map(|snap| snap.total_voting_power)
            .unwrap_or(0)
    }

    /// Like [`power_at`](Self::power_at), but trusts a caller-supplied
    /// snapshot index after checking `snap[i].timestamp <= t < snap[i+1].timestamp`.
    pub fn power_at_with_hint(
        &self,
        holder: &Address,
        t: Timestamp,
        hint: Option<usize>,
    ) -> Result<Amount, GovernanceError> {
        let Some(index) = hint else {
            return Ok(self.power_at(holder, t));
        };

        let history = self.snapshots(holder);
        let invalid = GovernanceError::InvalidHint { hint: index, timestamp: t };
        let snap = history.get(index).ok_or_else(|| invalid.clone())?;
        if snap.timestamp > t {
            return Err(invalid);
        }
        if let Some(next) = history.get(index + 1) {
            if next.timestamp <= t {
                return Err(invalid);
            }
        }
        Ok(snap.total_voting_power)
    }

    pub fn current_power(&self, holder: &Address) -> Amount {
        self.latest_snapshot(holder)
            .map(|snap| snap.total_voting_power)
            .unwrap_or(0)
    }

    pub fn intrinsic_power(&self, holder: &Address) -> Amount {
        self.latest_snapshot(holder)
            .map(|snap| snap.intrinsic_voting_power)
            .unwrap_or(0)
    }

    /// Owns a share or holds delegated power right now.
    pub fn is_member(&self, holder: &Address) -> bool {
        self.latest_snapshot(holder)
            .map(|snap| snap.intrinsic_voting_power > 0 || snap.total_voting_power > 0)
            .unwrap_or(false)
    }

    pub fn share(&self, id: ShareId) -> Option<&Share> {
        self.shares.get(&id)
    }

    pub fn shares_of<'a>(&'a self, owner: &'a Address) -> impl Iterator<Item = &'a Share> + 'a {
        self.shares.values().filter(move |share| &share.owner == owner)
    }

    pub fn share_count(&self) -> usize {
        self.shares.len()
    }

    pub fn total_intrinsic(&self) -> Amount {
        self.total_intrinsic
    }
}
