//! Party treasury.
//!
//! Tracks fungible balances per token and the custody of the assets the
//! party controls. The list of controlled ("precious") assets is fixed at
//! creation; only its hash is checked on execution.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use syndicate_types::{Address, Amount, Hash, Timestamp};
use tracing::debug;

use crate::error::GovernanceError;

/// Kind of fungible token a balance or distribution is denominated in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    BorshSerialize, BorshDeserialize,
)]
pub enum TokenKind {
    /// The settlement currency contributions are made in.
    Native,
    /// A fungible token identified by its contract address.
    Fungible(Address),
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Native => write!(f, "native"),
            TokenKind::Fungible(token) => write!(f, "{:x}", token),
        }
    }
}

/// Reference to a single non-fungible asset.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    BorshSerialize, BorshDeserialize,
)]
pub struct AssetRef {
    /// Token contract
    pub token: Address,
    /// Token id within the contract
    pub token_id: u128,
}

impl AssetRef {
    pub fn new(token: Address, token_id: u128) -> Self {
        Self { token, token_id }
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}#{}", self.token, self.token_id)
    }
}

/// Where a controlled asset currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Custody {
    /// Held by the party.
    Held,
    /// Handed to a market venue (listed or auctioned).
    Escrowed,
    /// Sold or locked into a vault; gone for good.
    Disposed,
}

/// Type of treasury transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    /// Funds deposited from outside
    Deposit,
    /// Sale or vault proceeds credited by a proposal
    Proceeds,
    /// Funds spent by a proposal or an acquisition
    Spend,
    /// Funds moved into a distribution
    Distribution,
    /// Capital returned to a contributor
    Refund,
}

/// Treasury transaction record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryTransaction {
    pub tx_type: TransactionType,
    pub token: TokenKind,
    pub amount: Amount,
    /// Counterparty, when there is one
    pub counterparty: Option<Address>,
    pub timestamp: Timestamp,
    pub description: String,
}

/// Most recent treasury transactions kept in the log.
pub const MAX_TRANSACTIONS: usize = 256;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Treasury {
    #[serde(with = "crate::serde_pairs")]
    balances: BTreeMap<TokenKind, Amount>,
    precious: Vec<AssetRef>,
    precious_hash: Hash,
    #[serde(with = "crate::serde_pairs")]
    custody: BTreeMap<AssetRef, Custody>,
    /// Oldest first, at most `MAX_TRANSACTIONS`
    transactions: VecDeque<TreasuryTransaction>,
}

impl Treasury {
    /// Create a treasury controlling `precious` (order matters for the hash).
    pub fn new(precious: Vec<AssetRef>) -> Result<Self, GovernanceError> {
        let precious_hash = Self::hash_assets(&precious)?;
        let custody = precious.iter().map(|asset| (*asset, Custody::Held)).collect();
        Ok(Self {
            balances: BTreeMap::new(),
            precious,
            precious_hash,
            custody,
            transactions: VecDeque::new(),
        })
    }

    pub fn hash_assets(assets: &[AssetRef]) -> Result<Hash, GovernanceError> {
        Ok(Hash::commit(assets)?)
    }

    /// Check a resubmitted controlled-asset list against the stored hash.
    pub fn verify_precious(&self, assets: &[AssetRef]) -> Result<(), GovernanceError> {
        let actual = Self::hash_assets(assets)?;
        if actual != self.precious_hash {
            return Err(GovernanceError::HashMismatch {
                what: "controlled assets",
                expected: self.precious_hash,
                actual,
            });
        }
        Ok(())
    }

    pub fn precious(&self) -> &[AssetRef] {
        &self.precious
    }

    pub fn precious_hash(&self) -> Hash {
        self.precious_hash
    }

    pub fn custody(&self, asset: &AssetRef) -> Option<Custody> {
        self.custody.get(asset).copied()
    }

    /// Move a controlled asset to a new custody state.
    pub fn set_custody(&mut self, asset: AssetRef, custody: Custody) -> Result<(), GovernanceError> {
        let current = self
            .custody
            .get_mut(&asset)
            .ok_or_else(|| GovernanceError::not_found("controlled asset", asset))?;
        if *current == Custody::Disposed {
            return Err(GovernanceError::InvalidState(format!(
                "asset {} was already disposed of",
                asset
            )));
        }
        debug!(asset = %asset, from = ?*current, to = ?custody, "asset custody changed");
        *current = custody;
        Ok(())
    }

    /// Deposit funds into treasury.
    pub fn deposit(
        &mut self,
        token: TokenKind,
        amount: Amount,
        source: Option<Address>,
        tx_type: TransactionType,
        timestamp: Timestamp,
    ) -> Result<(), GovernanceError> {
        let balance = self.balances.entry(token).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| GovernanceError::overflow("treasury deposit"))?;

        self.record(TreasuryTransaction {
            tx_type,
            token,
            amount,
            counterparty: source,
            timestamp,
            description: format!("{:?}", tx_type),
        });
        Ok(())
    }

    /// Take funds out of the treasury.
    ///
    /// # Errors
    /// - Insufficient balance
    pub fn withdraw(
        &mut self,
        token: TokenKind,
        amount: Amount,
        recipient: Option<Address>,
        tx_type: TransactionType,
        timestamp: Timestamp,
        description: impl Into<String>,
    ) -> Result<(), GovernanceError> {
        let available = self.balance(&token);
        if available < amount {
            return Err(GovernanceError::InvalidState(format!(
                "insufficient {} balance: {} < {}",
                token, available, amount
            )));
        }
        self.balances.insert(token, available - amount);

        self.record(TreasuryTransaction {
            tx_type,
            token,
            amount,
            counterparty: recipient,
            timestamp,
            description: description.into(),
        });
        Ok(())
    }

    pub fn balance(&self, token: &TokenKind) -> Amount {
        self.balances.get(token).copied().unwrap_or(0)
    }

    pub fn balances(&self) -> impl Iterator<Item = (&TokenKind, &Amount)> {
        self.balances.iter()
    }

    /// Recent transactions, oldest first.
    pub fn transactions(
        &self,
    ) -> impl DoubleEndedIterator<Item = &TreasuryTransaction> + ExactSizeIterator {
        self.transactions.iter()
    }

    fn record(&mut self, tx: TreasuryTransaction) {
        if self.transactions.len() == MAX_TRANSACTIONS {
            self.transactions.pop_front();
        }
        self.transactions.push_back(tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(n: u128) -> AssetRef {
        AssetRef::new(Address::derive(b"collection"), n)
    }

    #[test]
    fn test_deposit_and_withdraw() {
        let mut treasury = Treasury::new(vec![]).unwrap();
        let source = Address::derive(b"alice");

        treasury
            .deposit(TokenKind::Native, 1000, Some(source), TransactionType::Deposit, 1)
            .unwrap();
        treasury
            .withdraw(TokenKind::Native, 400, None, TransactionType::Spend, 2, "acquisition")
            .unwrap();

        assert_eq!(treasury.balance(&TokenKind::Native), 600);
        assert_eq!(treasury.transactions().len(), 2);
        assert_eq!(treasury.transactions().last().unwrap().description, "acquisition");
    }

    #[test]
    fn test_transaction_log_is_capped() {
        let mut treasury = Treasury::new(vec![]).unwrap();
        let total = MAX_TRANSACTIONS as u64 + 10;
        for t in 0..total {
            treasury
                .deposit(TokenKind::Native, 1, None, TransactionType::Deposit, t)
                .unwrap();
        }

        assert_eq!(treasury.transactions().len(), MAX_TRANSACTIONS);
        assert_eq!(treasury.transactions().next().unwrap().timestamp, 10);
        assert_eq!(treasury.transactions().last().unwrap().timestamp, total - 1);
        // the balance still counts every deposit
        assert_eq!(treasury.balance(&TokenKind::Native), total as u128);
    }

    #[test]
    fn test_withdraw_insufficient() {
        let mut treasury = Treasury::new(vec![]).unwrap();
        let token = TokenKind::Fungible(Address::derive(b"usd"));
        let result = treasury.withdraw(token, 1, None, TransactionType::Spend, 1, "spend");
        assert!(matches!(result, Err(GovernanceError::InvalidState(_))));
    }

    #[test]
    fn test_precious_hash_check() {
        let treasury = Treasury::new(vec![asset(1), asset(2)]).unwrap();

        assert!(treasury.verify_precious(&[asset(1), asset(2)]).is_ok());
        assert!(matches!(
            treasury.verify_precious(&[asset(2), asset(1)]),
            Err(GovernanceError::HashMismatch { what: "controlled assets", .. })
        ));
        assert!(treasury.verify_precious(&[asset(1)]).is_err());
    }

    #[test]
    fn test_custody_transitions() {
        let mut treasury = Treasury::new(vec![asset(1)]).unwrap();
        assert_eq!(treasury.custody(&asset(1)), Some(Custody::Held));

        treasury.set_custody(asset(1), Custody::Escrowed).unwrap();
        treasury.set_custody(asset(1), Custody::Held).unwrap();
        treasury.set_custody(asset(1), Custody::Disposed).unwrap();

        assert!(treasury.set_custody(asset(1), Custody::Held).is_err());
        assert!(matches!(
            treasury.set_custody(asset(9), Custody::Held),
            Err(GovernanceError::NotFound { .. })
        ));
    }

    #[test]
    fn test_treasury_json_roundtrip() {
        let mut treasury = Treasury::new(vec![asset(1)]).unwrap();
        treasury
            .deposit(TokenKind::Fungible(Address::derive(b"usd")), 5, None, TransactionType::Deposit, 1)
            .unwrap();

        let json = serde_json::to_string(&treasury).unwrap();
        let back: Treasury = serde_json::from_str(&json).unwrap();
        assert_eq!(back.balance(&TokenKind::Fungible(Address::derive(b"usd"))), 5);
        assert_eq!(back.custody(&asset(1)), Some(Custody::Held));
        assert_eq!(back.precious_hash(), treasury.precious_hash());
    }
}
