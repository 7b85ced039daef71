//! Party state kept between CLI invocations.
//!
//! The party itself only remembers proposal hashes, so the CLI keeps the
//! full proposals and their latest continuations alongside it, the way any
//! client of a party would.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use syndicate_governance::{GovernanceOpts, Party, Proposal, ProposalId, SimulatedMarkets};
use syndicate_storage::{StateStore, WriteBatch};

use crate::config::LoggingConfig;

const PARTY_KEY: &str = "party";
const OPTS_KEY: &str = "opts";
const MARKETS_KEY: &str = "markets";
const PROPOSALS_KEY: &str = "proposals";
const LOGGING_KEY: &str = "logging";

/// A proposal as the CLI remembers it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedProposal {
    pub proposal: Proposal,
    /// Hex continuation from the last execute step
    #[serde(default)]
    pub continuation: String,
}

impl TrackedProposal {
    pub fn continuation_bytes(&self) -> anyhow::Result<Vec<u8>> {
        hex::decode(&self.continuation).context("stored continuation is not valid hex")
    }
}

pub struct Workspace {
    store: StateStore,
    pub party: Party,
    pub opts: Option<GovernanceOpts>,
    pub markets: SimulatedMarkets,
    pub proposals: BTreeMap<ProposalId, TrackedProposal>,
}

impl Workspace {
    /// Create a new workspace in `dir`. Fails if one already exists there.
    pub fn create(
        dir: &Path,
        party: Party,
        opts: Option<GovernanceOpts>,
        logging: &LoggingConfig,
    ) -> anyhow::Result<Self> {
        let store = StateStore::open(dir).with_context(|| format!("opening {}", dir.display()))?;
        if store.contains(PARTY_KEY) {
            anyhow::bail!("A party already exists in {}", dir.display());
        }
        store.save(LOGGING_KEY, logging)?;
        let workspace = Self {
            store,
            party,
            opts,
            markets: SimulatedMarkets::new(),
            proposals: BTreeMap::new(),
        };
        workspace.save()?;
        Ok(workspace)
    }

    pub fn open(dir: &Path) -> anyhow::Result<Self> {
        let store = StateStore::open(dir).with_context(|| format!("opening {}", dir.display()))?;
        let party: Party = store
            .load(PARTY_KEY)?
            .ok_or_else(|| anyhow::anyhow!("No party in {}; run `syndicate init` first", dir.display()))?;
        Ok(Self {
            opts: store.load(OPTS_KEY)?,
            markets: store.load(MARKETS_KEY)?.unwrap_or_default(),
            proposals: store.load(PROPOSALS_KEY)?.unwrap_or_default(),
            party,
            store,
        })
    }

    /// Logging settings recorded at init, if any.
    pub fn stored_logging(dir: &Path) -> Option<LoggingConfig> {
        let store = StateStore::open(dir).ok()?;
        store.load(LOGGING_KEY).ok().flatten()
    }

    /// Persist party, options, markets and proposals in one write.
    pub fn save(&self) -> anyhow::Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(PARTY_KEY, &self.party)?;
        match &self.opts {
            Some(opts) => batch.put(OPTS_KEY, opts)?,
            None => batch.delete(OPTS_KEY),
        }
        batch.put(MARKETS_KEY, &self.markets)?;
        batch.put(PROPOSALS_KEY, &self.proposals)?;
        self.store.write_batch(batch)?;
        Ok(())
    }

    /// Governance options, or an error while the party is not governed.
    pub fn opts(&self) -> anyhow::Result<GovernanceOpts> {
        self.opts
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Party is not governed yet; finalize the crowdfund first"))
    }

    pub fn tracked(&self, id: ProposalId) -> anyhow::Result<&TrackedProposal> {
        self.proposals
            .get(&id)
            .ok_or_else(|| anyhow::anyhow!("Unknown proposal {}", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartyConfig;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let (party, opts) = PartyConfig::default().build_party().unwrap();
        Workspace::create(temp_dir.path(), party, opts, &LoggingConfig::default()).unwrap();

        let workspace = Workspace::open(temp_dir.path()).unwrap();
        assert_eq!(workspace.party.name(), "syndicate");
        assert_eq!(workspace.opts().unwrap().total_voting_power, 100);
        assert!(Workspace::stored_logging(temp_dir.path()).is_some());
    }

    #[test]
    fn test_create_twice_fails() {
        let temp_dir = TempDir::new().unwrap();
        let (party, opts) = PartyConfig::default().build_party().unwrap();
        Workspace::create(temp_dir.path(), party.clone(), opts.clone(), &LoggingConfig::default()).unwrap();
        assert!(Workspace::create(temp_dir.path(), party, opts, &LoggingConfig::default()).is_err());
    }

    #[test]
    fn test_save_writes_every_key_at_once() {
        let temp_dir = TempDir::new().unwrap();
        let (party, opts) = PartyConfig::default().build_party().unwrap();
        let mut workspace =
            Workspace::create(temp_dir.path(), party, opts, &LoggingConfig::default()).unwrap();

        workspace.opts = None;
        workspace.save().unwrap();

        let reopened = Workspace::open(temp_dir.path()).unwrap();
        assert!(reopened.opts.is_none());
        assert_eq!(reopened.party.name(), "syndicate");
        assert!(!temp_dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn test_open_empty_dir_fails() {
        let temp_dir = TempDir::new().unwrap();
        assert!(Workspace::open(temp_dir.path()).is_err());
    }
}
