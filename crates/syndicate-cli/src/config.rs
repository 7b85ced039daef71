//! Party configuration.
//!
//! Loaded from a TOML file by `syndicate init`. Amounts are plain integers
//! (TOML has no 128-bit integers), so configured values stay within `u64`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use syndicate_governance::{
    AssetRef, CrowdfundOpts, EngineConfig, GovernanceOpts, GovernanceParams, Party, LATEST_ENGINE_VERSION,
};
use syndicate_types::Address;

/// Everything needed to create a party.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartyConfig {
    /// Party name
    pub name: String,
    /// Records acquisitions and mints shares outside the crowdfund
    pub authority: Address,
    /// Total voting power of a party that skips the crowdfund
    pub total_voting_power: Option<u64>,
    pub governance: GovernanceConfig,
    pub crowdfund: Option<CrowdfundConfig>,
    #[serde(default)]
    pub controlled_assets: Vec<AssetConfig>,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    #[serde(default)]
    pub hosts: Vec<Address>,
    /// Seconds
    pub vote_duration: u64,
    /// Seconds
    pub execution_delay: u64,
    pub pass_threshold_bps: u16,
    #[serde(default)]
    pub fee_bps: u16,
    #[serde(default)]
    pub fee_recipient: Option<Address>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrowdfundConfig {
    pub max_total_contributions: u64,
    #[serde(default)]
    pub min_total_contributions: u64,
    /// Unix seconds
    pub deadline: u64,
    pub split_recipient: Option<Address>,
    #[serde(default)]
    pub split_bps: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    pub token: Address,
    pub token_id: u64,
}

/// Execution engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Version the party starts on
    pub version: u32,
    #[serde(flatten)]
    pub config: EngineConfig,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            version: 1,
            config: EngineConfig::default(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    pub level: String,
    /// Log to file
    pub log_file: Option<PathBuf>,
    /// Log format (json|pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            log_file: None,
            format: "pretty".to_string(),
        }
    }
}

impl Default for PartyConfig {
    fn default() -> Self {
        Self {
            name: "syndicate".to_string(),
            authority: Address::derive(b"authority"),
            total_voting_power: Some(100),
            governance: GovernanceConfig {
                hosts: Vec::new(),
                vote_duration: 7 * 24 * 60 * 60,
                execution_delay: 24 * 60 * 60,
                pass_threshold_bps: 5_100,
                fee_bps: 0,
                fee_recipient: None,
            },
            crowdfund: None,
            controlled_assets: Vec::new(),
            engine: EngineSection::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl PartyConfig {
    /// Load configuration from file.
    /// Path is validated to prevent directory traversal attacks.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        if path.to_string_lossy().contains("..") {
            anyhow::bail!("Invalid path: directory traversal detected");
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: PartyConfig = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn to_file(&self, path: &Path) -> anyhow::Result<()> {
        if path.to_string_lossy().contains("..") {
            anyhow::bail!("Invalid path: directory traversal detected");
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .map_err(|e| anyhow::anyhow!("Failed to write config file '{}': {}", path.display(), e))?;
        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Party name cannot be empty");
        }
        match (&self.crowdfund, self.total_voting_power) {
            (Some(_), Some(_)) => anyhow::bail!("Set either a crowdfund or total_voting_power, not both"),
            (None, None) => anyhow::bail!("Either a crowdfund or total_voting_power is required"),
            (None, Some(0)) => anyhow::bail!("total_voting_power cannot be 0"),
            _ => {}
        }
        if self.governance.vote_duration == 0 {
            anyhow::bail!("Vote duration cannot be 0");
        }
        for (name, bps) in [
            ("pass_threshold_bps", self.governance.pass_threshold_bps),
            ("fee_bps", self.governance.fee_bps),
        ] {
            if bps > 10_000 {
                anyhow::bail!("{} cannot exceed 10000", name);
            }
        }
        if self.governance.fee_bps > 0 && self.governance.fee_recipient.is_none() {
            anyhow::bail!("fee_recipient is required when fee_bps is set");
        }
        if let Some(crowdfund) = &self.crowdfund {
            if crowdfund.split_bps > 10_000 {
                anyhow::bail!("split_bps cannot exceed 10000");
            }
            if crowdfund.max_total_contributions == 0 {
                anyhow::bail!("max_total_contributions cannot be 0");
            }
        }
        if self.engine.version == 0 || self.engine.version > LATEST_ENGINE_VERSION {
            anyhow::bail!(
                "Engine version must be between 1 and {}",
                LATEST_ENGINE_VERSION
            );
        }
        Ok(())
    }

    pub fn governance_params(&self) -> GovernanceParams {
        GovernanceParams {
            hosts: self.governance.hosts.iter().copied().collect::<BTreeSet<_>>(),
            vote_duration: self.governance.vote_duration,
            execution_delay: self.governance.execution_delay,
            pass_threshold_bps: self.governance.pass_threshold_bps,
            fee_bps: self.governance.fee_bps,
            fee_recipient: self.governance.fee_recipient.unwrap_or(Address::ZERO),
        }
    }

    pub fn crowdfund_opts(&self) -> Option<CrowdfundOpts> {
        self.crowdfund.as_ref().map(|cf| CrowdfundOpts {
            max_total_contributions: cf.max_total_contributions as u128,
            min_total_contributions: cf.min_total_contributions as u128,
            deadline: cf.deadline,
            split_recipient: cf.split_recipient,
            split_bps: cf.split_bps,
        })
    }

    pub fn controlled_assets(&self) -> Vec<AssetRef> {
        self.controlled_assets
            .iter()
            .map(|asset| AssetRef::new(asset.token, asset.token_id as u128))
            .collect()
    }

    /// Build the party. Returns the governance options too when governance
    /// starts right away.
    pub fn build_party(&self) -> anyhow::Result<(Party, Option<GovernanceOpts>)> {
        self.validate()?;
        let assets = self.controlled_assets();
        let engine = self.engine.config.clone();

        match (self.crowdfund_opts(), self.total_voting_power) {
            (Some(crowdfund), _) => {
                let party = Party::with_crowdfund(
                    self.name.clone(),
                    self.authority,
                    self.governance_params(),
                    crowdfund,
                    assets,
                    engine,
                    self.engine.version,
                )?;
                Ok((party, None))
            }
            (None, Some(total)) => {
                let opts = GovernanceOpts::from_params(self.governance_params(), total as u128);
                let party = Party::with_governance(
                    self.name.clone(),
                    self.authority,
                    &opts,
                    assets,
                    engine,
                    self.engine.version,
                )?;
                Ok((party, Some(opts)))
            }
            (None, None) => anyhow::bail!("Either a crowdfund or total_voting_power is required"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
name = "night-owls"
authority = "0x0101010101010101010101010101010101010101"

[governance]
hosts = ["0x0202020202020202020202020202020202020202"]
vote_duration = 3600
execution_delay = 600
pass_threshold_bps = 5100
fee_bps = 250
fee_recipient = "0x0303030303030303030303030303030303030303"

[crowdfund]
max_total_contributions = 1000
min_total_contributions = 100
deadline = 1700000000

[[controlled_assets]]
token = "0x0404040404040404040404040404040404040404"
token_id = 7

[engine]
version = 1
auction_timeout = 120
"#;

    #[test]
    fn test_default_config() {
        let config = PartyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.version, 1);
    }

    #[test]
    fn test_parse_sample() {
        let config: PartyConfig = toml::from_str(SAMPLE).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.governance.hosts.len(), 1);
        assert_eq!(config.engine.config.auction_timeout, 120);
        // unset engine fields keep their defaults
        assert_eq!(config.engine.config.auction_duration, EngineConfig::default().auction_duration);
        assert_eq!(config.controlled_assets()[0].token_id, 7);

        let (party, opts) = config.build_party().unwrap();
        assert!(opts.is_none());
        assert!(party.crowdfund().is_some());
    }

    #[test]
    fn test_config_validation() {
        let mut config = PartyConfig::default();
        config.governance.pass_threshold_bps = 10_001;
        assert!(config.validate().is_err());

        let mut config = PartyConfig::default();
        config.governance.fee_bps = 100;
        assert!(config.validate().is_err());

        let mut config = PartyConfig::default();
        config.total_voting_power = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("party.toml");
        PartyConfig::default().to_file(&path).unwrap();

        let loaded = PartyConfig::from_file(&path).unwrap();
        assert_eq!(loaded.name, "syndicate");
        let (_, opts) = loaded.build_party().unwrap();
        assert_eq!(opts.unwrap().total_voting_power, 100);
    }

    #[test]
    fn test_rejects_traversal_path() {
        assert!(PartyConfig::from_file(Path::new("../party.toml")).is_err());
    }
}
