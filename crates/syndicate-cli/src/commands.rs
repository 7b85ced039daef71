//! CLI command implementations.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use syndicate_governance::market::AuctionId;
use syndicate_governance::simulated::SimResponse;
use syndicate_governance::{
    ExecuteRequest, Proposal, ProposalId, ProposalKind, RedeemOutcome, TokenKind,
};
use syndicate_types::{Address, Hash, Timestamp};
use tracing::info;

use crate::config::{LoggingConfig, PartyConfig};
use crate::output::*;
use crate::state::{TrackedProposal, Workspace};

/// Main CLI.
#[derive(Parser, Debug)]
#[command(name = "syndicate")]
#[command(about = "Syndicate - pooled-capital parties and their proposals")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Directory holding the party state
    #[arg(short, long, global = true, env = "SYNDICATE_DATA_DIR", default_value = "./party")]
    pub data_dir: PathBuf,

    /// Current time in Unix seconds (defaults to the system clock)
    #[arg(long, global = true, env = "SYNDICATE_NOW")]
    pub now: Option<Timestamp>,

    /// Log level, overrides the configured one
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a party from a TOML config file
    Init {
        /// Config file path
        config: PathBuf,
    },
    /// Contribute native funds to the crowdfund
    Contribute {
        from: Address,
        amount: u64,
        /// Delegate for the voting power this contribution mints
        #[arg(long)]
        delegate: Option<Address>,
    },
    /// Settle the crowdfund after its deadline
    Finalize,
    /// Record the acquisition of the target asset (authority only)
    Acquire {
        from: Address,
        price: u64,
        #[arg(long)]
        seller: Option<Address>,
    },
    /// Refund or mint voting power for a contributor
    Redeem { contributor: Address },
    /// Mint a share directly (authority only)
    Mint {
        from: Address,
        owner: Address,
        power: u64,
        #[arg(long)]
        delegate: Option<Address>,
    },
    /// Delegate voting power
    Delegate { from: Address, to: Address },
    /// Transfer a share
    Transfer { from: Address, share: u64, to: Address },
    /// Create a proposal from a JSON file
    Propose {
        from: Address,
        file: PathBuf,
        /// Snapshot index hint
        #[arg(long)]
        hint: Option<usize>,
    },
    /// Vote for a proposal
    Accept {
        from: Address,
        id: ProposalId,
        #[arg(long)]
        hint: Option<usize>,
    },
    /// Veto a proposal (hosts only)
    Veto { from: Address, id: ProposalId },
    /// Run the next execution step of a proposal
    Execute {
        from: Address,
        id: ProposalId,
        /// Extra data passed to the step (hex)
        #[arg(long)]
        extra_data: Option<String>,
    },
    /// Cancel an in-progress proposal
    Cancel { from: Address, id: ProposalId },
    /// Show a proposal's status
    Status { id: ProposalId },
    /// Deposit funds into the treasury
    Deposit {
        from: Address,
        amount: u64,
        /// Fungible token address; native when omitted
        #[arg(long)]
        token: Option<Address>,
    },
    /// Open a distribution from the treasury
    Distribute {
        from: Address,
        amount: u64,
        #[arg(long)]
        token: Option<Address>,
    },
    /// Claim a share's portion of a distribution
    Claim {
        from: Address,
        distribution: u64,
        share: u64,
    },
    /// Claim a distribution's fee
    ClaimFee { from: Address, distribution: u64 },
    /// Show the party
    Show {
        /// Print the full state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drive the simulated market venues
    #[command(subcommand)]
    Market(MarketCommands),
}

/// Simulated market commands.
#[derive(Subcommand, Debug)]
pub enum MarketCommands {
    /// Bid on an auction
    Bid {
        auction: AuctionId,
        bidder: Address,
        amount: u64,
    },
    /// Buy a listed order
    Fill { order: Hash, buyer: Address },
    /// Script the response of calls to a target
    Respond {
        target: Address,
        /// Return these bytes (hex)
        #[arg(long, conflicts_with = "revert")]
        returns: Option<String>,
        /// Revert with this reason
        #[arg(long)]
        revert: Option<String>,
    },
    /// List venue activity
    Events,
}

/// Proposal file accepted by `propose`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalFile {
    pub kind: ProposalKind,
    pub max_executable_time: Timestamp,
    #[serde(default)]
    pub cancel_delay: u64,
}

impl ProposalFile {
    pub fn load(path: &Path) -> anyhow::Result<Proposal> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read proposal file '{}'", path.display()))?;
        let file: ProposalFile = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse proposal file '{}'", path.display()))?;
        Ok(Proposal::new(&file.kind, file.max_executable_time, file.cancel_delay)?)
    }
}

fn token_kind(token: Option<Address>) -> TokenKind {
    token.map_or(TokenKind::Native, TokenKind::Fungible)
}

fn now_or_clock(now: Option<Timestamp>) -> Timestamp {
    now.unwrap_or_else(|| chrono::Utc::now().timestamp().max(0) as Timestamp)
}

/// Logging settings for this run: the init config or what init stored,
/// with the command-line level on top.
pub fn resolve_logging(cli: &Cli) -> LoggingConfig {
    let mut logging = match &cli.command {
        Commands::Init { config } => PartyConfig::from_file(config)
            .map(|c| c.logging)
            .unwrap_or_default(),
        _ => Workspace::stored_logging(&cli.data_dir).unwrap_or_default(),
    };
    if let Some(level) = &cli.log_level {
        logging.level = level.clone();
    }
    logging
}

/// Execute a command.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let now = now_or_clock(cli.now);

    if let Commands::Init { config } = &cli.command {
        let config = PartyConfig::from_file(config)?;
        let (party, opts) = config.build_party()?;
        let governed = opts.is_some();
        Workspace::create(&cli.data_dir, party, opts, &config.logging)?;
        info!(data_dir = %cli.data_dir.display(), "party initialized");
        print_success(&format!("Created party {} in {}", config.name, cli.data_dir.display()));
        if !governed {
            print_info("Crowdfund open; governance starts once it is won");
        }
        return Ok(());
    }

    let mut ws = Workspace::open(&cli.data_dir)?;
    run(&mut ws, cli.command, now)?;
    ws.save()
}

fn run(ws: &mut Workspace, command: Commands, now: Timestamp) -> anyhow::Result<()> {
    match command {
        Commands::Init { .. } => anyhow::bail!("A party already exists in this data directory"),
        Commands::Contribute { from, amount, delegate } => {
            let total = ws.party.contribute(from, delegate, amount as u128, now)?;
            print_success(&format!("{} has contributed {} in total", from, total));
        }
        Commands::Finalize => {
            let settlement = ws.party.finalize_crowdfund(now)?;
            print_json(&settlement.outcome)?;
            if settlement.opts.is_some() {
                ws.opts = settlement.opts;
                print_success("Governance started");
            }
        }
        Commands::Acquire { from, price, seller } => {
            let settlement = ws.party.record_acquisition(from, price as u128, seller, now)?;
            ws.opts = settlement.opts;
            print_success(&format!("Acquisition for {} recorded; governance started", price));
        }
        Commands::Redeem { contributor } => match ws.party.redeem_or_mint(contributor, now)? {
            RedeemOutcome::Refunded { amount } => {
                print_success(&format!("Refunded {} to {}", amount, contributor))
            }
            RedeemOutcome::Minted { voting_power, refund, .. } => print_success(&format!(
                "Minted {} voting power for {} (refund {})",
                voting_power, contributor, refund
            )),
        },
        Commands::Mint { from, owner, power, delegate } => {
            let opts = ws.opts()?;
            let share = ws.party.mint(from, &opts, owner, power as u128, delegate, now)?;
            print_success(&format!("Minted share {} for {}", share, owner));
        }
        Commands::Delegate { from, to } => {
            ws.party.delegate_voting_power(from, to, now)?;
            print_success(&format!("{} delegated to {}", from, to));
        }
        Commands::Transfer { from, share, to } => {
            ws.party.transfer_share(from, share, to, now)?;
            print_success(&format!("Share {} moved to {}", share, to));
        }
        Commands::Propose { from, file, hint } => {
            let opts = ws.opts()?;
            let proposal = ProposalFile::load(&file)?;
            let id = ws.party.propose(from, &opts, &proposal, hint, now)?;
            ws.proposals.insert(
                id,
                TrackedProposal {
                    proposal,
                    continuation: String::new(),
                },
            );
            print_success(&format!("Created proposal {}", id));
        }
        Commands::Accept { from, id, hint } => {
            let opts = ws.opts()?;
            let proposal = ws.tracked(id)?.proposal.clone();
            let passed = ws.party.accept(from, &opts, id, &proposal, hint, now)?;
            print_success(&format!(
                "Vote recorded on proposal {}{}",
                id,
                if passed { " (passed)" } else { "" }
            ));
        }
        Commands::Veto { from, id } => {
            let opts = ws.opts()?;
            ws.party.veto(from, &opts, id, now)?;
            print_success(&format!("Proposal {} vetoed", id));
        }
        Commands::Execute { from, id, extra_data } => {
            let opts = ws.opts()?;
            let tracked = ws.tracked(id)?.clone();
            let request = ExecuteRequest {
                proposal_id: id,
                continuation: tracked.continuation_bytes()?,
                proposal: tracked.proposal,
                controlled_assets: ws.party.treasury().precious().to_vec(),
                extra_data: match extra_data {
                    Some(hex_data) => hex::decode(hex_data.trim_start_matches("0x"))
                        .context("extra data is not valid hex")?,
                    None => Vec::new(),
                },
            };
            let outcome = ws.party.execute(from, &opts, &request, &mut ws.markets, now)?;
            if let Some(entry) = ws.proposals.get_mut(&id) {
                entry.continuation = hex::encode(&outcome.continuation);
            }
            if outcome.is_complete() {
                print_success(&format!("Proposal {} complete", id));
            } else {
                print_success(&format!("Proposal {} in progress", id));
            }
            for distribution in outcome.distributions {
                print_info(&format!("Opened distribution {}", distribution));
            }
        }
        Commands::Cancel { from, id } => {
            let opts = ws.opts()?;
            let tracked = ws.tracked(id)?.clone();
            let continuation = tracked.continuation_bytes()?;
            let released = ws.party.cancel(
                from,
                &opts,
                id,
                &tracked.proposal,
                &continuation,
                &mut ws.markets,
                now,
            )?;
            if let Some(entry) = ws.proposals.get_mut(&id) {
                entry.continuation.clear();
            }
            print_success(&format!(
                "Proposal {} cancelled{}",
                id,
                if released { "; asset returned" } else { "" }
            ));
        }
        Commands::Status { id } => {
            let opts = ws.opts()?;
            print_json(&ws.party.get_proposal_status(&opts, id, now)?)?;
        }
        Commands::Deposit { from, amount, token } => {
            ws.party.deposit(from, token_kind(token), amount as u128, now)?;
            print_success(&format!("Deposited {}", amount));
        }
        Commands::Distribute { from, amount, token } => {
            let opts = ws.opts()?;
            let id = ws.party.distribute(from, &opts, token_kind(token), amount as u128, now)?;
            print_success(&format!("Opened distribution {}", id));
        }
        Commands::Claim { from, distribution, share } => {
            let paid = ws.party.claim(from, distribution, share)?;
            print_success(&format!("Claimed {}", paid));
        }
        Commands::ClaimFee { from, distribution } => {
            let paid = ws.party.claim_fee(from, distribution)?;
            print_success(&format!("Claimed fee of {}", paid));
        }
        Commands::Show { json } => {
            if json {
                print_json(&ws.party)?;
            } else {
                print_party(&ws.party, ws.opts.as_ref(), now);
            }
        }
        Commands::Market(cmd) => run_market(ws, cmd, now)?,
    }
    Ok(())
}

fn run_market(ws: &mut Workspace, cmd: MarketCommands, now: Timestamp) -> anyhow::Result<()> {
    match cmd {
        MarketCommands::Bid { auction, bidder, amount } => {
            ws.markets.bid(auction, bidder, amount as u128, now)?;
            print_success(&format!("Bid {} on auction {}", amount, auction));
        }
        MarketCommands::Fill { order, buyer } => {
            let price = ws.markets.fill_order(&order, buyer, now)?;
            print_success(&format!("Order filled for {}", price));
        }
        MarketCommands::Respond { target, returns, revert } => {
            let response = match (returns, revert) {
                (_, Some(reason)) => SimResponse::Revert(reason),
                (Some(bytes), None) => SimResponse::Return(
                    hex::decode(bytes.trim_start_matches("0x")).context("return data is not valid hex")?,
                ),
                (None, None) => SimResponse::Return(Vec::new()),
            };
            ws.markets.set_response(target, response);
            print_success(&format!("Scripted calls to {}", target));
        }
        MarketCommands::Events => print_json(&ws.markets.events())?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli(dir: &Path, now: Timestamp, args: &[&str]) -> Cli {
        let mut argv = vec![
            "syndicate".to_string(),
            "--data-dir".to_string(),
            dir.display().to_string(),
            "--now".to_string(),
            now.to_string(),
        ];
        argv.extend(args.iter().map(|a| a.to_string()));
        Cli::try_parse_from(argv).unwrap()
    }

    fn hex_addr(name: &str) -> String {
        format!("{:x}", Address::derive(name.as_bytes()))
    }

    #[test]
    fn test_cli_parses() {
        let parsed = Cli::try_parse_from(["syndicate", "--now", "5", "status", "3"]).unwrap();
        assert_eq!(parsed.now, Some(5));
        assert!(matches!(parsed.command, Commands::Status { id: 3 }));
        assert!(Cli::try_parse_from(["syndicate", "contribute", "not-an-address", "5"]).is_err());
    }

    #[test]
    fn test_proposal_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("upgrade.json");
        std::fs::write(
            &path,
            r#"{"kind": {"upgrade_engine": {"target_version": 2}}, "max_executable_time": 1000}"#,
        )
        .unwrap();
        let proposal = ProposalFile::load(&path).unwrap();
        assert_eq!(proposal.cancel_delay, 0);
        assert!(matches!(proposal.decode().unwrap(), ProposalKind::UpgradeEngine(_)));
    }

    #[test]
    fn test_governed_party_flow() {
        let temp_dir = TempDir::new().unwrap();
        let data = temp_dir.path().join("party");
        let config_path = temp_dir.path().join("party.toml");

        let mut config = PartyConfig::default();
        config.governance.vote_duration = 100;
        config.governance.execution_delay = 10;
        config.to_file(&config_path).unwrap();

        let authority = hex_addr("authority");
        let alice = hex_addr("alice");
        let bob = hex_addr("bob");

        execute(cli(&data, 0, &["init", config_path.to_str().unwrap()])).unwrap();
        execute(cli(&data, 1, &["mint", &authority, &alice, "60"])).unwrap();
        execute(cli(&data, 1, &["mint", &authority, &bob, "40"])).unwrap();

        let proposal_path = temp_dir.path().join("upgrade.json");
        std::fs::write(
            &proposal_path,
            r#"{"kind": {"upgrade_engine": {"target_version": 2}}, "max_executable_time": 10000}"#,
        )
        .unwrap();
        execute(cli(&data, 5, &["propose", &alice, proposal_path.to_str().unwrap()])).unwrap();
        execute(cli(&data, 6, &["accept", &bob, "1"])).unwrap();
        execute(cli(&data, 7, &["execute", &alice, "1"])).unwrap();

        let ws = Workspace::open(&data).unwrap();
        assert_eq!(ws.party.engine_version(), 2);
        assert!(ws.tracked(1).unwrap().continuation.is_empty());
    }
}
