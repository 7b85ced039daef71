//! Output formatting utilities.

use colored::Colorize;
use serde::Serialize;
use syndicate_governance::{Party, ProposalStateMachine, GovernanceOpts};
use syndicate_types::Timestamp;
use tabled::{Table, Tabled};

/// Print success message.
pub fn print_success(msg: &str) {
    println!("{}", format!("✓ {}", msg).green());
}

/// Print error message.
pub fn print_error(msg: &str) {
    eprintln!("{}", format!("✗ {}", msg).red());
}

/// Print info message.
pub fn print_info(msg: &str) {
    println!("{}", format!("ℹ {}", msg).blue());
}

/// Print any serializable value as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print the proposal table.
pub fn print_proposals(party: &Party, opts: &GovernanceOpts, now: Timestamp) {
    #[derive(Tabled)]
    struct ProposalRow {
        id: u64,
        kind: String,
        status: String,
        votes: String,
        proposed: u64,
        steps: u32,
    }

    let machine = ProposalStateMachine::new(opts, now);
    let rows: Vec<ProposalRow> = party
        .proposals()
        .iter()
        .map(|record| ProposalRow {
            id: record.proposal_id,
            kind: record.proposal_type.to_string(),
            status: machine.status(record).to_string(),
            votes: format!("{}/{}", record.total_votes_for, opts.total_voting_power),
            proposed: record.proposed_time,
            steps: record.steps,
        })
        .collect();

    if rows.is_empty() {
        println!("No proposals");
    } else {
        println!("{}", Table::new(rows));
    }
}

/// Print a party summary.
pub fn print_party(party: &Party, opts: Option<&GovernanceOpts>, now: Timestamp) {
    println!("{}", format!("Party {}", party.name()).bold());
    println!("{}", "=".repeat(50));
    println!("Authority:      {}", party.authority());
    println!("Engine version: {}", party.engine_version());
    if let Some(crowdfund) = party.crowdfund() {
        println!(
            "Crowdfund:      {:?}, raised {} (used {})",
            crowdfund.status(),
            crowdfund.total_contributions(),
            crowdfund.total_used()
        );
    }
    match opts {
        Some(opts) => println!(
            "Governance:     {} total voting power, pass at {} bps",
            opts.total_voting_power, opts.pass_threshold_bps
        ),
        None => println!("Governance:     not started"),
    }
    for (token, balance) in party.treasury().balances() {
        println!("Treasury:       {} {}", balance, token);
    }
    for asset in party.treasury().precious() {
        let custody = party
            .treasury()
            .custody(asset)
            .map(|c| format!("{:?}", c))
            .unwrap_or_default();
        println!("Asset:          {} ({})", asset, custody);
    }
    println!("Shares:         {}", party.ledger().share_count());
    println!("Distributions:  {}", party.distributions().len());
    if let Some(opts) = opts {
        println!();
        print_proposals(party, opts, now);
    }
}
