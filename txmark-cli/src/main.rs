//! # Txmark CLI
//!
//! Command-line interface for creating, betting on and resolving threshold
//! markets. State lives in a JSON snapshot file; the `poll` command runs the
//! data feed adapter against it.

mod feed;
mod settings;

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use inquire::{Confirm, Text};
use serde::Deserialize;
use tracing::{info, warn};
use tokio::time::{Interval, MissedTickBehavior};
use txmark_core::{
    utils::*, Address, MarketError, MarketId, MarketInfo, MarketParams, MarketStatus, Oracle,
    Registry, Side, Snapshot, Timestamp,
};

use crate::{
    feed::{apply_sample, StatsClient},
    settings::Settings,
};

#[derive(Parser)]
#[command(name = "txmark")]
#[command(about = "Threshold prediction markets settled by a transaction-count oracle")]
#[command(version)]
struct Cli {
    /// State file (overrides the config file)
    #[arg(long, global = true, env = "TXMARK_STATE")]
    state: Option<PathBuf>,

    /// JSON settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Identity to act as
    #[arg(long = "as", global = true, env = "TXMARK_AS")]
    caller: Option<Address>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a fresh state file owned by the acting identity
    Init {
        /// Identity markets record as their oracle
        #[arg(long, default_value = "0xoracle")]
        oracle_id: Address,
        /// Oracle admin (defaults to the acting identity)
        #[arg(long)]
        admin: Option<Address>,
        /// Default oracle for new markets (defaults to --oracle-id)
        #[arg(long)]
        default_oracle: Option<Address>,
        /// Overwrite an existing state file without asking
        #[arg(long)]
        force: bool,
    },
    /// Create a new market
    Create {
        /// Market question
        #[arg(short, long)]
        description: String,
        /// Count at or above which ABOVE wins
        #[arg(short, long)]
        threshold: u64,
        /// Deadline (unix seconds or RFC 3339)
        #[arg(long)]
        deadline: String,
        /// Resolving oracle (defaults to the registry default)
        #[arg(short, long)]
        oracle: Option<Address>,
        /// Initial liquidity in coins
        #[arg(short, long, default_value = "0")]
        liquidity: f64,
    },
    /// Create several markets from a JSON file, all or nothing
    BatchCreate {
        /// JSON array of {description, threshold, deadline}
        file: PathBuf,
        #[arg(short, long)]
        oracle: Option<Address>,
    },
    /// Place a bet
    Bet {
        market: MarketId,
        /// above | below
        side: Side,
        /// Amount in coins
        amount: f64,
    },
    /// Claim winnings (or refunds of a cancelled market)
    Claim { market: MarketId },
    /// Show what a claim would pay right now
    Preview {
        market: MarketId,
        /// Bettor to preview for (defaults to the acting identity)
        #[arg(long)]
        bettor: Option<Address>,
    },
    /// Withdraw the creator's initial liquidity
    WithdrawLiquidity { market: MarketId },
    /// Cancel an active market (registry owner)
    Cancel {
        market: MarketId,
        #[arg(short, long)]
        yes: bool,
    },
    /// Change the default oracle (registry owner)
    SetDefaultOracle { oracle: Address },
    /// Push an observation to the oracle
    PushFeed {
        /// Observed count, separators allowed
        count: String,
        /// Observation time (unix seconds or RFC 3339, defaults to now)
        #[arg(long)]
        observed_at: Option<String>,
    },
    /// Resolve one expired market
    Resolve { market: MarketId },
    /// Resolve every expired market
    ResolveAll,
    /// Manage oracle resolvers
    Resolver {
        #[command(subcommand)]
        action: ResolverAction,
    },
    /// List markets
    List {
        #[arg(long)]
        creator: Option<Address>,
        #[arg(long)]
        status: Option<MarketStatus>,
    },
    /// Show market information
    Info { market: MarketId },
    /// Registry and oracle statistics
    Stats,
    /// Show a payout wallet balance
    Balance { address: Option<Address> },
    /// Fetch the metric periodically, push it and resolve expired markets
    Poll {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
        /// Seconds between cycles (overrides settings)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Convert between coins and base units
    Convert {
        /// Amount to convert
        amount: f64,
        /// Unit (coin or unit)
        unit: String,
    },
}

#[derive(Subcommand)]
enum ResolverAction {
    Add { resolver: Address },
    Remove { resolver: Address },
    List,
}

#[derive(Deserialize)]
struct BatchEntry {
    description: String,
    threshold: u64,
    deadline: Timestamp,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let state_path = cli.state.clone().unwrap_or_else(|| settings.state_path.clone());
    let now = unix_now();

    match cli.command {
        Commands::Init {
            oracle_id,
            admin,
            default_oracle,
            force,
        } => {
            if state_path.exists()
                && !force
                && !Confirm::new(&format!("{} exists. Overwrite?", state_path.display()))
                    .with_default(false)
                    .prompt()?
            {
                println!("{}", "Aborted.".yellow());
                return Ok(());
            }

            let owner = resolve_caller(cli.caller)?;
            let admin = admin.unwrap_or_else(|| owner.clone());
            let default_oracle = default_oracle.unwrap_or_else(|| oracle_id.clone());
            let registry = Registry::new(owner.clone(), Some(default_oracle.clone()), settings.bounds);
            let oracle = Oracle::new(oracle_id.clone(), admin.clone(), settings.oracle);
            if state_path.exists() {
                std::fs::remove_file(&state_path)
                    .with_context(|| format!("removing {}", state_path.display()))?;
            }
            let mut snapshot = Snapshot::new(registry, oracle);
            save_state(&mut snapshot, &state_path)?;

            println!("{}", "State Initialized!".green().bold());
            println!("{}", "═".repeat(50).bright_black());
            println!("{}: {}", "State File".yellow().bold(), state_path.display());
            println!("{}: {}", "Registry".yellow().bold(), snapshot.registry.id());
            println!("{}: {}", "Owner".yellow().bold(), owner);
            println!("{}: {}", "Oracle".yellow().bold(), oracle_id);
            println!("{}: {}", "Oracle Admin".yellow().bold(), admin);
            println!("{}: {}", "Default Oracle".yellow().bold(), default_oracle);
            println!("{}", "═".repeat(50).bright_black());
        }

        Commands::Create {
            description,
            threshold,
            deadline,
            oracle,
            liquidity,
        } => {
            let creator = resolve_caller(cli.caller)?;
            let mut snapshot = load_state(&state_path)?;
            let deadline = parse_deadline(&deadline)?;

            let mut params = MarketParams::new(description, threshold, deadline)
                .with_liquidity(coins_to_units(liquidity)?);
            if let Some(oracle) = oracle {
                params = params.with_oracle(oracle);
            }

            println!("{}", "Creating new market...".green().bold());
            let id = snapshot.registry.create_market(&creator, params, now)?;
            save_state(&mut snapshot, &state_path)?;

            println!();
            println!("{}", "Market Created Successfully!".green().bold());
            print_market(&snapshot.registry.market_info(&id)?);
        }

        Commands::BatchCreate { file, oracle } => {
            let creator = resolve_caller(cli.caller)?;
            let mut snapshot = load_state(&state_path)?;
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let entries: Vec<BatchEntry> = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", file.display()))?;

            let descriptions: Vec<String> = entries.iter().map(|e| e.description.clone()).collect();
            let thresholds: Vec<u64> = entries.iter().map(|e| e.threshold).collect();
            let deadlines: Vec<Timestamp> = entries.iter().map(|e| e.deadline).collect();

            let ids = snapshot.registry.batch_create_markets(
                &creator,
                &descriptions,
                &thresholds,
                &deadlines,
                oracle,
                now,
            )?;
            save_state(&mut snapshot, &state_path)?;

            println!("{}", format!("Created {} markets", ids.len()).green().bold());
            for (id, description) in ids.iter().zip(&descriptions) {
                println!("  {} {}", id.to_string().cyan(), description);
            }
        }

        Commands::Bet {
            market,
            side,
            amount,
        } => {
            let bettor = resolve_caller(cli.caller)?;
            let mut snapshot = load_state(&state_path)?;
            let units = coins_to_units(amount)?;
            snapshot
                .registry
                .place_bet(&market, &bettor, side, units, now)?;
            save_state(&mut snapshot, &state_path)?;

            let info = snapshot.registry.market_info(&market)?;
            println!(
                "{}: {} coins on {} in {}",
                "Bet Placed".green().bold(),
                units_to_coins(units).to_string().cyan(),
                side.to_string().yellow(),
                market
            );
            println!(
                "{}: above {} / below {}",
                "Pools".yellow().bold(),
                units_to_coins(info.above_total),
                units_to_coins(info.below_total)
            );
        }

        Commands::Claim { market } => {
            let bettor = resolve_caller(cli.caller)?;
            let mut snapshot = load_state(&state_path)?;
            let Snapshot {
                registry, wallets, ..
            } = &mut snapshot;
            let paid = registry.claim_winnings(&market, &bettor, wallets)?;
            save_state(&mut snapshot, &state_path)?;

            println!(
                "{}: {} coins to {}",
                "Claimed".green().bold(),
                units_to_coins(paid).to_string().cyan(),
                bettor
            );
        }

        Commands::Preview { market, bettor } => {
            let bettor = match bettor {
                Some(bettor) => bettor,
                None => resolve_caller(cli.caller)?,
            };
            let snapshot = load_state(&state_path)?;
            let amount = snapshot.registry.preview_winnings(&market, &bettor)?;
            println!(
                "{}: {} coins",
                "Claimable".green().bold(),
                units_to_coins(amount).to_string().cyan()
            );
        }

        Commands::WithdrawLiquidity { market } => {
            let creator = resolve_caller(cli.caller)?;
            let mut snapshot = load_state(&state_path)?;
            let Snapshot {
                registry, wallets, ..
            } = &mut snapshot;
            let amount = registry.withdraw_initial_liquidity(&market, &creator, wallets, now)?;
            save_state(&mut snapshot, &state_path)?;

            println!(
                "{}: {} coins returned to {}",
                "Liquidity Withdrawn".green().bold(),
                units_to_coins(amount).to_string().cyan(),
                creator
            );
        }

        Commands::Cancel { market, yes } => {
            let caller = resolve_caller(cli.caller)?;
            let mut snapshot = load_state(&state_path)?;
            let info = snapshot.registry.market_info(&market)?;
            if !yes
                && !Confirm::new(&format!("Cancel \"{}\" and refund every bet?", info.description))
                    .with_default(false)
                    .prompt()?
            {
                println!("{}", "Aborted.".yellow());
                return Ok(());
            }

            snapshot.registry.cancel_market(&caller, &market, now)?;
            save_state(&mut snapshot, &state_path)?;
            println!("{}: {}", "Market Cancelled".green().bold(), market);
        }

        Commands::SetDefaultOracle { oracle } => {
            let caller = resolve_caller(cli.caller)?;
            let mut snapshot = load_state(&state_path)?;
            snapshot
                .registry
                .update_default_oracle(&caller, oracle.clone())?;
            save_state(&mut snapshot, &state_path)?;
            println!("{}: {}", "Default Oracle".green().bold(), oracle);
        }

        Commands::PushFeed { count, observed_at } => {
            let resolver = resolve_caller(cli.caller)?;
            let mut snapshot = load_state(&state_path)?;
            let count = parse_count(&count)?;
            let observed_at = match observed_at {
                Some(raw) => parse_observed_at(&raw)?,
                None => now,
            };
            snapshot
                .oracle
                .update_feed(&resolver, count, observed_at, now)?;
            save_state(&mut snapshot, &state_path)?;
            println!(
                "{}: {} at {}",
                "Feed Updated".green().bold(),
                count.to_string().cyan(),
                format_timestamp(observed_at)
            );
        }

        Commands::Resolve { market } => {
            let resolver = resolve_caller(cli.caller)?;
            let mut snapshot = load_state(&state_path)?;
            let Snapshot {
                registry, oracle, ..
            } = &mut snapshot;
            let side = oracle.close_expired_market(registry, &resolver, &market, now)?;
            save_state(&mut snapshot, &state_path)?;
            println!(
                "{}: {} won in {}",
                "Market Resolved".green().bold(),
                side.to_string().yellow(),
                market
            );
        }

        Commands::ResolveAll => {
            let resolver = resolve_caller(cli.caller)?;
            let mut snapshot = load_state(&state_path)?;
            let Snapshot {
                registry, oracle, ..
            } = &mut snapshot;
            let outcome = oracle.close_all_expired_markets(registry, &resolver, now)?;
            save_state(&mut snapshot, &state_path)?;

            println!(
                "{}: {} resolved, {} skipped",
                "Batch Resolution".green().bold(),
                outcome.resolved.len(),
                outcome.skipped.len()
            );
            for (id, side) in &outcome.resolved {
                println!("  {} {}", id.to_string().cyan(), side.to_string().yellow());
            }
            for (id, err) in &outcome.skipped {
                let hint = if err.is_retryable() {
                    " (retry later)".bright_black().to_string()
                } else {
                    String::new()
                };
                println!(
                    "  {} {}{}",
                    id.to_string().bright_black(),
                    err.to_string().red(),
                    hint
                );
            }
        }

        Commands::Resolver { action } => {
            let mut snapshot = load_state(&state_path)?;
            match action {
                ResolverAction::Add { resolver } => {
                    let caller = resolve_caller(cli.caller)?;
                    snapshot.oracle.add_resolver(&caller, resolver.clone())?;
                    save_state(&mut snapshot, &state_path)?;
                    println!("{}: {}", "Resolver Added".green().bold(), resolver);
                }
                ResolverAction::Remove { resolver } => {
                    let caller = resolve_caller(cli.caller)?;
                    snapshot.oracle.remove_resolver(&caller, &resolver)?;
                    save_state(&mut snapshot, &state_path)?;
                    println!("{}: {}", "Resolver Removed".green().bold(), resolver);
                }
                ResolverAction::List => {
                    println!("{}", "Authorized Resolvers".green().bold());
                    for resolver in snapshot.oracle.authorized_resolvers() {
                        let marker = if resolver == snapshot.oracle.admin() {
                            " (admin)".bright_black().to_string()
                        } else {
                            String::new()
                        };
                        println!("  {}{}", resolver.to_string().cyan(), marker);
                    }
                }
            }
        }

        Commands::List { creator, status } => {
            let snapshot = load_state(&state_path)?;
            let markets: Vec<_> = match &creator {
                Some(creator) => snapshot.registry.markets_by_creator(creator),
                None => snapshot.registry.markets().collect(),
            };
            let markets: Vec<_> = markets
                .into_iter()
                .filter(|m| status.map_or(true, |s| m.status() == s))
                .collect();

            if markets.is_empty() {
                println!("{}", "No markets found.".yellow());
            }
            for market in markets {
                let status = match market.status() {
                    MarketStatus::Active => "active".green(),
                    MarketStatus::Resolved => "resolved".blue(),
                    MarketStatus::Cancelled => "cancelled".red(),
                };
                println!(
                    "{} [{}] {} (threshold {}, deadline {})",
                    market.id().to_string().cyan(),
                    status,
                    market.description(),
                    market.threshold(),
                    format_timestamp(market.deadline()).bright_black()
                );
            }
        }

        Commands::Info { market } => {
            let snapshot = load_state(&state_path)?;
            let info = snapshot.registry.market_info(&market)?;
            println!("{}", format!("Market Info: {}", market).green().bold());
            print_market(&info);

            let ledger = snapshot.registry.market(&market)?;
            if info.status == MarketStatus::Active {
                println!(
                    "{}: above x{:.3} / below x{:.3}",
                    "Odds".yellow().bold(),
                    ledger.odds(Side::Above),
                    ledger.odds(Side::Below)
                );
            }
            if let Some(me) = &cli.caller {
                for wager in ledger.wagers_of(me) {
                    println!(
                        "  {} {} coins on {} at {}",
                        if wager.claimed { "✓".green() } else { "•".white() },
                        units_to_coins(wager.amount),
                        wager.side,
                        format_timestamp(wager.placed_at)
                    );
                }
            }
        }

        Commands::Stats => {
            let snapshot = load_state(&state_path)?;
            let registry = snapshot.registry.stats();
            let oracle = snapshot.oracle.stats();
            let (feed, fresh) = snapshot.oracle.current_data(now);

            println!("{}", "Registry".green().bold());
            println!("{}", "═".repeat(50).bright_black());
            println!("{}: {}", "Total Markets".yellow().bold(), registry.total_markets);
            println!("{}: {}", "Active".yellow().bold(), registry.active_markets);
            println!("{}: {}", "Resolved".yellow().bold(), registry.resolved_markets);
            println!("{}: {}", "Cancelled".yellow().bold(), registry.cancelled_markets);
            println!();
            println!("{}", "Oracle".green().bold());
            println!("{}", "═".repeat(50).bright_black());
            println!(
                "{}: {}",
                "Markets Resolved".yellow().bold(),
                oracle.total_markets_resolved
            );
            println!(
                "{}: {} coins",
                "Value Distributed".yellow().bold(),
                units_to_coins(oracle.total_value_distributed)
            );
            println!("{}: {}", "Resolvers".yellow().bold(), oracle.active_resolvers);
            if feed.valid {
                println!(
                    "{}: {} at {} ({})",
                    "Latest Feed".yellow().bold(),
                    feed.count,
                    format_timestamp(feed.observed_at),
                    if fresh { "fresh".green() } else { "stale".red() }
                );
            } else {
                println!("{}: {}", "Latest Feed".yellow().bold(), "none".bright_black());
            }
        }

        Commands::Balance { address } => {
            let address = match address {
                Some(address) => address,
                None => resolve_caller(cli.caller)?,
            };
            let snapshot = load_state(&state_path)?;
            println!(
                "{}: {} coins",
                address.to_string().cyan(),
                units_to_coins(snapshot.wallets.balance(&address))
            );
        }

        Commands::Poll { once, interval } => {
            let resolver = resolve_caller(cli.caller)?;
            let client = StatsClient::new(settings.feed.clone());
            let period = interval.unwrap_or(client.settings().poll_interval_secs).max(1);
            let mut ticker = poll_ticker(period);

            info!(url = %client.settings().url, period, %resolver, "starting feed poller");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = tokio::signal::ctrl_c() => {
                        info!("poller stopped");
                        break;
                    }
                }
                if let Err(err) = poll_cycle(&client, &state_path, &resolver).await {
                    // a concurrent writer or a lagging feed clears up by itself
                    let retryable = err.downcast_ref::<MarketError>().is_some_and(|e| {
                        e.is_retryable() || matches!(e, MarketError::StaleSnapshot { .. })
                    });
                    if retryable {
                        info!(error = %format!("{err:#}"), "poll cycle deferred to next tick");
                    } else {
                        warn!(error = %format!("{err:#}"), "poll cycle failed");
                    }
                    if once {
                        return Err(err);
                    }
                }
                if once {
                    break;
                }
            }
        }

        Commands::Convert { amount, unit } => match unit.to_lowercase().as_str() {
            "coin" | "coins" => {
                println!(
                    "{}: {} coins = {} units",
                    "Conversion".green().bold(),
                    amount.to_string().cyan(),
                    coins_to_units(amount)?.to_string().yellow()
                );
            }
            "unit" | "units" => {
                if !amount.is_finite() || amount < 0.0 || amount.fract() != 0.0 {
                    bail!("unit amounts must be whole and non-negative");
                }
                println!(
                    "{}: {} units = {} coins",
                    "Conversion".green().bold(),
                    (amount as u64).to_string().cyan(),
                    units_to_coins(amount as u64).to_string().yellow()
                );
            }
            _ => bail!("unit must be 'coin' or 'unit'"),
        },
    }

    Ok(())
}

/// One fetch, push, resolve, persist round. The state is re-read every time
/// so commands run between ticks are not overwritten.
async fn poll_cycle(client: &StatsClient, state_path: &Path, resolver: &Address) -> Result<()> {
    let sample = client.fetch_with_retry().await?;
    let mut snapshot = load_state(state_path)?;
    let outcome = apply_sample(&mut snapshot, resolver, sample, unix_now())?;
    save_state(&mut snapshot, state_path)?;

    println!(
        "{} count {} at {}: {} resolved, {} skipped ({} retryable)",
        "▶".bright_blue(),
        sample.count.to_string().cyan(),
        format_timestamp(sample.observed_at),
        outcome.resolved.len(),
        outcome.skipped.len(),
        outcome.retryable().count()
    );
    Ok(())
}

/// Ticker for the poll loop. A slow cycle pushes the next one back instead of
/// triggering catch-up polls.
fn poll_ticker(period_secs: u64) -> Interval {
    let mut ticker = tokio::time::interval(Duration::from_secs(period_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

fn parse_deadline(raw: &str) -> Result<Timestamp, MarketError> {
    parse_timestamp(raw)
        .ok_or_else(|| MarketError::InvalidDeadline(format!("not a timestamp: {raw}")))
}

fn parse_observed_at(raw: &str) -> Result<Timestamp, MarketError> {
    parse_timestamp(raw)
        .ok_or_else(|| MarketError::InvalidFeedValue(format!("not a timestamp: {raw}")))
}

fn resolve_caller(caller: Option<Address>) -> Result<Address> {
    if let Some(caller) = caller {
        return Ok(caller);
    }
    let raw = Text::new("Act as (address):")
        .prompt()
        .context("an identity is required, pass --as <address>")?;
    Ok(Address::new(raw)?)
}

fn load_state(path: &Path) -> Result<Snapshot> {
    Snapshot::load(path).with_context(|| {
        format!(
            "loading state from {} (run `txmark init` first)",
            path.display()
        )
    })
}

fn save_state(snapshot: &mut Snapshot, path: &Path) -> Result<()> {
    snapshot
        .save(path)
        .with_context(|| format!("saving state to {}", path.display()))
}

fn print_market(info: &MarketInfo) {
    println!("{}", "═".repeat(50).bright_black());
    println!("{}: {}", "Market ID".yellow().bold(), info.id);
    println!("{}: {}", "Question".yellow().bold(), info.description);
    println!("{}: {}", "Threshold".yellow().bold(), info.threshold);
    println!("{}: {}", "Deadline".yellow().bold(), format_timestamp(info.deadline));
    println!("{}: {}", "Creator".yellow().bold(), info.creator);
    println!("{}: {}", "Oracle".yellow().bold(), info.oracle);
    println!("{}: {}", "Status".yellow().bold(), info.status);
    println!(
        "{}: above {} / below {} coins",
        "Pools".yellow().bold(),
        units_to_coins(info.above_total),
        units_to_coins(info.below_total)
    );
    println!(
        "{}: {} coins{}",
        "Initial Liquidity".yellow().bold(),
        units_to_coins(info.initial_liquidity),
        if info.initial_liquidity_withdrawn { " (withdrawn)" } else { "" }
    );
    println!("{}: {} coins", "Held".cyan().bold(), units_to_coins(info.held_value));
    println!("{}: {}", "Bettors".yellow().bold(), info.bettor_count);
    if let Some(resolution) = &info.resolution {
        println!(
            "{}: {} (observed {} at {})",
            "Winner".green().bold(),
            resolution.winning_side,
            resolution.observed_count,
            format_timestamp(resolution.resolved_at)
        );
    }
    println!("{}", "═".repeat(50).bright_black());
}
