//! ascend: command-line client for the Ascend tracker
//!
//! Every mutation is written to the local store first; an exchange with the
//! remote store is attempted afterwards and may fail without losing data.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use ascend_client::{
    CachedIdentity, ClientConfig, HttpTransport, IdentityProvider, LocalStore, RunOutcome,
    SledBackend, SledConfig, SyncScheduler, SyncTrigger, TradeDraft, Tracker,
};
use ascend_types::{FocusSession, JournalEntry, Trade, TradeDirection, DATE_FORMAT};
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "ascend")]
#[command(about = "Offline-first habit, focus, journal and trade tracker")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "ASCEND_CONFIG")]
    config: Option<PathBuf>,

    /// Remote store URL (overrides config file)
    #[arg(long, env = "ASCEND_SERVER_URL")]
    server_url: Option<String>,

    /// Identity (overrides config file)
    #[arg(long, env = "ASCEND_IDENTITY")]
    identity: Option<String>,

    /// Bearer token (overrides config file)
    #[arg(long, env = "ASCEND_TOKEN")]
    token: Option<String>,

    /// Data directory (overrides config file)
    #[arg(short, long, env = "ASCEND_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store identity and token in the config file
    Login {
        identity: String,
        token: String,
    },
    /// Mark a habit done (or not) for a day
    Habit {
        habit_id: String,
        /// Calendar date, defaults to today
        #[arg(long)]
        date: Option<String>,
        /// Record the habit as not done
        #[arg(long)]
        undo: bool,
    },
    /// Write the journal entry for a day
    Journal {
        #[arg(long)]
        date: Option<String>,
        #[arg(long, default_value = "")]
        wins: String,
        #[arg(long, default_value = "")]
        gaps: String,
        #[arg(long, default_value = "")]
        fix: String,
        #[arg(long, default_value_t = 3)]
        rating: u8,
    },
    /// Log a completed focus session
    Focus {
        minutes: u32,
        task: String,
        #[arg(long, default_value = "general")]
        category: String,
        #[arg(long)]
        date: Option<String>,
    },
    /// Trade log
    #[command(subcommand)]
    Trade(TradeCommand),
    /// Award experience points
    Xp { points: u64 },
    /// Run one exchange with the remote store now
    Sync,
    /// Show local state and sync status
    Status,
}

#[derive(Subcommand)]
enum TradeCommand {
    Add {
        pair: String,
        /// long/buy or short/sell
        direction: TradeDirection,
        #[arg(long)]
        entry: f64,
        #[arg(long)]
        stop: f64,
        #[arg(long)]
        target: f64,
        #[arg(long, default_value = "open")]
        outcome: String,
        #[arg(long, default_value = "")]
        emotion: String,
    },
    /// Remove a trade from this device only
    Delete { natural_key: String },
    List,
}

fn today() -> String {
    chrono::Local::now().format(DATE_FORMAT).to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ascend_client=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(ClientConfig::default_path);
    let mut config = ClientConfig::load(&config_path)?;

    if let Command::Login { identity, token } = &cli.command {
        config.identity_id = Some(identity.clone());
        config.token = Some(token.clone());
        config.save(&config_path)?;
        println!("Saved identity {} to {}", identity, config_path.display());
        return Ok(());
    }

    // Apply CLI overrides
    if let Some(server_url) = cli.server_url {
        config.server_url = server_url;
    }
    if let Some(identity) = cli.identity {
        config.identity_id = Some(identity);
    }
    if let Some(token) = cli.token {
        config.token = Some(token);
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    let identity_id = config
        .identity_id
        .clone()
        .context("No identity configured; run `ascend login <identity> <token>` first")?;

    let backend = Arc::new(SledBackend::open(SledConfig::at_path(config.store_path()))?);
    let store = LocalStore::new(backend.clone(), identity_id.clone());
    let transport = Arc::new(HttpTransport::new(&config.server_url, config.request_timeout())?);
    let identity = Arc::new(CachedIdentity::new(identity_id.clone(), config.token.clone()));
    let scheduler = SyncScheduler::new(
        store.clone(),
        transport,
        identity.clone(),
        config.scheduler(),
    );
    let tracker = Tracker::new(scheduler.clone());

    info!(identity = %identity_id, server = %config.server_url, "Client ready");

    match cli.command {
        Command::Login { .. } => {}
        Command::Habit {
            habit_id,
            date,
            undo,
        } => {
            let date = date.unwrap_or_else(today);
            tracker.set_habit(&habit_id, &date, !undo)?;
            println!("{} {} on {}", if undo { "Cleared" } else { "Completed" }, habit_id, date);
        }
        Command::Journal {
            date,
            wins,
            gaps,
            fix,
            rating,
        } => {
            let date = date.unwrap_or_else(today);
            tracker.write_journal(JournalEntry {
                date: date.clone(),
                wins,
                gaps,
                fix,
                rating,
            })?;
            println!("Journal saved for {}", date);
        }
        Command::Focus {
            minutes,
            task,
            category,
            date,
        } => {
            tracker.log_focus_session(FocusSession {
                date: date.unwrap_or_else(today),
                duration_minutes: minutes,
                task,
                category,
            })?;
            println!("Logged {} focus minutes", minutes);
        }
        Command::Trade(TradeCommand::Add {
            pair,
            direction,
            entry,
            stop,
            target,
            outcome,
            emotion,
        }) => {
            let trade = tracker.add_trade(TradeDraft {
                pair,
                direction,
                entry_price: entry,
                stop_loss: stop,
                take_profit: target,
                outcome,
                emotion,
            })?;
            println!("{} (R:R {:.2})", trade.natural_key, trade.risk_reward_ratio);
        }
        Command::Trade(TradeCommand::Delete { natural_key }) => {
            if tracker.delete_trade(&natural_key)? {
                println!("Removed {} from this device", natural_key);
            } else {
                println!("No trade {}", natural_key);
            }
        }
        Command::Trade(TradeCommand::List) => {
            for trade in store.read::<Trade>()? {
                println!(
                    "{}  {} {}  entry {} stop {} target {}  {}",
                    trade.natural_key,
                    trade.pair,
                    trade.direction.as_str(),
                    trade.entry_price,
                    trade.stop_loss,
                    trade.take_profit,
                    trade.outcome
                );
            }
        }
        Command::Xp { points } => {
            let progress = tracker.award_xp(points)?;
            println!(
                "Level {} ({} / {} to next)",
                progress.level,
                progress.points_into_level,
                progress.points_into_level + progress.points_to_next_level
            );
        }
        Command::Sync => match scheduler.sync_now(SyncTrigger::Manual).await {
            RunOutcome::Completed(summary) => println!(
                "Synced: sent {}, received {}, level {}",
                summary.sent, summary.received, summary.level
            ),
            RunOutcome::Coalesced => println!("Sync already in progress"),
            RunOutcome::Failed(err) => println!("Sync failed ({}): {}", err.kind(), err),
        },
        Command::Status => {
            let snapshot = store.snapshot()?;
            let progress = store.level()?;
            println!("Identity:  {}", identity_id);
            println!("Habits:    {}", snapshot.habit_completions.len());
            println!("Journal:   {}", snapshot.journal_entries.len());
            println!("Focus:     {}", snapshot.focus_sessions.len());
            println!("Trades:    {}", snapshot.trades.len());
            println!("XP:        {} (level {})", snapshot.xp_total, progress.level);
        }
    }

    // Let a mutation-triggered exchange finish before exiting
    scheduler.settle().await;
    let status = scheduler.status();
    if let Some(error) = &status.last_error {
        println!("Sync status: {} ({})", status.state, error);
    } else if let Some(at) = status.last_synced_at {
        println!("Sync status: {} (last synced {})", status.state, at.to_rfc3339());
    }

    // The remote store refused the token; stop sending it on every run
    let configured = config.token.as_deref().filter(|t| !t.is_empty());
    if let (Some(rejected), None) = (configured, identity.token()) {
        if ClientConfig::clear_token(&config_path, rejected)? {
            println!("Token rejected; run `ascend login <identity> <token>` again");
        }
    }

    backend.flush()?;
    Ok(())
}
