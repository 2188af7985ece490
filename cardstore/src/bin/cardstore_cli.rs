use std::path::PathBuf;

use anyhow::{Context, Result};
use cardstore::config::StorageConfig;
use cardstore::scan::ScanOutcomeJson;
use cardstore::table::Cursor;
use cardstore::value::item_to_json;
use cardstore::CardStore;
use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;

#[derive(Parser, Debug)]
#[command(
    name = "cardstore-cli",
    about = "Inspect a SQLite-backed loyalty card table."
)]
struct Cli {
    /// Path to the SQLite database file.
    #[arg(short, long, default_value = "loyalty.sqlite", value_hint = clap::ValueHint::FilePath)]
    db_path: PathBuf,

    /// Table to inspect.
    #[arg(long, default_value = cardstore::config::DEFAULT_TABLE_NAME)]
    table: String,

    /// Minimum log level to display.
    #[arg(long, default_value_t = LogLevelArg::Info, value_enum)]
    log_level: LogLevelArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan one window of the table, optionally resuming from a cursor.
    Scan {
        /// Minimum number of items to collect before stopping.
        #[arg(long, default_value_t = 25)]
        minimum: usize,

        /// Cursor JSON printed by a previous scan.
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Print every card in the table.
    All,
    /// Fetch one card by card number.
    Get {
        card_number: String,
    },
    /// Check whether an email is already registered.
    Email {
        email: String,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LevelFilter {
    fn from(value: LogLevelArg) -> Self {
        match value {
            LogLevelArg::Error => LevelFilter::Error,
            LogLevelArg::Warn => LevelFilter::Warn,
            LogLevelArg::Info => LevelFilter::Info,
            LogLevelArg::Debug => LevelFilter::Debug,
            LogLevelArg::Trace => LevelFilter::Trace,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_default_env()
        .filter_level(cli.log_level.into())
        .try_init()
        .ok();

    let config = StorageConfig::new(&cli.table);
    let store = CardStore::open_sqlite(&cli.db_path, config)
        .with_context(|| format!("failed to open {}", cli.db_path.display()))?;

    match cli.command {
        Commands::Scan { minimum, cursor } => {
            let cursor = cursor
                .map(|raw| serde_json::from_str::<Cursor>(&raw))
                .transpose()
                .context("cursor must be the JSON printed by a previous scan")?;
            let outcome = store.scan_cards(minimum, cursor).await?;
            let view = ScanOutcomeJson::from(outcome);
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Commands::All => {
            let items = store.list_cards().await?;
            let json: Vec<_> = items.iter().map(item_to_json).collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
            log::info!("{} cards", json.len());
        }
        Commands::Get { card_number } => match store.get_card(&card_number).await? {
            Some(item) => println!("{}", serde_json::to_string_pretty(&item_to_json(&item))?),
            None => anyhow::bail!("Loyalty card not found: {card_number}"),
        },
        Commands::Email { email } => {
            let exists = store.email_exists(&email).await?;
            println!("{exists}");
        }
    }

    Ok(())
}
