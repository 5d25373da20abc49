use anyhow::{Context, Result};
use console::style;
use rusqlite::Connection;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::Level;

use crate::core::archive::http::HttpArchive;
use crate::core::config::{self, Config};
use crate::core::registry::JobRegistry;
use crate::core::store::{Destination, SqliteDedupStore};
use crate::core::terminal::{print_error, print_info, print_status, print_success, print_warn};
use crate::interfaces::telegram::{self, BotContext};

fn print_help() {
    println!(
        "\n{} — Telegram channel media indexer\n",
        style("mediadex").green().bold()
    );
    println!("  {}   Start the bot", style("run").bold());
    println!("  {}  Check config and dedup store", style("doctor").bold());
    println!("  {} Print the version", style("version").bold());
    println!("  {}    This message", style("help").bold());
    println!(
        "\n {} {} <command>\n",
        style("Usage:").bold(),
        style("mediadex").green()
    );
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("run") => run_bot().await,
        Some("doctor") => doctor().await,
        Some("version") | Some("--version") => {
            println!("mediadex {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None | Some("help") | Some("--help") => {
            print_help();
            Ok(())
        }
        Some(other) => {
            print_error(&format!("Unknown command: {}", other));
            print_help();
            Ok(())
        }
    }
}

async fn open_store(config: &Config) -> Result<SqliteDedupStore> {
    let db_path = config.db_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let db = Connection::open(&db_path)
        .with_context(|| format!("opening {}", db_path.display()))?;
    let store = SqliteDedupStore::new(Arc::new(Mutex::new(db)));
    store.initialize().await?;
    Ok(store)
}

async fn run_bot() -> Result<()> {
    crate::logging::init(Level::INFO);

    let config = Config::load()?;
    let store = open_store(&config).await?;
    let archive = HttpArchive::new(&config.gateway_url);

    print_success("Configuration loaded.");
    print_status("Gateway", &config.gateway_url);
    print_status("Database", &config.db_path().display().to_string());

    let ctx = Arc::new(BotContext {
        registry: JobRegistry::new(),
        archive: Arc::new(archive),
        store: Arc::new(store),
        config,
    });

    telegram::start(ctx).await
}

async fn doctor() -> Result<()> {
    print_info("Checking mediadex setup…");
    print_status("Data dir", &config::data_dir().display().to_string());

    let config = match Config::load() {
        Ok(config) => {
            print_success("Config OK.");
            print_status("Admins", &config.admin_ids.len().to_string());
            print_status("Gateway", &config.gateway_url);
            config
        }
        Err(e) => {
            print_error(&format!("Config: {:#}", e));
            return Ok(());
        }
    };

    match open_store(&config).await {
        Ok(store) => {
            print_success("Dedup store OK.");
            for dest in [Destination::Main, Destination::Alternate] {
                let n = store.count(dest).await?;
                print_status(dest.label(), &format!("{} media records", n));
            }
        }
        Err(e) => print_warn(&format!("Dedup store: {:#}", e)),
    }

    Ok(())
}
