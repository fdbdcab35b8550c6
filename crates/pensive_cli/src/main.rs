//! Command-line access to a Pensive store.
//!
//! # Responsibility
//! - Resolve store locations from flags or `PENSIVE_*` variables.
//! - Expose root lookup, reads, writes, undo and the link-id migration.
//! - Print results as JSON on stdout; errors go to stderr with exit code 1.

use clap::{Args, Parser, Subcommand};
use log::info;
use pensive_core::{
    default_log_level, init_logging, migrate_store_file, normalize_link_ids, undo_batch, Client,
    CoreConfig, EntityId, LoggingConfig, MigrateOptions, ReducerRegistry, SqliteFactStore,
    Timestamp, WriteRequest,
};
use serde::Serialize;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "pensive", version, arg_required_else_help = true)]
struct Cli {
    #[command(flatten)]
    stores: StoreArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StoreArgs {
    /// Root store file. Defaults to `$PENSIVE_ROOT/root.pensive`; other
    /// environment settings apply either way.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Read-only overlay store, highest priority first. Repeatable.
    #[arg(long = "overlay", global = true)]
    overlays: Vec<PathBuf>,

    /// Directory for rolling log files. Overrides `PENSIVE_LOG_DIR`.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the root entity id, creating the root entity if needed.
    Root,
    /// Print the reduced fields of the given entities.
    Read {
        #[arg(required = true)]
        ids: Vec<EntityId>,
    },
    /// Print the latest resource bytes of the given entities.
    Resources {
        #[arg(required = true)]
        ids: Vec<EntityId>,
    },
    /// Write one batch given as a JSON write request (stdin when omitted).
    Write {
        #[arg(long)]
        json: Option<String>,
    },
    /// Remove the batch written at TIMESTAMP from the root store.
    Undo { timestamp: Timestamp },
    /// Strip dashes from link ids in the root store (dry run by default).
    MigrateLinkIds {
        #[arg(long)]
        apply: bool,
    },
}

/// Applies the command-line flags on top of `base` (the environment config).
fn load_config(args: &StoreArgs, base: CoreConfig) -> Result<CoreConfig, String> {
    let mut config = base;
    if let Some(path) = &args.store {
        config.root_store = path.clone();
    }
    if !args.overlays.is_empty() {
        config.overlay_stores = args.overlays.clone();
    }
    if let Some(log_dir) = &args.log_dir {
        let level = args
            .log_level
            .clone()
            .or_else(|| config.logging.as_ref().map(|logging| logging.level.clone()))
            .unwrap_or_else(|| default_log_level().to_string());
        config.logging = Some(LoggingConfig::new(level, absolute(log_dir)?));
    } else if let (Some(level), Some(logging)) = (&args.log_level, config.logging.as_mut()) {
        logging.level = level.clone();
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn absolute(path: &Path) -> Result<PathBuf, String> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|dir| dir.join(path))
        .map_err(|e| format!("failed to resolve {}: {e}", path.display()))
}

fn print_json(value: &impl Serialize) -> Result<(), String> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).map_err(|e| e.to_string())?;
    stdout.write_all(b"\n").map_err(|e| e.to_string())
}

fn open_client(config: &CoreConfig) -> Result<Client, String> {
    Client::open(config, ReducerRegistry::standard()).map_err(|e| e.to_string())
}

fn read_write_request(json: Option<String>) -> Result<WriteRequest, String> {
    let text = match json {
        Some(text) => text,
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .map_err(|e| format!("failed to read stdin: {e}"))?;
            text
        }
    };
    serde_json::from_str(&text).map_err(|e| format!("invalid write request: {e}"))
}

fn run(cli: Cli) -> Result<(), String> {
    let base = CoreConfig::from_env().map_err(|e| e.to_string())?;
    let config = load_config(&cli.stores, base)?;
    if let Some(logging) = &config.logging {
        init_logging(logging).map_err(|e| e.to_string())?;
    }

    match cli.command {
        Commands::Root => {
            let mut client = open_client(&config)?;
            let root = client.root_entity().map_err(|e| e.to_string())?;
            print_json(&serde_json::json!({ "root": root }))
        }
        Commands::Read { ids } => {
            let client = open_client(&config)?;
            let read = client
                .read_entities_detailed(&ids)
                .map_err(|e| e.to_string())?;
            for malformed in &read.malformed {
                eprintln!("skipped field: {malformed}");
            }
            print_json(&read.entities)
        }
        Commands::Resources { ids } => {
            let client = open_client(&config)?;
            let resources = client.read_resources(&ids).map_err(|e| e.to_string())?;
            print_json(&resources)
        }
        Commands::Write { json } => {
            let request = read_write_request(json)?;
            let mut client = open_client(&config)?;
            client.apply(&request).map_err(|e| e.to_string())?;
            info!(
                "event=cli_write module=cli status=ok timestamp={}",
                request.timestamp
            );
            print_json(&serde_json::json!({ "timestamp": request.timestamp }))
        }
        Commands::Undo { timestamp } => {
            let mut store =
                SqliteFactStore::open_with_timeout(&config.root_store, config.busy_timeout())
                    .map_err(|e| e.to_string())?;
            let report = undo_batch(&mut store, timestamp).map_err(|e| e.to_string())?;
            print_json(&report)
        }
        Commands::MigrateLinkIds { apply } => {
            let options = MigrateOptions { apply };
            let report = migrate_store_file(&config.root_store, normalize_link_ids, options)
                .map_err(|e| e.to_string())?;
            print_json(&report)
        }
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(message) = run(cli) {
        eprintln!("{message}");
        std::process::exit(1);
    }
}
