use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wildkey_server::{
    authorizer::LOG_WILDCARD_ACCESS,
    store::{
        audit::{DEFAULT_MAX_AUDIT_EVENTS, MAX_AUDIT_EVENTS},
        generate_credential,
        settings::{check_setting_key, validate_setting},
        Store, WILDCARD_IP,
    },
};

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "wildkeyd",
    about = "Wildkeyd — wildcard-address API key endpoint for the ticketing API",
    version
)]
struct Cli {
    /// Data directory holding wildkey.db (default: $WILDKEY_DATA_DIR or platform data dir)
    #[arg(long, env = "WILDKEY_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,
    /// Log level: error, warn, info, debug, verbose (default: $WILDKEY_LOG_LEVEL or warn)
    #[arg(long, env = "WILDKEY_LOG_LEVEL", global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the wildcard endpoint HTTP server
    Serve {
        /// Port to listen on
        #[arg(long, env = "WILDKEY_PORT", default_value = "8080")]
        port: u16,
        /// Host to bind
        #[arg(long, env = "WILDKEY_HOST", default_value = "0.0.0.0")]
        host: String,
    },
    /// Manage API keys (offline; stop the server first)
    Keys {
        #[command(subcommand)]
        action: KeyAction,
    },
    /// Read or change plugin settings (offline; stop the server first)
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum KeyAction {
    /// Create a key. Without --ip it is valid from any address.
    Add {
        #[arg(long, default_value = WILDCARD_IP)]
        ip: String,
        #[arg(long, default_value = "")]
        notes: String,
        /// Use this key value instead of generating one
        #[arg(long)]
        key: Option<String>,
    },
    /// List keys (values are never printed)
    List {
        #[arg(long)]
        json: bool,
    },
    Activate { id: u64 },
    Deactivate { id: u64 },
    Remove { id: u64 },
}

#[derive(Subcommand)]
enum ConfigAction {
    Get { key: String },
    /// Change a setting: log_wildcard_access (true/false) or max_audit_events (count)
    Set { key: String, value: String },
    /// Remove a setting so its default applies
    Unset { key: String },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let raw = cli.log_level.clone().unwrap_or_else(|| "warn".into());
    let effective_log_level = if raw.eq_ignore_ascii_case("verbose") {
        "debug".to_owned()
    } else {
        raw
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&effective_log_level))
        .init();

    match cli.command {
        Commands::Serve { port, host } => cmd_serve(host, port, cli.data_dir).await,
        Commands::Keys { action } => cmd_keys(action, cli.data_dir.as_ref()),
        Commands::Config { action } => cmd_config(action, cli.data_dir.as_ref()),
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: String, port: u16, data_dir: Option<PathBuf>) -> Result<()> {
    let cfg = wildkey_server::ServerConfig {
        host,
        port,
        data_dir,
        ..Default::default()
    };

    wildkey_server::run(cfg).await
}

fn open(data_dir: Option<&PathBuf>) -> Result<Store> {
    wildkey_server::open_store(data_dir).context("open store — is the server still running?")
}

fn cmd_keys(action: KeyAction, data_dir: Option<&PathBuf>) -> Result<()> {
    let store = open(data_dir)?;

    match action {
        KeyAction::Add { ip, notes, key } => {
            let key = key.unwrap_or_else(generate_credential);
            let record = store.put_key(&key, &ip, &notes)?;
            if record.is_wildcard() {
                eprintln!("warning: key {} accepts requests from ANY address", record.id);
            }
            println!("id:  {}", record.id);
            println!("key: {}", record.key);
        }
        KeyAction::List { json } => {
            let metas = store.list_keys()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&metas)?);
            } else {
                for m in metas {
                    let state = if m.active { "active" } else { "inactive" };
                    println!("{:>6}  {:<39}  {:<8}  {}", m.id, m.ip_addr, state, m.notes);
                }
            }
        }
        KeyAction::Activate { id } => set_active(&store, id, true)?,
        KeyAction::Deactivate { id } => set_active(&store, id, false)?,
        KeyAction::Remove { id } => {
            if !store.delete_key(id)? {
                anyhow::bail!("no key with id {id}");
            }
            println!("removed key {id}");
        }
    }
    Ok(())
}

fn set_active(store: &Store, id: u64, active: bool) -> Result<()> {
    let record = store
        .set_active(id, active)?
        .with_context(|| format!("no key with id {id}"))?;
    let state = if record.active { "active" } else { "inactive" };
    println!("key {id} is now {state}");
    Ok(())
}

fn cmd_config(action: ConfigAction, data_dir: Option<&PathBuf>) -> Result<()> {
    let store = open(data_dir)?;

    match action {
        ConfigAction::Get { key } => match store.get_setting(&key)? {
            Some(v) => println!("{v}"),
            None if key == LOG_WILDCARD_ACCESS => println!("true (default)"),
            None if key == MAX_AUDIT_EVENTS => println!("{DEFAULT_MAX_AUDIT_EVENTS} (default)"),
            None => println!("(unset)"),
        },
        ConfigAction::Set { key, value } => {
            let value = value.trim();
            validate_setting(&key, value)?;
            store.set_setting(&key, value)?;
            println!("{key} = {value}");
        }
        ConfigAction::Unset { key } => {
            check_setting_key(&key)?;
            store.clear_setting(&key)?;
            println!("{key} unset");
        }
    }
    Ok(())
}
