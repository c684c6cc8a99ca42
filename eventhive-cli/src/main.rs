use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use eventhive_core::{
    get_default_config_path, sign, sign_ticket, RemoteTicketStore, ScannerConfig, SupabaseClient,
    SyncReconciler, SyncSettings, TicketStore, VerificationEngine,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// EventHive check-in CLI - offline-first ticket verification
#[derive(Parser)]
#[command(name = "eventhive")]
#[command(about = "EventHive check-in: preload, verify and sync tickets", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local database path override
    #[arg(short, long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cache an event and its attendees, and make it the active event
    Preload {
        /// Event ID
        event_id: String,
    },

    /// Push pending scans and pull the active event now
    Sync,

    /// Verify one scanned payload and record the check-in
    Verify {
        /// Raw scan: a bare code or a signed JSON payload
        raw: String,

        /// Do not contact the remote store
        #[arg(long)]
        offline: bool,
    },

    /// Show local store counters and sync state
    Status {
        /// Restrict counters to one event
        #[arg(long)]
        event: Option<String>,
    },

    /// List cached attendees of an event
    Attendees {
        /// Event ID
        event_id: String,

        /// Only attendees already checked in
        #[arg(long)]
        checked_in: bool,
    },

    /// Print a signed ticket payload for QR encoding
    Sign {
        /// Ticket ID (or the bare code when no event is given)
        ticket_id: String,

        /// Event ID; omit to sign the code itself
        event_id: Option<String>,
    },
}

fn connect_remote(config: &ScannerConfig) -> Result<Option<Arc<dyn RemoteTicketStore>>> {
    let Some(remote) = &config.remote else {
        return Ok(None);
    };
    let client: Arc<dyn RemoteTicketStore> =
        Arc::new(SupabaseClient::new(remote, config.remote_timeout())?);
    Ok(Some(client))
}

fn require_remote(config: &ScannerConfig) -> Result<Arc<dyn RemoteTicketStore>> {
    match connect_remote(config)? {
        Some(remote) => Ok(remote),
        None => bail!("No remote configured (set [remote] or EVENTHIVE_SUPABASE_URL)"),
    }
}

fn open_store(config: &ScannerConfig) -> Result<TicketStore> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    TicketStore::open(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(get_default_config_path);
    let mut config = ScannerConfig::resolve(&config_path)?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(config.log_level.parse()?))
        .init();

    match cli.command {
        Commands::Preload { event_id } => {
            let store = open_store(&config)?;
            let reconciler =
                SyncReconciler::new(store, require_remote(&config)?, SyncSettings::from(&config));
            let report = reconciler.preload(&event_id).await?;
            print_json(&report)?;
        }
        Commands::Sync => {
            let store = open_store(&config)?;
            let reconciler =
                SyncReconciler::new(store, require_remote(&config)?, SyncSettings::from(&config));
            let (pushed, pulled) = reconciler.sync_now().await?;
            info!("Sync finished: {} pushed, {} deferred", pushed.pushed, pushed.failed);
            print_json(&serde_json::json!({ "push": pushed, "pull": pulled }))?;
        }
        Commands::Verify { raw, offline } => {
            let store = open_store(&config)?;
            let remote = if offline { None } else { connect_remote(&config)? };
            let mut engine = VerificationEngine::from_config(&config, store, remote);
            let verdict = engine.verify(&raw).await;
            print_json(&verdict)?;
            if !verdict.is_accepted() {
                std::process::exit(2);
            }
        }
        Commands::Status { event } => {
            let store = open_store(&config)?;
            let stats = store.stats(event.as_deref())?;
            let sync = store.sync_metadata()?;
            let active_event = match &sync.active_event_id {
                Some(id) => store.get_event(id)?,
                None => None,
            };
            print_json(&serde_json::json!({
                "scanner_id": config.scanner_id,
                "database": config.database_path,
                "remote": config.remote.as_ref().map(|r| r.url.clone()),
                "stats": stats,
                "sync": sync,
                "active_event": active_event,
            }))?;
        }
        Commands::Attendees {
            event_id,
            checked_in,
        } => {
            let store = open_store(&config)?;
            for attendee in store.event_attendees(&event_id, checked_in)? {
                let at = attendee
                    .checked_in_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!("{}\t{}\t{}\t{}", attendee.code, attendee.name, attendee.email, at);
            }
        }
        Commands::Sign {
            ticket_id,
            event_id,
        } => {
            let secret = config.hmac_secret.as_bytes();
            if secret.is_empty() {
                bail!("No HMAC secret configured (set hmac_secret or EVENTHIVE_HMAC_SECRET)");
            }
            let payload = match event_id {
                Some(event_id) => serde_json::json!({
                    "signature": sign_ticket(&ticket_id, &event_id, secret)?,
                    "ticket_id": ticket_id,
                    "event_id": event_id,
                }),
                None => serde_json::json!({
                    "signature": sign(&ticket_id, secret)?,
                    "qr_code": ticket_id,
                }),
            };
            println!("{}", payload);
        }
    }

    Ok(())
}
