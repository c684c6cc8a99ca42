use anyhow::{Context, Result};
use clap::Parser;
use eventhive_core::{
    get_default_config_path, run_scanner, LineFrameSource, RemoteTicketStore, ScannerConfig,
    SupabaseClient, SyncReconciler, SyncSettings, TicketStore, VerificationEngine,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Reads decoded ticket strings from stdin, one per line, and prints one
/// JSON verdict per line on stdout.
#[derive(Parser)]
#[command(name = "eventhive-scanner", about = "EventHive check-in scanner", version = VERSION)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local database path override
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Scanner ID override
    #[arg(long)]
    scanner_id: Option<String>,

    /// Run without the remote store and sync loops
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(get_default_config_path);
    let mut config = ScannerConfig::resolve(&config_path)?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }
    if let Some(scanner_id) = cli.scanner_id {
        config.scanner_id = scanner_id;
    }
    if cli.offline {
        config.remote = None;
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(config.log_level.parse()?))
        .init();

    info!("Starting EventHive scanner {} v{}", config.scanner_id, VERSION);

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = TicketStore::open(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    info!("Local store at {}", config.database_path.display());

    let remote: Option<Arc<dyn RemoteTicketStore>> = match &config.remote {
        Some(remote) => {
            let client: Arc<dyn RemoteTicketStore> =
                Arc::new(SupabaseClient::new(remote, config.remote_timeout())?);
            Some(client)
        }
        None => {
            warn!("No remote configured, running offline");
            None
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sync_handle = remote.clone().map(|remote| {
        let reconciler = Arc::new(SyncReconciler::new(
            store.clone(),
            remote,
            SyncSettings::from(&config),
        ));
        info!(
            "Sync loops started (push every {}s, pull every {}s)",
            config.push_interval_secs, config.pull_interval_secs
        );
        reconciler.spawn(shutdown_rx)
    });

    let mut engine = VerificationEngine::from_config(&config, store, remote);
    let mut frames = LineFrameSource::stdin();

    info!("Scanner ready. Reading codes from stdin; press Ctrl+C to exit.");

    let scanning = run_scanner(&mut engine, &mut frames, |verdict| {
        match serde_json::to_string(verdict) {
            Ok(line) => println!("{}", line),
            Err(e) => error!("Failed to encode verdict: {}", e),
        }
    });

    tokio::select! {
        summary = scanning => {
            info!("Input closed after {} scans", summary.scanned);
        }
        result = signal::ctrl_c() => {
            result?;
            info!("Received shutdown signal");
        }
    }

    // Stop the sync loops; an in-flight remote call is abandoned.
    let _ = shutdown_tx.send(true);
    if let Some(handle) = sync_handle {
        if let Err(e) = handle.await {
            error!("Sync task failed: {}", e);
        }
    }

    Ok(())
}
