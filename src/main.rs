use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use venue_server::{ServerConfig, UploadIngestor};
use venue_settings::VenueSettings;
use venue_store::{Database, MessageRepo};
use venue_telemetry::{init_telemetry, TelemetryConfig};

/// Coordination server for a live venue.
#[derive(Debug, Parser)]
#[command(name = "venue", version, about)]
struct Args {
    /// Settings file (defaults to $VENUE_CONFIG or ./venue.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port for HTTP and WebSocket traffic.
    #[arg(long)]
    port: Option<u16>,

    /// Bind address.
    #[arg(long)]
    host: Option<String>,

    /// Directory uploaded audio is written to.
    #[arg(long)]
    upload_dir: Option<PathBuf>,

    /// SQLite file for submitted text messages.
    #[arg(long)]
    database: Option<PathBuf>,
}

impl Args {
    fn apply(self, settings: &mut VenueSettings) {
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(host) = self.host {
            settings.server.host = host;
        }
        if let Some(dir) = self.upload_dir {
            settings.storage.upload_dir = dir;
        }
        if let Some(path) = self.database {
            settings.storage.database_path = path;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(venue_settings::settings_path);
    // Logging is configured by the settings, so warnings raised while loading
    // them go to a stderr-only subscriber.
    let mut settings =
        tracing::subscriber::with_default(venue_telemetry::bootstrap_subscriber(), || {
            venue_settings::load_settings_from_path(&config_path)
        })
        .with_context(|| format!("failed to load settings from {}", config_path.display()))?;
    args.apply(&mut settings);
    settings.validate().context("invalid settings")?;

    let _telemetry = init_telemetry(&TelemetryConfig::from_level_str(
        &settings.logging.level,
        settings.logging.json,
    ))
    .context("failed to initialise logging")?;

    tracing::info!(config = %config_path.display(), "starting venue server");

    let db_path = &settings.storage.database_path;
    let db = Database::open(db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    let messages = MessageRepo::new(db);
    let restored = messages.load_all().context("failed to read stored messages")?;
    tracing::info!(count = restored.len(), "restored text messages");

    let ingestor = UploadIngestor::new(
        settings.storage.upload_dir.clone(),
        settings.uploads.max_bytes,
        messages,
    );
    ingestor
        .prepare()
        .await
        .context("failed to create upload directory")?;

    let handle = venue_server::start(ServerConfig::from_settings(&settings), ingestor)
        .await
        .with_context(|| {
            format!(
                "failed to bind {}:{}",
                settings.server.host, settings.server.port
            )
        })?;

    tracing::info!(port = handle.port, "venue server ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!(connections = handle.state.registry.count(), "shutting down");
    Ok(())
}
