use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use vox_core::prompt::PromptSettings;
use vox_engine::SessionManager;
use vox_live::gemini::{GeminiLive, DEFAULT_LOCATION, DEFAULT_MODEL};
use vox_live::CredentialBroker;
use vox_store::{Database, HandleStore, TranscriptRepo};
use vox_telemetry::TelemetryConfig;

/// Live session bridge between transport clients and the Gemini Live API.
#[derive(Parser)]
#[command(name = "vox", version)]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Data directory for the database and logs.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Live model to connect to.
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Cloud region for the live endpoint.
    #[arg(long, default_value = DEFAULT_LOCATION)]
    location: String,

    /// Optional file whose contents are injected as grounding context.
    #[arg(long, default_value = "context.txt")]
    context_file: PathBuf,

    /// Disable persisting warn+ logs to SQLite.
    #[arg(long)]
    no_log_db: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("create data dir {}", data_dir.display()))?;

    let _telemetry = vox_telemetry::init_telemetry(TelemetryConfig {
        log_to_sqlite: !args.no_log_db,
        log_db_path: data_dir.join("vox-logs.db"),
        ..Default::default()
    });

    tracing::info!(model = %args.model, "starting vox");

    let db = Database::open(&data_dir.join("vox.db")).context("open database")?;
    let handles = Arc::new(HandleStore::new(db.clone()));
    let transcripts = Arc::new(TranscriptRepo::new(db));

    let broker = Arc::new(CredentialBroker::new());
    let connector = Arc::new(
        GeminiLive::new(Arc::clone(&broker))
            .with_model(&args.model)
            .with_location(&args.location),
    );

    let mut settings = PromptSettings::default();
    match std::fs::read_to_string(&args.context_file) {
        Ok(context) if !context.trim().is_empty() => {
            tracing::info!(path = %args.context_file.display(), "grounding context loaded");
            settings.grounding_context = context.trim().to_string();
        }
        _ => {}
    }

    let manager = Arc::new(SessionManager::new(connector, handles, transcripts, settings));

    let config = vox_server::ServerConfig {
        port: args.port,
        ..Default::default()
    };
    let handle = vox_server::start(config, Arc::clone(&manager), broker)
        .await
        .context("start server")?;
    tracing::info!(port = handle.port, "vox ready");

    tokio::signal::ctrl_c().await.context("listen for ctrl+c")?;
    tracing::info!("shutting down");
    manager.stop_all();

    Ok(())
}

fn default_data_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".vox")
}
