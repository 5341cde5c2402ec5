mod config_commands;
mod db_commands;
mod player_commands;

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::{Context, bail},
    clap::{Parser, Subcommand},
    gatekeeper_config::{GatekeeperConfig, Severity},
    gatekeeper_registry::{PlayerRegistry, SqliteRegistry},
    gatekeeper_tail::{
        CursorStore, DailyFiles, ReaderRegistry, SqliteCursorStore, TailOptions, TailReader,
    },
    sqlx::{SqlitePool, sqlite::SqlitePoolOptions},
    tokio::sync::mpsc,
    tracing::{error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

/// Capacity of the channel between tail readers and the pipeline.
const LINE_CHANNEL_CAPACITY: usize = 1024;

#[derive(Parser)]
#[command(name = "gatekeeper", about = "Gatekeeper: player identity reconciliation")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (skips discovery in ./ and the user config directory).
    #[arg(long, global = true, env = "GATEKEEPER_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory holding the database (overrides the platform default).
    #[arg(long, global = true, env = "GATEKEEPER_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Tail the configured logs and reconcile sessions (default).
    Run,
    /// Database management (reset, migrate).
    Db {
        #[command(subcommand)]
        action: db_commands::DbAction,
    },
    /// Inspect player records and retry completions.
    Players {
        #[command(subcommand)]
        action: player_commands::PlayerAction,
    },
    /// Configuration inspection.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Explicit `--config` wins; otherwise discover in the standard locations.
fn load_config(cli: &Cli) -> anyhow::Result<GatekeeperConfig> {
    match &cli.config {
        Some(path) => gatekeeper_config::load_config(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(gatekeeper_config::discover_and_load()),
    }
}

/// Open (creating if needed) the database and run every crate's migrations.
pub(crate) async fn open_database(
    config: &GatekeeperConfig,
    data_dir: Option<&std::path::Path>,
) -> anyhow::Result<SqlitePool> {
    let path = gatekeeper_config::database_path(config, data_dir);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let url = format!("sqlite:{}?mode=rwc", path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .with_context(|| format!("failed to open database {}", path.display()))?;

    gatekeeper_tail::run_migrations(&pool)
        .await
        .context("tail migrations failed")?;
    gatekeeper_registry::run_migrations(&pool)
        .await
        .context("registry migrations failed")?;

    info!(path = %path.display(), "database ready");
    Ok(pool)
}

async fn run(config: GatekeeperConfig, data_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let report = gatekeeper_config::validate(&config);
    for d in &report.diagnostics {
        match d.severity {
            Severity::Error => error!(path = %d.path, "{}", d.message),
            Severity::Warning => warn!(path = %d.path, "{}", d.message),
        }
    }
    if report.has_errors() {
        bail!("configuration has errors, refusing to start");
    }

    gatekeeper_metrics::init_metrics(config.metrics.enabled, config.metrics.listen)?;

    let pool = open_database(&config, data_dir.as_deref()).await?;
    let registry: Arc<dyn PlayerRegistry> = Arc::new(SqliteRegistry::with_pool(pool.clone()));
    let cursors: Arc<dyn CursorStore> = Arc::new(SqliteCursorStore::with_pool(pool.clone()));

    let mut readers = ReaderRegistry::new(TailOptions {
        poll_interval: config.logs.poll_interval(),
        probe_interval: config.logs.probe_interval(),
        watch: config.logs.watch,
    });
    for source in &config.logs.sources {
        readers.register(TailReader::new(
            source.name.clone(),
            DailyFiles::new(&source.directory, &source.prefix),
            Arc::clone(&cursors),
        ))?;
    }

    let pipeline = gatekeeper_reconcile::build_pipeline(&config, registry)?;
    let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
    readers.spawn(tx);
    let worker = tokio::spawn(pipeline.run(rx, readers.cancellation()));

    info!(readers = ?readers.names(), "gatekeeper running, press ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested");

    readers.shutdown().await;
    worker.await.context("pipeline task panicked")?;
    pool.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "gatekeeper starting");

    let config = load_config(&cli)?;
    match cli.command {
        None | Some(Commands::Run) => run(config, cli.data_dir).await,
        Some(Commands::Db { action }) => {
            db_commands::handle_db(action, &config, cli.data_dir.as_deref()).await
        },
        Some(Commands::Players { action }) => {
            player_commands::handle_players(action, &config, cli.data_dir.as_deref()).await
        },
        Some(Commands::Config { action }) => config_commands::handle_config(action, &config),
    }
}
