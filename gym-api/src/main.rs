use clap::{Parser, Subcommand};
use gym_api::config::Settings;
use gym_api::logging::init_logging;
use gym_api::metrics::init_metrics;
use gym_api::services::users::create_admin;
use gym_api::{server, AppState};
use gym_core::storage::Storage;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "gym-api")]
#[command(about = "Gym memberships, check-ins, coaching and shop REST API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Port to listen on (overrides config and PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Apply database migrations and exit
    Migrate,
    /// Create a verified administrator account
    CreateAdmin {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        name: String,
    },
}

#[cfg(feature = "db")]
async fn build_storage(settings: &Settings) -> anyhow::Result<Arc<dyn Storage>> {
    use gym_core::storage::DatabaseStorage;

    info!("Initializing database storage at {}", settings.database.url);
    let storage = DatabaseStorage::connect(
        &settings.database.url,
        settings.database.auth_token.as_deref(),
    )
    .await?;
    Ok(Arc::new(storage))
}

#[cfg(not(feature = "db"))]
async fn build_storage(_settings: &Settings) -> anyhow::Result<Arc<dyn Storage>> {
    use gym_core::storage::InMemoryStorage;

    warn!("Built without the `db` feature: using in-memory storage, data is lost on exit");
    Ok(Arc::new(InMemoryStorage::new()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load environment variables
    dotenv::dotenv().ok();

    init_logging();

    let settings = Settings::load()?;

    match cli.command {
        Commands::Serve { port } => {
            let metrics = init_metrics();
            if metrics.is_none() {
                warn!("Prometheus recorder unavailable, /metrics will return 503");
            }
            let storage = build_storage(&settings).await?;
            let addr = format!(
                "{}:{}",
                settings.server.host,
                port.unwrap_or(settings.server.port)
            );
            let state = AppState::from_settings(settings, storage, metrics)?;
            server::start_server(state, &addr).await?;
        }
        Commands::Migrate => {
            build_storage(&settings).await?;
            info!("Migrations complete");
        }
        Commands::CreateAdmin {
            email,
            password,
            name,
        } => {
            let storage = build_storage(&settings).await?;
            let state = AppState::from_settings(settings, storage, None)?;
            let admin = create_admin(&state, &email, &password, &name)
                .await
                .map_err(|e| anyhow::anyhow!("could not create admin: {e}"))?;
            info!("Created administrator {} ({})", admin.email, admin.id);
        }
    }

    Ok(())
}
