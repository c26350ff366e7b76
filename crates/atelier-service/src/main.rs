use atelier_core::StorageConfig;
use atelier_service::{build_router, SeedAdmin, ServiceConfig, ServiceState};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "atelierd", version, about = "Workshop enrollment REST service")]
struct Cli {
    /// Socket address to bind, e.g. 127.0.0.1:8080
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,
    /// Persistence backend. `auto` picks postgres when a database url is configured.
    #[arg(long, value_enum, default_value_t = StorageMode::Auto, env = "ATELIER_STORAGE")]
    storage: StorageMode,
    /// PostgreSQL url for workshop and user persistence.
    #[arg(long, env = "ATELIER_DATABASE_URL")]
    database_url: Option<String>,
    /// Max PostgreSQL pool connections.
    #[arg(long, default_value_t = 5, env = "ATELIER_PG_MAX_CONNECTIONS")]
    pg_max_connections: u32,
    /// Email of the admin account to create on first start.
    #[arg(long, env = "ATELIER_SEED_ADMIN_EMAIL")]
    seed_admin_email: Option<String>,
    /// Display name for the seeded admin account.
    #[arg(long, default_value = "Administrator", env = "ATELIER_SEED_ADMIN_NAME")]
    seed_admin_name: String,
}

fn resolve_storage(cli: &Cli) -> anyhow::Result<StorageConfig> {
    let resolved_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let storage = match cli.storage {
        StorageMode::Memory => StorageConfig::Memory,
        StorageMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!("storage=postgres requires --database-url or DATABASE_URL")
            })?;
            StorageConfig::postgres(database_url, cli.pg_max_connections)
        }
        StorageMode::Auto => {
            if let Some(database_url) = resolved_url {
                StorageConfig::postgres(database_url, cli.pg_max_connections)
            } else {
                StorageConfig::Memory
            }
        }
    };

    Ok(storage)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "atelier_service=info,info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let storage = resolve_storage(&cli)?;
    let seed_admin = cli.seed_admin_email.clone().map(|email| SeedAdmin {
        name: cli.seed_admin_name.clone(),
        email,
    });

    let state = ServiceState::bootstrap(ServiceConfig {
        storage,
        seed_admin,
    })
    .await?;
    info!(storage = state.storage_label(), "atelier-service starting");

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("atelier-service listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
