use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use docrest::auth::{generate_jwt, Claims};
use docrest::middleware::{Authenticate, RequestLogger};
use docrest::server::{HealthCheck, HttpServer};
use docrest::store::{MemoryStore, PgStore};
use docrest::{AppConfig, Application, ResourceDefinition, Store};

#[derive(Parser)]
#[command(name = "docrest")]
#[command(about = "Schema-driven REST and WebSocket CRUD server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Serve every resource defined in a schema directory")]
    Serve {
        #[arg(long, default_value = "schemas", help = "Directory of resource YAML files")]
        schemas: PathBuf,

        #[arg(long, help = "Listen port (overrides SERVER_PORT)")]
        port: Option<u16>,

        #[arg(long, help = "PostgreSQL URL; documents stay in memory without one")]
        database_url: Option<String>,
    },

    #[command(about = "Issue a bearer token signed with AUTH_JWT_SECRET")]
    Token {
        #[arg(long, help = "Subject (actor id)")]
        sub: String,

        #[arg(long = "role", help = "Role to grant; repeatable")]
        roles: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so DATABASE_URL and friends apply to cargo run
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docrest=info,tower_http=info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = docrest::config::config().clone();
    match Cli::parse().command {
        Commands::Serve {
            schemas,
            port,
            database_url,
        } => serve(config, schemas, port, database_url).await,
        Commands::Token { sub, roles } => {
            let claims = Claims::new(sub, roles, config.auth.jwt_expiry_hours);
            println!("{}", generate_jwt(&claims, &config.auth.jwt_secret)?);
            Ok(())
        }
    }
}

async fn serve(
    mut config: AppConfig,
    schemas: PathBuf,
    port: Option<u16>,
    database_url: Option<String>,
) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    if database_url.is_some() {
        config.database.url = database_url;
    }
    tracing::info!("Starting docrest in {:?} mode", config.environment);

    let store: Arc<dyn Store> = match &config.database.url {
        Some(_) => Arc::new(PgStore::connect(&config.database).await.context("connecting to PostgreSQL")?),
        None => {
            tracing::warn!("No DATABASE_URL set, documents are kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let definitions = ResourceDefinition::load_dir(&schemas)
        .with_context(|| format!("loading resources from {}", schemas.display()))?;

    let auth = Authenticate::from_config(&config.auth);
    let mut builder = Application::builder(config, Arc::clone(&store));
    builder.middleware(RequestLogger).middleware(auth);
    builder.route("get", "/health", HealthCheck::new(store))?;
    for definition in definitions {
        builder.resource(definition.into_builder()?)?;
    }

    HttpServer::new(builder.build()).serve().await?;
    Ok(())
}
