use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use gangway::auth::{IdentityResolver, TokenService};
use gangway::config::Settings;
use gangway::gateway::Gateway;
use gangway::server::{AppState, create_router};
use gangway::upstream::{ForemanClient, HttpForemanClient, HttpRegistryClient, RegistryClient};

#[derive(Parser)]
#[command(name = "gangway")]
#[command(about = "Container registry authorization gateway", long_about = None)]
struct Cli {
    /// Path to a TOML settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway
    Serve {
        /// Host to bind to, overriding the settings file
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to, overriding the settings file
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Apply pending schema migrations (and the one-shot SQLite handoff
    /// when a Postgres URL is configured), then exit
    Migrate,
}

fn load_settings(path: Option<&PathBuf>) -> anyhow::Result<Settings> {
    Ok(match path {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("gangway=info".parse()?))
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings(cli.config.as_ref())?;

    match cli.command {
        Commands::Migrate => {
            // store::open migrates and, with Postgres configured, performs
            // the embedded-file handoff.
            gangway::store::open(&settings)?;
            info!("Schema is current");
        }
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                settings.host = host;
            }
            if let Some(port) = port {
                settings.port = port;
            }

            let store = gangway::store::open(&settings)?;
            let tokens = TokenService::new(store.clone());
            let foreman: Arc<dyn ForemanClient> = Arc::new(HttpForemanClient::new(&settings)?);
            let registry: Arc<dyn RegistryClient> = Arc::new(HttpRegistryClient::new(&settings)?);

            let state = Arc::new(AppState {
                gateway: Gateway::new(store.clone()),
                resolver: IdentityResolver::new(tokens.clone(), foreman.clone()),
                tokens,
                store,
                foreman,
                registry,
                client_endpoint: settings.client_endpoint().to_string(),
                admin_key: settings.admin_key.clone(),
            });

            let app = create_router(state);
            let addr = settings.socket_addr()?;

            info!("Starting gateway on {}", addr);

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
