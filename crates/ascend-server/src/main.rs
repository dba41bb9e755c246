//! ascend-server: authoritative remote store for the Ascend tracker

use std::net::SocketAddr;
use std::path::PathBuf;

use ascend_server::{create_router, AppState, JwtValidator, RemoteDb, ServerConfig};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "ascend-server")]
#[command(about = "Authoritative remote store for the Ascend tracker")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "ascend-server.toml")]
    config: PathBuf,

    /// Storage directory (overrides config file)
    #[arg(short, long, env = "ASCEND_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// HTTP port (overrides config file)
    #[arg(short, long, env = "ASCEND_HTTP_PORT")]
    port: Option<u16>,

    /// Token signing secret (overrides config file)
    #[arg(long, env = "ASCEND_JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    /// Use a built-in signing secret. Never in production.
    #[arg(long)]
    dev: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Print a signed token for an identity
    IssueToken { identity: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ascend_server=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load(&cli.config)?;

    // Apply CLI overrides
    if let Some(storage_dir) = cli.storage_dir {
        config.storage_dir = storage_dir;
    }
    if let Some(port) = cli.port {
        config.http_port = port;
    }
    if let Some(secret) = cli.jwt_secret {
        config.jwt_secret = secret;
    }

    let jwt = if cli.dev {
        warn!("Dev mode: tokens are signed with a public secret");
        JwtValidator::new_dev()
    } else {
        JwtValidator::new(config.jwt_secret.clone(), config.token_expiry_secs)?
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::IssueToken { identity } => {
            println!("{}", jwt.generate_token(&identity)?);
        }
        Command::Serve => {
            info!("Storage dir: {}", config.storage_dir.display());
            let db = RemoteDb::open(&config.storage_dir)?;
            let stats = db.stats()?;
            info!(
                identities = stats.identities,
                trades = stats.trades,
                focus_sessions = stats.focus_sessions,
                "Store opened"
            );

            let app = create_router(AppState::new(db, jwt));
            let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
            info!("Listening on http://{}", addr);

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
