//! WebSocket server for notebook cell execution.
//!
//! Run with: cargo run -p cellrun-server
//!
//! Then point a notebook client at ws://127.0.0.1:8765/.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use cellrun_core::CredentialStore;
use cellrun_engine::{Engine, EngineConfig};
use cellrun_session::{SessionConfig, SimulatedSessionFactory};
use cellrun_transport::websocket::create_router;
use clap::Parser;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(
    name = "cellrun-server",
    about = "Run notebook cells sequentially against one persistent namespace"
)]
struct Cli {
    /// WebSocket listen port
    #[arg(long, default_value_t = 8765, env = "CELLRUN_WEBSOCKET_PORT")]
    port: u16,

    /// Listen address
    #[arg(long, default_value = "127.0.0.1", env = "CELLRUN_HOST")]
    host: std::net::IpAddr,

    /// How often the idle worker rechecks for shutdown
    #[arg(long, default_value_t = 100, env = "CELLRUN_POLL_INTERVAL_MS")]
    poll_interval_ms: u64,

    /// Do not echo captured output to this process's stdout/stderr
    #[arg(long, env = "CELLRUN_NO_ECHO")]
    no_echo: bool,

    /// Constructor name the session guard watches for
    #[arg(long, default_value = "Session", env = "CELLRUN_SESSION_CONSTRUCTOR")]
    session_constructor: String,

    /// Credential name written by UPDATE_API_KEY
    #[arg(long, default_value = "SESSION_API_KEY", env = "CELLRUN_CREDENTIAL_VAR")]
    credential_var: String,

    /// Refuse to construct sessions without a credential
    #[arg(long, env = "CELLRUN_REQUIRE_CREDENTIAL")]
    require_credential: bool,

    /// Simulated latency of one session action
    #[arg(long, default_value_t = 50, env = "CELLRUN_ACT_LATENCY_MS")]
    act_latency_ms: u64,

    /// Credential value installed at startup
    #[arg(long, env = "CELLRUN_INITIAL_CREDENTIAL", hide_env_values = true)]
    initial_credential: Option<String>,
}

impl Cli {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            echo_output: !self.no_echo,
            session_constructor: self.session_constructor.clone(),
            session: SessionConfig {
                require_credential: self.require_credential,
                act_latency: Duration::from_millis(self.act_latency_ms),
                credential_var: self.credential_var.clone(),
            },
        }
    }

    const fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.engine_config();

    let credentials = Arc::new(CredentialStore::new());
    let factory = Arc::new(SimulatedSessionFactory::new(config.session.clone()));
    let engine = Engine::start(config, factory, credentials)
        .context("failed to start execution engine")?;
    if let Some(value) = &cli.initial_credential {
        engine.set_credential(value.as_str());
    }

    let app = create_router(Arc::clone(&engine));

    let addr = cli.addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Server listening on ws://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Joining the worker blocks.
    tokio::task::spawn_blocking(move || engine.shutdown())
        .await
        .context("engine shutdown task failed")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
