use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use session_gateway::auth::{HttpIdentityService, IdentityService};
use session_gateway::config::Config;
use session_gateway::routes::{self, AppState};
use session_gateway::session::{EndReason, SessionStore, SqlitePersistence};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("🚀 Session Gateway starting...");
    tracing::info!(
        "Server configured: {}:{}",
        config.server_host,
        config.server_port
    );

    // Restore the session kept from a previous run, if any
    let store = match &config.session_db_file {
        Some(path) => {
            let persistence = SqlitePersistence::open(path)?;
            tracing::info!("Session persistence: {}", path.display());
            SessionStore::restore(Arc::new(persistence))
        }
        None => {
            tracing::info!("Session persistence disabled, sessions live in memory only");
            SessionStore::new()
        }
    };

    if store.is_authenticated().await {
        tracing::info!("✅ Restored console session");
    } else {
        tracing::info!("No active session, waiting for login");
    }

    let identity: Arc<dyn IdentityService> = Arc::new(HttpIdentityService::new(
        config.login_url()?,
        config.refresh_url()?,
        Duration::from_secs(config.http_request_timeout),
    )?);
    tracing::info!("✅ Identity service: {}", config.identity_url);

    let app_state = AppState::new(config.clone(), identity, store)?;
    tracing::info!("✅ Resource API: {}", config.upstream_url);

    spawn_session_event_logger(&app_state);

    let app = routes::app(app_state);

    // Bind to configured host and port
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    print_startup_banner(&config);

    tracing::info!("🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("👋 Server shutdown complete");

    Ok(())
}

/// Log every ended session for operators
fn spawn_session_event_logger(state: &AppState) {
    let mut events = state.coordinator.subscribe();
    tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;

        loop {
            match events.recv().await {
                Ok(ended) => match &ended.reason {
                    EndReason::RefreshFailed { message } => {
                        tracing::warn!("⚠️ Session ended, refresh failed: {}", message)
                    }
                    EndReason::LoggedOut => tracing::info!("Session ended by logout"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Session event logger skipped {} events", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Print startup banner
fn print_startup_banner(config: &Config) {
    let banner = r#"
╔═══════════════════════════════════════════════════════════╗
║                                                           ║
║              🔐 Session Gateway                           ║
║                                                           ║
║  Authenticating proxy for the admin console API           ║
║                                                           ║
╚═══════════════════════════════════════════════════════════╝
"#;

    println!("{}", banner);
    println!("  Version:     {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Server:      http://{}:{}",
        config.server_host, config.server_port
    );
    println!("  Upstream:    {}", config.upstream_url);
    println!("  Identity:    {}", config.identity_url);
    println!("  Refresh:     {}s timeout", config.refresh_timeout);
    println!("  Log Level:   {}", config.log_level);
    println!();
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
