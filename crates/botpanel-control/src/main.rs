use std::net::SocketAddr;

use botpanel_agent::{AgentConfig, LogFileConfig, LogSink};
use botpanel_control::{settings::ControlSettings, state::AppState};
use botpanel_process::ACTOR_SYSTEM;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = ControlSettings::from_env();
    let agent = AgentConfig::from_env();
    let sink = match LogFileConfig::from_env() {
        Some(cfg) => LogSink::with_log_file(cfg),
        None => LogSink::new(),
    };

    if settings.uses_default_credentials() {
        tracing::warn!("using the default operator password; set BOTPANEL_PASSWORD");
    }
    if settings.uses_dev_secret() {
        tracing::warn!("using the development session secret; set BOTPANEL_SESSION_SECRET");
    }

    let port = settings.port;
    let state = AppState::new(settings, agent, sink)?;
    state.files.ensure_root().await?;
    state.manager.load_saved_token().await;

    let app = botpanel_control::app(state.clone());
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "botpanel-control HTTP listening");
    state
        .sink
        .info(ACTOR_SYSTEM, format!("Bot panel started on port {port}"));

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    state.manager.shutdown().await;
    tracing::info!("botpanel-control stopped");
    Ok(())
}
