use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use voice_coach::config::{ServerConfig, SpeechConfig};
use voice_coach::flow::{ChannelNavigator, FlowDeps, FlowRegistry, Handoff};
use voice_coach::routes::flow_routes;
use voice_coach::speech::HttpSpeechClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let server_config = ServerConfig::from_env().context("invalid server configuration")?;
    let speech_config = SpeechConfig::from_env().context("invalid speech configuration")?;

    // Initialize tracing; the guard flushes the file writer on exit.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _log_guard = match &server_config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "voice-coach.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            None
        }
    };

    eprintln!("🎙️ Voice Coach v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Speech backend: {}", speech_config.base_url);
    eprintln!("   Flow API: http://0.0.0.0:{}/api/flows", server_config.port);
    eprintln!("   Flow WS:  ws://0.0.0.0:{}/ws/flows/{{name}}\n", server_config.port);

    // ── Flow plans ──────────────────────────────────────────────────────
    let plans = server_config
        .load_plans()
        .context("failed to load flow plans")?;

    // ── Controllers ─────────────────────────────────────────────────────
    let speech = Arc::new(HttpSpeechClient::new(speech_config).context("failed to build speech client")?);
    let (navigator, handoffs) = ChannelNavigator::new();
    let deps = FlowDeps {
        synthesizer: speech.clone(),
        recognizer: speech,
        navigator: Arc::new(navigator),
    };

    let registry = FlowRegistry::from_plans(plans, deps).context("failed to build flow controllers")?;
    tracing::info!(flows = ?registry.names(), "Flows registered");
    let registry = Arc::new(registry);

    tokio::spawn(route_handoffs(Arc::clone(&registry), handoffs));

    if let Some(entry) = &server_config.entry_flow {
        let controller = registry
            .get(entry)
            .with_context(|| format!("entry flow {entry} is not defined"))?;
        controller.start().await?;
    }

    // ── HTTP / WebSocket server ─────────────────────────────────────────
    let app = flow_routes(Arc::clone(&registry));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", server_config.port))
        .await
        .with_context(|| format!("failed to bind port {}", server_config.port))?;
    tracing::info!(port = server_config.port, "Flow server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    registry.stop_all().await;
    tracing::info!("Voice coach shut down");
    Ok(())
}

/// Start the flow a destination is routed to; anything else belongs to the
/// presentation layer.
async fn route_handoffs(registry: Arc<FlowRegistry>, mut handoffs: mpsc::UnboundedReceiver<Handoff>) {
    while let Some(handoff) = handoffs.recv().await {
        match registry.resolve(&handoff.destination) {
            Some(next) => match next.start().await {
                Ok(session_id) => tracing::info!(
                    from = %handoff.flow,
                    to = %next.name(),
                    session_id = %session_id,
                    "Handed off to next flow"
                ),
                Err(e) => tracing::warn!(
                    from = %handoff.flow,
                    destination = %handoff.destination,
                    error = %e,
                    "Handoff could not start next flow"
                ),
            },
            None => tracing::info!(
                flow = %handoff.flow,
                destination = %handoff.destination,
                "Handoff to presentation layer"
            ),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C, shutting down");
}
