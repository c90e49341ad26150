use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use warelay::bridge::{BridgeClient, ClientFactory, ClientHandle, SidecarClient};
use warelay::config::Config;
use warelay::controller::SessionController;
use warelay::mail::Mailer;
use warelay::notify::PairingNotifier;
use warelay::resolver::{ChatResolver, Destination};
use warelay::server::{AppState, build_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env().context("invalid configuration")?;
    info!("starting WhatsApp relay");

    let mailer = config
        .email
        .api_key
        .clone()
        .map(|key| Mailer::new(key, config.email.from.clone()));
    if mailer.is_none() {
        info!("RESEND_API_KEY not set, QR codes will only be shown on the terminal");
    }
    let notifier = Arc::new(PairingNotifier::new(mailer, config.email.qr_notify_to.clone()));

    let resolver = Arc::new(ChatResolver::new(config.debug));
    let handle = ClientHandle::new();
    let default_destination = Destination::from_parts(
        Some(config.destination.chat_name.clone()),
        Some(config.destination.chat_id.clone()),
    );

    let sidecar_settings = config.sidecar.clone();
    let factory: ClientFactory = Arc::new(move |events| {
        Arc::new(SidecarClient::new(sidecar_settings.clone(), events)) as Arc<dyn BridgeClient>
    });

    let controller = SessionController::new(
        factory,
        handle.clone(),
        Arc::clone(&resolver),
        notifier,
        default_destination.clone(),
        config.debug,
    );
    tokio::spawn(Arc::clone(&controller).run());

    let state = AppState {
        controller,
        handle,
        resolver,
        default_destination,
    };
    let app = build_app(state, config.server.request_timeout_seconds);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening, POST /send to relay a message");

    // Shutdown is immediate; in-flight sends are not drained.
    tokio::select! {
        result = async { axum::serve(listener, app).await } => result.context("server error")?,
        _ = shutdown_signal() => info!("shutdown signal received, exiting"),
    }

    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,warelay=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
