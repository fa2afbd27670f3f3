use std::net::{Ipv4Addr, SocketAddr};

use axum::Router;
use axum::routing::get;
use roadwatch::{app, config, initialize_state, telemetry};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            if cfg!(debug_assertions) {
                "roadwatch=trace,tower_http=debug".into()
            } else {
                "roadwatch=info".into()
            }
        });
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());

    // ship logs and traces over OTLP when a collector is reachable.
    match std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        Ok(endpoint) => {
            registry.with(telemetry::setup_logging(&endpoint)?).init();
            let tracer = telemetry::setup_tracer()?;
            opentelemetry::global::set_tracer_provider(tracer);
        },
        Err(_) => registry.init(),
    }

    let state = initialize_state().await?;
    let port = state.config.port.unwrap_or(config::DEFAULT_PORT);

    let metrics = telemetry::setup_metrics_recorder()?;
    let router = app(state).merge(
        Router::new()
            .route("/metrics", get(move || async move { metrics.render() })),
    );

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server started");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("ctrl+c handler failed");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("sigterm handler failed")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutting down");
}
