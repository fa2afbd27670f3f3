//! Roadwatch is a crowd-sourced pothole reporting API.

/// Account models and database repository.
#[forbid(unsafe_code)]
#[deny(missing_docs, unused_mut)]
pub mod account;
pub mod complaint;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod mail;
pub mod otp;
pub mod router;
pub mod telemetry;
pub mod token;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::http::{Method, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    make_request_as(app, method, path, body, None).await
}

/// Same as [`make_request`], with a bearer token attached.
#[cfg(test)]
pub async fn make_request_as(
    app: Router,
    method: Method,
    path: &str,
    body: String,
    bearer: Option<&str>,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        request = request
            .header(header::AUTHORIZATION, format!("{} {token}", router::TOKEN_TYPE));
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub db: database::Database,
    pub crypto: Arc<crypto::Crypto>,
    pub token: token::TokenManager,
    pub mail: mail::MailManager,
    pub http: reqwest::Client,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::new(Duration::from_secs(10)))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
        ]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::OPTIONS,
                ])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    // the proxy route gets its own body limit, everything else keeps
    // the default 2 MB.
    let upload_router = Router::new()
        .route("/upload", post(router::upload::handler))
        .layer(DefaultBodyLimit::max(router::upload::MAX_IMAGE_BYTES + 1024));

    Router::new()
        .route("/status.json", get(router::status::status))
        .route("/signup", post(router::signup::handler))
        .route("/verify-otp", post(router::verify_otp::handler))
        .route("/resend-otp", post(router::resend_otp::handler))
        .route("/login", post(router::login::handler))
        .route("/logout", get(router::oauth::logout))
        .route("/auth/current-user", get(router::oauth::current_user))
        .route("/auth/{provider}", get(router::oauth::consent))
        .route("/auth/{provider}/callback", get(router::oauth::callback))
        .route(
            "/api/complaints",
            post(router::complaints::submit).get(router::complaints::list),
        )
        .route("/api/contact", post(router::contact::handler))
        .merge(upload_router)
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>>
{
    // read configuration file. let it in memory.
    let config = config::Configuration::default().read()?;

    let db = match config.postgres {
        Some(ref config) => {
            database::Database::new(
                &config.address,
                &config
                    .username
                    .clone()
                    .unwrap_or(database::DEFAULT_CREDENTIALS.into()),
                &config
                    .password
                    .clone()
                    .unwrap_or(database::DEFAULT_CREDENTIALS.into()),
                &config
                    .database
                    .clone()
                    .unwrap_or(database::DEFAULT_DATABASE_NAME.into()),
                config.pool_size.unwrap_or(database::DEFAULT_POOL_SIZE),
            )
            .await?
        },
        None => {
            tracing::error!("missing `postgres` entry on `config.yaml` file");
            std::process::exit(0);
        },
    };

    // execute migrations scripts on start.
    sqlx::migrate!().run(&db.postgres).await?;

    let crypto = Arc::new(crypto::Crypto::new(config.argon2.clone())?);

    // handle jwt.
    let secret = std::env::var("JWT_SECRET")
        .expect("missing `JWT_SECRET` environnement variable");
    let mut token = token::TokenManager::new(&config.url, &secret);
    if let Some(audience) =
        config.token.as_ref().and_then(|t| t.audience.as_ref())
    {
        token.audience(audience);
    }

    // handle mail sender.
    let mail = if let Some(cfg) = &config.mail {
        mail::MailManager::new(cfg).await?
    } else {
        mail::MailManager::default()
    };

    otp::spawn_sweeper(db.postgres.clone());

    Ok(AppState {
        config,
        db,
        crypto,
        token,
        mail,
        http: reqwest::Client::new(),
    })
}
