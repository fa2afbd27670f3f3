//! HTTP routing layer.

pub mod complaints;
pub mod contact;
pub mod login;
pub mod oauth;
pub mod resend_otp;
pub mod signup;
pub mod status;
pub mod upload;
pub mod verify_otp;

use axum::Json;
use axum::extract::{FromRef, FromRequest, FromRequestParts, Request};
use axum::http::header;
use axum::http::request::Parts;
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::account::{Account, AccountRepository};
use crate::error::ServerError;
use crate::{AppState, token};

pub const TOKEN_TYPE: &str = "Bearer";
const BEARER: &str = "Bearer ";

/// Session cookie carrying the signed token for browser flows.
pub const SESSION_COOKIE: &str = "roadwatch_session";

/// `Set-Cookie` value establishing a session.
pub fn session_cookie(token: &str) -> String {
    format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        token::EXPIRATION_TIME
    )
}

/// `Set-Cookie` value destroying the session.
pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// JSON extractor running `validator` rules before the handler.
pub struct Valid<T>(pub T);

impl<S, T> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(
        req: Request,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

/// Opportunistically resolved caller identity.
///
/// Session cookie first, then bearer header. Resolution failure is never
/// an error: anonymous callers simply carry no account.
pub struct Identity(pub Option<Account>);

impl Identity {
    fn token_from(parts: &Parts) -> Option<String> {
        if let Some(cookies) = parts
            .headers
            .get(header::COOKIE)
            .and_then(|value| value.to_str().ok())
        {
            for cookie in cookies.split(';') {
                if let Some(token) =
                    cookie.trim().strip_prefix(SESSION_COOKIE)
                {
                    if let Some(token) = token.strip_prefix('=') {
                        return Some(token.to_owned());
                    }
                }
            }
        }

        parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.replace(BEARER, ""))
    }
}

impl<S> FromRequestParts<S> for Identity
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);

        let Some(token) = Self::token_from(parts) else {
            return Ok(Identity(None));
        };
        let Ok(claims) = state.token.decode(&token) else {
            return Ok(Identity(None));
        };
        let Ok(account_id) = claims.sub.parse::<i32>() else {
            return Ok(Identity(None));
        };

        let account = AccountRepository::new(state.db.postgres.clone())
            .find_by_id(account_id)
            .await
            .ok()
            .flatten();

        Ok(Identity(account))
    }
}

/// Build an [`AppState`] for tests: cheap argon2 parameters, fixed token
/// secret, no mail queue.
#[cfg(test)]
pub(crate) fn state(pool: sqlx::PgPool) -> AppState {
    use std::sync::Arc;

    use crate::config::{Argon2, Configuration, OAuth, OAuthProvider};

    let mut config = Configuration::default();
    config.name = "roadwatch".into();
    config.url = "http://localhost:5001/".into();
    config.frontend_url = "http://localhost:3000/".into();
    config.argon2 = Some(Argon2 {
        memory_cost: 1024,
        iterations: 1,
        parallelism: 1,
        hash_length: 32,
    });
    config.oauth = Some(OAuth {
        google: Some(OAuthProvider {
            client_id: "test-client".into(),
            client_secret: "test-client-secret".into(),
        }),
        microsoft: None,
    });

    let crypto = crate::crypto::Crypto::new(config.argon2.clone())
        .expect("invalid argon2 parameters");

    AppState {
        token: crate::token::TokenManager::new(&config.url, "test-secret"),
        config: Arc::new(config),
        db: crate::database::Database { postgres: pool },
        crypto: Arc::new(crypto),
        mail: crate::mail::MailManager::default(),
        http: reqwest::Client::new(),
    }
}
