//! OAuth consent, callback and session endpoints.
//!
//! Provider credentials live in the configuration object built at
//! startup; there is no global strategy registry. Each provider's
//! callback payload is normalized into [`Profile`] before the account
//! store sees it.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;
use crate::account::{AccountRepository, AccountView, AuthProvider, Profile};
use crate::config::{Configuration, OAuthProvider};
use crate::error::{Result, ServerError};
use crate::router::{Identity, clear_session_cookie, session_cookie};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str =
    "https://openidconnect.googleapis.com/v1/userinfo";
const GOOGLE_SCOPE: &str = "openid email profile";

const MICROSOFT_AUTH_URL: &str =
    "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
const MICROSOFT_TOKEN_URL: &str =
    "https://login.microsoftonline.com/common/oauth2/v2.0/token";
const MICROSOFT_USERINFO_URL: &str = "https://graph.microsoft.com/v1.0/me";
const MICROSOFT_SCOPE: &str = "user.read";

fn credentials(
    config: &Configuration,
    provider: AuthProvider,
) -> Result<&OAuthProvider> {
    let oauth = config.oauth.as_ref();
    let credentials = match provider {
        AuthProvider::Google => oauth.and_then(|o| o.google.as_ref()),
        AuthProvider::Microsoft => oauth.and_then(|o| o.microsoft.as_ref()),
        AuthProvider::Local => None,
    };

    credentials.ok_or_else(|| ServerError::BadRequest {
        details: format!("{provider} OAuth is not configured"),
    })
}

fn redirect_uri(config: &Configuration, provider: AuthProvider) -> Result<Url> {
    Ok(Url::parse(&config.url)?
        .join(&format!("auth/{provider}/callback"))?)
}

/// Build the provider consent URL the user agent is sent to.
fn authorize_url(
    config: &Configuration,
    provider: AuthProvider,
    credentials: &OAuthProvider,
) -> Result<Url> {
    let callback = redirect_uri(config, provider)?;

    let mut url = match provider {
        AuthProvider::Google => Url::parse(GOOGLE_AUTH_URL)?,
        AuthProvider::Microsoft => Url::parse(MICROSOFT_AUTH_URL)?,
        AuthProvider::Local => {
            return Err(ServerError::NotFound {
                resource: "provider",
            });
        },
    };

    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("client_id", &credentials.client_id)
            .append_pair("redirect_uri", callback.as_str())
            .append_pair("response_type", "code");

        match provider {
            AuthProvider::Google => {
                query
                    .append_pair("scope", GOOGLE_SCOPE)
                    .append_pair("prompt", "select_account")
                    .append_pair("access_type", "offline")
                    .append_pair("include_granted_scopes", "true");
            },
            AuthProvider::Microsoft => {
                query
                    .append_pair("scope", MICROSOFT_SCOPE)
                    .append_pair("response_mode", "query");
            },
            AuthProvider::Local => unreachable!(),
        }
    }

    Ok(url)
}

/// Handler redirecting to the provider consent page.
pub async fn consent(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<Redirect> {
    let provider: AuthProvider = provider.parse()?;
    let credentials = credentials(&state.config, provider)?;
    let url = authorize_url(&state.config, provider, credentials)?;

    Ok(Redirect::to(url.as_str()))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GoogleProfile {
    sub: String,
    email: Option<String>,
    name: Option<String>,
    picture: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MicrosoftProfile {
    id: String,
    display_name: Option<String>,
    mail: Option<String>,
    user_principal_name: Option<String>,
}

/// Raw callback payload, tagged by provider.
#[derive(Debug)]
enum ProviderProfile {
    Google(GoogleProfile),
    Microsoft(MicrosoftProfile),
}

impl ProviderProfile {
    /// Collapse provider-specific shapes into the one internal profile.
    fn normalize(self) -> Result<Profile> {
        let missing_email = ServerError::BadRequest {
            details: "provider returned no email address".into(),
        };

        match self {
            ProviderProfile::Google(raw) => Ok(Profile {
                provider: AuthProvider::Google,
                email: raw.email.ok_or(missing_email)?,
                name: raw.name.unwrap_or_else(|| "User".into()),
                external_id: raw.sub,
                picture: raw.picture,
            }),
            ProviderProfile::Microsoft(raw) => Ok(Profile {
                provider: AuthProvider::Microsoft,
                // Graph omits `mail` for some tenants.
                email: raw
                    .mail
                    .or(raw.user_principal_name)
                    .ok_or(missing_email)?,
                name: raw.display_name.unwrap_or_else(|| "User".into()),
                external_id: raw.id,
                picture: None,
            }),
        }
    }
}

/// Exchange the authorization code, then fetch the user profile.
async fn fetch_profile(
    state: &AppState,
    provider: AuthProvider,
    credentials: &OAuthProvider,
    code: &str,
) -> Result<Profile> {
    let callback = redirect_uri(&state.config, provider)?;
    let token_url = match provider {
        AuthProvider::Google => GOOGLE_TOKEN_URL,
        AuthProvider::Microsoft => MICROSOFT_TOKEN_URL,
        AuthProvider::Local => {
            return Err(ServerError::NotFound {
                resource: "provider",
            });
        },
    };

    let params = [
        ("code", code),
        ("client_id", &credentials.client_id),
        ("client_secret", &credentials.client_secret),
        ("redirect_uri", callback.as_str()),
        ("grant_type", "authorization_code"),
    ];

    let token: TokenResponse = state
        .http
        .post(token_url)
        .form(&params)
        .send()
        .await
        .map_err(exchange_error)?
        .json()
        .await
        .map_err(exchange_error)?;

    let raw = match provider {
        AuthProvider::Google => ProviderProfile::Google(
            state
                .http
                .get(GOOGLE_USERINFO_URL)
                .bearer_auth(&token.access_token)
                .send()
                .await
                .map_err(exchange_error)?
                .json()
                .await
                .map_err(exchange_error)?,
        ),
        AuthProvider::Microsoft => ProviderProfile::Microsoft(
            state
                .http
                .get(MICROSOFT_USERINFO_URL)
                .bearer_auth(&token.access_token)
                .send()
                .await
                .map_err(exchange_error)?
                .json()
                .await
                .map_err(exchange_error)?,
        ),
        AuthProvider::Local => unreachable!(),
    };

    raw.normalize()
}

fn exchange_error(err: reqwest::Error) -> ServerError {
    tracing::error!(error = %err, "oauth code exchange failed");
    ServerError::BadRequest {
        details: "oauth exchange failed".into(),
    }
}

fn frontend_redirect(config: &Configuration, path_query: &str) -> Redirect {
    let target = Url::parse(&config.frontend_url)
        .and_then(|base| base.join(path_query))
        .map(|url| url.to_string())
        .unwrap_or_else(|_| config.frontend_url.clone());

    Redirect::to(&target)
}

/// Handler completing the provider round-trip.
///
/// Establishes a session cookie and bounces back to the front-end with
/// the token and display data in the query string.
pub async fn callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response> {
    let provider: AuthProvider = provider.parse()?;
    let credentials = credentials(&state.config, provider)?;

    let code = match (query.code, query.error) {
        (Some(code), None) => code,
        _ => {
            return Ok(frontend_redirect(
                &state.config,
                "login?error=oauth_failed",
            )
            .into_response());
        },
    };

    let account = match fetch_profile(&state, provider, credentials, &code)
        .await
    {
        Ok(profile) => {
            AccountRepository::new(state.db.postgres.clone())
                .find_or_create(&profile)
                .await
        },
        Err(err) => Err(err),
    };
    let account = match account {
        Ok(account) => account,
        Err(err) => {
            tracing::error!(error = %err, %provider, "oauth callback failed");
            return Ok(frontend_redirect(
                &state.config,
                "login?error=oauth_failed",
            )
            .into_response());
        },
    };

    let token = match state.token.create(&account.id.to_string()) {
        Ok(token) => token,
        Err(err) => {
            tracing::error!(error = %err, "token creation failed");
            return Ok(frontend_redirect(
                &state.config,
                "login?error=token_generation_failed",
            )
            .into_response());
        },
    };

    let mut target = Url::parse(&state.config.frontend_url)?
        .join("auth/callback")?;
    target
        .query_pairs_mut()
        .append_pair("token", &token)
        .append_pair("provider", &provider.to_string())
        .append_pair("name", &account.name)
        .append_pair("email", &account.email);

    tracing::info!(account_id = account.id, %provider, "oauth login");

    let mut response = Redirect::to(target.as_str()).into_response();
    response.headers_mut().append(
        header::SET_COOKIE,
        HeaderValue::from_str(&session_cookie(&token)).map_err(|_| {
            ServerError::Internal {
                details: "invalid session cookie".into(),
            }
        })?,
    );

    Ok(response)
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub message: String,
}

/// Handler destroying the browser session.
pub async fn logout() -> Result<Response> {
    let mut response = Json(LogoutResponse {
        message: "Logged out successfully".into(),
    })
    .into_response();
    response.headers_mut().append(
        header::SET_COOKIE,
        HeaderValue::from_str(&clear_session_cookie()).map_err(|_| {
            ServerError::Internal {
                details: "invalid session cookie".into(),
            }
        })?,
    );

    Ok(response)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CurrentUserResponse {
    pub user: AccountView,
}

/// Handler returning the authenticated caller.
pub async fn current_user(
    Identity(account): Identity,
) -> Result<Json<CurrentUserResponse>> {
    match account {
        Some(account) => Ok(Json(CurrentUserResponse {
            user: account.into(),
        })),
        None => Err(ServerError::Unauthorized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::*;
    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;
    use sqlx::PgPool;

    fn test_config() -> Configuration {
        let mut config = Configuration::default();
        config.url = "http://localhost:5001/".into();
        config.frontend_url = "http://localhost:3000/".into();
        config
    }

    #[test]
    fn test_authorize_url_google() {
        let config = test_config();
        let credentials = OAuthProvider {
            client_id: "test-client".into(),
            client_secret: "s".into(),
        };

        let url =
            authorize_url(&config, AuthProvider::Google, &credentials)
                .unwrap();

        assert!(url.as_str().starts_with(GOOGLE_AUTH_URL));
        let pairs: Vec<(String, String)> =
            url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("client_id".into(), "test-client".into())));
        assert!(pairs.contains(&(
            "redirect_uri".into(),
            "http://localhost:5001/auth/google/callback".into()
        )));
        assert!(pairs.contains(&("scope".into(), GOOGLE_SCOPE.into())));
        assert!(pairs.contains(&("response_type".into(), "code".into())));
    }

    #[test]
    fn test_normalize_google_profile() {
        let raw: GoogleProfile = serde_json::from_value(json!({
            "sub": "g-123",
            "email": "a@b.com",
            "name": "A",
            "picture": "https://img.example.com/a.png"
        }))
        .unwrap();

        let profile = ProviderProfile::Google(raw).normalize().unwrap();
        assert_eq!(profile.provider, AuthProvider::Google);
        assert_eq!(profile.external_id, "g-123");
        assert_eq!(profile.email, "a@b.com");
        assert_eq!(
            profile.picture.as_deref(),
            Some("https://img.example.com/a.png")
        );
    }

    #[test]
    fn test_normalize_microsoft_falls_back_to_upn() {
        let raw: MicrosoftProfile = serde_json::from_value(json!({
            "id": "m-123",
            "displayName": "A",
            "mail": null,
            "userPrincipalName": "a@b.com"
        }))
        .unwrap();

        let profile = ProviderProfile::Microsoft(raw).normalize().unwrap();
        assert_eq!(profile.email, "a@b.com");
        assert_eq!(profile.external_id, "m-123");
    }

    #[test]
    fn test_normalize_requires_email() {
        let raw: GoogleProfile = serde_json::from_value(json!({
            "sub": "g-123"
        }))
        .unwrap();

        assert!(ProviderProfile::Google(raw).normalize().is_err());
    }

    #[sqlx::test]
    async fn test_consent_unconfigured_provider(pool: PgPool) {
        let state = router::state(pool);
        let app = app(state.clone());

        // microsoft is not configured in the test state.
        let response = make_request(
            app,
            Method::GET,
            "/auth/microsoft",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[sqlx::test]
    async fn test_consent_redirects_to_google(pool: PgPool) {
        let state = router::state(pool);
        let app = app(state.clone());

        let response = make_request(
            app,
            Method::GET,
            "/auth/google",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let location = response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(location.starts_with(GOOGLE_AUTH_URL));
    }

    #[sqlx::test]
    async fn test_current_user_roundtrip(pool: PgPool) {
        let state = router::state(pool.clone());
        let app = app(state.clone());

        let account = account::AccountRepository::new(pool)
            .find_or_create(&account::Profile {
                provider: AuthProvider::Google,
                external_id: "g-123".into(),
                email: "a@b.com".into(),
                name: "A".into(),
                picture: None,
            })
            .await
            .unwrap();
        let token = state.token.create(&account.id.to_string()).unwrap();

        let response = make_request_as(
            app.clone(),
            Method::GET,
            "/auth/current-user",
            String::default(),
            Some(&token),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: CurrentUserResponse =
            serde_json::from_slice(&body).unwrap();
        assert_eq!(body.user.email, "a@b.com");

        let response = make_request(
            app,
            Method::GET,
            "/auth/current-user",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[sqlx::test]
    async fn test_logout_clears_cookie(pool: PgPool) {
        let state = router::state(pool);
        let app = app(state.clone());

        let response =
            make_request(app, Method::GET, "/logout", String::default())
                .await;
        assert_eq!(response.status(), StatusCode::OK);

        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(cookie.contains("Max-Age=0"));
    }
}
