use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::account::{AccountRepository, AccountView, AuthProvider};
use crate::error::{Result, ServerError};
use crate::router::Valid;
use crate::token;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required."))]
    pub password: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub message: String,
    pub token: String,
    pub expires_in: u64,
    pub user: AccountView,
}

/// Handler authenticating a verified local account.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    let account = AccountRepository::new(state.db.postgres.clone())
        .find_by_email(&body.email)
        .await?
        .ok_or(ServerError::NotFound { resource: "user" })?;

    // direct OAuth accounts to their provider's flow.
    if account.auth_provider != AuthProvider::Local {
        return Err(ServerError::WrongProvider(account.auth_provider));
    }

    if !account.verified {
        return Err(ServerError::Unverified);
    }

    let matches = account
        .password
        .as_deref()
        .map(|hash| state.crypto.verify_password(&body.password, hash))
        .unwrap_or(false);
    if !matches {
        return Err(ServerError::Unauthorized);
    }

    let token = state.token.create(&account.id.to_string())?;

    tracing::info!(account_id = account.id, "logged in");

    Ok(Json(Response {
        message: "Login successful!".into(),
        token,
        expires_in: token::EXPIRATION_TIME,
        user: account.into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::signup::tests::signup_body;
    use crate::*;
    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;
    use sqlx::{PgPool, Row};

    fn login_body(email: &str, password: &str) -> String {
        json!(Body {
            email: email.into(),
            password: password.into(),
        })
        .to_string()
    }

    async fn verify(app: axum::Router, pool: &PgPool, email: &str) {
        let code: String =
            sqlx::query("SELECT code FROM otp_codes WHERE email = $1")
                .bind(email)
                .fetch_one(pool)
                .await
                .unwrap()
                .get("code");
        let response = make_request(
            app,
            Method::POST,
            "/verify-otp",
            json!({ "email": email, "otp": code }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[sqlx::test]
    async fn test_login_lifecycle(pool: PgPool) {
        let state = router::state(pool.clone());
        let app = app(state.clone());

        make_request(
            app.clone(),
            Method::POST,
            "/signup",
            signup_body("a@b.com"),
        )
        .await;

        // unverified account is forbidden, flagged for verification.
        let response = make_request(
            app.clone(),
            Method::POST,
            "/login",
            login_body("a@b.com", "secret1"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["needsVerification"], true);

        verify(app.clone(), &pool, "a@b.com").await;

        // wrong password stays unauthorized even once verified.
        let response = make_request(
            app.clone(),
            Method::POST,
            "/login",
            login_body("a@b.com", "wrong-password"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = make_request(
            app,
            Method::POST,
            "/login",
            login_body("a@b.com", "secret1"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Response = serde_json::from_slice(&body).unwrap();
        assert!(body.user.verified);
        let claims = state.token.decode(&body.token).unwrap();
        assert_eq!(claims.sub, body.user.id.to_string());
    }

    #[sqlx::test]
    async fn test_login_unknown_email(pool: PgPool) {
        let state = router::state(pool);
        let app = app(state.clone());

        let response = make_request(
            app,
            Method::POST,
            "/login",
            login_body("ghost@b.com", "secret1"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[sqlx::test]
    async fn test_login_rejects_oauth_account(pool: PgPool) {
        let state = router::state(pool.clone());
        let app = app(state.clone());

        account::AccountRepository::new(pool)
            .find_or_create(&account::Profile {
                provider: account::AuthProvider::Google,
                external_id: "g-123".into(),
                email: "a@b.com".into(),
                name: "A".into(),
                picture: None,
            })
            .await
            .unwrap();

        let response = make_request(
            app,
            Method::POST,
            "/login",
            login_body("a@b.com", "secret1"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
