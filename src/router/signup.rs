use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::account::AccountRepository;
use crate::error::{Result, ServerError};
use crate::mail::{Template, Variables};
use crate::otp::OtpStore;
use crate::router::Valid;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(length(min = 1, max = 100, message = "Name is required."))]
    pub name: String,
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(length(
        min = 6,
        max = 255,
        message = "Password must be at least 6 characters long."
    ))]
    pub password: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub message: String,
    pub email: String,
    pub requires_verification: bool,
}

/// Handler to register a local account pending email verification.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<(StatusCode, Json<Response>)> {
    let accounts = AccountRepository::new(state.db.postgres.clone());

    match accounts.find_by_email(&body.email).await? {
        Some(account) if account.verified => {
            return Err(ServerError::EmailTaken {
                needs_verification: false,
            });
        },
        Some(_) => {
            // caller should request a new OTP instead of retrying signup.
            return Err(ServerError::EmailTaken {
                needs_verification: true,
            });
        },
        None => {},
    }

    let hash = state.crypto.hash_password(&body.password)?;
    let account =
        accounts.insert_local(&body.name, &body.email, &hash).await?;

    let code = OtpStore::generate();
    let otps = OtpStore::new(state.db.postgres.clone());
    otps.replace(&body.email, &code).await?;

    // An account nobody can verify must not survive: compensate by
    // deleting it when the OTP email cannot be dispatched.
    if let Err(err) = state
        .mail
        .publish_event(
            Template::Otp,
            &body.email,
            &body.name,
            Variables {
                code: Some(code.as_str().into()),
                ..Default::default()
            },
        )
        .await
    {
        tracing::error!(
            error = %err,
            "verification email failed, rolling back signup"
        );
        accounts.delete_by_email(&body.email).await?;
        otps.remove(&body.email).await?;
        return Err(ServerError::Internal {
            details: "failed to send verification email".into(),
        });
    }

    tracing::info!(account_id = account.id, "account pending verification");

    Ok((
        StatusCode::CREATED,
        Json(Response {
            message:
                "User registered successfully! Please check your email for \
                 OTP verification."
                    .into(),
            email: body.email,
            requires_verification: true,
        }),
    ))
}

#[cfg(test)]
pub(super) mod tests {
    use super::*;
    use crate::*;
    use axum::http::Method;
    use http_body_util::BodyExt;
    use serde_json::json;
    use sqlx::{PgPool, Row};

    pub(crate) fn signup_body(email: &str) -> String {
        json!(Body {
            name: "A".into(),
            email: email.into(),
            password: "secret1".into(),
        })
        .to_string()
    }

    #[sqlx::test]
    async fn test_signup_creates_unverified_account_and_otp(pool: PgPool) {
        let state = router::state(pool.clone());
        let app = app(state.clone());

        let response = make_request(
            app,
            Method::POST,
            "/signup",
            signup_body("a@b.com"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Response = serde_json::from_slice(&body).unwrap();
        assert!(body.requires_verification);
        assert_eq!(body.email, "a@b.com");

        let account = account::AccountRepository::new(pool.clone())
            .find_by_email("a@b.com")
            .await
            .unwrap()
            .unwrap();
        assert!(!account.verified);
        assert!(account.password.is_some());

        let code: String =
            sqlx::query("SELECT code FROM otp_codes WHERE email = $1")
                .bind("a@b.com")
                .fetch_one(&pool)
                .await
                .unwrap()
                .get("code");
        assert_eq!(code.len(), otp::OTP_LENGTH);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[sqlx::test]
    async fn test_signup_duplicate_unverified_is_conflict(pool: PgPool) {
        let state = router::state(pool);
        let app = app(state.clone());

        let response = make_request(
            app.clone(),
            Method::POST,
            "/signup",
            signup_body("a@b.com"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = make_request(
            app,
            Method::POST,
            "/signup",
            signup_body("a@b.com"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["needsVerification"], true);
    }

    #[sqlx::test]
    async fn test_signup_rolls_back_when_mail_fails(pool: PgPool) {
        let mut state = router::state(pool.clone());
        state.mail = mail::MailManager::failing();
        let app = app(state.clone());

        let response = make_request(
            app,
            Method::POST,
            "/signup",
            signup_body("a@b.com"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        // neither the account nor its code survive a failed dispatch.
        assert!(
            account::AccountRepository::new(pool.clone())
                .find_by_email("a@b.com")
                .await
                .unwrap()
                .is_none()
        );
        let outstanding: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM otp_codes WHERE email = $1",
        )
        .bind("a@b.com")
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("count");
        assert_eq!(outstanding, 0);
    }

    #[sqlx::test]
    async fn test_signup_rejects_short_password(pool: PgPool) {
        let state = router::state(pool);
        let app = app(state.clone());

        let req_body = json!(Body {
            name: "A".into(),
            email: "a@b.com".into(),
            password: "abc".into(),
        })
        .to_string();
        let response =
            make_request(app, Method::POST, "/signup", req_body).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
