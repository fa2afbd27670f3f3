use axum::{Json, extract::State};
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
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub message: String,
}

/// Handler issuing a fresh OTP, invalidating any outstanding one.
///
/// Unlike signup, a dispatch failure here rolls nothing back: the account
/// predates this call and the caller can simply retry.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    let account = AccountRepository::new(state.db.postgres.clone())
        .find_by_email(&body.email)
        .await?
        .ok_or(ServerError::NotFound { resource: "user" })?;

    if account.verified {
        return Err(ServerError::AlreadyVerified);
    }

    let code = OtpStore::generate();
    // the upsert retires the previous code in the same statement.
    OtpStore::new(state.db.postgres.clone())
        .replace(&body.email, &code)
        .await?;

    state
        .mail
        .publish_event(
            Template::Otp,
            &account.email,
            &account.name,
            Variables {
                code: Some(code.as_str().into()),
                ..Default::default()
            },
        )
        .await?;

    Ok(Json(Response {
        message: "New OTP sent successfully! Please check your email.".into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::signup::tests::signup_body;
    use crate::*;
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use sqlx::{PgPool, Row};

    fn resend_body(email: &str) -> String {
        json!(Body {
            email: email.into()
        })
        .to_string()
    }

    #[sqlx::test]
    async fn test_resend_invalidates_previous_code(pool: PgPool) {
        let state = router::state(pool.clone());
        let app = app(state.clone());

        make_request(
            app.clone(),
            Method::POST,
            "/signup",
            signup_body("a@b.com"),
        )
        .await;

        let old_code: String =
            sqlx::query("SELECT code FROM otp_codes WHERE email = $1")
                .bind("a@b.com")
                .fetch_one(&pool)
                .await
                .unwrap()
                .get("code");

        let response = make_request(
            app.clone(),
            Method::POST,
            "/resend-otp",
            resend_body("a@b.com"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        // pre-resend code must no longer verify.
        let response = make_request(
            app,
            Method::POST,
            "/verify-otp",
            json!({ "email": "a@b.com", "otp": old_code }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let outstanding: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM otp_codes WHERE email = $1",
        )
        .bind("a@b.com")
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("count");
        assert_eq!(outstanding, 1);
    }

    #[sqlx::test]
    async fn test_resend_without_account(pool: PgPool) {
        let state = router::state(pool);
        let app = app(state.clone());

        let response = make_request(
            app,
            Method::POST,
            "/resend-otp",
            resend_body("ghost@b.com"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
