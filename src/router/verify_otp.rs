use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::account::{AccountRepository, AccountView};
use crate::error::{Result, ServerError};
use crate::mail::{Template, Variables};
use crate::otp::OtpStore;
use crate::router::Valid;
use crate::token;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(length(equal = 6, message = "OTP must be 6 digits."))]
    pub otp: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub message: String,
    pub token: String,
    pub expires_in: u64,
    pub user: AccountView,
}

/// Handler proving control of an email address with an OTP.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    let otps = OtpStore::new(state.db.postgres.clone());

    // expired codes are indistinguishable from absent ones.
    if !otps.is_valid(&body.email, &body.otp).await? {
        return Err(ServerError::InvalidOtp);
    }

    let accounts = AccountRepository::new(state.db.postgres.clone());
    let mut account = accounts
        .find_by_email(&body.email)
        .await?
        .ok_or(ServerError::NotFound { resource: "user" })?;

    if account.verified {
        return Err(ServerError::AlreadyVerified);
    }

    accounts.mark_verified(account.id).await?;
    account.verified = true;
    otps.consume(&body.email, &body.otp).await?;

    // welcome email is best-effort, never fails the verification.
    if let Err(err) = state
        .mail
        .publish_event(
            Template::Welcome,
            &account.email,
            &account.name,
            Variables::default(),
        )
        .await
    {
        tracing::warn!(error = %err, "welcome email failed");
    }

    let token = state.token.create(&account.id.to_string())?;

    tracing::info!(account_id = account.id, "email verified");

    Ok(Json(Response {
        message: "Email verified successfully!".into(),
        token,
        expires_in: token::EXPIRATION_TIME,
        user: account.into(),
    }))
}
