use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::mail::{Template, Variables};
use crate::router::Valid;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(length(min = 1, max = 100, message = "Name is required."))]
    pub name: String,
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(length(min = 1, message = "Message is required."))]
    pub message: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub message: String,
}

/// Handler relaying a contact-form message to the support address.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    let recipient = state
        .config
        .mail
        .as_ref()
        .and_then(|mail| mail.contact.clone())
        .ok_or_else(|| ServerError::Internal {
            details: "contact address is not configured".into(),
        })?;

    state
        .mail
        .publish_event(
            Template::ContactMessage,
            &recipient,
            &body.name,
            Variables {
                message: Some(body.message.as_str().into()),
                reply_to: Some(body.email.as_str().into()),
                ..Default::default()
            },
        )
        .await?;

    tracing::info!("contact message relayed");

    Ok(Json(Response {
        message: "Message sent successfully! We'll get back to you soon."
            .into(),
    }))
}
