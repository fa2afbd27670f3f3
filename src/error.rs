//! Error handler for roadwatch.

use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use sqlx::Error as SQLxError;
use thiserror::Error;
use validator::ValidationErrors;

use crate::account::AuthProvider;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error("{details}")]
    BadRequest { details: String },

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error("invalid or expired code")]
    InvalidOtp,

    #[error("this account was created using {0}, use the {0} login")]
    WrongProvider(AuthProvider),

    #[error("invalid credentials")]
    Unauthorized,

    #[error("email address must be verified before logging in")]
    Unverified,

    #[error("{resource} not found")]
    NotFound { resource: &'static str },

    #[error("email already registered")]
    EmailTaken { needs_verification: bool },

    #[error("email already verified")]
    AlreadyVerified,

    #[error("classifier is unreachable")]
    ClassifierUnavailable,

    #[error("classifier timed out")]
    ClassifierTimeout,

    #[error("SQL request failed: {0}")]
    Sql(#[from] SQLxError),

    #[error("mail dispatch failed: {0}")]
    Mail(#[from] lapin::Error),

    #[error("invalid url")]
    Url(#[from] url::ParseError),

    #[error("URI scheme is not supported")]
    InvalidScheme,

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Time(#[from] std::time::SystemTimeError),

    #[error("internal server error, {details}")]
    Internal { details: String },
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
    errors: Option<Vec<FieldError>>,
    /// Signals the caller that a new OTP can be requested.
    #[serde(
        rename = "needsVerification",
        skip_serializing_if = "Option::is_none"
    )]
    needs_verification: Option<bool>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Flag the response so the front-end offers the OTP screen.
    pub fn needs_verification(mut self) -> Self {
        self.needs_verification = Some(true);
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(
        self,
    ) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
            errors: None,
            needs_verification: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue.to_string(),
            })
        })
        .collect()
}

impl ServerError {
    /// HTTP status code this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Validation(_)
            | ServerError::BadRequest { .. }
            | ServerError::Axum(_)
            | ServerError::InvalidOtp
            | ServerError::WrongProvider(_) => StatusCode::BAD_REQUEST,
            ServerError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServerError::Unverified => StatusCode::FORBIDDEN,
            ServerError::NotFound { .. } => StatusCode::NOT_FOUND,
            ServerError::EmailTaken { .. } | ServerError::AlreadyVerified => {
                StatusCode::CONFLICT
            },
            ServerError::ClassifierUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            },
            ServerError::ClassifierTimeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .title("There were errors with your request.")
            .details(&self.to_string())
            .status(self.status_code());

        let response = match &self {
            ServerError::Validation(validation_errors) => {
                response.errors(validation_errors)
            },

            ServerError::Unverified => response
                .title("Email verification required.")
                .needs_verification(),

            ServerError::EmailTaken {
                needs_verification: true,
            } => response
                .title("Email already registered but not verified.")
                .needs_verification(),

            ServerError::Unauthorized => {
                response.title("Invalid credentials.")
            },

            ServerError::Sql(_)
            | ServerError::Mail(_)
            | ServerError::Url(_)
            | ServerError::InvalidScheme
            | ServerError::Json(_)
            | ServerError::Token(_)
            | ServerError::Time(_)
            | ServerError::Internal { .. } => {
                tracing::error!(err = %self, "server returned 500 status");

                ResponseError::default()
            },

            _ => response,
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}
