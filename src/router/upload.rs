use std::time::Duration;

use axum::Json;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;

use crate::AppState;
use crate::error::{Result, ServerError};

/// Largest accepted image payload.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

const ALLOWED_MIME: [&str; 3] = ["image/jpeg", "image/jpg", "image/png"];

fn is_allowed_mime(content_type: &str) -> bool {
    ALLOWED_MIME.contains(&content_type)
}

/// Handler proxying a road image to the external classifier.
///
/// The image never touches disk: bytes are read from the multipart
/// field and forwarded in one request. The classifier's verdict is
/// relayed verbatim.
pub async fn handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    let classifier = state.config.classifier.as_ref().ok_or_else(|| {
        ServerError::ClassifierUnavailable
    })?;

    let mut file: Option<(String, String, axum::body::Bytes)> = None;
    while let Some(field) =
        multipart.next_field().await.map_err(|err| {
            ServerError::BadRequest {
                details: err.to_string(),
            }
        })?
    {
        if field.name() != Some("file") {
            continue;
        }

        let content_type = field
            .content_type()
            .ok_or_else(|| ServerError::BadRequest {
                details: "file field carries no content type".into(),
            })?
            .to_owned();
        let file_name = field
            .file_name()
            .unwrap_or("upload")
            .to_owned();
        let data = field.bytes().await.map_err(|err| {
            ServerError::BadRequest {
                details: err.to_string(),
            }
        })?;

        file = Some((content_type, file_name, data));
        break;
    }

    let Some((content_type, file_name, data)) = file else {
        return Err(ServerError::BadRequest {
            details: "no file uploaded".into(),
        });
    };

    if !is_allowed_mime(&content_type) {
        return Err(ServerError::BadRequest {
            details: "only JPEG and PNG images are accepted".into(),
        });
    }
    if data.len() > MAX_IMAGE_BYTES {
        return Err(ServerError::BadRequest {
            details: "image exceeds the 5 MB limit".into(),
        });
    }

    let part = reqwest::multipart::Part::bytes(data.to_vec())
        .file_name(file_name)
        .mime_str(&content_type)
        .map_err(|_| ServerError::BadRequest {
            details: "only JPEG and PNG images are accepted".into(),
        })?;
    let form = reqwest::multipart::Form::new().part("file", part);

    let timeout = Duration::from_secs(
        classifier.timeout.unwrap_or(DEFAULT_TIMEOUT_SECONDS),
    );

    let response = state
        .http
        .post(&classifier.url)
        .multipart(form)
        .timeout(timeout)
        .send()
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "classifier request failed");
            if err.is_timeout() {
                ServerError::ClassifierTimeout
            } else {
                ServerError::ClassifierUnavailable
            }
        })?;

    let status = response.status();
    let verdict: serde_json::Value = response.json().await.map_err(|err| {
        tracing::error!(error = %err, "classifier sent malformed response");
        ServerError::ClassifierUnavailable
    })?;

    tracing::debug!(%status, "classifier verdict relayed");

    Ok((status, Json(verdict)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::*;
    use axum::body;
    use axum::http::{Method, Request, header};
    use sqlx::PgPool;
    use tower::ServiceExt;

    #[test]
    fn test_mime_whitelist() {
        assert!(is_allowed_mime("image/jpeg"));
        assert!(is_allowed_mime("image/jpg"));
        assert!(is_allowed_mime("image/png"));
        assert!(!is_allowed_mime("image/gif"));
        assert!(!is_allowed_mime("application/pdf"));
        assert!(!is_allowed_mime("text/html"));
    }

    fn multipart_request(
        field: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Request<body::Body> {
        const BOUNDARY: &str = "roadwatch-test-boundary";

        let mut payload = Vec::new();
        payload.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; \
                 name=\"{field}\"; filename=\"road.jpg\"\r\nContent-Type: \
                 {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        payload.extend_from_slice(bytes);
        payload.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(body::Body::from(payload))
            .unwrap()
    }

    #[sqlx::test]
    async fn test_upload_without_classifier(pool: PgPool) {
        // the test state has no classifier section.
        let state = router::state(pool);
        let app = app(state.clone());

        let response = app
            .oneshot(multipart_request("file", "image/jpeg", b"fake"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[sqlx::test]
    async fn test_upload_rejects_wrong_mime(pool: PgPool) {
        let mut state = router::state(pool);
        let mut config = (*state.config).clone();
        config.classifier = Some(config::Classifier {
            url: "http://localhost:7000/process".into(),
            timeout: Some(1),
        });
        state.config = std::sync::Arc::new(config);
        let app = app(state.clone());

        let response = app
            .oneshot(multipart_request("file", "application/pdf", b"%PDF"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[sqlx::test]
    async fn test_upload_requires_file_field(pool: PgPool) {
        let mut state = router::state(pool);
        let mut config = (*state.config).clone();
        config.classifier = Some(config::Classifier {
            url: "http://localhost:7000/process".into(),
            timeout: Some(1),
        });
        state.config = std::sync::Arc::new(config);
        let app = app(state.clone());

        let response = app
            .oneshot(multipart_request("avatar", "image/jpeg", b"fake"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
