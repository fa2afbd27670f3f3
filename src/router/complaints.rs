use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::complaint::{Complaint, ComplaintRepository, NewComplaint};
use crate::error::Result;
use crate::mail::{Template, Variables};
use crate::router::{Identity, Valid};

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    #[validate(length(min = 1, max = 255, message = "Location is required."))]
    pub location: String,
    #[validate(length(min = 1, message = "Description is required."))]
    pub description: String,
    #[serde(default)]
    pub image_data: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub message: String,
    pub complaint: Complaint,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    pub complaints: Vec<Complaint>,
    pub count: usize,
}

/// Handler recording a pothole complaint.
///
/// The caller's identity is resolved opportunistically: anonymous
/// submissions are first-class, an authenticated caller just gets a
/// reporter snapshot attached and a confirmation email.
pub async fn submit(
    State(state): State<AppState>,
    Identity(account): Identity,
    Valid(body): Valid<Body>,
) -> Result<(StatusCode, Json<SubmitResponse>)> {
    let reporter = account.as_ref();

    let complaint = ComplaintRepository::new(state.db.postgres.clone())
        .insert(&NewComplaint {
            location: body.location,
            description: body.description,
            reporter_email: reporter.map(|a| a.email.clone()),
            reporter_name: reporter.map(|a| a.name.clone()),
            image_data: body.image_data,
            confidence: body.confidence,
        })
        .await?;

    if let Some(account) = reporter {
        // confirmation is best-effort, the report is already saved.
        if let Err(err) = state
            .mail
            .publish_event(
                Template::ComplaintReceived,
                &account.email,
                &account.name,
                Variables {
                    location: Some(complaint.location.as_str().into()),
                    ..Default::default()
                },
            )
            .await
        {
            tracing::warn!(error = %err, "complaint confirmation failed");
        }
    }

    tracing::info!(
        complaint_id = complaint.id,
        anonymous = account.is_none(),
        "complaint recorded"
    );

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            message: "Complaint submitted successfully!".into(),
            complaint,
        }),
    ))
}

/// Handler listing every complaint, newest first.
pub async fn list(
    State(state): State<AppState>,
) -> Result<Json<ListResponse>> {
    let complaints =
        ComplaintRepository::new(state.db.postgres.clone()).list().await?;

    Ok(Json(ListResponse {
        count: complaints.len(),
        complaints,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::*;
    use axum::http::Method;
    use http_body_util::BodyExt;
    use serde_json::json;
    use sqlx::PgPool;

    fn complaint_body(location: &str) -> String {
        json!({
            "location": location,
            "description": "deep pothole near the crossing",
            "confidence": 0.87
        })
        .to_string()
    }

    #[sqlx::test]
    async fn test_anonymous_submission(pool: PgPool) {
        let state = router::state(pool);
        let app = app(state.clone());

        let response = make_request(
            app.clone(),
            Method::POST,
            "/api/complaints",
            complaint_body("Main St"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: SubmitResponse = serde_json::from_slice(&body).unwrap();
        assert!(body.complaint.reporter_email.is_none());
        assert!(body.complaint.reporter_name.is_none());
        assert_eq!(body.complaint.confidence, Some(0.87));
    }

    #[sqlx::test]
    async fn test_authenticated_submission_snapshots_reporter(pool: PgPool) {
        let state = router::state(pool.clone());
        let app = app(state.clone());

        let account = account::AccountRepository::new(pool)
            .find_or_create(&account::Profile {
                provider: account::AuthProvider::Google,
                external_id: "g-123".into(),
                email: "a@b.com".into(),
                name: "A".into(),
                picture: None,
            })
            .await
            .unwrap();
        let token = state.token.create(&account.id.to_string()).unwrap();

        let response = make_request_as(
            app,
            Method::POST,
            "/api/complaints",
            complaint_body("Main St"),
            Some(&token),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: SubmitResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.complaint.reporter_email.as_deref(), Some("a@b.com"));
        assert_eq!(body.complaint.reporter_name.as_deref(), Some("A"));
    }

    #[sqlx::test]
    async fn test_missing_location_is_rejected(pool: PgPool) {
        let state = router::state(pool);
        let app = app(state.clone());

        let response = make_request(
            app,
            Method::POST,
            "/api/complaints",
            json!({ "location": "", "description": "pothole" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[sqlx::test]
    async fn test_list_newest_first(pool: PgPool) {
        let state = router::state(pool.clone());
        let app = app(state.clone());

        for location in ["First St", "Second St"] {
            let response = make_request(
                app.clone(),
                Method::POST,
                "/api/complaints",
                complaint_body(location),
            )
            .await;
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = make_request(
            app,
            Method::GET,
            "/api/complaints",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: ListResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.count, 2);
    }
}
