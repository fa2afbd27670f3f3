//! Pothole complaint store.

use serde::{Deserialize, Serialize};
use sqlx::{Pool, Postgres};

use crate::error::Result;

/// Review state of a complaint, mutated by an administrative process
/// outside this service.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "kebab-case")]
#[sqlx(type_name = "TEXT", rename_all = "kebab-case")]
pub enum ComplaintStatus {
    #[default]
    Pending,
    InProgress,
    Resolved,
}

/// Complaint as saved on database.
///
/// Reporter fields are a denormalized snapshot taken at submission, not a
/// foreign key: the report outlives any account change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Complaint {
    pub id: i32,
    pub location: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reporter_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reporter_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub status: ComplaintStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Fields of a complaint being submitted.
#[derive(Clone, Debug, Default)]
pub struct NewComplaint {
    pub location: String,
    pub description: String,
    pub reporter_email: Option<String>,
    pub reporter_name: Option<String>,
    pub image_data: Option<String>,
    pub confidence: Option<f64>,
}

#[derive(Clone)]
pub struct ComplaintRepository {
    pool: Pool<Postgres>,
}

impl ComplaintRepository {
    /// Create a new [`ComplaintRepository`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Persist a complaint with `pending` status.
    pub async fn insert(&self, complaint: &NewComplaint) -> Result<Complaint> {
        Ok(sqlx::query_as::<_, Complaint>(
            r#"INSERT INTO complaints
                (location, description, reporter_email, reporter_name,
                 image_data, confidence)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id, location, description, reporter_email,
                          reporter_name, image_data, confidence, status,
                          created_at"#,
        )
        .bind(&complaint.location)
        .bind(&complaint.description)
        .bind(&complaint.reporter_email)
        .bind(&complaint.reporter_name)
        .bind(&complaint.image_data)
        .bind(complaint.confidence)
        .fetch_one(&self.pool)
        .await?)
    }

    /// List complaints, newest first.
    pub async fn list(&self) -> Result<Vec<Complaint>> {
        Ok(sqlx::query_as::<_, Complaint>(
            r#"SELECT id, location, description, reporter_email,
                      reporter_name, image_data, confidence, status,
                      created_at
                FROM complaints ORDER BY created_at DESC"#,
        )
        .fetch_all(&self.pool)
        .await?)
    }
}
