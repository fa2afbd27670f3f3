//! One-time passcode store.
//!
//! One outstanding code per email: a resend replaces the previous code in
//! a single upsert, so two codes are never valid at the same time. Codes
//! older than [`OTP_TTL_SECONDS`] are treated as absent by every read; a
//! background sweeper removes the stale rows.

use std::time::Duration;

use rand::Rng;
use rand::rngs::OsRng;
use sqlx::{PgPool, Pool, Postgres};

use crate::error::Result;

/// Number of digits of a code.
pub const OTP_LENGTH: usize = 6;
/// Validity window of a code, seconds.
pub const OTP_TTL_SECONDS: u64 = 600;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Passcode persistence manager.
#[derive(Clone)]
pub struct OtpStore {
    pool: Pool<Postgres>,
}

impl OtpStore {
    /// Create a new [`OtpStore`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Generate a uniform 6-digit numeric code, leading zeros kept.
    pub fn generate() -> String {
        let code: u32 = OsRng.gen_range(0..1_000_000);
        format!("{code:06}")
    }

    /// Store a fresh code for `email`, atomically replacing any
    /// outstanding one.
    pub async fn replace(&self, email: &str, code: &str) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO otp_codes (email, code, created_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (email)
                DO UPDATE SET code = EXCLUDED.code, created_at = NOW()"#,
        )
        .bind(email)
        .bind(code)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Whether an unexpired code matching both email and code exists.
    pub async fn is_valid(&self, email: &str, code: &str) -> Result<bool> {
        let row = sqlx::query(
            r#"SELECT 1 AS one FROM otp_codes
                WHERE email = $1 AND code = $2
                AND created_at > NOW() - ($3 * INTERVAL '1 second')"#,
        )
        .bind(email)
        .bind(code)
        .bind(OTP_TTL_SECONDS as f64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    /// Delete a consumed code. Single-use: the guarded delete ensures a
    /// code is burned at most once even under concurrent attempts.
    pub async fn consume(&self, email: &str, code: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"DELETE FROM otp_codes
                WHERE email = $1 AND code = $2
                AND created_at > NOW() - ($3 * INTERVAL '1 second')"#,
        )
        .bind(email)
        .bind(code)
        .bind(OTP_TTL_SECONDS as f64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Drop any outstanding code for `email`, expired or not.
    pub async fn remove(&self, email: &str) -> Result<()> {
        sqlx::query("DELETE FROM otp_codes WHERE email = $1")
            .bind(email)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Remove expired codes. Returns the number of rows purged.
    pub async fn sweep(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"DELETE FROM otp_codes
                WHERE created_at <= NOW() - ($1 * INTERVAL '1 second')"#,
        )
        .bind(OTP_TTL_SECONDS as f64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// Spawn the periodic expiry sweep.
pub fn spawn_sweeper(pool: PgPool) {
    let store = OtpStore::new(pool);

    tokio::spawn(async move {
        loop {
            match store.sweep().await {
                Ok(0) => {},
                Ok(purged) => {
                    tracing::debug!(purged, "expired otp codes removed")
                },
                Err(err) => {
                    tracing::error!(error = %err, "otp sweep failed")
                },
            }

            tokio::time::sleep(SWEEP_INTERVAL).await;
        }
    });
}
