//! Handle database requests for accounts.

use sqlx::{Pool, Postgres};

use crate::account::{Account, AuthProvider, Profile};
use crate::error::{Result, ServerError};

const COLUMNS: &str = "id, name, email, password, auth_provider, verified, \
                       google_id, microsoft_id, profile_picture, \
                       created_at, updated_at";

/// Database access for [`Account`] rows.
#[derive(Clone)]
pub struct AccountRepository {
    pool: Pool<Postgres>,
}

impl AccountRepository {
    /// Create a new [`AccountRepository`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Insert an unverified local account.
    ///
    /// A uniqueness violation on email means another signup won the race;
    /// it is reported as a conflict, never as a fatal error.
    pub async fn insert_local(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<Account> {
        let query = format!(
            r#"INSERT INTO accounts (name, email, password, auth_provider)
                VALUES ($1, $2, $3, $4)
                RETURNING {COLUMNS}"#
        );

        sqlx::query_as::<_, Account>(&query)
            .bind(name)
            .bind(email)
            .bind(password_hash)
            .bind(AuthProvider::Local)
            .fetch_one(&self.pool)
            .await
            .map_err(conflict_on_unique_violation)
    }

    /// Find an account using its `id` field.
    pub async fn find_by_id(&self, id: i32) -> Result<Option<Account>> {
        let query = format!("SELECT {COLUMNS} FROM accounts WHERE id = $1");

        Ok(sqlx::query_as::<_, Account>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Find an account using its `email` field.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let query = format!("SELECT {COLUMNS} FROM accounts WHERE email = $1");

        Ok(sqlx::query_as::<_, Account>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Find an account using a provider-specific external id.
    pub async fn find_by_external_id(
        &self,
        provider: AuthProvider,
        external_id: &str,
    ) -> Result<Option<Account>> {
        let column = provider.external_id_column().ok_or_else(|| {
            ServerError::Internal {
                details: "local accounts have no external id".into(),
            }
        })?;
        let query =
            format!("SELECT {COLUMNS} FROM accounts WHERE {column} = $1");

        Ok(sqlx::query_as::<_, Account>(&query)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Flip `verified` to true. Terminal: nothing ever flips it back.
    pub async fn mark_verified(&self, id: i32) -> Result<()> {
        sqlx::query(
            r#"UPDATE accounts SET verified = TRUE, updated_at = NOW()
                WHERE id = $1"#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Attach a provider identity to an existing account and mark it
    /// verified.
    async fn link_provider(
        &self,
        id: i32,
        profile: &Profile,
    ) -> Result<Account> {
        let column = profile.provider.external_id_column().ok_or_else(|| {
            ServerError::Internal {
                details: "local accounts have no external id".into(),
            }
        })?;
        let query = format!(
            r#"UPDATE accounts
                SET {column} = $1,
                    auth_provider = $2,
                    verified = TRUE,
                    profile_picture = COALESCE($3, profile_picture),
                    updated_at = NOW()
                WHERE id = $4
                RETURNING {COLUMNS}"#
        );

        Ok(sqlx::query_as::<_, Account>(&query)
            .bind(&profile.external_id)
            .bind(profile.provider)
            .bind(&profile.picture)
            .bind(id)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn insert_oauth(&self, profile: &Profile) -> Result<Account> {
        let column = profile.provider.external_id_column().ok_or_else(|| {
            ServerError::Internal {
                details: "local accounts have no external id".into(),
            }
        })?;
        let query = format!(
            r#"INSERT INTO accounts
                (name, email, auth_provider, verified, {column}, profile_picture)
                VALUES ($1, $2, $3, TRUE, $4, $5)
                RETURNING {COLUMNS}"#
        );

        sqlx::query_as::<_, Account>(&query)
            .bind(&profile.name)
            .bind(&profile.email)
            .bind(profile.provider)
            .bind(&profile.external_id)
            .bind(&profile.picture)
            .fetch_one(&self.pool)
            .await
            .map_err(conflict_on_unique_violation)
    }

    /// Resolve an OAuth callback profile into an account.
    ///
    /// Returning user by external id, else link onto the account owning
    /// the email, else create a pre-verified account. Idempotent on the
    /// external id.
    pub async fn find_or_create(&self, profile: &Profile) -> Result<Account> {
        if let Some(account) = self
            .find_by_external_id(profile.provider, &profile.external_id)
            .await?
        {
            return Ok(account);
        }

        if let Some(account) = self.find_by_email(&profile.email).await? {
            return self.link_provider(account.id, profile).await;
        }

        match self.insert_oauth(profile).await {
            Ok(account) => Ok(account),
            // Lost a creation race: the other request owns the row now.
            Err(ServerError::EmailTaken { .. }) => {
                if let Some(account) = self
                    .find_by_external_id(profile.provider, &profile.external_id)
                    .await?
                {
                    return Ok(account);
                }
                match self.find_by_email(&profile.email).await? {
                    Some(account) => {
                        self.link_provider(account.id, profile).await
                    },
                    None => Err(ServerError::Internal {
                        details: "oauth account vanished during linking".into(),
                    }),
                }
            },
            Err(err) => Err(err),
        }
    }

    /// Remove an account. Only used as signup rollback when the
    /// verification email cannot be dispatched.
    pub async fn delete_by_email(&self, email: &str) -> Result<()> {
        sqlx::query("DELETE FROM accounts WHERE email = $1")
            .bind(email)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn conflict_on_unique_violation(err: sqlx::Error) -> ServerError {
    match err.as_database_error() {
        Some(db) if db.is_unique_violation() => ServerError::EmailTaken {
            needs_verification: false,
        },
        _ => err.into(),
    }
}
