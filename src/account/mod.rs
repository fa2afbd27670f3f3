mod repository;

pub use repository::*;

use serde::{Deserialize, Serialize};

/// How an account authenticates.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum AuthProvider {
    /// Email and password held by this service.
    #[default]
    Local,
    /// Google OAuth.
    Google,
    /// Microsoft OAuth.
    Microsoft,
}

impl AuthProvider {
    /// Column holding the provider-specific external id.
    pub fn external_id_column(&self) -> Option<&'static str> {
        match self {
            AuthProvider::Local => None,
            AuthProvider::Google => Some("google_id"),
            AuthProvider::Microsoft => Some("microsoft_id"),
        }
    }
}

impl std::fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AuthProvider::Local => write!(f, "local"),
            AuthProvider::Google => write!(f, "google"),
            AuthProvider::Microsoft => write!(f, "microsoft"),
        }
    }
}

impl std::str::FromStr for AuthProvider {
    type Err = crate::error::ServerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "google" => Ok(AuthProvider::Google),
            "microsoft" => Ok(AuthProvider::Microsoft),
            _ => Err(crate::error::ServerError::NotFound {
                resource: "provider",
            }),
        }
    }
}

/// Account as saved on database.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    /// Primary key.
    pub id: i32,
    /// Display name.
    pub name: String,
    /// Unique email address.
    pub email: String,
    /// Argon2 password hash; `None` for OAuth-only accounts.
    #[serde(skip)]
    pub password: Option<String>,
    /// How the account authenticates.
    pub auth_provider: AuthProvider,
    /// Whether the email has been verified.
    pub verified: bool,
    /// Google external id, if linked.
    #[serde(skip)]
    pub google_id: Option<String>,
    /// Microsoft external id, if linked.
    #[serde(skip)]
    pub microsoft_id: Option<String>,
    /// URL of the profile picture, if any.
    pub profile_picture: Option<String>,
    /// Creation timestamp.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Last update timestamp.
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Sanitized [`Account`] exposed to callers. Never carries the hash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    /// Primary key.
    pub id: i32,
    /// Display name.
    pub name: String,
    /// Unique email address.
    pub email: String,
    /// Whether the email has been verified.
    pub verified: bool,
    /// How the account authenticates.
    pub auth_provider: AuthProvider,
    /// URL of the profile picture, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
}

impl From<Account> for AccountView {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            name: account.name,
            email: account.email,
            verified: account.verified,
            auth_provider: account.auth_provider,
            profile_picture: account.profile_picture,
        }
    }
}

/// OAuth profile normalized into one shape, tagged by provider.
///
/// Providers return differently shaped payloads; everything past the
/// routing layer only ever sees this.
#[derive(Clone, Debug, PartialEq)]
pub struct Profile {
    /// Provider that issued this profile.
    pub provider: AuthProvider,
    /// Provider-specific account id.
    pub external_id: String,
    /// Email address reported by the provider.
    pub email: String,
    /// Display name reported by the provider.
    pub name: String,
    /// Profile picture URL, if the provider supplied one.
    pub picture: Option<String>,
}
