use chrono::{DateTime, Utc};

#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct AuthorizationState {
    // single-use csrf nonce sent to google as the `state` parameter
    pub state_token: String,
    // telegram user id that asked for the authorization link
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

/// The oauth token bundle returned by google's token endpoint.
#[derive(Clone, PartialEq)]
pub struct TokenBundle {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    // `None` when the provider didn't report an expiration
    pub expiry: Option<DateTime<Utc>>,
}
impl TokenBundle {
    /// `Authorization` header value. Google reports the type as
    /// "Bearer" but some servers send it lowercase.
    pub fn authorization(&self) -> String {
        let kind = match self.token_type.to_lowercase().as_str() {
            "" | "bearer" => "Bearer".to_string(),
            "mac" => "MAC".to_string(),
            "basic" => "Basic".to_string(),
            _ => self.token_type.clone(),
        };
        format!("{} {}", kind, self.access_token)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.map(|exp| exp <= now).unwrap_or(false)
    }
}
impl std::fmt::Debug for TokenBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBundle")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expiry", &self.expiry)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserCredential {
    pub user_id: i64,
    pub token: TokenBundle,
    pub created_at: DateTime<Utc>,
}

/// A `user_credentials` row. The access and refresh tokens are
/// stored as an encrypted json `SealedTokens` blob.
#[derive(sqlx::FromRow, Debug)]
pub struct CredentialRow {
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub token_type: String,
    pub expiry: Option<DateTime<Utc>>,
    pub nonce: String,
    pub salt: String,
    pub encrypted: String,
}

#[derive(serde::Serialize, serde::Deserialize)]
pub struct SealedTokens {
    pub access_token: String,
    pub refresh_token: String,
}
