use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{AuthorizationState, CredentialRow, SealedTokens, TokenBundle, UserCredential};
use crate::{crypto, se, Result};

/// Persistence for oauth states and per-user drive credentials.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn put_state(&self, state: &AuthorizationState) -> Result<()>;

    /// Removes and returns the state for `state_token`. A token can
    /// only ever be taken once.
    async fn take_state(&self, state_token: &str) -> Result<Option<AuthorizationState>>;

    /// Insert or overwrite the credential for `user_id`.
    async fn put_credential(&self, user_id: i64, token: &TokenBundle) -> Result<UserCredential>;

    async fn get_credential(&self, user_id: i64) -> Result<Option<UserCredential>>;

    /// Drop states issued before `before`, returning how many were removed.
    async fn purge_states(&self, before: DateTime<Utc>) -> Result<u64>;
}

pub struct PgStore {
    pool: PgPool,
    encryption_key: String,
}

impl PgStore {
    pub fn new(pool: PgPool, encryption_key: String) -> Self {
        Self {
            pool,
            encryption_key,
        }
    }

    fn open(&self, row: CredentialRow) -> Result<UserCredential> {
        let json = crypto::decrypt(
            &self.encryption_key,
            &crypto::Enc {
                value: row.encrypted,
                salt: row.salt,
                nonce: row.nonce,
            },
        )?;
        let sealed: SealedTokens = serde_json::from_str(&json)
            .map_err(|e| se!("credential json error for user {} {}", row.user_id, e))?;
        Ok(UserCredential {
            user_id: row.user_id,
            created_at: row.created_at,
            token: TokenBundle {
                access_token: sealed.access_token,
                refresh_token: sealed.refresh_token,
                token_type: row.token_type,
                expiry: row.expiry,
            },
        })
    }
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn put_state(&self, state: &AuthorizationState) -> Result<()> {
        sqlx::query(
            "
            insert into
            tgdrive.oauth_states (
                state_token, user_id, created_at
            )
            values ($1, $2, $3)
            ",
        )
        .bind(&state.state_token)
        .bind(state.user_id)
        .bind(state.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| se!("error inserting oauth state {:?}", e))?;
        Ok(())
    }

    async fn take_state(&self, state_token: &str) -> Result<Option<AuthorizationState>> {
        let state = sqlx::query_as::<_, AuthorizationState>(
            "
            delete from tgdrive.oauth_states
            where state_token = $1
            returning state_token, user_id, created_at
            ",
        )
        .bind(state_token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| se!("error taking oauth state {:?}", e))?;
        Ok(state)
    }

    async fn put_credential(&self, user_id: i64, token: &TokenBundle) -> Result<UserCredential> {
        let sealed = serde_json::to_string(&SealedTokens {
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
        })
        .map_err(|e| se!("credential json error {}", e))?;
        let enc = crypto::encrypt(&self.encryption_key, &sealed)?;

        let row = sqlx::query_as::<_, CredentialRow>(
            "
            insert into
            tgdrive.user_credentials (
                user_id, token_type, expiry, nonce, salt, encrypted
            ) values (
                $1, $2, $3, $4, $5, $6
            ) on conflict (user_id) do update
                set token_type = excluded.token_type, expiry = excluded.expiry,
                    nonce = excluded.nonce, salt = excluded.salt,
                    encrypted = excluded.encrypted, created_at = now(),
                    modified = now()
            returning *
            ",
        )
        .bind(user_id)
        .bind(&token.token_type)
        .bind(token.expiry)
        .bind(&enc.nonce)
        .bind(&enc.salt)
        .bind(&enc.value)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| se!("failed to upsert credential for user {} {:?}", user_id, e))?;
        self.open(row)
    }

    async fn get_credential(&self, user_id: i64) -> Result<Option<UserCredential>> {
        let row = sqlx::query_as::<_, CredentialRow>(
            "select * from tgdrive.user_credentials where user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| se!("db error {}", e))?;
        row.map(|row| self.open(row)).transpose()
    }

    async fn purge_states(&self, before: DateTime<Utc>) -> Result<u64> {
        let res = sqlx::query("delete from tgdrive.oauth_states where created_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await
            .map_err(|e| se!("error purging oauth states {:?}", e))?;
        Ok(res.rows_affected())
    }
}
