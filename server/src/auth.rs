use chrono::{Duration, Utc};

use crate::models::{AuthorizationState, UserCredential};
use crate::service::Context;
use crate::{crypto, Result, LOG};

#[derive(Debug, Default, serde::Deserialize)]
pub struct AuthCallback {
    pub state: Option<String>,
    pub code: Option<String>,
    // set by google instead of `code` when the user declines
    pub error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid or already used state token")]
    InvalidState,
    #[error("state token for user {0} expired")]
    ExpiredState(i64),
    #[error("authorization denied: {0}")]
    Denied(String),
    #[error("missing authorization code")]
    MissingCode,
    #[error("token exchange failed: {0}")]
    Exchange(String),
    #[error("credential store error: {0}")]
    Store(String),
}
impl AuthError {
    pub fn status(&self) -> u16 {
        match self {
            AuthError::InvalidState
            | AuthError::ExpiredState(_)
            | AuthError::Denied(_)
            | AuthError::MissingCode => 400,
            AuthError::Exchange(_) | AuthError::Store(_) => 500,
        }
    }

    /// What the browser gets to see
    pub fn public_message(&self) -> &'static str {
        match self {
            AuthError::InvalidState => "Invalid state parameter. Please request a new link with /connect_drive.",
            AuthError::ExpiredState(_) => "This authorization link has expired. Please request a new one with /connect_drive.",
            AuthError::Denied(_) => "Authorization was not granted.",
            AuthError::MissingCode => "Missing authorization code.",
            AuthError::Exchange(_) => "Failed to exchange token.",
            AuthError::Store(_) => "Failed to save token.",
        }
    }
}

/// Issue a state token for `user_id` and return the google consent url
pub async fn initiate_authorization(ctx: &Context, user_id: i64) -> Result<String> {
    let state = AuthorizationState {
        state_token: crypto::new_state_token()?,
        user_id,
        created_at: Utc::now(),
    };
    ctx.store.put_state(&state).await?;

    let cutoff = Utc::now() - Duration::seconds(ctx.config.oauth_state_ttl_seconds);
    match ctx.store.purge_states(cutoff).await {
        Ok(n) if n > 0 => slog::debug!(LOG, "purged expired oauth states"; "count" => n),
        Ok(_) => (),
        Err(e) => slog::warn!(LOG, "error purging expired oauth states, continuing: {}", e),
    }

    slog::info!(LOG, "issued oauth state token"; "user_id" => user_id);
    ctx.oauth.authorization_url(&state.state_token)
}

/// Google redirects the browser back with the `state` we issued and an
/// authorization `code`. The state is removed from the store before
/// anything else happens, so it can be redeemed at most once no matter
/// how the callback ends. The code is then exchanged for the user's
/// drive credentials.
pub async fn handle_callback(
    ctx: &Context,
    callback: &AuthCallback,
) -> std::result::Result<UserCredential, AuthError> {
    let token = callback
        .state
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or(AuthError::InvalidState)?;
    let state = ctx
        .store
        .take_state(token)
        .await
        .map_err(|e| AuthError::Store(e.to_string()))?
        .ok_or(AuthError::InvalidState)?;

    let age = Utc::now() - state.created_at;
    if age > Duration::seconds(ctx.config.oauth_state_ttl_seconds) {
        return Err(AuthError::ExpiredState(state.user_id));
    }
    if let Some(error) = &callback.error {
        return Err(AuthError::Denied(error.clone()));
    }
    let code = callback
        .code
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or(AuthError::MissingCode)?;

    let token = ctx
        .oauth
        .exchange_code(code)
        .await
        .map_err(|e| AuthError::Exchange(e.to_string()))?;
    let credential = ctx
        .store
        .put_credential(state.user_id, &token)
        .await
        .map_err(|e| AuthError::Store(e.to_string()))?;

    slog::info!(LOG, "saved drive credential"; "user_id" => state.user_id);
    Ok(credential)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::testing;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn callback(state: &str, code: &str) -> AuthCallback {
        AuthCallback {
            state: Some(state.to_string()),
            code: Some(code.to_string()),
            error: None,
        }
    }

    async fn mount_token_endpoint(server: &MockServer, code: &str, expect: u64) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains(format!("code={}", code)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "ya29.access",
                "refresh_token": "1//refresh",
                "token_type": "Bearer",
                "expires_in": 3599,
            })))
            .expect(expect)
            .mount(server)
            .await;
    }

    #[async_std::test]
    async fn issued_state_redeems_exactly_once() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, "code-1", 1).await;
        let (ctx, store) = testing::context(&server.uri());

        let url = initiate_authorization(&ctx, 42).await.unwrap();
        let state = testing::state_param(&url);
        assert_eq!(store.state_count().await, 1);

        let credential = handle_callback(&ctx, &callback(&state, "code-1"))
            .await
            .unwrap();
        assert_eq!(credential.user_id, 42);
        assert_eq!(credential.token.access_token, "ya29.access");
        assert_eq!(credential.token.refresh_token, "1//refresh");
        assert_eq!(store.state_count().await, 0);

        let err = handle_callback(&ctx, &callback(&state, "code-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidState));
        assert_eq!(err.status(), 400);
    }

    #[async_std::test]
    async fn unknown_state_is_rejected_without_exchange() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, "code-1", 0).await;
        let (ctx, store) = testing::context(&server.uri());

        let err = handle_callback(&ctx, &callback("forged", "code-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidState));

        let err = handle_callback(&ctx, &AuthCallback::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidState));
        assert!(store.get_credential(42).await.unwrap().is_none());
    }

    #[async_std::test]
    async fn expired_state_is_consumed_and_rejected() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, "code-1", 0).await;
        let (ctx, store) = testing::context(&server.uri());

        store
            .put_state(&AuthorizationState {
                state_token: "old".to_string(),
                user_id: 42,
                created_at: Utc::now() - Duration::hours(1),
            })
            .await
            .unwrap();

        let err = handle_callback(&ctx, &callback("old", "code-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ExpiredState(42)));
        assert_eq!(store.state_count().await, 0);
        assert!(store.get_credential(42).await.unwrap().is_none());
    }

    #[async_std::test]
    async fn failed_exchange_persists_nothing_and_burns_state() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant"
            })))
            .expect(1)
            .mount(&server)
            .await;
        let (ctx, store) = testing::context(&server.uri());

        let state = testing::state_param(&initiate_authorization(&ctx, 42).await.unwrap());
        let err = handle_callback(&ctx, &callback(&state, "bad"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Exchange(_)));
        assert_eq!(err.status(), 500);
        assert!(store.get_credential(42).await.unwrap().is_none());

        let err = handle_callback(&ctx, &callback(&state, "bad"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidState));
    }

    #[async_std::test]
    async fn denied_consent_consumes_state() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, "code-1", 0).await;
        let (ctx, store) = testing::context(&server.uri());

        let state = testing::state_param(&initiate_authorization(&ctx, 42).await.unwrap());
        let err = handle_callback(
            &ctx,
            &AuthCallback {
                state: Some(state),
                code: None,
                error: Some("access_denied".to_string()),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::Denied(_)));
        assert_eq!(store.state_count().await, 0);
    }

    #[async_std::test]
    async fn state_write_failure_is_an_error() {
        let (ctx, store) = testing::context("http://127.0.0.1:1");
        store.fail_state_writes();
        assert!(initiate_authorization(&ctx, 42).await.is_err());
    }

    #[async_std::test]
    async fn credential_write_failure_after_exchange_is_server_error() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, "code-1", 1).await;
        let (ctx, store) = testing::context(&server.uri());

        let state = testing::state_param(&initiate_authorization(&ctx, 42).await.unwrap());
        store.fail_credential_writes();
        let err = handle_callback(&ctx, &callback(&state, "code-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Store(_)));
        assert_eq!(err.status(), 500);
        assert_eq!(err.public_message(), "Failed to save token.");
        assert_eq!(store.state_count().await, 0);
        assert!(store.get_credential(42).await.unwrap().is_none());
    }
}
