use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_mutex::Mutex;
use chrono::{DateTime, Utc};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::models::{AuthorizationState, TokenBundle, UserCredential};
use crate::service::Context;
use crate::store::Store;
use crate::{se, Config, Result};

pub const BOT_TOKEN: &str = "123:abc";
pub const CLIENT_ID: &str = "client-id.apps.googleusercontent.com";
pub const REDIRECT_URL: &str = "https://bot.example.com/oauth/callback";

pub fn config(base: &str) -> Config {
    Config {
        version: "test".to_string(),
        host: "127.0.0.1".to_string(),
        port: 8080,
        db_url: "postgres://unused".to_string(),
        db_max_connections: 1,
        encryption_key: "01234567890123456789012345678901".to_string(),
        oauth_state_ttl_seconds: 600,
        telegram_bot_token: BOT_TOKEN.to_string(),
        telegram_api_url: base.to_string(),
        google_client_id: CLIENT_ID.to_string(),
        google_client_secret: "client-secret".to_string(),
        google_redirect_url: REDIRECT_URL.to_string(),
        google_auth_url: format!("{}/auth", base),
        google_token_url: format!("{}/token", base),
        drive_upload_url: format!("{}/upload/drive/v3/files", base),
    }
}

pub fn context(base: &str) -> (Context, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (Context::new(config(base), store.clone()), store)
}

pub fn token() -> TokenBundle {
    TokenBundle {
        access_token: "ya29.access".to_string(),
        refresh_token: "1//refresh".to_string(),
        token_type: "Bearer".to_string(),
        expiry: Some(Utc::now() + chrono::Duration::hours(1)),
    }
}

pub fn state_param(url: &str) -> String {
    url::Url::parse(url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

pub async fn mount_send_message(server: &MockServer, expect: u64) {
    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendMessage", BOT_TOKEN)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": {"message_id": 100, "chat": {"id": 42}}
        })))
        .expect(expect)
        .mount(server)
        .await;
}

pub async fn mount_get_file(server: &MockServer, file_id: &str, file_path: &str) {
    Mock::given(method("POST"))
        .and(path(format!("/bot{}/getFile", BOT_TOKEN)))
        .and(body_partial_json(json!({ "file_id": file_id })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": {"file_id": file_id, "file_path": file_path}
        })))
        .expect(1)
        .mount(server)
        .await;
}

/// Fails the test if anything talks to the drive api
pub async fn mount_no_drive_calls(server: &MockServer) {
    Mock::given(path_regex("^/upload/drive/.*"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(server)
        .await;
}

/// Texts of every sendMessage call the server received, oldest first
pub async fn replies(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path().ends_with("/sendMessage"))
        .map(|r| {
            let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
            body["text"].as_str().unwrap().to_string()
        })
        .collect()
}

pub struct MemoryStore {
    states: Mutex<HashMap<String, AuthorizationState>>,
    credentials: Mutex<HashMap<i64, UserCredential>>,
    fail_state_writes: AtomicBool,
    fail_credential_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            credentials: Mutex::new(HashMap::new()),
            fail_state_writes: AtomicBool::new(false),
            fail_credential_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
        }
    }

    pub fn fail_state_writes(&self) {
        self.fail_state_writes.store(true, Ordering::SeqCst);
    }

    pub fn fail_credential_writes(&self) {
        self.fail_credential_writes.store(true, Ordering::SeqCst);
    }

    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    pub async fn state_count(&self) -> usize {
        self.states.lock().await.len()
    }

    fn check(flag: &AtomicBool) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(se!("store unavailable").into());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn put_state(&self, state: &AuthorizationState) -> Result<()> {
        Self::check(&self.fail_state_writes)?;
        self.states
            .lock()
            .await
            .insert(state.state_token.clone(), state.clone());
        Ok(())
    }

    async fn take_state(&self, state_token: &str) -> Result<Option<AuthorizationState>> {
        Ok(self.states.lock().await.remove(state_token))
    }

    async fn put_credential(&self, user_id: i64, token: &TokenBundle) -> Result<UserCredential> {
        Self::check(&self.fail_credential_writes)?;
        let credential = UserCredential {
            user_id,
            token: token.clone(),
            created_at: Utc::now(),
        };
        self.credentials
            .lock()
            .await
            .insert(user_id, credential.clone());
        Ok(credential)
    }

    async fn get_credential(&self, user_id: i64) -> Result<Option<UserCredential>> {
        Self::check(&self.fail_reads)?;
        Ok(self.credentials.lock().await.get(&user_id).cloned())
    }

    async fn purge_states(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut states = self.states.lock().await;
        let n = states.len();
        states.retain(|_, s| s.created_at >= before);
        Ok((n - states.len()) as u64)
    }
}
