use chrono::Utc;

use crate::models::TokenBundle;
use crate::{se, utils, Config, Result};

/// Only lets the bot see and create files it uploaded itself
pub const DRIVE_FILE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

#[derive(serde::Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    token_type: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(serde::Deserialize, Debug)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

#[derive(serde::Serialize)]
struct CodeExchangeParams<'a> {
    grant_type: &'a str,
    code: &'a str,
    redirect_uri: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Clone)]
pub struct OAuthClient {
    client_id: String,
    client_secret: String,
    redirect_url: String,
    auth_url: String,
    token_url: String,
}

impl OAuthClient {
    pub fn from_config(config: &Config) -> Self {
        Self {
            client_id: config.google_client_id.clone(),
            client_secret: config.google_client_secret.clone(),
            redirect_url: config.google_redirect_url.clone(),
            auth_url: config.google_auth_url.clone(),
            token_url: config.google_token_url.clone(),
        }
    }

    /// The consent page url. Asks for offline access and forces the
    /// consent prompt so google hands out a refresh token every time.
    pub fn authorization_url(&self, state: &str) -> Result<String> {
        let mut url = utils::parse_url(&self.auth_url)?;
        url.query_pairs_mut()
            .append_pair("access_type", "offline")
            .append_pair("client_id", &self.client_id)
            .append_pair("prompt", "consent")
            .append_pair("redirect_uri", &self.redirect_url)
            .append_pair("response_type", "code")
            .append_pair("scope", DRIVE_FILE_SCOPE)
            .append_pair("state", state);
        Ok(url.into())
    }

    pub async fn exchange_code(&self, code: &str) -> Result<TokenBundle> {
        let url = utils::parse_url(&self.token_url)?;
        let params = CodeExchangeParams {
            grant_type: "authorization_code",
            code,
            redirect_uri: &self.redirect_url,
            client_id: &self.client_id,
            client_secret: &self.client_secret,
        };
        let mut resp = surf::RequestBuilder::new(surf::http::Method::Post, url)
            .header("Accept", "application/json")
            .body(
                surf::Body::from_form(&params)
                    .map_err(|e| se!("exchange access form error {}", e))?,
            )
            .send()
            .await
            .map_err(|e| se!("token request error {}", e))?;
        let status = resp.status();
        let body = resp
            .body_string()
            .await
            .map_err(|e| se!("token response read error {}", e))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<TokenErrorResponse>(&body)
                .map(|e| match e.error_description {
                    Some(desc) => format!("{}: {}", e.error, desc),
                    None => e.error,
                })
                .unwrap_or(body);
            return Err(se!("error exchanging google authorization code [{}] {}", status, detail).into());
        }

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| se!("token json parse error {}", e))?;
        Ok(TokenBundle {
            access_token: token.access_token,
            refresh_token: token.refresh_token.unwrap_or_default(),
            token_type: token.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expiry: utils::expiry_after(Utc::now(), token.expires_in),
        })
    }
}
