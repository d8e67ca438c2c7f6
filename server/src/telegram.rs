use crate::{se, Result};

#[derive(serde::Deserialize, Debug, Clone)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct Chat {
    pub id: i64,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: usize,
    pub length: usize,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct Document {
    pub file_id: String,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    pub file_size: Option<u64>,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
    #[serde(default)]
    pub entities: Vec<MessageEntity>,
    pub document: Option<Document>,
    #[serde(default)]
    pub photo: Vec<PhotoSize>,
}
impl Message {
    /// The bot command this message starts with, without the leading
    /// slash or a trailing `@botname`.
    pub fn command(&self) -> Option<&str> {
        lazy_static::lazy_static! {
            static ref COMMAND_RE: regex::Regex =
                regex::Regex::new(r"^/([A-Za-z0-9_]+)(?:@[A-Za-z0-9_]+)?$").unwrap();
        }
        let entity = self.entities.first()?;
        if entity.kind != "bot_command" || entity.offset != 0 {
            return None;
        }
        // entity offsets are in utf-16 code units, commands are ascii
        let text = self.text.as_deref()?;
        let raw = text.get(..entity.length)?;
        COMMAND_RE
            .captures(raw)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }

    pub fn has_attachment(&self) -> bool {
        self.document.is_some() || !self.photo.is_empty()
    }
}

#[derive(serde::Deserialize, Debug)]
pub struct File {
    pub file_id: String,
    pub file_path: Option<String>,
}

#[derive(serde::Deserialize, Debug)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}
impl<T> ApiResponse<T> {
    fn into_result(self, method: &str) -> Result<T> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(se!(
                "telegram {} failed [{}]: {}",
                method,
                self.error_code.unwrap_or_default(),
                self.description.unwrap_or_else(|| "no description".to_string())
            )
            .into()),
        }
    }
}

/// Telegram bot api client. The token is part of every url so
/// urls built here must never be logged as-is.
#[derive(Clone)]
pub struct Bot {
    api_url: String,
    token: String,
}

impl Bot {
    pub fn new(api_url: &str, token: &str) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: &serde_json::Value,
    ) -> Result<T> {
        let url = crate::utils::parse_url(&self.method_url(method))
            .map_err(|e| se!("telegram {} url: {}", method, self.redact(&e.to_string())))?;
        let mut resp = surf::RequestBuilder::new(surf::http::Method::Post, url)
            .body(
                surf::Body::from_json(params)
                    .map_err(|e| se!("telegram {} body error {}", method, e))?,
            )
            .send()
            .await
            .map_err(|e| se!("telegram {} request failed: {}", method, self.redact(&e.to_string())))?;
        let parsed: ApiResponse<T> = resp
            .body_json()
            .await
            .map_err(|e| se!("telegram {} parse error {}", method, e))?;
        parsed.into_result(method)
    }

    pub async fn get_me(&self) -> Result<User> {
        self.call("getMe", &serde_json::json!({})).await
    }

    pub async fn get_file(&self, file_id: &str) -> Result<File> {
        self.call("getFile", &serde_json::json!({ "file_id": file_id }))
            .await
    }

    /// A short-lived url the file bytes can be downloaded from
    pub async fn file_direct_url(&self, file_id: &str) -> Result<String> {
        let file = self.get_file(file_id).await?;
        let path = file
            .file_path
            .ok_or_else(|| se!("telegram returned no file_path for {}", file.file_id))?;
        Ok(format!("{}/file/bot{}/{}", self.api_url, self.token, path))
    }

    pub async fn reply(&self, chat_id: i64, reply_to: i64, text: &str) -> Result<()> {
        let _: serde_json::Value = self
            .call(
                "sendMessage",
                &serde_json::json!({
                    "chat_id": chat_id,
                    "text": text,
                    "reply_to_message_id": reply_to,
                    "allow_sending_without_reply": true,
                }),
            )
            .await?;
        Ok(())
    }

    /// Strip the bot token out of anything that might end up in a log line
    pub fn redact(&self, s: &str) -> String {
        crate::utils::redact(s, &self.token)
    }
}
