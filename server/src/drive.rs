use async_std::io::{Cursor, ReadExt};
use chrono::Utc;

use crate::models::TokenBundle;
use crate::{utils, LOG};

/// One entry of the `errors` list in a google api error envelope
#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorDetail {
    pub domain: Option<String>,
    pub reason: Option<String>,
}

#[derive(serde::Deserialize, Debug)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(serde::Deserialize, Debug)]
struct ErrorBody {
    code: Option<u16>,
    message: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("drive api error [{status}]: {message}")]
    Api {
        status: u16,
        code: Option<u16>,
        message: String,
        errors: Vec<ErrorDetail>,
    },
    #[error("drive transport error: {0}")]
    Transport(String),
    #[error("drive response decode error: {0}")]
    Decode(String),
}
impl DriveError {
    fn first_detail(&self) -> Option<&ErrorDetail> {
        match self {
            DriveError::Api { errors, .. } => errors.first(),
            _ => None,
        }
    }

    pub fn domain(&self) -> Option<&str> {
        self.first_detail().and_then(|d| d.domain.as_deref())
    }

    pub fn reason(&self) -> Option<&str> {
        self.first_detail().and_then(|d| d.reason.as_deref())
    }

    /// Decode a non-success drive response body. Bodies that aren't a
    /// google error envelope keep the raw text as the message.
    fn from_response(status: u16, body: &str) -> Self {
        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) => DriveError::Api {
                status,
                code: envelope.error.code,
                message: envelope
                    .error
                    .message
                    .unwrap_or_else(|| "no message".to_string()),
                errors: envelope.error.errors,
            },
            Err(_) => DriveError::Api {
                status,
                code: None,
                message: body.trim().to_string(),
                errors: vec![],
            },
        }
    }
}

#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
}

/// A drive client acting as one user. Built per request from that
/// user's stored token bundle.
pub struct DriveClient {
    upload_url: String,
    token: TokenBundle,
}

impl DriveClient {
    pub fn new(upload_url: &str, token: TokenBundle) -> Self {
        if token.is_expired(Utc::now()) {
            slog::warn!(LOG, "building drive client with an expired access token";
                "expiry" => token.expiry.map(|e| e.to_rfc3339()));
        }
        Self {
            upload_url: upload_url.to_string(),
            token,
        }
    }

    /// Create a file named `name` in the user's drive root, streaming
    /// `media` as its content. `media` is never read into memory whole.
    pub async fn create_file(&self, name: &str, media: surf::Body) -> Result<DriveFile, DriveError> {
        let boundary = format!("tgdrive-{}", uuid::Uuid::new_v4().simple());
        let metadata = serde_json::to_string(&serde_json::json!({ "name": name }))
            .map_err(|e| DriveError::Transport(format!("metadata json error {}", e)))?;
        let mime = media.mime().to_string();
        let head = format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{meta}\r\n--{b}\r\nContent-Type: {mime}\r\n\r\n",
            b = boundary,
            meta = metadata,
            mime = mime,
        );
        let tail = format!("\r\n--{}--\r\n", boundary);
        let len = media.len().map(|n| head.len() + n + tail.len());
        let reader = Cursor::new(head.into_bytes())
            .chain(media)
            .chain(Cursor::new(tail.into_bytes()));

        let url = utils::parse_url(&format!("{}?uploadType=multipart", self.upload_url))
            .map_err(|e| DriveError::Transport(e.to_string()))?;
        let mut resp = surf::RequestBuilder::new(surf::http::Method::Post, url)
            .body(surf::Body::from_reader(reader, len))
            .header("Authorization", self.token.authorization())
            .header(
                "Content-Type",
                format!("multipart/related; boundary={}", boundary),
            )
            .send()
            .await
            .map_err(|e| DriveError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .body_string()
            .await
            .map_err(|e| DriveError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(DriveError::from_response(status as u16, &body));
        }
        serde_json::from_str(&body).map_err(|e| DriveError::Decode(e.to_string()))
    }
}
