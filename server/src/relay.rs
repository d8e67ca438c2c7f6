use crate::drive::{DriveClient, DriveError, DriveFile};
use crate::service::Context;
use crate::telegram::Message;
use crate::{utils, LOG};

/// Telegram bots can't download files larger than this
pub const MAX_DOWNLOAD_BYTES: u64 = 20 * 1024 * 1024;

/// The file a message carries, named the way it will be saved in drive
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub file_id: String,
    pub file_name: String,
    pub file_size: Option<u64>,
}
impl Attachment {
    pub fn from_message(message: &Message) -> Option<Self> {
        if let Some(doc) = &message.document {
            return Some(Self {
                file_id: doc.file_id.clone(),
                file_name: doc
                    .file_name
                    .clone()
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| doc.file_id.clone()),
                file_size: doc.file_size,
            });
        }
        // photos only come as a set of resized variants, keep the biggest
        let photo = message
            .photo
            .iter()
            .max_by_key(|p| (u64::from(p.width) * u64::from(p.height), p.file_size))?;
        Some(Self {
            file_id: photo.file_id.clone(),
            file_name: format!("{}.jpg", photo.file_id),
            file_size: photo.file_size,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("no drive credential for user {0}")]
    NotLinked(i64),
    #[error("credential lookup failed: {0}")]
    CredentialLookup(String),
    #[error("file is {0} bytes, over the download limit")]
    TooLarge(u64),
    #[error("error resolving file url: {0}")]
    ResolveUrl(String),
    #[error("error downloading file: {0}")]
    Download(String),
    #[error(transparent)]
    Upload(#[from] DriveError),
}
impl RelayError {
    pub fn user_message(&self) -> String {
        match self {
            RelayError::NotLinked(_) => {
                "Your Google Drive account is not linked yet. Use /connect_drive to link it."
                    .to_string()
            }
            RelayError::CredentialLookup(_) => {
                "Something went wrong while reading your authorization, please try again later."
                    .to_string()
            }
            RelayError::TooLarge(size) => format!(
                "The file is {:.2} MiB, which is over the 20 MiB limit for files downloaded by Telegram bots, so it can't be processed.",
                utils::mib(*size)
            ),
            RelayError::ResolveUrl(_) => {
                "Couldn't get the file from Telegram, please try again later.".to_string()
            }
            RelayError::Download(_) => {
                "Couldn't download the file, please try again later.".to_string()
            }
            RelayError::Upload(_) => "Uploading to your Google Drive failed.".to_string(),
        }
    }

    fn drive_domain(&self) -> Option<&str> {
        match self {
            RelayError::Upload(e) => e.domain(),
            _ => None,
        }
    }

    fn drive_reason(&self) -> Option<&str> {
        match self {
            RelayError::Upload(e) => e.reason(),
            _ => None,
        }
    }
}

/// Move the file attached to `message` into `user_id`'s drive root.
/// `Ok(None)` means the message had nothing to upload.
pub async fn relay(
    ctx: &Context,
    user_id: i64,
    message: &Message,
) -> Result<Option<DriveFile>, RelayError> {
    let credential = ctx
        .store
        .get_credential(user_id)
        .await
        .map_err(|e| RelayError::CredentialLookup(e.to_string()))?
        .ok_or(RelayError::NotLinked(user_id))?;
    let drive = DriveClient::new(&ctx.config.drive_upload_url, credential.token);

    let attachment = match Attachment::from_message(message) {
        Some(attachment) => attachment,
        None => return Ok(None),
    };
    if let Some(size) = attachment.file_size {
        if size > MAX_DOWNLOAD_BYTES {
            return Err(RelayError::TooLarge(size));
        }
    }

    let url = ctx
        .bot
        .file_direct_url(&attachment.file_id)
        .await
        .map_err(|e| RelayError::ResolveUrl(e.to_string()))?;
    let url = utils::parse_url(&url).map_err(|e| RelayError::ResolveUrl(e.to_string()))?;

    // the download body is handed straight to the upload and dropped
    // with it, whichever way the upload ends
    let mut resp = surf::RequestBuilder::new(surf::http::Method::Get, url)
        .send()
        .await
        .map_err(|e| RelayError::Download(ctx.bot.redact(&e.to_string())))?;
    if !resp.status().is_success() {
        return Err(RelayError::Download(format!(
            "unexpected status {}",
            resp.status()
        )));
    }
    let body = resp.take_body();

    let file = drive.create_file(&attachment.file_name, body).await?;
    Ok(Some(file))
}

/// Relay the file and tell the sender how it went
pub async fn handle_file(ctx: &Context, user_id: i64, message: &Message) {
    let start = std::time::Instant::now();
    let reply = match relay(ctx, user_id, message).await {
        Ok(None) => return,
        Ok(Some(file)) => {
            slog::info!(LOG, "uploaded file to drive";
                "user_id" => user_id,
                "file_name" => &file.name,
                "drive_file_id" => &file.id,
                "duration_ms" => start.elapsed().as_millis() as u64,
            );
            format!(
                "File '{}' was uploaded to your Google Drive!",
                file.name
            )
        }
        Err(e) => {
            match &e {
                RelayError::Upload(DriveError::Api {
                    status,
                    code,
                    message: detail,
                    ..
                }) => slog::error!(LOG, "drive upload failed";
                    "user_id" => user_id,
                    "status" => status,
                    "code" => code,
                    "message" => detail,
                    "domain" => e.drive_domain(),
                    "reason" => e.drive_reason(),
                ),
                RelayError::NotLinked(_) | RelayError::TooLarge(_) => {
                    slog::info!(LOG, "not relaying file: {}", e; "user_id" => user_id)
                }
                _ => slog::error!(LOG, "error relaying file: {}", e; "user_id" => user_id),
            }
            e.user_message()
        }
    };
    if let Err(e) = ctx
        .bot
        .reply(message.chat.id, message.message_id, &reply)
        .await
    {
        slog::error!(LOG, "could not send reply message: {}", e; "user_id" => user_id);
    }
}
