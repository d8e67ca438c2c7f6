use std::sync::Arc;

use crate::auth::{self, AuthCallback};
use crate::google::OAuthClient;
use crate::store::Store;
use crate::telegram::{self, Message};
use crate::{relay, resp, Config, Result, LOG};

pub const HELP_TEXT: &str = "Welcome! Use /connect_drive to link your Google Drive, \
then send me any document or photo and I'll save it to your Drive.";
pub const PROMPT_TEXT: &str = "Please send a file, or use /connect_drive to link your Google Drive.";
pub const UNKNOWN_COMMAND_TEXT: &str = "Unrecognized command.";
pub const AUTHORIZE_FAILED_TEXT: &str =
    "Something went wrong while creating your authorization link, please try again later.";
pub const CALLBACK_SUCCESS_TEXT: &str =
    "Authorization complete! You can go back to Telegram and send files to the bot.";

/// Everything a handler needs, built once at startup
#[derive(Clone)]
pub struct Context {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub bot: telegram::Bot,
    pub oauth: OAuthClient,
}

impl Context {
    pub fn new(config: Config, store: Arc<dyn Store>) -> Self {
        Self {
            bot: telegram::Bot::new(&config.telegram_api_url, &config.telegram_bot_token),
            oauth: OAuthClient::from_config(&config),
            config: Arc::new(config),
            store,
        }
    }
}

pub fn build(ctx: Context) -> tide::Server<Context> {
    let mut app = tide::with_state(ctx);
    app.at("/").post(webhook);
    app.at("/status").get(status);
    app.at("/oauth/callback").get(oauth_callback);
    app.with(crate::logging::LogMiddleware::new());
    app
}

pub async fn start(ctx: Context) -> Result<()> {
    let addr = ctx.config.listen_addr();
    let app = build(ctx);
    slog::info!(LOG, "running at {}", addr);
    app.listen(addr).await?;
    Ok(())
}

enum Route<'a> {
    Command(&'a str),
    Attachment,
    Text,
}

fn route(message: &Message) -> Route<'_> {
    if let Some(cmd) = message.command() {
        Route::Command(cmd)
    } else if message.has_attachment() {
        Route::Attachment
    } else {
        Route::Text
    }
}

async fn reply(ctx: &Context, message: &Message, text: &str) {
    if let Err(e) = ctx
        .bot
        .reply(message.chat.id, message.message_id, text)
        .await
    {
        slog::error!(LOG, "could not send reply message: {}", e; "chat_id" => message.chat.id);
    }
}

async fn connect_drive(ctx: &Context, message: &Message) {
    let user_id = match &message.from {
        Some(user) => user.id,
        None => {
            slog::debug!(LOG, "ignoring /connect_drive without a sender");
            return;
        }
    };
    match auth::initiate_authorization(ctx, user_id).await {
        Ok(url) => {
            let text = format!(
                "Open this link to let the bot upload files to your Google Drive \
(it only gets access to files it creates):\n\n{}",
                url
            );
            reply(ctx, message, &text).await;
        }
        Err(e) => {
            slog::error!(LOG, "error starting authorization: {}", e; "user_id" => user_id);
            reply(ctx, message, AUTHORIZE_FAILED_TEXT).await;
        }
    }
}

pub async fn dispatch(ctx: &Context, message: &Message) {
    match route(message) {
        Route::Command("start") | Route::Command("help") => reply(ctx, message, HELP_TEXT).await,
        Route::Command("connect_drive") => connect_drive(ctx, message).await,
        Route::Command(other) => {
            slog::info!(LOG, "unrecognized command {:?}", other; "chat_id" => message.chat.id);
            reply(ctx, message, UNKNOWN_COMMAND_TEXT).await
        }
        Route::Attachment => match &message.from {
            Some(user) => relay::handle_file(ctx, user.id, message).await,
            None => slog::debug!(LOG, "ignoring attachment without a sender"),
        },
        Route::Text => reply(ctx, message, PROMPT_TEXT).await,
    }
}

/// Telegram posts every update for the bot here. Anything that decodes
/// gets a 200, failures are reported back to the user in the chat.
async fn webhook(mut req: tide::Request<Context>) -> tide::Result {
    let update: telegram::Update = match req.body_json().await {
        Ok(update) => update,
        Err(e) => {
            slog::warn!(LOG, "could not decode incoming update: {}", e);
            return Ok(resp!(status => 400, message => "bad request"));
        }
    };
    let ctx = req.state();
    let start = std::time::Instant::now();
    if let Some(message) = &update.message {
        dispatch(ctx, message).await;
        slog::info!(LOG, "handled update";
            "update_id" => update.update_id,
            "chat_id" => message.chat.id,
            "duration_ms" => start.elapsed().as_millis() as u64,
        );
    }
    Ok(resp!(status => 200))
}

#[derive(serde::Serialize)]
struct Status<'a> {
    ok: &'a str,
    version: &'a str,
}

async fn status(req: tide::Request<Context>) -> tide::Result {
    Ok(resp!(json => Status {
        ok: "ok",
        version: &req.state().config.version
    }))
}

/// Google sends the browser back here once the user went through the
/// consent screen, with the `state` we issued and a single-use `code`.
async fn oauth_callback(req: tide::Request<Context>) -> tide::Result {
    let callback: AuthCallback = match req.query() {
        Ok(callback) => callback,
        Err(e) => {
            slog::warn!(LOG, "invalid oauth callback query: {}", e);
            AuthCallback::default()
        }
    };
    match auth::handle_callback(req.state(), &callback).await {
        Ok(credential) => {
            slog::info!(LOG, "completed drive authorization"; "user_id" => credential.user_id);
            Ok(resp!(status => 200, message => CALLBACK_SUCCESS_TEXT))
        }
        Err(e) => {
            if e.status() >= 500 {
                slog::error!(LOG, "oauth callback failed: {}", e);
            } else {
                slog::warn!(LOG, "oauth callback rejected: {}", e);
            }
            Ok(resp!(status => e.status(), message => e.public_message()))
        }
    }
}
