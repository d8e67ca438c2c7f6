use std::io::Read;
use std::sync::Arc;
use std::{env, fs};

use slog::o;
use slog::Drain;
use sqlx::postgres::PgPoolOptions;

mod auth;
mod crypto;
mod drive;
mod google;
mod logging;
mod models;
mod relay;
mod service;
mod store;
mod telegram;
#[cfg(test)]
mod testing;
mod utils;

pub type Error = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug)]
pub struct StringError(String);
impl std::fmt::Display for StringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "error: {}", self.0)
    }
}
impl std::error::Error for StringError {}

pub type Result<T> = std::result::Result<T, Error>;

fn env_or(k: &str, default: &str) -> String {
    env::var(k).unwrap_or_else(|_| default.to_string())
}

// read apart from `Config`, which may fail to load
pub struct LogConfig {
    // json or pretty
    pub format: String,
    pub level: String,
}
impl LogConfig {
    fn new(format: &str, level: &str) -> Self {
        Self {
            format: format.trim().to_lowercase(),
            level: level.trim().to_string(),
        }
    }

    fn load() -> Self {
        Self::new(&env_or("LOG_FORMAT", "json"), &env_or("LOG_LEVEL", "INFO"))
    }

    // unknown levels fall back to info
    fn filter_level(&self) -> slog::Level {
        self.level.parse().unwrap_or(slog::Level::Info)
    }
}

lazy_static::lazy_static! {
    pub static ref LOG_CONFIG: LogConfig = LogConfig::load();

    // The "base" logger that all modules should branch off of
    pub static ref BASE_LOG: slog::Logger = {
        let level = LOG_CONFIG.filter_level();
        if LOG_CONFIG.format == "pretty" {
            let decorator = slog_term::TermDecorator::new().build();
            let drain = slog_term::CompactFormat::new(decorator).build().fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            let drain = slog::LevelFilter::new(drain, level).fuse();
            slog::Logger::root(drain, o!())
        } else {
            let drain = slog_json::Json::default(std::io::stderr()).fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            let drain = slog::LevelFilter::new(drain, level).fuse();
            slog::Logger::root(drain, o!())
        }
    };

    // Base logger
    pub static ref LOG: slog::Logger = BASE_LOG.new(slog::o!("app" => "tgdrive"));
}

// build a string error
#[macro_export]
macro_rules! se {
    ($($arg:tt)*) => {{ crate::StringError(format!($($arg)*))}};
}

#[macro_export]
macro_rules! resp {
    (json => $obj:expr) => {{
        tide::Response::builder(200)
            .content_type("application/json")
            .body(serde_json::to_string(&$obj)?)
            .build()
    }};
    (status => $status:expr) => {{
        tide::Response::builder($status)
            .content_type("text/plain")
            .build()
    }};
    (status => $status:expr, message => $msg:expr) => {{
        tide::Response::builder($status)
            .content_type("text/plain")
            .body($msg)
            .build()
    }};
}

fn env_required(k: &str) -> Result<String> {
    match env::var(k) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(se!("missing required configuration {}", k).into()),
    }
}

fn env_parse<T: std::str::FromStr>(k: &str, default: &str) -> Result<T> {
    env_or(k, default)
        .trim()
        .parse()
        .map_err(|_| se!("invalid {}", k).into())
}

pub struct Config {
    pub version: String,

    // host to listen on, defaults to all interfaces
    pub host: String,
    pub port: u16,

    // db config
    pub db_url: String,
    pub db_max_connections: u32,

    // key used for encrypting google tokens saved in the db
    pub encryption_key: String,

    // how long an issued oauth state token stays redeemable
    pub oauth_state_ttl_seconds: i64,

    // telegram bot
    pub telegram_bot_token: String,
    pub telegram_api_url: String,

    // google oauth client and endpoints
    pub google_client_id: String,
    pub google_client_secret: String,
    pub google_redirect_url: String,
    pub google_auth_url: String,
    pub google_token_url: String,
    pub drive_upload_url: String,
}
impl Config {
    pub fn load() -> Result<Self> {
        let version = fs::File::open("commit_hash.txt")
            .and_then(|mut f| {
                let mut s = String::new();
                f.read_to_string(&mut s)?;
                Ok(s.trim().to_string())
            })
            .unwrap_or_else(|_| "unknown".to_string());
        Ok(Self {
            version,
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", "8080")?,
            db_url: env_required("DATABASE_URL")?,
            db_max_connections: env_parse("DATABASE_MAX_CONNECTIONS", "5")?,
            encryption_key: env_required("ENCRYPTION_KEY")?,
            oauth_state_ttl_seconds: env_parse("OAUTH_STATE_TTL_SECONDS", "600")?,
            telegram_bot_token: env_required("TELEGRAM_BOT_TOKEN")?,
            telegram_api_url: env_or("TELEGRAM_API_URL", "https://api.telegram.org"),
            google_client_id: env_required("GOOGLE_CLIENT_ID")?,
            google_client_secret: env_required("GOOGLE_CLIENT_SECRET")?,
            google_redirect_url: env_required("GOOGLE_REDIRECT_URL")?,
            google_auth_url: env_or(
                "GOOGLE_AUTH_URL",
                "https://accounts.google.com/o/oauth2/auth",
            ),
            google_token_url: env_or("GOOGLE_TOKEN_URL", "https://oauth2.googleapis.com/token"),
            drive_upload_url: env_or(
                "DRIVE_UPLOAD_URL",
                "https://www.googleapis.com/upload/drive/v3/files",
            ),
        })
    }
    pub fn initialize(&self) {
        slog::info!(
            LOG, "initialized config";
            "version" => &self.version,
            "host" => &self.host,
            "port" => &self.port,
            "db_max_connections" => &self.db_max_connections,
            "log_format" => &LOG_CONFIG.format,
            "log_level" => &LOG_CONFIG.level,
            "oauth_state_ttl_seconds" => &self.oauth_state_ttl_seconds,
            "telegram_api_url" => &self.telegram_api_url,
            "google_redirect_url" => &self.google_redirect_url,
        );
    }
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[async_std::main]
async fn main() -> Result<()> {
    // try sourcing a .env and server/.env if either exist
    dotenv::dotenv().ok();
    if let Ok(dir) = std::env::current_dir() {
        dotenv::from_path(dir.join("server/.env")).ok();
    }

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            slog::crit!(LOG, "invalid configuration: {}", e);
            // let the async drain flush before exiting
            std::thread::sleep(std::time::Duration::from_millis(100));
            std::process::exit(1);
        }
    };
    config.initialize();

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.db_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let store = Arc::new(store::PgStore::new(pool, config.encryption_key.clone()));
    let ctx = service::Context::new(config, store);

    let me = ctx
        .bot
        .get_me()
        .await
        .map_err(|e| se!("telegram bot token rejected: {}", e))?;
    slog::info!(LOG, "authorized as telegram bot"; "bot_id" => me.id, "username" => &me.username);

    service::start(ctx).await?;
    Ok(())
}
