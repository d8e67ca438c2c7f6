use crate::{se, Result};
use chrono::offset::Utc;
use chrono::{DateTime, Duration};

const MIB: f64 = 1024.0 * 1024.0;

pub fn mib(bytes: u64) -> f64 {
    bytes as f64 / MIB
}

/// Expiration timestamp for a token that is valid for `expires_in` seconds from `now`
pub fn expiry_after(now: DateTime<Utc>, expires_in: Option<i64>) -> Option<DateTime<Utc>> {
    expires_in
        .filter(|secs| *secs > 0)
        .and_then(|secs| now.checked_add_signed(Duration::seconds(secs)))
}

pub fn parse_url(s: &str) -> Result<url::Url> {
    Ok(url::Url::parse(s).map_err(|e| se!("invalid url {}", e))?)
}

pub fn redact(s: &str, secret: &str) -> String {
    if secret.is_empty() {
        return s.to_string();
    }
    s.replace(secret, "<redacted>")
}
