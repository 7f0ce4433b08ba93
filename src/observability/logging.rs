use regex::Regex;
use std::sync::OnceLock;
use tracing::subscriber::set_global_default;
use tracing_subscriber::{
    fmt::{self, format::JsonFields},
    layer::SubscriberExt,
    EnvFilter, Registry,
};
use url::Url;

use crate::cache::is_credential_param;
use crate::error::{ClientError, ClientResult};

const MAX_TERM_LEN: usize = 200;
const MAX_KEY_LEN: usize = 50;

/// Install the global subscriber: `RUST_LOG`-driven filter and JSON output
pub fn init_logging() -> ClientResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ffbb_search=debug"));

    let formatting_layer = fmt::layer()
        .json()
        .with_current_span(false)
        .with_span_list(true)
        .fmt_fields(JsonFields::new());

    let subscriber = Registry::default()
        .with(env_filter)
        .with(formatting_layer);

    set_global_default(subscriber)
        .map_err(|e| ClientError::Internal(format!("Failed to set global subscriber: {}", e)))?;

    Ok(())
}

/// URL with credential query parameters masked and userinfo removed
pub fn sanitize_url(url: &Url) -> String {
    let mut sanitized = url.clone();
    let _ = sanitized.set_username("");
    let _ = sanitized.set_password(None);

    if sanitized.query().is_some() {
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(name, value)| {
                let value = if is_credential_param(&name) {
                    "***".to_string()
                } else {
                    value.into_owned()
                };
                (name.into_owned(), value)
            })
            .collect();
        sanitized.query_pairs_mut().clear().extend_pairs(pairs);
    }

    sanitized.to_string()
}

/// Search term safe for logs: e-mail addresses and phone numbers masked, truncated
pub fn sanitize_term(term: &str) -> String {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    static PHONE: OnceLock<Option<Regex>> = OnceLock::new();

    let mut sanitized = term.to_string();

    if let Some(email) = EMAIL
        .get_or_init(|| Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").ok())
    {
        sanitized = email.replace_all(&sanitized, "[EMAIL]").into_owned();
    }

    if let Some(phone) = PHONE.get_or_init(|| Regex::new(r"\b\d{2}(?:[ .-]?\d{2}){4}\b").ok()) {
        sanitized = phone.replace_all(&sanitized, "[PHONE]").into_owned();
    }

    if sanitized.chars().count() > MAX_TERM_LEN {
        sanitized = sanitized.chars().take(MAX_TERM_LEN - 3).collect();
        sanitized.push_str("...");
    }

    sanitized
}

/// Long cache keys are shortened to their head and tail
pub fn sanitize_cache_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > MAX_KEY_LEN {
        let head: String = chars[..20].iter().collect();
        let tail: String = chars[chars.len() - 16..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        key.to_string()
    }
}
