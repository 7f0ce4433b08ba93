use crate::http::HttpRequest;
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// Query parameters that carry credentials; they only contribute to the
/// credential-presence flag, never to the key itself
const CREDENTIAL_PARAMS: &[&str] = &["token", "access_token", "api_key", "apikey", "key"];

/// Stable identity of an outbound request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key from method, normalized URL, body digest and whether a
    /// credential was attached.
    ///
    /// Layout: `{METHOD}:{host}{path}:{fingerprint}`. The readable prefix keeps
    /// pattern invalidation practical (`POST:*multi-search*`), the fingerprint
    /// carries the full identity.
    pub fn for_request(request: &HttpRequest) -> Self {
        let (normalized, url_credential) = normalize_url(&request.url);
        let authenticated = request.bearer_token.is_some() || url_credential;
        let body_digest = request
            .body
            .as_deref()
            .map(|body| hex::encode(Sha256::digest(body)))
            .unwrap_or_default();

        let identity = format!(
            "{}\n{}\n{}\nauth={}",
            request.method.as_str(),
            normalized,
            body_digest,
            u8::from(authenticated)
        );
        let fingerprint = farmhash::fingerprint64(identity.as_bytes());

        let host = request.url.host_str().unwrap_or_default();
        CacheKey(format!(
            "{}:{}{}:{:016x}",
            request.method.as_str(),
            host,
            request.url.path(),
            fingerprint
        ))
    }

    /// Wrap an already derived key
    pub fn from_raw(raw: impl Into<String>) -> Self {
        CacheKey(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Query parameters that carry a credential
pub(crate) fn is_credential_param(name: &str) -> bool {
    CREDENTIAL_PARAMS
        .iter()
        .any(|param| name.eq_ignore_ascii_case(param))
}

/// Canonical form of a URL: no fragment, sorted query pairs, credential
/// parameters removed. Returns whether a credential parameter was present.
fn normalize_url(url: &Url) -> (String, bool) {
    let mut normalized = url.clone();
    normalized.set_fragment(None);

    let mut had_credential = false;
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| {
            let is_credential = is_credential_param(name);
            had_credential |= is_credential;
            !is_credential
        })
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    pairs.sort();

    if pairs.is_empty() {
        normalized.set_query(None);
    } else {
        normalized.query_pairs_mut().clear().extend_pairs(pairs);
    }

    (normalized.to_string(), had_credential)
}
