use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use keystone_types::Node;
use serde::{Deserialize, Serialize};

use crate::abort::AbortSignal;

/// Request method passed through to the transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Headers
// ---------------------------------------------------------------------------

/// Response status plus header fields. Field names are stored lowercase.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    pub status: u16,
    #[serde(flatten)]
    fields: BTreeMap<String, String>,
}

impl Headers {
    /// Headers carrying only a status.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Builder-style `cache-control: max-age=<secs>`.
    pub fn with_max_age(self, max_age: Duration) -> Self {
        self.with("cache-control", format!("max-age={}", max_age.as_secs()))
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.fields.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// `max-age` from `cache-control`.
    pub fn max_age(&self) -> Option<Duration> {
        self.cache_directive_secs("max-age")
    }

    /// `stale-if-error` from `cache-control`.
    pub fn stale_if_error(&self) -> Option<Duration> {
        self.cache_directive_secs("stale-if-error")
    }

    fn cache_directive_secs(&self, directive: &str) -> Option<Duration> {
        self.get("cache-control")?
            .split(',')
            .filter_map(|part| part.trim().split_once('='))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case(directive))
            .and_then(|(_, value)| value.trim().trim_matches('"').parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

// ---------------------------------------------------------------------------
// FetchOptions
// ---------------------------------------------------------------------------

/// Per-call fetch policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FetchOptions {
    pub method: HttpMethod,
    /// Keep the entry fresh with a recurring background reload.
    pub reload: bool,
    /// Serve a stale value immediately and refresh it in the background.
    pub stale_while_revalidate: bool,
    /// Serve the previous value when a reload fails within its error-grace
    /// window.
    pub stale_if_error: bool,
    /// Return transport failures as errors instead of resolved responses.
    pub reject_on_error: bool,
    /// Retry attempts passed to the transport.
    pub retry: Option<u32>,
    /// Per-attempt timeout passed to the transport.
    pub timeout_ms: Option<u64>,
    /// Per-call cancellation.
    #[serde(skip)]
    pub abort: Option<AbortSignal>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            method: HttpMethod::Get,
            reload: false,
            stale_while_revalidate: false,
            stale_if_error: true,
            reject_on_error: false,
            retry: None,
            timeout_ms: None,
            abort: None,
        }
    }
}

impl FetchOptions {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// One entry of a `fetch_all` batch.
#[derive(Clone, Debug, Default)]
pub struct FetchRequest {
    pub key: String,
    pub url: String,
    pub options: FetchOptions,
}

impl FetchRequest {
    pub fn new(key: impl Into<String>, url: impl Into<String>, options: FetchOptions) -> Self {
        Self {
            key: key.into(),
            url: url.into(),
            options,
        }
    }
}

// ---------------------------------------------------------------------------
// FetchResponse
// ---------------------------------------------------------------------------

/// Why a load failed, carried on resolved responses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFailure {
    pub status: u16,
    pub message: String,
}

/// What a fetch resolves with.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FetchResponse {
    /// Time spent loading; zero when served from the store.
    pub duration: Duration,
    pub headers: Headers,
    pub data: Option<Node>,
    pub error: Option<FetchFailure>,
}

impl FetchResponse {
    /// Immediate `400` for a fetch without a key or URL.
    pub fn bad_request() -> Self {
        Self {
            duration: Duration::ZERO,
            headers: Headers::status(400),
            data: None,
            error: None,
        }
    }

    /// Immediate `200` served from the store.
    pub fn cached(data: Option<Node>) -> Self {
        Self {
            duration: Duration::ZERO,
            headers: Headers::status(200),
            data,
            error: None,
        }
    }

    pub fn status(&self) -> u16 {
        self.headers.status
    }

    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.headers.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let headers = Headers::status(200).with("Cache-Control", "public, max-age=30");
        assert_eq!(headers.get("cache-control"), Some("public, max-age=30"));
        assert_eq!(headers.max_age(), Some(Duration::from_secs(30)));
        assert_eq!(headers.stale_if_error(), None);
    }

    #[test]
    fn parses_stale_if_error() {
        let headers =
            Headers::status(200).with("cache-control", "max-age=10, stale-if-error=\"600\"");
        assert_eq!(headers.stale_if_error(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn synthesised_max_age() {
        let headers = Headers::status(200).with_max_age(Duration::from_millis(90_500));
        assert_eq!(headers.max_age(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn options_defaults_and_serde() {
        let options = FetchOptions::default();
        assert!(options.stale_if_error);
        assert!(!options.reload);

        let parsed: FetchOptions =
            serde_json::from_str(r#"{ "reload": true, "timeoutMs": 250 }"#).unwrap();
        assert!(parsed.reload);
        assert!(parsed.stale_if_error);
        assert_eq!(parsed.timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn bad_request_has_no_data() {
        let response = FetchResponse::bad_request();
        assert_eq!(response.status(), 400);
        assert!(response.data.is_none());
        assert!(!response.is_ok());
    }
}
