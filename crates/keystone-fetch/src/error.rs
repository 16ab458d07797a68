use keystone_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the fetch cache.
///
/// Transport failures only become errors when the caller asked for
/// `reject_on_error`; otherwise they are folded into a resolved
/// [`FetchResponse`](crate::FetchResponse).
#[derive(Debug, Error)]
pub enum FetchError {
    /// The remote answered with a 4xx-class status. Never retried.
    #[error("client error {status} fetching {url}: {message}")]
    Client {
        status: u16,
        url: String,
        message: String,
    },

    /// The remote failed with a 5xx-class status, a timeout, or a network
    /// error. Eligible for retry and reload scheduling.
    #[error("server error {status} fetching {url}: {message}")]
    Server {
        status: u16,
        url: String,
        message: String,
    },

    /// The load was cancelled through a global or per-call abort.
    #[error("fetch of {url} was aborted")]
    Aborted { url: String },

    /// Reading or writing the backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The cache has been destroyed.
    #[error("fetch cache has been destroyed")]
    Destroyed,
}

impl FetchError {
    /// Classify a failed load by status.
    pub fn from_status(status: u16, url: impl Into<String>, message: impl Into<String>) -> Self {
        let (url, message) = (url.into(), message.into());
        if (400..500).contains(&status) {
            FetchError::Client {
                status,
                url,
                message,
            }
        } else {
            FetchError::Server {
                status,
                url,
                message,
            }
        }
    }

    /// The status associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Client { status, .. } | FetchError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result alias for fetch operations.
pub type FetchResult<T> = Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_status() {
        assert!(matches!(
            FetchError::from_status(404, "u", "missing"),
            FetchError::Client { status: 404, .. }
        ));
        assert!(matches!(
            FetchError::from_status(503, "u", "down"),
            FetchError::Server { status: 503, .. }
        ));
        assert_eq!(FetchError::Destroyed.status(), None);
    }
}
