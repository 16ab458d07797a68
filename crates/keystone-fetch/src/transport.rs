//! The network seam. The cache never speaks HTTP itself; it hands a
//! [`TransportRequest`] to whatever [`Transport`] it was built with.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keystone_types::Node;
use thiserror::Error;
use tracing::debug;

use crate::abort::AbortSignal;
use crate::types::{Headers, HttpMethod};

/// One load as seen by the transport.
#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    /// Additional attempts after the first failure.
    pub retry: u32,
    /// Per-attempt timeout.
    pub timeout: Option<Duration>,
    pub abort: AbortSignal,
}

impl TransportRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            retry: 0,
            timeout: None,
            abort: AbortSignal::never(),
        }
    }
}

/// A successful load.
#[derive(Clone, Debug, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Node,
}

impl TransportResponse {
    /// A `200` response carrying `body`.
    pub fn ok(body: impl Into<Node>) -> Self {
        Self {
            status: 200,
            headers: Headers::status(200),
            body: body.into(),
        }
    }

    /// Builder-style `cache-control: max-age`.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.headers = self.headers.with_max_age(max_age);
        self
    }

    /// Builder-style header insert.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Why a load produced no body.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("aborted")]
    Aborted,

    #[error("network error: {0}")]
    Network(String),
}

impl TransportError {
    /// The status a failed load is reported with.
    pub fn status(&self) -> u16 {
        match self {
            TransportError::Status { status, .. } => *status,
            TransportError::Timeout(_) => 504,
            TransportError::Network(_) => 503,
            TransportError::Aborted => 499,
        }
    }

    /// Server-class failures may be retried; client errors and aborts never.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Status { status, .. } => *status >= 500,
            TransportError::Timeout(_) | TransportError::Network(_) => true,
            TransportError::Aborted => false,
        }
    }
}

/// Issues loads on behalf of the fetch cache.
///
/// Implementations honour `retry`, `timeout`, and `abort` as best they can;
/// [`RetryingTransport`] adds all three around a transport that does not.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn request(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        (**self).request(request).await
    }
}

/// Adds per-attempt timeouts, retries, and abort to an inner transport.
///
/// The inner transport always sees `retry: 0` and no timeout.
pub struct RetryingTransport<T> {
    inner: T,
}

impl<T: Transport> RetryingTransport<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    async fn attempt(
        &self,
        request: &TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let single = TransportRequest {
            retry: 0,
            timeout: None,
            ..request.clone()
        };
        let call = self.inner.request(single);
        let bounded = async {
            match request.timeout {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .unwrap_or(Err(TransportError::Timeout(limit))),
                None => call.await,
            }
        };
        tokio::select! {
            biased;
            _ = request.abort.aborted() => Err(TransportError::Aborted),
            outcome = bounded => outcome,
        }
    }
}

#[async_trait]
impl<T: Transport> Transport for RetryingTransport<T> {
    async fn request(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let mut attempt = 0u32;
        loop {
            if request.abort.is_aborted() {
                return Err(TransportError::Aborted);
            }
            match self.attempt(&request).await {
                Ok(response) if response.status >= 500 && attempt < request.retry => {
                    debug!(url = %request.url, status = response.status, attempt, "retrying");
                }
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < request.retry => {
                    debug!(url = %request.url, error = %err, attempt, "retrying");
                }
                Err(err) => return Err(err),
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::abort::AbortHandle;

    struct Scripted {
        replies: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<TransportResponse, TransportError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn request(
            &self,
            request: TransportRequest,
        ) -> Result<TransportResponse, TransportError> {
            assert_eq!(request.retry, 0);
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(TransportError::Network("script exhausted".into())))
        }
    }

    fn server_error() -> Result<TransportResponse, TransportError> {
        Err(TransportError::Status {
            status: 503,
            message: "unavailable".into(),
        })
    }

    #[test]
    fn failure_statuses() {
        assert_eq!(TransportError::Timeout(Duration::from_secs(1)).status(), 504);
        assert_eq!(TransportError::Network("x".into()).status(), 503);
        assert!(!TransportError::Status { status: 404, message: String::new() }.is_retryable());
        assert!(TransportError::Status { status: 500, message: String::new() }.is_retryable());
        assert!(!TransportError::Aborted.is_retryable());
    }

    #[tokio::test]
    async fn retries_server_errors_until_success() {
        let transport = RetryingTransport::new(Scripted::new(vec![
            server_error(),
            server_error(),
            Ok(TransportResponse::ok("done")),
        ]));
        let mut request = TransportRequest::get("http://x");
        request.retry = 2;
        let response = transport.request(request).await.unwrap();
        assert_eq!(response.body, Node::from("done"));
        assert_eq!(transport.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_retry_budget() {
        let transport = RetryingTransport::new(Scripted::new(vec![server_error(), server_error()]));
        let mut request = TransportRequest::get("http://x");
        request.retry = 1;
        let err = transport.request(request).await.unwrap_err();
        assert_eq!(err.status(), 503);
        assert_eq!(transport.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let transport = RetryingTransport::new(Scripted::new(vec![Err(TransportError::Status {
            status: 404,
            message: "missing".into(),
        })]));
        let mut request = TransportRequest::get("http://x");
        request.retry = 5;
        let err = transport.request(request).await.unwrap_err();
        assert_eq!(err.status(), 404);
        assert_eq!(transport.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_attempts_time_out() {
        let mut scripted = Scripted::new(vec![Ok(TransportResponse::ok(1u64))]);
        scripted.delay = Some(Duration::from_millis(200));
        let transport = RetryingTransport::new(scripted);
        let mut request = TransportRequest::get("http://x");
        request.timeout = Some(Duration::from_millis(10));
        let err = transport.request(request).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[tokio::test]
    async fn abort_cancels_in_flight_attempt() {
        let mut scripted = Scripted::new(vec![Ok(TransportResponse::ok(1u64))]);
        scripted.delay = Some(Duration::from_secs(5));
        let transport = RetryingTransport::new(scripted);
        let handle = AbortHandle::new();
        let mut request = TransportRequest::get("http://x");
        request.abort = handle.signal();

        let pending = transport.request(request);
        let aborter = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.abort();
        };
        let (outcome, ()) = tokio::join!(pending, aborter);
        assert_eq!(outcome.unwrap_err(), TransportError::Aborted);
    }
}
