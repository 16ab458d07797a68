use std::fmt;

use tokio::sync::watch;

/// The controlling half of a cancellation pair.
///
/// Dropping the handle without calling [`AbortHandle::abort`] never cancels
/// anything; receivers simply never observe an abort.
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// A signal observing this handle.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: Some(self.tx.subscribe()),
        }
    }

    /// Cancel every load holding a signal from this handle.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortHandle")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// The observing half of a cancellation pair, cheap to clone.
#[derive(Clone, Default)]
pub struct AbortSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl AbortSignal {
    /// A signal that is never raised.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_aborted(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Completes once the paired handle aborts. Pends forever if the handle
    /// is dropped first or the signal is [`AbortSignal::never`].
    pub async fn aborted(&self) {
        let Some(rx) = self.rx.as_ref() else {
            return futures::future::pending().await;
        };
        let mut rx = rx.clone();
        if rx.wait_for(|aborted| *aborted).await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

impl PartialEq for AbortSignal {
    /// Signals carry no comparable state; options compare equal regardless
    /// of which signal they hold.
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn abort_is_observed_by_all_signals() {
        let handle = AbortHandle::new();
        let a = handle.signal();
        let b = a.clone();
        assert!(!a.is_aborted());
        handle.abort();
        assert!(a.is_aborted());
        assert!(b.is_aborted());
        assert!(handle.is_aborted());
    }

    #[test]
    fn never_signal_is_never_aborted() {
        assert!(!AbortSignal::never().is_aborted());
    }

    #[tokio::test]
    async fn aborted_future_completes_after_abort() {
        let handle = AbortHandle::new();
        let signal = handle.signal();
        let waiter = tokio::spawn(async move { signal.aborted().await });
        tokio::task::yield_now().await;
        handle.abort();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("abort observed")
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_handle_pends() {
        let signal = AbortHandle::new().signal();
        let outcome = tokio::time::timeout(Duration::from_millis(20), signal.aborted()).await;
        assert!(outcome.is_err());
    }
}
