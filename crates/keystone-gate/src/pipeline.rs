use std::fmt;
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, warn};

use crate::context::HandlerContext;
use crate::error::GateError;

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// A callback that inspects or edits a [`HandlerContext`].
///
/// Handlers are compared by identity: clones of one handler are equal, two
/// handlers built from identical closures are not.
#[derive(Clone)]
pub struct Handler(Arc<dyn Fn(&mut HandlerContext) + Send + Sync>);

impl Handler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut HandlerContext) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, context: &mut HandlerContext) {
        (self.0)(context)
    }

    pub fn ptr_eq(&self, other: &Handler) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({:p})", Arc::as_ptr(&self.0))
    }
}

/// One entry of a batch registration: an optional key pattern and a handler.
pub type HandlerEntry = (Option<String>, Handler);

struct Registration {
    pattern: Option<Regex>,
    handler: Handler,
}

impl Registration {
    fn compile(pattern: Option<&str>, handler: Handler) -> Result<Self, GateError> {
        let pattern = pattern
            .map(|p| {
                Regex::new(p).map_err(|e| GateError::InvalidPattern {
                    pattern: p.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;
        Ok(Self { pattern, handler })
    }

    fn matches(&self, key: &str) -> bool {
        self.pattern.as_ref().map_or(true, |p| p.is_match(key))
    }
}

// ---------------------------------------------------------------------------
// HandlerPipeline
// ---------------------------------------------------------------------------

/// Ordered list of pattern-scoped handlers run before every intercepted
/// call.
///
/// A registration without a pattern applies to every call. A pattern is a
/// regular expression tested against the call's resolved key (the action
/// name for `trigger`). Handlers run in registration order.
#[derive(Default)]
pub struct HandlerPipeline {
    registrations: Vec<Registration>,
}

impl HandlerPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler`, scoped to keys matching `pattern` when given.
    ///
    /// An invalid pattern drops the registration; use
    /// [`Self::try_use_handler`] to observe the failure.
    pub fn use_handler(&mut self, pattern: Option<&str>, handler: Handler) -> bool {
        match self.try_use_handler(pattern, handler) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "ignoring handler registration");
                false
            }
        }
    }

    /// Like [`Self::use_handler`], but reports an invalid pattern.
    pub fn try_use_handler(
        &mut self,
        pattern: Option<&str>,
        handler: Handler,
    ) -> Result<(), GateError> {
        let registration = Registration::compile(pattern, handler)?;
        debug!(pattern = ?pattern, "handler registered");
        self.registrations.push(registration);
        Ok(())
    }

    /// Register a batch in order. Invalid entries are dropped; the valid ones
    /// become visible together. Returns how many were registered.
    pub fn use_handlers<I>(&mut self, batch: I) -> usize
    where
        I: IntoIterator<Item = HandlerEntry>,
    {
        let compiled: Vec<Registration> = batch
            .into_iter()
            .filter_map(|(pattern, handler)| {
                Registration::compile(pattern.as_deref(), handler)
                    .map_err(|err| warn!(error = %err, "ignoring handler registration"))
                    .ok()
            })
            .collect();
        let count = compiled.len();
        self.registrations.extend(compiled);
        debug!(count, "handler batch registered");
        count
    }

    /// Remove every registration of `handler`. Returns whether any existed.
    pub fn unuse_handler(&mut self, handler: &Handler) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|r| !r.handler.ptr_eq(handler));
        before != self.registrations.len()
    }

    /// Remove every registration of each handler in `batch`.
    pub fn unuse_handlers<'a, I>(&mut self, batch: I) -> usize
    where
        I: IntoIterator<Item = &'a Handler>,
    {
        let handlers: Vec<&Handler> = batch.into_iter().collect();
        let before = self.registrations.len();
        self.registrations
            .retain(|r| !handlers.iter().any(|h| r.handler.ptr_eq(h)));
        before - self.registrations.len()
    }

    /// Handlers applying to `key`, in registration order.
    pub fn matching(&self, key: &str) -> Vec<Handler> {
        self.registrations
            .iter()
            .filter(|r| r.matches(key))
            .map(|r| r.handler.clone())
            .collect()
    }

    /// Run every handler matching the context's key. Stops early once a
    /// handler responds. Returns how many handlers ran.
    pub fn dispatch(&self, context: &mut HandlerContext) -> usize {
        run(&self.matching(context.key()), context)
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn clear(&mut self) {
        self.registrations.clear();
    }
}

/// Run `handlers` in order against `context`, stopping after a response.
pub fn run(handlers: &[Handler], context: &mut HandlerContext) -> usize {
    let mut ran = 0;
    for handler in handlers {
        handler.call(context);
        ran += 1;
        if context.is_responded() {
            debug!(method = %context.method(), key = context.key(), "handler responded");
            break;
        }
    }
    ran
}

impl fmt::Debug for HandlerPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerPipeline")
            .field("handlers", &self.registrations.len())
            .finish()
    }
}
