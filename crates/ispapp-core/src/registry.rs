// ── Handler registry ──
//
// Immutable `type -> handler` table built once at startup. Dispatch never
// blocks the session reader: each matched envelope runs on its own task,
// gated by a semaphore, and its reply goes back through the outbox.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use ispapp_api::{Dispatcher, Envelope, Outbox, Response};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::HandlerError;

pub const DEFAULT_MAX_CONCURRENT: usize = 16;

/// Successful handler output, copied into the [`Response`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub stdout: String,
    pub stderr: String,
    pub data: Value,
}

impl Reply {
    pub fn data(data: Value) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    fn into_response(self, request: &Envelope) -> Response {
        Response {
            stdout: self.stdout,
            stderr: self.stderr,
            data: self.data,
            ..Response::to(request)
        }
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    /// Serve one request. An `Err` is reported to the caller as a failed
    /// [`Response`]; it never affects the session.
    async fn handle(&self, request: &Envelope) -> Result<Reply, HandlerError>;
}

// ── Builder ─────────────────────────────────────────────────────────

pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, Arc<dyn Handler>>,
    max_concurrent: usize,
}

impl HandlerRegistryBuilder {
    /// Register `handler` for `kind`. A later registration for the same
    /// kind replaces the earlier one.
    #[must_use]
    pub fn register(mut self, kind: impl Into<String>, handler: impl Handler + 'static) -> Self {
        let kind = kind.into();
        if self.handlers.insert(kind.clone(), Arc::new(handler)).is_some() {
            warn!(kind, "handler replaced");
        }
        self
    }

    /// Upper bound on handlers executing at once. Clamped to at least 1.
    #[must_use]
    pub fn max_concurrent(mut self, limit: usize) -> Self {
        self.max_concurrent = limit.max(1);
        self
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            inner: Arc::new(RegistryInner {
                handlers: self.handlers,
                permits: Arc::new(Semaphore::new(self.max_concurrent)),
            }),
        }
    }
}

// ── Registry ────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct HandlerRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    handlers: HashMap<String, Arc<dyn Handler>>,
    permits: Arc<Semaphore>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder {
            handlers: HashMap::new(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.inner.handlers.contains_key(kind)
    }

    /// Registered message types, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.inner.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Run the handler for `request` inline and build its response.
    /// `None` when no handler is registered for the type.
    pub async fn execute(&self, request: &Envelope) -> Option<Response> {
        let handler = Arc::clone(self.inner.handlers.get(&request.kind)?);
        Some(run_handler(handler.as_ref(), request).await)
    }
}

impl Dispatcher for HandlerRegistry {
    fn dispatch(&self, envelope: Envelope, outbox: &Outbox) {
        let Some(handler) = self.inner.handlers.get(&envelope.kind).map(Arc::clone) else {
            warn!(kind = %envelope.kind, uuid = ?envelope.correlation_id, "no handler registered, dropping");
            return;
        };
        let permits = Arc::clone(&self.inner.permits);
        let outbox = outbox.clone();

        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let response = run_handler(handler.as_ref(), &envelope).await;
            if let Err(e) = outbox.send(&response).await {
                debug!(kind = %envelope.kind, error = %e, "reply discarded");
            }
        });
    }
}

async fn run_handler(handler: &dyn Handler, request: &Envelope) -> Response {
    debug!(kind = %request.kind, uuid = ?request.correlation_id, "handling request");
    let outcome = AssertUnwindSafe(handler.handle(request))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(panic.as_ref()))));

    match outcome {
        Ok(reply) => reply.into_response(request),
        Err(e) => {
            warn!(kind = %request.kind, uuid = ?request.correlation_id, error = %e, "handler failed");
            Response::failure(request, e.to_string())
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Fixed(Value);

    #[async_trait]
    impl Handler for Fixed {
        async fn handle(&self, _request: &Envelope) -> Result<Reply, HandlerError> {
            Ok(Reply::data(self.0.clone()))
        }
    }

    struct Failing;

    #[async_trait]
    impl Handler for Failing {
        async fn handle(&self, _request: &Envelope) -> Result<Reply, HandlerError> {
            Err(HandlerError::InvalidPayload("expected an object".into()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl Handler for Panicking {
        async fn handle(&self, _request: &Envelope) -> Result<Reply, HandlerError> {
            panic!("boom");
        }
    }

    fn request(kind: &str) -> Envelope {
        Envelope::new(kind, Value::Null).with_correlation("c-1")
    }

    #[tokio::test]
    async fn execute_copies_reply_and_correlation() {
        let registry = HandlerRegistry::builder()
            .register("getconfig", Fixed(json!({"a": 1})))
            .build();
        let resp = registry.execute(&request("getconfig")).await.unwrap();
        assert_eq!(resp.kind, "getconfig");
        assert_eq!(resp.correlation_id.as_deref(), Some("c-1"));
        assert_eq!(resp.data, json!({"a": 1}));
        assert!(!resp.is_error());
    }

    #[tokio::test]
    async fn handler_error_becomes_failed_response() {
        let registry = HandlerRegistry::builder().register("config", Failing).build();
        let resp = registry.execute(&request("config")).await.unwrap();
        assert_eq!(resp.error.as_deref(), Some("invalid payload: expected an object"));
        assert_eq!(resp.stderr, "invalid payload: expected an object");
    }

    #[tokio::test]
    async fn panic_is_isolated() {
        let registry = HandlerRegistry::builder().register("terminal", Panicking).build();
        let resp = registry.execute(&request("terminal")).await.unwrap();
        assert_eq!(resp.error.as_deref(), Some("handler panicked: boom"));
    }

    #[tokio::test]
    async fn unknown_type_is_dropped() {
        let registry = HandlerRegistry::builder().build();
        assert!(registry.execute(&request("nope")).await.is_none());

        let (outbox, mut rx) = Outbox::channel(4);
        registry.dispatch(request("nope"), &outbox);
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn kinds_are_sorted() {
        let registry = HandlerRegistry::builder()
            .register("ping2", Failing)
            .register("config", Failing)
            .max_concurrent(0)
            .build();
        assert_eq!(registry.kinds(), ["config", "ping2"]);
        assert!(registry.contains("config"));
        assert_eq!(registry.inner.permits.available_permits(), 1);
    }
}
