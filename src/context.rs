//! Per-request context — type-safe state injection shared across the
//! request and response halves of a single proxied exchange.
//!
//! A plain HTTP server's context dies with the request it was built from.
//! A proxy's context has to survive past that: the request modifier chain
//! runs, the upstream round-trip happens, and then the response modifier
//! chain needs to see what the request side decided — whether logging was
//! bypassed, what correlation id was assigned, whatever a custom modifier
//! stashed for its paired response-side modifier to pick up. So
//! `RequestContext` is a cheaply-cloneable handle (an `Arc` around a mutex)
//! rather than a value owned by the request.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::reqlog::CorrelationId;

/// Type-erased per-request extension map.
///
/// Modifiers use this to pass ad hoc state to later stages of the pipeline
/// without the pipeline itself needing to know about every modifier's
/// private types.
#[derive(Default)]
struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    fn new() -> Self {
        Self { map: HashMap::new() }
    }

    fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
        self.map.insert(TypeId::of::<T>(), Box::new(value));
    }

    fn get<T: Send + Sync + Clone + 'static>(&self) -> Option<T> {
        self.map.get(&TypeId::of::<T>()).and_then(|v| v.downcast_ref::<T>()).cloned()
    }

    fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.map.remove(&TypeId::of::<T>()).and_then(|v| v.downcast::<T>().ok()).map(|v| *v)
    }
}

struct Inner {
    extensions: Extensions,
    log_bypassed: bool,
    req_log_id: Option<CorrelationId>,
}

/// A cheaply-cloneable handle to per-exchange state.
///
/// Created once when a request is accepted, then cloned onto the
/// [`HttpResponse`](crate::http::HttpResponse) that completes the exchange
/// so response-side modifiers (most importantly the request logger) can
/// see decisions made on the request side.
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<Mutex<Inner>>,
}

impl RequestContext {
    /// Creates a fresh context for a newly accepted request.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                extensions: Extensions::new(),
                log_bypassed: false,
                req_log_id: None,
            })),
        }
    }

    /// Inserts an arbitrary value into the context's extension map.
    pub fn insert<T: Send + Sync + 'static>(&self, value: T) {
        self.inner.lock().unwrap().extensions.insert(value);
    }

    /// Retrieves a previously inserted value by type.
    pub fn get<T: Send + Sync + Clone + 'static>(&self) -> Option<T> {
        self.inner.lock().unwrap().extensions.get::<T>()
    }

    /// Removes and returns a previously inserted value by type.
    pub fn remove<T: Send + Sync + 'static>(&self) -> Option<T> {
        self.inner.lock().unwrap().extensions.remove::<T>()
    }

    /// Marks this exchange as bypassed for logging purposes.
    ///
    /// Set by scope-matching modifiers (or an explicit bypass rule) before
    /// the request logger runs; the logger checks this flag and skips
    /// persisting the exchange entirely when it is set.
    pub fn set_log_bypassed(&self, bypassed: bool) {
        self.inner.lock().unwrap().log_bypassed = bypassed;
    }

    /// Returns whether this exchange has been marked as bypassed for logging.
    pub fn is_log_bypassed(&self) -> bool {
        self.inner.lock().unwrap().log_bypassed
    }

    /// Assigns the correlation id this exchange was logged under.
    ///
    /// Set by the request logger after it persists the request half of the
    /// exchange, so the response half can later be matched back to the same
    /// log entry.
    pub fn set_log_id(&self, id: CorrelationId) {
        self.inner.lock().unwrap().req_log_id = Some(id);
    }

    /// Returns the correlation id this exchange was logged under, if any.
    pub fn log_id(&self) -> Option<CorrelationId> {
        self.inner.lock().unwrap().req_log_id
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
