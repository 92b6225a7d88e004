//! Modifier pipeline — ordered request/response middleware.
//!
//! This generalizes the cursor-and-`Next` pattern into two independent
//! chains, since a proxy's request side and response side have different
//! short-circuit semantics: a request modifier runs before the upstream
//! round-trip and simply decorates the outgoing request (there is nothing
//! useful to "short-circuit" to — a modifier that wants to answer locally
//! without going upstream does so by returning an error the engine turns
//! into a response), while a response modifier runs after the round-trip
//! and can fail the whole exchange with a `502` by returning `Err`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::http::{HttpRequest, HttpResponse};

/// Error returned by a modifier that wants to abort the exchange.
#[derive(Debug, Error)]
#[error("modifier {modifier} rejected the exchange: {reason}")]
pub struct ModifierError {
    pub modifier: &'static str,
    pub reason: String,
}

impl ModifierError {
    pub fn new(modifier: &'static str, reason: impl Into<String>) -> Self {
        Self { modifier, reason: reason.into() }
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A cursor into the remaining request modifier chain.
pub struct RequestNext {
    modifiers: Vec<RequestModifierHandler>,
    index: usize,
}

pub type RequestModifierHandler =
    Arc<dyn Fn(HttpRequest, RequestNext) -> BoxFuture<'static, Result<HttpRequest, ModifierError>> + Send + Sync>;

impl RequestNext {
    pub fn new(modifiers: Vec<RequestModifierHandler>) -> Self {
        Self { modifiers, index: 0 }
    }

    /// Invokes the next request modifier, or returns the request unchanged
    /// once the chain is exhausted.
    pub async fn run(mut self, request: HttpRequest) -> Result<HttpRequest, ModifierError> {
        if self.index < self.modifiers.len() {
            let handler = self.modifiers[self.index].clone();
            self.index += 1;
            handler(request, self).await
        } else {
            Ok(request)
        }
    }
}

/// Implemented by any stage of the request-side pipeline.
///
/// Request modifiers cannot short-circuit with a response the way a server
/// middleware can — a proxy that wants to answer locally instead of going
/// upstream does so via [`ModifierError`], which the engine turns into an
/// error response.
///
/// `handle` takes `self: Arc<Self>` rather than `&self` so stateful
/// modifiers (like the request logger) can clone their own `Arc`-held state
/// into the returned future instead of borrowing `self` — the future must
/// be `'static` since it outlives the call that produced it, once boxed
/// into the pipeline's handler type.
pub trait RequestModifier: Send + Sync {
    fn handle(self: Arc<Self>, request: HttpRequest, next: RequestNext) -> BoxFuture<'static, Result<HttpRequest, ModifierError>>;
}

pub fn from_request_modifier<M>(modifier: Arc<M>) -> RequestModifierHandler
where
    M: RequestModifier + 'static,
{
    Arc::new(move |request, next| Arc::clone(&modifier).handle(request, next))
}

/// A cursor into the remaining response modifier chain.
pub struct ResponseNext {
    modifiers: Vec<ResponseModifierHandler>,
    index: usize,
}

pub type ResponseModifierHandler =
    Arc<dyn Fn(HttpResponse, ResponseNext) -> BoxFuture<'static, Result<HttpResponse, ModifierError>> + Send + Sync>;

impl ResponseNext {
    pub fn new(modifiers: Vec<ResponseModifierHandler>) -> Self {
        Self { modifiers, index: 0 }
    }

    pub async fn run(mut self, response: HttpResponse) -> Result<HttpResponse, ModifierError> {
        if self.index < self.modifiers.len() {
            let handler = self.modifiers[self.index].clone();
            self.index += 1;
            handler(response, self).await
        } else {
            Ok(response)
        }
    }
}

/// Implemented by any stage of the response-side pipeline.
///
/// Unlike request modifiers, a response modifier can fail the exchange:
/// returning `Err` causes the engine to replace the response with a `502
/// Bad Gateway` rather than relay a half-processed one. See
/// [`RequestModifier`] for why `handle` takes `self: Arc<Self>`.
pub trait ResponseModifier: Send + Sync {
    fn handle(self: Arc<Self>, response: HttpResponse, next: ResponseNext) -> BoxFuture<'static, Result<HttpResponse, ModifierError>>;
}

pub fn from_response_modifier<M>(modifier: Arc<M>) -> ResponseModifierHandler
where
    M: ResponseModifier + 'static,
{
    Arc::new(move |response, next| Arc::clone(&modifier).handle(response, next))
}

/// The ordered set of request and response modifiers applied to every
/// proxied exchange.
///
/// A snapshot is immutable once built; callers that want to change the
/// active set of modifiers at runtime publish a new `ModifierPipeline`
/// through an [`arc_swap::ArcSwap`] (see [`crate::reqlog::logger`] for the
/// analogous pattern applied to logger settings).
#[derive(Clone)]
pub struct ModifierPipeline {
    request_modifiers: Vec<RequestModifierHandler>,
    response_modifiers: Vec<ResponseModifierHandler>,
}

impl ModifierPipeline {
    pub fn new() -> Self {
        Self { request_modifiers: Vec::new(), response_modifiers: Vec::new() }
    }

    #[must_use]
    pub fn with_request_modifier(mut self, handler: RequestModifierHandler) -> Self {
        self.request_modifiers.push(handler);
        self
    }

    #[must_use]
    pub fn with_response_modifier(mut self, handler: ResponseModifierHandler) -> Self {
        self.response_modifiers.push(handler);
        self
    }

    pub async fn apply_request(&self, request: HttpRequest) -> Result<HttpRequest, ModifierError> {
        RequestNext::new(self.request_modifiers.clone()).run(request).await
    }

    pub async fn apply_response(&self, response: HttpResponse) -> Result<HttpResponse, ModifierError> {
        ResponseNext::new(self.response_modifiers.clone()).run(response).await
    }
}

impl Default for ModifierPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use crate::http::StatusCode;

    struct AddHeader;

    impl RequestModifier for AddHeader {
        fn handle(
            self: Arc<Self>,
            mut request: HttpRequest,
            next: RequestNext,
        ) -> BoxFuture<'static, Result<HttpRequest, ModifierError>> {
            Box::pin(async move {
                request.headers_mut().insert("X-Injected", "1");
                next.run(request).await
            })
        }
    }

    struct RejectAll;

    impl ResponseModifier for RejectAll {
        fn handle(
            self: Arc<Self>,
            _response: HttpResponse,
            _next: ResponseNext,
        ) -> BoxFuture<'static, Result<HttpResponse, ModifierError>> {
            Box::pin(async move { Err(ModifierError::new("RejectAll", "test rejection")) })
        }
    }

    fn sample_request() -> HttpRequest {
        let raw = b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n";
        crate::http::HttpRequest::parse(raw, "http", None).unwrap().0
    }

    #[tokio::test]
    async fn request_chain_decorates_in_order() {
        let pipeline = ModifierPipeline::new()
            .with_request_modifier(from_request_modifier(Arc::new(AddHeader)));
        let request = pipeline.apply_request(sample_request()).await.unwrap();
        assert_eq!(request.headers().get("x-injected"), Some("1"));
    }

    #[tokio::test]
    async fn response_chain_can_abort() {
        let pipeline = ModifierPipeline::new()
            .with_response_modifier(from_response_modifier(Arc::new(RejectAll)));
        let response = HttpResponse::new(StatusCode::new(200), RequestContext::new());
        assert!(pipeline.apply_response(response).await.is_err());
    }

    #[tokio::test]
    async fn empty_chain_passes_through() {
        let pipeline = ModifierPipeline::new();
        let request = pipeline.apply_request(sample_request()).await.unwrap();
        assert_eq!(request.url().host(), "example.com");
    }
}
