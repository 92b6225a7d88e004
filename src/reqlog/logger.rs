//! The request logger — a collaborator plugged into the modifier pipeline
//! as one request-modifier and one response-modifier, deciding bypass,
//! assigning correlation ids, and persisting exchanges.

use std::pin::Pin;
use std::future::Future;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;

use crate::body;
use crate::context::RequestContext;
use crate::http::{HttpRequest, HttpResponse};
use crate::middleware::{ModifierError, RequestModifier, RequestNext, ResponseModifier, ResponseNext};

use super::filter::RequestLogFilter;
use super::id::CorrelationId;
use super::model::{ProjectId, RequestLog, ResponseLog};
use super::repository::Repository;
use super::scope::Scope;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The mutable settings governing logging decisions, published atomically so
/// control-plane updates never race an in-flight request's read of them.
#[derive(Clone)]
pub struct LoggerState {
    pub active_project_id: ProjectId,
    pub bypass_out_of_scope: bool,
    pub filter: RequestLogFilter,
}

impl Default for LoggerState {
    fn default() -> Self {
        Self {
            active_project_id: ProjectId::NONE,
            bypass_out_of_scope: false,
            filter: RequestLogFilter::new(ProjectId::NONE),
        }
    }
}

/// Correlates, captures, and persists proxied exchanges.
///
/// Installed once into the [`crate::middleware::ModifierPipeline`] on both
/// the request and response chains. Mutable settings (`active_project_id`,
/// `bypass_out_of_scope`, the read-side filter) are published through an
/// [`ArcSwap`] snapshot rather than guarded by a lock, so a request-handling
/// task always reads a consistent settings snapshot without blocking a
/// concurrent control-plane update.
pub struct RequestLogger {
    state: ArcSwap<LoggerState>,
    repository: Arc<dyn Repository>,
    scope: Arc<dyn Scope>,
}

impl RequestLogger {
    pub fn new(repository: Arc<dyn Repository>, scope: Arc<dyn Scope>) -> Self {
        Self { state: ArcSwap::from_pointee(LoggerState::default()), repository, scope }
    }

    pub fn set_active_project_id(&self, project_id: ProjectId) {
        self.update(|state| state.active_project_id = project_id);
    }

    pub fn set_bypass_out_of_scope(&self, bypass: bool) {
        self.update(|state| state.bypass_out_of_scope = bypass);
    }

    pub fn set_find_requests_filter(&self, filter: RequestLogFilter) {
        self.update(|state| state.filter = filter);
    }

    fn update(&self, f: impl FnOnce(&mut LoggerState)) {
        let mut next = (**self.state.load()).clone();
        f(&mut next);
        self.state.store(Arc::new(next));
    }

    pub async fn find_requests(&self) -> Vec<RequestLog> {
        let state = self.state.load();
        let mut filter = state.filter.clone();
        if !filter.project_id.is_set() {
            filter.project_id = state.active_project_id;
        }
        filter.only_in_scope = filter.only_in_scope || state.bypass_out_of_scope;
        self.repository.find_request_logs(&filter, self.scope.as_ref()).await
    }

    pub async fn find_by_id(&self, id: CorrelationId) -> Option<RequestLog> {
        self.repository.find_request_log_by_id(id).await.ok()
    }

    pub async fn clear_requests(&self, project_id: ProjectId) {
        self.repository.clear_request_logs(project_id).await;
    }

    async fn handle_request(self: Arc<Self>, request: HttpRequest, next: RequestNext) -> Result<HttpRequest, ModifierError> {
        let request = next.run(request).await?;

        let state = self.state.load();
        let context = request.context().clone();

        if !state.active_project_id.is_set() {
            context.set_log_bypassed(true);
            return Ok(request);
        }

        let captured = body::capture_request(&request);
        let log = RequestLog {
            id: CorrelationId::new(now_ms()),
            project_id: state.active_project_id,
            method: request.method().clone(),
            url: request.url().clone(),
            version: request.version(),
            headers: request.headers().clone(),
            body: captured.bytes,
        };

        if state.bypass_out_of_scope && !self.scope.is_match(&log, &log.body).await {
            context.set_log_bypassed(true);
            return Ok(request);
        }

        let id = log.id;
        match self.repository.store_request_log(log).await {
            Ok(()) => context.set_log_id(id),
            Err(err) => {
                tracing::error!(error = %err, "failed to persist request log");
                // Nothing was persisted for this exchange — tell the response
                // side to skip logging cleanly instead of tripping the
                // missing-request-id check meant for programming mistakes.
                context.set_log_bypassed(true);
            }
        }

        Ok(request)
    }

    async fn handle_response(
        self: Arc<Self>,
        response: HttpResponse,
        next: ResponseNext,
    ) -> Result<HttpResponse, ModifierError> {
        let mut response = next.run(response).await?;
        let context = response.context().clone();

        if context.is_log_bypassed() {
            return Ok(response);
        }

        let Some(request_id) = context.log_id() else {
            return Err(ModifierError::new(
                "RequestLogger",
                "missing request id on a non-bypassed exchange",
            ));
        };

        let captured = body::capture_response(&response);
        if captured.decoded_gzip {
            response.headers_mut().remove("content-encoding");
        }
        response.set_body(captured.bytes.clone());

        let log = ResponseLog {
            version: response.version(),
            status_code: response.status().as_u16(),
            status_reason: response.status().reason_phrase().to_owned(),
            headers: response.headers().clone(),
            body: captured.bytes,
        };

        let repository = Arc::clone(&self.repository);
        tokio::spawn(async move {
            if let Err(err) = repository.store_response_log(request_id, log).await {
                tracing::error!(error = %err, "failed to persist response log");
            }
        });

        Ok(response)
    }
}

impl RequestModifier for RequestLogger {
    fn handle(self: Arc<Self>, request: HttpRequest, next: RequestNext) -> BoxFuture<'static, Result<HttpRequest, ModifierError>> {
        Box::pin(self.handle_request(request, next))
    }
}

impl ResponseModifier for RequestLogger {
    fn handle(self: Arc<Self>, response: HttpResponse, next: ResponseNext) -> BoxFuture<'static, Result<HttpResponse, ModifierError>> {
        Box::pin(self.handle_response(response, next))
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
