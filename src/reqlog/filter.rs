//! Query filter for the request-log read side.

use std::sync::Arc;

use super::model::{ProjectId, RequestLog};

/// Filters applied by [`super::repository::Repository::find_request_logs`].
///
/// The search-expression evaluator is kept external to the core: callers
/// supply an arbitrary predicate over a [`RequestLog`] rather than the core
/// owning a search-expression language.
#[derive(Clone)]
pub struct RequestLogFilter {
    pub project_id: ProjectId,
    pub only_in_scope: bool,
    pub search: Option<Arc<dyn Fn(&RequestLog) -> bool + Send + Sync>>,
}

impl RequestLogFilter {
    pub fn new(project_id: ProjectId) -> Self {
        Self { project_id, only_in_scope: false, search: None }
    }

    #[must_use]
    pub fn only_in_scope(mut self, only_in_scope: bool) -> Self {
        self.only_in_scope = only_in_scope;
        self
    }

    #[must_use]
    pub fn with_search(mut self, predicate: Arc<dyn Fn(&RequestLog) -> bool + Send + Sync>) -> Self {
        self.search = Some(predicate);
        self
    }
}
