//! Persistence contract for request/response logs, plus an in-memory
//! fixture implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use super::filter::RequestLogFilter;
use super::id::CorrelationId;
use super::model::{ProjectId, RequestLog, ResponseLog};
use super::scope::Scope;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("no request log found for id {0}")]
    RequestNotFound(CorrelationId),

    #[error("project id must be non-zero")]
    ProjectIdMustBeSet,
}

/// Durable storage for proxied-exchange logs.
///
/// Kept as a trait so the core does not depend on a concrete storage
/// engine; [`MemoryRepository`] is the fixture used by tests and by the
/// default binary when no external store is configured.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn store_request_log(&self, log: RequestLog) -> Result<(), RepositoryError>;

    async fn store_response_log(
        &self,
        request_id: CorrelationId,
        log: ResponseLog,
    ) -> Result<(), RepositoryError>;

    async fn find_request_logs(
        &self,
        filter: &RequestLogFilter,
        scope: &dyn Scope,
    ) -> Vec<RequestLog>;

    async fn find_request_log_by_id(&self, id: CorrelationId) -> Result<RequestLog, RepositoryError>;

    async fn clear_request_logs(&self, project_id: ProjectId);
}

/// An in-memory [`Repository`], ordered by correlation id (and therefore by
/// insertion time).
#[derive(Default)]
pub struct MemoryRepository {
    entries: Mutex<BTreeMap<CorrelationId, (RequestLog, Option<ResponseLog>)>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn store_request_log(&self, log: RequestLog) -> Result<(), RepositoryError> {
        if !log.project_id.is_set() {
            return Err(RepositoryError::ProjectIdMustBeSet);
        }
        self.entries.lock().await.insert(log.id, (log, None));
        Ok(())
    }

    async fn store_response_log(
        &self,
        request_id: CorrelationId,
        log: ResponseLog,
    ) -> Result<(), RepositoryError> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(&request_id)
            .ok_or(RepositoryError::RequestNotFound(request_id))?;
        entry.1 = Some(log);
        Ok(())
    }

    async fn find_request_logs(
        &self,
        filter: &RequestLogFilter,
        scope: &dyn Scope,
    ) -> Vec<RequestLog> {
        let entries = self.entries.lock().await;
        let mut out = Vec::new();
        for (request, _) in entries.values() {
            if request.project_id != filter.project_id {
                continue;
            }
            if filter.only_in_scope && !scope.is_match(request, &request.body).await {
                continue;
            }
            if let Some(search) = &filter.search {
                if !search(request) {
                    continue;
                }
            }
            out.push(request.clone());
        }
        out
    }

    async fn find_request_log_by_id(&self, id: CorrelationId) -> Result<RequestLog, RepositoryError> {
        self.entries
            .lock()
            .await
            .get(&id)
            .map(|(req, _)| req.clone())
            .ok_or(RepositoryError::RequestNotFound(id))
    }

    async fn clear_request_logs(&self, project_id: ProjectId) {
        self.entries.lock().await.retain(|_, (req, _)| req.project_id != project_id);
    }
}
