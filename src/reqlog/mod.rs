//! Request logging — the collaborator that hangs off the modifier pipeline
//! and records in-flight traffic, filtered by project activation and
//! scope-matching rules.
//!
//! Submodules split the collaborator's moving parts: correlation ids, the
//! persisted record shape, the read-side filter, the scope matcher, the
//! persistence boundary, and finally the logger itself that wires all of the
//! above into the pipeline.

pub mod filter;
pub mod id;
pub mod logger;
pub mod model;
pub mod repository;
pub mod scope;

pub use filter::RequestLogFilter;
pub use id::CorrelationId;
pub use logger::{LoggerState, RequestLogger};
pub use model::{ProjectId, RequestLog, ResponseLog};
pub use repository::{MemoryRepository, Repository, RepositoryError};
pub use scope::{RegexScope, Scope};
