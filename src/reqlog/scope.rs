//! Scope matching — deciding whether a request counts as "in scope" for the
//! currently active project.

use async_trait::async_trait;
use regex::Regex;

use super::model::RequestLog;

/// Evaluates whether a captured exchange is in scope.
///
/// Kept as a trait (rather than a concrete type) since real deployments
/// plug in project-specific rule sets; [`RegexScope`] is the fixture used by
/// the in-memory collaborators and the test suite.
#[async_trait]
pub trait Scope: Send + Sync {
    /// Returns `true` if `log` (with `body` as its captured, decoded body)
    /// matches this scope's rules.
    async fn is_match(&self, log: &RequestLog, body: &[u8]) -> bool;
}

/// A scope defined by regex rules over the URL, a chosen header, and the
/// body, all of which must match (when present) for a request to be
/// in-scope.
#[derive(Clone)]
pub struct RegexScope {
    url_pattern: Option<Regex>,
    header_name: Option<String>,
    header_pattern: Option<Regex>,
    body_pattern: Option<Regex>,
}

impl RegexScope {
    pub fn new() -> Self {
        Self { url_pattern: None, header_name: None, header_pattern: None, body_pattern: None }
    }

    #[must_use]
    pub fn with_url_pattern(mut self, pattern: Regex) -> Self {
        self.url_pattern = Some(pattern);
        self
    }

    #[must_use]
    pub fn with_header_pattern(mut self, name: impl Into<String>, pattern: Regex) -> Self {
        self.header_name = Some(name.into());
        self.header_pattern = Some(pattern);
        self
    }

    #[must_use]
    pub fn with_body_pattern(mut self, pattern: Regex) -> Self {
        self.body_pattern = Some(pattern);
        self
    }
}

impl Default for RegexScope {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scope for RegexScope {
    async fn is_match(&self, log: &RequestLog, body: &[u8]) -> bool {
        if let Some(pattern) = &self.url_pattern {
            if !pattern.is_match(&log.url.to_string()) {
                return false;
            }
        }

        if let (Some(name), Some(pattern)) = (&self.header_name, &self.header_pattern) {
            match log.headers.get(name) {
                Some(value) if pattern.is_match(value) => {}
                _ => return false,
            }
        }

        if let Some(pattern) = &self.body_pattern {
            let text = String::from_utf8_lossy(body);
            if !pattern.is_match(&text) {
                return false;
            }
        }

        true
    }
}
