//! Response-exception-mapper chain evaluation.
//!
//! Mappers run in ascending priority order. Every mapper's `handles` is
//! invoked for each evaluated response — conformance suites observe this —
//! but only the first match supplies the propagated error. The built-in
//! [`DefaultStatusMapper`] sits at rank `u32::MAX`, after any user mapper,
//! and converts status ≥ 400 into a generic HTTP fault unless disabled.

use std::sync::Arc;

use restbind_types::{DomainError, HeaderMap, WireResponse};
use tracing::debug;

use crate::provider::ExceptionMapper;

/// Built-in fallback mapper for failed statuses.
pub struct DefaultStatusMapper;

impl ExceptionMapper for DefaultStatusMapper {
    fn priority(&self) -> u32 {
        u32::MAX
    }

    fn handles(&self, status: u16, _headers: &HeaderMap) -> bool {
        status >= 400
    }

    fn to_error(&self, response: &WireResponse) -> DomainError {
        DomainError::new(response.status, format!("server returned status {}", response.status))
            .with_body(response.body.clone())
    }
}

/// Evaluate the mapper chain against a response.
///
/// `mappers` must already be sorted ascending by priority; the registry
/// guarantees this. Responses are fully buffered, so every mapper reads the
/// same body without any stream rewinding.
pub fn evaluate(mappers: &[Arc<dyn ExceptionMapper>], response: &WireResponse) -> Option<DomainError> {
    let mut first_match: Option<&Arc<dyn ExceptionMapper>> = None;
    for mapper in mappers {
        // handles() is called on every mapper even after a match.
        if mapper.handles(response.status, &response.headers) && first_match.is_none() {
            first_match = Some(mapper);
        }
    }
    let matched = first_match?;
    let error = matched.to_error(response);
    debug!(status = response.status, error = %error, "response mapped to domain error");
    Some(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingMapper {
        priority: u32,
        matches: bool,
        label: &'static str,
        handled: AtomicUsize,
    }

    impl CountingMapper {
        fn new(priority: u32, matches: bool, label: &'static str) -> Arc<Self> {
            Arc::new(Self {
                priority,
                matches,
                label,
                handled: AtomicUsize::new(0),
            })
        }
    }

    impl ExceptionMapper for CountingMapper {
        fn priority(&self) -> u32 {
            self.priority
        }

        fn handles(&self, _status: u16, _headers: &HeaderMap) -> bool {
            self.handled.fetch_add(1, Ordering::SeqCst);
            self.matches
        }

        fn to_error(&self, response: &WireResponse) -> DomainError {
            DomainError::new(response.status, self.label)
        }
    }

    #[test]
    fn first_match_by_priority_wins_but_all_handles_run() {
        let low = CountingMapper::new(50, true, "low");
        let high = CountingMapper::new(100, true, "high");
        // Registry order: ascending priority.
        let chain: Vec<Arc<dyn ExceptionMapper>> = vec![low.clone(), high.clone()];

        let error = evaluate(&chain, &WireResponse::new(401)).expect("match");
        assert_eq!(error.message, "low", "priority 50 mapper supplies the error");
        assert_eq!(low.handled.load(Ordering::SeqCst), 1);
        assert_eq!(high.handled.load(Ordering::SeqCst), 1, "later mappers are still consulted");
    }

    #[test]
    fn no_match_returns_none() {
        let mapper = CountingMapper::new(50, false, "never");
        let chain: Vec<Arc<dyn ExceptionMapper>> = vec![mapper.clone()];

        assert!(evaluate(&chain, &WireResponse::new(500)).is_none());
        assert_eq!(mapper.handled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_mapper_faults_on_client_and_server_errors_only() {
        let mapper = DefaultStatusMapper;
        let headers = HeaderMap::new();
        assert!(!mapper.handles(200, &headers));
        assert!(!mapper.handles(302, &headers));
        assert!(mapper.handles(400, &headers));
        assert!(mapper.handles(503, &headers));

        let error = mapper.to_error(&WireResponse::new(503).with_body(b"overloaded".to_vec()));
        assert_eq!(error.status, 503);
        assert_eq!(error.body_text().as_deref(), Some("overloaded"));
    }
}
