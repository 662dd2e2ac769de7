//! Inbound message validation.
//!
//! Each message family has its own pipeline. In strict mode a pipeline
//! aborts on the first failure; otherwise it runs to the end and reports
//! every issue it found. A message is acceptable only when the error list
//! comes back empty.

mod logout;
mod response;

pub use logout::{LogoutRequestValidator, LogoutResponseValidator};
pub use response::{ResponseData, ResponseValidator};

use sp_core::SpError;

/// Error accumulator honoring the strict-mode abort rule.
pub(crate) struct Collector {
    strict: bool,
    errors: Vec<SpError>,
}

impl Collector {
    pub(crate) fn new(strict: bool) -> Self {
        Self {
            strict,
            errors: Vec::new(),
        }
    }

    /// Records a failure; returns true when the pipeline must abort.
    pub(crate) fn push(&mut self, err: SpError) -> bool {
        tracing::debug!(kind = %err.kind, detail = %err.detail, "validation failure");
        self.errors.push(err);
        self.strict
    }

    /// Records the failure of `result` if any; returns true when the
    /// pipeline must abort.
    pub(crate) fn check(&mut self, result: Result<(), SpError>) -> bool {
        match result {
            Ok(()) => false,
            Err(e) => self.push(e),
        }
    }

    pub(crate) fn into_errors(self) -> Vec<SpError> {
        self.errors
    }

    pub(crate) fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// URL comparison tolerating a trailing slash on either side.
pub(crate) fn url_eq(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_comparison_tolerates_trailing_slash() {
        assert!(url_eq("https://sp.example/acs", "https://sp.example/acs/"));
        assert!(url_eq("https://sp.example/acs/", "https://sp.example/acs"));
        assert!(!url_eq("https://sp.example/acs", "https://sp.example/other"));
    }
}
