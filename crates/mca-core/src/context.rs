//! Shared analysis context handed to extensions.
//!
//! The host registers one [`AnalysisText`] and one [`AnalysisResults`] in the
//! container before extensions run. Extensions read the text and append
//! findings; later extensions see what earlier ones appended.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::container::Container;
use crate::error::CoreResult;

/// Container key of the text under analysis.
pub const ANALYSIS_TEXT_KEY: &str = "analysis:text";
/// Container key of the shared results collection.
pub const ANALYSIS_RESULTS_KEY: &str = "analysis:results";

/// The text under analysis (a log, a crash report).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisText(pub String);

impl AnalysisText {
    /// Borrow the text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A single finding contributed by an extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Name of the extension that produced it.
    pub extension: String,
    /// Extension-defined detail.
    pub detail: Value,
}

/// Append-only collection of findings.
#[derive(Debug, Default)]
pub struct AnalysisResults {
    findings: Mutex<Vec<Finding>>,
}

impl AnalysisResults {
    /// Create an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one finding.
    pub fn append(&self, finding: Finding) {
        self.findings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(finding);
    }

    /// Copy of every finding in append order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Finding> {
        self.findings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of findings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.findings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Register `text` and a fresh results collection in `container`.
///
/// Returns the results collection so the caller can read it afterwards.
pub fn install_analysis(container: &Container, text: impl Into<String>) -> Arc<AnalysisResults> {
    let results = Arc::new(AnalysisResults::new());
    container.register_instance(ANALYSIS_TEXT_KEY, Arc::new(AnalysisText(text.into())));
    container.register_instance(ANALYSIS_RESULTS_KEY, Arc::clone(&results));
    results
}

/// Resolve the text registered by [`install_analysis`].
///
/// # Errors
///
/// Returns an error if no analysis text is registered.
pub fn analysis_text(container: &Container) -> CoreResult<Arc<AnalysisText>> {
    container.resolve::<AnalysisText>(ANALYSIS_TEXT_KEY)
}

/// Resolve the results registered by [`install_analysis`].
///
/// # Errors
///
/// Returns an error if no results collection is registered.
pub fn analysis_results(container: &Container) -> CoreResult<Arc<AnalysisResults>> {
    container.resolve::<AnalysisResults>(ANALYSIS_RESULTS_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_install_and_resolve() {
        let container = Container::new();
        let results = install_analysis(&container, "FATAL: out of memory");

        assert_eq!(analysis_text(&container).unwrap().as_str(), "FATAL: out of memory");

        analysis_results(&container).unwrap().append(Finding {
            extension: "oom".into(),
            detail: json!({"kind": "oom"}),
        });
        assert_eq!(results.len(), 1);
        assert_eq!(results.snapshot()[0].extension, "oom");
    }

    #[test]
    fn test_missing_context_is_error() {
        let container = Container::new();
        assert!(analysis_text(&container).is_err());
        assert!(analysis_results(&container).is_err());
    }
}
