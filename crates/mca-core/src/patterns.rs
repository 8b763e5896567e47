//! Compiled pattern cache.
//!
//! One instance is created at startup and injected wherever patterns are
//! compiled; tests create their own or call [`PatternCache::clear`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use regex::Regex;

use crate::error::{CoreError, CoreResult};

/// Container key under which the host registers its shared [`PatternCache`].
pub const PATTERN_CACHE_KEY: &str = "cache:patterns";

/// Cache of compiled regular expressions keyed by their source.
#[derive(Debug, Default)]
pub struct PatternCache {
    compiled: Mutex<HashMap<String, Arc<Regex>>>,
}

impl PatternCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the compiled form of `pattern`, compiling it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPattern`] if the pattern does not compile.
    /// Failed compilations are not cached.
    pub fn get(&self, pattern: &str) -> CoreResult<Arc<Regex>> {
        if let Some(re) = self.lock().get(pattern) {
            return Ok(Arc::clone(re));
        }

        let re = Arc::new(Regex::new(pattern).map_err(|e| CoreError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?);

        Ok(Arc::clone(
            self.lock()
                .entry(pattern.to_string())
                .or_insert(re),
        ))
    }

    /// Whether `pattern` matches anywhere in `text`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPattern`] if the pattern does not compile.
    pub fn is_match(&self, pattern: &str, text: &str) -> CoreResult<bool> {
        Ok(self.get(pattern)?.is_match(text))
    }

    /// Number of cached patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every compiled pattern.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Regex>>> {
        self.compiled.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
