//! Thread-local regex compilation cache for patch patterns.
//!
//! Caches compiled regexes keyed by their canonical pattern text to
//! avoid redundant recompilation when many modules are checked against
//! the same rule set. Cache is capped at 256 entries; all entries are
//! evicted when full.

use regex::Regex;
use std::cell::RefCell;
use std::collections::HashMap;

use crate::matcher::RuleFailure;

const MAX_CACHE_ENTRIES: usize = 256;

thread_local! {
    // Keyed by the canonical pattern text, after shorthand expansion,
    // so equivalent patterns written differently still share an entry.
    static REGEX_CACHE: RefCell<HashMap<String, Regex>> =
        RefCell::new(HashMap::new());
}

/// Get a compiled regex from cache, or compile and cache it.
///
/// The pattern must already be in canonical form (see
/// [`crate::matcher::canonicalize_pattern`]). Regexes are cached
/// thread-locally, capped at 256 entries. When the cap is reached, the
/// cache is cleared and rebuilt on demand. Compilation failures are
/// not cached.
pub fn get_or_compile(canonical: &str) -> Result<Regex, RuleFailure> {
    REGEX_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();

        if let Some(rx) = cache.get(canonical) {
            return Ok(rx.clone());
        }

        // Evict all if at capacity (simple but effective for batch workloads)
        if cache.len() >= MAX_CACHE_ENTRIES {
            cache.clear();
        }

        let compiled = Regex::new(canonical).map_err(|e| RuleFailure::InvalidPattern {
            pattern: canonical.to_string(),
            message: e.to_string(),
        })?;
        cache.insert(canonical.to_string(), compiled.clone());
        Ok(compiled)
    })
}

/// Clear the regex cache (mainly for testing).
pub fn clear_cache() {
    REGEX_CACHE.with(|cache| {
        cache.borrow_mut().clear();
    });
}

/// Get cache statistics for monitoring.
pub fn cache_size() -> usize {
    REGEX_CACHE.with(|cache| cache.borrow().len())
}
