//! The single seam between the host loader and the patch engine.
//!
//! The interceptor receives each module's raw text exactly once during
//! a load session, runs the active rule set over it, and returns the
//! text the host should evaluate. Whatever happens inside the engine,
//! the host always gets usable text back: every failure short of a
//! required-plugin failure degrades to the unpatched original.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, error};
use xxhash_rust::xxh3::xxh3_64;

use crate::applier::{self, PatchResult, RuleOutcome};
use crate::matcher::{panic_message, RuleFailure};
use crate::registry::{PatchRegistry, RuleId};

/// Frozen snapshot of one intercepted module.
///
/// Records are append-only; once a module has been handed back to the
/// host its record never changes.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    /// Host module id (webpack chunk member, file stem, ...).
    pub id: String,
    /// Raw text as received from the host.
    pub original: String,
    /// Text handed back to the host.
    pub patched: String,
    /// Rules that rewrote this module, in application order.
    pub applied_rules: Vec<RuleId>,
    /// Per-rule outcomes for every rule whose find token matched.
    pub results: Vec<PatchResult>,
    /// xxh3 of the original text, for change tracking across builds.
    pub fingerprint: u64,
    /// Set when the engine itself panicked on this module and the
    /// original text was returned.
    pub engine_error: Option<String>,
}

/// A required-plugin failure that must abort the load.
#[derive(Debug, Clone)]
pub struct FatalFailure {
    pub module_id: String,
    pub rule_id: RuleId,
    pub owner: String,
    pub failure: RuleFailure,
}

/// Intercepts module text during a single load session.
#[derive(Debug, Default)]
pub struct ModuleInterceptor {
    records: Vec<ModuleRecord>,
    index: HashMap<String, usize>,
    consumed: HashSet<RuleId>,
    #[cfg(test)]
    panic_on_next: bool,
}

impl ModuleInterceptor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch one module and return the text for the host to evaluate.
    ///
    /// Intercepting the same module id twice returns the text produced
    /// the first time; the module is not re-patched.
    pub fn intercept(&mut self, registry: &PatchRegistry, module_id: &str, source: &str) -> String {
        if let Some(&i) = self.index.get(module_id) {
            debug!("module {module_id} intercepted again; reusing existing record");
            return self.records[i].patched.clone();
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            #[cfg(test)]
            if self.panic_on_next {
                panic!("injected interceptor panic");
            }
            applier::apply_to_module(registry, &self.consumed, module_id, source)
        }));

        let record = match outcome {
            Ok(report) => {
                self.consumed.extend(report.consumed.iter().copied());
                ModuleRecord {
                    id: module_id.to_string(),
                    original: source.to_string(),
                    applied_rules: report
                        .results
                        .iter()
                        .filter(|r| r.is_applied())
                        .map(|r| r.rule_id)
                        .collect(),
                    results: report.results,
                    fingerprint: xxh3_64(source.as_bytes()),
                    engine_error: None,
                    patched: report.text,
                }
            }
            Err(payload) => {
                let message = panic_message(&*payload);
                error!("patch engine panicked on module {module_id}, returning original text: {message}");
                ModuleRecord {
                    id: module_id.to_string(),
                    original: source.to_string(),
                    patched: source.to_string(),
                    applied_rules: Vec::new(),
                    results: Vec::new(),
                    fingerprint: xxh3_64(source.as_bytes()),
                    engine_error: Some(message),
                }
            }
        };

        let patched = record.patched.clone();
        self.index.insert(record.id.clone(), self.records.len());
        self.records.push(record);
        patched
    }

    /// All module records, in interception order.
    #[must_use]
    pub fn records(&self) -> &[ModuleRecord] {
        &self.records
    }

    #[must_use]
    pub fn record(&self, module_id: &str) -> Option<&ModuleRecord> {
        self.index.get(module_id).map(|&i| &self.records[i])
    }

    /// Modules intercepted so far.
    #[must_use]
    pub fn module_count(&self) -> usize {
        self.records.len()
    }

    /// Modules rewritten by at least one rule.
    #[must_use]
    pub fn patched_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| !r.applied_rules.is_empty())
            .count()
    }

    /// The first required-plugin failure of the session, if any.
    #[must_use]
    pub fn first_fatal(&self) -> Option<FatalFailure> {
        for record in &self.records {
            for result in &record.results {
                if let RuleOutcome::Failed {
                    failure,
                    fatal: true,
                } = &result.outcome
                {
                    return Some(FatalFailure {
                        module_id: record.id.clone(),
                        rule_id: result.rule_id,
                        owner: result.owner.clone(),
                        failure: failure.clone(),
                    });
                }
            }
        }
        None
    }

    /// Owners whose rules failed without aborting the load, sorted.
    #[must_use]
    pub fn contained_failure_owners(&self) -> BTreeSet<String> {
        let mut owners = BTreeSet::new();
        for record in &self.records {
            for result in &record.results {
                if matches!(
                    result.outcome,
                    RuleOutcome::Failed { fatal: false, .. }
                ) {
                    owners.insert(result.owner.clone());
                }
            }
        }
        owners
    }

    #[cfg(test)]
    fn arm_panic(&mut self) {
        self.panic_on_next = true;
    }
}
