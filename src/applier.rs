//! Applies the active rule set to one module's text.
//!
//! Rules run in registration order. Each rule sees the text produced
//! by the rules before it, so stacked rules compose. A rule that fails
//! leaves the module exactly as the previous rule left it; only the
//! failing rule's own rewrites are discarded.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::matcher::{self, RuleApplication, RuleFailure};
use crate::registry::{PatchRegistry, RuleId};

/// Outcome of one rule against one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    /// The rule matched and rewrote the text.
    Applied { replacements: usize },
    /// The find token matched but the rule could not be applied.
    /// `fatal` marks failures from required plugins.
    Failed { failure: RuleFailure, fatal: bool },
}

/// Per-rule record produced while patching a module.
///
/// Rules whose find token never matched the module produce no record.
#[derive(Debug, Clone)]
pub struct PatchResult {
    pub rule_id: RuleId,
    pub owner: String,
    pub outcome: RuleOutcome,
}

impl PatchResult {
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self.outcome, RuleOutcome::Applied { .. })
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self.outcome, RuleOutcome::Failed { fatal: true, .. })
    }
}

/// Everything the interceptor needs after patching one module.
#[derive(Debug, Clone)]
#[must_use = "ModuleReport carries the patched text"]
pub struct ModuleReport {
    pub module_id: String,
    /// Final text after all applicable rules ran.
    pub text: String,
    /// One record per rule whose find token matched.
    pub results: Vec<PatchResult>,
    /// One-shot rules consumed while processing this module. The
    /// caller must exclude these from later modules.
    pub consumed: Vec<RuleId>,
}

impl ModuleReport {
    /// True if any rule rewrote the module.
    #[must_use]
    pub fn is_patched(&self) -> bool {
        self.results.iter().any(PatchResult::is_applied)
    }
}

/// Run every active rule against one module's text.
///
/// `already_consumed` holds one-shot rules spent on earlier modules;
/// they are skipped here. A one-shot rule is consumed by the first
/// module whose text contains its find token, whether or not the rule
/// then applied cleanly.
pub fn apply_to_module(
    registry: &PatchRegistry,
    already_consumed: &HashSet<RuleId>,
    module_id: &str,
    source: &str,
) -> ModuleReport {
    // Cheap pre-filter against the original text. Valid only until the
    // first rewrite: a later rule may target text an earlier rule
    // introduced, so once the text changes every remaining rule is
    // checked against the current text.
    let initial: HashSet<RuleId> = registry.candidate_ids(source).into_iter().collect();

    let mut text = source.to_string();
    let mut rewritten = false;
    let mut results = Vec::new();
    let mut consumed = Vec::new();

    for reg in registry.rules() {
        if already_consumed.contains(&reg.id) {
            continue;
        }
        if !rewritten && !initial.contains(&reg.id) {
            continue;
        }

        match matcher::apply_rule(&text, &reg.rule) {
            RuleApplication::Skipped => {}
            RuleApplication::Applied {
                text: next,
                replacements,
            } => {
                debug!(
                    "rule {} ({}) applied to module {module_id}: {replacements} replacement(s)",
                    reg.id, reg.owner
                );
                text = next;
                rewritten = true;
                results.push(PatchResult {
                    rule_id: reg.id,
                    owner: reg.owner.clone(),
                    outcome: RuleOutcome::Applied { replacements },
                });
                if !reg.rule.all {
                    consumed.push(reg.id);
                }
            }
            RuleApplication::Failed(failure) => {
                warn!(
                    "rule {} ({}) failed on module {module_id}: {failure}",
                    reg.id, reg.owner
                );
                results.push(PatchResult {
                    rule_id: reg.id,
                    owner: reg.owner.clone(),
                    outcome: RuleOutcome::Failed {
                        failure,
                        fatal: reg.required,
                    },
                });
                if !reg.rule.all {
                    consumed.push(reg.id);
                }
            }
        }
    }

    ModuleReport {
        module_id: module_id.to_string(),
        text,
        results,
        consumed,
    }
}
