//! Ordered store of active patch rules.
//!
//! Rules are owned by plugins and kept in registration order, which is
//! the order they are applied to each module. Unregistration removes a
//! plugin's rules only; modules already rewritten with them stay as
//! they are.

use std::collections::HashMap;

use crate::rule::{PatchRule, RuleError};

/// Stable handle for a registered rule.
pub type RuleId = u64;

/// A rule together with its registration metadata.
#[derive(Debug, Clone)]
pub struct RegisteredRule {
    pub id: RuleId,
    /// Name of the plugin that registered the rule.
    pub owner: String,
    /// Failures of this rule abort the load instead of being contained.
    pub required: bool,
    pub rule: PatchRule,
}

/// Registry of active rules in registration order.
#[derive(Debug, Default)]
pub struct PatchRegistry {
    rules: Vec<RegisteredRule>,
    next_id: RuleId,
}

impl PatchRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add a rule. Returns its handle.
    pub fn register(
        &mut self,
        owner: &str,
        required: bool,
        rule: PatchRule,
    ) -> Result<RuleId, RuleError> {
        rule.validate()?;
        let id = self.next_id;
        self.next_id += 1;
        self.rules.push(RegisteredRule {
            id,
            owner: owner.to_string(),
            required,
            rule,
        });
        Ok(id)
    }

    /// Remove every rule registered by `owner`. Returns how many were
    /// removed; removing an unknown owner is a no-op.
    pub fn unregister_owner(&mut self, owner: &str) -> usize {
        let before = self.rules.len();
        self.rules.retain(|r| r.owner != owner);
        before - self.rules.len()
    }

    /// All rules in registration order.
    #[must_use]
    pub fn rules(&self) -> &[RegisteredRule] {
        &self.rules
    }

    #[must_use]
    pub fn rule(&self, id: RuleId) -> Option<&RegisteredRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Ids of rules whose find token occurs in `text`, in registration
    /// order. Each distinct token is scanned at most once.
    #[must_use]
    pub fn candidate_ids(&self, text: &str) -> Vec<RuleId> {
        let mut seen: HashMap<&str, bool> = HashMap::new();
        self.rules
            .iter()
            .filter(|r| {
                *seen
                    .entry(r.rule.find.as_str())
                    .or_insert_with(|| text.contains(&r.rule.find))
            })
            .map(|r| r.id)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(find: &str) -> PatchRule {
        PatchRule::new(find).replace(find, "swapped")
    }

    #[test]
    fn test_registration_order_and_ids() {
        let mut reg = PatchRegistry::new();
        let a = reg.register("PluginA", false, rule("alpha")).unwrap();
        let b = reg.register("PluginB", false, rule("beta")).unwrap();
        let c = reg.register("PluginA", false, rule("gamma")).unwrap();

        assert!(a < b && b < c);
        let order: Vec<_> = reg.rules().iter().map(|r| r.id).collect();
        assert_eq!(order, vec![a, b, c]);
        assert_eq!(reg.rule(b).unwrap().owner, "PluginB");
    }

    #[test]
    fn test_register_rejects_invalid_rule() {
        let mut reg = PatchRegistry::new();
        let err = reg.register("P", false, PatchRule::new("")).unwrap_err();
        assert_eq!(err, RuleError::EmptyFind);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_unregister_owner() {
        let mut reg = PatchRegistry::new();
        reg.register("A", false, rule("one")).unwrap();
        reg.register("B", false, rule("two")).unwrap();
        reg.register("A", false, rule("three")).unwrap();

        assert_eq!(reg.unregister_owner("A"), 2);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.rules()[0].owner, "B");

        // Idempotent
        assert_eq!(reg.unregister_owner("A"), 0);
        assert_eq!(reg.unregister_owner("unknown"), 0);
    }

    #[test]
    fn test_candidate_ids_filters_by_find_token() {
        let mut reg = PatchRegistry::new();
        let a = reg.register("A", false, rule("navId:")).unwrap();
        let _b = reg.register("B", false, rule("missing")).unwrap();
        let c = reg.register("C", false, rule("navId:")).unwrap();

        assert_eq!(reg.candidate_ids("f(){navId:1}"), vec![a, c]);
        assert!(reg.candidate_ids("nothing here").is_empty());
    }

    #[test]
    fn test_candidate_ids_after_unregister() {
        let mut reg = PatchRegistry::new();
        reg.register("A", false, rule("tok")).unwrap();
        let b = reg.register("B", false, rule("tok")).unwrap();
        reg.unregister_owner("A");

        assert_eq!(reg.candidate_ids("a tok b"), vec![b]);
    }
}
