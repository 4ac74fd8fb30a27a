//! Declarative patch rules: the unit of change contributed by plugins.
//!
//! A rule selects target modules with a literal `find` token and carries
//! one or more replacements that rewrite the module text. Replacements
//! match either a literal substring or a regex, and rewrite through a
//! capture template or a custom closure.

use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// View over a single match handed to replacement closures.
///
/// Group 0 is always the full matched text. Further groups are the
/// regex captures, `None` where a group did not participate.
pub struct MatchView<'a> {
    groups: Vec<Option<&'a str>>,
}

impl<'a> MatchView<'a> {
    pub(crate) fn new(groups: Vec<Option<&'a str>>) -> Self {
        debug_assert!(matches!(groups.first(), Some(Some(_))));
        Self { groups }
    }

    /// The full matched text.
    #[must_use]
    pub fn full(&self) -> &'a str {
        self.groups[0].unwrap_or("")
    }

    /// Captured group by index. Index 0 is the full match.
    #[must_use]
    pub fn group(&self, index: usize) -> Option<&'a str> {
        self.groups.get(index).copied().flatten()
    }

    /// Number of groups, counting the full match.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

/// Replacement closure: receives the match and returns new text.
///
/// Returning `Err` reports a controlled failure; a panic inside the
/// closure is caught and reported the same way.
pub type RewriteFn = Rc<dyn Fn(&MatchView<'_>) -> Result<String, String>>;

/// What a replacement matches inside the module text.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Exact substring; replaces the first occurrence.
    Literal(String),
    /// Regular expression. `global` rewrites every match instead of
    /// only the first.
    Pattern { pattern: String, global: bool },
}

impl Matcher {
    /// Human-readable pattern text for diagnostics.
    #[must_use]
    pub fn describe(&self) -> &str {
        match self {
            Matcher::Literal(s) => s,
            Matcher::Pattern { pattern, .. } => pattern,
        }
    }
}

/// How matched text is rewritten.
#[derive(Clone)]
pub enum Rewrite {
    /// Template with `$1`, `${name}` and `$&` references.
    Template(String),
    /// Custom closure over the match.
    Func(RewriteFn),
}

impl fmt::Debug for Rewrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rewrite::Template(t) => f.debug_tuple("Template").field(t).finish(),
            Rewrite::Func(_) => f.debug_tuple("Func").field(&"<closure>").finish(),
        }
    }
}

/// One match/rewrite pair inside a rule.
#[derive(Debug, Clone)]
pub struct ReplacementSpec {
    pub matcher: Matcher,
    pub rewrite: Rewrite,
}

impl ReplacementSpec {
    pub fn new(matcher: Matcher, rewrite: Rewrite) -> Self {
        Self { matcher, rewrite }
    }
}

/// A declarative patch rule.
///
/// The `find` token is a cheap applicability filter: a module whose raw
/// text does not contain it is never touched by this rule. Once a
/// module passes the filter, every replacement must succeed or the
/// module is left untouched by this rule.
#[derive(Debug, Clone)]
#[must_use = "PatchRule does nothing until registered"]
pub struct PatchRule {
    /// Literal substring that selects candidate modules.
    pub find: String,
    /// Keep applying to later modules instead of stopping after the
    /// first module whose text contains `find`.
    pub all: bool,
    /// Replacements applied in order against the same module.
    pub replacements: Vec<ReplacementSpec>,
    /// Semver range of host builds this rule applies to.
    pub host_version_range: Option<String>,
}

/// Errors found while validating a rule definition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("rule has an empty find token")]
    EmptyFind,

    #[error("rule '{find}' has no replacements")]
    NoReplacements { find: String },

    #[error("rule '{find}' has an empty matcher pattern")]
    EmptyPattern { find: String },

    #[error("rule '{find}' has an invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        find: String,
        pattern: String,
        message: String,
    },
}

impl PatchRule {
    /// Start a rule matching modules that contain `find`.
    pub fn new(find: impl Into<String>) -> Self {
        Self {
            find: find.into(),
            all: false,
            replacements: Vec::new(),
            host_version_range: None,
        }
    }

    /// Apply to every module containing the find token, not just the first.
    pub fn all_modules(mut self) -> Self {
        self.all = true;
        self
    }

    /// Restrict the rule to a semver range of host builds.
    pub fn for_host_range(mut self, range: impl Into<String>) -> Self {
        self.host_version_range = Some(range.into());
        self
    }

    /// Replace the first occurrence of a literal substring.
    pub fn replace(mut self, needle: impl Into<String>, template: impl Into<String>) -> Self {
        self.replacements.push(ReplacementSpec::new(
            Matcher::Literal(needle.into()),
            Rewrite::Template(template.into()),
        ));
        self
    }

    /// Replace the first regex match with a capture template.
    pub fn replace_pattern(
        mut self,
        pattern: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        self.replacements.push(ReplacementSpec::new(
            Matcher::Pattern {
                pattern: pattern.into(),
                global: false,
            },
            Rewrite::Template(template.into()),
        ));
        self
    }

    /// Replace every regex match with a capture template.
    pub fn replace_pattern_all(
        mut self,
        pattern: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        self.replacements.push(ReplacementSpec::new(
            Matcher::Pattern {
                pattern: pattern.into(),
                global: true,
            },
            Rewrite::Template(template.into()),
        ));
        self
    }

    /// Replace the first regex match through a closure.
    pub fn replace_with<F>(mut self, pattern: impl Into<String>, f: F) -> Self
    where
        F: Fn(&MatchView<'_>) -> Result<String, String> + 'static,
    {
        self.replacements.push(ReplacementSpec::new(
            Matcher::Pattern {
                pattern: pattern.into(),
                global: false,
            },
            Rewrite::Func(Rc::new(f)),
        ));
        self
    }

    /// Push a fully custom replacement.
    pub fn replacement(mut self, spec: ReplacementSpec) -> Self {
        self.replacements.push(spec);
        self
    }

    /// Validate the rule shape and compile its patterns.
    ///
    /// Called at registration so a malformed rule is rejected before
    /// any module is intercepted.
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.find.is_empty() {
            return Err(RuleError::EmptyFind);
        }
        if self.replacements.is_empty() {
            return Err(RuleError::NoReplacements {
                find: self.find.clone(),
            });
        }
        for spec in &self.replacements {
            match &spec.matcher {
                Matcher::Literal(s) => {
                    if s.is_empty() {
                        return Err(RuleError::EmptyPattern {
                            find: self.find.clone(),
                        });
                    }
                }
                Matcher::Pattern { pattern, .. } => {
                    if pattern.is_empty() {
                        return Err(RuleError::EmptyPattern {
                            find: self.find.clone(),
                        });
                    }
                    let canonical = crate::matcher::canonicalize_pattern(pattern);
                    crate::cache::get_or_compile(&canonical).map_err(|e| {
                        RuleError::InvalidPattern {
                            find: self.find.clone(),
                            pattern: pattern.clone(),
                            message: e.to_string(),
                        }
                    })?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_shape() {
        let rule = PatchRule::new("navId:")
            .replace("navId:", "extra:1,navId:")
            .replace_pattern(r"id=(\d+)", "id=${1}0")
            .all_modules()
            .for_host_range(">=1.0.9000");

        assert_eq!(rule.find, "navId:");
        assert!(rule.all);
        assert_eq!(rule.replacements.len(), 2);
        assert_eq!(rule.host_version_range.as_deref(), Some(">=1.0.9000"));
    }

    #[test]
    fn test_validate_empty_find() {
        let rule = PatchRule::new("").replace("a", "b");
        assert_eq!(rule.validate(), Err(RuleError::EmptyFind));
    }

    #[test]
    fn test_validate_no_replacements() {
        let rule = PatchRule::new("tok");
        assert!(matches!(
            rule.validate(),
            Err(RuleError::NoReplacements { .. })
        ));
    }

    #[test]
    fn test_validate_bad_pattern() {
        let rule = PatchRule::new("tok").replace_pattern("(unclosed", "x");
        assert!(matches!(
            rule.validate(),
            Err(RuleError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_validate_ok() {
        let rule = PatchRule::new("tok").replace_pattern(r"\i\.setter", "hook.${0}");
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_match_view_groups() {
        let view = MatchView::new(vec![Some("ab"), Some("a"), None]);
        assert_eq!(view.full(), "ab");
        assert_eq!(view.group(0), Some("ab"));
        assert_eq!(view.group(1), Some("a"));
        assert_eq!(view.group(2), None);
        assert_eq!(view.group(9), None);
        assert_eq!(view.group_count(), 3);
    }

    #[test]
    fn test_rewrite_debug_hides_closure() {
        let rw = Rewrite::Func(Rc::new(|_m| Ok(String::new())));
        assert!(format!("{rw:?}").contains("closure"));
    }
}
