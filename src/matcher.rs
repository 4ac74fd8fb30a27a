//! Rule evaluation against raw module text.
//!
//! The entry point is [`apply_rule`]: it fast-rejects modules that do
//! not contain the rule's find token, then runs each replacement in
//! order against the progressively rewritten text. Application is
//! transactional per rule: if any replacement fails, the caller gets
//! the input text back untouched.

use std::panic::{catch_unwind, AssertUnwindSafe};

use thiserror::Error;

use crate::cache;
use crate::rule::{MatchView, Matcher, PatchRule, ReplacementSpec, Rewrite, RewriteFn};

/// Expansion of the `\i` identifier shorthand.
pub(crate) const IDENT_EXPANSION: &str = r"(?:[A-Za-z_$][\w$]*)";

/// Expand pattern shorthands into plain regex syntax.
///
/// `\i` stands for a minified identifier and expands textually to
/// a non-capturing identifier group. The result is the cache key for
/// compiled regexes.
#[must_use]
pub fn canonicalize_pattern(pattern: &str) -> String {
    pattern.replace(r"\i", IDENT_EXPANSION)
}

/// Normalize template references to the braced form the regex engine
/// expands.
///
/// `$&` becomes `${0}` and bare digit references like `$1` become
/// `${1}` so a digit followed by literal text never extends the group
/// name. `$$` stays an escaped dollar and already-braced references
/// pass through unchanged. Multi-digit references bind the longest
/// group number.
#[must_use]
pub fn canonicalize_template(template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                out.push_str("$$");
            }
            Some('&') => {
                chars.next();
                out.push_str("${0}");
            }
            Some(d) if d.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(d) = chars.peek() {
                    if d.is_ascii_digit() {
                        digits.push(*d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str("${");
                out.push_str(&digits);
                out.push('}');
            }
            _ => out.push('$'),
        }
    }
    out
}

/// Why a rule that passed the find filter still failed to apply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleFailure {
    /// The find token was present but a matcher never matched.
    #[error("pattern '{pattern}' never matched (replacement {index})")]
    PatternMismatch { index: usize, pattern: String },

    /// A replacement ran but left the text byte-identical.
    #[error("replacement {index} left the text unchanged (pattern '{pattern}')")]
    NoEffect { index: usize, pattern: String },

    /// A replacement closure returned an error or panicked.
    #[error("replacement {index} failed: {message}")]
    Function { index: usize, message: String },

    /// The pattern did not compile.
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Outcome of running one rule against one module's text.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "RuleApplication carries the rewritten text"]
pub enum RuleApplication {
    /// Find token absent; the rule does not apply to this module.
    Skipped,
    /// Every replacement applied and the text changed.
    Applied { text: String, replacements: usize },
    /// Find token present but a replacement failed; the input text
    /// stands.
    Failed(RuleFailure),
}

/// Run a rule against module text.
///
/// Replacements run in order, each seeing the output of the previous
/// one. Any failure aborts the rule and discards its partial rewrites.
///
/// # Examples
///
/// ```
/// use bundlemod::matcher::{apply_rule, RuleApplication};
/// use bundlemod::rule::PatchRule;
///
/// let rule = PatchRule::new("navId:").replace_pattern("navId:", "extra:1,navId:");
/// let out = apply_rule("function f(){navId:1}", &rule);
/// assert_eq!(
///     out,
///     RuleApplication::Applied {
///         text: "function f(){extra:1,navId:1}".into(),
///         replacements: 1,
///     }
/// );
/// ```
pub fn apply_rule(source: &str, rule: &PatchRule) -> RuleApplication {
    if !source.contains(&rule.find) {
        return RuleApplication::Skipped;
    }

    let mut text = source.to_string();
    let mut total = 0;
    for (index, spec) in rule.replacements.iter().enumerate() {
        match apply_spec(&text, spec, index) {
            Ok((rewritten, count)) => {
                text = rewritten;
                total += count;
            }
            Err(failure) => return RuleApplication::Failed(failure),
        }
    }
    RuleApplication::Applied {
        text,
        replacements: total,
    }
}

/// Run one replacement against the current text.
fn apply_spec(
    text: &str,
    spec: &ReplacementSpec,
    index: usize,
) -> Result<(String, usize), RuleFailure> {
    let (canonical, global) = match &spec.matcher {
        // Literal needles go through the same engine, escaped.
        Matcher::Literal(needle) => (regex::escape(needle), false),
        Matcher::Pattern { pattern, global } => (canonicalize_pattern(pattern), *global),
    };
    let rx = cache::get_or_compile(&canonical)?;

    let count = if global {
        rx.find_iter(text).count()
    } else {
        usize::from(rx.is_match(text))
    };
    if count == 0 {
        return Err(RuleFailure::PatternMismatch {
            index,
            pattern: spec.matcher.describe().to_string(),
        });
    }

    let limit = if global { 0 } else { 1 };
    let rewritten = match &spec.rewrite {
        Rewrite::Template(template) => {
            let template = canonicalize_template(template);
            rx.replacen(text, limit, template.as_str()).into_owned()
        }
        Rewrite::Func(f) => {
            use regex::Replacer as _;
            let mut replacer = FnReplacer { f, error: None };
            let out = rx.replacen(text, limit, replacer.by_ref()).into_owned();
            if let Some(message) = replacer.error {
                return Err(RuleFailure::Function { index, message });
            }
            out
        }
    };

    if rewritten == text {
        return Err(RuleFailure::NoEffect {
            index,
            pattern: spec.matcher.describe().to_string(),
        });
    }
    Ok((rewritten, count))
}

/// Replacer adaptor that feeds captures to a closure and records the
/// first failure. After a failure the original match text is kept so
/// the discarded output stays well formed.
struct FnReplacer<'f> {
    f: &'f RewriteFn,
    error: Option<String>,
}

impl regex::Replacer for FnReplacer<'_> {
    fn replace_append(&mut self, caps: &regex::Captures<'_>, dst: &mut String) {
        let full = caps.get(0).map_or("", |m| m.as_str());
        if self.error.is_some() {
            dst.push_str(full);
            return;
        }
        let groups: Vec<Option<&str>> = caps.iter().map(|m| m.map(|m| m.as_str())).collect();
        let view = MatchView::new(groups);
        match catch_unwind(AssertUnwindSafe(|| (self.f)(&view))) {
            Ok(Ok(replacement)) => dst.push_str(&replacement),
            Ok(Err(message)) => {
                self.error = Some(message);
                dst.push_str(full);
            }
            Err(payload) => {
                self.error = Some(panic_message(&*payload));
                dst.push_str(full);
            }
        }
    }
}

/// Best-effort text for a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic: <non-string payload>".to_string()
    }
}
