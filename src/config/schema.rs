use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::plugin::Plugin;
use crate::rule::{Matcher, PatchRule, ReplacementSpec, Rewrite};
use crate::settings::{OptionDef, OptionKind, SettingsSchema};

/// One manifest file: a set of plugin declarations.
///
/// Manifest replacements are always textual templates. Function
/// replacements and lifecycle hooks are code and cannot be declared
/// here; plugins that need them are built with [`Plugin::builder`].
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Manifest {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub plugins: Vec<PluginDef>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct PluginDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub patches: Vec<PatchDef>,
    #[serde(default)]
    pub options: BTreeMap<String, OptionEntry>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct PatchDef {
    /// Substring that selects target modules.
    pub find: String,
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub host_version_range: Option<String>,
    #[serde(default)]
    pub replacements: Vec<ReplacementDef>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct ReplacementDef {
    #[serde(rename = "match")]
    pub matcher: MatcherDef,
    pub replace: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MatcherDef {
    Literal {
        value: String,
    },
    Pattern {
        value: String,
        #[serde(default)]
        global: bool,
    },
}

#[derive(Debug, Deserialize, Clone)]
pub struct OptionEntry {
    #[serde(flatten)]
    pub kind: OptionKindDef,
    pub default: Value,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OptionKindDef {
    String,
    Number,
    Boolean,
    Select { choices: Vec<String> },
    Slider { min: f64, max: f64 },
    Custom,
}

impl Manifest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.plugins.is_empty() {
            issues.push(ValidationIssue::EmptyPluginList);
        }

        let mut seen = std::collections::HashSet::new();
        for plugin in &self.plugins {
            if plugin.name.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    plugin: None,
                    field: "name",
                });
                continue;
            }
            if !seen.insert(plugin.name.as_str()) {
                issues.push(ValidationIssue::DuplicatePlugin {
                    name: plugin.name.clone(),
                });
            }
            if plugin.dependencies.iter().any(|d| d == &plugin.name) {
                issues.push(ValidationIssue::InvalidCombo {
                    plugin: Some(plugin.name.clone()),
                    message: "plugin depends on itself".to_string(),
                });
            }

            for patch in &plugin.patches {
                if patch.find.trim().is_empty() {
                    issues.push(ValidationIssue::MissingField {
                        plugin: Some(plugin.name.clone()),
                        field: "find",
                    });
                }
                if patch.replacements.is_empty() {
                    issues.push(ValidationIssue::InvalidCombo {
                        plugin: Some(plugin.name.clone()),
                        message: format!("patch '{}' has no replacements", patch.find),
                    });
                }
                if let Some(range) = &patch.host_version_range {
                    if semver::VersionReq::parse(range).is_err() {
                        issues.push(ValidationIssue::InvalidCombo {
                            plugin: Some(plugin.name.clone()),
                            message: format!("invalid host version range '{range}'"),
                        });
                    }
                }
                for replacement in &patch.replacements {
                    let value = match &replacement.matcher {
                        MatcherDef::Literal { value } => value,
                        MatcherDef::Pattern { value, .. } => value,
                    };
                    if value.is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            plugin: Some(plugin.name.clone()),
                            field: "match.value",
                        });
                    }
                }
            }

            for (key, entry) in &plugin.options {
                if let OptionKindDef::Slider { min, max } = &entry.kind {
                    if min > max {
                        issues.push(ValidationIssue::InvalidCombo {
                            plugin: Some(plugin.name.clone()),
                            message: format!("option '{key}' slider range is inverted"),
                        });
                    }
                }
                if let OptionKindDef::Select { choices } = &entry.kind {
                    if choices.is_empty() {
                        issues.push(ValidationIssue::InvalidCombo {
                            plugin: Some(plugin.name.clone()),
                            message: format!("option '{key}' has no choices"),
                        });
                    }
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    /// Convert the declarations into runnable descriptors.
    #[must_use]
    pub fn into_plugins(self) -> Vec<Plugin> {
        self.plugins.into_iter().map(PluginDef::into_plugin).collect()
    }
}

impl PluginDef {
    fn into_plugin(self) -> Plugin {
        let mut builder = Plugin::builder(self.name).description(self.description);
        for author in self.authors {
            builder = builder.author(author);
        }
        if self.required {
            builder = builder.required();
        }
        for dep in self.dependencies {
            builder = builder.depends_on(dep);
        }
        for patch in self.patches {
            builder = builder.patch(patch.into_rule());
        }
        if !self.options.is_empty() {
            let mut schema = SettingsSchema::new();
            for (key, entry) in self.options {
                schema.insert(key, entry.into_option());
            }
            builder = builder.settings(schema);
        }
        builder.build()
    }
}

impl PatchDef {
    fn into_rule(self) -> PatchRule {
        let mut rule = PatchRule::new(self.find);
        if self.all {
            rule = rule.all_modules();
        }
        if let Some(range) = self.host_version_range {
            rule = rule.for_host_range(range);
        }
        for replacement in self.replacements {
            let matcher = match replacement.matcher {
                MatcherDef::Literal { value } => Matcher::Literal(value),
                MatcherDef::Pattern { value, global } => Matcher::Pattern {
                    pattern: value,
                    global,
                },
            };
            rule = rule.replacement(ReplacementSpec::new(
                matcher,
                Rewrite::Template(replacement.replace),
            ));
        }
        rule
    }
}

impl OptionEntry {
    fn into_option(self) -> OptionDef {
        let kind = match self.kind {
            OptionKindDef::String => OptionKind::String,
            OptionKindDef::Number => OptionKind::Number,
            OptionKindDef::Boolean => OptionKind::Boolean,
            OptionKindDef::Select { choices } => OptionKind::Select { choices },
            OptionKindDef::Slider { min, max } => OptionKind::Slider { min, max },
            OptionKindDef::Custom => OptionKind::Custom,
        };
        OptionDef::new(kind, self.default, self.description)
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    EmptyPluginList,
    DuplicatePlugin {
        name: String,
    },
    MissingField {
        plugin: Option<String>,
        field: &'static str,
    },
    InvalidCombo {
        plugin: Option<String>,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyPluginList => write!(f, "manifest declares no plugins"),
            ValidationIssue::DuplicatePlugin { name } => {
                write!(f, "plugin '{name}' is declared more than once")
            }
            ValidationIssue::MissingField { plugin, field } => match plugin {
                Some(name) => write!(f, "plugin '{name}' missing required field '{field}'"),
                None => write!(f, "plugin missing required field '{field}'"),
            },
            ValidationIssue::InvalidCombo { plugin, message } => match plugin {
                Some(name) => write!(f, "plugin '{name}' has invalid configuration: {message}"),
                None => write!(f, "invalid plugin configuration: {message}"),
            },
        }
    }
}
