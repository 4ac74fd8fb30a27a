//! Typed plugin settings and the persistence seam.
//!
//! Plugins declare a schema of typed options with defaults. The core
//! validates values against the schema and reads/writes them through
//! the [`SettingsStore`] trait. How and where a host persists the
//! key/value pairs is its own business; the core ships only an
//! in-memory store.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// The type of one settings option.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionKind {
    String,
    Number,
    Boolean,
    /// One of a fixed set of string choices.
    Select { choices: Vec<String> },
    /// A number clamped to an inclusive range.
    Slider { min: f64, max: f64 },
    /// Anything; the plugin validates it itself.
    Custom,
}

impl OptionKind {
    fn expected(&self) -> &'static str {
        match self {
            OptionKind::String => "string",
            OptionKind::Number => "number",
            OptionKind::Boolean => "boolean",
            OptionKind::Select { .. } => "one of the declared choices",
            OptionKind::Slider { .. } => "number inside the slider range",
            OptionKind::Custom => "any value",
        }
    }
}

/// One declared option: its type, default and description.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionDef {
    pub kind: OptionKind,
    pub default: Value,
    pub description: String,
}

impl OptionDef {
    pub fn new(kind: OptionKind, default: Value, description: impl Into<String>) -> Self {
        Self {
            kind,
            default,
            description: description.into(),
        }
    }

    /// Check a value against this option's type.
    pub fn validate(&self, key: &str, value: &Value) -> Result<(), SettingsError> {
        let ok = match &self.kind {
            OptionKind::String => value.is_string(),
            OptionKind::Number => value.is_number(),
            OptionKind::Boolean => value.is_boolean(),
            OptionKind::Select { choices } => match value.as_str() {
                Some(s) => {
                    if choices.iter().any(|c| c == s) {
                        true
                    } else {
                        return Err(SettingsError::InvalidChoice {
                            key: key.to_string(),
                            value: s.to_string(),
                        });
                    }
                }
                None => false,
            },
            OptionKind::Slider { min, max } => match value.as_f64() {
                Some(n) => {
                    if n >= *min && n <= *max {
                        true
                    } else {
                        return Err(SettingsError::OutOfRange {
                            key: key.to_string(),
                            min: *min,
                            max: *max,
                        });
                    }
                }
                None => false,
            },
            OptionKind::Custom => true,
        };
        if ok {
            Ok(())
        } else {
            Err(SettingsError::TypeMismatch {
                key: key.to_string(),
                expected: self.kind.expected(),
            })
        }
    }
}

/// Errors from settings validation and lookup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettingsError {
    #[error("unknown option '{key}'")]
    UnknownOption { key: String },

    #[error("option '{key}' expects {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    #[error("option '{key}' must be between {min} and {max}")]
    OutOfRange { key: String, min: f64, max: f64 },

    #[error("'{value}' is not a declared choice for option '{key}'")]
    InvalidChoice { key: String, value: String },
}

/// A plugin's declared options, keyed by option name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsSchema {
    options: BTreeMap<String, OptionDef>,
}

impl SettingsSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, def: OptionDef) {
        self.options.insert(key.into(), def);
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, def: OptionDef) -> Self {
        self.insert(key, def);
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&OptionDef> {
        self.options.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionDef)> {
        self.options.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.options.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Validate a value for a declared option.
    pub fn validate(&self, key: &str, value: &Value) -> Result<(), SettingsError> {
        let def = self.options.get(key).ok_or_else(|| {
            SettingsError::UnknownOption {
                key: key.to_string(),
            }
        })?;
        def.validate(key, value)
    }
}

/// Persistence seam: get/set, nothing more.
///
/// The host decides where values live. Keys are flat strings built by
/// [`enabled_key`] and [`option_key`].
pub trait SettingsStore {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&mut self, key: &str, value: Value);
}

/// Store key for a plugin's enablement flag.
#[must_use]
pub fn enabled_key(plugin: &str) -> String {
    format!("plugin.{plugin}.enabled")
}

/// Store key for one plugin option.
#[must_use]
pub fn option_key(plugin: &str, option: &str) -> String {
    format!("plugin.{plugin}.option.{option}")
}

/// In-memory store, used by the CLI and in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, Value>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }
}

/// Effective value of one option: the stored override when present and
/// valid, otherwise the schema default. An invalid stored value is
/// ignored with a warning rather than propagated.
pub fn resolve(
    schema: &SettingsSchema,
    store: &dyn SettingsStore,
    plugin: &str,
    key: &str,
) -> Result<Value, SettingsError> {
    let def = schema.get(key).ok_or_else(|| SettingsError::UnknownOption {
        key: key.to_string(),
    })?;
    if let Some(stored) = store.get(&option_key(plugin, key)) {
        match def.validate(key, &stored) {
            Ok(()) => return Ok(stored),
            Err(e) => warn!("ignoring stored value for {plugin}/{key}: {e}"),
        }
    }
    Ok(def.default.clone())
}

/// Validate and persist one option value.
pub fn set_option(
    schema: &SettingsSchema,
    store: &mut dyn SettingsStore,
    plugin: &str,
    key: &str,
    value: Value,
) -> Result<(), SettingsError> {
    schema.validate(key, &value)?;
    store.set(&option_key(plugin, key), value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> SettingsSchema {
        SettingsSchema::new()
            .with(
                "greeting",
                OptionDef::new(OptionKind::String, json!("hello"), "Greeting text"),
            )
            .with(
                "volume",
                OptionDef::new(
                    OptionKind::Slider {
                        min: 0.0,
                        max: 100.0,
                    },
                    json!(50),
                    "Playback volume",
                ),
            )
            .with(
                "position",
                OptionDef::new(
                    OptionKind::Select {
                        choices: vec!["top".into(), "bottom".into()],
                    },
                    json!("top"),
                    "Tab bar position",
                ),
            )
            .with(
                "enabled_sound",
                OptionDef::new(OptionKind::Boolean, json!(true), "Play a sound"),
            )
    }

    #[test]
    fn test_validate_by_kind() {
        let s = schema();
        assert!(s.validate("greeting", &json!("hi")).is_ok());
        assert!(matches!(
            s.validate("greeting", &json!(3)),
            Err(SettingsError::TypeMismatch { .. })
        ));

        assert!(s.validate("volume", &json!(70)).is_ok());
        assert!(matches!(
            s.validate("volume", &json!(101)),
            Err(SettingsError::OutOfRange { .. })
        ));
        assert!(matches!(
            s.validate("volume", &json!("loud")),
            Err(SettingsError::TypeMismatch { .. })
        ));

        assert!(s.validate("position", &json!("bottom")).is_ok());
        assert!(matches!(
            s.validate("position", &json!("left")),
            Err(SettingsError::InvalidChoice { .. })
        ));

        assert!(s.validate("enabled_sound", &json!(false)).is_ok());
        assert!(matches!(
            s.validate("missing", &json!(1)),
            Err(SettingsError::UnknownOption { .. })
        ));
    }

    #[test]
    fn test_custom_accepts_anything() {
        let def = OptionDef::new(OptionKind::Custom, json!(null), "Free-form");
        assert!(def.validate("x", &json!({"nested": [1, 2]})).is_ok());
    }

    #[test]
    fn test_resolve_prefers_valid_override() {
        let s = schema();
        let mut store = MemoryStore::new();

        // Default when nothing stored
        assert_eq!(resolve(&s, &store, "Tabs", "greeting").unwrap(), json!("hello"));

        // Stored override wins
        store.set(&option_key("Tabs", "greeting"), json!("yo"));
        assert_eq!(resolve(&s, &store, "Tabs", "greeting").unwrap(), json!("yo"));

        // Invalid stored value falls back to the default
        store.set(&option_key("Tabs", "volume"), json!("loud"));
        assert_eq!(resolve(&s, &store, "Tabs", "volume").unwrap(), json!(50));
    }

    #[test]
    fn test_set_option_validates() {
        let s = schema();
        let mut store = MemoryStore::new();

        set_option(&s, &mut store, "Tabs", "volume", json!(30)).unwrap();
        assert_eq!(store.get(&option_key("Tabs", "volume")), Some(json!(30)));

        let err = set_option(&s, &mut store, "Tabs", "volume", json!(1000)).unwrap_err();
        assert!(matches!(err, SettingsError::OutOfRange { .. }));
        // Failed set leaves the previous value alone
        assert_eq!(store.get(&option_key("Tabs", "volume")), Some(json!(30)));
    }

    #[test]
    fn test_key_shapes() {
        assert_eq!(enabled_key("TabBar"), "plugin.TabBar.enabled");
        assert_eq!(option_key("TabBar", "pos"), "plugin.TabBar.option.pos");
    }
}
