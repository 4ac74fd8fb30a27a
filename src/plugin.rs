//! Plugin descriptors: what a plugin declares to the runtime.
//!
//! A descriptor is plain data plus optional lifecycle hooks. Plugins
//! never reach into the engine; they contribute patch rules, a settings
//! schema, dependency names and hooks, and the lifecycle manager does
//! the rest.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::matcher::panic_message;
use crate::rule::PatchRule;
use crate::settings::SettingsSchema;

/// Lifecycle hook. Returning `Err` marks the plugin as failed; a panic
/// inside the hook is caught and treated the same way.
pub type LifecycleHook = Box<dyn FnMut() -> Result<(), String>>;

/// What a plugin declares, as an explicit capability set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Capability {
    /// Contributes patch rules.
    Patches,
    /// Exposes a settings schema.
    Settings,
    /// Runs code after its patches take effect.
    StartHook,
    /// Runs code before its patches are unregistered.
    StopHook,
}

/// Declarative plugin descriptor.
pub struct Plugin {
    pub name: String,
    pub description: String,
    pub authors: Vec<String>,
    /// Names of plugins that must be enabled before this one.
    pub dependencies: Vec<String>,
    /// Required plugins are force-enabled and cannot be disabled;
    /// their patch failures abort startup.
    pub required: bool,
    pub patches: Vec<PatchRule>,
    pub settings: SettingsSchema,
    on_start: Option<LifecycleHook>,
    on_stop: Option<LifecycleHook>,
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("required", &self.required)
            .field("patches", &self.patches.len())
            .field("capabilities", &self.capabilities())
            .finish_non_exhaustive()
    }
}

impl Plugin {
    pub fn builder(name: impl Into<String>) -> PluginBuilder {
        PluginBuilder {
            plugin: Plugin {
                name: name.into(),
                description: String::new(),
                authors: Vec::new(),
                dependencies: Vec::new(),
                required: false,
                patches: Vec::new(),
                settings: SettingsSchema::new(),
                on_start: None,
                on_stop: None,
            },
        }
    }

    /// The declared capability set, sorted.
    #[must_use]
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps = Vec::new();
        if !self.patches.is_empty() {
            caps.push(Capability::Patches);
        }
        if !self.settings.is_empty() {
            caps.push(Capability::Settings);
        }
        if self.on_start.is_some() {
            caps.push(Capability::StartHook);
        }
        if self.on_stop.is_some() {
            caps.push(Capability::StopHook);
        }
        caps
    }

    #[must_use]
    pub fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities().contains(&cap)
    }

    /// Run the start hook, containing panics. No hook means success.
    pub(crate) fn run_start(&mut self) -> Result<(), String> {
        run_hook(self.on_start.as_mut())
    }

    /// Run the stop hook, containing panics. No hook means success.
    pub(crate) fn run_stop(&mut self) -> Result<(), String> {
        run_hook(self.on_stop.as_mut())
    }
}

fn run_hook(hook: Option<&mut LifecycleHook>) -> Result<(), String> {
    let Some(hook) = hook else {
        return Ok(());
    };
    match catch_unwind(AssertUnwindSafe(|| hook())) {
        Ok(result) => result,
        Err(payload) => Err(panic_message(&*payload)),
    }
}

/// Builder for [`Plugin`].
pub struct PluginBuilder {
    plugin: Plugin,
}

impl PluginBuilder {
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.plugin.description = text.into();
        self
    }

    pub fn author(mut self, name: impl Into<String>) -> Self {
        self.plugin.authors.push(name.into());
        self
    }

    pub fn depends_on(mut self, plugin: impl Into<String>) -> Self {
        self.plugin.dependencies.push(plugin.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.plugin.required = true;
        self
    }

    pub fn patch(mut self, rule: PatchRule) -> Self {
        self.plugin.patches.push(rule);
        self
    }

    pub fn settings(mut self, schema: SettingsSchema) -> Self {
        self.plugin.settings = schema;
        self
    }

    pub fn on_start<F>(mut self, hook: F) -> Self
    where
        F: FnMut() -> Result<(), String> + 'static,
    {
        self.plugin.on_start = Some(Box::new(hook));
        self
    }

    pub fn on_stop<F>(mut self, hook: F) -> Self
    where
        F: FnMut() -> Result<(), String> + 'static,
    {
        self.plugin.on_stop = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn build(self) -> Plugin {
        self.plugin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{OptionDef, OptionKind};

    #[test]
    fn test_capability_set() {
        let bare = Plugin::builder("Bare").build();
        assert!(bare.capabilities().is_empty());

        let mut schema = SettingsSchema::new();
        schema.insert(
            "greeting",
            OptionDef::new(OptionKind::String, serde_json::json!("hi"), "Greeting text"),
        );
        let full = Plugin::builder("Full")
            .patch(PatchRule::new("tok").replace("tok", "TOK"))
            .settings(schema)
            .on_start(|| Ok(()))
            .on_stop(|| Ok(()))
            .build();
        assert_eq!(
            full.capabilities(),
            vec![
                Capability::Patches,
                Capability::Settings,
                Capability::StartHook,
                Capability::StopHook,
            ]
        );
        assert!(full.has_capability(Capability::Patches));
        assert!(!bare.has_capability(Capability::StartHook));
    }

    #[test]
    fn test_builder_fields() {
        let p = Plugin::builder("TabBar")
            .description("Adds a tab bar")
            .author("dev")
            .depends_on("ContextMenuApi")
            .required()
            .build();
        assert_eq!(p.name, "TabBar");
        assert_eq!(p.dependencies, vec!["ContextMenuApi"]);
        assert!(p.required);
    }

    #[test]
    fn test_hooks_run_and_contain_panics() {
        let mut ok = Plugin::builder("Ok").on_start(|| Ok(())).build();
        assert!(ok.run_start().is_ok());

        let mut failing = Plugin::builder("Failing")
            .on_start(|| Err("refused".into()))
            .build();
        assert_eq!(failing.run_start().unwrap_err(), "refused");

        let mut panicking = Plugin::builder("Panicking")
            .on_stop(|| panic!("hook blew up"))
            .build();
        let err = panicking.run_stop().unwrap_err();
        assert!(err.contains("hook blew up"));
    }

    #[test]
    fn test_missing_hooks_are_noops() {
        let mut p = Plugin::builder("NoHooks").build();
        assert!(p.run_start().is_ok());
        assert!(p.run_stop().is_ok());
    }

    #[test]
    fn test_debug_omits_hooks() {
        let p = Plugin::builder("X").on_start(|| Ok(())).build();
        let s = format!("{p:?}");
        assert!(s.contains("\"X\""));
        assert!(s.contains("StartHook"));
    }
}
