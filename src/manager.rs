//! Plugin lifecycle: enablement, dependencies, hooks.
//!
//! The manager owns every registered plugin descriptor and moves each
//! one through `Disabled -> Patched -> Running -> Disabled`. Enabling
//! registers the plugin's rules; disabling unregisters them. The
//! dependency graph is enforced on both edges: enabling pulls
//! dependencies in, disabling is refused while dependents are still
//! enabled.

use std::collections::{HashMap, HashSet};

use semver::Version;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::plugin::Plugin;
use crate::registry::PatchRegistry;
use crate::rule::RuleError;
use crate::settings::{enabled_key, SettingsStore};
use crate::version::{self, VersionError};

/// Lifecycle state of one plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    /// Not participating in this session.
    Disabled,
    /// Rules registered; waiting for the load phase.
    Patched,
    /// Start hook ran; the plugin is live.
    Running,
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginState::Disabled => write!(f, "disabled"),
            PluginState::Patched => write!(f, "patched"),
            PluginState::Running => write!(f, "running"),
        }
    }
}

/// Errors from plugin registration and lifecycle transitions.
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("plugin not registered: {0}")]
    Unknown(String),

    #[error("plugin already registered: {0}")]
    Duplicate(String),

    #[error("plugin has an empty name")]
    EmptyName,

    #[error("dependency '{dependency}' of plugin '{plugin}' is not registered")]
    DependencyNotFound { plugin: String, dependency: String },

    #[error("dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("cannot disable '{plugin}': still required by {dependents:?}")]
    HasDependents {
        plugin: String,
        dependents: Vec<String>,
    },

    #[error("required plugin '{0}' cannot be disabled")]
    Required(String),

    #[error("invalid patch in plugin '{plugin}': {source}")]
    InvalidRule {
        plugin: String,
        #[source]
        source: RuleError,
    },

    #[error("start hook of '{plugin}' failed: {message}")]
    StartFailed { plugin: String, message: String },

    #[error("invalid version range in plugin '{plugin}': {source}")]
    InvalidVersionRange {
        plugin: String,
        #[source]
        source: VersionError,
    },
}

struct Entry {
    plugin: Plugin,
    state: PluginState,
}

/// Owns plugin descriptors and drives their lifecycle.
pub struct PluginManager {
    entries: Vec<Entry>,
    by_name: HashMap<String, usize>,
    host_version: Option<Version>,
    /// Names in the order they were enabled; stop hooks run in reverse.
    enable_order: Vec<String>,
}

impl PluginManager {
    #[must_use]
    pub fn new(host_version: Option<Version>) -> Self {
        Self {
            entries: Vec::new(),
            by_name: HashMap::new(),
            host_version,
            enable_order: Vec::new(),
        }
    }

    /// Add a plugin descriptor. Names must be unique.
    pub fn register(&mut self, plugin: Plugin) -> Result<(), PluginError> {
        if plugin.name.is_empty() {
            return Err(PluginError::EmptyName);
        }
        if self.by_name.contains_key(&plugin.name) {
            return Err(PluginError::Duplicate(plugin.name));
        }
        self.by_name
            .insert(plugin.name.clone(), self.entries.len());
        self.entries.push(Entry {
            plugin,
            state: PluginState::Disabled,
        });
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    #[must_use]
    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.by_name.get(name).map(|&i| self.entries[i].state)
    }

    /// Enabled means patched or running.
    #[must_use]
    pub fn is_enabled(&self, name: &str) -> bool {
        matches!(
            self.state(name),
            Some(PluginState::Patched | PluginState::Running)
        )
    }

    /// All descriptors in registration order.
    pub fn plugins(&self) -> impl Iterator<Item = &Plugin> {
        self.entries.iter().map(|e| &e.plugin)
    }

    #[must_use]
    pub fn plugin(&self, name: &str) -> Option<&Plugin> {
        self.by_name.get(name).map(|&i| &self.entries[i].plugin)
    }

    /// Enable a plugin and, transitively, its dependencies.
    ///
    /// Returns the names that were actually enabled, dependencies
    /// first. Already-enabled plugins are left alone. Nothing changes
    /// if validation of any involved plugin fails.
    pub fn enable(
        &mut self,
        name: &str,
        registry: &mut PatchRegistry,
        store: &mut dyn SettingsStore,
    ) -> Result<Vec<String>, PluginError> {
        if !self.by_name.contains_key(name) {
            return Err(PluginError::Unknown(name.to_string()));
        }
        if self.is_enabled(name) {
            return Ok(Vec::new());
        }

        let to_enable = self.collect_enable_set(name)?;

        // Validate every rule and range up front so a bad plugin in
        // the chain leaves no partial state behind.
        for pname in &to_enable {
            let Some(&idx) = self.by_name.get(pname.as_str()) else {
                continue;
            };
            for rule in &self.entries[idx].plugin.patches {
                rule.validate().map_err(|e| PluginError::InvalidRule {
                    plugin: pname.clone(),
                    source: e,
                })?;
                version::range_admits(
                    self.host_version.as_ref(),
                    rule.host_version_range.as_deref(),
                )
                .map_err(|e| PluginError::InvalidVersionRange {
                    plugin: pname.clone(),
                    source: e,
                })?;
            }
        }

        for pname in &to_enable {
            let Some(&idx) = self.by_name.get(pname.as_str()) else {
                continue;
            };
            let required = self.entries[idx].plugin.required;
            let rules: Vec<_> = self.entries[idx].plugin.patches.to_vec();
            let mut registered = 0usize;
            for rule in rules {
                let admitted = version::range_admits(
                    self.host_version.as_ref(),
                    rule.host_version_range.as_deref(),
                )
                .map_err(|e| PluginError::InvalidVersionRange {
                    plugin: pname.clone(),
                    source: e,
                })?;
                if !admitted {
                    debug!(
                        "skipping rule '{}' of {pname}: host build outside range {:?}",
                        rule.find, rule.host_version_range
                    );
                    continue;
                }
                registry
                    .register(pname, required, rule)
                    .map_err(|e| PluginError::InvalidRule {
                        plugin: pname.clone(),
                        source: e,
                    })?;
                registered += 1;
            }
            self.entries[idx].state = PluginState::Patched;
            store.set(&enabled_key(pname), Value::Bool(true));
            self.enable_order.push(pname.clone());
            info!("enabled plugin {pname} ({registered} rule(s))");
        }

        Ok(to_enable)
    }

    /// Disable a plugin, unregistering its rules.
    ///
    /// Refused while enabled dependents exist or if the plugin is
    /// required. Disabling an already-disabled plugin is a no-op.
    pub fn disable(
        &mut self,
        name: &str,
        registry: &mut PatchRegistry,
        store: &mut dyn SettingsStore,
    ) -> Result<(), PluginError> {
        let Some(&idx) = self.by_name.get(name) else {
            return Err(PluginError::Unknown(name.to_string()));
        };
        if self.entries[idx].state == PluginState::Disabled {
            return Ok(());
        }
        if self.entries[idx].plugin.required {
            return Err(PluginError::Required(name.to_string()));
        }

        let dependents: Vec<String> = self
            .entries
            .iter()
            .filter(|e| {
                e.state != PluginState::Disabled
                    && e.plugin.dependencies.iter().any(|d| d == name)
            })
            .map(|e| e.plugin.name.clone())
            .collect();
        if !dependents.is_empty() {
            return Err(PluginError::HasDependents {
                plugin: name.to_string(),
                dependents,
            });
        }

        self.single_disable(name, registry, Some(store));
        Ok(())
    }

    /// Disable a failed plugin together with its enabled dependents.
    ///
    /// Dependents go first so the graph invariant holds at every step.
    /// The change is session-only: persisted enablement is untouched,
    /// so a transient bundle drift does not rewrite user intent.
    /// Escalates if the cascade would take down a required plugin.
    pub(crate) fn force_disable(
        &mut self,
        name: &str,
        registry: &mut PatchRegistry,
    ) -> Result<Vec<String>, PluginError> {
        if !self.by_name.contains_key(name) {
            return Err(PluginError::Unknown(name.to_string()));
        }
        if !self.is_enabled(name) {
            return Ok(Vec::new());
        }

        // Fixpoint over the reverse dependency edges.
        let mut set: Vec<String> = vec![name.to_string()];
        loop {
            let next = self.entries.iter().find(|e| {
                e.state != PluginState::Disabled
                    && !set.contains(&e.plugin.name)
                    && e.plugin.dependencies.iter().any(|d| set.contains(d))
            });
            match next {
                Some(e) => set.push(e.plugin.name.clone()),
                None => break,
            }
        }

        for pname in &set {
            if let Some(&idx) = self.by_name.get(pname.as_str()) {
                if self.entries[idx].plugin.required {
                    return Err(PluginError::Required(pname.clone()));
                }
            }
        }

        // Transitive dependents were discovered after their
        // dependencies, so reverse order disables them first.
        for pname in set.iter().rev() {
            warn!("disabling {pname} for this session");
            self.single_disable(pname, registry, None);
        }
        Ok(set)
    }

    fn single_disable(
        &mut self,
        name: &str,
        registry: &mut PatchRegistry,
        persist: Option<&mut dyn SettingsStore>,
    ) {
        let Some(&idx) = self.by_name.get(name) else {
            return;
        };
        if self.entries[idx].state == PluginState::Running {
            if let Err(e) = self.entries[idx].plugin.run_stop() {
                warn!("stop hook of {name} failed: {e}");
            }
        }
        let removed = registry.unregister_owner(name);
        self.entries[idx].state = PluginState::Disabled;
        self.enable_order.retain(|n| n != name);
        if let Some(store) = persist {
            store.set(&enabled_key(name), Value::Bool(false));
        }
        info!("disabled plugin {name} ({removed} rule(s) unregistered)");
    }

    /// Enable every required plugin and every plugin the store marks
    /// enabled. Failures of optional plugins are contained; a required
    /// plugin that cannot enable propagates.
    pub fn bootstrap(
        &mut self,
        registry: &mut PatchRegistry,
        store: &mut dyn SettingsStore,
    ) -> Result<Vec<String>, PluginError> {
        let names: Vec<(String, bool)> = self
            .entries
            .iter()
            .map(|e| (e.plugin.name.clone(), e.plugin.required))
            .collect();

        let mut enabled = Vec::new();
        for (name, required) in names {
            let wanted = required
                || store
                    .get(&enabled_key(&name))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
            if !wanted {
                continue;
            }
            match self.enable(&name, registry, store) {
                Ok(newly) => enabled.extend(newly),
                Err(e) if required => return Err(e),
                Err(e) => warn!("could not enable {name}: {e}"),
            }
        }
        Ok(enabled)
    }

    /// Run start hooks for every patched plugin, in enable order.
    ///
    /// Plugins whose hook fails stay in `Patched`; the caller decides
    /// what to do with them. Returns `(name, result)` per hook run.
    pub fn start_all(&mut self) -> Vec<(String, Result<(), String>)> {
        let order = self.enable_order.clone();
        let mut outcomes = Vec::new();
        for name in order {
            let Some(&idx) = self.by_name.get(name.as_str()) else {
                continue;
            };
            if self.entries[idx].state != PluginState::Patched {
                continue;
            }
            let result = self.entries[idx].plugin.run_start();
            match &result {
                Ok(()) => {
                    self.entries[idx].state = PluginState::Running;
                    debug!("started plugin {name}");
                }
                Err(e) => warn!("start hook of {name} failed: {e}"),
            }
            outcomes.push((name, result));
        }
        outcomes
    }

    /// Run one plugin's start hook. Used for mid-session enables,
    /// after the load phase already ran `start_all`.
    pub fn start_plugin(&mut self, name: &str) -> Result<(), PluginError> {
        let Some(&idx) = self.by_name.get(name) else {
            return Err(PluginError::Unknown(name.to_string()));
        };
        if self.entries[idx].state != PluginState::Patched {
            return Ok(());
        }
        match self.entries[idx].plugin.run_start() {
            Ok(()) => {
                self.entries[idx].state = PluginState::Running;
                debug!("started plugin {name}");
                Ok(())
            }
            Err(message) => Err(PluginError::StartFailed {
                plugin: name.to_string(),
                message,
            }),
        }
    }

    /// Stop every running plugin in reverse enable order and
    /// unregister all rules. Persisted enablement is left untouched so
    /// the next session starts from the same set.
    pub fn stop_all(&mut self, registry: &mut PatchRegistry) {
        let order: Vec<String> = self.enable_order.iter().rev().cloned().collect();
        for name in order {
            self.single_disable(&name, registry, None);
        }
    }

    /// Names of enabled plugins, in enable order.
    #[must_use]
    pub fn enabled_names(&self) -> Vec<String> {
        self.enable_order.clone()
    }

    fn collect_enable_set(&self, name: &str) -> Result<Vec<String>, PluginError> {
        let mut ordered = Vec::new();
        let mut visiting = Vec::new();
        let mut visited = HashSet::new();
        self.visit(name, None, &mut ordered, &mut visiting, &mut visited)?;
        Ok(ordered)
    }

    fn visit(
        &self,
        name: &str,
        parent: Option<&str>,
        ordered: &mut Vec<String>,
        visiting: &mut Vec<String>,
        visited: &mut HashSet<String>,
    ) -> Result<(), PluginError> {
        if visited.contains(name) {
            return Ok(());
        }
        if visiting.iter().any(|n| n == name) {
            let mut path = visiting.join(" -> ");
            path.push_str(" -> ");
            path.push_str(name);
            return Err(PluginError::DependencyCycle(path));
        }

        let Some(&idx) = self.by_name.get(name) else {
            return Err(match parent {
                Some(parent) => PluginError::DependencyNotFound {
                    plugin: parent.to_string(),
                    dependency: name.to_string(),
                },
                None => PluginError::Unknown(name.to_string()),
            });
        };

        // Already-enabled plugins and their subtrees are active.
        if self.entries[idx].state != PluginState::Disabled {
            visited.insert(name.to_string());
            return Ok(());
        }

        visiting.push(name.to_string());
        for dep in &self.entries[idx].plugin.dependencies {
            self.visit(dep, Some(name), ordered, visiting, visited)?;
        }
        visiting.pop();

        visited.insert(name.to_string());
        ordered.push(name.to_string());
        Ok(())
    }
}
