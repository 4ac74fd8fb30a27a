//! Session facade: one owned registry, manager and interceptor.
//!
//! A session runs in phases. Plugins are registered first, then
//! [`ModRuntime::install`] enables the persisted set and arms the
//! interceptor, then every module the host defines passes through
//! [`ModRuntime::intercept`], and [`ModRuntime::finish_load`] settles
//! failures and runs start hooks. Modules defined before `install` are
//! not patchable and are passed through unchanged.

use semver::Version;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::interceptor::{ModuleInterceptor, ModuleRecord};
use crate::manager::{PluginError, PluginManager, PluginState};
use crate::matcher::RuleFailure;
use crate::plugin::Plugin;
use crate::registry::{PatchRegistry, RuleId};
use crate::settings::{self, SettingsError, SettingsSchema, SettingsStore};

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("interceptor already installed")]
    AlreadyInstalled,

    #[error("interceptor was never installed")]
    NotInstalled,

    #[error("load already finished")]
    LoadFinished,

    #[error("{missed} module(s) were defined before installation")]
    InstalledLate { missed: usize },

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("required rule {rule_id} of '{owner}' failed on module {module_id}: {failure}")]
    RequiredRuleFailed {
        module_id: String,
        rule_id: RuleId,
        owner: String,
        failure: RuleFailure,
    },

    #[error("start hook of required plugin '{plugin}' failed: {message}")]
    RequiredStartFailed { plugin: String, message: String },
}

/// What the load phase settled on.
#[derive(Debug, Clone)]
#[must_use]
pub struct LoadReport {
    /// Plugins live after the load, in enable order.
    pub running: Vec<String>,
    /// Plugins taken down during the load, with the reason.
    pub disabled: Vec<(String, String)>,
    pub modules_seen: usize,
    pub modules_patched: usize,
}

/// Owns the whole pipeline for one session.
pub struct ModRuntime {
    registry: PatchRegistry,
    manager: PluginManager,
    interceptor: ModuleInterceptor,
    store: Box<dyn SettingsStore>,
    installed: bool,
    loaded: bool,
    early_modules: usize,
}

impl ModRuntime {
    #[must_use]
    pub fn new(store: Box<dyn SettingsStore>, host_version: Option<Version>) -> Self {
        Self {
            registry: PatchRegistry::new(),
            manager: PluginManager::new(host_version),
            interceptor: ModuleInterceptor::new(),
            store,
            installed: false,
            loaded: false,
            early_modules: 0,
        }
    }

    /// Add a plugin descriptor to the session.
    pub fn register_plugin(&mut self, plugin: Plugin) -> Result<(), PluginError> {
        self.manager.register(plugin)
    }

    /// Enable the required and persisted plugin set and arm the
    /// interceptor. Must run before the host defines any module.
    pub fn install(&mut self) -> Result<Vec<String>, StartupError> {
        if self.installed {
            return Err(StartupError::AlreadyInstalled);
        }
        if self.early_modules > 0 {
            return Err(StartupError::InstalledLate {
                missed: self.early_modules,
            });
        }
        let enabled = self
            .manager
            .bootstrap(&mut self.registry, &mut *self.store)?;
        self.installed = true;
        info!(
            "interceptor installed with {} rule(s) from {} plugin(s)",
            self.registry.len(),
            enabled.len()
        );
        Ok(enabled)
    }

    /// The single seam the host calls for every module definition.
    ///
    /// Returns the text the host should evaluate. Before installation
    /// this is always the original text.
    pub fn intercept(&mut self, module_id: &str, source: &str) -> String {
        if !self.installed {
            self.early_modules += 1;
            warn!("module {module_id} defined before installation; passing through");
            return source.to_string();
        }
        self.interceptor.intercept(&self.registry, module_id, source)
    }

    /// Settle the load: abort on a required failure, take down failed
    /// optional plugins, then run start hooks in enable order.
    pub fn finish_load(&mut self) -> Result<LoadReport, StartupError> {
        if !self.installed {
            return Err(StartupError::NotInstalled);
        }
        if self.loaded {
            return Err(StartupError::LoadFinished);
        }

        if let Some(fatal) = self.interceptor.first_fatal() {
            return Err(StartupError::RequiredRuleFailed {
                module_id: fatal.module_id,
                rule_id: fatal.rule_id,
                owner: fatal.owner,
                failure: fatal.failure,
            });
        }

        let mut disabled = Vec::new();
        for owner in self.interceptor.contained_failure_owners() {
            if !self.manager.is_enabled(&owner) {
                continue;
            }
            let taken_down = self.manager.force_disable(&owner, &mut self.registry)?;
            for name in taken_down {
                let reason = if name == owner {
                    "patch failed".to_string()
                } else {
                    format!("depends on {owner}")
                };
                disabled.push((name, reason));
            }
        }

        for (name, result) in self.manager.start_all() {
            if let Err(message) = result {
                let required = self
                    .manager
                    .plugin(&name)
                    .map(|p| p.required)
                    .unwrap_or(false);
                if required {
                    return Err(StartupError::RequiredStartFailed {
                        plugin: name,
                        message,
                    });
                }
                let taken_down = self.manager.force_disable(&name, &mut self.registry)?;
                for taken in taken_down {
                    let reason = if taken == name {
                        format!("start hook failed: {message}")
                    } else {
                        format!("depends on {name}")
                    };
                    disabled.push((taken, reason));
                }
            }
        }

        self.loaded = true;
        Ok(LoadReport {
            running: self.manager.enabled_names(),
            disabled,
            modules_seen: self.interceptor.module_count(),
            modules_patched: self.interceptor.patched_count(),
        })
    }

    /// Stop everything in reverse enable order and reset the session.
    pub fn shutdown(&mut self) {
        self.manager.stop_all(&mut self.registry);
        self.interceptor = ModuleInterceptor::new();
        self.installed = false;
        self.loaded = false;
        self.early_modules = 0;
    }

    /// Enable a plugin mid-session. Its rules affect future module
    /// loads only; already-intercepted modules keep the text they were
    /// given. After the load phase this also runs the start hook.
    pub fn enable_plugin(&mut self, name: &str) -> Result<Vec<String>, PluginError> {
        let newly = self
            .manager
            .enable(name, &mut self.registry, &mut *self.store)?;
        if self.loaded {
            for pname in &newly {
                let has_patches = self
                    .manager
                    .plugin(pname)
                    .map(|p| !p.patches.is_empty())
                    .unwrap_or(false);
                if has_patches {
                    warn!("plugin {pname} enabled after load; rules reach future modules only");
                }
                if let Err(e) = self.manager.start_plugin(pname) {
                    if let Err(cascade) = self.manager.force_disable(pname, &mut self.registry) {
                        warn!("rollback of {pname} failed: {cascade}");
                    }
                    return Err(e);
                }
            }
        }
        Ok(newly)
    }

    pub fn disable_plugin(&mut self, name: &str) -> Result<(), PluginError> {
        self.manager
            .disable(name, &mut self.registry, &mut *self.store)
    }

    #[must_use]
    pub fn is_enabled(&self, name: &str) -> bool {
        self.manager.is_enabled(name)
    }

    #[must_use]
    pub fn plugin_state(&self, name: &str) -> Option<PluginState> {
        self.manager.state(name)
    }

    #[must_use]
    pub fn plugin_settings(&self, name: &str) -> Option<&SettingsSchema> {
        self.manager.plugin(name).map(|p| &p.settings)
    }

    /// Resolved value of one plugin option.
    pub fn setting(&self, plugin: &str, key: &str) -> Result<Value, SettingsError> {
        let schema = self
            .plugin_settings(plugin)
            .ok_or_else(|| SettingsError::UnknownOption {
                key: key.to_string(),
            })?;
        settings::resolve(schema, &*self.store, plugin, key)
    }

    /// Validate and persist one plugin option.
    pub fn set_setting(
        &mut self,
        plugin: &str,
        key: &str,
        value: Value,
    ) -> Result<(), SettingsError> {
        let Some(entry) = self.manager.plugin(plugin) else {
            return Err(SettingsError::UnknownOption {
                key: key.to_string(),
            });
        };
        let schema = entry.settings.clone();
        settings::set_option(&schema, &mut *self.store, plugin, key, value)
    }

    #[must_use]
    pub fn registry(&self) -> &PatchRegistry {
        &self.registry
    }

    #[must_use]
    pub fn manager(&self) -> &PluginManager {
        &self.manager
    }

    #[must_use]
    pub fn records(&self) -> &[ModuleRecord] {
        self.interceptor.records()
    }

    #[must_use]
    pub fn record(&self, module_id: &str) -> Option<&ModuleRecord> {
        self.interceptor.record(module_id)
    }
}
