//! Bundlemod: a patch-based client modification engine
//!
//! Plugins declare textual patch rules against the minified module
//! bundle of a host application. The engine sits between the host's
//! module loader and evaluation, rewriting each module's source as it
//! is defined.
//!
//! # Architecture
//!
//! All rewriting goes through a single seam: [`ModRuntime::intercept`]
//! takes `(module id, text)` and returns the text to evaluate. Rules
//! live in one owned [`PatchRegistry`]; the [`PluginManager`] decides
//! which rules are in it, and the [`ModuleInterceptor`] records what
//! happened to every module.
//!
//! # Failure containment
//!
//! - A rule that fails leaves its module byte-identical
//! - Failures of optional plugins disable that plugin, never the host
//! - Failures of required plugins abort the load with a diagnostic
//! - Replacement closures may error or panic without poisoning the engine
//!
//! # Example
//!
//! ```
//! use bundlemod::{MemoryStore, ModRuntime, PatchRule, Plugin};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut runtime = ModRuntime::new(Box::new(MemoryStore::new()), None);
//! runtime.register_plugin(
//!     Plugin::builder("NoTrack")
//!         .required()
//!         .patch(PatchRule::new("track(").replace("track(", "noop("))
//!         .build(),
//! )?;
//!
//! runtime.install()?;
//! assert_eq!(runtime.intercept("1", "api.track(event)"), "api.noop(event)");
//! let report = runtime.finish_load()?;
//! assert_eq!(report.modules_patched, 1);
//! # Ok(())
//! # }
//! ```

pub mod applier;
pub mod bundle;
pub mod cache;
pub mod config;
pub mod interceptor;
pub mod manager;
pub mod matcher;
pub mod plugin;
pub mod registry;
pub mod rule;
pub mod runtime;
pub mod settings;
pub mod version;

// Re-exports
pub use applier::{apply_to_module, ModuleReport, PatchResult, RuleOutcome};
pub use config::{load_from_path, load_from_str, ConfigError, Manifest};
pub use interceptor::{FatalFailure, ModuleInterceptor, ModuleRecord};
pub use manager::{PluginError, PluginManager, PluginState};
pub use matcher::{apply_rule, RuleApplication, RuleFailure};
pub use plugin::{Capability, Plugin, PluginBuilder};
pub use registry::{PatchRegistry, RegisteredRule, RuleId};
pub use rule::{MatchView, Matcher, PatchRule, ReplacementSpec, Rewrite, RewriteFn, RuleError};
pub use runtime::{LoadReport, ModRuntime, StartupError};
pub use settings::{
    MemoryStore, OptionDef, OptionKind, SettingsError, SettingsSchema, SettingsStore,
};
pub use version::{matches_range, parse_host_version, VersionError};
