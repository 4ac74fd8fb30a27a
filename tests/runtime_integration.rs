//! Integration tests driving the full patching pipeline through `ModRuntime`.

use bundlemod::{
    MemoryStore, ModRuntime, PatchRule, Plugin, PluginError, PluginState, StartupError,
};

const NAV_MODULE: &str = "function f(){navId:1}";

fn runtime() -> ModRuntime {
    ModRuntime::new(Box::new(MemoryStore::new()), None)
}

/// A required plugin that inserts `insert` in front of the `navId:` token.
fn nav_plugin(name: &str, insert: &str) -> Plugin {
    Plugin::builder(name)
        .required()
        .patch(PatchRule::new("navId:").replace_pattern("navId:", format!("{insert}navId:")))
        .build()
}

fn nav_plugin_optional(name: &str) -> Plugin {
    Plugin::builder(name)
        .patch(PatchRule::new("navId:").replace_pattern("navId:", "a:1,navId:"))
        .build()
}

#[test]
fn test_module_without_find_token_is_untouched() {
    let mut rt = runtime();
    rt.register_plugin(nav_plugin("Nav", "extra:1,"))
        .expect("Failed to register plugin");
    rt.install().expect("Failed to install");

    let out = rt.intercept("boot", "console.log(1)");
    assert_eq!(out, "console.log(1)");

    let record = rt.record("boot").expect("Module should be recorded");
    assert_eq!(record.patched, record.original);
    assert!(record.results.is_empty(), "no rule should have produced a result");

    let report = rt.finish_load().expect("Failed to finish load");
    assert_eq!(report.modules_seen, 1);
    assert_eq!(report.modules_patched, 0);
}

#[test]
fn test_single_rule_application_is_deterministic() {
    let run = || {
        let mut rt = runtime();
        rt.register_plugin(nav_plugin("Nav", "extra:1,"))
            .expect("Failed to register plugin");
        rt.install().expect("Failed to install");
        rt.intercept("m", NAV_MODULE)
    };

    let first = run();
    let second = run();
    assert_eq!(first, second);
    assert_eq!(first, "function f(){extra:1,navId:1}");
}

#[test]
fn test_insertion_before_existing_token() {
    let mut rt = runtime();
    rt.register_plugin(nav_plugin("Nav", "extra:1,"))
        .expect("Failed to register plugin");
    rt.install().expect("Failed to install");

    let out = rt.intercept("m", NAV_MODULE);
    assert_eq!(out, "function f(){extra:1,navId:1}");

    let record = rt.record("m").expect("Module should be recorded");
    assert_eq!(record.results.len(), 1);
    assert!(record.results[0].is_applied());
}

#[test]
fn test_stacked_rules_compose_in_registration_order() {
    let mut rt = runtime();
    rt.register_plugin(nav_plugin("Alpha", "A:1,"))
        .expect("Failed to register Alpha");
    rt.register_plugin(nav_plugin("Beta", "B:1,"))
        .expect("Failed to register Beta");
    rt.install().expect("Failed to install");

    // Beta's rule runs against the text Alpha already rewrote, so its
    // insertion lands after Alpha's.
    let out = rt.intercept("m", NAV_MODULE);
    assert_eq!(out, "function f(){A:1,B:1,navId:1}");
}

#[test]
fn test_disabling_a_plugin_stops_future_patching() {
    let mut rt = runtime();
    rt.register_plugin(
        Plugin::builder("Tweak")
            .patch(
                PatchRule::new("navId:")
                    .all_modules()
                    .replace_pattern("navId:", "extra:1,navId:"),
            )
            .build(),
    )
    .expect("Failed to register plugin");
    rt.install().expect("Failed to install");
    rt.enable_plugin("Tweak").expect("Failed to enable plugin");

    let first = rt.intercept("m1", NAV_MODULE);
    assert_eq!(first, "function f(){extra:1,navId:1}");

    rt.finish_load().expect("Failed to finish load");
    rt.disable_plugin("Tweak").expect("Failed to disable plugin");

    // Already-delivered modules keep their patched text; new ones pass
    // through untouched.
    let second = rt.intercept("m2", NAV_MODULE);
    assert_eq!(second, NAV_MODULE);
    assert_eq!(
        rt.record("m1").expect("m1 should be recorded").patched,
        "function f(){extra:1,navId:1}"
    );
}

#[test]
fn test_optional_failure_is_contained() {
    let mut rt = runtime();
    // Find token matches but the inner pattern never does, so the rule
    // fails after being attempted.
    rt.register_plugin(
        Plugin::builder("Bad")
            .patch(PatchRule::new("present").replace_pattern("absent", "x"))
            .build(),
    )
    .expect("Failed to register Bad");
    rt.register_plugin(
        Plugin::builder("Good")
            .patch(PatchRule::new("present").replace("present", "patched"))
            .build(),
    )
    .expect("Failed to register Good");
    rt.install().expect("Failed to install");
    rt.enable_plugin("Bad").expect("Failed to enable Bad");
    rt.enable_plugin("Good").expect("Failed to enable Good");

    let out = rt.intercept("m", "present x");
    assert_eq!(out, "patched x", "the healthy plugin's rewrite must survive");

    let report = rt.finish_load().expect("optional failure must not abort the load");
    assert!(report.disabled.iter().any(|(name, _)| name == "Bad"));
    assert_eq!(rt.plugin_state("Bad"), Some(PluginState::Disabled));
    assert_eq!(rt.plugin_state("Good"), Some(PluginState::Running));
}

#[test]
fn test_required_rule_failure_aborts_load() {
    let mut rt = runtime();
    rt.register_plugin(
        Plugin::builder("Core")
            .required()
            .patch(PatchRule::new("present").replace_pattern("absent", "x"))
            .build(),
    )
    .expect("Failed to register plugin");
    rt.install().expect("Failed to install");

    rt.intercept("m", "present x");
    match rt.finish_load() {
        Err(StartupError::RequiredRuleFailed { module_id, owner, .. }) => {
            assert_eq!(module_id, "m");
            assert_eq!(owner, "Core");
        }
        other => panic!("expected RequiredRuleFailed, got {other:?}"),
    }
}

#[test]
fn test_dependency_enable_and_disable_order() {
    let mut rt = runtime();
    rt.register_plugin(nav_plugin_optional("Alpha"))
        .expect("Failed to register Alpha");
    rt.register_plugin(
        Plugin::builder("Beta")
            .depends_on("Alpha")
            .patch(PatchRule::new("other:").replace("other:", "b:"))
            .build(),
    )
    .expect("Failed to register Beta");
    rt.install().expect("Failed to install");

    // Enabling Beta pulls Alpha in first.
    let newly = rt.enable_plugin("Beta").expect("Failed to enable Beta");
    assert_eq!(newly, vec!["Alpha".to_string(), "Beta".to_string()]);

    // Alpha cannot be disabled while Beta still needs it.
    match rt.disable_plugin("Alpha") {
        Err(PluginError::HasDependents { plugin, dependents }) => {
            assert_eq!(plugin, "Alpha");
            assert_eq!(dependents, vec!["Beta".to_string()]);
        }
        other => panic!("expected HasDependents, got {other:?}"),
    }
    assert!(rt.is_enabled("Alpha"));
    assert!(rt.is_enabled("Beta"));

    // Dependent first, then the dependency.
    rt.disable_plugin("Beta").expect("Failed to disable Beta");
    rt.disable_plugin("Alpha").expect("Failed to disable Alpha");
    assert!(!rt.is_enabled("Alpha"));
    assert!(!rt.is_enabled("Beta"));
}

#[test]
fn test_closure_replacement_sees_capture_groups() {
    let mut rt = runtime();
    rt.register_plugin(
        Plugin::builder("Elements")
            .required()
            .patch(
                PatchRule::new("createElement").replace_with(r"(\i)\.createElement", |m| {
                    let object = m.group(1).ok_or("missing capture")?;
                    Ok(format!("{object}.el"))
                }),
            )
            .build(),
    )
    .expect("Failed to register plugin");
    rt.install().expect("Failed to install");

    let out = rt.intercept("m", "return React.createElement(x)");
    assert_eq!(out, "return React.el(x)");
}

#[test]
fn test_one_shot_rule_applies_to_first_module_only() {
    let mut rt = runtime();
    rt.register_plugin(
        Plugin::builder("Once")
            .required()
            .patch(PatchRule::new("tok").replace("tok", "TOK"))
            .build(),
    )
    .expect("Failed to register plugin");
    rt.install().expect("Failed to install");

    assert_eq!(rt.intercept("m1", "tok a"), "TOK a");
    assert_eq!(rt.intercept("m2", "tok b"), "tok b");
}

#[test]
fn test_all_modules_rule_applies_to_every_module() {
    let mut rt = runtime();
    rt.register_plugin(
        Plugin::builder("Everywhere")
            .required()
            .patch(PatchRule::new("tok").all_modules().replace("tok", "TOK"))
            .build(),
    )
    .expect("Failed to register plugin");
    rt.install().expect("Failed to install");

    assert_eq!(rt.intercept("m1", "tok a"), "TOK a");
    assert_eq!(rt.intercept("m2", "tok b"), "TOK b");

    let report = rt.finish_load().expect("Failed to finish load");
    assert_eq!(report.modules_seen, 2);
    assert_eq!(report.modules_patched, 2);
}

#[test]
fn test_one_shot_rule_is_consumed_even_when_it_fails() {
    let mut rt = runtime();
    // First module carries the find token but not the inner pattern, so
    // the rule fails there and is spent. The second module would have
    // matched cleanly but never sees the rule.
    rt.register_plugin(
        Plugin::builder("Spent")
            .patch(PatchRule::new("tok").replace("inner", "INNER"))
            .build(),
    )
    .expect("Failed to register plugin");
    rt.install().expect("Failed to install");
    rt.enable_plugin("Spent").expect("Failed to enable plugin");

    assert_eq!(rt.intercept("m1", "tok only"), "tok only");
    assert_eq!(rt.intercept("m2", "tok inner"), "tok inner");
}
