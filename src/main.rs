use anyhow::Result;
use bundlemod::bundle::{discover_modules, write_patched};
use bundlemod::config::load_from_path;
use bundlemod::settings::enabled_key;
use bundlemod::{MemoryStore, ModRuntime, StartupError};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::Value;
use similar::{ChangeTag, TextDiff};
use std::env;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "bundlemod")]
#[command(about = "Patch-based client modification engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Patch an extracted bundle and write the result
    Apply {
        /// Directory of extracted .js modules, or a single module file
        bundle: PathBuf,

        /// Output directory for patched modules
        #[arg(short, long)]
        out: PathBuf,

        /// Directory of plugin manifests (auto-detected if not specified)
        #[arg(short, long)]
        manifests: Option<PathBuf>,

        /// Host application version, for version-gated rules
        #[arg(long)]
        host_version: Option<String>,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,
    },

    /// Run rules against a bundle without writing anything
    Check {
        /// Directory of extracted .js modules, or a single module file
        bundle: PathBuf,

        /// Directory of plugin manifests (auto-detected if not specified)
        #[arg(short, long)]
        manifests: Option<PathBuf>,

        /// Host application version, for version-gated rules
        #[arg(long)]
        host_version: Option<String>,

        /// Show unified diff of what would change
        #[arg(short, long)]
        diff: bool,
    },

    /// List plugins declared in the manifests
    List {
        /// Directory of plugin manifests (auto-detected if not specified)
        #[arg(short, long)]
        manifests: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bundlemod=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Apply {
            bundle,
            out,
            manifests,
            host_version,
            diff,
        } => cmd_apply(bundle, out, manifests, host_version, diff),

        Commands::Check {
            bundle,
            manifests,
            host_version,
            diff,
        } => cmd_check(bundle, manifests, host_version, diff),

        Commands::List { manifests } => cmd_list(manifests),
    }
}

/// Helper: Discover all .toml manifest files.
///
/// Discovery order:
/// 1. The --manifests flag, when given.
/// 2. `./manifests` relative to the current working directory.
/// 3. `~/.bundlemod/manifests`.
fn discover_manifest_files(flag: Option<PathBuf>) -> Result<Vec<PathBuf>> {
    let mut candidate_dirs = Vec::new();
    if let Some(dir) = flag {
        candidate_dirs.push(dir);
    } else {
        if let Ok(cwd) = env::current_dir() {
            candidate_dirs.push(cwd.join("manifests"));
        }
        if let Some(home) = home::home_dir() {
            candidate_dirs.push(home.join(".bundlemod").join("manifests"));
        }
    }

    for dir in &candidate_dirs {
        if !dir.exists() {
            continue;
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(dir).max_depth(1) {
            let entry = entry?;
            if entry.file_type().is_file()
                && entry.path().extension().and_then(|s| s.to_str()) == Some("toml")
            {
                files.push(entry.path().to_path_buf());
            }
        }

        files.sort();

        if !files.is_empty() {
            return Ok(files);
        }
    }

    anyhow::bail!(
        "No .toml manifests found; looked in: {}",
        candidate_dirs
            .iter()
            .map(|d| d.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    )
}

/// Helper: Parse the --host-version flag, warning instead of failing.
fn parse_host_flag(host_version: Option<String>) -> Option<semver::Version> {
    let raw = host_version?;
    match bundlemod::version::parse_host_version(&raw) {
        Ok(v) => Some(v),
        Err(e) => {
            eprintln!(
                "{}",
                format!("Warning: ignoring --host-version: {e}").yellow()
            );
            None
        }
    }
}

/// Helper: Build a runtime with every manifest plugin enabled.
fn build_runtime(
    manifest_files: &[PathBuf],
    host_version: Option<semver::Version>,
) -> Result<(ModRuntime, Vec<String>)> {
    let mut store = MemoryStore::new();
    let mut declared = Vec::new();
    let mut plugins = Vec::new();

    for file in manifest_files {
        println!("Loading manifest {}...", file.display());
        let manifest = load_from_path(file)?;
        for plugin in manifest.into_plugins() {
            declared.push(plugin.name.clone());
            plugins.push(plugin);
        }
    }

    use bundlemod::settings::SettingsStore;
    for name in &declared {
        store.set(&enabled_key(name), Value::Bool(true));
    }

    let mut runtime = ModRuntime::new(Box::new(store), host_version);
    for plugin in plugins {
        runtime.register_plugin(plugin)?;
    }
    runtime.install()?;
    Ok((runtime, declared))
}

/// Helper: Show unified diff between original and patched module text.
fn display_diff(module_id: &str, original: &str, patched: &str) {
    println!("\n{}", format!("--- module {module_id} (original)").dimmed());
    println!("{}", format!("+++ module {module_id} (patched)").dimmed());

    let diff = TextDiff::from_lines(original, patched);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
    println!();
}

/// Run the pipeline over a bundle and report per-module results.
/// Returns (rules applied, failures) for the exit code.
fn run_and_report(
    runtime: &mut ModRuntime,
    declared: &[String],
    bundle: &Path,
    show_diff: bool,
) -> Result<(usize, usize)> {
    // 1. Feed every module through the interceptor
    let modules = discover_modules(bundle)?;
    for module in &modules {
        runtime.intercept(&module.id, &module.source);
    }

    // 2. Settle the load
    let mut failures = 0;
    let mut taken_down = std::collections::HashSet::new();
    match runtime.finish_load() {
        Ok(report) => {
            for (name, reason) in &report.disabled {
                println!("{} plugin {name} disabled ({reason})", "⊘".cyan());
                taken_down.insert(name.clone());
                failures += 1;
            }
        }
        Err(StartupError::RequiredRuleFailed {
            module_id,
            owner,
            failure,
            ..
        }) => {
            eprintln!(
                "{} required plugin {owner} failed on module {module_id}: {failure}",
                "✗".red()
            );
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("{} {e}", "✗".red());
            std::process::exit(1);
        }
    }

    // 3. Surface plugins that never made it into the registry. A
    //    retry is side-effect free for them: validation fails before
    //    any state changes.
    for name in declared {
        if !runtime.is_enabled(name) && !taken_down.contains(name) {
            if let Err(e) = runtime.enable_plugin(name) {
                eprintln!("{} plugin {name}: {e}", "✗".red());
                failures += 1;
            }
        }
    }

    // 4. Per-module results
    let mut applied = 0;
    for record in runtime.records() {
        for result in &record.results {
            if result.is_applied() {
                println!(
                    "{} module {}: rule of {} applied",
                    "✓".green(),
                    record.id,
                    result.owner
                );
                applied += 1;
            } else {
                eprintln!(
                    "{} module {}: rule of {} failed",
                    "✗".red(),
                    record.id,
                    result.owner
                );
            }
        }
        if show_diff && record.patched != record.original {
            display_diff(&record.id, &record.original, &record.patched);
        }
    }

    // 5. Summary
    let patched = runtime
        .records()
        .iter()
        .filter(|r| !r.applied_rules.is_empty())
        .count();
    println!();
    println!("{}", "Summary:".bold());
    println!("  {} modules scanned", runtime.records().len());
    println!("  {} modules patched", format!("{patched}").green());
    println!("  {} rules applied", format!("{applied}").green());
    println!("  {} failures", format!("{failures}").red());

    Ok((applied, failures))
}

fn cmd_check(
    bundle: PathBuf,
    manifests: Option<PathBuf>,
    host_version: Option<String>,
    diff: bool,
) -> Result<()> {
    let manifest_files = discover_manifest_files(manifests)?;
    let host = parse_host_flag(host_version);
    let (mut runtime, declared) = build_runtime(&manifest_files, host)?;

    let (_, failures) = run_and_report(&mut runtime, &declared, &bundle, diff)?;

    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_apply(
    bundle: PathBuf,
    out: PathBuf,
    manifests: Option<PathBuf>,
    host_version: Option<String>,
    diff: bool,
) -> Result<()> {
    let manifest_files = discover_manifest_files(manifests)?;
    let host = parse_host_flag(host_version);
    let (mut runtime, declared) = build_runtime(&manifest_files, host)?;

    let (_, failures) = run_and_report(&mut runtime, &declared, &bundle, diff)?;

    // Refuse to write over the input
    std::fs::create_dir_all(&out)?;
    let out_canonical = out.canonicalize()?;
    let bundle_canonical = bundle.canonicalize()?;
    if out_canonical == bundle_canonical
        || (bundle_canonical.is_file() && Some(out_canonical.as_path()) == bundle_canonical.parent())
    {
        anyhow::bail!(
            "{}",
            format!(
                "output directory {} would overwrite the input bundle",
                out.display()
            )
            .red()
        );
    }

    let mut written = 0;
    for record in runtime.records() {
        write_patched(&out, &record.id, &record.patched)?;
        written += 1;
    }
    println!("  {} modules written to {}", written, out.display());

    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_list(manifests: Option<PathBuf>) -> Result<()> {
    let manifest_files = discover_manifest_files(manifests)?;

    for file in &manifest_files {
        let manifest = load_from_path(file)?;
        println!("{}", file.display().to_string().dimmed());
        for plugin in &manifest.plugins {
            let marker = if plugin.required {
                " (required)".red().to_string()
            } else {
                String::new()
            };
            println!("  {}{}", plugin.name.bold(), marker);
            if !plugin.description.is_empty() {
                println!("    {}", plugin.description.dimmed());
            }
            if !plugin.dependencies.is_empty() {
                println!("    depends on: {}", plugin.dependencies.join(", "));
            }
            for patch in &plugin.patches {
                match &patch.host_version_range {
                    Some(range) => println!("    patch '{}' (host {})", patch.find, range),
                    None => println!("    patch '{}'", patch.find),
                }
            }
            if !plugin.options.is_empty() {
                println!("    {} option(s)", plugin.options.len());
            }
        }
        println!();
    }

    Ok(())
}
