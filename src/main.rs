use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use goroot_patcher::anchor::AnchorError;
use goroot_patcher::bundle::{Bundle, BundleKind, BundlePlan, BundleReport};
use goroot_patcher::overlay::EmbeddedAssets;
use goroot_patcher::patch::{load_dir, load_from_path, ApplicationError, PatchOutcome, PatchSet};
use goroot_patcher::region::RegionError;
use goroot_patcher::rules::{self, RuleSet, Target};
use goroot_patcher::safety::ToolchainGuard;
use goroot_patcher::toolchain::{self, Toolchain};
use goroot_patcher::version::{GoVersion, VersionError, MAX_SUPPORTED_MINOR};
use similar::{ChangeTag, TextDiff};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "goroot-patcher")]
#[command(about = "Weave trap hooks into a Go toolchain's compiler and runtime", long_about = None)]
#[command(version)]
struct Cli {
    /// Log patch decisions (goroot_patcher=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum BundleChoice {
    All,
    Compiler,
    Runtime,
}

impl BundleChoice {
    fn kinds(self) -> &'static [BundleKind] {
        match self {
            BundleChoice::All => &BundleKind::ALL,
            BundleChoice::Compiler => &[BundleKind::Compiler],
            BundleChoice::Runtime => &[BundleKind::Runtime],
        }
    }
}

#[derive(Args)]
struct ToolchainArgs {
    /// Toolchain root (defaults to $GOROOT, then `go env GOROOT`)
    #[arg(short, long)]
    goroot: Option<PathBuf>,

    /// Use this version instead of detecting it, e.g. go1.22.4
    #[arg(long)]
    go_version: Option<GoVersion>,

    /// Built-in bundles to apply
    #[arg(short, long, value_enum, default_value_t = BundleChoice::All)]
    bundle: BundleChoice,

    /// Extra TOML patch set, or a directory of them (repeatable)
    #[arg(short, long)]
    patches: Vec<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Func,
    Var,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply patches to a toolchain
    Apply {
        #[command(flatten)]
        toolchain: ToolchainArgs,

        /// Dry run - show what would be changed without modifying files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,
    },

    /// Check status of patches without applying
    Status {
        #[command(flatten)]
        toolchain: ToolchainArgs,
    },

    /// Fail unless every applicable patch is already present
    Verify {
        #[command(flatten)]
        toolchain: ToolchainArgs,
    },

    /// List built-in patches and their version constraints
    List {
        /// Version to resolve tables for (defaults to the newest supported)
        #[arg(long)]
        go_version: Option<GoVersion>,

        #[arg(short, long, value_enum, default_value_t = BundleChoice::All)]
        bundle: BundleChoice,

        /// Extra TOML patch set, or a directory of them (repeatable)
        #[arg(short, long)]
        patches: Vec<PathBuf>,
    },

    /// Show the detected toolchain version
    Version {
        #[arg(short, long)]
        goroot: Option<PathBuf>,
    },

    /// Evaluate or export trap rules
    Rules {
        /// Rule file (.toml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the rules as compiler options JSON
        #[arg(long)]
        export: Option<PathBuf>,

        /// Package of a target to evaluate
        #[arg(long, requires = "name")]
        pkg: Option<String>,

        /// Name of a target to evaluate
        #[arg(long, requires = "pkg")]
        name: Option<String>,

        #[arg(long, value_enum, default_value_t = KindArg::Func)]
        kind: KindArg,

        #[arg(long)]
        stdlib: bool,

        #[arg(long)]
        main_module: bool,

        #[arg(long)]
        generic: bool,

        #[arg(long)]
        closure: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Apply {
            toolchain,
            dry_run,
            diff,
        } => cmd_apply(toolchain, dry_run, diff),

        Commands::Status { toolchain } => cmd_status(toolchain),

        Commands::Verify { toolchain } => cmd_verify(toolchain),

        Commands::List {
            go_version,
            bundle,
            patches,
        } => cmd_list(go_version, bundle, &patches),

        Commands::Version { goroot } => cmd_version(goroot),

        Commands::Rules {
            config,
            export,
            pkg,
            name,
            kind,
            stdlib,
            main_module,
            generic,
            closure,
        } => {
            let target = match (pkg, name) {
                (Some(pkg), Some(name)) => {
                    let mut target = match kind {
                        KindArg::Func => Target::func(pkg, name),
                        KindArg::Var => Target::var(pkg, name),
                    };
                    target.stdlib = stdlib;
                    target.main_module = main_module;
                    target.generic = generic;
                    target.closure = closure;
                    Some(target)
                }
                _ => None,
            };
            cmd_rules(config, export, target)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("goroot_patcher=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Helper: Resolve the toolchain root and its version.
fn resolve_toolchain(goroot: Option<&Path>, version: Option<GoVersion>) -> Result<Toolchain> {
    let root = toolchain::resolve_goroot(goroot)?;
    // report paths relative to the same canonical root the guard resolves against
    let root = root
        .canonicalize()
        .with_context(|| format!("GOROOT {} is not accessible", root.display()))?;
    let toolchain = match version {
        Some(version) => Toolchain::with_version(&root, version)?,
        None => Toolchain::detect(&root)
            .with_context(|| format!("detecting go version under {}", root.display()))?,
    };
    Ok(toolchain)
}

/// Helper: Read patch sets from files and directories, in argument order.
fn load_patch_sets(paths: &[PathBuf]) -> Result<Vec<(PathBuf, PatchSet)>> {
    let mut sets = Vec::new();
    for path in paths {
        if path.is_dir() {
            sets.extend(load_dir(path)?);
        } else {
            sets.push((path.clone(), load_from_path(path)?));
        }
    }
    Ok(sets)
}

/// Helper: Built-in bundles plus every extra patch set that admits `version`.
fn assemble_bundle(
    kinds: &[BundleKind],
    patches: &[PathBuf],
    version: &GoVersion,
) -> Result<Bundle> {
    let mut bundle = Bundle::builtin(kinds, version)?;
    for (path, set) in load_patch_sets(patches)? {
        if !set.applies_to(version)? {
            println!(
                "{} {}: Skipped (version_range excludes {})",
                "⊘".cyan(),
                path.display(),
                version
            );
            continue;
        }
        bundle = bundle.merge(Bundle::from_patch_set(&set)?);
    }
    Ok(bundle)
}

fn print_header(title: &str, toolchain: &Toolchain) {
    println!("{}", title.bold());
    println!("GOROOT: {}", toolchain.root.display());
    match &toolchain.target {
        Some((os, arch)) => println!("Version: {} ({}/{})", toolchain.version, os, arch),
        None => println!("Version: {}", toolchain.version),
    }
    println!();
}

fn relative<'a>(root: &Path, file: &'a Path) -> &'a Path {
    file.strip_prefix(root).unwrap_or(file)
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

fn display_plan_diff(root: &Path, plan: &BundlePlan) {
    for file in &plan.files {
        if let (Some(before), Some(after)) = (&file.original, &file.updated) {
            if before != after {
                display_diff(relative(root, &file.file), before, after);
            }
        }
    }
    for overlay in &plan.overlays {
        if !overlay.up_to_date() {
            let before = overlay.existing.as_deref().unwrap_or("");
            display_diff(relative(root, &overlay.file), before, &overlay.content);
        }
    }
}

/// Helper: Print an error with conflict diagnostics.
fn report_failure(err: &ApplicationError) {
    eprintln!("{} {}", "✗".red(), err);

    match err {
        ApplicationError::Anchor {
            file,
            source: AnchorError::NotFound { closest, .. },
            ..
        } => {
            eprintln!("  {}", "CONFLICT: anchor sequence not found".red());
            eprintln!("  File: {}", file.display());
            if let Some(line) = closest {
                eprintln!("  Closest line {}: {}", line.line, line.text.trim());
            }
            eprintln!("  Possible causes:");
            eprintln!("    - Anchored code was renamed or reformatted upstream");
            eprintln!("    - This release needs its own dispatch table entry");
        }
        ApplicationError::Anchor {
            file,
            source: AnchorError::Ambiguous { .. },
            ..
        } => {
            eprintln!("  {}", "CONFLICT: anchor sequence matched more than once".red());
            eprintln!("  File: {}", file.display());
            eprintln!("  Action: Add a more specific leading anchor");
        }
        ApplicationError::Region {
            file,
            source: RegionError::Corrupted { .. },
            ..
        } => {
            eprintln!("  {}", "CORRUPTED: sentinel pair is broken".red());
            eprintln!("  File: {}", file.display());
            eprintln!("  Action: Restore this file from a clean toolchain and re-run");
        }
        ApplicationError::Version(VersionError::Unsupported { .. }) => {
            eprintln!("  Action: Pass --go-version only for a supported release");
        }
        _ => {}
    }
}

struct Totals {
    applied: usize,
    already_applied: usize,
    skipped: usize,
}

fn totals(report: &BundleReport) -> Totals {
    let fresh_overlays = report.overlays.iter().filter(|o| !o.up_to_date).count();
    Totals {
        applied: report.count(PatchOutcome::Inserted)
            + report.count(PatchOutcome::Replaced)
            + fresh_overlays,
        already_applied: report.count(PatchOutcome::AlreadyApplied) + report.overlays.len()
            - fresh_overlays,
        skipped: report.count(PatchOutcome::SkippedVersion),
    }
}

fn print_summary(totals: &Totals, failed: usize) {
    println!("{}", "Summary:".bold());
    println!("  {} applied", format!("{}", totals.applied).green());
    println!(
        "  {} already applied",
        format!("{}", totals.already_applied).yellow()
    );
    println!("  {} skipped", format!("{}", totals.skipped).cyan());
    println!("  {} failed", format!("{}", failed).red());
}

fn cmd_apply(args: ToolchainArgs, dry_run: bool, show_diff: bool) -> Result<()> {
    // 1. Resolve toolchain and version
    let toolchain = resolve_toolchain(args.goroot.as_deref(), args.go_version)?;
    print_header("Applying patches", &toolchain);

    // 2. Assemble the bundle for this version
    let bundle = assemble_bundle(args.bundle.kinds(), &args.patches, &toolchain.version)?;
    let guard = ToolchainGuard::new(&toolchain.root)?;

    // 3. Plan every file before writing any
    let plan = match bundle.plan(&guard, &toolchain.version, &EmbeddedAssets) {
        Ok(plan) => plan,
        Err(e) => {
            report_failure(&e);
            eprintln!("  {}", "No files were modified.".dimmed());
            std::process::exit(1);
        }
    };

    if show_diff {
        display_plan_diff(&toolchain.root, &plan);
        println!();
    }

    // 4. Commit (or not)
    let report = if dry_run {
        println!("{}", "  [DRY RUN - showing what would be applied]".cyan());
        plan.dry_run()
    } else {
        match plan.commit(&guard) {
            Ok(report) => report,
            Err(e) => {
                report_failure(&e);
                std::process::exit(1);
            }
        }
    };

    // 5. Report results
    let verb = if dry_run { "Would apply to" } else { "Applied to" };
    for file in &report.files {
        let path = relative(&toolchain.root, &file.file);
        for patch in &file.patches {
            match patch.outcome {
                PatchOutcome::Inserted | PatchOutcome::Replaced => {
                    println!("{} {}: {} {}", "✓".green(), patch.mark, verb, path.display());
                }
                PatchOutcome::AlreadyApplied => {
                    println!(
                        "{} {}: Already applied to {}",
                        "⊙".yellow(),
                        patch.mark,
                        path.display()
                    );
                }
                PatchOutcome::SkippedVersion => {
                    println!(
                        "{} {}: Skipped (not for {})",
                        "⊘".cyan(),
                        patch.mark,
                        toolchain.version
                    );
                }
            }
        }
    }
    for overlay in &report.overlays {
        if overlay.up_to_date {
            println!("{} {}: Up to date", "⊙".yellow(), overlay.target);
        } else {
            let verb = if dry_run { "Would write" } else { "Written" };
            println!("{} {}: {}", "✓".green(), overlay.target, verb);
        }
    }

    // 6. Summary
    println!();
    print_summary(&totals(&report), 0);
    Ok(())
}

fn cmd_status(args: ToolchainArgs) -> Result<()> {
    let toolchain = resolve_toolchain(args.goroot.as_deref(), args.go_version)?;
    print_header("Patch Status Report", &toolchain);

    let bundle = assemble_bundle(args.bundle.kinds(), &args.patches, &toolchain.version)?;

    // Read-only; does not mutate toolchain files
    let report = match bundle.check(&toolchain.root, &toolchain.version, &EmbeddedAssets) {
        Ok(report) => report,
        Err(e) => {
            report_failure(&e);
            std::process::exit(1);
        }
    };

    let mut applied = Vec::new();
    let mut not_applied = Vec::new();
    let mut skipped = Vec::new();

    for file in &report.files {
        let path = relative(&toolchain.root, &file.file);
        for patch in &file.patches {
            let id = format!("{} ({})", patch.mark, path.display());
            match patch.outcome {
                PatchOutcome::AlreadyApplied => applied.push(id),
                PatchOutcome::Inserted => not_applied.push((id, "region missing")),
                PatchOutcome::Replaced => not_applied.push((id, "region outdated")),
                PatchOutcome::SkippedVersion => skipped.push(id),
            }
        }
    }
    for overlay in &report.overlays {
        let id = overlay.target.clone();
        if overlay.up_to_date {
            applied.push(id);
        } else if overlay.file.exists() {
            not_applied.push((id, "overlay outdated"));
        } else {
            not_applied.push((id, "overlay missing"));
        }
    }

    if !applied.is_empty() {
        println!(
            "{} {} ({} patches)",
            "✓".green(),
            "APPLIED".green().bold(),
            applied.len()
        );
        for id in &applied {
            println!("  - {}", id);
        }
        println!();
    }

    if !not_applied.is_empty() {
        println!(
            "{} {} ({} patches)",
            "⊙".yellow(),
            "NOT APPLIED".yellow().bold(),
            not_applied.len()
        );
        for (id, reason) in &not_applied {
            println!("  - {} ({})", id, reason.dimmed());
        }
        println!();
    }

    if !skipped.is_empty() {
        println!(
            "{} {} ({} patches)",
            "⊘".cyan(),
            "SKIPPED".cyan().bold(),
            skipped.len()
        );
        for id in &skipped {
            println!("  - {}", id);
        }
        println!();
    }

    Ok(())
}

fn cmd_verify(args: ToolchainArgs) -> Result<()> {
    let toolchain = resolve_toolchain(args.goroot.as_deref(), args.go_version)?;
    print_header("Verifying patches...", &toolchain);

    let bundle = assemble_bundle(args.bundle.kinds(), &args.patches, &toolchain.version)?;

    let report = match bundle.check(&toolchain.root, &toolchain.version, &EmbeddedAssets) {
        Ok(report) => report,
        Err(e) => {
            report_failure(&e);
            std::process::exit(1);
        }
    };

    let mut verified = 0;
    let mut mismatch = 0;
    let mut skipped = 0;

    for file in &report.files {
        let path = relative(&toolchain.root, &file.file);
        for patch in &file.patches {
            match patch.outcome {
                PatchOutcome::AlreadyApplied => {
                    println!("{} {}: Verified", "✓".green(), patch.mark);
                    verified += 1;
                }
                PatchOutcome::Inserted | PatchOutcome::Replaced => {
                    eprintln!("{} {}: MISMATCH", "✗".red(), patch.mark);
                    eprintln!("  Expected: patch already applied");
                    eprintln!("  Found: {}", patch.outcome);
                    eprintln!("  Location: {}", path.display());
                    mismatch += 1;
                }
                PatchOutcome::SkippedVersion => {
                    println!("{} {}: Skipped", "⊘".cyan(), patch.mark);
                    skipped += 1;
                }
            }
        }
    }
    for overlay in &report.overlays {
        if overlay.up_to_date {
            println!("{} {}: Verified", "✓".green(), overlay.target);
            verified += 1;
        } else {
            eprintln!("{} {}: MISMATCH", "✗".red(), overlay.target);
            eprintln!("  Expected: overlay matches the embedded source");
            mismatch += 1;
        }
    }

    println!();
    println!("{}", "Summary:".bold());
    println!("  {} verified", format!("{}", verified).green());
    println!("  {} mismatch", format!("{}", mismatch).red());
    println!("  {} skipped", format!("{}", skipped).cyan());

    if mismatch > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_list(version: Option<GoVersion>, choice: BundleChoice, patches: &[PathBuf]) -> Result<()> {
    let version = version.unwrap_or(GoVersion::new(1, MAX_SUPPORTED_MINOR, 0));
    println!("{}", format!("Patches for {}", version).bold());
    println!();

    let bundle = assemble_bundle(choice.kinds(), patches, &version)?;

    for file in &bundle.files {
        println!("{}", file.relative.bold());
        for patch in &file.patches {
            let symbol = if patch.applies_to(&version) {
                "✓".green()
            } else {
                "⊘".cyan()
            };
            println!(
                "  {} {} [{}] ({})",
                symbol,
                patch.mark,
                patch.placement,
                patch.applies_to
            );
        }
    }

    if !bundle.overlays.is_empty() {
        println!();
        println!("{}", "Overlays".bold());
        for overlay in &bundle.overlays {
            let symbol = if overlay.applies_to.accepts(&version) {
                "✓".green()
            } else {
                "⊘".cyan()
            };
            println!(
                "  {} {} <- {} ({})",
                symbol, overlay.target, overlay.asset, overlay.applies_to
            );
        }
    }

    Ok(())
}

fn cmd_version(goroot: Option<PathBuf>) -> Result<()> {
    let root = toolchain::resolve_goroot(goroot.as_deref())?;
    let toolchain = Toolchain::detect(&root)?;

    match &toolchain.target {
        Some((os, arch)) => println!("{} {}/{}", toolchain.version, os, arch),
        None => println!("{}", toolchain.version),
    }

    if toolchain.version.is_supported() {
        println!("{} supported", "✓".green());
    } else {
        let err = VersionError::Unsupported {
            version: toolchain.version,
        };
        eprintln!("{} {}", "✗".red(), err);
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_rules(config: Option<PathBuf>, export: Option<PathBuf>, target: Option<Target>) -> Result<()> {
    let set = match &config {
        Some(path) => RuleSet::load_from_path(path)
            .with_context(|| format!("loading rules from {}", path.display()))?,
        None => RuleSet::default(),
    };
    println!("{} rules loaded", set.rules.len());

    if let Some(target) = target {
        let decision = set.decide(&target);
        let verdict = if decision.include {
            "include".green()
        } else {
            "exclude".red()
        };
        let reason = match decision.rule {
            Some(index) => format!("rule #{}", index),
            None => "default".to_string(),
        };
        println!("{} {}.{}: {} ({})", target.kind, target.pkg, target.name, verdict, reason);
    }

    if let Some(path) = export {
        if set.export(&path)? {
            println!("{} Exported to {}", "✓".green(), path.display());
        } else {
            println!("{} {} is up to date", "⊙".yellow(), path.display());
        }
        println!(
            "  {}",
            format!(
                "{}=true {}={}",
                rules::ENABLE_ENV,
                rules::OPTIONS_FILE_ENV,
                path.display()
            )
            .dimmed()
        );
    }

    Ok(())
}
