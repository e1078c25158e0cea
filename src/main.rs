//! authz_matrix: run the authorization matrix against the reference
//! deployments and report every disagreement.

#![forbid(unsafe_code)]

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use authz_matrix::builtin;
use authz_matrix::cases::{AuthTest, CatalogFile};
use authz_matrix::cli::{Cli, Commands, PolicyOverride};
use authz_matrix::config::Config;
use authz_matrix::memory::InMemoryDeployment;
use authz_matrix::report::{MatrixReport, compare_reports};
use authz_matrix::roles::RoleCatalog;
use authz_matrix::runner::MatrixRunner;
use authz_matrix::system::Topology;
use authz_matrix::validate::validate;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(err) = main_impl() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn main_impl() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply_to(&mut config)?;
    let catalog = RoleCatalog::builtin(&config.first_db, &config.admin_db);

    match cli.command() {
        Commands::Roles => {
            print_roles(&catalog);
            Ok(())
        }
        Commands::Validate => {
            let tests = load_tests(cli.catalog.as_deref(), &config)?;
            let summary = validate(&tests, &catalog, config.coverage)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Commands::Run {
            report,
            jsonl,
            policy_overrides,
        } => {
            let overrides = policy_overrides
                .iter()
                .map(|value| PolicyOverride::parse(value))
                .collect::<authz_matrix::Result<Vec<_>>>()?;
            let tests = load_tests(cli.catalog.as_deref(), &config)?;
            run(&config, &catalog, &tests, &overrides, report.as_deref(), jsonl.as_deref())
        }
    }
}

fn load_tests(path: Option<&Path>, config: &Config) -> Result<Vec<AuthTest>> {
    match path {
        Some(path) => {
            let file = CatalogFile::load(path)
                .with_context(|| format!("loading test catalog from {}", path.display()))?;
            Ok(file.into_tests()?)
        }
        None => Ok(builtin::auth_tests(config)),
    }
}

fn deployment(
    topology: Topology,
    config: &Config,
    overrides: &[PolicyOverride],
) -> InMemoryDeployment {
    overrides.iter().fold(
        InMemoryDeployment::new(topology, config),
        |system, o| system.with_policy_override(&o.role, &o.command, o.allow),
    )
}

fn run(
    config: &Config,
    catalog: &RoleCatalog,
    tests: &[AuthTest],
    overrides: &[PolicyOverride],
    report_path: Option<&Path>,
    jsonl_path: Option<&Path>,
) -> Result<()> {
    let topologies = config.topologies();
    let runner = MatrixRunner::from_config(catalog, config);
    let mut reports = Vec::with_capacity(topologies.len());

    for topology in &topologies {
        let mut system = deployment(*topology, config, overrides);
        runner
            .provisioner()
            .bootstrap_operator(&mut system)
            .with_context(|| format!("bootstrapping operator on {topology}"))?;
        let report = runner
            .run(&mut system, tests)
            .with_context(|| format!("matrix run on {topology}"))?;

        println!(
            "{topology}: {} trials, {} authorized, {} denied, {} tolerated, {} mismatches",
            report.counts.trials,
            report.counts.authorized,
            report.counts.denied,
            report.counts.tolerated,
            report.counts.mismatches,
        );
        if let Some(base) = report_path {
            let path = report_file(base, *topology, topologies.len() > 1);
            report
                .write_json(&path)
                .with_context(|| format!("writing report to {}", path.display()))?;
        }
        if let Some(path) = jsonl_path {
            report
                .append_jsonl(path)
                .with_context(|| format!("appending failures to {}", path.display()))?;
        }
        reports.push(report);
    }

    let mut problems = 0usize;
    for report in &reports {
        if !report.is_clean() {
            println!("\n{} failures on {}:", report.failures.len(), report.topology);
            print!("{}", report.aggregator().render());
            problems += report.failures.len();
        }
    }
    problems += report_parity(&reports);

    if problems > 0 {
        bail!("authorization matrix found {problems} problem(s)");
    }
    Ok(())
}

/// Compare consecutive topology runs; returns the number of divergences.
fn report_parity(reports: &[MatrixReport]) -> usize {
    reports
        .windows(2)
        .map(|pair| {
            let parity = compare_reports(&pair[0], &pair[1]);
            if parity.is_consistent() {
                return 0;
            }
            println!("\ntopology divergence between {} and {}:", parity.left, parity.right);
            if !parity.same_catalog {
                println!("  catalog digests differ");
            }
            for key in &parity.only_left {
                println!("  only on {}: {key}", parity.left);
            }
            for key in &parity.only_right {
                println!("  only on {}: {key}", parity.right);
            }
            if !parity.same_order {
                println!("  failures were emitted in a different order");
            }
            parity.problem_count()
        })
        .sum()
}

/// `report.json` becomes `report.sharded.json` when several topologies run.
fn report_file(base: &Path, topology: Topology, several: bool) -> PathBuf {
    if !several {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .map_or_else(|| "report".to_string(), |s| s.to_string_lossy().into_owned());
    let name = match base.extension() {
        Some(ext) => format!("{stem}.{}.{}", topology.label(), ext.to_string_lossy()),
        None => format!("{stem}.{}", topology.label()),
    };
    base.with_file_name(name)
}

fn print_roles(catalog: &RoleCatalog) {
    let width = catalog.keys().map(str::len).max().unwrap_or(0);
    for role in catalog.all() {
        println!("{:<width$}  {:<28}  {}", role.key, role.spec.to_string(), role.target_db);
    }
}
