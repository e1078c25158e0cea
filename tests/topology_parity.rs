//! The same catalogs run against standalone and sharded deployments must
//! produce the same failure identities.

mod common;

use authz_matrix::builtin;
use authz_matrix::cases::{AuthTest, CommandSpec, Coverage, TestCase};
use authz_matrix::memory::InMemoryDeployment;
use authz_matrix::classify::MismatchKind;
use authz_matrix::report::{
    FailureAggregator, FailureKey, FailureRecord, MatrixReport, TrialCounts, compare_reports,
};
use authz_matrix::runner::MatrixRunner;
use authz_matrix::system::Topology;
use common::fixture;
use pretty_assertions::assert_eq;
use serde_json::json;

fn run_on(topology: Topology, tests: &[AuthTest], coverage: Coverage) -> MatrixReport {
    let (config, catalog, mut system) = fixture(topology);
    MatrixRunner::from_config(&catalog, &config)
        .with_coverage(coverage)
        .run(&mut system, tests)
        .unwrap()
}

#[test]
fn builtin_catalog_agrees_across_topologies() {
    let (config, _, _) = fixture(Topology::Standalone);
    let tests = builtin::auth_tests(&config);
    let standalone = run_on(Topology::Standalone, &tests, Coverage::FullCatalog);
    let sharded = run_on(Topology::Sharded { shards: 3 }, &tests, Coverage::FullCatalog);

    assert!(standalone.is_clean(), "{}", standalone.aggregator().render());
    assert!(sharded.is_clean(), "{}", sharded.aggregator().render());
    assert_eq!(standalone.catalog_digest, sharded.catalog_digest);
    assert_eq!(standalone.counts.trials, sharded.counts.trials);

    // Sharded-only commands are tolerated on standalone, never counted as
    // mismatches, so the tolerated counts differ while parity holds.
    assert!(standalone.counts.tolerated > sharded.counts.tolerated);
    assert!(compare_reports(&standalone, &sharded).is_consistent());
}

#[test]
fn one_sided_policy_fault_is_a_divergence() {
    let tests = vec![
        AuthTest::new("dropDatabase", CommandSpec::literal(json!({"dropDatabase": 1})))
            .case(TestCase::on("roles_commands_1").deny(["read", "readWrite"])),
    ];
    let standalone = run_on(Topology::Standalone, &tests, Coverage::Declared);

    let (config, catalog, system) = fixture(Topology::Sharded { shards: 2 });
    let mut faulty: InMemoryDeployment =
        system.with_policy_override("readWrite", "dropDatabase", true);
    let sharded = MatrixRunner::from_config(&catalog, &config)
        .run(&mut faulty, &tests)
        .unwrap();

    let parity = compare_reports(&standalone, &sharded);
    assert!(parity.same_catalog);
    assert!(!parity.is_consistent());
    assert!(parity.only_left.is_empty());
    assert_eq!(
        parity.only_right.iter().map(|key| key.role_key.as_str()).collect::<Vec<_>>(),
        vec!["readWrite"]
    );
}

fn denial(role: &str) -> FailureRecord {
    FailureRecord {
        test_name: "find".to_string(),
        role_key: role.to_string(),
        run_on_db: "roles_commands_1".to_string(),
        kind: MismatchKind::UnexpectedDenial,
        message: format!("unexpected denial with role {role}"),
    }
}

fn report_with(topology: Topology, roles: &[&str]) -> MatrixReport {
    let mut failures = FailureAggregator::new();
    failures.extend(roles.iter().map(|role| denial(role)));
    MatrixReport::new(
        topology,
        "same-catalog".to_string(),
        chrono::Utc::now(),
        TrialCounts::default(),
        failures,
    )
}

#[test]
fn repeated_failure_on_one_side_is_a_divergence() {
    let left = report_with(Topology::Standalone, &["read", "read"]);
    let right = report_with(Topology::Sharded { shards: 2 }, &["read"]);
    let parity = compare_reports(&left, &right);

    assert!(!parity.is_consistent());
    assert!(parity.only_right.is_empty());
    assert_eq!(
        parity.only_left.iter().map(ToString::to_string).collect::<Vec<_>>(),
        vec!["find role read on roles_commands_1 (unexpected denial)"]
    );
    assert_eq!(parity.problem_count(), 1);
}

#[test]
fn reordered_failures_are_a_divergence() {
    let left = report_with(Topology::Standalone, &["read", "root"]);
    let right = report_with(Topology::Sharded { shards: 2 }, &["root", "read"]);
    let parity = compare_reports(&left, &right);

    assert!(parity.only_left.is_empty());
    assert!(parity.only_right.is_empty());
    assert!(!parity.same_order);
    assert!(!parity.is_consistent());
    assert_eq!(parity.problem_count(), 1);

    let same = report_with(Topology::Sharded { shards: 2 }, &["read", "root"]);
    assert!(compare_reports(&left, &same).is_consistent());
}

#[test]
fn reports_from_different_catalogs_are_flagged() {
    let find = vec![
        AuthTest::new("find", CommandSpec::literal(json!({"find": "foo"})))
            .case(TestCase::on("roles_commands_1").allow(["read"])),
    ];
    let find_more = vec![
        AuthTest::new("find", CommandSpec::literal(json!({"find": "foo"})))
            .case(TestCase::on("roles_commands_1").allow(["read", "readWrite"])),
    ];
    let left = run_on(Topology::Standalone, &find, Coverage::Declared);
    let right = run_on(Topology::Sharded { shards: 2 }, &find_more, Coverage::Declared);
    let parity = compare_reports(&left, &right);
    assert!(!parity.same_catalog);
    assert!(!parity.is_consistent());
}

#[test]
fn written_reports_round_trip_for_offline_comparison() {
    let tests = vec![
        AuthTest::new("find", CommandSpec::literal(json!({"find": "foo"})))
            .case(TestCase::on("roles_commands_1").allow(["backup"])),
    ];
    let report = run_on(Topology::Standalone, &tests, Coverage::Declared);
    assert_eq!(report.failures.len(), 1);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("standalone.json");
    report.write_json(&path).unwrap();
    let loaded: MatrixReport =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(loaded.run_id, report.run_id);
    assert_eq!(
        loaded.failures.iter().map(FailureKey::from).collect::<Vec<_>>(),
        report.failures.iter().map(FailureKey::from).collect::<Vec<_>>()
    );
    assert!(compare_reports(&report, &loaded).is_consistent());
}
