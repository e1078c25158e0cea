//! Built-in authorization test catalog.
//!
//! Every case lists the complete set of roles that must succeed and denies
//! the rest, so the catalog is valid under both coverage modes.

use crate::cases::{AuthTest, CommandSpec, State, TestCase};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::system::{CommandReply, CommandSystem};
use serde_json::{Value, json};

const SEED_COLLECTION: &str = "foo";

const READ_ROLES: &[&str] = &[
    "read",
    "readAnyDatabase",
    "readWrite",
    "readWriteAnyDatabase",
    "dbOwner",
    "root",
    "__system",
];
const READ_ANY_ROLES: &[&str] = &["readAnyDatabase", "readWriteAnyDatabase", "root", "__system"];
const WRITE_ROLES: &[&str] = &[
    "readWrite",
    "readWriteAnyDatabase",
    "dbOwner",
    "restore",
    "root",
    "__system",
];
const DROP_COLLECTION_ROLES: &[&str] = &[
    "readWrite",
    "readWriteAnyDatabase",
    "dbAdmin",
    "dbAdminAnyDatabase",
    "dbOwner",
    "root",
    "__system",
];
const DROP_DATABASE_ROLES: &[&str] = &[
    "dbAdmin",
    "dbAdminAnyDatabase",
    "clusterAdmin",
    "dbOwner",
    "root",
    "__system",
];
const USER_ADMIN_ROLES: &[&str] = &[
    "userAdmin",
    "userAdminAnyDatabase",
    "dbOwner",
    "root",
    "__system",
];
const MONITOR_ROLES: &[&str] = &["clusterMonitor", "clusterAdmin", "root", "__system"];
const HOST_ROLES: &[&str] = &["hostManager", "clusterAdmin", "root", "__system"];
const LIST_DATABASES_ROLES: &[&str] = &[
    "readAnyDatabase",
    "readWriteAnyDatabase",
    "userAdminAnyDatabase",
    "dbAdminAnyDatabase",
    "clusterAdmin",
    "clusterMonitor",
    "clusterManager",
    "backup",
    "root",
    "__system",
];

fn seed(system: &mut dyn CommandSystem, db: &str) -> Result<State> {
    let raw = system.run_command(
        db,
        &json!({"insert": SEED_COLLECTION, "documents": [{"seed": 1}]}),
    )?;
    let reply = CommandReply::parse(raw)?;
    if !reply.ok {
        return Err(Error::transport(format!("seed insert failed: {reply}")));
    }
    Ok(json!({"collection": SEED_COLLECTION}))
}

fn drop_database(system: &mut dyn CommandSystem, db: &str) -> Result<()> {
    system.run_command(db, &json!({"dropDatabase": 1}))?;
    Ok(())
}

fn seeded_batch(reply: &CommandReply) -> std::result::Result<(), String> {
    let batch = reply
        .raw
        .pointer("/cursor/firstBatch")
        .and_then(Value::as_array)
        .ok_or_else(|| format!("reply has no cursor batch: {reply}"))?;
    if batch.len() == 1 {
        Ok(())
    } else {
        Err(format!("expected the seeded document, got {} documents", batch.len()))
    }
}

/// The built-in catalog, bound to the databases in `config`.
pub fn auth_tests(config: &Config) -> Vec<AuthTest> {
    let first = config.first_db.as_str();
    let second = config.second_db.as_str();
    let admin = config.admin_db.as_str();

    vec![
        AuthTest::new(
            "find",
            CommandSpec::generator(|state| {
                json!({"find": state.get("collection").cloned().unwrap_or(Value::Null)})
            }),
        )
        .case(
            TestCase::on(first)
                .allow(READ_ROLES.iter().copied())
                .on_success(seeded_batch),
        )
        .case(TestCase::on(second).allow(READ_ANY_ROLES.iter().copied()))
        .setup(seed)
        .teardown(drop_database),
        AuthTest::new(
            "find_local",
            CommandSpec::literal(json!({"find": "startup_log"})),
        )
        .case(TestCase::on("local").allow(
            ["readLocal", "readWriteLocal"]
                .into_iter()
                .chain(READ_ANY_ROLES.iter().copied()),
        )),
        AuthTest::new(
            "insert",
            CommandSpec::literal(json!({"insert": SEED_COLLECTION, "documents": [{"a": 1}]})),
        )
        .case(TestCase::on(first).allow(WRITE_ROLES.iter().copied()))
        .teardown(drop_database),
        AuthTest::new(
            "drop_missing_collection",
            CommandSpec::literal(json!({"drop": "no_such_collection"})),
        )
        .case(
            TestCase::on(first)
                .allow(DROP_COLLECTION_ROLES.iter().copied())
                .expect_fail(),
        ),
        AuthTest::new("dropDatabase", CommandSpec::literal(json!({"dropDatabase": 1})))
            .case(TestCase::on(first).allow(DROP_DATABASE_ROLES.iter().copied()))
            .setup(seed)
            .teardown(drop_database),
        AuthTest::new("usersInfo", CommandSpec::literal(json!({"usersInfo": 1})))
            .case(TestCase::on(first).allow(USER_ADMIN_ROLES.iter().copied())),
        AuthTest::new("serverStatus", CommandSpec::literal(json!({"serverStatus": 1})))
            .case(TestCase::on(admin).allow(
                ["backup"].into_iter().chain(MONITOR_ROLES.iter().copied()),
            )),
        AuthTest::new("listDatabases", CommandSpec::literal(json!({"listDatabases": 1})))
            .case(TestCase::on(admin).allow(LIST_DATABASES_ROLES.iter().copied())),
        AuthTest::new(
            "listSessions_allUsers",
            CommandSpec::literal(json!({
                "aggregate": 1,
                "pipeline": [{"$listSessions": {"allUsers": true}}],
                "cursor": {},
            })),
        )
        .case(TestCase::on("config").allow(MONITOR_ROLES.iter().copied())),
        AuthTest::new(
            "getParameter",
            CommandSpec::literal(json!({"getParameter": 1, "logLevel": 1})),
        )
        .case(TestCase::on(admin).allow(MONITOR_ROLES.iter().copied())),
        AuthTest::new(
            "setParameter",
            CommandSpec::literal(json!({"setParameter": 1, "logLevel": 0})),
        )
        .case(TestCase::on(admin).allow(HOST_ROLES.iter().copied())),
        // Storage engines without touch reply with an unsupported operation.
        AuthTest::new(
            "touch",
            CommandSpec::literal(json!({"touch": SEED_COLLECTION, "data": true, "index": false})),
        )
        .case(TestCase::on(first).allow(HOST_ROLES.iter().copied())),
        AuthTest::new("listShards", CommandSpec::literal(json!({"listShards": 1})))
            .case(TestCase::on(admin).allow(
                ["clusterManager"].into_iter().chain(MONITOR_ROLES.iter().copied()),
            )),
        AuthTest::new(
            "enableSharding",
            CommandSpec::literal(json!({"enableSharding": first})),
        )
        .case(TestCase::on(first).allow([
            "enableSharding",
            "clusterManager",
            "clusterAdmin",
            "root",
            "__system",
        ])),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::Coverage;
    use crate::memory::InMemoryDeployment;
    use crate::report::compare_reports;
    use crate::roles::RoleCatalog;
    use crate::runner::MatrixRunner;
    use crate::system::Topology;
    use crate::validate::validate;

    #[test]
    fn builtin_catalog_validates() {
        let config = Config::default();
        let catalog = RoleCatalog::builtin(&config.first_db, &config.admin_db);
        let tests = auth_tests(&config);
        let summary = validate(&tests, &catalog, Coverage::FullCatalog).unwrap();
        assert_eq!(summary.tests, tests.len());
        assert_eq!(summary.skipped_cases, 0);
        assert_eq!(summary.planned_trials, summary.declared_cases * catalog.len());
    }

    #[test]
    fn builtin_catalog_is_clean_on_reference_deployments() {
        let config = Config::default();
        let catalog = RoleCatalog::builtin(&config.first_db, &config.admin_db);
        let tests = auth_tests(&config);
        for coverage in [Coverage::Declared, Coverage::FullCatalog] {
            let runner = MatrixRunner::from_config(&catalog, &config).with_coverage(coverage);
            let reports: Vec<_> = [Topology::Standalone, Topology::Sharded { shards: 2 }]
                .into_iter()
                .map(|topology| {
                    let mut system = InMemoryDeployment::new(topology, &config);
                    runner.provisioner().bootstrap_operator(&mut system).unwrap();
                    runner.run(&mut system, &tests).unwrap()
                })
                .collect();
            for report in &reports {
                assert!(
                    report.is_clean(),
                    "{coverage:?} {}: {}",
                    report.topology,
                    report.aggregator().render()
                );
            }
            assert!(compare_reports(&reports[0], &reports[1]).is_consistent());
        }
    }
}
