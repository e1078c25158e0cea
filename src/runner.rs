//! Matrix runner: executes every declared (test case × role) trial against a
//! system under test, strictly one after another.
//!
//! Per trial:
//! 1. bind a fresh probe identity to the role,
//! 2. run the setup hook in an operator session,
//! 3. dispatch the resolved command as the probe,
//! 4. classify the reply and record any mismatch,
//! 5. run the teardown hook in an operator session,
//! 6. drop the probe.
//!
//! Steps 5 and 6 run on every exit path. Hook and transport errors abort the
//! remaining run once that trial has been cleaned up; mismatches never do.

use crate::cases::{AuthTest, Coverage, State, TestCase};
use crate::classify::{Outcome, TrialSite, classify, success_hook_failure};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::provision::{ProbeIdentity, UserProvisioner, with_session};
use crate::report::{
    FailureAggregator, FailureRecord, MatrixReport, TrialCounts, catalog_digest,
};
use crate::roles::{Role, RoleCatalog};
use crate::system::{CommandReply, CommandSystem};
use crate::validate::validate;
use chrono::Utc;
use serde_json::Value;

/// Drives one full matrix run.
#[derive(Debug, Clone)]
pub struct MatrixRunner<'a> {
    catalog: &'a RoleCatalog,
    provisioner: UserProvisioner,
    coverage: Coverage,
}

impl<'a> MatrixRunner<'a> {
    pub const fn new(catalog: &'a RoleCatalog, provisioner: UserProvisioner) -> Self {
        Self {
            catalog,
            provisioner,
            coverage: Coverage::Declared,
        }
    }

    pub fn from_config(catalog: &'a RoleCatalog, config: &Config) -> Self {
        Self::new(catalog, config.provisioner()).with_coverage(config.coverage)
    }

    #[must_use]
    pub const fn with_coverage(mut self, coverage: Coverage) -> Self {
        self.coverage = coverage;
        self
    }

    pub const fn provisioner(&self) -> &UserProvisioner {
        &self.provisioner
    }

    /// Validate `tests` and run every trial they declare.
    ///
    /// Returns the report with records in trial order. `Err` means the run
    /// was aborted (unknown role, hook failure, transport failure); nothing
    /// after the failing trial ran.
    pub fn run(&self, system: &mut dyn CommandSystem, tests: &[AuthTest]) -> Result<MatrixReport> {
        let summary = validate(tests, self.catalog, self.coverage)?;
        let topology = system.topology();
        tracing::info!(
            topology = %topology,
            tests = summary.tests,
            cases = summary.declared_cases,
            skipped = summary.skipped_cases,
            planned = summary.planned_trials,
            "starting authorization matrix"
        );

        let started_at = Utc::now();
        let mut failures = FailureAggregator::new();
        let mut counts = TrialCounts::default();

        for test in tests {
            for case in test.cases.iter().filter(|case| case.declares_roles()) {
                for role in self.catalog.all() {
                    let Some(expected) = case.expectation(&role.key, self.coverage) else {
                        continue;
                    };
                    let outcome = self
                        .run_trial(system, test, case, role, expected)
                        .inspect_err(|err| {
                            tracing::error!(
                                test = %test.name,
                                role = %role.key,
                                db = %case.run_on_db,
                                error = %err,
                                "aborting matrix run"
                            );
                        })?;
                    counts.trials += 1;
                    match outcome {
                        Outcome::Authorized => counts.authorized += 1,
                        Outcome::Denied => counts.denied += 1,
                        Outcome::Tolerated { code } => {
                            tracing::debug!(
                                test = %test.name,
                                role = %role.key,
                                ?code,
                                "tolerated failure"
                            );
                            counts.tolerated += 1;
                        }
                        Outcome::Mismatch { kind, message } => {
                            counts.mismatches += 1;
                            tracing::warn!(test = %test.name, role = %role.key, %kind, "{message}");
                            failures.collect(FailureRecord {
                                test_name: test.name.clone(),
                                role_key: role.key.clone(),
                                run_on_db: case.run_on_db.clone(),
                                kind,
                                message,
                            });
                        }
                    }
                }
            }
        }

        tracing::info!(
            topology = %topology,
            trials = counts.trials,
            authorized = counts.authorized,
            denied = counts.denied,
            tolerated = counts.tolerated,
            mismatches = counts.mismatches,
            "authorization matrix finished"
        );

        Ok(MatrixReport::new(
            topology,
            catalog_digest(self.catalog, tests),
            started_at,
            counts,
            failures,
        ))
    }

    fn run_trial(
        &self,
        system: &mut dyn CommandSystem,
        test: &AuthTest,
        case: &TestCase,
        role: &Role,
        expected: bool,
    ) -> Result<Outcome> {
        tracing::debug!(
            test = %test.name,
            role = %role.key,
            db = %case.run_on_db,
            expected,
            "trial"
        );
        self.provisioner.with_probe(system, role, |system, probe| {
            let result = self
                .setup(system, test, case)
                .and_then(|state| self.dispatch(system, test, case, probe, expected, &state));
            let teardown = self.teardown(system, test, case);
            match (result, teardown) {
                (Ok(outcome), Ok(())) => Ok(outcome),
                (Ok(_), Err(err)) => Err(err),
                (Err(err), teardown) => {
                    if let Err(teardown_err) = teardown {
                        tracing::warn!(
                            test = %test.name,
                            error = %teardown_err,
                            "teardown failed after error"
                        );
                    }
                    Err(err)
                }
            }
        })
    }

    fn setup(
        &self,
        system: &mut dyn CommandSystem,
        test: &AuthTest,
        case: &TestCase,
    ) -> Result<State> {
        let Some(setup) = &test.setup else {
            return Ok(Value::Null);
        };
        with_session(
            system,
            self.provisioner.admin_db(),
            self.provisioner.operator(),
            |system| setup(system, &case.run_on_db).map_err(|err| hook_error("setup", test, err)),
        )
    }

    fn teardown(
        &self,
        system: &mut dyn CommandSystem,
        test: &AuthTest,
        case: &TestCase,
    ) -> Result<()> {
        let Some(teardown) = &test.teardown else {
            return Ok(());
        };
        with_session(
            system,
            self.provisioner.admin_db(),
            self.provisioner.operator(),
            |system| {
                teardown(system, &case.run_on_db).map_err(|err| hook_error("teardown", test, err))
            },
        )
    }

    fn dispatch(
        &self,
        system: &mut dyn CommandSystem,
        test: &AuthTest,
        case: &TestCase,
        probe: &ProbeIdentity,
        expected: bool,
        state: &State,
    ) -> Result<Outcome> {
        let command = test.command.resolve(state);
        let raw = with_session(
            system,
            self.provisioner.admin_db(),
            &probe.credentials,
            |system| system.run_command(&case.run_on_db, &command),
        )?;
        let reply = CommandReply::parse(raw)?;

        let site = TrialSite {
            run_on_db: &case.run_on_db,
            role_key: &probe.bound_role,
        };
        let outcome = classify(expected, case.expect_fail, &reply, site);
        if outcome != Outcome::Authorized {
            return Ok(outcome);
        }
        match case.on_success.as_ref().map(|on_success| on_success(&reply)) {
            Some(Err(reason)) => Ok(success_hook_failure(&reason, site)),
            _ => Ok(outcome),
        }
    }
}

fn hook_error(phase: &str, test: &AuthTest, err: Error) -> Error {
    match err {
        Error::Environment { .. } => err,
        other => Error::environment(phase, &test.name, other.to_string()),
    }
}

/// Run `tests` against `system` with the catalog and settings from `config`.
pub fn run_matrix(
    system: &mut dyn CommandSystem,
    tests: &[AuthTest],
    catalog: &RoleCatalog,
    config: &Config,
) -> Result<MatrixReport> {
    MatrixRunner::from_config(catalog, config).run(system, tests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::CommandSpec;
    use crate::classify::MismatchKind;
    use crate::memory::InMemoryDeployment;
    use crate::system::Topology;
    use serde_json::json;

    fn fixture() -> (Config, RoleCatalog, InMemoryDeployment) {
        let config = Config::default();
        let catalog = RoleCatalog::builtin(&config.first_db, &config.admin_db);
        let mut system = InMemoryDeployment::new(Topology::Standalone, &config);
        config.provisioner().bootstrap_operator(&mut system).unwrap();
        (config, catalog, system)
    }

    #[test]
    fn clean_matrix_produces_no_records() {
        let (config, catalog, mut system) = fixture();
        let tests = vec![
            AuthTest::new("find", CommandSpec::literal(json!({"find": "foo"})))
                .case(TestCase::on("roles_commands_1").allow(["read", "dbOwner"]).deny(["backup"])),
        ];
        let report = run_matrix(&mut system, &tests, &catalog, &config).unwrap();
        assert!(report.is_clean(), "{:?}", report.failures);
        assert_eq!(report.counts.trials, 3);
        assert_eq!(report.counts.authorized, 2);
        assert_eq!(report.counts.denied, 1);
    }

    #[test]
    fn trials_run_in_catalog_role_order() {
        let (config, catalog, mut system) = fixture();
        let tests = vec![
            AuthTest::new("drop_as_readers", CommandSpec::literal(json!({"dropDatabase": 1})))
                .case(TestCase::on("roles_commands_1").allow(["root", "read", "readWrite"])),
        ];
        let report = run_matrix(&mut system, &tests, &catalog, &config).unwrap();
        let roles: Vec<&str> = report.failures.iter().map(|r| r.role_key.as_str()).collect();
        assert_eq!(roles, vec!["read", "readWrite"]);
        assert!(report.failures.iter().all(|r| r.kind == MismatchKind::UnexpectedDenial));
    }

    #[test]
    fn success_hook_rejection_becomes_record() {
        let (config, catalog, mut system) = fixture();
        let tests = vec![
            AuthTest::new("find", CommandSpec::literal(json!({"find": "foo"}))).case(
                TestCase::on("roles_commands_1")
                    .allow(["read"])
                    .on_success(|reply| {
                        if reply.raw.get("cursor").is_some() {
                            Err("cursor should be absent".to_string())
                        } else {
                            Ok(())
                        }
                    }),
            ),
        ];
        let report = run_matrix(&mut system, &tests, &catalog, &config).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, MismatchKind::SuccessHookFailed);
        assert!(report.failures[0].message.contains("cursor should be absent"));
    }

    #[test]
    fn setup_failure_aborts_and_still_cleans_up() {
        let (config, catalog, mut system) = fixture();
        let tests = vec![
            AuthTest::new("seeded", CommandSpec::literal(json!({"find": "foo"})))
                .case(TestCase::on("roles_commands_1").allow(["read", "readWrite"]))
                .setup(|_, _| Err(Error::transport("seed insert refused"))),
        ];
        let err = run_matrix(&mut system, &tests, &catalog, &config).unwrap_err();
        match err {
            Error::Environment { phase, test, message } => {
                assert_eq!(phase, "setup");
                assert_eq!(test, "seeded");
                assert!(message.contains("seed insert refused"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(system.user_roles("admin", "monitor"), None);
        assert_eq!(system.commands_dispatched(), 0);
    }
}
