//! Pre-flight consistency check between declared expectations and the role
//! catalog.

use crate::cases::{AuthTest, Coverage};
use crate::error::{Error, Result};
use crate::roles::RoleCatalog;
use serde::Serialize;

/// Shape of a validated matrix, logged before the first trial.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ValidationSummary {
    pub tests: usize,
    /// Cases that declare an expectation map.
    pub declared_cases: usize,
    /// Cases skipped because they declare nothing.
    pub skipped_cases: usize,
    /// Trials the runner will execute under the given coverage.
    pub planned_trials: usize,
}

/// Confirm every role key referenced by every case exists in `catalog`.
///
/// Fails on the first unknown key, naming the test and the role; nothing has
/// been provisioned or dispatched at that point.
pub fn validate(
    tests: &[AuthTest],
    catalog: &RoleCatalog,
    coverage: Coverage,
) -> Result<ValidationSummary> {
    let mut summary = ValidationSummary {
        tests: tests.len(),
        ..ValidationSummary::default()
    };

    for test in tests {
        for case in &test.cases {
            let Some(roles) = &case.roles else {
                summary.skipped_cases += 1;
                continue;
            };
            for key in roles.keys() {
                catalog.lookup(key).map_err(|_| {
                    tracing::error!(test = %test.name, role = %key, "unknown role in expectations");
                    Error::unknown_role(&test.name, key)
                })?;
            }
            summary.declared_cases += 1;
            summary.planned_trials += match coverage {
                Coverage::Declared => roles.len(),
                Coverage::FullCatalog => catalog.len(),
            };
        }
    }

    Ok(summary)
}
