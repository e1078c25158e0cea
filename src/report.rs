//! Failure aggregation and run reports.

use crate::cases::{AuthTest, CommandSpec};
use crate::classify::MismatchKind;
use crate::error::{Error, Result};
use crate::roles::RoleCatalog;
use crate::system::Topology;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;

pub const REPORT_SCHEMA_VERSION: &str = "authz.matrix.report.v1";

/// One trial that disagreed with its declared expectation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FailureRecord {
    pub test_name: String,
    pub role_key: String,
    pub run_on_db: String,
    pub kind: MismatchKind,
    pub message: String,
}

impl FailureRecord {
    /// `"<test>: <message>"`, the line format of the aggregated report.
    pub fn line(&self) -> String {
        format!("{}: {}", self.test_name, self.message)
    }
}

/// Append-only collection of failure records for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureAggregator {
    records: Vec<FailureRecord>,
}

impl FailureAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect(&mut self, record: FailureRecord) {
        self.records.push(record);
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = FailureRecord>) {
        self.records.extend(records);
    }

    pub fn records(&self) -> &[FailureRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every record, one line each, in emission order.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for record in &self.records {
            let _ = writeln!(out, "{}", record.line());
        }
        out
    }

    /// `Ok` when nothing was collected, otherwise an error listing all records.
    pub fn into_result(self) -> Result<()> {
        if self.records.is_empty() {
            return Ok(());
        }
        Err(Error::Mismatches {
            count: self.records.len(),
            report: self.render(),
        })
    }

    pub fn into_records(self) -> Vec<FailureRecord> {
        self.records
    }
}

/// Per-outcome trial counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialCounts {
    pub trials: usize,
    pub authorized: usize,
    pub denied: usize,
    pub tolerated: usize,
    pub mismatches: usize,
}

/// Result of one full matrix run against one deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixReport {
    pub schema: String,
    pub run_id: String,
    pub topology: Topology,
    pub started_at: String,
    pub finished_at: String,
    /// sha256 over the role keys and test declarations, see [`catalog_digest`].
    pub catalog_digest: String,
    pub counts: TrialCounts,
    pub failures: Vec<FailureRecord>,
}

impl MatrixReport {
    pub fn new(
        topology: Topology,
        catalog_digest: String,
        started_at: DateTime<Utc>,
        counts: TrialCounts,
        failures: FailureAggregator,
    ) -> Self {
        Self {
            schema: REPORT_SCHEMA_VERSION.to_string(),
            run_id: uuid::Uuid::new_v4().to_string(),
            topology,
            started_at: started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            finished_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            catalog_digest,
            counts,
            failures: failures.into_records(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Rebuild the aggregator, e.g. to turn the report into a pass/fail result.
    pub fn aggregator(&self) -> FailureAggregator {
        let mut aggregator = FailureAggregator::new();
        aggregator.extend(self.failures.iter().cloned());
        aggregator
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }

    /// Append one JSON line per failure record.
    pub fn append_jsonl(&self, path: &Path) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        for record in &self.failures {
            let mut line = serde_json::to_value(record)?;
            if let Some(obj) = line.as_object_mut() {
                obj.insert("run_id".to_string(), self.run_id.clone().into());
                obj.insert("topology".to_string(), self.topology.label().into());
            }
            writeln!(file, "{line}")?;
        }
        Ok(())
    }
}

/// Length-prefixed so adjacent fields never run together.
fn hash_field(hasher: &mut Sha256, tag: &[u8], value: &[u8]) {
    hasher.update(tag);
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value);
}

/// Fingerprint of the catalogs a run used: role keys, then every test's
/// command, cases, and expectations.
pub fn catalog_digest(catalog: &RoleCatalog, tests: &[AuthTest]) -> String {
    let mut hasher = Sha256::new();
    for key in catalog.keys() {
        hash_field(&mut hasher, b"role", key.as_bytes());
    }
    for test in tests {
        hash_field(&mut hasher, b"test", test.name.as_bytes());
        match &test.command {
            CommandSpec::Literal(document) => {
                hash_field(&mut hasher, b"command", document.to_string().as_bytes());
            }
            // The generated document depends on setup state; only its kind is stable.
            CommandSpec::Generator(_) => hash_field(&mut hasher, b"generator", b""),
        }
        for case in &test.cases {
            hash_field(&mut hasher, b"db", case.run_on_db.as_bytes());
            hash_field(&mut hasher, b"expect_fail", &[u8::from(case.expect_fail)]);
            if let Some(roles) = &case.roles {
                for (key, allowed) in roles {
                    hash_field(&mut hasher, b"key", key.as_bytes());
                    hash_field(&mut hasher, b"allowed", &[u8::from(*allowed)]);
                }
            }
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Identity of a failure for cross-topology comparison; messages embed raw
/// replies, which may legitimately differ between deployments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct FailureKey {
    pub test_name: String,
    pub role_key: String,
    pub run_on_db: String,
    pub kind: MismatchKind,
}

impl From<&FailureRecord> for FailureKey {
    fn from(record: &FailureRecord) -> Self {
        Self {
            test_name: record.test_name.clone(),
            role_key: record.role_key.clone(),
            run_on_db: record.run_on_db.clone(),
            kind: record.kind,
        }
    }
}

impl std::fmt::Display for FailureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} role {} on {} ({})",
            self.test_name, self.role_key, self.run_on_db, self.kind
        )
    }
}

/// Outcome of comparing two runs of the same catalogs.
///
/// `only_left` and `only_right` hold the surplus occurrences of each key, so
/// a record emitted twice on one side and once on the other shows up once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParityCheck {
    pub left: Topology,
    pub right: Topology,
    pub same_catalog: bool,
    pub only_left: Vec<FailureKey>,
    pub only_right: Vec<FailureKey>,
    /// Both runs emitted their failure keys in the same order.
    pub same_order: bool,
}

impl ParityCheck {
    pub fn is_consistent(&self) -> bool {
        self.same_catalog
            && self.only_left.is_empty()
            && self.only_right.is_empty()
            && self.same_order
    }

    /// Number of distinct problems, for exit status accounting.
    pub fn problem_count(&self) -> usize {
        let surplus = self.only_left.len() + self.only_right.len();
        let reordered = !self.same_order && surplus == 0;
        surplus + usize::from(!self.same_catalog) + usize::from(reordered)
    }
}

fn key_counts(keys: &[FailureKey]) -> BTreeMap<&FailureKey, usize> {
    let mut counts = BTreeMap::new();
    for key in keys {
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
}

fn surplus(
    from: &BTreeMap<&FailureKey, usize>,
    other: &BTreeMap<&FailureKey, usize>,
) -> Vec<FailureKey> {
    let mut out = Vec::new();
    for (key, count) in from {
        let extra = count.saturating_sub(other.get(key).copied().unwrap_or(0));
        out.extend(std::iter::repeat_n((*key).clone(), extra));
    }
    out
}

/// Compare the failure sequences of two runs: same keys, same multiplicity,
/// same emission order.
pub fn compare_reports(left: &MatrixReport, right: &MatrixReport) -> ParityCheck {
    let left_keys: Vec<FailureKey> = left.failures.iter().map(FailureKey::from).collect();
    let right_keys: Vec<FailureKey> = right.failures.iter().map(FailureKey::from).collect();
    let left_counts = key_counts(&left_keys);
    let right_counts = key_counts(&right_keys);
    ParityCheck {
        left: left.topology,
        right: right.topology,
        same_catalog: left.catalog_digest == right.catalog_digest,
        only_left: surplus(&left_counts, &right_counts),
        only_right: surplus(&right_counts, &left_counts),
        same_order: left_keys == right_keys,
    }
}
