//! Scan summary for a Cluster
//!
//! Folds the status of every ClusterScan targeting a cluster into a single
//! classification, an issue total and the latest scan identifiers.

use vigil_common::crd::{ClusterScan, Condition, ConditionStatus, CONDITION_SCANNED};

/// Condition reason: no ClusterScan targets the cluster
pub const REASON_NOT_CONFIGURED: &str = "ScanNotConfigured";
/// Condition reason: the last run of at least one scan failed
pub const REASON_FAILED: &str = "ScanFailed";
/// Condition reason: no scan has finished a run yet
pub const REASON_NOT_FINISHED: &str = "ScanNotFinished";
/// Condition reason: scans have finished and none failed
pub const REASON_SCANNED: &str = "ClusterScanned";

/// Classification of the scans targeting a cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanState {
    /// No ClusterScan references the cluster
    NotConfigured,
    /// These scans' last finished run failed
    Failed(Vec<String>),
    /// Every referenced scan has yet to finish a run
    NotFinished,
    /// At least one scan finished and none failed
    Scanned,
}

/// Aggregate over the scans targeting one cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanSummary {
    /// Classification, evaluated in fixed precedence order
    pub state: ScanState,
    /// Sum of reported issue counts; `None` if no scan reported any
    pub total_issues: Option<i64>,
    /// Last scan identifiers of every scan, in input order
    pub last_scans: Vec<String>,
    /// Number of scans considered
    pub scan_count: usize,
}

/// Summarize `scans`.
///
/// Precedence is not-configured, then failed, then not-finished, then
/// scanned: a single failed scan wins over any number of successful ones.
pub fn summarize<'a, I>(scans: I) -> ScanSummary
where
    I: IntoIterator<Item = &'a ClusterScan>,
{
    let scans: Vec<&ClusterScan> = scans.into_iter().collect();
    let statuses = || scans.iter().map(|s| s.status.clone().unwrap_or_default());

    let failed: Vec<String> = scans
        .iter()
        .filter(|s| s.status.as_ref().map(|st| st.last_run_failed()).unwrap_or(false))
        .map(|s| s.metadata.name.clone().unwrap_or_default())
        .collect();

    let state = if scans.is_empty() {
        ScanState::NotConfigured
    } else if !failed.is_empty() {
        ScanState::Failed(failed)
    } else if statuses().all(|s| s.never_finished()) {
        ScanState::NotFinished
    } else {
        ScanState::Scanned
    };

    let total_issues = statuses()
        .filter_map(|s| s.total_issues)
        .fold(None, |acc: Option<i64>, n| Some(acc.unwrap_or(0) + n));

    ScanSummary {
        state,
        total_issues,
        last_scans: statuses().flat_map(|s| s.last_scan_ids).collect(),
        scan_count: scans.len(),
    }
}

impl ScanSummary {
    /// The Scanned condition this summary evaluates to
    pub fn condition(&self) -> Condition {
        let (status, reason, message) = match &self.state {
            ScanState::NotConfigured => (
                ConditionStatus::False,
                REASON_NOT_CONFIGURED,
                "No ClusterScan targets this cluster".to_string(),
            ),
            ScanState::Failed(names) => (
                ConditionStatus::False,
                REASON_FAILED,
                format!("Last run failed for ClusterScan {}", names.join(", ")),
            ),
            ScanState::NotFinished => (
                ConditionStatus::Unknown,
                REASON_NOT_FINISHED,
                format!("Waiting for the first of {} scans to finish", self.scan_count),
            ),
            ScanState::Scanned => (
                ConditionStatus::True,
                REASON_SCANNED,
                format!(
                    "{} scans reported {} issues",
                    self.scan_count,
                    self.total_issues.unwrap_or(0)
                ),
            ),
        };
        Condition::new(CONDITION_SCANNED, status, reason, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_common::crd::{
        ClusterReference, ClusterScanSpec, ClusterScanStatus, RUN_COMPLETE, RUN_FAILED,
    };

    fn scan(name: &str, status: Option<ClusterScanStatus>) -> ClusterScan {
        let mut scan = ClusterScan::new(
            name,
            ClusterScanSpec {
                cluster_ref: ClusterReference {
                    name: "prod".to_string(),
                },
                schedule: "0 * * * *".to_string(),
                suspend: None,
                successful_scans_history_limit: Some(3),
                failed_scans_history_limit: Some(1),
                plugins: None,
            },
        );
        scan.status = status;
        scan
    }

    fn finished(outcome: &str, ids: &[&str], issues: Option<i64>) -> Option<ClusterScanStatus> {
        Some(ClusterScanStatus {
            last_finished_status: Some(outcome.to_string()),
            last_scan_ids: ids.iter().map(|s| s.to_string()).collect(),
            total_issues: issues,
            ..Default::default()
        })
    }

    mod classification {
        use super::*;

        #[test]
        fn empty_set_is_not_configured() {
            let summary = summarize(&[] as &[ClusterScan]);
            assert_eq!(summary.state, ScanState::NotConfigured);
            assert_eq!(summary.condition().status, ConditionStatus::False);
            assert_eq!(summary.condition().reason, REASON_NOT_CONFIGURED);
        }

        #[test]
        fn one_failure_wins_over_successes() {
            let scans = [
                scan("cis", finished(RUN_COMPLETE, &["a"], Some(3))),
                scan("cve", finished(RUN_FAILED, &["b"], None)),
                scan("new", None),
            ];
            let summary = summarize(&scans);
            assert_eq!(summary.state, ScanState::Failed(vec!["cve".to_string()]));
            assert_eq!(summary.condition().reason, REASON_FAILED);
            assert!(summary.condition().message.contains("cve"));
        }

        #[test]
        fn all_unfinished_is_not_finished() {
            let scans = [
                scan("cis", None),
                scan("cve", Some(ClusterScanStatus::default())),
            ];
            let summary = summarize(&scans);
            assert_eq!(summary.state, ScanState::NotFinished);
            assert_eq!(summary.condition().status, ConditionStatus::Unknown);
        }

        #[test]
        fn mixed_finished_and_unfinished_is_scanned() {
            let scans = [
                scan("cis", finished(RUN_COMPLETE, &["a"], Some(2))),
                scan("new", None),
            ];
            let summary = summarize(&scans);
            assert_eq!(summary.state, ScanState::Scanned);
            assert!(summary.condition().is_true());
            assert_eq!(summary.condition().reason, REASON_SCANNED);
        }
    }

    mod totals {
        use super::*;

        #[test]
        fn issues_are_summed_and_ids_concatenated() {
            let scans = [
                scan("cis", finished(RUN_COMPLETE, &["a", "b"], Some(2))),
                scan("cve", finished(RUN_COMPLETE, &["c"], Some(5))),
            ];
            let summary = summarize(&scans);
            assert_eq!(summary.total_issues, Some(7));
            assert_eq!(summary.last_scans, vec!["a", "b", "c"]);
            assert_eq!(summary.scan_count, 2);
        }

        #[test]
        fn no_reported_counts_leave_total_unset() {
            let scans = [scan("cis", finished(RUN_COMPLETE, &["a"], None))];
            assert_eq!(summarize(&scans).total_issues, None);
        }
    }
}
