//! Run-status tracking
//!
//! Derives per-plugin and scan-level run outcomes from the Jobs the scan's
//! CronJobs spawned. Issue counts are written by the worker and are carried
//! over untouched.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;

use vigil_common::crd::{ClusterScanStatus, PluginScanStatus, RUN_COMPLETE, RUN_FAILED};
use vigil_common::PLUGIN_LABEL;

/// Terminal state of a finished Job
#[derive(Clone, Debug, PartialEq, Eq)]
struct FinishedRun {
    id: String,
    status: &'static str,
    finished_at: DateTime<Utc>,
}

fn condition_time(job: &Job, type_: &str) -> Option<DateTime<Utc>> {
    job.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == type_ && c.status == "True")
        .map(|c| {
            c.last_transition_time
                .as_ref()
                .map(|t| t.0)
                .or_else(|| scheduled_at(job))
                .unwrap_or_default()
        })
}

fn finished(job: &Job) -> Option<FinishedRun> {
    let id = job.metadata.uid.clone().unwrap_or_default();
    if let Some(at) = condition_time(job, RUN_FAILED) {
        return Some(FinishedRun {
            id,
            status: RUN_FAILED,
            finished_at: at,
        });
    }
    let completed = job
        .status
        .as_ref()
        .and_then(|s| s.completion_time.as_ref())
        .map(|t| t.0)
        .or_else(|| condition_time(job, RUN_COMPLETE))?;
    Some(FinishedRun {
        id,
        status: RUN_COMPLETE,
        finished_at: completed,
    })
}

fn scheduled_at(job: &Job) -> Option<DateTime<Utc>> {
    job.status
        .as_ref()
        .and_then(|s| s.start_time.as_ref())
        .or(job.metadata.creation_timestamp.as_ref())
        .map(|t| t.0)
}

fn plugin_of(job: &Job) -> Option<&str> {
    job.metadata
        .labels
        .as_ref()?
        .get(PLUGIN_LABEL)
        .map(String::as_str)
}

/// Outcome of `jobs` belonging to one plugin, keeping `previous.issue_count`
pub fn plugin_status(jobs: &[&Job], previous: Option<&PluginScanStatus>) -> PluginScanStatus {
    let last_schedule_time = jobs.iter().filter_map(|j| scheduled_at(j)).max();

    let runs: Vec<FinishedRun> = jobs.iter().filter_map(|j| finished(j)).collect();
    let last = runs.iter().max_by_key(|r| r.finished_at);
    let last_successful_time = runs
        .iter()
        .filter(|r| r.status == RUN_COMPLETE)
        .map(|r| r.finished_at)
        .max();

    PluginScanStatus {
        last_schedule_time,
        last_scan_id: last.map(|r| r.id.clone()),
        last_finished_status: last.map(|r| r.status.to_string()),
        last_finished_time: last.map(|r| r.finished_at),
        last_successful_time,
        issue_count: previous.and_then(|p| p.issue_count),
    }
}

/// Recompute run tracking on `status` for `plugins` from `jobs`.
///
/// Plugins no longer configured are dropped from the per-plugin map.
pub fn update_run_status(status: &mut ClusterScanStatus, plugins: &[String], jobs: &[Job]) {
    let mut by_plugin: BTreeMap<&str, Vec<&Job>> = BTreeMap::new();
    for job in jobs {
        if let Some(plugin) = plugin_of(job) {
            by_plugin.entry(plugin).or_default().push(job);
        }
    }

    let per_plugin: BTreeMap<String, PluginScanStatus> = plugins
        .iter()
        .map(|name| {
            let jobs = by_plugin.get(name.as_str()).map(Vec::as_slice).unwrap_or_default();
            (name.clone(), plugin_status(jobs, status.plugins.get(name)))
        })
        .collect();

    let values = || per_plugin.values();
    status.last_schedule_time = values().filter_map(|p| p.last_schedule_time).max();
    status.last_finished_time = values().filter_map(|p| p.last_finished_time).max();
    status.last_successful_time = values().filter_map(|p| p.last_successful_time).max();

    let outcomes: Vec<&str> = values()
        .filter_map(|p| p.last_finished_status.as_deref())
        .collect();
    status.last_finished_status = if outcomes.is_empty() {
        None
    } else if outcomes.contains(&RUN_FAILED) {
        Some(RUN_FAILED.to_string())
    } else {
        Some(RUN_COMPLETE.to_string())
    };

    status.last_scan_ids = values().filter_map(|p| p.last_scan_id.clone()).collect();

    let counts: Vec<i64> = values().filter_map(|p| p.issue_count).collect();
    status.total_issues = (!counts.is_empty()).then(|| counts.iter().sum());

    status.plugins = per_plugin;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::api::ObjectMeta;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap()
    }

    fn job(uid: &str, plugin: &str, started: u32, outcome: Option<(&str, u32)>) -> Job {
        let conditions = outcome.map(|(type_, hour)| {
            vec![JobCondition {
                type_: type_.to_string(),
                status: "True".to_string(),
                last_transition_time: Some(Time(at(hour))),
                ..Default::default()
            }]
        });
        let completion_time = outcome
            .filter(|(t, _)| *t == RUN_COMPLETE)
            .map(|(_, hour)| Time(at(hour)));

        Job {
            metadata: ObjectMeta {
                uid: Some(uid.to_string()),
                labels: Some([(PLUGIN_LABEL.to_string(), plugin.to_string())].into()),
                ..Default::default()
            },
            spec: None,
            status: Some(JobStatus {
                start_time: Some(Time(at(started))),
                completion_time,
                conditions,
                ..Default::default()
            }),
        }
    }

    fn plugins(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    mod per_plugin {
        use super::*;

        #[test]
        fn latest_finished_job_wins() {
            let a = job("a", "popeye", 1, Some((RUN_FAILED, 2)));
            let b = job("b", "popeye", 3, Some((RUN_COMPLETE, 4)));
            let running = job("c", "popeye", 5, None);

            let status = plugin_status(&[&a, &b, &running], None);
            assert_eq!(status.last_schedule_time, Some(at(5)));
            assert_eq!(status.last_scan_id.as_deref(), Some("b"));
            assert_eq!(status.last_finished_status.as_deref(), Some(RUN_COMPLETE));
            assert_eq!(status.last_finished_time, Some(at(4)));
            assert_eq!(status.last_successful_time, Some(at(4)));
        }

        #[test]
        fn failure_after_success_keeps_last_successful_time() {
            let ok = job("a", "trivy", 1, Some((RUN_COMPLETE, 2)));
            let failed = job("b", "trivy", 3, Some((RUN_FAILED, 4)));

            let status = plugin_status(&[&ok, &failed], None);
            assert_eq!(status.last_finished_status.as_deref(), Some(RUN_FAILED));
            assert_eq!(status.last_successful_time, Some(at(2)));
        }

        #[test]
        fn issue_count_is_carried_over() {
            let previous = PluginScanStatus {
                issue_count: Some(12),
                ..Default::default()
            };
            let status = plugin_status(&[], Some(&previous));
            assert_eq!(status.issue_count, Some(12));
            assert!(status.last_finished_status.is_none());
        }
    }

    mod scan_level {
        use super::*;

        #[test]
        fn any_failed_plugin_fails_the_scan() {
            let jobs = vec![
                job("p1", "popeye", 1, Some((RUN_COMPLETE, 2))),
                job("t1", "trivy", 1, Some((RUN_FAILED, 3))),
            ];
            let mut status = ClusterScanStatus::default();
            update_run_status(&mut status, &plugins(&["popeye", "trivy"]), &jobs);

            assert_eq!(status.last_finished_status.as_deref(), Some(RUN_FAILED));
            assert_eq!(status.last_finished_time, Some(at(3)));
            assert_eq!(status.last_successful_time, Some(at(2)));
            assert_eq!(status.last_scan_ids, vec!["p1".to_string(), "t1".to_string()]);
        }

        #[test]
        fn nothing_finished_leaves_outcome_unset() {
            let jobs = vec![job("p1", "popeye", 1, None)];
            let mut status = ClusterScanStatus::default();
            update_run_status(&mut status, &plugins(&["popeye"]), &jobs);

            assert!(status.never_finished());
            assert_eq!(status.last_schedule_time, Some(at(1)));
            assert!(status.last_scan_ids.is_empty());
        }

        #[test]
        fn issues_are_summed_and_removed_plugins_dropped() {
            let mut status = ClusterScanStatus::default();
            status.plugins.insert(
                "popeye".to_string(),
                PluginScanStatus {
                    issue_count: Some(3),
                    ..Default::default()
                },
            );
            status.plugins.insert(
                "trivy".to_string(),
                PluginScanStatus {
                    issue_count: Some(4),
                    ..Default::default()
                },
            );
            status.plugins.insert(
                "kube-bench".to_string(),
                PluginScanStatus {
                    issue_count: Some(100),
                    ..Default::default()
                },
            );

            update_run_status(&mut status, &plugins(&["popeye", "trivy"]), &[]);
            assert_eq!(status.total_issues, Some(7));
            assert!(!status.plugins.contains_key("kube-bench"));
        }

        #[test]
        fn no_counts_means_no_total() {
            let mut status = ClusterScanStatus::default();
            update_run_status(&mut status, &plugins(&["popeye"]), &[]);
            assert!(status.total_issues.is_none());
            assert!(status.plugins.contains_key("popeye"));
        }
    }
}
