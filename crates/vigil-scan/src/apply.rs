//! Field-by-field CronJob apply
//!
//! The scheduler owns a fixed set of CronJob fields: schedule, concurrency
//! policy, history limits, suspend and the pod template's containers and
//! volumes. [`apply_cron_job`] copies only those from the desired object
//! onto the live one, so annotations, labels and fields set by other
//! writers or filled in by API server defaulting survive.
//!
//! Containers are matched by name. When the live set of container names
//! differs from the desired set the list is replaced wholesale; otherwise
//! each container is updated in place.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{Container, PodSpec, Volume};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;
use vigil_common::quantity::parse_milli;

/// What [`apply_cron_job`] did to the live object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Live object already matched
    Unchanged,
    /// Owned fields were updated in place
    Updated,
    /// The container or volume set changed and was replaced wholesale
    Replaced,
}

impl ApplyOutcome {
    /// Whether the live object needs to be written back
    pub fn is_changed(self) -> bool {
        self != Self::Unchanged
    }

    fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Replaced, _) | (_, Self::Replaced) => Self::Replaced,
            (Self::Updated, _) | (_, Self::Updated) => Self::Updated,
            _ => Self::Unchanged,
        }
    }

    fn from_changed(changed: bool) -> Self {
        if changed {
            Self::Updated
        } else {
            Self::Unchanged
        }
    }
}

/// Set `target` to `desired` if they differ. Returns true if it changed.
fn sync<T: PartialEq + Clone>(target: &mut T, desired: &T) -> bool {
    if target == desired {
        return false;
    }
    *target = desired.clone();
    true
}

/// Like [`sync`], but only when the desired value is set
fn sync_some<T: PartialEq + Clone>(target: &mut Option<T>, desired: &Option<T>) -> bool {
    match desired {
        Some(_) => sync(target, desired),
        None => false,
    }
}

/// Like [`sync`], treating an absent list as empty
fn sync_list<T: PartialEq + Clone>(target: &mut Option<Vec<T>>, desired: &Option<Vec<T>>) -> bool {
    let current = target.as_deref().unwrap_or_default();
    let wanted = desired.as_deref().unwrap_or_default();
    if current == wanted {
        return false;
    }
    *target = desired.clone();
    true
}

fn merge_labels(target: &mut ObjectMeta, desired: &ObjectMeta) -> bool {
    let Some(wanted) = &desired.labels else {
        return false;
    };
    let labels = target.labels.get_or_insert_with(Default::default);
    let mut changed = false;
    for (key, value) in wanted {
        if labels.get(key) != Some(value) {
            labels.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

fn merge_owners(target: &mut ObjectMeta, desired: &ObjectMeta) -> bool {
    let Some(wanted) = &desired.owner_references else {
        return false;
    };
    let owners = target.owner_references.get_or_insert_with(Vec::new);
    let mut changed = false;
    for owner in wanted {
        if !owners.iter().any(|o| o.uid == owner.uid) {
            owners.push(owner.clone());
            changed = true;
        }
    }
    changed
}

fn apply_container(target: &mut Container, desired: &Container) -> bool {
    let mut changed = false;
    changed |= sync(&mut target.image, &desired.image);
    changed |= sync_list(&mut target.command, &desired.command);
    changed |= sync_list(&mut target.args, &desired.args);
    changed |= sync_list(&mut target.env, &desired.env);
    changed |= sync_list(&mut target.volume_mounts, &desired.volume_mounts);
    changed |= sync_some(&mut target.image_pull_policy, &desired.image_pull_policy);
    changed |= sync_some(&mut target.security_context, &desired.security_context);

    let current = target.resources.as_ref();
    let wanted = desired.resources.as_ref();
    let same = same_quantities(
        current.and_then(|r| r.requests.as_ref()),
        wanted.and_then(|r| r.requests.as_ref()),
    ) && same_quantities(
        current.and_then(|r| r.limits.as_ref()),
        wanted.and_then(|r| r.limits.as_ref()),
    );
    if !same {
        target.resources = desired.resources.clone();
        changed = true;
    }
    changed
}

/// The API server stores quantities canonicalized (`0.5` becomes `500m`),
/// so compare the amounts rather than the strings.
fn same_quantity(live: &Quantity, wanted: &Quantity) -> bool {
    match (parse_milli(&live.0), parse_milli(&wanted.0)) {
        (Ok(a), Ok(b)) => a == b,
        _ => live == wanted,
    }
}

fn same_quantities(
    live: Option<&BTreeMap<String, Quantity>>,
    wanted: Option<&BTreeMap<String, Quantity>>,
) -> bool {
    let empty = BTreeMap::new();
    let (live, wanted) = (live.unwrap_or(&empty), wanted.unwrap_or(&empty));
    live.len() == wanted.len()
        && wanted
            .iter()
            .all(|(kind, q)| live.get(kind).is_some_and(|l| same_quantity(l, q)))
}

fn names<'a>(items: impl Iterator<Item = &'a str>) -> BTreeSet<&'a str> {
    items.collect()
}

fn apply_containers(target: &mut Vec<Container>, desired: &[Container]) -> ApplyOutcome {
    if names(target.iter().map(|c| c.name.as_str()))
        != names(desired.iter().map(|c| c.name.as_str()))
    {
        *target = desired.to_vec();
        return ApplyOutcome::Replaced;
    }

    let mut changed = false;
    for wanted in desired {
        if let Some(live) = target.iter_mut().find(|c| c.name == wanted.name) {
            changed |= apply_container(live, wanted);
        }
    }
    ApplyOutcome::from_changed(changed)
}

fn apply_volumes(target: &mut Option<Vec<Volume>>, desired: &Option<Vec<Volume>>) -> ApplyOutcome {
    let wanted = desired.as_deref().unwrap_or_default();
    let live = target.get_or_insert_with(Vec::new);

    if names(live.iter().map(|v| v.name.as_str())) != names(wanted.iter().map(|v| v.name.as_str()))
    {
        *live = wanted.to_vec();
        return ApplyOutcome::Replaced;
    }

    let mut changed = false;
    for volume in wanted {
        if let Some(existing) = live.iter_mut().find(|v| v.name == volume.name) {
            changed |= sync(existing, volume);
        }
    }
    if live.is_empty() && desired.is_none() {
        *target = None;
    }
    ApplyOutcome::from_changed(changed)
}

fn apply_pod(target: &mut PodSpec, desired: &PodSpec) -> ApplyOutcome {
    let mut outcome = ApplyOutcome::from_changed(
        sync(&mut target.restart_policy, &desired.restart_policy)
            | sync(&mut target.service_account_name, &desired.service_account_name),
    );

    outcome = outcome.merge(apply_containers(&mut target.containers, &desired.containers));

    let live_init = target.init_containers.get_or_insert_with(Vec::new);
    let init_outcome = apply_containers(
        live_init,
        desired.init_containers.as_deref().unwrap_or_default(),
    );
    if target.init_containers.as_ref().is_some_and(Vec::is_empty) {
        target.init_containers = None;
    }
    outcome = outcome.merge(init_outcome);

    outcome.merge(apply_volumes(&mut target.volumes, &desired.volumes))
}

/// Copy the scheduler-owned fields of `desired` onto `existing`
pub fn apply_cron_job(existing: &mut CronJob, desired: &CronJob) -> ApplyOutcome {
    let mut outcome = ApplyOutcome::from_changed(
        merge_labels(&mut existing.metadata, &desired.metadata)
            | merge_owners(&mut existing.metadata, &desired.metadata),
    );

    let Some(wanted) = &desired.spec else {
        return outcome;
    };
    let Some(live) = existing.spec.as_mut() else {
        existing.spec = Some(wanted.clone());
        return ApplyOutcome::Replaced;
    };

    let mut changed = false;
    changed |= sync(&mut live.schedule, &wanted.schedule);
    changed |= sync(&mut live.concurrency_policy, &wanted.concurrency_policy);
    changed |= sync(&mut live.suspend, &wanted.suspend);
    changed |= sync(
        &mut live.successful_jobs_history_limit,
        &wanted.successful_jobs_history_limit,
    );
    changed |= sync(
        &mut live.failed_jobs_history_limit,
        &wanted.failed_jobs_history_limit,
    );
    outcome = outcome.merge(ApplyOutcome::from_changed(changed));

    if let Some(wanted_meta) = &wanted.job_template.metadata {
        let live_meta = live.job_template.metadata.get_or_insert_with(Default::default);
        outcome = outcome.merge(ApplyOutcome::from_changed(merge_labels(
            live_meta,
            wanted_meta,
        )));
    }

    let Some(wanted_job) = &wanted.job_template.spec else {
        return outcome;
    };
    let Some(live_job) = live.job_template.spec.as_mut() else {
        live.job_template.spec = Some(wanted_job.clone());
        return ApplyOutcome::Replaced;
    };
    outcome = outcome.merge(ApplyOutcome::from_changed(sync(
        &mut live_job.backoff_limit,
        &wanted_job.backoff_limit,
    )));

    if let Some(wanted_meta) = &wanted_job.template.metadata {
        let live_meta = live_job.template.metadata.get_or_insert_with(Default::default);
        outcome = outcome.merge(ApplyOutcome::from_changed(merge_labels(
            live_meta,
            wanted_meta,
        )));
    }

    let Some(wanted_pod) = &wanted_job.template.spec else {
        return outcome;
    };
    match live_job.template.spec.as_mut() {
        Some(live_pod) => outcome.merge(apply_pod(live_pod, wanted_pod)),
        None => {
            live_job.template.spec = Some(wanted_pod.clone());
            ApplyOutcome::Replaced
        }
    }
}
