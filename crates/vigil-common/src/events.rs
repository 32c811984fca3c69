//! Kubernetes Event recording for vigil controllers.
//!
//! Controllers emit Events only when a condition actually transitions or an
//! apply actually changed something, so a timer-driven reconcile that finds
//! nothing new stays silent.
//!
//! Events are fire-and-forget: failures are logged as warnings and never
//! propagate errors.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

/// Trait for publishing Kubernetes Events.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event about `resource_ref`.
    ///
    /// `reason` is machine-readable (e.g. "ClusterConnected"), `action`
    /// names what the controller did (e.g. "Reconcile").
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Publisher that drops every event.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event type matching a condition's polarity: Warning for False, Normal otherwise
pub fn event_type_for(status: crate::crd::ConditionStatus) -> EventType {
    match status {
        crate::crd::ConditionStatus::False => EventType::Warning,
        _ => EventType::Normal,
    }
}

/// Event reasons that are not condition reasons
pub mod reasons {
    /// A scan CronJob was created
    pub const CRON_JOB_CREATED: &str = "CronJobCreated";
    /// A scan CronJob was updated in place
    pub const CRON_JOB_UPDATED: &str = "CronJobUpdated";
    /// A scan CronJob was replaced because its container set changed
    pub const CRON_JOB_REPLACED: &str = "CronJobReplaced";
    /// A CronJob for a plugin no longer requested was deleted
    pub const CRON_JOB_DELETED: &str = "CronJobDeleted";
    /// The plugin service account was added to the shared binding
    pub const RBAC_BOUND: &str = "RBACBound";
}

/// Event action strings.
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Scheduling scan CronJobs
    pub const SCHEDULE: &str = "Schedule";
    /// Binding RBAC subjects
    pub const BIND: &str = "Bind";
}
