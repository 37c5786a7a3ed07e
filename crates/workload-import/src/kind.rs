//! The set of Kubernetes kinds the importer understands.
use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    batch::v1::{CronJob, Job},
    core::v1::PodTemplateSpec,
};
use serde::{Deserialize, Serialize};

use crate::cluster::NamespacedObject;

/// Every kind that is scanned in a namespace.
///
/// The declaration order is the scan order: workload kinds come first, because following their
/// volumes may label PersistentVolumeClaims which are scanned afterwards.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
pub enum ResourceKind {
    Deployment,
    StatefulSet,
    Job,
    CronJob,
    Service,
    PersistentVolumeClaim,
    Ingress,
    NetworkPolicy,
    ConfigMap,
    Secret,
    ServiceAccount,
    RoleBinding,
    HorizontalPodAutoscaler,
    Role,
}

impl ResourceKind {
    /// Workload kinds own a pod template and become components.
    pub const fn is_workload(self) -> bool {
        matches!(
            self,
            Self::Deployment | Self::StatefulSet | Self::Job | Self::CronJob
        )
    }

    /// The scaling strategy recorded on components of this kind.
    pub const fn extend_method(self) -> &'static str {
        match self {
            Self::StatefulSet => "state_multiple",
            Self::Job => "job",
            Self::CronJob => "cronjob",
            _ => "stateless_multiple",
        }
    }
}

/// A kind that owns a pod template.
///
/// All four workload kinds are normalized, scanned and labeled through this trait, only the path
/// to the pod template and the replica count differ between them.
pub trait Workload: NamespacedObject {
    const KIND: ResourceKind;

    /// Whether the pod template may be changed after the object was created.
    const POD_TEMPLATE_MUTABLE: bool = true;

    fn pod_template(&self) -> Option<&PodTemplateSpec>;

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec>;

    fn replicas(&self) -> i32;

    /// The pod template, if an update of the live object may change it.
    fn updatable_pod_template(&mut self) -> Option<&mut PodTemplateSpec> {
        if Self::POD_TEMPLATE_MUTABLE {
            self.pod_template_mut()
        } else {
            None
        }
    }
}

impl Workload for Deployment {
    const KIND: ResourceKind = ResourceKind::Deployment;

    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|spec| &spec.template)
    }

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|spec| &mut spec.template)
    }

    fn replicas(&self) -> i32 {
        self.spec
            .as_ref()
            .and_then(|spec| spec.replicas)
            .unwrap_or(1)
    }
}

impl Workload for StatefulSet {
    const KIND: ResourceKind = ResourceKind::StatefulSet;

    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|spec| &spec.template)
    }

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|spec| &mut spec.template)
    }

    fn replicas(&self) -> i32 {
        self.spec
            .as_ref()
            .and_then(|spec| spec.replicas)
            .unwrap_or(1)
    }
}

impl Workload for Job {
    const KIND: ResourceKind = ResourceKind::Job;
    // `spec.template` of a Job is immutable.
    const POD_TEMPLATE_MUTABLE: bool = false;

    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|spec| &spec.template)
    }

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|spec| &mut spec.template)
    }

    fn replicas(&self) -> i32 {
        self.spec
            .as_ref()
            .and_then(|spec| spec.parallelism)
            .unwrap_or(1)
    }
}

impl Workload for CronJob {
    const KIND: ResourceKind = ResourceKind::CronJob;

    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec
            .as_ref()
            .and_then(|spec| spec.job_template.spec.as_ref())
            .map(|job| &job.template)
    }

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec
            .as_mut()
            .and_then(|spec| spec.job_template.spec.as_mut())
            .map(|job| &mut job.template)
    }

    fn replicas(&self) -> i32 {
        self.spec
            .as_ref()
            .and_then(|spec| spec.job_template.spec.as_ref())
            .and_then(|job| job.parallelism)
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use k8s_openapi::api::{
        apps::v1::DeploymentSpec,
        batch::v1::{CronJobSpec, JobSpec, JobTemplateSpec},
    };
    use rstest::rstest;
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn workload_kinds_are_scanned_first() {
        let kinds: Vec<_> = ResourceKind::iter().collect();
        let first_other = kinds
            .iter()
            .position(|kind| !kind.is_workload())
            .expect("there are non-workload kinds");

        assert!(kinds[..first_other].iter().all(|kind| kind.is_workload()));
        assert!(kinds[first_other..].iter().all(|kind| !kind.is_workload()));
        assert_eq!(kinds.len(), 14);
    }

    #[rstest]
    #[case("Deployment", ResourceKind::Deployment)]
    #[case("HorizontalPodAutoscaler", ResourceKind::HorizontalPodAutoscaler)]
    #[case("PersistentVolumeClaim", ResourceKind::PersistentVolumeClaim)]
    fn parse_kind(#[case] input: &str, #[case] expected: ResourceKind) {
        assert_eq!(ResourceKind::from_str(input).unwrap(), expected);
        assert_eq!(expected.to_string(), input);
    }

    #[test]
    fn cron_job_template_is_nested_in_job_template() {
        let cron_job = CronJob {
            spec: Some(CronJobSpec {
                job_template: JobTemplateSpec {
                    spec: Some(JobSpec {
                        parallelism: Some(3),
                        template: PodTemplateSpec::default(),
                        ..JobSpec::default()
                    }),
                    ..JobTemplateSpec::default()
                },
                schedule: "*/5 * * * *".to_owned(),
                ..CronJobSpec::default()
            }),
            ..CronJob::default()
        };

        assert!(cron_job.pod_template().is_some());
        assert_eq!(cron_job.replicas(), 3);
        assert_eq!(Deployment::default().replicas(), 1);
        assert!(Deployment::default().pod_template().is_none());
    }

    #[test]
    fn job_template_is_not_updatable() {
        let mut job = Job {
            spec: Some(JobSpec::default()),
            ..Job::default()
        };
        let mut deployment = Deployment {
            spec: Some(DeploymentSpec::default()),
            ..Deployment::default()
        };

        assert!(job.pod_template_mut().is_some());
        assert!(job.updatable_pod_template().is_none());
        assert!(deployment.updatable_pod_template().is_some());
    }
}
