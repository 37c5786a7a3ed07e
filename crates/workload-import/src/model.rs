//! Request-scoped values passed between the scan, convert and import steps.
//!
//! None of these are persisted on their own. They serialize with snake_case field names so that
//! callers can hand them between the three steps as JSON.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    inventory::{Application, Component, Tenant},
    kind::ResourceKind,
};

/// Which objects a scan reports.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScanFilter {
    /// Skip objects (and namespaces) the platform already owns.
    #[default]
    Unmanaged,

    /// Report everything.
    All,
}

/// Object names of one application, grouped by kind.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelResource {
    pub workloads: WorkloadsResource,
    pub others: OtherResources,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadsResource {
    pub deployments: Vec<String>,
    pub jobs: Vec<String>,
    pub cron_jobs: Vec<String>,
    pub stateful_sets: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtherResources {
    pub services: Vec<String>,
    pub pvc: Vec<String>,
    pub ingresses: Vec<String>,
    pub network_policies: Vec<String>,
    pub config_maps: Vec<String>,
    pub secrets: Vec<String>,
    pub service_accounts: Vec<String>,
    pub role_bindings: Vec<String>,
    pub horizontal_pod_autoscalers: Vec<String>,
    pub roles: Vec<String>,
}

impl LabelResource {
    /// The names recorded for `kind`.
    pub fn names(&self, kind: ResourceKind) -> &[String] {
        let Self { workloads, others } = self;
        match kind {
            ResourceKind::Deployment => &workloads.deployments,
            ResourceKind::StatefulSet => &workloads.stateful_sets,
            ResourceKind::Job => &workloads.jobs,
            ResourceKind::CronJob => &workloads.cron_jobs,
            ResourceKind::Service => &others.services,
            ResourceKind::PersistentVolumeClaim => &others.pvc,
            ResourceKind::Ingress => &others.ingresses,
            ResourceKind::NetworkPolicy => &others.network_policies,
            ResourceKind::ConfigMap => &others.config_maps,
            ResourceKind::Secret => &others.secrets,
            ResourceKind::ServiceAccount => &others.service_accounts,
            ResourceKind::RoleBinding => &others.role_bindings,
            ResourceKind::HorizontalPodAutoscaler => &others.horizontal_pod_autoscalers,
            ResourceKind::Role => &others.roles,
        }
    }

    pub fn names_mut(&mut self, kind: ResourceKind) -> &mut Vec<String> {
        let Self { workloads, others } = self;
        match kind {
            ResourceKind::Deployment => &mut workloads.deployments,
            ResourceKind::StatefulSet => &mut workloads.stateful_sets,
            ResourceKind::Job => &mut workloads.jobs,
            ResourceKind::CronJob => &mut workloads.cron_jobs,
            ResourceKind::Service => &mut others.services,
            ResourceKind::PersistentVolumeClaim => &mut others.pvc,
            ResourceKind::Ingress => &mut others.ingresses,
            ResourceKind::NetworkPolicy => &mut others.network_policies,
            ResourceKind::ConfigMap => &mut others.config_maps,
            ResourceKind::Secret => &mut others.secrets,
            ResourceKind::ServiceAccount => &mut others.service_accounts,
            ResourceKind::RoleBinding => &mut others.role_bindings,
            ResourceKind::HorizontalPodAutoscaler => &mut others.horizontal_pod_autoscalers,
            ResourceKind::Role => &mut others.roles,
        }
    }
}

/// Everything converted for one application.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationResource {
    pub convert_resources: Vec<ConvertResource>,
    pub kubernetes_resources: Vec<K8sResource>,
}

/// A non-workload object captured as a manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct K8sResource {
    pub name: String,
    pub kind: ResourceKind,

    /// The object as YAML, without `status` and `metadata.managedFields`.
    pub content: String,
}

/// A workload, normalized into a component description.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertResource {
    /// The in-cluster name of the workload.
    pub name: String,
    pub basic: BasicManagement,
    pub ports: Vec<PortManagement>,
    pub envs: Vec<EnvManagement>,
    pub configs: Vec<ConfigManagement>,
    pub autoscaling: Autoscaling,
    pub health_probe: Option<HealthProbe>,
    pub attributes: Vec<Attribute>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicManagement {
    pub resource_type: ResourceKind,
    pub replicas: i32,

    /// Memory limit in MiB, 0 if unset.
    pub memory: i64,

    /// CPU limit in millicores, 0 if unset.
    pub cpu: i64,
    pub image: String,

    /// Entrypoint followed by the arguments, joined by spaces.
    pub cmd: String,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum PortProtocol {
    Tcp,
    Udp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortManagement {
    pub port: i32,
    pub protocol: PortProtocol,
    pub inner: bool,
    pub outer: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvManagement {
    pub key: String,
    pub value: String,
    pub explain: String,
}

/// A single file projected from a ConfigMap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigManagement {
    /// The ConfigMap key.
    pub name: String,
    pub path: String,
    pub value: String,
    pub mode: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Autoscaling {
    pub enabled: bool,
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub metrics: Vec<MetricRule>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRule {
    pub metrics_type: String,
    pub metrics_name: String,
    pub metric_target_type: String,
    pub metric_target_value: i64,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProbeMode {
    Liveness,
    Readiness,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthProbe {
    pub mode: ProbeMode,

    /// `http`/`https` for HTTP probes, `tcp` for TCP socket probes and `cmd` for exec probes.
    pub scheme: String,
    pub port: i32,
    pub path: String,
    pub command: String,

    /// `name=value` pairs joined by `,`.
    pub http_header: String,
    pub initial_delay_second: i32,
    pub period_second: i32,
    pub timeout_second: i32,
    pub failure_threshold: i32,
    pub success_threshold: i32,
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum AttributeName {
    Volumes,
    VolumeMounts,
    ServiceAccountName,
    Labels,
    NodeSelector,
    Tolerations,
    Affinity,
    Privileged,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SaveType {
    Yaml,
    Json,
    String,
}

/// A pod template field carried over verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: AttributeName,
    pub save_type: SaveType,
    pub value: String,
}

/// The outcome of an import.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnResourceImport {
    pub tenant: Tenant,
    pub apps: Vec<AppComponent>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppComponent {
    pub app: Application,
    pub components: Vec<ComponentAttributes>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentAttributes {
    pub component: Component,

    /// `false` if an existing component was reused.
    pub created: bool,
    pub resource: ConvertResource,

    /// Set if an autoscaler rule was written.
    pub autoscaler_rule_id: Option<String>,

    /// Set if a probe was written.
    pub probe_id: Option<String>,
}

/// Application buckets of a namespace, keyed by application label.
pub type LabelResources = BTreeMap<String, LabelResource>;

/// Converted applications of a namespace, keyed by application name.
pub type ApplicationResources = BTreeMap<String, ApplicationResource>;
