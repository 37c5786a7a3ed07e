//! The platform inventory: the relational rows an import writes.
//!
//! The importer never talks to a store directly. It opens an [`InventoryTransaction`] through
//! [`Inventory::begin`] and goes through the repository traits, which keeps the coordinator
//! independent of the concrete store. [`memory::MemoryInventory`] is the in-process
//! implementation used by tests and offline runs.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::{
    kind::ResourceKind,
    model::{AttributeName, PortProtocol, ProbeMode, SaveType},
};

pub mod memory;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{table} {key:?} already exists"))]
    AlreadyExists { table: Table, key: String },

    #[snafu(display("the inventory rejected a write to {table}: {message}"))]
    Rejected { table: Table, message: String },

    #[snafu(display("failed to begin inventory transaction: {message}"))]
    Begin { message: String },
}

impl Error {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

/// The tables of the inventory.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum Table {
    Tenant,
    Application,
    Component,
    EnvVar,
    Volume,
    Port,
    AutoscalerRule,
    AutoscalerMetric,
    Probe,
    K8sAttribute,
    K8sResource,
}

/// The ownership boundary of one external entity in one namespace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub tenant_id: String,
    pub entity_id: String,
    pub name: String,
    pub namespace: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub app_id: String,
    pub tenant_id: String,
    pub entity_id: String,
    pub name: String,

    /// The application label the application was imported from.
    pub k8s_app: String,
}

/// The platform representation of one workload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub component_id: String,
    pub tenant_id: String,
    pub app_id: String,

    /// `gr` followed by the last six characters of the id.
    pub alias: String,

    /// The name of the workload in the cluster.
    pub k8s_component_name: String,
    pub namespace: String,
    pub kind: ResourceKind,
    pub extend_method: String,
    pub replicas: i32,

    /// CPU limit in millicores.
    pub container_cpu: i64,

    /// Memory limit in MiB.
    pub container_memory: i64,
    pub image: String,
    pub cmd: String,

    /// Formatted as `%Y%m%d%H%M%S`.
    pub deploy_version: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub tenant_id: String,
    pub component_id: String,
    pub name: String,
    pub value: String,
    pub explain: String,
    pub scope: String,
    pub is_change: bool,
}

/// A config file mounted into a component.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub component_id: String,
    pub volume_name: String,
    pub volume_path: String,
    pub volume_type: String,
    pub file_content: String,
    pub access_mode: String,
    pub share_policy: String,
    pub backup_policy: String,
    pub reclaim_policy: String,
    pub mode: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub tenant_id: String,
    pub component_id: String,
    pub container_port: i32,
    pub mapping_port: i32,
    pub protocol: PortProtocol,
    pub port_alias: String,
    pub k8s_service_name: String,
    pub is_inner_service: bool,
    pub is_outer_service: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoscalerRule {
    pub rule_id: String,
    pub component_id: String,
    pub enabled: bool,
    pub xpa_type: String,
    pub min_replicas: i32,
    pub max_replicas: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoscalerMetric {
    pub rule_id: String,
    pub metrics_type: String,
    pub metrics_name: String,
    pub metric_target_type: String,
    pub metric_target_value: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    pub probe_id: String,
    pub component_id: String,
    pub mode: ProbeMode,
    pub scheme: String,
    pub port: i32,
    pub path: String,
    pub cmd: String,
    pub http_header: String,
    pub initial_delay_second: i32,
    pub period_second: i32,
    pub timeout_second: i32,
    pub failure_threshold: i32,
    pub success_threshold: i32,
    pub is_used: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct K8sAttribute {
    pub tenant_id: String,
    pub component_id: String,
    pub name: AttributeName,
    pub save_type: SaveType,
    pub attribute_value: String,
}

/// A manifest of a non-workload object, stored per application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppK8sResource {
    pub app_id: String,
    pub name: String,
    pub kind: ResourceKind,
    pub content: String,
}

#[async_trait]
pub trait TenantRepository: Send {
    async fn find_tenant(&mut self, entity_id: &str, namespace: &str) -> Result<Option<Tenant>>;

    /// Fails with [`Error::AlreadyExists`] if a tenant of the same entity and namespace exists.
    async fn create_tenant(&mut self, tenant: &Tenant) -> Result<()>;
}

#[async_trait]
pub trait ApplicationRepository: Send {
    async fn find_application(&mut self, tenant_id: &str, name: &str)
    -> Result<Option<Application>>;

    /// Fails with [`Error::AlreadyExists`] if the tenant already has an application of that name.
    async fn create_application(&mut self, application: &Application) -> Result<()>;
}

#[async_trait]
pub trait ComponentRepository: Send {
    async fn find_component(
        &mut self,
        app_id: &str,
        k8s_component_name: &str,
    ) -> Result<Option<Component>>;

    async fn create_component(&mut self, component: &Component) -> Result<()>;
}

/// Rows owned by a component or application.
///
/// Upserts replace rows with the same natural key and insert the rest.
#[async_trait]
pub trait ChildRecordRepository: Send {
    async fn upsert_env_vars(&mut self, env_vars: &[EnvVar]) -> Result<()>;

    async fn upsert_volumes(&mut self, volumes: &[Volume]) -> Result<()>;

    async fn upsert_ports(&mut self, ports: &[Port]) -> Result<()>;

    async fn create_autoscaler_rule(&mut self, rule: &AutoscalerRule) -> Result<()>;

    async fn create_autoscaler_metrics(&mut self, metrics: &[AutoscalerMetric]) -> Result<()>;

    async fn upsert_probe(&mut self, probe: &Probe) -> Result<()>;

    async fn upsert_k8s_attributes(&mut self, attributes: &[K8sAttribute]) -> Result<()>;

    async fn upsert_k8s_resources(&mut self, resources: &[AppK8sResource]) -> Result<()>;
}

/// A unit of work over all repositories.
///
/// Dropping a transaction without committing it rolls it back.
#[async_trait]
pub trait InventoryTransaction:
    TenantRepository + ApplicationRepository + ComponentRepository + ChildRecordRepository + Sized
{
    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

#[async_trait]
pub trait Inventory: Send + Sync {
    type Transaction: InventoryTransaction;

    async fn begin(&self) -> Result<Self::Transaction>;
}
