//! An in-process [`Inventory`].
//!
//! Every transaction works on a private copy of the tables, which replaces the committed tables
//! on commit. Concurrent transactions are not merged, the last commit wins.
use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use serde::Serialize;
use snafu::ensure;

use crate::inventory::{
    AlreadyExistsSnafu, AppK8sResource, Application, ApplicationRepository, AutoscalerMetric,
    AutoscalerRule, BeginSnafu, ChildRecordRepository, Component, ComponentRepository, EnvVar,
    Inventory, InventoryTransaction, K8sAttribute, Port, Probe, RejectedSnafu, Result, Table,
    Tenant, TenantRepository, Volume,
};

/// The content of every table, in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Tables {
    pub tenants: Vec<Tenant>,
    pub applications: Vec<Application>,
    pub components: Vec<Component>,
    pub env_vars: Vec<EnvVar>,
    pub volumes: Vec<Volume>,
    pub ports: Vec<Port>,
    pub autoscaler_rules: Vec<AutoscalerRule>,
    pub autoscaler_metrics: Vec<AutoscalerMetric>,
    pub probes: Vec<Probe>,
    pub k8s_attributes: Vec<K8sAttribute>,
    pub k8s_resources: Vec<AppK8sResource>,
}

#[derive(Debug, Default)]
struct Shared {
    committed: Tables,
    faults: BTreeSet<Table>,
    fail_begin: bool,
}

/// An inventory kept in memory. Clones share the same tables.
#[derive(Clone, Debug, Default)]
pub struct MemoryInventory {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        lock(&self.shared)
    }

    /// Makes every subsequent write to `table` fail.
    pub fn fail_table(&self, table: Table) {
        self.shared().faults.insert(table);
    }

    /// Makes every subsequent [`Inventory::begin`] fail.
    pub fn fail_begin(&self) {
        self.shared().fail_begin = true;
    }

    /// Returns the committed tables.
    pub fn snapshot(&self) -> Tables {
        self.shared().committed.clone()
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Inventory for MemoryInventory {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction> {
        let shared = self.shared();
        ensure!(!shared.fail_begin, BeginSnafu {
            message: "injected failure"
        });

        Ok(MemoryTransaction {
            staged: shared.committed.clone(),
            shared: Arc::clone(&self.shared),
        })
    }
}

/// A transaction of a [`MemoryInventory`].
#[derive(Debug)]
pub struct MemoryTransaction {
    shared: Arc<Mutex<Shared>>,
    staged: Tables,
}

impl MemoryTransaction {
    fn check(&self, table: Table) -> Result<()> {
        let faulted = lock(&self.shared).faults.contains(&table);
        ensure!(!faulted, RejectedSnafu {
            table,
            message: "injected failure"
        });
        Ok(())
    }
}

/// Replaces rows that `same` considers equal and appends the others.
fn upsert<T: Clone>(rows: &mut Vec<T>, new_rows: &[T], same: impl Fn(&T, &T) -> bool) {
    for new_row in new_rows {
        match rows.iter_mut().find(|row| same(row, new_row)) {
            Some(row) => *row = new_row.clone(),
            None => rows.push(new_row.clone()),
        }
    }
}

#[async_trait]
impl TenantRepository for MemoryTransaction {
    async fn find_tenant(&mut self, entity_id: &str, namespace: &str) -> Result<Option<Tenant>> {
        Ok(self
            .staged
            .tenants
            .iter()
            .find(|tenant| tenant.entity_id == entity_id && tenant.namespace == namespace)
            .cloned())
    }

    async fn create_tenant(&mut self, tenant: &Tenant) -> Result<()> {
        self.check(Table::Tenant)?;
        let exists = self.staged.tenants.iter().any(|existing| {
            existing.entity_id == tenant.entity_id && existing.namespace == tenant.namespace
        });
        ensure!(!exists, AlreadyExistsSnafu {
            table: Table::Tenant,
            key: format!("{}/{}", tenant.entity_id, tenant.namespace),
        });

        self.staged.tenants.push(tenant.clone());
        Ok(())
    }
}

#[async_trait]
impl ApplicationRepository for MemoryTransaction {
    async fn find_application(
        &mut self,
        tenant_id: &str,
        name: &str,
    ) -> Result<Option<Application>> {
        Ok(self
            .staged
            .applications
            .iter()
            .find(|application| application.tenant_id == tenant_id && application.name == name)
            .cloned())
    }

    async fn create_application(&mut self, application: &Application) -> Result<()> {
        self.check(Table::Application)?;
        let exists = self.staged.applications.iter().any(|existing| {
            existing.tenant_id == application.tenant_id && existing.name == application.name
        });
        ensure!(!exists, AlreadyExistsSnafu {
            table: Table::Application,
            key: format!("{}/{}", application.tenant_id, application.name),
        });

        self.staged.applications.push(application.clone());
        Ok(())
    }
}

#[async_trait]
impl ComponentRepository for MemoryTransaction {
    async fn find_component(
        &mut self,
        app_id: &str,
        k8s_component_name: &str,
    ) -> Result<Option<Component>> {
        Ok(self
            .staged
            .components
            .iter()
            .find(|component| {
                component.app_id == app_id && component.k8s_component_name == k8s_component_name
            })
            .cloned())
    }

    async fn create_component(&mut self, component: &Component) -> Result<()> {
        self.check(Table::Component)?;
        let exists = self.staged.components.iter().any(|existing| {
            existing.app_id == component.app_id
                && existing.k8s_component_name == component.k8s_component_name
        });
        ensure!(!exists, AlreadyExistsSnafu {
            table: Table::Component,
            key: format!("{}/{}", component.app_id, component.k8s_component_name),
        });

        self.staged.components.push(component.clone());
        Ok(())
    }
}

#[async_trait]
impl ChildRecordRepository for MemoryTransaction {
    async fn upsert_env_vars(&mut self, env_vars: &[EnvVar]) -> Result<()> {
        self.check(Table::EnvVar)?;
        upsert(&mut self.staged.env_vars, env_vars, |a, b| {
            a.component_id == b.component_id && a.name == b.name
        });
        Ok(())
    }

    async fn upsert_volumes(&mut self, volumes: &[Volume]) -> Result<()> {
        self.check(Table::Volume)?;
        upsert(&mut self.staged.volumes, volumes, |a, b| {
            a.component_id == b.component_id && a.volume_path == b.volume_path
        });
        Ok(())
    }

    async fn upsert_ports(&mut self, ports: &[Port]) -> Result<()> {
        self.check(Table::Port)?;
        upsert(&mut self.staged.ports, ports, |a, b| {
            a.component_id == b.component_id && a.container_port == b.container_port
        });
        Ok(())
    }

    async fn create_autoscaler_rule(&mut self, rule: &AutoscalerRule) -> Result<()> {
        self.check(Table::AutoscalerRule)?;
        let exists = self
            .staged
            .autoscaler_rules
            .iter()
            .any(|existing| existing.rule_id == rule.rule_id);
        ensure!(!exists, AlreadyExistsSnafu {
            table: Table::AutoscalerRule,
            key: &rule.rule_id,
        });

        self.staged.autoscaler_rules.push(rule.clone());
        Ok(())
    }

    async fn create_autoscaler_metrics(&mut self, metrics: &[AutoscalerMetric]) -> Result<()> {
        self.check(Table::AutoscalerMetric)?;
        self.staged.autoscaler_metrics.extend_from_slice(metrics);
        Ok(())
    }

    async fn upsert_probe(&mut self, probe: &Probe) -> Result<()> {
        self.check(Table::Probe)?;
        upsert(&mut self.staged.probes, std::slice::from_ref(probe), |a, b| {
            a.component_id == b.component_id && a.mode == b.mode
        });
        Ok(())
    }

    async fn upsert_k8s_attributes(&mut self, attributes: &[K8sAttribute]) -> Result<()> {
        self.check(Table::K8sAttribute)?;
        upsert(&mut self.staged.k8s_attributes, attributes, |a, b| {
            a.component_id == b.component_id && a.name == b.name
        });
        Ok(())
    }

    async fn upsert_k8s_resources(&mut self, resources: &[AppK8sResource]) -> Result<()> {
        self.check(Table::K8sResource)?;
        upsert(&mut self.staged.k8s_resources, resources, |a, b| {
            a.app_id == b.app_id && a.kind == b.kind && a.name == b.name
        });
        Ok(())
    }
}

#[async_trait]
impl InventoryTransaction for MemoryTransaction {
    async fn commit(self) -> Result<()> {
        let Self { shared, staged } = self;
        lock(&shared).committed = staged;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PortProtocol;

    fn tenant() -> Tenant {
        Tenant {
            tenant_id: "t1".to_owned(),
            entity_id: "e1".to_owned(),
            name: "shop".to_owned(),
            namespace: "shop".to_owned(),
        }
    }

    fn port(container_port: i32, protocol: PortProtocol) -> Port {
        Port {
            tenant_id: "t1".to_owned(),
            component_id: "c1".to_owned(),
            container_port,
            mapping_port: container_port,
            protocol,
            port_alias: format!("GRABCDEF{container_port}"),
            k8s_service_name: format!("grabcdef-{container_port}"),
            is_inner_service: false,
            is_outer_service: false,
        }
    }

    #[tokio::test]
    async fn commit_publishes_staged_rows() {
        let inventory = MemoryInventory::new();
        let mut transaction = inventory.begin().await.unwrap();
        transaction.create_tenant(&tenant()).await.unwrap();
        assert!(inventory.snapshot().tenants.is_empty());

        transaction.commit().await.unwrap();

        assert_eq!(inventory.snapshot().tenants, [tenant()]);
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let inventory = MemoryInventory::new();
        {
            let mut transaction = inventory.begin().await.unwrap();
            transaction.create_tenant(&tenant()).await.unwrap();
        }
        let mut transaction = inventory.begin().await.unwrap();
        transaction.create_tenant(&tenant()).await.unwrap();
        transaction.rollback().await.unwrap();

        assert_eq!(inventory.snapshot(), Tables::default());
    }

    #[tokio::test]
    async fn duplicate_tenant_already_exists() {
        let inventory = MemoryInventory::new();
        let mut transaction = inventory.begin().await.unwrap();
        transaction.create_tenant(&tenant()).await.unwrap();

        let error = transaction.create_tenant(&tenant()).await.unwrap_err();

        assert!(error.is_already_exists());
        assert_eq!(
            transaction.find_tenant("e1", "shop").await.unwrap(),
            Some(tenant())
        );
        assert_eq!(transaction.find_tenant("e1", "other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn upsert_replaces_by_natural_key() {
        let inventory = MemoryInventory::new();
        let mut transaction = inventory.begin().await.unwrap();
        transaction
            .upsert_ports(&[port(8080, PortProtocol::Tcp), port(53, PortProtocol::Udp)])
            .await
            .unwrap();
        transaction
            .upsert_ports(&[port(8080, PortProtocol::Udp)])
            .await
            .unwrap();
        transaction.commit().await.unwrap();

        let ports = inventory.snapshot().ports;
        assert_eq!(
            ports
                .iter()
                .map(|port| (port.container_port, port.protocol))
                .collect::<Vec<_>>(),
            [(8080, PortProtocol::Udp), (53, PortProtocol::Udp)]
        );
    }

    #[tokio::test]
    async fn injected_faults() {
        let inventory = MemoryInventory::new();
        inventory.fail_table(Table::Port);
        let mut transaction = inventory.begin().await.unwrap();

        assert!(matches!(
            transaction.upsert_ports(&[port(80, PortProtocol::Tcp)]).await,
            Err(crate::inventory::Error::Rejected {
                table: Table::Port,
                ..
            })
        ));
        assert!(transaction.create_tenant(&tenant()).await.is_ok());

        inventory.fail_begin();
        assert!(inventory.begin().await.is_err());
    }
}
