//! Imports converted applications into the inventory.
//!
//! Tenant, applications and components are written in one inventory transaction. Creating a
//! tenant labels the live namespace and creating a component labels the live workload. These
//! label changes are recorded in a [`CompensationLog`] and reverted if the transaction is not
//! committed.
//!
//! Child rows (env vars, config files, ports, autoscaler, probe, attributes and manifests) are
//! written best-effort: a failure is logged and does not fail the import.
use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    batch::v1::{CronJob, Job},
};
use snafu::{ResultExt, Snafu};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    cluster::{self, Cluster},
    inventory::{
        self, Application, ApplicationRepository, Component, ComponentRepository, Inventory,
        InventoryTransaction, Tenant, TenantRepository,
    },
    kind::{ResourceKind, Workload},
    labels::Platform,
    model::{
        AppComponent, ApplicationResources, ComponentAttributes, ConvertResource,
        ReturnResourceImport,
    },
};

pub mod compensation;
pub mod records;

pub use compensation::{CompensationLog, Mutation};

/// Format of [`Component::deploy_version`].
pub const DEPLOY_VERSION_FORMAT: &str = "%Y%m%d%H%M%S";

const ALIAS_PREFIX: &str = "gr";
const ALIAS_ID_SUFFIX_LEN: usize = 6;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to begin inventory transaction"))]
    Begin { source: inventory::Error },

    #[snafu(display("failed to commit inventory transaction"))]
    Commit { source: inventory::Error },

    #[snafu(display("failed to look up tenant of namespace {namespace:?}"))]
    FindTenant {
        source: inventory::Error,
        namespace: String,
    },

    #[snafu(display("failed to create tenant of namespace {namespace:?}"))]
    CreateTenant {
        source: inventory::Error,
        namespace: String,
    },

    #[snafu(display("failed to label namespace {namespace:?}"))]
    LabelNamespace {
        source: cluster::Error,
        namespace: String,
    },

    #[snafu(display("failed to look up application {name:?}"))]
    FindApplication {
        source: inventory::Error,
        name: String,
    },

    #[snafu(display("failed to create application {name:?}"))]
    CreateApplication {
        source: inventory::Error,
        name: String,
    },

    #[snafu(display("failed to look up component {name:?}"))]
    FindComponent {
        source: inventory::Error,
        name: String,
    },

    #[snafu(display("failed to create component {name:?}"))]
    CreateComponent {
        source: inventory::Error,
        name: String,
    },

    #[snafu(display("failed to label {kind} {name:?}"))]
    LabelWorkload {
        source: cluster::Error,
        kind: ResourceKind,
        name: String,
    },

    #[snafu(display("{kind} {name:?} is not a workload"))]
    UnsupportedKind { kind: ResourceKind, name: String },
}

impl Error {
    /// The status code reported to callers.
    pub fn code(&self) -> u16 {
        match self {
            Self::LabelNamespace { source, .. } | Self::LabelWorkload { source, .. }
                if source.is_not_found() =>
            {
                404
            }
            Self::UnsupportedKind { .. } => 400,
            _ => 500,
        }
    }
}

/// Writes converted applications into the inventory and marks the live objects as managed.
#[derive(Clone, Debug)]
pub struct ImportCoordinator<C, I> {
    cluster: C,
    inventory: I,
    platform: Platform,
}

impl<C: Cluster, I: Inventory> ImportCoordinator<C, I> {
    pub fn new(cluster: C, inventory: I, platform: Platform) -> Self {
        Self {
            cluster,
            inventory,
            platform,
        }
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    pub fn inventory(&self) -> &I {
        &self.inventory
    }

    /// Imports every application of `namespace` for the external entity `entity_id`.
    ///
    /// Either all tenant, application and component rows are committed or none are. On failure
    /// the label changes made so far are reverted. Dropping the returned future rolls back the
    /// transaction but leaves the label changes in place.
    #[instrument(skip(self, applications), fields(applications = applications.len()))]
    pub async fn import_resources(
        &self,
        namespace: &str,
        applications: &ApplicationResources,
        entity_id: &str,
    ) -> Result<ReturnResourceImport> {
        let mut transaction = self.inventory.begin().await.context(BeginSnafu)?;
        let mut compensation = CompensationLog::default();

        let imported = self
            .import_all(
                &mut transaction,
                &mut compensation,
                namespace,
                applications,
                entity_id,
            )
            .await;

        let result = match imported {
            Ok(result) => result,
            Err(error) => {
                warn!(namespace, error = %error, "import failed, rolling back");
                if let Err(rollback_error) = transaction.rollback().await {
                    warn!(namespace, error = %rollback_error, "failed to roll back inventory transaction");
                }
                compensation.revert(&self.cluster).await;
                return Err(error);
            }
        };

        if let Err(source) = transaction.commit().await {
            compensation.revert(&self.cluster).await;
            return Err(Error::Commit { source });
        }

        info!(
            namespace,
            tenant = %result.tenant.tenant_id,
            applications = result.apps.len(),
            "imported resources"
        );
        Ok(result)
    }

    async fn import_all(
        &self,
        transaction: &mut I::Transaction,
        compensation: &mut CompensationLog,
        namespace: &str,
        applications: &ApplicationResources,
        entity_id: &str,
    ) -> Result<ReturnResourceImport> {
        let tenant = self
            .tenant(transaction, compensation, namespace, entity_id)
            .await?;

        let mut apps = Vec::with_capacity(applications.len());
        for (name, resource) in applications {
            let app = Self::application(transaction, &tenant, name).await?;

            let mut components = Vec::with_capacity(resource.convert_resources.len());
            for convert_resource in &resource.convert_resources {
                components.push(
                    self.component(transaction, compensation, &tenant, &app, convert_resource)
                        .await?,
                );
            }

            records::write_manifests(transaction, &app, &resource.kubernetes_resources).await;
            apps.push(AppComponent { app, components });
        }

        Ok(ReturnResourceImport { tenant, apps })
    }

    async fn tenant(
        &self,
        transaction: &mut I::Transaction,
        compensation: &mut CompensationLog,
        namespace: &str,
        entity_id: &str,
    ) -> Result<Tenant> {
        if let Some(tenant) = transaction
            .find_tenant(entity_id, namespace)
            .await
            .context(FindTenantSnafu { namespace })?
        {
            debug!(namespace, tenant = %tenant.tenant_id, "reusing existing tenant");
            return Ok(tenant);
        }

        let tenant = Tenant {
            tenant_id: new_id(),
            entity_id: entity_id.to_owned(),
            name: namespace.to_owned(),
            namespace: namespace.to_owned(),
        };
        match transaction.create_tenant(&tenant).await {
            Ok(()) => {}
            Err(source) if source.is_already_exists() => {
                let existing = transaction
                    .find_tenant(entity_id, namespace)
                    .await
                    .context(FindTenantSnafu { namespace })?;
                return existing.ok_or(source).context(CreateTenantSnafu { namespace });
            }
            Err(source) => return Err(source).context(CreateTenantSnafu { namespace }),
        }

        self.label_namespace(compensation, namespace).await?;
        info!(namespace, tenant = %tenant.tenant_id, "created tenant");
        Ok(tenant)
    }

    async fn label_namespace(
        &self,
        compensation: &mut CompensationLog,
        namespace: &str,
    ) -> Result<()> {
        let mut object = self
            .cluster
            .get_namespace(namespace)
            .await
            .context(LabelNamespaceSnafu { namespace })?;
        let previous = object.metadata.labels.clone();
        object
            .metadata
            .labels
            .get_or_insert_default()
            .extend(self.platform.namespace_labels());

        self.cluster
            .replace_namespace(&object)
            .await
            .context(LabelNamespaceSnafu { namespace })?;
        compensation.record(Mutation::NamespaceLabels {
            namespace: namespace.to_owned(),
            previous,
        });
        Ok(())
    }

    async fn application(
        transaction: &mut I::Transaction,
        tenant: &Tenant,
        name: &str,
    ) -> Result<Application> {
        if let Some(application) = transaction
            .find_application(&tenant.tenant_id, name)
            .await
            .context(FindApplicationSnafu { name })?
        {
            debug!(application = name, "reusing existing application");
            return Ok(application);
        }

        let application = Application {
            app_id: new_id(),
            tenant_id: tenant.tenant_id.clone(),
            entity_id: tenant.entity_id.clone(),
            name: name.to_owned(),
            k8s_app: name.to_owned(),
        };
        match transaction.create_application(&application).await {
            Ok(()) => Ok(application),
            Err(source) if source.is_already_exists() => {
                let existing = transaction
                    .find_application(&tenant.tenant_id, name)
                    .await
                    .context(FindApplicationSnafu { name })?;
                existing.ok_or(source).context(CreateApplicationSnafu { name })
            }
            Err(source) => Err(source).context(CreateApplicationSnafu { name }),
        }
    }

    async fn component(
        &self,
        transaction: &mut I::Transaction,
        compensation: &mut CompensationLog,
        tenant: &Tenant,
        app: &Application,
        resource: &ConvertResource,
    ) -> Result<ComponentAttributes> {
        let name = resource.name.as_str();
        if let Some(component) = transaction
            .find_component(&app.app_id, name)
            .await
            .context(FindComponentSnafu { name })?
        {
            debug!(component = name, "component already imported, skipping");
            return Ok(ComponentAttributes {
                component,
                created: false,
                resource: resource.clone(),
                autoscaler_rule_id: None,
                probe_id: None,
            });
        }

        let component = new_component(tenant, app, resource);
        transaction
            .create_component(&component)
            .await
            .context(CreateComponentSnafu { name })?;

        match resource.basic.resource_type {
            ResourceKind::Deployment => {
                self.label_workload::<Deployment>(compensation, &component)
                    .await
            }
            ResourceKind::StatefulSet => {
                self.label_workload::<StatefulSet>(compensation, &component)
                    .await
            }
            ResourceKind::Job => self.label_workload::<Job>(compensation, &component).await,
            ResourceKind::CronJob => {
                self.label_workload::<CronJob>(compensation, &component)
                    .await
            }
            kind => UnsupportedKindSnafu { kind, name }.fail(),
        }?;

        let ids = records::write_component_children(transaction, &component, resource).await;
        info!(component = name, id = %component.component_id, "created component");

        Ok(ComponentAttributes {
            component,
            created: true,
            resource: resource.clone(),
            autoscaler_rule_id: ids.autoscaler_rule_id,
            probe_id: ids.probe_id,
        })
    }

    /// Marks the workload and, where it may still change, its pod template with the component
    /// identity.
    async fn label_workload<K: Workload>(
        &self,
        compensation: &mut CompensationLog,
        component: &Component,
    ) -> Result<()> {
        let namespace = component.namespace.as_str();
        let name = component.k8s_component_name.as_str();
        let context = || LabelWorkloadSnafu {
            kind: K::KIND,
            name,
        };

        let mut workload = self
            .cluster
            .get::<K>(namespace, name)
            .await
            .with_context(|_| context())?;
        let labels = self
            .platform
            .component_labels(&component.component_id, &component.deploy_version);

        let previous = workload.meta().labels.clone();
        workload
            .meta_mut()
            .labels
            .get_or_insert_default()
            .extend(labels.clone());
        let previous_template = workload.updatable_pod_template().map(|template| {
            let metadata = template.metadata.get_or_insert_default();
            let previous = metadata.labels.clone();
            metadata.labels.get_or_insert_default().extend(labels);
            previous
        });

        self.cluster
            .replace(namespace, &workload)
            .await
            .with_context(|_| context())?;
        compensation.record(Mutation::WorkloadLabels {
            kind: K::KIND,
            namespace: namespace.to_owned(),
            name: name.to_owned(),
            previous,
            previous_template: previous_template.flatten(),
        });
        Ok(())
    }
}

/// A fresh random id without dashes.
pub(crate) fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn new_component(tenant: &Tenant, app: &Application, resource: &ConvertResource) -> Component {
    let component_id = new_id();
    let basic = &resource.basic;

    Component {
        alias: component_alias(&component_id),
        component_id,
        tenant_id: tenant.tenant_id.clone(),
        app_id: app.app_id.clone(),
        k8s_component_name: resource.name.clone(),
        namespace: tenant.namespace.clone(),
        kind: basic.resource_type,
        extend_method: basic.resource_type.extend_method().to_owned(),
        replicas: basic.replicas,
        container_cpu: basic.cpu,
        container_memory: basic.memory,
        image: basic.image.clone(),
        cmd: basic.cmd.clone(),
        deploy_version: jiff::Zoned::now()
            .strftime(DEPLOY_VERSION_FORMAT)
            .to_string(),
    }
}

/// `gr` followed by the last six characters of `component_id`.
fn component_alias(component_id: &str) -> String {
    let suffix_start = component_id
        .char_indices()
        .rev()
        .nth(ALIAS_ID_SUFFIX_LEN - 1)
        .map_or(0, |(index, _)| index);
    format!("{ALIAS_PREFIX}{}", &component_id[suffix_start..])
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("0f3a9c1e4b7d42a8b2c6d9e1f05a7b3c", "gr5a7b3c")]
    #[case("abc", "grabc")]
    fn alias_uses_id_suffix(#[case] id: &str, #[case] expected: &str) {
        assert_eq!(component_alias(id), expected);
    }

    #[test]
    fn ids_are_dashless() {
        let id = new_id();
        assert_eq!(id.len(), 32);
        assert!(!id.contains('-'));
    }
}
