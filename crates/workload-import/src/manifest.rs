//! Snapshots of non-workload objects, stored alongside the application.
use k8s_openapi::api::{
    autoscaling::v1::HorizontalPodAutoscaler,
    core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service, ServiceAccount},
    networking::v1::{Ingress, NetworkPolicy},
    rbac::v1::{Role, RoleBinding},
};
use serde::Serialize;
use serde_json::Value;
use snafu::{ResultExt, Snafu};
use strum::IntoEnumIterator;
use tracing::warn;

use crate::{
    cluster::Cluster,
    kind::ResourceKind,
    model::{K8sResource, LabelResource},
    yaml,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to convert object to JSON"))]
    ToValue { source: serde_json::Error },

    #[snafu(display("failed to render manifest"))]
    Render { source: yaml::Error },
}

/// Captures every non-workload object of an application as a manifest.
///
/// Objects that cannot be fetched or rendered are logged and left out.
pub async fn capture_manifests<C: Cluster>(
    cluster: &C,
    namespace: &str,
    resource: &LabelResource,
) -> Vec<K8sResource> {
    let mut manifests = Vec::new();
    for kind in ResourceKind::iter().filter(|kind| !kind.is_workload()) {
        let names = resource.names(kind);
        if names.is_empty() {
            continue;
        }

        let captured = match kind {
            ResourceKind::Service => capture::<C, Service>(cluster, namespace, kind, names).await,
            ResourceKind::PersistentVolumeClaim => {
                capture::<C, PersistentVolumeClaim>(cluster, namespace, kind, names).await
            }
            ResourceKind::Ingress => capture::<C, Ingress>(cluster, namespace, kind, names).await,
            ResourceKind::NetworkPolicy => {
                capture::<C, NetworkPolicy>(cluster, namespace, kind, names).await
            }
            ResourceKind::ConfigMap => {
                capture::<C, ConfigMap>(cluster, namespace, kind, names).await
            }
            ResourceKind::Secret => capture::<C, Secret>(cluster, namespace, kind, names).await,
            ResourceKind::ServiceAccount => {
                capture::<C, ServiceAccount>(cluster, namespace, kind, names).await
            }
            ResourceKind::RoleBinding => {
                capture::<C, RoleBinding>(cluster, namespace, kind, names).await
            }
            ResourceKind::HorizontalPodAutoscaler => {
                capture::<C, HorizontalPodAutoscaler>(cluster, namespace, kind, names).await
            }
            ResourceKind::Role => capture::<C, Role>(cluster, namespace, kind, names).await,
            ResourceKind::Deployment
            | ResourceKind::StatefulSet
            | ResourceKind::Job
            | ResourceKind::CronJob => continue,
        };
        manifests.extend(captured);
    }
    manifests
}

async fn capture<C, K>(
    cluster: &C,
    namespace: &str,
    kind: ResourceKind,
    names: &[String],
) -> Vec<K8sResource>
where
    C: Cluster,
    K: crate::cluster::NamespacedObject,
{
    let mut captured = Vec::new();
    for name in names {
        let content = match cluster.get::<K>(namespace, name).await {
            Ok(object) => snapshot(&object),
            Err(error) => {
                warn!(namespace, %kind, name = %name, error = %error, "failed to get object, skipping manifest");
                continue;
            }
        };

        match content {
            Ok(content) => captured.push(K8sResource {
                name: name.clone(),
                kind,
                content,
            }),
            Err(error) => {
                warn!(namespace, %kind, name = %name, error = %error, "failed to render manifest, skipping");
            }
        }
    }
    captured
}

/// Renders `object` as YAML without `status` and `metadata.managedFields`.
///
/// The output only depends on the object's content, so unchanged objects render identically.
pub fn snapshot<K: Serialize>(object: &K) -> Result<String, Error> {
    let mut value = serde_json::to_value(object).context(ToValueSnafu)?;
    if let Value::Object(fields) = &mut value {
        fields.remove("status");
        if let Some(Value::Object(metadata)) = fields.get_mut("metadata") {
            metadata.remove("managedFields");
        }
    }
    yaml::to_yaml_string(&value).context(RenderSnafu)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::cluster::{MemoryCluster, Verb};

    const OBJECTS: &str = indoc! {"
        apiVersion: v1
        kind: Service
        metadata:
          name: web
          labels:
            app: web
          managedFields:
            - manager: kubectl
              operation: Apply
        spec:
          ports:
            - port: 80
        status:
          loadBalancer: {}
        ---
        apiVersion: v1
        kind: ConfigMap
        metadata:
          name: settings
        data:
          app.conf: debug=true
    "};

    fn resource() -> LabelResource {
        let mut resource = LabelResource::default();
        resource.others.services.push("web".to_owned());
        resource.others.config_maps.push("settings".to_owned());
        resource.others.config_maps.push("gone".to_owned());
        resource
    }

    #[tokio::test]
    async fn strips_status_and_managed_fields() {
        let cluster = MemoryCluster::new();
        cluster.load_manifests(OBJECTS, "shop").unwrap();

        let manifests = capture_manifests(&cluster, "shop", &resource()).await;

        assert_eq!(
            manifests
                .iter()
                .map(|manifest| (manifest.kind, manifest.name.as_str()))
                .collect::<Vec<_>>(),
            [
                (ResourceKind::Service, "web"),
                (ResourceKind::ConfigMap, "settings")
            ]
        );
        assert_eq!(
            manifests[0].content,
            indoc! {"
                apiVersion: v1
                kind: Service
                metadata:
                  labels:
                    app: web
                  name: web
                  namespace: shop
                spec:
                  ports:
                  - port: 80
            "}
        );

        let recaptured = capture_manifests(&cluster, "shop", &resource()).await;
        assert_eq!(manifests, recaptured);
    }

    #[tokio::test]
    async fn failing_kind_keeps_the_others() {
        let cluster = MemoryCluster::new();
        cluster.load_manifests(OBJECTS, "shop").unwrap();
        cluster.fail(Verb::Get, "Service");

        let manifests = capture_manifests(&cluster, "shop", &resource()).await;

        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].name, "settings");
    }
}
