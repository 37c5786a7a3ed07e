//! Discovery of the objects in a namespace, grouped by application label.
//!
//! Every supported kind is described by a [`KindHandler`]. The scanner walks the handlers in
//! [`ResourceKind`] order and is otherwise unaware of the individual kinds.
use std::{collections::BTreeMap, marker::PhantomData};

use async_trait::async_trait;
use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    autoscaling::v1::{CrossVersionObjectReference, HorizontalPodAutoscaler},
    batch::v1::{CronJob, Job},
    core::v1::{
        ConfigMap, PersistentVolumeClaim, PodTemplateSpec, Secret, Service, ServiceAccount,
    },
    networking::v1::{Ingress, NetworkPolicy},
    rbac::v1::{Role, RoleBinding},
};
use kube::ResourceExt;
use snafu::{ResultExt, Snafu};
use tracing::{debug, info, instrument, warn};

use crate::{
    association::resolve_volumes,
    cluster::{self, Cluster, NamespacedObject},
    kind::{ResourceKind, Workload},
    labels::{Platform, app_label},
    model::{LabelResources, ScanFilter},
};

type Result<T, E = Error> = std::result::Result<T, E>;

/// Names per application label.
pub type NamesByLabel = BTreeMap<String, Vec<String>>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to get namespace {namespace:?}"))]
    GetNamespace {
        source: cluster::Error,
        namespace: String,
    },

    #[snafu(display("failed to list namespaces"))]
    ListNamespaces { source: cluster::Error },
}

impl Error {
    /// The status code reported to callers.
    pub fn code(&self) -> u16 {
        match self {
            Self::GetNamespace { source, .. } if source.is_not_found() => 404,
            Self::GetNamespace { .. } | Self::ListNamespaces { .. } => 500,
        }
    }
}

/// An object as seen by the scanner.
#[derive(Clone, Debug, Default)]
pub struct Listed {
    pub name: String,
    pub labels: Option<BTreeMap<String, String>>,

    /// Set for workload kinds.
    pub template: Option<PodTemplateSpec>,

    /// Set for HorizontalPodAutoscalers.
    pub scale_target: Option<CrossVersionObjectReference>,
}

/// Everything the scanner needs to know about one kind.
#[async_trait]
pub trait KindHandler<C: Cluster>: Send + Sync {
    fn kind(&self) -> ResourceKind;

    async fn list(&self, cluster: &C, namespace: &str) -> cluster::Result<Vec<Listed>>;

    /// The labels that decide the bucket of `object`. Defaults to the object's own labels.
    async fn bucket_labels(
        &self,
        _cluster: &C,
        _namespace: &str,
        object: &Listed,
    ) -> Option<BTreeMap<String, String>> {
        object.labels.clone()
    }
}

/// A handler for kinds that are grouped by their own labels.
pub struct Typed<K> {
    kind: ResourceKind,
    template: fn(&K) -> Option<PodTemplateSpec>,
    _object: PhantomData<fn() -> K>,
}

impl<K: Workload> Typed<K> {
    pub fn workload() -> Self {
        Self {
            kind: K::KIND,
            template: |workload| workload.pod_template().cloned(),
            _object: PhantomData,
        }
    }
}

impl<K: NamespacedObject> Typed<K> {
    pub fn other(kind: ResourceKind) -> Self {
        Self {
            kind,
            template: |_| None,
            _object: PhantomData,
        }
    }
}

#[async_trait]
impl<C: Cluster, K: NamespacedObject> KindHandler<C> for Typed<K> {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    async fn list(&self, cluster: &C, namespace: &str) -> cluster::Result<Vec<Listed>> {
        let objects = cluster.list::<K>(namespace).await?;
        Ok(objects
            .iter()
            .map(|object| Listed {
                name: object.name_any(),
                labels: object.meta().labels.clone(),
                template: (self.template)(object),
                scale_target: None,
            })
            .collect())
    }
}

/// HorizontalPodAutoscalers are grouped by the labels of the workload they scale.
pub struct HorizontalPodAutoscalers;

#[async_trait]
impl<C: Cluster> KindHandler<C> for HorizontalPodAutoscalers {
    fn kind(&self) -> ResourceKind {
        ResourceKind::HorizontalPodAutoscaler
    }

    async fn list(&self, cluster: &C, namespace: &str) -> cluster::Result<Vec<Listed>> {
        let autoscalers = cluster.list::<HorizontalPodAutoscaler>(namespace).await?;
        Ok(autoscalers
            .into_iter()
            .map(|autoscaler| Listed {
                name: autoscaler.name_any(),
                scale_target: autoscaler.spec.map(|spec| spec.scale_target_ref),
                labels: autoscaler.metadata.labels,
                template: None,
            })
            .collect())
    }

    async fn bucket_labels(
        &self,
        cluster: &C,
        namespace: &str,
        object: &Listed,
    ) -> Option<BTreeMap<String, String>> {
        let target = object.scale_target.as_ref()?;
        let labels = match target.kind.as_str() {
            "Deployment" => cluster
                .get::<Deployment>(namespace, &target.name)
                .await
                .map(|deployment| deployment.metadata.labels),
            "StatefulSet" => cluster
                .get::<StatefulSet>(namespace, &target.name)
                .await
                .map(|stateful_set| stateful_set.metadata.labels),
            kind => {
                warn!(
                    namespace,
                    autoscaler = %object.name,
                    target_kind = kind,
                    "unsupported scale target"
                );
                return None;
            }
        };

        labels
            .inspect_err(|error| {
                warn!(
                    namespace,
                    autoscaler = %object.name,
                    target = %target.name,
                    error = %error,
                    "failed to resolve scale target"
                );
            })
            .ok()
            .flatten()
    }
}

/// All handlers, in scan order.
///
/// Workload kinds come first, because resolving their volumes labels PersistentVolumeClaims that
/// are listed afterwards.
pub fn registry<C: Cluster>() -> Vec<Box<dyn KindHandler<C>>> {
    vec![
        Box::new(Typed::<Deployment>::workload()),
        Box::new(Typed::<StatefulSet>::workload()),
        Box::new(Typed::<Job>::workload()),
        Box::new(Typed::<CronJob>::workload()),
        Box::new(Typed::<Service>::other(ResourceKind::Service)),
        Box::new(Typed::<PersistentVolumeClaim>::other(
            ResourceKind::PersistentVolumeClaim,
        )),
        Box::new(Typed::<Ingress>::other(ResourceKind::Ingress)),
        Box::new(Typed::<NetworkPolicy>::other(ResourceKind::NetworkPolicy)),
        Box::new(Typed::<ConfigMap>::other(ResourceKind::ConfigMap)),
        Box::new(Typed::<Secret>::other(ResourceKind::Secret)),
        Box::new(Typed::<ServiceAccount>::other(ResourceKind::ServiceAccount)),
        Box::new(Typed::<RoleBinding>::other(ResourceKind::RoleBinding)),
        Box::new(HorizontalPodAutoscalers),
        Box::new(Typed::<Role>::other(ResourceKind::Role)),
    ]
}

/// Concatenates the names of both maps per label, `base` first.
///
/// Duplicates are kept and labels without any names are left out.
pub fn merge_names(base: &NamesByLabel, accumulator: &NamesByLabel) -> NamesByLabel {
    let mut merged = NamesByLabel::new();
    for (label, names) in base.iter().chain(accumulator) {
        if !names.is_empty() {
            merged
                .entry(label.clone())
                .or_default()
                .extend(names.iter().cloned());
        }
    }
    merged
}

/// Lists every supported object in `namespace` and groups the names by application label.
///
/// Failing to list one kind only drops that kind from the result. Unlabeled ConfigMaps and Secrets
/// mounted by a workload are additionally reported in the workload's bucket.
#[instrument(skip(cluster, platform))]
pub async fn scan_namespace<C: Cluster>(
    cluster: &C,
    platform: &Platform,
    filter: ScanFilter,
    namespace: &str,
) -> Result<LabelResources> {
    match cluster.get_namespace(namespace).await {
        Ok(_) => {}
        Err(source) if source.is_not_found() => {
            return Err(source).context(GetNamespaceSnafu { namespace });
        }
        Err(error) => {
            warn!(namespace, error = %error, "failed to look up namespace, scanning anyway");
        }
    }

    let mut buckets = LabelResources::new();
    let mut mounted_config_maps = NamesByLabel::new();
    let mut mounted_secrets = NamesByLabel::new();

    for handler in registry::<C>() {
        let kind = handler.kind();
        let objects = match handler.list(cluster, namespace).await {
            Ok(objects) => objects,
            Err(error) => {
                warn!(namespace, %kind, error = %error, "failed to list objects, skipping kind");
                continue;
            }
        };

        for object in objects {
            if filter == ScanFilter::Unmanaged && platform.owns(object.labels.as_ref()) {
                debug!(namespace, %kind, name = %object.name, "skipping platform-owned object");
                continue;
            }

            let labels = handler.bucket_labels(cluster, namespace, &object).await;
            let label = app_label(labels.as_ref());

            if kind.is_workload() {
                let associations =
                    resolve_volumes(cluster, namespace, object.template.as_ref(), &label).await;
                mounted_config_maps
                    .entry(label.clone())
                    .or_default()
                    .extend(associations.config_maps);
                mounted_secrets
                    .entry(label.clone())
                    .or_default()
                    .extend(associations.secrets);
            }

            buckets
                .entry(label)
                .or_default()
                .names_mut(kind)
                .push(object.name);
        }
    }

    for (kind, mounted) in [
        (ResourceKind::ConfigMap, mounted_config_maps),
        (ResourceKind::Secret, mounted_secrets),
    ] {
        let listed: NamesByLabel = buckets
            .iter()
            .map(|(label, bucket)| (label.clone(), bucket.names(kind).to_vec()))
            .collect();
        for (label, names) in merge_names(&listed, &mounted) {
            *buckets.entry(label).or_default().names_mut(kind) = names;
        }
    }

    info!(namespace, applications = buckets.len(), "scanned namespace");
    Ok(buckets)
}

/// Lists the namespaces that are candidates for an import.
///
/// `kube-*` namespaces and the platform's own `system_namespaces` are never reported. With
/// [`ScanFilter::Unmanaged`], namespaces already managed by the platform are skipped as well.
#[instrument(skip(cluster, platform))]
pub async fn list_namespaces<C: Cluster>(
    cluster: &C,
    platform: &Platform,
    filter: ScanFilter,
    system_namespaces: &[String],
) -> Result<Vec<String>> {
    let namespaces = cluster
        .list_namespaces()
        .await
        .context(ListNamespacesSnafu)?;

    Ok(namespaces
        .into_iter()
        .filter(|namespace| {
            let name = namespace.name_any();
            !name.starts_with("kube-")
                && !system_namespaces.contains(&name)
                && !(filter == ScanFilter::Unmanaged
                    && platform.manages_namespace(namespace.metadata.labels.as_ref()))
        })
        .map(|namespace| namespace.name_any())
        .collect())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use strum::IntoEnumIterator;

    use super::*;
    use crate::{
        cluster::{MemoryCluster, Verb},
        labels::UNLABELED_BUCKET,
    };

    const NAMESPACE: &str = indoc! {"
        apiVersion: v1
        kind: Namespace
        metadata:
          name: shop
    "};

    const WORKLOADS: &str = indoc! {"
        apiVersion: apps/v1
        kind: Deployment
        metadata:
          name: web
          labels:
            app: web
        spec:
          selector: {}
          template:
            spec:
              containers:
                - name: web
                  image: nginx
              volumes:
                - name: settings
                  configMap:
                    name: settings
                - name: credentials
                  secret:
                    secretName: credentials
                - name: data
                  persistentVolumeClaim:
                    claimName: data
        ---
        apiVersion: apps/v1
        kind: StatefulSet
        metadata:
          name: db
          labels:
            app: web
            app.kubernetes.io/name: database
        spec:
          selector: {}
          serviceName: db
          template:
            spec:
              containers:
                - name: db
                  image: postgres
        ---
        apiVersion: batch/v1
        kind: Job
        metadata:
          name: migrate
        spec:
          template:
            spec:
              containers:
                - name: migrate
                  image: migrate
        ---
        apiVersion: apps/v1
        kind: Deployment
        metadata:
          name: gateway
          labels:
            app: gateway
            creator: Rainbond
        spec:
          selector: {}
          template:
            spec:
              containers:
                - name: gateway
                  image: envoy
        ---
        apiVersion: v1
        kind: ConfigMap
        metadata:
          name: settings
        data:
          app.conf: debug=true
        ---
        apiVersion: v1
        kind: ConfigMap
        metadata:
          name: shared
          labels:
            app: web
        ---
        apiVersion: v1
        kind: Secret
        metadata:
          name: credentials
        ---
        apiVersion: v1
        kind: PersistentVolumeClaim
        metadata:
          name: data
        ---
        apiVersion: autoscaling/v1
        kind: HorizontalPodAutoscaler
        metadata:
          name: db
        spec:
          maxReplicas: 3
          scaleTargetRef:
            apiVersion: apps/v1
            kind: StatefulSet
            name: db
        ---
        apiVersion: autoscaling/v1
        kind: HorizontalPodAutoscaler
        metadata:
          name: orphan
        spec:
          maxReplicas: 3
          scaleTargetRef:
            apiVersion: apps/v1
            kind: Deployment
            name: missing
    "};

    fn cluster() -> MemoryCluster {
        let cluster = MemoryCluster::new();
        cluster.load_manifests(NAMESPACE, "shop").unwrap();
        cluster.load_manifests(WORKLOADS, "shop").unwrap();
        cluster
    }

    #[test]
    fn registry_follows_kind_order() {
        let kinds: Vec<_> = registry::<MemoryCluster>()
            .iter()
            .map(|handler| handler.kind())
            .collect();
        assert_eq!(kinds, ResourceKind::iter().collect::<Vec<_>>());
    }

    #[test]
    fn merge_keeps_base_first() {
        let base = NamesByLabel::from([
            ("web".to_owned(), vec!["shared".to_owned()]),
            ("api".to_owned(), vec![]),
        ]);
        let accumulator = NamesByLabel::from([
            ("web".to_owned(), vec!["settings".to_owned(), "shared".to_owned()]),
            ("db".to_owned(), vec!["tuning".to_owned()]),
            ("empty".to_owned(), vec![]),
        ]);

        let merged = merge_names(&base, &accumulator);

        assert_eq!(merged["web"], ["shared", "settings", "shared"]);
        assert_eq!(merged["db"], ["tuning"]);
        assert!(!merged.contains_key("api"));
        assert!(!merged.contains_key("empty"));
        assert_eq!(base["web"], ["shared"]);
    }

    #[tokio::test]
    async fn groups_objects_by_application() {
        let cluster = cluster();

        let buckets = scan_namespace(&cluster, &Platform::default(), ScanFilter::Unmanaged, "shop")
            .await
            .unwrap();

        let web = &buckets["web"];
        assert_eq!(web.workloads.deployments, ["web"]);
        assert_eq!(web.others.config_maps, ["shared", "settings"]);
        assert_eq!(web.others.secrets, ["credentials"]);
        assert_eq!(web.others.pvc, ["data"]);

        let database = &buckets["database"];
        assert_eq!(database.workloads.stateful_sets, ["db"]);
        assert_eq!(database.others.horizontal_pod_autoscalers, ["db"]);

        let unlabeled = &buckets[UNLABELED_BUCKET];
        assert_eq!(unlabeled.workloads.jobs, ["migrate"]);
        assert_eq!(unlabeled.others.config_maps, ["settings"]);
        assert_eq!(unlabeled.others.secrets, ["credentials"]);
        assert_eq!(unlabeled.others.horizontal_pod_autoscalers, ["orphan"]);

        assert!(!buckets.contains_key("gateway"));
    }

    #[tokio::test]
    async fn all_filter_includes_owned_objects() {
        let buckets = scan_namespace(&cluster(), &Platform::default(), ScanFilter::All, "shop")
            .await
            .unwrap();

        assert_eq!(buckets["gateway"].workloads.deployments, ["gateway"]);
    }

    #[tokio::test]
    async fn failing_kind_is_skipped() {
        let cluster = cluster();
        cluster.fail(Verb::List, "StatefulSet");

        let buckets = scan_namespace(&cluster, &Platform::default(), ScanFilter::Unmanaged, "shop")
            .await
            .unwrap();

        assert!(buckets["database"].workloads.stateful_sets.is_empty());
        assert_eq!(buckets["web"].workloads.deployments, ["web"]);
    }

    #[tokio::test]
    async fn missing_namespace_is_an_error() {
        let error = scan_namespace(&cluster(), &Platform::default(), ScanFilter::All, "absent")
            .await
            .expect_err("namespace does not exist");

        assert_eq!(error.code(), 404);
    }

    #[tokio::test]
    async fn namespace_lookup_failure_is_not_fatal() {
        let cluster = cluster();
        cluster.fail(Verb::Get, "Namespace");

        let buckets = scan_namespace(&cluster, &Platform::default(), ScanFilter::Unmanaged, "shop")
            .await
            .unwrap();

        assert_eq!(buckets["web"].workloads.deployments, ["web"]);
    }

    #[tokio::test]
    async fn candidate_namespaces() {
        let cluster = MemoryCluster::new();
        cluster
            .load_manifests(
                indoc! {"
                    apiVersion: v1
                    kind: Namespace
                    metadata:
                      name: shop
                    ---
                    apiVersion: v1
                    kind: Namespace
                    metadata:
                      name: kube-system
                    ---
                    apiVersion: v1
                    kind: Namespace
                    metadata:
                      name: rbd-system
                    ---
                    apiVersion: v1
                    kind: Namespace
                    metadata:
                      name: imported
                      labels:
                        app.kubernetes.io/managed-by: rainbond
                "},
                "default",
            )
            .unwrap();
        let system_namespaces = ["rbd-system".to_owned()];
        let platform = Platform::default();

        let unmanaged =
            list_namespaces(&cluster, &platform, ScanFilter::Unmanaged, &system_namespaces)
                .await
                .unwrap();
        let all = list_namespaces(&cluster, &platform, ScanFilter::All, &system_namespaces)
            .await
            .unwrap();

        assert_eq!(unmanaged, ["shop"]);
        assert_eq!(all, ["imported", "shop"]);
    }
}
