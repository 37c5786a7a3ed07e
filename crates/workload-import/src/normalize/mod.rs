//! Conversion of workloads into component descriptions.
//!
//! Every workload kind goes through [`normalize_workload`], which only looks at the pod template
//! and the first container. Cluster state needed across workloads (ConfigMaps and
//! HorizontalPodAutoscalers) is fetched once per call into a [`ConversionContext`].
use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::{Deployment, StatefulSet},
        autoscaling::v1::HorizontalPodAutoscaler,
        batch::v1::{CronJob, Job},
        core::v1::{ConfigMap, Container},
    },
    apimachinery::pkg::api::resource::Quantity,
};
use kube::ResourceExt;
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::{info, instrument, warn};

use crate::{
    cluster::{self, Cluster},
    kind::{ResourceKind, Workload},
    manifest::capture_manifests,
    model::{
        ApplicationResource, ApplicationResources, AttributeName, BasicManagement, ConvertResource,
        EnvManagement, LabelResource, LabelResources, PortManagement, PortProtocol,
    },
    quantity, yaml,
};

mod attributes;
mod autoscaling;
mod config;
mod probe;

pub use attributes::attributes;
pub use autoscaling::{autoscaling_for, parse_average_value};
pub use config::config_mounts;
pub use probe::health_probe;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to get namespace {namespace:?}"))]
    GetNamespace {
        source: cluster::Error,
        namespace: String,
    },

    #[snafu(display("{kind} {name:?} has no pod template"))]
    MissingPodTemplate { kind: ResourceKind, name: String },

    #[snafu(display("{kind} {name:?} has no container"))]
    MissingContainer { kind: ResourceKind, name: String },

    #[snafu(display("failed to serialize attribute {attribute}"))]
    SerializeAttribute {
        source: yaml::Error,
        attribute: AttributeName,
    },
}

impl Error {
    /// The status code reported to callers.
    pub fn code(&self) -> u16 {
        match self {
            Self::GetNamespace { source, .. } if source.is_not_found() => 404,
            _ => 500,
        }
    }
}

/// Cluster state shared by all workloads of one conversion.
#[derive(Clone, Debug, Default)]
pub struct ConversionContext {
    pub config_maps: BTreeMap<String, ConfigMap>,
    pub autoscalers: Vec<HorizontalPodAutoscaler>,
}

impl ConversionContext {
    /// Fetches ConfigMaps and HorizontalPodAutoscalers of `namespace`.
    ///
    /// A failing listing is logged and treated as empty, which disables config mounts or
    /// autoscaling for this conversion.
    pub async fn load<C: Cluster>(cluster: &C, namespace: &str) -> Self {
        let config_maps = cluster
            .list::<ConfigMap>(namespace)
            .await
            .unwrap_or_else(|error| {
                warn!(
                    namespace,
                    error = %error,
                    "failed to list ConfigMaps, skipping config mounts"
                );
                Vec::new()
            });
        let autoscalers = cluster
            .list::<HorizontalPodAutoscaler>(namespace)
            .await
            .unwrap_or_else(|error| {
                warn!(
                    namespace,
                    error = %error,
                    "failed to list HorizontalPodAutoscalers, skipping autoscaling"
                );
                Vec::new()
            });

        Self {
            config_maps: config_maps
                .into_iter()
                .map(|config_map| (config_map.name_any(), config_map))
                .collect(),
            autoscalers,
        }
    }
}

/// Converts every workload named in `labels`.
///
/// Workloads that cannot be fetched or converted are logged and left out. Each application also
/// gets manifests of its non-workload objects.
#[instrument(skip(cluster, labels), fields(applications = labels.len()))]
pub async fn convert_resources<C: Cluster>(
    cluster: &C,
    namespace: &str,
    labels: &LabelResources,
) -> Result<ApplicationResources> {
    match cluster.get_namespace(namespace).await {
        Ok(_) => {}
        Err(source) if source.is_not_found() => {
            return Err(source).context(GetNamespaceSnafu { namespace });
        }
        Err(error) => {
            warn!(namespace, error = %error, "failed to look up namespace, converting anyway");
        }
    }

    let context = ConversionContext::load(cluster, namespace).await;
    let mut applications = ApplicationResources::new();

    for (label, resource) in labels {
        let mut convert_resources = Vec::new();
        convert_resources
            .extend(convert_named::<C, Deployment>(cluster, namespace, resource, &context).await);
        convert_resources
            .extend(convert_named::<C, StatefulSet>(cluster, namespace, resource, &context).await);
        convert_resources
            .extend(convert_named::<C, Job>(cluster, namespace, resource, &context).await);
        convert_resources
            .extend(convert_named::<C, CronJob>(cluster, namespace, resource, &context).await);

        let kubernetes_resources = capture_manifests(cluster, namespace, resource).await;
        applications.insert(
            label.clone(),
            ApplicationResource {
                convert_resources,
                kubernetes_resources,
            },
        );
    }

    info!(namespace, applications = applications.len(), "converted resources");
    Ok(applications)
}

async fn convert_named<C: Cluster, K: Workload>(
    cluster: &C,
    namespace: &str,
    resource: &LabelResource,
    context: &ConversionContext,
) -> Vec<ConvertResource> {
    let mut converted = Vec::new();
    for name in resource.names(K::KIND) {
        let workload = match cluster.get::<K>(namespace, name).await {
            Ok(workload) => workload,
            Err(error) => {
                warn!(
                    namespace,
                    kind = %K::KIND,
                    name = %name,
                    error = %error,
                    "failed to get workload, skipping"
                );
                continue;
            }
        };

        match normalize_workload(&workload, context) {
            Ok(resource) => converted.push(resource),
            Err(error) => {
                warn!(
                    namespace,
                    kind = %K::KIND,
                    name = %name,
                    error = %error,
                    "failed to convert workload, skipping"
                );
            }
        }
    }
    converted
}

/// Converts a single workload. Only the first container is inspected.
pub fn normalize_workload<K: Workload>(
    workload: &K,
    context: &ConversionContext,
) -> Result<ConvertResource> {
    let name = workload.name_any();
    let pod_spec = workload
        .pod_template()
        .and_then(|template| template.spec.as_ref())
        .context(MissingPodTemplateSnafu {
            kind: K::KIND,
            name: &name,
        })?;
    let container = pod_spec.containers.first().context(MissingContainerSnafu {
        kind: K::KIND,
        name: &name,
    })?;

    Ok(ConvertResource {
        basic: basic(K::KIND, &name, workload.replicas(), container),
        ports: ports(&name, container),
        envs: envs(container),
        configs: config_mounts(
            &name,
            pod_spec.volumes.as_deref().unwrap_or_default(),
            container.volume_mounts.as_deref().unwrap_or_default(),
            &context.config_maps,
        ),
        autoscaling: autoscaling_for(K::KIND, &name, &context.autoscalers),
        health_probe: health_probe(container),
        attributes: attributes(workload.meta().labels.as_ref(), pod_spec, container)?,
        name,
    })
}

fn basic(kind: ResourceKind, name: &str, replicas: i32, container: &Container) -> BasicManagement {
    let limits = container
        .resources
        .as_ref()
        .and_then(|resources| resources.limits.as_ref());
    let cmd = container
        .command
        .iter()
        .chain(&container.args)
        .flatten()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ");

    BasicManagement {
        resource_type: kind,
        replicas,
        memory: limit(name, limits, "memory", quantity::memory_mebibytes),
        cpu: limit(name, limits, "cpu", quantity::cpu_millis),
        image: container.image.clone().unwrap_or_default(),
        cmd,
    }
}

/// Missing or unparsable limits count as 0.
fn limit(
    name: &str,
    limits: Option<&BTreeMap<String, Quantity>>,
    resource: &str,
    convert: fn(&Quantity) -> Result<i64, quantity::ParseQuantityError>,
) -> i64 {
    let Some(limit) = limits.and_then(|limits| limits.get(resource)) else {
        return 0;
    };

    convert(limit).unwrap_or_else(|error| {
        warn!(
            name,
            resource,
            limit = %limit.0,
            error = %error,
            "ignoring unparsable limit"
        );
        0
    })
}

/// Omitted protocols default to TCP, like the API server does.
fn ports(name: &str, container: &Container) -> Vec<PortManagement> {
    container
        .ports
        .iter()
        .flatten()
        .filter_map(|port| {
            let protocol = match port.protocol.as_deref() {
                None | Some("TCP") => PortProtocol::Tcp,
                Some("UDP") => PortProtocol::Udp,
                Some(protocol) => {
                    warn!(
                        name,
                        port = port.container_port,
                        protocol,
                        "skipping port with unsupported protocol"
                    );
                    return None;
                }
            };
            Some(PortManagement {
                port: port.container_port,
                protocol,
                inner: false,
                outer: false,
            })
        })
        .collect()
}

/// Only literal values are kept, references to ConfigMaps, Secrets or fields are dropped.
fn envs(container: &Container) -> Vec<EnvManagement> {
    container
        .env
        .iter()
        .flatten()
        .filter(|env| env.value_from.is_none())
        .map(|env| EnvManagement {
            key: env.name.clone(),
            value: env.value.clone().unwrap_or_default(),
            explain: String::new(),
        })
        .collect()
}
