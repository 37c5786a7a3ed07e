//! Undo records for label changes made on live objects during an import.
use std::collections::BTreeMap;

use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    batch::v1::{CronJob, Job},
};
use tracing::{debug, warn};

use crate::{
    cluster::{self, Cluster},
    kind::{ResourceKind, Workload},
};

type Labels = Option<BTreeMap<String, String>>;

/// A label change on a live object, with the labels it replaced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation {
    NamespaceLabels {
        namespace: String,
        previous: Labels,
    },
    WorkloadLabels {
        kind: ResourceKind,
        namespace: String,
        name: String,
        previous: Labels,
        previous_template: Labels,
    },
}

/// Cluster mutations of one import, in the order they were made.
#[derive(Clone, Debug, Default)]
pub struct CompensationLog {
    mutations: Vec<Mutation>,
}

impl CompensationLog {
    pub fn record(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    /// Restores the recorded labels, newest first.
    ///
    /// Every mutation is attempted. Failures are logged and do not stop the remaining reversals.
    pub async fn revert<C: Cluster>(self, cluster: &C) {
        for mutation in self.mutations.into_iter().rev() {
            let result = match &mutation {
                Mutation::NamespaceLabels {
                    namespace,
                    previous,
                } => restore_namespace(cluster, namespace, previous.clone()).await,
                Mutation::WorkloadLabels {
                    kind,
                    namespace,
                    name,
                    previous,
                    previous_template,
                } => {
                    let (previous, previous_template) =
                        (previous.clone(), previous_template.clone());
                    match kind {
                        ResourceKind::Deployment => {
                            restore_workload::<C, Deployment>(
                                cluster,
                                namespace,
                                name,
                                previous,
                                previous_template,
                            )
                            .await
                        }
                        ResourceKind::StatefulSet => {
                            restore_workload::<C, StatefulSet>(
                                cluster,
                                namespace,
                                name,
                                previous,
                                previous_template,
                            )
                            .await
                        }
                        ResourceKind::Job => {
                            restore_workload::<C, Job>(
                                cluster,
                                namespace,
                                name,
                                previous,
                                previous_template,
                            )
                            .await
                        }
                        ResourceKind::CronJob => {
                            restore_workload::<C, CronJob>(
                                cluster,
                                namespace,
                                name,
                                previous,
                                previous_template,
                            )
                            .await
                        }
                        _ => Ok(()),
                    }
                }
            };

            match result {
                Ok(()) => debug!(?mutation, "reverted cluster mutation"),
                Err(error) => warn!(?mutation, error = %error, "failed to revert cluster mutation"),
            }
        }
    }
}

async fn restore_namespace<C: Cluster>(
    cluster: &C,
    namespace: &str,
    previous: Labels,
) -> cluster::Result<()> {
    let mut object = cluster.get_namespace(namespace).await?;
    object.metadata.labels = previous;
    cluster.replace_namespace(&object).await?;
    Ok(())
}

async fn restore_workload<C: Cluster, K: Workload>(
    cluster: &C,
    namespace: &str,
    name: &str,
    previous: Labels,
    previous_template: Labels,
) -> cluster::Result<()> {
    let mut workload = cluster.get::<K>(namespace, name).await?;
    workload.meta_mut().labels = previous;
    if let Some(template) = workload.updatable_pod_template() {
        template.metadata.get_or_insert_default().labels = previous_template;
    }
    cluster.replace(namespace, &workload).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::cluster::{MemoryCluster, Verb};

    const OBJECTS: &str = indoc! {"
        apiVersion: v1
        kind: Namespace
        metadata:
          name: shop
        ---
        apiVersion: apps/v1
        kind: Deployment
        metadata:
          name: web
          labels:
            app: web
            service_id: c1
        spec:
          selector: {}
          template:
            metadata:
              labels:
                service_id: c1
            spec:
              containers: []
    "};

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        Some(
            pairs
                .iter()
                .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn restores_previous_labels() {
        let cluster = MemoryCluster::new();
        cluster.load_manifests(OBJECTS, "shop").unwrap();
        let mut log = CompensationLog::default();
        log.record(Mutation::NamespaceLabels {
            namespace: "shop".to_owned(),
            previous: None,
        });
        log.record(Mutation::WorkloadLabels {
            kind: ResourceKind::Deployment,
            namespace: "shop".to_owned(),
            name: "web".to_owned(),
            previous: labels(&[("app", "web")]),
            previous_template: None,
        });

        log.revert(&cluster).await;

        let deployment: Deployment = cluster.object("shop", "web").unwrap();
        assert_eq!(deployment.metadata.labels, labels(&[("app", "web")]));
        assert_eq!(
            deployment.pod_template().unwrap().metadata.as_ref().unwrap().labels,
            None
        );
        assert_eq!(cluster.namespace("shop").unwrap().metadata.labels, None);
    }

    #[tokio::test]
    async fn failed_reversal_does_not_stop_the_others() {
        let cluster = MemoryCluster::new();
        cluster.load_manifests(OBJECTS, "shop").unwrap();
        cluster.fail(Verb::Replace, "Deployment");
        let mut log = CompensationLog::default();
        log.record(Mutation::NamespaceLabels {
            namespace: "shop".to_owned(),
            previous: labels(&[("team", "checkout")]),
        });
        log.record(Mutation::WorkloadLabels {
            kind: ResourceKind::Deployment,
            namespace: "shop".to_owned(),
            name: "web".to_owned(),
            previous: None,
            previous_template: None,
        });

        log.revert(&cluster).await;

        assert_eq!(
            cluster.namespace("shop").unwrap().metadata.labels,
            labels(&[("team", "checkout")])
        );
    }
}
