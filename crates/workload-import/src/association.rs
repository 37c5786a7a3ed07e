//! Attribution of objects that a workload mounts but that carry no application label.
//!
//! ConfigMaps and Secrets referenced by a workload's volumes are reported so the scanner can put
//! them into the workload's bucket. PersistentVolumeClaims are labeled in place instead, so they
//! land in the right bucket once they are listed themselves.
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, PodTemplateSpec, Secret};
use tracing::{debug, warn};

use crate::{
    cluster::Cluster,
    labels::{APP_KEY, has_app_label},
};

/// Unlabeled ConfigMaps and Secrets mounted by a workload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VolumeAssociations {
    pub config_maps: Vec<String>,
    pub secrets: Vec<String>,
}

/// Classifies every volume of `template`.
///
/// Unlabeled PersistentVolumeClaims get `app=<label>` and are updated right away, outside of any
/// import transaction. Objects that cannot be fetched or updated are logged and skipped.
pub async fn resolve_volumes<C: Cluster>(
    cluster: &C,
    namespace: &str,
    template: Option<&PodTemplateSpec>,
    label: &str,
) -> VolumeAssociations {
    let mut associations = VolumeAssociations::default();
    let volumes = template
        .and_then(|template| template.spec.as_ref())
        .and_then(|spec| spec.volumes.as_deref())
        .unwrap_or_default();

    for volume in volumes {
        if let Some(claim) = &volume.persistent_volume_claim {
            label_claim(cluster, namespace, &claim.claim_name, label).await;
            continue;
        }

        if let Some(source) = &volume.config_map {
            match cluster.get::<ConfigMap>(namespace, &source.name).await {
                Ok(config_map) if !has_app_label(config_map.metadata.labels.as_ref()) => {
                    associations.config_maps.push(source.name.clone());
                }
                Ok(_) => {}
                Err(error) => warn!(
                    namespace,
                    config_map = %source.name,
                    error = %error,
                    "skipping mounted ConfigMap"
                ),
            }
        }

        if let Some(secret_name) = volume
            .secret
            .as_ref()
            .and_then(|source| source.secret_name.as_ref())
        {
            match cluster.get::<Secret>(namespace, secret_name).await {
                Ok(secret) if !has_app_label(secret.metadata.labels.as_ref()) => {
                    associations.secrets.push(secret_name.clone());
                }
                Ok(_) => {}
                Err(error) => warn!(
                    namespace,
                    secret = %secret_name,
                    error = %error,
                    "skipping mounted Secret"
                ),
            }
        }
    }

    associations
}

async fn label_claim<C: Cluster>(cluster: &C, namespace: &str, claim_name: &str, label: &str) {
    let mut claim = match cluster.get::<PersistentVolumeClaim>(namespace, claim_name).await {
        Ok(claim) => claim,
        Err(error) => {
            warn!(
                namespace,
                claim = claim_name,
                error = %error,
                "skipping mounted PersistentVolumeClaim"
            );
            return;
        }
    };

    if has_app_label(claim.metadata.labels.as_ref()) {
        return;
    }

    claim
        .metadata
        .labels
        .get_or_insert_default()
        .insert(APP_KEY.to_owned(), label.to_owned());

    match cluster.replace(namespace, &claim).await {
        Ok(_) => debug!(
            namespace,
            claim = claim_name,
            app = label,
            "labeled PersistentVolumeClaim"
        ),
        Err(error) => warn!(
            namespace,
            claim = claim_name,
            error = %error,
            "failed to label PersistentVolumeClaim"
        ),
    }
}
