//! Label keys read and written by the importer, and the platform identity they derive from.
use std::collections::BTreeMap;

use const_format::concatcp;
use serde::{Deserialize, Serialize};

/// The well-known Kubernetes app key prefix.
const K8S_APP_KEY_PREFIX: &str = "app.kubernetes.io/";

/// The legacy `app` key. Used for grouping when `app.kubernetes.io/name` is absent or empty.
pub const APP_KEY: &str = "app";

/// The well-known Kubernetes app name key `app.kubernetes.io/name`. Takes precedence over
/// [`APP_KEY`] when grouping objects into applications.
pub const K8S_APP_NAME_KEY: &str = concatcp!(K8S_APP_KEY_PREFIX, "name");

/// The well-known Kubernetes app managed-by key `app.kubernetes.io/managed-by`. Set on namespaces
/// and workloads once they have been imported.
pub const K8S_APP_MANAGED_BY_KEY: &str = concatcp!(K8S_APP_KEY_PREFIX, "managed-by");

/// Marks objects created by the platform itself.
pub const CREATOR_KEY: &str = "creator";

pub const SERVICE_ID_KEY: &str = "service_id";
pub const VERSION_KEY: &str = "version";
pub const MIGRATOR_KEY: &str = "migrator";

/// Bucket for objects without any application label.
pub const UNLABELED_BUCKET: &str = "UnLabel";

pub const DEFAULT_PLATFORM_NAME: &str = "Rainbond";

/// Returns the application an object belongs to.
///
/// A non-empty `app.kubernetes.io/name` wins over a non-empty `app`. Objects carrying neither are
/// grouped into [`UNLABELED_BUCKET`].
pub fn app_label(labels: Option<&BTreeMap<String, String>>) -> String {
    let value = |key: &str| {
        labels
            .and_then(|labels| labels.get(key))
            .filter(|value| !value.is_empty())
    };

    value(K8S_APP_NAME_KEY)
        .or_else(|| value(APP_KEY))
        .map_or_else(|| UNLABELED_BUCKET.to_owned(), Clone::clone)
}

/// Returns `true` if either application key is present, even with an empty value.
///
/// Objects that carry a key were grouped by their owner on purpose and are never re-attributed to
/// a workload that mounts them.
pub fn has_app_label(labels: Option<&BTreeMap<String, String>>) -> bool {
    labels.is_some_and(|labels| {
        labels.contains_key(APP_KEY) || labels.contains_key(K8S_APP_NAME_KEY)
    })
}

/// The identity of the platform objects are imported into.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub name: String,
}

impl Default for Platform {
    fn default() -> Self {
        Self::new(DEFAULT_PLATFORM_NAME)
    }
}

impl Platform {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The value of `app.kubernetes.io/managed-by` written by this platform.
    pub fn managed_by_value(&self) -> String {
        self.name.to_lowercase()
    }

    /// Returns `true` if the object was created by the platform.
    pub fn owns(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        labels
            .and_then(|labels| labels.get(CREATOR_KEY))
            .is_some_and(|creator| *creator == self.name)
    }

    /// Returns `true` if the namespace was already taken over by the platform.
    pub fn manages_namespace(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        labels
            .and_then(|labels| labels.get(K8S_APP_MANAGED_BY_KEY))
            .is_some_and(|managed_by| *managed_by == self.managed_by_value())
    }

    pub fn namespace_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(K8S_APP_MANAGED_BY_KEY.to_owned(), self.managed_by_value())])
    }

    /// Labels written onto an imported workload and its pod template.
    pub fn component_labels(
        &self,
        component_id: &str,
        deploy_version: &str,
    ) -> BTreeMap<String, String> {
        BTreeMap::from([
            (SERVICE_ID_KEY.to_owned(), component_id.to_owned()),
            (VERSION_KEY.to_owned(), deploy_version.to_owned()),
            (CREATOR_KEY.to_owned(), self.name.clone()),
            (K8S_APP_MANAGED_BY_KEY.to_owned(), self.managed_by_value()),
            (MIGRATOR_KEY.to_owned(), self.managed_by_value()),
        ])
    }
}
