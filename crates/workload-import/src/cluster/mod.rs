//! Access to the Kubernetes API.
//!
//! The importer only needs a handful of verbs: `list`, `get` and `replace` for namespaced objects
//! and the same for namespaces. These are captured by the [`Cluster`] trait, which is implemented
//! by the [`Client`] for live clusters and by [`MemoryCluster`] for tests and offline runs.
use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use k8s_openapi::{NamespaceResourceScope, api::core::v1::Namespace};
use kube::Resource;
use serde::{Serialize, de::DeserializeOwned};
use snafu::Snafu;

mod client;
pub mod memory;

pub use client::Client;
pub use memory::MemoryCluster;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{kind} {name:?} does not exist"))]
    NotFound { kind: String, name: String },

    #[snafu(display("failed to {verb} {kind}"))]
    Request {
        source: kube::Error,
        verb: Verb,
        kind: String,
    },

    #[snafu(display("failed to {verb} {kind} within {timeout:?}"))]
    Timeout {
        verb: Verb,
        kind: String,
        timeout: Duration,
    },

    #[snafu(display("failed to encode {kind} object"))]
    Encode {
        source: serde_json::Error,
        kind: String,
    },

    #[snafu(display("failed to decode {kind} object"))]
    Decode {
        source: serde_json::Error,
        kind: String,
    },

    #[snafu(display("{kind} object has no name"))]
    MissingName { kind: String },

    #[snafu(display("the cluster rejected {verb} {kind}"))]
    Rejected { verb: Verb, kind: String },

    #[snafu(display("{kind} {name:?} is invalid: {field} is immutable"))]
    Immutable {
        kind: String,
        name: String,
        field: &'static str,
    },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// API verbs issued by the importer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Verb {
    List,
    Get,
    Replace,
}

/// Any namespaced object that can be moved through the [`Cluster`] verbs.
pub trait NamespacedObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
}

impl<K> NamespacedObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static
{
}

/// The cluster API as seen by the importer.
///
/// Every call is a single round trip without retries. Implementations honor a deadline per call
/// and are cancelled when the returned future is dropped.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Lists all objects of kind `K` in `namespace`.
    async fn list<K: NamespacedObject>(&self, namespace: &str) -> Result<Vec<K>>;

    /// Retrieves a single object, failing with [`Error::NotFound`] if it does not exist.
    async fn get<K: NamespacedObject>(&self, namespace: &str, name: &str) -> Result<K>;

    /// Replaces an existing object with `object`.
    async fn replace<K: NamespacedObject>(&self, namespace: &str, object: &K) -> Result<K>;

    async fn list_namespaces(&self) -> Result<Vec<Namespace>>;

    async fn get_namespace(&self, name: &str) -> Result<Namespace>;

    async fn replace_namespace(&self, namespace: &Namespace) -> Result<Namespace>;
}

/// Returns the kind name of `K`, used in errors and logs.
pub(crate) fn kind_of<K: Resource<DynamicType = ()>>() -> String {
    K::kind(&()).into_owned()
}
