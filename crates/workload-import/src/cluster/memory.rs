//! An in-process [`Cluster`] holding objects as JSON documents.
//!
//! Used by the test suites and by offline runs that read a manifest dump instead of talking to an
//! API server. Failures can be injected per verb and kind to exercise the degraded paths of the
//! pipeline.
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use k8s_openapi::api::{batch::v1::Job, core::v1::Namespace};
use kube::Resource;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use snafu::{OptionExt, ResultExt, Snafu, ensure};

use crate::cluster::{
    self, Cluster, DecodeSnafu, EncodeSnafu, ImmutableSnafu, MissingNameSnafu, NamespacedObject,
    NotFoundSnafu, RejectedSnafu, Verb, kind_of,
};

#[derive(Debug, Snafu)]
pub enum LoadError {
    #[snafu(display("failed to parse manifest document"))]
    ParseDocument { source: serde_yaml::Error },

    #[snafu(display("failed to convert manifest document"))]
    ConvertDocument { source: serde_json::Error },

    #[snafu(display("manifest document is missing {field:?}"))]
    MissingField { field: &'static str },
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectKey {
    kind: String,
    namespace: Option<String>,
    name: String,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<ObjectKey, Value>,
    faults: BTreeSet<(Verb, String)>,
}

/// A cluster kept in memory. Clones share the same objects.
#[derive(Clone, Debug, Default)]
pub struct MemoryCluster {
    state: Arc<Mutex<State>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `object`, replacing any object of the same kind, namespace and name.
    pub fn insert<K>(&self, object: &K) -> cluster::Result<()>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let kind = kind_of::<K>();
        let name = object
            .meta()
            .name
            .clone()
            .context(MissingNameSnafu { kind: &kind })?;
        let value = serde_json::to_value(object).context(EncodeSnafu { kind: &kind })?;
        let key = ObjectKey {
            kind,
            namespace: object.meta().namespace.clone(),
            name,
        };
        self.state().objects.insert(key, value);
        Ok(())
    }

    /// Loads every document of a (multi-document) YAML stream.
    ///
    /// Documents without `metadata.namespace` are placed into `default_namespace`, except for
    /// namespaces themselves, and have it set accordingly. Empty documents are skipped. Returns
    /// the number of loaded objects.
    pub fn load_manifests(&self, yaml: &str, default_namespace: &str) -> Result<usize, LoadError> {
        let mut loaded = 0;
        for document in serde_yaml::Deserializer::from_str(yaml) {
            let value = serde_yaml::Value::deserialize(document).context(ParseDocumentSnafu)?;
            if value.is_null() {
                continue;
            }
            let mut value = serde_json::to_value(value).context(ConvertDocumentSnafu)?;

            let kind = value
                .get("kind")
                .and_then(Value::as_str)
                .context(MissingFieldSnafu { field: "kind" })?
                .to_owned();
            let metadata = value.get("metadata");
            let name = metadata
                .and_then(|metadata| metadata.get("name"))
                .and_then(Value::as_str)
                .context(MissingFieldSnafu {
                    field: "metadata.name",
                })?
                .to_owned();
            let namespace = match metadata
                .and_then(|metadata| metadata.get("namespace"))
                .and_then(Value::as_str)
            {
                Some(namespace) => Some(namespace.to_owned()),
                None if kind == kind_of::<Namespace>() => None,
                None => Some(default_namespace.to_owned()),
            };
            if let (Some(namespace), Some(Value::Object(metadata))) =
                (&namespace, value.get_mut("metadata"))
            {
                metadata.insert("namespace".to_owned(), Value::from(namespace.as_str()));
            }

            self.state().objects.insert(
                ObjectKey {
                    kind,
                    namespace,
                    name,
                },
                value,
            );
            loaded += 1;
        }

        Ok(loaded)
    }

    /// Makes every subsequent `verb` on objects of kind `kind` fail.
    pub fn fail(&self, verb: Verb, kind: impl Into<String>) {
        self.state().faults.insert((verb, kind.into()));
    }

    /// Returns a stored namespaced object, if present.
    pub fn object<K: NamespacedObject>(&self, namespace: &str, name: &str) -> Option<K> {
        self.lookup(&kind_of::<K>(), Some(namespace), name)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Returns a stored namespace, if present.
    pub fn namespace(&self, name: &str) -> Option<Namespace> {
        self.lookup(&kind_of::<Namespace>(), None, name)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    fn lookup(&self, kind: &str, namespace: Option<&str>, name: &str) -> Option<Value> {
        let key = ObjectKey {
            kind: kind.to_owned(),
            namespace: namespace.map(str::to_owned),
            name: name.to_owned(),
        };
        self.state().objects.get(&key).cloned()
    }

    fn check_fault(&self, verb: Verb, kind: &str) -> cluster::Result<()> {
        let faulted = self.state().faults.contains(&(verb, kind.to_owned()));
        ensure!(!faulted, RejectedSnafu { verb, kind });
        Ok(())
    }

    fn list_values(&self, kind: &str, namespace: Option<&str>) -> Vec<Value> {
        self.state()
            .objects
            .iter()
            .filter(|(key, _)| key.kind == kind && key.namespace.as_deref() == namespace)
            .map(|(_, value)| value.clone())
            .collect()
    }

    fn get_typed<K: DeserializeOwned>(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> cluster::Result<K> {
        self.check_fault(Verb::Get, kind)?;
        let value = self
            .lookup(kind, namespace, name)
            .context(NotFoundSnafu { kind, name })?;
        serde_json::from_value(value).context(DecodeSnafu { kind })
    }

    fn replace_typed<K>(&self, namespace: Option<&str>, object: &K) -> cluster::Result<K>
    where
        K: Resource<DynamicType = ()> + Serialize + Clone,
    {
        let kind = kind_of::<K>();
        self.check_fault(Verb::Replace, &kind)?;
        let name = object
            .meta()
            .name
            .clone()
            .context(MissingNameSnafu { kind: &kind })?;
        let key = ObjectKey {
            kind: kind.clone(),
            namespace: namespace.map(str::to_owned),
            name: name.clone(),
        };
        let value = serde_json::to_value(object).context(EncodeSnafu { kind: &kind })?;

        let mut state = self.state();
        let stored = state
            .objects
            .get_mut(&key)
            .context(NotFoundSnafu { kind: &kind, name: &name })?;
        if let Some(field) = immutable_field(&kind) {
            ensure!(
                stored.pointer(field) == value.pointer(field),
                ImmutableSnafu { kind, name, field }
            );
        }
        *stored = value;
        Ok(object.clone())
    }
}

/// JSON pointer of the part of `kind` objects that an update must not change.
fn immutable_field(kind: &str) -> Option<&'static str> {
    (kind == kind_of::<Job>()).then_some("/spec/template")
}

#[async_trait]
impl Cluster for MemoryCluster {
    async fn list<K: NamespacedObject>(&self, namespace: &str) -> cluster::Result<Vec<K>> {
        let kind = kind_of::<K>();
        self.check_fault(Verb::List, &kind)?;
        self.list_values(&kind, Some(namespace))
            .into_iter()
            .map(|value| serde_json::from_value(value).context(DecodeSnafu { kind: &kind }))
            .collect()
    }

    async fn get<K: NamespacedObject>(&self, namespace: &str, name: &str) -> cluster::Result<K> {
        self.get_typed(&kind_of::<K>(), Some(namespace), name)
    }

    async fn replace<K: NamespacedObject>(
        &self,
        namespace: &str,
        object: &K,
    ) -> cluster::Result<K> {
        self.replace_typed(Some(namespace), object)
    }

    async fn list_namespaces(&self) -> cluster::Result<Vec<Namespace>> {
        let kind = kind_of::<Namespace>();
        self.check_fault(Verb::List, &kind)?;
        self.list_values(&kind, None)
            .into_iter()
            .map(|value| serde_json::from_value(value).context(DecodeSnafu { kind: &kind }))
            .collect()
    }

    async fn get_namespace(&self, name: &str) -> cluster::Result<Namespace> {
        self.get_typed(&kind_of::<Namespace>(), None, name)
    }

    async fn replace_namespace(&self, namespace: &Namespace) -> cluster::Result<Namespace> {
        self.replace_typed(None, namespace)
    }
}
