use std::{future::Future, time::Duration};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    Api, ResourceExt,
    api::{ListParams, PostParams},
    client::Client as KubeClient,
};
use snafu::{OptionExt, ResultExt};

use crate::cluster::{
    Cluster, MissingNameSnafu, NamespacedObject, NotFoundSnafu, RequestSnafu, Result,
    TimeoutSnafu, Verb, kind_of,
};

/// The [`Cluster`] of a live API server.
///
/// Every request is bounded by `request_timeout`, and a missing object is reported as
/// [`NotFound`](crate::cluster::Error::NotFound) instead of an API error.
#[derive(Clone)]
pub struct Client {
    client: KubeClient,
    post_params: PostParams,
    request_timeout: Duration,
}

impl Client {
    pub fn new(
        client: KubeClient,
        field_manager: Option<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            post_params: PostParams {
                field_manager,
                ..PostParams::default()
            },
            request_timeout,
        }
    }

    /// Creates a client from the local kubeconfig or the in-cluster service account.
    pub async fn try_default(
        field_manager: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, kube::Error> {
        let client = KubeClient::try_default().await?;
        Ok(Self::new(client, field_manager, request_timeout))
    }

    /// The underlying kube client, for requests outside the [`Cluster`] verbs.
    pub fn as_kube_client(&self) -> KubeClient {
        self.client.clone()
    }

    pub fn get_api<T>(&self, namespace: &str) -> Api<T>
    where
        T: NamespacedObject,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn with_deadline<T, F>(&self, verb: Verb, kind: String, request: F) -> Result<T>
    where
        F: Future<Output = Result<T, kube::Error>> + Send,
    {
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(response) => response.context(RequestSnafu { verb, kind }),
            Err(_) => TimeoutSnafu {
                verb,
                kind,
                timeout: self.request_timeout,
            }
            .fail(),
        }
    }
}

#[async_trait]
impl Cluster for Client {
    async fn list<K: NamespacedObject>(&self, namespace: &str) -> Result<Vec<K>> {
        let api = self.get_api::<K>(namespace);
        let list = self
            .with_deadline(Verb::List, kind_of::<K>(), async {
                api.list(&ListParams::default()).await
            })
            .await?;
        Ok(list.items)
    }

    async fn get<K: NamespacedObject>(&self, namespace: &str, name: &str) -> Result<K> {
        let api = self.get_api::<K>(namespace);
        self.with_deadline(Verb::Get, kind_of::<K>(), api.get_opt(name))
            .await?
            .context(NotFoundSnafu {
                kind: kind_of::<K>(),
                name,
            })
    }

    async fn replace<K: NamespacedObject>(&self, namespace: &str, object: &K) -> Result<K> {
        let name = object.meta().name.clone().context(MissingNameSnafu {
            kind: kind_of::<K>(),
        })?;
        let api = self.get_api::<K>(namespace);
        self.with_deadline(
            Verb::Replace,
            kind_of::<K>(),
            api.replace(&name, &self.post_params, object),
        )
        .await
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = self
            .with_deadline(Verb::List, kind_of::<Namespace>(), async {
                api.list(&ListParams::default()).await
            })
            .await?;
        Ok(list.items)
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        self.with_deadline(Verb::Get, kind_of::<Namespace>(), api.get_opt(name))
            .await?
            .context(NotFoundSnafu {
                kind: kind_of::<Namespace>(),
                name,
            })
    }

    async fn replace_namespace(&self, namespace: &Namespace) -> Result<Namespace> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        self.with_deadline(
            Verb::Replace,
            kind_of::<Namespace>(),
            api.replace(&namespace.name_any(), &self.post_params, namespace),
        )
        .await
    }
}
