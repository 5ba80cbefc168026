//! [`ClusterHandle`] backed by the Kubernetes API

use crate::certmanager::{Certificate, ClusterIssuer};
use crate::objects::{ApplyOutcome, ClusterObject, ObjectKey, ObjectKind};
use crate::policy::ClusterPolicy;
use crate::traits::{ClusterHandle, PodStream};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod, Service};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use overlock_core::{Error, Result};
use tracing::debug;

/// Field manager recorded for server-side apply
const FIELD_MANAGER: &str = "overlock";

fn api_resource(kind: ObjectKind) -> ApiResource {
    match kind {
        ObjectKind::Namespace => ApiResource::erase::<Namespace>(&()),
        ObjectKind::ConfigMap => ApiResource::erase::<ConfigMap>(&()),
        ObjectKind::Deployment => ApiResource::erase::<Deployment>(&()),
        ObjectKind::Service => ApiResource::erase::<Service>(&()),
        ObjectKind::ClusterIssuer => ApiResource::erase::<ClusterIssuer>(&()),
        ObjectKind::Certificate => ApiResource::erase::<Certificate>(&()),
        ObjectKind::ClusterPolicy => ApiResource::erase::<ClusterPolicy>(&()),
    }
}

/// Kubernetes cluster reached through a kubeconfig context
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Connect using `context`, or the current context / in-cluster config
    pub async fn connect(context: Option<&str>) -> Result<Self> {
        let config = match context {
            Some(ctx) => {
                let options = KubeConfigOptions {
                    context: Some(ctx.to_string()),
                    ..Default::default()
                };
                Config::from_kubeconfig(&options).await.map_err(|e| {
                    Error::connection(Some(ctx), "failed to load kubeconfig", Some(Box::new(e)))
                })?
            }
            None => Config::infer().await.map_err(|e| {
                Error::connection(None, "failed to infer cluster config", Some(Box::new(e)))
            })?,
        };

        debug!("Connecting to cluster at {}", config.cluster_url);
        let client = Client::try_from(config).map_err(|e| {
            Error::connection(context, "failed to build client", Some(Box::new(e)))
        })?;

        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, key: &ObjectKey) -> Api<DynamicObject> {
        let resource = api_resource(key.kind);
        match (&key.namespace, key.kind.is_namespaced()) {
            (Some(ns), true) => Api::namespaced_with(self.client.clone(), ns, &resource),
            (None, true) => Api::default_namespaced_with(self.client.clone(), &resource),
            (_, false) => Api::all_with(self.client.clone(), &resource),
        }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn to_dynamic(object: &ClusterObject) -> Result<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

#[async_trait]
impl ClusterHandle for KubeCluster {
    async fn get(&self, key: &ObjectKey) -> Result<Option<ClusterObject>> {
        let found = self
            .api(key)
            .get_opt(&key.name)
            .await
            .map_err(|e| Error::api(format!("get {}", key), e))?;

        found
            .map(|obj| ClusterObject::from_json(key.kind, serde_json::to_value(obj)?))
            .transpose()
    }

    async fn create(&self, object: &ClusterObject) -> Result<()> {
        let key = object.key();
        self.api(&key)
            .create(&PostParams::default(), &to_dynamic(object)?)
            .await
            .map_err(|e| Error::api(format!("create {}", key), e))?;
        Ok(())
    }

    async fn apply(&self, object: &ClusterObject) -> Result<ApplyOutcome> {
        let key = object.key();
        let api = self.api(&key);

        let before = api
            .get_opt(&key.name)
            .await
            .map_err(|e| Error::api(format!("get {}", key), e))?
            .and_then(|obj| obj.metadata.resource_version);

        let after = api
            .patch(
                &key.name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(object),
            )
            .await
            .map_err(|e| Error::api(format!("apply {}", key), e))?;

        // Server-side apply leaves the resource version alone when nothing changed
        Ok(match before {
            None => ApplyOutcome::Created,
            Some(version) if after.metadata.resource_version.as_ref() == Some(&version) => {
                ApplyOutcome::Unchanged
            }
            Some(_) => ApplyOutcome::Updated,
        })
    }

    async fn delete(&self, key: &ObjectKey) -> Result<bool> {
        match self.api(key).delete(&key.name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(false),
            Err(e) => Err(Error::api(format!("delete {}", key), e)),
        }
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<String>> {
        let pods = self
            .pods(namespace)
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| Error::api(format!("list pods {} in {}", selector, namespace), e))?;

        Ok(pods
            .items
            .into_iter()
            .filter_map(|pod| pod.metadata.name)
            .collect())
    }

    async fn dial_pod(&self, namespace: &str, pod: &str, port: u16) -> Result<PodStream> {
        let dial_error = |message: String| Error::Dial {
            pod: pod.to_string(),
            message,
        };

        let mut forwarder = self
            .pods(namespace)
            .portforward(pod, &[port])
            .await
            .map_err(|e| dial_error(e.to_string()))?;

        let stream = forwarder
            .take_stream(port)
            .ok_or_else(|| dial_error(format!("no stream for port {}", port)))?;

        // The forwarder finishes once the stream is closed
        let pod_name = pod.to_string();
        tokio::spawn(async move {
            if let Err(e) = forwarder.join().await {
                debug!("Port-forward to {} ended with error: {}", pod_name, e);
            }
        });

        Ok(Box::new(stream))
    }
}
