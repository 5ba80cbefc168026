//! Mock implementations for testing
//!
//! Stand-ins for the Kubernetes API, the helm CLI and an OCI registry.

#![allow(dead_code)]

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DeploymentStatus;
use overlock_cluster::{
    ApplyOutcome, ChartInstaller, ClusterHandle, ClusterObject, ObjectKey, ObjectKind, PodStream,
};
use overlock_core::{ChartSettings, Credentials, Error, Result};
use overlock_image::{ImageReference, OciImageDraft, RegistryProtocol};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// In-memory cluster
///
/// Deployments report a ready replica once `set_ready(true)` is called.
/// With `with_scheduler()`, applying a deployment also starts a pod
/// labelled `app=<deployment>`. Dialed pod streams echo every byte back.
#[derive(Default)]
pub struct MockCluster {
    objects: Mutex<HashMap<ObjectKey, ClusterObject>>,
    writes: Mutex<Vec<String>>,
    pods: Mutex<HashMap<(String, String), Vec<String>>>,
    deployment_ready: AtomicBool,
    schedule_pods: AtomicBool,
    fail_dial: AtomicBool,
    dials: AtomicUsize,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a running pod matching `selector` in `namespace`
    pub fn with_pod(self, namespace: &str, selector: &str, name: &str) -> Self {
        self.add_pod(namespace, selector, name);
        self
    }

    /// Start a pod for every applied deployment
    pub fn with_scheduler(self) -> Self {
        self.schedule_pods.store(true, Ordering::SeqCst);
        self
    }

    pub fn add_pod(&self, namespace: &str, selector: &str, name: &str) {
        self.pods
            .lock()
            .unwrap()
            .entry((namespace.to_string(), selector.to_string()))
            .or_default()
            .push(name.to_string());
    }

    pub fn set_ready(&self, ready: bool) {
        self.deployment_ready.store(ready, Ordering::SeqCst);
    }

    pub fn fail_dial(&self) {
        self.fail_dial.store(true, Ordering::SeqCst);
    }

    /// Creates, updates and deletes, in order
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn object(&self, key: &ObjectKey) -> Option<ClusterObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn count_kind(&self, kind: ObjectKind) -> usize {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.kind == kind)
            .count()
    }

    fn record(&self, write: String) {
        self.writes.lock().unwrap().push(write);
    }

    fn schedule(&self, object: &ClusterObject) {
        if !self.schedule_pods.load(Ordering::SeqCst) || object.kind() != ObjectKind::Deployment {
            return;
        }
        let key = object.key();
        let namespace = key.namespace.unwrap_or_default();
        let selector = format!("app={}", key.name);
        let mut pods = self.pods.lock().unwrap();
        let running = pods.entry((namespace, selector)).or_default();
        if running.is_empty() {
            running.push(format!("{}-7d9f8-abcde", key.name));
        }
    }
}

#[async_trait]
impl ClusterHandle for MockCluster {
    async fn get(&self, key: &ObjectKey) -> Result<Option<ClusterObject>> {
        let found = self.objects.lock().unwrap().get(key).cloned();
        Ok(found.map(|object| match object {
            ClusterObject::Deployment(mut deploy)
                if self.deployment_ready.load(Ordering::SeqCst) =>
            {
                deploy.status = Some(DeploymentStatus {
                    ready_replicas: Some(1),
                    ..Default::default()
                });
                ClusterObject::Deployment(deploy)
            }
            other => other,
        }))
    }

    async fn create(&self, object: &ClusterObject) -> Result<()> {
        let key = object.key();
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(Error::api(format!("create {}", key), "already exists"));
        }
        objects.insert(key.clone(), object.clone());
        drop(objects);
        self.record(format!("create {}", key));
        Ok(())
    }

    async fn apply(&self, object: &ClusterObject) -> Result<ApplyOutcome> {
        let key = object.key();
        let desired = serde_json::to_value(object)?;
        let outcome = {
            let mut objects = self.objects.lock().unwrap();
            let outcome = match objects.get(&key) {
                None => ApplyOutcome::Created,
                Some(existing) if serde_json::to_value(existing)? == desired => {
                    ApplyOutcome::Unchanged
                }
                Some(_) => ApplyOutcome::Updated,
            };
            objects.insert(key.clone(), object.clone());
            outcome
        };

        match outcome {
            ApplyOutcome::Created => self.record(format!("create {}", key)),
            ApplyOutcome::Updated => self.record(format!("update {}", key)),
            ApplyOutcome::Unchanged => {}
        }
        self.schedule(object);
        Ok(outcome)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<bool> {
        let removed = self.objects.lock().unwrap().remove(key).is_some();
        if removed {
            self.record(format!("delete {}", key));
        }
        Ok(removed)
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<String>> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), selector.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn dial_pod(&self, _namespace: &str, pod: &str, _port: u16) -> Result<PodStream> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if self.fail_dial.load(Ordering::SeqCst) {
            return Err(Error::Dial {
                pod: pod.to_string(),
                message: "connection refused".to_string(),
            });
        }

        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(server);
            let _ = tokio::io::copy(&mut reader, &mut writer).await;
        });
        Ok(Box::new(client))
    }
}

/// Chart installer that remembers releases
#[derive(Default)]
pub struct MockCharts {
    installed: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    installs: Mutex<Vec<String>>,
}

impl MockCharts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make installs of `release` fail
    pub fn fail(&self, release: &str) {
        self.failing.lock().unwrap().insert(release.to_string());
    }

    pub fn installs(&self) -> Vec<String> {
        self.installs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChartInstaller for MockCharts {
    async fn release_exists(&self, chart: &ChartSettings) -> Result<bool> {
        Ok(self.installed.lock().unwrap().contains(&chart.release))
    }

    async fn upgrade_install(&self, chart: &ChartSettings) -> Result<()> {
        if self.failing.lock().unwrap().contains(&chart.release) {
            return Err(Error::chart(&chart.release, "install timed out"));
        }
        self.installed.lock().unwrap().insert(chart.release.clone());
        self.installs.lock().unwrap().push(chart.release.clone());
        Ok(())
    }
}

/// One push seen by [`MockRegistry`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPush {
    pub target: String,
    pub authenticated: bool,
    pub layers: usize,
}

/// Registry client that records pushes
///
/// Loopback targets are dialed before recording, so a push through a dead
/// tunnel fails the way a real client would.
#[derive(Default)]
pub struct MockRegistry {
    pushes: Mutex<Vec<RecordedPush>>,
    tags: Mutex<HashMap<String, Vec<String>>>,
    fail_list: AtomicBool,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tags(self, repository: &str, tags: &[&str]) -> Self {
        self.tags.lock().unwrap().insert(
            repository.to_string(),
            tags.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    pub fn fail_list(&self) {
        self.fail_list.store(true, Ordering::SeqCst);
    }

    pub fn pushes(&self) -> Vec<RecordedPush> {
        self.pushes.lock().unwrap().clone()
    }

    async fn probe(&self, reference: &ImageReference) -> Result<()> {
        let Some(address) = reference.registry.as_deref() else {
            return Ok(());
        };
        if !address.starts_with("localhost:") {
            return Ok(());
        }

        let mut stream = TcpStream::connect(address)
            .await
            .map_err(|e| Error::registry("connect", e))?;
        stream
            .write_all(b"GET /v2/")
            .await
            .map_err(|e| Error::registry("write", e))?;
        let mut echoed = [0u8; 8];
        stream
            .read_exact(&mut echoed)
            .await
            .map_err(|e| Error::registry("read", e))?;
        Ok(())
    }
}

#[async_trait]
impl RegistryProtocol for MockRegistry {
    async fn push(
        &self,
        target: &ImageReference,
        draft: &OciImageDraft,
        credentials: Option<&Credentials>,
    ) -> Result<String> {
        self.probe(target).await?;
        self.pushes.lock().unwrap().push(RecordedPush {
            target: target.to_string(),
            authenticated: credentials.is_some(),
            layers: draft.layers.len(),
        });
        Ok(format!(
            "http://{}/v2/{}/manifests/{}",
            target.registry.as_deref().unwrap_or_default(),
            target.repository,
            target.identifier()
        ))
    }

    async fn list_tags(
        &self,
        repository: &ImageReference,
        _credentials: Option<&Credentials>,
    ) -> Result<Vec<String>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Error::registry("list tags", "name unknown"));
        }
        self.probe(repository).await?;
        Ok(self
            .tags
            .lock()
            .unwrap()
            .get(&repository.repository)
            .cloned()
            .unwrap_or_default())
    }
}
