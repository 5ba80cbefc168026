//! Pull policy for the in-cluster registry
//!
//! Workloads reference registry images by the registry's in-cluster
//! address, which nodes cannot resolve. A Kyverno `ClusterPolicy` rewrites
//! those image references to `localhost:<node port>/...`, which every node
//! reaches through the registry service's node port.

use crate::helm::{ensure_release, ChartInstaller};
use crate::objects::ClusterObject;
use crate::traits::ClusterHandle;
use async_trait::async_trait;
use kube::CustomResource;
use overlock_core::{ChartSettings, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Kyverno `ClusterPolicy`
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize)]
#[kube(
    group = "kyverno.io",
    version = "v1",
    kind = "ClusterPolicy",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPolicySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<bool>,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyRule {
    pub name: String,
    #[serde(rename = "match")]
    pub match_resources: MatchResources,
    pub mutate: Mutation,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResources {
    pub any: Vec<ResourceFilter>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFilter {
    pub resources: ResourceKinds,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceKinds {
    pub kinds: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mutation {
    pub foreach: Vec<ForEachMutation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForEachMutation {
    pub list: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preconditions: Option<serde_json::Value>,
    pub patch_strategic_merge: serde_json::Value,
}

/// Name of the policy registered for registry `name`
pub fn policy_name(name: &str) -> String {
    let sanitized: String = name
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("{}-registry-pull", sanitized.trim_matches('-'))
}

fn rewrite_rule(list: &str, field: &str, url: &str, node_port: u16) -> ForEachMutation {
    let prefix = format!("{}/", url.trim_end_matches('/'));
    let local = format!("localhost:{}/", node_port);
    ForEachMutation {
        list: list.to_string(),
        preconditions: Some(json!({
            "all": [{
                "key": "{{ element.image }}",
                "operator": "Equals",
                "value": format!("{}*", prefix),
            }]
        })),
        patch_strategic_merge: json!({
            "spec": {
                field: [{
                    "name": "{{ element.name }}",
                    "image": format!("{{{{ replace_all(element.image, '{}', '{}') }}}}", prefix, local),
                }]
            }
        }),
    }
}

/// Policy rewriting `<url>/...` images to `localhost:<node_port>/...`
pub fn registry_policy(name: &str, url: &str, node_port: u16) -> ClusterObject {
    let spec = ClusterPolicySpec {
        background: Some(false),
        rules: vec![PolicyRule {
            name: "rewrite-registry-images".to_string(),
            match_resources: MatchResources {
                any: vec![ResourceFilter {
                    resources: ResourceKinds {
                        kinds: vec!["Pod".to_string()],
                    },
                }],
            },
            mutate: Mutation {
                foreach: vec![
                    rewrite_rule("request.object.spec.containers", "containers", url, node_port),
                    rewrite_rule(
                        "request.object.spec.initContainers || `[]`",
                        "initContainers",
                        url,
                        node_port,
                    ),
                ],
            },
        }],
    };
    ClusterObject::ClusterPolicy(ClusterPolicy::new(&policy_name(name), spec))
}

/// Registers the registry with a policy controller
#[async_trait]
pub trait PolicyRegistrar: Send + Sync {
    /// Install the policy controller (no-op when already installed)
    async fn add_policy_controller(&self) -> Result<()>;

    /// Register the pull policy for registry `name` reachable at `url`
    async fn add_registry_policy(&self, name: &str, url: &str, node_port: u16) -> Result<()>;
}

/// [`PolicyRegistrar`] backed by Kyverno
pub struct KyvernoPolicies {
    cluster: Arc<dyn ClusterHandle>,
    charts: Arc<dyn ChartInstaller>,
    chart: ChartSettings,
}

impl KyvernoPolicies {
    pub fn new(
        cluster: Arc<dyn ClusterHandle>,
        charts: Arc<dyn ChartInstaller>,
        chart: ChartSettings,
    ) -> Self {
        Self {
            cluster,
            charts,
            chart,
        }
    }
}

#[async_trait]
impl PolicyRegistrar for KyvernoPolicies {
    async fn add_policy_controller(&self) -> Result<()> {
        ensure_release(self.charts.as_ref(), &self.chart).await
    }

    async fn add_registry_policy(&self, name: &str, url: &str, node_port: u16) -> Result<()> {
        let policy = registry_policy(name, url, node_port);
        let outcome = self.cluster.apply(&policy).await?;
        debug!("Registry policy {}: {:?}", policy.key().name, outcome);
        Ok(())
    }
}
