//! Typed cluster objects
//!
//! Every object the reconciler touches is one variant of [`ClusterObject`],
//! addressed by an [`ObjectKey`]. The registry's own objects are built here
//! from [`RegistrySettings`].

use crate::certmanager::{Certificate, ClusterIssuer};
use crate::policy::ClusterPolicy;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, Namespace, PodSpec,
    PodTemplateSpec, SecretVolumeSource, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use overlock_core::{RegistrySettings, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

pub const REGISTRY_CONFIG_MAP: &str = "registry-config";
pub const PROXY_CONFIG_MAP: &str = "nginx-proxy-config";

const REGISTRY_CONFIG_KEY: &str = "config.yml";
const PROXY_CONFIG_KEY: &str = "default.conf";
const REGISTRY_CONFIG_MOUNT: &str = "/etc/docker/registry";
const PROXY_CONFIG_MOUNT: &str = "/etc/nginx/conf.d";
const TLS_MOUNT: &str = "/certs";
const TLS_VOLUME: &str = "registry-tls";
const PROXY_CONFIG_VOLUME: &str = "nginx-config";

const REGISTRY_CONFIG_TEMPLATE: &str = r#"version: 0.1
log:
  fields:
    service: registry
storage:
  filesystem:
    rootdirectory: /var/lib/registry
  delete:
    enabled: true
http:
  addr: :{registry_port}
"#;

const PROXY_CONFIG_TEMPLATE: &str = r#"server {
    listen {http_port};
    server_name _;
    client_max_body_size 0;

    location / {
        proxy_pass http://localhost:{registry_port};
        proxy_set_header Host $http_host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_read_timeout 900;
    }
}

server {
    listen {https_port} ssl;
    server_name _;
    client_max_body_size 0;

    ssl_certificate {tls_mount}/tls.crt;
    ssl_certificate_key {tls_mount}/tls.key;

    location / {
        proxy_pass http://localhost:{registry_port};
        proxy_set_header Host $http_host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_read_timeout 900;
    }
}
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Namespace,
    ConfigMap,
    Deployment,
    Service,
    ClusterIssuer,
    Certificate,
    ClusterPolicy,
}

impl ObjectKind {
    /// Whether objects of this kind live in a namespace
    pub fn is_namespaced(self) -> bool {
        matches!(
            self,
            ObjectKind::ConfigMap
                | ObjectKind::Deployment
                | ObjectKind::Service
                | ObjectKind::Certificate
        )
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Namespace => "namespace",
            ObjectKind::ConfigMap => "configmap",
            ObjectKind::Deployment => "deployment",
            ObjectKind::Service => "service",
            ObjectKind::ClusterIssuer => "clusterissuer",
            ObjectKind::Certificate => "certificate",
            ObjectKind::ClusterPolicy => "clusterpolicy",
        };
        f.write_str(name)
    }
}

/// Kind, namespace and name of a cluster object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub kind: ObjectKind,
    /// `None` for cluster-scoped kinds
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(kind: ObjectKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// What an apply did to the stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

/// A cluster object of one of the kinds the registry needs
///
/// Serializes as the bare Kubernetes object.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ClusterObject {
    Namespace(Namespace),
    ConfigMap(ConfigMap),
    Deployment(Deployment),
    Service(Service),
    ClusterIssuer(ClusterIssuer),
    Certificate(Certificate),
    ClusterPolicy(ClusterPolicy),
}

impl ClusterObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ClusterObject::Namespace(_) => ObjectKind::Namespace,
            ClusterObject::ConfigMap(_) => ObjectKind::ConfigMap,
            ClusterObject::Deployment(_) => ObjectKind::Deployment,
            ClusterObject::Service(_) => ObjectKind::Service,
            ClusterObject::ClusterIssuer(_) => ObjectKind::ClusterIssuer,
            ClusterObject::Certificate(_) => ObjectKind::Certificate,
            ClusterObject::ClusterPolicy(_) => ObjectKind::ClusterPolicy,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            ClusterObject::Namespace(o) => &o.metadata,
            ClusterObject::ConfigMap(o) => &o.metadata,
            ClusterObject::Deployment(o) => &o.metadata,
            ClusterObject::Service(o) => &o.metadata,
            ClusterObject::ClusterIssuer(o) => &o.metadata,
            ClusterObject::Certificate(o) => &o.metadata,
            ClusterObject::ClusterPolicy(o) => &o.metadata,
        }
    }

    pub fn key(&self) -> ObjectKey {
        let meta = self.metadata();
        let kind = self.kind();
        ObjectKey {
            kind,
            namespace: if kind.is_namespaced() {
                meta.namespace.clone()
            } else {
                None
            },
            name: meta.name.clone().unwrap_or_default(),
        }
    }

    /// Deserialize a JSON object of the given kind
    pub fn from_json(kind: ObjectKind, value: serde_json::Value) -> Result<Self> {
        Ok(match kind {
            ObjectKind::Namespace => ClusterObject::Namespace(serde_json::from_value(value)?),
            ObjectKind::ConfigMap => ClusterObject::ConfigMap(serde_json::from_value(value)?),
            ObjectKind::Deployment => ClusterObject::Deployment(serde_json::from_value(value)?),
            ObjectKind::Service => ClusterObject::Service(serde_json::from_value(value)?),
            ObjectKind::ClusterIssuer => {
                ClusterObject::ClusterIssuer(serde_json::from_value(value)?)
            }
            ObjectKind::Certificate => ClusterObject::Certificate(serde_json::from_value(value)?),
            ObjectKind::ClusterPolicy => {
                ClusterObject::ClusterPolicy(serde_json::from_value(value)?)
            }
        })
    }

    /// Ready replicas reported by a deployment's status
    pub fn ready_replicas(&self) -> Option<i32> {
        match self {
            ClusterObject::Deployment(d) => d.status.as_ref().and_then(|s| s.ready_replicas),
            _ => None,
        }
    }

    /// Node port assigned to a service's `port`
    pub fn node_port(&self, port: u16) -> Option<u16> {
        let ClusterObject::Service(svc) = self else {
            return None;
        };
        svc.spec
            .as_ref()?
            .ports
            .as_ref()?
            .iter()
            .find(|p| p.port == i32::from(port))
            .and_then(|p| p.node_port)
            .and_then(|n| u16::try_from(n).ok())
    }
}

fn meta(name: &str, namespace: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        ..Default::default()
    }
}

fn app_labels(settings: &RegistrySettings) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), settings.deployment_name.clone())])
}

fn tcp_port(name: &str, port: u16) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        protocol: Some("TCP".to_string()),
        container_port: i32::from(port),
        ..Default::default()
    }
}

fn read_only_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}

fn config_map_volume(name: &str, config_map: &str) -> Volume {
    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn namespace(settings: &RegistrySettings) -> ClusterObject {
    ClusterObject::Namespace(Namespace {
        metadata: meta(&settings.namespace, None),
        ..Default::default()
    })
}

/// Registry process configuration: filesystem storage, plain HTTP listener
pub fn registry_config(settings: &RegistrySettings) -> ClusterObject {
    let config = REGISTRY_CONFIG_TEMPLATE
        .replace("{registry_port}", &settings.registry_port.to_string());
    ClusterObject::ConfigMap(ConfigMap {
        metadata: meta(REGISTRY_CONFIG_MAP, Some(&settings.namespace)),
        data: Some(BTreeMap::from([(REGISTRY_CONFIG_KEY.to_string(), config)])),
        ..Default::default()
    })
}

/// Proxy configuration terminating TLS in front of the registry
pub fn proxy_config(settings: &RegistrySettings) -> ClusterObject {
    let config = PROXY_CONFIG_TEMPLATE
        .replace("{http_port}", &settings.proxy_http_port.to_string())
        .replace("{https_port}", &settings.proxy_https_port.to_string())
        .replace("{registry_port}", &settings.registry_port.to_string())
        .replace("{tls_mount}", TLS_MOUNT);
    ClusterObject::ConfigMap(ConfigMap {
        metadata: meta(PROXY_CONFIG_MAP, Some(&settings.namespace)),
        data: Some(BTreeMap::from([(PROXY_CONFIG_KEY.to_string(), config)])),
        ..Default::default()
    })
}

/// Registry and TLS proxy in one pod, sharing the certificate secret
pub fn registry_deployment(settings: &RegistrySettings, tls_secret: &str) -> ClusterObject {
    let labels = app_labels(settings);

    let registry = Container {
        name: "registry".to_string(),
        image: Some(settings.registry_image.clone()),
        ports: Some(vec![tcp_port("oci", settings.registry_port)]),
        volume_mounts: Some(vec![read_only_mount(
            REGISTRY_CONFIG_MAP,
            REGISTRY_CONFIG_MOUNT,
        )]),
        ..Default::default()
    };

    let proxy = Container {
        name: "nginx".to_string(),
        image: Some(settings.proxy_image.clone()),
        ports: Some(vec![
            tcp_port("http", settings.proxy_http_port),
            tcp_port("https", settings.proxy_https_port),
        ]),
        volume_mounts: Some(vec![
            read_only_mount(TLS_VOLUME, TLS_MOUNT),
            read_only_mount(PROXY_CONFIG_VOLUME, PROXY_CONFIG_MOUNT),
        ]),
        ..Default::default()
    };

    let volumes = vec![
        Volume {
            name: TLS_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(tls_secret.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        },
        config_map_volume(REGISTRY_CONFIG_MAP, REGISTRY_CONFIG_MAP),
        config_map_volume(PROXY_CONFIG_VOLUME, PROXY_CONFIG_MAP),
    ];

    ClusterObject::Deployment(Deployment {
        metadata: meta(&settings.deployment_name, Some(&settings.namespace)),
        spec: Some(DeploymentSpec {
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![registry, proxy],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// NodePort service exposing the proxy; HTTP gets the fixed node port
pub fn registry_service(settings: &RegistrySettings) -> ClusterObject {
    let port = |name: &str, port: u16, node_port: Option<u16>| ServicePort {
        name: Some(name.to_string()),
        protocol: Some("TCP".to_string()),
        port: i32::from(port),
        target_port: Some(IntOrString::Int(i32::from(port))),
        node_port: node_port.map(i32::from),
        ..Default::default()
    };

    ClusterObject::Service(Service {
        metadata: meta(&settings.service_name, Some(&settings.namespace)),
        spec: Some(ServiceSpec {
            type_: Some("NodePort".to_string()),
            selector: Some(app_labels(settings)),
            ports: Some(vec![
                port("http", settings.proxy_http_port, Some(settings.node_port)),
                port("https", settings.proxy_https_port, None),
            ]),
            ..Default::default()
        }),
        ..Default::default()
    })
}
