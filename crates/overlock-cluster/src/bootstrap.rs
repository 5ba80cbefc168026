//! Local registry bootstrap
//!
//! Reconciles the objects that make up the in-cluster registry. Every step
//! is idempotent, so the whole sequence can be re-run on an existing
//! registry. Certificate steps are best-effort: a registry can keep
//! serving a previously issued certificate. Readiness and the pull policy
//! are required, since workloads cannot use the registry without them.

use crate::certmanager::CertificateIssuer;
use crate::objects::{self, ObjectKey, ObjectKind};
use crate::policy::PolicyRegistrar;
use crate::traits::ClusterHandle;
use overlock_core::{Error, RegistryEndpoint, RegistrySettings, Result};
use std::sync::Arc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct BootstrapReconciler {
    cluster: Arc<dyn ClusterHandle>,
    issuer: Arc<dyn CertificateIssuer>,
    policies: Arc<dyn PolicyRegistrar>,
    settings: RegistrySettings,
}

impl BootstrapReconciler {
    pub fn new(
        cluster: Arc<dyn ClusterHandle>,
        issuer: Arc<dyn CertificateIssuer>,
        policies: Arc<dyn PolicyRegistrar>,
        settings: RegistrySettings,
    ) -> Self {
        Self {
            cluster,
            issuer,
            policies,
            settings,
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Make sure the local registry exists, is ready, and is pullable
    ///
    /// `endpoint` names the registry and the address workloads use for it;
    /// the pull policy is keyed by both.
    pub async fn ensure_local_registry(&self, endpoint: &RegistryEndpoint) -> Result<bool> {
        let settings = &self.settings;
        info!("Ensuring local registry '{}'", endpoint.name);

        debug!("Installing cert-manager");
        match self.issuer.install_cert_manager().await {
            Ok(()) => {
                debug!("Creating self-signed issuer");
                if let Err(e) = self.issuer.create_self_signed_issuer().await {
                    warn!("Failed to create self-signed issuer: {}", e);
                }
            }
            Err(e) => warn!("Failed to install cert-manager: {}", e),
        }

        self.cluster
            .create_if_absent(&objects::namespace(settings))
            .await?;

        debug!("Creating registry TLS certificate");
        if let Err(e) = self.issuer.create_registry_certificate().await {
            warn!("Failed to create registry certificate: {}", e);
        }

        let secret = self.issuer.registry_secret_name().to_string();
        for object in [
            objects::registry_config(settings),
            objects::proxy_config(settings),
            objects::registry_deployment(settings, &secret),
            objects::registry_service(settings),
        ] {
            let outcome = self.cluster.apply(&object).await?;
            debug!("{}: {:?}", object.key(), outcome);
        }

        self.wait_until_ready().await?;

        let node_port = self
            .cluster
            .get(&self.service_key())
            .await?
            .and_then(|svc| svc.node_port(settings.proxy_http_port))
            .unwrap_or(settings.node_port);

        debug!("Installing policy controller");
        self.policies.add_policy_controller().await.inspect_err(|_| {
            warn!("Policy controller has issues, without it the local registry cannot be pulled from")
        })?;

        debug!("Installing registry policy");
        self.policies
            .add_registry_policy(&endpoint.name, &endpoint.server_address, node_port)
            .await?;

        info!("Local registry '{}' is ready", endpoint.name);
        Ok(true)
    }

    /// Poll the deployment until it reports a ready replica
    ///
    /// The deadline is fixed before the first poll; the check runs on every
    /// tick, so the timeout fires within one poll interval of the deadline.
    async fn wait_until_ready(&self) -> Result<()> {
        let readiness = self.settings.readiness;
        let deadline = Instant::now() + readiness.timeout();
        let mut ticker = time::interval(readiness.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if Instant::now() >= deadline {
                return Err(Error::NotReady {
                    name: self.settings.deployment_name.clone(),
                    timeout: readiness.timeout(),
                });
            }

            let ready = self
                .cluster
                .get(&self.deployment_key())
                .await?
                .and_then(|deploy| deploy.ready_replicas())
                .unwrap_or(0);

            if ready > 0 {
                debug!("Deployment {} has {} ready replica(s)", self.settings.deployment_name, ready);
                return Ok(());
            }
        }
    }

    /// Whether a registry pod exists
    pub async fn is_local_registry(&self) -> Result<bool> {
        let pods = self
            .cluster
            .list_pods(&self.settings.namespace, &self.settings.pod_selector())
            .await?;
        Ok(!pods.is_empty())
    }

    /// Remove the registry service and deployment
    ///
    /// Missing objects are reported and skipped. Certificates, config maps
    /// and the namespace are left in place.
    pub async fn delete_local_registry(&self) -> Result<()> {
        for key in [self.service_key(), self.deployment_key()] {
            if self.cluster.delete(&key).await? {
                debug!("Deleted {}", key);
            } else {
                warn!("{} not found", key);
            }
        }
        info!("Local registry '{}' deleted", self.settings.deployment_name);
        Ok(())
    }

    fn deployment_key(&self) -> ObjectKey {
        ObjectKey::namespaced(
            ObjectKind::Deployment,
            &self.settings.namespace,
            &self.settings.deployment_name,
        )
    }

    fn service_key(&self) -> ObjectKey {
        ObjectKey::namespaced(
            ObjectKind::Service,
            &self.settings.namespace,
            &self.settings.service_name,
        )
    }
}
