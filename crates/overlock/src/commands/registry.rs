//! Registry commands
//!
//! Local registry lifecycle (create, delete) and image operations (load,
//! tags) against the local registry or a remote one.

use crate::cli::{
    RegistryCommands, RegistryCreateArgs, RegistryDeleteArgs, RegistryLoadArgs, RegistryTagsArgs,
    RemoteArgs,
};
use crate::output;
use anyhow::{Context, Result};
use camino::Utf8Path;
use overlock_cluster::{
    load_remote, BootstrapReconciler, CertManager, ChartInstaller, ClusterHandle, HelmCli,
    ImageLoader, KubeCluster, KyvernoPolicies, LoadRequest, LocalRegistryTransport, TunnelTarget,
};
use overlock_core::{Credentials, RegistryEndpoint, RegistrySettings};
use overlock_image::{ImageProfile, ImageReference, OciRegistryClient, RegistryProtocol};
use std::sync::Arc;
use tracing::debug;

/// Run a registry subcommand
pub async fn run(
    cmd: RegistryCommands,
    config: Option<&Utf8Path>,
    context: Option<&str>,
) -> Result<()> {
    let settings =
        RegistrySettings::load(config).context("Failed to load registry settings")?;

    match cmd {
        RegistryCommands::Create(args) => create(args, settings, context).await,
        RegistryCommands::Delete(args) => delete(args, settings, context).await,
        RegistryCommands::Load(args) => load(args, settings, context).await,
        RegistryCommands::Tags(args) => tags(args, settings, context).await,
    }
}

/// Cluster-side collaborators of the local registry
struct LocalStack {
    reconciler: Arc<BootstrapReconciler>,
    transport: LocalRegistryTransport,
    protocol: Arc<dyn RegistryProtocol>,
}

impl LocalStack {
    async fn connect(settings: RegistrySettings, context: Option<&str>) -> Result<Self> {
        let cluster: Arc<dyn ClusterHandle> = Arc::new(
            KubeCluster::connect(context)
                .await
                .context("Failed to connect to the cluster")?,
        );

        let helm = HelmCli::new().with_context(context.map(str::to_string));
        if !helm.check_installed() {
            output::warning("helm not found in PATH; cert-manager and Kyverno cannot be installed");
        }
        let charts: Arc<dyn ChartInstaller> = Arc::new(helm);

        let issuer = CertManager::new(cluster.clone(), charts.clone(), settings.clone());
        let policies = KyvernoPolicies::new(
            cluster.clone(),
            charts,
            settings.policy_controller.clone(),
        );

        let protocol: Arc<dyn RegistryProtocol> =
            Arc::new(OciRegistryClient::new().context("Failed to build registry client")?);
        let transport = LocalRegistryTransport::new(
            cluster.clone(),
            protocol.clone(),
            TunnelTarget::registry(&settings),
        );
        let reconciler = Arc::new(BootstrapReconciler::new(
            cluster,
            Arc::new(issuer),
            Arc::new(policies),
            settings,
        ));

        Ok(Self {
            reconciler,
            transport,
            protocol,
        })
    }

    fn endpoint(&self, context: Option<&str>) -> RegistryEndpoint {
        RegistryEndpoint::local(self.reconciler.settings())
            .with_default(true)
            .with_context(context.map(str::to_string))
    }

    fn loader(&self) -> ImageLoader {
        ImageLoader::new(
            self.reconciler.clone(),
            self.transport.clone(),
            self.protocol.clone(),
        )
    }
}

fn remote_endpoint(remote: &RemoteArgs) -> Option<RegistryEndpoint> {
    let address = remote.registry.as_ref()?;
    let mut endpoint = RegistryEndpoint::remote(address.as_str(), address.as_str());
    if let Some(username) = &remote.username {
        endpoint = endpoint.with_credentials(Credentials::new(
            username.as_str(),
            remote.password.clone().unwrap_or_default(),
        ));
    }
    Some(endpoint)
}

/// Create the local registry
async fn create(
    args: RegistryCreateArgs,
    settings: RegistrySettings,
    context: Option<&str>,
) -> Result<()> {
    let stack = LocalStack::connect(settings, context).await?;
    let endpoint = stack.endpoint(context);

    let pb = output::spinner("Creating local registry...");
    let result = stack.reconciler.ensure_local_registry(&endpoint).await;
    pb.finish_and_clear();
    result.context("Failed to create local registry")?;

    let settings = stack.reconciler.settings();
    if args.json {
        let summary = serde_json::json!({
            "name": endpoint.name,
            "serverAddress": endpoint.server_address,
            "namespace": settings.namespace,
            "nodePort": settings.node_port,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        output::success(&format!("Local registry '{}' is ready", endpoint.name));
        output::kv("Namespace", &settings.namespace);
        output::kv("Address", &endpoint.server_address);
        output::kv("Pull prefix", &format!("localhost:{}", settings.node_port));
    }
    Ok(())
}

/// Delete the local registry
async fn delete(
    _args: RegistryDeleteArgs,
    settings: RegistrySettings,
    context: Option<&str>,
) -> Result<()> {
    let stack = LocalStack::connect(settings, context).await?;

    stack
        .reconciler
        .delete_local_registry()
        .await
        .context("Failed to delete local registry")?;

    output::success("Local registry deleted");
    Ok(())
}

/// Load an archive into the local or a remote registry
async fn load(
    args: RegistryLoadArgs,
    settings: RegistrySettings,
    context: Option<&str>,
) -> Result<()> {
    let request = LoadRequest {
        archive: args.archive.clone().into_std_path_buf(),
        image: args.image.clone(),
        upgrade: args.upgrade,
        profile: if args.helm {
            ImageProfile::HelmChart
        } else {
            ImageProfile::Generic
        },
    };

    let result = match remote_endpoint(&args.remote) {
        Some(endpoint) => {
            let protocol = OciRegistryClient::new().context("Failed to build registry client")?;
            debug!("Loading {} into registry '{}'", args.archive, endpoint.name);
            let pb = output::spinner(&format!("Loading {}...", args.image));
            let result = load_remote(&protocol, &endpoint, &request).await;
            pb.finish_and_clear();
            result
        }
        None => {
            let stack = LocalStack::connect(settings, context).await?;
            let endpoint = stack.endpoint(context);
            debug!("Loading {} into registry '{}'", args.archive, endpoint.name);
            let pb = output::spinner(&format!("Loading {}...", args.image));
            let result = stack.loader().load(&endpoint, &request).await;
            pb.finish_and_clear();
            result
        }
    };
    let image = result.with_context(|| format!("Failed to load {}", args.archive))?;

    output::success(&format!("Loaded {} ({})", image, request.profile));
    Ok(())
}

/// List tags of a repository
async fn tags(
    args: RegistryTagsArgs,
    settings: RegistrySettings,
    context: Option<&str>,
) -> Result<()> {
    let mut tags = match remote_endpoint(&args.remote) {
        Some(endpoint) => {
            let protocol = OciRegistryClient::new().context("Failed to build registry client")?;
            let reference =
                ImageReference::parse(&args.repository)?.with_registry(endpoint.server_address);
            protocol
                .list_tags(&reference, endpoint.credentials.as_ref())
                .await
        }
        None => {
            let stack = LocalStack::connect(settings, context).await?;
            stack.transport.list_tags_via_tunnel(&args.repository).await
        }
    }
    .with_context(|| format!("Failed to list tags of {}", args.repository))?;

    tags.sort();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&tags)?);
    } else if tags.is_empty() {
        output::info(&format!("No tags found for {}", args.repository));
    } else {
        for tag in &tags {
            println!("{}", tag);
        }
    }
    Ok(())
}
