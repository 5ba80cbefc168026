//! Helm chart installation
//!
//! Cluster add-ons (cert-manager, the policy controller) are installed with
//! the `helm` CLI using install-or-upgrade semantics.

use async_trait::async_trait;
use overlock_core::{ChartSettings, Error, Result};
use tokio::process::Command;
use tracing::{debug, info};

/// Installs charts into the cluster
#[async_trait]
pub trait ChartInstaller: Send + Sync {
    /// Whether a release of `chart` is already installed
    async fn release_exists(&self, chart: &ChartSettings) -> Result<bool>;

    /// Install the chart, or upgrade an existing release
    async fn upgrade_install(&self, chart: &ChartSettings) -> Result<()>;
}

/// Install `chart` unless a release of it already exists
pub async fn ensure_release(installer: &dyn ChartInstaller, chart: &ChartSettings) -> Result<()> {
    if installer.release_exists(chart).await? {
        debug!("Release '{}' already installed", chart.release);
        return Ok(());
    }
    installer.upgrade_install(chart).await
}

/// [`ChartInstaller`] running the `helm` binary
#[derive(Debug, Clone, Default)]
pub struct HelmCli {
    /// Custom binary path (defaults to "helm" in PATH)
    binary_path: Option<String>,
    kube_context: Option<String>,
}

impl HelmCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary_path(mut self, path: impl Into<String>) -> Self {
        self.binary_path = Some(path.into());
        self
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.kube_context = context;
        self
    }

    fn helm_cmd(&self) -> String {
        self.binary_path
            .clone()
            .unwrap_or_else(|| "helm".to_string())
    }

    /// Check that the helm binary is on PATH
    pub fn check_installed(&self) -> bool {
        which::which(self.helm_cmd()).is_ok()
    }

    fn status_args(&self, chart: &ChartSettings) -> Vec<String> {
        let mut args = vec![
            "status".to_string(),
            chart.release.clone(),
            "--namespace".to_string(),
            chart.namespace.clone(),
        ];
        self.push_context(&mut args);
        args
    }

    fn install_args(&self, chart: &ChartSettings) -> Vec<String> {
        let mut args: Vec<String> = [
            "upgrade",
            "--install",
            chart.release.as_str(),
            chart.chart.as_str(),
            "--repo",
            chart.repo_url.as_str(),
            "--version",
            chart.version.as_str(),
            "--namespace",
            chart.namespace.as_str(),
            "--create-namespace",
            "--wait",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        for (key, value) in &chart.values {
            args.push("--set".to_string());
            args.push(format!("{}={}", key, value));
        }
        self.push_context(&mut args);
        args
    }

    fn push_context(&self, args: &mut Vec<String>) {
        if let Some(ctx) = &self.kube_context {
            args.push("--kube-context".to_string());
            args.push(ctx.clone());
        }
    }

    fn require_installed(&self, chart: &ChartSettings) -> Result<()> {
        if self.check_installed() {
            Ok(())
        } else {
            Err(Error::chart(
                chart.release.as_str(),
                format!("'{}' not found in PATH", self.helm_cmd()),
            ))
        }
    }
}

#[async_trait]
impl ChartInstaller for HelmCli {
    async fn release_exists(&self, chart: &ChartSettings) -> Result<bool> {
        self.require_installed(chart)?;

        let output = Command::new(self.helm_cmd())
            .args(self.status_args(chart))
            .output()
            .await?;

        Ok(output.status.success())
    }

    async fn upgrade_install(&self, chart: &ChartSettings) -> Result<()> {
        self.require_installed(chart)?;

        info!(
            "Installing {} {} into namespace {}...",
            chart.chart, chart.version, chart.namespace
        );

        let output = Command::new(self.helm_cmd())
            .args(self.install_args(chart))
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::chart(&chart.release, stderr.trim()));
        }

        debug!("Release '{}' installed", chart.release);
        Ok(())
    }
}
