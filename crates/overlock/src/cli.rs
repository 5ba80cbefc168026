//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

/// Overlock - local OCI registry inside your Kubernetes cluster
#[derive(Parser, Debug)]
#[command(name = "overlock")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to overlock.yaml registry settings
    #[arg(short, long, global = true)]
    pub config: Option<Utf8PathBuf>,

    /// Kubeconfig context (default: current context)
    #[arg(long, global = true, env = "OVERLOCK_CONTEXT")]
    pub context: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Local and remote registry operations
    #[command(subcommand)]
    Registry(RegistryCommands),
}

// Registry commands
#[derive(Subcommand, Debug)]
pub enum RegistryCommands {
    /// Create (or repair) the local registry in the cluster
    Create(RegistryCreateArgs),

    /// Delete the local registry deployment and service
    Delete(RegistryDeleteArgs),

    /// Load an archive as an image into a registry
    Load(RegistryLoadArgs),

    /// List the tags of a repository
    Tags(RegistryTagsArgs),
}

/// Remote registry selection shared by `load` and `tags`
#[derive(Args, Debug, Clone)]
pub struct RemoteArgs {
    /// Remote registry address (default: the local registry)
    #[arg(long)]
    pub registry: Option<String>,

    /// Registry username
    #[arg(long, requires = "registry")]
    pub username: Option<String>,

    /// Registry password
    #[arg(long, env = "OVERLOCK_REGISTRY_PASSWORD", hide_env_values = true, requires = "username")]
    pub password: Option<String>,
}

#[derive(Args, Debug)]
pub struct RegistryCreateArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct RegistryDeleteArgs {}

#[derive(Args, Debug)]
pub struct RegistryLoadArgs {
    /// Image archive (tar or tar.gz)
    pub archive: Utf8PathBuf,

    /// Image name and tag, e.g. my-image:1.0
    #[arg(short, long)]
    pub image: String,

    /// Publish the next patch version of the tag
    #[arg(short, long)]
    pub upgrade: bool,

    /// Package the archive as a Helm chart
    #[arg(long)]
    pub helm: bool,

    #[command(flatten)]
    pub remote: RemoteArgs,
}

#[derive(Args, Debug)]
pub struct RegistryTagsArgs {
    /// Repository, e.g. my-image
    pub repository: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub remote: RemoteArgs,
}
