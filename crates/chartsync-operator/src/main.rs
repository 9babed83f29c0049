//! chartsync - converge ReleaseRequest resources into chart releases

use chartsync_kube::{
    HelmCliEngine, KubeRecordStore, Reconciler, ReconcilerConfig, ReleaseRequest, controller,
};
use chartsync_repo::{CacheConfig, ChartResolver, GitFetcher};
use clap::{Args, Parser, Subcommand};
use kube::{Client, CustomResourceExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod error;
mod exit_codes;

use error::OperatorError;

#[derive(Parser)]
#[command(name = "chartsync")]
#[command(version)]
#[command(about = "Kubernetes controller converging ReleaseRequest resources into chart releases", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "CHARTSYNC_LOG_JSON")]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller
    Run(RunArgs),

    /// Print the ReleaseRequest CustomResourceDefinition as YAML
    Crd,
}

#[derive(Args)]
struct RunArgs {
    /// Chart cache root (defaults to a directory under the system temp dir)
    #[arg(long, env = "CHARTS_DIR")]
    charts_dir: Option<PathBuf>,

    /// Only watch this namespace (defaults to all namespaces)
    #[arg(short, long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Deadline for one reconciliation, in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 300)]
    reconcile_timeout: u64,

    /// Requeue delay after a successful reconciliation, in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 600)]
    resync_interval: u64,

    /// Requeue delay after a transient failure, in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 30)]
    retry_interval: u64,

    /// Path to the helm binary
    #[arg(long, env = "HELM_BIN", default_value = "helm")]
    helm_binary: PathBuf,

    /// Path to the git binary
    #[arg(long, env = "GIT_BIN", default_value = "git")]
    git_binary: PathBuf,

    /// Remove cached charts when the controller stops
    #[arg(long)]
    purge_cache_on_exit: bool,
}

impl RunArgs {
    fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            deadline: Duration::from_secs(self.reconcile_timeout),
            resync_interval: Duration::from_secs(self.resync_interval),
            retry_interval: Duration::from_secs(self.retry_interval),
        }
    }

    fn watch_namespace(&self) -> Option<String> {
        self.namespace
            .as_deref()
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
            .map(String::from)
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(args: RunArgs) -> Result<(), OperatorError> {
    let resolver = ChartResolver::new(&CacheConfig::new(args.charts_dir.clone()))?
        .with_git(GitFetcher::new(&args.git_binary));
    info!(root = %resolver.cache().root().display(), "chart cache ready");
    let purge = args.purge_cache_on_exit.then(|| resolver.cache().clone());

    let client = Client::try_default()
        .await
        .map_err(|e| OperatorError::Client {
            message: e.to_string(),
        })?;

    let engine = HelmCliEngine::new(client.clone(), &args.helm_binary);
    let reconciler = Reconciler::new(
        Arc::new(KubeRecordStore::new(client.clone())),
        Arc::new(resolver),
        Arc::new(engine),
        args.reconciler_config(),
    );

    let result = controller::run(client, args.watch_namespace(), Arc::new(reconciler)).await;

    if let Some(cache) = purge {
        match cache.purge() {
            Ok(()) => info!(root = %cache.root().display(), "chart cache purged"),
            Err(e) => warn!(error = %e, "failed to purge chart cache"),
        }
    }

    result.map_err(Into::into)
}

fn print_crd() -> Result<(), OperatorError> {
    print!("{}", serde_yaml::to_string(&ReleaseRequest::crd())?);
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let result = match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Crd => print_crd(),
    };

    if let Err(err) = result {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["chartsync", "run"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.reconciler_config(), ReconcilerConfig::default());
        assert_eq!(args.helm_binary, PathBuf::from("helm"));
        assert!(!args.purge_cache_on_exit);
    }

    #[test]
    fn test_blank_namespace_watches_all() {
        let cli = Cli::try_parse_from(["chartsync", "run", "--namespace", " "]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.watch_namespace(), None);

        let cli = Cli::try_parse_from(["chartsync", "run", "-n", "web"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.watch_namespace().as_deref(), Some("web"));
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
