use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use etcd_cluster_migrator::{
    project, HostLayout, JobCommandRunner, KubeNodeInventory, KubeRunApi, Migrator,
    MigratorConfig, RemoteRunConfig, TokioSleeper,
};
use kube::Client;
use migrator_etcd::{EtcdConfigBuilder, EtcdMembershipClient};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "etcd-cluster-migrator")]
#[command(about = "Migrates a 1 node etcd to a 3 node etcd cluster for HA masters")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Base domain of the etcd peer names (etcdN.<base domain>)
    #[arg(long, env = "BASE_DOMAIN", default_value = "")]
    base_domain: String,

    /// Registry of the image running host commands
    #[arg(long, env = "DOCKER_REGISTRY", default_value = "quay.io")]
    docker_registry: String,

    /// etcd client CA
    #[arg(
        long,
        env = "ETCD_CA_FILE",
        default_value = "/etc/kubernetes/ssl/etcd/server-ca.pem"
    )]
    etcd_ca_file: String,

    /// etcd client certificate
    #[arg(
        long,
        env = "ETCD_CRT_FILE",
        default_value = "/etc/kubernetes/ssl/etcd/server-crt.pem"
    )]
    etcd_crt_file: String,

    /// etcd client key
    #[arg(
        long,
        env = "ETCD_KEY_FILE",
        default_value = "/etc/kubernetes/ssl/etcd/server-key.pem"
    )]
    etcd_key_file: String,

    /// etcd client endpoint
    #[arg(
        long,
        env = "ETCD_ENDPOINT",
        default_value = "127.0.0.1:2379"
    )]
    etcd_endpoint: String,

    /// Index of the first etcd member name
    #[arg(long, env = "ETCD_STARTING_INDEX", default_value_t = 1)]
    etcd_starting_index: u32,

    /// Label selector matching the master nodes
    #[arg(
        long,
        env = "MASTER_NODE_LABEL",
        default_value = "role=master"
    )]
    master_node_label: String,

    /// Node label holding each master's ordinal
    #[arg(
        long,
        env = "MASTER_ID_LABEL",
        default_value = "giantswarm.io/master-id"
    )]
    master_id_label: String,

    /// systemd unit running etcd on the masters
    #[arg(long, env = "ETCD_SERVICE", default_value = "etcd3")]
    etcd_service: String,

    /// Unit file carrying the etcd command line
    #[arg(
        long,
        env = "ETCD_UNIT_FILE",
        default_value = "/etc/systemd/system/etcd3.service"
    )]
    etcd_unit_file: String,

    /// etcd data directory on the masters
    #[arg(long, env = "ETCD_DATA_DIR", default_value = "/var/lib/etcd")]
    etcd_data_dir: String,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Command {
    /// Print the build identity and exit
    Version,
}

impl Args {
    fn migrator_config(&self) -> MigratorConfig {
        MigratorConfig {
            base_domain: self.base_domain.clone(),
            etcd_starting_index: self.etcd_starting_index,
            master_node_label: self.master_node_label.clone(),
            master_id_label: self.master_id_label.clone(),
            host: HostLayout {
                service: self.etcd_service.clone(),
                unit_file: self.etcd_unit_file.clone(),
                data_dir: self.etcd_data_dir.clone(),
            },
            ..Default::default()
        }
    }

    fn remote_run_config(&self) -> RemoteRunConfig {
        RemoteRunConfig {
            docker_registry: self.docker_registry.clone(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(Command::Version) = args.command {
        println!("{}", project::build_identity());
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log level")?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    info!("Starting {}", project::build_identity());

    let config = args.migrator_config();
    config.validate().context("invalid migrator configuration")?;
    let run_config = args.remote_run_config();
    run_config
        .validate()
        .context("invalid remote run configuration")?;

    let etcd_config = EtcdConfigBuilder::new()
        .endpoint(&args.etcd_endpoint)
        .tls_files(&args.etcd_ca_file, &args.etcd_crt_file, &args.etcd_key_file)
        .build()
        .context("invalid etcd configuration")?;
    let membership = EtcdMembershipClient::connect(&etcd_config)
        .await
        .with_context(|| format!("failed to connect to etcd at {}", args.etcd_endpoint))?;

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let sleeper = Arc::new(TokioSleeper);
    let runner = JobCommandRunner::new(
        Arc::new(KubeRunApi::new(client.clone(), &run_config.namespace)),
        sleeper.clone(),
        run_config,
    );

    let migrator = Migrator::new(
        config,
        Arc::new(KubeNodeInventory::new(client)),
        Arc::new(membership),
        Arc::new(runner),
        sleeper,
    )?;

    let report = migrator.run().await.context("etcd cluster migration failed")?;
    info!(
        "Finished in phase {:?} after {} actions, {} etcd members",
        report.phase,
        report.executed.len(),
        report.members.len()
    );

    Ok(())
}
