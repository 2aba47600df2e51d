// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use anyhow::Result;
use astarte_controller::astarte_controller::exec::{ca_source::CfsslInfoClient, credentials::RsaKeyPairGenerator};
use astarte_controller::astarte_controller::trusted::spec_types::Astarte;
use astarte_controller::shim_layer::{
    api_server::{ApiServer, KubeApiServer},
    controller_runtime::{run_controller, ControllerConfig, Data},
    fault_injection::FaultInjectingApiServer,
};
use clap::{Parser, Subcommand};
use kube::{Client, CustomResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "astarte-controller", version, about = "Deploys and manages Astarte clusters")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the Astarte custom resource definition
    Export,
    /// Run the controller
    Run(RunArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Only watch this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,
    /// Seconds between two passes over a reconciled instance
    #[arg(long, env = "ASTARTE_RESYNC_PERIOD", default_value_t = 60)]
    resync_period: u64,
    /// Seconds before retrying a pass that failed with a transient error
    #[arg(long, env = "ASTARTE_ERROR_BACKOFF", default_value_t = 10)]
    error_backoff: u64,
    /// Size of the generated housekeeping keys
    #[arg(long, env = "ASTARTE_RSA_KEY_BITS", default_value_t = 4096)]
    rsa_key_bits: usize,
    /// Timeout of the requests to CFSSL, in seconds
    #[arg(long, env = "ASTARTE_CFSSL_TIMEOUT", default_value_t = 10)]
    cfssl_timeout: u64,
    /// Log in JSON
    #[arg(long, env = "ASTARTE_LOG_JSON")]
    json_logs: bool,
    /// Fail the n-th write to the cluster after applying it (0 disables)
    #[arg(long, env = "ASTARTE_CRASH_AFTER_WRITE", default_value_t = 0)]
    crash_after_write: u64,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Export => {
            println!("{}", serde_yaml::to_string(&Astarte::crd())?);
        }
        Command::Run(args) => {
            init_logging(args.json_logs);
            info!(version = env!("CARGO_PKG_VERSION"), "running astarte-controller");
            let client = Client::try_default().await?;
            let kube_api = KubeApiServer::new(client.clone());
            let api: Arc<dyn ApiServer> = if args.crash_after_write > 0 {
                Arc::new(FaultInjectingApiServer::new(kube_api, args.crash_after_write))
            } else {
                Arc::new(kube_api)
            };
            let config = ControllerConfig {
                resync_period: Duration::from_secs(args.resync_period),
                error_backoff: Duration::from_secs(args.error_backoff),
                ..ControllerConfig::default()
            };
            let data = Data::new(
                api,
                Arc::new(RsaKeyPairGenerator::new(args.rsa_key_bits)),
                Arc::new(CfsslInfoClient::new(Duration::from_secs(args.cfssl_timeout))?),
                config,
            );
            run_controller(client, args.namespace, data).await?;
        }
    }
    Ok(())
}
