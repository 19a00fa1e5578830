use crate::{
    admission::Admission, backend, config::Reloader, k8s::ClusterNamespaces,
    metrics::AdmissionMetrics,
};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::{path::PathBuf, sync::Arc};
use tokio::time::Duration;
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "anchore-admission-controller",
    about = "Validates workload images against an Anchore image backend"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "anchore=info,warn",
        env = "ANCHORE_ADMISSION_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Path to the controller configuration file.
    #[clap(long, default_value = "/config/config.yaml")]
    config: PathBuf,

    /// Path to the backend credentials file.
    #[clap(long, default_value = "/credentials/credentials.json")]
    credentials: PathBuf,

    /// Base URL of the backend API.
    ///
    /// When unset, images that require analysis or policy checks fail
    /// validation.
    #[clap(long)]
    anchore_endpoint: Option<String>,

    /// One of `auto`, `legacy`, or `v1`.
    #[clap(long, default_value = "auto")]
    anchore_api_version: backend::ApiVersion,

    #[clap(long, default_value = "10000")]
    anchore_timeout_ms: u64,

    /// How often the configuration and credentials files are checked for
    /// changes. Zero disables reloading.
    #[clap(long, default_value = "5")]
    config_reload_interval_secs: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            config,
            credentials,
            anchore_endpoint,
            anchore_api_version,
            anchore_timeout_ms,
            config_reload_interval_secs,
        } = self;

        let mut prom = <Registry>::default();
        let metrics = AdmissionMetrics::register(prom.sub_registry_with_prefix("admission"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(Some(server))
            .build()
            .await?;

        let (snapshot, reloader) = Reloader::load(config, credentials).await?;
        if config_reload_interval_secs > 0 {
            tokio::spawn(
                reloader
                    .run(Duration::from_secs(config_reload_interval_secs))
                    .instrument(info_span!("reload")),
            );
        } else {
            info!("Configuration reloading disabled");
        }

        let backend = match anchore_endpoint {
            Some(endpoint) => Some(
                backend::connect(
                    &endpoint,
                    anchore_api_version,
                    Duration::from_millis(anchore_timeout_ms),
                )
                .await?,
            ),
            None => {
                warn!("No backend endpoint configured; analysis and policy checks will fail");
                None
            }
        };

        let namespaces = Arc::new(ClusterNamespaces::new(runtime.client()));
        let admission = Admission::new(snapshot, backend, namespaces, metrics);
        let runtime = runtime.spawn_server(move || admission.clone());

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
