use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use kube_client::{
    client::ClientBuilder,
    config::{KubeConfigOptions, Kubeconfig},
    Api, Client, Config as KubeConfig,
};
use statefulset_initializer::{
    config::{affinity, Config},
    initializer::Initializer,
    resource::StatefulSet,
    runner, subscriber,
    supervisor::{self, CancellableTask, ShutdownSignal},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = Config::parse();

    let client = client(&config).await?;
    let term = affinity::load_affinity_term(client.clone(), &config.namespace, &config.configmap)
        .await
        .with_context(|| {
            format!(
                "loading affinity term from configmap {}/{}",
                config.namespace, config.configmap
            )
        })?;

    let shutdown = ShutdownSignal::install().context("installing signal handlers")?;

    let initializer = Initializer::new(&config, Arc::new(term), client.clone());
    let api = Api::<StatefulSet>::all(client);
    let retry_delay = config.retry_delay;
    let subscription = subscriber::subscribe(
        move || subscriber::objects(api.clone(), retry_delay),
        config.resync_period,
    );
    log::info!(
        "watching statefulsets pending initializer {}",
        config.initializer_name
    );
    let task = CancellableTask::spawn(move |cancel| async move {
        runner::run(subscription, &initializer, cancel).await
    });

    if let Some(result) = supervisor::supervise(task, shutdown.recv()).await {
        result.context("initializer stopped")?;
    }
    Ok(())
}

async fn client(config: &Config) -> anyhow::Result<Client> {
    let kube_config = match &config.kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("reading kubeconfig {}", path.display()))?;
            KubeConfig::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
        }
        None => KubeConfig::infer().await?,
    };
    let client = ClientBuilder::try_from(kube_config)
        .context("building cluster client")?
        .with_layer(&subscriber::include_uninitialized_layer::<StatefulSet>())
        .build();
    Ok(client)
}
