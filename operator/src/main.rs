use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{Pod, Service},
};
use kube::{
    Api, Client,
    runtime::{Controller, watcher},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use jupyter_operator::{
    backoff,
    crd::{JupyterGateway, JupyterKernel, JupyterNotebook},
    event::Ctx,
    gateway, kernel, notebook,
};

#[tokio::main]
async fn main() -> Result<(), kube::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let client = Client::try_default().await?;
    let ctx = Arc::new(Ctx::new(client.clone()));

    let gateways = Controller::new(
        Api::<JupyterGateway>::all(client.clone()),
        watcher::Config::default(),
    )
    .owns(Api::<Deployment>::all(client.clone()), watcher::Config::default())
    .owns(Api::<Service>::all(client.clone()), watcher::Config::default())
    .shutdown_on_signal()
    .run(gateway::reconcile, backoff::error_policy, ctx.clone())
    .for_each(|result| async move {
        match result {
            Ok(obj) => info!("reconciled {:?}", obj),
            Err(error) => warn!(%error, "gateway reconcile failed"),
        }
    });

    let kernels = Controller::new(
        Api::<JupyterKernel>::all(client.clone()),
        watcher::Config::default(),
    )
    .owns(Api::<Pod>::all(client.clone()), watcher::Config::default())
    .shutdown_on_signal()
    .run(kernel::reconcile, backoff::error_policy, ctx.clone())
    .for_each(|result| async move {
        match result {
            Ok(obj) => info!("reconciled {:?}", obj),
            Err(error) => warn!(%error, "kernel reconcile failed"),
        }
    });

    let notebooks = Controller::new(
        Api::<JupyterNotebook>::all(client.clone()),
        watcher::Config::default(),
    )
    .owns(Api::<Deployment>::all(client.clone()), watcher::Config::default())
    .shutdown_on_signal()
    .run(notebook::reconcile, backoff::error_policy, ctx.clone())
    .for_each(|result| async move {
        match result {
            Ok(obj) => info!("reconciled {:?}", obj),
            Err(error) => warn!(%error, "notebook reconcile failed"),
        }
    });

    tokio::join!(gateways, kernels, notebooks);
    info!("controllers terminated");

    Ok(())
}
