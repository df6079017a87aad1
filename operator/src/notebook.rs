use std::{sync::Arc, time::Duration};

use k8s_openapi::api::apps::v1::Deployment;
use kube::{Api, Resource, ResourceExt};
use kube_runtime::{controller::Action, events::EventType};
use tracing::info;

use crate::{
    apply,
    crd::{JupyterGateway, JupyterNotebook},
    error::Error,
    event::{Ctx, emit_event, with_event},
    generate,
};

pub async fn reconcile(nb: Arc<JupyterNotebook>, ctx: Arc<Ctx>) -> Result<Action, Error> {
    let ns = nb.namespace().unwrap_or_else(|| "default".into());
    let name = nb.name_any();
    let key = format!("{ns}/{name}");
    info!(%ns, %name, "reconciling JupyterNotebook");

    if nb.meta().deletion_timestamp.is_some() {
        // the deployment goes away with the owner reference
        ctx.retries.reset(&key);
        return Ok(Action::await_change());
    }

    if let Some(reference) = &nb.spec.gateway {
        let gateway_name = reference
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::InvalidSpec("gateway reference is missing a name".into()))?;
        let gateway_ns = reference
            .namespace
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&ns);
        let gateways: Api<JupyterGateway> = Api::namespaced(ctx.client.clone(), gateway_ns);
        if gateways.get_opt(gateway_name).await?.is_none() {
            let note = format!("JupyterGateway {gateway_ns}/{gateway_name} was not found");
            emit_event(&ctx, &*nb, "GatewayMissing", &note, EventType::Warning).await?;
            return Err(Error::DependencyUnresolved {
                kind: "JupyterGateway",
                namespace: gateway_ns.to_string(),
                name: gateway_name.to_string(),
            });
        }
    }

    let deployment_api: Api<Deployment> = Api::namespaced(ctx.client.clone(), &ns);
    let desired = generate::notebook_deployment(&ctx.config, &nb)?;
    with_event(
        &ctx,
        &*nb,
        "NotebookDeployment",
        "notebook deployment applied",
        "NotebookDeploymentFailed",
        apply::ensure_deployment(&deployment_api, desired),
    )
    .await?;

    ctx.retries.reset(&key);
    ctx.metrics.reconciliations.with_label_values(&["notebook"]).inc();
    Ok(Action::requeue(Duration::from_secs(300)))
}
