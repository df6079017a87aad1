use std::{sync::Arc, time::Duration};

use k8s_openapi::api::{apps::v1::Deployment, core::v1::Service};
use kube::{Api, ResourceExt, core::object::HasSpec};
use kube_runtime::{controller::Action, events::EventType};
use tracing::info;

use crate::{
    apply,
    crd::{JupyterGateway, JupyterGatewaySpec, JupyterGatewayStatus},
    cull::{self, CullPolicy},
    error::Error,
    event::{Ctx, emit_event, with_event},
    finalizer, generate,
};

pub async fn reconcile(gw: Arc<JupyterGateway>, ctx: Arc<Ctx>) -> Result<Action, Error> {
    let ns = gw.namespace().unwrap_or_else(|| "default".into());
    let name = gw.name_any();
    let key = format!("{ns}/{name}");
    info!(%ns, %name, "reconciling JupyterGateway");

    let api: Api<JupyterGateway> = Api::namespaced(ctx.client.clone(), &ns);

    if finalizer::is_deleting(&*gw) {
        // owned objects are garbage collected; only the culler needs stopping
        ctx.cullers.stop(&key);
        finalizer::remove_finalizer(&api, &*gw, finalizer::FINALIZER).await?;
        ctx.retries.reset(&key);
        return Ok(Action::await_change());
    }
    finalizer::ensure_finalizer_present(&api, &*gw, finalizer::FINALIZER).await?;

    if let Err(error) = validate(gw.spec()) {
        emit_event(&ctx, &*gw, "InvalidSpec", &error.to_string(), EventType::Warning).await?;
        return Err(error);
    }

    let deployment_api: Api<Deployment> = Api::namespaced(ctx.client.clone(), &ns);
    let desired = generate::gateway_deployment(&ctx.config, &gw)?;
    with_event(
        &ctx,
        &*gw,
        "GatewayDeployment",
        "gateway deployment applied",
        "GatewayDeploymentFailed",
        apply::ensure_deployment(&deployment_api, desired),
    )
    .await?;

    let service_api: Api<Service> = Api::namespaced(ctx.client.clone(), &ns);
    let desired = generate::gateway_service(&ctx.config, &gw)?;
    with_event(
        &ctx,
        &*gw,
        "GatewayService",
        "gateway service applied",
        "GatewayServiceFailed",
        apply::ensure_service(&service_api, desired),
    )
    .await?;

    let deployment_status = deployment_api
        .get_opt(&name)
        .await?
        .and_then(|d| d.status)
        .unwrap_or_default();
    apply::update_status(&api, &name, &JupyterGatewayStatus { deployment_status }).await?;

    ctx.cullers.sync(&key, CullPolicy::from_gateway(gw.spec()), |policy| {
        let ctx = ctx.clone();
        let ns = ns.clone();
        let name = name.clone();
        tokio::spawn(async move { cull::run_gateway_culler(ctx, ns, name, policy).await })
    });

    ctx.retries.reset(&key);
    ctx.metrics.reconciliations.with_label_values(&["gateway"]).inc();
    Ok(Action::requeue(Duration::from_secs(60)))
}

fn validate(spec: &JupyterGatewaySpec) -> Result<(), Error> {
    if let Some(default_kernel) = &spec.default_kernel {
        if !spec.kernels.iter().any(|k| k == default_kernel) {
            return Err(Error::InvalidSpec(format!(
                "default kernel {default_kernel:?} is not in the supported kernel list"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_kernel_must_be_supported() {
        let mut spec = JupyterGatewaySpec {
            kernels: vec!["python3".into(), "ir".into()],
            ..Default::default()
        };
        assert!(validate(&spec).is_ok());

        spec.default_kernel = Some("python3".into());
        assert!(validate(&spec).is_ok());

        spec.default_kernel = Some("julia".into());
        assert!(matches!(validate(&spec), Err(Error::InvalidSpec(_))));
    }
}
