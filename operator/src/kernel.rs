use std::{sync::Arc, time::Duration};

use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Api, Resource, ResourceExt, api::DeleteParams};
use kube_runtime::{controller::Action, events::EventType};
use tracing::info;

use crate::{
    apply, conditions,
    crd::{
        JupyterKernel, JupyterKernelCondition, JupyterKernelSpec, JupyterKernelStatus,
        JupyterKernelTemplate,
    },
    error::Error,
    event::{Ctx, emit_event, with_event},
    generate,
};

pub async fn reconcile(kernel: Arc<JupyterKernel>, ctx: Arc<Ctx>) -> Result<Action, Error> {
    let ns = kernel.namespace().unwrap_or_else(|| "default".into());
    let name = kernel.name_any();
    let key = format!("{ns}/{name}");
    info!(%ns, %name, "reconciling JupyterKernel");

    if kernel.meta().deletion_timestamp.is_some() {
        // the pod goes away with the owner reference
        ctx.retries.reset(&key);
        return Ok(Action::await_change());
    }

    let api: Api<JupyterKernel> = Api::namespaced(ctx.client.clone(), &ns);
    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &ns);
    let now = Time(Utc::now());
    let mut status = kernel.status.clone().unwrap_or_default();

    // terminal kernels only need their pod torn down
    if conditions::is_terminal(&status.conditions) {
        if pods.get_opt(&name).await?.is_some() {
            pods.delete(&name, &DeleteParams::default()).await?;
            emit_event(
                &ctx,
                &*kernel,
                "KernelStopped",
                "kernel pod deleted after reaching a terminal state",
                EventType::Normal,
            )
            .await?;
        }
        if status.completion_time.is_none() {
            status.completion_time = Some(now.clone());
        }
        status.last_reconcile_time = Some(now);
        apply::update_status(&api, &name, &status).await?;
        ctx.retries.reset(&key);
        ctx.metrics.reconciliations.with_label_values(&["kernel"]).inc();
        return Ok(Action::await_change());
    }

    let specs: Api<JupyterKernelSpec> = Api::namespaced(ctx.client.clone(), &ns);
    let Some(catalog) = specs.get_opt(&kernel.spec.kernel_spec).await? else {
        return unresolved(
            &ctx,
            &api,
            &kernel,
            &mut status,
            "JupyterKernelSpec",
            ns.clone(),
            kernel.spec.kernel_spec.clone(),
            now,
        )
        .await;
    };

    let template = match &catalog.spec.template {
        Some(reference) => {
            let template_name = reference
                .name
                .as_deref()
                .filter(|n| !n.is_empty())
                .ok_or_else(|| {
                    Error::InvalidSpec(format!(
                        "kernel spec {} has a template reference without a name",
                        catalog.name_any()
                    ))
                })?;
            let template_ns = reference
                .namespace
                .as_deref()
                .filter(|n| !n.is_empty())
                .unwrap_or(&ns);
            let templates: Api<JupyterKernelTemplate> =
                Api::namespaced(ctx.client.clone(), template_ns);
            match templates.get_opt(template_name).await? {
                Some(template) => Some(template),
                None => {
                    return unresolved(
                        &ctx,
                        &api,
                        &kernel,
                        &mut status,
                        "JupyterKernelTemplate",
                        template_ns.to_string(),
                        template_name.to_string(),
                        now,
                    )
                    .await;
                }
            }
        }
        None => None,
    };

    conditions::record_condition(
        &mut status.conditions,
        JupyterKernelCondition::new(
            conditions::DEPENDENCY_RESOLVED,
            "True",
            "Resolved",
            format!("kernel spec {} resolved", kernel.spec.kernel_spec),
        ),
        &now,
    );

    let desired = generate::kernel_pod(&ctx.config, &kernel, &catalog, template.as_ref())?;
    let applied = with_event(
        &ctx,
        &*kernel,
        "KernelPod",
        "kernel pod applied",
        "KernelPodFailed",
        apply::ensure_pod(&pods, desired),
    )
    .await;
    if let Err(error) = applied {
        conditions::record_condition(
            &mut status.conditions,
            JupyterKernelCondition::new(
                conditions::WORKLOAD_APPLIED,
                "False",
                "ApplyFailed",
                error.to_string(),
            ),
            &now,
        );
        status.last_reconcile_time = Some(now);
        apply::update_status(&api, &name, &status).await?;
        return Err(error);
    }
    conditions::record_condition(
        &mut status.conditions,
        JupyterKernelCondition::new(
            conditions::WORKLOAD_APPLIED,
            "True",
            "Applied",
            "kernel pod matches the desired state",
        ),
        &now,
    );

    let phase = pods
        .get_opt(&name)
        .await?
        .and_then(|p| p.status)
        .and_then(|s| s.phase);
    observe_pod_phase(&mut status, phase.as_deref(), &now);
    status.last_reconcile_time = Some(now);
    apply::update_status(&api, &name, &status).await?;

    ctx.retries.reset(&key);
    ctx.metrics.reconciliations.with_label_values(&["kernel"]).inc();
    Ok(Action::requeue(Duration::from_secs(60)))
}

/// Maps the live pod phase onto the kernel lifecycle and keeps the start and
/// completion stamps consistent with it.
fn observe_pod_phase(status: &mut JupyterKernelStatus, phase: Option<&str>, now: &Time) {
    match phase {
        Some("Running") => {
            if status.start_time.is_none() {
                status.start_time = Some(now.clone());
            }
            conditions::set_lifecycle(
                &mut status.conditions,
                conditions::RUNNING,
                "PodRunning",
                "kernel pod is running",
                now,
            );
        }
        Some("Succeeded") => {
            conditions::set_lifecycle(
                &mut status.conditions,
                conditions::SUCCEEDED,
                "PodSucceeded",
                "kernel pod completed",
                now,
            );
            if status.completion_time.is_none() {
                status.completion_time = Some(now.clone());
            }
        }
        Some("Failed") => {
            conditions::set_lifecycle(
                &mut status.conditions,
                conditions::FAILED,
                "PodFailed",
                "kernel pod failed",
                now,
            );
            if status.completion_time.is_none() {
                status.completion_time = Some(now.clone());
            }
        }
        _ => {
            conditions::set_lifecycle(
                &mut status.conditions,
                conditions::PENDING,
                "PodPending",
                "kernel pod has not started",
                now,
            );
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn unresolved(
    ctx: &Ctx,
    api: &Api<JupyterKernel>,
    kernel: &JupyterKernel,
    status: &mut JupyterKernelStatus,
    kind: &'static str,
    namespace: String,
    name: String,
    now: Time,
) -> Result<Action, Error> {
    let note = format!("{kind} {namespace}/{name} was not found");
    conditions::record_condition(
        &mut status.conditions,
        JupyterKernelCondition::new(
            conditions::DEPENDENCY_RESOLVED,
            "False",
            format!("{kind}NotFound"),
            note.clone(),
        ),
        &now,
    );
    status.last_reconcile_time = Some(now);
    apply::update_status(api, &kernel.name_any(), status).await?;
    emit_event(ctx, kernel, "DependencyMissing", &note, EventType::Warning).await?;
    Err(Error::DependencyUnresolved { kind, namespace, name })
}
