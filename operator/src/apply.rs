use std::fmt::Debug;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, ContainerPort, Pod, Service};
use kube::Api;
use kube::api::{Patch, PatchParams};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::info;

use crate::error::Error;
use crate::event::Outcome;

/// Field manager for server-side apply; the API server tracks which fields
/// this controller owns and rejects conflicting writers.
pub const FIELD_MANAGER: &str = "jupyter-operator";

pub async fn ensure_deployment(api: &Api<Deployment>, desired: Deployment) -> Result<Outcome, Error> {
    let name = name_of(&desired.metadata)?;
    match api.get_opt(&name).await? {
        None => {
            api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&desired))
                .await?;
            info!(%name, "created Deployment");
            Ok(Outcome::Created)
        }
        Some(live) if deployment_needs_apply(&live, &desired) => {
            api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&desired))
                .await?;
            info!(%name, "updated Deployment");
            Ok(Outcome::Updated)
        }
        Some(_) => Ok(Outcome::NoOp),
    }
}

pub async fn ensure_service(api: &Api<Service>, desired: Service) -> Result<Outcome, Error> {
    let name = name_of(&desired.metadata)?;
    match api.get_opt(&name).await? {
        None => {
            api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&desired))
                .await?;
            info!(%name, "created Service");
            Ok(Outcome::Created)
        }
        Some(live) if service_needs_apply(&live, &desired) => {
            api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&desired))
                .await?;
            info!(%name, "updated Service");
            Ok(Outcome::Updated)
        }
        Some(_) => Ok(Outcome::NoOp),
    }
}

pub async fn ensure_pod(api: &Api<Pod>, desired: Pod) -> Result<Outcome, Error> {
    let name = name_of(&desired.metadata)?;
    match api.get_opt(&name).await? {
        None => {
            api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&desired))
                .await?;
            info!(%name, "created Pod");
            Ok(Outcome::Created)
        }
        // pod spec is immutable after admission
        Some(_) => Ok(Outcome::NoOp),
    }
}

pub async fn update_status<K, S>(api: &Api<K>, name: &str, status: &S) -> Result<(), Error>
where
    K: Clone + DeserializeOwned + Debug,
    S: Serialize,
{
    api.patch_status(
        name,
        &PatchParams::default(),
        &Patch::Merge(&json!({ "status": status })),
    )
    .await?;
    Ok(())
}

/// Compares only the fields this controller generates; everything the API
/// server or other writers manage is left alone.
fn deployment_needs_apply(live: &Deployment, desired: &Deployment) -> bool {
    if live.metadata.labels != desired.metadata.labels {
        return true;
    }
    let (Some(live_spec), Some(desired_spec)) = (live.spec.as_ref(), desired.spec.as_ref()) else {
        return true;
    };
    if desired_spec.replicas.is_some() && live_spec.replicas != desired_spec.replicas {
        return true;
    }
    let live_labels = live_spec.template.metadata.as_ref().and_then(|m| m.labels.as_ref());
    let desired_labels = desired_spec.template.metadata.as_ref().and_then(|m| m.labels.as_ref());
    if live_labels != desired_labels {
        return true;
    }
    let live_containers = live_spec.template.spec.as_ref().map(|s| s.containers.as_slice());
    let desired_containers = desired_spec.template.spec.as_ref().map(|s| s.containers.as_slice());
    match (live_containers, desired_containers) {
        (Some(live), Some(desired)) => containers_changed(live, desired),
        (live, desired) => live.is_some() != desired.is_some(),
    }
}

fn service_needs_apply(live: &Service, desired: &Service) -> bool {
    if live.metadata.labels != desired.metadata.labels {
        return true;
    }
    let (Some(live_spec), Some(desired_spec)) = (live.spec.as_ref(), desired.spec.as_ref()) else {
        return true;
    };
    if live_spec.selector != desired_spec.selector {
        return true;
    }
    let live_ports: Vec<_> = live_spec
        .ports
        .iter()
        .flatten()
        .map(|p| (p.name.clone(), p.port, p.target_port.clone()))
        .collect();
    let desired_ports: Vec<_> = desired_spec
        .ports
        .iter()
        .flatten()
        .map(|p| (p.name.clone(), p.port, p.target_port.clone()))
        .collect();
    live_ports != desired_ports
}

fn containers_changed(live: &[Container], desired: &[Container]) -> bool {
    if live.len() != desired.len() {
        return true;
    }
    live.iter().zip(desired).any(|(live, desired)| {
        live.name != desired.name
            || live.image != desired.image
            || live.command != desired.command
            || live.args != desired.args
            || live.env != desired.env
            || live.resources != desired.resources
            || ports_changed(live.ports.as_deref(), desired.ports.as_deref())
    })
}

// the API server defaults protocol and host fields, so only compare what we set
fn ports_changed(live: Option<&[ContainerPort]>, desired: Option<&[ContainerPort]>) -> bool {
    let key = |ports: Option<&[ContainerPort]>| -> Vec<(Option<String>, i32)> {
        ports
            .unwrap_or_default()
            .iter()
            .map(|p| (p.name.clone(), p.container_port))
            .collect()
    };
    key(live) != key(desired)
}

fn name_of(meta: &kube::api::ObjectMeta) -> Result<String, Error> {
    meta.name
        .clone()
        .ok_or(Error::MissingObjectKey("metadata.name"))
}
