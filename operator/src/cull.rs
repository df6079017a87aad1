use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, ListParams, ResourceExt};
use kube::Resource;
use kube::runtime::events::EventType;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::apply;
use crate::conditions;
use crate::crd::{JupyterGatewaySpec, JupyterKernel, LABEL_GATEWAY, LAST_ACTIVITY_ANNOTATION};
use crate::error::Error;
use crate::event::{Ctx, emit_event};

pub const DEFAULT_CULL_INTERVAL: i32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CullPolicy {
    pub idle_timeout: i32,
    pub interval: i32,
}

impl CullPolicy {
    /// None when the gateway has no usable timeout; culling is then disabled.
    pub fn from_gateway(spec: &JupyterGatewaySpec) -> Option<CullPolicy> {
        let idle_timeout = spec.cull_idle_timeout.filter(|t| *t > 0)?;
        let interval = spec
            .cull_interval
            .filter(|i| *i > 0)
            .unwrap_or(DEFAULT_CULL_INTERVAL);
        Some(CullPolicy { idle_timeout, interval })
    }
}

struct CullTask {
    policy: CullPolicy,
    handle: JoinHandle<()>,
}

/// One culler task per gateway, keyed by `namespace/name`.
#[derive(Default)]
pub struct Cullers {
    tasks: Mutex<HashMap<String, CullTask>>,
}

impl Cullers {
    pub fn new() -> Self {
        Cullers::default()
    }

    /// Brings the gateway's culler in line with its spec: spawns when a
    /// policy appears, respawns when it changes, aborts when it goes away.
    pub fn sync<F>(&self, key: &str, policy: Option<CullPolicy>, spawn: F)
    where
        F: FnOnce(CullPolicy) -> JoinHandle<()>,
    {
        let mut tasks = self.tasks.lock().unwrap();
        match policy {
            None => {
                if let Some(task) = tasks.remove(key) {
                    task.handle.abort();
                    info!(%key, "stopped idle culler");
                }
            }
            Some(policy) => {
                if let Some(task) = tasks.get(key) {
                    if task.policy == policy {
                        return;
                    }
                }
                if let Some(task) = tasks.remove(key) {
                    task.handle.abort();
                }
                tasks.insert(key.to_string(), CullTask { policy, handle: spawn(policy) });
                info!(%key, timeout = policy.idle_timeout, interval = policy.interval, "started idle culler");
            }
        }
    }

    pub fn stop(&self, key: &str) {
        if let Some(task) = self.tasks.lock().unwrap().remove(key) {
            task.handle.abort();
            info!(%key, "stopped idle culler");
        }
    }
}

/// Scans the gateway's kernels forever on the configured interval. Aborted
/// by the registry when the gateway changes or goes away.
pub async fn run_gateway_culler(ctx: Arc<Ctx>, ns: String, gateway: String, policy: CullPolicy) {
    let mut tick = tokio::time::interval(Duration::from_secs(policy.interval as u64));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        match cull_idle_kernels(&ctx, &ns, &gateway, policy.idle_timeout).await {
            Ok(0) => {}
            Ok(culled) => info!(%ns, %gateway, culled, "culled idle kernels"),
            Err(error) => warn!(%ns, %gateway, %error, "idle cull pass failed"),
        }
    }
}

/// One cull pass. A failure on one kernel never blocks its siblings; the
/// next tick retries whatever is still overdue.
pub async fn cull_idle_kernels(
    ctx: &Ctx,
    ns: &str,
    gateway: &str,
    idle_timeout: i32,
) -> Result<usize, Error> {
    let api: Api<JupyterKernel> = Api::namespaced(ctx.client.clone(), ns);
    let selector = format!("{LABEL_GATEWAY}={gateway}");
    let kernels = api.list(&ListParams::default().labels(&selector)).await?;
    let now = Utc::now();

    let mut culled = 0;
    for kernel in kernels.items.iter().filter(|k| should_cull(k, now, idle_timeout)) {
        match cull_kernel(ctx, &api, kernel, now).await {
            Ok(()) => culled += 1,
            Err(error) => {
                warn!(%ns, %gateway, kernel = %kernel.name_any(), %error, "failed to cull kernel");
            }
        }
    }
    Ok(culled)
}

/// Strictly greater than the timeout; a kernel idle for exactly the timeout
/// survives until the next tick.
pub fn should_cull(kernel: &JupyterKernel, now: DateTime<Utc>, idle_timeout: i32) -> bool {
    if kernel.meta().deletion_timestamp.is_some() {
        return false;
    }
    let conds = kernel
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or(&[]);
    if conditions::is_terminal(conds) {
        return false;
    }
    match last_activity(kernel) {
        Some(last) => now.signed_duration_since(last) > chrono::Duration::seconds(i64::from(idle_timeout)),
        None => false,
    }
}

/// The gateway runtime stamps served requests on the kernel; a kernel that
/// never served one idles from its start time.
pub fn last_activity(kernel: &JupyterKernel) -> Option<DateTime<Utc>> {
    kernel
        .annotations()
        .get(LAST_ACTIVITY_ANNOTATION)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|t| t.with_timezone(&Utc))
        .or_else(|| {
            kernel
                .status
                .as_ref()
                .and_then(|s| s.start_time.as_ref())
                .map(|t| t.0)
        })
}

async fn cull_kernel(
    ctx: &Ctx,
    api: &Api<JupyterKernel>,
    kernel: &JupyterKernel,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    let name = kernel.name_any();
    let now = Time(now);
    let mut status = kernel.status.clone().unwrap_or_default();
    conditions::set_lifecycle(
        &mut status.conditions,
        conditions::CULLED,
        "IdleTimeoutExceeded",
        "kernel was idle beyond the gateway timeout",
        &now,
    );
    if status.completion_time.is_none() {
        status.completion_time = Some(now);
    }
    apply::update_status(api, &name, &status).await?;
    ctx.metrics.kernels_culled.inc();
    emit_event(
        ctx,
        kernel,
        "Culled",
        "kernel was idle beyond the gateway timeout",
        EventType::Normal,
    )
    .await?;
    Ok(())
}
