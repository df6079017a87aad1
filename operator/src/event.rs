use kube::runtime::events::{Event, EventType};
use kube::{Client, Resource};
use kube_runtime::events::{Recorder, Reporter};

use crate::backoff::RetryCounts;
use crate::cull::Cullers;
use crate::error::Error;
use crate::generate::GeneratorConfig;
use crate::metrics::Metrics;

/// Shared by all controllers and the per-gateway cullers.
pub struct Ctx {
    pub client: Client,
    pub recorder: Recorder,
    pub config: GeneratorConfig,
    pub metrics: Metrics,
    pub retries: RetryCounts,
    pub cullers: Cullers,
}

impl Ctx {
    pub fn new(client: Client) -> Ctx {
        let recorder = Recorder::new(client.clone(), make_reporter());
        Ctx {
            client,
            recorder,
            config: GeneratorConfig::default(),
            metrics: Metrics::new(),
            retries: RetryCounts::new(),
            cullers: Cullers::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    NoOp,
    Created,
    Updated,
}

pub fn make_reporter() -> Reporter {
    Reporter {
        controller: "jupyter-operator".into(),
        instance: std::env::var("HOSTNAME").ok(),
    }
}

pub async fn emit_event<K>(
    ctx: &Ctx,
    obj: &K,
    reason: &str,
    note: &str,
    event_type: EventType,
) -> Result<(), Error>
where
    K: Resource<DynamicType = ()> + std::fmt::Debug,
{
    ctx.recorder
        .publish(
            &Event {
                type_: event_type,
                reason: reason.into(),
                note: Some(note.into()),
                action: reason.into(),
                secondary: None,
            },
            &obj.object_ref(&()),
        )
        .await?;

    Ok(())
}

/// Runs `op`, publishing a Normal event when it created or updated something
/// and a Warning carrying the error text when it failed.
pub async fn with_event<K>(
    ctx: &Ctx,
    obj: &K,
    success_reason: &str,
    success_msg: &str,
    fail_reason: &str,
    op: impl std::future::Future<Output = Result<Outcome, Error>>,
) -> Result<Outcome, Error>
where
    K: Resource<DynamicType = ()> + std::fmt::Debug,
{
    match op.await {
        Ok(outcome) => {
            match outcome {
                Outcome::Created | Outcome::Updated => {
                    let _ = emit_event(ctx, obj, success_reason, success_msg, EventType::Normal).await;
                }
                Outcome::NoOp => {}
            }
            Ok(outcome)
        }
        Err(e) => {
            let _ = emit_event(ctx, obj, fail_reason, &e.to_string(), EventType::Warning).await;
            Err(e)
        }
    }
}
