use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kube::ResourceExt;
use kube_runtime::controller::Action;
use rand::Rng;
use tracing::warn;

use crate::error::Error;
use crate::event::Ctx;

const BASE_SECS: u64 = 1;
const MAX_SECS: u64 = 300;
const JITTER_MS: u64 = 500;
pub const MAX_RETRIES: u32 = 6;

/// Consecutive failure counts per resource, reset on a clean pass.
#[derive(Default)]
pub struct RetryCounts {
    attempts: Mutex<HashMap<String, u32>>,
}

impl RetryCounts {
    pub fn new() -> Self {
        RetryCounts::default()
    }

    pub fn next_attempt(&self, key: &str) -> u32 {
        let mut attempts = self.attempts.lock().unwrap();
        let count = attempts.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn reset(&self, key: &str) {
        self.attempts.lock().unwrap().remove(key);
    }
}

/// Exponential from the attempt number, capped, plus caller-chosen jitter.
pub fn backoff_duration(attempt: u32, jitter_ms: u64) -> Duration {
    let shift = attempt.saturating_sub(1).min(32);
    let secs = BASE_SECS.saturating_mul(1u64 << shift).min(MAX_SECS);
    Duration::from_secs(secs) + Duration::from_millis(jitter_ms)
}

/// Shared error policy for all controllers. Invalid specs park until the
/// next change; everything else retries with capped jittered backoff until
/// the retry budget runs out.
pub fn error_policy<K: ResourceExt>(obj: Arc<K>, error: &Error, ctx: Arc<Ctx>) -> Action {
    let key = format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any());
    ctx.metrics.reconcile_failures.inc();

    if matches!(error, Error::InvalidSpec(_)) {
        warn!(%key, %error, "spec rejected, waiting for the next change");
        ctx.retries.reset(&key);
        return Action::await_change();
    }

    let attempt = ctx.retries.next_attempt(&key);
    if attempt > MAX_RETRIES {
        warn!(%key, attempt, %error, "retries exhausted, waiting for the next change");
        ctx.retries.reset(&key);
        return Action::await_change();
    }

    let jitter = rand::rng().random_range(0..JITTER_MS);
    let delay = backoff_duration(attempt, jitter);
    warn!(%key, attempt, ?delay, %error, "reconcile failed, backing off");
    Action::requeue(delay)
}
