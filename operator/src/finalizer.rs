use std::fmt::Debug;

use kube::{
    Api, ResourceExt,
    api::{Patch, PatchParams},
};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::Error;
use crate::event::Outcome;

pub const FINALIZER: &str = "jupyter.jedimindtricks.example/finalizer";

pub fn is_deleting<K: ResourceExt>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

pub fn has_finalizer<K: ResourceExt>(obj: &K, finalizer: &str) -> bool {
    obj.meta()
        .finalizers
        .as_ref()
        .map(|fs| fs.iter().any(|x| x == finalizer))
        .unwrap_or(false)
}

pub async fn ensure_finalizer_present<K>(
    api: &Api<K>,
    obj: &K,
    finalizer: &str,
) -> Result<Outcome, Error>
where
    K: ResourceExt + Clone + DeserializeOwned + Debug,
{
    if has_finalizer(obj, finalizer) {
        return Ok(Outcome::NoOp);
    }

    let mut finalizers = obj.meta().finalizers.clone().unwrap_or_default();
    finalizers.push(finalizer.into());

    let patch = json!({
        "metadata": {"finalizers": finalizers}
    });

    api.patch_metadata(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(Outcome::Created)
}

pub async fn remove_finalizer<K>(api: &Api<K>, obj: &K, finalizer: &str) -> Result<Outcome, Error>
where
    K: ResourceExt + Clone + DeserializeOwned + Debug,
{
    if !has_finalizer(obj, finalizer) {
        return Ok(Outcome::NoOp);
    }

    let mut finalizers = obj.meta().finalizers.clone().unwrap_or_default();
    finalizers.retain(|x| x != finalizer);

    let patch = json!({
        "metadata": {"finalizers": finalizers}
    });

    api.patch_metadata(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(Outcome::Updated)
}
