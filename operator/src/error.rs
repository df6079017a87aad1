use kube::Error as KubeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] KubeError),

    /// Malformed spec. Not retried; the resource waits for its next change.
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /// A referenced object does not exist yet. Retried with backoff.
    #[error("{kind} {namespace}/{name} not found")]
    DependencyUnresolved {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("missing object key: {0}")]
    MissingObjectKey(&'static str),
}
