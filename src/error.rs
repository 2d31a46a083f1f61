//! Error taxonomy for the controller.
//!
//! See §7 of the design: transient API errors are retried by the caller via
//! re-enqueue and never reach this type; only non-recoverable conditions are
//! represented here.

use kube::runtime::finalizer;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("finalizer error: {0}")]
    Finalizer(#[from] Box<finalizer::Error<Error>>),

    #[error("object {0} has no namespace")]
    MissingNamespace(String),

    #[error("object {0} is missing an owner selector")]
    MissingSelector(String),

    #[error("hash collision retry budget exhausted for revision of {0}")]
    CollisionRetryExhausted(String),

    #[error("migration of {0} cannot proceed: {1}")]
    Migration(String, String),

    #[error("{0} is not a valid advanced statefulset update strategy")]
    UnknownUpdateStrategy(String),
}

impl From<finalizer::Error<Error>> for Error {
    fn from(e: finalizer::Error<Error>) -> Self {
        Error::Finalizer(Box::new(e))
    }
}

/// True if `err` is a Kubernetes 404, the "treat as success" case for
/// deletes and the "attempt adoption" case for already-exists on create.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

/// True if `err` is a Kubernetes 409 Conflict.
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409)
}

/// True if `err` is a 409 AlreadyExists (as opposed to a resourceVersion
/// conflict, which is also a 409 but carries a different reason).
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.reason == "AlreadyExists")
}

/// True if the namespace that owns the object we're mutating is terminating.
/// Matches `apierrors.HasStatusCause(err, v1.NamespaceTerminatingCause)` in
/// the upstream Go controller.
pub fn is_namespace_terminating(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.reason == "NamespaceTerminating")
}
