//! Cluster-state error types.

use thiserror::Error;

pub type Result<T, E = ClusterError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    #[error("no such index [{index}]")]
    IndexNotFound { index: String },

    #[error("alias [{alias}] has more than one write index: {indices:?}")]
    AmbiguousWriteTarget { alias: String, indices: Vec<String> },
}
