//! Error types shared across the operator

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A counterpart published relation data that fails structural validation
    #[error("Invalid data on relation {relation}: {reason}")]
    RelationDataInvalid { relation: String, reason: String },

    /// A required credential is not yet present in the secret vault
    #[error("Credential unavailable: {0}")]
    CredentialUnavailable(String),

    /// The router process did not reach a healthy state after a config apply
    #[error("Failed to apply router configuration: {0}")]
    ProcessApplyFailed(String),

    /// Leadership was lost between planning and executing a leader-only write
    #[error("Leadership lost before completing: {0}")]
    LeadershipLost(String),

    /// An issued certificate failed validation against our key or CA
    #[error("Certificate invalid: {0}")]
    CertificateInvalid(String),

    /// A model hook tool invocation failed
    #[error("Hook tool {tool} failed: {reason}")]
    HookToolFailed { tool: String, reason: String },

    /// The requested workload version cannot be reached from the running one
    #[error("Incompatible upgrade: {0}")]
    UpgradeIncompatible(String),

    /// Operator configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Filesystem error rendering workload files
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl Error {
    /// Whether the failure is transient and worth retrying on a short timer,
    /// as opposed to waiting for new relation data or operator intervention.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::ProcessApplyFailed(_) | Error::HookToolFailed { .. } | Error::IoError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_failures_are_retriable() {
        let err = Error::ProcessApplyFailed("health check timed out".to_string());
        assert!(err.is_retriable());
    }

    #[test]
    fn test_relation_data_errors_wait_for_new_data() {
        let err = Error::RelationDataInvalid {
            relation: "cluster".to_string(),
            reason: "missing replica set name".to_string(),
        };
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_leadership_loss_is_not_retried_in_place() {
        let err = Error::LeadershipLost("credential publication".to_string());
        assert!(!err.is_retriable());
    }
}
