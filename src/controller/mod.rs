//! Event-driven reconciliation of the managed router.
//! This module contains the planner and executor, the cluster-integration
//! state machine, and the credential, TLS, exposure and upgrade lifecycles.

pub mod cluster;
pub mod credentials;
pub mod proxy;
mod reconciler;
pub mod tls;
#[cfg(test)]
mod tls_test;
pub mod upgrade;

pub use cluster::{
    calculate_backoff, ClusterAssessment, ClusterPhase, MAX_APPLY_ATTEMPTS,
};
pub use reconciler::{
    dispatch, execute, plan, recovery_actions, Action, ExecutionReport, Plan, WriteTarget,
    EXTERNAL_CONNECTIVITY_RECORD_KEY, NEGOTIATED_CONFIG_HASH_KEY,
};
pub use tls::{TlsAssessment, DEFAULT_CERT_RENEWAL_THRESHOLD_DAYS};
pub use upgrade::{UnitUpgradeState, UpgradeGate};
