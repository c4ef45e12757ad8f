//! The managed router process behind a narrow apply/health/stop contract.

pub mod recording;
pub mod snap;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{DesiredConfig, ProcessState};

pub use recording::RecordingProcess;
pub use snap::SnapMongos;

/// Control surface for the local router process. `apply` must be idempotent
/// for an unchanged config: re-applying may not cause a visible outage.
#[async_trait]
pub trait ProcessController: Send + Sync {
    /// Render `config` to disk and make the running process match it.
    /// Fails if the process does not come back healthy.
    async fn apply(&self, config: &DesiredConfig) -> Result<ProcessState>;

    /// Observe the process without touching it.
    async fn health_check(&self) -> Result<ProcessState>;

    /// Stop the process and clear cluster-derived configuration from disk.
    async fn stop(&self) -> Result<()>;
}
