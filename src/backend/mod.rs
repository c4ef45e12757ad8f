//! Access to the surrounding platform model.
//!
//! The reconciliation core never talks to the platform directly; it reads a
//! [`ModelSnapshot`] assembled here and emits actions that are executed back
//! through the [`ModelBackend`] trait. Two implementations exist: one backed
//! by the platform's hook tools, and an in-memory one for tests and offline
//! replay.

pub mod hooktool;
pub mod memory;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::warn;

use crate::error::Result;
use crate::model::credential::ALL_SECRET_LABELS;
use crate::model::{
    DataBag, ModelSnapshot, RelationId, RelationName, RelationView, UnitIdentity, UnitStatus,
};
use crate::process::ProcessController;

pub use hooktool::HookToolBackend;
pub use memory::MemoryBackend;

/// Which local view a write targets. Application-level writes are
/// leader-only; the backend rejects them otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalBag {
    App,
    Unit,
}

/// Scoped model access with the ownership rules of the relation store:
/// reads everywhere, writes only into our own views.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn unit_identity(&self) -> Result<UnitIdentity>;

    async fn is_leader(&self) -> Result<bool>;

    async fn relation_ids(&self, relation: RelationName) -> Result<Vec<RelationId>>;

    async fn remote_app(&self, relation: RelationId) -> Result<String>;

    async fn remote_units(&self, relation: RelationId) -> Result<Vec<String>>;

    async fn read_local_app(&self, relation: RelationId) -> Result<DataBag>;

    async fn read_local_unit(&self, relation: RelationId) -> Result<DataBag>;

    async fn read_remote_app(&self, relation: RelationId) -> Result<DataBag>;

    async fn read_remote_unit(&self, relation: RelationId, unit: &str) -> Result<DataBag>;

    async fn write_local(
        &self,
        relation: RelationId,
        bag: LocalBag,
        entries: &[(String, String)],
    ) -> Result<()>;

    async fn delete_local(
        &self,
        relation: RelationId,
        bag: LocalBag,
        keys: &[String],
    ) -> Result<()>;

    async fn secret_get(&self, label: &str) -> Result<Option<String>>;

    async fn secret_set(&self, label: &str, value: &str) -> Result<()>;

    async fn secret_grant(&self, label: &str, relation: RelationId) -> Result<()>;

    async fn secret_remove(&self, label: &str) -> Result<()>;

    async fn open_port(&self, port: u16) -> Result<()>;

    async fn close_port(&self, port: u16) -> Result<()>;

    async fn set_status(&self, status: &UnitStatus) -> Result<()>;
}

/// Read one relation instance in full.
async fn load_relation(backend: &dyn ModelBackend, id: RelationId) -> Result<RelationView> {
    let remote_app = backend.remote_app(id).await?;
    let unit_names = backend.remote_units(id).await?;

    let unit_bags = try_join_all(
        unit_names
            .iter()
            .map(|unit| backend.read_remote_unit(id, unit)),
    )
    .await?;

    Ok(RelationView {
        id,
        remote_app,
        local_app: backend.read_local_app(id).await?,
        local_unit: backend.read_local_unit(id).await?,
        remote_app_data: backend.read_remote_app(id).await?,
        remote_units: unit_names.into_iter().zip(unit_bags).collect(),
    })
}

async fn load_singleton(
    backend: &dyn ModelBackend,
    relation: RelationName,
) -> Result<Option<RelationView>> {
    let mut ids = backend.relation_ids(relation).await?;
    ids.sort();
    if ids.len() > 1 {
        warn!(
            relation = %relation,
            count = ids.len(),
            "multiple relations on a single-capacity endpoint, using the oldest"
        );
    }
    match ids.first() {
        Some(&id) => Ok(Some(load_relation(backend, id).await?)),
        None => Ok(None),
    }
}

/// Assemble the consistent view one reconciliation pass runs against.
pub async fn load_snapshot(
    backend: &dyn ModelBackend,
    process: &dyn ProcessController,
) -> Result<ModelSnapshot> {
    let unit = backend.unit_identity().await?;
    let is_leader = backend.is_leader().await?;

    let cluster = load_singleton(backend, RelationName::Cluster).await?;
    let peers = load_singleton(backend, RelationName::RouterPeers).await?;
    let certificates = load_singleton(backend, RelationName::Certificates).await?;

    let mut proxy_ids = backend.relation_ids(RelationName::MongosProxy).await?;
    proxy_ids.sort();
    let proxies = try_join_all(proxy_ids.into_iter().map(|id| load_relation(backend, id))).await?;

    let mut secrets = std::collections::BTreeMap::new();
    for label in ALL_SECRET_LABELS {
        if let Some(value) = backend.secret_get(label).await? {
            secrets.insert(label.to_string(), value);
        }
    }

    Ok(ModelSnapshot {
        unit,
        is_leader,
        now: chrono::Utc::now(),
        cluster,
        peers,
        proxies,
        certificates,
        secrets,
        process: process.health_check().await?,
    })
}
