//! A consistent per-event view of everything the planner reads.
//!
//! The snapshot is assembled once at the start of an event-handling pass.
//! Planning is then a pure function over it: no further reads happen while
//! actions are being computed, so an interleaved write from a counterpart
//! can never produce a half-old, half-new decision.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Platform-assigned identifier of one relation instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationId(pub u32);

impl std::fmt::Display for RelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One side's key/value payload on a relation.
pub type DataBag = BTreeMap<String, String>;

/// Who this unit is, as seen by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitIdentity {
    pub app: String,
    /// Full unit name, e.g. `mongos/0`.
    pub unit: String,
    /// Address reachable by counterparts on the same network space.
    pub private_address: String,
}

/// Both sides of a single relation instance, read at snapshot time.
/// Local views are the ones this unit may write back to; remote views are
/// read-only by ownership rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationView {
    pub id: RelationId,
    pub remote_app: String,
    pub local_app: DataBag,
    pub local_unit: DataBag,
    pub remote_app_data: DataBag,
    pub remote_units: BTreeMap<String, DataBag>,
}

impl RelationView {
    pub fn new(id: RelationId, remote_app: impl Into<String>) -> Self {
        Self {
            id,
            remote_app: remote_app.into(),
            ..Default::default()
        }
    }

    pub fn remote_value(&self, key: &str) -> Option<&str> {
        self.remote_app_data.get(key).map(String::as_str)
    }

    pub fn local_app_value(&self, key: &str) -> Option<&str> {
        self.local_app.get(key).map(String::as_str)
    }

    pub fn local_unit_value(&self, key: &str) -> Option<&str> {
        self.local_unit.get(key).map(String::as_str)
    }
}

/// Observed status of the managed router process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Degraded,
}

impl ProcessState {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running)
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Degraded => "degraded",
        };
        f.write_str(s)
    }
}

/// Everything one reconciliation pass gets to see.
#[derive(Debug, Clone)]
pub struct ModelSnapshot {
    pub unit: UnitIdentity,
    pub is_leader: bool,
    /// Wall clock at snapshot time, used for certificate expiry decisions.
    pub now: DateTime<Utc>,
    pub cluster: Option<RelationView>,
    pub peers: Option<RelationView>,
    /// Client-proxy relations; the declared capacity is one but the platform
    /// will happily hand us more, so we carry them all and pick a winner.
    pub proxies: Vec<RelationView>,
    pub certificates: Option<RelationView>,
    /// Vault entries visible to this unit, label to value.
    pub secrets: BTreeMap<String, String>,
    pub process: ProcessState,
}

impl ModelSnapshot {
    /// A bare snapshot for a unit with no relations and a stopped process.
    pub fn for_unit(app: &str, unit: &str, address: &str) -> Self {
        Self {
            unit: UnitIdentity {
                app: app.to_string(),
                unit: unit.to_string(),
                private_address: address.to_string(),
            },
            is_leader: false,
            now: Utc::now(),
            cluster: None,
            peers: None,
            proxies: Vec::new(),
            certificates: None,
            secrets: BTreeMap::new(),
            process: ProcessState::Stopped,
        }
    }

    pub fn secret(&self, label: &str) -> Option<&str> {
        self.secrets.get(label).map(String::as_str)
    }
}
