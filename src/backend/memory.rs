//! In-memory [`ModelBackend`] used by tests and by offline event replay.
//!
//! Behaves like the platform store as far as the core can observe: writes
//! into application bags require leadership, reads are always allowed, and
//! relation data survives across passes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::backend::{LocalBag, ModelBackend};
use crate::error::{Error, Result};
use crate::model::{DataBag, RelationId, RelationName, UnitIdentity, UnitStatus};

#[derive(Debug, Clone)]
pub struct StoredRelation {
    pub name: RelationName,
    pub remote_app: String,
    pub local_app: DataBag,
    pub local_unit: DataBag,
    pub remote_app_data: DataBag,
    pub remote_units: BTreeMap<String, DataBag>,
}

struct State {
    unit: UnitIdentity,
    leader: bool,
    next_relation: u32,
    relations: BTreeMap<u32, StoredRelation>,
    secrets: BTreeMap<String, String>,
    grants: BTreeMap<String, BTreeSet<u32>>,
    open_ports: BTreeSet<u16>,
    status: Option<UnitStatus>,
}

pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new(app: &str, unit: &str, address: &str) -> Self {
        Self {
            state: Mutex::new(State {
                unit: UnitIdentity {
                    app: app.to_string(),
                    unit: unit.to_string(),
                    private_address: address.to_string(),
                },
                leader: false,
                next_relation: 0,
                relations: BTreeMap::new(),
                secrets: BTreeMap::new(),
                grants: BTreeMap::new(),
                open_ports: BTreeSet::new(),
                status: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── harness controls ────────────────────────────────────────────────

    pub fn set_leader(&self, leader: bool) {
        self.state().leader = leader;
    }

    pub fn add_relation(&self, name: RelationName, remote_app: &str) -> RelationId {
        let mut state = self.state();
        let id = state.next_relation;
        state.next_relation += 1;
        state.relations.insert(
            id,
            StoredRelation {
                name,
                remote_app: remote_app.to_string(),
                local_app: DataBag::new(),
                local_unit: DataBag::new(),
                remote_app_data: DataBag::new(),
                remote_units: BTreeMap::new(),
            },
        );
        RelationId(id)
    }

    pub fn remove_relation(&self, id: RelationId) {
        self.state().relations.remove(&id.0);
    }

    pub fn put_remote_app_data(&self, id: RelationId, entries: &[(&str, &str)]) {
        if let Some(rel) = self.state().relations.get_mut(&id.0) {
            for (k, v) in entries {
                rel.remote_app_data.insert(k.to_string(), v.to_string());
            }
        }
    }

    pub fn clear_remote_app_key(&self, id: RelationId, key: &str) {
        if let Some(rel) = self.state().relations.get_mut(&id.0) {
            rel.remote_app_data.remove(key);
        }
    }

    pub fn put_remote_unit(&self, id: RelationId, unit: &str, entries: &[(&str, &str)]) {
        if let Some(rel) = self.state().relations.get_mut(&id.0) {
            let bag = rel.remote_units.entry(unit.to_string()).or_default();
            for (k, v) in entries {
                bag.insert(k.to_string(), v.to_string());
            }
        }
    }

    pub fn insert_secret(&self, label: &str, value: &str) {
        self.state().secrets.insert(label.to_string(), value.to_string());
    }

    // ── harness inspection ──────────────────────────────────────────────

    pub fn relation(&self, id: RelationId) -> Option<StoredRelation> {
        self.state().relations.get(&id.0).cloned()
    }

    pub fn secret(&self, label: &str) -> Option<String> {
        self.state().secrets.get(label).cloned()
    }

    pub fn granted(&self, label: &str) -> BTreeSet<u32> {
        self.state().grants.get(label).cloned().unwrap_or_default()
    }

    pub fn open_ports(&self) -> BTreeSet<u16> {
        self.state().open_ports.clone()
    }

    pub fn status(&self) -> Option<UnitStatus> {
        self.state().status.clone()
    }
}

fn unknown_relation(id: RelationId) -> Error {
    Error::ConfigError(format!("unknown relation {}", id))
}

#[async_trait]
impl ModelBackend for MemoryBackend {
    async fn unit_identity(&self) -> Result<UnitIdentity> {
        Ok(self.state().unit.clone())
    }

    async fn is_leader(&self) -> Result<bool> {
        Ok(self.state().leader)
    }

    async fn relation_ids(&self, relation: RelationName) -> Result<Vec<RelationId>> {
        Ok(self
            .state()
            .relations
            .iter()
            .filter(|(_, rel)| rel.name == relation)
            .map(|(id, _)| RelationId(*id))
            .collect())
    }

    async fn remote_app(&self, relation: RelationId) -> Result<String> {
        let state = self.state();
        let rel = state
            .relations
            .get(&relation.0)
            .ok_or_else(|| unknown_relation(relation))?;
        Ok(rel.remote_app.clone())
    }

    async fn remote_units(&self, relation: RelationId) -> Result<Vec<String>> {
        let state = self.state();
        let rel = state
            .relations
            .get(&relation.0)
            .ok_or_else(|| unknown_relation(relation))?;
        Ok(rel.remote_units.keys().cloned().collect())
    }

    async fn read_local_app(&self, relation: RelationId) -> Result<DataBag> {
        let state = self.state();
        let rel = state
            .relations
            .get(&relation.0)
            .ok_or_else(|| unknown_relation(relation))?;
        Ok(rel.local_app.clone())
    }

    async fn read_local_unit(&self, relation: RelationId) -> Result<DataBag> {
        let state = self.state();
        let rel = state
            .relations
            .get(&relation.0)
            .ok_or_else(|| unknown_relation(relation))?;
        Ok(rel.local_unit.clone())
    }

    async fn read_remote_app(&self, relation: RelationId) -> Result<DataBag> {
        let state = self.state();
        let rel = state
            .relations
            .get(&relation.0)
            .ok_or_else(|| unknown_relation(relation))?;
        Ok(rel.remote_app_data.clone())
    }

    async fn read_remote_unit(&self, relation: RelationId, unit: &str) -> Result<DataBag> {
        let state = self.state();
        let rel = state
            .relations
            .get(&relation.0)
            .ok_or_else(|| unknown_relation(relation))?;
        Ok(rel.remote_units.get(unit).cloned().unwrap_or_default())
    }

    async fn write_local(
        &self,
        relation: RelationId,
        bag: LocalBag,
        entries: &[(String, String)],
    ) -> Result<()> {
        let mut state = self.state();
        if bag == LocalBag::App && !state.leader {
            return Err(Error::LeadershipLost(
                "application databag write".to_string(),
            ));
        }
        let rel = state
            .relations
            .get_mut(&relation.0)
            .ok_or_else(|| unknown_relation(relation))?;
        let target = match bag {
            LocalBag::App => &mut rel.local_app,
            LocalBag::Unit => &mut rel.local_unit,
        };
        for (k, v) in entries {
            target.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    async fn delete_local(
        &self,
        relation: RelationId,
        bag: LocalBag,
        keys: &[String],
    ) -> Result<()> {
        let mut state = self.state();
        if bag == LocalBag::App && !state.leader {
            return Err(Error::LeadershipLost(
                "application databag delete".to_string(),
            ));
        }
        let rel = state
            .relations
            .get_mut(&relation.0)
            .ok_or_else(|| unknown_relation(relation))?;
        let target = match bag {
            LocalBag::App => &mut rel.local_app,
            LocalBag::Unit => &mut rel.local_unit,
        };
        for key in keys {
            target.remove(key);
        }
        Ok(())
    }

    async fn secret_get(&self, label: &str) -> Result<Option<String>> {
        Ok(self.state().secrets.get(label).cloned())
    }

    async fn secret_set(&self, label: &str, value: &str) -> Result<()> {
        self.state()
            .secrets
            .insert(label.to_string(), value.to_string());
        Ok(())
    }

    async fn secret_grant(&self, label: &str, relation: RelationId) -> Result<()> {
        let mut state = self.state();
        if !state.secrets.contains_key(label) {
            return Err(Error::CredentialUnavailable(format!(
                "no vault entry labelled {}",
                label
            )));
        }
        state
            .grants
            .entry(label.to_string())
            .or_default()
            .insert(relation.0);
        Ok(())
    }

    async fn secret_remove(&self, label: &str) -> Result<()> {
        let mut state = self.state();
        state.secrets.remove(label);
        state.grants.remove(label);
        Ok(())
    }

    async fn open_port(&self, port: u16) -> Result<()> {
        self.state().open_ports.insert(port);
        Ok(())
    }

    async fn close_port(&self, port: u16) -> Result<()> {
        self.state().open_ports.remove(&port);
        Ok(())
    }

    async fn set_status(&self, status: &UnitStatus) -> Result<()> {
        self.state().status = Some(status.clone());
        Ok(())
    }
}
