//! Shared credential lifecycle on the peer relation.
//!
//! The leader mints the router password once, parks the value in the vault
//! and publishes only a generation counter plus the vault label to peers.
//! Followers never generate anything; they wait until both the published
//! record and the vault value are visible.

use tracing::warn;

use crate::model::credential::{Credential, ROUTER_PASSWORD_SECRET_LABEL};
use crate::model::{ModelSnapshot, UnitStatus};

// Keys the leader maintains in the peer application databag.
pub const CREDENTIAL_GENERATION_KEY: &str = "credential-generation";
pub const CREDENTIAL_SECRET_KEY: &str = "credential-secret";

/// Outcome of looking at the credential state in a snapshot.
#[derive(Debug, Clone, Default)]
pub struct CredentialAssessment {
    /// Credential record currently published to peers, if parseable.
    pub published: Option<Credential>,
    /// Generation the leader should ensure exists this pass.
    pub ensure_generation: Option<u64>,
    /// True when the vault value backing the record is visible to us.
    pub available: bool,
    /// Status to surface while the credential is not usable yet.
    pub waiting: Option<UnitStatus>,
}

/// Parse the published credential record from the peer app databag.
pub fn published_credential(snapshot: &ModelSnapshot) -> Option<Credential> {
    let peers = snapshot.peers.as_ref()?;
    let generation = peers.local_app_value(CREDENTIAL_GENERATION_KEY)?;
    let secret_label = peers.local_app_value(CREDENTIAL_SECRET_KEY)?;
    match generation.parse() {
        Ok(generation) => Some(Credential {
            generation,
            secret_label: secret_label.to_string(),
        }),
        Err(_) => {
            warn!(generation, "unparseable credential generation on peer relation");
            None
        }
    }
}

/// Decide what, if anything, the credential machinery needs this pass.
/// Only meaningful once the cluster relation exists; a router with nothing
/// to route to needs no client credential.
pub fn evaluate(snapshot: &ModelSnapshot) -> CredentialAssessment {
    let published = published_credential(snapshot);
    let vault_value = snapshot.secret(ROUTER_PASSWORD_SECRET_LABEL);

    if snapshot.cluster.is_none() || snapshot.peers.is_none() {
        return CredentialAssessment {
            published,
            ..Default::default()
        };
    }

    match (&published, vault_value) {
        (Some(_), Some(_)) => CredentialAssessment {
            published,
            ensure_generation: None,
            available: true,
            waiting: None,
        },
        (Some(record), None) => {
            // The record exists but the value is gone or not yet visible.
            // The leader re-mints under a bumped generation so consumers
            // notice the change; followers just wait.
            let ensure = snapshot.is_leader.then(|| record.generation + 1);
            CredentialAssessment {
                published,
                ensure_generation: ensure,
                available: false,
                waiting: Some(UnitStatus::waiting("Waiting for shared credentials.")),
            }
        }
        (None, _) => {
            let ensure = snapshot.is_leader.then_some(1);
            CredentialAssessment {
                published,
                ensure_generation: ensure,
                available: false,
                waiting: Some(UnitStatus::waiting("Waiting for shared credentials.")),
            }
        }
    }
}
