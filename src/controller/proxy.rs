//! Client-proxy exposure.
//!
//! Client applications relate to ask for routed access. Each one publishes
//! what it wants (database name, roles, whether it needs an external
//! address); we answer on our side of the relation with readiness and
//! connection details. The declared capacity is a single client, but the
//! platform will accept extra relations, so selection is deterministic:
//! the lowest relation id wins and the rest put the unit into blocked.

use crate::controller::cluster::{DATABASE_KEY, EXTERNAL_CONNECTIVITY_KEY, USER_ROLES_KEY};
use crate::model::credential::Credential;
use crate::model::{AuthMode, ModelSnapshot, RelationId, UnitStatus};

// Key each router unit maintains in its own peer databag.
pub const ADDRESS_KEY: &str = "address";

// Keys we publish on the proxy relation for the winning client.
pub const READY_KEY: &str = "ready";
pub const PUBLISH_ADDRESS_KEY: &str = "address";
pub const PORT_KEY: &str = "port";
pub const PUBLISH_AUTH_MODE_KEY: &str = "auth-mode";
pub const TLS_KEY: &str = "tls";
pub const USERNAME_KEY: &str = "username";
pub const PUBLISH_DATABASE_KEY: &str = "database";
pub const URIS_KEY: &str = "uris";
pub const SECRET_USER_KEY: &str = "secret-user";

/// Everything a related client application asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    pub relation: RelationId,
    pub remote_app: String,
    pub database: String,
    pub roles: String,
    pub external: bool,
}

/// All usable client requests, lowest relation id first. Relations whose
/// counterpart has not published a database name yet are not requests.
pub fn client_requests(snapshot: &ModelSnapshot) -> Vec<ClientRequest> {
    let mut requests: Vec<ClientRequest> = snapshot
        .proxies
        .iter()
        .filter_map(|relation| {
            let database = relation.remote_value(DATABASE_KEY)?;
            Some(ClientRequest {
                relation: relation.id,
                remote_app: relation.remote_app.clone(),
                database: database.to_string(),
                roles: relation
                    .remote_value(USER_ROLES_KEY)
                    .unwrap_or("default")
                    .to_string(),
                external: relation.remote_value(EXTERNAL_CONNECTIVITY_KEY) == Some("true"),
            })
        })
        .collect();
    requests.sort_by_key(|r| r.relation);
    requests
}

/// The request this unit serves, if any.
pub fn winning_request(snapshot: &ModelSnapshot) -> Option<ClientRequest> {
    client_requests(snapshot).into_iter().next()
}

/// Blocked status when more than one client application has related.
pub fn over_capacity(snapshot: &ModelSnapshot) -> Option<UnitStatus> {
    let requests = client_requests(snapshot);
    if requests.len() <= 1 {
        return None;
    }
    let extras: Vec<String> = requests[1..]
        .iter()
        .map(|r| r.remote_app.clone())
        .collect();
    Some(UnitStatus::blocked(format!(
        "Router serves a single client application; remove extra relations: {}.",
        extras.join(", ")
    )))
}

/// Addresses of every router unit, this one included, sorted and deduped
/// so the published URI is stable across units and passes.
pub fn router_addresses(snapshot: &ModelSnapshot) -> Vec<String> {
    let mut addresses = vec![snapshot.unit.private_address.clone()];
    if let Some(peers) = snapshot.peers.as_ref() {
        for bag in peers.remote_units.values() {
            if let Some(address) = bag.get(ADDRESS_KEY) {
                addresses.push(address.clone());
            }
        }
    }
    addresses.sort();
    addresses.dedup();
    addresses
}

/// Connection string covering every router unit. Carries the username only;
/// the password stays in the vault and travels by secret reference.
pub fn connection_uri(
    username: &str,
    addresses: &[String],
    port: u16,
    database: &str,
    tls: bool,
) -> String {
    let hosts: Vec<String> = addresses
        .iter()
        .map(|a| format!("{}:{}", a, port))
        .collect();
    let mut uri = format!("mongodb://{}@{}/{}", username, hosts.join(","), database);
    if tls {
        uri.push_str("?tls=true");
    }
    uri
}

/// Username issued to the client on this relation. Scoping the name to the
/// relation id means revocation is simply the relation going away.
pub fn client_username(relation: RelationId) -> String {
    format!("relation-{}", relation)
}

/// Entries published to the winning client when the router is serving.
/// The password itself never crosses the relation; the client is granted
/// the vault entry named under `secret-user`.
pub fn exposure_entries(
    snapshot: &ModelSnapshot,
    request: &ClientRequest,
    port: u16,
    auth_mode: AuthMode,
    tls: bool,
    credential: &Credential,
) -> Vec<(String, String)> {
    let addresses = router_addresses(snapshot);
    let username = client_username(request.relation);
    let uris = connection_uri(&username, &addresses, port, &request.database, tls);
    vec![
        (READY_KEY.to_string(), "true".to_string()),
        (
            PUBLISH_ADDRESS_KEY.to_string(),
            snapshot.unit.private_address.clone(),
        ),
        (PORT_KEY.to_string(), port.to_string()),
        (PUBLISH_AUTH_MODE_KEY.to_string(), auth_mode.to_string()),
        (TLS_KEY.to_string(), tls.to_string()),
        (USERNAME_KEY.to_string(), username),
        (PUBLISH_DATABASE_KEY.to_string(), request.database.clone()),
        (URIS_KEY.to_string(), uris),
        (
            SECRET_USER_KEY.to_string(),
            credential.secret_label.clone(),
        ),
    ]
}

/// Keys removed when readiness is withdrawn, so a consumer can never read
/// stale connection data next to `ready: false`.
pub fn withdrawal_keys() -> Vec<String> {
    [
        PUBLISH_ADDRESS_KEY,
        PORT_KEY,
        PUBLISH_AUTH_MODE_KEY,
        TLS_KEY,
        USERNAME_KEY,
        PUBLISH_DATABASE_KEY,
        URIS_KEY,
        SECRET_USER_KEY,
    ]
    .iter()
    .map(|k| k.to_string())
    .collect()
}
