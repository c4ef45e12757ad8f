//! Planner and executor for one event pass.
//!
//! `plan` is a pure function from an event plus a [`ModelSnapshot`] to an
//! ordered list of actions; `execute` interprets the list against the
//! backend and the process controller. Keeping that split strict means
//! every decision the operator can make is testable without a live model.
//!
//! Two execution rules carry the failure semantics: actions planned after
//! a config apply only run when the apply reached a healthy process
//! (otherwise the executor switches to the recovery tail), and losing
//! leadership mid-plan abandons the remaining actions without an error.

use tracing::{debug, info, warn};

use crate::backend::{load_snapshot, LocalBag, ModelBackend};
use crate::controller::cluster::{
    self, ClusterPhase, CONFIG_LAST_ATTEMPT_KEY, CONFIG_RETRIES_KEY, DATABASE_KEY, USER_ROLES_KEY,
};
use crate::controller::credentials::{self, CREDENTIAL_GENERATION_KEY, CREDENTIAL_SECRET_KEY};
use crate::controller::proxy::{self, ADDRESS_KEY, READY_KEY};
use crate::controller::tls::{self, CSR_KEY};
use crate::controller::upgrade::{
    self, UnitUpgradeState, UpgradeGate, UPGRADE_STATE_KEY, VERSIONS_KEY,
};
use crate::error::{Error, Result};
use crate::model::credential::{
    generate_password, Sensitive, KEYFILE_SECRET_LABEL, ROUTER_PASSWORD_SECRET_LABEL,
    TLS_CA_SECRET_LABEL, TLS_CERT_SECRET_LABEL, TLS_KEY_SECRET_LABEL,
};
use crate::model::{DesiredConfig, Event, ModelSnapshot, RelationId, RelationName, UnitStatus};
use crate::process::ProcessController;
use crate::settings::MONGOS_PORT;

/// Key the leader maintains in the peer app databag with the config hash
/// every unit should converge on.
pub const NEGOTIATED_CONFIG_HASH_KEY: &str = "negotiated-config-hash";
/// Negotiated client-exposure record, also peer app databag.
pub const EXTERNAL_CONNECTIVITY_RECORD_KEY: &str = "external-connectivity";

/// Local relation views an action may write into. Application-level views
/// are leader-owned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTarget {
    PeerUnit,
    PeerApp,
    ClusterApp,
}

/// One step of a plan. Actions carry everything the executor needs, so a
/// plan can be inspected and asserted on as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Leader: mirror the keyfile from the cluster relation into the vault.
    MirrorKeyfile { value: Sensitive },
    /// Leader: make sure the router password exists at this generation.
    EnsureCredential { generation: u64 },
    /// Leader: drop the router password and its peer record.
    RemoveCredential,
    /// Generate (or reuse) the unit key and publish a fresh CSR.
    SubmitCsr,
    /// Persist validated certificate material into the vault.
    StoreTlsMaterial { cert_pem: String, ca_pem: String },
    RemoveSecret { label: String },
    WriteRelation {
        target: WriteTarget,
        entries: Vec<(String, String)>,
    },
    DeleteRelationKeys {
        target: WriteTarget,
        keys: Vec<String>,
    },
    ApplyProcessConfig { config: DesiredConfig },
    /// Record a successful apply in the unit's own peer databag and clear
    /// the retry bookkeeping.
    RecordAppliedConfig { hash: String },
    ClearAppliedConfig,
    StopProcess,
    PublishClientAccess {
        relation: RelationId,
        entries: Vec<(String, String)>,
        grant: Option<String>,
    },
    WithdrawClientAccess { relation: RelationId },
    OpenPort { port: u16 },
    ClosePort { port: u16 },
    SetUnitStatus { status: UnitStatus },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::MirrorKeyfile { .. } => "mirror-keyfile",
            Action::EnsureCredential { .. } => "ensure-credential",
            Action::RemoveCredential => "remove-credential",
            Action::SubmitCsr => "submit-csr",
            Action::StoreTlsMaterial { .. } => "store-tls-material",
            Action::RemoveSecret { .. } => "remove-secret",
            Action::WriteRelation { .. } => "write-relation",
            Action::DeleteRelationKeys { .. } => "delete-relation-keys",
            Action::ApplyProcessConfig { .. } => "apply-process-config",
            Action::RecordAppliedConfig { .. } => "record-applied-config",
            Action::ClearAppliedConfig => "clear-applied-config",
            Action::StopProcess => "stop-process",
            Action::PublishClientAccess { .. } => "publish-client-access",
            Action::WithdrawClientAccess { .. } => "withdraw-client-access",
            Action::OpenPort { .. } => "open-port",
            Action::ClosePort { .. } => "close-port",
            Action::SetUnitStatus { .. } => "set-unit-status",
        }
    }

    /// Whether executing this action requires holding leadership.
    pub fn leader_gated(&self) -> bool {
        match self {
            Action::MirrorKeyfile { .. }
            | Action::EnsureCredential { .. }
            | Action::RemoveCredential
            | Action::PublishClientAccess { .. }
            | Action::WithdrawClientAccess { .. } => true,
            Action::WriteRelation { target, .. } | Action::DeleteRelationKeys { target, .. } => {
                matches!(target, WriteTarget::PeerApp | WriteTarget::ClusterApp)
            }
            _ => false,
        }
    }
}

/// Ordered outcome of planning one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub phase: ClusterPhase,
    pub actions: Vec<Action>,
}

/// What actually happened while running a plan.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub executed: usize,
    pub apply_failed: bool,
    pub lost_leadership: bool,
    /// Last status written, for callers that report upwards.
    pub status: Option<UnitStatus>,
}

/// Compute the ordered actions for one event against one snapshot.
pub fn plan(event: &Event, snapshot: &ModelSnapshot) -> Result<Plan> {
    if event.is_teardown() {
        return Ok(teardown(event, snapshot));
    }
    converge(event, snapshot)
}

fn teardown(event: &Event, snapshot: &ModelSnapshot) -> Plan {
    let mut actions = Vec::new();

    // Withdraw readiness before anything stops, so no consumer observes a
    // ready flag pointing at a dying router.
    if snapshot.is_leader {
        for relation in &snapshot.proxies {
            if relation.local_app_value(READY_KEY).is_some() {
                actions.push(Action::WithdrawClientAccess {
                    relation: relation.id,
                });
            }
        }
    }

    actions.push(Action::StopProcess);
    actions.push(Action::ClearAppliedConfig);

    if snapshot.is_leader && snapshot.secret(KEYFILE_SECRET_LABEL).is_some() {
        actions.push(Action::RemoveSecret {
            label: KEYFILE_SECRET_LABEL.to_string(),
        });
    }

    if matches!(event, Event::Remove) {
        if snapshot.is_leader && credentials::published_credential(snapshot).is_some() {
            actions.push(Action::RemoveCredential);
        }
        for label in [TLS_KEY_SECRET_LABEL, TLS_CERT_SECRET_LABEL, TLS_CA_SECRET_LABEL] {
            if snapshot.secret(label).is_some() {
                actions.push(Action::RemoveSecret {
                    label: label.to_string(),
                });
            }
        }
        actions.push(Action::ClosePort { port: MONGOS_PORT });
    }

    let status = match event {
        Event::RelationBroken {
            relation: RelationName::Cluster,
        } => UnitStatus::blocked("Missing relation to config-server."),
        _ => UnitStatus::maintenance("Router stopped."),
    };
    actions.push(Action::SetUnitStatus { status });

    Plan {
        phase: ClusterPhase::Departing,
        actions,
    }
}

fn converge(event: &Event, snapshot: &ModelSnapshot) -> Result<Plan> {
    let request = proxy::winning_request(snapshot);
    let external = request.as_ref().map(|r| r.external).unwrap_or(false);

    let tls_assessment = tls::evaluate(snapshot);
    let mut assessment = cluster::evaluate(snapshot, tls_assessment.material.as_ref(), external)?;
    let credential_assessment = credentials::evaluate(snapshot);

    if matches!(event, Event::PreUpgradeCheck) {
        if let Err(status) = upgrade::precheck(snapshot) {
            return Ok(Plan {
                phase: assessment.phase,
                actions: vec![Action::SetUnitStatus { status }],
            });
        }
        // Healthy router: fall through so status lands on the full truth.
    }

    // A revision incompatible with the recorded versions never converges.
    if let UpgradeGate::Refuse(status) = upgrade::gate(snapshot) {
        return Ok(Plan {
            phase: assessment.phase,
            actions: vec![Action::SetUnitStatus { status }],
        });
    }

    let mut actions = Vec::new();
    let mut statuses = Vec::new();

    // Own-unit facts on the peer relation.
    if let Some(peers) = &snapshot.peers {
        if peers.local_unit_value(ADDRESS_KEY) != Some(snapshot.unit.private_address.as_str()) {
            actions.push(Action::WriteRelation {
                target: WriteTarget::PeerUnit,
                entries: vec![(
                    ADDRESS_KEY.to_string(),
                    snapshot.unit.private_address.clone(),
                )],
            });
        }

        if matches!(event, Event::UpgradeCharm) {
            let healthy = UnitUpgradeState::Healthy.as_str();
            if peers
                .local_unit_value(UPGRADE_STATE_KEY)
                .is_some_and(|raw| raw != healthy)
            {
                actions.push(Action::WriteRelation {
                    target: WriteTarget::PeerUnit,
                    entries: vec![(UPGRADE_STATE_KEY.to_string(), healthy.to_string())],
                });
            }
            let current = upgrade::current_versions();
            if snapshot.is_leader && upgrade::recorded_versions(snapshot).as_ref() != Some(&current)
            {
                actions.push(Action::WriteRelation {
                    target: WriteTarget::PeerApp,
                    entries: vec![(VERSIONS_KEY.to_string(), serde_json::to_string(&current)?)],
                });
            }
        }
    }

    if snapshot.is_leader {
        if let Some(value) = &assessment.keyfile_update {
            actions.push(Action::MirrorKeyfile {
                value: value.clone(),
            });
        }
        if let Some(generation) = credential_assessment.ensure_generation {
            actions.push(Action::EnsureCredential { generation });
        }

        // Forward the winning client's standing request to the config-server.
        if let (Some(cluster_rel), Some(request)) = (&snapshot.cluster, &request) {
            let mut entries = Vec::new();
            if cluster_rel.local_app_value(DATABASE_KEY) != Some(request.database.as_str()) {
                entries.push((DATABASE_KEY.to_string(), request.database.clone()));
            }
            if cluster_rel.local_app_value(USER_ROLES_KEY) != Some(request.roles.as_str()) {
                entries.push((USER_ROLES_KEY.to_string(), request.roles.clone()));
            }
            if !entries.is_empty() {
                actions.push(Action::WriteRelation {
                    target: WriteTarget::ClusterApp,
                    entries,
                });
            }
        }

        // Record what was negotiated for the peers to consume.
        if let (Some(peers), Some(request)) = (&snapshot.peers, &request) {
            let external_value = request.external.to_string();
            let mut entries = Vec::new();
            for (key, value) in [
                (DATABASE_KEY, request.database.as_str()),
                (USER_ROLES_KEY, request.roles.as_str()),
                (EXTERNAL_CONNECTIVITY_RECORD_KEY, external_value.as_str()),
            ] {
                if peers.local_app_value(key) != Some(value) {
                    entries.push((key.to_string(), value.to_string()));
                }
            }
            if !entries.is_empty() {
                actions.push(Action::WriteRelation {
                    target: WriteTarget::PeerApp,
                    entries,
                });
            }
        }

        if let (Some(peers), Some(hash)) = (&snapshot.peers, assessment.desired_hash.as_deref()) {
            if peers.local_app_value(NEGOTIATED_CONFIG_HASH_KEY) != Some(hash) {
                actions.push(Action::WriteRelation {
                    target: WriteTarget::PeerApp,
                    entries: vec![(NEGOTIATED_CONFIG_HASH_KEY.to_string(), hash.to_string())],
                });
            }
        }
    }

    if tls_assessment.needs_csr && snapshot.certificates.is_some() {
        actions.push(Action::SubmitCsr);
    }
    if let Some((cert_pem, ca_pem)) = &tls_assessment.store {
        actions.push(Action::StoreTlsMaterial {
            cert_pem: cert_pem.clone(),
            ca_pem: ca_pem.clone(),
        });
    }
    if matches!(
        event,
        Event::RelationBroken {
            relation: RelationName::Certificates
        }
    ) {
        for label in [TLS_KEY_SECRET_LABEL, TLS_CERT_SECRET_LABEL, TLS_CA_SECRET_LABEL] {
            if snapshot.secret(label).is_some() {
                actions.push(Action::RemoveSecret {
                    label: label.to_string(),
                });
            }
        }
    }

    // Followers converge only on the hash the leader has negotiated.
    if !snapshot.is_leader && assessment.needs_apply {
        let negotiated = snapshot
            .peers
            .as_ref()
            .and_then(|p| p.local_app_value(NEGOTIATED_CONFIG_HASH_KEY));
        if negotiated != assessment.desired_hash.as_deref() {
            assessment.needs_apply = false;
            statuses.push(UnitStatus::waiting("Waiting for negotiated configuration."));
        }
    }

    let applying = assessment.needs_apply && assessment.desired.is_some();
    if applying {
        if let (Some(config), Some(hash)) =
            (assessment.desired.clone(), assessment.desired_hash.clone())
        {
            actions.push(Action::WriteRelation {
                target: WriteTarget::PeerUnit,
                entries: vec![(
                    CONFIG_LAST_ATTEMPT_KEY.to_string(),
                    snapshot.now.to_rfc3339(),
                )],
            });
            actions.push(Action::ApplyProcessConfig { config });
            actions.push(Action::RecordAppliedConfig { hash });
        }
    }

    if external {
        actions.push(Action::OpenPort { port: MONGOS_PORT });
    } else {
        actions.push(Action::ClosePort { port: MONGOS_PORT });
    }

    // Client exposure. Everything planned after the apply step only runs
    // when the router actually came up, so publishing ready here is safe.
    let converged = assessment.phase == ClusterPhase::Ready || applying;
    let tls_ok = snapshot.certificates.is_none() || tls_assessment.material.is_some();
    let ready = converged && credential_assessment.available && tls_ok;

    if snapshot.is_leader {
        for relation in &snapshot.proxies {
            let serving = request
                .as_ref()
                .filter(|r| r.relation == relation.id && ready);
            match (serving, &credential_assessment.published, &assessment.desired) {
                (Some(request), Some(credential), Some(desired)) => {
                    let entries = proxy::exposure_entries(
                        snapshot,
                        request,
                        MONGOS_PORT,
                        desired.auth_mode,
                        desired.tls_enabled(),
                        credential,
                    );
                    let stale = entries
                        .iter()
                        .any(|(k, v)| relation.local_app_value(k) != Some(v.as_str()));
                    if stale {
                        actions.push(Action::PublishClientAccess {
                            relation: relation.id,
                            entries,
                            grant: Some(credential.secret_label.clone()),
                        });
                    }
                }
                _ => {
                    if relation.local_app_value(READY_KEY) == Some("true") {
                        actions.push(Action::WithdrawClientAccess {
                            relation: relation.id,
                        });
                    }
                }
            }
        }
    }

    if let Some(waiting) = assessment.waiting.clone() {
        statuses.push(waiting);
    }
    if let Some(waiting) = tls_assessment.waiting {
        statuses.push(waiting);
    }
    if let Some(waiting) = credential_assessment.waiting {
        statuses.push(waiting);
    }
    if let Some(blocked) = proxy::over_capacity(snapshot) {
        statuses.push(blocked);
    }
    actions.push(Action::SetUnitStatus {
        status: UnitStatus::worst(statuses),
    });

    Ok(Plan {
        phase: assessment.phase,
        actions,
    })
}

/// Tail the executor runs instead of the remaining plan when a config
/// apply fails: bump the retry counter, withdraw readiness, report.
pub fn recovery_actions(snapshot: &ModelSnapshot) -> Vec<Action> {
    let attempts = cluster::config_retries(snapshot) + 1;
    let mut actions = vec![Action::WriteRelation {
        target: WriteTarget::PeerUnit,
        entries: vec![(CONFIG_RETRIES_KEY.to_string(), attempts.to_string())],
    }];
    if snapshot.is_leader {
        for relation in &snapshot.proxies {
            if relation.local_app_value(READY_KEY) == Some("true") {
                actions.push(Action::WithdrawClientAccess {
                    relation: relation.id,
                });
            }
        }
    }
    actions.push(Action::SetUnitStatus {
        status: UnitStatus::blocked("mongos is not running"),
    });
    actions
}

/// Run a plan to completion, or to its recovery tail.
pub async fn execute(
    plan: &Plan,
    snapshot: &ModelSnapshot,
    backend: &dyn ModelBackend,
    process: &dyn ProcessController,
) -> Result<ExecutionReport> {
    let mut report = ExecutionReport::default();

    for action in &plan.actions {
        // Leadership is re-checked at execution time; the snapshot may be
        // stale by the time a leader-gated action runs.
        if action.leader_gated() && !backend.is_leader().await? {
            info!(action = action.name(), "leadership moved away, abandoning plan");
            report.lost_leadership = true;
            break;
        }

        if let Action::SetUnitStatus { status } = action {
            report.status = Some(status.clone());
        }

        match run_action(action, snapshot, backend, process).await {
            Ok(()) => report.executed += 1,
            Err(Error::LeadershipLost(holder)) => {
                info!(action = action.name(), %holder, "leadership moved away, abandoning plan");
                report.lost_leadership = true;
                break;
            }
            Err(e @ Error::ProcessApplyFailed(_))
                if matches!(action, Action::ApplyProcessConfig { .. }) =>
            {
                warn!(error = %e, "config apply failed, running recovery tail");
                report.apply_failed = true;
                for action in recovery_actions(snapshot) {
                    if let Action::SetUnitStatus { status } = &action {
                        report.status = Some(status.clone());
                    }
                    match run_action(&action, snapshot, backend, process).await {
                        Ok(()) => report.executed += 1,
                        Err(Error::LeadershipLost(_)) => {
                            report.lost_leadership = true;
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(report)
}

async fn run_action(
    action: &Action,
    snapshot: &ModelSnapshot,
    backend: &dyn ModelBackend,
    process: &dyn ProcessController,
) -> Result<()> {
    debug!(action = action.name(), "executing");
    match action {
        Action::MirrorKeyfile { value } => backend.secret_set(KEYFILE_SECRET_LABEL, &value.0).await,
        Action::EnsureCredential { generation } => {
            ensure_credential(*generation, snapshot, backend).await
        }
        Action::RemoveCredential => {
            backend.secret_remove(ROUTER_PASSWORD_SECRET_LABEL).await?;
            if let Some(peers) = &snapshot.peers {
                backend
                    .delete_local(
                        peers.id,
                        LocalBag::App,
                        &[
                            CREDENTIAL_GENERATION_KEY.to_string(),
                            CREDENTIAL_SECRET_KEY.to_string(),
                        ],
                    )
                    .await?;
            }
            Ok(())
        }
        Action::SubmitCsr => submit_csr(snapshot, backend).await,
        Action::StoreTlsMaterial { cert_pem, ca_pem } => {
            backend.secret_set(TLS_CERT_SECRET_LABEL, cert_pem).await?;
            backend.secret_set(TLS_CA_SECRET_LABEL, ca_pem).await
        }
        Action::RemoveSecret { label } => backend.secret_remove(label).await,
        Action::WriteRelation { target, entries } => {
            let (id, bag) = resolve_target(snapshot, *target)?;
            backend.write_local(id, bag, entries).await
        }
        Action::DeleteRelationKeys { target, keys } => {
            let (id, bag) = resolve_target(snapshot, *target)?;
            backend.delete_local(id, bag, keys).await
        }
        Action::ApplyProcessConfig { config } => {
            process.apply(config).await?;
            Ok(())
        }
        Action::RecordAppliedConfig { hash } => {
            let Some(peers) = &snapshot.peers else {
                return Ok(());
            };
            backend
                .write_local(
                    peers.id,
                    LocalBag::Unit,
                    &[(cluster::APPLIED_CONFIG_HASH_KEY.to_string(), hash.clone())],
                )
                .await?;
            backend
                .delete_local(
                    peers.id,
                    LocalBag::Unit,
                    &[
                        CONFIG_RETRIES_KEY.to_string(),
                        CONFIG_LAST_ATTEMPT_KEY.to_string(),
                    ],
                )
                .await
        }
        Action::ClearAppliedConfig => {
            let Some(peers) = &snapshot.peers else {
                return Ok(());
            };
            backend
                .delete_local(
                    peers.id,
                    LocalBag::Unit,
                    &[
                        cluster::APPLIED_CONFIG_HASH_KEY.to_string(),
                        CONFIG_RETRIES_KEY.to_string(),
                        CONFIG_LAST_ATTEMPT_KEY.to_string(),
                    ],
                )
                .await
        }
        Action::StopProcess => process.stop().await,
        Action::PublishClientAccess {
            relation,
            entries,
            grant,
        } => {
            if let Some(label) = grant {
                backend.secret_grant(label, *relation).await?;
            }
            backend.write_local(*relation, LocalBag::App, entries).await
        }
        Action::WithdrawClientAccess { relation } => {
            backend
                .write_local(
                    *relation,
                    LocalBag::App,
                    &[(READY_KEY.to_string(), "false".to_string())],
                )
                .await?;
            backend
                .delete_local(*relation, LocalBag::App, &proxy::withdrawal_keys())
                .await
        }
        Action::OpenPort { port } => backend.open_port(*port).await,
        Action::ClosePort { port } => backend.close_port(*port).await,
        Action::SetUnitStatus { status } => backend.set_status(status).await,
    }
}

fn resolve_target(snapshot: &ModelSnapshot, target: WriteTarget) -> Result<(RelationId, LocalBag)> {
    match target {
        WriteTarget::PeerUnit | WriteTarget::PeerApp => {
            let peers = snapshot
                .peers
                .as_ref()
                .ok_or_else(|| Error::ConfigError("peer relation is not available".to_string()))?;
            let bag = if target == WriteTarget::PeerUnit {
                LocalBag::Unit
            } else {
                LocalBag::App
            };
            Ok((peers.id, bag))
        }
        WriteTarget::ClusterApp => {
            let cluster = snapshot.cluster.as_ref().ok_or_else(|| {
                Error::ConfigError("cluster relation is not available".to_string())
            })?;
            Ok((cluster.id, LocalBag::App))
        }
    }
}

/// Make sure the router password exists at `generation`. Re-running after
/// a partial pass is safe: a satisfied record is left untouched.
async fn ensure_credential(
    generation: u64,
    snapshot: &ModelSnapshot,
    backend: &dyn ModelBackend,
) -> Result<()> {
    let Some(peers) = &snapshot.peers else {
        return Ok(());
    };

    let stored = backend.secret_get(ROUTER_PASSWORD_SECRET_LABEL).await?;
    let published = credentials::published_credential(snapshot);
    if stored.is_some() && published.map(|c| c.generation) == Some(generation) {
        debug!(generation, "credential already at requested generation");
        return Ok(());
    }

    info!(generation, "minting router credential");
    backend
        .secret_set(ROUTER_PASSWORD_SECRET_LABEL, &generate_password())
        .await?;
    backend
        .write_local(
            peers.id,
            LocalBag::App,
            &[
                (
                    CREDENTIAL_GENERATION_KEY.to_string(),
                    generation.to_string(),
                ),
                (
                    CREDENTIAL_SECRET_KEY.to_string(),
                    ROUTER_PASSWORD_SECRET_LABEL.to_string(),
                ),
            ],
        )
        .await
}

/// Generate the unit key if the vault has none yet, then publish a CSR
/// bound to this unit's identity.
async fn submit_csr(snapshot: &ModelSnapshot, backend: &dyn ModelBackend) -> Result<()> {
    let Some(certificates) = &snapshot.certificates else {
        return Ok(());
    };

    let existing_key = snapshot.secret(TLS_KEY_SECRET_LABEL);
    let (key_pem, csr_pem) = tls::generate_csr(&snapshot.unit, existing_key)?;
    if existing_key.is_none() {
        backend.secret_set(TLS_KEY_SECRET_LABEL, &key_pem).await?;
    }

    info!(unit = %snapshot.unit.unit, "submitting certificate signing request");
    backend
        .write_local(
            certificates.id,
            LocalBag::Unit,
            &[(CSR_KEY.to_string(), tls::render_csr_submission(&csr_pem)?)],
        )
        .await
}

/// Load a snapshot, plan the event, execute the plan. The single entry
/// point both the hook dispatcher and the replay loop go through.
pub async fn dispatch(
    event: &Event,
    backend: &dyn ModelBackend,
    process: &dyn ProcessController,
) -> Result<ExecutionReport> {
    let snapshot = load_snapshot(backend, process).await?;
    info!(
        event = %event.name(),
        leader = snapshot.is_leader,
        process = %snapshot.process,
        "processing event"
    );

    let plan = plan(event, &snapshot)?;
    debug!(phase = %plan.phase, actions = plan.actions.len(), "plan computed");

    let report = execute(&plan, &snapshot, backend, process).await?;
    if report.apply_failed {
        warn!(phase = %plan.phase, "pass ended in recovery");
    }
    Ok(report)
}
