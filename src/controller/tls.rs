//! TLS lifecycle against the certificates relation.
//!
//! We hold a per-unit key pair in the vault, publish a CSR bound to the
//! unit's network identity, and wait for the provider to hand back an
//! issued certificate. Issued material is validated before it is ever
//! handed to the router; anything that fails validation is treated as "no
//! usable certificate" and falls back to the last known good material.

use chrono::{DateTime, Utc};
use rcgen::{CertificateParams, DnType, KeyPair, KeyUsagePurpose};
use serde::{Deserialize, Serialize};
use tracing::warn;
use x509_parser::prelude::*;

use crate::error::{Error, Result};
use crate::model::credential::{
    Sensitive, TLS_CA_SECRET_LABEL, TLS_CERT_SECRET_LABEL, TLS_KEY_SECRET_LABEL,
};
use crate::model::desired::TlsMaterial;
use crate::model::{ModelSnapshot, RelationView, UnitIdentity, UnitStatus};

/// Key we write our CSR list under in the relation's local unit bag.
pub const CSR_KEY: &str = "certificate_signing_requests";
/// Key the provider writes issued certificates under in its app bag.
pub const CERTIFICATES_KEY: &str = "certificates";

/// Renewal window: request a fresh certificate this many days before expiry.
pub const DEFAULT_CERT_RENEWAL_THRESHOLD_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CsrRecord {
    certificate_signing_request: String,
}

/// One issued certificate as the provider publishes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedCertificate {
    pub certificate_signing_request: String,
    pub certificate: String,
    pub ca: String,
    #[serde(default)]
    pub chain: Vec<String>,
}

/// What the certificates relation currently gives us.
#[derive(Debug, Clone, Default)]
pub struct TlsAssessment {
    /// Material the router should run with, if any.
    pub material: Option<TlsMaterial>,
    /// Freshly validated material that should be persisted to the vault.
    pub store: Option<(String, String)>,
    /// True when this pass should (re)submit a CSR.
    pub needs_csr: bool,
    /// Status to surface while issuance is pending.
    pub waiting: Option<UnitStatus>,
}

fn pem_eq(a: &str, b: &str) -> bool {
    a.trim() == b.trim()
}

/// The CSR this unit has already published, if any.
pub fn submitted_csr(view: &RelationView) -> Option<String> {
    let raw = view.local_unit_value(CSR_KEY)?;
    let records: Vec<CsrRecord> = serde_json::from_str(raw).ok()?;
    records.into_iter().next().map(|r| r.certificate_signing_request)
}

/// Relation wire value for a single-CSR submission.
pub fn render_csr_submission(csr_pem: &str) -> Result<String> {
    let records = vec![CsrRecord {
        certificate_signing_request: csr_pem.to_string(),
    }];
    Ok(serde_json::to_string(&records)?)
}

/// Find the certificate issued against `csr_pem`, if the provider has
/// answered yet.
pub fn issued_for_csr(view: &RelationView, csr_pem: &str) -> Option<IssuedCertificate> {
    let raw = view.remote_value(CERTIFICATES_KEY)?;
    let issued: Vec<IssuedCertificate> = match serde_json::from_str(raw) {
        Ok(list) => list,
        Err(e) => {
            warn!(error = %e, "certificate provider published unparseable data");
            return None;
        }
    };
    issued
        .into_iter()
        .find(|c| pem_eq(&c.certificate_signing_request, csr_pem))
}

/// Generate (or reuse) the unit key and build a CSR bound to the unit's
/// network identity.
pub fn generate_csr(
    identity: &UnitIdentity,
    existing_key_pem: Option<&str>,
) -> Result<(String, String)> {
    let key = match existing_key_pem {
        Some(pem) => KeyPair::from_pem(pem).map_err(|e| Error::ConfigError(e.to_string()))?,
        None => KeyPair::generate().map_err(|e| Error::ConfigError(e.to_string()))?,
    };

    let sans = vec![
        identity.private_address.clone(),
        identity.unit.replace('/', "-"),
        "localhost".to_string(),
    ];
    let mut params =
        CertificateParams::new(sans).map_err(|e| Error::ConfigError(e.to_string()))?;
    params
        .distinguished_name
        .push(DnType::CommonName, identity.unit.clone());
    params.key_usages.push(KeyUsagePurpose::DigitalSignature);

    let csr = params
        .serialize_request(&key)
        .map_err(|e| Error::ConfigError(e.to_string()))?;
    let csr_pem = csr.pem().map_err(|e| Error::ConfigError(e.to_string()))?;
    Ok((key.serialize_pem(), csr_pem))
}

fn with_cert<T>(
    pem: &str,
    what: &str,
    f: impl FnOnce(&X509Certificate<'_>) -> Result<T>,
) -> Result<T> {
    let (_, parsed) = parse_x509_pem(pem.as_bytes())
        .map_err(|e| Error::CertificateInvalid(format!("{} pem: {:?}", what, e)))?;
    let (_, cert) = parse_x509_certificate(&parsed.contents)
        .map_err(|e| Error::CertificateInvalid(format!("{}: {:?}", what, e)))?;
    f(&cert)
}

/// Validate an issued certificate against our private key, its CA and the
/// clock. Anything wrong here means the material must not reach the router.
pub fn validate_issued(
    cert_pem: &str,
    ca_pem: &str,
    key_pem: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let key = KeyPair::from_pem(key_pem).map_err(|e| Error::CertificateInvalid(e.to_string()))?;
    let expected_spki = key.public_key_der();

    with_cert(ca_pem, "ca", |ca| {
        let ca_subject = ca.subject().as_raw().to_vec();
        with_cert(cert_pem, "certificate", |cert| {
            let ts = now.timestamp();
            if ts < cert.validity().not_before.timestamp() {
                return Err(Error::CertificateInvalid(
                    "certificate is not valid yet".to_string(),
                ));
            }
            if ts > cert.validity().not_after.timestamp() {
                return Err(Error::CertificateInvalid(
                    "certificate has expired".to_string(),
                ));
            }
            if cert.public_key().raw != expected_spki.as_slice() {
                return Err(Error::CertificateInvalid(
                    "certificate does not match our private key".to_string(),
                ));
            }
            if cert.issuer().as_raw() != ca_subject.as_slice() {
                return Err(Error::CertificateInvalid(
                    "certificate was not issued by the provided ca".to_string(),
                ));
            }
            Ok(())
        })
    })
}

/// Whether the certificate enters its renewal window within `threshold_days`.
pub fn expires_within(cert_pem: &str, now: DateTime<Utc>, threshold_days: i64) -> Result<bool> {
    with_cert(cert_pem, "certificate", |cert| {
        let deadline = now + chrono::Duration::days(threshold_days);
        Ok(cert.validity().not_after.timestamp() <= deadline.timestamp())
    })
}

fn vault_material(snapshot: &ModelSnapshot) -> Option<TlsMaterial> {
    let cert = snapshot.secret(TLS_CERT_SECRET_LABEL)?;
    let ca = snapshot.secret(TLS_CA_SECRET_LABEL)?;
    let key = snapshot.secret(TLS_KEY_SECRET_LABEL)?;
    Some(TlsMaterial {
        cert_pem: cert.to_string(),
        key_pem: Sensitive::from(key),
        ca_pem: ca.to_string(),
    })
}

/// Derive the TLS side of the desired state from the snapshot.
pub fn evaluate(snapshot: &ModelSnapshot) -> TlsAssessment {
    let Some(certs_rel) = snapshot.certificates.as_ref() else {
        // No relation, no TLS. Whatever the vault still holds is stale and
        // gets cleaned up by the relation-broken pass.
        return TlsAssessment::default();
    };

    let key_pem = snapshot.secret(TLS_KEY_SECRET_LABEL);
    let submitted = submitted_csr(certs_rel);

    let (Some(key_pem), Some(submitted)) = (key_pem, submitted) else {
        return TlsAssessment {
            material: None,
            store: None,
            needs_csr: true,
            waiting: Some(UnitStatus::waiting("Requesting TLS certificates.")),
        };
    };

    let issued = issued_for_csr(certs_rel, &submitted);
    let fallback = vault_material(snapshot);

    match issued {
        Some(issued) => {
            match validate_issued(&issued.certificate, &issued.ca, key_pem, snapshot.now) {
                Ok(()) => {
                    let store = match &fallback {
                        Some(held) if pem_eq(&held.cert_pem, &issued.certificate) => None,
                        _ => Some((issued.certificate.clone(), issued.ca.clone())),
                    };
                    let renewal_due = expires_within(
                        &issued.certificate,
                        snapshot.now,
                        DEFAULT_CERT_RENEWAL_THRESHOLD_DAYS,
                    )
                    .unwrap_or(true);
                    TlsAssessment {
                        material: Some(TlsMaterial {
                            cert_pem: issued.certificate,
                            key_pem: Sensitive::from(key_pem),
                            ca_pem: issued.ca,
                        }),
                        store,
                        needs_csr: renewal_due,
                        waiting: None,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "issued certificate failed validation");
                    let waiting = if fallback.is_none() {
                        Some(UnitStatus::waiting("Waiting for valid TLS certificates."))
                    } else {
                        None
                    };
                    TlsAssessment {
                        material: fallback,
                        store: None,
                        needs_csr: true,
                        waiting,
                    }
                }
            }
        }
        None => {
            let waiting = if fallback.is_none() {
                Some(UnitStatus::waiting("Waiting for TLS certificates."))
            } else {
                None
            };
            TlsAssessment {
                material: fallback,
                store: None,
                needs_csr: false,
                waiting,
            }
        }
    }
}
