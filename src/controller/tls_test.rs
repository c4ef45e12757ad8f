//! Tests for the TLS lifecycle.
//!
//! Certificate issuance is exercised against a real in-test CA: the unit's
//! CSR is parsed and signed with rcgen, then fed back through validation
//! exactly as a certificate provider would publish it.

#[cfg(test)]
mod tests {
    use super::super::tls::*;
    use crate::model::credential::{
        TLS_CA_SECRET_LABEL, TLS_CERT_SECRET_LABEL, TLS_KEY_SECRET_LABEL,
    };
    use crate::model::{ModelSnapshot, RelationId, RelationView, UnitIdentity};
    use chrono::{TimeZone, Utc};
    use rcgen::{
        date_time_ymd, BasicConstraints, Certificate, CertificateParams,
        CertificateSigningRequestParams, DnType, IsCa, KeyPair,
    };
    use x509_parser::prelude::*;

    fn identity() -> UnitIdentity {
        UnitIdentity {
            app: "mongos".to_string(),
            unit: "mongos/0".to_string(),
            private_address: "10.0.0.7".to_string(),
        }
    }

    struct TestCa {
        cert: Certificate,
        key: KeyPair,
    }

    fn test_ca(common_name: &str) -> TestCa {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key).unwrap();
        TestCa { cert, key }
    }

    /// Sign the CSR the unit actually submitted, as a provider would.
    fn sign_csr(ca: &TestCa, csr_pem: &str) -> String {
        let csr = CertificateSigningRequestParams::from_pem(csr_pem).unwrap();
        csr.signed_by(&ca.cert, &ca.key).unwrap().pem()
    }

    /// Issue a certificate for an arbitrary key, optionally with an explicit
    /// validity window (years).
    fn issue_for_key(ca: &TestCa, subject_key: &KeyPair, validity: Option<(i32, i32)>) -> String {
        let mut params = CertificateParams::new(Vec::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, "mongos/0");
        if let Some((from, to)) = validity {
            params.not_before = date_time_ymd(from, 1, 1);
            params.not_after = date_time_ymd(to, 1, 1);
        }
        params.signed_by(subject_key, &ca.cert, &ca.key).unwrap().pem()
    }

    fn snapshot_with_certs_relation() -> ModelSnapshot {
        let mut snapshot = ModelSnapshot::for_unit("mongos", "mongos/0", "10.0.0.7");
        snapshot.certificates = Some(RelationView::new(RelationId(5), "certificates-provider"));
        snapshot
    }

    // ── csr generation ──────────────────────────────────────────────────

    #[test]
    fn test_csr_carries_unit_identity() {
        let (_, csr_pem) = generate_csr(&identity(), None).unwrap();

        let (_, pem) = parse_x509_pem(csr_pem.as_bytes()).unwrap();
        let (_, csr) = X509CertificationRequest::from_der(&pem.contents).unwrap();

        let cn = csr
            .certification_request_info
            .subject
            .iter_common_name()
            .next()
            .unwrap()
            .as_str()
            .unwrap();
        assert_eq!(cn, "mongos/0");

        let mut dns_names = Vec::new();
        let mut saw_ip = false;
        if let Some(extensions) = csr.requested_extensions() {
            for extension in extensions {
                if let ParsedExtension::SubjectAlternativeName(san) = extension {
                    for name in &san.general_names {
                        match name {
                            GeneralName::DNSName(name) => dns_names.push(name.to_string()),
                            GeneralName::IPAddress(_) => saw_ip = true,
                            _ => {}
                        }
                    }
                }
            }
        }
        assert!(dns_names.contains(&"mongos-0".to_string()));
        assert!(dns_names.contains(&"localhost".to_string()));
        assert!(saw_ip, "private address missing from the SANs");
    }

    #[test]
    fn test_generate_csr_reuses_existing_key() {
        let (key_pem, _) = generate_csr(&identity(), None).unwrap();
        let (key_again, _) = generate_csr(&identity(), Some(&key_pem)).unwrap();
        assert_eq!(key_pem, key_again);
    }

    #[test]
    fn test_submission_round_trips_through_the_relation() {
        let (_, csr_pem) = generate_csr(&identity(), None).unwrap();
        let wire = render_csr_submission(&csr_pem).unwrap();

        let mut view = RelationView::new(RelationId(5), "certificates-provider");
        view.local_unit.insert(CSR_KEY.to_string(), wire);
        assert_eq!(submitted_csr(&view).as_deref(), Some(csr_pem.as_str()));
    }

    #[test]
    fn test_issued_lookup_matches_by_csr() {
        let issued = vec![
            IssuedCertificate {
                certificate_signing_request: "CSR-A".to_string(),
                certificate: "CERT-A".to_string(),
                ca: "CA".to_string(),
                chain: vec![],
            },
            IssuedCertificate {
                certificate_signing_request: "CSR-B\n".to_string(),
                certificate: "CERT-B".to_string(),
                ca: "CA".to_string(),
                chain: vec![],
            },
        ];
        let mut view = RelationView::new(RelationId(5), "certificates-provider");
        view.remote_app_data.insert(
            CERTIFICATES_KEY.to_string(),
            serde_json::to_string(&issued).unwrap(),
        );

        // trailing whitespace on either side must not break the match
        let found = issued_for_csr(&view, "CSR-B").unwrap();
        assert_eq!(found.certificate, "CERT-B");
        assert!(issued_for_csr(&view, "CSR-C").is_none());
    }

    // ── validation ──────────────────────────────────────────────────────

    #[test]
    fn test_validate_accepts_ca_issued_certificate() {
        let ca = test_ca("test-ca");
        let (key_pem, csr_pem) = generate_csr(&identity(), None).unwrap();
        let cert_pem = sign_csr(&ca, &csr_pem);

        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        validate_issued(&cert_pem, &ca.cert.pem(), &key_pem, now).unwrap();
    }

    #[test]
    fn test_validate_rejects_certificate_for_foreign_key() {
        let ca = test_ca("test-ca");
        let (key_pem, _) = generate_csr(&identity(), None).unwrap();
        let stranger = KeyPair::generate().unwrap();
        let cert_pem = issue_for_key(&ca, &stranger, None);

        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let err = validate_issued(&cert_pem, &ca.cert.pem(), &key_pem, now).unwrap_err();
        assert!(err.to_string().contains("private key"), "{err}");
    }

    #[test]
    fn test_validate_rejects_wrong_issuer() {
        let ca = test_ca("test-ca");
        let other = test_ca("other-ca");
        let (key_pem, csr_pem) = generate_csr(&identity(), None).unwrap();
        let cert_pem = sign_csr(&ca, &csr_pem);

        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let err = validate_issued(&cert_pem, &other.cert.pem(), &key_pem, now).unwrap_err();
        assert!(err.to_string().contains("issued"), "{err}");
    }

    #[test]
    fn test_validate_rejects_expired_certificate() {
        let ca = test_ca("test-ca");
        let (key_pem, _) = generate_csr(&identity(), None).unwrap();
        let unit_key = KeyPair::from_pem(&key_pem).unwrap();
        let cert_pem = issue_for_key(&ca, &unit_key, Some((2019, 2020)));

        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let err = validate_issued(&cert_pem, &ca.cert.pem(), &key_pem, now).unwrap_err();
        assert!(err.to_string().contains("expired"), "{err}");
    }

    #[test]
    fn test_expires_within_threshold() {
        let ca = test_ca("test-ca");
        let key = KeyPair::generate().unwrap();
        let cert_pem = issue_for_key(&ca, &key, Some((2019, 2020)));

        let far_out = Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap();
        assert!(!expires_within(&cert_pem, far_out, 30).unwrap());

        let close = Utc.with_ymd_and_hms(2019, 12, 15, 0, 0, 0).unwrap();
        assert!(expires_within(&cert_pem, close, 30).unwrap());
    }

    // ── assessment ──────────────────────────────────────────────────────

    #[test]
    fn test_no_relation_means_no_tls() {
        let snapshot = ModelSnapshot::for_unit("mongos", "mongos/0", "10.0.0.7");
        let assessment = evaluate(&snapshot);
        assert!(assessment.material.is_none());
        assert!(!assessment.needs_csr);
        assert!(assessment.waiting.is_none());
    }

    #[test]
    fn test_fresh_relation_requests_a_csr() {
        let snapshot = snapshot_with_certs_relation();
        let assessment = evaluate(&snapshot);
        assert!(assessment.needs_csr);
        assert!(assessment.material.is_none());
        assert_eq!(
            assessment.waiting.unwrap().message,
            "Requesting TLS certificates."
        );
    }

    #[test]
    fn test_pending_issuance_reports_waiting() {
        let mut snapshot = snapshot_with_certs_relation();
        let (key_pem, csr_pem) = generate_csr(&snapshot.unit, None).unwrap();
        snapshot
            .secrets
            .insert(TLS_KEY_SECRET_LABEL.to_string(), key_pem);
        let wire = render_csr_submission(&csr_pem).unwrap();
        snapshot
            .certificates
            .as_mut()
            .unwrap()
            .local_unit
            .insert(CSR_KEY.to_string(), wire);

        let assessment = evaluate(&snapshot);
        assert!(!assessment.needs_csr);
        assert!(assessment.material.is_none());
        assert_eq!(
            assessment.waiting.unwrap().message,
            "Waiting for TLS certificates."
        );
    }

    #[test]
    fn test_valid_issued_material_is_adopted_and_stored() {
        let mut snapshot = snapshot_with_certs_relation();
        let (key_pem, csr_pem) = generate_csr(&snapshot.unit, None).unwrap();
        snapshot
            .secrets
            .insert(TLS_KEY_SECRET_LABEL.to_string(), key_pem);

        let ca = test_ca("provider-ca");
        let cert_pem = sign_csr(&ca, &csr_pem);
        let issued = vec![IssuedCertificate {
            certificate_signing_request: csr_pem.clone(),
            certificate: cert_pem.clone(),
            ca: ca.cert.pem(),
            chain: vec![],
        }];

        let certs = snapshot.certificates.as_mut().unwrap();
        certs.local_unit.insert(
            CSR_KEY.to_string(),
            render_csr_submission(&csr_pem).unwrap(),
        );
        certs.remote_app_data.insert(
            CERTIFICATES_KEY.to_string(),
            serde_json::to_string(&issued).unwrap(),
        );

        let assessment = evaluate(&snapshot);
        let material = assessment.material.unwrap();
        assert_eq!(material.cert_pem, cert_pem);
        assert_eq!(
            assessment.store,
            Some((cert_pem, ca.cert.pem()))
        );
        assert!(!assessment.needs_csr);
        assert!(assessment.waiting.is_none());
    }

    #[test]
    fn test_invalid_issued_material_falls_back_to_vault() {
        let mut snapshot = snapshot_with_certs_relation();
        let (key_pem, csr_pem) = generate_csr(&snapshot.unit, None).unwrap();
        snapshot
            .secrets
            .insert(TLS_KEY_SECRET_LABEL.to_string(), key_pem);
        snapshot
            .secrets
            .insert(TLS_CERT_SECRET_LABEL.to_string(), "HELD CERT".to_string());
        snapshot
            .secrets
            .insert(TLS_CA_SECRET_LABEL.to_string(), "HELD CA".to_string());

        // issued against someone else's key
        let ca = test_ca("provider-ca");
        let stranger = KeyPair::generate().unwrap();
        let issued = vec![IssuedCertificate {
            certificate_signing_request: csr_pem.clone(),
            certificate: issue_for_key(&ca, &stranger, None),
            ca: ca.cert.pem(),
            chain: vec![],
        }];

        let certs = snapshot.certificates.as_mut().unwrap();
        certs.local_unit.insert(
            CSR_KEY.to_string(),
            render_csr_submission(&csr_pem).unwrap(),
        );
        certs.remote_app_data.insert(
            CERTIFICATES_KEY.to_string(),
            serde_json::to_string(&issued).unwrap(),
        );

        let assessment = evaluate(&snapshot);
        assert_eq!(assessment.material.unwrap().cert_pem, "HELD CERT");
        assert!(assessment.store.is_none());
        assert!(assessment.needs_csr);
        assert!(assessment.waiting.is_none());
    }

    #[test]
    fn test_invalid_issued_material_without_fallback_waits() {
        let mut snapshot = snapshot_with_certs_relation();
        let (key_pem, csr_pem) = generate_csr(&snapshot.unit, None).unwrap();
        snapshot
            .secrets
            .insert(TLS_KEY_SECRET_LABEL.to_string(), key_pem);

        let ca = test_ca("provider-ca");
        let stranger = KeyPair::generate().unwrap();
        let issued = vec![IssuedCertificate {
            certificate_signing_request: csr_pem.clone(),
            certificate: issue_for_key(&ca, &stranger, None),
            ca: ca.cert.pem(),
            chain: vec![],
        }];

        let certs = snapshot.certificates.as_mut().unwrap();
        certs.local_unit.insert(
            CSR_KEY.to_string(),
            render_csr_submission(&csr_pem).unwrap(),
        );
        certs.remote_app_data.insert(
            CERTIFICATES_KEY.to_string(),
            serde_json::to_string(&issued).unwrap(),
        );

        let assessment = evaluate(&snapshot);
        assert!(assessment.material.is_none());
        assert_eq!(
            assessment.waiting.unwrap().message,
            "Waiting for valid TLS certificates."
        );
    }
}
