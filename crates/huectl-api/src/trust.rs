//! Certificate trust for bridge connections.
//!
//! Bridges present one of two certificate shapes:
//!
//! - **Modern firmware** serves a leaf whose subject CN is the bridge id,
//!   issued by the Hue root CA (`CN=root-bridge`). The chain is verified
//!   against the bundled root certificate.
//! - **Legacy firmware** serves a self-signed certificate whose issuer and
//!   subject CN are both the bridge id. There is no chain to check, so the
//!   SHA-256 fingerprint is pinned on first use and must match afterwards.
//!
//! Anything else is refused. [`TrustValidator`] plugs into rustls as a
//! [`ServerCertVerifier`] so the decision is made during the handshake.

use std::borrow::Cow;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::{CertificateError, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use x509_parser::prelude::{FromDer, X509Certificate, X509Name};

use crate::error::TrustError;

/// Issuer CN of certificates signed by the Hue root CA.
pub const ROOT_MARKER: &str = "root-bridge";

const BUNDLED_ROOT_PEM: &[u8] = include_bytes!("../certs/hue-bridge-root-ca.pem");

// ── Fingerprint pinning ──────────────────────────────────────────────

/// Persistence for the pinned certificate fingerprint of one bridge.
///
/// `pin` is only ever called when `pinned` returned `None`.
pub trait FingerprintStore: Send + Sync + std::fmt::Debug {
    fn pinned(&self) -> Option<String>;
    fn pin(&self, fingerprint: &str);
}

/// In-memory pin, for callers that persist the fingerprint themselves.
#[derive(Debug, Default)]
pub struct MemoryFingerprintStore {
    inner: Mutex<Option<String>>,
}

impl MemoryFingerprintStore {
    pub fn new(initial: Option<String>) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }
}

impl FingerprintStore for MemoryFingerprintStore {
    fn pinned(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn pin(&self, fingerprint: &str) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Some(fingerprint.to_owned());
    }
}

/// Lowercase hex SHA-256 of a DER certificate.
pub fn fingerprint(cert: &CertificateDer<'_>) -> String {
    let digest = Sha256::digest(cert.as_ref());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

// ── Root store ───────────────────────────────────────────────────────

/// Source of the root certificate used for modern-firmware chains.
#[derive(Debug, Clone, Default)]
pub enum RootCa {
    /// The Hue bridge root CA shipped with this crate.
    #[default]
    Bundled,
    /// A PEM file on disk.
    File(PathBuf),
    /// PEM bytes already in memory.
    Pem(Vec<u8>),
}

impl RootCa {
    /// Parse the PEM source into a rustls root store.
    pub fn root_store(&self) -> Result<RootCertStore, TrustError> {
        let pem: Cow<'_, [u8]> = match self {
            Self::Bundled => Cow::Borrowed(BUNDLED_ROOT_PEM),
            Self::File(path) => Cow::Owned(std::fs::read(path).map_err(|e| {
                TrustError::RootStore(format!("failed to read {}: {e}", path.display()))
            })?),
            Self::Pem(bytes) => Cow::Borrowed(bytes.as_slice()),
        };

        let mut store = RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut pem.as_ref()) {
            let cert = cert.map_err(|e| TrustError::RootStore(format!("invalid PEM: {e}")))?;
            store
                .add(cert)
                .map_err(|e| TrustError::RootStore(format!("invalid root certificate: {e}")))?;
        }

        if store.is_empty() {
            return Err(TrustError::RootStore("no certificates in PEM input".into()));
        }
        Ok(store)
    }
}

// ── Classification ───────────────────────────────────────────────────

/// Which trust policy a presented certificate falls under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateTopology {
    Modern,
    LegacySelfSigned,
}

/// Outcome of a successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustDecision {
    /// Chain verified against the bridge root.
    ChainVerified,
    /// Legacy certificate matched (or just became) the pinned fingerprint.
    Pinned { fingerprint: String, first_use: bool },
}

fn common_name(name: &X509Name<'_>) -> Option<String> {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_owned)
}

/// Inspect issuer/subject common names to pick a policy.
pub fn classify(
    cert: &CertificateDer<'_>,
    bridge_id: &str,
) -> Result<CertificateTopology, TrustError> {
    let (_, parsed) = X509Certificate::from_der(cert.as_ref())
        .map_err(|e| TrustError::InvalidCertificate(format!("unreadable certificate: {e}")))?;

    let issuer = common_name(parsed.issuer());
    let subject = common_name(parsed.subject());

    match (issuer.as_deref(), subject.as_deref()) {
        (Some(i), Some(s)) if i == ROOT_MARKER && s.eq_ignore_ascii_case(bridge_id) => {
            Ok(CertificateTopology::Modern)
        }
        (Some(i), Some(s)) if i.eq_ignore_ascii_case(bridge_id) && s.eq_ignore_ascii_case(bridge_id) => {
            Ok(CertificateTopology::LegacySelfSigned)
        }
        _ => Err(TrustError::UnrecognizedCertificateTopology { issuer, subject }),
    }
}

// ── TrustValidator ───────────────────────────────────────────────────

/// Decides whether a presented certificate identifies one specific bridge.
#[derive(Debug)]
pub struct TrustValidator {
    bridge_id: String,
    chain: Arc<WebPkiServerVerifier>,
    pins: Arc<dyn FingerprintStore>,
    provider: Arc<CryptoProvider>,
    /// Most recent refusal, kept so callers can recover the typed reason
    /// from an opaque handshake failure.
    last_rejection: Mutex<Option<TrustError>>,
}

impl TrustValidator {
    pub fn new(
        bridge_id: &str,
        root_ca: &RootCa,
        pins: Arc<dyn FingerprintStore>,
    ) -> Result<Self, TrustError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let roots = Arc::new(root_ca.root_store()?);
        let chain = WebPkiServerVerifier::builder_with_provider(roots, Arc::clone(&provider))
            .build()
            .map_err(|e| TrustError::RootStore(e.to_string()))?;

        Ok(Self {
            bridge_id: bridge_id.to_ascii_lowercase(),
            chain,
            pins,
            provider,
            last_rejection: Mutex::new(None),
        })
    }

    pub fn bridge_id(&self) -> &str {
        &self.bridge_id
    }

    pub fn crypto_provider(&self) -> Arc<CryptoProvider> {
        Arc::clone(&self.provider)
    }

    /// Accept or reject `end_entity` for this validator's bridge.
    ///
    /// On first contact with a legacy bridge the fingerprint is pinned
    /// through the [`FingerprintStore`].
    pub fn validate(
        &self,
        server_name: &ServerName<'_>,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<TrustDecision, TrustError> {
        match classify(end_entity, &self.bridge_id)? {
            CertificateTopology::Modern => {
                match self
                    .chain
                    .verify_server_cert(end_entity, intermediates, server_name, &[], now)
                {
                    Ok(_) => Ok(TrustDecision::ChainVerified),
                    // Bridge leaves carry their id only in the subject CN,
                    // which `classify` has already matched.
                    Err(rustls::Error::InvalidCertificate(
                        CertificateError::NotValidForName
                        | CertificateError::NotValidForNameContext { .. },
                    )) => Ok(TrustDecision::ChainVerified),
                    Err(e) => Err(TrustError::InvalidCertificate(e.to_string())),
                }
            }
            CertificateTopology::LegacySelfSigned => {
                let presented = fingerprint(end_entity);
                match self.pins.pinned() {
                    None => {
                        info!(bridge_id = %self.bridge_id, "pinning legacy bridge certificate");
                        self.pins.pin(&presented);
                        Ok(TrustDecision::Pinned {
                            fingerprint: presented,
                            first_use: true,
                        })
                    }
                    Some(expected) if expected.eq_ignore_ascii_case(&presented) => {
                        Ok(TrustDecision::Pinned {
                            fingerprint: presented,
                            first_use: false,
                        })
                    }
                    Some(expected) => Err(TrustError::IdentityMismatch {
                        bridge_id: self.bridge_id.clone(),
                        expected,
                        presented,
                    }),
                }
            }
        }
    }

    /// Take the reason for the most recent rejection, if any.
    pub fn take_rejection(&self) -> Option<TrustError> {
        self.last_rejection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl ServerCertVerifier for TrustValidator {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self.validate(server_name, end_entity, intermediates, now) {
            Ok(decision) => {
                debug!(bridge_id = %self.bridge_id, ?decision, "bridge certificate accepted");
                Ok(ServerCertVerified::assertion())
            }
            Err(e) => {
                warn!(bridge_id = %self.bridge_id, error = %e, "bridge certificate rejected");
                let message = e.to_string();
                *self
                    .last_rejection
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(e);
                Err(rustls::Error::General(message))
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};

    const BRIDGE_ID: &str = "001788fffe6a1b2c";

    fn server_name() -> ServerName<'static> {
        ServerName::try_from(BRIDGE_ID).unwrap()
    }

    fn params(cn: &str, san: &[&str]) -> CertificateParams {
        let mut params =
            CertificateParams::new(san.iter().map(|s| (*s).to_owned()).collect::<Vec<_>>())
                .unwrap();
        params.distinguished_name.push(DnType::CommonName, cn);
        params
    }

    fn legacy_cert() -> CertificateDer<'static> {
        let key = KeyPair::generate().unwrap();
        params(BRIDGE_ID, &[]).self_signed(&key).unwrap().der().clone()
    }

    /// Root named like the Hue CA plus a leaf it signed for `subject`.
    fn modern_chain(subject: &str) -> (Vec<u8>, CertificateDer<'static>) {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = params(ROOT_MARKER, &[]);
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca = ca_params.self_signed(&ca_key).unwrap();

        let leaf_key = KeyPair::generate().unwrap();
        let leaf = params(subject, &[subject])
            .signed_by(&leaf_key, &ca, &ca_key)
            .unwrap();

        (ca.pem().into_bytes(), leaf.der().clone())
    }

    fn validator(root: RootCa, pins: Arc<dyn FingerprintStore>) -> TrustValidator {
        TrustValidator::new(BRIDGE_ID, &root, pins).unwrap()
    }

    #[test]
    fn bundled_root_parses() {
        let store = RootCa::Bundled.root_store().unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn empty_pem_is_rejected() {
        let err = RootCa::Pem(Vec::new()).root_store().unwrap_err();
        assert!(matches!(err, TrustError::RootStore(_)));
    }

    #[test]
    fn legacy_certificate_is_pinned_on_first_use() {
        let pins = Arc::new(MemoryFingerprintStore::default());
        let v = validator(RootCa::Bundled, pins.clone());
        let f1 = legacy_cert();

        let decision = v.validate(&server_name(), &f1, &[], UnixTime::now()).unwrap();
        assert_eq!(
            decision,
            TrustDecision::Pinned {
                fingerprint: fingerprint(&f1),
                first_use: true
            }
        );
        assert_eq!(pins.pinned(), Some(fingerprint(&f1)));
    }

    #[test]
    fn pinned_fingerprint_must_match() {
        let pins = Arc::new(MemoryFingerprintStore::default());
        let v = validator(RootCa::Bundled, pins.clone());
        let f1 = legacy_cert();
        let f2 = legacy_cert();

        v.validate(&server_name(), &f1, &[], UnixTime::now()).unwrap();

        let err = v.validate(&server_name(), &f2, &[], UnixTime::now()).unwrap_err();
        assert!(matches!(err, TrustError::IdentityMismatch { .. }));
        assert!(err.to_string().contains("unlink and relink"));

        // The pin is untouched by the rejected attempt.
        assert_eq!(pins.pinned(), Some(fingerprint(&f1)));

        let again = v.validate(&server_name(), &f1, &[], UnixTime::now()).unwrap();
        assert!(matches!(again, TrustDecision::Pinned { first_use: false, .. }));
    }

    #[test]
    fn unexpected_names_are_unrecognized() {
        let key = KeyPair::generate().unwrap();
        let other = params("some-other-device", &[]).self_signed(&key).unwrap();
        let v = validator(RootCa::Bundled, Arc::new(MemoryFingerprintStore::default()));

        let err = v
            .validate(&server_name(), other.der(), &[], UnixTime::now())
            .unwrap_err();
        assert!(matches!(
            err,
            TrustError::UnrecognizedCertificateTopology { .. }
        ));
    }

    #[test]
    fn modern_chain_is_verified_against_root() {
        let (root_pem, leaf) = modern_chain(BRIDGE_ID);
        assert_eq!(classify(&leaf, BRIDGE_ID).unwrap(), CertificateTopology::Modern);

        let pins = Arc::new(MemoryFingerprintStore::default());
        let v = validator(RootCa::Pem(root_pem), pins.clone());
        let decision = v.validate(&server_name(), &leaf, &[], UnixTime::now()).unwrap();

        assert_eq!(decision, TrustDecision::ChainVerified);
        assert!(pins.pinned().is_none());
    }

    #[test]
    fn modern_chain_from_unknown_root_is_rejected() {
        let (_, leaf) = modern_chain(BRIDGE_ID);
        let (other_root, _) = modern_chain(BRIDGE_ID);
        let v = validator(
            RootCa::Pem(other_root),
            Arc::new(MemoryFingerprintStore::default()),
        );

        let err = v
            .validate(&server_name(), &leaf, &[], UnixTime::now())
            .unwrap_err();
        assert!(matches!(err, TrustError::InvalidCertificate(_)));
    }

    #[test]
    fn modern_leaf_for_another_bridge_is_unrecognized() {
        let (root_pem, leaf) = modern_chain("001788fffe000000");
        let v = validator(
            RootCa::Pem(root_pem),
            Arc::new(MemoryFingerprintStore::default()),
        );

        let err = v
            .validate(&server_name(), &leaf, &[], UnixTime::now())
            .unwrap_err();
        assert!(matches!(
            err,
            TrustError::UnrecognizedCertificateTopology { .. }
        ));
    }

    #[test]
    fn verifier_records_rejection_reason() {
        let pins = Arc::new(MemoryFingerprintStore::new(Some("00".repeat(32))));
        let v = validator(RootCa::Bundled, pins);

        let result = v.verify_server_cert(&legacy_cert(), &[], &server_name(), &[], UnixTime::now());
        assert!(result.is_err());
        assert!(matches!(
            v.take_rejection(),
            Some(TrustError::IdentityMismatch { .. })
        ));
        assert!(v.take_rejection().is_none());
    }

    #[test]
    fn fingerprint_is_lowercase_hex() {
        let fp = fingerprint(&legacy_cert());
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }
}
