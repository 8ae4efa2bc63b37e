#![allow(clippy::unwrap_used)]
// Integration tests for `BridgeSession::open` against local sockets: a
// listener that never completes a handshake and a TLS server presenting a
// legacy self-signed bridge certificate.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use rcgen::{CertificateParams, DnType, KeyPair};
use rustls::{ServerConfig, ServerConnection};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use huectl_api::trust::fingerprint;
use huectl_api::{
    BridgeIdentity, BridgeSession, Credentials, Error, FingerprintStore, MemoryFingerprintStore,
    TransportConfig, TrustError,
};

const BRIDGE_ID: &str = "001788fffe6a1b2c";

// ── Helpers ─────────────────────────────────────────────────────────

fn identity() -> BridgeIdentity {
    BridgeIdentity::new(BRIDGE_ID, Ipv4Addr::LOCALHOST.into())
}

fn transport(addr: SocketAddr, connect_timeout: Duration) -> TransportConfig {
    TransportConfig {
        port: addr.port(),
        connect_timeout,
        request_timeout: Duration::from_secs(2),
        ..TransportConfig::default()
    }
}

/// Self-signed certificate with the bridge id as issuer and subject.
fn legacy_certificate() -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.distinguished_name.push(DnType::CommonName, BRIDGE_ID);
    let cert = params.self_signed(&key).unwrap();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()));
    (cert.der().clone(), key)
}

/// Serve TLS handshakes with `cert` on a background thread. Connections
/// are dropped once the handshake ends either way.
fn serve_tls(cert: CertificateDer<'static>, key: PrivateKeyDer<'static>) -> SocketAddr {
    let config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![cert], key)
    .unwrap();
    let config = Arc::new(config);

    let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut sock) = stream else { return };
            let mut conn = ServerConnection::new(Arc::clone(&config)).unwrap();
            while conn.is_handshaking() {
                if conn.complete_io(&mut sock).is_err() {
                    break;
                }
            }
        }
    });
    addr
}

// ── Timeouts ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_open_times_out_when_bridge_never_handshakes() {
    let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((sock, _)) = listener.accept().await {
            held.push(sock);
        }
    });

    let err = BridgeSession::open(
        &identity(),
        &Credentials::new("test-key"),
        &transport(addr, Duration::from_millis(200)),
        Arc::new(MemoryFingerprintStore::default()),
    )
    .await
    .unwrap_err();

    assert!(
        matches!(err, Error::ConnectionTimeout { timeout_ms: 200 }),
        "unexpected error: {err:?}"
    );
    assert!(err.is_transient());
}

// ── Trust ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_open_rejects_certificate_that_differs_from_pin() {
    let (cert, key) = legacy_certificate();
    let presented = fingerprint(&cert);
    let addr = serve_tls(cert, key);

    let (other, _) = legacy_certificate();
    let pinned = fingerprint(&other);
    let pins = Arc::new(MemoryFingerprintStore::new(Some(pinned.clone())));

    let err = BridgeSession::open(
        &identity(),
        &Credentials::new("test-key"),
        &transport(addr, Duration::from_secs(2)),
        pins.clone(),
    )
    .await
    .unwrap_err();

    assert!(err.is_trust_failure());
    match err {
        Error::Trust(TrustError::IdentityMismatch {
            bridge_id,
            expected,
            presented: seen,
        }) => {
            assert_eq!(bridge_id, BRIDGE_ID);
            assert_eq!(expected, pinned);
            assert_eq!(seen, presented);
        }
        other => panic!("expected an identity mismatch, got {other:?}"),
    }
    assert_eq!(pins.pinned(), Some(pinned), "pin must not be replaced");
}

#[tokio::test]
async fn test_open_pins_legacy_certificate_on_first_contact() {
    let (cert, key) = legacy_certificate();
    let presented = fingerprint(&cert);
    let addr = serve_tls(cert, key);
    let pins = Arc::new(MemoryFingerprintStore::default());

    // The server hangs up after the handshake, so the session itself fails.
    let err = BridgeSession::open(
        &identity(),
        &Credentials::new("test-key"),
        &transport(addr, Duration::from_secs(2)),
        pins.clone(),
    )
    .await
    .unwrap_err();

    assert!(!matches!(err, Error::Trust(_)), "unexpected error: {err:?}");
    assert_eq!(pins.pinned(), Some(presented));
}
