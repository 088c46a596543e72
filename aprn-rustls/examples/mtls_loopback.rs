//! Two SDR nodes authenticating each other over loopback.
//!
//! Generates a throwaway PKI, loads each node's expected peers from JSON
//! settings, and exchanges one message over mutual TLS.

use aprn_rustls::{session_config, NoopMetrics, PeerAuthSettings, Scheme, SessionConfig};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::sign::CertifiedKey;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};

fn root() -> anyhow::Result<(Certificate, KeyPair)> {
    let key = KeyPair::generate()?;
    let mut params = CertificateParams::default();
    params.distinguished_name.push(DnType::CommonName, "sdr demo root");
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign];
    Ok((params.self_signed(&key)?, key))
}

fn credential(node: &str, ca: &(Certificate, KeyPair)) -> anyhow::Result<Arc<CertifiedKey>> {
    let key = KeyPair::generate()?;
    let mut params = CertificateParams::new(vec!["localhost".to_string()])?;
    params.distinguished_name.push(DnType::CommonName, node);
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    let cert = params.signed_by(&key, &ca.0, &ca.1)?;
    let der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()));
    let signing_key = rustls::crypto::ring::default_provider()
        .key_provider
        .load_private_key(der)?;
    Ok(Arc::new(CertifiedKey::new(vec![cert.der().clone()], signing_key)))
}

fn node(
    name: &str,
    settings: &str,
    ca: &(Certificate, KeyPair),
) -> anyhow::Result<SessionConfig> {
    let settings: PeerAuthSettings = serde_json::from_str(settings)?;
    let credential = credential(name, ca)?;
    let root: CertificateDer<'static> = ca.0.der().clone();
    let session = session_config(move || Some(credential.clone()), None, Arc::new(NoopMetrics))
        .settings(&settings)
        .roots(Scheme::Sdr, vec![root])
        .build()?;
    Ok(session)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let ca = root()?;
    let server = node(
        "node-42",
        r#"{ "expected_peers": [{ "domain": "sdr", "identifier": "node-7" }] }"#,
        &ca,
    )?;
    let client = node(
        "node-7",
        r#"{ "expected_peers": [{ "domain": "sdr", "identifier": "node-42" }],
             "evaluation_timeout_ms": 2000 }"#,
        &ca,
    )?;

    let acceptor = TlsAcceptor::from(Arc::new(server.server_config()?));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    eprintln!("mTLS server listening on tcp://{addr}");

    let server_task = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await?;
        let mut tls = acceptor.accept(tcp).await?;
        let leaf = tls
            .get_ref()
            .1
            .peer_certificates()
            .and_then(|certs| certs.first().cloned());
        if let Some(peer) = leaf.and_then(|leaf| server.peer_identity(&leaf)) {
            eprintln!("server accepted {peer}");
        }
        let mut buf = [0u8; 5];
        tls.read_exact(&mut buf).await?;
        tls.write_all(b"pong\n").await?;
        tls.shutdown().await?;
        Ok::<_, anyhow::Error>(())
    });

    let connector = TlsConnector::from(Arc::new(client.client_config()?));
    let tcp = TcpStream::connect(addr).await?;
    let mut tls = connector
        .connect(ServerName::try_from("localhost")?, tcp)
        .await?;
    tls.write_all(b"ping\n").await?;
    let mut reply = String::new();
    tls.read_to_string(&mut reply).await?;
    println!("client received: {}", reply.trim_end());

    server_task.await??;
    Ok(())
}
