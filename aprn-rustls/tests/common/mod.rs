//! Shared fixtures: an rcgen-generated PKI and a recording metrics sink.

#![allow(dead_code)]

use aprn_rustls::{MetricsSink, FAILURE_REASON_TAG, NARRATIVE_MARKER_OID};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CustomExtension, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SanType,
};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::sign::CertifiedKey;
use std::sync::{Arc, Mutex};

pub struct Ca {
    cert: Certificate,
    key: KeyPair,
}

pub struct Leaf {
    cert: Certificate,
    key: KeyPair,
}

fn name(cn: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    dn
}

fn marker() -> CustomExtension {
    let arcs: Vec<u64> = NARRATIVE_MARKER_OID
        .split('.')
        .map(|arc| arc.parse().expect("numeric arc"))
        .collect();
    CustomExtension::from_oid_content(&arcs, vec![0x05, 0x00])
}

fn ca_params(cn: &str, with_marker: bool) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = name(cn);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    if with_marker {
        params.custom_extensions.push(marker());
    }
    params
}

impl Ca {
    pub fn root(cn: &str) -> Self {
        let key = KeyPair::generate().expect("key");
        let cert = ca_params(cn, false).self_signed(&key).expect("root");
        Self { cert, key }
    }

    pub fn der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }

    pub fn intermediate(&self, cn: &str, with_marker: bool) -> Self {
        let key = KeyPair::generate().expect("key");
        let cert = ca_params(cn, with_marker)
            .signed_by(&key, &self.cert, &self.key)
            .expect("intermediate");
        Self { cert, key }
    }

    /// A leaf valid for client and server auth on `localhost`.
    pub fn leaf(&self, cn: &str, uris: &[&str], with_marker: bool) -> Leaf {
        let key = KeyPair::generate().expect("key");
        let mut params = CertificateParams::new(vec!["localhost".to_string()]).expect("params");
        params.distinguished_name = name(cn);
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        for uri in uris {
            params
                .subject_alt_names
                .push(SanType::URI((*uri).try_into().expect("ia5 uri")));
        }
        if with_marker {
            params.custom_extensions.push(marker());
        }
        let cert = params.signed_by(&key, &self.cert, &self.key).expect("leaf");
        Leaf { cert, key }
    }
}

impl Leaf {
    pub fn der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }

    /// The credential presented by a peer owning this leaf.
    pub fn credential(&self, intermediates: &[&Ca]) -> Arc<CertifiedKey> {
        let mut chain = vec![self.der()];
        chain.extend(intermediates.iter().map(|ca| ca.der()));
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key.serialize_der()));
        let signing_key = provider()
            .key_provider
            .load_private_key(key)
            .expect("signing key");
        Arc::new(CertifiedKey::new(chain, signing_key))
    }
}

#[cfg(feature = "ring")]
fn provider() -> CryptoProvider {
    rustls::crypto::ring::default_provider()
}

#[cfg(all(feature = "aws-lc-rs", not(feature = "ring")))]
fn provider() -> CryptoProvider {
    rustls::crypto::aws_lc_rs::default_provider()
}

/// Failure reasons seen by a metrics sink, in order.
#[derive(Clone, Default)]
pub struct Reasons(Arc<Mutex<Vec<String>>>);

impl Reasons {
    pub fn sink(&self) -> Arc<dyn MetricsSink> {
        let reasons = Arc::clone(&self.0);
        Arc::new(move |_: &'static str, tags: &[(&'static str, &'static str)]| {
            for (key, value) in tags {
                if *key == FAILURE_REASON_TAG {
                    reasons.lock().expect("reasons").push((*value).to_string());
                }
            }
        })
    }

    pub fn get(&self) -> Vec<String> {
        self.0.lock().expect("reasons").clone()
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
