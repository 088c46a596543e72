//! Test helpers: an rcgen PKI, recording metrics and scriptable engines.

use crate::anchors::TrustAnchorSet;
use crate::engine::{EngineError, PeerTrust, PresentedChain, TrustEngine, TrustEvaluation};
use crate::failure::{MetricsSink, FAILURE_REASON_TAG};
use crate::scheme::NARRATIVE_MARKER_OID;
use futures::future::BoxFuture;
use futures::FutureExt as _;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CustomExtension, DistinguishedName,
    DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SanType,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, UnixTime};
use rustls::sign::CertifiedKey;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use x509_parser::certificate::X509Certificate;

/// A certificate together with the key that signed it.
pub(crate) struct Issued {
    pub(crate) cert: Certificate,
    pub(crate) key: KeyPair,
}

impl Issued {
    pub(crate) fn der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }
}

/// One root CA and helpers to issue intermediates and leaves under it.
pub(crate) struct Pki {
    pub(crate) root: Issued,
}

fn marker_extension() -> CustomExtension {
    let arcs: Vec<u64> = NARRATIVE_MARKER_OID
        .split('.')
        .map(|arc| arc.parse().unwrap())
        .collect();
    // ASN.1 NULL payload
    CustomExtension::from_oid_content(&arcs, vec![0x05, 0x00])
}

fn ca_params(cn: &str, marker: bool) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    if marker {
        params.custom_extensions.push(marker_extension());
    }
    params
}

impl Pki {
    pub(crate) fn new(cn: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let cert = ca_params(cn, false).self_signed(&key).unwrap();
        Self {
            root: Issued { cert, key },
        }
    }

    pub(crate) fn root_der(&self) -> CertificateDer<'static> {
        self.root.der()
    }

    pub(crate) fn anchors(&self) -> TrustAnchorSet {
        TrustAnchorSet::new([(crate::scheme::Scheme::Sdr, vec![self.root_der()])])
    }

    /// A CA signed by the root, optionally carrying the narrative marker.
    pub(crate) fn intermediate(&self, cn: &str, marker: bool) -> Issued {
        let key = KeyPair::generate().unwrap();
        let cert = ca_params(cn, marker)
            .signed_by(&key, &self.root.cert, &self.root.key)
            .unwrap();
        Issued { cert, key }
    }

    /// An end-entity usable for both client and server auth (DNS SAN `localhost`).
    pub(crate) fn leaf(&self, issuer: &Issued, cn: &str, uris: &[&str], marker: bool) -> Issued {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, cn);
        params.distinguished_name = dn;
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        for uri in uris {
            params
                .subject_alt_names
                .push(SanType::URI((*uri).try_into().unwrap()));
        }
        if marker {
            params.custom_extensions.push(marker_extension());
        }
        let cert = params.signed_by(&key, &issuer.cert, &issuer.key).unwrap();
        Issued { cert, key }
    }
}

pub(crate) fn parse<'a>(der: &'a CertificateDer<'_>) -> X509Certificate<'a> {
    x509_parser::parse_x509_certificate(der.as_ref()).unwrap().1
}

/// The credential a peer presents: `leaf` followed by `intermediates`.
pub(crate) fn certified_key(leaf: &Issued, intermediates: &[&Issued]) -> Arc<CertifiedKey> {
    let mut chain = vec![leaf.der()];
    chain.extend(intermediates.iter().map(|i| i.der()));
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf.key.serialize_der()));
    let signing_key = crate::crypto::provider()
        .key_provider
        .load_private_key(key)
        .unwrap();
    Arc::new(CertifiedKey::new(chain, signing_key))
}

pub(crate) fn presented(leaf: &Issued, intermediates: &[&Issued]) -> PresentedChain {
    PresentedChain::new(
        leaf.der(),
        intermediates.iter().map(|i| i.der()).collect(),
        UnixTime::now(),
    )
}

/// Records every increment for later assertions.
#[derive(Debug, Default)]
pub(crate) struct RecordingMetrics {
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingMetrics {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn counters(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(counter, _)| counter.clone())
            .collect()
    }

    pub(crate) fn reasons(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, reason)| reason.clone())
            .collect()
    }
}

impl MetricsSink for RecordingMetrics {
    fn increment(&self, counter: &'static str, tags: &[(&'static str, &'static str)]) {
        let reason = tags
            .iter()
            .find(|(key, _)| *key == FAILURE_REASON_TAG)
            .map(|(_, value)| (*value).to_string())
            .unwrap_or_default();
        self.calls
            .lock()
            .unwrap()
            .push((counter.to_string(), reason));
    }
}

/// Where a [`ScriptedEngine`] attempt fails, if anywhere.
#[derive(Clone, Debug)]
pub(crate) enum Script {
    /// Anchors fail to install.
    RejectAnchors,
    /// Evaluation cannot be started.
    FailToStart,
    /// Evaluation reports untrusted with a diagnostic.
    UntrustedWithError,
    /// Evaluation reports untrusted without a diagnostic.
    UntrustedSilently,
    /// Evaluation succeeds but yields no chain.
    TrustedWithoutChain,
    /// Evaluation succeeds and yields this chain.
    Trusted(Vec<CertificateDer<'static>>),
    /// Evaluation never completes.
    Hang,
}

/// A trust engine whose outcome is fixed in advance.
#[derive(Debug)]
pub(crate) struct ScriptedEngine {
    script: Script,
    evaluations: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    pub(crate) fn new(script: Script) -> Self {
        Self {
            script,
            evaluations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn evaluations(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.evaluations)
    }
}

struct ScriptedTrust {
    script: Script,
    evaluations: Arc<AtomicUsize>,
}

impl TrustEngine for ScriptedEngine {
    fn trust_for(&self, _presented: PresentedChain) -> Box<dyn PeerTrust> {
        Box::new(ScriptedTrust {
            script: self.script.clone(),
            evaluations: Arc::clone(&self.evaluations),
        })
    }
}

impl PeerTrust for ScriptedTrust {
    fn set_anchor_certificates(&mut self, _anchors: &TrustAnchorSet) -> Result<(), EngineError> {
        match self.script {
            Script::RejectAnchors => Err(EngineError::NoAnchors),
            _ => Ok(()),
        }
    }

    fn evaluate(self: Box<Self>) -> Result<BoxFuture<'static, TrustEvaluation>, EngineError> {
        if matches!(self.script, Script::FailToStart) {
            return Err(EngineError::Other("engine unavailable".into()));
        }
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        let evaluation = match self.script {
            Script::UntrustedWithError => TrustEvaluation::Untrusted {
                error: Some(EngineError::Other("chain does not anchor".into())),
            },
            Script::UntrustedSilently => TrustEvaluation::Untrusted { error: None },
            Script::TrustedWithoutChain => TrustEvaluation::Trusted { chain: None },
            Script::Trusted(chain) => TrustEvaluation::Trusted { chain: Some(chain) },
            Script::Hang => return Ok(futures::future::pending().boxed()),
            Script::RejectAnchors | Script::FailToStart => unreachable!(),
        };
        Ok(futures::future::ready(evaluation).boxed())
    }
}
