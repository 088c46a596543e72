//! Peer authentication settings loadable from configuration files.

use crate::identity::Identity;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Peer authentication settings, typically deserialized from a service's
/// configuration and applied with
/// [`SessionConfigBuilder::settings`](crate::SessionConfigBuilder::settings).
///
/// ```
/// use aprn_rustls::PeerAuthSettings;
///
/// let settings: PeerAuthSettings = serde_json::from_str(
///     r#"{ "expected_peers": [{ "domain": "sdr", "identifier": "node-42" }],
///          "evaluation_timeout_ms": 2000 }"#,
/// )?;
/// assert_eq!(settings.expected_peers.len(), 1);
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PeerAuthSettings {
    /// Identities a peer must match one of. Empty disables peer authentication.
    pub expected_peers: Vec<Identity>,

    /// Upper bound on trust evaluation, in milliseconds. Absent means unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation_timeout_ms: Option<u64>,

    /// Dotted OID of the narrative marker extension, when not the default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker_oid: Option<String>,
}

impl PeerAuthSettings {
    /// The evaluation timeout as a [`Duration`].
    pub fn evaluation_timeout(&self) -> Option<Duration> {
        self.evaluation_timeout_ms.map(Duration::from_millis)
    }
}
