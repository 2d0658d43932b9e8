//! Mesh node descriptor and the validator that guards membership state.
//!
//! Anything learned from the wire arrives as an untyped JSON value and must
//! pass [`validate`] before it can become a [`MeshNode`].

use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Provenance tag for the local node, inserted once at startup.
pub const SOURCE_INIT: &str = "init";
/// Provenance tag for nodes learned from a ping reply.
pub const SOURCE_PING: &str = "ping";
/// Provenance tag for nodes passed to us by a pinging peer.
pub const SOURCE_PASSED: &str = "passed";

/// One participant in the mesh.
///
/// Identity is `(host, port)`; `is_down` and `source` are local beliefs
/// and never take part in equality checks between nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshNode {
    pub host: String,
    pub port: u16,
    pub is_down: bool,
    #[serde(default)]
    pub source: String,
}

impl MeshNode {
    /// A live node with no provenance yet.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            is_down: false,
            source: String::new(),
        }
    }

    /// Whether `other` names the same `(host, port)`.
    pub fn same_address(&self, other: &MeshNode) -> bool {
        self.host == other.host && self.port == other.port
    }

    /// `host:port`, as used in logs and on the wire.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL of the node's HTTP API.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Typed view of a candidate after its JSON shape has been checked.
#[derive(Debug, Validate)]
struct NodeCandidate {
    #[garde(length(min = 1))]
    host: String,
    // Stricter than "a number above 1": fractional ports and ports past
    // 65535 are rejected too, since neither can be dialed as a TCP port.
    #[garde(range(min = 2, max = 65535))]
    port: u64,
    #[garde(skip)]
    is_down: bool,
}

/// Validate an untyped node descriptor.
///
/// Accepts only objects with a non-empty string `host`, a numeric `port`
/// greater than 1 and a boolean `isDown`.  Anything else yields `None`;
/// rejection is silent and the candidate is simply dropped.  Ports must be
/// whole numbers that fit a TCP port.
pub fn validate(candidate: &Value) -> Option<MeshNode> {
    let obj = candidate.as_object()?;
    let host = obj.get("host")?.as_str()?;
    let port = obj.get("port")?.as_f64()?;
    let is_down = obj.get("isDown")?.as_bool()?;

    if port.fract() != 0.0 || port < 0.0 {
        return None;
    }

    let typed = NodeCandidate {
        host: host.to_string(),
        port: port as u64,
        is_down,
    };
    typed.validate().ok()?;

    Some(MeshNode {
        host: typed.host,
        port: u16::try_from(typed.port).ok()?,
        is_down: typed.is_down,
        source: String::new(),
    })
}
