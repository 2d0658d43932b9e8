//! Wire codec for node lists carried inside query parameters.
//!
//! The format is `host:port|host:port|...`.  Down state is never
//! transmitted: senders only encode live nodes and every decoded candidate
//! comes back with `isDown = false`.

use serde_json::{json, Value};

use super::node::MeshNode;

const NODE_SEPARATOR: char = '|';
const ADDRESS_SEPARATOR: char = ':';

/// Encode nodes as `host:port` segments joined by `|`.
///
/// Callers are expected to pass live nodes only.
pub fn encode(nodes: &[MeshNode]) -> String {
    nodes
        .iter()
        .map(MeshNode::address)
        .collect::<Vec<_>>()
        .join("|")
}

/// Decode a wire string into untyped node candidates.
///
/// No validation happens here: a malformed segment decodes to a candidate
/// with a `null` host or port, which [`super::node::validate`] rejects.
pub fn decode(s: &str) -> Vec<Value> {
    s.split(NODE_SEPARATOR)
        .map(|segment| {
            let mut parts = segment.split(ADDRESS_SEPARATOR);
            let host = parts.next().map(Value::from).unwrap_or(Value::Null);
            let port = parts
                .next()
                .and_then(|p| p.parse::<u64>().ok())
                .map(Value::from)
                .unwrap_or(Value::Null);
            json!({ "host": host, "port": port, "isDown": false, "source": "" })
        })
        .collect()
}
