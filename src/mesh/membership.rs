//! Membership table: the process-local list of known nodes.
//!
//! [`MembershipTable`] is plain data with `&mut self` mutations so it can be
//! tested without timers or locks.  [`Membership`] is the shared handle the
//! rest of the node uses: it owns the table behind a lock, knows which entry
//! is the local node, and notifies observers after every change.
//!
//! Entries are never removed.  A node that stops accepting connections is
//! only flagged down and stays in the table until the process restarts.

use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{info, warn};

use super::events::{MeshError, MeshEvent, MeshObserver};
use super::node::{validate, MeshNode, SOURCE_INIT};

/// Outcome of a successful [`MembershipTable::join`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The candidate was appended as a new entry.
    Joined(MeshNode),
    /// An existing Down entry came back to Live.
    Revived(MeshNode),
}

/// Ordered, append-only list of nodes with unique `(host, port)`.
#[derive(Debug, Clone, Default)]
pub struct MembershipTable {
    nodes: Vec<MeshNode>,
    allow_rejoin: bool,
}

impl MembershipTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table where re-learning a Down node's address revives the entry.
    pub fn with_rejoin(allow_rejoin: bool) -> Self {
        Self {
            nodes: Vec::new(),
            allow_rejoin,
        }
    }

    /// Validate `candidate` and append it with the given provenance.
    ///
    /// Invalid candidates, candidates already flagged down and addresses
    /// that are already present are silently ignored, which makes the call
    /// idempotent.  With rejoin enabled, a live candidate whose address
    /// matches a Down entry revives that entry instead.
    pub fn join(&mut self, candidate: &Value, source: &str) -> Option<JoinOutcome> {
        let mut node = validate(candidate)?;
        if node.is_down {
            return None;
        }

        if let Some(existing) = self.nodes.iter_mut().find(|n| n.same_address(&node)) {
            if self.allow_rejoin && existing.is_down {
                existing.is_down = false;
                existing.source = source.to_string();
                return Some(JoinOutcome::Revived(existing.clone()));
            }
            return None;
        }

        node.source = source.to_string();
        self.nodes.push(node.clone());
        Some(JoinOutcome::Joined(node))
    }

    /// Flag the entry at `node`'s address as down.
    ///
    /// Returns the updated entry when it was live before the call.
    pub fn mark_down(&mut self, node: &MeshNode) -> Option<MeshNode> {
        let existing = self
            .nodes
            .iter_mut()
            .find(|n| n.same_address(node) && !n.is_down)?;
        existing.is_down = true;
        Some(existing.clone())
    }

    /// Entries believed live, in insertion order.
    pub fn live_nodes(&self) -> Vec<MeshNode> {
        self.nodes.iter().filter(|n| !n.is_down).cloned().collect()
    }

    /// Every entry, including down ones.
    pub fn nodes(&self) -> &[MeshNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Shared, observed membership state for one node process.
pub struct Membership {
    local: MeshNode,
    table: RwLock<MembershipTable>,
    observers: Vec<Arc<dyn MeshObserver>>,
}

impl Membership {
    /// Build the membership state and insert the local node with source
    /// `"init"`.  The local node does not trigger observers.
    pub fn new(
        local: MeshNode,
        allow_rejoin: bool,
        observers: Vec<Arc<dyn MeshObserver>>,
    ) -> Self {
        let mut table = MembershipTable::with_rejoin(allow_rejoin);
        let local_value = serde_json::to_value(&local).unwrap_or(Value::Null);
        if table.join(&local_value, SOURCE_INIT).is_none() {
            warn!("Local node {} failed validation", local.address());
        }
        Self {
            local,
            table: RwLock::new(table),
            observers,
        }
    }

    /// The node this process runs as.
    pub fn local_node(&self) -> &MeshNode {
        &self.local
    }

    /// Validate and join a candidate learned from the wire.
    pub fn join(&self, candidate: &Value, source: &str) -> Result<Option<MeshNode>, MeshError> {
        let mut table = self.table.write().expect("membership lock poisoned");
        let outcome = table.join(candidate, source);
        let live_nodes = table.live_nodes().len();

        let event = match outcome {
            None => return Ok(None),
            Some(JoinOutcome::Joined(node)) => {
                info!(address = %node.address(), source = %node.source, "New node joined");
                MeshEvent::NodeJoined { node, live_nodes }
            }
            Some(JoinOutcome::Revived(node)) => {
                info!(address = %node.address(), source = %node.source, "Down node rejoined");
                MeshEvent::NodeRevived { node, live_nodes }
            }
        };
        // Still under the write lock: observers see changes in table order.
        self.notify(&event)?;
        Ok(Some(event.node().clone()))
    }

    /// Join every candidate in turn, stopping at the first observer failure.
    pub fn join_all(&self, candidates: &[Value], source: &str) -> Result<usize, MeshError> {
        let mut joined = 0;
        for candidate in candidates {
            if self.join(candidate, source)?.is_some() {
                joined += 1;
            }
        }
        Ok(joined)
    }

    /// Flag a node as down.  Returns whether the entry changed.
    pub fn mark_down(&self, node: &MeshNode) -> Result<bool, MeshError> {
        let mut table = self.table.write().expect("membership lock poisoned");
        let Some(node) = table.mark_down(node) else {
            return Ok(false);
        };
        let live_nodes = table.live_nodes().len();

        warn!(address = %node.address(), "Node marked down");
        self.notify(&MeshEvent::NodeDown { node, live_nodes })?;
        Ok(true)
    }

    /// Nodes believed live, the local node included.
    pub fn live_nodes(&self) -> Vec<MeshNode> {
        self.table
            .read()
            .expect("membership lock poisoned")
            .live_nodes()
    }

    /// Live nodes other than the local one.
    pub fn live_peers(&self) -> Vec<MeshNode> {
        self.live_nodes()
            .into_iter()
            .filter(|n| !n.same_address(&self.local))
            .collect()
    }

    /// Snapshot of every entry, down ones included.
    pub fn nodes(&self) -> Vec<MeshNode> {
        self.table
            .read()
            .expect("membership lock poisoned")
            .nodes()
            .to_vec()
    }

    fn notify(&self, event: &MeshEvent) -> Result<(), MeshError> {
        for observer in &self.observers {
            observer
                .on_event(event)
                .map_err(|source| MeshError::Observer {
                    event: event.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}
