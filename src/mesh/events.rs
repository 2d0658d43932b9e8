//! Membership lifecycle events and their observers.
//!
//! Observers run synchronously right after the table changes and before
//! the mutating call returns.  An observer error is a bug in the
//! surrounding service, not a network condition, so it is propagated as a
//! fatal [`MeshError`] instead of being logged and dropped.

use metrics::{counter, gauge};
use thiserror::Error;

use super::node::MeshNode;
use crate::metrics::{MESH_LIVE_NODES, MESH_NODES_DOWN_TOTAL, MESH_NODES_JOINED_TOTAL};

/// A change to the local membership table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshEvent {
    /// A previously unknown node was appended.
    NodeJoined { node: MeshNode, live_nodes: usize },
    /// A Down entry was flipped back to Live (only with `allow_rejoin`).
    NodeRevived { node: MeshNode, live_nodes: usize },
    /// A Live entry was marked Down.
    NodeDown { node: MeshNode, live_nodes: usize },
}

impl MeshEvent {
    pub fn node(&self) -> &MeshNode {
        match self {
            MeshEvent::NodeJoined { node, .. }
            | MeshEvent::NodeRevived { node, .. }
            | MeshEvent::NodeDown { node, .. } => node,
        }
    }

    /// Live node count right after the change.
    pub fn live_nodes(&self) -> usize {
        match self {
            MeshEvent::NodeJoined { live_nodes, .. }
            | MeshEvent::NodeRevived { live_nodes, .. }
            | MeshEvent::NodeDown { live_nodes, .. } => *live_nodes,
        }
    }
}

/// Errors that must stop the node.
#[derive(Debug, Error)]
pub enum MeshError {
    /// A registered observer failed while handling an event.
    #[error("mesh observer failed on {event:?}: {source:#}")]
    Observer {
        event: MeshEvent,
        #[source]
        source: anyhow::Error,
    },
}

/// Subscriber to membership lifecycle events.
///
/// Called while the membership write lock is held, so an observer must not
/// call back into [`super::membership::Membership`].
pub trait MeshObserver: Send + Sync + 'static {
    fn on_event(&self, event: &MeshEvent) -> anyhow::Result<()>;
}

/// Records membership changes as Prometheus metrics.
#[derive(Debug, Default)]
pub struct MetricsObserver;

impl MeshObserver for MetricsObserver {
    fn on_event(&self, event: &MeshEvent) -> anyhow::Result<()> {
        match event {
            MeshEvent::NodeJoined { .. } | MeshEvent::NodeRevived { .. } => {
                counter!(MESH_NODES_JOINED_TOTAL).increment(1);
            }
            MeshEvent::NodeDown { .. } => {
                counter!(MESH_NODES_DOWN_TOTAL).increment(1);
            }
        }
        gauge!(MESH_LIVE_NODES).set(event.live_nodes() as f64);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Observer that remembers every event it sees.
    #[derive(Default)]
    pub struct RecordingObserver {
        pub events: Mutex<Vec<MeshEvent>>,
    }

    impl RecordingObserver {
        pub fn events(&self) -> Vec<MeshEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl MeshObserver for RecordingObserver {
        fn on_event(&self, event: &MeshEvent) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    /// Observer that always fails.
    pub struct FailingObserver;

    impl MeshObserver for FailingObserver {
        fn on_event(&self, _event: &MeshEvent) -> anyhow::Result<()> {
            anyhow::bail!("observer exploded")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let event = MeshEvent::NodeDown {
            node: MeshNode::new("h", 80),
            live_nodes: 3,
        };
        assert_eq!(event.node().address(), "h:80");
        assert_eq!(event.live_nodes(), 3);
    }

    #[test]
    fn test_metrics_observer_never_fails() {
        let event = MeshEvent::NodeJoined {
            node: MeshNode::new("h", 80),
            live_nodes: 2,
        };
        assert!(MetricsObserver.on_event(&event).is_ok());
    }

    #[test]
    fn test_observer_error_message_names_event() {
        let err = MeshError::Observer {
            event: MeshEvent::NodeJoined {
                node: MeshNode::new("h", 80),
                live_nodes: 1,
            },
            source: anyhow::anyhow!("boom"),
        };
        let msg = err.to_string();
        assert!(msg.contains("NodeJoined"));
        assert!(msg.contains("boom"));
    }
}
