//! Mesh membership and replication.
//!
//! Each node discovers its siblings without a coordinator: a gossip
//! scheduler periodically exchanges live node lists with every known peer
//! and a bootstrap URL, and a replication dispatcher forwards every
//! successful mutation to the live peers with a loop-guard marker.
//!
//! [`MeshService`] bundles the pieces for the HTTP layer.  It is only
//! built when a bootstrap URL is configured; without one the node runs
//! alone and none of this is active.

pub mod codec;
pub mod events;
pub mod gossip;
pub mod membership;
pub mod node;
pub mod replication;
pub mod rpc;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::error;

use crate::config::MeshConfig;
use events::{MeshError, MeshObserver};
use gossip::GossipScheduler;
use membership::Membership;
use node::{MeshNode, SOURCE_PASSED};
use replication::ReplicationDispatcher;
use rpc::{Params, PeerTransport};

/// Receives errors that must stop the process.
pub type FatalReceiver = mpsc::UnboundedReceiver<MeshError>;

/// Membership, gossip and replication for one node.
pub struct MeshService {
    membership: Arc<Membership>,
    gossip: GossipScheduler,
    replicator: ReplicationDispatcher,
    fatal: mpsc::UnboundedSender<MeshError>,
}

impl MeshService {
    /// Build the mesh for `local`, rendezvousing at `bootstrap_url`.
    ///
    /// The returned receiver yields observer failures; the owner of the
    /// process should stop when it produces one.
    pub fn new(
        local: MeshNode,
        bootstrap_url: &str,
        config: &MeshConfig,
        transport: Arc<dyn PeerTransport>,
        observers: Vec<Arc<dyn MeshObserver>>,
    ) -> (Self, FatalReceiver) {
        let membership = Arc::new(Membership::new(local, config.allow_rejoin, observers));
        let gossip = GossipScheduler::new(
            membership.clone(),
            transport.clone(),
            bootstrap_url,
            config.ping_interval(),
            config.skip_overlapping_rounds,
        );
        let replicator = ReplicationDispatcher::new(membership.clone(), transport);
        let (fatal, fatal_rx) = mpsc::unbounded_channel();

        let service = Self {
            membership,
            gossip,
            replicator,
            fatal,
        };
        (service, fatal_rx)
    }

    pub fn membership(&self) -> &Arc<Membership> {
        &self.membership
    }

    pub fn gossip(&self) -> &GossipScheduler {
        &self.gossip
    }

    /// Start the gossip timer on a background task.
    pub fn start(&self) -> JoinHandle<()> {
        tokio::spawn(self.gossip.clone().run(self.fatal.clone()))
    }

    /// Fan a completed mutation out to live peers.  See
    /// [`ReplicationDispatcher::replicate`].
    pub fn replicate(&self, path: &str, params: &Params) -> Option<JoinHandle<()>> {
        self.replicator.replicate(path, params)
    }

    /// Serve an inbound ping: join the caller's encoded node list with
    /// source `"passed"` and return the current live nodes.
    pub fn handle_ping(&self, encoded: &str) -> Result<Vec<MeshNode>, MeshError> {
        let candidates = codec::decode(encoded);
        self.membership.join_all(&candidates, SOURCE_PASSED)?;
        Ok(self.membership.live_nodes())
    }

    /// Forward a fatal error to whoever owns the process.
    pub fn report_fatal(&self, err: MeshError) {
        error!("Fatal mesh error: {err}");
        let _ = self.fatal.send(err);
    }
}
