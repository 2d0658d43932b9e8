//! Periodic ping-and-exchange of membership snapshots.
//!
//! Every tick (and once immediately at startup) the scheduler pings the
//! bootstrap URL and every live peer, sending the wire encoding of the
//! local live node list.  Each reply carries the peer's own live list,
//! which is validated and joined with source `"ping"`.
//!
//! Only a refused connection marks a peer down, and only when the target
//! was a known node rather than the bootstrap URL.  Timeouts and bad
//! replies are logged and leave membership untouched.
//!
//! Rounds are fire-and-forget with respect to the timer: a slow round may
//! still be in flight when the next tick fires unless
//! `skip_overlapping_rounds` is set.  `join` is idempotent, so overlapping
//! rounds only cost duplicate RPCs.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::codec;
use super::events::MeshError;
use super::membership::Membership;
use super::node::{MeshNode, SOURCE_PING};
use super::rpc::{Params, PeerTransport, RpcError};
use crate::metrics::{GOSSIP_PING_FAILURES_TOTAL, GOSSIP_ROUNDS_TOTAL};

/// Path of the ping endpoint on every node.
pub const PING_PATH: &str = "/ping";

/// Query parameter carrying the encoded node list.
pub const NODES_PARAM: &str = "nodes";

/// One destination of a gossip round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingTarget {
    /// The configured rendezvous URL.  Never marked down.
    Bootstrap(String),
    /// A live peer from the membership table.
    Node(MeshNode),
}

impl PingTarget {
    pub fn ping_url(&self) -> String {
        match self {
            PingTarget::Bootstrap(url) => format!("{}{PING_PATH}", url.trim_end_matches('/')),
            PingTarget::Node(node) => format!("{}{PING_PATH}", node.base_url()),
        }
    }
}

/// Decrements the in-flight round counter when a round finishes or is dropped.
struct RoundGuard(Arc<AtomicUsize>);

impl Drop for RoundGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Drives gossip rounds on a fixed interval.
#[derive(Clone)]
pub struct GossipScheduler {
    membership: Arc<Membership>,
    transport: Arc<dyn PeerTransport>,
    bootstrap_url: String,
    interval: Duration,
    skip_overlapping_rounds: bool,
    rounds_in_flight: Arc<AtomicUsize>,
}

impl GossipScheduler {
    pub fn new(
        membership: Arc<Membership>,
        transport: Arc<dyn PeerTransport>,
        bootstrap_url: impl Into<String>,
        interval: Duration,
        skip_overlapping_rounds: bool,
    ) -> Self {
        Self {
            membership,
            transport,
            bootstrap_url: bootstrap_url.into(),
            interval,
            skip_overlapping_rounds,
            rounds_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bootstrap URL followed by every live node except the local one.
    pub fn targets(&self) -> Vec<PingTarget> {
        std::iter::once(PingTarget::Bootstrap(self.bootstrap_url.clone()))
            .chain(self.membership.live_peers().into_iter().map(PingTarget::Node))
            .collect()
    }

    /// Number of rounds whose pings have not all settled yet.
    pub fn rounds_in_flight(&self) -> usize {
        self.rounds_in_flight.load(Ordering::SeqCst)
    }

    /// Snapshot membership and build one round.
    ///
    /// Returns `None` when overlapping rounds are disabled and a previous
    /// round is still running.  The returned future resolves once every
    /// ping has settled; it fails only if an observer fails.
    pub fn prepare_round(
        &self,
    ) -> Option<impl Future<Output = Result<(), MeshError>> + Send + 'static> {
        if self.skip_overlapping_rounds && self.rounds_in_flight() > 0 {
            debug!("Previous gossip round still in flight, skipping tick");
            return None;
        }
        self.rounds_in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = RoundGuard(self.rounds_in_flight.clone());

        let live = self.membership.live_nodes();
        let mut params = Params::new();
        params.insert(NODES_PARAM.to_string(), codec::encode(&live));
        let params = Arc::new(params);

        let targets = self.targets();
        let membership = self.membership.clone();
        let transport = self.transport.clone();

        Some(async move {
            let _guard = guard;
            let mut pings = JoinSet::new();
            for target in targets {
                pings.spawn(ping(
                    membership.clone(),
                    transport.clone(),
                    target,
                    params.clone(),
                ));
            }

            let mut result = Ok(());
            while let Some(joined) = pings.join_next().await {
                match joined {
                    Ok(Err(err)) if result.is_ok() => result = Err(err),
                    Ok(_) => {}
                    Err(err) => error!("Ping task panicked: {err}"),
                }
            }
            counter!(GOSSIP_ROUNDS_TOTAL).increment(1);
            result
        })
    }

    /// Run one round as a detached task.
    pub fn spawn_round(&self) -> Option<tokio::task::JoinHandle<Result<(), MeshError>>> {
        self.prepare_round().map(tokio::spawn)
    }

    /// Tick forever, starting a round on every tick.
    ///
    /// Rounds are not awaited by the timer.  The loop only ends when a
    /// round reports an observer failure, which is forwarded to `fatal`.
    pub async fn run(self, fatal: mpsc::UnboundedSender<MeshError>) {
        info!(
            bootstrap = %self.bootstrap_url,
            interval_ms = self.interval.as_millis() as u64,
            "Gossip scheduler started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut rounds = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(round) = self.prepare_round() {
                        rounds.spawn(round);
                    }
                }
                Some(finished) = rounds.join_next(), if !rounds.is_empty() => {
                    match finished {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            error!("Gossip stopped: {err}");
                            let _ = fatal.send(err);
                            return;
                        }
                        Err(err) => error!("Gossip round panicked: {err}"),
                    }
                }
            }
        }
    }
}

/// Ping one target and fold its reply into membership.
async fn ping(
    membership: Arc<Membership>,
    transport: Arc<dyn PeerTransport>,
    target: PingTarget,
    params: Arc<Params>,
) -> Result<(), MeshError> {
    let url = target.ping_url();
    match transport.call(&url, &params).await {
        Ok(reply) => {
            let nodes = reply
                .get(NODES_PARAM)
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let joined = membership.join_all(nodes, SOURCE_PING)?;
            debug!(%url, joined, "Ping ok");
        }
        Err(err) => {
            counter!(GOSSIP_PING_FAILURES_TOTAL, "kind" => err.kind()).increment(1);
            match (&err, &target) {
                (RpcError::ConnectionRefused { .. }, PingTarget::Node(node)) => {
                    membership.mark_down(node)?;
                }
                _ => debug!(%url, kind = err.kind(), "Ping failed: {err}"),
            }
        }
    }
    Ok(())
}
