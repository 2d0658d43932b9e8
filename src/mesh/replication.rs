//! Fan-out of locally applied mutations to every live peer.
//!
//! Outgoing copies carry a `noReplicate=true` marker.  A node receiving a
//! marked request applies it locally and stops there, so one client
//! mutation costs exactly one call per live peer of the origin node.

use std::sync::Arc;

use metrics::counter;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

use super::membership::Membership;
use super::rpc::{Params, PeerTransport};
use crate::metrics::REPLICATION_CALLS_TOTAL;

/// Loop-guard query parameter attached to replica requests.
pub const NO_REPLICATE_PARAM: &str = "noReplicate";

/// Whether `params` already carry the loop-guard marker.
pub fn is_replica(params: &Params) -> bool {
    params
        .get(NO_REPLICATE_PARAM)
        .is_some_and(|value| !value.is_empty())
}

/// Sends copies of mutating requests to live peers.
#[derive(Clone)]
pub struct ReplicationDispatcher {
    membership: Arc<Membership>,
    transport: Arc<dyn PeerTransport>,
}

impl ReplicationDispatcher {
    pub fn new(membership: Arc<Membership>, transport: Arc<dyn PeerTransport>) -> Self {
        Self {
            membership,
            transport,
        }
    }

    /// Replicate a completed mutation at `path` to every live peer.
    ///
    /// Returns immediately.  The calls run on a detached task: nothing
    /// awaits them on the request path, failures are logged and dropped,
    /// and nothing is retried.  The handle is only useful to tests.
    ///
    /// Returns `None` when `params` are already a replica or when there is
    /// no live peer to send to.
    pub fn replicate(&self, path: &str, params: &Params) -> Option<JoinHandle<()>> {
        if is_replica(params) {
            debug!(path, "Replica request, not fanning out");
            return None;
        }

        let peers = self.membership.live_peers();
        if peers.is_empty() {
            return None;
        }

        let mut marked = params.clone();
        marked.insert(NO_REPLICATE_PARAM.to_string(), "true".to_string());
        let marked = Arc::new(marked);

        let mut calls = JoinSet::new();
        for peer in peers {
            let url = format!("{}{}", peer.base_url(), path);
            let transport = self.transport.clone();
            let params = marked.clone();
            calls.spawn(async move {
                match transport.call(&url, &params).await {
                    Ok(_) => {
                        counter!(REPLICATION_CALLS_TOTAL, "outcome" => "ok").increment(1);
                        debug!(%url, "Replicated");
                    }
                    Err(err) => {
                        counter!(REPLICATION_CALLS_TOTAL, "outcome" => err.kind()).increment(1);
                        warn!(%url, kind = err.kind(), "Replication failed: {err}");
                    }
                }
            });
        }

        Some(tokio::spawn(async move {
            while calls.join_next().await.is_some() {}
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::node::MeshNode;
    use crate::mesh::rpc::test_support::{FakeReply, FakeTransport};
    use serde_json::json;

    fn setup() -> (Arc<Membership>, Arc<FakeTransport>, ReplicationDispatcher) {
        let membership = Arc::new(Membership::new(MeshNode::new("self", 9000), false, vec![]));
        for host in ["a", "b", "c"] {
            membership
                .join(&json!({"host": host, "port": 9000, "isDown": false}), "test")
                .unwrap();
        }
        let transport = Arc::new(FakeTransport::default());
        let dispatcher = ReplicationDispatcher::new(membership.clone(), transport.clone());
        (membership, transport, dispatcher)
    }

    fn set_params() -> Params {
        let mut params = Params::new();
        params.insert("k".to_string(), "a".to_string());
        params.insert("v".to_string(), "1".to_string());
        params
    }

    #[test]
    fn test_is_replica() {
        let mut params = set_params();
        assert!(!is_replica(&params));
        params.insert(NO_REPLICATE_PARAM.to_string(), String::new());
        assert!(!is_replica(&params));
        params.insert(NO_REPLICATE_PARAM.to_string(), "true".to_string());
        assert!(is_replica(&params));
    }

    #[tokio::test]
    async fn test_marked_params_issue_no_calls() {
        let (_, transport, dispatcher) = setup();
        let mut params = set_params();
        params.insert(NO_REPLICATE_PARAM.to_string(), "true".to_string());

        assert!(dispatcher.replicate("/set", &params).is_none());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_fans_out_to_live_peers_with_marker() {
        let (membership, transport, dispatcher) = setup();
        membership.mark_down(&MeshNode::new("b", 9000)).unwrap();

        let params = set_params();
        dispatcher.replicate("/set", &params).unwrap().await.unwrap();

        assert_eq!(
            transport.urls(),
            vec!["http://a:9000/set", "http://c:9000/set"]
        );
        for call in transport.calls() {
            assert_eq!(call.params["k"], "a");
            assert_eq!(call.params["v"], "1");
            assert_eq!(call.params[NO_REPLICATE_PARAM], "true");
        }
        // The caller's params are left untouched.
        assert!(!params.contains_key(NO_REPLICATE_PARAM));
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let (_, transport, dispatcher) = setup();
        transport.reply("http://a:9000/clear", FakeReply::Refused);
        transport.reply("http://b:9000/clear", FakeReply::Timeout);

        dispatcher
            .replicate("/clear", &Params::new())
            .unwrap()
            .await
            .unwrap();
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_replication_failure_does_not_mark_down() {
        let (membership, transport, dispatcher) = setup();
        transport.reply("http://a:9000/rm", FakeReply::Refused);

        dispatcher
            .replicate("/rm", &set_params())
            .unwrap()
            .await
            .unwrap();
        assert_eq!(membership.live_peers().len(), 3);
    }

    #[tokio::test]
    async fn test_no_peers_no_calls() {
        let membership = Arc::new(Membership::new(MeshNode::new("self", 9000), false, vec![]));
        let transport = Arc::new(FakeTransport::default());
        let dispatcher = ReplicationDispatcher::new(membership, transport.clone());

        assert!(dispatcher.replicate("/set", &set_params()).is_none());
        assert!(transport.calls().is_empty());
    }
}
