//! Axum router construction and route mapping.
//!
//! The [`app`] function wires every endpoint to its handler and returns a
//! ready-to-serve [`axum::Router`].
//!
//! All endpoints are `GET` requests driven by query parameters.  Queries
//! are decoded once into a `HashMap` and handed to the handlers.  When the
//! mesh is active, a middleware replicates every successful mutation
//! (`/set`, `/rm`, `/clear`) to the live peers after the local handler has
//! finished.

use axum::{
    extract::{RawQuery, State},
    http::{HeaderValue, Request, Uri},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Json, Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;
use utoipa::OpenApi;

use crate::errors::KvError;
use crate::handlers::{kv, node};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

/// Paths whose handlers change the store and must be replicated.
pub const MUTATING_PATHS: &[&str] = &["/set", "/rm", "/clear"];

// -- OpenAPI document --------------------------------------------------------

/// OpenAPI documentation for the nkv HTTP API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "nkv API",
        version = "0.1.0",
        description = "Eventually-consistent in-memory key-value mesh"
    ),
    paths(
        kv::set,
        kv::get,
        kv::rm,
        kv::clear,
        kv::is,
        kv::get_keys,
        kv::get_values,
        kv::get_all,
        node::healthcheck,
        node::status,
        node::ping,
    ),
    components(schemas(kv::Record, node::NodeStatus)),
    tags(
        (name = "Records", description = "Key-value operations"),
        (name = "Node", description = "Node health and settings"),
        (name = "Mesh", description = "Inter-node membership exchange"),
    )
)]
struct ApiDoc;

/// Build the axum [`Router`] with every route.
///
/// `/ping` is only routed when the mesh is active, and `/metrics` only
/// when metrics are enabled.
pub fn app(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/set", get(handle_set))
        .route("/get", get(handle_get))
        .route("/rm", get(handle_rm))
        .route("/clear", get(handle_clear))
        .route("/is", get(handle_is))
        .route("/getKeys", get(handle_get_keys))
        .route("/getValues", get(handle_get_values))
        .route("/getAll", get(handle_get_all))
        .route("/healthcheck", get(node::healthcheck))
        .route("/status", get(handle_status))
        .route("/openapi.json", get(openapi_json));

    if state.mesh.is_some() {
        router = router.route("/ping", get(handle_ping));
    }
    if state.config.observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .fallback(handle_not_found)
        .with_state(state.clone())
        // Layer ordering: inner layers run first, outer layers wrap them.
        // replication_middleware is innermost so it sees the handler's status.
        .layer(middleware::from_fn_with_state(state, replication_middleware))
        .layer(middleware::from_fn(common_headers_middleware))
        // metrics_middleware is outer (captures full request lifecycle).
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}

// -- Replication middleware --------------------------------------------------

/// Replicate successful mutations to the mesh.
///
/// Runs after the handler.  Failed mutations (any non-2xx response) are
/// never replicated.  The replica fan-out is detached: the client response
/// is returned without waiting for any peer.
async fn replication_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(mesh) = state.mesh.clone() else {
        return next.run(req).await;
    };
    let path = req.uri().path().to_string();
    if !MUTATING_PATHS.contains(&path.as_str()) {
        return next.run(req).await;
    }

    let params = parse_query(req.uri().query().map(str::to_string));
    let response = next.run(req).await;

    if response.status().is_success() {
        // Fire-and-forget: the handle is dropped, peers are not awaited.
        let _ = mesh.replicate(&path, &params);
    } else {
        debug!(%path, status = %response.status(), "Mutation failed, not replicating");
    }
    response
}

// -- Common headers middleware -----------------------------------------------

/// Middleware that adds common response headers to every response:
/// - `x-request-id`: random UUID
/// - `Date`: RFC 7231 formatted timestamp
/// - `Server`: `nkv`
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if !headers.contains_key("x-request-id") {
        let request_id = uuid::Uuid::new_v4().to_string();
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            headers.insert("x-request-id", value);
        }
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(value) = HeaderValue::from_str(&date) {
        headers.insert("date", value);
    }
    headers.insert("server", HeaderValue::from_static("nkv"));

    response
}

// -- Query parameter parsing helper ------------------------------------------

/// Parse a raw query string into a HashMap.
///
/// `+` decodes to a space, as form encoders produce.  A parameter without
/// `=` maps to the empty string.  Repeated parameters keep the last value.
pub fn parse_query(raw: Option<String>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Some(qs) = raw {
        for part in qs.split('&') {
            if part.is_empty() {
                continue;
            }
            let (k, v) = part.split_once('=').unwrap_or((part, ""));
            map.insert(decode_component(k), decode_component(v));
        }
    }
    map
}

fn decode_component(s: &str) -> String {
    let spaced = s.replace('+', " ");
    percent_encoding::percent_decode_str(&spaced)
        .decode_utf8_lossy()
        .into_owned()
}

// -- Route dispatch ----------------------------------------------------------

async fn handle_set(
    State(state): State<Arc<AppState>>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, KvError> {
    kv::set(state, &parse_query(raw_query)).await
}

async fn handle_get(
    State(state): State<Arc<AppState>>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, KvError> {
    kv::get(state, &parse_query(raw_query)).await
}

async fn handle_rm(
    State(state): State<Arc<AppState>>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, KvError> {
    kv::rm(state, &parse_query(raw_query)).await
}

async fn handle_clear(State(state): State<Arc<AppState>>) -> Result<Response, KvError> {
    kv::clear(state).await
}

async fn handle_is(
    State(state): State<Arc<AppState>>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, KvError> {
    kv::is(state, &parse_query(raw_query)).await
}

async fn handle_get_keys(State(state): State<Arc<AppState>>) -> Result<Response, KvError> {
    kv::get_keys(state).await
}

async fn handle_get_values(State(state): State<Arc<AppState>>) -> Result<Response, KvError> {
    kv::get_values(state).await
}

async fn handle_get_all(State(state): State<Arc<AppState>>) -> Result<Response, KvError> {
    kv::get_all(state).await
}

async fn handle_status(State(state): State<Arc<AppState>>) -> Result<Response, KvError> {
    node::status(state).await
}

async fn handle_ping(
    State(state): State<Arc<AppState>>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, KvError> {
    node::ping(state, &parse_query(raw_query)).await
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

async fn handle_not_found(uri: Uri) -> KvError {
    KvError::HandlerNotFound {
        path: uri.path().to_string(),
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::mesh::events::MeshObserver;
    use crate::mesh::node::MeshNode;
    use crate::mesh::replication::NO_REPLICATE_PARAM;
    use crate::mesh::rpc::test_support::FakeTransport;
    use crate::mesh::rpc::{PeerTransport, RpcClient};
    use crate::mesh::MeshService;
    use crate::storage::backend::KvStore;
    use crate::storage::memory::MemoryStore;
    use axum::http::StatusCode;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.observability.metrics = false;
        config
    }

    fn single_node_state() -> Arc<AppState> {
        Arc::new(AppState {
            config: test_config(),
            store: Arc::new(MemoryStore::new()),
            mesh: None,
        })
    }

    fn mesh_state(
        local: MeshNode,
        bootstrap: &str,
        transport: Arc<dyn PeerTransport>,
    ) -> (Arc<AppState>, Arc<MeshService>) {
        let mut config = test_config();
        config.server.hostname = local.host.clone();
        config.server.port = local.port;
        config.mesh.network_url = Some(bootstrap.to_string());
        let (mesh, _fatal) = MeshService::new(
            local,
            bootstrap,
            &config.mesh,
            transport,
            Vec::<Arc<dyn MeshObserver>>::new(),
        );
        let mesh = Arc::new(mesh);
        let state = Arc::new(AppState {
            config,
            store: Arc::new(MemoryStore::new()),
            mesh: Some(mesh.clone()),
        });
        (state, mesh)
    }

    async fn send(app: &Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(Request::get(uri).body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    async fn wait_for<F: Fn() -> bool>(check: F) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        check()
    }

    // -- Query parsing --

    #[test]
    fn test_parse_query() {
        let q = parse_query(Some("k=test%3Aset&v=a+b&flag&=x&".to_string()));
        assert_eq!(q["k"], "test:set");
        assert_eq!(q["v"], "a b");
        assert_eq!(q["flag"], "");
        assert_eq!(q[""], "x");
        assert!(parse_query(None).is_empty());
    }

    #[test]
    fn test_parse_query_utf8() {
        let q = parse_query(Some("k=test%3Aset%3Autf%3A%E2%9C%93&v=%F0%A4%AD%A2".to_string()));
        assert_eq!(q["k"], "test:set:utf:✓");
        assert_eq!(q["v"], "𤭢");
    }

    // -- Key-value API --

    #[tokio::test]
    async fn test_set_then_get() {
        let app = app(single_node_state());

        let (status, body) = send(&app, "/set?k=a&v=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));

        let (status, body) = send(&app, "/get?k=a").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!("1"));
    }

    #[tokio::test]
    async fn test_set_empty_value() {
        let app = app(single_node_state());
        let (status, _) = send(&app, "/set?k=empty&v=").await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send(&app, "/get?k=empty").await;
        assert_eq!(body, json!(""));
    }

    #[tokio::test]
    async fn test_set_validation_errors() {
        let app = app(single_node_state());
        let long_key = "x".repeat(500);
        let long_value = "x".repeat(1000);
        let cases = [
            ("/set".to_string(), "MISSING_KEY_PARAM"),
            ("/set?k=".to_string(), "EMPTY_KEY"),
            (format!("/set?k={long_key}"), "MAXIMUM_KEY_LENGTH_REACHED"),
            ("/set?k=test".to_string(), "MISSING_VALUE_PARAM"),
            (format!("/set?k=test&v={long_value}"), "MAXIMUM_VALUE_LENGTH_REACHED"),
        ];
        for (uri, code) in cases {
            let (status, body) = send(&app, &uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["error"], code, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_get_missing_record() {
        let app = app(single_node_state());
        let (status, body) = send(&app, "/get?k=nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "MISSING_RECORD");
    }

    #[tokio::test]
    async fn test_rm_and_is() {
        let app = app(single_node_state());
        send(&app, "/set?k=a&v=1").await;

        let (status, _) = send(&app, "/is?k=a").await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, "/rm?k=a").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, body) = send(&app, "/is?k=a").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "MISSING_RECORD");

        let (status, _) = send(&app, "/rm?k=a").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_listing_and_clear() {
        let app = app(single_node_state());
        send(&app, "/set?k=b&v=2").await;
        send(&app, "/set?k=a&v=1").await;

        assert_eq!(send(&app, "/getKeys").await.1, json!(["a", "b"]));
        assert_eq!(send(&app, "/getValues").await.1, json!(["1", "2"]));
        assert_eq!(
            send(&app, "/getAll").await.1,
            json!([{"k": "a", "v": "1"}, {"k": "b", "v": "2"}])
        );

        let (status, _) = send(&app, "/clear").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(send(&app, "/getKeys").await.1, json!([]));
    }

    #[tokio::test]
    async fn test_healthcheck_and_status() {
        let app = app(single_node_state());
        assert_eq!(send(&app, "/healthcheck").await.1, json!({"status": "ok"}));

        send(&app, "/set?k=a&v=1").await;
        let (status, body) = send(&app, "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["hostname"], "localhost");
        assert_eq!(body["port"], 80);
        assert_eq!(body["maxKeyLength"], 64);
        assert_eq!(body["maxValueLength"], 256);
        assert_eq!(body["availableRecords"], 1);
        assert!(body["version"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let app = app(single_node_state());
        let (status, body) = send(&app, "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "No register handler for [/nope]");
    }

    #[tokio::test]
    async fn test_ping_not_routed_in_single_node_mode() {
        let app = app(single_node_state());
        let (status, _) = send(&app, "/ping?nodes=a:80").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_common_headers() {
        let app = app(single_node_state());
        let response = app
            .oneshot(
                Request::get("/healthcheck")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()["server"], "nkv");
        assert!(response.headers().contains_key("x-request-id"));
        assert!(response.headers().contains_key("date"));
    }

    #[tokio::test]
    async fn test_openapi_document() {
        let app = app(single_node_state());
        let (status, body) = send(&app, "/openapi.json").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/set"].is_object());
        assert!(body["paths"]["/ping"].is_object());
    }

    // -- Mesh wiring --

    #[tokio::test]
    async fn test_ping_with_garbage_keeps_table() {
        let transport = Arc::new(FakeTransport::default());
        let (state, mesh) = mesh_state(MeshNode::new("x", 9000), "http://y:9000", transport);
        let app = app(state);

        let (status, body) = send(&app, "/ping?nodes=not-a-node").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"nodes": [{"host": "x", "port": 9000, "isDown": false, "source": "init"}]})
        );
        assert_eq!(mesh.membership().nodes().len(), 1);
    }

    #[tokio::test]
    async fn test_ping_joins_passed_nodes() {
        let transport = Arc::new(FakeTransport::default());
        let (state, mesh) = mesh_state(MeshNode::new("x", 9000), "http://y:9000", transport);
        let app = app(state);

        let (status, body) = send(&app, "/ping?nodes=y%3A9000%7Cz%3A9001").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nodes"].as_array().unwrap().len(), 3);
        assert_eq!(mesh.membership().nodes()[1].source, "passed");
    }

    #[tokio::test]
    async fn test_successful_mutation_is_replicated() {
        let transport = Arc::new(FakeTransport::default());
        let (state, mesh) =
            mesh_state(MeshNode::new("x", 9000), "http://lb:80", transport.clone());
        mesh.handle_ping("y:9000").unwrap();
        let app = app(state);

        let (status, _) = send(&app, "/set?k=a&v=1").await;
        assert_eq!(status, StatusCode::OK);

        assert!(wait_for(|| !transport.calls().is_empty()).await);
        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].url, "http://y:9000/set");
        assert_eq!(calls[0].params["k"], "a");
        assert_eq!(calls[0].params[NO_REPLICATE_PARAM], "true");
    }

    #[tokio::test]
    async fn test_failed_replica_and_read_requests_are_not_replicated() {
        let transport = Arc::new(FakeTransport::default());
        let (state, mesh) =
            mesh_state(MeshNode::new("x", 9000), "http://lb:80", transport.clone());
        mesh.handle_ping("y:9000").unwrap();
        let app = app(state);

        // Failed mutation.
        assert_eq!(send(&app, "/set?k=").await.0, StatusCode::BAD_REQUEST);
        assert_eq!(send(&app, "/rm?k=missing").await.0, StatusCode::NOT_FOUND);
        // Replica request.
        assert_eq!(
            send(&app, "/set?k=a&v=1&noReplicate=true").await.0,
            StatusCode::OK
        );
        // Read-only request.
        assert_eq!(send(&app, "/get?k=a").await.0, StatusCode::OK);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(transport.calls().is_empty());
    }

    // -- Cross-node scenarios over real sockets --

    async fn spawn_node(
        listener: tokio::net::TcpListener,
        bootstrap: &str,
    ) -> (Arc<AppState>, Arc<MeshService>) {
        let port = listener.local_addr().unwrap().port();
        let transport = Arc::new(RpcClient::new(Duration::from_millis(1000)).unwrap());
        let (state, mesh) = mesh_state(MeshNode::new("127.0.0.1", port), bootstrap, transport);
        let router = app(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (state, mesh)
    }

    async fn bind() -> (tokio::net::TcpListener, u16) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    fn addresses(mesh: &MeshService) -> Vec<String> {
        let mut addrs: Vec<String> = mesh
            .membership()
            .live_nodes()
            .iter()
            .map(MeshNode::address)
            .collect();
        addrs.sort();
        addrs
    }

    #[tokio::test]
    async fn test_two_nodes_discover_each_other() {
        let (lx, px) = bind().await;
        let (ly, py) = bind().await;
        let (_, x) = spawn_node(lx, &format!("http://127.0.0.1:{py}")).await;
        let (_, y) = spawn_node(ly, &format!("http://127.0.0.1:{px}")).await;

        x.gossip().spawn_round().unwrap().await.unwrap().unwrap();

        let mut expected = vec![format!("127.0.0.1:{px}"), format!("127.0.0.1:{py}")];
        expected.sort();
        assert_eq!(addresses(&x), expected);
        assert_eq!(addresses(&y), expected);
    }

    #[tokio::test]
    async fn test_mutation_reaches_live_peer() {
        let (lx, px) = bind().await;
        let (ly, py) = bind().await;
        let (x_state, x) = spawn_node(lx, &format!("http://127.0.0.1:{py}")).await;
        let (y_state, _) = spawn_node(ly, &format!("http://127.0.0.1:{px}")).await;
        x.gossip().spawn_round().unwrap().await.unwrap().unwrap();

        let (status, _) = send(&app(x_state), "/set?k=a&v=1").await;
        assert_eq!(status, StatusCode::OK);

        let mut replicated = false;
        for _ in 0..100 {
            if y_state.store.get("a").await.unwrap().as_deref() == Some("1") {
                replicated = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(replicated, "value never reached the peer");
    }

    #[tokio::test]
    async fn test_refusing_peer_is_marked_down_and_skipped() {
        let (lx, _) = bind().await;
        let (ly, py) = bind().await;
        drop(ly);
        let y_url = format!("http://127.0.0.1:{py}");
        let (_, x) = spawn_node(lx, &y_url).await;
        x.handle_ping(&format!("127.0.0.1:{py}")).unwrap();
        assert_eq!(x.membership().live_peers().len(), 1);

        x.gossip().spawn_round().unwrap().await.unwrap().unwrap();

        assert!(x.membership().live_peers().is_empty());
        assert_eq!(x.membership().nodes().len(), 2);

        let mut params = HashMap::new();
        params.insert("k".to_string(), "a".to_string());
        params.insert("v".to_string(), "1".to_string());
        assert!(x.replicate("/set", &params).is_none());
    }
}
