//! Node-level handlers: health, status and the mesh ping endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::errors::KvError;
use crate::mesh::gossip::NODES_PARAM;
use crate::mesh::node::MeshNode;
use crate::AppState;

/// Body of `/status`.
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub version: String,
    pub hostname: String,
    pub port: u16,
    pub max_key_length: usize,
    pub max_value_length: usize,
    pub available_records: usize,
}

/// Body of `/ping`.
#[derive(Debug, Serialize)]
pub struct PingReply {
    pub nodes: Vec<MeshNode>,
}

/// `GET /healthcheck` -- Returns `{"status": "ok"}` with 200 OK.
#[utoipa::path(
    get,
    path = "/healthcheck",
    tag = "Node",
    operation_id = "HealthCheck",
    responses((status = 200, description = "Health check OK"))
)]
pub async fn healthcheck() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

/// `GET /status` -- Node settings and record count.
#[utoipa::path(
    get,
    path = "/status",
    tag = "Node",
    operation_id = "Status",
    responses((status = 200, description = "Node status", body = NodeStatus))
)]
pub async fn status(state: Arc<AppState>) -> Result<Response, KvError> {
    let status = NodeStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        hostname: state.config.server.hostname.clone(),
        port: state.config.server.port,
        max_key_length: state.config.store.max_key_length,
        max_value_length: state.config.store.max_value_length,
        available_records: state.store.size().await?,
    };
    Ok(Json(status).into_response())
}

/// `GET /ping?nodes=host:port|...` -- Mesh membership exchange.
///
/// Joins the caller's live nodes and answers with ours.  Only routed when
/// the mesh is active.
#[utoipa::path(
    get,
    path = "/ping",
    tag = "Mesh",
    operation_id = "Ping",
    params(("nodes" = String, Query, description = "Encoded live node list of the caller")),
    responses(
        (status = 200, description = "Live nodes known to this node"),
        (status = 404, description = "Mesh is not active, so the route is not mounted")
    )
)]
pub async fn ping(state: Arc<AppState>, params: &HashMap<String, String>) -> Result<Response, KvError> {
    // The router only mounts this handler when the mesh is active.
    let Some(mesh) = state.mesh.as_ref() else {
        return Err(KvError::Internal(anyhow::anyhow!(
            "ping handler called without an active mesh"
        )));
    };

    let encoded = params.get(NODES_PARAM).map(String::as_str).unwrap_or_default();
    match mesh.handle_ping(encoded) {
        Ok(nodes) => Ok(Json(PingReply { nodes }).into_response()),
        Err(err) => {
            let internal = KvError::Internal(anyhow::anyhow!("{err}"));
            mesh.report_fatal(err);
            Err(internal)
        }
    }
}
