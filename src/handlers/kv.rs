//! Key-value API handlers.
//!
//! `/set`, `/rm` and `/clear` mutate the store; the router replicates them
//! to the mesh after they succeed.  Everything else is read-only.

use std::collections::HashMap;
use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use super::validators::{validate_key, validate_value};
use crate::errors::KvError;
use crate::AppState;

/// One record as returned by `/getAll`.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct Record {
    pub k: String,
    pub v: String,
}

fn success() -> Response {
    Json(json!({ "success": true })).into_response()
}

/// `GET /set?k=KEY&v=VALUE` -- Insert or overwrite a record.
#[utoipa::path(
    get,
    path = "/set",
    tag = "Records",
    operation_id = "Set",
    params(
        ("k" = String, Query, description = "Record key"),
        ("v" = String, Query, description = "Record value"),
    ),
    responses(
        (status = 200, description = "Record stored"),
        (status = 400, description = "Invalid key or value")
    )
)]
pub async fn set(state: Arc<AppState>, params: &HashMap<String, String>) -> Result<Response, KvError> {
    let key = validate_key(params, &state.config.store)?;
    let value = validate_value(params, &state.config.store)?;

    state.store.set(key, value).await?;
    Ok(success())
}

/// `GET /get?k=KEY` -- Read a record value.
#[utoipa::path(
    get,
    path = "/get",
    tag = "Records",
    operation_id = "Get",
    params(("k" = String, Query, description = "Record key")),
    responses(
        (status = 200, description = "Record value as a JSON string"),
        (status = 400, description = "Invalid key"),
        (status = 404, description = "Missing record")
    )
)]
pub async fn get(state: Arc<AppState>, params: &HashMap<String, String>) -> Result<Response, KvError> {
    let key = validate_key(params, &state.config.store)?;

    let value = state.store.get(key).await?.ok_or(KvError::MissingRecord)?;
    Ok(Json(value).into_response())
}

/// `GET /rm?k=KEY` -- Remove a record.
#[utoipa::path(
    get,
    path = "/rm",
    tag = "Records",
    operation_id = "Remove",
    params(("k" = String, Query, description = "Record key")),
    responses(
        (status = 200, description = "Record removed"),
        (status = 400, description = "Invalid key"),
        (status = 404, description = "Missing record")
    )
)]
pub async fn rm(state: Arc<AppState>, params: &HashMap<String, String>) -> Result<Response, KvError> {
    let key = validate_key(params, &state.config.store)?;

    if !state.store.exists(key).await? {
        return Err(KvError::MissingRecord);
    }
    state.store.rm(key).await?;
    Ok(success())
}

/// `GET /clear` -- Remove every record.
#[utoipa::path(
    get,
    path = "/clear",
    tag = "Records",
    operation_id = "Clear",
    responses((status = 200, description = "Store cleared"))
)]
pub async fn clear(state: Arc<AppState>) -> Result<Response, KvError> {
    state.store.clear().await?;
    Ok(success())
}

/// `GET /is?k=KEY` -- Check that a record exists.
#[utoipa::path(
    get,
    path = "/is",
    tag = "Records",
    operation_id = "Exists",
    params(("k" = String, Query, description = "Record key")),
    responses(
        (status = 200, description = "Record exists"),
        (status = 400, description = "Invalid key"),
        (status = 404, description = "Missing record")
    )
)]
pub async fn is(state: Arc<AppState>, params: &HashMap<String, String>) -> Result<Response, KvError> {
    let key = validate_key(params, &state.config.store)?;

    if !state.store.exists(key).await? {
        return Err(KvError::MissingRecord);
    }
    Ok(success())
}

/// `GET /getKeys` -- Every key, sorted.
#[utoipa::path(
    get,
    path = "/getKeys",
    tag = "Records",
    operation_id = "GetKeys",
    responses((status = 200, description = "Array of keys"))
)]
pub async fn get_keys(state: Arc<AppState>) -> Result<Response, KvError> {
    let keys: Vec<String> = state
        .store
        .entries()
        .await?
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    Ok(Json(keys).into_response())
}

/// `GET /getValues` -- Every value, in key order.
#[utoipa::path(
    get,
    path = "/getValues",
    tag = "Records",
    operation_id = "GetValues",
    responses((status = 200, description = "Array of values"))
)]
pub async fn get_values(state: Arc<AppState>) -> Result<Response, KvError> {
    let values: Vec<String> = state
        .store
        .entries()
        .await?
        .into_iter()
        .map(|(_, v)| v)
        .collect();
    Ok(Json(values).into_response())
}

/// `GET /getAll` -- Every record as `{k, v}`.
#[utoipa::path(
    get,
    path = "/getAll",
    tag = "Records",
    operation_id = "GetAll",
    responses((status = 200, description = "Array of records", body = [Record]))
)]
pub async fn get_all(state: Arc<AppState>) -> Result<Response, KvError> {
    let records: Vec<Record> = state
        .store
        .entries()
        .await?
        .into_iter()
        .map(|(k, v)| Record { k, v })
        .collect();
    Ok(Json(records).into_response())
}
