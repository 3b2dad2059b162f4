//! Router and request handlers
//!
//! Write routes take the key inside the JSON body. The body is bound once
//! by [`Keyed`], which also resolves the key before the handler runs, so a
//! bad key is rejected without touching the backend. Read routes take the
//! key from the query string.

use axum::extract::{FromRequest, Query, Request, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use kvgate_store::{CanonicalKey, StoredValue};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

use crate::response::{ok, ApiError, ApiResult};
use crate::AppState;

/// Build the router; state is attached by [`crate::app`]
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/string/set", post(set_string))
        .route("/string/get", get(get_string))
        .route("/hash/set", post(set_hash))
        .route("/hash/get", get(get_hash))
        .route("/hash/field", get(get_hash_field).post(set_hash_fields))
        .route("/list/set", post(set_list))
        .route("/list/get", get(get_list))
        .route("/list/range", get(get_list_range))
        .route("/list/index", post(set_list_index))
        .route("/del", post(delete_key))
        .route("/keys", get(list_keys))
        .route("/save", post(save))
        .route("/health", get(health))
}

// ============================================================================
// Request bodies
// ============================================================================

/// A request body carrying a raw key expression
pub trait KeyedBody {
    fn raw_key(&self) -> &Value;
}

macro_rules! keyed_body {
    ($($ty:ty),* $(,)?) => {
        $(impl KeyedBody for $ty {
            fn raw_key(&self) -> &Value {
                &self.key
            }
        })*
    };
}

#[derive(Debug, Deserialize)]
pub struct SetStringRequest {
    #[serde(default)]
    pub key: Value,
    pub value: String,
    #[serde(default)]
    pub ttl: i64,
}

#[derive(Debug, Deserialize)]
pub struct SetHashRequest {
    #[serde(default)]
    pub key: Value,
    pub value: Map<String, Value>,
    #[serde(default)]
    pub ttl: i64,
}

#[derive(Debug, Deserialize)]
pub struct SetListRequest {
    #[serde(default)]
    pub key: Value,
    pub value: Vec<Value>,
    #[serde(default)]
    pub ttl: i64,
}

#[derive(Debug, Deserialize)]
pub struct HashFieldsRequest {
    #[serde(default)]
    pub key: Value,
    pub value: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ListIndexRequest {
    #[serde(default)]
    pub key: Value,
    pub index: i64,
    pub value: Value,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub key: Value,
}

keyed_body!(
    SetStringRequest,
    SetHashRequest,
    SetListRequest,
    HashFieldsRequest,
    ListIndexRequest,
    DeleteRequest,
);

/// JSON body with its key already resolved
pub struct Keyed<T> {
    pub key: CanonicalKey,
    pub body: T,
}

impl<T> FromRequest<AppState> for Keyed<T>
where
    T: DeserializeOwned + KeyedBody + Send,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let Json(body) = Json::<T>::from_request(req, state).await?;
        let key = state.store.key(body.raw_key())?;
        debug!(key = %key, "Resolved request key");
        Ok(Self { key, body })
    }
}

// ============================================================================
// Query parameters
// ============================================================================

type Params = Query<HashMap<String, String>>;

fn param<'a>(
    params: &'a HashMap<String, String>,
    name: &'static str,
) -> Result<&'a str, ApiError> {
    params
        .get(name)
        .map(String::as_str)
        .ok_or(ApiError::MissingParam(name))
}

fn int_param(
    params: &HashMap<String, String>,
    name: &'static str,
    default: i64,
) -> Result<i64, ApiError> {
    match params.get(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: std::num::ParseIntError| ApiError::InvalidParam {
            name,
            reason: e.to_string(),
        }),
    }
}

fn query_key(
    state: &AppState,
    params: &HashMap<String, String>,
) -> Result<CanonicalKey, ApiError> {
    Ok(state.store.key_text(param(params, "key")?)?)
}

fn list_json(items: &[StoredValue]) -> Value {
    Value::Array(items.iter().map(StoredValue::to_json).collect())
}

// ============================================================================
// Strings
// ============================================================================

async fn set_string(
    State(state): State<AppState>,
    Keyed { key, body }: Keyed<SetStringRequest>,
) -> ApiResult {
    let ack = state.store.set_string(&key, &body.value, body.ttl).await?;
    ok(ack)
}

async fn get_string(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    let key = query_key(&state, &params)?;
    let value = state.store.get_string(&key).await?;
    ok(value)
}

// ============================================================================
// Hashes
// ============================================================================

async fn set_hash(
    State(state): State<AppState>,
    Keyed { key, body }: Keyed<SetHashRequest>,
) -> ApiResult {
    state.store.set_hash(&key, &body.value, body.ttl).await?;
    ok("success")
}

async fn get_hash(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    let key = query_key(&state, &params)?;
    let fields = state.store.get_hash(&key).await?;
    ok(fields
        .into_iter()
        .map(|(field, value)| (field, Value::String(value)))
        .collect::<Map<String, Value>>())
}

async fn get_hash_field(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    let key = query_key(&state, &params)?;
    let field = param(&params, "field")?;
    let value = state.store.hget(&key, field).await?;
    ok(value)
}

async fn set_hash_fields(
    State(state): State<AppState>,
    Keyed { key, body }: Keyed<HashFieldsRequest>,
) -> ApiResult {
    let created = state.store.hset(&key, &body.value).await?;
    ok(created)
}

// ============================================================================
// Lists
// ============================================================================

async fn set_list(
    State(state): State<AppState>,
    Keyed { key, body }: Keyed<SetListRequest>,
) -> ApiResult {
    let values = match state.value(Value::Array(body.value))? {
        StoredValue::List(items) => items,
        other => vec![other],
    };
    state.store.set_list(&key, &values, body.ttl).await?;
    ok("success")
}

async fn get_list(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    let key = query_key(&state, &params)?;
    let items = state.store.get_list(&key).await?;
    ok(list_json(&items))
}

async fn get_list_range(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    let key = query_key(&state, &params)?;
    let start = int_param(&params, "start", 0)?;
    let stop = int_param(&params, "stop", -1)?;
    let items = state.store.lrange(&key, start, stop).await?;
    ok(list_json(&items))
}

async fn set_list_index(
    State(state): State<AppState>,
    Keyed { key, body }: Keyed<ListIndexRequest>,
) -> ApiResult {
    let value = state.value(body.value)?;
    let ack = state.store.lset(&key, body.index, &value).await?;
    ok(ack)
}

// ============================================================================
// Keys and server
// ============================================================================

async fn delete_key(
    State(state): State<AppState>,
    Keyed { key, .. }: Keyed<DeleteRequest>,
) -> ApiResult {
    let removed = state.store.delete_key(&key).await?;
    ok(removed)
}

async fn list_keys(State(state): State<AppState>, Query(params): Params) -> ApiResult {
    let pattern = param(&params, "pattern")?;
    let keys = state.store.list_keys(pattern).await?;
    ok(keys.into_iter().collect::<Vec<_>>())
}

async fn save(State(state): State<AppState>) -> ApiResult {
    state.store.save().await?;
    ok("saved")
}

async fn health(State(state): State<AppState>) -> ApiResult {
    state.store.ping().await?;
    ok("ok")
}
