//! HTTP front end for kvgate typed collections
//!
//! Exposes string, hash and list operations of a [`TypedStore`] as JSON
//! routes. Every response uses the `{result, error}` envelope from
//! [`response`].

pub mod config;
pub mod response;
pub mod routes;

use axum::Router;
use kvgate_store::{Result, StoredValue, TypedStore};
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// State shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: TypedStore,
    /// Coerce booleans and nulls to text instead of rejecting them
    pub lenient_values: bool,
}

impl AppState {
    pub fn new(store: TypedStore) -> Self {
        Self {
            store,
            lenient_values: false,
        }
    }

    pub fn with_lenient_values(mut self, lenient: bool) -> Self {
        self.lenient_values = lenient;
        self
    }

    /// Resolve a request value to its stored variant
    pub fn value(&self, raw: Value) -> Result<StoredValue> {
        if self.lenient_values {
            StoredValue::from_json_lenient(raw)
        } else {
            StoredValue::from_json(raw)
        }
    }
}

/// Build the application with request tracing
pub fn app(state: AppState) -> Router {
    routes::router()
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
