//! HTTP dispatcher for delivery requests
//!
//! Provides /health, /deliveries/:recipient[/:collection] and
//! /collections/:collection endpoints.

use crate::types::{DeliveryStatusResponse, HealthResponse};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use delivery_coordinator::{DeliveryCoordinator, DeliveryError};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

/// Shared state for the HTTP server
pub struct ServerState {
    pub coordinator: Arc<DeliveryCoordinator>,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(coordinator: Arc<DeliveryCoordinator>) -> Self {
        Self {
            coordinator,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    active_collection: Option<String>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            active_collection: None,
        }
    }
}

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/deliveries/{recipient}", get(delivery_status))
        .route("/deliveries/{recipient}/{collection}", post(start_delivery))
        .route("/collections/{collection}", delete(remove_collection))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let cache_stats = state.coordinator.cache().stats().await;
    let uptime_secs = (Utc::now() - state.started_at).num_seconds() as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        active_deliveries: state.coordinator.active_count(),
        cache: cache_stats,
    })
}

/// Whether a recipient has a delivery in flight
async fn delivery_status(
    State(state): State<SharedState>,
    Path(recipient): Path<String>,
) -> Json<DeliveryStatusResponse> {
    let active_collection = state.coordinator.active_collection(&recipient);
    Json(DeliveryStatusResponse {
        recipient,
        active_collection,
    })
}

/// Kick off a delivery; the sequence itself runs in the background
async fn start_delivery(
    State(state): State<SharedState>,
    Path((recipient, collection)): Path<(String, String)>,
) -> Response {
    match state.coordinator.start(&recipient, &collection).await {
        Ok(_handle) => (
            StatusCode::ACCEPTED,
            Json(DeliveryStatusResponse {
                recipient,
                active_collection: Some(collection),
            }),
        )
            .into_response(),
        Err(DeliveryError::Busy {
            active_collection, ..
        }) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: "Delivery already in progress, please wait".to_string(),
                active_collection: Some(active_collection),
            }),
        )
            .into_response(),
        Err(DeliveryError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("Series not found")),
        )
            .into_response(),
        Err(e) => {
            error!(recipient = %recipient, collection = %collection, error = %e, "Failed to start delivery");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Internal server error")),
            )
                .into_response()
        }
    }
}

/// Drop a collection from the cache
async fn remove_collection(
    State(state): State<SharedState>,
    Path(collection): Path<String>,
) -> Response {
    match state.coordinator.cache().remove_collection(&collection).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(content_cache::StorageError::InvalidKey(_)) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Invalid collection id")),
        )
            .into_response(),
        Err(e) => {
            warn!(collection = %collection, error = %e, "Failed to remove collection");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to remove collection")),
            )
                .into_response()
        }
    }
}
