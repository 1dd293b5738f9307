use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tokio::sync::watch;
use crate::registry_manager::RegistryHandle;
use shared::protocol::API_PREFIX;
use shared::types::ServerRecord;

#[derive(Clone)]
pub struct AppState {
    pub registry: RegistryHandle,
    pub hash_rx: watch::Receiver<String>,
}

#[derive(Deserialize)]
pub struct ServerQuery {
    /// Only servers with an active, reachable connection
    pub reachable: Option<bool>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(&format!("{API_PREFIX}/servers"), get(get_servers))
        .route(&format!("{API_PREFIX}/servers/hash"), get(get_hash))
        .route(&format!("{API_PREFIX}/servers/:identity"), get(get_server))
        .with_state(state)
}

async fn get_servers(
    State(state): State<AppState>,
    Query(params): Query<ServerQuery>,
) -> Result<Json<Vec<ServerRecord>>, StatusCode> {
    let servers = state.registry.snapshot().await.map_err(|e| {
        tracing::error!("Failed to query servers: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let servers = match params.reachable {
        Some(wanted) => servers
            .into_iter()
            .filter(|s| s.active_candidate().is_some() == wanted)
            .collect(),
        None => servers,
    };

    Ok(Json(servers))
}

async fn get_hash(State(state): State<AppState>) -> String {
    state.hash_rx.borrow().clone()
}

async fn get_server(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<Json<ServerRecord>, StatusCode> {
    state
        .registry
        .get(identity)
        .await
        .map_err(|e| {
            tracing::error!("Failed to query server: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
