//! REST API Server for MemoryOS
//!
//! Exposes the `MemoryOs` facade over HTTP. Every response body is an
//! `ApiResponse` envelope; error kinds map onto status codes.

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Query, Request, State},
    http::{request::Parts, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::MemoryOsError;
use crate::memory::AssembleRequest;
use crate::models::{Memory, MemoryType, Permission, Skill};
use crate::service::MemoryOs;
use crate::Result;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMemoryRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub agent_id: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl StoreMemoryRequest {
    pub fn into_memory(self) -> Memory {
        let mut memory = Memory::new(self.agent_id, self.memory_type, self.content)
            .with_tags(self.tags)
            .with_id(self.id.unwrap_or_default());
        if let Some(importance) = self.importance {
            memory = memory.with_importance(importance);
        }
        memory.metadata = self.metadata;
        memory
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryKey {
    pub agent_id: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    pub agent_id: String,
    #[serde(default)]
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextParams {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentParams {
    pub agent_id: String,
}

/// Identifies a shared entry and the agent acting on it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedKey {
    pub team_id: String,
    pub key: String,
    pub agent_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSharedRequest {
    pub team_id: String,
    pub key: String,
    pub agent_id: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSharedRequest {
    pub team_id: String,
    pub key: String,
    pub agent_id: String,
    pub value: String,
    pub expected_version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantRequest {
    pub team_id: String,
    pub key: String,
    pub agent_id: String,
    pub target_agent: String,
    pub permission: Permission,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterSkillRequest {
    pub agent_id: String,
    pub skill: Skill,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillParams {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PracticeRequest {
    pub agent_id: String,
    pub name: String,
    pub success: bool,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            kind: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(err: &MemoryOsError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            kind: Some(err.kind().to_string()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

pub fn status_for(err: &MemoryOsError) -> StatusCode {
    match err {
        MemoryOsError::NotFound(_) => StatusCode::NOT_FOUND,
        MemoryOsError::AlreadyExists(_)
        | MemoryOsError::DuplicateSkill(_)
        | MemoryOsError::VersionConflict { .. }
        | MemoryOsError::Locked { .. }
        | MemoryOsError::AlreadyLocked { .. } => StatusCode::CONFLICT,
        MemoryOsError::PermissionDenied { .. } | MemoryOsError::NotLockOwner { .. } => {
            StatusCode::FORBIDDEN
        }
        MemoryOsError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(result: Result<T>) -> ApiResult {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                warn!(error = %e, "request failed");
            }
            (status, Json(ApiResponse::error(&e)))
        }
    }
}

fn done(result: Result<()>) -> ApiResult {
    respond(result.map(|()| serde_json::json!({ "ok": true })))
}

fn reject(reason: String) -> ApiResult {
    respond::<()>(Err(MemoryOsError::InvalidArgument(reason)))
}

/// `Json` whose rejections are reported in the `ApiResponse` envelope
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiResult;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(reject(rejection.body_text())),
        }
    }
}

/// `Query` whose rejections are reported in the `ApiResponse` envelope
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiResult;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> std::result::Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(reject(rejection.body_text())),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub memoryos: Arc<MemoryOs>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Memory Endpoints
/// =============================

async fn store_memory(
    State(state): State<ApiState>,
    ApiJson(req): ApiJson<StoreMemoryRequest>,
) -> ApiResult {
    let result = state.memoryos.store_memory(req.into_memory()).await;
    respond(result.map(|id| serde_json::json!({ "id": id })))
}

async fn get_memory(State(state): State<ApiState>, ApiQuery(key): ApiQuery<MemoryKey>) -> ApiResult {
    respond(
        state
            .memoryos
            .get_memory(&key.agent_id, key.memory_type, &key.id)
            .await,
    )
}

async fn update_memory(State(state): State<ApiState>, ApiJson(memory): ApiJson<Memory>) -> ApiResult {
    done(state.memoryos.update_memory(memory).await)
}

async fn delete_memory(State(state): State<ApiState>, ApiQuery(key): ApiQuery<MemoryKey>) -> ApiResult {
    done(
        state
            .memoryos
            .delete_memory(&key.agent_id, key.memory_type, &key.id)
            .await,
    )
}

async fn search_memories(
    State(state): State<ApiState>,
    ApiQuery(params): ApiQuery<SearchParams>,
) -> ApiResult {
    let limit = params
        .limit
        .unwrap_or(state.memoryos.config().search_limit);
    respond(
        state
            .memoryos
            .search_memories(&params.agent_id, &params.query, limit)
            .await,
    )
}

async fn memory_stats(State(state): State<ApiState>, ApiQuery(params): ApiQuery<AgentParams>) -> ApiResult {
    respond(state.memoryos.memory_stats(&params.agent_id).await)
}

/// =============================
/// Context Endpoint
/// =============================

async fn assemble_context(
    State(state): State<ApiState>,
    ApiQuery(params): ApiQuery<ContextParams>,
) -> ApiResult {
    let budget = params
        .max_tokens
        .unwrap_or(state.memoryos.config().max_tokens as i64);

    let mut request = AssembleRequest::new(params.agent_id, budget);
    if let Some(strategy) = params.strategy {
        request = request.with_strategy(strategy);
    }
    if let Some(query) = params.query {
        request = request.with_query(query);
    }

    respond(state.memoryos.assemble_context(&request).await)
}

/// =============================
/// Shared Entry Endpoints
/// =============================

async fn create_shared(
    State(state): State<ApiState>,
    ApiJson(req): ApiJson<CreateSharedRequest>,
) -> ApiResult {
    respond(
        state
            .memoryos
            .create_shared(&req.team_id, &req.key, &req.value, &req.agent_id)
            .await,
    )
}

async fn read_shared(State(state): State<ApiState>, ApiQuery(key): ApiQuery<SharedKey>) -> ApiResult {
    respond(
        state
            .memoryos
            .read_shared(&key.team_id, &key.key, &key.agent_id)
            .await,
    )
}

async fn delete_shared(State(state): State<ApiState>, ApiQuery(key): ApiQuery<SharedKey>) -> ApiResult {
    done(
        state
            .memoryos
            .delete_shared(&key.team_id, &key.key, &key.agent_id)
            .await,
    )
}

async fn update_shared(
    State(state): State<ApiState>,
    ApiJson(req): ApiJson<UpdateSharedRequest>,
) -> ApiResult {
    let result = state
        .memoryos
        .update_shared(
            &req.team_id,
            &req.key,
            &req.agent_id,
            &req.value,
            req.expected_version,
        )
        .await;
    respond(result.map(|version| serde_json::json!({ "version": version })))
}

async fn lock_shared(State(state): State<ApiState>, ApiJson(key): ApiJson<SharedKey>) -> ApiResult {
    done(
        state
            .memoryos
            .lock_shared(&key.team_id, &key.key, &key.agent_id)
            .await,
    )
}

async fn unlock_shared(State(state): State<ApiState>, ApiJson(key): ApiJson<SharedKey>) -> ApiResult {
    done(
        state
            .memoryos
            .unlock_shared(&key.team_id, &key.key, &key.agent_id)
            .await,
    )
}

async fn grant_shared(State(state): State<ApiState>, ApiJson(req): ApiJson<GrantRequest>) -> ApiResult {
    done(
        state
            .memoryos
            .grant_shared(
                &req.team_id,
                &req.key,
                &req.agent_id,
                &req.target_agent,
                req.permission,
            )
            .await,
    )
}

/// =============================
/// Skill Endpoints
/// =============================

async fn register_skill(
    State(state): State<ApiState>,
    ApiJson(req): ApiJson<RegisterSkillRequest>,
) -> ApiResult {
    respond(state.memoryos.register_skill(&req.agent_id, req.skill).await)
}

/// `name` returns one skill; otherwise lists by `category` (all when absent)
async fn get_skills(State(state): State<ApiState>, ApiQuery(params): ApiQuery<SkillParams>) -> ApiResult {
    match params.name {
        Some(name) => respond(state.memoryos.get_skill(&params.agent_id, &name).await),
        None => respond(
            state
                .memoryos
                .skills_by_category(&params.agent_id, params.category.as_deref().unwrap_or(""))
                .await,
        ),
    }
}

async fn record_practice(
    State(state): State<ApiState>,
    ApiJson(req): ApiJson<PracticeRequest>,
) -> ApiResult {
    respond(
        state
            .memoryos
            .record_practice(&req.agent_id, &req.name, req.success)
            .await,
    )
}

/// =============================
/// Router
/// =============================

pub fn create_router(memoryos: Arc<MemoryOs>) -> Router {
    let state = ApiState { memoryos };

    Router::new()
        .route("/health", get(health))
        .route(
            "/memory",
            post(store_memory)
                .get(get_memory)
                .put(update_memory)
                .delete(delete_memory),
        )
        .route("/memory/search", get(search_memories))
        .route("/context", get(assemble_context))
        .route(
            "/shared",
            post(create_shared).get(read_shared).delete(delete_shared),
        )
        .route("/shared/value", put(update_shared))
        .route("/shared/lock", post(lock_shared))
        .route("/shared/unlock", post(unlock_shared))
        .route("/shared/grant", post(grant_shared))
        .route("/skill", post(register_skill).get(get_skills))
        .route("/skill/practice", post(record_practice))
        .route("/stats", get(memory_stats))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

/// Serve on an already bound listener
pub async fn serve(memoryos: Arc<MemoryOs>, listener: TcpListener) -> Result<()> {
    let router = create_router(memoryos);
    axum::serve(listener, router).await?;
    Ok(())
}

pub async fn start_server(memoryos: Arc<MemoryOs>, port: u16) -> Result<()> {
    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    serve(memoryos, listener).await
}
