//! HTTP endpoints and the bearer-token role gate

use async_trait::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use ra_core::{Permission, Principal};

use super::server::GatewayContext;
use crate::auth::LoginRequest;
use crate::privileged::ActionSummary;

/// Rejection of an HTTP request by the role gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    Unauthorized,
    Forbidden,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
        };
        (status, Json(json!({ "error": error }))).into_response()
    }
}

/// Extract the token from `Authorization: Bearer <token>`
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .unwrap_or(value)
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Principal verified from the request's bearer token
pub struct Authenticated(pub Principal);

impl Authenticated {
    /// Require a permission of the cached principal
    pub fn require(&self, permission: Permission) -> Result<&Principal, ApiError> {
        if self.0.can(permission) {
            Ok(&self.0)
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

#[async_trait]
impl FromRequestParts<GatewayContext> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &GatewayContext,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(ApiError::Unauthorized)?;
        ctx.state
            .tokens
            .verify(&token)
            .map(Authenticated)
            .map_err(|_| ApiError::Unauthorized)
    }
}

/// `GET /health`
pub(crate) async fn health(State(ctx): State<GatewayContext>) -> Json<Value> {
    let state = &ctx.state;
    Json(json!({
        "status": "ok",
        "agents": state.coordinator.agents.len(),
        "pending_actions": state.actions.pending_count(),
        "media": state.media.stats(),
        "uptime_secs": state.uptime_secs(),
    }))
}

/// `POST /login`
pub(crate) async fn login(
    State(ctx): State<GatewayContext>,
    Json(request): Json<LoginRequest>,
) -> Response {
    match ctx.state.login.login(&request).await {
        Ok(token) => Json(json!({ "token": token })).into_response(),
        Err(_) => ApiError::Unauthorized.into_response(),
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AgentEntry {
    identity: String,
    connection: String,
    connected_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    peer: Option<String>,
}

/// `GET /api/agents`
pub(crate) async fn list_agents(
    auth: Authenticated,
    State(ctx): State<GatewayContext>,
) -> Result<Json<Vec<AgentEntry>>, ApiError> {
    auth.require(Permission::ViewAgents)?;
    let agents = ctx
        .state
        .coordinator
        .agents
        .list()
        .into_iter()
        .map(|a| AgentEntry {
            identity: a.identity.to_string(),
            connection: a.connection_id().to_string(),
            connected_at: a.connected_at,
            peer: a.peer_addr.map(|p| p.to_string()),
        })
        .collect();
    Ok(Json(agents))
}

/// `GET /api/actions`
pub(crate) async fn list_actions(
    auth: Authenticated,
    State(ctx): State<GatewayContext>,
) -> Result<Json<Vec<ActionSummary>>, ApiError> {
    auth.require(Permission::ViewActions)?;
    Ok(Json(ctx.state.actions.list()))
}
