//! HTTP/WebSocket listener

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use ra_core::traits::AuditEvent;

use super::{agent, http, operator};
use crate::state::RelayState;

/// State shared by every route
#[derive(Clone)]
pub struct GatewayContext {
    pub state: Arc<RelayState>,
    /// Parent of every connection's cancellation token
    pub shutdown: CancellationToken,
}

/// Build the gateway routes
pub fn router(ctx: GatewayContext) -> Router {
    Router::new()
        .route("/agent", get(agent::agent_ws))
        .route("/operator", get(operator::operator_ws))
        .route("/login", post(http::login))
        .route("/api/agents", get(http::list_agents))
        .route("/api/actions", get(http::list_actions))
        .route("/health", get(http::health))
        .with_state(ctx)
}

/// Relay gateway server
pub struct RelayServer {
    state: Arc<RelayState>,
    cancel: CancellationToken,
}

impl RelayServer {
    pub fn new(state: Arc<RelayState>, cancel: CancellationToken) -> Self {
        Self { state, cancel }
    }

    /// Bind and serve until cancelled
    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!("Relay gateway listening on {}", local_addr);
        self.state
            .audit
            .emit(AuditEvent::ServerStart {
                bind_address: local_addr.to_string(),
            })
            .await;

        let app = router(GatewayContext {
            state: Arc::clone(&self.state),
            shutdown: self.cancel.clone(),
        });
        let cancel = self.cancel.clone();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("Gateway server failed")?;

        tracing::info!("Relay gateway shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::media::MemorySfu;
    use axum::body::{self, Body};
    use axum::http::{Request, StatusCode};
    use ra_core::config::RelayConfig;
    use ra_core::{Principal, Role};
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    fn app() -> (Router, Arc<RelayState>) {
        let state = Arc::new(RelayState::new(
            RelayConfig::default(),
            Arc::new(MemorySfu::new()),
            AuditLog::disabled(),
        ));
        let app = router(GatewayContext {
            state: Arc::clone(&state),
            shutdown: CancellationToken::new(),
        });
        (app, state)
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _state) = app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["agents"], 0);
        assert_eq!(body["media"]["sessions"], 0);
    }

    #[tokio::test]
    async fn test_login_rejects_bad_password() {
        let (app, _state) = app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/login")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"password": "nope"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await, json!({"error": "unauthorized"}));
    }

    #[tokio::test]
    async fn test_actions_require_admin() {
        let (app, state) = app();
        let operator = state
            .tokens
            .issue(&Principal::new(Role::Operator, None))
            .unwrap();
        let admin = state
            .tokens
            .issue(&Principal::new(Role::Admin, Some("root".to_string())))
            .unwrap();

        let request = |token: &str| {
            Request::builder()
                .uri("/api/actions")
                .header("authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(request(&operator)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(response).await, json!({"error": "forbidden"}));

        let response = app.clone().oneshot(request("garbage")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.oneshot(request(&admin)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!([]));
    }
}
