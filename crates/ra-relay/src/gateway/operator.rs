//! Operator connections
//!
//! The capability token is verified once, before any handler is wired.
//! Every later message is authorized against the cached principal.

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::StreamExt;
use serde::Deserialize;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ra_core::error::AuthError;
use ra_core::traits::AuditEvent;
use ra_core::{AgentId, Permission, Principal};
use ra_protocol::{ErrorCode, OperatorInbound, OperatorOutbound, WireError};

use super::http::bearer_token;
use super::server::GatewayContext;
use super::socket::{classify, spawn_writer, Inbound};
use crate::connection::OperatorHandle;
use crate::state::RelayState;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct OperatorParams {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    agent_id: Option<String>,
}

/// `GET /operator?token=<jwt>[&agent_id=<identity>]`
pub(crate) async fn operator_ws(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(params): Query<OperatorParams>,
    headers: HeaderMap,
    State(ctx): State<GatewayContext>,
) -> Response {
    let token = params.token.clone().or_else(|| bearer_token(&headers));
    let principal = match token {
        Some(token) => ctx.state.tokens.verify(&token),
        None => Err(AuthError::MissingToken),
    };
    ws.on_upgrade(move |socket| handle_operator(socket, ctx, principal, params.agent_id, peer))
}

async fn handle_operator(
    socket: WebSocket,
    ctx: GatewayContext,
    principal: Result<Principal, AuthError>,
    auto_watch: Option<String>,
    peer: SocketAddr,
) {
    let state = &ctx.state;
    let connection = state.next_connection_id();
    let cancel = ctx.shutdown.child_token();
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = OperatorHandle::new(connection, tx, cancel.clone());
    let writer = spawn_writer(connection, sink, rx, cancel.clone());

    let principal = match principal {
        Ok(principal) => principal,
        Err(e) => {
            warn!("Rejected operator connection from {}: {}", peer, e);
            handle.send(OperatorOutbound::error(e.code()));
            handle.close();
            let _ = writer.await;
            return;
        }
    };

    info!(
        "Operator {} ({}) connected from {} ({})",
        principal.display_name(),
        principal.role,
        peer,
        connection
    );
    state.media.attach(connection, None);
    handle.send(OperatorOutbound::RouterRtpCapabilities {
        rtp_capabilities: state.media.rtp_capabilities(),
    });
    if let Some(identity) = auto_watch.filter(|id| !id.is_empty()) {
        watch(state, &handle, &principal, AgentId::new(identity)).await;
    }

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = stream.next() => message,
        };
        let message = match message {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                debug!("Operator {} socket error: {}", connection, e);
                break;
            }
            None => break,
        };

        match classify::<OperatorInbound>(message) {
            Inbound::Event(event) => handle_event(state, &handle, &principal, event).await,
            Inbound::Invalid(e) => {
                debug!("Undecodable event from operator {}: {}", connection, e);
                handle.send(OperatorOutbound::error(ErrorCode::InvalidMessage));
            }
            Inbound::Ignore => {}
            Inbound::Close => break,
        }
    }

    state.disconnect_operator(&handle).await;
    handle.close();
    let _ = writer.await;
}

/// Subscribe and tell the operator whether the agent is online right now
async fn watch(state: &RelayState, handle: &OperatorHandle, principal: &Principal, identity: AgentId) {
    if !principal.can(Permission::Watch) {
        handle.send(OperatorOutbound::error(ErrorCode::Forbidden));
        return;
    }

    state.subscriptions.watch(handle, identity.clone());
    if state.coordinator.agents.contains(&identity) {
        handle.send(OperatorOutbound::AgentOnline {
            identity: identity.to_string(),
        });
    }
    state
        .audit
        .emit(AuditEvent::OperatorWatch {
            identity: identity.to_string(),
            user: principal.display_name().to_string(),
        })
        .await;
}

async fn handle_event(
    state: &RelayState,
    handle: &OperatorHandle,
    principal: &Principal,
    event: OperatorInbound,
) {
    let relayed = match event {
        OperatorInbound::Watch { identity } => {
            watch(state, handle, principal, AgentId::new(identity)).await;
            Ok(())
        }
        OperatorInbound::Unwatch { identity } => {
            state
                .subscriptions
                .unwatch(handle.id(), &AgentId::new(identity));
            Ok(())
        }
        OperatorInbound::ProcessList { identity } => state
            .relay
            .list_processes(principal, &AgentId::new(identity))
            .await
            .map_err(|e| e.to_wire()),
        OperatorInbound::Chat { identity, text } => state
            .relay
            .send_chat(principal, &AgentId::new(identity), text)
            .await
            .map_err(|e| e.to_wire()),
        OperatorInbound::FileSend {
            identity,
            filename,
            data,
        } => state
            .relay
            .send_file(principal, &AgentId::new(identity), filename, data)
            .await
            .map_err(|e| e.to_wire()),
        OperatorInbound::Signal { identity, signal } => state
            .relay
            .signal_agent(principal, &AgentId::new(identity), signal)
            .await
            .map_err(|e| e.to_wire()),
        OperatorInbound::ProcessKill { identity, pid } => {
            let identity = AgentId::new(identity);
            match state
                .actions
                .request_kill(handle, principal, identity.clone(), pid)
                .await
            {
                Ok(request_id) => {
                    handle.send(OperatorOutbound::KillAccepted {
                        request_id: request_id.0,
                        identity: identity.to_string(),
                        pid,
                    });
                    Ok(())
                }
                Err(e) => Err(WireError::new(e.code())),
            }
        }
        OperatorInbound::Media {
            request_id,
            request,
        } => {
            let method = request.method();
            let (ok, error) = if principal.can(Permission::Media) {
                let result = super::media::dispatch(state, handle.id(), request).await;
                super::media::into_response(handle.id(), method, result)
            } else {
                (None, Some(WireError::new(ErrorCode::Forbidden)))
            };
            handle.send(OperatorOutbound::MediaResponse {
                request_id,
                ok,
                error,
            });
            Ok(())
        }
    };

    if let Err(error) = relayed {
        handle.send(OperatorOutbound::Error {
            code: error.code,
            message: error.message,
        });
    }
}
