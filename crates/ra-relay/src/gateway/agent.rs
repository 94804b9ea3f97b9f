//! Agent connections

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::response::Response;
use futures::StreamExt;
use serde::Deserialize;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ra_core::traits::AuditEvent;
use ra_core::AgentId;
use ra_protocol::{AgentInbound, AgentOutbound, ErrorCode};

use super::server::GatewayContext;
use super::socket::{classify, spawn_writer, Inbound};
use crate::connection::AgentHandle;
use crate::state::RelayState;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AgentParams {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

/// `GET /agent?key=<secret>&id=<identity>`
pub(crate) async fn agent_ws(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(params): Query<AgentParams>,
    State(ctx): State<GatewayContext>,
) -> Response {
    ws.on_upgrade(move |socket| handle_agent(socket, ctx, params, peer))
}

async fn handle_agent(socket: WebSocket, ctx: GatewayContext, params: AgentParams, peer: SocketAddr) {
    let state = &ctx.state;
    let connection = state.next_connection_id();
    let cancel = ctx.shutdown.child_token();
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = AgentHandle::new(connection, tx, cancel.clone());
    let writer = spawn_writer(connection, sink, rx, cancel.clone());

    let identity = AgentId::new(
        params
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| connection.to_string()),
    );

    let key_ok = params
        .key
        .as_deref()
        .map_or(false, |key| state.agent_key.verify(key));
    if !key_ok {
        warn!("Invalid agent key from {} (identity {})", peer, identity);
        handle.send(AgentOutbound::Error {
            code: ErrorCode::InvalidAgentKey,
            message: None,
        });
        handle.close();
        state
            .audit
            .emit(AuditEvent::InvalidAgentKey {
                identity: Some(identity.to_string()),
                peer: Some(peer.to_string()),
            })
            .await;
        let _ = writer.await;
        return;
    }

    info!("Agent {} connected from {} ({})", identity, peer, connection);
    handle.send(AgentOutbound::RouterRtpCapabilities {
        rtp_capabilities: state.media.rtp_capabilities(),
    });
    state
        .register_agent(identity.clone(), handle.clone(), Some(peer))
        .await;

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = stream.next() => message,
        };
        let message = match message {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                debug!("Agent {} socket error: {}", identity, e);
                break;
            }
            None => break,
        };

        match classify::<AgentInbound>(message) {
            Inbound::Event(event) => handle_event(state, &handle, &identity, event).await,
            Inbound::Invalid(e) => {
                debug!("Undecodable event from agent {}: {}", identity, e);
                handle.send(AgentOutbound::Error {
                    code: ErrorCode::InvalidMessage,
                    message: None,
                });
            }
            Inbound::Ignore => {}
            Inbound::Close => break,
        }
    }

    state.disconnect_agent(&identity, connection).await;
    handle.close();
    let _ = writer.await;
}

async fn handle_event(
    state: &RelayState,
    handle: &AgentHandle,
    identity: &AgentId,
    event: AgentInbound,
) {
    match event {
        AgentInbound::Frame { image } => {
            state.relay.agent_frame(identity, image);
        }
        AgentInbound::Signal { signal } => {
            state.relay.agent_signal(identity, signal);
        }
        AgentInbound::ProcessListResponse { procs, error } => {
            state.relay.process_list_response(identity, procs, error);
        }
        AgentInbound::ProcessKillResponse {
            request_id,
            pid,
            success,
            error,
            image,
        } => {
            debug!(
                "Kill response from {} for pid {:?} ({})",
                identity,
                pid,
                image.as_deref().unwrap_or("?")
            );
            state
                .actions
                .complete(identity, request_id, pid, success, error.as_deref())
                .await;
        }
        AgentInbound::Chat { text } => {
            state.relay.agent_chat(identity, text);
        }
        AgentInbound::FileReceiveResponse { result } => {
            state.relay.file_receive_response(identity, result);
        }
        AgentInbound::Media {
            request_id,
            request,
        } => {
            let method = request.method();
            let result = super::media::dispatch(state, handle.id(), request).await;
            let (ok, error) = super::media::into_response(handle.id(), method, result);
            handle.send(AgentOutbound::MediaResponse {
                request_id,
                ok,
                error,
            });
        }
    }
}
