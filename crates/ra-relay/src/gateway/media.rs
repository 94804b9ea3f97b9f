//! Media signaling dispatch shared by agents and operators

use tracing::debug;

use ra_core::error::MediaError;
use ra_core::{AgentId, ConnectionId};
use ra_protocol::{MediaReply, MediaRequest, WireError};

use crate::state::RelayState;

/// Run one media request for `connection`
pub(crate) async fn dispatch(
    state: &RelayState,
    connection: ConnectionId,
    request: MediaRequest,
) -> Result<MediaReply, MediaError> {
    let media = &state.media;
    match request {
        MediaRequest::CreateTransport { role } => media
            .create_transport(connection, role)
            .await
            .map(MediaReply::Transport),
        MediaRequest::ConnectTransport {
            transport_id,
            dtls_parameters,
        } => media
            .connect_transport(connection, &transport_id, dtls_parameters)
            .await
            .map(|_| MediaReply::Connected),
        MediaRequest::Produce {
            transport_id,
            kind,
            rtp_parameters,
        } => media
            .produce(connection, &transport_id, kind, rtp_parameters)
            .await
            .map(|producer_id| MediaReply::Produced { producer_id }),
        MediaRequest::Consume {
            producer_id,
            rtp_capabilities,
        } => media
            .consume(connection, &producer_id, rtp_capabilities)
            .await
            .map(MediaReply::Consumed),
        MediaRequest::GetProducers { identity } => Ok(MediaReply::Producers {
            producer_ids: media.get_producers(&AgentId::new(identity)),
        }),
        MediaRequest::ResumeConsumer { consumer_id } => media
            .resume(connection, &consumer_id)
            .await
            .map(|_| MediaReply::Resumed),
    }
}

/// Split a dispatch result into the `ok` / `error` halves of `media:response`
pub(crate) fn into_response(
    connection: ConnectionId,
    method: &str,
    result: Result<MediaReply, MediaError>,
) -> (Option<MediaReply>, Option<WireError>) {
    match result {
        Ok(reply) => (Some(reply), None),
        Err(e) => {
            debug!("{} from {} failed: {}", method, connection, e);
            (None, Some(e.to_wire()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::media::MemorySfu;
    use ra_core::config::RelayConfig;
    use ra_protocol::{ErrorCode, MediaKind, TransportRole};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_dispatch_round_trip() {
        let state = RelayState::new(
            RelayConfig::default(),
            Arc::new(MemorySfu::new()),
            AuditLog::disabled(),
        );
        let agent = state.next_connection_id();
        state.media.attach(agent, Some(AgentId::new("A1")));

        let transport = match dispatch(
            &state,
            agent,
            MediaRequest::CreateTransport {
                role: TransportRole::Send,
            },
        )
        .await
        .unwrap()
        {
            MediaReply::Transport(t) => t,
            other => panic!("Unexpected reply: {:?}", other),
        };

        let produced = dispatch(
            &state,
            agent,
            MediaRequest::Produce {
                transport_id: transport.id.clone(),
                kind: MediaKind::Video,
                rtp_parameters: json!({}),
            },
        )
        .await
        .unwrap();
        let MediaReply::Produced { producer_id } = produced else {
            panic!("Unexpected reply: {:?}", produced);
        };

        let listed = dispatch(
            &state,
            agent,
            MediaRequest::GetProducers {
                identity: "A1".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(
            listed,
            MediaReply::Producers {
                producer_ids: vec![producer_id]
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_transport_maps_to_wire_code() {
        let state = RelayState::new(
            RelayConfig::default(),
            Arc::new(MemorySfu::new()),
            AuditLog::disabled(),
        );
        let conn = state.next_connection_id();
        state.media.attach(conn, None);

        let result = dispatch(
            &state,
            conn,
            MediaRequest::ConnectTransport {
                transport_id: "nope".to_string(),
                dtls_parameters: json!({}),
            },
        )
        .await;
        let (ok, error) = into_response(conn, "connectTransport", result);
        assert!(ok.is_none());
        assert_eq!(error.unwrap().code, ErrorCode::TransportNotFound);
    }
}
