//! WebSocket plumbing shared by agent and operator connections

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ra_core::ConnectionId;
use ra_protocol::ProtocolError;

/// Normal closure
const CLOSE_NORMAL: u16 = 1000;

/// Drain the outbound channel into the socket
///
/// Runs until the connection is cancelled or the socket fails. On
/// cancellation, events already queued are still flushed before the close
/// frame, so a final `error` event reaches the peer.
pub(crate) fn spawn_writer<M>(
    connection: ConnectionId,
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<M>,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    M: Serialize + Send + Sync + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                message = rx.recv() => {
                    let Some(message) = message else { break };
                    if write(&mut sink, connection, &message).await.is_err() {
                        cancel.cancel();
                        return;
                    }
                }
                _ = cancel.cancelled() => {
                    while let Ok(message) = rx.try_recv() {
                        if write(&mut sink, connection, &message).await.is_err() {
                            return;
                        }
                    }
                    break;
                }
            }
        }

        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_NORMAL,
                reason: "".into(),
            })))
            .await;
        let _ = sink.close().await;
        debug!("Writer for {} finished", connection);
    })
}

async fn write<M: Serialize>(
    sink: &mut SplitSink<WebSocket, Message>,
    connection: ConnectionId,
    message: &M,
) -> Result<(), axum::Error> {
    match ra_protocol::encode(message) {
        Ok(text) => sink.send(Message::Text(text)).await,
        Err(e) => {
            warn!("Dropping event for {}: {}", connection, e);
            Ok(())
        }
    }
}

/// What the reader should do with one inbound frame
pub(crate) enum Inbound<T> {
    Event(T),
    Invalid(ProtocolError),
    Ignore,
    Close,
}

/// Decode a WebSocket frame into an inbound event
pub(crate) fn classify<T: DeserializeOwned>(message: Message) -> Inbound<T> {
    match message {
        Message::Text(text) => match ra_protocol::decode(&text) {
            Ok(event) => Inbound::Event(event),
            Err(e) => Inbound::Invalid(e),
        },
        Message::Binary(bytes) => match ra_protocol::codec::decode_binary(&bytes) {
            Ok(event) => Inbound::Event(event),
            Err(e) => Inbound::Invalid(e),
        },
        Message::Ping(_) | Message::Pong(_) => Inbound::Ignore,
        Message::Close(_) => Inbound::Close,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ra_protocol::{AgentOutbound, OperatorInbound, OperatorOutbound};

    fn writable<M: Serialize + Send + Sync + 'static>() {}

    #[test]
    fn test_outbound_events_fit_writer_bound() {
        writable::<AgentOutbound>();
        writable::<OperatorOutbound>();
    }

    #[test]
    fn test_classify_frames() {
        let text = Message::Text(r#"{"type":"watch:agent","identity":"A1"}"#.to_string());
        assert!(matches!(
            classify::<OperatorInbound>(text),
            Inbound::Event(OperatorInbound::Watch { .. })
        ));

        let binary = Message::Binary(br#"{"type":"process:list","identity":"A1"}"#.to_vec());
        assert!(matches!(
            classify::<OperatorInbound>(binary),
            Inbound::Event(OperatorInbound::ProcessList { .. })
        ));

        assert!(matches!(
            classify::<OperatorInbound>(Message::Text("{".to_string())),
            Inbound::Invalid(_)
        ));
        assert!(matches!(
            classify::<OperatorInbound>(Message::Ping(vec![])),
            Inbound::Ignore
        ));
        assert!(matches!(
            classify::<OperatorInbound>(Message::Close(None)),
            Inbound::Close
        ));
    }
}
