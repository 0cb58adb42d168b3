//! Adapts an axum WebSocket to the session [`Transport`] shape.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use fragcast_session::{Transport, TransportError, WireMessage};
use futures::future;
use futures::{SinkExt, StreamExt};

/// Text frames pass through; binary, ping and pong frames are skipped. A close
/// from the client ends the inbound stream with [`TransportError::Closed`].
pub fn transport(socket: WebSocket) -> impl Transport {
    socket
        .sink_map_err(|err| TransportError::Io(err.to_string()))
        .with(|message: WireMessage| future::ready(Ok::<_, TransportError>(outbound(message))))
        .filter_map(|item| future::ready(inbound(item)))
}

fn outbound(message: WireMessage) -> Message {
    match message {
        WireMessage::Text(frame) => Message::Text(frame.into()),
        WireMessage::Close(reason) => Message::Close(Some(CloseFrame {
            code: reason.code(),
            reason: reason.as_str().into(),
        })),
    }
}

fn inbound(item: Result<Message, axum::Error>) -> Option<Result<String, TransportError>> {
    match item {
        Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
        Ok(Message::Close(_)) => Some(Err(TransportError::Closed)),
        Ok(Message::Binary(bytes)) => {
            tracing::debug!(len = bytes.len(), "ignoring binary frame");
            None
        }
        Ok(Message::Ping(_) | Message::Pong(_)) => None,
        Err(err) => Some(Err(TransportError::Io(err.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use fragcast_session::CloseReason;

    use super::*;

    #[test]
    fn close_carries_code_and_reason() {
        let Message::Close(Some(frame)) = outbound(WireMessage::Close(CloseReason::SessionNotLive))
        else {
            panic!("expected a close frame");
        };
        assert_eq!(frame.code, 1008);
        assert_eq!(frame.reason.as_str(), "session not live");
    }

    #[test]
    fn only_text_reaches_the_session() {
        assert_eq!(
            inbound(Ok(Message::Text("end_turn".into()))),
            Some(Ok("end_turn".to_string()))
        );
        assert_eq!(inbound(Ok(Message::Binary(vec![1, 2].into()))), None);
        assert_eq!(inbound(Ok(Message::Ping(Vec::new().into()))), None);
        assert_eq!(
            inbound(Ok(Message::Close(None))),
            Some(Err(TransportError::Closed))
        );
    }
}
