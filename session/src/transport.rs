//! Transport seam for connection actors.
//!
//! Anything that yields inbound text frames and accepts [`WireMessage`]s can
//! carry a session: the WebSocket server adapts axum's socket to this shape,
//! and [`ChannelTransport`] does the same over in-process channels.

use std::pin::Pin;
use std::task::{Context, Poll};

use fragcast_rt::tasks::mpsc;
use futures::{Sink, Stream};

use crate::error::TransportError;
use crate::outbox::CloseReason;

/// What a connection actor writes to its transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    /// Protocol-level close; the transport is expected to finish afterwards.
    Close(CloseReason),
}

pub trait Transport:
    Stream<Item = Result<String, TransportError>>
    + Sink<WireMessage, Error = TransportError>
    + Send
    + Unpin
    + 'static
{
}

impl<T> Transport for T where
    T: Stream<Item = Result<String, TransportError>>
        + Sink<WireMessage, Error = TransportError>
        + Send
        + Unpin
        + 'static
{
}

/// Server side of an in-process transport.
#[derive(Debug)]
pub struct ChannelTransport {
    inbound: mpsc::UnboundedReceiver<Result<String, TransportError>>,
    outbound: mpsc::UnboundedSender<WireMessage>,
}

/// Client side of an in-process transport.
#[derive(Debug)]
pub struct ChannelPeer {
    /// `None` once the peer has hung up.
    inbound: Option<mpsc::UnboundedSender<Result<String, TransportError>>>,
    outbound: mpsc::UnboundedReceiver<WireMessage>,
}

impl ChannelTransport {
    pub fn pair() -> (ChannelTransport, ChannelPeer) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (
            ChannelTransport {
                inbound: in_rx,
                outbound: out_tx,
            },
            ChannelPeer {
                inbound: Some(in_tx),
                outbound: out_rx,
            },
        )
    }
}

impl Stream for ChannelTransport {
    type Item = Result<String, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inbound.poll_recv(cx)
    }
}

impl Sink<WireMessage> for ChannelTransport {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: WireMessage) -> Result<(), Self::Error> {
        self.outbound
            .send(item)
            .map_err(|_error| TransportError::Closed)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

impl ChannelPeer {
    /// Sends a raw inbound frame. Returns `false` once the server side is gone.
    pub fn send_text(&self, frame: impl Into<String>) -> bool {
        self.push(Ok(frame.into()))
    }

    /// Injects a transport failure into the server's read loop.
    pub fn fail(&self, error: TransportError) -> bool {
        self.push(Err(error))
    }

    /// Ends the inbound stream while still reading what the server writes.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    fn push(&self, item: Result<String, TransportError>) -> bool {
        self.inbound
            .as_ref()
            .is_some_and(|inbound| inbound.send(item).is_ok())
    }

    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.outbound.recv().await
    }

    pub fn try_recv(&mut self) -> Option<WireMessage> {
        self.outbound.try_recv().ok()
    }
}
