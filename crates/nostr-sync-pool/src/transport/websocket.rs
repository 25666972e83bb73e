// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! WebSocket transport
//!
//! The seam between a relay connection and the socket. [`DefaultWebsocketTransport`] dials real
//! relays (directly or through tor/a proxy, see [`ConnectionMode`]). Tests plug an in-memory
//! network instead (`mock` feature).

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_wsocket::{ConnectionMode, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{Sink, SinkExt, Stream, StreamExt, TryStreamExt};
use nostr::util::BoxedFuture;
use nostr::Url;

use super::error::TransportError;

/// Write half of a relay socket, drained by the connection writer
pub type BoxSink = Box<dyn Sink<Message, Error = TransportError> + Send + Unpin>;
/// Read half of a relay socket, parsed by the connection reader
pub type BoxStream = Box<dyn Stream<Item = Result<Message, TransportError>> + Send + Unpin>;

/// Anything accepted by [`RelayPoolBuilder::websocket_transport`](crate::RelayPoolBuilder::websocket_transport)
#[doc(hidden)]
pub trait IntoWebSocketTransport {
    fn into_transport(self) -> Arc<dyn WebSocketTransport>;
}

impl IntoWebSocketTransport for Arc<dyn WebSocketTransport> {
    fn into_transport(self) -> Arc<dyn WebSocketTransport> {
        self
    }
}

impl<T> IntoWebSocketTransport for T
where
    T: WebSocketTransport + Sized + 'static,
{
    fn into_transport(self) -> Arc<dyn WebSocketTransport> {
        Arc::new(self)
    }
}

/// Socket factory shared by every connection of a pool
///
/// Called on the first connection and again on every reconnection. Must give up after
/// `timeout`: the connection task treats any error as a closed socket and schedules a retry.
/// The connection task owns both halves until the socket closes.
pub trait WebSocketTransport: fmt::Debug + Send + Sync {
    /// Open a socket to `url`
    fn connect<'a>(
        &'a self,
        url: &'a Url,
        mode: &'a ConnectionMode,
        timeout: Duration,
    ) -> BoxedFuture<'a, Result<(BoxSink, BoxStream), TransportError>>;
}

/// Dials relays with `async-wsocket`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DefaultWebsocketTransport;

impl WebSocketTransport for DefaultWebsocketTransport {
    fn connect<'a>(
        &'a self,
        url: &'a Url,
        mode: &'a ConnectionMode,
        timeout: Duration,
    ) -> BoxedFuture<'a, Result<(BoxSink, BoxStream), TransportError>> {
        Box::pin(async move {
            let socket: WebSocket = WebSocket::connect(url, mode, timeout)
                .await
                .map_err(TransportError::backend)?;

            let (tx, rx) = socket.split();

            // `sink_map_err` may panic on close
            let sink: BoxSink = Box::new(TransportSink(tx)) as BoxSink;
            let stream: BoxStream = Box::new(rx.map_err(TransportError::backend)) as BoxStream;

            Ok((sink, stream))
        })
    }
}

/// Write half of an `async-wsocket` socket with errors mapped to [`TransportError`]
struct TransportSink(SplitSink<WebSocket, Message>);

impl Sink<Message> for TransportSink {
    type Error = TransportError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.0)
            .poll_ready_unpin(cx)
            .map_err(TransportError::backend)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
        Pin::new(&mut self.0)
            .start_send_unpin(item)
            .map_err(TransportError::backend)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.0)
            .poll_flush_unpin(cx)
            .map_err(TransportError::backend)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.0)
            .poll_close_unpin(cx)
            .map_err(TransportError::backend)
    }
}
