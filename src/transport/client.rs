//! Inbound client leg over an `axum` WebSocket.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use super::{BoxFuture, CloseReason, FrameSink, FrameSource, Leg};
use crate::error::Result;
use crate::protocol::Frame;
use crate::{TRACE_LOG_MAX_BYTES, safe_truncate};

/// Splits an upgraded browser socket into a relay leg.
pub fn client_leg(socket: WebSocket) -> Leg {
    let (write, read) = socket.split();
    Leg::new(ClientSink { write }, ClientSource { read })
}

struct ClientSink {
    write: SplitSink<WebSocket, Message>,
}

impl FrameSink for ClientSink {
    fn send(&mut self, frame: Frame) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let json = frame.to_text()?;
            tracing::trace!("Sending to client: {}", safe_truncate(&json, TRACE_LOG_MAX_BYTES));
            self.write.send(Message::Text(json.into())).await?;
            Ok(())
        })
    }

    fn close(&mut self, reason: CloseReason) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let frame = CloseFrame {
                code: reason.code,
                reason: reason.reason.into(),
            };
            // The browser may already be gone; nothing left to tell it then.
            if let Err(err) = self.write.send(Message::Close(Some(frame))).await {
                tracing::debug!("Client close frame not delivered: {err}");
            }
            Ok(())
        })
    }
}

struct ClientSource {
    read: SplitStream<WebSocket>,
}

impl FrameSource for ClientSource {
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<Frame>>> {
        Box::pin(async move {
            while let Some(msg) = self.read.next().await {
                match msg? {
                    Message::Text(text) => {
                        tracing::trace!(
                            "Received from client: {}",
                            safe_truncate(text.as_str(), TRACE_LOG_MAX_BYTES)
                        );
                        match Frame::parse(text.as_str()) {
                            Ok(frame) => return Ok(Some(frame)),
                            Err(err) => tracing::warn!("Dropping unparseable client frame: {err}"),
                        }
                    }
                    Message::Close(frame) => {
                        tracing::info!(?frame, "Client closed the connection");
                        return Ok(None);
                    }
                    Message::Binary(_) => tracing::debug!("Ignoring binary frame from client"),
                    Message::Ping(_) | Message::Pong(_) => (),
                }
            }
            Ok(None)
        })
    }
}
