//! Seams between the relay and the two sockets of a session.
//!
//! The relay only ever sees [`Leg`]s: a [`FrameSink`] to write to and a
//! [`FrameSource`] to read from. The model leg is produced by a
//! [`ModelConnector`], the client leg by the HTTP layer.

pub mod client;
pub mod credential;
pub mod ws;

use std::future::Future;
use std::pin::Pin;

use crate::Result;
use crate::error::Error;
use crate::protocol::Frame;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Write half of a leg.
pub trait FrameSink: Send {
    fn send(&mut self, frame: Frame) -> BoxFuture<'_, Result<()>>;

    /// Sends a close frame. Closing twice is not an error.
    fn close(&mut self, reason: CloseReason) -> BoxFuture<'_, Result<()>>;
}

/// Read half of a leg. `Ok(None)` means the peer closed cleanly.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<Frame>>>;
}

/// One side of a session, already split so both halves can be driven from the
/// same `select!` loop.
pub struct Leg {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

impl Leg {
    pub fn new(sink: impl FrameSink + 'static, source: impl FrameSource + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            source: Box::new(source),
        }
    }
}

impl std::fmt::Debug for Leg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Leg").finish_non_exhaustive()
    }
}

/// Opens the model leg for one session.
pub trait ModelConnector: Send + Sync {
    /// `request_id` is forwarded to the model endpoint for correlation.
    fn connect<'a>(&'a self, request_id: &'a str) -> BoxFuture<'a, Result<Leg>>;
}

/// Close code and reason sent to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

/// WebSocket close reasons must fit a control frame.
const MAX_CLOSE_REASON_BYTES: usize = 123;

impl CloseReason {
    pub const NORMAL: u16 = 1000;
    pub const INTERNAL_ERROR: u16 = 1011;
    pub const UPSTREAM_UNREACHABLE: u16 = 1014;
    pub const AUTH_REJECTED: u16 = 4401;

    #[must_use]
    pub fn new(code: u16, reason: &str) -> Self {
        let mut end = reason.len().min(MAX_CLOSE_REASON_BYTES);
        while end > 0 && !reason.is_char_boundary(end) {
            end -= 1;
        }
        Self {
            code,
            reason: reason[..end].to_string(),
        }
    }

    #[must_use]
    pub fn normal() -> Self {
        Self::new(Self::NORMAL, "session ended")
    }

    #[must_use]
    pub fn internal(reason: &str) -> Self {
        Self::new(Self::INTERNAL_ERROR, reason)
    }

    /// Diagnostic close for a model leg that could not be opened.
    #[must_use]
    pub fn for_connect_error(err: &Error) -> Self {
        if err.is_auth_rejection() {
            Self::new(Self::AUTH_REJECTED, "model endpoint rejected credentials")
        } else {
            Self::new(Self::UPSTREAM_UNREACHABLE, "model endpoint unreachable")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_reason_is_capped_on_a_char_boundary() {
        let long = "é".repeat(100);
        let reason = CloseReason::new(CloseReason::INTERNAL_ERROR, &long);
        assert!(reason.reason.len() <= MAX_CLOSE_REASON_BYTES);
        assert!(reason.reason.chars().all(|c| c == 'é'));
    }

    #[test]
    fn connect_errors_map_to_diagnostic_codes() {
        let auth = Error::Credential("no token".into());
        assert_eq!(CloseReason::for_connect_error(&auth).code, 4401);
        let down = Error::ConnectionClosed;
        assert_eq!(CloseReason::for_connect_error(&down).code, 1014);
    }
}
