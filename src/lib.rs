#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Voice RAG relay.
//!
//! Sits between a browser voice client and an Azure OpenAI realtime
//! deployment. The relay owns the session policy, hides tool-call traffic from
//! the client and answers the model's `search` and `report_grounding` calls
//! from a private document index.

pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod tools;
pub mod transport;

pub use error::{Error, Result};
pub use protocol::{ClientEvent, Frame, RelayEvent, ServerEvent};
pub use relay::{Relay, RelayBuilder, SessionPolicy};
pub use store::{Chunk, DocumentStore};
pub use tools::{ToolDirection, ToolName, ToolRegistry, ToolResult};
pub use transport::{CloseReason, FrameSink, FrameSource, Leg, ModelConnector};

pub(crate) const TRACE_LOG_MAX_BYTES: usize = 1024;
const TRACE_TRUNCATE_SUFFIX: &str = "... (truncated)";

pub(crate) fn safe_truncate(s: &str, max_bytes: usize) -> std::borrow::Cow<'_, str> {
    if s.len() <= max_bytes {
        return std::borrow::Cow::Borrowed(s);
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    std::borrow::Cow::Owned(format!(
        "{} {} {} bytes",
        &s[..end],
        TRACE_TRUNCATE_SUFFIX,
        s.len() - end
    ))
}
