pub mod client_events;
pub mod frame;
pub mod models;
pub mod relay_events;
pub mod server_events;

pub use client_events::ClientEvent;
pub use frame::Frame;
pub use relay_events::RelayEvent;
pub use server_events::{ResponseSummary, ServerEvent};
