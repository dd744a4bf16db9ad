pub mod audio;
pub mod common;
pub mod items;
pub mod session;
pub mod tools;

pub use audio::{InputAudioTranscription, TurnDetection};
pub use common::{
    ArbitraryJson, Infinite, ItemStatus, JsonSchema, MaxTokens, Modality, Temperature,
    TemperatureError, Voice,
};
pub use items::Item;
pub use session::{POLICY_OWNED_SESSION_KEYS, SessionUpdate};
pub use tools::{Tool, ToolChoiceMode};
