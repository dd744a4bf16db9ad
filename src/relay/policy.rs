use crate::error::Result;
use crate::protocol::ClientEvent;
use crate::protocol::models::{
    InputAudioTranscription, MaxTokens, Modality, SessionUpdate, Temperature, ToolChoiceMode,
    TurnDetection, Voice,
};
use crate::tools::ToolRegistry;

pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant. Only answer questions based \
on information you searched in the knowledge base, accessible with the 'search' tool. The user is \
listening to answers with audio, so it's *super* important that answers are as short as possible, \
a single sentence if at all possible. Never read file names or source names or keys out loud. \
Always use the following step-by-step instructions to respond:\n\
1. Always use the 'search' tool to check the knowledge base before answering a question.\n\
2. Always use the 'report_grounding' tool to report the source of information from the knowledge base.\n\
3. Produce an answer that's as short as possible. If the answer isn't in the knowledge base, say you don't know.";

/// Server-owned session settings, injected once at the start of every session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPolicy {
    pub instructions: String,
    pub voice: Option<Voice>,
    pub turn_detection: TurnDetection,
    pub transcription: Option<InputAudioTranscription>,
    pub temperature: Option<Temperature>,
    pub max_response_output_tokens: Option<MaxTokens>,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_INSTRUCTIONS)
    }
}

impl SessionPolicy {
    #[must_use]
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            voice: None,
            turn_detection: TurnDetection::server_vad(),
            transcription: None,
            temperature: None,
            max_response_output_tokens: None,
        }
    }

    #[must_use]
    pub fn with_voice(mut self, voice: impl Into<Voice>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    #[must_use]
    pub fn with_transcription(mut self, model: impl Into<String>) -> Self {
        self.transcription = Some(InputAudioTranscription::new(model));
        self
    }

    #[must_use]
    pub const fn with_temperature(mut self, temperature: Temperature) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub const fn with_max_response_output_tokens(mut self, max: MaxTokens) -> Self {
        self.max_response_output_tokens = Some(max);
        self
    }

    /// The `session.update` frame that opens every model session.
    ///
    /// # Errors
    /// Returns an error if a tool schema cannot be serialized.
    #[allow(clippy::result_large_err)]
    pub fn session_update(&self, tools: &ToolRegistry) -> Result<ClientEvent> {
        let tools = tools.try_as_tools()?;
        let tool_choice = if tools.is_empty() {
            ToolChoiceMode::None
        } else {
            ToolChoiceMode::Auto
        };
        Ok(ClientEvent::session_update(SessionUpdate {
            modalities: Some(vec![Modality::Text, Modality::Audio]),
            instructions: Some(self.instructions.clone()),
            voice: self.voice.clone(),
            input_audio_transcription: self.transcription.clone(),
            turn_detection: Some(self.turn_detection.clone()),
            tools: Some(tools),
            tool_choice: Some(tool_choice),
            temperature: self.temperature,
            max_response_output_tokens: self.max_response_output_tokens.clone(),
        }))
    }
}
