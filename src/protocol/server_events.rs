use serde::{Deserialize, Deserializer};

use super::frame::Frame;
use super::models::{ArbitraryJson, Item};
use crate::error::ServerError;

/// Typed view over the model frames the relay makes decisions on.
///
/// Everything else (audio deltas, transcripts, rate limits...) is relayed
/// without being decoded; see [`ServerEvent::inspect`].
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Error {
        event_id: Option<String>,
        error: ServerError,
    },
    SessionCreated {
        event_id: Option<String>,
        session: ArbitraryJson,
    },
    ConversationItemCreated {
        event_id: Option<String>,
        previous_item_id: Option<String>,
        item: Item,
    },
    ResponseOutputItemAdded {
        event_id: Option<String>,
        response_id: Option<String>,
        item: Item,
    },
    ResponseOutputItemDone {
        event_id: Option<String>,
        response_id: Option<String>,
        item: Item,
    },
    ResponseFunctionCallArgumentsDelta {
        event_id: Option<String>,
        response_id: Option<String>,
        call_id: String,
    },
    ResponseFunctionCallArgumentsDone {
        event_id: Option<String>,
        response_id: Option<String>,
        item_id: Option<String>,
        call_id: String,
        name: Option<String>,
        arguments: String,
    },
    ResponseDone {
        event_id: Option<String>,
        response: ResponseSummary,
    },
    Unknown(ArbitraryJson),
}

/// The part of a `response.done` payload the relay needs.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct ResponseSummary {
    pub id: Option<String>,
    #[serde(default)]
    pub output: Vec<Item>,
}

impl ResponseSummary {
    /// Call ids of every function call this response issued.
    pub fn function_call_ids(&self) -> impl Iterator<Item = &str> {
        self.output.iter().filter_map(|item| match item {
            Item::FunctionCall { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        })
    }
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ServerEventRepr {
    #[serde(rename = "error")]
    Error {
        event_id: Option<String>,
        error: ServerError,
    },
    #[serde(rename = "session.created")]
    SessionCreated {
        event_id: Option<String>,
        session: ArbitraryJson,
    },
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {
        event_id: Option<String>,
        previous_item_id: Option<String>,
        item: Item,
    },
    #[serde(rename = "response.output_item.added")]
    ResponseOutputItemAdded {
        event_id: Option<String>,
        response_id: Option<String>,
        item: Item,
    },
    #[serde(rename = "response.output_item.done")]
    ResponseOutputItemDone {
        event_id: Option<String>,
        response_id: Option<String>,
        item: Item,
    },
    #[serde(rename = "response.function_call_arguments.delta")]
    ResponseFunctionCallArgumentsDelta {
        event_id: Option<String>,
        response_id: Option<String>,
        call_id: String,
    },
    #[serde(rename = "response.function_call_arguments.done")]
    ResponseFunctionCallArgumentsDone {
        event_id: Option<String>,
        response_id: Option<String>,
        item_id: Option<String>,
        call_id: String,
        name: Option<String>,
        #[serde(default)]
        arguments: String,
    },
    #[serde(rename = "response.done")]
    ResponseDone {
        event_id: Option<String>,
        response: ResponseSummary,
    },
}

impl From<ServerEventRepr> for ServerEvent {
    fn from(repr: ServerEventRepr) -> Self {
        match repr {
            ServerEventRepr::Error { event_id, error } => Self::Error { event_id, error },
            ServerEventRepr::SessionCreated { event_id, session } => {
                Self::SessionCreated { event_id, session }
            }
            ServerEventRepr::ConversationItemCreated {
                event_id,
                previous_item_id,
                item,
            } => Self::ConversationItemCreated {
                event_id,
                previous_item_id,
                item,
            },
            ServerEventRepr::ResponseOutputItemAdded {
                event_id,
                response_id,
                item,
            } => Self::ResponseOutputItemAdded {
                event_id,
                response_id,
                item,
            },
            ServerEventRepr::ResponseOutputItemDone {
                event_id,
                response_id,
                item,
            } => Self::ResponseOutputItemDone {
                event_id,
                response_id,
                item,
            },
            ServerEventRepr::ResponseFunctionCallArgumentsDelta {
                event_id,
                response_id,
                call_id,
            } => Self::ResponseFunctionCallArgumentsDelta {
                event_id,
                response_id,
                call_id,
            },
            ServerEventRepr::ResponseFunctionCallArgumentsDone {
                event_id,
                response_id,
                item_id,
                call_id,
                name,
                arguments,
            } => Self::ResponseFunctionCallArgumentsDone {
                event_id,
                response_id,
                item_id,
                call_id,
                name,
                arguments,
            },
            ServerEventRepr::ResponseDone { event_id, response } => {
                Self::ResponseDone { event_id, response }
            }
        }
    }
}

impl<'de> Deserialize<'de> for ServerEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = ArbitraryJson::deserialize(deserializer)?;
        match ServerEventRepr::deserialize(value.clone()) {
            Ok(repr) => Ok(repr.into()),
            Err(err) => {
                tracing::debug!("Failed to parse ServerEvent: {err}");
                Ok(Self::Unknown(value))
            }
        }
    }
}

/// Frame types the relay decodes. Anything else is passed straight through.
pub const INSPECTED_TYPES: &[&str] = &[
    "error",
    "session.created",
    "conversation.item.created",
    "response.output_item.added",
    "response.output_item.done",
    "response.function_call_arguments.delta",
    "response.function_call_arguments.done",
    "response.done",
];

impl ServerEvent {
    /// Decodes `frame` when its type is one the relay acts on.
    ///
    /// Returns `None` for pass-through types without paying for a decode,
    /// which keeps audio deltas on the fast path.
    #[must_use]
    pub fn inspect(frame: &Frame) -> Option<Self> {
        let kind = frame.kind()?;
        if !INSPECTED_TYPES.contains(&kind) {
            return None;
        }
        match frame.decode::<Self>() {
            Ok(event) => Some(event),
            Err(err) => {
                tracing::debug!("Failed to decode {kind} frame: {err}");
                None
            }
        }
    }

    #[must_use]
    pub fn event_id(&self) -> Option<&str> {
        match self {
            Self::Error { event_id, .. }
            | Self::SessionCreated { event_id, .. }
            | Self::ConversationItemCreated { event_id, .. }
            | Self::ResponseOutputItemAdded { event_id, .. }
            | Self::ResponseOutputItemDone { event_id, .. }
            | Self::ResponseFunctionCallArgumentsDelta { event_id, .. }
            | Self::ResponseFunctionCallArgumentsDone { event_id, .. }
            | Self::ResponseDone { event_id, .. } => event_id.as_deref(),
            Self::Unknown(value) => value.get("event_id").and_then(|v| v.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiErrorType;

    #[test]
    fn function_call_done_is_decoded() {
        let frame = Frame::parse(
            r#"{"type":"response.function_call_arguments.done","event_id":"ev_1",
                "response_id":"resp_1","item_id":"item_1","output_index":0,
                "call_id":"call_1","name":"search","arguments":"{\"query\":\"refund policy\"}"}"#,
        )
        .unwrap();
        let event = ServerEvent::inspect(&frame).unwrap();
        assert_eq!(event.event_id(), Some("ev_1"));
        match event {
            ServerEvent::ResponseFunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
                response_id,
                ..
            } => {
                assert_eq!(call_id, "call_1");
                assert_eq!(name.as_deref(), Some("search"));
                assert_eq!(response_id.as_deref(), Some("resp_1"));
                assert!(arguments.contains("refund policy"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn audio_deltas_are_not_decoded() {
        let frame =
            Frame::parse(r#"{"type":"response.audio.delta","delta":"AAAA","item_id":"i"}"#).unwrap();
        assert!(ServerEvent::inspect(&frame).is_none());
    }

    #[test]
    fn malformed_inspected_frame_falls_back_to_unknown() {
        let frame = Frame::parse(r#"{"type":"response.done","response":"oops"}"#).unwrap();
        assert!(matches!(
            ServerEvent::inspect(&frame),
            Some(ServerEvent::Unknown(_))
        ));
    }

    #[test]
    fn response_done_lists_function_calls() {
        let frame = Frame::parse(
            r#"{"type":"response.done","response":{"id":"resp_1","status":"completed","output":[
                {"type":"message","role":"assistant","content":[]},
                {"type":"function_call","name":"search","call_id":"call_a","arguments":"{}"},
                {"type":"function_call","name":"report_grounding","call_id":"call_b","arguments":"{}"}
            ]}}"#,
        )
        .unwrap();
        let Some(ServerEvent::ResponseDone { response, .. }) = ServerEvent::inspect(&frame) else {
            panic!("expected response.done");
        };
        assert_eq!(response.id.as_deref(), Some("resp_1"));
        assert_eq!(
            response.function_call_ids().collect::<Vec<_>>(),
            vec!["call_a", "call_b"]
        );
    }

    #[test]
    fn error_frame_is_typed() {
        let frame = Frame::parse(
            r#"{"type":"error","event_id":"ev_2","error":{"type":"invalid_request_error",
                "code":"bad","message":"nope","param":null}}"#,
        )
        .unwrap();
        let Some(ServerEvent::Error { error, .. }) = ServerEvent::inspect(&frame) else {
            panic!("expected error");
        };
        assert_eq!(error.error_type, ApiErrorType::InvalidRequestError);
        assert_eq!(error.message, "nope");
    }
}
