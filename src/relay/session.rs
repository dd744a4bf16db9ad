//! The per-session pump.
//!
//! One task owns both legs and the call table. Tool handlers run on their own
//! tasks and report back over a channel, so a slow handler never stalls the
//! frames flowing in either direction.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::calls::CallTable;
use super::filter;
use super::policy::SessionPolicy;
use crate::error::{Error, Result};
use crate::protocol::models::Item;
use crate::protocol::{ClientEvent, Frame, RelayEvent, ServerEvent};
use crate::tools::{ToolDirection, ToolRegistry, ToolResult};
use crate::transport::{CloseReason, Leg};

/// Why the pump stopped.
#[derive(Debug)]
enum Shutdown {
    ClientClosed,
    ClientFailed(Error),
    ModelClosed,
    ModelFailed(Error),
    Internal(Error),
}

/// A finished tool handler.
#[derive(Debug)]
struct Completion {
    call_id: String,
    tool_name: String,
    result: Result<ToolResult>,
}

pub(crate) struct SessionTask {
    client: Leg,
    model: Leg,
    policy: Arc<SessionPolicy>,
    session_update: Frame,
    tools: Arc<ToolRegistry>,
    tool_timeout: Option<Duration>,
    calls: CallTable,
    done_tx: mpsc::Sender<Completion>,
    done_rx: mpsc::Receiver<Completion>,
}

impl SessionTask {
    pub(crate) fn new(
        client: Leg,
        model: Leg,
        policy: Arc<SessionPolicy>,
        session_update: Frame,
        tools: Arc<ToolRegistry>,
        tool_timeout: Option<Duration>,
    ) -> Self {
        let (done_tx, done_rx) = mpsc::channel(64);
        Self {
            client,
            model,
            policy,
            session_update,
            tools,
            tool_timeout,
            calls: CallTable::new(),
            done_tx,
            done_rx,
        }
    }

    pub(crate) async fn run(mut self) {
        let outcome = self.pump().await;
        self.finish(outcome).await;
    }

    async fn pump(&mut self) -> Shutdown {
        if let Err(err) = self.model.sink.send(self.session_update.clone()).await {
            return Shutdown::ModelFailed(err);
        }
        tracing::debug!("Session policy sent");

        loop {
            let step = tokio::select! {
                frame = self.client.source.next_frame() => self.on_client_frame(frame).await,
                frame = self.model.source.next_frame() => self.on_model_frame(frame).await,
                Some(done) = self.done_rx.recv() => self.on_completion(done).await,
            };
            if let Err(shutdown) = step {
                return shutdown;
            }
        }
    }

    async fn on_client_frame(
        &mut self,
        frame: Result<Option<Frame>>,
    ) -> std::result::Result<(), Shutdown> {
        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => return Err(Shutdown::ClientClosed),
            Err(err) => return Err(Shutdown::ClientFailed(err)),
        };
        let Some(frame) = filter::sanitize_client_frame(frame) else {
            return Ok(());
        };
        self.model.sink.send(frame).await.map_err(Shutdown::ModelFailed)
    }

    async fn on_model_frame(
        &mut self,
        frame: Result<Option<Frame>>,
    ) -> std::result::Result<(), Shutdown> {
        let mut frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => return Err(Shutdown::ModelClosed),
            Err(err) => return Err(Shutdown::ModelFailed(err)),
        };

        if let Some(event) = ServerEvent::inspect(&frame) {
            if filter::should_suppress(&event) {
                tracing::debug!(
                    kind = frame.kind(),
                    event_id = event.event_id(),
                    "Suppressed tool-call frame"
                );
                self.observe(event).await?;
                return Ok(());
            }
            self.observe(event).await?;
            match frame.kind() {
                Some("session.created") => {
                    filter::redact_session_created(&mut frame, self.policy.voice.as_ref());
                }
                Some("response.done") => {
                    filter::prune_function_calls(&mut frame);
                }
                _ => {}
            }
        }

        self.client.sink.send(frame).await.map_err(Shutdown::ClientFailed)
    }

    /// Updates call state from a model event.
    async fn observe(&mut self, event: ServerEvent) -> std::result::Result<(), Shutdown> {
        match event {
            ServerEvent::ResponseOutputItemAdded {
                item: Item::FunctionCall { call_id, name, .. },
                ..
            } => self.calls.note_item(&call_id, Some(&name), None),
            ServerEvent::ConversationItemCreated {
                previous_item_id,
                item: Item::FunctionCall { call_id, name, .. },
                ..
            } => self.calls.note_item(&call_id, Some(&name), previous_item_id),
            ServerEvent::ResponseFunctionCallArgumentsDone {
                response_id,
                call_id,
                name,
                arguments,
                ..
            } => self.dispatch(call_id, name, &arguments, response_id.as_deref()),
            ServerEvent::ResponseDone { response, .. } => {
                let Some(response_id) = response.id.as_deref() else {
                    return Ok(());
                };
                if self
                    .calls
                    .response_done(response_id, response.function_call_ids())
                {
                    self.request_follow_up().await?;
                }
            }
            ServerEvent::Error { error, .. } => {
                tracing::warn!(
                    code = error.code.as_deref(),
                    message = %error.message,
                    "Model reported an error"
                );
            }
            _ => {}
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        call_id: String,
        name: Option<String>,
        arguments: &str,
        response_id: Option<&str>,
    ) {
        let tool_name = name
            .or_else(|| self.calls.announced_name(&call_id).map(str::to_string))
            .unwrap_or_default();
        if !self.calls.receive(&call_id, response_id) {
            tracing::debug!(call_id, "Ignored repeated tool call");
            return;
        }

        let call = self.tools.invoke(&tool_name, arguments);
        self.calls.mark_dispatched(&call_id);
        tracing::info!(tool = %tool_name, call_id, "Dispatching tool call");

        let done_tx = self.done_tx.clone();
        let timeout = self.tool_timeout;
        tokio::spawn(async move {
            let result = match call {
                Ok(future) => match timeout {
                    Some(limit) => tokio::time::timeout(limit, future)
                        .await
                        .unwrap_or(Err(Error::ToolTimeout(limit))),
                    None => future.await,
                },
                Err(err) => Err(err),
            };
            // The session may already be gone; its result is then discarded.
            let _ = done_tx
                .send(Completion {
                    call_id,
                    tool_name,
                    result,
                })
                .await;
        });
    }

    async fn on_completion(&mut self, done: Completion) -> std::result::Result<(), Shutdown> {
        let Completion {
            call_id,
            tool_name,
            result,
        } = done;
        if !self.calls.result_ready(&call_id) {
            tracing::debug!(call_id, "Dropped result for a call that is not in flight");
            return Ok(());
        }

        let (output, mirror) = match result {
            Ok(result) => {
                tracing::info!(
                    tool = %tool_name,
                    call_id,
                    direction = ?result.direction,
                    "Tool call completed"
                );
                let mirror = (result.direction == ToolDirection::ToClient).then(|| result.text.clone());
                (result.text, mirror)
            }
            Err(err) => {
                tracing::warn!(tool = %tool_name, call_id, error = %err, "Tool call failed");
                (tool_error_output(&err), None)
            }
        };

        self.send_to_model(&ClientEvent::function_call_output(call_id.clone(), output))
            .await?;

        if let Some(tool_result) = mirror {
            let event = RelayEvent::ToolResponse {
                previous_item_id: self.calls.previous_item_id(&call_id).map(str::to_string),
                tool_name,
                tool_result,
            };
            let frame = Frame::from_event(&event).map_err(Shutdown::Internal)?;
            self.client.sink.send(frame).await.map_err(Shutdown::ClientFailed)?;
        }

        if self.calls.retire(&call_id) {
            self.request_follow_up().await?;
        }
        Ok(())
    }

    async fn request_follow_up(&mut self) -> std::result::Result<(), Shutdown> {
        tracing::debug!("All tool calls answered, requesting a follow-up response");
        self.send_to_model(&ClientEvent::response_create()).await
    }

    async fn send_to_model(&mut self, event: &ClientEvent) -> std::result::Result<(), Shutdown> {
        let frame = Frame::from_event(event).map_err(Shutdown::Internal)?;
        self.model.sink.send(frame).await.map_err(Shutdown::ModelFailed)
    }

    async fn finish(mut self, outcome: Shutdown) {
        match outcome {
            Shutdown::ClientClosed => {
                tracing::info!("Client closed the session");
                let _ = self.model.sink.close(CloseReason::normal()).await;
            }
            Shutdown::ClientFailed(err) => {
                tracing::warn!(error = %err, "Client connection failed");
                let _ = self
                    .model
                    .sink
                    .close(CloseReason::internal("client connection failed"))
                    .await;
                let _ = self.client.sink.close(CloseReason::internal("connection failed")).await;
            }
            Shutdown::ModelClosed if self.calls.pending() == 0 => {
                tracing::info!("Model closed the session");
                let _ = self.client.sink.close(CloseReason::normal()).await;
            }
            Shutdown::ModelClosed => {
                let message = format!(
                    "model connection closed with {} tool call(s) pending",
                    self.calls.pending()
                );
                tracing::error!("{message}");
                self.fail_client(&message).await;
            }
            Shutdown::ModelFailed(err) | Shutdown::Internal(err) => {
                tracing::error!(error = %err, "Session failed");
                let _ = self.model.sink.close(CloseReason::internal("session failed")).await;
                self.fail_client(&err.to_string()).await;
            }
        }
    }

    async fn fail_client(&mut self, message: &str) {
        match Frame::from_event(&RelayEvent::upstream_failure(message)) {
            Ok(frame) => {
                let _ = self.client.sink.send(frame).await;
            }
            Err(err) => tracing::debug!(error = %err, "Could not encode error frame"),
        }
        let _ = self.client.sink.close(CloseReason::internal(message)).await;
    }
}

/// Output sent to the model when a call cannot be answered.
fn tool_error_output(err: &Error) -> String {
    serde_json::json!({ "error": err.to_string() }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_errors_are_json_payloads() {
        let output = tool_error_output(&Error::UnknownTool("delete_everything".into()));
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["error"], "unknown tool: delete_everything");
    }
}
