//! Session relay between a voice client and the realtime model.
//!
//! A [`Relay`] is built once at start-up and shared by every connection. Each
//! call to [`Relay::attach`] opens a model leg for one client leg and pumps
//! frames between them until either side goes away.

pub mod calls;
pub mod filter;
pub mod policy;
mod session;

use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

use crate::error::{Error, Result};
use crate::protocol::Frame;
use crate::tools::ToolRegistry;
use crate::transport::{CloseReason, Leg, ModelConnector};

pub use calls::{CallState, CallTable};
pub use policy::{DEFAULT_INSTRUCTIONS, SessionPolicy};

use session::SessionTask;

#[derive(Clone)]
pub struct Relay {
    policy: Arc<SessionPolicy>,
    session_update: Frame,
    tools: Arc<ToolRegistry>,
    connector: Arc<dyn ModelConnector>,
    tool_timeout: Option<Duration>,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("policy", &self.policy)
            .field("tools", &self.tools)
            .field("tool_timeout", &self.tool_timeout)
            .finish_non_exhaustive()
    }
}

impl Relay {
    #[must_use]
    pub fn builder() -> RelayBuilder {
        RelayBuilder::new()
    }

    #[must_use]
    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Runs one session to completion.
    ///
    /// Opens the model leg, sends the session policy, then relays frames until
    /// either leg closes. If the model leg cannot be opened the client is
    /// closed with a diagnostic code and nothing else happens.
    pub async fn attach(&self, mut client: Leg, request_id: Option<String>) {
        let session_id = request_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let span = tracing::info_span!("session", id = %session_id);

        async move {
            tracing::info!("Client connected");
            let model = match self.connector.connect(&session_id).await {
                Ok(model) => model,
                Err(err) => {
                    let reason = CloseReason::for_connect_error(&err);
                    tracing::error!(error = %err, code = reason.code, "Could not open model connection");
                    if let Err(err) = client.sink.close(reason).await {
                        tracing::debug!(error = %err, "Client already gone");
                    }
                    return;
                }
            };
            tracing::info!("Model connection open");

            SessionTask::new(
                client,
                model,
                Arc::clone(&self.policy),
                self.session_update.clone(),
                Arc::clone(&self.tools),
                self.tool_timeout,
            )
            .run()
            .await;
            tracing::info!("Session ended");
        }
        .instrument(span)
        .await;
    }
}

pub struct RelayBuilder {
    policy: SessionPolicy,
    tools: ToolRegistry,
    connector: Option<Arc<dyn ModelConnector>>,
    tool_timeout: Option<Duration>,
}

impl RelayBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            policy: SessionPolicy::default(),
            tools: ToolRegistry::new(),
            connector: None,
            tool_timeout: None,
        }
    }

    #[must_use]
    pub fn policy(mut self, policy: SessionPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn connector(mut self, connector: impl ModelConnector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    #[must_use]
    pub fn shared_connector(mut self, connector: Arc<dyn ModelConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Upper bound on a single tool call. Unbounded when unset.
    #[must_use]
    pub const fn tool_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// # Errors
    /// Returns an error if no connector is set or the session policy cannot be
    /// encoded.
    #[allow(clippy::result_large_err)]
    pub fn build(self) -> Result<Relay> {
        let connector = self
            .connector
            .ok_or_else(|| Error::Config("a model connector is required".to_string()))?;
        let session_update = Frame::from_event(&self.policy.session_update(&self.tools)?)?;
        tracing::info!(
            tools = ?self.tools.definitions().iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            "Relay ready"
        );
        Ok(Relay {
            policy: Arc::new(self.policy),
            session_update,
            tools: Arc::new(self.tools),
            connector,
            tool_timeout: self.tool_timeout,
        })
    }
}

impl Default for RelayBuilder {
    fn default() -> Self {
        Self::new()
    }
}
