//! Server-side tools the model may call during a session.

pub mod grounding;
pub mod search;

use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use schemars::JsonSchema;
use schemars::schema::RootSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::protocol::models::Tool;
use crate::store::DocumentStore;
use crate::transport::BoxFuture;

pub use grounding::{GroundingArgs, report_grounding};
pub use search::{SearchArgs, search};

/// Placeholder returned instead of an empty tool result, so no output frame
/// ever carries empty content.
pub const EMPTY_RESULT_SENTINEL: &str = "1";

/// The closed set of tools the relay knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    Search,
    ReportGrounding,
}

impl ToolName {
    pub const ALL: [Self; 2] = [Self::Search, Self::ReportGrounding];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::ReportGrounding => "report_grounding",
        }
    }
}

impl FromStr for ToolName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| Error::UnknownTool(s.to_string()))
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who gets to see a tool result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolDirection {
    /// Shown to the user as well as returned to the model.
    ToClient,
    /// Returned to the model only.
    ToServer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub text: String,
    pub direction: ToolDirection,
}

impl ToolResult {
    /// A model-only result. Empty text becomes [`EMPTY_RESULT_SENTINEL`].
    #[must_use]
    pub fn to_server(text: impl Into<String>) -> Self {
        Self::new(text.into(), ToolDirection::ToServer)
    }

    /// A result mirrored to the client. Empty text becomes [`EMPTY_RESULT_SENTINEL`].
    #[must_use]
    pub fn to_client(text: impl Into<String>) -> Self {
        Self::new(text.into(), ToolDirection::ToClient)
    }

    fn new(text: String, direction: ToolDirection) -> Self {
        let text = if text.trim().is_empty() {
            EMPTY_RESULT_SENTINEL.to_string()
        } else {
            text
        };
        Self { text, direction }
    }
}

type ToolHandler = Box<dyn Fn(Value) -> BoxFuture<'static, Result<ToolResult>> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct ToolDefinition {
    pub name: ToolName,
    pub description: String,
    pub schema: RootSchema,
}

/// Tool schemas and handlers, fixed before the first session starts.
#[derive(Default)]
pub struct ToolRegistry {
    defs: Vec<ToolDefinition>,
    handlers: HashMap<ToolName, ToolHandler>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.defs.iter().map(|d| d.name).collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.defs
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Registers `handler` under `name`, replacing any earlier registration.
    /// The parameter schema is derived from `TArgs`.
    pub fn tool<TArgs, F, Fut>(&mut self, name: ToolName, description: impl Into<String>, handler: F)
    where
        TArgs: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(TArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult>> + Send + 'static,
    {
        let schema = schemars::schema_for!(TArgs);
        self.defs.retain(|def| def.name != name);
        self.defs.push(ToolDefinition {
            name,
            description: description.into(),
            schema,
        });

        let user_handler = Arc::new(handler);
        let handler = move |value: Value| -> BoxFuture<'static, Result<ToolResult>> {
            let user_handler = Arc::clone(&user_handler);
            Box::pin(async move {
                let args: TArgs = serde_json::from_value(value)
                    .map_err(|e| Error::InvalidArguments(e.to_string()))?;
                user_handler(args).await
            })
        };

        self.handlers.insert(name, Box::new(handler));
    }

    /// Maps a wire name onto a registered tool.
    ///
    /// # Errors
    /// Returns [`Error::UnknownTool`] if the name is not in the closed set or
    /// has no handler.
    #[allow(clippy::result_large_err)]
    pub fn resolve(&self, name: &str) -> Result<ToolName> {
        let tool = name.parse::<ToolName>()?;
        if self.handlers.contains_key(&tool) {
            Ok(tool)
        } else {
            Err(Error::UnknownTool(name.to_string()))
        }
    }

    /// Starts a call. `arguments` is the raw JSON text the model produced.
    ///
    /// The returned future owns everything it needs, so it can be spawned and
    /// outlive the caller's borrow of the registry.
    ///
    /// # Errors
    /// Returns [`Error::UnknownTool`] if `name` is not registered.
    #[allow(clippy::result_large_err)]
    pub fn invoke(
        &self,
        name: &str,
        arguments: &str,
    ) -> Result<BoxFuture<'static, Result<ToolResult>>> {
        let tool = self.resolve(name)?;
        let handler = self
            .handlers
            .get(&tool)
            .ok_or_else(|| Error::UnknownTool(name.to_string()))?;
        let value = if arguments.trim().is_empty() {
            Ok(Value::Object(serde_json::Map::new()))
        } else {
            serde_json::from_str::<Value>(arguments)
                .map_err(|e| Error::InvalidArguments(e.to_string()))
        };
        match value {
            Ok(value) => Ok(handler(value)),
            Err(err) => Ok(Box::pin(async move { Err(err) })),
        }
    }

    /// Converts registered tools into the schemas advertised to the model.
    ///
    /// # Errors
    /// Returns an error if schema serialization fails.
    #[allow(clippy::result_large_err)]
    pub fn try_as_tools(&self) -> Result<Vec<Tool>> {
        let mut tools = Vec::with_capacity(self.defs.len());
        for def in &self.defs {
            let mut parameters = serde_json::to_value(&def.schema)?;
            if let Some(map) = parameters.as_object_mut() {
                map.remove("$schema");
                map.remove("title");
                if map
                    .get("definitions")
                    .and_then(Value::as_object)
                    .is_some_and(serde_json::Map::is_empty)
                {
                    map.remove("definitions");
                }
            }
            tools.push(Tool::Function {
                name: def.name.as_str().to_string(),
                description: Some(def.description.clone()),
                parameters,
            });
        }
        Ok(tools)
    }
}

/// Registers the knowledge-base `search` and `report_grounding` tools.
pub fn attach_rag_tools(registry: &mut ToolRegistry, store: Arc<dyn DocumentStore>) {
    let search_store = Arc::clone(&store);
    registry.tool(
        ToolName::Search,
        search::SEARCH_DESCRIPTION,
        move |args: SearchArgs| {
            let store = Arc::clone(&search_store);
            async move { search(store.as_ref(), args).await }
        },
    );
    registry.tool(
        ToolName::ReportGrounding,
        grounding::GROUNDING_DESCRIPTION,
        move |args: GroundingArgs| {
            let store = Arc::clone(&store);
            async move { report_grounding(store.as_ref(), args).await }
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    struct EchoArgs {
        /// Text to echo back.
        text: String,
    }

    fn echo_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.tool(ToolName::Search, "Echo", |args: EchoArgs| async move {
            Ok(ToolResult::to_client(args.text))
        });
        registry
    }

    #[test]
    fn unknown_names_are_typed_errors() {
        let registry = echo_registry();
        assert!(matches!(
            registry.resolve("delete_everything"),
            Err(Error::UnknownTool(name)) if name == "delete_everything"
        ));
        // In the closed set but never registered.
        assert!(matches!(
            registry.resolve("report_grounding"),
            Err(Error::UnknownTool(_))
        ));
        assert_eq!(registry.resolve("search").unwrap(), ToolName::Search);
    }

    #[tokio::test]
    async fn invoke_decodes_arguments() {
        let registry = echo_registry();
        let result = registry
            .invoke("search", r#"{"text":"hi"}"#)
            .unwrap()
            .await
            .unwrap();
        assert_eq!(result, ToolResult::to_client("hi"));
    }

    #[tokio::test]
    async fn malformed_arguments_fail_the_call_not_the_lookup() {
        let registry = echo_registry();
        let call = registry.invoke("search", "{not json").unwrap();
        assert!(matches!(call.await, Err(Error::InvalidArguments(_))));
        let call = registry.invoke("search", r#"{"other":1}"#).unwrap();
        assert!(matches!(call.await, Err(Error::InvalidArguments(_))));
    }

    #[test]
    fn advertised_schema_is_trimmed() {
        let tools = echo_registry().try_as_tools().unwrap();
        let Tool::Function {
            name,
            description,
            parameters,
        } = &tools[0];
        assert_eq!(name, "search");
        assert_eq!(description.as_deref(), Some("Echo"));
        assert!(parameters.get("$schema").is_none());
        assert!(parameters.get("title").is_none());
        assert_eq!(parameters["type"], "object");
        assert_eq!(parameters["required"], serde_json::json!(["text"]));
        assert_eq!(
            parameters["properties"]["text"]["description"],
            "Text to echo back."
        );
    }

    #[test]
    fn empty_results_become_the_sentinel() {
        assert_eq!(ToolResult::to_server("").text, EMPTY_RESULT_SENTINEL);
        assert_eq!(ToolResult::to_server("  \n").text, EMPTY_RESULT_SENTINEL);
        assert_eq!(ToolResult::to_server("x").text, "x");
    }

    #[test]
    fn reregistering_replaces_the_definition() {
        let mut registry = echo_registry();
        registry.tool(ToolName::Search, "Echo twice", |args: EchoArgs| async move {
            Ok(ToolResult::to_server(args.text.repeat(2)))
        });
        assert_eq!(registry.definitions().len(), 1);
        assert_eq!(registry.definitions()[0].description, "Echo twice");
    }
}
