use std::path::PathBuf;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::ids::{ConversationId, ToolCallId};

/// Whether a tool call may run without asking the user first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentPolicy {
    /// Auto-execute.
    #[default]
    Always,
    /// Ask the user before every call.
    Ask,
    /// Refuse every call.
    Never,
}

/// Context available to tools during execution.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub conversation_id: ConversationId,
    pub tool_call_id: ToolCallId,
    /// Root of the project the agent is editing. Writes must stay inside it.
    pub project_root: PathBuf,
    pub cancellation: CancellationToken,
}

/// What a tool hands back after running.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolOutput {
    /// Text fed back to the model.
    pub content: String,
    /// Finalized markup for the rendering surface. When absent the caller
    /// renders the complete arguments instead.
    pub markup: Option<String>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            markup: None,
        }
    }

    pub fn with_markup(mut self, markup: impl Into<String>) -> Self {
        self.markup = Some(markup.into());
        self
    }
}

/// Tool definition advertised to the model and used for dispatch decisions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
    pub consent: ConsentPolicy,
    pub modifies_state: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("security error: {0}")]
    SecurityViolation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("user declined to run {0}")]
    ConsentDeclined(String),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

/// Trait implemented by each tool.
///
/// `Args` is the strict, validated input. `Partial` mirrors it with every
/// field optional so half-streamed arguments can still be rendered.
#[async_trait]
pub trait Tool: Send + Sync + 'static {
    type Args: DeserializeOwned + Send + 'static;
    type Partial: DeserializeOwned + Default;

    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    fn default_consent(&self) -> ConsentPolicy {
        ConsentPolicy::Always
    }

    /// Tools with side effects may be gated behind a consent prompt.
    fn modifies_state(&self) -> bool {
        false
    }

    /// One-line summary shown when asking the user for consent.
    fn consent_preview(&self, _args: &Self::Args) -> Option<String> {
        None
    }

    /// Markup for the arguments streamed so far. `None` renders nothing.
    fn render(&self, partial: &Self::Partial, is_complete: bool) -> Option<String>;

    async fn execute(&self, args: Self::Args, ctx: &ToolContext) -> Result<ToolOutput, ToolError>;
}

/// Arguments that passed schema validation for a particular tool.
#[derive(Clone, Debug)]
pub struct ValidatedArgs {
    value: serde_json::Value,
    preview: Option<String>,
}

impl ValidatedArgs {
    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }

    pub fn consent_preview(&self) -> Option<&str> {
        self.preview.as_deref()
    }
}

/// Object-safe view of a [`Tool`], used by the registry.
#[async_trait]
pub trait DynTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    fn render_value(&self, arguments: &serde_json::Value, is_complete: bool) -> Option<String>;

    fn validate(&self, arguments: serde_json::Value) -> Result<ValidatedArgs, ToolError>;

    async fn execute_validated(
        &self,
        args: ValidatedArgs,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError>;
}

#[async_trait]
impl<T: Tool> DynTool for T {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: Tool::name(self).to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
            consent: self.default_consent(),
            modifies_state: self.modifies_state(),
        }
    }

    fn render_value(&self, arguments: &serde_json::Value, is_complete: bool) -> Option<String> {
        // Half-streamed arguments may not even be shaped right yet.
        let partial = serde_json::from_value::<T::Partial>(arguments.clone()).unwrap_or_default();
        Tool::render(self, &partial, is_complete)
    }

    fn validate(&self, arguments: serde_json::Value) -> Result<ValidatedArgs, ToolError> {
        let args: T::Args = serde_json::from_value(arguments.clone())
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let preview = self.consent_preview(&args);
        Ok(ValidatedArgs {
            value: arguments,
            preview,
        })
    }

    async fn execute_validated(
        &self,
        args: ValidatedArgs,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let typed: T::Args = serde_json::from_value(args.value)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        Tool::execute(self, typed, ctx).await
    }
}
