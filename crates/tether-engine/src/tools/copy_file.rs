use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tether_core::markup::Tag;
use tether_core::tools::{ConsentPolicy, Tool, ToolContext, ToolError, ToolOutput};
use tracing::info;

use crate::paths::{resolve_existing, safe_join};

const TAG: &str = "tether-copy";

#[derive(Debug, Deserialize)]
pub struct CopyFileArgs {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CopyFilePartial {
    source: Option<String>,
    destination: Option<String>,
    description: Option<String>,
}

/// Copies an uploaded attachment from the temp attachments directory into
/// the project.
pub struct CopyFileTool {
    attachments_root: PathBuf,
}

impl CopyFileTool {
    pub fn new(attachments_root: impl Into<PathBuf>) -> Self {
        Self {
            attachments_root: attachments_root.into(),
        }
    }

    /// Resolve `source` and make sure it stays under the attachments root.
    /// Relative sources are taken relative to the root.
    fn confine_source(&self, source: &str) -> Result<PathBuf, ToolError> {
        let root = resolve_existing(&self.attachments_root);
        let raw = Path::new(source);
        let candidate = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.attachments_root.join(raw)
        };
        let resolved = resolve_existing(&candidate);

        // Path::starts_with compares whole components, so "/tmp/att-evil"
        // does not match a root of "/tmp/att".
        if !resolved.starts_with(&root) {
            return Err(ToolError::SecurityViolation(format!(
                "source path must be within the temp attachments directory ({}). Got: {source}",
                self.attachments_root.display()
            )));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl Tool for CopyFileTool {
    type Args = CopyFileArgs;
    type Partial = CopyFilePartial;

    fn name(&self) -> &str {
        "copy_file"
    }

    fn description(&self) -> &str {
        "Copy an uploaded attachment file from the temp directory into the codebase"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["source", "destination"],
            "properties": {
                "source": {
                    "type": "string",
                    "description": "The absolute path of the temp attachment file to copy"
                },
                "destination": {
                    "type": "string",
                    "description": "The destination file path relative to the app root"
                },
                "description": {
                    "type": "string",
                    "description": "Brief description of the copy operation"
                }
            }
        })
    }

    fn default_consent(&self) -> ConsentPolicy {
        ConsentPolicy::Always
    }

    fn modifies_state(&self) -> bool {
        true
    }

    fn consent_preview(&self, args: &CopyFileArgs) -> Option<String> {
        Some(format!("Copy attachment to {}", args.destination))
    }

    fn render(&self, partial: &CopyFilePartial, is_complete: bool) -> Option<String> {
        let Some(destination) = partial.destination.as_deref() else {
            return Some(Tag::new(TAG).attr("loading", "true").empty());
        };

        let source = partial
            .source
            .as_deref()
            .and_then(|s| Path::new(s).file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tag = Tag::new(TAG)
            .attr("source", source)
            .attr("destination", destination)
            .attr("description", partial.description.clone().unwrap_or_default());

        let mut markup = tag.open();
        if is_complete {
            markup.push_str(&tag.close());
        }
        Some(markup)
    }

    async fn execute(&self, args: CopyFileArgs, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let source = self.confine_source(&args.source)?;

        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            return Err(ToolError::NotFound(format!(
                "Source file does not exist: {}",
                args.source
            )));
        }

        let destination = safe_join(&ctx.project_root, &args.destination)?;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&source, &destination).await?;

        info!(
            conversation_id = %ctx.conversation_id,
            source = %source.display(),
            destination = %destination.display(),
            "copied attachment into project"
        );

        Ok(ToolOutput::text(format!(
            "Successfully copied attachment to {}",
            args.destination
        )))
    }
}
