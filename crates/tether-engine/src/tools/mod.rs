pub mod copy_file;
pub mod todo_write;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tether_core::tools::ConsentPolicy;
use tether_settings::TetherSettings;

use crate::registry::{RegistryError, ToolRegistry};
use crate::tasks::TaskStore;

/// What the built-in tools need from the host.
#[derive(Clone)]
pub struct RegistryDeps {
    pub attachments_root: PathBuf,
    pub task_store: TaskStore,
    pub consent_overrides: BTreeMap<String, ConsentPolicy>,
}

impl RegistryDeps {
    pub fn from_settings(settings: &TetherSettings, task_store: TaskStore) -> Self {
        Self {
            attachments_root: settings.attachments.temp_dir.clone(),
            task_store,
            consent_overrides: settings.tools.consent_overrides.clone(),
        }
    }
}

/// Create a ToolRegistry with all built-in tools.
pub fn create_default_registry(deps: RegistryDeps) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new().with_consent_overrides(deps.consent_overrides);

    registry.register(Arc::new(copy_file::CopyFileTool::new(deps.attachments_root)))?;
    registry.register(Arc::new(todo_write::TodoWriteTool::new(deps.task_store)))?;

    Ok(registry)
}
