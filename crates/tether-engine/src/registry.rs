use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tether_core::tools::{ConsentPolicy, DynTool, ToolDefinition};
use tether_core::transport::ToolCallFragment;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool already registered: {0}")]
    DuplicateTool(String),
}

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn DynTool>>,
    consent_overrides: BTreeMap<String, ConsentPolicy>,
    /// Tools the user approved with "always allow" during this process.
    always_allowed: RwLock<HashSet<String>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            consent_overrides: BTreeMap::new(),
            always_allowed: RwLock::new(HashSet::new()),
        }
    }

    /// Apply per-tool consent policies from settings.
    pub fn with_consent_overrides(mut self, overrides: BTreeMap<String, ConsentPolicy>) -> Self {
        self.consent_overrides = overrides;
        self
    }

    /// Register a tool. Fails if the name is taken.
    pub fn register(&mut self, tool: Arc<dyn DynTool>) -> Result<(), RegistryError> {
        let name = tool.definition().name;
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn DynTool>> {
        self.tools.get(name).map(Arc::clone)
    }

    /// Check if a tool is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions sorted by name, with the effective consent policy.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|tool| {
                let mut def = tool.definition();
                def.consent = self.effective_consent(&def.name, def.consent);
                def
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Number of registered tools.
    pub fn count(&self) -> usize {
        self.tools.len()
    }

    /// Consent policy for `name`, or `None` for unknown tools.
    ///
    /// Precedence: runtime "always allow" grants, then settings overrides,
    /// then the tool's own default.
    pub fn consent_for(&self, name: &str) -> Option<ConsentPolicy> {
        let tool = self.tools.get(name)?;
        Some(self.effective_consent(name, tool.definition().consent))
    }

    /// Record an "always allow" answer so later calls skip the prompt.
    pub fn allow_always(&self, name: &str) {
        self.always_allowed.write().insert(name.to_string());
    }

    fn effective_consent(&self, name: &str, default: ConsentPolicy) -> ConsentPolicy {
        if self.always_allowed.read().contains(name) {
            return ConsentPolicy::Always;
        }
        self.consent_overrides.get(name).copied().unwrap_or(default)
    }

    /// Markup for a streamed tool call. Unknown tools render nothing.
    pub fn render(&self, fragment: &ToolCallFragment) -> Option<String> {
        self.tools
            .get(&fragment.tool_name)?
            .render_value(&fragment.arguments, fragment.is_complete)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
