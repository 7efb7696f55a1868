//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every section is `#[serde(default)]`
//! so a partial file only has to name what it changes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tether_core::tools::ConsentPolicy;

/// Root settings type.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    pub version: String,
    pub attachments: AttachmentSettings,
    pub process: ProcessSettings,
    pub logs: LogSettings,
    pub chat: ChatSettings,
    pub tools: ToolSettings,
    pub telemetry: TelemetrySettings,
}

impl Default for TetherSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            attachments: AttachmentSettings::default(),
            process: ProcessSettings::default(),
            logs: LogSettings::default(),
            chat: ChatSettings::default(),
            tools: ToolSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

/// Where uploaded files wait before a tool copies them into a project.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttachmentSettings {
    pub temp_dir: PathBuf,
}

impl Default for AttachmentSettings {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join("tether-attachments"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessSettings {
    /// How long a host-mode stop waits for the process to exit.
    pub stop_timeout_ms: u64,
    /// Container runtime CLI used for container-mode apps.
    pub container_runtime: String,
    /// Container names default to `{container_prefix}-{app_id}`.
    pub container_prefix: String,
    /// Dependency-cache volumes are named `{volume_prefix}-{app_id}`.
    pub volume_prefix: String,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            stop_timeout_ms: 5_000,
            container_runtime: "docker".to_string(),
            container_prefix: "tether-app".to_string(),
            volume_prefix: "tether-pnpm".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogSettings {
    pub max_entries_per_app: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            max_entries_per_app: 1_000,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    /// Re-run problem checks after every turn that touched files.
    pub auto_fix_problems: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolSettings {
    /// Per-tool consent policy, replacing the tool's own default.
    pub consent_overrides: BTreeMap<String, ConsentPolicy>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Compact,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetrySettings {
    pub level: String,
    pub format: LogFormat,
    /// Per-module level overrides (e.g. `"tether_session": "debug"`).
    pub module_levels: BTreeMap<String, String>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            module_levels: BTreeMap::new(),
        }
    }
}
