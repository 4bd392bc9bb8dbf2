use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, SyncError};

pub const NODE_MODULE_PREFIX: &str =
    "(function (exports, require, module, __filename, __dirname) { ";
pub const NODE_MODULE_SUFFIX: &str = "\n});";

/// Session configuration, usually passed through from the host's launch JSON.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Absolute workspace directory as seen by the remote process.
    pub workspace_dir: String,
    /// Prefix the host uses for local workspace paths.
    pub dav_prefix: String,
    /// Cosmetic prefix removed from script names and text.
    pub strip_prefix: String,
    pub excluded_script_prefixes: Vec<String>,
    pub live_source_prefix: String,
    pub live_source_suffix: String,
    /// Id of the remote's implicit first-line breakpoint.
    pub sentinel_breakpoint: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            workspace_dir: String::new(),
            dav_prefix: "/workspace".to_string(),
            strip_prefix: String::new(),
            excluded_script_prefixes: vec!["chrome-extension://".to_string()],
            live_source_prefix: NODE_MODULE_PREFIX.to_string(),
            live_source_suffix: NODE_MODULE_SUFFIX.to_string(),
            sentinel_breakpoint: 1,
        }
    }
}

impl SessionConfig {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(SyncError::Config)
    }

    pub fn is_excluded(&self, script_name: &str) -> bool {
        self.excluded_script_prefixes
            .iter()
            .any(|prefix| script_name.starts_with(prefix.as_str()))
    }
}
