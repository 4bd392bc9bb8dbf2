use crate::config::SessionConfig;

/// Translates between remote script names and the host's local paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathMapper {
    workspace_dir: String,
    dav_prefix: String,
    strip_prefix: String,
}

impl PathMapper {
    pub fn new(workspace_dir: &str, dav_prefix: &str) -> Self {
        Self {
            workspace_dir: workspace_dir.to_string(),
            dav_prefix: dav_prefix.to_string(),
            strip_prefix: String::new(),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            workspace_dir: config.workspace_dir.clone(),
            dav_prefix: config.dav_prefix.clone(),
            strip_prefix: config.strip_prefix.clone(),
        }
    }

    pub fn set_strip(&mut self, strip_prefix: &str) {
        self.strip_prefix = strip_prefix.to_string();
    }

    /// Removes the cosmetic strip prefix, if present.
    pub fn strip<'a>(&self, s: &'a str) -> &'a str {
        if self.strip_prefix.is_empty() {
            return s;
        }
        s.strip_prefix(self.strip_prefix.as_str()).unwrap_or(s)
    }

    /// Local path of a remote script. Anonymous scripts are named after their id.
    ///
    /// An empty workspace directory prefixes every script, so all of them land under the
    /// dav prefix.
    pub fn local_script_path(&self, name: Option<&str>, script_id: u64) -> String {
        let name = match name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("-anonymous-{}", script_id),
        };
        let name = match name.strip_prefix(self.workspace_dir.as_str()) {
            Some(rest) => format!("{}{}", self.dav_prefix, rest),
            _ => name,
        };
        // windows paths arrive with backslashes
        name.replace('\\', "/")
    }

    /// Reconstructs the remote script name of a local path whose script is not loaded yet.
    pub fn remote_name_for_path(&self, path: &str) -> Option<String> {
        if path.is_empty() {
            return None;
        }
        let Some(rest) = path.strip_prefix(self.dav_prefix.as_str()) else {
            return Some(path.to_string());
        };
        let rest = if self.is_windows_workspace() {
            rest.replace('/', "\\")
        } else {
            rest.to_string()
        };
        Some(format!("{}{}", self.workspace_dir, rest))
    }

    fn is_windows_workspace(&self) -> bool {
        self.workspace_dir.get(1..3) == Some(":\\")
    }
}
