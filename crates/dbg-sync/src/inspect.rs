//! On-demand inspection and execution control of the attached process.
use futures::future::join_all;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::NORMAL_SCRIPTS;
use crate::error::{Result, SyncError};
use crate::model::{FrameRecord, VariableEntry};
use crate::protocol::{ScriptInfo, StepAction, ValueMirror};
use crate::serialize::{evaluation_entry, serialize_property};
use crate::session::SessionController;

/// Scope kinds above this are neither global nor local.
const LOCAL_SCOPE: u64 = 1;

impl SessionController {
    /// Source text of one script, `None` when the remote no longer knows it.
    pub async fn load_script_source(&self, script_id: u64) -> Result<Option<String>> {
        let scripts = self
            .client()?
            .scripts(NORMAL_SCRIPTS, Some(&[script_id][..]), true)
            .await?;
        Ok(scripts.into_iter().next().and_then(|script| script.source))
    }

    /// Properties of the object behind `handle`, with their values resolved.
    pub async fn load_objects(&self, handle: u64) -> Result<Vec<VariableEntry>> {
        let client = self.client()?;
        let object = client
            .lookup(&[handle], false)
            .await?
            .remove(&handle)
            .ok_or_else(|| SyncError::Protocol(format!("lookup did not return handle {}", handle)))?;

        let handles = object
            .properties
            .iter()
            .filter_map(|property| property.reference)
            .collect::<Vec<_>>();
        let values = if handles.is_empty() {
            FxHashMap::default()
        } else {
            client.lookup(&handles, false).await?
        };

        Ok(object
            .properties
            .iter()
            .map(|property| {
                serialize_property(property, property.reference.and_then(|r| values.get(&r)))
            })
            .collect())
    }

    /// Variables of every closure, with and catch scope of `frame`, fetched concurrently.
    pub async fn load_frame(&self, frame: &FrameRecord) -> Result<Vec<VariableEntry>> {
        let client = self.client()?;
        let scopes = frame
            .scopes
            .iter()
            .filter(|scope| scope.kind > LOCAL_SCOPE)
            .collect::<Vec<_>>();
        if scopes.is_empty() {
            return Ok(Vec::new());
        }
        debug!(frame = frame.index, scopes = scopes.len(), "Loading frame scopes");

        let bodies = join_all(
            scopes
                .iter()
                .map(|scope| client.scope(scope.index, frame.index, true)),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

        Ok(bodies
            .iter()
            .flat_map(|body| body.object.properties.iter())
            .map(|property| serialize_property(property, None))
            .collect())
    }

    pub async fn lookup(
        &self,
        handles: &[u64],
        include_source: bool,
    ) -> Result<FxHashMap<u64, ValueMirror>> {
        self.client()?.lookup(handles, include_source).await
    }

    /// Evaluates `expression` into an entry named after it. A remote evaluation failure is
    /// returned as an `.error` entry carrying the remote message.
    pub async fn evaluate(
        &self,
        expression: &str,
        frame: Option<usize>,
        global: bool,
        disable_break: bool,
    ) -> Result<VariableEntry> {
        match self
            .client()?
            .evaluate(expression, frame, global, disable_break)
            .await
        {
            Ok((mirror, _)) => Ok(evaluation_entry(expression, &mirror)),
            Err(SyncError::CommandFailed { message, .. }) => {
                debug!(expression, message = %message, "Evaluation failed");
                Ok(VariableEntry::error(expression.trim(), &message))
            }
            Err(e) => Err(e),
        }
    }

    /// Replaces the source of a running script, then refreshes the stack.
    pub async fn change_live(
        &self,
        script_id: u64,
        source: &str,
        preview_only: bool,
    ) -> Result<Value> {
        let config = self.config();
        let wrapped = format!(
            "{}{}{}",
            config.live_source_prefix, source, config.live_source_suffix
        );
        let result = self
            .client()?
            .change_live(script_id, &wrapped, preview_only)
            .await;
        if let Err(e) = self.backtrace().await {
            warn!(error = %e, "Failed to refresh stack after live edit");
        }
        result
    }

    pub async fn continue_script(
        &self,
        step_action: Option<StepAction>,
        step_count: Option<u32>,
    ) -> Result<()> {
        self.client()?
            .continue_script(step_action, step_count)
            .await
    }

    pub async fn suspend(&self) -> Result<()> {
        self.client()?.suspend().await
    }

    pub fn script_id_from_path(&self, path: &str) -> Option<u64> {
        self.with_scripts(|_, scripts| scripts.id_for_path(path))
    }

    /// Remote name of the script at `path`, reconstructed from the workspace layout when
    /// the script has not been loaded.
    pub fn script_name_from_path(&self, path: &str) -> Option<String> {
        self.with_scripts(|paths, scripts| {
            scripts
                .name_for_path(path)
                .map(str::to_string)
                .or_else(|| paths.remote_name_for_path(path))
        })
    }

    pub fn path_from_script_id(&self, script_id: u64) -> Option<String> {
        self.with_scripts(|_, scripts| scripts.path_for_id(script_id).map(str::to_string))
    }

    pub fn local_script_path(&self, script: &ScriptInfo) -> String {
        self.with_scripts(|paths, _| paths.local_script_path(script.name.as_deref(), script.id))
    }
}
