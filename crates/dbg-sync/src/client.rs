//! Remote debug client.
//!
//! One typed wrapper per remote command. Wrappers shape arguments and decode bodies.
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::connection::Connection;
use crate::error::{Result, SyncError};
use crate::protocol::{
    BacktraceBody, ListBreakpointsBody, Refs, Response, ScopeBody, ScriptInfo, SetBreakpointBody,
    StepAction, ValueMirror,
};

/// Script type mask for ordinary (non-native, non-extension) scripts.
pub const NORMAL_SCRIPTS: u32 = 4;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScriptsArgs<'a> {
    types: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    ids: Option<&'a [u64]>,
    include_source: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BacktraceArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    from_frame: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    to_frame: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bottom: Option<bool>,
    inline_refs: bool,
}

/// Arguments of a `setbreakpoint` request against a script name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointArgs {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub target: String,
    pub line: u32,
    pub column: u32,
    pub enabled: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub condition: String,
    pub ignore_count: u32,
}

impl SetBreakpointArgs {
    pub fn script(target: &str, line: u32, column: u32) -> Self {
        Self {
            kind: "script",
            target: target.to_string(),
            line,
            column,
            enabled: true,
            condition: String::new(),
            ignore_count: 0,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupArgs<'a> {
    handles: &'a [u64],
    include_source: bool,
}

#[derive(Debug, Serialize)]
struct EvaluateArgs<'a> {
    expression: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    frame: Option<usize>,
    global: bool,
    disable_break: bool,
}

#[derive(Debug, Serialize)]
struct ChangeLiveArgs<'a> {
    script_id: u64,
    new_source: &'a str,
    preview_only: bool,
}

#[derive(Debug, Serialize)]
struct ContinueArgs {
    stepaction: StepAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    stepcount: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScopeArgs {
    number: u64,
    frame_number: usize,
    inline_refs: bool,
}

/// Typed wrappers over the remote command set. No reconciliation happens here.
#[derive(Debug, Clone)]
pub struct DebugClient {
    connection: Arc<Connection>,
}

impl DebugClient {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn is_running(&self) -> bool {
        self.connection.is_running()
    }

    async fn call(&self, command: &str, arguments: Option<impl Serialize>) -> Result<Response> {
        let arguments = arguments
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| SyncError::Protocol(format!("cannot encode `{}`: {}", command, e)))?;
        self.connection.request(command, arguments).await
    }

    fn decode<T: DeserializeOwned>(command: &str, body: Value) -> Result<T> {
        serde_json::from_value(body).map_err(|source| SyncError::Decode {
            command: command.to_string(),
            source,
        })
    }

    pub async fn scripts(
        &self,
        types: u32,
        ids: Option<&[u64]>,
        include_source: bool,
    ) -> Result<Vec<ScriptInfo>> {
        let response = self
            .call(
                "scripts",
                Some(ScriptsArgs {
                    types,
                    ids,
                    include_source,
                }),
            )
            .await?;
        Self::decode("scripts", response.body)
    }

    pub async fn backtrace(
        &self,
        from_frame: Option<usize>,
        to_frame: Option<usize>,
        bottom: Option<bool>,
        inline_refs: bool,
    ) -> Result<(BacktraceBody, Refs)> {
        let response = self
            .call(
                "backtrace",
                Some(BacktraceArgs {
                    from_frame,
                    to_frame,
                    bottom,
                    inline_refs,
                }),
            )
            .await?;
        // A process without JavaScript frames answers with a body lacking `frames`.
        let body = if response.body.is_null() {
            BacktraceBody::default()
        } else {
            Self::decode("backtrace", response.body)?
        };
        Ok((body, Refs::new(response.refs)))
    }

    pub async fn set_breakpoint(&self, args: &SetBreakpointArgs) -> Result<SetBreakpointBody> {
        debug!(script = %args.target, line = args.line, column = args.column, "Setting breakpoint");
        let response = self.call("setbreakpoint", Some(args)).await?;
        Self::decode("setbreakpoint", response.body)
    }

    pub async fn clear_breakpoint(&self, id: u64) -> Result<()> {
        debug!(id, "Clearing breakpoint");
        self.call("clearbreakpoint", Some(serde_json::json!({ "breakpoint": id })))
            .await
            .map(|_| ())
    }

    pub async fn list_breakpoints(&self) -> Result<ListBreakpointsBody> {
        let response = self.call("listbreakpoints", None::<()>).await?;
        Self::decode("listbreakpoints", response.body)
    }

    pub async fn lookup(
        &self,
        handles: &[u64],
        include_source: bool,
    ) -> Result<FxHashMap<u64, ValueMirror>> {
        let response = self
            .call(
                "lookup",
                Some(LookupArgs {
                    handles,
                    include_source,
                }),
            )
            .await?;
        let by_key: FxHashMap<String, ValueMirror> = Self::decode("lookup", response.body)?;
        Ok(by_key
            .into_iter()
            .filter_map(|(key, mirror)| key.parse::<u64>().ok().map(|handle| (handle, mirror)))
            .collect())
    }

    /// Evaluates `expression`. A remote evaluation failure surfaces as
    /// [`SyncError::CommandFailed`]; the caller decides how to present it.
    pub async fn evaluate(
        &self,
        expression: &str,
        frame: Option<usize>,
        global: bool,
        disable_break: bool,
    ) -> Result<(ValueMirror, Refs)> {
        let response = self
            .call(
                "evaluate",
                Some(EvaluateArgs {
                    expression,
                    frame,
                    global,
                    disable_break,
                }),
            )
            .await?;
        let mirror = Self::decode("evaluate", response.body)?;
        Ok((mirror, Refs::new(response.refs)))
    }

    pub async fn change_live(
        &self,
        script_id: u64,
        new_source: &str,
        preview_only: bool,
    ) -> Result<Value> {
        let response = self
            .call(
                "changelive",
                Some(ChangeLiveArgs {
                    script_id,
                    new_source,
                    preview_only,
                }),
            )
            .await?;
        Ok(response.body)
    }

    pub async fn continue_script(
        &self,
        step_action: Option<StepAction>,
        step_count: Option<u32>,
    ) -> Result<()> {
        let args = step_action.map(|stepaction| ContinueArgs {
            stepaction,
            stepcount: step_count,
        });
        self.call("continue", args).await.map(|_| ())
    }

    pub async fn suspend(&self) -> Result<()> {
        self.call("suspend", None::<()>).await.map(|_| ())
    }

    pub async fn scope(
        &self,
        number: u64,
        frame_number: usize,
        inline_refs: bool,
    ) -> Result<ScopeBody> {
        let response = self
            .call(
                "scope",
                Some(ScopeArgs {
                    number,
                    frame_number,
                    inline_refs,
                }),
            )
            .await?;
        Self::decode("scope", response.body)
    }
}
