//! Wire records of the remote debug protocol.
//!
//! Every message is a self-describing JSON record tagged by `type`. Bodies are decoded
//! lazily into the typed structs below by the [`crate::client::DebugClient`].
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Any record received from the remote.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Request(RequestMessage),
    Response(Response),
    Event(Event),
}

/// Outbound request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMessage {
    pub seq: u64,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl RequestMessage {
    pub fn to_value(&self) -> Value {
        let mut value = serde_json::json!({
            "seq": self.seq,
            "type": "request",
            "command": self.command,
        });
        if let (Some(arguments), Some(map)) = (&self.arguments, value.as_object_mut()) {
            map.insert("arguments".to_string(), arguments.clone());
        }
        value
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub seq: u64,
    pub request_seq: u64,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub body: Value,
    #[serde(default)]
    pub refs: Vec<Value>,
    #[serde(default)]
    pub running: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub seq: u64,
    pub event: String,
    #[serde(default)]
    pub body: Value,
}

impl Event {
    pub const BREAK: &'static str = "break";
    pub const EXCEPTION: &'static str = "exception";
    pub const AFTER_COMPILE: &'static str = "afterCompile";
    /// Synthesized locally whenever the remote running flag flips.
    pub const CHANGE_RUNNING: &'static str = "changeRunning";

    pub fn synthetic(event: &str) -> Self {
        Self {
            seq: 0,
            event: event.to_string(),
            body: Value::Null,
        }
    }
}

/// `{ "ref": n }` pointer into the response's `refs` table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Handle {
    #[serde(rename = "ref")]
    pub handle: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptInfo {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub handle: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub line_offset: i64,
    #[serde(default)]
    pub column_offset: i64,
    #[serde(default)]
    pub line_count: Option<u64>,
}

/// Remote mirror of a value. Inline refs carry only a subset of the fields.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueMirror {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub inferred_name: Option<String>,
    #[serde(rename = "ref", default)]
    pub reference: Option<u64>,
    #[serde(default)]
    pub handle: Option<u64>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub script_id: Option<u64>,
    #[serde(default)]
    pub properties: Vec<PropertyMirror>,
    #[serde(default)]
    pub constructor_function: Option<Handle>,
    #[serde(default)]
    pub prototype_object: Option<Handle>,
}

impl ValueMirror {
    /// The handle observers use to fetch children: `ref` for inline refs, `handle` otherwise.
    pub fn object_ref(&self) -> Option<u64> {
        self.reference.or(self.handle)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PropertyMirror {
    /// Array indices arrive as numbers.
    #[serde(default)]
    pub name: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<u64>,
    #[serde(default)]
    pub value: Option<ValueMirror>,
}

impl PropertyMirror {
    pub fn display_name(&self) -> String {
        match &self.name {
            Value::String(name) => name.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NamedValue {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: ValueMirror,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ScopeInfo {
    #[serde(default)]
    pub index: u64,
    #[serde(rename = "type", default)]
    pub kind: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameInfo {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub receiver: ValueMirror,
    #[serde(default)]
    pub func: ValueMirror,
    #[serde(default)]
    pub script: Handle,
    #[serde(default)]
    pub arguments: Vec<NamedValue>,
    #[serde(default)]
    pub locals: Vec<NamedValue>,
    #[serde(default)]
    pub scopes: Vec<ScopeInfo>,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub column: u32,
    #[serde(default)]
    pub position: u64,
    #[serde(rename = "ref", default)]
    pub reference: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktraceBody {
    #[serde(default)]
    pub from_frame: usize,
    #[serde(default)]
    pub to_frame: usize,
    #[serde(default)]
    pub total_frames: usize,
    #[serde(default)]
    pub frames: Vec<FrameInfo>,
}

/// Handle table shipped alongside a response body.
#[derive(Debug, Clone, Default)]
pub struct Refs {
    by_handle: FxHashMap<u64, Value>,
}

impl Refs {
    pub fn new(refs: Vec<Value>) -> Self {
        let by_handle = refs
            .into_iter()
            .filter_map(|value| {
                value
                    .get("handle")
                    .and_then(Value::as_u64)
                    .map(|handle| (handle, value))
            })
            .collect();
        Self { by_handle }
    }

    pub fn get(&self, handle: u64) -> Option<&Value> {
        self.by_handle.get(&handle)
    }

    /// Missing or undecodable handles resolve to an empty script.
    pub fn script(&self, handle: u64) -> ScriptInfo {
        self.get(handle)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetBreakpointBody {
    pub breakpoint: u64,
    #[serde(default)]
    pub script_name: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub column: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteBreakpoint {
    pub number: u64,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub column: Option<u32>,
    #[serde(default, rename = "script_name")]
    pub script_name: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub ignore_count: u32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListBreakpointsBody {
    #[serde(default)]
    pub breakpoints: Vec<RemoteBreakpoint>,
    #[serde(default)]
    pub break_on_exceptions: bool,
    #[serde(default)]
    pub break_on_uncaught_exceptions: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeBody {
    #[serde(default)]
    pub index: u64,
    #[serde(default)]
    pub frame_index: usize,
    #[serde(rename = "type", default)]
    pub kind: u64,
    #[serde(default)]
    pub object: ValueMirror,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionEventBody {
    #[serde(default)]
    pub uncaught: bool,
    #[serde(default)]
    pub exception: ValueMirror,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AfterCompileBody {
    pub script: ScriptInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    In,
    Next,
    Out,
}
