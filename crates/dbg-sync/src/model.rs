use std::fmt;

/// Kind tag of a mirrored value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ValueKind {
    #[default]
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Object,
    Function,
    /// A failed evaluation rendered inline (`.error`).
    Error,
    Other(String),
}

impl ValueKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "undefined" | "" => Self::Undefined,
            "null" => Self::Null,
            "boolean" => Self::Boolean,
            "number" => Self::Number,
            "string" => Self::String,
            "object" => Self::Object,
            "function" => Self::Function,
            ".error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::String => "string",
            Self::Object => "object",
            Self::Function => "function",
            Self::Error => ".error",
            Self::Other(tag) => tag,
        }
    }

    /// Only objects and functions can be expanded.
    pub fn has_children(&self) -> bool {
        matches!(self, Self::Object | Self::Function)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VariableEntry {
    pub name: String,
    pub value: String,
    pub kind: ValueKind,
    pub handle: Option<u64>,
    pub children: bool,
    pub constructor: Option<u64>,
    pub prototype: Option<u64>,
}

impl VariableEntry {
    pub fn error(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            value: message.to_string(),
            kind: ValueKind::Error,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScopeEntry {
    pub index: u64,
    /// Remote scope type: 0 global, 1 local, 2 with, 3 closure, 4 catch.
    pub kind: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameRecord {
    pub index: usize,
    /// `name(arg1, arg2)`
    pub name: String,
    /// Identity key used to decide whether a frame can be reused across backtraces.
    pub id: String,
    pub handle: Option<u64>,
    pub line: u32,
    pub column: u32,
    pub script: String,
    pub script_path: String,
    pub script_id: Option<u64>,
    /// Receiver first, then named arguments, then locals.
    pub vars: Vec<VariableEntry>,
    pub scopes: Vec<ScopeEntry>,
    pub is_top: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScriptRecord {
    pub script_id: u64,
    pub name: String,
    pub path: String,
    pub text: String,
    pub line_offset: i64,
    pub debug: bool,
}

/// A breakpoint as declared by the host UI.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UiBreakpoint {
    pub path: String,
    pub line: u32,
    pub column: u32,
    pub enabled: bool,
    pub condition: String,
    pub ignore_count: u32,
}

impl UiBreakpoint {
    pub fn new(path: &str, line: u32) -> Self {
        Self {
            path: path.to_string(),
            line,
            enabled: true,
            ..Default::default()
        }
    }

    pub fn with_condition(mut self, condition: &str) -> Self {
        self.condition = condition.to_string();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
