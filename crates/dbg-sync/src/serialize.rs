//! Conversion of protocol mirrors into host display records.
//!
//! Everything here is pure: no remote calls, no store access.
use serde_json::Value;

use crate::model::{FrameRecord, ScopeEntry, ScriptRecord, ValueKind, VariableEntry};
use crate::paths::PathMapper;
use crate::protocol::{FrameInfo, NamedValue, PropertyMirror, Refs, ScriptInfo, ValueMirror};

/// Synthetic local holding the arguments object; never shown.
pub const ARGUMENTS_LOCAL: &str = ".arguments";

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|s| !s.is_empty())
}

fn primitive_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (_, Some(u), _) => u.to_string(),
            // f64's Display drops a trailing `.0`
            (_, _, Some(f)) => f.to_string(),
            _ => n.to_string(),
        },
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Display string of a value mirror.
pub fn value_string(mirror: &ValueMirror) -> String {
    let kind = ValueKind::from_tag(&mirror.kind);
    match kind {
        ValueKind::Undefined | ValueKind::Null => kind.to_string(),
        ValueKind::Boolean | ValueKind::Number | ValueKind::String => mirror
            .value
            .as_ref()
            .map(primitive_string)
            .or_else(|| mirror.text.clone())
            .unwrap_or_else(|| ValueKind::Undefined.to_string()),
        ValueKind::Object => format!("[{}]", non_empty(&mirror.class_name).unwrap_or("Object")),
        ValueKind::Function => format!(
            "function {}()",
            non_empty(&mirror.inferred_name)
                .or_else(|| non_empty(&mirror.name))
                .unwrap_or("anonymous")
        ),
        ValueKind::Error => mirror.text.clone().unwrap_or_default(),
        ValueKind::Other(tag) => tag,
    }
}

pub fn serialize_variable(name: &str, mirror: &ValueMirror) -> VariableEntry {
    let kind = ValueKind::from_tag(&mirror.kind);
    VariableEntry {
        name: name.to_string(),
        value: value_string(mirror),
        children: kind.has_children(),
        kind,
        handle: mirror.object_ref(),
        constructor: None,
        prototype: None,
    }
}

/// Serializes an object property whose value was resolved separately.
pub fn serialize_property(property: &PropertyMirror, value: Option<&ValueMirror>) -> VariableEntry {
    let fallback = ValueMirror {
        reference: property.reference,
        ..Default::default()
    };
    let mirror = value.or(property.value.as_ref()).unwrap_or(&fallback);
    let mut entry = serialize_variable(&property.display_name(), mirror);
    if entry.handle.is_none() {
        entry.handle = property.reference;
    }
    entry
}

/// Result of an `evaluate`, named after the trimmed expression.
pub fn evaluation_entry(expression: &str, mirror: &ValueMirror) -> VariableEntry {
    VariableEntry {
        name: expression.trim().to_string(),
        value: mirror.text.clone().unwrap_or_else(|| value_string(mirror)),
        kind: ValueKind::from_tag(&mirror.kind),
        handle: mirror.handle.or(mirror.reference),
        children: !mirror.properties.is_empty(),
        constructor: mirror.constructor_function.map(|h| h.handle),
        prototype: mirror.prototype_object.map(|h| h.handle),
    }
}

/// `name(arg1, arg2)`, listing only named arguments.
pub fn frame_to_string(frame: &FrameInfo) -> String {
    let name = non_empty(&frame.func.name)
        .or_else(|| non_empty(&frame.func.inferred_name))
        .unwrap_or("anonymous");
    let args = frame
        .arguments
        .iter()
        .filter_map(|arg| non_empty(&arg.name))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{}({})", name, args)
}

/// Key deciding whether a frame survives across backtraces.
///
/// Anonymous frames concatenate line and position as decimal strings, so `1` + `23` and
/// `12` + `3` collide.
pub fn frame_identity(frame: &FrameInfo) -> String {
    non_empty(&frame.func.name)
        .or_else(|| non_empty(&frame.func.inferred_name))
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}{}", frame.line, frame.position))
}

/// Named arguments followed by locals, in the order frame variables are tracked.
pub fn tracked_values(frame: &FrameInfo) -> impl Iterator<Item = &NamedValue> {
    frame
        .arguments
        .iter()
        .filter(|arg| non_empty(&arg.name).is_some())
        .chain(
            frame
                .locals
                .iter()
                .filter(|local| local.name.as_deref() != Some(ARGUMENTS_LOCAL)),
        )
}

pub fn build_frame(frame: &FrameInfo, refs: &Refs, paths: &PathMapper) -> FrameRecord {
    let script = refs.script(frame.script.handle);
    let vars = std::iter::once(serialize_variable("this", &frame.receiver))
        .chain(tracked_values(frame).map(|named| {
            serialize_variable(named.name.as_deref().unwrap_or_default(), &named.value)
        }))
        .collect();

    FrameRecord {
        index: frame.index,
        name: frame_to_string(frame),
        id: frame_identity(frame),
        handle: frame.reference,
        line: frame.line,
        column: frame.column,
        script: paths.strip(script.name.as_deref().unwrap_or_default()).to_string(),
        script_path: paths.local_script_path(script.name.as_deref(), script.id),
        script_id: frame.func.script_id,
        vars,
        scopes: frame
            .scopes
            .iter()
            .map(|scope| ScopeEntry {
                index: scope.index,
                kind: scope.kind,
            })
            .collect(),
        is_top: false,
    }
}

pub fn script_record(script: &ScriptInfo, paths: &PathMapper) -> ScriptRecord {
    ScriptRecord {
        script_id: script.id,
        name: non_empty(&script.name).unwrap_or("anonymous").to_string(),
        path: paths.local_script_path(script.name.as_deref(), script.id),
        text: paths
            .strip(non_empty(&script.text).unwrap_or("anonymous"))
            .to_string(),
        line_offset: script.line_offset,
        debug: true,
    }
}
