//! Stack reconciliation.
//!
//! A new backtrace either patches the rendered frames in place, keeping the nodes that
//! observers hold, or replaces the whole stack.
use tracing::debug;

use crate::model::{FrameRecord, ValueKind, VariableEntry};
use crate::paths::PathMapper;
use crate::protocol::{FrameInfo, Refs, ValueMirror};
use crate::serialize::{build_frame, frame_identity, tracked_values, value_string};
use crate::store::{Node, Store, read};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Patch in place when the frameset is unchanged.
    Incremental,
    /// Always rebuild, used right after attaching.
    Rebuild,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Patched,
    Rebuilt,
}

/// Same length and same innermost frame (script id and identity key).
///
/// Deeper frames are not compared, so two stacks sharing their top frame are treated as
/// the same stack.
pub fn is_same_frameset(previous: &[Node<FrameRecord>], frames: &[FrameInfo]) -> bool {
    if previous.is_empty() || previous.len() != frames.len() {
        return false;
    }
    let (Some(prev), Some(first)) = (previous.first(), frames.first()) else {
        return false;
    };
    let prev = read(prev);
    prev.script_id == first.func.script_id && prev.id == frame_identity(first)
}

fn update_var(var: &mut VariableEntry, mirror: &ValueMirror) {
    var.value = value_string(mirror);
    var.kind = ValueKind::from_tag(&mirror.kind);
    var.handle = mirror.object_ref();
    var.children = var.kind.has_children();
}

/// Patches location and tracked variables by position. The receiver at index 0 is left
/// alone; positions beyond the rendered list are skipped.
pub fn update_frame(record: &mut FrameRecord, frame: &FrameInfo) {
    record.line = frame.line;
    record.column = frame.column;

    for (position, named) in tracked_values(frame).enumerate() {
        if let Some(var) = record.vars.get_mut(position + 1) {
            update_var(var, &named.value);
        }
    }
}

/// Brings `store` in line with `frames` and returns the new top frame, flagged `is_top`.
pub fn reconcile(
    store: &dyn Store<FrameRecord>,
    frames: &[FrameInfo],
    refs: &Refs,
    paths: &PathMapper,
    mode: ReconcileMode,
) -> (Outcome, Option<Node<FrameRecord>>) {
    let previous = store.all();

    let outcome = if mode == ReconcileMode::Incremental && is_same_frameset(&previous, frames) {
        for (node, frame) in previous.iter().zip(frames) {
            store.set_attribute(node, &|record| update_frame(record, frame));
        }
        Outcome::Patched
    } else {
        store.load(
            frames
                .iter()
                .map(|frame| build_frame(frame, refs, paths))
                .collect(),
        );
        Outcome::Rebuilt
    };
    debug!(?outcome, frames = frames.len(), "Reconciled stack");

    let top = store.query_node(&|_| true);
    if let Some(top) = &top {
        store.set_attribute(top, &|record| record.is_top = true);
    }
    (outcome, top)
}
