//! Breakpoint reconciliation between the host's declared breakpoints and the ones
//! registered remotely.
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::client::SetBreakpointArgs;
use crate::model::UiBreakpoint;
use crate::protocol::SetBreakpointBody;

/// `scriptname|line:column`
pub fn location_key(script_name: &str, line: u32, column: u32) -> String {
    format!("{}|{}:{}", script_name, line, column)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredBreakpoint {
    pub location: String,
    pub script_name: String,
    pub line: u32,
    pub column: u32,
    pub condition: String,
    pub ignore_count: u32,
    /// Assigned once the remote acknowledges the registration.
    pub id: Option<u64>,
}

impl RegisteredBreakpoint {
    pub fn from_ui(breakpoint: &UiBreakpoint, script_name: String) -> Self {
        Self {
            location: location_key(&script_name, breakpoint.line, breakpoint.column),
            script_name,
            line: breakpoint.line,
            column: breakpoint.column,
            condition: breakpoint.condition.clone(),
            ignore_count: breakpoint.ignore_count,
            id: None,
        }
    }

    /// Location, condition and ignore count all match.
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.location == other.location
            && self.condition == other.condition
            && self.ignore_count == other.ignore_count
    }

    pub fn set_args(&self) -> SetBreakpointArgs {
        SetBreakpointArgs {
            condition: self.condition.clone(),
            ignore_count: self.ignore_count,
            ..SetBreakpointArgs::script(&self.script_name, self.line, self.column)
        }
    }
}

/// Breakpoints registered remotely, keyed by location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakpointRegistry {
    entries: FxHashMap<String, RegisteredBreakpoint>,
}

impl BreakpointRegistry {
    pub fn get(&self, location: &str) -> Option<&RegisteredBreakpoint> {
        self.entries.get(location)
    }

    pub fn contains(&self, location: &str) -> bool {
        self.entries.contains_key(location)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Location keys in sorted order.
    pub fn locations(&self) -> Vec<String> {
        let mut keys = self.entries.keys().cloned().collect::<Vec<_>>();
        keys.sort();
        keys
    }

    fn insert(&mut self, breakpoint: RegisteredBreakpoint) {
        self.entries.insert(breakpoint.location.clone(), breakpoint);
    }

    /// Records the id of an acknowledged registration, keeping the highest id seen for a
    /// location. The acknowledged location wins over `requested` when the remote sends one.
    pub fn apply_ack(&mut self, ack: &SetBreakpointBody, requested: &str) -> Ack {
        let location = match (&ack.script_name, ack.line) {
            (Some(name), Some(line)) => location_key(name, line, ack.column.unwrap_or(0)),
            _ => requested.to_string(),
        };
        let Some(entry) = self.entries.get_mut(&location) else {
            debug!(location = %location, id = ack.breakpoint, "Acknowledged breakpoint is no longer tracked");
            return Ack::Orphaned(ack.breakpoint);
        };
        if entry.id.is_none_or(|id| id < ack.breakpoint) {
            entry.id = Some(ack.breakpoint);
        }
        Ack::Recorded(ack.breakpoint)
    }
}

/// Result of applying a `setbreakpoint` acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Recorded(u64),
    /// The location was removed while the add was in flight. The remote breakpoint with
    /// this id must be cleared.
    Orphaned(u64),
}

/// Remote operations needed to bring the registry in line with the declared set.
#[derive(Debug, Default)]
pub struct BreakpointPlan {
    /// Registry after the pass. Pending adds appear without an id.
    pub registry: BreakpointRegistry,
    pub add: Vec<RegisteredBreakpoint>,
    /// Previously registered breakpoints with a known remote id to clear.
    pub remove: Vec<RegisteredBreakpoint>,
    pub kept: usize,
}

impl BreakpointPlan {
    pub fn is_noop(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Diffs `desired` against `previous`.
///
/// `resolve` maps a local path to a remote script name; breakpoints it cannot map are
/// skipped. Disabled breakpoints are treated as absent. When several enabled breakpoints
/// share a location, the first one wins.
pub fn plan<F>(desired: &[UiBreakpoint], previous: &BreakpointRegistry, resolve: F) -> BreakpointPlan
where
    F: Fn(&str) -> Option<String>,
{
    let mut stale = previous.entries.clone();
    let mut plan = BreakpointPlan::default();

    for breakpoint in desired {
        let Some(script_name) = resolve(&breakpoint.path) else {
            debug!(path = %breakpoint.path, line = breakpoint.line, "Skipping unmappable breakpoint");
            continue;
        };
        if !breakpoint.enabled {
            continue;
        }

        let candidate = RegisteredBreakpoint::from_ui(breakpoint, script_name);
        if plan.registry.contains(&candidate.location) {
            debug!(location = %candidate.location, "Skipping duplicate breakpoint");
            continue;
        }

        match stale.remove(&candidate.location) {
            Some(existing) if existing.is_equivalent(&candidate) => {
                plan.registry.insert(existing);
                plan.kept += 1;
            }
            _ => {
                plan.registry.insert(candidate.clone());
                plan.add.push(candidate);
            }
        }
    }

    let mut remove = stale
        .into_values()
        .filter(|breakpoint| {
            if breakpoint.id.is_none() {
                debug!(location = %breakpoint.location, "Dropping never acknowledged breakpoint");
            }
            breakpoint.id.is_some()
        })
        .collect::<Vec<_>>();
    remove.sort_by(|a, b| a.location.cmp(&b.location));
    plan.remove = remove;
    plan
}
