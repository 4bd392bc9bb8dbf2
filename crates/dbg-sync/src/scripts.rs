use rustc_hash::FxHashMap;

use crate::model::ScriptRecord;

/// Loaded scripts keyed by remote id, with a secondary index by local path.
#[derive(Debug, Default, Clone)]
pub struct ScriptIndex {
    by_id: FxHashMap<u64, ScriptRecord>,
    by_path: FxHashMap<String, u64>,
}

impl ScriptIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, records: &[ScriptRecord]) {
        self.by_id.clear();
        self.by_path.clear();
        for record in records {
            self.upsert(record.clone());
        }
    }

    /// Inserts `record`, replacing any record with the same remote id.
    pub fn upsert(&mut self, record: ScriptRecord) {
        if let Some(previous) = self.by_id.remove(&record.script_id)
            && self.by_path.get(&previous.path) == Some(&previous.script_id)
        {
            self.by_path.remove(&previous.path);
        }
        self.by_path.insert(record.path.clone(), record.script_id);
        self.by_id.insert(record.script_id, record);
    }

    pub fn get(&self, script_id: u64) -> Option<&ScriptRecord> {
        self.by_id.get(&script_id)
    }

    pub fn by_path(&self, path: &str) -> Option<&ScriptRecord> {
        self.by_path.get(path).and_then(|id| self.by_id.get(id))
    }

    pub fn id_for_path(&self, path: &str) -> Option<u64> {
        self.by_path(path).map(|script| script.script_id)
    }

    pub fn name_for_path(&self, path: &str) -> Option<&str> {
        self.by_path(path).map(|script| script.name.as_str())
    }

    pub fn path_for_id(&self, script_id: u64) -> Option<&str> {
        self.get(script_id).map(|script| script.path.as_str())
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
