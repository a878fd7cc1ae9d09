//! Workflow registry: loading, snapshots, and hot reload
//!
//! Definitions live as `<WORKFLOW_ID>.json` files in a registry
//! directory. The loaded set is held as an `Arc` snapshot: readers
//! clone the Arc and never block each other, and a reload swaps in a
//! freshly parsed map atomically so in-flight executions keep the
//! view they started with.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use crate::error::Error;
use crate::workflow::resolve::{self, WorkflowSet};
use crate::workflow::schema::{Step, WorkflowDefinition};

pub struct WorkflowRegistry {
    snapshot: RwLock<Arc<WorkflowSet>>,
    /// Flattened-step cache, keyed by workflow id; cleared on reload
    flat_cache: Mutex<HashMap<String, Arc<Vec<Step>>>>,
    registry_dir: Option<PathBuf>,
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowRegistry {
    /// Empty registry, populated programmatically via [`insert`]
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(HashMap::new())),
            flat_cache: Mutex::new(HashMap::new()),
            registry_dir: None,
        }
    }

    /// Load every `*.json` in the directory; the file stem is the
    /// workflow id. Unparseable files are skipped with a warning.
    pub fn load_dir(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        let set = read_workflow_dir(&dir)?;
        tracing::info!(count = set.len(), dir = %dir.display(), "loaded workflow registry");

        Ok(Self {
            snapshot: RwLock::new(Arc::new(set)),
            flat_cache: Mutex::new(HashMap::new()),
            registry_dir: Some(dir),
        })
    }

    /// Re-read the registry directory and swap the snapshot in
    /// atomically. Returns the number of workflows loaded.
    pub fn reload(&self) -> Result<usize, Error> {
        let dir = self.registry_dir.as_ref().ok_or_else(|| {
            Error::Io("registry was built programmatically, nothing to reload".to_string())
        })?;

        let set = read_workflow_dir(dir)?;
        let count = set.len();

        *self.snapshot.write().expect("registry lock poisoned") = Arc::new(set);
        self.flat_cache
            .lock()
            .expect("flat cache poisoned")
            .clear();

        tracing::info!(count, "reloaded workflow registry");
        Ok(count)
    }

    /// Register or replace a definition in a new snapshot
    pub fn insert(&self, workflow_id: impl Into<String>, definition: WorkflowDefinition) {
        let mut guard = self.snapshot.write().expect("registry lock poisoned");
        let mut set: WorkflowSet = (**guard).clone();
        set.insert(workflow_id.into(), Arc::new(definition));
        *guard = Arc::new(set);
        self.flat_cache
            .lock()
            .expect("flat cache poisoned")
            .clear();
    }

    /// Current immutable snapshot
    pub fn snapshot(&self) -> Arc<WorkflowSet> {
        self.snapshot.read().expect("registry lock poisoned").clone()
    }

    pub fn get(&self, workflow_id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.snapshot().get(workflow_id).cloned()
    }

    pub fn contains(&self, workflow_id: &str) -> bool {
        self.snapshot().contains_key(workflow_id)
    }

    /// All workflow ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.snapshot().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Flattened executable steps for a workflow, cached per id
    pub fn flattened(&self, workflow_id: &str) -> Result<Arc<Vec<Step>>, Error> {
        {
            let cache = self.flat_cache.lock().expect("flat cache poisoned");
            if let Some(steps) = cache.get(workflow_id) {
                return Ok(steps.clone());
            }
        }

        let snapshot = self.snapshot();
        let steps = Arc::new(resolve::flatten(&snapshot, workflow_id)?);

        let mut cache = self.flat_cache.lock().expect("flat cache poisoned");
        cache.insert(workflow_id.to_string(), steps.clone());
        Ok(steps)
    }

    /// Resolve every loaded workflow so cyclic references and invalid
    /// loop nesting fail at startup instead of mid-request
    pub fn validate(&self) -> Result<(), Error> {
        let snapshot = self.snapshot();
        for id in snapshot.keys() {
            resolve::flatten(&snapshot, id)?;
        }
        Ok(())
    }
}

fn read_workflow_dir(dir: &Path) -> Result<WorkflowSet, Error> {
    if !dir.is_dir() {
        return Err(Error::Io(format!(
            "workflow registry directory not found: {}",
            dir.display()
        )));
    }

    let mut set = WorkflowSet::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        let content = std::fs::read_to_string(&path)?;
        match WorkflowDefinition::from_json(&content) {
            Ok(def) => {
                set.insert(stem.to_string(), Arc::new(def));
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unparseable workflow file");
            }
        }
    }

    Ok(set)
}
