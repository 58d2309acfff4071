//! State persistence: saving and restoring paused executions
//!
//! A run is serialized as one plain JSON document holding the
//! WorkflowState and WorkflowContext pair, keyed by
//! (workflow_id, project_id). The caller owns single-writer
//! discipline per execution.

use crate::errors::{EngineError, EngineResult};
use docloom_types::{WorkflowContext, WorkflowState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Clone, Serialize, Deserialize)]
struct PersistedRun {
    state: WorkflowState,
    context: WorkflowContext,
}

pub trait StatePersistence: Send + Sync {
    fn save(&self, state: &WorkflowState, context: &WorkflowContext) -> EngineResult<()>;
    fn load(
        &self,
        workflow_id: &str,
        project_id: &str,
    ) -> EngineResult<Option<(WorkflowState, WorkflowContext)>>;
    fn delete(&self, workflow_id: &str, project_id: &str) -> EngineResult<()>;
    fn exists(&self, workflow_id: &str, project_id: &str) -> bool;
}

fn run_key(workflow_id: &str, project_id: &str) -> String {
    format!("{}::{}", workflow_id, project_id)
}

// ── In-memory ────────────────────────────────────────────────────────

/// Map-backed persistence for tests and single-process embedding
#[derive(Default)]
pub struct InMemoryPersistence {
    runs: Mutex<HashMap<String, String>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatePersistence for InMemoryPersistence {
    fn save(&self, state: &WorkflowState, context: &WorkflowContext) -> EngineResult<()> {
        let serialized = serde_json::to_string(&PersistedRun {
            state: state.clone(),
            context: context.clone(),
        })?;
        self.runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(run_key(&state.workflow_id, &state.project_id), serialized);
        Ok(())
    }

    fn load(
        &self,
        workflow_id: &str,
        project_id: &str,
    ) -> EngineResult<Option<(WorkflowState, WorkflowContext)>> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        match runs.get(&run_key(workflow_id, project_id)) {
            Some(serialized) => {
                let run: PersistedRun = serde_json::from_str(serialized)?;
                Ok(Some((run.state, run.context)))
            }
            None => Ok(None),
        }
    }

    fn delete(&self, workflow_id: &str, project_id: &str) -> EngineResult<()> {
        self.runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&run_key(workflow_id, project_id));
        Ok(())
    }

    fn exists(&self, workflow_id: &str, project_id: &str) -> bool {
        self.runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&run_key(workflow_id, project_id))
    }
}

// ── File-backed ──────────────────────────────────────────────────────

/// One JSON file per run under a base directory
pub struct FilePersistence {
    base_dir: PathBuf,
}

impl FilePersistence {
    pub fn new(base_dir: impl Into<PathBuf>) -> EngineResult<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn path_for(&self, workflow_id: &str, project_id: &str) -> PathBuf {
        // ids come from validated definitions and caller-owned project
        // names; sanitize path separators just the same
        let file = format!("{}__{}.json", workflow_id, project_id).replace(['/', '\\'], "_");
        self.base_dir.join(file)
    }
}

impl StatePersistence for FilePersistence {
    fn save(&self, state: &WorkflowState, context: &WorkflowContext) -> EngineResult<()> {
        let path = self.path_for(&state.workflow_id, &state.project_id);
        let serialized = serde_json::to_string_pretty(&PersistedRun {
            state: state.clone(),
            context: context.clone(),
        })?;
        std::fs::write(&path, serialized)?;
        tracing::debug!(path = %path.display(), "saved workflow run");
        Ok(())
    }

    fn load(
        &self,
        workflow_id: &str,
        project_id: &str,
    ) -> EngineResult<Option<(WorkflowState, WorkflowContext)>> {
        let path = self.path_for(workflow_id, project_id);
        if !path.exists() {
            return Ok(None);
        }
        let serialized = std::fs::read_to_string(&path)?;
        let run: PersistedRun = serde_json::from_str(&serialized)
            .map_err(|err| EngineError::Persistence(format!(
                "corrupt run file {}: {}",
                path.display(),
                err
            )))?;
        Ok(Some((run.state, run.context)))
    }

    fn delete(&self, workflow_id: &str, project_id: &str) -> EngineResult<()> {
        let path = self.path_for(workflow_id, project_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    fn exists(&self, workflow_id: &str, project_id: &str) -> bool {
        self.path_for(workflow_id, project_id).exists()
    }
}
