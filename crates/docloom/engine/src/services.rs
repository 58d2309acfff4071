//! External collaborators: generation service and prompt loader
//!
//! Both are trait objects injected into the executors. The engine
//! never talks to a model or a prompt store directly.

use crate::errors::{EngineError, EngineResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// The model behind every production step.
///
/// A transport failure here fails the step immediately; the
/// remediation loop only covers structurally-bad-but-received
/// responses.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> EngineResult<String>;
}

/// Source of role and task prompt text.
///
/// Repeated loads of the same name must return identical content, so
/// results are cacheable.
pub trait PromptLoader: Send + Sync {
    fn load_role(&self, name: &str) -> EngineResult<String>;
    fn load_task(&self, name: &str) -> EngineResult<String>;
}

// ── In-memory prompt loader ──────────────────────────────────────────

/// Prompt loader backed by plain maps, for tests and embedded setups
#[derive(Default)]
pub struct InMemoryPromptLoader {
    roles: HashMap<String, String>,
    tasks: HashMap<String, String>,
}

impl InMemoryPromptLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.roles.insert(name.into(), text.into());
        self
    }

    pub fn with_task(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.tasks.insert(name.into(), text.into());
        self
    }
}

impl PromptLoader for InMemoryPromptLoader {
    fn load_role(&self, name: &str) -> EngineResult<String> {
        self.roles
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::PromptNotFound(format!("role prompt '{}'", name)))
    }

    fn load_task(&self, name: &str) -> EngineResult<String> {
        self.tasks
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::PromptNotFound(format!("task prompt '{}'", name)))
    }
}

// ── Caching wrapper ──────────────────────────────────────────────────

/// Caches loads from an inner prompt loader.
///
/// The cache is owned by this wrapper, not process-global; `clear`
/// forces a reload after prompts change on the backing store.
pub struct CachedPromptLoader {
    inner: Arc<dyn PromptLoader>,
    roles: Mutex<HashMap<String, String>>,
    tasks: Mutex<HashMap<String, String>>,
}

impl CachedPromptLoader {
    pub fn new(inner: Arc<dyn PromptLoader>) -> Self {
        Self {
            inner,
            roles: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn clear(&self) {
        self.roles.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn cached(
        cache: &Mutex<HashMap<String, String>>,
        name: &str,
        load: impl FnOnce() -> EngineResult<String>,
    ) -> EngineResult<String> {
        let mut cache = cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(text) = cache.get(name) {
            return Ok(text.clone());
        }
        let text = load()?;
        cache.insert(name.to_string(), text.clone());
        Ok(text)
    }
}

impl PromptLoader for CachedPromptLoader {
    fn load_role(&self, name: &str) -> EngineResult<String> {
        Self::cached(&self.roles, name, || self.inner.load_role(name))
    }

    fn load_task(&self, name: &str) -> EngineResult<String> {
        Self::cached(&self.tasks, name, || self.inner.load_task(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader {
        loads: AtomicUsize,
    }

    impl PromptLoader for CountingLoader {
        fn load_role(&self, name: &str) -> EngineResult<String> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(format!("role:{}", name))
        }

        fn load_task(&self, name: &str) -> EngineResult<String> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(format!("task:{}", name))
        }
    }

    #[test]
    fn test_in_memory_loader() {
        let loader = InMemoryPromptLoader::new()
            .with_role("planner", "You are a planner.")
            .with_task("Project Brief v1.0", "Write the brief.");
        assert_eq!(loader.load_role("planner").unwrap(), "You are a planner.");
        assert!(matches!(
            loader.load_task("missing"),
            Err(EngineError::PromptNotFound(_))
        ));
    }

    #[test]
    fn test_cached_loader_loads_once() {
        let inner = Arc::new(CountingLoader {
            loads: AtomicUsize::new(0),
        });
        let cached = CachedPromptLoader::new(inner.clone());

        assert_eq!(cached.load_role("planner").unwrap(), "role:planner");
        assert_eq!(cached.load_role("planner").unwrap(), "role:planner");
        assert_eq!(inner.loads.load(Ordering::SeqCst), 1);

        cached.clear();
        cached.load_role("planner").unwrap();
        assert_eq!(inner.loads.load(Ordering::SeqCst), 2);
    }
}
