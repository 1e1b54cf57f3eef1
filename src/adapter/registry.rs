use crate::adapter::languages::{
    BrainfuckBackend, ClangBackend, GoBackend, JavaBackend, SwiftBackend,
};
use crate::adapter::LanguageBackend;
use crate::config::settings::EngineConfig;
use crate::config::types::{HubError, Language, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Closed set of backends keyed by language, built once at startup
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    backends: BTreeMap<Language, Arc<dyn LanguageBackend>>,
}

impl AdapterRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every built-in backend
    pub fn builtin(config: &EngineConfig) -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(JavaBackend::new()));
        registry.register(Arc::new(ClangBackend::cpp()));
        registry.register(Arc::new(ClangBackend::c()));
        registry.register(Arc::new(SwiftBackend::new()));
        registry.register(Arc::new(BrainfuckBackend::new(&config.brainfuck)));
        registry.register(Arc::new(GoBackend::new(config.sandbox.go_cache.clone())));
        registry
    }

    /// Add or replace the backend for its language
    pub fn register(&mut self, backend: Arc<dyn LanguageBackend>) -> Option<Arc<dyn LanguageBackend>> {
        self.backends.insert(backend.language(), backend)
    }

    pub fn get(&self, language: Language) -> Result<Arc<dyn LanguageBackend>> {
        self.backends
            .get(&language)
            .cloned()
            .ok_or_else(|| HubError::UnknownLanguage(language.to_string()))
    }

    pub fn languages(&self) -> Vec<Language> {
        self.backends.keys().copied().collect()
    }
}
