//! In-memory analyzer registry.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{Analyzer, AnalyzerDefinition};

#[derive(Default)]
pub struct AnalyzerRegistry {
    analyzers: RwLock<HashMap<String, Analyzer>>,
    definitions: RwLock<HashMap<String, AnalyzerDefinition>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, analyzer: Analyzer, definition: AnalyzerDefinition) {
        self.register_definition(definition);
        self.register_analyzer(analyzer);
    }

    pub fn register_analyzer(&self, analyzer: Analyzer) {
        let mut map = match self.analyzers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.insert(analyzer.id.clone(), analyzer);
    }

    pub fn register_definition(&self, definition: AnalyzerDefinition) {
        let mut map = match self.definitions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.insert(definition.id.clone(), definition);
    }

    pub fn analyzer(&self, id: &str) -> Option<Analyzer> {
        let map = match self.analyzers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.get(id).cloned()
    }

    /// The analyzer, but only when it belongs to the given organisation.
    pub fn analyzer_for_organization(&self, id: &str, organization: &str) -> Option<Analyzer> {
        self.analyzer(id)
            .filter(|analyzer| analyzer.organization == organization)
    }

    pub fn definition(&self, id: &str) -> Option<AnalyzerDefinition> {
        let map = match self.definitions.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.get(id).cloned()
    }
}
