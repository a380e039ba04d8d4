// ============================================================================
// 符号推断 - lightweight type tracking for test sources
// ============================================================================
//
// Test classes are read as text: no compiler front end, just patterns that
// tell a PascalCase type from a variable. The strategy sits behind
// `SymbolInference` so a real parser can replace it later.

pub mod dependency;
pub mod method_body;

use serde::{Serialize, Serializer};

pub use dependency::RegexSymbolInference;

/// Symbol name -> type name, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolMap {
    entries: Vec<(String, String)>,
}

impl SymbolMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(name, _)| name == symbol)
            .map(|(_, ty)| ty.as_str())
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.get(symbol).is_some()
    }

    /// Insert or overwrite; an overwritten entry keeps its position.
    pub fn insert(&mut self, symbol: &str, type_name: &str) {
        match self.entries.iter_mut().find(|(name, _)| name == symbol) {
            Some(entry) => entry.1 = type_name.to_string(),
            None => self.entries.push((symbol.to_string(), type_name.to_string())),
        }
    }

    /// Insert only when the symbol is new. Returns whether it was inserted.
    pub fn insert_if_absent(&mut self, symbol: &str, type_name: &str) -> bool {
        if self.contains(symbol) {
            return false;
        }
        self.entries.push((symbol.to_string(), type_name.to_string()));
        true
    }

    pub fn remove(&mut self, symbol: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(name, _)| name == symbol)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t.as_str()))
    }

    /// Type names in insertion order (may repeat).
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, t)| t.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for SymbolMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

/// What one test class declares about its collaborators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassDependencyModel {
    /// Plain fields and locals, plus unwrapped names of mocks
    pub field_types: SymbolMap,
    /// `Mock<T>` declarations: mock name -> T
    pub mock_types: SymbolMap,
    /// Parameters of the test class constructor
    pub constructor_params: SymbolMap,
}

impl ClassDependencyModel {
    /// Type of a symbol: fields first, then mocks.
    pub fn type_of(&self, symbol: &str) -> Option<&str> {
        self.field_types
            .get(symbol)
            .or_else(|| self.mock_types.get(symbol))
    }

    pub fn is_empty(&self) -> bool {
        self.field_types.is_empty() && self.mock_types.is_empty() && self.constructor_params.is_empty()
    }
}

/// Infers symbol types from one source file's text.
pub trait SymbolInference {
    fn infer_symbol_types(&self, source: &str) -> ClassDependencyModel;
}
