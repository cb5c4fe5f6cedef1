//! Read-through document cache with invalidate-on-write semantics.

use dashmap::DashMap;

use crate::types::Document;

/// Cache of last-known documents keyed by `(doctype, name)`.
///
/// Populated on successful single-document reads. Writes invalidate here,
/// in one place: updates and deletes drop the exact key, creates drop every
/// key of the doctype (the new document's name was unknown before creation).
/// Entries have no TTL; they live until invalidated.
#[derive(Default)]
pub struct DocumentCache {
    entries: DashMap<(String, String), Document>,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, doctype: &str, name: &str) -> Option<Document> {
        self.entries
            .get(&(doctype.to_string(), name.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn insert(&self, doctype: &str, name: &str, document: Document) {
        self.entries
            .insert((doctype.to_string(), name.to_string()), document);
    }

    /// Drop one document.
    pub fn invalidate(&self, doctype: &str, name: &str) {
        self.entries
            .remove(&(doctype.to_string(), name.to_string()));
    }

    /// Drop every cached document of a doctype.
    pub fn invalidate_doctype(&self, doctype: &str) {
        self.entries.retain(|(dt, _), _| dt != doctype);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for DocumentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}
