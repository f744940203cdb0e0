//! The catalog of live model descriptors
//!
//! A [`Catalog`] is an immutable, insertion-ordered list once published.
//! [`CatalogStore`] holds the current one behind an `Arc` and swaps it whole,
//! so a reader always sees either the previous or the next catalog, never a
//! mix of the two.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::model::ModelDescriptor;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    models: Vec<ModelDescriptor>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_models(models: Vec<ModelDescriptor>) -> Self {
        Self { models }
    }

    pub fn push(&mut self, model: ModelDescriptor) {
        self.models.push(model);
    }

    pub fn extend(&mut self, models: impl IntoIterator<Item = ModelDescriptor>) {
        self.models.extend(models);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter()
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn first(&self) -> Option<&ModelDescriptor> {
        self.models.first()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Descriptors served by one backend, in catalog order
    pub fn for_backend<'a>(&'a self, url: &'a str) -> impl Iterator<Item = &'a ModelDescriptor> {
        self.models.iter().filter(move |m| m.url == url)
    }

    /// Copy of this catalog with one backend's descriptors removed
    pub fn without_backend(&self, url: &str) -> Catalog {
        Catalog {
            models: self.models.iter().filter(|m| m.url != url).cloned().collect(),
        }
    }

    /// Distinct backend URLs, in order of first appearance
    pub fn backends(&self) -> Vec<&str> {
        let mut urls: Vec<&str> = Vec::new();
        for m in &self.models {
            if !urls.contains(&m.url.as_str()) {
                urls.push(&m.url);
            }
        }
        urls
    }
}

impl FromIterator<ModelDescriptor> for Catalog {
    fn from_iter<I: IntoIterator<Item = ModelDescriptor>>(iter: I) -> Self {
        Self {
            models: iter.into_iter().collect(),
        }
    }
}

/// Holder of the current catalog snapshot.
///
/// Only the health checker replaces the catalog; everything else reads a
/// snapshot.
#[derive(Debug, Default)]
pub struct CatalogStore {
    current: RwLock<Arc<Catalog>>,
}

impl CatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The catalog as of now. Later swaps do not affect the returned value.
    pub async fn snapshot(&self) -> Arc<Catalog> {
        self.current.read().await.clone()
    }

    /// Publish a new catalog, returning the one it replaced
    pub async fn replace(&self, catalog: Catalog) -> Arc<Catalog> {
        let mut current = self.current.write().await;
        std::mem::replace(&mut *current, Arc::new(catalog))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(name: &str, url: &str) -> ModelDescriptor {
        ModelDescriptor::from_model_id(name, url)
    }

    #[test]
    fn test_without_backend_keeps_order() {
        let catalog = Catalog::from_models(vec![
            model("a", "http://b1"),
            model("b", "http://b2"),
            model("c", "http://b1"),
            model("d", "http://b3"),
        ]);
        let pruned = catalog.without_backend("http://b1");
        let names: Vec<_> = pruned.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["b", "d"]);
        assert_eq!(catalog.for_backend("http://b1").count(), 2);
    }

    #[test]
    fn test_backends_distinct_in_order() {
        let catalog: Catalog = vec![
            model("a", "http://b2"),
            model("b", "http://b1"),
            model("c", "http://b2"),
        ]
        .into_iter()
        .collect();
        assert_eq!(catalog.backends(), vec!["http://b2", "http://b1"]);
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_replace() {
        let store = CatalogStore::new();
        store
            .replace(Catalog::from_models(vec![model("a", "http://b1")]))
            .await;

        let before = store.snapshot().await;
        let replaced = store.replace(Catalog::new()).await;

        assert_eq!(before.len(), 1);
        assert_eq!(replaced.len(), 1);
        assert!(store.snapshot().await.is_empty());
    }
}
