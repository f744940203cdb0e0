//! The set of known backend endpoints

use tokio::sync::RwLock;

use crate::model::normalize_backend_url;

/// Insertion-ordered set of backend base URLs
#[derive(Debug, Default)]
pub struct BackendSet {
    urls: RwLock<Vec<String>>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend. Returns `false` if it was already known.
    pub async fn insert(&self, url: &str) -> bool {
        let url = normalize_backend_url(url);
        if url.is_empty() {
            return false;
        }
        let mut urls = self.urls.write().await;
        if urls.contains(&url) {
            return false;
        }
        urls.push(url);
        true
    }

    /// Remove a backend. Returns `false` if it was not known.
    pub async fn remove(&self, url: &str) -> bool {
        let url = normalize_backend_url(url);
        let mut urls = self.urls.write().await;
        let before = urls.len();
        urls.retain(|u| *u != url);
        urls.len() != before
    }

    pub async fn contains(&self, url: &str) -> bool {
        let url = normalize_backend_url(url);
        self.urls.read().await.contains(&url)
    }

    /// Current members, in insertion order
    pub async fn snapshot(&self) -> Vec<String> {
        self.urls.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.urls.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.urls.read().await.is_empty()
    }
}
