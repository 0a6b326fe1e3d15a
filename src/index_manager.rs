use std::sync::Arc;

use crate::{
    engine::SearchEngine,
    error::{EngineError, Error, Result},
};

/// Makes sure an index exists and is open before anything writes to it.
///
/// The check runs before every write rather than once at startup, so new
/// document types can introduce their indexes lazily.
#[derive(Debug)]
pub struct IndexManager<E> {
    engine: Arc<E>,
}

impl<E> Clone for IndexManager<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<E: SearchEngine> IndexManager<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self { engine }
    }

    /// Create `index` with default settings if it is missing, otherwise
    /// (re)open it. Calling this repeatedly is harmless.
    pub async fn ensure_index(&self, index: &str) -> Result<()> {
        let wrap = |source| Error::Index {
            index: index.to_string(),
            source,
        };

        if !self.engine.index_exists(index).await.map_err(wrap)? {
            match self.engine.create_index(index).await {
                Ok(()) => return Ok(()),
                // Another caller created it between our check and create.
                Err(EngineError::IndexAlreadyExists(_)) => {
                    tracing::debug!(index, "index created concurrently");
                }
                Err(e) => return Err(wrap(e)),
            }
        }

        self.engine.open_index(index).await.map_err(wrap)
    }

    pub async fn index_exists(&self, index: &str) -> Result<bool> {
        self.engine
            .index_exists(index)
            .await
            .map_err(|source| Error::Index {
                index: index.to_string(),
                source,
            })
    }

    /// Close `index`. Later writes reopen it through [`Self::ensure_index`];
    /// queries fail until then.
    pub async fn close_index(&self, index: &str) -> Result<()> {
        self.engine
            .close_index(index)
            .await
            .map_err(|source| Error::Index {
                index: index.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EmbeddedEngine;

    fn manager() -> (IndexManager<EmbeddedEngine>, Arc<EmbeddedEngine>) {
        let engine = Arc::new(EmbeddedEngine::in_memory());
        (IndexManager::new(Arc::clone(&engine)), engine)
    }

    #[tokio::test]
    async fn ensure_creates_missing_index() {
        let (manager, _engine) = manager();
        assert!(!manager.index_exists("posts").await.unwrap());
        manager.ensure_index("posts").await.unwrap();
        assert!(manager.index_exists("posts").await.unwrap());
    }

    #[tokio::test]
    async fn ensure_twice_is_idempotent() {
        let (manager, _engine) = manager();
        manager.ensure_index("books").await.unwrap();
        manager.ensure_index("books").await.unwrap();
        assert!(manager.index_exists("books").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_ensure_does_not_fail() {
        let (manager, _engine) = manager();
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.ensure_index("posts").await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn ensure_reopens_closed_index() {
        let (manager, engine) = manager();
        manager.ensure_index("posts").await.unwrap();
        manager.close_index("posts").await.unwrap();

        let request =
            crate::engine::SearchRequest::new(crate::engine::Query::MatchAll);
        assert!(engine.search("posts", &request).await.is_err());

        manager.ensure_index("posts").await.unwrap();
        assert!(engine.search("posts", &request).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_name_is_index_error() {
        let (manager, _engine) = manager();
        let err = manager.ensure_index("Not Valid").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Index {
                source: EngineError::InvalidIndexName { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn closing_unknown_index_fails() {
        let (manager, _engine) = manager();
        let err = manager.close_index("ghost").await.unwrap_err();
        assert!(matches!(err, Error::Index { .. }));
    }
}
