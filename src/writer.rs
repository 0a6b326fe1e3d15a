use std::sync::Arc;

use crate::{
    document::{Indexable, to_source},
    engine::{Refresh, SearchEngine},
    error::{Error, Result},
    index_manager::IndexManager,
};

/// Keeps index entries in step with their source records.
///
/// Writes are upserts keyed by the document id, so creating and updating a
/// document share one path. Nothing is retried: failures go straight back
/// to the caller.
#[derive(Debug)]
pub struct DocumentWriter<E> {
    engine: Arc<E>,
    indexes: IndexManager<E>,
}

impl<E> Clone for DocumentWriter<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            indexes: self.indexes.clone(),
        }
    }
}

impl<E: SearchEngine> DocumentWriter<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            indexes: IndexManager::new(Arc::clone(&engine)),
            engine,
        }
    }

    pub fn indexes(&self) -> &IndexManager<E> {
        &self.indexes
    }

    /// Ensure the document's index, then store the document under its id,
    /// replacing any previous version.
    pub async fn index_document<T: Indexable>(
        &self,
        doc: &T,
        refresh: Refresh,
    ) -> Result<()> {
        let index = doc.index_name();
        let id = doc.id();

        self.indexes.ensure_index(index).await?;

        let source = to_source(doc).map_err(|e| Error::Write {
            index: index.to_string(),
            id: id.clone(),
            reason: format!("could not serialize document: {e}"),
            source: None,
        })?;

        self.engine
            .put_document(index, &id, &source, refresh)
            .await
            .map_err(|e| Error::write(index, &id, e))?;

        tracing::info!(index, %id, "indexed document");
        Ok(())
    }

    /// Re-index a changed document, visible to the very next query.
    pub async fn update_document<T: Indexable>(&self, doc: &T) -> Result<()> {
        self.index_document(doc, Refresh::Immediate).await
    }

    /// Remove `id` from `index`. Removing an id that is not indexed fails
    /// with [`Error::NotFound`], so callers can tell the removal took effect.
    pub async fn remove_document(
        &self,
        index: &str,
        id: &str,
        refresh: Refresh,
    ) -> Result<()> {
        let removed = self
            .engine
            .delete_document(index, id, refresh)
            .await
            .map_err(|e| Error::write(index, id, e))?;

        if !removed {
            return Err(Error::document_not_found(index, id));
        }
        tracing::info!(index, id, "removed document");
        Ok(())
    }
}
