//! Read side: keyword search, scored search, similar-document lookup.
//!
//! Results come back in the engine's relevance order and are decoded into
//! the caller's document type. A hit whose record does not decode is
//! logged and dropped; the rest of the result set is still returned.

use std::sync::Arc;

use crate::{
    document::Indexable,
    engine::{
        DEFAULT_SIZE,
        EngineResult,
        FieldBoost,
        MatchKind,
        Query,
        SearchEngine,
        SearchHits,
        SearchRequest,
        fields,
    },
    error::{EngineError, Error, Result},
};

/// Fields searched when the caller names none.
pub const DEFAULT_FIELDS: [&str; 2] = [fields::TITLE, fields::CONTENT];

/// Weight of the title field in similarity queries.
pub const SIMILAR_TITLE_BOOST: f32 = 3.0;
/// Weight of the content field in similarity queries.
pub const SIMILAR_CONTENT_BOOST: f32 = 2.0;

#[derive(Debug)]
pub struct QueryService<E> {
    engine: Arc<E>,
    size: usize,
}

impl<E> Clone for QueryService<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            size: self.size,
        }
    }
}

impl<E: SearchEngine> QueryService<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            size: DEFAULT_SIZE,
        }
    }

    /// Maximum number of documents returned per query.
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Keyword search of `text` across `fields` (title and content when
    /// empty). Scores are not attached.
    pub async fn search<T: Indexable>(
        &self,
        index: &str,
        text: &str,
        fields: &[&str],
    ) -> Result<Vec<T>> {
        let fields: Vec<FieldBoost> = if fields.is_empty() {
            DEFAULT_FIELDS.iter().copied().map(FieldBoost::from).collect()
        } else {
            fields.iter().copied().map(FieldBoost::from).collect()
        };
        let query = Query::MultiMatch {
            query: text.to_string(),
            fields,
            kind: MatchKind::BestFields,
        };
        let request = SearchRequest::new(query).size(self.size);

        let hits = self.run(index, &request).await?;
        Ok(decode_hits(index, hits, false))
    }

    /// Keyword search over title and content with each document's
    /// relevance score filled in, most relevant first.
    pub async fn search_with_scores<T: Indexable>(
        &self,
        index: &str,
        text: &str,
    ) -> Result<Vec<T>> {
        let request =
            SearchRequest::new(Query::multi_match(text, DEFAULT_FIELDS))
                .size(self.size)
                .track_scores(true);

        let hits = self.run(index, &request).await?;
        let docs = decode_hits(index, hits, true);
        tracing::debug!(index, text, results = docs.len(), "scored search");
        Ok(docs)
    }

    /// Documents in `index` that read like `source`, never including
    /// `source` itself.
    ///
    /// The title and content used for matching are fetched from the
    /// source's own index rather than taken from the given instance.
    /// `index` may differ from that index.
    pub async fn find_similar<T: Indexable>(
        &self,
        index: &str,
        source: &T,
    ) -> Result<Vec<T>> {
        let id = source.id();
        let canonical: T = self.get(source.index_name(), &id).await?;
        tracing::debug!(
            source_index = source.index_name(),
            %id,
            "found source document"
        );

        let text = format!("{} {}", canonical.title(), canonical.content());
        let query = Query::MultiMatch {
            query: text.trim().to_string(),
            fields: vec![
                FieldBoost::new(fields::TITLE, SIMILAR_TITLE_BOOST),
                FieldBoost::new(fields::CONTENT, SIMILAR_CONTENT_BOOST),
            ],
            kind: MatchKind::BestFields,
        }
        .excluding(Query::ids([id.clone()]));
        let request = SearchRequest::new(query)
            .size(self.size)
            .track_scores(true);

        let hits = self.run(index, &request).await?;
        let docs: Vec<T> = decode_hits(index, hits, true);
        tracing::info!(index, %id, similar = docs.len(), "similar documents");
        Ok(docs)
    }

    /// Fetch one document by id, failing with [`Error::NotFound`] when it
    /// is not indexed.
    pub async fn get<T: Indexable>(&self, index: &str, id: &str) -> Result<T> {
        let stored = self
            .engine
            .get_document(index, id)
            .await
            .map_err(|source| search_error(index, source))?
            .ok_or_else(|| Error::document_not_found(index, id))?;

        serde_json::from_value(stored).map_err(|e| {
            search_error(index, EngineError::Decode(format!("{id}: {e}")))
        })
    }

    async fn run(
        &self,
        index: &str,
        request: &SearchRequest,
    ) -> Result<SearchHits> {
        let hits: EngineResult<SearchHits> =
            self.engine.search(index, request).await;
        hits.map_err(|source| search_error(index, source))
    }
}

fn search_error(index: &str, source: EngineError) -> Error {
    Error::Search {
        index: index.to_string(),
        source,
    }
}

/// Decode hits into `T`, skipping any that do not fit the type.
fn decode_hits<T: Indexable>(
    index: &str,
    hits: SearchHits,
    with_scores: bool,
) -> Vec<T> {
    let mut docs = Vec::with_capacity(hits.hits.len());
    for hit in hits.hits {
        match serde_json::from_value::<T>(hit.source) {
            Ok(mut doc) => {
                if with_scores {
                    doc.set_score(hit.score.unwrap_or(0.0));
                }
                docs.push(doc);
            }
            Err(e) => {
                tracing::warn!(index, id = %hit.id, "skipping hit: {e}");
            }
        }
    }
    docs
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        document::{BookDocument, PostDocument},
        engine::{EmbeddedEngine, Hit, Refresh},
        writer::DocumentWriter,
    };

    async fn seeded(
        posts: &[(&str, &str, &str)],
    ) -> (QueryService<EmbeddedEngine>, DocumentWriter<EmbeddedEngine>) {
        let engine = Arc::new(EmbeddedEngine::in_memory());
        let writer = DocumentWriter::new(Arc::clone(&engine));
        for (id, title, content) in posts {
            let post = PostDocument::new(*id, *title, *content);
            writer.index_document(&post, Refresh::Immediate).await.unwrap();
        }
        (QueryService::new(engine), writer)
    }

    fn ids<T: Indexable>(docs: &[T]) -> Vec<String> {
        docs.iter().map(Indexable::id).collect()
    }

    #[tokio::test]
    async fn keyword_search_finds_match() {
        let (queries, _writer) =
            seeded(&[("1", "Go concurrency", "goroutines and channels")]).await;
        let found: Vec<PostDocument> = queries
            .search("posts", "concurrency", &["title", "content"])
            .await
            .unwrap();
        assert_eq!(ids(&found), vec!["1"]);
        assert_eq!(found[0].score, 0.0);
    }

    #[tokio::test]
    async fn keyword_search_respects_field_list() {
        let (queries, _writer) = seeded(&[
            ("1", "Channels", "nothing here"),
            ("2", "Nothing", "channels everywhere"),
        ])
        .await;
        let found: Vec<PostDocument> =
            queries.search("posts", "channels", &["title"]).await.unwrap();
        assert_eq!(ids(&found), vec!["1"]);

        let found: Vec<PostDocument> =
            queries.search("posts", "channels", &[]).await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn scored_search_is_descending_and_populated() {
        let (queries, _writer) = seeded(&[
            ("1", "Rust programming", "rust rust rust systems language"),
            ("2", "Cooking", "a note mentioning rust once"),
            ("3", "Rust", "the rust book"),
        ])
        .await;
        let found: Vec<PostDocument> =
            queries.search_with_scores("posts", "rust").await.unwrap();

        assert_eq!(found.len(), 3);
        assert!(found.iter().all(|d| d.score > 0.0));
        for pair in found.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn similar_excludes_source() {
        let (queries, _writer) = seeded(&[
            ("1", "Apple pie recipe", "bake apples with cinnamon"),
            ("2", "Apple stock price", "shares rose on earnings"),
            ("3", "Gardening", "water the tomatoes"),
        ])
        .await;
        let source = PostDocument::new("1", "", "");
        let similar = queries.find_similar("posts", &source).await.unwrap();

        assert!(ids(&similar).contains(&"2".to_string()));
        assert!(!ids(&similar).contains(&"1".to_string()));
        assert!(similar.iter().all(|d| d.score > 0.0));
    }

    #[tokio::test]
    async fn similar_uses_stored_text_not_caller_copy() {
        let (queries, _writer) = seeded(&[
            ("1", "Apple pie recipe", ""),
            ("2", "Apple stock price", ""),
        ])
        .await;
        // The caller's copy is stale; the stored title drives the match.
        let stale = PostDocument::new("1", "zzz unrelated", "qqq");
        let similar = queries.find_similar("posts", &stale).await.unwrap();
        assert_eq!(ids(&similar), vec!["2"]);
    }

    #[tokio::test]
    async fn similar_with_missing_source_is_not_found() {
        let (queries, _writer) = seeded(&[("1", "a", "b")]).await;
        let ghost = PostDocument::new("42", "a", "b");
        let err = queries.find_similar("posts", &ghost).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn similar_with_no_neighbours_is_empty() {
        let (queries, _writer) = seeded(&[
            ("1", "Apple pie", ""),
            ("2", "Gardening", "tomatoes"),
        ])
        .await;
        let source = PostDocument::new("1", "", "");
        let similar = queries.find_similar("posts", &source).await.unwrap();
        assert!(similar.is_empty());
    }

    #[tokio::test]
    async fn similar_across_indexes() {
        let (queries, writer) =
            seeded(&[("1", "Desert planet politics", "spice trade")]).await;
        for (id, title, content) in [
            ("1", "Dune", "politics on a desert planet"),
            ("7", "Desert planet", "a sandy world"),
        ] {
            let book = BookDocument {
                id: id.into(),
                title: title.into(),
                content: content.into(),
                author: "Herbert".into(),
                isbn: String::new(),
                score: 0.0,
            };
            writer.index_document(&book, Refresh::Immediate).await.unwrap();
        }

        // The source id is excluded in the target index too.
        let source = PostDocument::new("1", "", "");
        let found: Vec<PostDocument> =
            queries.find_similar("books", &source).await.unwrap();
        assert_eq!(ids(&found), vec!["7"]);
    }

    #[tokio::test]
    async fn search_on_missing_index_fails() {
        let engine = Arc::new(EmbeddedEngine::in_memory());
        let queries = QueryService::new(engine);
        let err = queries
            .search::<PostDocument>("never-created", "x", &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Search {
                source: EngineError::IndexMissing(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn get_returns_document_or_not_found() {
        let (queries, _writer) = seeded(&[("1", "a", "b")]).await;
        let doc: PostDocument = queries.get("posts", "1").await.unwrap();
        assert_eq!(doc.title, "a");

        let err = queries.get::<PostDocument>("posts", "2").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn size_caps_results() {
        let (queries, _writer) =
            seeded(&[("1", "rust", ""), ("2", "rust", ""), ("3", "rust", "")])
                .await;
        let queries = queries.with_size(2);
        let found: Vec<PostDocument> =
            queries.search_with_scores("posts", "rust").await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn undecodable_hits_are_skipped() {
        let hits = SearchHits {
            hits: vec![
                Hit {
                    id: "1".into(),
                    score: Some(2.0),
                    source: json!({"id": "1", "title": "ok", "content": "x"}),
                },
                Hit {
                    id: "2".into(),
                    score: Some(1.0),
                    source: json!({"id": 2, "title": ["broken"]}),
                },
                Hit {
                    id: "3".into(),
                    score: None,
                    source: json!({"id": "3", "title": "ok", "content": "y"}),
                },
            ],
        };
        let docs: Vec<PostDocument> = decode_hits("posts", hits, true);
        assert_eq!(ids(&docs), vec!["1", "3"]);
        assert_eq!(docs[0].score, 2.0);
        assert_eq!(docs[1].score, 0.0);
    }
}
