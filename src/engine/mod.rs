//! The seam between the indexing services and a concrete search engine.
//!
//! Two backends exist: [`embedded::EmbeddedEngine`], an in-process engine
//! built on tantivy, and [`elastic::ElasticEngine`], which talks to a
//! remote document-index server over its REST API. Both are driven through
//! the [`SearchEngine`] trait with the same small query language.

use std::{fmt, future::Future};

use serde_json::Value;

use crate::{
    config::{Backend, EngineConfig},
    error::{EngineError, Error, Result},
};

pub mod elastic;
pub mod embedded;

pub use elastic::ElasticEngine;
pub use embedded::EmbeddedEngine;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Number of hits returned when a request does not say otherwise.
pub const DEFAULT_SIZE: usize = 10;

/// Field names every backend understands for ranking.
pub mod fields {
    pub const ID: &str = "_id";
    pub const SOURCE: &str = "_source";
    pub const TITLE: &str = "title";
    pub const CONTENT: &str = "content";
}

/// Visibility of a write to subsequent reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Refresh {
    /// The write is searchable by any query issued after the call returns.
    Immediate,
    /// The engine may apply the write to searches asynchronously.
    #[default]
    Deferred,
}

impl Refresh {
    pub fn as_param(self) -> &'static str {
        match self {
            Refresh::Immediate => "true",
            Refresh::Deferred => "false",
        }
    }
}

/// A field name with an optional relevance weight, written `title^3`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldBoost {
    pub field: String,
    pub boost: f32,
}

impl FieldBoost {
    pub fn new(field: impl Into<String>, boost: f32) -> Self {
        Self {
            field: field.into(),
            boost,
        }
    }
}

impl From<&str> for FieldBoost {
    fn from(raw: &str) -> Self {
        if let Some((field, boost)) = raw.rsplit_once('^')
            && let Ok(boost) = boost.parse::<f32>()
            && boost.is_finite()
            && boost >= 0.0
        {
            return Self::new(field, boost);
        }
        Self::new(raw, 1.0)
    }
}

impl From<String> for FieldBoost {
    fn from(raw: String) -> Self {
        FieldBoost::from(raw.as_str())
    }
}

impl fmt::Display for FieldBoost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.boost == 1.0 {
            write!(f, "{}", self.field)
        } else {
            write!(f, "{}^{}", self.field, self.boost)
        }
    }
}

/// How per-field scores of a multi-field match are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchKind {
    /// Score of the best matching field.
    #[default]
    BestFields,
    /// Sum of the scores of all matching fields.
    MostFields,
}

impl MatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchKind::BestFields => "best_fields",
            MatchKind::MostFields => "most_fields",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    MatchAll,
    /// Analyze `query` and match it against each of `fields`.
    MultiMatch {
        query: String,
        fields: Vec<FieldBoost>,
        kind: MatchKind,
    },
    /// Documents whose key is one of the given ids.
    Ids(Vec<String>),
    Bool {
        must: Vec<Query>,
        should: Vec<Query>,
        must_not: Vec<Query>,
    },
}

impl Query {
    pub fn multi_match<I, F>(query: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<FieldBoost>,
    {
        Query::MultiMatch {
            query: query.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            kind: MatchKind::BestFields,
        }
    }

    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Query::Ids(ids.into_iter().map(Into::into).collect())
    }

    /// `self` must match and none of `excluded` may.
    pub fn excluding(self, excluded: Query) -> Self {
        Query::Bool {
            must: vec![self],
            should: Vec::new(),
            must_not: vec![excluded],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: Query,
    pub size: usize,
    /// Ask the engine to compute scores even when it would not by default.
    pub track_scores: bool,
}

impl SearchRequest {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            size: DEFAULT_SIZE,
            track_scores: false,
        }
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn track_scores(mut self, track: bool) -> Self {
        self.track_scores = track;
        self
    }
}

/// One search hit: the stored record plus its relevance score.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub id: String,
    pub score: Option<f64>,
    pub source: Value,
}

/// Hits in the engine's native relevance order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchHits {
    pub hits: Vec<Hit>,
}

/// Operations a search engine backend must provide.
///
/// Every call is an independent request addressed by index name (and id for
/// document operations); implementations are shared across tasks without
/// extra locking.
pub trait SearchEngine: Send + Sync {
    fn index_exists(
        &self,
        index: &str,
    ) -> impl Future<Output = EngineResult<bool>> + Send;

    /// Fails with [`EngineError::IndexAlreadyExists`] if the index exists.
    fn create_index(
        &self,
        index: &str,
    ) -> impl Future<Output = EngineResult<()>> + Send;

    /// Open an existing index. Opening an open index is a no-op.
    fn open_index(
        &self,
        index: &str,
    ) -> impl Future<Output = EngineResult<()>> + Send;

    fn close_index(
        &self,
        index: &str,
    ) -> impl Future<Output = EngineResult<()>> + Send;

    /// Store `source` under `id`, replacing any previous version.
    fn put_document(
        &self,
        index: &str,
        id: &str,
        source: &Value,
        refresh: Refresh,
    ) -> impl Future<Output = EngineResult<()>> + Send;

    /// Realtime lookup by id.
    fn get_document(
        &self,
        index: &str,
        id: &str,
    ) -> impl Future<Output = EngineResult<Option<Value>>> + Send;

    /// Returns whether a document was removed.
    fn delete_document(
        &self,
        index: &str,
        id: &str,
        refresh: Refresh,
    ) -> impl Future<Output = EngineResult<bool>> + Send;

    fn search(
        &self,
        index: &str,
        request: &SearchRequest,
    ) -> impl Future<Output = EngineResult<SearchHits>> + Send;
}

/// Reject names the REST engine would refuse, so that both backends accept
/// the same set and the embedded one can use the name as a directory.
pub fn validate_index_name(name: &str) -> EngineResult<()> {
    let invalid = |reason| {
        Err(EngineError::InvalidIndexName {
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return invalid("must not be empty");
    }
    if name.len() > 255 {
        return invalid("must be at most 255 bytes");
    }
    if name == "." || name == ".." {
        return invalid("must not be '.' or '..'");
    }
    if name.starts_with(['-', '_', '+']) {
        return invalid("must not start with '-', '_' or '+'");
    }
    if name.chars().any(|c| c.is_uppercase()) {
        return invalid("must be lowercase");
    }
    if name.chars().any(|c| {
        matches!(c, '\\' | '/' | '*' | '?' | '"' | '<' | '>' | '|' | ',' | '#')
            || c.is_whitespace()
            || c == ':'
    }) {
        return invalid("contains a forbidden character");
    }
    Ok(())
}

/// The process-wide engine handle, picked from configuration at startup.
#[derive(Debug, Clone)]
pub enum Engine {
    Embedded(EmbeddedEngine),
    Elastic(ElasticEngine),
}

impl Engine {
    pub fn connect(config: &EngineConfig) -> Result<Self> {
        let engine = match &config.backend {
            Backend::Embedded { path } => {
                Engine::Embedded(EmbeddedEngine::open(path, config)?)
            }
            Backend::Elastic => Engine::Elastic(
                ElasticEngine::from_config(config)
                    .map_err(|e| Error::Config(e.to_string()))?,
            ),
        };
        tracing::debug!(?engine, "search engine ready");
        Ok(engine)
    }
}

impl SearchEngine for Engine {
    async fn index_exists(&self, index: &str) -> EngineResult<bool> {
        match self {
            Engine::Embedded(e) => e.index_exists(index).await,
            Engine::Elastic(e) => e.index_exists(index).await,
        }
    }

    async fn create_index(&self, index: &str) -> EngineResult<()> {
        match self {
            Engine::Embedded(e) => e.create_index(index).await,
            Engine::Elastic(e) => e.create_index(index).await,
        }
    }

    async fn open_index(&self, index: &str) -> EngineResult<()> {
        match self {
            Engine::Embedded(e) => e.open_index(index).await,
            Engine::Elastic(e) => e.open_index(index).await,
        }
    }

    async fn close_index(&self, index: &str) -> EngineResult<()> {
        match self {
            Engine::Embedded(e) => e.close_index(index).await,
            Engine::Elastic(e) => e.close_index(index).await,
        }
    }

    async fn put_document(
        &self,
        index: &str,
        id: &str,
        source: &Value,
        refresh: Refresh,
    ) -> EngineResult<()> {
        match self {
            Engine::Embedded(e) => {
                e.put_document(index, id, source, refresh).await
            }
            Engine::Elastic(e) => {
                e.put_document(index, id, source, refresh).await
            }
        }
    }

    async fn get_document(
        &self,
        index: &str,
        id: &str,
    ) -> EngineResult<Option<Value>> {
        match self {
            Engine::Embedded(e) => e.get_document(index, id).await,
            Engine::Elastic(e) => e.get_document(index, id).await,
        }
    }

    async fn delete_document(
        &self,
        index: &str,
        id: &str,
        refresh: Refresh,
    ) -> EngineResult<bool> {
        match self {
            Engine::Embedded(e) => e.delete_document(index, id, refresh).await,
            Engine::Elastic(e) => e.delete_document(index, id, refresh).await,
        }
    }

    async fn search(
        &self,
        index: &str,
        request: &SearchRequest,
    ) -> EngineResult<SearchHits> {
        match self {
            Engine::Embedded(e) => e.search(index, request).await,
            Engine::Elastic(e) => e.search(index, request).await,
        }
    }
}
