//! docmirror - keeps a full-text search index in step with an entity store
//! and answers keyword and similarity queries against it.
//!
//! Indexes live either in-process on
//! [Tantivy](https://github.com/quickwit-oss/tantivy) or on a remote
//! Elasticsearch-compatible server. Both sit behind [`SearchEngine`], and the
//! services on top ([`IndexManager`], [`DocumentWriter`], [`QueryService`])
//! are generic over it.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use docmirror::{DocumentWriter, EmbeddedEngine, QueryService};
//! use docmirror::document::PostDocument;
//! use docmirror::engine::Refresh;
//!
//! # async fn run() -> docmirror::Result<()> {
//! let engine = Arc::new(EmbeddedEngine::in_memory());
//! let writer = DocumentWriter::new(Arc::clone(&engine));
//! let queries = QueryService::new(engine);
//!
//! let post = PostDocument::new("1", "Go concurrency", "goroutines");
//! writer.index_document(&post, Refresh::Immediate).await?;
//!
//! let hits: Vec<PostDocument> =
//!     queries.search_with_scores("posts", "concurrency").await?;
//! for hit in &hits {
//!     println!("{} (score: {:.3})", hit.title, hit.score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data_dir;
pub mod document;
pub mod engine;
pub mod error;
pub mod index_manager;
pub mod mirror;
pub mod query;
pub mod store;
pub mod writer;

pub use config::{Config, EngineConfig};
pub use data_dir::DataDir;
pub use document::Indexable;
pub use engine::{ElasticEngine, EmbeddedEngine, Engine, SearchEngine};
pub use error::{EngineError, Error, Result};
pub use index_manager::IndexManager;
pub use mirror::Mirror;
pub use query::QueryService;
pub use store::EntityStore;
pub use writer::DocumentWriter;
