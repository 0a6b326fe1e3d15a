//! In-process search engine on tantivy.
//!
//! Each named index is its own tantivy index, either in RAM or in a
//! directory `<root>/<name>`. Every document stores its key in `_id`, the
//! full record as JSON in `_source`, and the `title`/`content` text fields
//! analyzed for BM25 ranking.

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use serde_json::Value;
use tantivy::{
    Index,
    IndexReader,
    IndexSettings,
    IndexWriter,
    ReloadPolicy,
    TantivyDocument,
    Term,
    collector::{Count, TopDocs},
    directory::MmapDirectory,
    doc,
    query::{
        AllQuery,
        BooleanQuery,
        BoostQuery,
        DisjunctionMaxQuery,
        EmptyQuery,
        Occur,
        Query as TantivyQuery,
        TermQuery,
    },
    schema::{
        Field,
        IndexRecordOption,
        STORED,
        STRING,
        Schema,
        TextFieldIndexing,
        TextOptions,
        Value as _,
    },
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        TextAnalyzer,
        TokenStream,
    },
};

use super::{
    EngineResult,
    Hit,
    MatchKind,
    Query,
    Refresh,
    SearchEngine,
    SearchHits,
    SearchRequest,
    fields,
    validate_index_name,
};
use crate::{
    config::EngineConfig,
    error::{EngineError, Result},
};

/// Writer arena per index. One indexing thread per index is plenty for
/// single-document upserts.
pub const DEFAULT_WRITER_MEMORY: usize = 15_000_000;

const EN_STEM: &str = "en_stem";
/// Lives inside the index directory, outside tantivy's managed files.
const CLOSED_MARKER: &str = ".docmirror-closed";

/// Resolved field handles for the schema.
#[derive(Clone, Copy)]
struct SchemaFields {
    id: Field,
    source: Field,
    title: Field,
    content: Field,
}

impl SchemaFields {
    fn resolve(schema: &Schema) -> EngineResult<Self> {
        Ok(Self {
            id: schema.get_field(fields::ID)?,
            source: schema.get_field(fields::SOURCE)?,
            title: schema.get_field(fields::TITLE)?,
            content: schema.get_field(fields::CONTENT)?,
        })
    }

    /// The analyzed field a query may name, if any.
    fn text_field(&self, name: &str) -> Option<Field> {
        match name {
            fields::TITLE => Some(self.title),
            fields::CONTENT => Some(self.content),
            _ => None,
        }
    }
}

fn build_schema() -> Schema {
    let mut builder = Schema::builder();

    builder.add_text_field(fields::ID, STRING | STORED);
    builder.add_text_field(fields::SOURCE, STORED);

    let text_opts = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(EN_STEM)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    );
    builder.add_text_field(fields::TITLE, text_opts.clone());
    builder.add_text_field(fields::CONTENT, text_opts);

    builder.build()
}

fn register_tokenizers(index: &Index) {
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(tantivy::tokenizer::Language::English))
        .build();
    index.tokenizers().register(EN_STEM, en_stem);
}

fn system_error(e: impl fmt::Display) -> EngineError {
    EngineError::Tantivy(tantivy::TantivyError::SystemError(e.to_string()))
}

/// An open index with its reader and single writer.
struct LiveIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: SchemaFields,
}

impl LiveIndex {
    fn load(index: Index, writer_memory: usize) -> EngineResult<Self> {
        register_tokenizers(&index);
        let fields = SchemaFields::resolve(&index.schema())?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;
        let writer = index.writer_with_num_threads(1, writer_memory)?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            fields,
        })
    }

    fn writer(&self) -> EngineResult<MutexGuard<'_, IndexWriter>> {
        self.writer
            .lock()
            .map_err(|_| EngineError::LockPoisoned("index writer"))
    }

    fn id_query(&self, id: &str) -> TermQuery {
        TermQuery::new(
            Term::from_field_text(self.fields.id, id),
            IndexRecordOption::Basic,
        )
    }

    fn build_query(
        &self,
        query: &Query,
    ) -> EngineResult<Box<dyn TantivyQuery>> {
        let built: Box<dyn TantivyQuery> = match query {
            Query::MatchAll => Box::new(AllQuery),
            Query::Ids(ids) => Box::new(BooleanQuery::new(
                ids.iter()
                    .map(|id| {
                        let q: Box<dyn TantivyQuery> =
                            Box::new(self.id_query(id));
                        (Occur::Should, q)
                    })
                    .collect(),
            )),
            Query::MultiMatch {
                query,
                fields,
                kind,
            } => {
                let mut per_field: Vec<Box<dyn TantivyQuery>> =
                    Vec::with_capacity(fields.len());
                for fb in fields {
                    let Some(field) = self.fields.text_field(&fb.field) else {
                        tracing::debug!(
                            field = %fb.field,
                            "field is not analyzed, skipping"
                        );
                        continue;
                    };
                    let Some(q) = self.match_field(field, query)? else {
                        continue;
                    };
                    if fb.boost == 1.0 {
                        per_field.push(q);
                    } else {
                        per_field.push(Box::new(BoostQuery::new(q, fb.boost)));
                    }
                }

                if per_field.is_empty() {
                    Box::new(EmptyQuery)
                } else {
                    match kind {
                        MatchKind::BestFields => {
                            Box::new(DisjunctionMaxQuery::new(per_field))
                        }
                        MatchKind::MostFields => Box::new(BooleanQuery::new(
                            per_field
                                .into_iter()
                                .map(|q| (Occur::Should, q))
                                .collect(),
                        )),
                    }
                }
            }
            Query::Bool {
                must,
                should,
                must_not,
            } => {
                let mut clauses = Vec::new();
                for q in must {
                    clauses.push((Occur::Must, self.build_query(q)?));
                }
                for q in should {
                    clauses.push((Occur::Should, self.build_query(q)?));
                }
                // A purely negative query matches everything not excluded.
                if must.is_empty() && should.is_empty() {
                    let all: Box<dyn TantivyQuery> = Box::new(AllQuery);
                    clauses.push((Occur::Must, all));
                }
                for q in must_not {
                    clauses.push((Occur::MustNot, self.build_query(q)?));
                }
                Box::new(BooleanQuery::new(clauses))
            }
        };
        Ok(built)
    }

    /// OR of the analyzed terms of `text` against one field, or `None` when
    /// the analyzer produces no terms.
    fn match_field(
        &self,
        field: Field,
        text: &str,
    ) -> EngineResult<Option<Box<dyn TantivyQuery>>> {
        let mut analyzer = self.index.tokenizer_for_field(field)?;
        let mut stream = analyzer.token_stream(text);
        let mut clauses: Vec<(Occur, Box<dyn TantivyQuery>)> = Vec::new();
        while let Some(token) = stream.next() {
            let term = Term::from_field_text(field, &token.text);
            clauses.push((
                Occur::Should,
                Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs)),
            ));
        }
        if clauses.is_empty() {
            return Ok(None);
        }
        Ok(Some(Box::new(BooleanQuery::new(clauses))))
    }
}

enum Storage {
    Ram,
    Disk(PathBuf),
}

#[derive(Default)]
struct Registry {
    live: HashMap<String, Arc<LiveIndex>>,
    /// Closed in-memory indexes. On disk, closure is a marker file inside
    /// the index directory.
    parked: HashMap<String, Index>,
}

struct Inner {
    storage: Storage,
    registry: Mutex<Registry>,
    writer_memory: usize,
    timeout: Option<Duration>,
}

impl Inner {
    fn registry(&self) -> EngineResult<MutexGuard<'_, Registry>> {
        self.registry
            .lock()
            .map_err(|_| EngineError::LockPoisoned("index registry"))
    }

    fn closed_marker(root: &Path, name: &str) -> PathBuf {
        root.join(name).join(CLOSED_MARKER)
    }

    fn exists_on_disk(root: &Path, name: &str) -> EngineResult<bool> {
        let dir = root.join(name);
        if !dir.is_dir() {
            return Ok(false);
        }
        let mmap_dir = MmapDirectory::open(&dir)?;
        Index::exists(&mmap_dir).map_err(system_error)
    }

    fn load_from_disk(
        &self,
        root: &Path,
        name: &str,
    ) -> EngineResult<LiveIndex> {
        let mmap_dir = MmapDirectory::open(root.join(name))?;
        let index = Index::open(mmap_dir)?;
        LiveIndex::load(index, self.writer_memory)
    }

    fn exists(&self, name: &str) -> EngineResult<bool> {
        validate_index_name(name)?;
        let registry = self.registry()?;
        if registry.live.contains_key(name) {
            return Ok(true);
        }
        match &self.storage {
            Storage::Ram => Ok(registry.parked.contains_key(name)),
            Storage::Disk(root) => Self::exists_on_disk(root, name),
        }
    }

    fn create(&self, name: &str) -> EngineResult<()> {
        validate_index_name(name)?;
        let mut registry = self.registry()?;
        let exists = registry.live.contains_key(name)
            || match &self.storage {
                Storage::Ram => registry.parked.contains_key(name),
                Storage::Disk(root) => Self::exists_on_disk(root, name)?,
            };
        if exists {
            return Err(EngineError::IndexAlreadyExists(name.to_string()));
        }

        let index = match &self.storage {
            Storage::Ram => Index::create_in_ram(build_schema()),
            Storage::Disk(root) => {
                let dir = root.join(name);
                std::fs::create_dir_all(&dir)?;
                let mmap_dir = MmapDirectory::open(&dir)?;
                Index::create(
                    mmap_dir,
                    build_schema(),
                    IndexSettings::default(),
                )?
            }
        };
        let live = LiveIndex::load(index, self.writer_memory)?;
        registry.live.insert(name.to_string(), Arc::new(live));

        tracing::info!(index = name, "created index");
        Ok(())
    }

    fn open(&self, name: &str) -> EngineResult<()> {
        validate_index_name(name)?;
        let mut registry = self.registry()?;
        if registry.live.contains_key(name) {
            return Ok(());
        }

        let live = match &self.storage {
            Storage::Ram => {
                let index = registry.parked.remove(name).ok_or_else(|| {
                    EngineError::IndexMissing(name.to_string())
                })?;
                LiveIndex::load(index, self.writer_memory)?
            }
            Storage::Disk(root) => {
                if !Self::exists_on_disk(root, name)? {
                    return Err(EngineError::IndexMissing(name.to_string()));
                }
                let marker = Self::closed_marker(root, name);
                if marker.exists() {
                    std::fs::remove_file(&marker)?;
                    tracing::info!(index = name, "reopened index");
                }
                self.load_from_disk(root, name)?
            }
        };
        registry.live.insert(name.to_string(), Arc::new(live));
        Ok(())
    }

    fn close(&self, name: &str) -> EngineResult<()> {
        validate_index_name(name)?;
        let mut registry = self.registry()?;
        let live = registry.live.remove(name);

        match &self.storage {
            Storage::Ram => match live {
                Some(live) => {
                    registry
                        .parked
                        .insert(name.to_string(), live.index.clone());
                }
                None if registry.parked.contains_key(name) => {}
                None => {
                    return Err(EngineError::IndexMissing(name.to_string()));
                }
            },
            Storage::Disk(root) => {
                if live.is_none() && !Self::exists_on_disk(root, name)? {
                    return Err(EngineError::IndexMissing(name.to_string()));
                }
                std::fs::write(Self::closed_marker(root, name), b"")?;
            }
        }

        tracing::info!(index = name, "closed index");
        Ok(())
    }

    /// The open index `name`, loading it from disk on first use.
    fn live(&self, name: &str) -> EngineResult<Arc<LiveIndex>> {
        validate_index_name(name)?;
        let mut registry = self.registry()?;
        if let Some(live) = registry.live.get(name) {
            return Ok(Arc::clone(live));
        }

        match &self.storage {
            Storage::Ram => {
                if registry.parked.contains_key(name) {
                    Err(EngineError::IndexClosed(name.to_string()))
                } else {
                    Err(EngineError::IndexMissing(name.to_string()))
                }
            }
            Storage::Disk(root) => {
                if !Self::exists_on_disk(root, name)? {
                    return Err(EngineError::IndexMissing(name.to_string()));
                }
                if Self::closed_marker(root, name).exists() {
                    return Err(EngineError::IndexClosed(name.to_string()));
                }
                let live = Arc::new(self.load_from_disk(root, name)?);
                registry.live.insert(name.to_string(), Arc::clone(&live));
                Ok(live)
            }
        }
    }

    fn put(
        &self,
        name: &str,
        id: &str,
        source: &Value,
        refresh: Refresh,
    ) -> EngineResult<()> {
        let live = self.live(name)?;
        let f = live.fields;
        let stored = source.to_string();
        let text = |key: &str| {
            source.get(key).and_then(Value::as_str).unwrap_or("").to_string()
        };

        {
            let mut writer = live.writer()?;
            // Replace any existing document with this id.
            writer.delete_term(Term::from_field_text(f.id, id));
            writer.add_document(doc!(
                f.id => id,
                f.source => stored,
                f.title => text(fields::TITLE),
                f.content => text(fields::CONTENT),
            ))?;
            writer.commit()?;
        }

        if refresh == Refresh::Immediate {
            live.reader.reload()?;
        }
        tracing::debug!(index = name, id, ?refresh, "stored document");
        Ok(())
    }

    fn get(&self, name: &str, id: &str) -> EngineResult<Option<Value>> {
        let live = self.live(name)?;
        live.reader.reload()?;
        let searcher = live.reader.searcher();

        let top = searcher.search(&live.id_query(id), &TopDocs::with_limit(1))?;
        let Some((_, address)) = top.into_iter().next() else {
            return Ok(None);
        };
        let doc: TantivyDocument = searcher.doc(address)?;
        let raw = doc
            .get_first(live.fields.source)
            .and_then(|v| v.as_str())
            .unwrap_or("");
        serde_json::from_str(raw)
            .map(Some)
            .map_err(|e| EngineError::Decode(format!("{name}/{id}: {e}")))
    }

    fn delete(
        &self,
        name: &str,
        id: &str,
        refresh: Refresh,
    ) -> EngineResult<bool> {
        let live = self.live(name)?;
        {
            let mut writer = live.writer()?;
            live.reader.reload()?;
            let present =
                live.reader.searcher().search(&live.id_query(id), &Count)?;
            if present == 0 {
                return Ok(false);
            }
            writer.delete_term(Term::from_field_text(live.fields.id, id));
            writer.commit()?;
        }

        if refresh == Refresh::Immediate {
            live.reader.reload()?;
        }
        tracing::debug!(index = name, id, ?refresh, "deleted document");
        Ok(true)
    }

    fn search(
        &self,
        name: &str,
        request: &SearchRequest,
    ) -> EngineResult<SearchHits> {
        let live = self.live(name)?;
        if request.size == 0 {
            return Ok(SearchHits::default());
        }

        let query = live.build_query(&request.query)?;
        let searcher = live.reader.searcher();
        let top = searcher.search(&*query, &TopDocs::with_limit(request.size))?;

        let mut hits = Vec::with_capacity(top.len());
        for (score, address) in top {
            let doc: TantivyDocument = searcher.doc(address)?;
            let id = extract_text(&doc, live.fields.id);
            let raw = extract_text(&doc, live.fields.source);
            match serde_json::from_str(&raw) {
                Ok(source) => hits.push(Hit {
                    id,
                    score: Some(f64::from(score)),
                    source,
                }),
                Err(e) => {
                    tracing::warn!(
                        index = name,
                        id = %id,
                        "unreadable stored record: {e}"
                    );
                }
            }
        }
        Ok(SearchHits { hits })
    }
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

/// Cheap to clone; clones share the same indexes.
#[derive(Clone)]
pub struct EmbeddedEngine {
    inner: Arc<Inner>,
}

impl EmbeddedEngine {
    /// An engine whose indexes live in RAM and vanish with the process.
    pub fn in_memory() -> Self {
        Self::with_storage(Storage::Ram, None)
    }

    /// An engine keeping one index per directory under `root`.
    pub fn open(root: &Path, config: &EngineConfig) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self::with_storage(
            Storage::Disk(root.to_path_buf()),
            config.request_timeout(),
        ))
    }

    fn with_storage(storage: Storage, timeout: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage,
                registry: Mutex::new(Registry::default()),
                writer_memory: DEFAULT_WRITER_MEMORY,
                timeout,
            }),
        }
    }

    /// Run blocking index work off the async executor, bounded by the
    /// configured timeout. The work itself is not interrupted on timeout.
    async fn run<T, F>(&self, op: F) -> EngineResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> EngineResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let task = tokio::task::spawn_blocking(move || op(&inner));
        let joined = match self.inner.timeout {
            Some(limit) => tokio::time::timeout(limit, task)
                .await
                .map_err(|_| EngineError::Timeout(limit))?,
            None => task.await,
        };
        joined.map_err(|e| EngineError::TaskJoin(e.to_string()))?
    }
}

impl fmt::Debug for EmbeddedEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let storage = match &self.inner.storage {
            Storage::Ram => "ram".to_string(),
            Storage::Disk(root) => root.display().to_string(),
        };
        f.debug_struct("EmbeddedEngine")
            .field("storage", &storage)
            .field("timeout", &self.inner.timeout)
            .finish_non_exhaustive()
    }
}

impl SearchEngine for EmbeddedEngine {
    async fn index_exists(&self, index: &str) -> EngineResult<bool> {
        let index = index.to_string();
        self.run(move |inner| inner.exists(&index)).await
    }

    async fn create_index(&self, index: &str) -> EngineResult<()> {
        let index = index.to_string();
        self.run(move |inner| inner.create(&index)).await
    }

    async fn open_index(&self, index: &str) -> EngineResult<()> {
        let index = index.to_string();
        self.run(move |inner| inner.open(&index)).await
    }

    async fn close_index(&self, index: &str) -> EngineResult<()> {
        let index = index.to_string();
        self.run(move |inner| inner.close(&index)).await
    }

    async fn put_document(
        &self,
        index: &str,
        id: &str,
        source: &Value,
        refresh: Refresh,
    ) -> EngineResult<()> {
        let (index, id, source) =
            (index.to_string(), id.to_string(), source.clone());
        self.run(move |inner| inner.put(&index, &id, &source, refresh))
            .await
    }

    async fn get_document(
        &self,
        index: &str,
        id: &str,
    ) -> EngineResult<Option<Value>> {
        let (index, id) = (index.to_string(), id.to_string());
        self.run(move |inner| inner.get(&index, &id)).await
    }

    async fn delete_document(
        &self,
        index: &str,
        id: &str,
        refresh: Refresh,
    ) -> EngineResult<bool> {
        let (index, id) = (index.to_string(), id.to_string());
        self.run(move |inner| inner.delete(&index, &id, refresh)).await
    }

    async fn search(
        &self,
        index: &str,
        request: &SearchRequest,
    ) -> EngineResult<SearchHits> {
        let (index, request) = (index.to_string(), request.clone());
        self.run(move |inner| inner.search(&index, &request)).await
    }
}
