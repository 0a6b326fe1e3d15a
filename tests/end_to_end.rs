use std::sync::Arc;

use docmirror::{
    DocumentWriter,
    Engine,
    EngineConfig,
    EngineError,
    EntityStore,
    Error,
    Indexable,
    Mirror,
    QueryService,
    document::{BookDocument, PostDocument},
    engine::Refresh,
    store::{Book, Post},
};

struct Harness {
    tmp: tempfile::TempDir,
    engine: Arc<Engine>,
    writer: DocumentWriter<Engine>,
    queries: QueryService<Engine>,
}

fn harness() -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let config = EngineConfig::embedded(tmp.path().join("indexes"));
    let engine = Arc::new(Engine::connect(&config).unwrap());
    Harness {
        writer: DocumentWriter::new(Arc::clone(&engine)),
        queries: QueryService::new(Arc::clone(&engine)),
        engine,
        tmp,
    }
}

fn ids<T: Indexable>(docs: &[T]) -> Vec<String> {
    docs.iter().map(Indexable::id).collect()
}

#[tokio::test]
async fn keyword_search_after_first_write() {
    let h = harness();
    h.writer.indexes().ensure_index("posts").await.unwrap();

    let post =
        PostDocument::new("1", "Go concurrency", "goroutines and channels");
    h.writer
        .index_document(&post, Refresh::Immediate)
        .await
        .unwrap();

    let found: Vec<PostDocument> = h
        .queries
        .search("posts", "concurrency", &["title", "content"])
        .await
        .unwrap();
    assert_eq!(ids(&found), vec!["1"]);
}

#[tokio::test]
async fn similar_excludes_source_and_scores_hits() {
    let h = harness();
    let pie = PostDocument::new("1", "Apple pie recipe", "");
    let stock = PostDocument::new("2", "Apple stock price", "");
    for post in [&pie, &stock] {
        h.writer
            .index_document(post, Refresh::Immediate)
            .await
            .unwrap();
    }

    let similar = h.queries.find_similar("posts", &pie).await.unwrap();
    assert_eq!(ids(&similar), vec!["2"]);
    assert!(similar[0].score > 0.0);
}

#[tokio::test]
async fn search_of_unknown_index_is_an_error() {
    let h = harness();
    let result: docmirror::Result<Vec<PostDocument>> =
        h.queries.search("never-created", "anything", &[]).await;
    match result {
        Err(Error::Search { index, source }) => {
            assert_eq!(index, "never-created");
            assert!(matches!(source, EngineError::IndexMissing(_)));
        }
        other => panic!("expected search error, got {other:?}"),
    }
}

#[tokio::test]
async fn rewrite_of_same_id_keeps_latest() {
    let h = harness();
    let mut post = PostDocument::new("9", "Draft", "first version");
    h.writer
        .index_document(&post, Refresh::Immediate)
        .await
        .unwrap();
    post.content = "second version".into();
    h.writer.update_document(&post).await.unwrap();

    let back: PostDocument = h.queries.get("posts", "9").await.unwrap();
    assert_eq!(back.content, "second version");

    let found: Vec<PostDocument> =
        h.queries.search("posts", "version", &[]).await.unwrap();
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn scored_results_are_descending() {
    let h = harness();
    for (id, title, content) in [
        ("1", "rust", "rust rust rust"),
        ("2", "cooking", "a little rust on the pan"),
        ("3", "rust tips", "borrow checker and rust lifetimes"),
    ] {
        let post = PostDocument::new(id, title, content);
        h.writer
            .index_document(&post, Refresh::Immediate)
            .await
            .unwrap();
    }

    let found: Vec<PostDocument> =
        h.queries.search_with_scores("posts", "rust").await.unwrap();
    assert_eq!(found.len(), 3);
    assert!(found.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn removing_missing_id_is_not_found() {
    let h = harness();
    h.writer.indexes().ensure_index("posts").await.unwrap();
    let err = h
        .writer
        .remove_document("posts", "404", Refresh::Immediate)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn closed_index_is_reopened_by_next_write() {
    let h = harness();
    let post = PostDocument::new("1", "Kept", "across close");
    h.writer
        .index_document(&post, Refresh::Immediate)
        .await
        .unwrap();
    h.writer.indexes().close_index("posts").await.unwrap();

    let closed: docmirror::Result<Vec<PostDocument>> =
        h.queries.search("posts", "kept", &[]).await;
    assert!(matches!(closed, Err(Error::Search { .. })));

    let other = PostDocument::new("2", "Second", "write");
    h.writer
        .index_document(&other, Refresh::Immediate)
        .await
        .unwrap();
    let found: Vec<PostDocument> =
        h.queries.search("posts", "kept", &[]).await.unwrap();
    assert_eq!(ids(&found), vec!["1"]);
}

#[tokio::test]
async fn mirror_projects_store_into_index() {
    let h = harness();
    let store = EntityStore::open(&h.tmp.path().join("store.redb")).unwrap();
    let writer = DocumentWriter::new(Arc::clone(&h.engine));
    let mirror = Mirror::new(Arc::new(store), writer);

    let post = mirror
        .create_post(Post {
            id: 0,
            author: "ana".into(),
            title: "Desert planet politics".into(),
            content: "spice and sand".into(),
        })
        .await
        .unwrap();
    let book = mirror
        .create_book(Book {
            id: 0,
            name: "Dune".into(),
            author: "Frank Herbert".into(),
            isbn: "978-0441013593".into(),
            intro: "politics on a desert planet".into(),
        })
        .await
        .unwrap();

    let source: PostDocument = h
        .queries
        .get("posts", &post.id.to_string())
        .await
        .unwrap();
    let books: Vec<BookDocument> = h
        .queries
        .search_with_scores("books", "desert")
        .await
        .unwrap();
    assert_eq!(ids(&books), vec![book.id.to_string()]);
    assert_eq!(books[0].author, "Frank Herbert");

    // Post 1 and book 1 share an id, so the book is excluded here.
    let similar: Vec<PostDocument> =
        h.queries.find_similar("books", &source).await.unwrap();
    assert!(similar.is_empty());

    mirror.delete_post(post.id).await.unwrap();
    let gone = h.queries.get::<PostDocument>("posts", "1").await;
    assert!(matches!(gone, Err(Error::NotFound { .. })));
    assert!(h.writer.indexes().index_exists("posts").await.unwrap());
}

#[tokio::test]
async fn deferred_write_is_readable_by_id() {
    let h = harness();
    let post = PostDocument::new("5", "Queued", "not refreshed yet");
    h.writer
        .index_document(&post, Refresh::Deferred)
        .await
        .unwrap();

    let back: PostDocument = h.queries.get("posts", "5").await.unwrap();
    assert_eq!(back.title, "Queued");
}

#[tokio::test]
async fn dotted_index_name_leaves_sibling_writable() {
    let h = harness();
    h.writer.indexes().ensure_index("posts.closed").await.unwrap();
    let post = PostDocument::new("1", "Neighbour", "shares a prefix");
    h.writer
        .index_document(&post, Refresh::Immediate)
        .await
        .unwrap();
    drop(h.writer);
    drop(h.queries);
    drop(h.engine);

    let config = EngineConfig::embedded(h.tmp.path().join("indexes"));
    let engine = Arc::new(Engine::connect(&config).unwrap());
    let writer = DocumentWriter::new(Arc::clone(&engine));
    let queries = QueryService::new(engine);

    let found: Vec<PostDocument> =
        queries.search("posts", "neighbour", &[]).await.unwrap();
    assert_eq!(ids(&found), vec!["1"]);
    let next = PostDocument::new("2", "Second", "still writable");
    writer.index_document(&next, Refresh::Immediate).await.unwrap();
}
