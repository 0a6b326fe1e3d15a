//! Keeps the search indexes in step with the entity store.
//!
//! Every mutation lands in the store first. Only when that succeeds is the
//! change projected into the index; an index failure is returned to the
//! caller but the store write stays in place, so the index may lag the
//! store until the entity is written again.

use std::sync::Arc;

use crate::{
    document::{BOOKS_INDEX, BookDocument, POSTS_INDEX, PostDocument},
    engine::{Refresh, SearchEngine},
    error::{Error, Result},
    store::{Book, EntityStore, Post},
    writer::DocumentWriter,
};

#[derive(Debug)]
pub struct Mirror<E> {
    store: Arc<EntityStore>,
    writer: DocumentWriter<E>,
}

impl<E: SearchEngine> Mirror<E> {
    pub fn new(store: Arc<EntityStore>, writer: DocumentWriter<E>) -> Self {
        Self { store, writer }
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn writer(&self) -> &DocumentWriter<E> {
        &self.writer
    }

    pub async fn create_post(&self, post: Post) -> Result<Post> {
        let post = self.store.create_post(post)?;
        self.writer
            .index_document(&PostDocument::from(&post), Refresh::Immediate)
            .await?;
        Ok(post)
    }

    pub async fn update_post(&self, post: &Post) -> Result<()> {
        if !self.store.update_post(post)? {
            return Err(not_found("post", post.id));
        }
        self.writer.update_document(&PostDocument::from(post)).await
    }

    pub async fn delete_post(&self, id: u64) -> Result<()> {
        if !self.store.delete_post(id)? {
            return Err(not_found("post", id));
        }
        self.writer
            .remove_document(POSTS_INDEX, &id.to_string(), Refresh::Immediate)
            .await
    }

    pub async fn create_book(&self, book: Book) -> Result<Book> {
        let book = self.store.create_book(book)?;
        self.writer
            .index_document(&BookDocument::from(&book), Refresh::Immediate)
            .await?;
        Ok(book)
    }

    pub async fn update_book(&self, book: &Book) -> Result<()> {
        if !self.store.update_book(book)? {
            return Err(not_found("book", book.id));
        }
        self.writer.update_document(&BookDocument::from(book)).await
    }

    pub async fn delete_book(&self, id: u64) -> Result<()> {
        if !self.store.delete_book(id)? {
            return Err(not_found("book", id));
        }
        self.writer
            .remove_document(BOOKS_INDEX, &id.to_string(), Refresh::Immediate)
            .await
    }
}

fn not_found(kind: &'static str, id: u64) -> Error {
    Error::NotFound {
        kind,
        name: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{engine::EmbeddedEngine, query::QueryService};

    struct Fixture {
        _tmp: tempfile::TempDir,
        mirror: Mirror<EmbeddedEngine>,
        queries: QueryService<EmbeddedEngine>,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let store = EntityStore::open(&tmp.path().join("store.redb")).unwrap();
        let engine = Arc::new(EmbeddedEngine::in_memory());
        let writer = DocumentWriter::new(Arc::clone(&engine));
        Fixture {
            _tmp: tmp,
            mirror: Mirror::new(Arc::new(store), writer),
            queries: QueryService::new(engine),
        }
    }

    fn post(title: &str, content: &str) -> Post {
        Post {
            title: title.into(),
            content: content.into(),
            ..Post::default()
        }
    }

    #[tokio::test]
    async fn created_post_is_searchable_under_store_id() {
        let f = fixture();
        let created = f
            .mirror
            .create_post(post("Rust ownership", "borrowing rules"))
            .await
            .unwrap();

        let found: Vec<PostDocument> = f
            .queries
            .search(POSTS_INDEX, "ownership", &[])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, created.id.to_string());
    }

    #[tokio::test]
    async fn update_replaces_indexed_text() {
        let f = fixture();
        let mut created =
            f.mirror.create_post(post("Old title", "old")).await.unwrap();
        created.title = "Fresh title".into();
        f.mirror.update_post(&created).await.unwrap();

        let old: Vec<PostDocument> =
            f.queries.search(POSTS_INDEX, "old", &[]).await.unwrap();
        assert!(old.is_empty());
        let fresh: Vec<PostDocument> =
            f.queries.search(POSTS_INDEX, "fresh", &[]).await.unwrap();
        assert_eq!(fresh.len(), 1);
    }

    #[tokio::test]
    async fn book_update_replaces_indexed_text() {
        let f = fixture();
        let mut created = f
            .mirror
            .create_book(Book {
                name: "Working title".into(),
                intro: "draft blurb".into(),
                ..Book::default()
            })
            .await
            .unwrap();
        created.name = "Final title".into();
        created.intro = "printed blurb".into();
        f.mirror.update_book(&created).await.unwrap();

        let stored = f.mirror.store().get_book(created.id).unwrap().unwrap();
        assert_eq!(stored.name, "Final title");
        let old: Vec<BookDocument> =
            f.queries.search(BOOKS_INDEX, "draft", &[]).await.unwrap();
        assert!(old.is_empty());
        let fresh: Vec<BookDocument> =
            f.queries.search(BOOKS_INDEX, "printed", &[]).await.unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].title, "Final title");

        let ghost = Book {
            id: 99,
            ..Book::default()
        };
        let err = f.mirror.update_book(&ghost).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "book", .. }));
    }

    #[tokio::test]
    async fn update_of_missing_post_touches_nothing() {
        let f = fixture();
        let ghost = Post {
            id: 42,
            ..post("ghost", "ghost")
        };
        let err = f.mirror.update_post(&ghost).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "post", .. }));
        assert!(
            !f.mirror
                .writer()
                .indexes()
                .index_exists(POSTS_INDEX)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn delete_removes_from_store_and_index() {
        let f = fixture();
        let book = f
            .mirror
            .create_book(Book {
                name: "Dune".into(),
                intro: "desert planet".into(),
                ..Book::default()
            })
            .await
            .unwrap();

        f.mirror.delete_book(book.id).await.unwrap();
        assert!(f.mirror.store().get_book(book.id).unwrap().is_none());
        let found: Vec<BookDocument> =
            f.queries.search(BOOKS_INDEX, "desert", &[]).await.unwrap();
        assert!(found.is_empty());

        let err = f.mirror.delete_book(book.id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "book", .. }));
    }

    #[tokio::test]
    async fn index_failure_keeps_store_write() {
        let f = fixture();
        let created = f.mirror.create_post(post("t", "c")).await.unwrap();
        f.mirror
            .writer()
            .indexes()
            .close_index(POSTS_INDEX)
            .await
            .unwrap();

        let err = f.mirror.delete_post(created.id).await.unwrap_err();
        assert!(matches!(err, Error::Write { .. }));
        assert!(f.mirror.store().get_post(created.id).unwrap().is_none());
    }
}
