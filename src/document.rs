//! The document model shared by every indexable entity.
//!
//! Posts, books and comments all live in their own index but are written
//! and queried through the same code paths. [`Indexable`] is the capability
//! set those paths need: a stable id, the index the type lives in, the two
//! text fields used for ranking, and a slot for the query-time score.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::store::{Book, Post};

/// Index that holds [`PostDocument`]s.
pub const POSTS_INDEX: &str = "posts";
/// Index that holds [`BookDocument`]s.
pub const BOOKS_INDEX: &str = "books";
/// Index that holds [`CommentDocument`]s.
pub const COMMENTS_INDEX: &str = "comments";

/// Name of the serialized score field. Stripped before a document is
/// written so the score never becomes stored state.
pub const SCORE_FIELD: &str = "score";

/// An entity that can be mirrored into a search index.
pub trait Indexable:
    Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// The fixed index name for this document type.
    const INDEX_NAME: &'static str;

    /// Document key inside the index. Supplied by the caller, usually the
    /// decimal form of the relational primary key.
    fn id(&self) -> String;

    fn index_name(&self) -> &str {
        Self::INDEX_NAME
    }

    fn title(&self) -> &str;

    fn content(&self) -> &str;

    /// Relevance score from the query that produced this document, or zero.
    fn score(&self) -> f64;

    fn set_score(&mut self, score: f64);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostDocument {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub score: f64,
}

impl PostDocument {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            score: 0.0,
        }
    }
}

impl Indexable for PostDocument {
    const INDEX_NAME: &'static str = POSTS_INDEX;

    fn id(&self) -> String {
        self.id.clone()
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn content(&self) -> &str {
        &self.content
    }

    fn score(&self) -> f64 {
        self.score
    }

    fn set_score(&mut self, score: f64) {
        self.score = score;
    }
}

impl From<&Post> for PostDocument {
    fn from(post: &Post) -> Self {
        Self::new(post.id.to_string(), &post.title, &post.content)
    }
}

/// A book as seen by the search index. The book name is indexed as the
/// title and its introduction as the content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookDocument {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub isbn: String,
    #[serde(default)]
    pub score: f64,
}

impl Indexable for BookDocument {
    const INDEX_NAME: &'static str = BOOKS_INDEX;

    fn id(&self) -> String {
        self.id.clone()
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn content(&self) -> &str {
        &self.content
    }

    fn score(&self) -> f64 {
        self.score
    }

    fn set_score(&mut self, score: f64) {
        self.score = score;
    }
}

impl From<&Book> for BookDocument {
    fn from(book: &Book) -> Self {
        Self {
            id: book.id.to_string(),
            title: book.name.clone(),
            content: book.intro.clone(),
            author: book.author.clone(),
            isbn: book.isbn.clone(),
            score: 0.0,
        }
    }
}

/// A comment on a post. Comments have no title of their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentDocument {
    pub id: String,
    #[serde(default)]
    pub post_id: String,
    pub content: String,
    #[serde(default)]
    pub score: f64,
}

impl Indexable for CommentDocument {
    const INDEX_NAME: &'static str = COMMENTS_INDEX;

    fn id(&self) -> String {
        self.id.clone()
    }

    fn title(&self) -> &str {
        ""
    }

    fn content(&self) -> &str {
        &self.content
    }

    fn score(&self) -> f64 {
        self.score
    }

    fn set_score(&mut self, score: f64) {
        self.score = score;
    }
}

/// Serialize a document into the record stored in its index.
pub fn to_source<T: Indexable>(
    doc: &T,
) -> serde_json::Result<serde_json::Value> {
    let mut value = serde_json::to_value(doc)?;
    if let Some(map) = value.as_object_mut() {
        map.remove(SCORE_FIELD);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_names_are_fixed_per_type() {
        let post = PostDocument::new("1", "t", "c");
        assert_eq!(post.index_name(), "posts");
        assert_eq!(BookDocument::INDEX_NAME, "books");
        assert_eq!(CommentDocument::INDEX_NAME, "comments");
    }

    #[test]
    fn source_never_carries_score() {
        let mut post = PostDocument::new("7", "Title", "Body");
        post.set_score(4.2);

        let source = to_source(&post).unwrap();
        assert_eq!(source["id"], "7");
        assert_eq!(source["title"], "Title");
        assert!(source.get(SCORE_FIELD).is_none());
    }

    #[test]
    fn score_defaults_to_zero_when_absent() {
        let json = serde_json::json!({
            "id": "3",
            "title": "Go concurrency",
            "content": "goroutines and channels",
        });
        let post: PostDocument = serde_json::from_value(json).unwrap();
        assert_eq!(post.score(), 0.0);
    }

    #[test]
    fn book_maps_name_and_intro() {
        let book = Book {
            id: 12,
            name: "Dune".into(),
            author: "Frank Herbert".into(),
            isbn: "978-0441013593".into(),
            intro: "A desert planet".into(),
        };
        let doc = BookDocument::from(&book);
        assert_eq!(doc.id(), "12");
        assert_eq!(doc.title(), "Dune");
        assert_eq!(doc.content(), "A desert planet");
    }

    #[test]
    fn comment_has_empty_title() {
        let comment = CommentDocument {
            id: "5".into(),
            post_id: "1".into(),
            content: "nice".into(),
            score: 0.0,
        };
        assert_eq!(comment.title(), "");
        assert_eq!(comment.index_name(), "comments");
    }
}
