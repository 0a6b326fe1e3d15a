//! Relational side of the mirror: posts and books kept in a redb database.
//!
//! Records are stored as JSON under a `u64` key. Keys are assigned on
//! create, one past the highest key currently in the table.

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::Result;

const POSTS: TableDefinition<u64, &[u8]> = TableDefinition::new("posts");
const BOOKS: TableDefinition<u64, &[u8]> = TableDefinition::new("books");

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: u64,
    #[serde(default)]
    pub author: String,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub isbn: String,
    #[serde(default)]
    pub intro: String,
}

trait Record: Serialize + DeserializeOwned {
    const TABLE: TableDefinition<'static, u64, &'static [u8]>;

    fn key(&self) -> u64;
    fn set_key(&mut self, key: u64);
}

impl Record for Post {
    const TABLE: TableDefinition<'static, u64, &'static [u8]> = POSTS;

    fn key(&self) -> u64 {
        self.id
    }

    fn set_key(&mut self, key: u64) {
        self.id = key;
    }
}

impl Record for Book {
    const TABLE: TableDefinition<'static, u64, &'static [u8]> = BOOKS;

    fn key(&self) -> u64 {
        self.id
    }

    fn set_key(&mut self, key: u64) {
        self.id = key;
    }
}

pub struct EntityStore {
    db: Database,
}

impl EntityStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(POSTS)?;
        txn.open_table(BOOKS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Posts --

    /// Store `post` under a fresh id, ignoring any id it already carries.
    pub fn create_post(&self, post: Post) -> Result<Post> {
        self.insert_new(post)
    }

    pub fn get_post(&self, id: u64) -> Result<Option<Post>> {
        self.fetch(id)
    }

    /// Overwrite an existing post. Returns `false` when no post has that id.
    pub fn update_post(&self, post: &Post) -> Result<bool> {
        self.replace(post)
    }

    pub fn delete_post(&self, id: u64) -> Result<bool> {
        self.remove::<Post>(id)
    }

    pub fn list_posts(&self) -> Result<Vec<Post>> {
        self.list()
    }

    // -- Books --

    pub fn create_book(&self, book: Book) -> Result<Book> {
        self.insert_new(book)
    }

    pub fn get_book(&self, id: u64) -> Result<Option<Book>> {
        self.fetch(id)
    }

    pub fn update_book(&self, book: &Book) -> Result<bool> {
        self.replace(book)
    }

    pub fn delete_book(&self, id: u64) -> Result<bool> {
        self.remove::<Book>(id)
    }

    pub fn list_books(&self) -> Result<Vec<Book>> {
        self.list()
    }

    fn insert_new<R: Record>(&self, mut record: R) -> Result<R> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(R::TABLE)?;
            let next = match table.last()? {
                Some((key, _)) => key.value() + 1,
                None => 1,
            };
            record.set_key(next);
            let bytes = serde_json::to_vec(&record)?;
            table.insert(next, bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(record)
    }

    fn fetch<R: Record>(&self, id: u64) -> Result<Option<R>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(R::TABLE)?;
        match table.get(id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
            None => Ok(None),
        }
    }

    fn replace<R: Record>(&self, record: &R) -> Result<bool> {
        let bytes = serde_json::to_vec(record)?;
        let txn = self.db.begin_write()?;
        let found = {
            let mut table = txn.open_table(R::TABLE)?;
            let found = table.get(record.key())?.is_some();
            if found {
                table.insert(record.key(), bytes.as_slice())?;
            }
            found
        };
        txn.commit()?;
        Ok(found)
    }

    fn remove<R: Record>(&self, id: u64) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(R::TABLE)?;
            table.remove(id)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    fn list<R: Record>(&self) -> Result<Vec<R>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(R::TABLE)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_, v) = entry?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore").finish_non_exhaustive()
    }
}
