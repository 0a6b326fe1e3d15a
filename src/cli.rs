use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use docmirror::document::{BOOKS_INDEX, COMMENTS_INDEX, POSTS_INDEX};

#[derive(Debug, Parser)]
#[command(
    name = "docmirror",
    about = "Mirror posts and books into a search index and query it"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Read engine settings from this TOML file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create an index if it does not exist, reopening it if closed
    Ensure {
        /// Index name
        index: String,
    },
    /// Close an index so it rejects reads and writes until ensured again
    Close {
        /// Index name
        index: String,
    },
    /// Index a document directly, bypassing the entity store
    Index(IndexArgs),
    /// Show one indexed document
    Get(GetArgs),
    /// Remove a document from an index
    Remove {
        /// Index name
        index: String,
        /// Document id
        id: String,
        /// Do not wait for the removal to become visible to searches
        #[arg(long)]
        no_refresh: bool,
    },
    /// Keyword search
    Search(SearchArgs),
    /// Find documents similar to an indexed one
    Similar(SimilarArgs),
    /// Manage posts in the entity store (mirrored into the index)
    Post {
        #[command(subcommand)]
        action: PostAction,
    },
    /// Manage books in the entity store (mirrored into the index)
    Book {
        #[command(subcommand)]
        action: BookAction,
    },
}

/// Shape of the documents a command reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DocumentKind {
    Post,
    Book,
    Comment,
}

impl DocumentKind {
    /// Index documents of this kind are written to.
    pub fn default_index(self) -> &'static str {
        match self {
            DocumentKind::Post => POSTS_INDEX,
            DocumentKind::Book => BOOKS_INDEX,
            DocumentKind::Comment => COMMENTS_INDEX,
        }
    }
}

// -- Index --

#[derive(Debug, Parser)]
pub struct IndexArgs {
    /// Kind of document to build
    #[arg(long, value_enum)]
    pub kind: DocumentKind,

    /// Document id
    #[arg(long)]
    pub id: String,

    /// Title (ignored for comments)
    #[arg(long, default_value = "")]
    pub title: String,

    /// Body text
    #[arg(long, default_value = "")]
    pub content: String,

    /// Book author
    #[arg(long, default_value = "")]
    pub author: String,

    /// Book ISBN
    #[arg(long, default_value = "")]
    pub isbn: String,

    /// Post a comment belongs to
    #[arg(long, default_value = "")]
    pub post_id: String,

    /// Do not wait for the write to become visible to searches
    #[arg(long)]
    pub no_refresh: bool,
}

// -- Get --

#[derive(Debug, Parser)]
pub struct GetArgs {
    #[arg(long, value_enum)]
    pub kind: DocumentKind,

    /// Index name
    pub index: String,

    /// Document id
    pub id: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    #[arg(long, value_enum)]
    pub kind: DocumentKind,

    /// Index name
    pub index: String,

    /// The search query
    pub query: String,

    /// Field to search, optionally boosted as `name^weight` (repeatable)
    #[arg(short = 'f', long = "field")]
    pub fields: Vec<String>,

    /// Attach relevance scores (searches title and content)
    #[arg(long, conflicts_with = "fields")]
    pub scores: bool,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Similar --

#[derive(Debug, Parser)]
pub struct SimilarArgs {
    /// Kind of the source document; it is read from that kind's index
    #[arg(long, value_enum)]
    pub kind: DocumentKind,

    /// Index to search for similar documents
    pub index: String,

    /// Id of the source document
    pub id: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Posts --

#[derive(Debug, Subcommand)]
pub enum PostAction {
    /// Create a post
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
        #[arg(long, default_value = "")]
        author: String,
    },
    /// Change the title or content of a post
    Update {
        id: u64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
    },
    /// Delete a post
    Remove { id: u64 },
    /// Print a post from the store
    Show {
        id: u64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// -- Books --

#[derive(Debug, Subcommand)]
pub enum BookAction {
    /// Create a book
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        author: String,
        #[arg(long, default_value = "")]
        isbn: String,
        #[arg(long, default_value = "")]
        intro: String,
    },
    /// Change any of the fields of a book
    Update {
        id: u64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        isbn: Option<String>,
        #[arg(long)]
        intro: Option<String>,
    },
    /// Delete a book
    Remove { id: u64 },
}
