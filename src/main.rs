use std::sync::Arc;

use clap::Parser;
use docmirror::{
    Config,
    DataDir,
    DocumentWriter,
    Engine,
    EntityStore,
    Indexable,
    Mirror,
    QueryService,
    document::{BookDocument, CommentDocument, PostDocument},
    engine::Refresh,
    error::{self, Error},
    store::{Book, Post},
};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{
    BookAction,
    Cli,
    Command,
    DocumentKind,
    GetArgs,
    IndexArgs,
    PostAction,
    SearchArgs,
    SimilarArgs,
};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCMIRROR_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

#[tokio::main]
async fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config = Config::load(&data_dir, cli.config.as_deref())?;
    let engine = Arc::new(Engine::connect(&config.engine)?);
    let writer = DocumentWriter::new(Arc::clone(&engine));

    match cli.command {
        Command::Ensure { index } => {
            writer.indexes().ensure_index(&index).await?;
            println!("Index '{index}' is ready");
        }
        Command::Close { index } => {
            writer.indexes().close_index(&index).await?;
            println!("Closed index '{index}'");
        }
        Command::Index(args) => cmd_index(&writer, args).await?,
        Command::Get(args) => {
            let queries = QueryService::new(engine);
            match args.kind {
                DocumentKind::Post => {
                    cmd_get::<PostDocument>(&queries, &args).await?
                }
                DocumentKind::Book => {
                    cmd_get::<BookDocument>(&queries, &args).await?
                }
                DocumentKind::Comment => {
                    cmd_get::<CommentDocument>(&queries, &args).await?
                }
            }
        }
        Command::Remove {
            index,
            id,
            no_refresh,
        } => {
            writer
                .remove_document(&index, &id, refresh(no_refresh))
                .await?;
            println!("Removed '{id}' from '{index}'");
        }
        Command::Search(args) => {
            let queries = QueryService::new(engine).with_size(args.count);
            match args.kind {
                DocumentKind::Post => {
                    cmd_search::<PostDocument>(&queries, &args).await?
                }
                DocumentKind::Book => {
                    cmd_search::<BookDocument>(&queries, &args).await?
                }
                DocumentKind::Comment => {
                    cmd_search::<CommentDocument>(&queries, &args).await?
                }
            }
        }
        Command::Similar(args) => {
            let queries = QueryService::new(engine).with_size(args.count);
            match args.kind {
                DocumentKind::Post => {
                    cmd_similar::<PostDocument>(&queries, &args).await?
                }
                DocumentKind::Book => {
                    cmd_similar::<BookDocument>(&queries, &args).await?
                }
                DocumentKind::Comment => {
                    cmd_similar::<CommentDocument>(&queries, &args).await?
                }
            }
        }
        Command::Post { action } => {
            let mirror = open_mirror(&config, writer)?;
            cmd_post(&mirror, action).await?;
        }
        Command::Book { action } => {
            let mirror = open_mirror(&config, writer)?;
            cmd_book(&mirror, action).await?;
        }
    }

    Ok(())
}

fn refresh(no_refresh: bool) -> Refresh {
    if no_refresh {
        Refresh::Deferred
    } else {
        Refresh::Immediate
    }
}

fn open_mirror(
    config: &Config,
    writer: DocumentWriter<Engine>,
) -> error::Result<Mirror<Engine>> {
    let store = EntityStore::open(&config.store_path)?;
    Ok(Mirror::new(Arc::new(store), writer))
}

async fn cmd_index(
    writer: &DocumentWriter<Engine>,
    args: IndexArgs,
) -> error::Result<()> {
    let refresh = refresh(args.no_refresh);
    let id = args.id.clone();
    let kind = args.kind;
    match args.kind {
        DocumentKind::Post => {
            let doc = PostDocument::new(args.id, args.title, args.content);
            writer.index_document(&doc, refresh).await?;
        }
        DocumentKind::Book => {
            let doc = BookDocument {
                id: args.id,
                title: args.title,
                content: args.content,
                author: args.author,
                isbn: args.isbn,
                score: 0.0,
            };
            writer.index_document(&doc, refresh).await?;
        }
        DocumentKind::Comment => {
            let doc = CommentDocument {
                id: args.id,
                post_id: args.post_id,
                content: args.content,
                score: 0.0,
            };
            writer.index_document(&doc, refresh).await?;
        }
    }
    println!("Indexed '{id}' into '{}'", kind.default_index());
    Ok(())
}

async fn cmd_get<T: Indexable>(
    queries: &QueryService<Engine>,
    args: &GetArgs,
) -> error::Result<()> {
    let doc: T = queries.get(&args.index, &args.id).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        println!("id: {}", doc.id());
        println!("title: {}", doc.title());
        println!();
        println!("{}", doc.content());
    }
    Ok(())
}

async fn cmd_search<T: Indexable>(
    queries: &QueryService<Engine>,
    args: &SearchArgs,
) -> error::Result<()> {
    let docs: Vec<T> = if args.scores {
        queries.search_with_scores(&args.index, &args.query).await?
    } else {
        let fields: Vec<&str> =
            args.fields.iter().map(String::as_str).collect();
        queries.search(&args.index, &args.query, &fields).await?
    };
    print_results(&docs, args.json, args.scores)
}

async fn cmd_similar<T: Indexable>(
    queries: &QueryService<Engine>,
    args: &SimilarArgs,
) -> error::Result<()> {
    let source: T = queries.get(T::INDEX_NAME, &args.id).await?;
    let docs = queries.find_similar(&args.index, &source).await?;
    print_results(&docs, args.json, true)
}

fn print_results<T: Indexable>(
    docs: &[T],
    json: bool,
    scores: bool,
) -> error::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(docs)?);
        return Ok(());
    }
    if docs.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    for (rank, doc) in docs.iter().enumerate() {
        if scores {
            println!("{:>3}. [{:.3}] #{}", rank + 1, doc.score(), doc.id());
        } else {
            println!("{:>3}. #{}", rank + 1, doc.id());
        }
        if !doc.title().is_empty() {
            println!("     {}", doc.title());
        }
    }
    println!("\n{} result(s)", docs.len());
    Ok(())
}

async fn cmd_post(
    mirror: &Mirror<Engine>,
    action: PostAction,
) -> error::Result<()> {
    match action {
        PostAction::Add {
            title,
            content,
            author,
        } => {
            let post = mirror
                .create_post(Post {
                    id: 0,
                    author,
                    title,
                    content,
                })
                .await?;
            println!("Added post {}", post.id);
        }
        PostAction::Update { id, title, content } => {
            let mut post = mirror.store().get_post(id)?.ok_or_else(|| {
                Error::NotFound {
                    kind: "post",
                    name: id.to_string(),
                }
            })?;
            if let Some(title) = title {
                post.title = title;
            }
            if let Some(content) = content {
                post.content = content;
            }
            mirror.update_post(&post).await?;
            println!("Updated post {id}");
        }
        PostAction::Remove { id } => {
            mirror.delete_post(id).await?;
            println!("Removed post {id}");
        }
        PostAction::Show { id, json } => {
            let post = mirror.store().get_post(id)?.ok_or_else(|| {
                Error::NotFound {
                    kind: "post",
                    name: id.to_string(),
                }
            })?;
            if json {
                println!("{}", serde_json::to_string_pretty(&post)?);
            } else {
                println!("id: {}", post.id);
                println!("title: {}", post.title);
                if !post.author.is_empty() {
                    println!("author: {}", post.author);
                }
                println!();
                println!("{}", post.content);
            }
        }
    }
    Ok(())
}

async fn cmd_book(
    mirror: &Mirror<Engine>,
    action: BookAction,
) -> error::Result<()> {
    match action {
        BookAction::Add {
            name,
            author,
            isbn,
            intro,
        } => {
            let book = mirror
                .create_book(Book {
                    id: 0,
                    name,
                    author,
                    isbn,
                    intro,
                })
                .await?;
            println!("Added book {}", book.id);
        }
        BookAction::Update {
            id,
            name,
            author,
            isbn,
            intro,
        } => {
            let mut book = mirror.store().get_book(id)?.ok_or_else(|| {
                Error::NotFound {
                    kind: "book",
                    name: id.to_string(),
                }
            })?;
            if let Some(name) = name {
                book.name = name;
            }
            if let Some(author) = author {
                book.author = author;
            }
            if let Some(isbn) = isbn {
                book.isbn = isbn;
            }
            if let Some(intro) = intro {
                book.intro = intro;
            }
            mirror.update_book(&book).await?;
            println!("Updated book {id}");
        }
        BookAction::Remove { id } => {
            mirror.delete_book(id).await?;
            println!("Removed book {id}");
        }
    }
    Ok(())
}
