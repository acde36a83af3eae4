//! doclite CLI - Command-line shell for doclite databases.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use doclite_core::{DeleteOptions, SortOrder, StoreConfig, UpdateOptions};
use doclite_store::Store;

/// doclite - embedded Mongo-style document store on SQLite
#[derive(Parser)]
#[command(name = "doclite")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database path (default: ~/.doclite/db.sqlite)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert a JSON document into a collection
    Insert {
        /// Collection name
        collection: String,

        /// Document as a JSON object
        document: String,
    },

    /// Find documents matching a query
    Find {
        /// Collection name
        collection: String,

        /// Query document (default: match all)
        #[arg(default_value = "{}")]
        query: String,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<u64>,
    },

    /// Count documents matching a query
    Count {
        /// Collection name
        collection: String,

        /// Query document (default: match all)
        #[arg(default_value = "{}")]
        query: String,
    },

    /// Apply an update document to matching rows
    Update {
        /// Collection name
        collection: String,

        /// Query document
        query: String,

        /// Update document (operators or replacement)
        update: String,

        /// Update every matching document
        #[arg(short, long)]
        multi: bool,

        /// Insert when nothing matches
        #[arg(short, long)]
        upsert: bool,
    },

    /// Delete documents matching a query
    Delete {
        /// Collection name
        collection: String,

        /// Query document
        query: String,

        /// Delete at most one document
        #[arg(short, long)]
        just_one: bool,
    },

    /// Materialize an array index on a JSON path
    IndexArray {
        /// Collection name
        collection: String,

        /// JSON dot-path of the array
        path: String,
    },
}

fn get_db_path(arg: Option<PathBuf>) -> PathBuf {
    if let Some(path) = arg {
        return path;
    }

    let home = dirs::home_dir().expect("Could not determine home directory");
    home.join(".doclite").join("db.sqlite")
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn parse_json(label: &str, text: &str) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    serde_json::from_str(text).map_err(|e| format!("invalid {} JSON: {}", label, e).into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let db_path = get_db_path(cli.database);
    let store = Store::open(StoreConfig::at(&db_path)).await?;

    match cli.command {
        Commands::Insert {
            collection,
            document,
        } => {
            let doc = parse_json("document", &document)?;
            let col = store.collection(&collection, None).await?;
            let inserted = col.insert(&doc).await?;
            println!("{}", serde_json::to_string_pretty(&inserted)?);
        }
        Commands::Find {
            collection,
            query,
            limit,
        } => {
            let q = parse_json("query", &query)?;
            let col = store.collection(&collection, None).await?;
            let mut cursor = col.query(q);
            if let Some(n) = limit {
                cursor = cursor.limit(n);
            }
            for doc in cursor.to_vec().await? {
                println!("{}", serde_json::to_string(&doc)?);
            }
        }
        Commands::Count { collection, query } => {
            let q = parse_json("query", &query)?;
            let col = store.collection(&collection, None).await?;
            println!("{}", col.count(&q).await?);
        }
        Commands::Update {
            collection,
            query,
            update,
            multi,
            upsert,
        } => {
            let q = parse_json("query", &query)?;
            let u = parse_json("update", &update)?;
            let col = store.collection(&collection, None).await?;
            col.update(&q, &u, UpdateOptions { multi, upsert }).await?;
            println!("ok");
        }
        Commands::Delete {
            collection,
            query,
            just_one,
        } => {
            let q = parse_json("query", &query)?;
            let col = store.collection(&collection, None).await?;
            let removed = col.delete(&q, DeleteOptions { just_one }).await?;
            println!("deleted {}", removed);
        }
        Commands::IndexArray { collection, path } => {
            let col = store.collection(&collection, None).await?;
            col.ensure_array_index(&path, SortOrder::Ascending).await?;
            println!("indexed {}.{}", collection, path);
        }
    }

    Ok(())
}
