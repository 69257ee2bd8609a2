//! Docket: collections of JSON documents with history and attachments.
//!
//! A collection is a directory holding a `collection.json` metadata file
//! and one of two storage backends:
//!
//! - **pairtree**: each document is a file in a sharded directory tree,
//!   with history snapshots and binary attachments alongside it
//! - **SQL**: each document is a row in a `(_Key, src, created, updated,
//!   version)` table with a `_history` twin recording every version
//!
//! Both backends expose the same create/read/update/delete/keys semantics
//! and the same versioning guarantees through
//! [`core::collection::Collection`]. The CLI here and a front-end daemon
//! are both thin layers over that facade.
//!
//! # Example
//!
//! ```bash
//! docket init data.ds
//! echo '{"title":"x"}' | docket create data.ds one
//! docket read data.ds one
//! docket check data.ds
//! ```
//!
//! # Crate structure
//!
//! - [`core::collection`]: the backend-agnostic facade
//! - [`core::ptstore`] / [`core::sqlstore`]: the two storage backends
//! - [`core::keymap`]: the key registry for pairtree collections
//! - [`core::check`]: integrity checking and repair
//! - [`core::query`]: raw SQL passthrough with JSON output

pub mod core;

use crate::core::collection::Collection;
use crate::core::error::DocketError;
use crate::core::{check, service};

use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::Value as JsonValue;
use std::fs;
use std::io::Read;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "docket",
    version = env!("CARGO_PKG_VERSION"),
    about = "Collections of JSON documents with history and attachments"
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize a collection. An empty DSN URI selects pairtree storage.
    Init {
        collection: String,
        /// DSN URI, e.g. sqlite://collection.db
        dsn_uri: Option<String>,
    },
    /// Remove a collection and everything stored in it.
    DeleteCollection { collection: String },
    /// Create a document. JSON is read from the argument or stdin.
    Create {
        collection: String,
        key: String,
        json: Option<String>,
    },
    /// Read a document, optionally a specific historical version.
    Read {
        collection: String,
        key: String,
        #[clap(long)]
        version: Option<i64>,
    },
    /// Update a document. JSON is read from the argument or stdin.
    Update {
        collection: String,
        key: String,
        json: Option<String>,
    },
    /// Delete a document's current state. History is retained.
    Delete { collection: String, key: String },
    /// List the keys in a collection, sorted.
    Keys { collection: String },
    /// Test whether a key exists (prints true/false).
    Haskey { collection: String, key: String },
    /// List the stored versions of a document.
    Versions { collection: String, key: String },
    /// Attach a file to a document under a semver (pairtree only).
    Attach {
        collection: String,
        key: String,
        semver: String,
        file: PathBuf,
    },
    /// Retrieve an attachment to stdout or a file.
    Retrieve {
        collection: String,
        key: String,
        semver: String,
        filename: String,
        #[clap(long, short)]
        output: Option<PathBuf>,
    },
    /// Remove a single attachment file.
    Prune {
        collection: String,
        key: String,
        semver: String,
        filename: String,
    },
    /// List a document's attachments as semver/filename pairs.
    Attachments { collection: String, key: String },
    /// Check a collection's metadata and storage for consistency.
    Check { collection: String },
    /// Repair an inconsistent collection where possible.
    Repair { collection: String },
    /// Run a SQL statement against a SQL collection (JSON rows out).
    Query {
        collection: String,
        stmt: String,
        /// Positional statement parameters.
        params: Vec<String>,
        /// Emit JSON-lines instead of one JSON array.
        #[clap(long)]
        jsonl: bool,
    },
    /// List collections found under a directory.
    Collections { dir: Option<PathBuf> },
}

fn json_arg(arg: Option<String>) -> Result<JsonValue, DocketError> {
    let text = match arg {
        Some(text) => text,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    serde_json::from_str(&text)
        .map_err(|e| DocketError::ValidationError(format!("invalid JSON: {}", e)))
}

fn print_doc(doc: &crate::core::collection::Document) -> Result<(), DocketError> {
    let out = serde_json::to_string_pretty(doc)
        .map_err(|e| DocketError::ValidationError(e.to_string()))?;
    println!("{}", out);
    Ok(())
}

pub fn run() -> Result<(), DocketError> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init {
            collection,
            dsn_uri,
        } => {
            let mut c = Collection::init(&collection, dsn_uri.as_deref().unwrap_or(""))?;
            c.close()?;
            println!("initialized {}", collection);
        }
        Command::DeleteCollection { collection } => {
            Collection::delete_collection(&collection)?;
            println!("deleted {}", collection);
        }
        Command::Create {
            collection,
            key,
            json,
        } => {
            let src = json_arg(json)?;
            let mut c = Collection::open(&collection)?;
            let doc = c.create(&key, &src)?;
            c.close()?;
            println!("created {} (version {})", doc.key, doc.version);
        }
        Command::Read {
            collection,
            key,
            version,
        } => {
            let c = Collection::open(&collection)?;
            let doc = match version {
                Some(v) => c.read_version(&key, v)?,
                None => c.read(&key)?,
            };
            print_doc(&doc)?;
        }
        Command::Update {
            collection,
            key,
            json,
        } => {
            let src = json_arg(json)?;
            let mut c = Collection::open(&collection)?;
            let doc = c.update(&key, &src)?;
            c.close()?;
            println!("updated {} (version {})", doc.key, doc.version);
        }
        Command::Delete { collection, key } => {
            let mut c = Collection::open(&collection)?;
            c.delete(&key)?;
            c.close()?;
            println!("deleted {}", key);
        }
        Command::Keys { collection } => {
            let c = Collection::open(&collection)?;
            for key in c.keys()? {
                println!("{}", key);
            }
        }
        Command::Haskey { collection, key } => {
            let c = Collection::open(&collection)?;
            println!("{}", c.has_key(&key)?);
        }
        Command::Versions { collection, key } => {
            let c = Collection::open(&collection)?;
            for v in c.versions(&key)? {
                println!("{}", v);
            }
        }
        Command::Attach {
            collection,
            key,
            semver,
            file,
        } => {
            let data = fs::read(&file)?;
            let filename = file
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .ok_or_else(|| {
                    DocketError::ValidationError(format!("no file name in {}", file.display()))
                })?;
            let mut c = Collection::open(&collection)?;
            c.attach(&key, &semver, &filename, &data)?;
            c.close()?;
            println!("attached {} to {} at {}", filename, key, semver);
        }
        Command::Retrieve {
            collection,
            key,
            semver,
            filename,
            output,
        } => {
            let mut c = Collection::open(&collection)?;
            let data = c.retrieve(&key, &semver, &filename)?;
            match output {
                Some(path) => fs::write(path, data)?,
                None => {
                    use std::io::Write;
                    std::io::stdout().write_all(&data)?;
                }
            }
        }
        Command::Prune {
            collection,
            key,
            semver,
            filename,
        } => {
            let mut c = Collection::open(&collection)?;
            c.prune(&key, &semver, &filename)?;
            c.close()?;
            println!("pruned {} from {} at {}", filename, key, semver);
        }
        Command::Attachments { collection, key } => {
            let mut c = Collection::open(&collection)?;
            for name in c.attachments(&key)? {
                println!("{}", name);
            }
        }
        Command::Check { collection } => {
            let report = check::check(&collection)?;
            match report.status {
                check::CheckStatus::Consistent => {
                    println!("{} {}", collection, "consistent".green())
                }
                status => {
                    println!("{} {}", collection, status.to_string().red());
                    for p in &report.problems {
                        println!("  {}: {} ({})", p.key, p.kind, p.detail);
                    }
                }
            }
        }
        Command::Repair { collection } => {
            let report = check::repair(&collection)?;
            for action in &report.repaired {
                println!("{} {}: {}", "repaired".green(), action.key, action.action);
            }
            for action in &report.unrepairable {
                println!("{} {}: {}", "unrepairable".red(), action.key, action.action);
            }
            println!("{} {}", collection, report.status);
        }
        Command::Query {
            collection,
            stmt,
            params,
            jsonl,
        } => {
            let c = Collection::open(&collection)?;
            let out = c.query(&stmt, &params, jsonl)?;
            println!("{}", out);
        }
        Command::Collections { dir } => {
            let dir = dir.unwrap_or_else(|| PathBuf::from("."));
            for name in service::discover(&dir)? {
                println!("{}", name);
            }
        }
    }
    Ok(())
}
