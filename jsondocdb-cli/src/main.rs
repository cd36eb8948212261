use clap::{Parser, Subcommand, ValueEnum};
use jsondocdb::{Database, DocDbError, IndexDefinition, KeyRange, OpenOptions, Scalar};
use serde_json::{json, Map, Value};
use std::io::Read;
use std::process;

/// jsondocdb: inspect and edit a JSON document store from the command line
#[derive(Parser)]
#[command(name = "jsondocdb", version, about)]
struct Cli {
    /// Path to the database file
    #[arg(long, short, default_value = "jsondocdb.db")]
    db: String,

    /// Output format
    #[arg(long, default_value = "json")]
    format: OutputFormat,

    /// Open the database without write access
    #[arg(long)]
    read_only: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

/// What `load` does with a document whose id is already taken.
#[derive(Clone, Copy, ValueEnum)]
enum Conflict {
    /// Fail the whole load
    Add,
    /// Fail only if the stored document differs
    Check,
    /// Overwrite the stored document
    Update,
    /// Keep the stored document
    Skip,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new, empty database file
    Create,

    /// Show document and index counts
    Info,

    /// Get a single document by ID
    Get {
        /// Document ID
        id: String,
    },

    /// Store a document (JSON object text, '@file', or '-' to read stdin)
    Put {
        /// Document body
        body: String,
        /// Document ID (a fresh one is generated when omitted)
        #[arg(long)]
        id: Option<String>,
    },

    /// Delete a document
    Delete {
        /// Document ID
        id: String,
    },

    /// Write every document as one JSON object keyed by ID
    Dump {
        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<String>,
    },

    /// Load documents from a JSON object keyed by ID
    Load {
        /// Input file, or '-' for stdin
        input: String,
        /// Handling of IDs that already exist
        #[arg(long, value_enum, default_value = "add")]
        on_conflict: Conflict,
    },

    /// List index names
    Indexes,

    /// Show an index definition with its statistics
    Index {
        /// Index name
        name: String,
    },

    /// Define a new index and build it from the stored documents
    IndexCreate {
        /// Index name
        name: String,
        /// Dot path of the key inside each document
        keypath: String,
        /// Reject documents whose key is already present
        #[arg(long)]
        unique: bool,
        /// Only index documents for which this JSON expression is truthy
        #[arg(long)]
        require: Option<String>,
    },

    /// Delete an index and its entries
    IndexDelete {
        /// Index name
        name: String,
    },

    /// Find the documents with a key in an index
    Lookup {
        /// Index name
        index: String,
        /// Key (numbers and true/false are parsed, anything else is a string)
        key: String,
        /// Include the document bodies
        #[arg(long)]
        documents: bool,
    },

    /// List index entries with low <= key < high
    Range {
        /// Index name
        index: String,
        /// Smallest key to include
        #[arg(long)]
        low: Option<String>,
        /// First key to exclude
        #[arg(long)]
        high: Option<String>,
        /// Descending key order
        #[arg(long)]
        reverse: bool,
        /// Maximum number of entries
        #[arg(long)]
        limit: Option<u64>,
        /// Entries to skip first
        #[arg(long)]
        offset: Option<u64>,
        /// Include the document bodies
        #[arg(long)]
        documents: bool,
    },

    /// Copy the database into a new file
    Backup {
        /// Target path (must not exist)
        path: String,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let options = OpenOptions::new()
        .read_only(cli.read_only)
        .create_if_missing(false);
    let mut db = match cli.command {
        Command::Create => Database::create(&cli.db)?,
        _ => Database::open_with(&cli.db, &options)?,
    };

    match cli.command {
        Command::Create | Command::Info => {
            print_output(&serde_json::to_value(db.info()?)?, &cli.format)?;
        }

        Command::Get { id } => {
            let doc = db.get(&id)?;
            print_output(&doc, &cli.format)?;
        }

        Command::Put { body, id } => {
            let body = parse_json(&read_text(&body)?)?;
            let id = db.transaction(|db| match id {
                Some(id) => db.put(&id, body).map(|_| id),
                None => db.add(body),
            })?;
            print_output(&json!({ "ok": true, "id": id }), &cli.format)?;
        }

        Command::Delete { id } => {
            db.transaction(|db| db.delete(&id))?;
            print_output(&json!({ "ok": true, "deleted": id }), &cli.format)?;
        }

        Command::Dump { output } => {
            let mut all = Map::new();
            for entry in db.documents() {
                let (id, body) = entry?;
                all.insert(id, body);
            }
            let all = Value::Object(all);
            match output {
                Some(path) => {
                    std::fs::write(&path, serde_json::to_string_pretty(&all)?)?;
                    print_output(&json!({ "ok": true, "documents": db.len()? }), &cli.format)?;
                }
                None => print_output(&all, &cli.format)?,
            }
        }

        Command::Load { input, on_conflict } => {
            let text = if input == "-" {
                read_text(&input)?
            } else {
                std::fs::read_to_string(&input)
                    .map_err(|e| format!("Failed to read '{input}': {e}"))?
            };
            let docs = match parse_json(&text)? {
                Value::Object(docs) => docs,
                _ => return Err("load input must be a JSON object keyed by document ID".into()),
            };
            let (loaded, skipped) = db.transaction(|db| load(db, docs, on_conflict))?;
            print_output(
                &json!({ "ok": true, "loaded": loaded, "skipped": skipped }),
                &cli.format,
            )?;
        }

        Command::Indexes => {
            print_output(&json!(db.index_names()), &cli.format)?;
        }

        Command::Index { name } => {
            print_output(&serde_json::to_value(db.index(&name)?)?, &cli.format)?;
        }

        Command::IndexCreate {
            name,
            keypath,
            unique,
            require,
        } => {
            let mut definition = IndexDefinition::new(name.as_str(), keypath).unique(unique);
            if let Some(require) = require {
                definition = definition.require(parse_json(&require)?);
            }
            db.create_index(definition)?;
            print_output(&serde_json::to_value(db.index(&name)?)?, &cli.format)?;
        }

        Command::IndexDelete { name } => {
            db.delete_index(&name)?;
            print_output(&json!({ "ok": true, "deleted": name }), &cli.format)?;
        }

        Command::Lookup {
            index,
            key,
            documents,
        } => {
            let key = Scalar::parse_lenient(&key);
            let result = if documents {
                let docs: Map<String, Value> =
                    db.lookup_documents(&index, &key)?.into_iter().collect();
                Value::Object(docs)
            } else {
                json!(db.lookup(&index, &key)?)
            };
            print_output(&result, &cli.format)?;
        }

        Command::Range {
            index,
            low,
            high,
            reverse,
            limit,
            offset,
            documents,
        } => {
            let range = KeyRange {
                low: low.as_deref().map(Scalar::parse_lenient),
                high: high.as_deref().map(Scalar::parse_lenient),
                reverse,
                limit,
                offset,
            };
            let result: Vec<Value> = if documents {
                db.range_documents(&index, &range)?
                    .into_iter()
                    .map(|(id, key, body)| json!({ "id": id, "key": key, "document": body }))
                    .collect()
            } else {
                db.range(&index, &range)?
                    .into_iter()
                    .map(|(id, key)| json!({ "id": id, "key": key }))
                    .collect()
            };
            print_output(&Value::Array(result), &cli.format)?;
        }

        Command::Backup { path } => {
            db.backup(&path)?;
            print_output(&json!({ "ok": true, "backup": path }), &cli.format)?;
        }
    }

    Ok(())
}

/// Store every document of `docs`, returning how many were written and how
/// many were skipped.
fn load(
    db: &mut Database,
    docs: Map<String, Value>,
    on_conflict: Conflict,
) -> jsondocdb::Result<(usize, usize)> {
    let mut loaded = 0;
    let mut skipped = 0;
    for (id, body) in docs {
        if db.contains(&id)? {
            match on_conflict {
                Conflict::Add => return Err(DocDbError::DocumentExists(id)),
                Conflict::Check => {
                    if db.get(&id)? != body {
                        return Err(DocDbError::DocumentExists(format!(
                            "{id} (stored document differs)"
                        )));
                    }
                    skipped += 1;
                    continue;
                }
                Conflict::Skip => {
                    skipped += 1;
                    continue;
                }
                Conflict::Update => {}
            }
        }
        db.put(&id, body)?;
        loaded += 1;
    }
    log::debug!("Loaded {} documents, skipped {}", loaded, skipped);
    Ok((loaded, skipped))
}

fn print_output(value: &Value, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn parse_json(text: &str) -> Result<Value, Box<dyn std::error::Error>> {
    serde_json::from_str(text).map_err(|e| format!("Invalid JSON: {e}").into())
}

/// The argument itself, or the file it names when prefixed with '@', or
/// stdin for '-'.
fn read_text(arg: &str) -> Result<String, Box<dyn std::error::Error>> {
    if arg == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        Ok(text)
    } else if let Some(path) = arg.strip_prefix('@') {
        std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read '{path}': {e}").into())
    } else {
        Ok(arg.to_string())
    }
}
