//! hiergraph command-line interface.
//!
//! Provides the `hiergraph` binary for importing, inspecting and editing
//! hierarchies kept in a SQLite database.
//!
//! Configuration comes from environment variables:
//! - `HIERGRAPH_DB`: database file path (default: "hiergraph.db"), overridden
//!   by `--db`
//! - `HIERGRAPH_LOG`: tracing filter (default: "warn")
//!
//! Exit codes: 0 = success, 1 = invalid input or domain error, 2 = hierarchy
//! left with pending links, 3 = I/O or storage error.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use hiergraph_core::GraphId;
use hiergraph_hierarchy::{GraphEdit, Hierarchy, HierarchyError, PropagationEngine, PropagationOptions};
use hiergraph_storage::{
    hash_all_graphs, save_incremental, HierarchyId, HierarchyStore, HierarchySummary, SqliteStore,
    StorageError,
};

const DB_ENV: &str = "HIERGRAPH_DB";
const LOG_ENV: &str = "HIERGRAPH_LOG";
const DEFAULT_DB: &str = "hiergraph.db";

const EXIT_OK: i32 = 0;
const EXIT_INVALID: i32 = 1;
const EXIT_NOT_CLOSED: i32 = 2;
const EXIT_IO: i32 = 3;

/// Hierarchies of typed graphs.
#[derive(Parser)]
#[command(name = "hiergraph", about = "Hierarchies of typed graphs linked by homomorphisms")]
struct Cli {
    /// Path to the database file (default: $HIERGRAPH_DB or hiergraph.db).
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Import a hierarchy from a JSON document.
    Import {
        /// Path to the JSON document.
        file: PathBuf,

        /// Name to store it under (default: the file stem).
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Export a stored hierarchy as JSON.
    Export {
        name: String,

        /// Output file (default: stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List stored hierarchies.
    List,

    /// Print a hierarchy, or one of its graphs.
    Show {
        name: String,

        #[arg(short, long)]
        graph: Option<String>,
    },

    /// Revalidate every link; exits with 2 if any link is pending.
    Check { name: String },

    /// Apply a JSON graph edit and propagate it through the hierarchy.
    Rewrite {
        name: String,

        /// Graph to edit.
        graph: String,

        /// Path to the edit document (`{"ops": [...]}`).
        edit: PathBuf,

        /// Leave broken links pending instead of repairing them.
        #[arg(long)]
        no_propagate: bool,

        /// Upper bound on repair steps.
        #[arg(long, default_value_t = 1024)]
        max_repairs: usize,
    },

    /// Remove a graph and its links.
    RemoveGraph {
        name: String,

        graph: String,

        /// Bridge each predecessor to each successor by composition.
        #[arg(long)]
        reconnect: bool,
    },
}

/// A failed command: the message for stderr and the exit code.
#[derive(Debug)]
struct Failure {
    code: i32,
    message: String,
}

impl Failure {
    fn invalid(message: impl Into<String>) -> Self {
        Failure {
            code: EXIT_INVALID,
            message: message.into(),
        }
    }

    fn io(message: impl Into<String>) -> Self {
        Failure {
            code: EXIT_IO,
            message: message.into(),
        }
    }
}

impl From<StorageError> for Failure {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Sqlite(_) | StorageError::Migration(_) | StorageError::Serialization(_) => {
                Failure::io(err.to_string())
            }
            _ => Failure::invalid(err.to_string()),
        }
    }
}

impl From<HierarchyError> for Failure {
    fn from(err: HierarchyError) -> Self {
        Failure::invalid(err.to_string())
    }
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let db = resolve_db(cli.db);

    let code = match run(&db, cli.command) {
        Ok(code) => code,
        Err(failure) => {
            eprintln!("Error: {}", failure.message);
            failure.code
        }
    };
    process::exit(code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// `--db` wins over `HIERGRAPH_DB`, which wins over the default.
fn resolve_db(flag: Option<String>) -> String {
    flag.unwrap_or_else(|| std::env::var(DB_ENV).unwrap_or_else(|_| DEFAULT_DB.to_string()))
}

/// Executes one subcommand against the database at `db`.
fn run(db: &str, command: Commands) -> Result<i32, Failure> {
    let mut store = SqliteStore::new(db)
        .map_err(|e| Failure::io(format!("failed to open database '{}': {}", db, e)))?;

    match command {
        Commands::Import { file, name } => {
            let name = match name {
                Some(name) => name,
                None => file_stem(&file)?,
            };
            let hierarchy = read_hierarchy(&file)?;
            let id = store.create_hierarchy(&name, hierarchy.is_directed())?;
            if let Err(err) = store.save_hierarchy(id, &hierarchy) {
                store.delete_hierarchy(id)?;
                return Err(err.into());
            }
            info!(hierarchy = id.0, %name, "imported");
            println!("{}", id.0);
            Ok(closed_code(&hierarchy))
        }
        Commands::Export { name, output } => {
            let (_, hierarchy) = load(&store, &name)?;
            let json = serde_json::to_string_pretty(&hierarchy)
                .map_err(|e| Failure::invalid(format!("failed to serialize '{}': {}", name, e)))?;
            match output {
                Some(path) => fs::write(&path, json + "\n")
                    .map_err(|e| Failure::io(format!("failed to write '{}': {}", path.display(), e)))?,
                None => println!("{}", json),
            }
            Ok(EXIT_OK)
        }
        Commands::List => {
            print!("{}", render_list(&store.list_hierarchies()?));
            Ok(EXIT_OK)
        }
        Commands::Show { name, graph } => {
            let (_, hierarchy) = load(&store, &name)?;
            match graph {
                Some(graph) => print!("{}", hierarchy.graph(&GraphId::from(graph))?),
                None => print!("{}", hierarchy),
            }
            Ok(EXIT_OK)
        }
        Commands::Check { name } => {
            // Loading already revalidated every settled link.
            let (_, hierarchy) = load(&store, &name)?;
            match hierarchy.check() {
                Ok(()) | Err(HierarchyError::LinkPending { .. }) => {}
                Err(err) => return Err(err.into()),
            }
            for (from, to) in hierarchy.pending_links() {
                println!("pending: {} -> {}", from, to);
            }
            Ok(closed_code(&hierarchy))
        }
        Commands::Rewrite {
            name,
            graph,
            edit,
            no_propagate,
            max_repairs,
        } => {
            let (id, mut hierarchy) = load(&store, &name)?;
            let previous = hash_all_graphs(&hierarchy)?;
            let graph = GraphId::from(graph);
            let edit = read_edit(&edit)?;

            let outcome = hierarchy.rewrite(&graph, &edit)?;
            if !no_propagate {
                let options = PropagationOptions::default().with_max_repairs(max_repairs);
                let report = PropagationEngine::propagate(&mut hierarchy, &graph, &outcome, &options)?;
                let json = serde_json::to_string_pretty(&report)
                    .map_err(|e| Failure::invalid(format!("failed to serialize report: {}", e)))?;
                println!("{}", json);
            }
            let dirty = save_incremental(&mut store, id, &hierarchy, &previous)?;
            info!(hierarchy = id.0, saved = dirty.total(), "rewrite saved");
            Ok(closed_code(&hierarchy))
        }
        Commands::RemoveGraph {
            name,
            graph,
            reconnect,
        } => {
            let (id, mut hierarchy) = load(&store, &name)?;
            let previous = hash_all_graphs(&hierarchy)?;
            hierarchy.remove_graph(&GraphId::from(graph), reconnect)?;
            let dirty = save_incremental(&mut store, id, &hierarchy, &previous)?;
            info!(hierarchy = id.0, saved = dirty.total(), "graph removed");
            Ok(closed_code(&hierarchy))
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load(store: &SqliteStore, name: &str) -> Result<(HierarchyId, Hierarchy), Failure> {
    let id = store
        .find_hierarchy(name)?
        .ok_or_else(|| Failure::invalid(format!("no hierarchy named '{}'", name)))?;
    Ok((id, store.load_hierarchy(id)?))
}

fn closed_code(hierarchy: &Hierarchy) -> i32 {
    if hierarchy.is_closed() {
        EXIT_OK
    } else {
        eprintln!("hierarchy has {} pending link(s)", hierarchy.pending_links().len());
        EXIT_NOT_CLOSED
    }
}

fn read_file(path: &Path) -> Result<String, Failure> {
    fs::read_to_string(path).map_err(|e| Failure::io(format!("failed to read '{}': {}", path.display(), e)))
}

fn read_hierarchy(path: &Path) -> Result<Hierarchy, Failure> {
    serde_json::from_str(&read_file(path)?)
        .map_err(|e| Failure::invalid(format!("invalid hierarchy '{}': {}", path.display(), e)))
}

fn read_edit(path: &Path) -> Result<GraphEdit, Failure> {
    serde_json::from_str(&read_file(path)?)
        .map_err(|e| Failure::invalid(format!("invalid edit '{}': {}", path.display(), e)))
}

fn file_stem(path: &Path) -> Result<String, Failure> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .ok_or_else(|| Failure::invalid(format!("cannot derive a name from '{}'", path.display())))
}

fn render_list(summaries: &[HierarchySummary]) -> String {
    let mut out = String::new();
    for s in summaries {
        let kind = if s.directed { "directed" } else { "undirected" };
        out.push_str(&format!(
            "{}\t{}\t{}\t{} graphs\t{} links\n",
            s.id.0, s.name, kind, s.graph_count, s.link_count
        ));
    }
    out
}
