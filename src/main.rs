use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use draftloom::chronicle::{ChronicleError, compile};
use draftloom::config::{
    EffectiveConfig, default_config_yaml, expand_tilde, load_effective_config,
};
use draftloom::outline::node::{NodeKind, NodeMetadata, NodeStatus};
use draftloom::outline::{
    NewNode, NodeUpdate, TreeError, create_node, delete_node, materialize_tree, move_node,
    update_node,
};
use draftloom::snapshot::{
    NewSnapshot, SnapshotError, create_snapshot, get_snapshot, reconstruct, snapshot_chain,
};
use draftloom::store::Store;
use serde_json::json;

const DB_FILE: &str = "outline.sqlite3";
const CONFIG_FILE: &str = "config.yml";

#[derive(Debug)]
struct CliError {
    code: &'static str,
    message: String,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn io(code: &'static str, err: io::Error) -> Self {
        Self::new(code, err.to_string())
    }
}

impl From<rusqlite::Error> for CliError {
    fn from(value: rusqlite::Error) -> Self {
        Self::new("sqlite_error", value.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::new("json_error", value.to_string())
    }
}

impl From<TreeError> for CliError {
    fn from(value: TreeError) -> Self {
        let code = match &value {
            TreeError::NotFound(_) => "not_found",
            TreeError::InvalidParent(_) => "invalid_parent",
            TreeError::CyclicMove(_) => "cyclic_move",
            TreeError::CorruptTree(_) => "corrupt_tree",
            TreeError::Storage(_) => "sqlite_error",
        };
        Self::new(code, value.to_string())
    }
}

impl From<SnapshotError> for CliError {
    fn from(value: SnapshotError) -> Self {
        let code = match &value {
            SnapshotError::NotFound(_) => "not_found",
            SnapshotError::ParentNotFound(_) => "parent_not_found",
            SnapshotError::InvalidLineage(_) => "invalid_lineage",
            SnapshotError::HashMismatch { .. } => "hash_mismatch",
            SnapshotError::Patch(_) => "patch_error",
            SnapshotError::Storage(_) => "sqlite_error",
        };
        Self::new(code, value.to_string())
    }
}

impl From<ChronicleError> for CliError {
    fn from(value: ChronicleError) -> Self {
        match value {
            ChronicleError::NotFound(id) => {
                Self::new("not_found", format!("volume `{id}` not found"))
            }
            ChronicleError::Tree(err) => err.into(),
            ChronicleError::Snapshot(err) => err.into(),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "draftloom")]
#[command(about = "A local-first outline tree and chapter snapshot engine for long-form writing")]
struct Cli {
    #[arg(long, global = true)]
    global: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Init,
    #[command(subcommand)]
    Node(NodeCommand),
    Tree(TreeArgs),
    #[command(subcommand)]
    Snapshot(SnapshotCommand),
    Chronicle(ChronicleArgs),
}

#[derive(Subcommand, Debug)]
enum NodeCommand {
    Add(NodeAddArgs),
    Update(NodeUpdateArgs),
    Move(NodeMoveArgs),
    Rm(NodeRmArgs),
}

#[derive(Args, Debug)]
struct NodeAddArgs {
    #[arg(long)]
    project: String,
    #[arg(long)]
    kind: String,
    #[arg(long)]
    parent: Option<String>,
    #[arg(long)]
    title: String,
    #[arg(long, default_value_t = 0)]
    goal: i64,
    #[arg(long)]
    summary: Option<String>,
    #[arg(long = "tag")]
    tags: Vec<String>,
    #[arg(long)]
    color: Option<String>,
    #[arg(long)]
    deadline: Option<String>,
}

#[derive(Args, Debug)]
struct NodeUpdateArgs {
    id: String,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    goal: Option<i64>,
    #[arg(long)]
    summary: Option<String>,
    #[arg(long = "tag")]
    tags: Vec<String>,
    #[arg(long)]
    color: Option<String>,
    #[arg(long)]
    deadline: Option<String>,
}

#[derive(Args, Debug)]
struct NodeMoveArgs {
    id: String,
    #[arg(long)]
    parent: Option<String>,
    #[arg(long)]
    order: i64,
}

#[derive(Args, Debug)]
struct NodeRmArgs {
    id: String,
}

#[derive(Args, Debug)]
struct TreeArgs {
    #[arg(long)]
    project: String,
}

#[derive(Subcommand, Debug)]
enum SnapshotCommand {
    Create(SnapshotCreateArgs),
    Log(SnapshotLogArgs),
    Show(SnapshotShowArgs),
}

#[derive(Args, Debug)]
struct SnapshotCreateArgs {
    #[arg(long)]
    chapter: String,
    #[arg(long, default_value = "")]
    summary: String,
    /// Read the chapter content from a file instead of stdin.
    #[arg(long)]
    file: Option<PathBuf>,
    /// Explicit parent snapshot; defaults to the chapter's current head.
    #[arg(long)]
    parent: Option<String>,
}

#[derive(Args, Debug)]
struct SnapshotLogArgs {
    #[arg(long)]
    chapter: String,
}

#[derive(Args, Debug)]
struct SnapshotShowArgs {
    id: String,
    /// Include the reconstructed chapter content.
    #[arg(long)]
    content: bool,
}

#[derive(Args, Debug)]
struct ChronicleArgs {
    #[arg(long)]
    volume: String,
}

#[derive(Debug, Clone)]
struct RepoPaths {
    root: PathBuf,
    database: PathBuf,
    repo_config: PathBuf,
    user_config: PathBuf,
    mode: StorageMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageMode {
    RepoLocal,
    Global,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let payload = json!({
                "error": {
                    "code": err.code,
                    "message": err.message,
                }
            });
            eprintln!("{payload}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().map_err(|err| CliError::io("cwd_error", err))?;
    let paths = repo_paths(&cwd, cli.global)?;
    match cli.command {
        Command::Init => cmd_init(&paths),
        Command::Node(command) => match command {
            NodeCommand::Add(args) => cmd_node_add(&paths, args),
            NodeCommand::Update(args) => cmd_node_update(&paths, args),
            NodeCommand::Move(args) => cmd_node_move(&paths, args),
            NodeCommand::Rm(args) => cmd_node_rm(&paths, args),
        },
        Command::Tree(args) => cmd_tree(&paths, args),
        Command::Snapshot(command) => match command {
            SnapshotCommand::Create(args) => cmd_snapshot_create(&paths, args),
            SnapshotCommand::Log(args) => cmd_snapshot_log(&paths, args),
            SnapshotCommand::Show(args) => cmd_snapshot_show(&paths, args),
        },
        Command::Chronicle(args) => cmd_chronicle(&paths, args),
    }
}

fn repo_paths(cwd: &Path, global: bool) -> Result<RepoPaths, CliError> {
    let home = home_dir()?;
    let user_root = home.join(".draftloom");
    let (root, mode) = if global {
        (user_root.clone(), StorageMode::Global)
    } else {
        (cwd.join(".draftloom"), StorageMode::RepoLocal)
    };
    Ok(RepoPaths {
        database: root.join(DB_FILE),
        repo_config: root.join(CONFIG_FILE),
        user_config: user_root.join(CONFIG_FILE),
        root,
        mode,
    })
}

fn home_dir() -> Result<PathBuf, CliError> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .ok_or_else(|| CliError::new("home_error", "cannot resolve the home directory"))
}

fn cmd_init(paths: &RepoPaths) -> Result<(), CliError> {
    fs::create_dir_all(&paths.root).map_err(|err| CliError::io("mkdir_error", err))?;
    if !paths.repo_config.exists() {
        fs::write(&paths.repo_config, default_config_yaml())
            .map_err(|err| CliError::io("write_error", err))?;
    }
    let config = effective_config(paths)?;
    let database = database_path(paths, &config)?;
    let _ = Store::open(&database)?;

    print_json(&json!({
        "status": "ok",
        "draftloom_dir": paths.root,
        "database": database,
        "mode": match paths.mode {
            StorageMode::RepoLocal => "repo",
            StorageMode::Global => "global",
        },
    }))
}

fn effective_config(paths: &RepoPaths) -> Result<EffectiveConfig, CliError> {
    load_effective_config(Some(&paths.repo_config), Some(&paths.user_config))
        .map_err(|err| CliError::new("config_error", err.to_string()))
}

fn open_store(paths: &RepoPaths) -> Result<Store, CliError> {
    let config = effective_config(paths)?;
    open_store_with(paths, &config)
}

fn open_store_with(paths: &RepoPaths, config: &EffectiveConfig) -> Result<Store, CliError> {
    if !paths.root.is_dir() {
        return Err(CliError::new(
            "not_initialized",
            format!(
                "`{}` does not exist; run `draftloom init` first",
                paths.root.display()
            ),
        ));
    }
    Ok(Store::open(&database_path(paths, config)?)?)
}

fn database_path(paths: &RepoPaths, config: &EffectiveConfig) -> Result<PathBuf, CliError> {
    match &config.database {
        Some(path) => {
            let home = home_dir()?;
            Ok(expand_tilde(&path.to_string_lossy(), &home))
        }
        None => Ok(paths.database.clone()),
    }
}

fn cmd_node_add(paths: &RepoPaths, args: NodeAddArgs) -> Result<(), CliError> {
    let store = open_store(paths)?;
    let kind = NodeKind::parse(&args.kind)
        .ok_or_else(|| CliError::new("invalid_kind", format!("unknown node kind `{}`", args.kind)))?;
    let metadata = NodeMetadata {
        summary: args.summary,
        tags: args.tags,
        color: args.color,
        deadline: args.deadline,
    };
    let node = create_node(
        &store,
        NewNode {
            project_id: &args.project,
            kind,
            parent_id: args.parent.as_deref(),
            title: &args.title,
            word_count_goal: args.goal,
            metadata,
        },
    )?;
    print_json(&serde_json::to_value(&node)?)
}

fn cmd_node_update(paths: &RepoPaths, args: NodeUpdateArgs) -> Result<(), CliError> {
    let store = open_store(paths)?;
    let status = match &args.status {
        Some(raw) => Some(NodeStatus::parse(raw).ok_or_else(|| {
            CliError::new("invalid_status", format!("unknown node status `{raw}`"))
        })?),
        None => None,
    };

    let touches_metadata = args.summary.is_some()
        || !args.tags.is_empty()
        || args.color.is_some()
        || args.deadline.is_some();
    let metadata = if touches_metadata {
        let current = store
            .get_node(&args.id)?
            .ok_or_else(|| CliError::new("not_found", format!("node `{}` not found", args.id)))?
            .metadata;
        Some(NodeMetadata {
            summary: args.summary.or(current.summary),
            tags: if args.tags.is_empty() {
                current.tags
            } else {
                args.tags
            },
            color: args.color.or(current.color),
            deadline: args.deadline.or(current.deadline),
        })
    } else {
        None
    };

    let node = update_node(
        &store,
        &args.id,
        NodeUpdate {
            title: args.title,
            status,
            word_count_goal: args.goal,
            metadata,
        },
    )?;
    print_json(&serde_json::to_value(&node)?)
}

fn cmd_node_move(paths: &RepoPaths, args: NodeMoveArgs) -> Result<(), CliError> {
    let store = open_store(paths)?;
    let node = move_node(&store, &args.id, args.parent.as_deref(), args.order)?;
    print_json(&serde_json::to_value(&node)?)
}

fn cmd_node_rm(paths: &RepoPaths, args: NodeRmArgs) -> Result<(), CliError> {
    let store = open_store(paths)?;
    let deleted = delete_node(&store, &args.id)?;
    print_json(&json!({
        "status": "ok",
        "deleted_count": deleted,
    }))
}

fn cmd_tree(paths: &RepoPaths, args: TreeArgs) -> Result<(), CliError> {
    let store = open_store(paths)?;
    let tree = materialize_tree(&store, &args.project)?;
    print_json(&json!({
        "project": args.project,
        "tree": serde_json::to_value(&tree)?,
    }))
}

fn cmd_snapshot_create(paths: &RepoPaths, args: SnapshotCreateArgs) -> Result<(), CliError> {
    let store = open_store(paths)?;
    let chapter = store.get_node(&args.chapter)?.ok_or_else(|| {
        CliError::new("not_found", format!("chapter `{}` not found", args.chapter))
    })?;

    let content = match &args.file {
        Some(path) => fs::read_to_string(path).map_err(|err| CliError::io("read_error", err))?,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .map_err(|err| CliError::io("stdin_error", err))?;
            buffer
        }
    };

    let parent = match args.parent {
        Some(parent) => Some(parent),
        None => snapshot_chain(&store, &chapter.id)?
            .into_iter()
            .next()
            .map(|head| head.id),
    };

    let snapshot = create_snapshot(
        &store,
        NewSnapshot {
            chapter_id: &chapter.id,
            project_id: &chapter.project_id,
            content: &content,
            summary: &args.summary,
            parent_snapshot_id: parent.as_deref(),
        },
    )?;
    print_json(&serde_json::to_value(&snapshot)?)
}

fn cmd_snapshot_log(paths: &RepoPaths, args: SnapshotLogArgs) -> Result<(), CliError> {
    let store = open_store(paths)?;
    let chain = snapshot_chain(&store, &args.chapter)?;
    print_json(&json!({
        "chapter": args.chapter,
        "snapshot_count": chain.len(),
        "snapshots": serde_json::to_value(&chain)?,
    }))
}

fn cmd_snapshot_show(paths: &RepoPaths, args: SnapshotShowArgs) -> Result<(), CliError> {
    let store = open_store(paths)?;
    let snapshot = get_snapshot(&store, &args.id)?;
    if args.content {
        let content = reconstruct(&store, &args.id)?;
        print_json(&json!({
            "snapshot": serde_json::to_value(&snapshot)?,
            "content": content,
        }))
    } else {
        print_json(&serde_json::to_value(&snapshot)?)
    }
}

fn cmd_chronicle(paths: &RepoPaths, args: ChronicleArgs) -> Result<(), CliError> {
    let config = effective_config(paths)?;
    let store = open_store_with(paths, &config)?;
    let chronicle = compile(&store, &args.volume, &config.chronicle_statuses)?;
    print_json(&serde_json::to_value(&chronicle)?)
}

fn print_json(value: &serde_json::Value) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
