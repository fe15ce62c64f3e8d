//! Scriptflow CLI - lifecycle and versioning of sales-script content graphs.
//!
//! # Usage
//!
//! ```bash
//! # Give a product its opening node
//! scriptflow --admin seed acme
//!
//! # Fork official nodes into your sandbox
//! scriptflow --user alice fork n1 n2
//!
//! # Snapshot and restore the official flow
//! scriptflow --admin snapshot capture acme --label launch
//! scriptflow --admin snapshot restore <snapshot-id>
//! ```
//!
//! The default configuration uses an in-memory database, so state only
//! lives as long as one invocation. Point `database.mode` at `file` or
//! `remote` to keep it.

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use scriptflow_cli::{OutputFormat, Session, commands, output};
use scriptflow_core::config::GeneralConfig;
use scriptflow_core::prelude::*;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "scriptflow")]
#[command(about = "Scriptflow - content graph lifecycle and versioning", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format (human, json, plain)
    #[arg(long, global = true, default_value = "human")]
    format: OutputFormatArg,

    /// User the command acts as
    #[arg(short, long, global = true, env = "SCRIPTFLOW_USER", default_value = "local")]
    user: String,

    /// Act with administrator rights
    #[arg(long, global = true)]
    admin: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormatArg {
    Human,
    Json,
    Plain,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Human => OutputFormat::Human,
            OutputFormatArg::Json => OutputFormat::Json,
            OutputFormatArg::Plain => OutputFormat::Plain,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create, inspect, edit and delete nodes
    #[command(subcommand)]
    Node(NodeCommands),

    /// Create the default opening node of a product
    Seed {
        /// Product id
        product: ProductId,
    },

    /// Copy official or community nodes into your sandbox
    Fork {
        /// Nodes to copy together
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Copy community nodes into the official flow (admin)
    Promote {
        /// Community nodes to promote together
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Publish one of your sandbox nodes to the community
    Publish {
        /// Node id
        id: String,
    },

    /// Withdraw one of your community nodes back to your sandbox
    Unpublish {
        /// Node id
        id: String,
    },

    /// Capture and restore snapshots of the official flow (admin)
    #[command(subcommand)]
    Snapshot(SnapshotCommands),

    /// Edit leases
    #[command(subcommand)]
    Lock(LockCommands),

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum NodeCommands {
    /// Create a node
    Create {
        /// Product id
        #[arg(short, long)]
        product: ProductId,

        /// Node title
        #[arg(short, long)]
        title: String,

        /// Node type (opening, discovery, pitch, objection, close, end)
        #[arg(long = "type", default_value = "pitch")]
        node_type: NodeType,

        /// Scope to create in (sandbox, or official for admins)
        #[arg(short, long, default_value = "sandbox")]
        scope: Scope,

        /// Explicit node id
        #[arg(long)]
        id: Option<String>,

        #[command(flatten)]
        body: BodyArgs,

        /// Key point (repeatable)
        #[arg(long = "key-point")]
        key_points: Vec<String>,

        /// Warning (repeatable)
        #[arg(long = "warning")]
        warnings: Vec<String>,

        /// Phrase to listen for (repeatable)
        #[arg(long = "listen-for")]
        listen_for: Vec<String>,

        /// Edge as label=target or label=target#note (repeatable)
        #[arg(short, long = "response")]
        responses: Vec<String>,
    },

    /// Show a node with its collections and edges
    Get {
        /// Node id
        id: String,
    },

    /// List the nodes of a product in one scope
    List {
        /// Product id
        product: ProductId,

        /// Scope to list
        #[arg(short, long, default_value = "official")]
        scope: Scope,
    },

    /// Show outgoing edges, flagging missing targets
    Edges {
        /// Node id
        id: String,
    },

    /// Edit a node in place
    Edit {
        /// Node id
        id: String,

        /// New title
        #[arg(short, long)]
        title: Option<String>,

        /// New node type
        #[arg(long = "type")]
        node_type: Option<NodeType>,

        #[command(flatten)]
        body: BodyArgs,

        /// Clear the context text
        #[arg(long, conflicts_with = "context")]
        clear_context: bool,

        /// Replace key points (no values clears them)
        #[arg(long = "key-points", num_args = 0..)]
        key_points: Option<Vec<String>>,

        /// Replace warnings (no values clears them)
        #[arg(long = "warnings", num_args = 0..)]
        warnings: Option<Vec<String>>,

        /// Replace phrases to listen for (no values clears them)
        #[arg(long = "listen-for", num_args = 0..)]
        listen_for: Option<Vec<String>>,

        /// Replace edges, each label=target or label=target#note
        #[arg(long = "responses", num_args = 0..)]
        responses: Option<Vec<String>>,
    },

    /// Delete a node and every edge pointing at it
    Delete {
        /// Node id
        id: String,
    },
}

/// Free-text and placement fields shared by create and edit
#[derive(Args)]
struct BodyArgs {
    /// Script text
    #[arg(long)]
    script: Option<String>,

    /// Context text
    #[arg(long)]
    context: Option<String>,

    /// Metadata as a JSON document
    #[arg(long)]
    metadata: Option<String>,

    /// Canvas position as x,y
    #[arg(long)]
    position: Option<String>,

    /// Topic group id
    #[arg(long)]
    topic_group: Option<String>,
}

#[derive(Subcommand)]
enum SnapshotCommands {
    /// Capture the official flow of a product
    Capture {
        /// Product id
        product: ProductId,

        /// Snapshot label
        #[arg(short, long)]
        label: String,
    },

    /// Replace the official flow with a snapshot
    Restore {
        /// Snapshot id
        id: String,
    },

    /// List snapshots of a product, newest first
    List {
        /// Product id
        product: ProductId,
    },

    /// Show a snapshot's contents
    Show {
        /// Snapshot id
        id: String,
    },

    /// Delete a snapshot
    Delete {
        /// Snapshot id
        id: String,
    },
}

#[derive(Subcommand)]
enum LockCommands {
    /// Acquire a lease and keep it alive until interrupted
    Hold {
        /// Node id
        id: String,

        /// Stop after this many heartbeats
        #[arg(long)]
        beats: Option<u32>,
    },

    /// Show the current holder of a node's lease
    Status {
        /// Node id
        id: String,
    },

    /// List active leases
    List,

    /// Show lease counters
    Stats,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        output::error(format!("{:#}", e));
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let format: OutputFormat = cli.format.into();

    let config = match &cli.config {
        Some(path) => ScriptflowConfig::load_from_path(path).await?,
        None => ScriptflowConfig::load_or_default().await?,
    };
    init_logging(&config.general, cli.verbose);

    if let Commands::Config(action) = &cli.command {
        return match action {
            ConfigCommands::Show => commands::show_config(&config, format),
            ConfigCommands::Init { force } => {
                let path = match &cli.config {
                    Some(path) => path.clone(),
                    None => ScriptflowConfig::config_path()?,
                };
                commands::init_config(&path, *force).await
            }
        };
    }

    let caller = if cli.admin {
        Caller::admin(cli.user.clone())
    } else {
        Caller::member(cli.user.clone())
    };
    let session = Session::open(&config, caller, format).await?;

    match cli.command {
        Commands::Node(action) => match action {
            NodeCommands::Create {
                product,
                title,
                node_type,
                scope,
                id,
                body,
                key_points,
                warnings,
                listen_for,
                responses,
            } => {
                let draft = NodeDraft {
                    id: id.map(NodeId::new),
                    product_id: product,
                    node_type: Some(node_type),
                    title,
                    script: body.script.unwrap_or_default(),
                    context: body.context,
                    metadata: body.metadata.as_deref().map(commands::parse_metadata).transpose()?,
                    position: body
                        .position
                        .as_deref()
                        .map(commands::parse_position)
                        .transpose()?
                        .unwrap_or_default(),
                    topic_group_id: body.topic_group,
                    key_points,
                    warnings,
                    listen_for,
                    responses: commands::parse_responses(&responses)?,
                };
                commands::create_node(&session, draft, scope).await?;
            }
            NodeCommands::Get { id } => {
                commands::show_node(&session, &id).await?;
            }
            NodeCommands::List { product, scope } => {
                commands::list_nodes(&session, &product, scope).await?;
            }
            NodeCommands::Edges { id } => {
                commands::show_edges(&session, &id).await?;
            }
            NodeCommands::Edit {
                id,
                title,
                node_type,
                body,
                clear_context,
                key_points,
                warnings,
                listen_for,
                responses,
            } => {
                let context = if clear_context {
                    Some(None)
                } else {
                    body.context.map(Some)
                };
                let update = NodeUpdate {
                    node_type,
                    title,
                    script: body.script,
                    context,
                    metadata: body
                        .metadata
                        .as_deref()
                        .map(commands::parse_metadata)
                        .transpose()?
                        .map(Some),
                    position: body.position.as_deref().map(commands::parse_position).transpose()?,
                    topic_group_id: body.topic_group.map(Some),
                    key_points,
                    warnings,
                    listen_for,
                    responses: responses
                        .as_deref()
                        .map(commands::parse_responses)
                        .transpose()?,
                };
                commands::edit_node(&session, &id, update).await?;
            }
            NodeCommands::Delete { id } => {
                commands::delete_node(&session, &id).await?;
            }
        },

        Commands::Seed { product } => {
            commands::seed_product(&session, &product).await?;
        }

        Commands::Fork { ids } => {
            commands::fork(&session, &ids).await?;
        }

        Commands::Promote { ids } => {
            commands::promote(&session, &ids).await?;
        }

        Commands::Publish { id } => {
            commands::publish(&session, &id).await?;
        }

        Commands::Unpublish { id } => {
            commands::unpublish(&session, &id).await?;
        }

        Commands::Snapshot(action) => match action {
            SnapshotCommands::Capture { product, label } => {
                commands::capture_snapshot(&session, &product, &label).await?;
            }
            SnapshotCommands::Restore { id } => {
                commands::restore_snapshot(&session, &id).await?;
            }
            SnapshotCommands::List { product } => {
                commands::list_snapshots(&session, &product).await?;
            }
            SnapshotCommands::Show { id } => {
                commands::show_snapshot(&session, &id).await?;
            }
            SnapshotCommands::Delete { id } => {
                commands::delete_snapshot(&session, &id).await?;
            }
        },

        Commands::Lock(action) => match action {
            LockCommands::Hold { id, beats } => {
                commands::hold_lock(&session, &id, beats).await?;
            }
            LockCommands::Status { id } => {
                commands::lock_status(&session, &id).await?;
            }
            LockCommands::List => {
                commands::list_locks(&session).await?;
            }
            LockCommands::Stats => {
                commands::lock_stats(&session).await?;
            }
        },

        Commands::Config(_) => {}
    }

    Ok(())
}

/// Initialize logging from the configured level and format
fn init_logging(general: &GeneralConfig, verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = if verbose {
        EnvFilter::new("scriptflow_core=debug,scriptflow_storage=debug,scriptflow_cli=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "scriptflow_core={0},scriptflow_storage={0},scriptflow_cli={0},warn",
                general.log_level
            ))
        })
    };

    let json = general.log_format == "json";
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_target(false).with_writer(std::io::stderr)))
        .init();
}
