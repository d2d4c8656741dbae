//! mstate CLI - Command line interface for merkle_state
//!
//! Each invocation opens one tree, runs a single command, then flushes and
//! closes it.

use anyhow::Context;
use clap::{Parser, Subcommand};
use merkle_state::{Config, Hash, MerkleTree, TreeRegistry};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mstate")]
#[command(about = "A persistent merkle tree for verifiable local state")]
#[command(version)]
struct Cli {
    /// Directory holding the trees (defaults to the configured data dir)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Name of the tree to operate on
    #[arg(short, long, default_value = "default")]
    tree: String,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    /// Keys and values are given (and printed) as hex
    #[arg(long)]
    hex: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert a key or replace its value
    Put {
        /// The key
        key: String,
        /// The value
        value: String,
    },

    /// Get the value stored under a key
    Get {
        /// The key
        key: String,
    },

    /// Check whether a key exists
    Contains {
        /// The key
        key: String,
    },

    /// Show the root hash
    Root,

    /// Show tree statistics
    Info,

    /// Show a node by hash
    Node {
        /// The node hash (hex)
        hash: String,
    },

    /// Erase the tree
    Clear,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.data_dir {
        Some(dir) => Config::with_data_dir(dir),
        None => Config::load()?,
    };

    let registry = Arc::new(TreeRegistry::new());
    let tree = MerkleTree::open(&cli.tree, &config, registry)
        .with_context(|| format!("Failed to open tree '{}'", cli.tree))?;

    let result = run(&cli, &tree);
    let closed = tree.close();
    let value = result?;
    closed?;

    output(&cli.format, &value)
}

fn run(cli: &Cli, tree: &MerkleTree) -> anyhow::Result<serde_json::Value> {
    let value = match &cli.command {
        Commands::Put { key, value } => {
            let key_bytes = parse_bytes(key, cli.hex)?;
            let value_bytes = parse_bytes(value, cli.hex)?;
            tree.add_or_update_data(&key_bytes, &value_bytes)?;
            tree.flush_to_disk()?;
            serde_json::json!({
                "status": "ok",
                "key": key,
                "root": tree.get_root_hash()?.map(|h| h.to_hex()),
                "num_leaves": tree.get_num_leaves()?,
            })
        }

        Commands::Get { key } => {
            let key_bytes = parse_bytes(key, cli.hex)?;
            match tree.get_data(&key_bytes)? {
                Some(data) => serde_json::json!({
                    "key": key,
                    "value": format_bytes(&data, cli.hex),
                }),
                None => serde_json::json!({
                    "key": key,
                    "value": null,
                }),
            }
        }

        Commands::Contains { key } => {
            let key_bytes = parse_bytes(key, cli.hex)?;
            serde_json::json!({
                "key": key,
                "exists": tree.contains_key(&key_bytes)?,
            })
        }

        Commands::Root => {
            serde_json::json!({
                "root": tree.get_root_hash()?.map(|h| h.to_hex()),
            })
        }

        Commands::Info => {
            let hanging: Vec<_> = tree
                .hanging_nodes()?
                .into_iter()
                .map(|(level, hash)| serde_json::json!({ "level": level, "hash": hash.to_hex() }))
                .collect();
            serde_json::json!({
                "tree": tree.name(),
                "root": tree.get_root_hash()?.map(|h| h.to_hex()),
                "root_on_disk": tree.get_root_hash_saved_on_disk()?.map(|h| h.to_hex()),
                "num_leaves": tree.get_num_leaves()?,
                "depth": tree.get_depth()?,
                "hanging_nodes": hanging,
            })
        }

        Commands::Node { hash } => {
            let hash = Hash::from_hex(hash).with_context(|| format!("Invalid hash: {}", hash))?;
            match tree.get_node(hash)? {
                Some(node) => serde_json::json!({
                    "hash": node.hash.to_hex(),
                    "left": node.left.map(|h| h.to_hex()),
                    "right": node.right.map(|h| h.to_hex()),
                    "parent": node.parent.map(|h| h.to_hex()),
                    "leaf": node.is_leaf(),
                }),
                None => anyhow::bail!("Node not found: {}", hash),
            }
        }

        Commands::Clear => {
            tree.clear()?;
            serde_json::json!({
                "status": "ok",
                "message": format!("Cleared tree '{}'", tree.name()),
            })
        }
    };
    Ok(value)
}

fn parse_bytes(input: &str, is_hex: bool) -> anyhow::Result<Vec<u8>> {
    if is_hex {
        hex::decode(input).with_context(|| format!("Invalid hex: {}", input))
    } else {
        Ok(input.as_bytes().to_vec())
    }
}

fn format_bytes(data: &[u8], is_hex: bool) -> String {
    if is_hex {
        return hex::encode(data);
    }
    match std::str::from_utf8(data) {
        Ok(s) => s.to_string(),
        Err(_) => hex::encode(data),
    }
}

fn output(format: &OutputFormat, value: &serde_json::Value) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(value)?);
        }
        OutputFormat::Text => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
    }
    Ok(())
}
