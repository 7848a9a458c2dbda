//! DriftFS multi-role binary.
//!
//! One executable hosts all four process roles, selected with `--app`:
//! controller, storage-node, compute-engine, or client. Role-specific
//! flags are validated at startup; a missing required flag is a fatal
//! diagnostic.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use driftfs_client::ClientActions;
use driftfs_compute::ResourceManager;
use driftfs_controller::Controller;
use driftfs_logging::LogConfig;
use driftfs_net::Server;
use driftfs_storage::{StorageNode, StorageNodeConfig};
use driftfs_types::NodeAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum App {
    Controller,
    StorageNode,
    ComputeEngine,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ClientAction {
    Ls,
    Put,
    Get,
    Rm,
    ClusterStats,
    Compute,
}

#[derive(Debug, Parser)]
#[command(name = "driftfs", version, about = "A small distributed file system with co-located map/reduce")]
struct Args {
    /// Which process role to run.
    #[arg(long, value_enum)]
    app: App,

    /// Listen port (controller, storage-node, compute-engine).
    #[arg(long)]
    port: Option<u16>,

    /// Controller hostname (storage-node, compute-engine, client).
    #[arg(long)]
    hostname: Option<String>,

    /// Controller port (storage-node, compute-engine, client).
    #[arg(long = "host-port")]
    host_port: Option<u16>,

    /// Chunk storage root (storage-node); download directory (client).
    #[arg(long = "storage-dir")]
    storage_dir: Option<PathBuf>,

    /// Plugin binary directory (storage-node).
    #[arg(long = "plugins-dir")]
    plugins_dir: Option<PathBuf>,

    /// Map/reduce scratch directory (storage-node).
    #[arg(long = "compute-storage-dir")]
    compute_storage_dir: Option<PathBuf>,

    /// Hostname the compute engine advertises in its registration;
    /// defaults to the machine hostname.
    #[arg(long = "compute-engine-hostname")]
    compute_engine_hostname: Option<String>,

    /// Port the compute engine advertises; defaults to its listen port.
    #[arg(long = "compute-engine-port")]
    compute_engine_port: Option<u16>,

    /// Also write logs to rotated files in this directory.
    #[arg(long = "log-dir")]
    log_dir: Option<PathBuf>,

    /// Client operation to perform.
    #[arg(long, value_enum)]
    action: Option<ClientAction>,

    /// Local file path (client put/compute plugin source).
    #[arg(long)]
    local: Option<PathBuf>,

    /// Remote DFS path (client put/get/rm/compute target).
    #[arg(long)]
    remote: Option<String>,

    /// Output DFS path for a compute job.
    #[arg(long)]
    output: Option<String>,

    /// Plugin executable for a compute job.
    #[arg(long)]
    plugin: Option<PathBuf>,
}

fn require<T>(value: Option<T>, flag: &str) -> Result<T> {
    value.with_context(|| format!("missing required flag {flag}"))
}

fn controller_addr(args: &Args) -> Result<NodeAddr> {
    let host = require(args.hostname.clone(), "--hostname")?;
    let port = require(args.host_port, "--host-port")?;
    Ok(NodeAddr::new(host, port))
}

fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".into())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = driftfs_logging::init(&LogConfig {
        log_dir: args.log_dir.clone(),
        ..Default::default()
    });

    match args.app {
        App::Controller => run_controller(&args).await,
        App::StorageNode => run_storage_node(&args).await,
        App::ComputeEngine => run_compute_engine(&args).await,
        App::Client => run_client(&args).await,
    }
}

async fn run_controller(args: &Args) -> Result<()> {
    let port = require(args.port, "--port")?;
    let controller = Controller::new().await;
    let server = Server::bind(port).await.context("cannot bind listen port")?;
    tracing::info!(port = server.port(), "controller listening");
    let handle = server.start(controller);

    tokio::signal::ctrl_c().await?;
    handle.shutdown().await;
    Ok(())
}

async fn run_storage_node(args: &Args) -> Result<()> {
    let config = StorageNodeConfig::new(
        require(args.port, "--port")?,
        controller_addr(args)?,
        require(args.storage_dir.clone(), "--storage-dir")?,
        require(args.plugins_dir.clone(), "--plugins-dir")?,
        require(args.compute_storage_dir.clone(), "--compute-storage-dir")?,
    );
    let (_node, handle) = StorageNode::start(config)
        .await
        .context("storage node failed to start")?;

    tokio::signal::ctrl_c().await?;
    handle.shutdown().await;
    Ok(())
}

async fn run_compute_engine(args: &Args) -> Result<()> {
    let port = require(args.port, "--port")?;
    let manager = Arc::new(ResourceManager::new(controller_addr(args)?));

    let server = Server::bind(port).await.context("cannot bind listen port")?;
    let advertised_host = args
        .compute_engine_hostname
        .clone()
        .unwrap_or_else(local_hostname);
    let advertised_port = args.compute_engine_port.unwrap_or_else(|| server.port());
    manager
        .register(&advertised_host, advertised_port)
        .await
        .context("cannot register with controller")?;
    tracing::info!(port = server.port(), "compute engine listening");
    let handle = server.start(manager);

    tokio::signal::ctrl_c().await?;
    handle.shutdown().await;
    Ok(())
}

async fn run_client(args: &Args) -> Result<()> {
    let controller = controller_addr(args)?;
    let save_dir = args
        .storage_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("downloads"));
    let actions = ClientActions::new(controller, save_dir);

    match require(args.action, "--action")? {
        ClientAction::Ls => {
            for file in actions.ls().await? {
                println!("{}  ({} chunks)", file.path, file.chunks.len());
            }
        }
        ClientAction::Put => {
            let local = require(args.local.clone(), "--local")?;
            let remote = require(args.remote.clone(), "--remote")?;
            actions.upload(&local, &remote).await?;
            println!("uploaded {} as {remote}", local.display());
        }
        ClientAction::Get => {
            let remote = require(args.remote.clone(), "--remote")?;
            let dest = actions.download(&remote, None).await?;
            println!("downloaded {remote} to {}", dest.display());
        }
        ClientAction::Rm => {
            let remote = require(args.remote.clone(), "--remote")?;
            actions.delete(&remote).await?;
            println!("deleted {remote}");
        }
        ClientAction::ClusterStats => {
            for node in actions.cluster_stats().await? {
                println!(
                    "{}  {}  up:{} down:{} repl:{} free:{}GB",
                    node.uuid,
                    node.addr(),
                    node.stats.uploaded,
                    node.stats.downloaded,
                    node.stats.replicated,
                    node.stats.free_space_gb
                );
            }
        }
        ClientAction::Compute => {
            let plugin = require(args.plugin.clone(), "--plugin")?;
            let remote = require(args.remote.clone(), "--remote")?;
            let output = require(args.output.clone(), "--output")?;
            actions
                .compute(&plugin, &remote, &output, |status| {
                    println!("[{}] ok={} {}", status.status, status.ok, status.message);
                })
                .await?;
            println!("computation finished; output at {output}");
        }
    }
    Ok(())
}
