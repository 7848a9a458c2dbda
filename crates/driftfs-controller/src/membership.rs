//! Live-node tracking and failure detection.
//!
//! All state belongs to one owner task consuming a command channel, so no
//! two mutations ever interleave. A periodic tick sweeps the table and
//! declares dead any node whose last heartbeat is older than the timeout;
//! node-down listeners run synchronously with the removal and must not
//! block (the file index forwards into its own channel).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use driftfs_proto::{Node, Stats};
use tokio::sync::{mpsc, oneshot};

/// Callback invoked with a node's uuid when the failure detector removes it.
pub type NodeDownListener = Box<dyn Fn(&str) + Send>;

enum Command {
    Register(Node),
    Heartbeat { node: Node, stats: Stats },
    NodeDown(String),
    Nodes(oneshot::Sender<Vec<Node>>),
    OnNodeDown(NodeDownListener),
    Shutdown,
}

struct Entry {
    node: Node,
    last_seen: Instant,
}

/// Handle to the membership owner task. Cheap to clone.
#[derive(Clone)]
pub struct Membership {
    tx: mpsc::Sender<Command>,
}

impl Membership {
    /// Spawn with the default sweep period and heartbeat timeout.
    pub fn spawn() -> Self {
        Self::spawn_with(
            Duration::from_secs(driftfs_types::FAILURE_DETECTOR_PERIOD_S),
            Duration::from_secs(driftfs_types::FAILURE_TIMEOUT_S),
        )
    }

    /// Spawn with explicit timings (tests use short ones).
    pub fn spawn_with(sweep_period: Duration, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run(rx, sweep_period, timeout));
        Self { tx }
    }

    /// Insert or refresh a node with zeroed stats.
    pub async fn register(&self, node: Node) {
        let _ = self.tx.send(Command::Register(node)).await;
    }

    /// Refresh a node's liveness and stats. An unknown uuid is registered
    /// fresh from the carried node identity.
    pub async fn heartbeat(&self, node: Node, stats: Stats) {
        let _ = self.tx.send(Command::Heartbeat { node, stats }).await;
    }

    /// Drop a node immediately without firing listeners (explicit offline).
    pub async fn node_down(&self, uuid: impl Into<String>) {
        let _ = self.tx.send(Command::NodeDown(uuid.into())).await;
    }

    /// Snapshot of the currently live nodes.
    pub async fn nodes(&self) -> Vec<Node> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Nodes(reply)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn on_node_down(&self, listener: impl Fn(&str) + Send + 'static) {
        let _ = self
            .tx
            .send(Command::OnNodeDown(Box::new(listener)))
            .await;
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }
}

async fn run(mut rx: mpsc::Receiver<Command>, sweep_period: Duration, timeout: Duration) {
    let mut entries: HashMap<String, Entry> = HashMap::new();
    let mut listeners: Vec<NodeDownListener> = Vec::new();

    let mut ticker = tokio::time::interval(sweep_period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick of a tokio interval fires immediately; skip it so a
    // fresh table is never swept at time zero.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep(&mut entries, &listeners, timeout);
            }
            cmd = rx.recv() => match cmd {
                None | Some(Command::Shutdown) => {
                    tracing::info!("membership shutting down");
                    break;
                }
                Some(Command::Register(mut node)) => {
                    tracing::info!(uuid = %node.uuid, addr = %node.addr(), "node registered");
                    node.stats = Stats::default();
                    entries.insert(node.uuid.clone(), Entry { node, last_seen: Instant::now() });
                }
                Some(Command::Heartbeat { mut node, stats }) => {
                    node.stats = stats;
                    match entries.get_mut(&node.uuid) {
                        Some(entry) => {
                            tracing::debug!(uuid = %node.uuid, "heartbeat");
                            entry.node.stats = stats;
                            entry.last_seen = Instant::now();
                        }
                        None => {
                            tracing::info!(uuid = %node.uuid, "unknown uuid in heartbeat, registering");
                            entries.insert(node.uuid.clone(), Entry { node, last_seen: Instant::now() });
                        }
                    }
                }
                Some(Command::NodeDown(uuid)) => {
                    if entries.remove(&uuid).is_some() {
                        tracing::info!(%uuid, "node reported offline");
                    }
                }
                Some(Command::Nodes(reply)) => {
                    let nodes = entries.values().map(|e| e.node.clone()).collect();
                    let _ = reply.send(nodes);
                }
                Some(Command::OnNodeDown(listener)) => listeners.push(listener),
            }
        }
    }
}

fn sweep(entries: &mut HashMap<String, Entry>, listeners: &[NodeDownListener], timeout: Duration) {
    tracing::debug!("checking for failed storage nodes");
    let now = Instant::now();
    let dead: Vec<String> = entries
        .iter()
        .filter(|(_, entry)| now.duration_since(entry.last_seen) > timeout)
        .map(|(uuid, _)| uuid.clone())
        .collect();

    for uuid in dead {
        entries.remove(&uuid);
        for listener in listeners {
            listener(&uuid);
        }
        tracing::error!(%uuid, "node is DOWN");
    }
}
