//! The authoritative catalog of files, chunks, and chunk owners.
//!
//! Same single-writer shape as membership: every mutation and every read is
//! a command processed by one owner task. Heartbeats feed `update`, which is
//! idempotent; a filename reservation blocks concurrent PUTs of the same
//! name until the first heartbeat reports one of its chunks.

use std::collections::{HashMap, HashSet};

use driftfs_proto::{Chunk, FileInfo, Node};
use driftfs_types::path::basename;
use tokio::sync::{mpsc, oneshot};

enum Command {
    Update { node: Node, chunks: Vec<Chunk> },
    Remove(String),
    Reserve(String),
    NodeDown(String),
    Ls(oneshot::Sender<Vec<FileInfo>>),
    Get {
        filename: String,
        reply: oneshot::Sender<Option<FileInfo>>,
    },
    Exists {
        filename: String,
        reply: oneshot::Sender<bool>,
    },
}

struct FileEntry {
    filename: String,
    chunks: HashMap<String, Chunk>,
}

impl FileEntry {
    fn to_info(&self) -> FileInfo {
        FileInfo {
            name: basename(&self.filename).to_string(),
            path: self.filename.clone(),
            chunks: self.chunks.values().cloned().collect(),
        }
    }
}

/// Handle to the file-index owner task. Cheap to clone.
#[derive(Clone)]
pub struct FileIndex {
    tx: mpsc::Sender<Command>,
}

impl FileIndex {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(run(rx));
        Self { tx }
    }

    /// Record that `node` owns the given chunks. Idempotent: repeating the
    /// same report leaves the index unchanged.
    pub async fn update(&self, node: Node, chunks: Vec<Chunk>) {
        let _ = self.tx.send(Command::Update { node, chunks }).await;
    }

    /// Drop a file from the index. Fanning RM out to the owning storage
    /// nodes is the caller's job.
    pub async fn remove(&self, filename: impl Into<String>) {
        let _ = self.tx.send(Command::Remove(filename.into())).await;
    }

    /// Mark a filename as pending so a concurrent PUT cannot take it.
    pub async fn reserve(&self, filename: impl Into<String>) {
        let _ = self.tx.send(Command::Reserve(filename.into())).await;
    }

    /// Strip a dead node from every chunk's owner set. Non-blocking;
    /// suitable for calling from a membership node-down listener.
    pub fn node_down_listener(&self) -> impl Fn(&str) + Send + 'static {
        let tx = self.tx.clone();
        move |uuid: &str| {
            let _ = tx.try_send(Command::NodeDown(uuid.to_string()));
        }
    }

    pub async fn ls(&self) -> Vec<FileInfo> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Ls(reply)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn get(&self, filename: impl Into<String>) -> Option<FileInfo> {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::Get {
            filename: filename.into(),
            reply,
        };
        if self.tx.send(cmd).await.is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }

    /// True iff the filename is indexed or reserved.
    pub async fn file_exists(&self, filename: impl Into<String>) -> bool {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::Exists {
            filename: filename.into(),
            reply,
        };
        if self.tx.send(cmd).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }
}

async fn run(mut rx: mpsc::Receiver<Command>) {
    let mut index: HashMap<String, FileEntry> = HashMap::new();
    let mut pending: HashSet<String> = HashSet::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Update { node, chunks } => {
                apply_update(&mut index, &mut pending, node, chunks);
            }
            Command::Remove(filename) => {
                index.remove(&filename);
                pending.remove(&filename);
                tracing::info!(%filename, files = index.len(), "file removed from index");
            }
            Command::Reserve(filename) => {
                pending.insert(filename);
            }
            Command::NodeDown(uuid) => {
                for entry in index.values_mut() {
                    for chunk in entry.chunks.values_mut() {
                        chunk.storage_nodes.remove(&uuid);
                    }
                }
                tracing::info!(%uuid, "removed node from all chunk owner sets");
            }
            Command::Ls(reply) => {
                let _ = reply.send(index.values().map(FileEntry::to_info).collect());
            }
            Command::Get { filename, reply } => {
                let _ = reply.send(index.get(&filename).map(FileEntry::to_info));
            }
            Command::Exists { filename, reply } => {
                let _ = reply.send(index.contains_key(&filename) || pending.contains(&filename));
            }
        }
    }
}

fn apply_update(
    index: &mut HashMap<String, FileEntry>,
    pending: &mut HashSet<String>,
    node: Node,
    chunks: Vec<Chunk>,
) {
    for mut chunk in chunks {
        // The first reported chunk of a file consumes its reservation.
        pending.remove(&chunk.file_name);

        let entry = index
            .entry(chunk.file_name.clone())
            .or_insert_with(|| FileEntry {
                filename: chunk.file_name.clone(),
                chunks: HashMap::new(),
            });

        match entry.chunks.get_mut(&chunk.chunk_name) {
            Some(existing) => {
                existing
                    .storage_nodes
                    .entry(node.uuid.clone())
                    .or_insert_with(|| node.clone());
            }
            None => {
                chunk.data.clear();
                chunk.storage_nodes = HashMap::from([(node.uuid.clone(), node.clone())]);
                entry.chunks.insert(chunk.chunk_name.clone(), chunk);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(uuid: &str) -> Node {
        Node::new(uuid, "localhost", 7500)
    }

    fn chunk(file: &str, serial: i32) -> Chunk {
        Chunk {
            file_name: file.into(),
            chunk_name: format!("{file}-{serial}"),
            serial,
            size: 10,
            file_size: 20,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_update_creates_file_and_owner() {
        let index = FileIndex::spawn();
        index.update(node("n1"), vec![chunk("/f", 0)]).await;

        let info = index.get("/f").await.unwrap();
        assert_eq!(info.name, "f");
        assert_eq!(info.path, "/f");
        assert_eq!(info.chunks.len(), 1);
        assert!(info.chunks[0].storage_nodes.contains_key("n1"));
    }

    #[tokio::test]
    async fn test_update_is_idempotent() {
        let index = FileIndex::spawn();
        let report = vec![chunk("/f", 0), chunk("/f", 1)];
        index.update(node("n1"), report.clone()).await;
        let before = index.get("/f").await.unwrap();

        index.update(node("n1"), report).await;
        let after = index.get("/f").await.unwrap();

        assert_eq!(before.chunks.len(), after.chunks.len());
        for c in &after.chunks {
            assert_eq!(c.storage_nodes.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_update_merges_owners() {
        let index = FileIndex::spawn();
        index.update(node("n1"), vec![chunk("/f", 0)]).await;
        index.update(node("n2"), vec![chunk("/f", 0)]).await;

        let info = index.get("/f").await.unwrap();
        assert_eq!(info.chunks[0].storage_nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_update_strips_chunk_data() {
        let index = FileIndex::spawn();
        let mut c = chunk("/f", 0);
        c.data = b"payload".to_vec();
        index.update(node("n1"), vec![c]).await;

        let info = index.get("/f").await.unwrap();
        assert!(info.chunks[0].data.is_empty());
    }

    #[tokio::test]
    async fn test_reserve_then_report_then_remove() {
        let index = FileIndex::spawn();
        assert!(!index.file_exists("/f").await);

        index.reserve("/f").await;
        assert!(index.file_exists("/f").await, "reserved name is taken");
        assert!(index.get("/f").await.is_none(), "reservation is not metadata");

        index.update(node("n1"), vec![chunk("/f", 0)]).await;
        assert!(index.file_exists("/f").await);

        index.remove("/f").await;
        assert!(!index.file_exists("/f").await);
        assert!(index.get("/f").await.is_none());
    }

    #[tokio::test]
    async fn test_remove_clears_stale_reservation() {
        let index = FileIndex::spawn();
        index.reserve("/f").await;
        index.remove("/f").await;
        assert!(!index.file_exists("/f").await);
    }

    #[tokio::test]
    async fn test_node_down_strips_owner_everywhere() {
        let index = FileIndex::spawn();
        index
            .update(node("n1"), vec![chunk("/f", 0), chunk("/g", 0)])
            .await;
        index.update(node("n2"), vec![chunk("/f", 0)]).await;

        let listener = index.node_down_listener();
        listener("n1");
        // Listener posts asynchronously; give the owner task a beat.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let f = index.get("/f").await.unwrap();
        assert_eq!(f.chunks[0].storage_nodes.len(), 1);
        assert!(f.chunks[0].storage_nodes.contains_key("n2"));

        let g = index.get("/g").await.unwrap();
        assert!(g.chunks[0].storage_nodes.is_empty());
    }

    #[tokio::test]
    async fn test_ls_lists_all_files() {
        let index = FileIndex::spawn();
        index.update(node("n1"), vec![chunk("/a", 0)]).await;
        index.update(node("n1"), vec![chunk("/b", 0)]).await;

        let mut names: Vec<String> = index.ls().await.into_iter().map(|f| f.path).collect();
        names.sort();
        assert_eq!(names, ["/a", "/b"]);
    }
}
