//! The storage node runtime: registration, the heartbeat loop, chunk
//! PUT/GET/RM service, and replication fan-out.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use driftfs_net::{ConnectionHandler, MessageConn, Server, ServerHandle};
use driftfs_proto::{
    Ack, ActionRequest, ActionType, Chunk, Heartbeat, Node, Registration, Stats, StorageNodes,
    Wrapper,
};
use driftfs_types::{DfsError, NodeAddr, Result, CHUNK_REPLICAS, HEARTBEAT_PERIOD_S};
use rand::seq::SliceRandom;
use tokio::sync::watch;
use uuid::Uuid;

use crate::chunk_store::ChunkStore;
use crate::stats::StatsBoard;

#[derive(Debug, Clone)]
pub struct StorageNodeConfig {
    /// Listen port; 0 picks a free one.
    pub port: u16,
    pub controller: NodeAddr,
    /// Root for persisted chunks.
    pub storage_dir: PathBuf,
    /// Where plugin binaries are materialized.
    pub plugins_dir: PathBuf,
    /// Scratch space for map/reduce intermediates.
    pub compute_dir: PathBuf,
    /// Advertised hostname; defaults to the machine hostname.
    pub hostname: Option<String>,
    pub heartbeat_period: Duration,
}

impl StorageNodeConfig {
    pub fn new(
        port: u16,
        controller: NodeAddr,
        storage_dir: impl Into<PathBuf>,
        plugins_dir: impl Into<PathBuf>,
        compute_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            port,
            controller,
            storage_dir: storage_dir.into(),
            plugins_dir: plugins_dir.into(),
            compute_dir: compute_dir.into(),
            hostname: None,
            heartbeat_period: Duration::from_secs(HEARTBEAT_PERIOD_S),
        }
    }
}

pub struct StorageNode {
    pub(crate) uuid: String,
    hostname: String,
    port: u16,
    pub(crate) controller: NodeAddr,
    pub(crate) store: ChunkStore,
    pub(crate) stats: StatsBoard,
    /// Peer table, overwritten from each heartbeat response (minus self).
    peers: DashMap<String, Node>,
    pub(crate) plugins_dir: PathBuf,
    pub(crate) compute_dir: PathBuf,
    heartbeat_period: Duration,
    stop: watch::Sender<bool>,
}

impl StorageNode {
    /// Bind the listen socket, register with the controller, start the
    /// heartbeat loop, and begin serving.
    pub async fn start(config: StorageNodeConfig) -> Result<(Arc<Self>, ServerHandle)> {
        let server = Server::bind(config.port).await.map_err(DfsError::from)?;
        let hostname = config.hostname.unwrap_or_else(local_hostname);
        let (stop, _) = watch::channel(false);

        let node = Arc::new(Self {
            uuid: Uuid::new_v4().to_string(),
            hostname,
            port: server.port(),
            controller: config.controller,
            store: ChunkStore::new(&config.storage_dir),
            stats: StatsBoard::spawn(&config.storage_dir),
            peers: DashMap::new(),
            plugins_dir: config.plugins_dir,
            compute_dir: config.compute_dir,
            heartbeat_period: config.heartbeat_period,
            stop,
        });

        node.register().await?;
        tokio::spawn(Arc::clone(&node).heartbeat_loop());

        tracing::info!(
            uuid = %node.uuid,
            port = node.port,
            storage = %node.store.root().display(),
            "storage node started"
        );
        Ok((Arc::clone(&node), server.start(node)))
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// This node as the rest of the cluster sees it.
    fn identity(&self, stats: Stats) -> Node {
        Node {
            uuid: self.uuid.clone(),
            hostname: self.hostname.clone(),
            port: self.port,
            stats,
        }
    }

    /// Stop sending heartbeats (standby). Requests keep being served.
    pub fn stop_heartbeats(&self) {
        let _ = self.stop.send(true);
    }

    async fn register(&self) -> Result<()> {
        let conn = MessageConn::connect(&self.controller)
            .await
            .map_err(|e| DfsError::Transport(format!("could not reach controller: {e}")))?;
        let registration = Registration {
            node: self.identity(Stats::default()),
        };
        conn.send(&Wrapper::Registration(registration))
            .await
            .map_err(DfsError::from)?;
        tracing::info!(controller = %self.controller, "registered with controller");
        Ok(())
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.heartbeat_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut stop = self.stop.subscribe();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.send_heartbeat().await {
                        break;
                    }
                }
                _ = stop.changed() => break,
            }
        }
        tracing::warn!("heartbeats stopped; node is in standby");
    }

    /// One heartbeat round trip. Returns false when the controller is gone
    /// and the node should go to standby.
    async fn send_heartbeat(&self) -> bool {
        let chunks = match self.store.scan_metadata().await {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::error!("inventory scan failed: {e}");
                Vec::new()
            }
        };
        let stats = self.stats.snapshot().await;

        let conn = match MessageConn::connect(&self.controller).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!("controller down, going to standby: {e}");
                return false;
            }
        };

        let heartbeat = Heartbeat {
            node: self.identity(stats),
            chunks,
            stats,
        };
        if let Err(e) = conn.send(&Wrapper::Heartbeat(heartbeat)).await {
            tracing::error!("controller down, going to standby: {e}");
            return false;
        }
        tracing::debug!(controller = %self.controller, "sent heartbeat");

        match conn.recv().await {
            Ok(Wrapper::StorageNodes(StorageNodes { nodes })) => {
                self.peers.clear();
                for node in nodes {
                    if node.uuid != self.uuid {
                        self.peers.insert(node.uuid.clone(), node);
                    }
                }
                true
            }
            Ok(other) => {
                tracing::error!(kind = other.kind(), "expected live nodes in heartbeat reply");
                true
            }
            Err(e) => {
                tracing::error!("heartbeat reply lost: {e}");
                true
            }
        }
    }

    async fn handle_get(&self, conn: &MessageConn, chunk_name: &str) {
        match self.store.retrieve(chunk_name) {
            Ok(chunk) => {
                if conn.send(&Wrapper::Chunk(chunk)).await.is_ok() {
                    self.stats.add_downloaded().await;
                }
            }
            Err(e) => {
                let _ = conn.send(&Wrapper::Ack(Ack::failure(e.to_string()))).await;
            }
        }
    }

    async fn handle_put(&self, chunk: Chunk) {
        if let Err(e) = self.store.persist(&chunk) {
            tracing::error!(chunk = %chunk.chunk_name, "persist failed: {e}");
            return;
        }
        self.stats.add_uploaded().await;

        // An empty owner map marks a client-originated PUT; replicas arrive
        // with the origin already recorded and must not fan out again.
        if chunk.storage_nodes.is_empty() {
            self.replicate(chunk).await;
        }
    }

    async fn replicate(&self, mut chunk: Chunk) {
        let stats = self.stats.snapshot().await;
        chunk
            .storage_nodes
            .insert(self.uuid.clone(), self.identity(stats));

        let peers: Vec<Node> = self.peers.iter().map(|e| e.value().clone()).collect();
        let targets: Vec<Node> = if peers.len() <= CHUNK_REPLICAS {
            peers
        } else {
            peers
                .choose_multiple(&mut rand::thread_rng(), CHUNK_REPLICAS)
                .cloned()
                .collect()
        };

        for target in targets {
            match MessageConn::connect(&target.addr()).await {
                Ok(conn) => {
                    let request =
                        Wrapper::ActionRequest(ActionRequest::put_chunk(chunk.clone()));
                    match conn.send(&request).await {
                        Ok(()) => {
                            tracing::info!(
                                chunk = %chunk.chunk_name,
                                replica = %target.addr(),
                                "replicated chunk"
                            );
                            self.stats.add_replicated().await;
                        }
                        Err(e) => {
                            tracing::error!(replica = %target.addr(), "replica send failed: {e}");
                        }
                    }
                }
                Err(e) => tracing::error!(replica = %target.addr(), "replica unreachable: {e}"),
            }
        }
    }

    fn handle_rm(&self, chunk_name: &str) {
        if let Err(e) = self.store.delete(chunk_name) {
            tracing::warn!(chunk = %chunk_name, "delete failed: {e}");
        }
    }
}

fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".into())
}

#[async_trait]
impl ConnectionHandler for StorageNode {
    async fn handle(self: Arc<Self>, conn: MessageConn) {
        loop {
            let request = match conn.recv().await {
                Ok(Wrapper::ActionRequest(request)) => request,
                Ok(other) => {
                    tracing::error!(kind = other.kind(), "unexpected message at storage node");
                    break;
                }
                Err(e) => {
                    if !e.is_closed() {
                        tracing::warn!(peer = %conn.peer_addr(), "receive failed: {e}");
                    }
                    break;
                }
            };

            tracing::info!(
                action = ?request.action,
                chunk = %request.chunk_name,
                file = %request.file_name,
                "new request"
            );
            match request.action {
                ActionType::Get => self.handle_get(&conn, &request.chunk_name).await,
                ActionType::Put => {
                    if let Some(chunk) = request.chunk {
                        self.handle_put(chunk).await;
                    }
                }
                ActionType::Rm => self.handle_rm(&request.chunk_name),
                ActionType::ComputeStore => {
                    self.store_shuffle_file(&request.file_name, &request.data);
                }
                ActionType::Compute => {
                    // The compute task owns the connection from here on.
                    self.handle_compute(&conn, request).await;
                    break;
                }
                ActionType::Ls | ActionType::ClusterStats => {
                    tracing::error!(action = ?request.action, "not a storage-node request");
                }
            }
        }
        conn.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Minimal controller stand-in: accepts registrations, answers every
    /// heartbeat with a canned node list, and records what it saw.
    struct FakeController {
        reply_nodes: Mutex<Vec<Node>>,
        heartbeats: Mutex<Vec<Heartbeat>>,
    }

    impl FakeController {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                reply_nodes: Mutex::new(Vec::new()),
                heartbeats: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ConnectionHandler for FakeController {
        async fn handle(self: Arc<Self>, conn: MessageConn) {
            match conn.recv().await {
                Ok(Wrapper::Heartbeat(hb)) => {
                    self.heartbeats.lock().push(hb);
                    let nodes = self.reply_nodes.lock().clone();
                    let _ = conn.send(&Wrapper::StorageNodes(StorageNodes { nodes })).await;
                }
                _ => {}
            }
            conn.shutdown().await;
        }
    }

    struct Cluster {
        controller: Arc<FakeController>,
        nodes: Vec<(Arc<StorageNode>, ServerHandle)>,
        _controller_handle: ServerHandle,
        _dir: tempfile::TempDir,
    }

    async fn start_cluster(n: usize) -> Cluster {
        let controller = FakeController::new();
        let server = Server::bind(0).await.unwrap();
        let controller_port = server.port();
        let controller_handle = server.start(Arc::clone(&controller));

        let dir = tempfile::tempdir().unwrap();
        let mut nodes = Vec::new();
        for i in 0..n {
            let base = dir.path().join(format!("node-{i}"));
            let mut config = StorageNodeConfig::new(
                0,
                NodeAddr::new("127.0.0.1", controller_port),
                base.join("storage"),
                base.join("plugins"),
                base.join("compute"),
            );
            config.hostname = Some("127.0.0.1".into());
            config.heartbeat_period = Duration::from_millis(50);
            nodes.push(StorageNode::start(config).await.unwrap());
        }

        // Make every node a peer of every other via the heartbeat reply.
        let node_list: Vec<Node> = nodes
            .iter()
            .map(|(n, _)| Node::new(n.uuid(), "127.0.0.1", n.port()))
            .collect();
        *controller.reply_nodes.lock() = node_list;

        // Let a heartbeat round trip populate the peer tables.
        tokio::time::sleep(Duration::from_millis(150)).await;

        Cluster {
            controller,
            nodes,
            _controller_handle: controller_handle,
            _dir: dir,
        }
    }

    fn data_chunk(name: &str, data: &[u8]) -> Chunk {
        Chunk {
            file_name: "/f".into(),
            chunk_name: name.into(),
            size: data.len() as u64,
            file_size: data.len() as u64,
            data: data.to_vec(),
            ..Default::default()
        }
    }

    async fn put_chunk(port: u16, chunk: Chunk) {
        let conn = MessageConn::connect(&NodeAddr::new("127.0.0.1", port))
            .await
            .unwrap();
        conn.send(&Wrapper::ActionRequest(ActionRequest::put_chunk(chunk)))
            .await
            .unwrap();
        conn.shutdown().await;
    }

    async fn get_chunk(port: u16, name: &str) -> Option<Chunk> {
        let conn = MessageConn::connect(&NodeAddr::new("127.0.0.1", port))
            .await
            .unwrap();
        conn.send(&Wrapper::ActionRequest(ActionRequest::get_chunk(name)))
            .await
            .unwrap();
        match conn.recv().await.unwrap() {
            Wrapper::Chunk(chunk) => Some(chunk),
            Wrapper::Ack(_) => None,
            other => panic!("unexpected {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let cluster = start_cluster(1).await;
        let port = cluster.nodes[0].0.port();

        put_chunk(port, data_chunk("/f-0", b"hello\n")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let chunk = get_chunk(port, "/f-0").await.unwrap();
        assert_eq!(chunk.data, b"hello\n");
    }

    #[tokio::test]
    async fn test_get_missing_chunk_acks_failure() {
        let cluster = start_cluster(1).await;
        let port = cluster.nodes[0].0.port();
        assert!(get_chunk(port, "/nope-0").await.is_none());
    }

    #[tokio::test]
    async fn test_client_put_replicates_to_peers() {
        let cluster = start_cluster(3).await;

        // Client-originated PUT (empty owner map) to the first node.
        put_chunk(cluster.nodes[0].0.port(), data_chunk("/f-0", b"data\n")).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        // With three nodes and two extra replicas, every node holds it.
        for (node, _) in &cluster.nodes {
            let chunk = get_chunk(node.port(), "/f-0").await;
            assert!(chunk.is_some(), "node {} lacks the chunk", node.uuid());
        }
    }

    #[tokio::test]
    async fn test_replica_put_does_not_refan() {
        let cluster = start_cluster(2).await;
        let (a, b) = (&cluster.nodes[0].0, &cluster.nodes[1].0);

        // Simulate an incoming replica: owner map already names a node.
        let mut chunk = data_chunk("/f-0", b"data\n");
        chunk
            .storage_nodes
            .insert("origin".into(), Node::new("origin", "127.0.0.1", 1));
        put_chunk(a.port(), chunk).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(get_chunk(a.port(), "/f-0").await.is_some());
        assert!(
            get_chunk(b.port(), "/f-0").await.is_none(),
            "replica PUT must not replicate again"
        );
    }

    #[tokio::test]
    async fn test_rm_deletes_chunk() {
        let cluster = start_cluster(1).await;
        let port = cluster.nodes[0].0.port();

        put_chunk(port, data_chunk("/f-0", b"bye\n")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let conn = MessageConn::connect(&NodeAddr::new("127.0.0.1", port))
            .await
            .unwrap();
        conn.send(&Wrapper::ActionRequest(ActionRequest::rm_chunk("/f-0")))
            .await
            .unwrap();
        conn.shutdown().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(get_chunk(port, "/f-0").await.is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_reports_inventory_and_stats() {
        let cluster = start_cluster(1).await;
        let port = cluster.nodes[0].0.port();

        put_chunk(port, data_chunk("/f-0", b"x\n")).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let heartbeats = cluster.controller.heartbeats.lock();
        let last = heartbeats.last().expect("heartbeats arrived");
        assert_eq!(last.node.uuid, cluster.nodes[0].0.uuid());
        assert!(last.chunks.iter().any(|c| c.chunk_name == "/f-0"));
        assert!(last.chunks.iter().all(|c| c.data.is_empty()));
        assert!(last.stats.uploaded >= 1);
    }
}
