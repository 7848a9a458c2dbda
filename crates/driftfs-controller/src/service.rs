//! The controller's connection handler: registrations, heartbeats, and the
//! client-facing action surface (LS/GET/PUT/RM/COMPUTE/CLUSTER_STATS).

use std::sync::Arc;

use async_trait::async_trait;
use driftfs_net::{ConnectionHandler, MessageConn};
use driftfs_proto::{
    Ack, ActionRequest, ActionType, Files, Heartbeat, JobStatus, Node, Registration, StorageNodes,
    Wrapper,
};
use driftfs_types::{NodeAddr, COMPUTE_ENGINE_UUID};
use parking_lot::Mutex;

use crate::file_index::FileIndex;
use crate::membership::Membership;

pub struct Controller {
    membership: Membership,
    index: FileIndex,
    /// Where COMPUTE requests get relayed once the engine registers.
    compute_engine: Mutex<Option<NodeAddr>>,
}

impl Controller {
    /// Spawn the membership and file-index owner tasks and wire the
    /// node-down listener between them.
    pub async fn new() -> Arc<Self> {
        let membership = Membership::spawn();
        let index = FileIndex::spawn();
        membership.on_node_down(index.node_down_listener()).await;
        Arc::new(Self {
            membership,
            index,
            compute_engine: Mutex::new(None),
        })
    }

    /// Assemble a controller around externally spawned components
    /// (tests use short failure-detector timings).
    pub async fn with_parts(membership: Membership, index: FileIndex) -> Arc<Self> {
        membership.on_node_down(index.node_down_listener()).await;
        Arc::new(Self {
            membership,
            index,
            compute_engine: Mutex::new(None),
        })
    }

    async fn handle_registration(&self, registration: Registration) {
        let node = registration.node;
        if node.uuid == COMPUTE_ENGINE_UUID {
            let addr = node.addr();
            tracing::info!(%addr, "compute engine registered");
            *self.compute_engine.lock() = Some(addr);
            return;
        }
        self.membership.register(node).await;
    }

    async fn handle_heartbeat(&self, conn: &MessageConn, heartbeat: Heartbeat) {
        let Heartbeat { node, chunks, stats } = heartbeat;
        self.membership.heartbeat(node.clone(), stats).await;
        self.index.update(node, chunks).await;
        self.send_nodes(conn).await;
    }

    /// Reply with the current live-node list.
    async fn send_nodes(&self, conn: &MessageConn) {
        let nodes = self.membership.nodes().await;
        let reply = Wrapper::StorageNodes(StorageNodes { nodes });
        if let Err(e) = conn.send(&reply).await {
            tracing::warn!(peer = %conn.peer_addr(), "failed to send node list: {e}");
        }
    }

    async fn handle_action(&self, conn: &MessageConn, request: ActionRequest) {
        tracing::info!(
            action = ?request.action,
            file = %request.file_name,
            chunk = %request.chunk_name,
            "action request"
        );
        match request.action {
            ActionType::Ls => self.handle_ls(conn).await,
            ActionType::Get => self.handle_get(conn, &request.file_name).await,
            ActionType::Put => self.handle_put(conn, &request.file_name).await,
            ActionType::Rm => self.handle_rm(conn, &request.file_name).await,
            ActionType::Compute => self.handle_compute(conn, request).await,
            ActionType::ClusterStats => self.send_nodes(conn).await,
            ActionType::ComputeStore => {
                let _ = conn
                    .send(&Wrapper::Ack(Ack::failure(
                        "COMPUTE_STORE is a storage-node request",
                    )))
                    .await;
            }
        }
    }

    async fn handle_ls(&self, conn: &MessageConn) {
        let files = self.index.ls().await;
        let _ = conn.send(&Wrapper::Files(Files { files })).await;
    }

    async fn handle_get(&self, conn: &MessageConn, filename: &str) {
        let reply = match self.index.get(filename).await {
            Some(file) => Wrapper::File(file),
            None => Wrapper::Ack(Ack::failure(format!("{filename} doesn't exist"))),
        };
        let _ = conn.send(&reply).await;
    }

    /// PUT returns the live-node list and reserves the filename; the client
    /// spreads chunks over the returned nodes itself.
    async fn handle_put(&self, conn: &MessageConn, filename: &str) {
        let nodes = self.membership.nodes().await;
        let reply = if nodes.is_empty() {
            Wrapper::Ack(Ack::failure("Currently there are no Storage Nodes online"))
        } else if self.index.file_exists(filename).await {
            Wrapper::Ack(Ack::failure(
                "FileName already exists. Please choose a different name.",
            ))
        } else {
            self.index.reserve(filename).await;
            Wrapper::StorageNodes(StorageNodes { nodes })
        };
        let _ = conn.send(&reply).await;
    }

    async fn handle_rm(&self, conn: &MessageConn, filename: &str) {
        let Some(file) = self.index.get(filename).await else {
            let _ = conn
                .send(&Wrapper::Ack(Ack::failure(format!(
                    "{filename} doesn't exist"
                ))))
                .await;
            return;
        };

        self.index.remove(filename).await;
        let _ = conn.send(&Wrapper::Ack(Ack::success())).await;

        // Fan the removal out to every owning node off the request path.
        tokio::spawn(async move {
            for chunk in &file.chunks {
                for node in chunk.storage_nodes.values() {
                    remove_chunk_on(node, &chunk.chunk_name).await;
                }
            }
        });
    }

    /// Relay a compute job to the engine and stream its status frames back
    /// until the job finishes or fails.
    async fn handle_compute(&self, conn: &MessageConn, request: ActionRequest) {
        let engine_addr = self.compute_engine.lock().clone();
        let Some(addr) = engine_addr else {
            let _ = conn
                .send(&Wrapper::Ack(Ack::failure("Compute Engine is OFFLINE")))
                .await;
            return;
        };

        let engine = match MessageConn::connect(&addr).await {
            Ok(engine) => engine,
            Err(e) => {
                tracing::warn!(%addr, "compute engine unreachable: {e}");
                let _ = conn
                    .send(&Wrapper::Ack(Ack::failure("Compute Engine is OFFLINE")))
                    .await;
                return;
            }
        };

        if engine.send(&Wrapper::ActionRequest(request)).await.is_err() {
            let _ = conn
                .send(&Wrapper::Ack(Ack::failure("Compute Engine is OFFLINE")))
                .await;
            return;
        }

        loop {
            match engine.recv().await {
                Ok(Wrapper::ComputationStatus(status)) => {
                    let terminal = !status.ok || status.status == JobStatus::JobDone;
                    if conn
                        .send(&Wrapper::ComputationStatus(status))
                        .await
                        .is_err()
                    {
                        tracing::debug!("client left during compute relay");
                        return;
                    }
                    if terminal {
                        return;
                    }
                }
                Ok(other) => {
                    tracing::error!(kind = other.kind(), "unexpected frame from compute engine");
                    return;
                }
                Err(e) => {
                    tracing::error!("compute engine connection lost: {e}");
                    return;
                }
            }
        }
    }
}

async fn remove_chunk_on(node: &Node, chunk_name: &str) {
    match MessageConn::connect(&node.addr()).await {
        Ok(conn) => {
            let request = Wrapper::ActionRequest(ActionRequest::rm_chunk(chunk_name));
            if let Err(e) = conn.send(&request).await {
                tracing::warn!(uuid = %node.uuid, chunk = %chunk_name, "rm send failed: {e}");
            }
        }
        Err(e) => {
            tracing::warn!(uuid = %node.uuid, chunk = %chunk_name, "rm connect failed: {e}");
        }
    }
}

#[async_trait]
impl ConnectionHandler for Controller {
    /// One request per connection; COMPUTE holds it open for status relay.
    async fn handle(self: Arc<Self>, conn: MessageConn) {
        match conn.recv().await {
            Ok(Wrapper::Registration(registration)) => {
                self.handle_registration(registration).await;
            }
            Ok(Wrapper::Heartbeat(heartbeat)) => {
                self.handle_heartbeat(&conn, heartbeat).await;
            }
            Ok(Wrapper::ActionRequest(request)) => {
                self.handle_action(&conn, request).await;
            }
            Ok(other) => {
                tracing::error!(kind = other.kind(), "unexpected message");
            }
            Err(e) if e.is_closed() => {
                tracing::debug!(peer = %conn.peer_addr(), "connection closed");
            }
            Err(e) => {
                tracing::warn!(peer = %conn.peer_addr(), "receive failed: {e}");
            }
        }
        conn.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftfs_net::Server;
    use driftfs_proto::{Chunk, Stats};
    use std::time::Duration;

    async fn start_controller() -> (u16, driftfs_net::ServerHandle) {
        let controller = Controller::new().await;
        let server = Server::bind(0).await.unwrap();
        let port = server.port();
        let handle = server.start(controller);
        (port, handle)
    }

    async fn request(port: u16, message: Wrapper) -> Wrapper {
        let conn = MessageConn::connect(&NodeAddr::new("127.0.0.1", port))
            .await
            .unwrap();
        conn.send(&message).await.unwrap();
        conn.recv().await.unwrap()
    }

    fn heartbeat(uuid: &str, chunks: Vec<Chunk>) -> Wrapper {
        Wrapper::Heartbeat(Heartbeat {
            node: Node::new(uuid, "127.0.0.1", 0),
            chunks,
            stats: Stats::default(),
        })
    }

    fn chunk(file: &str, serial: i32) -> Chunk {
        Chunk {
            file_name: file.into(),
            chunk_name: format!("{file}-{serial}"),
            serial,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_heartbeat_returns_live_nodes() {
        let (port, handle) = start_controller().await;

        match request(port, heartbeat("n1", vec![])).await {
            Wrapper::StorageNodes(reply) => {
                assert_eq!(reply.nodes.len(), 1);
                assert_eq!(reply.nodes[0].uuid, "n1");
            }
            other => panic!("unexpected {}", other.kind()),
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_put_without_nodes_is_refused() {
        let (port, handle) = start_controller().await;

        match request(port, Wrapper::ActionRequest(ActionRequest::put_file("/f"))).await {
            Wrapper::Ack(ack) => {
                assert!(!ack.ok);
                assert!(ack.error_message.contains("no Storage Nodes"));
            }
            other => panic!("unexpected {}", other.kind()),
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_put_conflict_while_pending() {
        let (port, handle) = start_controller().await;
        request(port, heartbeat("n1", vec![])).await;

        // First PUT reserves the name and returns nodes.
        match request(port, Wrapper::ActionRequest(ActionRequest::put_file("/a/b.txt"))).await {
            Wrapper::StorageNodes(reply) => assert_eq!(reply.nodes.len(), 1),
            other => panic!("unexpected {}", other.kind()),
        }

        // Second PUT of the same name collides with the reservation.
        match request(port, Wrapper::ActionRequest(ActionRequest::put_file("/a/b.txt"))).await {
            Wrapper::Ack(ack) => {
                assert!(!ack.ok);
                assert!(ack.error_message.contains("already exists"));
            }
            other => panic!("unexpected {}", other.kind()),
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_get_unknown_file() {
        let (port, handle) = start_controller().await;

        match request(port, Wrapper::ActionRequest(ActionRequest::get_file("/nope"))).await {
            Wrapper::Ack(ack) => {
                assert!(!ack.ok);
                assert_eq!(ack.error_message, "/nope doesn't exist");
            }
            other => panic!("unexpected {}", other.kind()),
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_ls_and_get_after_heartbeat_report() {
        let (port, handle) = start_controller().await;
        request(port, heartbeat("n1", vec![chunk("/f", 0), chunk("/f", 1)])).await;

        match request(port, Wrapper::ActionRequest(ActionRequest::ls())).await {
            Wrapper::Files(files) => {
                assert_eq!(files.files.len(), 1);
                assert_eq!(files.files[0].path, "/f");
            }
            other => panic!("unexpected {}", other.kind()),
        }

        match request(port, Wrapper::ActionRequest(ActionRequest::get_file("/f"))).await {
            Wrapper::File(file) => {
                assert_eq!(file.chunks.len(), 2);
                for c in &file.chunks {
                    assert!(c.storage_nodes.contains_key("n1"));
                }
            }
            other => panic!("unexpected {}", other.kind()),
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_rm_removes_and_acks() {
        let (port, handle) = start_controller().await;
        request(port, heartbeat("n1", vec![chunk("/f", 0)])).await;

        match request(port, Wrapper::ActionRequest(ActionRequest::rm_file("/f"))).await {
            Wrapper::Ack(ack) => assert!(ack.ok),
            other => panic!("unexpected {}", other.kind()),
        }

        match request(port, Wrapper::ActionRequest(ActionRequest::get_file("/f"))).await {
            Wrapper::Ack(ack) => assert!(!ack.ok),
            other => panic!("unexpected {}", other.kind()),
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_cluster_stats_reports_nodes() {
        let (port, handle) = start_controller().await;
        request(port, heartbeat("n1", vec![])).await;
        request(port, heartbeat("n2", vec![])).await;

        match request(port, Wrapper::ActionRequest(ActionRequest::cluster_stats())).await {
            Wrapper::StorageNodes(reply) => assert_eq!(reply.nodes.len(), 2),
            other => panic!("unexpected {}", other.kind()),
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_compute_without_engine_is_refused() {
        let (port, handle) = start_controller().await;

        let job = ActionRequest::compute_job("/f", Default::default(), "/out");
        match request(port, Wrapper::ActionRequest(job)).await {
            Wrapper::Ack(ack) => {
                assert!(!ack.ok);
                assert!(ack.error_message.contains("OFFLINE"));
            }
            other => panic!("unexpected {}", other.kind()),
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_dead_node_disappears_from_index() {
        let membership =
            Membership::spawn_with(Duration::from_millis(20), Duration::from_millis(60));
        let index = FileIndex::spawn();
        let controller = Controller::with_parts(membership, index.clone()).await;
        let server = Server::bind(0).await.unwrap();
        let port = server.port();
        let handle = server.start(controller);

        request(port, heartbeat("doomed", vec![chunk("/f", 0)])).await;

        // "healthy" keeps heartbeating while "doomed" goes silent.
        for _ in 0..7 {
            request(port, heartbeat("healthy", vec![chunk("/f", 0)])).await;
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        let file = index.get("/f").await.unwrap();
        assert!(!file.chunks[0].storage_nodes.contains_key("doomed"));
        assert!(file.chunks[0].storage_nodes.contains_key("healthy"));

        handle.shutdown().await;
    }
}
