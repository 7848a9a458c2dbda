//! The compute engine's per-job coordinator.
//!
//! A job flows accept -> mappers (co-located with chunks) -> shuffle ->
//! reducers -> done, with a `ComputationStatus` frame streamed to the
//! client at each transition. Any mapper failure, or the client hanging up,
//! terminates the job.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use driftfs_net::{ConnectionHandler, MessageConn};
use driftfs_proto::{
    ActionRequest, ActionType, Chunk, ComputationStatus, FileInfo, JobStatus, Node, Plugin,
    Registration, Wrapper,
};
use driftfs_types::{DfsError, NodeAddr, Result, COMPUTE_ENGINE_UUID, REDUCER_NODE_THRESHOLD};
use rand::seq::SliceRandom;
use tokio::sync::mpsc;

pub struct ResourceManager {
    controller: NodeAddr,
    reducer_threshold: usize,
}

impl ResourceManager {
    pub fn new(controller: NodeAddr) -> Self {
        Self {
            controller,
            reducer_threshold: REDUCER_NODE_THRESHOLD,
        }
    }

    /// Override the owner-count threshold above which a job gets a second
    /// reducer.
    pub fn with_reducer_threshold(controller: NodeAddr, reducer_threshold: usize) -> Self {
        Self {
            controller,
            reducer_threshold,
        }
    }

    /// Announce this engine to the controller under the sentinel uuid so
    /// COMPUTE requests get relayed here.
    pub async fn register(&self, hostname: &str, port: u16) -> Result<()> {
        let conn = MessageConn::connect(&self.controller).await?;
        let node = Node::new(COMPUTE_ENGINE_UUID, hostname, port);
        conn.send(&Wrapper::Registration(Registration { node }))
            .await
            .map_err(DfsError::from)
    }

    async fn resolve_file(&self, filename: &str) -> Result<FileInfo> {
        let conn = MessageConn::connect(&self.controller).await?;
        conn.send(&Wrapper::ActionRequest(ActionRequest::get_file(filename)))
            .await
            .map_err(DfsError::from)?;
        match conn.recv().await.map_err(DfsError::from)? {
            Wrapper::File(file) => Ok(file),
            Wrapper::Ack(ack) => Err(DfsError::NotFound(ack.error_message)),
            other => Err(DfsError::UnexpectedMessage(other.kind().into())),
        }
    }

    async fn handle_job(&self, client: &MessageConn, request: ActionRequest) {
        let filename = request.file_name.clone();
        let output_filename = request.output_filename.clone();
        let Some(plugin) = request.plugin else {
            let _ = send_status(
                client,
                ComputationStatus::failed(JobStatus::JobAccepted, "compute request has no plugin"),
            )
            .await;
            return;
        };

        tracing::info!(
            file = %filename,
            plugin = %plugin.name,
            output = %output_filename,
            "new compute job"
        );

        let file = match self.resolve_file(&filename).await {
            Ok(file) => file,
            Err(e) => {
                tracing::error!(file = %filename, "cannot resolve target file: {e}");
                let _ = send_status(
                    client,
                    ComputationStatus::failed(JobStatus::JobAccepted, e.to_string()),
                )
                .await;
                return;
            }
        };

        if send_status(
            client,
            ComputationStatus::progress(JobStatus::JobAccepted, ""),
        )
        .await
        .is_err()
        {
            return;
        }

        let reducers = select_reducers(&file.chunks, self.reducer_threshold);
        if reducers.is_empty() {
            let _ = send_status(
                client,
                ComputationStatus::failed(JobStatus::JobMappers, "target file has no owners"),
            )
            .await;
            return;
        }
        tracing::info!(count = reducers.len(), "reducers assigned");

        let Some(assignments) = self
            .run_mapper_phase(client, &file.chunks, &plugin, &output_filename, &reducers)
            .await
        else {
            return;
        };

        self.run_reducer_phase(client, &reducers, assignments, &plugin, &output_filename)
            .await;
    }

    /// Dispatch one mapper per chunk and collect their shuffle tables.
    /// Returns reducer-uuid -> partition filenames, or `None` after a
    /// failure has been reported.
    async fn run_mapper_phase(
        &self,
        client: &MessageConn,
        chunks: &[Chunk],
        plugin: &Plugin,
        output_filename: &str,
        reducers: &[Node],
    ) -> Option<HashMap<String, Vec<String>>> {
        let (tx, mut rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            let chunk = chunk.clone();
            let plugin = plugin.clone();
            let output = output_filename.to_string();
            let reducers = reducers.to_vec();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = dispatch_map(&chunk, plugin, &output, reducers).await;
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut assignments: HashMap<String, Vec<String>> = HashMap::new();
        for completed in 1..=chunks.len() {
            let files_table = match rx.recv().await {
                Some(Ok(table)) => table,
                Some(Err(e)) => {
                    tracing::error!("mapper failed: {e}");
                    let _ = send_status(
                        client,
                        ComputationStatus::failed(
                            JobStatus::JobMappers,
                            "Something went wrong in one of the mappers",
                        ),
                    )
                    .await;
                    return None;
                }
                None => return None,
            };

            for (filename, node) in files_table {
                assignments.entry(node.uuid).or_default().push(filename);
            }

            let message = format!("Mappers completed {completed}/{}", chunks.len());
            tracing::info!("{message}");
            if send_status(
                client,
                ComputationStatus::progress(JobStatus::JobMappers, message),
            )
            .await
            .is_err()
            {
                // Client went away; stop driving the job.
                return None;
            }
        }
        Some(assignments)
    }

    async fn run_reducer_phase(
        &self,
        client: &MessageConn,
        reducers: &[Node],
        assignments: HashMap<String, Vec<String>>,
        plugin: &Plugin,
        output_filename: &str,
    ) {
        if send_status(
            client,
            ComputationStatus::progress(JobStatus::JobReducers, "Initiating Reduce phase"),
        )
        .await
        .is_err()
        {
            return;
        }

        let (tx, mut rx) = mpsc::channel(reducers.len());
        for (number, reducer) in reducers.iter().enumerate() {
            let reducer = reducer.clone();
            let files = assignments.get(&reducer.uuid).cloned().unwrap_or_default();
            let plugin = plugin.clone();
            let output = output_filename.to_string();
            let tx = tx.clone();
            tokio::spawn(async move {
                let ok = dispatch_reduce(&reducer, files, plugin, number as i32, &output).await;
                let _ = tx.send(ok).await;
            });
        }
        drop(tx);

        let mut failed = 0usize;
        for completed in 1..=reducers.len() {
            match rx.recv().await {
                Some(true) => {
                    let message = format!("Reducers completed {completed}/{}", reducers.len());
                    if send_status(
                        client,
                        ComputationStatus::progress(JobStatus::JobReducers, message),
                    )
                    .await
                    .is_err()
                    {
                        return;
                    }
                }
                Some(false) => failed += 1,
                None => return,
            }
        }

        let summary = format!(
            "Reducers successful {}/{}; Failed {}/{}",
            reducers.len() - failed,
            reducers.len(),
            failed,
            reducers.len()
        );
        tracing::info!("{summary}");
        if send_status(
            client,
            ComputationStatus::progress(JobStatus::JobReducers, summary),
        )
        .await
        .is_err()
        {
            return;
        }
        let _ = send_status(
            client,
            ComputationStatus::progress(JobStatus::JobDone, ""),
        )
        .await;
    }
}

async fn send_status(client: &MessageConn, status: ComputationStatus) -> Result<()> {
    client
        .send(&Wrapper::ComputationStatus(status))
        .await
        .map_err(|e| DfsError::Transport(e.to_string()))
}

/// The union of owner nodes across `chunks`, sorted by uuid for a
/// deterministic choice, truncated to the reducer count the heuristic
/// allows: two reducers for more than `threshold` owners, else one.
fn select_reducers(chunks: &[Chunk], threshold: usize) -> Vec<Node> {
    let mut owners: HashMap<&str, &Node> = HashMap::new();
    for chunk in chunks {
        for (uuid, node) in &chunk.storage_nodes {
            owners.insert(uuid.as_str(), node);
        }
    }

    let num_reducers = if owners.len() > threshold { 2 } else { 1 };
    let mut nodes: Vec<&Node> = owners.into_values().collect();
    nodes.sort_by(|a, b| a.uuid.cmp(&b.uuid));
    nodes.into_iter().take(num_reducers).cloned().collect()
}

/// Pick a random owner of `chunk` and run a map task there. Returns the
/// mapper's files table on success.
async fn dispatch_map(
    chunk: &Chunk,
    plugin: Plugin,
    output_filename: &str,
    reducers: Vec<Node>,
) -> Result<HashMap<String, Node>> {
    let owners: Vec<&Node> = chunk.storage_nodes.values().collect();
    let mapper = owners
        .choose(&mut rand::thread_rng())
        .ok_or_else(|| DfsError::Compute(format!("chunk {} has no owners", chunk.chunk_name)))?;

    tracing::info!(
        chunk = %chunk.chunk_name,
        mapper = %mapper.addr(),
        "dispatching map task"
    );
    let conn = MessageConn::connect(&mapper.addr())
        .await
        .map_err(|e| DfsError::Compute(format!("Could not connect to Mapper: {e}")))?;
    conn.send(&Wrapper::ActionRequest(ActionRequest::compute_map(
        chunk.chunk_name.clone(),
        plugin,
        output_filename,
        reducers,
    )))
    .await
    .map_err(DfsError::from)?;

    match conn.recv().await.map_err(DfsError::from)? {
        Wrapper::ComputationStatus(status) if status.ok => Ok(status.files_table),
        Wrapper::ComputationStatus(status) => Err(DfsError::Compute(status.message)),
        other => Err(DfsError::UnexpectedMessage(other.kind().into())),
    }
}

async fn dispatch_reduce(
    reducer: &Node,
    files: Vec<String>,
    plugin: Plugin,
    reducer_number: i32,
    output_filename: &str,
) -> bool {
    tracing::info!(
        reducer = %reducer.addr(),
        files = files.len(),
        reducer_number,
        "dispatching reduce task"
    );
    let conn = match MessageConn::connect(&reducer.addr()).await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!(reducer = %reducer.uuid, "Could not connect to Reducer: {e}");
            return false;
        }
    };
    let request = ActionRequest::compute_reduce(files, plugin, reducer_number, output_filename);
    if conn.send(&Wrapper::ActionRequest(request)).await.is_err() {
        return false;
    }

    match conn.recv().await {
        Ok(Wrapper::ComputationStatus(status)) if status.ok => true,
        Ok(Wrapper::ComputationStatus(status)) => {
            tracing::error!(stage = %status.status, "reducer failed: {}", status.message);
            false
        }
        Ok(other) => {
            tracing::error!(kind = other.kind(), "unexpected frame from reducer");
            false
        }
        Err(e) => {
            tracing::error!("reducer connection lost: {e}");
            false
        }
    }
}

#[async_trait]
impl ConnectionHandler for ResourceManager {
    async fn handle(self: Arc<Self>, conn: MessageConn) {
        match conn.recv().await {
            Ok(Wrapper::ActionRequest(request)) if request.action == ActionType::Compute => {
                self.handle_job(&conn, request).await;
            }
            Ok(other) => {
                tracing::error!(kind = other.kind(), "unexpected message at compute engine");
            }
            Err(e) if e.is_closed() => {}
            Err(e) => tracing::warn!("receive failed: {e}"),
        }
        conn.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_with_owners(name: &str, owners: &[&str]) -> Chunk {
        let mut chunk = Chunk {
            file_name: "/f".into(),
            chunk_name: name.into(),
            ..Default::default()
        };
        for uuid in owners {
            chunk
                .storage_nodes
                .insert(uuid.to_string(), Node::new(*uuid, "localhost", 7500));
        }
        chunk
    }

    #[test]
    fn test_small_owner_set_gets_one_reducer() {
        let chunks = vec![
            chunk_with_owners("/f-0", &["a", "b"]),
            chunk_with_owners("/f-1", &["b", "c"]),
        ];
        let reducers = select_reducers(&chunks, REDUCER_NODE_THRESHOLD);
        assert_eq!(reducers.len(), 1);
        // Deterministic: the uuid-smallest owner.
        assert_eq!(reducers[0].uuid, "a");
    }

    #[test]
    fn test_large_owner_set_gets_two_reducers() {
        let chunks = vec![
            chunk_with_owners("/f-0", &["a", "b", "c"]),
            chunk_with_owners("/f-1", &["d", "e", "f"]),
        ];
        let reducers = select_reducers(&chunks, REDUCER_NODE_THRESHOLD);
        assert_eq!(reducers.len(), 2);
        assert_eq!(reducers[0].uuid, "a");
        assert_eq!(reducers[1].uuid, "b");
    }

    #[test]
    fn test_exactly_threshold_owners_gets_one_reducer() {
        let chunks = vec![chunk_with_owners("/f-0", &["a", "b", "c", "d", "e"])];
        assert_eq!(select_reducers(&chunks, 5).len(), 1);
    }

    #[test]
    fn test_owner_union_deduplicates() {
        // Six chunk-owner pairs but only three distinct owners.
        let chunks = vec![
            chunk_with_owners("/f-0", &["a", "b", "c"]),
            chunk_with_owners("/f-1", &["a", "b", "c"]),
        ];
        assert_eq!(select_reducers(&chunks, REDUCER_NODE_THRESHOLD).len(), 1);
    }

    #[test]
    fn test_no_owners_no_reducers() {
        let chunks = vec![chunk_with_owners("/f-0", &[])];
        assert!(select_reducers(&chunks, REDUCER_NODE_THRESHOLD).is_empty());
    }
}
