//! Round-robin chunk upload across the storage nodes the controller handed
//! back.
//!
//! One connection per node; chunks are dispatched in rotation, and every
//! full rotation waits for the in-flight batch before continuing, which
//! keeps at most one chunk per node outstanding.

use std::sync::Arc;

use driftfs_net::MessageConn;
use driftfs_proto::{ActionRequest, Node, Wrapper};
use driftfs_types::{DfsError, Result};
use tokio::task::JoinSet;

use crate::chunker::Chunker;

pub struct Uploader {
    nodes: Vec<Node>,
}

impl Uploader {
    /// Least-loaded nodes (by uploaded-chunk count) come first in the
    /// rotation.
    pub fn new(mut nodes: Vec<Node>) -> Self {
        nodes.sort_by_key(|n| n.stats.uploaded);
        Self { nodes }
    }

    pub async fn upload(&self, chunker: &mut Chunker) -> Result<()> {
        let mut conns: Vec<Arc<MessageConn>> = Vec::new();
        for node in &self.nodes {
            match MessageConn::connect(&node.addr()).await {
                Ok(conn) => conns.push(Arc::new(conn)),
                Err(e) => tracing::warn!(uuid = %node.uuid, addr = %node.addr(), "skipping node: {e}"),
            }
        }
        if conns.is_empty() {
            return Err(DfsError::Transport(
                "no storage node is reachable for upload".into(),
            ));
        }

        tracing::info!(nodes = conns.len(), "uploading");
        let mut batch: JoinSet<Result<()>> = JoinSet::new();
        let mut next = 0;

        while let Some(chunk) = chunker.next_chunk()? {
            let conn = Arc::clone(&conns[next]);
            batch.spawn(async move {
                let name = chunk.chunk_name.clone();
                conn.send(&Wrapper::ActionRequest(ActionRequest::put_chunk(chunk)))
                    .await
                    .map_err(|e| DfsError::Transport(format!("sending {name}: {e}")))
            });

            next += 1;
            if next == conns.len() {
                drain(&mut batch).await?;
                next = 0;
            }
        }
        drain(&mut batch).await
    }
}

async fn drain(batch: &mut JoinSet<Result<()>>) -> Result<()> {
    while let Some(joined) = batch.join_next().await {
        joined.map_err(|e| DfsError::Transport(format!("upload task panicked: {e}")))??;
    }
    Ok(())
}
