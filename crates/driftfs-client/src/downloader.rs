//! Chunk download and reassembly.
//!
//! One task per chunk races the chunk's replicas sequentially until one
//! serves it; bodies flow through a results channel into a single writer
//! that persists them to a temp directory. Once every chunk is on disk the
//! pieces are concatenated in serial order. Fetch errors travel on the same
//! channel, so no failure is ever lost to a background task.

use std::fs;
use std::path::{Path, PathBuf};

use driftfs_net::MessageConn;
use driftfs_proto::{ActionRequest, Chunk, Wrapper};
use driftfs_types::path::basename;
use driftfs_types::{DfsError, Result};
use tokio::sync::mpsc;

const TEMP_DIR: &str = ".temp";

pub struct Downloader {
    save_dir: PathBuf,
    temp_dir: PathBuf,
    /// DFS path; the local file lands at `save_dir` + this path.
    filename: String,
    chunks: Vec<Chunk>,
}

impl Downloader {
    pub fn new(save_dir: impl Into<PathBuf>, filename: impl Into<String>, chunks: Vec<Chunk>) -> Self {
        let save_dir = save_dir.into();
        let temp_dir = save_dir.join(TEMP_DIR);
        Self {
            save_dir,
            temp_dir,
            filename: filename.into(),
            chunks,
        }
    }

    /// Fetch every chunk and reassemble the file. Returns the local path.
    pub async fn download(mut self) -> Result<PathBuf> {
        fs::create_dir_all(&self.temp_dir)?;
        let dest = self.save_dir.join(self.filename.trim_start_matches('/'));
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(file = %self.filename, chunks = self.chunks.len(), "downloading");
        self.fetch_all().await?;
        self.merge(&dest)?;
        Ok(dest)
    }

    /// Spawn one fetch task per chunk and persist bodies as they arrive.
    async fn fetch_all(&self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<Result<Chunk>>(self.chunks.len().max(1));
        for chunk in &self.chunks {
            let meta = chunk.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(fetch_chunk(meta).await).await;
            });
        }
        drop(tx);

        let mut first_error = None;
        while let Some(result) = rx.recv().await {
            match result {
                Ok(chunk) => {
                    let path = self.temp_path(&chunk.chunk_name);
                    fs::write(&path, &chunk.data)?;
                }
                Err(e) => {
                    tracing::error!("chunk fetch failed: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn merge(&mut self, dest: &Path) -> Result<()> {
        self.chunks.sort_by_key(|c| c.serial);

        let mut out = Vec::new();
        for chunk in &self.chunks {
            let temp = self.temp_path(&chunk.chunk_name);
            out.extend_from_slice(&fs::read(&temp)?);
            fs::remove_file(&temp)?;
        }
        fs::write(dest, out)?;
        Ok(())
    }

    fn temp_path(&self, chunk_name: &str) -> PathBuf {
        self.temp_dir.join(basename(chunk_name))
    }
}

/// Try each replica in turn until one serves the chunk.
async fn fetch_chunk(meta: Chunk) -> Result<Chunk> {
    if meta.storage_nodes.is_empty() {
        return Err(DfsError::Transport(format!(
            "chunk {} has no available storage nodes",
            meta.chunk_name
        )));
    }

    for node in meta.storage_nodes.values() {
        let conn = match MessageConn::connect(&node.addr()).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(addr = %node.addr(), "replica unreachable: {e}");
                continue;
            }
        };
        let request = Wrapper::ActionRequest(ActionRequest::get_chunk(meta.chunk_name.clone()));
        if conn.send(&request).await.is_err() {
            continue;
        }
        match conn.recv().await {
            Ok(Wrapper::Chunk(chunk)) => return Ok(chunk),
            Ok(Wrapper::Ack(ack)) => {
                tracing::warn!(
                    addr = %node.addr(),
                    chunk = %meta.chunk_name,
                    "replica refused: {}",
                    ack.error_message
                );
            }
            Ok(other) => {
                tracing::warn!(kind = other.kind(), "unexpected reply to chunk GET");
            }
            Err(e) => {
                tracing::warn!(addr = %node.addr(), "replica read failed: {e}");
            }
        }
    }

    Err(DfsError::Transport(format!(
        "no replica could serve chunk {}",
        meta.chunk_name
    )))
}
