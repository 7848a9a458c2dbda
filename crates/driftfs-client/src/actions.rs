//! The client's controller-facing operations.

use std::fs;
use std::path::{Path, PathBuf};

use driftfs_net::MessageConn;
use driftfs_proto::{
    ActionRequest, ComputationStatus, FileInfo, JobStatus, Node, Plugin, Wrapper,
};
use driftfs_types::path::basename;
use driftfs_types::{DfsError, NodeAddr, Result};

use crate::chunker::Chunker;
use crate::downloader::Downloader;
use crate::uploader::Uploader;

pub struct ClientActions {
    controller: NodeAddr,
    /// Where downloads are reassembled.
    save_dir: PathBuf,
}

impl ClientActions {
    pub fn new(controller: NodeAddr, save_dir: impl Into<PathBuf>) -> Self {
        Self {
            controller,
            save_dir: save_dir.into(),
        }
    }

    async fn connect(&self) -> Result<MessageConn> {
        MessageConn::connect(&self.controller)
            .await
            .map_err(DfsError::from)
    }

    pub async fn ls(&self) -> Result<Vec<FileInfo>> {
        let conn = self.connect().await?;
        conn.send(&Wrapper::ActionRequest(ActionRequest::ls()))
            .await
            .map_err(DfsError::from)?;
        match conn.recv().await.map_err(DfsError::from)? {
            Wrapper::Files(files) => Ok(files.files),
            other => Err(DfsError::UnexpectedMessage(other.kind().into())),
        }
    }

    pub async fn cluster_stats(&self) -> Result<Vec<Node>> {
        let conn = self.connect().await?;
        conn.send(&Wrapper::ActionRequest(ActionRequest::cluster_stats()))
            .await
            .map_err(DfsError::from)?;
        match conn.recv().await.map_err(DfsError::from)? {
            Wrapper::StorageNodes(reply) => Ok(reply.nodes),
            other => Err(DfsError::UnexpectedMessage(other.kind().into())),
        }
    }

    /// PUT: ask the controller for the live nodes, then chunk and spread
    /// the local file across them.
    pub async fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        let conn = self.connect().await?;
        conn.send(&Wrapper::ActionRequest(ActionRequest::put_file(remote)))
            .await
            .map_err(DfsError::from)?;
        match conn.recv().await.map_err(DfsError::from)? {
            Wrapper::StorageNodes(reply) => {
                let mut chunker = Chunker::open(local, remote)?;
                Uploader::new(reply.nodes).upload(&mut chunker).await
            }
            Wrapper::Ack(ack) => Err(DfsError::Conflict(ack.error_message)),
            other => Err(DfsError::UnexpectedMessage(other.kind().into())),
        }
    }

    /// GET: resolve chunk locations, download them all, reassemble.
    /// Returns the local path of the reassembled file.
    pub async fn download(&self, remote: &str, save_as: Option<&str>) -> Result<PathBuf> {
        let conn = self.connect().await?;
        conn.send(&Wrapper::ActionRequest(ActionRequest::get_file(remote)))
            .await
            .map_err(DfsError::from)?;
        match conn.recv().await.map_err(DfsError::from)? {
            Wrapper::File(file) => {
                let local_name = save_as.unwrap_or(remote);
                Downloader::new(&self.save_dir, local_name, file.chunks)
                    .download()
                    .await
            }
            Wrapper::Ack(ack) => Err(DfsError::NotFound(ack.error_message)),
            other => Err(DfsError::UnexpectedMessage(other.kind().into())),
        }
    }

    pub async fn delete(&self, remote: &str) -> Result<()> {
        let conn = self.connect().await?;
        conn.send(&Wrapper::ActionRequest(ActionRequest::rm_file(remote)))
            .await
            .map_err(DfsError::from)?;
        match conn.recv().await.map_err(DfsError::from)? {
            Wrapper::Ack(ack) if ack.ok => Ok(()),
            Wrapper::Ack(ack) => Err(DfsError::NotFound(ack.error_message)),
            other => Err(DfsError::UnexpectedMessage(other.kind().into())),
        }
    }

    /// Submit a compute job and stream status frames into `on_status`
    /// until the job completes or fails.
    pub async fn compute(
        &self,
        plugin_path: &Path,
        target: &str,
        output: &str,
        mut on_status: impl FnMut(&ComputationStatus),
    ) -> Result<()> {
        let bytes = fs::read(plugin_path)?;
        let plugin = Plugin {
            name: format!("/{}", basename(&plugin_path.to_string_lossy())),
            bytes,
        };

        let conn = self.connect().await?;
        conn.send(&Wrapper::ActionRequest(ActionRequest::compute_job(
            target, plugin, output,
        )))
        .await
        .map_err(DfsError::from)?;

        loop {
            match conn.recv().await.map_err(DfsError::from)? {
                Wrapper::ComputationStatus(status) => {
                    on_status(&status);
                    if !status.ok {
                        return Err(DfsError::Compute(status.message));
                    }
                    if status.status == JobStatus::JobDone {
                        return Ok(());
                    }
                }
                Wrapper::Ack(ack) => return Err(DfsError::Compute(ack.error_message)),
                other => return Err(DfsError::UnexpectedMessage(other.kind().into())),
            }
        }
    }
}
