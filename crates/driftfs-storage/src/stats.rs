//! Transfer counters for a storage node.
//!
//! Counter updates funnel through a single owner task; snapshots attach the
//! current free-space reading for the data directory.

use std::path::{Path, PathBuf};

use driftfs_proto::Stats;
use tokio::sync::{mpsc, oneshot};

enum Command {
    AddDownloaded,
    AddUploaded,
    AddReplicated,
    Snapshot(oneshot::Sender<Stats>),
}

#[derive(Clone)]
pub struct StatsBoard {
    tx: mpsc::Sender<Command>,
}

impl StatsBoard {
    /// Spawn the counter task. Free space is probed against `data_dir`.
    pub fn spawn(data_dir: impl Into<PathBuf>) -> Self {
        let (tx, mut rx) = mpsc::channel(64);
        let data_dir = data_dir.into();
        tokio::spawn(async move {
            let mut stats = Stats::default();
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    Command::AddDownloaded => stats.downloaded += 1,
                    Command::AddUploaded => stats.uploaded += 1,
                    Command::AddReplicated => stats.replicated += 1,
                    Command::Snapshot(reply) => {
                        let _ = reply.send(Stats {
                            free_space_gb: free_space_gb(&data_dir),
                            ..stats
                        });
                    }
                }
            }
        });
        Self { tx }
    }

    pub async fn add_downloaded(&self) {
        let _ = self.tx.send(Command::AddDownloaded).await;
    }

    pub async fn add_uploaded(&self) {
        let _ = self.tx.send(Command::AddUploaded).await;
    }

    pub async fn add_replicated(&self) {
        let _ = self.tx.send(Command::AddReplicated).await;
    }

    pub async fn snapshot(&self) -> Stats {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Snapshot(reply)).await.is_err() {
            return Stats::default();
        }
        rx.await.unwrap_or_default()
    }
}

/// Free space of the filesystem holding `path`, in whole GiB. Best effort;
/// probing failures read as zero.
#[cfg(unix)]
pub fn free_space_gb(path: &Path) -> u32 {
    match nix::sys::statvfs::statvfs(path) {
        Ok(stat) => {
            let bytes = stat.blocks_available() as u64 * stat.fragment_size() as u64;
            (bytes >> 30) as u32
        }
        Err(_) => 0,
    }
}

#[cfg(not(unix))]
pub fn free_space_gb(_path: &Path) -> u32 {
    0
}
