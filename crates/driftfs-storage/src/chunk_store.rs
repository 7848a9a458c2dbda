//! On-disk chunk persistence.
//!
//! Each chunk lives in one file under the storage root at its (path-like)
//! chunk name, holding the wire-encoded `Chunk` message with data and
//! metadata. The inventory scan walks the whole tree and reports metadata
//! without payloads; a scan racing a concurrent delete retries a bounded
//! number of times.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use driftfs_proto::Chunk;
use driftfs_wire::{from_bytes, to_bytes};

const SCAN_RETRIES: u32 = 3;
const SCAN_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, chunk_name: &str) -> PathBuf {
        self.root.join(chunk_name.trim_start_matches('/'))
    }

    /// Write the encoded chunk, creating parent directories on demand.
    pub fn persist(&self, chunk: &Chunk) -> io::Result<()> {
        let path = self.path_for(&chunk.chunk_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, to_bytes(chunk))
    }

    /// Read a chunk back, payload included.
    pub fn retrieve(&self, chunk_name: &str) -> io::Result<Chunk> {
        let bytes = fs::read(self.path_for(chunk_name))?;
        from_bytes(&bytes).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("stored chunk {chunk_name} is corrupt: {e}"),
            )
        })
    }

    pub fn delete(&self, chunk_name: &str) -> io::Result<()> {
        fs::remove_file(self.path_for(chunk_name))
    }

    /// Inventory of every stored chunk, metadata only. A transient error
    /// (a file disappearing mid-walk) gets a fresh scan after a pause.
    pub async fn scan_metadata(&self) -> io::Result<Vec<Chunk>> {
        let mut attempts = 0;
        loop {
            match self.scan_once() {
                Ok(chunks) => return Ok(chunks),
                Err(e) => {
                    attempts += 1;
                    if attempts >= SCAN_RETRIES {
                        return Err(e);
                    }
                    tracing::warn!("inventory scan failed, retrying: {e}");
                    tokio::time::sleep(SCAN_RETRY_DELAY).await;
                }
            }
        }
    }

    fn scan_once(&self) -> io::Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        if self.root.exists() {
            scan_dir(&self.root, &mut chunks)?;
        }
        Ok(chunks)
    }
}

fn scan_dir(dir: &Path, chunks: &mut Vec<Chunk>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            scan_dir(&path, chunks)?;
        } else {
            let bytes = fs::read(&path)?;
            let chunk: Chunk = from_bytes(&bytes).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unreadable chunk at {}: {e}", path.display()),
                )
            })?;
            chunks.push(chunk.metadata_only());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn chunk(name: &str, data: &[u8]) -> Chunk {
        Chunk {
            file_name: name.rsplit_once('-').map(|(f, _)| f.to_string()).unwrap_or_default(),
            chunk_name: name.into(),
            size: data.len() as u64,
            file_size: data.len() as u64,
            data: data.to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn test_persist_and_retrieve() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path());

        let original = chunk("/a/b.txt-0", b"hello\n");
        store.persist(&original).unwrap();

        let back = store.retrieve("/a/b.txt-0").unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_persist_creates_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path());

        store.persist(&chunk("/deep/ly/nested/f-0", b"x")).unwrap();
        assert!(dir.path().join("deep/ly/nested/f-0").exists());
    }

    #[test]
    fn test_retrieve_missing_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path());
        assert!(store.retrieve("/missing-0").is_err());
    }

    #[test]
    fn test_retrieve_corrupt_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path());
        fs::write(dir.path().join("bad"), b"not a chunk").unwrap();

        let err = store.retrieve("/bad").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path());

        store.persist(&chunk("/f-0", b"x")).unwrap();
        store.delete("/f-0").unwrap();
        assert!(store.retrieve("/f-0").is_err());
    }

    #[tokio::test]
    async fn test_scan_reports_metadata_without_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path());

        store.persist(&chunk("/a/f-0", b"payload one")).unwrap();
        store.persist(&chunk("/a/f-1", b"payload two")).unwrap();
        store.persist(&chunk("/b/g-0", b"other")).unwrap();

        let scanned = store.scan_metadata().await.unwrap();
        assert_eq!(scanned.len(), 3);

        let by_name: HashMap<String, Chunk> = scanned
            .into_iter()
            .map(|c| (c.chunk_name.clone(), c))
            .collect();
        assert!(by_name.contains_key("/a/f-0"));
        assert!(by_name.contains_key("/b/g-0"));
        for c in by_name.values() {
            assert!(c.data.is_empty(), "{} kept its payload", c.chunk_name);
            assert!(c.size > 0, "metadata survives");
        }
    }

    #[tokio::test]
    async fn test_scan_of_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path().join("never-created"));
        assert!(store.scan_metadata().await.unwrap().is_empty());
    }
}
