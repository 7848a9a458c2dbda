//! Splits a local file into newline-aligned chunks for upload.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use driftfs_proto::Chunk;
use driftfs_types::CHUNK_SIZE;

pub struct Chunker {
    reader: BufReader<File>,
    dest_name: String,
    chunk_size: usize,
    serial: i32,
    offset: u64,
    file_size: u64,
}

impl Chunker {
    /// Open `local_path` for chunking under the DFS name `dest_name`.
    pub fn open(local_path: &Path, dest_name: impl Into<String>) -> io::Result<Self> {
        Self::with_chunk_size(local_path, dest_name, CHUNK_SIZE)
    }

    pub fn with_chunk_size(
        local_path: &Path,
        dest_name: impl Into<String>,
        chunk_size: usize,
    ) -> io::Result<Self> {
        let file = File::open(local_path)?;
        let file_size = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            dest_name: dest_name.into(),
            chunk_size,
            serial: 0,
            offset: 0,
            file_size,
        })
    }

    /// Produce the next chunk, or `None` once the file is exhausted.
    ///
    /// A chunk is `chunk_size` bytes extended to the next newline when the
    /// natural boundary would split a line, so serials stay dense and
    /// offsets accumulate exactly.
    pub fn next_chunk(&mut self) -> io::Result<Option<Chunk>> {
        let mut data = Vec::with_capacity(self.chunk_size);
        (&mut self.reader)
            .take(self.chunk_size as u64)
            .read_to_end(&mut data)?;
        if data.is_empty() {
            return Ok(None);
        }

        if data.len() == self.chunk_size && data.last() != Some(&b'\n') {
            self.reader.read_until(b'\n', &mut data)?;
        }

        let size = data.len() as u64;
        let chunk = Chunk {
            file_name: self.dest_name.clone(),
            chunk_name: format!("{}-{}", self.dest_name, self.serial),
            serial: self.serial,
            offset: self.offset,
            size,
            file_size: self.file_size,
            data,
            storage_nodes: Default::default(),
        };
        self.serial += 1;
        self.offset += size;
        Ok(Some(chunk))
    }
}
