//! Per-task state for a running mapper or reducer.
//!
//! A mapper context routes every written key-value pair to a per-partition
//! spill file under the compute-scratch directory; the partition choice is
//! sticky per key for the lifetime of the task. A reducer context appends
//! its plugin's output to the single task output file.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use driftfs_proto::Node;
use driftfs_types::path::basename;

use crate::extsort::suffixed;
use crate::fnv::partition_for;

pub struct TaskContext {
    scratch_dir: PathBuf,
    /// Base output path inside the scratch dir; mapper partitions append a
    /// `-part-<p>` suffix to it.
    output_path: PathBuf,
    reducers: Vec<Node>,
    node_uuid: String,
    /// Sticky key -> partition assignments for this task.
    key_partitions: HashMap<String, usize>,
    /// Partition -> spill file path, in creation order of first write.
    partition_paths: HashMap<usize, PathBuf>,
    open_files: HashMap<usize, File>,
    output_file: Option<File>,
}

impl TaskContext {
    /// Context for a mapper shuffling to `reducers`.
    pub fn mapper(
        scratch_dir: impl Into<PathBuf>,
        output_name: &str,
        reducers: Vec<Node>,
        node_uuid: impl Into<String>,
    ) -> Self {
        let scratch_dir = scratch_dir.into();
        let output_path = scratch_dir.join(basename(output_name));
        Self {
            scratch_dir,
            output_path,
            reducers,
            node_uuid: node_uuid.into(),
            key_partitions: HashMap::new(),
            partition_paths: HashMap::new(),
            open_files: HashMap::new(),
            output_file: None,
        }
    }

    /// Context for a reducer writing one output file.
    pub fn reducer(scratch_dir: impl Into<PathBuf>, output_name: &str) -> Self {
        Self::mapper(scratch_dir, output_name, Vec::new(), String::new())
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn reducers(&self) -> &[Node] {
        &self.reducers
    }

    pub fn node_uuid(&self) -> &str {
        &self.node_uuid
    }

    /// Spill files written so far, keyed by partition index.
    pub fn partition_paths(&self) -> &HashMap<usize, PathBuf> {
        &self.partition_paths
    }

    /// The sticky partition for `key`.
    pub fn partition(&mut self, key: &str) -> usize {
        if let Some(&p) = self.key_partitions.get(key) {
            return p;
        }
        let p = partition_for(key, self.reducers.len());
        self.key_partitions.insert(key.to_string(), p);
        p
    }

    /// Append one mapper output pair to its partition file. Empty keys and
    /// values are dropped.
    pub fn write(&mut self, key: &str, value: &str) -> io::Result<()> {
        let key = key.trim();
        if key.is_empty() || value.is_empty() {
            return Ok(());
        }

        let partition = self.partition(key);
        if !self.open_files.contains_key(&partition) {
            fs::create_dir_all(&self.scratch_dir)?;
            let path = suffixed(&self.output_path, &format!("part-{partition}"));
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            self.partition_paths.insert(partition, path);
            self.open_files.insert(partition, file);
        }

        let file = self.open_files.get_mut(&partition).expect("just inserted");
        writeln!(file, "{key}\t{value}")
    }

    /// Append one reducer output pair to the task output file.
    pub fn emit(&mut self, key: &str, value: &str) -> io::Result<()> {
        if key.is_empty() || value.is_empty() {
            return Ok(());
        }
        if self.output_file.is_none() {
            fs::create_dir_all(&self.scratch_dir)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.output_path)?;
            self.output_file = Some(file);
        }
        let file = self.output_file.as_mut().expect("just inserted");
        writeln!(file, "{key}\t{value}")
    }

    /// Flush and close spill files, and release the key cache. Call after
    /// the plugin has processed every input line.
    pub fn finish(&mut self) -> io::Result<()> {
        for (_, mut file) in self.open_files.drain() {
            file.flush()?;
        }
        if let Some(mut file) = self.output_file.take() {
            file.flush()?;
        }
        self.key_partitions.clear();
        Ok(())
    }
}
