//! Map and reduce task execution on a storage node.
//!
//! A mapper pulls the chunk payload out of the local store into scratch
//! space, runs the plugin line by line, sorts and shuffles its partitions,
//! and reports the shuffle table to the coordinator. A reducer merges its
//! (sorted) inputs, groups by key, runs the plugin per group, and pushes
//! the result back into the DFS through the ordinary upload path.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use driftfs_client::ClientActions;
use driftfs_compute::executor;
use driftfs_compute::TaskContext;
use driftfs_net::MessageConn;
use driftfs_proto::{ActionRequest, ComputationStatus, ComputeType, JobStatus, Plugin, Wrapper};
use driftfs_types::path::basename;

use crate::node::StorageNode;

impl StorageNode {
    pub(crate) async fn handle_compute(&self, conn: &MessageConn, request: ActionRequest) {
        match request.compute_type {
            ComputeType::Map => self.run_map_task(conn, request).await,
            ComputeType::Reduce => self.run_reduce_task(conn, request).await,
        }
    }

    async fn run_map_task(&self, conn: &MessageConn, request: ActionRequest) {
        let chunk_name = request.chunk_name.clone();
        tracing::info!(chunk = %chunk_name, "starting map task");

        let Some(plugin) = request.plugin else {
            fail(conn, JobStatus::JobMappers, "map request has no plugin").await;
            return;
        };

        // Extract the chunk payload into scratch space for the plugin.
        let chunk = match self.store.retrieve(&chunk_name) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::error!(chunk = %chunk_name, "error reading local chunk: {e}");
                fail(conn, JobStatus::JobMappers, "Error reading local chunk").await;
                return;
            }
        };
        let data_path = self.compute_dir.join(chunk_name.trim_start_matches('/'));
        if let Err(e) = write_creating_parents(&data_path, &chunk.data) {
            tracing::error!(path = %data_path.display(), "cannot stage chunk data: {e}");
            fail(conn, JobStatus::JobMappers, "Error staging chunk data").await;
            return;
        }

        let plugin_path = self.plugins_dir.join(format!(
            "{}-{}",
            basename(&plugin.name),
            basename(&chunk_name)
        ));
        if let Err(e) = persist_plugin(&plugin_path, &plugin) {
            tracing::error!("cannot persist plugin: {e}");
            fail(conn, JobStatus::JobMappers, "Error persisting plugin").await;
            return;
        }

        // The chunk name doubles as the mapper's output base, keeping
        // partition files from concurrent mappers on one node apart.
        let mut ctx = TaskContext::mapper(
            &self.compute_dir,
            &chunk_name,
            request.reducers,
            self.uuid.clone(),
        );

        if let Err(e) = executor::run_mapper(&plugin_path, &data_path, &mut ctx).await {
            tracing::error!(chunk = %chunk_name, "mapper failed: {e}");
            fail(conn, JobStatus::JobMappers, e.to_string()).await;
            return;
        }

        let files_table = match executor::shuffle(&ctx).await {
            Ok(table) => table,
            Err(e) => {
                tracing::error!(chunk = %chunk_name, "shuffle failed: {e}");
                fail(conn, JobStatus::JobMappers, e.to_string()).await;
                return;
            }
        };

        let done = ComputationStatus::mapper_done(files_table);
        if let Err(e) = conn.send(&Wrapper::ComputationStatus(done)).await {
            tracing::error!("cannot report map completion: {e}");
        }

        remove_quietly(&data_path);
        remove_quietly(&plugin_path);
        tracing::info!(chunk = %chunk_name, "map task complete");
    }

    async fn run_reduce_task(&self, conn: &MessageConn, request: ActionRequest) {
        let reducer_number = request.reducer_number;
        tracing::info!(reducer_number, files = request.file_names.len(), "starting reduce task");

        let Some(plugin) = request.plugin else {
            fail(conn, JobStatus::JobReducers, "reduce request has no plugin").await;
            return;
        };
        if request.file_names.is_empty() {
            fail(conn, JobStatus::JobReducers, "reduce task has no input files").await;
            return;
        }

        let inputs: Vec<PathBuf> = request
            .file_names
            .iter()
            .map(|name| self.compute_dir.join(basename(name)))
            .collect();

        let plugin_base = basename(&plugin.name).to_string();
        let plugin_path = self
            .plugins_dir
            .join(format!("{plugin_base}-reducer-{reducer_number}"));
        if let Err(e) = persist_plugin(&plugin_path, &plugin) {
            tracing::error!("cannot persist plugin: {e}");
            fail(conn, JobStatus::JobReducers, "Error persisting plugin").await;
            return;
        }

        let merged = self
            .compute_dir
            .join(format!("{plugin_base}-mergefile-{reducer_number}"));
        let grouped = self
            .compute_dir
            .join(format!("{plugin_base}-groupfile-{reducer_number}"));
        if let Err(e) = executor::merge_and_group(&inputs, &merged, &grouped) {
            tracing::error!("merge of mapper outputs failed: {e}");
            fail(conn, JobStatus::JobReducers, e.to_string()).await;
            return;
        }
        for input in &inputs {
            remove_quietly(input);
        }

        let output_name = format!("{}-{}", request.output_filename, reducer_number);
        let mut ctx = TaskContext::reducer(&self.compute_dir, &output_name);
        if let Err(e) = executor::run_reducer(&plugin_path, &grouped, &mut ctx).await {
            tracing::error!("reducer failed: {e}");
            fail(conn, JobStatus::JobReducers, e.to_string()).await;
            return;
        }
        tracing::info!(output = %output_name, "reducer completed");

        remove_quietly(&merged);
        remove_quietly(&grouped);
        remove_quietly(&plugin_path);

        // The output goes into the DFS through the ordinary upload path
        // before the coordinator hears ok.
        let actions = ClientActions::new(self.controller.clone(), &self.compute_dir);
        if let Err(e) = actions.upload(ctx.output_path(), &output_name).await {
            tracing::error!(file = %output_name, "reducer output upload failed: {e}");
            fail(conn, JobStatus::JobReducers, e.to_string()).await;
            return;
        }
        tracing::info!(file = %output_name, "reducer output uploaded");

        let status = ComputationStatus::progress(JobStatus::JobReducers, "");
        let _ = conn.send(&Wrapper::ComputationStatus(status)).await;
    }

    pub(crate) fn store_shuffle_file(&self, file_name: &str, data: &[u8]) {
        let path = self.compute_dir.join(basename(file_name));
        tracing::info!(file = %path.display(), "storing shuffled partition");
        if let Err(e) = write_creating_parents(&path, data) {
            tracing::error!(file = %file_name, "cannot store shuffled partition: {e}");
        }
    }
}

async fn fail(conn: &MessageConn, status: JobStatus, message: impl Into<String>) {
    let frame = Wrapper::ComputationStatus(ComputationStatus::failed(status, message));
    if let Err(e) = conn.send(&frame).await {
        tracing::debug!("coordinator gone before failure report: {e}");
    }
}

fn write_creating_parents(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, data)
}

/// Materialize the plugin binary once per task slot and mark it runnable.
fn persist_plugin(path: &Path, plugin: &Plugin) -> io::Result<()> {
    if path.exists() {
        return Ok(());
    }
    write_creating_parents(path, &plugin.bytes)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        tracing::debug!(path = %path.display(), "cleanup skipped: {e}");
    }
}
