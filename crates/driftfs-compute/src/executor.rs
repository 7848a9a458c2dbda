//! Runs the user plugin over task input and moves the results around.
//!
//! The plugin is an external executable invoked once per record with argv
//! `(MAP|REDUCE, key, value)`; whatever it prints as `key\tvalue` lines is
//! collected. Keeping it a subprocess keeps the contract language-agnostic.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use driftfs_net::MessageConn;
use driftfs_proto::{ActionRequest, ComputeType, Node, Wrapper};
use driftfs_types::path::basename;
use driftfs_types::{DfsError, Result};
use tokio::process::Command;

use crate::context::TaskContext;
use crate::extsort::{merge_sorted, ExternalSorter};

/// Split a plugin output line at its last tab. Lines without a tab, or with
/// an empty side, yield `None` and are ignored by the caller.
pub fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.rsplit_once('\t')?;
    if key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key, value))
}

async fn invoke_plugin(plugin: &Path, entry: &str, key: &str, value: &str) -> Result<String> {
    let output = Command::new(plugin)
        .arg(entry)
        .arg(key)
        .arg(value)
        .output()
        .await
        .map_err(|e| DfsError::Compute(format!("plugin spawn failed: {e}")))?;
    if !output.status.success() {
        return Err(DfsError::Compute(format!(
            "plugin exited with {}",
            output.status
        )));
    }
    String::from_utf8(output.stdout)
        .map_err(|_| DfsError::Compute("plugin emitted invalid UTF-8".into()))
}

/// Map phase: run the plugin over every line of `data_path`, partition its
/// output through `ctx`, then external-sort each partition file.
pub async fn run_mapper(plugin: &Path, data_path: &Path, ctx: &mut TaskContext) -> Result<()> {
    let reader = BufReader::new(File::open(data_path)?);
    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        let stdout = invoke_plugin(
            plugin,
            ComputeType::Map.as_arg(),
            &line_number.to_string(),
            &line,
        )
        .await?;
        for out_line in stdout.lines() {
            if let Some((key, value)) = split_key_value(out_line) {
                ctx.write(key, value)?;
            }
        }
    }
    ctx.finish()?;

    let sorter = ExternalSorter::default();
    for path in ctx.partition_paths().values() {
        tracing::info!(file = %path.display(), "sorting mapper output");
        sorter.sort(path)?;
    }
    Ok(())
}

/// Reduce phase: feed each grouped `key\tv1\tv2…` record to the plugin and
/// append its single output pair to the task output file.
pub async fn run_reducer(plugin: &Path, grouped_path: &Path, ctx: &mut TaskContext) -> Result<()> {
    let reader = BufReader::new(File::open(grouped_path)?);
    for line in reader.lines() {
        let line = line?;
        let Some((key, values)) = line.split_once('\t') else {
            continue;
        };
        let stdout = invoke_plugin(plugin, ComputeType::Reduce.as_arg(), key, values).await?;
        if let Some((key, value)) = split_key_value(stdout.trim_end_matches('\n')) {
            ctx.emit(key, value)?;
        }
    }
    ctx.finish()?;
    Ok(())
}

/// Merge sorted partition files and collapse runs of equal keys into
/// `key\tv1\tv2…` records at `grouped_path`.
pub fn merge_and_group(
    inputs: &[PathBuf],
    merged_path: &Path,
    grouped_path: &Path,
) -> Result<()> {
    merge_sorted(inputs, merged_path)?;

    let reader = BufReader::new(File::open(merged_path)?);
    let mut out = io::BufWriter::new(File::create(grouped_path)?);
    let mut current_key: Option<String> = None;
    let mut record = String::new();

    for line in reader.lines() {
        let line = line?;
        let Some((key, value)) = split_key_value(&line) else {
            continue;
        };
        match &current_key {
            Some(current) if current == key => {
                record.push('\t');
                record.push_str(value);
            }
            _ => {
                if !record.is_empty() {
                    writeln!(out, "{record}")?;
                }
                current_key = Some(key.to_string());
                record = format!("{key}\t{value}");
            }
        }
    }
    if !record.is_empty() {
        writeln!(out, "{record}")?;
    }
    out.flush()?;
    Ok(())
}

/// Shuffle: send each partition file to its reducer as a `COMPUTE_STORE`,
/// and report which file went to which node. Local copies are removed
/// unless the reducer is this node.
pub async fn shuffle(ctx: &TaskContext) -> Result<HashMap<String, Node>> {
    let mut files_table = HashMap::new();

    for (&partition, path) in ctx.partition_paths() {
        let reducer = ctx
            .reducers()
            .get(partition)
            .ok_or_else(|| DfsError::Compute(format!("no reducer for partition {partition}")))?;
        let data = fs::read(path)?;
        let file_name = basename(&path.to_string_lossy()).to_string();

        tracing::info!(
            file = %file_name,
            reducer = %reducer.addr(),
            "shuffling partition to reducer"
        );
        let conn = MessageConn::connect(&reducer.addr())
            .await
            .map_err(|e| DfsError::Compute(format!("reducer unreachable: {e}")))?;
        conn.send(&Wrapper::ActionRequest(ActionRequest::compute_store(
            file_name.clone(),
            data,
        )))
        .await
        .map_err(|e| DfsError::Compute(format!("shuffle send failed: {e}")))?;

        files_table.insert(file_name, reducer.clone());
        if reducer.uuid != ctx.node_uuid() {
            fs::remove_file(path)?;
        }
    }

    Ok(files_table)
}
