//! External sort for key-tab-value text files on bounded memory.
//!
//! Runs of at most `run_lines` lines are sorted in memory and spilled to
//! `<path>-<n>`, then k-way merged back over the original path. Because the
//! tab separator sorts below every printable byte, whole-line lexicographic
//! order is key-major order, so the merge can compare raw lines.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct ExternalSorter {
    run_lines: usize,
}

impl Default for ExternalSorter {
    fn default() -> Self {
        Self {
            run_lines: driftfs_types::SORT_RUN_LINES,
        }
    }
}

impl ExternalSorter {
    pub fn with_run_lines(run_lines: usize) -> Self {
        assert!(run_lines > 0, "run size must be positive");
        Self { run_lines }
    }

    /// Sort the file at `path` in place.
    pub fn sort(&self, path: &Path) -> io::Result<()> {
        let run_paths = self.spill_runs(path)?;
        merge_sorted(&run_paths, path)?;
        for run in &run_paths {
            fs::remove_file(run)?;
        }
        Ok(())
    }

    fn spill_runs(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let reader = BufReader::new(File::open(path)?);
        let mut run_paths = Vec::new();
        let mut lines: Vec<String> = Vec::with_capacity(self.run_lines);

        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            lines.push(line);
            if lines.len() == self.run_lines {
                spill(&mut lines, path, &mut run_paths)?;
            }
        }
        if !lines.is_empty() {
            spill(&mut lines, path, &mut run_paths)?;
        }
        Ok(run_paths)
    }
}

fn spill(lines: &mut Vec<String>, base: &Path, run_paths: &mut Vec<PathBuf>) -> io::Result<()> {
    lines.sort_unstable();
    let run_path = suffixed(base, &run_paths.len().to_string());
    let mut out = BufWriter::new(File::create(&run_path)?);
    for line in lines.iter() {
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    run_paths.push(run_path);
    lines.clear();
    Ok(())
}

/// K-way merge of already-sorted line files into `out_path`, by repeatedly
/// taking the scanner whose current line is smallest. Empty lines are
/// dropped.
pub fn merge_sorted(paths: &[PathBuf], out_path: &Path) -> io::Result<()> {
    struct Scanner {
        current: String,
        lines: io::Lines<BufReader<File>>,
    }

    let mut scanners = Vec::with_capacity(paths.len());
    for path in paths {
        let mut lines = BufReader::new(File::open(path)?).lines();
        if let Some(first) = lines.next().transpose()? {
            scanners.push(Scanner {
                current: first,
                lines,
            });
        }
    }

    let mut out = BufWriter::new(File::create(out_path)?);
    while !scanners.is_empty() {
        let mut smallest = 0;
        for idx in 1..scanners.len() {
            if scanners[idx].current < scanners[smallest].current {
                smallest = idx;
            }
        }

        if !scanners[smallest].current.is_empty() {
            out.write_all(scanners[smallest].current.as_bytes())?;
            out.write_all(b"\n")?;
        }

        match scanners[smallest].lines.next().transpose()? {
            Some(next) => scanners[smallest].current = next,
            None => {
                scanners.swap_remove(smallest);
            }
        }
    }
    out.flush()
}

/// `/a/b/file` + `part` -> `/a/b/file-part`.
pub fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push('-');
    name.push_str(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn write_lines(path: &Path, lines: &[&str]) {
        let body: String = lines.iter().map(|l| format!("{l}\n")).collect();
        fs::write(path, body).unwrap();
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_sort_small_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv");
        write_lines(&path, &["b\t2", "a\t1", "c\t3"]);

        ExternalSorter::default().sort(&path).unwrap();
        assert_eq!(read_lines(&path), ["a\t1", "b\t2", "c\t3"]);
    }

    #[test]
    fn test_sort_spans_multiple_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv");

        // 25 lines with a 4-line run budget forces 7 runs.
        let mut lines: Vec<String> = (0..25).map(|i| format!("k{:02}\t{}", 24 - i, i)).collect();
        let body: String = lines.iter().map(|l| format!("{l}\n")).collect();
        fs::write(&path, body).unwrap();

        ExternalSorter::with_run_lines(4).sort(&path).unwrap();

        lines.sort();
        assert_eq!(read_lines(&path), lines);
        // Run files are cleaned up.
        assert!(!suffixed(&path, "0").exists());
    }

    #[test]
    fn test_sort_preserves_multiset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv");
        let input = ["x\t1", "a\t9", "x\t1", "m\t5", "a\t2"];
        write_lines(&path, &input);

        ExternalSorter::with_run_lines(2).sort(&path).unwrap();
        let output = read_lines(&path);

        assert_eq!(output.len(), input.len());
        fn count(lines: &[String]) -> HashMap<&str, usize> {
            let mut m: HashMap<&str, usize> = HashMap::new();
            for l in lines {
                *m.entry(l.as_str()).or_default() += 1;
            }
            m
        }
        let expected: Vec<String> = input.iter().map(|s| s.to_string()).collect();
        assert_eq!(count(&output), count(&expected));
        assert!(output.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_sort_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv");
        fs::write(&path, "").unwrap();

        ExternalSorter::default().sort(&path).unwrap();
        assert_eq!(read_lines(&path), Vec::<String>::new());
    }

    #[test]
    fn test_merge_sorted_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let out = dir.path().join("merged");
        write_lines(&a, &["a\t1", "c\t1", "e\t1"]);
        write_lines(&b, &["b\t1", "d\t1"]);

        merge_sorted(&[a, b], &out).unwrap();
        assert_eq!(read_lines(&out), ["a\t1", "b\t1", "c\t1", "d\t1", "e\t1"]);
    }

    #[test]
    fn test_merge_with_duplicate_keys() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let out = dir.path().join("merged");
        write_lines(&a, &["k\t1", "k\t3"]);
        write_lines(&b, &["k\t2"]);

        merge_sorted(&[a, b], &out).unwrap();
        assert_eq!(read_lines(&out), ["k\t1", "k\t2", "k\t3"]);
    }

    #[test]
    fn test_suffixed() {
        assert_eq!(
            suffixed(Path::new("/tmp/out"), "part-0"),
            Path::new("/tmp/out-part-0")
        );
    }
}
