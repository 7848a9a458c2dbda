//! Small helpers for the slash-separated paths used as DFS filenames.

/// Final component of a DFS path (`"/a/b.txt"` -> `"b.txt"`).
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Everything before the final component (`"/a/b.txt"` -> `"/a"`).
/// Returns an empty string when there is no parent.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}
