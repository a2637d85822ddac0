//! Output file resolution
//!
//! Maps the build's output directory onto addressable runtime targets: the
//! first path segment under the output dir names the target server, the
//! remainder is the server-relative filename (forward slashes on every
//! host).

use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One deployable file found in the output directory.
///
/// Created fresh for each completed build and discarded after the push/cost
/// cycle; nothing caches these across builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    /// Target server inside the runtime.
    pub server: String,
    /// Server-relative filename, forward slashes.
    pub filename: String,
    /// Where the content lives locally.
    pub absolute_path: PathBuf,
}

/// Enumerate every regular file under `output_dir` as an [`OutputFile`].
///
/// A missing or empty directory resolves to an empty list: a build that
/// produced nothing is a valid build, not an error. Files directly at the
/// root (no server segment) and paths with non-UTF-8 components are skipped
/// with a warning. Traversal order is unspecified; consumers must not rely
/// on it.
pub async fn resolve_output_dir(output_dir: &Path) -> io::Result<Vec<OutputFile>> {
    match tokio::fs::metadata(output_dir).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    }

    let mut files = Vec::new();
    let mut pending = vec![output_dir.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            // A subdirectory vanished mid-walk (rebuild race); skip it.
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                if let Some(file) = map_output_file(output_dir, &path) {
                    files.push(file);
                }
            }
        }
    }

    Ok(files)
}

/// Split a file path under `output_dir` into server and filename.
///
/// Returns `None` for files that cannot be addressed: no server segment,
/// or a non-UTF-8 path component.
fn map_output_file(output_dir: &Path, path: &Path) -> Option<OutputFile> {
    let relative = path.strip_prefix(output_dir).ok()?;

    let mut segments = Vec::new();
    for component in relative.components() {
        match component.as_os_str().to_str() {
            Some(s) => segments.push(s),
            None => {
                warn!(
                    "Skipping output file with non-UTF-8 path component: {}",
                    path.display()
                );
                return None;
            }
        }
    }

    if segments.len() < 2 {
        warn!(
            "Skipping output file without a server directory: {}",
            path.display()
        );
        return None;
    }

    Some(OutputFile {
        server: segments[0].to_string(),
        filename: segments[1..].join("/"),
        absolute_path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(path, content).await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_nested_files() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("build");
        write(&out.join("serverA/x.js"), "a").await;
        write(&out.join("serverB/sub/y.js"), "b").await;

        let mut files = resolve_output_dir(&out).await.unwrap();
        files.sort_by(|a, b| a.filename.cmp(&b.filename));

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].server, "serverB");
        assert_eq!(files[0].filename, "sub/y.js");
        assert_eq!(files[1].server, "serverA");
        assert_eq!(files[1].filename, "x.js");
        assert_eq!(files[1].absolute_path, out.join("serverA/x.js"));
    }

    #[tokio::test]
    async fn test_root_level_file_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("build");
        write(&out.join("rogue.txt"), "no server").await;
        write(&out.join("home/main.js"), "ok").await;

        let files = resolve_output_dir(&out).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].server, "home");
        assert_eq!(files[0].filename, "main.js");
    }

    #[tokio::test]
    async fn test_missing_dir_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let files = resolve_output_dir(&temp_dir.path().join("never-built"))
            .await
            .unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_empty_dir_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let files = resolve_output_dir(temp_dir.path()).await.unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_deeply_nested_filename_joined_with_slashes() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("build");
        write(&out.join("home/a/b/c/d.js"), "deep").await;

        let files = resolve_output_dir(&out).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].server, "home");
        assert_eq!(files[0].filename, "a/b/c/d.js");
    }

    #[test]
    fn test_map_uses_forward_slashes_regardless_of_host_join() {
        // Build the path with the host separator; the mapped filename must
        // still come out with forward slashes.
        let out = Path::new("/out");
        let path = out.join("home").join("lib").join("a.js");

        let file = map_output_file(out, &path).unwrap();
        assert_eq!(file.server, "home");
        assert_eq!(file.filename, "lib/a.js");
    }

    #[test]
    fn test_map_rejects_rootless_file() {
        let out = Path::new("/out");
        assert!(map_output_file(out, &out.join("stray.js")).is_none());
    }
}
