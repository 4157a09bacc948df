//! Workspace scoping: every file tool resolves paths through here.
//!
//! Rejects `..` traversal, absolute paths outside the root and symlinks
//! that resolve outside it. Also enumerates scan targets for the planner.

use std::path::{Component, Path, PathBuf};
use veritas_core::error::ToolError;
use walkdir::WalkDir;

/// Directory names never descended into.
const SKIP_DIRS: &[&str] = &[
    ".git",
    "target",
    "node_modules",
    ".venv",
    "venv",
    "__pycache__",
    ".mypy_cache",
    "dist",
    "build",
];

/// A file discovered under the workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceFile {
    /// Path relative to the root, `/`-separated
    pub relative: String,
    pub size: u64,
}

/// The directory the research session is allowed to read.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Open a workspace; the root must exist.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, ToolError> {
        let root = root.as_ref().canonicalize().map_err(|e| ToolError::ExecutionFailed {
            tool_name: "workspace".into(),
            reason: format!("cannot open workspace {}: {e}", root.as_ref().display()),
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a user-supplied path to an absolute path inside the root.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(ToolError::InvalidArguments("empty path".into()));
        }
        let candidate = Path::new(trimmed);
        if candidate.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(ToolError::PathOutsideWorkspace(path.to_string()));
        }

        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        // Symlinks may point anywhere; check the resolved target too.
        let resolved = if joined.exists() {
            joined
                .canonicalize()
                .map_err(|_| ToolError::PathOutsideWorkspace(path.to_string()))?
        } else {
            joined
        };

        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(ToolError::PathOutsideWorkspace(path.to_string()))
        }
    }

    /// Display form of an absolute path inside the root.
    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// All regular files under `start` (a resolved path), sorted by path,
    /// skipping vendored and build directories and files over `max_bytes`.
    pub fn files_under(&self, start: &Path, max_bytes: u64) -> Vec<WorkspaceFile> {
        let mut files: Vec<WorkspaceFile> = WalkDir::new(start)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                !(e.file_type().is_dir()
                    && e.depth() > 0
                    && SKIP_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
            })
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let size = e.metadata().ok()?.len();
                (size <= max_bytes).then(|| WorkspaceFile {
                    relative: self.relative(e.path()),
                    size,
                })
            })
            .collect();
        files.sort_by(|a, b| a.relative.cmp(&b.relative));
        files
    }

    /// All files in the workspace.
    pub fn files(&self, max_bytes: u64) -> Vec<WorkspaceFile> {
        self.files_under(&self.root, max_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("target/debug")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "pub fn x() {}\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "# readme\n").unwrap();
        std::fs::write(dir.path().join("target/debug/out.rs"), "junk").unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        let ws = Workspace::new(dir.path()).unwrap();
        (dir, ws)
    }

    #[test]
    fn relative_paths_resolve_inside_root() {
        let (_dir, ws) = fixture();
        let p = ws.resolve("src/lib.rs").unwrap();
        assert!(p.starts_with(ws.root()));
        assert_eq!(ws.relative(&p), "src/lib.rs");
    }

    #[test]
    fn traversal_is_rejected() {
        let (_dir, ws) = fixture();
        let err = ws.resolve("../../etc/passwd").unwrap_err();
        assert!(matches!(err, ToolError::PathOutsideWorkspace(_)));
        assert!(ws.resolve("src/../../x").is_err());
    }

    #[test]
    fn absolute_paths_outside_root_are_rejected() {
        let (_dir, ws) = fixture();
        assert!(ws.resolve("/etc/passwd").is_err());
        let inside = ws.root().join("README.md");
        assert!(ws.resolve(inside.to_str().unwrap()).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_rejected() {
        let (dir, ws) = fixture();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), "s").unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret"), dir.path().join("link")).unwrap();
        assert!(ws.resolve("link").is_err());
    }

    #[test]
    fn listing_skips_build_and_vcs_dirs() {
        let (_dir, ws) = fixture();
        let names: Vec<String> = ws.files(1_000_000).into_iter().map(|f| f.relative).collect();
        assert_eq!(names, vec!["README.md".to_string(), "src/lib.rs".to_string()]);
    }

    #[test]
    fn listing_respects_size_cap() {
        let (dir, ws) = fixture();
        std::fs::write(dir.path().join("big.txt"), vec![b'a'; 2048]).unwrap();
        assert!(ws.files(1024).iter().all(|f| f.relative != "big.txt"));
    }
}
