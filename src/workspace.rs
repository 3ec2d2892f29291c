//! Workspace boundary enforcement for file paths the agent touches.
//!
//! The full security layer lives in the host application; the core only
//! needs `validate(path, op) -> canonical path | error` plus a checked text
//! writer for the final results file.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("Path '{path}' escapes the workspace root '{root}' (operation: {op})")]
    OutsideWorkspace {
        path: String,
        root: String,
        op: &'static str,
    },
    #[error("Workspace root '{0}' is not usable: {1}")]
    BadRoot(String, #[source] std::io::Error),
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Operation label carried into validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Read,
    Write,
    List,
}

impl FileOp {
    fn as_str(&self) -> &'static str {
        match self {
            FileOp::Read => "read",
            FileOp::Write => "write",
            FileOp::List => "list",
        }
    }
}

/// The only legal filesystem region for agent writes.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Creates a workspace rooted at `root`. The directory is created if
    /// missing so that the root can always be canonicalized.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, WorkspaceError> {
        let root = root.into();
        if !root.exists() {
            fs::create_dir_all(&root)
                .map_err(|e| WorkspaceError::BadRoot(root.display().to_string(), e))?;
        }
        let root = root
            .canonicalize()
            .map_err(|e| WorkspaceError::BadRoot(root.display().to_string(), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `path` (relative paths are joined onto the root) and checks
    /// it stays inside the workspace. Returns the canonical absolute path.
    pub fn validate(&self, path: impl AsRef<Path>, op: FileOp) -> Result<PathBuf, WorkspaceError> {
        let path = path.as_ref();
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        // Canonicalize the deepest existing ancestor so traversal components
        // are resolved even for files that do not exist yet.
        let canonical = if joined.exists() {
            joined.canonicalize().map_err(|e| WorkspaceError::Io {
                path: joined.display().to_string(),
                source: e,
            })?
        } else {
            let parent = joined.parent().unwrap_or(&self.root);
            let file_name = joined.file_name().map(PathBuf::from).unwrap_or_default();
            let canonical_parent = parent.canonicalize().map_err(|e| WorkspaceError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
            canonical_parent.join(file_name)
        };

        if !canonical.starts_with(&self.root) {
            return Err(WorkspaceError::OutsideWorkspace {
                path: path.display().to_string(),
                root: self.root.display().to_string(),
                op: op.as_str(),
            });
        }

        Ok(canonical)
    }

    /// Validates and writes UTF-8 text, returning the canonical path written.
    pub fn write_text(&self, path: impl AsRef<Path>, content: &str) -> Result<PathBuf, WorkspaceError> {
        let target = self.validate(path, FileOp::Write)?;
        fs::write(&target, content).map_err(|e| WorkspaceError::Io {
            path: target.display().to_string(),
            source: e,
        })?;
        debug!(path = %target.display(), bytes = content.len(), "Wrote workspace file");
        Ok(target)
    }
}
