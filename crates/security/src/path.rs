//! Workspace roots: filesystem sandboxing for tool paths.
//!
//! Every path a tool touches is resolved against the session's
//! [`WorkspaceRoot`] and must stay a descendant of it after `..` segments
//! and symlinks are resolved. Resolution hits the filesystem on every call;
//! callers must not cache a resolved path across tool invocations.

use skein_core::tool::HostType;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Error returned when path resolution fails.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("Path '{path}' escapes workspace root '{root}'")]
    Escape { path: String, root: String },

    #[error("Invalid path '{path}': {reason}")]
    Invalid { path: String, reason: String },

    #[error("Workspace root '{root}' is unusable: {reason}")]
    RootUnavailable { root: String, reason: String },
}

impl PathError {
    pub fn is_escape(&self) -> bool {
        matches!(self, Self::Escape { .. })
    }
}

/// An absolute, resolved sandbox directory bound to a host type.
#[derive(Debug, Clone)]
pub struct WorkspaceRoot {
    /// The root as configured (may contain symlinks, e.g. `/tmp` on macOS).
    declared: PathBuf,
    /// The root with every symlink resolved.
    canonical: PathBuf,
    host: HostType,
}

impl WorkspaceRoot {
    /// Bind a root directory. The directory must exist and be absolute.
    pub fn new(path: impl AsRef<Path>, host: HostType) -> Result<Self, PathError> {
        let declared = path.as_ref().to_path_buf();
        let root_str = declared.display().to_string();
        if !declared.is_absolute() {
            return Err(PathError::RootUnavailable {
                root: root_str,
                reason: "workspace root must be absolute".into(),
            });
        }
        let canonical = declared
            .canonicalize()
            .map_err(|e| PathError::RootUnavailable {
                root: root_str.clone(),
                reason: e.to_string(),
            })?;
        if !canonical.is_dir() {
            return Err(PathError::RootUnavailable {
                root: root_str,
                reason: "not a directory".into(),
            });
        }
        Ok(Self {
            declared: normalize(&declared).unwrap_or(declared),
            canonical,
            host,
        })
    }

    /// Create the directory if needed, then bind it.
    pub fn create(path: impl AsRef<Path>, host: HostType) -> Result<Self, PathError> {
        std::fs::create_dir_all(path.as_ref()).map_err(|e| PathError::RootUnavailable {
            root: path.as_ref().display().to_string(),
            reason: e.to_string(),
        })?;
        Self::new(path, host)
    }

    pub fn path(&self) -> &Path {
        &self.canonical
    }

    pub fn host(&self) -> HostType {
        self.host
    }

    /// Resolve `raw` (relative to the root, or absolute) to a canonical path
    /// that is guaranteed to lie inside the root at the time of the call.
    ///
    /// The target itself need not exist; its deepest existing ancestor is
    /// canonicalized so symlinks anywhere along the way are followed.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, PathError> {
        let relative = self.contained_relative(raw)?;
        let candidate = self.canonical.join(&relative);

        // Walk up to the deepest ancestor that exists (as a link or a file).
        let mut existing = candidate.as_path();
        let mut missing: Vec<&std::ffi::OsStr> = Vec::new();
        while std::fs::symlink_metadata(existing).is_err() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    missing.push(name);
                    existing = parent;
                }
                _ => break,
            }
        }

        let resolved_base = match existing.canonicalize() {
            Ok(path) => path,
            // A dangling symlink cannot be proven to stay inside the root.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(self.escape(raw)),
            Err(e) => {
                return Err(PathError::Invalid {
                    path: raw.into(),
                    reason: e.to_string(),
                });
            }
        };

        let mut resolved = resolved_base;
        for name in missing.into_iter().rev() {
            resolved.push(name);
        }

        if !resolved.starts_with(&self.canonical) {
            tracing::warn!(path = %raw, root = %self.canonical.display(), "Resolved path escapes workspace root");
            return Err(self.escape(raw));
        }
        Ok(resolved)
    }

    /// Root-relative form of `raw` after lexical `..` resolution, without
    /// touching the filesystem.
    fn contained_relative(&self, raw: &str) -> Result<PathBuf, PathError> {
        if raw.is_empty() {
            return Err(PathError::Invalid {
                path: raw.into(),
                reason: "empty path".into(),
            });
        }
        if raw.contains('\0') {
            return Err(PathError::Invalid {
                path: raw.escape_default().to_string(),
                reason: "path contains a NUL byte".into(),
            });
        }

        let input = Path::new(raw);
        let joined = if input.is_absolute() {
            input.to_path_buf()
        } else {
            self.canonical.join(input)
        };
        let normalized = normalize(&joined).ok_or_else(|| self.escape(raw))?;

        if let Ok(rel) = normalized.strip_prefix(&self.canonical) {
            return Ok(rel.to_path_buf());
        }
        if let Ok(rel) = normalized.strip_prefix(&self.declared) {
            return Ok(rel.to_path_buf());
        }
        Err(self.escape(raw))
    }

    fn escape(&self, raw: &str) -> PathError {
        PathError::Escape {
            path: raw.into(),
            root: self.canonical.display().to_string(),
        }
    }
}

/// Lexically resolve `.` and `..`. Returns `None` if `..` climbs above the
/// filesystem root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() || out.as_os_str().is_empty() {
                    return None;
                }
            }
            Component::Normal(name) => out.push(name),
        }
    }
    Some(out)
}

/// Lexical containment check for a path that will be resolved elsewhere
/// (the serving side of a remote tool re-resolves against its own root).
///
/// Relative paths must never climb above their starting directory; absolute
/// paths are left for the serving side to judge.
pub fn lexically_contained(raw: &str) -> bool {
    if raw.is_empty() || raw.contains('\0') {
        return false;
    }
    let path = Path::new(raw);
    if path.is_absolute() {
        return true;
    }
    let mut depth: usize = 0;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> (tempfile::TempDir, WorkspaceRoot) {
        let dir = tempfile::tempdir().unwrap();
        let ws = WorkspaceRoot::new(dir.path(), HostType::Local).unwrap();
        (dir, ws)
    }

    #[test]
    fn relative_path_resolves_inside_root() {
        let (_dir, ws) = root();
        let resolved = ws.resolve("src/main.rs").unwrap();
        assert!(resolved.starts_with(ws.path()));
        assert!(resolved.ends_with("src/main.rs"));
    }

    #[test]
    fn parent_segments_inside_root_are_fine() {
        let (_dir, ws) = root();
        let resolved = ws.resolve("a/b/../c.txt").unwrap();
        assert_eq!(resolved, ws.path().join("a/c.txt"));
    }

    #[test]
    fn parent_traversal_is_an_escape() {
        let (_dir, ws) = root();
        let err = ws.resolve("../../../etc/passwd").unwrap_err();
        assert!(err.is_escape(), "expected Escape, got: {err}");
        let err = ws.resolve("a/../../sibling").unwrap_err();
        assert!(err.is_escape());
    }

    #[test]
    fn absolute_path_outside_root_is_an_escape() {
        let (_dir, ws) = root();
        assert!(ws.resolve("/etc/passwd").unwrap_err().is_escape());
    }

    #[test]
    fn absolute_path_inside_root_is_accepted() {
        let (dir, ws) = root();
        let raw = dir.path().join("notes.md");
        let resolved = ws.resolve(raw.to_str().unwrap()).unwrap();
        assert_eq!(resolved, ws.path().join("notes.md"));
    }

    #[test]
    fn sibling_with_shared_prefix_is_an_escape() {
        let parent = tempfile::tempdir().unwrap();
        let inner = parent.path().join("work");
        let sibling = parent.path().join("work2");
        std::fs::create_dir_all(&inner).unwrap();
        std::fs::create_dir_all(&sibling).unwrap();
        let ws = WorkspaceRoot::new(&inner, HostType::Local).unwrap();
        assert!(ws.resolve(sibling.join("x").to_str().unwrap()).unwrap_err().is_escape());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_pointing_outside_is_an_escape() {
        let (dir, ws) = root();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        let err = ws.resolve("link/secret.txt").unwrap_err();
        assert!(err.is_escape());
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_is_an_escape() {
        let (dir, ws) = root();
        std::os::unix::fs::symlink("/nonexistent/target", dir.path().join("dangling")).unwrap();
        assert!(ws.resolve("dangling").unwrap_err().is_escape());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_inside_root_is_followed() {
        let (dir, ws) = root();
        std::fs::create_dir(dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("alias")).unwrap();
        let resolved = ws.resolve("alias/file.txt").unwrap();
        assert_eq!(resolved, ws.path().join("real/file.txt"));
    }

    #[test]
    fn empty_and_nul_paths_rejected() {
        let (_dir, ws) = root();
        assert!(matches!(ws.resolve(""), Err(PathError::Invalid { .. })));
        assert!(matches!(ws.resolve("a\0b"), Err(PathError::Invalid { .. })));
    }

    #[test]
    fn relative_root_rejected() {
        let err = WorkspaceRoot::new("relative/dir", HostType::Local).unwrap_err();
        assert!(matches!(err, PathError::RootUnavailable { .. }));
    }

    #[test]
    fn lexical_containment() {
        assert!(lexically_contained("a/b/../c"));
        assert!(lexically_contained("/abs/is/deferred"));
        assert!(!lexically_contained("../x"));
        assert!(!lexically_contained("a/../../x"));
        assert!(!lexically_contained(""));
    }
}
