//! Path-sandboxed access to the project workspace.
//!
//! Every path is relative to the workspace root. Absolute paths, `..`
//! components that climb above the root, and anything that resolves outside
//! it are rejected before the filesystem is touched.

use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::errors::WorkspaceError;

/// Directories never listed or snapshotted.
const SKIPPED_DIRS: &[&str] = &[".git", "node_modules", "__pycache__", ".venv", "target"];

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Open (creating if needed) the workspace rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, WorkspaceError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| WorkspaceError::Io {
            path: root.display().to_string(),
            source,
        })?;
        let root = root.canonicalize().map_err(|source| WorkspaceError::Io {
            path: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `relative` to an absolute path inside the workspace.
    ///
    /// Purely lexical: no filesystem call is made, so escapes are rejected
    /// before anything is read or created.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, WorkspaceError> {
        let escape = || WorkspaceError::PathEscape {
            path: relative.to_string(),
        };
        let candidate = Path::new(relative);
        if relative.trim().is_empty() || candidate.is_absolute() {
            return Err(escape());
        }

        let mut resolved = self.root.clone();
        for component in candidate.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if resolved == self.root || !resolved.pop() {
                        return Err(escape());
                    }
                }
                Component::RootDir | Component::Prefix(_) => return Err(escape()),
            }
        }

        if !resolved.starts_with(&self.root) {
            return Err(escape());
        }
        Ok(resolved)
    }

    pub fn read_file(&self, relative: &str) -> Result<String, WorkspaceError> {
        let path = self.resolve(relative)?;
        self.ensure_inside(relative, &path)?;
        std::fs::read_to_string(&path).map_err(|source| WorkspaceError::Io {
            path: relative.to_string(),
            source,
        })
    }

    pub fn write_file(&self, relative: &str, content: &str) -> Result<(), WorkspaceError> {
        let path = self.resolve(relative)?;
        self.ensure_inside(relative, &path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| WorkspaceError::Io {
                path: relative.to_string(),
                source,
            })?;
        }
        std::fs::write(&path, content).map_err(|source| WorkspaceError::Io {
            path: relative.to_string(),
            source,
        })
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.resolve(relative)
            .and_then(|p| self.ensure_inside(relative, &p).map(|()| p))
            .is_ok_and(|p| p.exists())
    }

    /// All regular files, relative to the root, sorted.
    pub fn list_files(&self) -> Vec<String> {
        let mut files: Vec<String> = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| SKIPPED_DIRS.contains(&name))
            })
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(&self.root)
                    .ok()
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
            })
            .collect();
        files.sort();
        files
    }

    /// Listing plus file contents, capped at `max_bytes` in total.
    ///
    /// Used to give reviewers and the README writer a view of the code.
    pub fn snapshot(&self, max_bytes: usize) -> String {
        let files = self.list_files();
        let mut out = String::from("Files in workspace:\n");
        for file in &files {
            out.push_str(&format!("- {}\n", file));
        }

        for file in &files {
            if out.len() >= max_bytes {
                out.push_str("\n... [further files omitted]\n");
                break;
            }
            let Ok(content) = self.read_file(file) else {
                continue;
            };
            let budget = max_bytes.saturating_sub(out.len());
            out.push_str(&format!("\n=== {} ===\n", file));
            out.push_str(&crate::util::truncate(&content, budget));
            out.push('\n');
        }
        out
    }

    /// Symlinks inside the workspace must not lead outside it.
    ///
    /// Checks the nearest existing ancestor of `path` (or `path` itself), so
    /// a not-yet-created file under a symlinked directory is caught too. A
    /// dangling symlink on the way is rejected outright.
    fn ensure_inside(&self, relative: &str, path: &Path) -> Result<(), WorkspaceError> {
        let escape = || WorkspaceError::PathEscape {
            path: relative.to_string(),
        };
        let mut current = path;
        loop {
            match current.canonicalize() {
                Ok(real) if real.starts_with(&self.root) => return Ok(()),
                Ok(_) => return Err(escape()),
                Err(_) if current.symlink_metadata().is_ok() => return Err(escape()),
                Err(_) => {}
            }
            match current.parent() {
                Some(parent) if parent.starts_with(&self.root) => current = parent,
                _ => return Err(escape()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(dir.path().join("workspace")).unwrap();
        (dir, ws)
    }

    #[test]
    fn write_then_read_nested_file() {
        let (_dir, ws) = workspace();
        ws.write_file("src/app/main.py", "print('hi')").unwrap();
        assert_eq!(ws.read_file("src/app/main.py").unwrap(), "print('hi')");
        assert!(ws.exists("src/app/main.py"));
    }

    #[test]
    fn rejects_absolute_paths() {
        let (_dir, ws) = workspace();
        assert!(matches!(
            ws.resolve("/etc/passwd"),
            Err(WorkspaceError::PathEscape { .. })
        ));
        assert!(ws.write_file("/tmp/evil", "x").is_err());
    }

    #[test]
    fn rejects_parent_escapes() {
        let (dir, ws) = workspace();
        assert!(ws.resolve("../outside.txt").is_err());
        assert!(ws.resolve("a/../../outside.txt").is_err());
        assert!(ws.write_file("../outside.txt", "x").is_err());
        assert!(!dir.path().join("outside.txt").exists());
    }

    #[test]
    fn allows_parent_components_that_stay_inside() {
        let (_dir, ws) = workspace();
        let resolved = ws.resolve("a/b/../c.txt").unwrap();
        assert_eq!(resolved, ws.root().join("a").join("c.txt"));
    }

    #[test]
    fn rejects_empty_path() {
        let (_dir, ws) = workspace();
        assert!(ws.resolve("").is_err());
    }

    #[test]
    fn list_files_is_sorted_and_skips_vendor_dirs() {
        let (_dir, ws) = workspace();
        ws.write_file("b.txt", "b").unwrap();
        ws.write_file("a/z.txt", "z").unwrap();
        ws.write_file("node_modules/pkg/index.js", "x").unwrap();
        assert_eq!(ws.list_files(), vec!["a/z.txt".to_string(), "b.txt".to_string()]);
    }

    #[test]
    fn snapshot_includes_listing_and_content() {
        let (_dir, ws) = workspace();
        ws.write_file("main.py", "print(1)").unwrap();
        let snap = ws.snapshot(10_000);
        assert!(snap.contains("- main.py"));
        assert!(snap.contains("=== main.py ==="));
        assert!(snap.contains("print(1)"));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_pointing_outside() {
        let (dir, ws) = workspace();
        let outside = dir.path().join("secret.txt");
        std::fs::write(&outside, "secret").unwrap();
        std::os::unix::fs::symlink(&outside, ws.root().join("link.txt")).unwrap();
        assert!(matches!(
            ws.read_file("link.txt"),
            Err(WorkspaceError::PathEscape { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_new_file_under_symlinked_directory() {
        let (dir, ws) = workspace();
        let outside = dir.path().join("outside");
        std::fs::create_dir(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, ws.root().join("link")).unwrap();

        assert!(matches!(
            ws.write_file("link/evil.txt", "pwned"),
            Err(WorkspaceError::PathEscape { .. })
        ));
        assert!(matches!(
            ws.write_file("link/deeper/evil.txt", "pwned"),
            Err(WorkspaceError::PathEscape { .. })
        ));
        assert!(!outside.join("evil.txt").exists());
        assert!(!outside.join("deeper").exists());

        std::fs::write(outside.join("present.txt"), "x").unwrap();
        assert!(ws.read_file("link/present.txt").is_err());
        assert!(!ws.exists("link/present.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_dangling_symlink_target() {
        let (dir, ws) = workspace();
        std::os::unix::fs::symlink(dir.path().join("nowhere.txt"), ws.root().join("ghost.txt"))
            .unwrap();
        assert!(ws.write_file("ghost.txt", "x").is_err());
        assert!(!dir.path().join("nowhere.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_within_workspace_is_allowed() {
        let (_dir, ws) = workspace();
        ws.write_file("real/a.txt", "a").unwrap();
        std::os::unix::fs::symlink(ws.root().join("real"), ws.root().join("alias")).unwrap();
        ws.write_file("alias/b.txt", "b").unwrap();
        assert_eq!(ws.read_file("real/b.txt").unwrap(), "b");
    }
}
