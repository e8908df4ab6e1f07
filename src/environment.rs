use crate::substitute::VariableEnvironment;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no active file; pass --file to resolve {{project}}, {{path}} and {{absPath}}")]
    NoActiveFile,
}

#[derive(Debug, Clone, Default)]
pub struct EditorContext {
    pub active_file: Option<PathBuf>,
    pub project_roots: Vec<PathBuf>,
}

impl EditorContext {
    // Relative paths are anchored at `cwd`, which also serves as the only project root
    // when none are configured.
    pub fn new(active_file: Option<&Path>, project_roots: Vec<PathBuf>, cwd: &Path) -> Self {
        let anchor = |path: &Path| {
            if path.is_absolute() {
                normalize(path)
            } else {
                normalize(&cwd.join(path))
            }
        };
        let mut roots: Vec<PathBuf> = project_roots.iter().map(|root| anchor(root)).collect();
        if roots.is_empty() {
            roots.push(normalize(cwd));
        }
        Self {
            active_file: active_file.map(anchor),
            project_roots: roots,
        }
    }

    // Split `path` into the innermost containing project root and the path relative to
    // it. Paths outside every root come back whole with no root.
    pub fn relativize_path(&self, path: &Path) -> (Option<PathBuf>, PathBuf) {
        let best = self
            .project_roots
            .iter()
            .filter_map(|root| path.strip_prefix(root).ok().map(|rel| (root, rel)))
            .max_by_key(|(root, _)| root.components().count());
        match best {
            Some((root, rel)) => (Some(root.clone()), rel.to_path_buf()),
            None => (None, path.to_path_buf()),
        }
    }

    pub fn resolve(&self) -> Result<VariableEnvironment, ResolveError> {
        let abs_path = self.active_file.as_ref().ok_or(ResolveError::NoActiveFile)?;
        let (project, rel_path) = self.relativize_path(abs_path);
        let mut env = VariableEnvironment::new();
        if let Some(project) = project {
            env.insert("project", project.to_string_lossy());
        }
        env.insert("path", rel_path.to_string_lossy());
        env.insert("absPath", abs_path.to_string_lossy());
        Ok(env)
    }
}

// Lexical cleanup only; the active file need not exist on disk.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
