//! Path confinement for tool writes.

use std::path::{Component, Path, PathBuf};

use tether_core::tools::ToolError;

/// Join `relative` onto `base`, refusing anything that would land outside
/// `base`. Absolute paths and `..` that climb above the base are rejected.
pub fn safe_join(base: &Path, relative: &str) -> Result<PathBuf, ToolError> {
    let rel = Path::new(relative);
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();

    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(escape_error(base, relative));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(escape_error(base, relative));
            }
        }
    }

    if parts.is_empty() {
        return Err(ToolError::InvalidArguments(format!(
            "path {relative:?} does not name a file"
        )));
    }

    let mut joined = base.to_path_buf();
    joined.extend(parts);
    Ok(joined)
}

/// Resolve `.` and `..` without touching the filesystem.
pub fn normalize_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Lexically normalize, then canonicalize the longest existing prefix so
/// symlinks are followed even when the leaf does not exist yet.
pub fn resolve_existing(path: &Path) -> PathBuf {
    let normalized = normalize_lexical(path);
    let mut probe = normalized.clone();
    let mut tail = Vec::new();
    loop {
        if let Ok(mut canonical) = std::fs::canonicalize(&probe) {
            canonical.extend(tail.iter().rev());
            return canonical;
        }
        match probe.file_name() {
            Some(name) => {
                tail.push(name.to_os_string());
                probe.pop();
            }
            None => return normalized,
        }
    }
}

fn escape_error(base: &Path, relative: &str) -> ToolError {
    ToolError::SecurityViolation(format!(
        "path {relative:?} resolves outside of {}",
        base.display()
    ))
}
