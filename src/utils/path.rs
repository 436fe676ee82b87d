use std::io;
use std::path::{Component, Path, PathBuf};

/// Joins `path` onto `base` and folds `.` and `..` without touching the filesystem.
/// `..` at the root stays at the root. An absolute `path` replaces `base`.
pub fn resolve_lexically(base: &Path, path: &Path) -> PathBuf {
    let mut resolved = PathBuf::new();
    for component in base.join(path).components() {
        match component {
            Component::Prefix(p) => resolved.push(p.as_os_str()),
            Component::RootDir => resolved.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(c) => resolved.push(c),
        }
    }
    resolved
}

/// Resolves `path` against the process working directory
pub fn absolute(path: &Path) -> io::Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    Ok(resolve_lexically(&cwd, path))
}

/// Component-wise containment check on already resolved paths
pub fn is_within(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}
