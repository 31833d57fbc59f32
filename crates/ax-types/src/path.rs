//! Central safe-path construction.
//!
//! Every path built from a caller-supplied fragment must go through
//! [`safe_join`]. The helper rejects absolute fragments, parent-directory
//! components, and NUL bytes, so the result is always strictly under the
//! given root.

use std::path::{Component, Path, PathBuf};

/// Join `fragment` onto `root`, rejecting anything that could escape it.
///
/// Rejected: absolute fragments, `..` components, NUL bytes, and Windows
/// drive/UNC prefixes. `.` components are allowed and normalized away by
/// the OS.
pub fn safe_join(root: &Path, fragment: &str) -> Result<PathBuf, String> {
    if fragment.contains('\0') {
        return Err("path contains NUL byte".into());
    }

    let frag = Path::new(fragment);
    if frag.is_absolute() {
        return Err(format!("absolute path not allowed: {fragment:?}"));
    }

    for component in frag.components() {
        match component {
            Component::ParentDir => {
                return Err(format!("path traversal not allowed: {fragment:?}"));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(format!("absolute path not allowed: {fragment:?}"));
            }
            Component::Normal(_) | Component::CurDir => {}
        }
    }

    Ok(root.join(frag))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> PathBuf {
        PathBuf::from("/srv/workspaces/abc")
    }

    #[test]
    fn plain_relative_ok() {
        let p = safe_join(&root(), "notes/todo.md").unwrap();
        assert_eq!(p, PathBuf::from("/srv/workspaces/abc/notes/todo.md"));
    }

    #[test]
    fn curdir_ok() {
        assert!(safe_join(&root(), "./file.txt").is_ok());
    }

    #[test]
    fn rejects_parent_dir() {
        assert!(safe_join(&root(), "../escape").is_err());
        assert!(safe_join(&root(), "a/../../escape").is_err());
        assert!(safe_join(&root(), "../../../etc/passwd").is_err());
    }

    #[test]
    fn rejects_absolute() {
        assert!(safe_join(&root(), "/etc/passwd").is_err());
    }

    #[test]
    fn rejects_nul() {
        assert!(safe_join(&root(), "file\0name").is_err());
    }
}
