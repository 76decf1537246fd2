use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("filename is required")]
    Empty,
    #[error("path must be relative")]
    Absolute,
    #[error("path traversal is not allowed")]
    Traversal,
    #[error("path separators are not allowed")]
    Separator,
}

/// Single-segment guard for names supplied by operators.
///
/// Rejects `..` anywhere in the name and both separator styles, so a valid
/// name can only ever address a direct child of the bot-files root.
pub fn validate_name(name: &str) -> Result<(), PathError> {
    if name.is_empty() {
        return Err(PathError::Empty);
    }
    if name.contains("..") {
        return Err(PathError::Traversal);
    }
    if name.contains('/') || name.contains('\\') {
        return Err(PathError::Separator);
    }
    Ok(())
}

pub fn is_valid_name(name: &str) -> bool {
    validate_name(name).is_ok()
}

/// `root/name` after [`validate_name`] has accepted `name`.
pub fn scoped_path(root: &Path, name: &str) -> Result<PathBuf, PathError> {
    validate_name(name)?;
    Ok(root.join(name))
}

/// Normalizes a multi-segment relative path produced by an archive.
///
/// Backslashes are treated as separators. `.` segments are dropped; parent,
/// root and prefix components are refused.
pub fn normalize_rel_path(rel: &str) -> Result<PathBuf, PathError> {
    let rel = rel.replace('\\', "/");
    if rel.starts_with('/') {
        return Err(PathError::Absolute);
    }

    let p = Path::new(&rel);
    if p.is_absolute() {
        return Err(PathError::Absolute);
    }

    let mut out = PathBuf::new();
    for c in p.components() {
        match c {
            Component::CurDir => {}
            Component::Normal(seg) => out.push(seg),
            Component::ParentDir => return Err(PathError::Traversal),
            Component::Prefix(_) | Component::RootDir => return Err(PathError::Absolute),
        }
    }

    Ok(out)
}

/// Suffix carried by in-flight write files; listings hide them.
pub const TEMP_SUFFIX: &str = ".botpanel-tmp";

/// A sibling of `target` to stage an atomic write in. The random part keeps
/// it clear of any operator file.
pub fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = format!(".{name}.{}{TEMP_SUFFIX}", uuid::Uuid::new_v4().simple());
    target.with_file_name(tmp)
}

pub fn is_temp_name(name: &str) -> bool {
    name.ends_with(TEMP_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_names_pass() {
        for name in ["index.js", ".env", "package.json", "my folder", "a.b.c"] {
            assert!(is_valid_name(name), "{name} should be valid");
        }
    }

    #[test]
    fn traversal_and_separators_are_rejected() {
        assert_eq!(validate_name(".."), Err(PathError::Traversal));
        assert_eq!(validate_name("a..b"), Err(PathError::Traversal));
        assert_eq!(validate_name("a/b"), Err(PathError::Separator));
        assert_eq!(validate_name("a\\b"), Err(PathError::Separator));
        assert_eq!(validate_name("/etc"), Err(PathError::Separator));
        assert_eq!(validate_name(""), Err(PathError::Empty));
    }

    #[test]
    fn scoped_path_joins_under_root() {
        let root = Path::new("/srv/home");
        assert_eq!(
            scoped_path(root, "bot.js").unwrap(),
            PathBuf::from("/srv/home/bot.js")
        );
        assert!(scoped_path(root, "../bot.js").is_err());
    }

    #[test]
    fn normalize_keeps_nested_relative_paths() {
        assert_eq!(
            normalize_rel_path("a/./b/c.txt").unwrap(),
            PathBuf::from("a/b/c.txt")
        );
        assert_eq!(
            normalize_rel_path("win\\style\\x.js").unwrap(),
            PathBuf::from("win/style/x.js")
        );
    }

    #[test]
    fn normalize_rejects_escapes() {
        assert_eq!(normalize_rel_path("../x"), Err(PathError::Traversal));
        assert_eq!(normalize_rel_path("a/../../x"), Err(PathError::Traversal));
        assert_eq!(normalize_rel_path("/etc/passwd"), Err(PathError::Absolute));
        assert_eq!(normalize_rel_path("\\abs"), Err(PathError::Absolute));
    }

    #[test]
    fn temp_paths_are_unique_hidden_siblings() {
        let target = Path::new("/srv/home/bot.js");
        let a = temp_path_for(target);
        let b = temp_path_for(target);
        assert_ne!(a, b);
        assert_eq!(a.parent(), target.parent());

        let name = a.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(".bot.js."));
        assert!(is_temp_name(name));
        assert!(!is_temp_name("bot.js.tmp"));
    }
}
