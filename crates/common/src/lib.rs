use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRow {
    pub id: u64,
    pub title: String,
    pub artist_id: u64,
    pub album_id: u64,
    pub track: Option<u32>,
    pub length: String,
    pub year: Option<i32>,
    pub genre_id: u64,
    pub path: String,
}

/// An Artist, Album or Genre row. `name: None` is a real row shared by every
/// file that lacks the tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Named {
    pub id: u64,
    pub name: Option<String>,
}

/// A File row with its foreign keys resolved, in display column order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackView {
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub track: Option<u32>,
    pub length: String,
    pub year: Option<i32>,
    pub genre: Option<String>,
    pub path: String,
}

/// Absolute, symlink-resolved, forward-slash form of `path` with no trailing
/// separator unless it is a filesystem or drive root.
///
/// Paths that no longer exist cannot be resolved, so they are made absolute
/// and cleaned lexically instead.
pub fn normalize_path(path: &Path) -> String {
    let absolute = match fs::canonicalize(path) {
        Ok(resolved) => resolved,
        Err(_) => lexical_absolute(path),
    };
    let text = strip_verbatim_prefix(&absolute.to_string_lossy()).replace('\\', "/");
    trim_trailing_separator(text)
}

/// Like `normalize_path`, but only the parent directory is resolved. A file
/// that is itself a symlink keeps its own name and stays under the directory
/// it was found in.
pub fn normalize_file_path(path: &Path) -> String {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let mut out = slashed(&normalize_path(parent));
            out.push_str(&name.to_string_lossy());
            out
        }
        _ => normalize_path(path),
    }
}

/// The path with exactly one trailing `/`, for prefix comparisons that must
/// not let `/foo` match `/foobar`.
pub fn slashed(path: &str) -> String {
    let mut out = path.to_string();
    if !out.ends_with('/') {
        out.push('/');
    }
    out
}

/// True when `path` is `root` or lies somewhere beneath it.
pub fn covers(root: &str, path: &str) -> bool {
    slashed(path).starts_with(&slashed(root))
}

pub fn slash_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

pub fn file_name_string(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| slash_path(path))
}

fn lexical_absolute(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if out.file_name().is_some() {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn strip_verbatim_prefix(text: &str) -> String {
    if let Some(rest) = text.strip_prefix(r"\\?\UNC\") {
        return format!(r"\\{}", rest);
    }
    text.strip_prefix(r"\\?\").unwrap_or(text).to_string()
}

fn trim_trailing_separator(mut text: String) -> String {
    while text.len() > 1 && text.ends_with('/') && !is_drive_root(&text) {
        text.pop();
    }
    text
}

fn is_drive_root(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() == 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/'
}

#[cfg(test)]
mod tests {
    use super::{
        covers, file_name_string, normalize_file_path, normalize_path, slashed,
        strip_verbatim_prefix, trim_trailing_separator,
    };
    use std::path::Path;

    #[test]
    fn slashed_appends_one_separator() {
        assert_eq!(slashed("/music"), "/music/");
        assert_eq!(slashed("/music/"), "/music/");
        assert_eq!(slashed("/"), "/");
    }

    #[test]
    fn covering_respects_component_boundaries() {
        assert!(covers("/music", "/music"));
        assert!(covers("/music", "/music/rock"));
        assert!(!covers("/foo", "/foobar"));
        assert!(!covers("/music/rock", "/music"));
        assert!(covers("/", "/anything"));
    }

    #[test]
    fn trailing_separators_are_dropped_except_roots() {
        assert_eq!(trim_trailing_separator("/music//".to_string()), "/music");
        assert_eq!(trim_trailing_separator("/".to_string()), "/");
        assert_eq!(trim_trailing_separator("C:/".to_string()), "C:/");
    }

    #[test]
    fn verbatim_prefixes_are_stripped() {
        assert_eq!(strip_verbatim_prefix(r"\\?\C:\Music"), r"C:\Music");
        assert_eq!(strip_verbatim_prefix(r"\\?\UNC\nas\share"), r"\\nas\share");
        assert_eq!(strip_verbatim_prefix("/plain"), "/plain");
    }

    #[cfg(unix)]
    #[test]
    fn missing_paths_are_cleaned_lexically() {
        let normalized = normalize_path(Path::new("/no/such/./place/../dir/"));
        assert_eq!(normalized, "/no/such/dir");
    }

    #[test]
    fn relative_paths_become_absolute() {
        let normalized = normalize_path(Path::new("some-relative-dir-that-is-missing"));
        assert!(Path::new(&normalized).is_absolute());
        assert!(normalized.ends_with("/some-relative-dir-that-is-missing"));
    }

    #[cfg(unix)]
    #[test]
    fn file_paths_keep_their_own_name() {
        assert_eq!(
            normalize_file_path(Path::new("/no/such/./album/../track.mp3")),
            "/no/such/track.mp3"
        );
        assert_eq!(normalize_file_path(Path::new("/track.mp3")), "/track.mp3");
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_files_are_not_resolved() {
        let outside = tempfile::tempdir().unwrap();
        let target = outside.path().join("real.mp3");
        std::fs::write(&target, b"x").unwrap();

        let root = tempfile::tempdir().unwrap();
        let link = root.path().join("linked.mp3");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let normalized = normalize_file_path(&link);
        assert_eq!(
            normalized,
            format!("{}/linked.mp3", normalize_path(root.path()))
        );
        assert!(covers(&normalize_path(root.path()), &normalized));
        assert_eq!(normalize_path(&link), normalize_path(&target));
    }

    #[test]
    fn file_names_fall_back_to_the_whole_path() {
        assert_eq!(file_name_string(Path::new("dir/Song.flac")), "Song.flac");
        assert_eq!(file_name_string(Path::new("/")), "/");
    }
}
