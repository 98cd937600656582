use std::path::Path;

use common::{normalize_path, slash_path};
use tracing::debug;
use walkdir::WalkDir;

pub const DEFAULT_MUSIC_EXTENSIONS: &[&str] = &[".mp3", ".ogg", ".flac", ".wav"];

/// Finds music files by extension. Directory symlinks are not followed; a
/// symlinked file counts when its target is a regular file.
#[derive(Debug, Clone)]
pub struct Scanner {
    extensions: Vec<String>,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new(DEFAULT_MUSIC_EXTENSIONS)
    }
}

impl Scanner {
    pub fn new<S: AsRef<str>>(extensions: &[S]) -> Self {
        let extensions = extensions
            .iter()
            .map(|ext| normalize_extension(ext.as_ref()))
            .filter(|ext| ext.len() > 1)
            .collect();
        Self { extensions }
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn is_music_file(&self, path: &Path) -> bool {
        let ext = match path.extension() {
            Some(ext) => format!(".{}", ext.to_string_lossy().to_ascii_lowercase()),
            None => return false,
        };
        self.extensions.iter().any(|known| *known == ext)
    }

    pub fn music_files(&self, dir: &Path) -> Vec<String> {
        self.walk(dir, None)
    }

    pub fn music_files_in_root_only(&self, dir: &Path) -> Vec<String> {
        self.walk(dir, Some(1))
    }

    fn walk(&self, dir: &Path, max_depth: Option<usize>) -> Vec<String> {
        let root = normalize_path(dir);
        let mut walker = WalkDir::new(&root).follow_links(false).min_depth(1);
        if let Some(depth) = max_depth {
            walker = walker.max_depth(depth);
        }

        let mut files = Vec::new();
        for entry in walker.into_iter() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!("Skipping unreadable entry under {}: {}", root, err);
                    continue;
                }
            };
            let path = entry.path();
            if path.is_file() && self.is_music_file(path) {
                files.push(slash_path(path));
            }
        }
        files.sort();
        files
    }
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn matches_extensions_case_insensitively() {
        let scanner = Scanner::default();
        assert!(scanner.is_music_file(Path::new("/m/a.MP3")));
        assert!(scanner.is_music_file(Path::new("/m/b.Flac")));
        assert!(!scanner.is_music_file(Path::new("/m/cover.jpg")));
        assert!(!scanner.is_music_file(Path::new("/m/mp3")));
    }

    #[test]
    fn extensions_without_dots_are_accepted() {
        let scanner = Scanner::new(&["OPUS", ".m4a", ""]);
        assert_eq!(scanner.extensions(), &[".opus".to_string(), ".m4a".to_string()]);
        assert!(scanner.is_music_file(Path::new("x.opus")));
    }

    #[test]
    fn walks_recursively_or_root_only() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("album");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join("b.ogg"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();
        fs::write(nested.join("a.mp3"), b"").unwrap();

        let root = normalize_path(dir.path());
        let scanner = Scanner::default();
        assert_eq!(
            scanner.music_files(dir.path()),
            vec![format!("{}/album/a.mp3", root), format!("{}/b.ogg", root)]
        );
        assert_eq!(
            scanner.music_files_in_root_only(dir.path()),
            vec![format!("{}/b.ogg", root)]
        );
    }

    #[test]
    fn missing_directory_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = Scanner::default();
        assert!(scanner.music_files(&dir.path().join("absent")).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn directory_symlinks_are_not_descended() {
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("elsewhere.mp3"), b"").unwrap();

        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("elsewhere.mp3"),
            dir.path().join("linked.mp3"),
        )
        .unwrap();

        let root = normalize_path(dir.path());
        assert_eq!(
            Scanner::default().music_files(dir.path()),
            vec![format!("{}/linked.mp3", root)]
        );
    }
}
