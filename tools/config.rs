use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use library::DEFAULT_MUSIC_EXTENSIONS;
use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibrarySection {
    pub database_path: String,
    pub music_extensions: Vec<String>,
}

impl Default for LibrarySection {
    fn default() -> Self {
        Self {
            database_path: "data.redb".to_string(),
            music_extensions: default_extensions(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    pub prune_on_remove: bool,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            prune_on_remove: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibsyncConfig {
    pub version: u32,
    pub library: LibrarySection,
    pub scan: ScanSection,
}

impl Default for LibsyncConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            library: LibrarySection::default(),
            scan: ScanSection::default(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("LIBSYNC_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("libsync.yaml"))
            .unwrap_or_else(|| PathBuf::from("libsync.yaml")),
        Err(_) => PathBuf::from("libsync.yaml"),
    }
}

/// Reads the config, writing the defaults first when none exists. The flag
/// is true when the file was created.
pub fn load_or_create_config(path: &Path) -> Result<(LibsyncConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: LibsyncConfig = serde_yaml::from_str(&contents)?;
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        if config.library.database_path.trim().is_empty() {
            config.library.database_path = LibrarySection::default().database_path;
        }
        config
            .library
            .music_extensions
            .retain(|ext| !ext.trim().is_empty());
        if config.library.music_extensions.is_empty() {
            config.library.music_extensions = default_extensions();
        }
        return Ok((config, false));
    }

    let config = LibsyncConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &LibsyncConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

fn default_extensions() -> Vec<String> {
    DEFAULT_MUSIC_EXTENSIONS
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("libsync.yaml");

        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(created);
        assert_eq!(config, LibsyncConfig::default());
        assert!(path.exists());

        let (again, created) = load_or_create_config(&path).unwrap();
        assert!(!created);
        assert_eq!(again, config);
    }

    #[test]
    fn blank_values_are_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libsync.yaml");
        fs::write(
            &path,
            "version: 0\nlibrary:\n  database_path: \" \"\n  music_extensions: [\"\"]\nscan:\n  prune_on_remove: false\n",
        )
        .unwrap();

        let (config, _) = load_or_create_config(&path).unwrap();
        assert_eq!(config.version, CONFIG_VERSION);
        assert_eq!(config.library.database_path, "data.redb");
        assert_eq!(config.library.music_extensions, default_extensions());
        assert!(!config.scan.prune_on_remove);
    }

    #[test]
    fn partial_sections_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libsync.yaml");
        fs::write(&path, "library:\n  music_extensions: [\".opus\"]\n").unwrap();

        let (config, _) = load_or_create_config(&path).unwrap();
        assert_eq!(config.library.music_extensions, vec![".opus".to_string()]);
        assert_eq!(config.library.database_path, "data.redb");
        assert!(config.scan.prune_on_remove);
    }

    #[test]
    fn relative_paths_resolve_against_the_config_dir() {
        let config_path = Path::new("/etc/libsync/libsync.yaml");
        assert_eq!(
            resolve_path(config_path, "data.redb"),
            PathBuf::from("/etc/libsync/data.redb")
        );
        assert_eq!(
            resolve_path(Path::new("libsync.yaml"), "data.redb"),
            PathBuf::from("./data.redb")
        );
    }

    #[cfg(unix)]
    #[test]
    fn absolute_paths_are_kept() {
        assert_eq!(
            resolve_path(Path::new("/etc/libsync.yaml"), "/var/lib/data.redb"),
            PathBuf::from("/var/lib/data.redb")
        );
    }
}
