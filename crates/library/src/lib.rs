mod batch;
pub mod changes;
pub mod roots;
pub mod scanner;
pub mod store;

use std::collections::HashSet;
use std::path::Path;

use common::{normalize_file_path, normalize_path, FileRow, TrackView};
use metadata::{FileTagReader, MetadataError, TagSource};
use redb::{CommitError, DatabaseError, ReadableTable, StorageError, TableError, TransactionError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::batch::{AlbumArtists, NameResolver};
use crate::store::{
    capture_references, files_at, files_under, insert_files, next_id, prune_unreferenced,
    remove_file_rows, set_counter, Entity, FILE_BY_PATH_TABLE, FILE_TABLE, NEXT_FILE_ID_KEY,
};

pub use changes::{ChangeHub, RefreshHint};
pub use roots::{LibraryRoots, RootAdd};
pub use scanner::{Scanner, DEFAULT_MUSIC_EXTENSIONS};
pub use store::{LibraryStats, Store, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    ExtractionFailed,
    PathNotFound,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPath {
    pub path: String,
    pub kind: FailureKind,
    pub error: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub inserted: usize,
    /// Paths already tracked, or repeated within the batch.
    pub skipped: Vec<String>,
    pub failed: Vec<FailedPath>,
}

impl BatchReport {
    pub fn failed_paths(&self) -> Vec<String> {
        self.failed.iter().map(|failed| failed.path.clone()).collect()
    }

    fn absorb(&mut self, other: BatchReport) {
        self.inserted += other.inserted;
        self.skipped.extend(other.skipped);
        self.failed.extend(other.failed);
    }
}

#[derive(Debug)]
pub enum LibraryError {
    Store(StoreError),
    /// The directory is already inside a library root.
    AlreadyCovered(String),
    /// The directory is not inside any library root.
    InvalidDirectory(String),
    NotADirectory(String),
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Store(err) => write!(f, "{}", err),
            LibraryError::AlreadyCovered(path) => {
                write!(f, "directory is already part of the library: {}", path)
            }
            LibraryError::InvalidDirectory(path) => {
                write!(f, "directory is not part of the library: {}", path)
            }
            LibraryError::NotADirectory(path) => write!(f, "not a directory: {}", path),
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<StoreError> for LibraryError {
    fn from(err: StoreError) -> Self {
        LibraryError::Store(err)
    }
}

impl From<redb::Error> for LibraryError {
    fn from(err: redb::Error) -> Self {
        LibraryError::Store(err.into())
    }
}

impl From<DatabaseError> for LibraryError {
    fn from(err: DatabaseError) -> Self {
        LibraryError::Store(err.into())
    }
}

impl From<TableError> for LibraryError {
    fn from(err: TableError) -> Self {
        LibraryError::Store(err.into())
    }
}

impl From<TransactionError> for LibraryError {
    fn from(err: TransactionError) -> Self {
        LibraryError::Store(err.into())
    }
}

impl From<StorageError> for LibraryError {
    fn from(err: StorageError) -> Self {
        LibraryError::Store(err.into())
    }
}

impl From<CommitError> for LibraryError {
    fn from(err: CommitError) -> Self {
        LibraryError::Store(err.into())
    }
}

/// Keeps the stored file, artist, album and genre rows in step with the
/// directories registered as library roots. The only writer of those tables.
pub struct Library {
    store: Store,
    scanner: Scanner,
    tags: Box<dyn TagSource>,
    changes: ChangeHub<RefreshHint>,
}

impl Library {
    pub fn open(db_path: &Path, scanner: Scanner) -> Result<Self, LibraryError> {
        let store = Store::open(db_path)?;
        Ok(Self::with_tag_source(store, scanner, Box::new(FileTagReader)))
    }

    pub fn with_tag_source(store: Store, scanner: Scanner, tags: Box<dyn TagSource>) -> Self {
        Self {
            store,
            scanner,
            tags,
            changes: ChangeHub::new(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn roots(&self) -> LibraryRoots<'_> {
        self.store.roots()
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    pub fn changes(&self) -> &ChangeHub<RefreshHint> {
        &self.changes
    }

    pub fn stats(&self) -> Result<LibraryStats, LibraryError> {
        Ok(self.store.stats()?)
    }

    pub fn tracks(&self) -> Result<Vec<TrackView>, LibraryError> {
        Ok(self.store.tracks()?)
    }

    pub fn contains_file(&self, path: &Path) -> Result<bool, LibraryError> {
        Ok(self.store.contains_path(&normalize_file_path(path))?)
    }

    /// Registers `path` as a root and imports every music file beneath it.
    ///
    /// The root is committed before any file is read, so a failing import
    /// leaves the directory registered.
    pub fn add_directory(&self, path: &Path) -> Result<BatchReport, LibraryError> {
        let dir = normalize_path(path);
        if !path.is_dir() {
            return Err(LibraryError::NotADirectory(dir));
        }

        let check_existing = match self.store.roots().add(path)? {
            RootAdd::Rejected => return Err(LibraryError::AlreadyCovered(dir)),
            RootAdd::Added => false,
            RootAdd::AddedAndSubsumed(_) => true,
        };

        let files = self.scanner.music_files(path);
        info!("Found {} music files in {}", files.len(), dir);
        let report = self.insert_batch(&files, check_existing)?;
        self.changed(None);
        Ok(report)
    }

    pub fn batch_insert<S: AsRef<str>>(
        &self,
        paths: &[S],
        check_existing: bool,
    ) -> Result<BatchReport, LibraryError> {
        let report = self.insert_batch(paths, check_existing)?;
        self.changed(None);
        Ok(report)
    }

    /// Re-imports a directory inside the library. With `rescan_tags` every
    /// tracked file under it is dropped and read again; otherwise only files
    /// not yet tracked are added.
    pub fn rescan(&self, path: &Path, rescan_tags: bool) -> Result<BatchReport, LibraryError> {
        let report = self.rescan_dir(path, rescan_tags)?;
        self.changed(None);
        Ok(report)
    }

    pub fn rescan_all(&self, rescan_tags: bool) -> Result<BatchReport, LibraryError> {
        let mut report = BatchReport::default();
        for root in self.store.roots().list()? {
            report.absorb(self.rescan_dir(Path::new(&root), rescan_tags)?);
        }
        self.changed(None);
        Ok(report)
    }

    /// Drops every tracked file under `path`. Returns the number of files
    /// removed.
    pub fn remove_directory_files(
        &self,
        path: &Path,
        remove_from_root_set: bool,
        prune: bool,
    ) -> Result<usize, LibraryError> {
        let removed = self.remove_under(path, prune)?;
        if remove_from_root_set {
            self.store.roots().remove(path)?;
        }
        self.changed(None);
        Ok(removed)
    }

    /// Drops the given files. Every doomed row's references are captured
    /// before anything is deleted, so pruning sees the whole set at once.
    pub fn remove_files<S: AsRef<str>>(
        &self,
        paths: &[S],
        prune: bool,
        hint: Option<RefreshHint>,
    ) -> Result<usize, LibraryError> {
        let paths: Vec<String> = paths
            .iter()
            .map(|path| normalize_file_path(Path::new(path.as_ref())))
            .collect();

        let txn = self.store.begin_write()?;
        let rows = files_at(&txn, &paths)?;
        let removed = self.delete_rows(&txn, &rows, prune)?;
        txn.commit()?;

        info!("Removed {} of {} requested files", removed, paths.len());
        self.changed(hint);
        Ok(removed)
    }

    pub fn remove_file(&self, path: &Path) -> Result<bool, LibraryError> {
        let path = path.to_string_lossy().to_string();
        Ok(self.remove_files(&[path], true, None)? > 0)
    }

    /// Empties the tag tables. Library roots are kept.
    pub fn reset_library_tags(&self) -> Result<(), LibraryError> {
        self.store.reset_tags()?;
        self.changed(None);
        Ok(())
    }

    /// Empties the tag tables and forgets every library root.
    pub fn clear_library(&self) -> Result<(), LibraryError> {
        self.store.reset_tags()?;
        self.store.reset_roots()?;
        self.changed(None);
        Ok(())
    }

    fn rescan_dir(&self, path: &Path, rescan_tags: bool) -> Result<BatchReport, LibraryError> {
        let dir = normalize_path(path);
        if !self.store.roots().is_covered(path)? {
            return Err(LibraryError::InvalidDirectory(dir));
        }

        if rescan_tags {
            self.remove_under(path, true)?;
        }
        let files = self.scanner.music_files(path);
        debug!("Rescanning {} ({} music files)", dir, files.len());
        self.insert_batch(&files, !rescan_tags)
    }

    fn remove_under(&self, path: &Path, prune: bool) -> Result<usize, LibraryError> {
        let dir = normalize_path(path);
        if !self.store.roots().is_covered(path)? {
            return Err(LibraryError::InvalidDirectory(dir));
        }

        let txn = self.store.begin_write()?;
        let rows = files_under(&txn, &dir)?;
        let removed = self.delete_rows(&txn, &rows, prune)?;
        txn.commit()?;

        info!("Removed {} files under {}", removed, dir);
        Ok(removed)
    }

    fn delete_rows(
        &self,
        txn: &redb::WriteTransaction,
        rows: &[FileRow],
        prune: bool,
    ) -> Result<usize, LibraryError> {
        let refs = capture_references(rows);
        remove_file_rows(txn, rows, true)?;
        if prune && !refs.is_empty() {
            let pruned = prune_unreferenced(txn, &refs)?;
            debug!(
                "Pruned {} artists, {} albums, {} genres",
                pruned.artists, pruned.albums, pruned.genres
            );
        }
        Ok(rows.len())
    }

    fn insert_batch<S: AsRef<str>>(
        &self,
        paths: &[S],
        check_existing: bool,
    ) -> Result<BatchReport, LibraryError> {
        let mut report = BatchReport::default();
        let txn = self.store.begin_write()?;

        let mut artists = NameResolver::load(&txn, Entity::Artist)?;
        let mut albums = NameResolver::load(&txn, Entity::Album)?;
        let mut genres = NameResolver::load(&txn, Entity::Genre)?;
        let mut links = AlbumArtists::load(&txn)?;
        let mut file_id = next_id(&txn, FILE_TABLE, NEXT_FILE_ID_KEY)?;

        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        {
            let by_path = txn.open_table(FILE_BY_PATH_TABLE)?;
            for path in paths {
                let path = normalize_file_path(Path::new(path.as_ref()));
                if !seen.insert(path.clone()) {
                    report.skipped.push(path);
                    continue;
                }
                if check_existing && by_path.get(path.as_str())?.is_some() {
                    report.skipped.push(path);
                    continue;
                }

                let record = match self.tags.read(Path::new(&path)) {
                    Ok(record) => record,
                    Err(err) => {
                        warn!("Failed to read tags for {}: {}", path, err);
                        let kind = match err {
                            MetadataError::PathNotFound(_) => FailureKind::PathNotFound,
                            _ => FailureKind::ExtractionFailed,
                        };
                        report.failed.push(FailedPath {
                            path,
                            kind,
                            error: err.to_string(),
                        });
                        continue;
                    }
                };

                let artist_id = artists.resolve(&record.artist);
                let album_id = albums.resolve(&record.album);
                let genre_id = genres.resolve(&record.genre);
                links.link(album_id, artist_id);

                rows.push(FileRow {
                    id: file_id,
                    title: record.title,
                    artist_id,
                    album_id,
                    track: record.track,
                    length: record.length,
                    year: record.year,
                    genre_id,
                    // keyed by our own normalized path, never `record.path`
                    path,
                });
                file_id += 1;
            }
        }

        artists.flush(&txn)?;
        albums.flush(&txn)?;
        genres.flush(&txn)?;
        links.flush(&txn)?;

        let replaced = insert_files(&txn, &rows)?;
        if !replaced.is_empty() {
            prune_unreferenced(&txn, &capture_references(&replaced))?;
        }
        set_counter(&txn, NEXT_FILE_ID_KEY, file_id)?;
        txn.commit()?;

        report.inserted = rows.len();
        info!(
            "Imported {} files ({} skipped, {} failed)",
            report.inserted,
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }

    fn changed(&self, hint: Option<RefreshHint>) {
        self.changes.mark_changed();
        self.changes.notify(hint);
    }
}
