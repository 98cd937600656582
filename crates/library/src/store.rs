use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use common::{slashed, FileRow, Named, TrackView};
use redb::{
    CommitError, Database, DatabaseError, ReadTransaction, ReadableTable, RedbKey, RedbValue,
    StorageError, TableDefinition, TableError, TransactionError, WriteTransaction,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const SCHEMA_VERSION: u64 = 1;

pub(crate) const FILE_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("file");
pub(crate) const FILE_BY_PATH_TABLE: TableDefinition<&str, u64> =
    TableDefinition::new("file_by_path");
pub(crate) const FILE_BY_ARTIST_TABLE: TableDefinition<(u64, u64), ()> =
    TableDefinition::new("file_by_artist");
pub(crate) const FILE_BY_ALBUM_TABLE: TableDefinition<(u64, u64), ()> =
    TableDefinition::new("file_by_album");
pub(crate) const FILE_BY_GENRE_TABLE: TableDefinition<(u64, u64), ()> =
    TableDefinition::new("file_by_genre");
pub(crate) const ARTIST_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("artist");
pub(crate) const ALBUM_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("album");
pub(crate) const GENRE_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("genre");
pub(crate) const ALBUM_CONTAINS_ARTIST_TABLE: TableDefinition<(u64, u64), ()> =
    TableDefinition::new("album_contains_artist");
pub(crate) const ARTIST_IN_ALBUM_TABLE: TableDefinition<(u64, u64), ()> =
    TableDefinition::new("artist_in_album");
pub(crate) const LIBRARY_ROOTS_TABLE: TableDefinition<u64, &str> =
    TableDefinition::new("library_roots");
pub(crate) const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

const META_VERSION_KEY: &str = "version";
pub(crate) const NEXT_FILE_ID_KEY: &str = "next_file_id";
pub(crate) const NEXT_ROOT_ID_KEY: &str = "next_root_id";

/// The three name tables that files point at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Entity {
    Artist,
    Album,
    Genre,
}

impl Entity {
    pub const ALL: [Entity; 3] = [Entity::Artist, Entity::Album, Entity::Genre];

    pub(crate) fn table(self) -> TableDefinition<'static, u64, &'static [u8]> {
        match self {
            Entity::Artist => ARTIST_TABLE,
            Entity::Album => ALBUM_TABLE,
            Entity::Genre => GENRE_TABLE,
        }
    }

    pub(crate) fn file_index(self) -> TableDefinition<'static, (u64, u64), ()> {
        match self {
            Entity::Artist => FILE_BY_ARTIST_TABLE,
            Entity::Album => FILE_BY_ALBUM_TABLE,
            Entity::Genre => FILE_BY_GENRE_TABLE,
        }
    }

    pub(crate) fn counter_key(self) -> &'static str {
        match self {
            Entity::Artist => "next_artist_id",
            Entity::Album => "next_album_id",
            Entity::Genre => "next_genre_id",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryStats {
    pub files: usize,
    pub artists: usize,
    pub albums: usize,
    pub genres: usize,
    pub album_artists: usize,
}

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(err) => write!(f, "io error: {}", err),
            StoreError::Redb(err) => write!(f, "db error: {}", err),
            StoreError::Bincode(err) => write!(f, "bincode error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<redb::Error> for StoreError {
    fn from(err: redb::Error) -> Self {
        StoreError::Redb(err)
    }
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        StoreError::Redb(err.into())
    }
}

impl From<TableError> for StoreError {
    fn from(err: TableError) -> Self {
        StoreError::Redb(err.into())
    }
}

impl From<TransactionError> for StoreError {
    fn from(err: TransactionError) -> Self {
        StoreError::Redb(err.into())
    }
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        StoreError::Redb(err.into())
    }
}

impl From<CommitError> for StoreError {
    fn from(err: CommitError) -> Self {
        StoreError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for StoreError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        StoreError::Bincode(err)
    }
}

/// The single embedded database handle. Constructed once and handed to the
/// [`crate::Library`], which is the only writer.
pub struct Store {
    db: Database,
    path: PathBuf,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let db = if path.exists() {
            Database::open(path)?
        } else {
            info!("Creating library database at {:?}", path);
            Database::create(path)?
        };

        let store = Self {
            db,
            path: path.to_path_buf(),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn begin_write(&self) -> Result<WriteTransaction, StoreError> {
        Ok(self.db.begin_write()?)
    }

    pub(crate) fn begin_read(&self) -> Result<ReadTransaction, StoreError> {
        Ok(self.db.begin_read()?)
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        let txn = self.begin_write()?;
        create_tag_tables(&txn)?;
        txn.open_table(LIBRARY_ROOTS_TABLE)?;
        {
            let mut meta = txn.open_table(META_TABLE)?;
            meta.insert(META_VERSION_KEY, SCHEMA_VERSION)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Drops and recreates every tag table. Library roots are not touched.
    pub fn reset_tags(&self) -> Result<(), StoreError> {
        let txn = self.begin_write()?;
        clear_table(&txn, FILE_TABLE)?;
        clear_table(&txn, FILE_BY_PATH_TABLE)?;
        clear_table(&txn, FILE_BY_ARTIST_TABLE)?;
        clear_table(&txn, FILE_BY_ALBUM_TABLE)?;
        clear_table(&txn, FILE_BY_GENRE_TABLE)?;
        clear_table(&txn, ARTIST_TABLE)?;
        clear_table(&txn, ALBUM_TABLE)?;
        clear_table(&txn, GENRE_TABLE)?;
        clear_table(&txn, ALBUM_CONTAINS_ARTIST_TABLE)?;
        clear_table(&txn, ARTIST_IN_ALBUM_TABLE)?;
        {
            let mut meta = txn.open_table(META_TABLE)?;
            meta.remove(NEXT_FILE_ID_KEY)?;
            for entity in Entity::ALL {
                meta.remove(entity.counter_key())?;
            }
        }
        create_tag_tables(&txn)?;
        txn.commit()?;
        info!("Library tag tables reset");
        Ok(())
    }

    pub fn file_by_path(&self, path: &str) -> Result<Option<FileRow>, StoreError> {
        let read_txn = self.begin_read()?;
        let by_path = match read_txn.open_table(FILE_BY_PATH_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let id = match by_path.get(path)? {
            Some(value) => value.value(),
            None => return Ok(None),
        };
        let files = read_txn.open_table(FILE_TABLE)?;
        let row = match files.get(id)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(row)
    }

    pub fn contains_path(&self, path: &str) -> Result<bool, StoreError> {
        let read_txn = self.begin_read()?;
        let by_path = match read_txn.open_table(FILE_BY_PATH_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        let found = by_path.get(path)?.is_some();
        Ok(found)
    }

    /// Every File row, ordered by id.
    pub fn files(&self) -> Result<Vec<FileRow>, StoreError> {
        let read_txn = self.begin_read()?;
        let table = match read_txn.open_table(FILE_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut rows = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            rows.push(decode_value(entry.1.value())?);
        }
        Ok(rows)
    }

    pub fn named(&self, entity: Entity) -> Result<Vec<Named>, StoreError> {
        let read_txn = self.begin_read()?;
        let table = match read_txn.open_table(entity.table()) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut rows = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            rows.push(Named {
                id: entry.0.value(),
                name: decode_value(entry.1.value())?,
            });
        }
        Ok(rows)
    }

    pub fn artists(&self) -> Result<Vec<Named>, StoreError> {
        self.named(Entity::Artist)
    }

    pub fn albums(&self) -> Result<Vec<Named>, StoreError> {
        self.named(Entity::Album)
    }

    pub fn genres(&self) -> Result<Vec<Named>, StoreError> {
        self.named(Entity::Genre)
    }

    /// (album id, artist id) pairs.
    pub fn album_artists(&self) -> Result<Vec<(u64, u64)>, StoreError> {
        let read_txn = self.begin_read()?;
        let table = match read_txn.open_table(ALBUM_CONTAINS_ARTIST_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut pairs = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            pairs.push(entry.0.value());
        }
        Ok(pairs)
    }

    /// File rows joined against their names, ordered by path.
    pub fn tracks(&self) -> Result<Vec<TrackView>, StoreError> {
        let names: HashMap<Entity, HashMap<u64, Option<String>>> = Entity::ALL
            .into_iter()
            .map(|entity| {
                let rows = self.named(entity)?;
                Ok::<_, StoreError>((
                    entity,
                    rows.into_iter().map(|row| (row.id, row.name)).collect(),
                ))
            })
            .collect::<Result<_, StoreError>>()?;
        let lookup = |entity: Entity, id: u64| -> Option<String> {
            names
                .get(&entity)
                .and_then(|rows| rows.get(&id))
                .cloned()
                .flatten()
        };

        let mut tracks: Vec<TrackView> = self
            .files()?
            .into_iter()
            .map(|row| TrackView {
                artist: lookup(Entity::Artist, row.artist_id),
                album: lookup(Entity::Album, row.album_id),
                genre: lookup(Entity::Genre, row.genre_id),
                title: row.title,
                track: row.track,
                length: row.length,
                year: row.year,
                path: row.path,
            })
            .collect();
        tracks.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(tracks)
    }

    pub fn stats(&self) -> Result<LibraryStats, StoreError> {
        let read_txn = self.begin_read()?;
        Ok(LibraryStats {
            files: table_len(&read_txn, FILE_TABLE)?,
            artists: table_len(&read_txn, ARTIST_TABLE)?,
            albums: table_len(&read_txn, ALBUM_TABLE)?,
            genres: table_len(&read_txn, GENRE_TABLE)?,
            album_artists: table_len(&read_txn, ALBUM_CONTAINS_ARTIST_TABLE)?,
        })
    }
}

/// Ids of the names a set of File rows pointed at, captured before the rows
/// are deleted.
#[derive(Debug, Default)]
pub(crate) struct References {
    artists: BTreeSet<u64>,
    albums: BTreeSet<u64>,
    genres: BTreeSet<u64>,
}

impl References {
    pub(crate) fn capture(&mut self, row: &FileRow) {
        self.artists.insert(row.artist_id);
        self.albums.insert(row.album_id);
        self.genres.insert(row.genre_id);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.artists.is_empty() && self.albums.is_empty() && self.genres.is_empty()
    }

    fn ids(&self, entity: Entity) -> &BTreeSet<u64> {
        match entity {
            Entity::Artist => &self.artists,
            Entity::Album => &self.albums,
            Entity::Genre => &self.genres,
        }
    }
}

/// Next free id for a table: one past the larger of the highest key and the
/// persisted counter, so ids are never handed out twice.
pub(crate) fn next_id<V: RedbValue + 'static>(
    txn: &WriteTransaction,
    table: TableDefinition<u64, V>,
    counter_key: &str,
) -> Result<u64, StoreError> {
    let after_last = {
        let table = txn.open_table(table)?;
        let last = table.last()?;
        match last {
            Some((key, _)) => key.value().saturating_add(1),
            None => 1,
        }
    };
    let stored = {
        let meta = txn.open_table(META_TABLE)?;
        let value = meta.get(counter_key)?;
        value.map(|v| v.value()).unwrap_or(1)
    };
    Ok(after_last.max(stored))
}

pub(crate) fn set_counter(
    txn: &WriteTransaction,
    counter_key: &str,
    next: u64,
) -> Result<(), StoreError> {
    let mut meta = txn.open_table(META_TABLE)?;
    meta.insert(counter_key, next)?;
    Ok(())
}

/// Rows under `dir`, by prefix on the separator-suffixed directory.
pub(crate) fn files_under(txn: &WriteTransaction, dir: &str) -> Result<Vec<FileRow>, StoreError> {
    let prefix = slashed(dir);
    let mut end = prefix.clone();
    end.push('\u{10ffff}');

    let ids: Vec<u64> = {
        let by_path = txn.open_table(FILE_BY_PATH_TABLE)?;
        let mut ids = Vec::new();
        for entry in by_path.range(prefix.as_str()..end.as_str())? {
            let entry = entry?;
            ids.push(entry.1.value());
        }
        ids
    };
    load_files(txn, &ids)
}

pub(crate) fn files_at(txn: &WriteTransaction, paths: &[String]) -> Result<Vec<FileRow>, StoreError> {
    let ids: Vec<u64> = {
        let by_path = txn.open_table(FILE_BY_PATH_TABLE)?;
        let mut ids = Vec::new();
        for path in paths {
            if let Some(value) = by_path.get(path.as_str())? {
                ids.push(value.value());
            }
        }
        ids
    };
    load_files(txn, &ids)
}

fn load_files(txn: &WriteTransaction, ids: &[u64]) -> Result<Vec<FileRow>, StoreError> {
    let files = txn.open_table(FILE_TABLE)?;
    let mut rows = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(value) = files.get(*id)? {
            rows.push(decode_value(value.value())?);
        }
    }
    Ok(rows)
}

/// Inserts File rows with their indexes. A row whose path is already tracked
/// replaces the old row; the replaced rows are returned so their names can be
/// pruned.
pub(crate) fn insert_files(
    txn: &WriteTransaction,
    rows: &[FileRow],
) -> Result<Vec<FileRow>, StoreError> {
    let mut replaced_ids = Vec::new();
    {
        let mut by_path = txn.open_table(FILE_BY_PATH_TABLE)?;
        for row in rows {
            let previous = by_path.insert(row.path.as_str(), row.id)?.map(|v| v.value());
            if let Some(previous) = previous {
                if previous != row.id {
                    replaced_ids.push(previous);
                }
            }
        }
    }

    let replaced = load_files(txn, &replaced_ids)?;
    if !replaced.is_empty() {
        debug!("Replacing {} stale file rows", replaced.len());
        remove_file_rows(txn, &replaced, false)?;
    }

    let mut files = txn.open_table(FILE_TABLE)?;
    let mut by_artist = txn.open_table(FILE_BY_ARTIST_TABLE)?;
    let mut by_album = txn.open_table(FILE_BY_ALBUM_TABLE)?;
    let mut by_genre = txn.open_table(FILE_BY_GENRE_TABLE)?;
    for row in rows {
        let bytes = encode_value(row)?;
        files.insert(row.id, bytes.as_slice())?;
        by_artist.insert((row.artist_id, row.id), ())?;
        by_album.insert((row.album_id, row.id), ())?;
        by_genre.insert((row.genre_id, row.id), ())?;
    }

    Ok(replaced)
}

/// Deletes File rows and their reference index entries. `drop_path_index`
/// is false when the path entry has already been pointed at a new row.
pub(crate) fn remove_file_rows(
    txn: &WriteTransaction,
    rows: &[FileRow],
    drop_path_index: bool,
) -> Result<(), StoreError> {
    let mut files = txn.open_table(FILE_TABLE)?;
    let mut by_path = txn.open_table(FILE_BY_PATH_TABLE)?;
    let mut by_artist = txn.open_table(FILE_BY_ARTIST_TABLE)?;
    let mut by_album = txn.open_table(FILE_BY_ALBUM_TABLE)?;
    let mut by_genre = txn.open_table(FILE_BY_GENRE_TABLE)?;
    for row in rows {
        files.remove(row.id)?;
        if drop_path_index {
            by_path.remove(row.path.as_str())?;
        }
        by_artist.remove((row.artist_id, row.id))?;
        by_album.remove((row.album_id, row.id))?;
        by_genre.remove((row.genre_id, row.id))?;
    }
    Ok(())
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Pruned {
    pub artists: usize,
    pub albums: usize,
    pub genres: usize,
}

/// Removes every captured name row that no File row points at any more,
/// together with the album/artist links that mention it.
pub(crate) fn prune_unreferenced(
    txn: &WriteTransaction,
    refs: &References,
) -> Result<Pruned, StoreError> {
    let mut pruned = Pruned::default();
    for entity in Entity::ALL {
        for &id in refs.ids(entity) {
            if is_referenced(txn, entity, id)? {
                continue;
            }
            {
                let mut table = txn.open_table(entity.table())?;
                table.remove(id)?;
            }
            match entity {
                Entity::Artist => {
                    unlink(txn, ARTIST_IN_ALBUM_TABLE, ALBUM_CONTAINS_ARTIST_TABLE, id)?;
                    pruned.artists += 1;
                }
                Entity::Album => {
                    unlink(txn, ALBUM_CONTAINS_ARTIST_TABLE, ARTIST_IN_ALBUM_TABLE, id)?;
                    pruned.albums += 1;
                }
                Entity::Genre => pruned.genres += 1,
            }
        }
    }
    Ok(pruned)
}

fn is_referenced(txn: &WriteTransaction, entity: Entity, id: u64) -> Result<bool, StoreError> {
    let index = txn.open_table(entity.file_index())?;
    let mut range = index.range((id, 0)..=(id, u64::MAX))?;
    let found = match range.next() {
        Some(entry) => {
            entry?;
            true
        }
        None => false,
    };
    Ok(found)
}

/// Drops every `(id, other)` pair from `primary` and the mirrored
/// `(other, id)` pair from `mirror`.
fn unlink(
    txn: &WriteTransaction,
    primary: TableDefinition<(u64, u64), ()>,
    mirror: TableDefinition<(u64, u64), ()>,
    id: u64,
) -> Result<(), StoreError> {
    let mut primary = txn.open_table(primary)?;
    let mut others = Vec::new();
    for entry in primary.range((id, 0)..=(id, u64::MAX))? {
        let entry = entry?;
        others.push(entry.0.value().1);
    }
    let mut mirror = txn.open_table(mirror)?;
    for other in others {
        primary.remove((id, other))?;
        mirror.remove((other, id))?;
    }
    Ok(())
}

pub(crate) fn capture_references(rows: &[FileRow]) -> References {
    let mut refs = References::default();
    for row in rows {
        refs.capture(row);
    }
    refs
}

fn create_tag_tables(txn: &WriteTransaction) -> Result<(), StoreError> {
    txn.open_table(FILE_TABLE)?;
    txn.open_table(FILE_BY_PATH_TABLE)?;
    txn.open_table(FILE_BY_ARTIST_TABLE)?;
    txn.open_table(FILE_BY_ALBUM_TABLE)?;
    txn.open_table(FILE_BY_GENRE_TABLE)?;
    txn.open_table(ARTIST_TABLE)?;
    txn.open_table(ALBUM_TABLE)?;
    txn.open_table(GENRE_TABLE)?;
    txn.open_table(ALBUM_CONTAINS_ARTIST_TABLE)?;
    txn.open_table(ARTIST_IN_ALBUM_TABLE)?;
    Ok(())
}

/// Dropping a table that does not exist is nothing to do, not a failure.
pub(crate) fn clear_table<K: RedbKey + 'static, V: RedbValue + 'static>(
    txn: &WriteTransaction,
    table: TableDefinition<K, V>,
) -> Result<(), StoreError> {
    match txn.delete_table(table) {
        Ok(_) => Ok(()),
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn table_len<K: RedbKey + 'static, V: RedbValue + 'static>(
    txn: &ReadTransaction,
    table: TableDefinition<K, V>,
) -> Result<usize, StoreError> {
    match txn.open_table(table) {
        Ok(table) => Ok(table.len()? as usize),
        Err(TableError::TableDoesNotExist(_)) => Ok(0),
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(bincode::serialize(value)?)
}

pub(crate) fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(bincode::deserialize(bytes)?)
}
