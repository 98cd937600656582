use std::path::Path;

use common::{covers, normalize_path};
use redb::{ReadableTable, TableError};
use tracing::info;

use crate::store::{
    clear_table, next_id, set_counter, Store, StoreError, LIBRARY_ROOTS_TABLE, META_TABLE,
    NEXT_ROOT_ID_KEY,
};

/// Outcome of registering a directory as a library root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RootAdd {
    /// An existing root already covers the path.
    Rejected,
    Added,
    /// The path was added and the listed roots beneath it were dropped.
    AddedAndSubsumed(Vec<String>),
}

/// The set of scanned directories. No root is equal to or beneath another.
pub struct LibraryRoots<'a> {
    store: &'a Store,
}

impl Store {
    pub fn roots(&self) -> LibraryRoots<'_> {
        LibraryRoots { store: self }
    }

    pub fn reset_roots(&self) -> Result<(), StoreError> {
        let txn = self.begin_write()?;
        clear_table(&txn, LIBRARY_ROOTS_TABLE)?;
        {
            let mut meta = txn.open_table(META_TABLE)?;
            meta.remove(NEXT_ROOT_ID_KEY)?;
        }
        txn.open_table(LIBRARY_ROOTS_TABLE)?;
        txn.commit()?;
        info!("Library roots reset");
        Ok(())
    }
}

impl<'a> LibraryRoots<'a> {
    /// Roots in the order they were added.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries()?.into_iter().map(|(_, path)| path).collect())
    }

    pub fn is_covered(&self, path: &Path) -> Result<bool, StoreError> {
        let path = normalize_path(path);
        Ok(self.list()?.iter().any(|root| covers(root, &path)))
    }

    pub fn is_root(&self, path: &Path) -> Result<bool, StoreError> {
        let path = normalize_path(path);
        Ok(self.list()?.iter().any(|root| *root == path))
    }

    pub fn add(&self, path: &Path) -> Result<RootAdd, StoreError> {
        let path = normalize_path(path);
        let entries = self.entries()?;
        if entries.iter().any(|(_, root)| covers(root, &path)) {
            return Ok(RootAdd::Rejected);
        }

        let subsumed: Vec<(u64, String)> = entries
            .into_iter()
            .filter(|(_, root)| covers(&path, root))
            .collect();

        let txn = self.store.begin_write()?;
        let id = next_id(&txn, LIBRARY_ROOTS_TABLE, NEXT_ROOT_ID_KEY)?;
        {
            let mut table = txn.open_table(LIBRARY_ROOTS_TABLE)?;
            for (old_id, _) in &subsumed {
                table.remove(*old_id)?;
            }
            table.insert(id, path.as_str())?;
        }
        set_counter(&txn, NEXT_ROOT_ID_KEY, id + 1)?;
        txn.commit()?;

        if subsumed.is_empty() {
            info!("Added library root {}", path);
            Ok(RootAdd::Added)
        } else {
            let removed: Vec<String> = subsumed.into_iter().map(|(_, root)| root).collect();
            info!("Added library root {} replacing {:?}", path, removed);
            Ok(RootAdd::AddedAndSubsumed(removed))
        }
    }

    /// Exact match only: removing a directory that merely lies under a root
    /// changes nothing. Returns whether a root was removed.
    pub fn remove(&self, path: &Path) -> Result<bool, StoreError> {
        let path = normalize_path(path);
        let doomed: Vec<u64> = self
            .entries()?
            .into_iter()
            .filter(|(_, root)| *root == path)
            .map(|(id, _)| id)
            .collect();
        if doomed.is_empty() {
            return Ok(false);
        }

        let txn = self.store.begin_write()?;
        {
            let mut table = txn.open_table(LIBRARY_ROOTS_TABLE)?;
            for id in &doomed {
                table.remove(*id)?;
            }
        }
        txn.commit()?;
        info!("Removed library root {}", path);
        Ok(true)
    }

    pub fn reset(&self) -> Result<(), StoreError> {
        self.store.reset_roots()
    }

    fn entries(&self) -> Result<Vec<(u64, String)>, StoreError> {
        let read_txn = self.store.begin_read()?;
        let table = match read_txn.open_table(LIBRARY_ROOTS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut entries = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            entries.push((entry.0.value(), entry.1.value().to_string()));
        }
        Ok(entries)
    }
}
