use std::collections::{HashMap, HashSet};

use redb::{ReadableTable, WriteTransaction};

use crate::store::{
    decode_value, encode_value, next_id, set_counter, Entity, StoreError,
    ALBUM_CONTAINS_ARTIST_TABLE, ARTIST_IN_ALBUM_TABLE,
};

/// Maps names to ids for one entity kind over the course of a batch.
///
/// Lookups go committed rows first, then names staged earlier in the same
/// batch, and only then mint a new id, so a name seen twice resolves to one row.
pub(crate) struct NameResolver {
    entity: Entity,
    committed: HashMap<Option<String>, u64>,
    staged: HashMap<Option<String>, u64>,
    new_rows: Vec<(u64, Option<String>)>,
    next_id: u64,
}

impl NameResolver {
    pub(crate) fn load(txn: &WriteTransaction, entity: Entity) -> Result<Self, StoreError> {
        let mut committed = HashMap::new();
        {
            let table = txn.open_table(entity.table())?;
            for entry in table.iter()? {
                let entry = entry?;
                let name: Option<String> = decode_value(entry.1.value())?;
                committed.entry(name).or_insert(entry.0.value());
            }
        }
        let next_id = next_id(txn, entity.table(), entity.counter_key())?;
        Ok(Self {
            entity,
            committed,
            staged: HashMap::new(),
            new_rows: Vec::new(),
            next_id,
        })
    }

    pub(crate) fn resolve(&mut self, name: &Option<String>) -> u64 {
        if let Some(id) = self.committed.get(name) {
            return *id;
        }
        if let Some(id) = self.staged.get(name) {
            return *id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.staged.insert(name.clone(), id);
        self.new_rows.push((id, name.clone()));
        id
    }

    pub(crate) fn flush(self, txn: &WriteTransaction) -> Result<(), StoreError> {
        {
            let mut table = txn.open_table(self.entity.table())?;
            for (id, name) in &self.new_rows {
                let bytes = encode_value(name)?;
                table.insert(*id, bytes.as_slice())?;
            }
        }
        set_counter(txn, self.entity.counter_key(), self.next_id)
    }
}

/// Album/artist links seen during a batch.
pub(crate) struct AlbumArtists {
    known: HashSet<(u64, u64)>,
    staged: Vec<(u64, u64)>,
}

impl AlbumArtists {
    pub(crate) fn load(txn: &WriteTransaction) -> Result<Self, StoreError> {
        let mut known = HashSet::new();
        let table = txn.open_table(ALBUM_CONTAINS_ARTIST_TABLE)?;
        for entry in table.iter()? {
            let entry = entry?;
            known.insert(entry.0.value());
        }
        Ok(Self {
            known,
            staged: Vec::new(),
        })
    }

    pub(crate) fn link(&mut self, album_id: u64, artist_id: u64) {
        if self.known.insert((album_id, artist_id)) {
            self.staged.push((album_id, artist_id));
        }
    }

    pub(crate) fn flush(self, txn: &WriteTransaction) -> Result<(), StoreError> {
        let mut links = txn.open_table(ALBUM_CONTAINS_ARTIST_TABLE)?;
        let mut mirror = txn.open_table(ARTIST_IN_ALBUM_TABLE)?;
        for (album_id, artist_id) in self.staged {
            links.insert((album_id, artist_id), ())?;
            mirror.insert((artist_id, album_id), ())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn same_name_resolves_once_per_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("lib.redb")).unwrap();

        let txn = store.begin_write().unwrap();
        let mut artists = NameResolver::load(&txn, Entity::Artist).unwrap();
        let x = artists.resolve(&Some("X".to_string()));
        let y = artists.resolve(&Some("Y".to_string()));
        let nobody = artists.resolve(&None);
        assert_eq!(artists.resolve(&Some("X".to_string())), x);
        assert_eq!(artists.resolve(&None), nobody);
        assert_ne!(x, y);
        assert_eq!(artists.new_rows.len(), 3);
        artists.flush(&txn).unwrap();
        txn.commit().unwrap();

        let txn = store.begin_write().unwrap();
        let mut artists = NameResolver::load(&txn, Entity::Artist).unwrap();
        assert_eq!(artists.resolve(&Some("X".to_string())), x);
        assert_eq!(artists.new_rows.len(), 0);
        let z = artists.resolve(&Some("Z".to_string()));
        assert!(z > nobody.max(x).max(y));
    }

    #[test]
    fn links_are_staged_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("lib.redb")).unwrap();

        let txn = store.begin_write().unwrap();
        let mut links = AlbumArtists::load(&txn).unwrap();
        links.link(1, 1);
        links.link(1, 1);
        links.link(1, 2);
        links.flush(&txn).unwrap();
        txn.commit().unwrap();

        assert_eq!(store.album_artists().unwrap(), vec![(1, 1), (1, 2)]);

        let txn = store.begin_write().unwrap();
        let mut links = AlbumArtists::load(&txn).unwrap();
        links.link(1, 2);
        assert!(links.staged.is_empty());
    }
}
