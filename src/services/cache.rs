use sled::Db;
use std::path::Path;

/// Raw image bytes keyed by document id, kept on disk between runs so that
/// re-processing a collection does not download every scan again.
#[derive(Clone)]
pub struct ImageCache {
    db: Db,
}

impl ImageCache {
    pub fn open(path: &Path) -> Result<Self, sled::Error> {
        let db = sled::open(path)?;
        log::debug!("Image cache opened at {}", path.display());
        Ok(Self { db })
    }

    pub fn get(&self, doc_id: &str) -> Result<Option<Vec<u8>>, sled::Error> {
        Ok(self.db.get(doc_id)?.map(|v| v.to_vec()))
    }

    pub fn insert(&self, doc_id: &str, bytes: &[u8]) -> Result<(), sled::Error> {
        self.db.insert(doc_id, bytes)?;
        Ok(())
    }

    pub fn remove(&self, doc_id: &str) -> Result<(), sled::Error> {
        self.db.remove(doc_id)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}
