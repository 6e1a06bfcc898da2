//! Save and load operations against the `<data_dir>/collections/<name>.godb`
//! layout and the optional monolithic whole-database file (§4.5).

use crate::codec::Payload;
use crate::collection::{Collection, CollectionInfo, CollectionState};
use crate::core::error::Result;
use crate::core::types::{Document, DocId};
use crate::index::IndexSet;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct PersistenceManager {
    data_dir: PathBuf,
}

impl PersistenceManager {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        PersistenceManager {
            data_dir: data_dir.into(),
        }
    }

    pub fn collections_dir(&self) -> PathBuf {
        self.data_dir.join("collections")
    }

    pub fn collection_path(&self, name: &str) -> PathBuf {
        self.collections_dir().join(format!("{name}.godb"))
    }

    /// Collection names with a file already on disk, discovered by listing
    /// `collections_dir()` rather than tracked separately — this is what lets
    /// a freshly constructed engine rediscover collections a prior process
    /// persisted under `SaveMode::TransactionSave`/`BackgroundSave` without
    /// requiring an explicit `load_metadata` call against a whole-database
    /// file. A missing directory (nothing saved yet) is not an error.
    pub fn list_collections(&self) -> Result<Vec<String>> {
        let dir = self.collections_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("godb") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        Ok(names)
    }

    /// Encodes and writes one collection's documents and indexed-field list.
    /// Returns the encoded size in bytes, recorded as the collection's
    /// size-on-disk.
    pub fn save_collection(
        &self,
        name: &str,
        documents: &HashMap<DocId, Document>,
        indexed_fields: &[String],
    ) -> Result<u64> {
        let mut payload = Payload::new();
        payload.collections.insert(name.to_string(), documents.clone());
        payload
            .indexes
            .insert(name.to_string(), indexed_fields.to_vec());
        let bytes = payload.encode()?;

        std::fs::create_dir_all(self.collections_dir())?;
        std::fs::write(self.collection_path(name), &bytes)?;
        Ok(bytes.len() as u64)
    }

    /// Encodes every passed-in collection into a single monolithic file.
    pub fn save_whole_db(
        &self,
        path: &Path,
        collections: &HashMap<String, (HashMap<DocId, Document>, Vec<String>)>,
    ) -> Result<()> {
        let mut payload = Payload::new();
        for (name, (documents, fields)) in collections {
            payload.collections.insert(name.clone(), documents.clone());
            payload.indexes.insert(name.clone(), fields.clone());
        }
        let bytes = payload.encode()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Reads the monolithic file's header and payload, populating one
    /// `CollectionInfo` per collection found, all `Unloaded`. A missing file
    /// is not an error — it simply yields no collections.
    pub fn load_metadata(&self, path: &Path) -> Result<Vec<CollectionInfo>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = std::fs::read(path)?;
        let payload = Payload::decode(&bytes)?;

        Ok(payload
            .collections
            .into_iter()
            .map(|(name, docs)| {
                let mut info = CollectionInfo::new(name);
                info.document_count = docs.len();
                info.state = CollectionState::Unloaded;
                info
            })
            .collect())
    }

    /// Loads `name` from its per-collection file, rebuilding every indexed
    /// field's inverted map from the loaded documents (§9: only field names
    /// are persisted, not the value maps). Returns `None` if no file exists
    /// for this collection yet.
    pub fn load_collection(&self, name: &str) -> Result<Option<(Collection, IndexSet, u64)>> {
        let path = self.collection_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        let size_bytes = bytes.len() as u64;
        let payload = Payload::decode(&bytes)?;

        let documents = payload.collections.get(name).cloned().unwrap_or_default();
        let fields = payload.indexes.get(name).cloned().unwrap_or_default();

        let mut collection = Collection::new();
        collection.documents = documents;

        let mut indexes = IndexSet::with_id_index();
        for field in fields {
            indexes.build(&field, &collection.documents);
        }

        Ok(Some((collection, indexes, size_bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{set_doc_id, Value, ID_FIELD};

    fn sample_docs() -> HashMap<DocId, Document> {
        let mut docs = HashMap::new();
        let mut a = Document::new();
        set_doc_id(&mut a, DocId::new(1));
        a.insert("name".into(), Value::String("Alice".into()));
        docs.insert(DocId::new(1), a);
        docs
    }

    #[test]
    fn save_then_load_collection_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistenceManager::new(dir.path());
        let docs = sample_docs();

        manager
            .save_collection("users", &docs, &[ID_FIELD.to_string(), "name".to_string()])
            .unwrap();

        let (collection, indexes, size) = manager.load_collection("users").unwrap().unwrap();
        assert!(size > 0);
        assert_eq!(collection.documents.len(), 1);
        assert!(indexes.has_index("name"));
        assert!(indexes.query("name", &Value::String("alice".into())).contains(1));
    }

    #[test]
    fn list_collections_is_empty_when_nothing_saved() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistenceManager::new(dir.path());
        assert!(manager.list_collections().unwrap().is_empty());
    }

    #[test]
    fn list_collections_finds_saved_files() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistenceManager::new(dir.path());
        manager.save_collection("users", &sample_docs(), &[]).unwrap();
        manager.save_collection("orders", &sample_docs(), &[]).unwrap();

        let mut names = manager.list_collections().unwrap();
        names.sort();
        assert_eq!(names, vec!["orders".to_string(), "users".to_string()]);
    }

    #[test]
    fn load_collection_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistenceManager::new(dir.path());
        assert!(manager.load_collection("nope").unwrap().is_none());
    }

    #[test]
    fn load_metadata_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistenceManager::new(dir.path());
        let missing = dir.path().join("db.godb");
        assert!(manager.load_metadata(&missing).unwrap().is_empty());
    }

    #[test]
    fn save_whole_db_then_load_metadata_reports_document_counts() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistenceManager::new(dir.path());
        let mut collections = HashMap::new();
        collections.insert("users".to_string(), (sample_docs(), vec![ID_FIELD.to_string()]));

        let db_path = dir.path().join("whole.godb");
        manager.save_whole_db(&db_path, &collections).unwrap();

        let infos = manager.load_metadata(&db_path).unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].name, "users");
        assert_eq!(infos[0].document_count, 1);
        assert_eq!(infos[0].state, CollectionState::Unloaded);
    }
}
