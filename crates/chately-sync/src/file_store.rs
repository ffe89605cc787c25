use crate::{
    CancelHandle, DocumentCallback, DocumentPath, DocumentSnapshot, DocumentStore, InMemoryStore,
    StoreError, StoreResult, WriteBatch,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// [`InMemoryStore`] backed by one JSON file per document under
/// `<base>/<collection>/<id>.json`.
///
/// Every commit is applied in memory first and then written out. If writing
/// fails the commit reports [`StoreError::Unavailable`] while the in-memory
/// state keeps the change.
pub struct FileStore {
    base_path: PathBuf,
    memory: InMemoryStore,
    written: Mutex<HashMap<DocumentPath, u64>>,
}

impl FileStore {
    pub fn open(base_path: impl Into<PathBuf>) -> StoreResult<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).map_err(|e| io_error("create directory", &base_path, e))?;

        let memory = InMemoryStore::new();
        let mut written = HashMap::new();
        for (path, data) in load_documents(&base_path)? {
            memory.seed(path.clone(), data);
            written.insert(path, 1);
        }
        tracing::debug!(path = %base_path.display(), documents = written.len(), "file store opened");

        Ok(Self {
            base_path,
            memory,
            written: Mutex::new(written),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn paths(&self) -> Vec<DocumentPath> {
        self.memory.paths()
    }

    fn document_file(&self, path: &DocumentPath) -> PathBuf {
        self.base_path
            .join(sanitize(path.collection()))
            .join(format!("{}.json", sanitize(path.id())))
    }

    fn persist(&self, paths: &[DocumentPath]) -> StoreResult<()> {
        let mut written = self.written.lock();
        for path in paths {
            let snapshot = self.memory.get_document(path)?;
            let Some(data) = snapshot.data else {
                continue;
            };
            if written.get(path).is_some_and(|&version| version >= snapshot.version) {
                continue;
            }

            let file = self.document_file(path);
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent).map_err(|e| io_error("create directory", parent, e))?;
            }
            let contents = serde_json::to_string_pretty(&data)
                .map_err(|e| StoreError::Malformed(format!("{}: {}", path, e)))?;
            fs::write(&file, contents).map_err(|e| io_error("write", &file, e))?;
            written.insert(path.clone(), snapshot.version);
        }
        Ok(())
    }
}

impl DocumentStore for FileStore {
    fn get_document(&self, path: &DocumentPath) -> StoreResult<DocumentSnapshot> {
        self.memory.get_document(path)
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut touched: Vec<DocumentPath> = Vec::new();
        for op in batch.ops() {
            if !touched.contains(op.path()) {
                touched.push(op.path().clone());
            }
        }
        self.memory.commit(batch)?;
        self.persist(&touched)
    }

    fn subscribe_document(
        &self,
        path: &DocumentPath,
        callback: DocumentCallback,
    ) -> StoreResult<CancelHandle> {
        self.memory.subscribe_document(path, callback)
    }
}

fn sanitize(segment: &str) -> String {
    segment.replace(['/', '\\', ':'], "_")
}

fn io_error(action: &str, path: &Path, error: std::io::Error) -> StoreError {
    StoreError::Unavailable(format!("failed to {} {}: {}", action, path.display(), error))
}

fn load_documents(base_path: &Path) -> StoreResult<Vec<(DocumentPath, serde_json::Value)>> {
    let mut documents = Vec::new();
    let collections =
        fs::read_dir(base_path).map_err(|e| io_error("read directory", base_path, e))?;

    for collection in collections {
        let collection = collection.map_err(|e| io_error("read directory", base_path, e))?;
        if !collection.path().is_dir() {
            continue;
        }
        let collection_name = collection.file_name().to_string_lossy().to_string();
        let files = fs::read_dir(collection.path())
            .map_err(|e| io_error("read directory", &collection.path(), e))?;

        for file in files {
            let file = file.map_err(|e| io_error("read directory", &collection.path(), e))?;
            let file_name = file.file_name().to_string_lossy().to_string();
            let Some(id) = file_name.strip_suffix(".json") else {
                continue;
            };
            let Ok(path) = DocumentPath::new(collection_name.as_str(), id) else {
                tracing::warn!(file = %file.path().display(), "skipping file with invalid document path");
                continue;
            };
            let contents =
                fs::read_to_string(file.path()).map_err(|e| io_error("read", &file.path(), e))?;
            let Ok(data) = serde_json::from_str::<serde_json::Value>(&contents) else {
                tracing::warn!(file = %file.path().display(), "skipping unreadable document");
                continue;
            };
            documents.push((path, data));
        }
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldUpdates;
    use serde_json::json;
    use tempfile::TempDir;

    fn chat() -> DocumentPath {
        DocumentPath::new("chats", "bob+alice").unwrap()
    }

    #[test]
    fn documents_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.set_document(&chat(), json!({ "messages": [] }), false).unwrap();
            store
                .update_fields(&chat(), FieldUpdates::new().array_union("messages", vec![json!(1)]))
                .unwrap();
        }

        let reopened = FileStore::open(dir.path()).unwrap();
        let snapshot = reopened.get_document(&chat()).unwrap();
        assert_eq!(snapshot.data, Some(json!({ "messages": [1] })));
        assert!(dir.path().join("chats").join("bob+alice.json").exists());
    }

    #[test]
    fn unreadable_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("users")).unwrap();
        fs::write(dir.path().join("users").join("alice.json"), "{ not json").unwrap();
        fs::write(dir.path().join("users").join("notes.txt"), "ignored").unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.paths().is_empty());
    }

    #[test]
    fn subscribers_see_file_backed_writes() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _handle = store
            .subscribe_document(
                &chat(),
                Box::new(move |snapshot: DocumentSnapshot| sink.lock().push(snapshot.exists())),
            )
            .unwrap();

        store.set_document(&chat(), json!({}), false).unwrap();
        assert_eq!(*seen.lock(), vec![false, true]);
    }
}
