use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{AnnotationRecord, AnnotationStore, HiddenMark, NewAnnotation};
use crate::error::PersistenceError;

/// Annotations and hides kept in one JSON document on disk.
///
/// Each call reads the document, applies the change and rewrites it through a
/// temporary file, so concurrent readers never see a partial write.
pub struct FileStore {
    path: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Document {
    next_id: i64,
    annotations: Vec<AnnotationRecord>,
    hidden: Vec<HiddenMark>,
}

impl Document {
    fn take_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Document, PersistenceError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Document::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, doc: &Document) -> Result<(), PersistenceError> {
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(doc)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl AnnotationStore for FileStore {
    fn hide(&self, result_id: i64, reason: &str) -> Result<(), PersistenceError> {
        let mut doc = self.read()?;
        if doc.hidden.iter().any(|h| h.result_id == result_id) {
            return Ok(());
        }
        let id = doc.take_id();
        doc.hidden.push(HiddenMark {
            id: Some(id),
            result_id,
            reason: reason.to_string(),
        });
        self.write(&doc)
    }

    fn add_annotation(&self, annotation: &NewAnnotation) -> Result<(), PersistenceError> {
        if annotation.text.trim().is_empty() {
            return Err(PersistenceError::Rejected("annotation text is empty".to_string()));
        }
        let mut doc = self.read()?;
        let id = doc.take_id();
        doc.annotations.push(AnnotationRecord {
            id: Some(id),
            metric_code: annotation.metric_code.clone(),
            result_id: annotation.result_id,
            text: annotation.text.clone(),
        });
        self.write(&doc)
    }

    fn list_annotations(&self) -> Result<Vec<AnnotationRecord>, PersistenceError> {
        Ok(self.read()?.annotations)
    }

    fn list_hidden(&self) -> Result<Vec<HiddenMark>, PersistenceError> {
        Ok(self.read()?.hidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("store.json"));
        assert!(store.list_annotations().unwrap().is_empty());
        assert!(store.list_hidden().unwrap().is_empty());
    }

    #[test]
    fn writes_survive_a_new_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = FileStore::new(&path);
        store
            .add_annotation(&NewAnnotation {
                metric_code: "c_3a".into(),
                result_id: 11,
                text: "new column".into(),
            })
            .unwrap();
        store.hide(12, "spray died").unwrap();
        store.hide(12, "again").unwrap();

        let reopened = FileStore::new(&path);
        let annotations = reopened.list_annotations().unwrap();
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].result_id, 11);
        assert!(annotations[0].id.is_some());
        let hidden = reopened.list_hidden().unwrap();
        assert_eq!(hidden.len(), 1);
        assert_eq!(hidden[0].reason, "spray died");
    }

    #[test]
    fn blank_annotation_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("store.json"));
        let err = store
            .add_annotation(&NewAnnotation {
                metric_code: "c_3a".into(),
                result_id: 1,
                text: "   ".into(),
            })
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Rejected(_)));
    }
}
