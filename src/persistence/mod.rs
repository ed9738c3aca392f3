//! Persistence boundary for hides and annotations.
//!
//! ```text
//!   Session ── AnnotationStore ──┬── HttpStore  (QC web service)
//!                                └── FileStore  (local JSON document)
//! ```

pub mod file;
pub mod http;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::{PersistenceConfig, DEFAULT_STORE_FILE};
use crate::error::PersistenceError;

pub use file::FileStore;
pub use http::HttpStore;

// ---------------------------------------------------------------------------
// Wire records
// ---------------------------------------------------------------------------

/// A free-text note attached to one result for one metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationRecord {
    /// Server id; `None` until the record has been listed back.
    #[serde(default)]
    pub id: Option<i64>,
    pub metric_code: String,
    #[serde(alias = "quameterResultId")]
    pub result_id: i64,
    pub text: String,
}

/// Why a result was hidden.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HiddenMark {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(alias = "quameterResultId")]
    pub result_id: i64,
    #[serde(alias = "text")]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAnnotation {
    pub metric_code: String,
    pub result_id: i64,
    pub text: String,
}

// ---------------------------------------------------------------------------
// AnnotationStore
// ---------------------------------------------------------------------------

/// Request/response access to stored hides and annotations.
pub trait AnnotationStore {
    fn hide(&self, result_id: i64, reason: &str) -> Result<(), PersistenceError>;

    fn add_annotation(&self, annotation: &NewAnnotation) -> Result<(), PersistenceError>;

    fn list_annotations(&self) -> Result<Vec<AnnotationRecord>, PersistenceError>;

    fn list_hidden(&self) -> Result<Vec<HiddenMark>, PersistenceError>;
}

/// Build the store the configuration asks for.
pub fn open_store(config: &PersistenceConfig) -> Result<Box<dyn AnnotationStore + Send>, PersistenceError> {
    if let Some(url) = &config.base_url {
        log::info!("Storing annotations through {url}");
        let mut store = HttpStore::new(url)?;
        if let Some(path) = &config.hidden_list_path {
            store = store.with_hidden_path(path);
        }
        return Ok(Box::new(store));
    }
    let path = config
        .file
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_FILE));
    log::info!("Storing annotations in {}", path.display());
    Ok(Box::new(FileStore::new(path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_annotation_json_is_accepted() {
        let json = r#"{"id": 3, "metricCode": "c_2b", "quameterResultId": 42, "text": "column swap"}"#;
        let record: AnnotationRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, Some(3));
        assert_eq!(record.result_id, 42);
        assert_eq!(record.metric_code, "c_2b");
    }

    #[test]
    fn hidden_mark_reads_text_as_reason() {
        let json = r#"{"id": 9, "quameterResultId": 42, "text": "bad run"}"#;
        let mark: HiddenMark = serde_json::from_str(json).unwrap();
        assert_eq!(mark.reason, "bad run");
    }
}
