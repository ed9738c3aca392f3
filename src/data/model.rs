use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::EngineError;

pub const COL_ID: &str = "id";
pub const COL_START_TIME: &str = "startTime";
pub const COL_PATH: &str = "path";
pub const COL_INSTRUMENT: &str = "instrument";
pub const COL_CATEGORY: &str = "category";
pub const COL_TRANSACTION: &str = "transaction";

/// Fixed columns, in column-index order. Metric columns follow them.
pub const FIXED_COLUMNS: [&str; 6] = [
    COL_ID,
    COL_START_TIME,
    COL_PATH,
    COL_INSTRUMENT,
    COL_CATEGORY,
    COL_TRANSACTION,
];

// ---------------------------------------------------------------------------
// CellValue – a single cell, borrowed from the dataset
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellValue<'a> {
    Integer(i64),
    Number(f64),
    Text(&'a str),
    /// Milliseconds since the Unix epoch, UTC.
    Time(i64),
    Null,
}

impl CellValue<'_> {
    /// Numeric view of the cell; non-finite numbers count as missing.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Number(v) if v.is_finite() => Some(*v),
            CellValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Integer(i) | CellValue::Time(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Integer(i) => write!(f, "{i}"),
            CellValue::Number(v) => write!(f, "{v}"),
            CellValue::Text(s) => write!(f, "{s}"),
            CellValue::Time(ms) => match DateTime::<Utc>::from_timestamp_millis(*ms) {
                Some(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S")),
                None => write!(f, "{ms}"),
            },
            CellValue::Null => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// DatasetProvider – read-only tabular access used by the engine
// ---------------------------------------------------------------------------

pub trait DatasetProvider {
    fn row_count(&self) -> usize;

    /// Fails with [`EngineError::ColumnNotFound`] for unknown names.
    fn column_index(&self, name: &str) -> Result<usize, EngineError>;

    fn value(&self, row: usize, column: usize) -> CellValue<'_>;
}

// ---------------------------------------------------------------------------
// Row – one measurement event
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: i64,
    /// Acquisition start, milliseconds since the Unix epoch (UTC).
    pub start_time: i64,
    pub path: String,
    pub instrument: String,
    pub category: String,
    pub transaction: Option<i64>,
    /// One value per metric column of the owning dataset.
    pub values: Vec<Option<f64>>,
}

// ---------------------------------------------------------------------------
// QcDataset – the complete loaded table
// ---------------------------------------------------------------------------

/// The loaded table with pre-computed facet indices. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct QcDataset {
    rows: Vec<Row>,
    /// Metric codes of the numeric columns, in column order.
    metric_columns: Vec<String>,
    /// Instruments in first-seen order.
    instruments: Vec<String>,
    instrument_counts: BTreeMap<String, usize>,
    category_counts: BTreeMap<String, usize>,
    id_index: HashMap<i64, usize>,
}

impl QcDataset {
    /// Build facet indices from the loaded rows.
    pub fn from_rows(metric_columns: Vec<String>, rows: Vec<Row>) -> Self {
        let mut instruments = Vec::new();
        let mut instrument_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut category_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut id_index = HashMap::with_capacity(rows.len());

        for (i, row) in rows.iter().enumerate() {
            let count = instrument_counts.entry(row.instrument.clone()).or_default();
            if *count == 0 {
                instruments.push(row.instrument.clone());
            }
            *count += 1;
            *category_counts.entry(row.category.clone()).or_default() += 1;
            if id_index.insert(row.id, i).is_some() {
                log::warn!("duplicate row id {} – keeping the later row", row.id);
            }
        }

        QcDataset {
            rows,
            metric_columns,
            instruments,
            instrument_counts,
            category_counts,
            id_index,
        }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    /// Dataset row index of the row with this id.
    pub fn index_of_id(&self, id: i64) -> Option<usize> {
        self.id_index.get(&id).copied()
    }

    pub fn metric_columns(&self) -> &[String] {
        &self.metric_columns
    }

    /// Instruments in the order they first appear in the table.
    pub fn instruments(&self) -> &[String] {
        &self.instruments
    }

    pub fn instrument_counts(&self) -> &BTreeMap<String, usize> {
        &self.instrument_counts
    }

    /// Categories (sorted) with their row counts.
    pub fn category_counts(&self) -> &BTreeMap<String, usize> {
        &self.category_counts
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl DatasetProvider for QcDataset {
    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn column_index(&self, name: &str) -> Result<usize, EngineError> {
        if let Some(i) = FIXED_COLUMNS.iter().position(|c| *c == name) {
            return Ok(i);
        }
        self.metric_columns
            .iter()
            .position(|c| c == name)
            .map(|i| i + FIXED_COLUMNS.len())
            .ok_or_else(|| EngineError::ColumnNotFound(name.to_string()))
    }

    fn value(&self, row: usize, column: usize) -> CellValue<'_> {
        let Some(r) = self.rows.get(row) else {
            return CellValue::Null;
        };
        match column {
            0 => CellValue::Integer(r.id),
            1 => CellValue::Time(r.start_time),
            2 => CellValue::Text(&r.path),
            3 => CellValue::Text(&r.instrument),
            4 => CellValue::Text(&r.category),
            5 => r.transaction.map_or(CellValue::Null, CellValue::Integer),
            n => match r.values.get(n - FIXED_COLUMNS.len()) {
                Some(Some(v)) => CellValue::Number(*v),
                _ => CellValue::Null,
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Build a row with the given metric values; path and transaction derive from the id.
    pub fn row(id: i64, t: i64, instrument: &str, category: &str, values: &[Option<f64>]) -> Row {
        Row {
            id,
            start_time: t,
            path: format!("/data/qc/{instrument}/run_{id}_a.RAW"),
            instrument: instrument.to_string(),
            category: category.to_string(),
            transaction: Some(1000 + id),
            values: values.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::row;
    use super::*;

    fn dataset() -> QcDataset {
        QcDataset::from_rows(
            vec!["c_2b".into(), "id_1".into()],
            vec![
                row(7, 1_000, "QE1", "yeast", &[Some(1.5), Some(0.0)]),
                row(8, 2_000, "Orbi", "yeast", &[None, Some(3.0)]),
                row(9, 3_000, "QE1", "bsa", &[Some(2.5), None]),
            ],
        )
    }

    #[test]
    fn instruments_keep_first_seen_order() {
        let ds = dataset();
        assert_eq!(ds.instruments(), ["QE1".to_string(), "Orbi".to_string()]);
        assert_eq!(ds.instrument_counts()["QE1"], 2);
        assert_eq!(ds.category_counts().keys().collect::<Vec<_>>(), ["bsa", "yeast"]);
    }

    #[test]
    fn provider_resolves_fixed_and_metric_columns() {
        let ds = dataset();
        let id = ds.column_index(COL_ID).unwrap();
        let metric = ds.column_index("id_1").unwrap();
        assert_eq!(ds.value(1, id), CellValue::Integer(8));
        assert_eq!(ds.value(1, metric).as_f64(), Some(3.0));
        assert_eq!(ds.value(2, metric), CellValue::Null);
        assert_eq!(
            ds.column_index("nope"),
            Err(EngineError::ColumnNotFound("nope".into()))
        );
    }

    #[test]
    fn id_index_maps_back_to_rows() {
        let ds = dataset();
        assert_eq!(ds.index_of_id(9), Some(2));
        assert_eq!(ds.index_of_id(42), None);
    }
}
