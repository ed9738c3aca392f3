use crate::data::model::{DatasetProvider, COL_INSTRUMENT, COL_START_TIME};
use crate::error::EngineError;
use crate::metrics::{MetricCatalog, MetricDefinition};

/// Label of the leading time column.
pub const TIME_COLUMN_LABEL: &str = "Date";

// ---------------------------------------------------------------------------
// ColumnRule – how one virtual per-instrument column reads the table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRule {
    /// The raw metric value of rows run on `instrument`.
    Direct { instrument: String, metric_column: usize },
    /// Like `Direct`, but a raw zero means "no match" and reads as null.
    ZeroAsNull { instrument: String, metric_column: usize },
}

impl ColumnRule {
    pub fn for_metric(metric: &MetricDefinition, instrument: &str, metric_column: usize) -> Self {
        let instrument = instrument.to_string();
        if metric.is_identification_count() {
            ColumnRule::ZeroAsNull { instrument, metric_column }
        } else {
            ColumnRule::Direct { instrument, metric_column }
        }
    }

    pub fn instrument(&self) -> &str {
        match self {
            ColumnRule::Direct { instrument, .. } | ColumnRule::ZeroAsNull { instrument, .. } => instrument,
        }
    }
}

/// Value of `rule`'s column at dataset row `row`.
pub fn evaluate<D: DatasetProvider + ?Sized>(
    rule: &ColumnRule,
    dataset: &D,
    instrument_column: usize,
    row: usize,
) -> Option<f64> {
    if dataset.value(row, instrument_column).as_str() != Some(rule.instrument()) {
        return None;
    }
    match rule {
        ColumnRule::Direct { metric_column, .. } => dataset.value(row, *metric_column).as_f64(),
        ColumnRule::ZeroAsNull { metric_column, .. } => dataset
            .value(row, *metric_column)
            .as_f64()
            .filter(|v| *v != 0.0),
    }
}

// ---------------------------------------------------------------------------
// Projection – time column + one column per active instrument
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedRow {
    /// Index into the dataset.
    pub row: usize,
    pub timestamp: i64,
    /// One entry per series; at most one is `Some`.
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Projection {
    pub metric_code: String,
    /// Series labels, i.e. columns 1.. of the projection.
    pub instruments: Vec<String>,
    /// Eligible rows in dataset order.
    pub rows: Vec<ProjectedRow>,
}

impl Projection {
    /// A projection with its series declared but no rows.
    pub fn empty(metric_code: &str, instruments: &[String]) -> Self {
        Self {
            metric_code: metric_code.to_string(),
            instruments: instruments.to_vec(),
            rows: Vec::new(),
        }
    }

    /// Column labels: the time column followed by every series.
    pub fn columns(&self) -> Vec<String> {
        std::iter::once(TIME_COLUMN_LABEL.to_string())
            .chain(self.instruments.iter().cloned())
            .collect()
    }

    /// Position of dataset row `row` within this projection.
    pub fn position_of(&self, row: usize) -> Option<usize> {
        self.rows.binary_search_by_key(&row, |r| r.row).ok()
    }

    /// Non-null values of series `series`.
    pub fn series_values(&self, series: usize) -> Vec<f64> {
        self.rows
            .iter()
            .filter_map(|r| r.values.get(series).copied().flatten())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Pivot `metric_code` by instrument over the eligible rows.
///
/// `instruments` must already be in first-seen dataset order; the projection
/// keeps that order so series colours and legend entries stay stable.
pub fn project<D: DatasetProvider + ?Sized>(
    catalog: &MetricCatalog,
    metric_code: &str,
    dataset: &D,
    instruments: &[String],
    eligible_rows: &[usize],
) -> Result<Projection, EngineError> {
    let metric = catalog.get(metric_code)?;
    let metric_column = dataset.column_index(metric.code)?;
    let time_column = dataset.column_index(COL_START_TIME)?;
    let instrument_column = dataset.column_index(COL_INSTRUMENT)?;

    let rules: Vec<ColumnRule> = instruments
        .iter()
        .map(|i| ColumnRule::for_metric(metric, i, metric_column))
        .collect();

    let rows = eligible_rows
        .iter()
        .filter_map(|&row| {
            let timestamp = dataset.value(row, time_column).as_i64()?;
            let values = rules
                .iter()
                .map(|rule| evaluate(rule, dataset, instrument_column, row))
                .collect();
            Some(ProjectedRow { row, timestamp, values })
        })
        .collect();

    Ok(Projection {
        metric_code: metric.code.to_string(),
        instruments: instruments.to_vec(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::fixtures::row;
    use crate::data::model::QcDataset;

    fn dataset() -> QcDataset {
        QcDataset::from_rows(
            vec!["p_1".into(), "id_1".into()],
            vec![
                row(1, 100, "Orbi", "yeast", &[Some(10.0), Some(0.0)]),
                row(2, 200, "QE1", "yeast", &[Some(20.0), Some(5.0)]),
                row(3, 300, "Orbi", "yeast", &[None, Some(7.0)]),
                row(4, 400, "QE1", "yeast", &[Some(0.0), Some(0.0)]),
            ],
        )
    }

    fn all_rows(ds: &QcDataset) -> Vec<usize> {
        (0..ds.len()).collect()
    }

    #[test]
    fn single_instrument_pivot_is_partition_exact() {
        let ds = dataset();
        let catalog = MetricCatalog::builtin();
        let p = project(&catalog, "p_1", &ds, &["Orbi".to_string()], &all_rows(&ds)).unwrap();
        assert_eq!(p.columns(), vec!["Date", "Orbi"]);
        let col: Vec<Option<f64>> = p.rows.iter().map(|r| r.values[0]).collect();
        assert_eq!(col, vec![Some(10.0), None, None, None]);
    }

    #[test]
    fn each_value_lands_in_exactly_one_column() {
        let ds = dataset();
        let catalog = MetricCatalog::builtin();
        let instruments = ds.instruments().to_vec();
        let p = project(&catalog, "p_1", &ds, &instruments, &all_rows(&ds)).unwrap();
        for r in &p.rows {
            assert!(r.values.iter().filter(|v| v.is_some()).count() <= 1);
        }
        // A genuine zero survives for ordinary metrics.
        assert_eq!(p.rows[3].values, vec![None, Some(0.0)]);
    }

    #[test]
    fn identification_counts_treat_zero_as_null() {
        let ds = dataset();
        let catalog = MetricCatalog::builtin();
        let instruments = ds.instruments().to_vec();
        let p = project(&catalog, "id_1", &ds, &instruments, &all_rows(&ds)).unwrap();
        let values: Vec<Vec<Option<f64>>> = p.rows.iter().map(|r| r.values.clone()).collect();
        assert_eq!(
            values,
            vec![
                vec![None, None],
                vec![None, Some(5.0)],
                vec![Some(7.0), None],
                vec![None, None],
            ]
        );
    }

    #[test]
    fn unknown_metric_is_rejected() {
        let ds = dataset();
        let catalog = MetricCatalog::builtin();
        let err = project(&catalog, "bogus", &ds, &[], &all_rows(&ds)).unwrap_err();
        assert_eq!(err, EngineError::MetricNotFound("bogus".into()));
    }

    #[test]
    fn catalog_metric_missing_from_table_is_column_not_found() {
        let ds = dataset();
        let catalog = MetricCatalog::builtin();
        let err = project(&catalog, "c_2b", &ds, &[], &all_rows(&ds)).unwrap_err();
        assert_eq!(err, EngineError::ColumnNotFound("c_2b".into()));
    }

    #[test]
    fn only_eligible_rows_are_projected() {
        let ds = dataset();
        let catalog = MetricCatalog::builtin();
        let p = project(&catalog, "p_1", &ds, &["QE1".to_string()], &[1, 3]).unwrap();
        assert_eq!(p.rows.len(), 2);
        assert_eq!(p.position_of(3), Some(1));
        assert_eq!(p.position_of(0), None);
        assert_eq!(p.series_values(0), vec![20.0, 0.0]);
    }
}
