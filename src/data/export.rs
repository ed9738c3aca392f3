use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use super::model::{CellValue, DatasetProvider, QcDataset, FIXED_COLUMNS};
use crate::metrics::MetricCatalog;

const FIXED_LABELS: [&str; 6] = ["ID", "Start Time", "Path", "Instrument", "Category", "Transaction"];

/// Write `rows` of `dataset` as CSV: a column-id header, a description row,
/// then one line per row. Returns the number of data lines written.
pub fn write_csv<W: Write>(writer: W, dataset: &QcDataset, rows: &[usize], catalog: &MetricCatalog) -> Result<usize> {
    let mut out = csv::Writer::from_writer(writer);

    let ids = FIXED_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(dataset.metric_columns().iter().cloned());
    out.write_record(ids).context("writing CSV header")?;

    let descriptions = FIXED_LABELS.iter().map(|l| l.to_string()).chain(
        dataset
            .metric_columns()
            .iter()
            .map(|code| catalog.get(code).map_or_else(|_| code.clone(), |m| m.name.to_string())),
    );
    out.write_record(descriptions).context("writing CSV descriptions")?;

    let width = FIXED_COLUMNS.len() + dataset.metric_columns().len();
    for &row in rows {
        let record = (0..width).map(|col| match dataset.value(row, col) {
            // Keep milliseconds so the file loads back exactly.
            CellValue::Time(ms) => ms.to_string(),
            other => other.to_string(),
        });
        out.write_record(record)
            .with_context(|| format!("writing row {row}"))?;
    }
    out.flush().context("flushing CSV")?;
    Ok(rows.len())
}

pub fn write_csv_file(path: &Path, dataset: &QcDataset, rows: &[usize], catalog: &MetricCatalog) -> Result<usize> {
    let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let written = write_csv(std::io::BufWriter::new(file), dataset, rows, catalog)?;
    log::info!("Exported {written} rows to {}", path.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::load_file;
    use crate::data::model::fixtures::row;

    #[test]
    fn exported_rows_load_back() {
        let ds = QcDataset::from_rows(
            vec!["p_1".into()],
            vec![
                row(1, 1_700_000_000_000, "QE1", "yeast", &[Some(31.5)]),
                row(2, 1_700_000_100_000, "QE1", "yeast", &[None]),
                row(3, 1_700_000_200_000, "Orbi", "bsa", &[Some(12.0)]),
            ],
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        let written = write_csv_file(&path, &ds, &[0, 1], &MetricCatalog::builtin()).unwrap();
        assert_eq!(written, 2);

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("id,startTime,path,instrument,category,transaction,p_1"));
        assert_eq!(
            lines.next(),
            Some("ID,Start Time,Path,Instrument,Category,Transaction,Search Score")
        );

        let back = load_file(&path).unwrap();
        assert_eq!(back.rows(), &ds.rows()[..2]);
    }
}
