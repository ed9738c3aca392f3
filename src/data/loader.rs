use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{Array, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type, TimeUnit};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{
    QcDataset, Row, COL_CATEGORY, COL_ID, COL_INSTRUMENT, COL_PATH, COL_START_TIME, COL_TRANSACTION, FIXED_COLUMNS,
};
use crate::error::EngineError;

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a QC dataset from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – one row per run, fixed columns plus one float column per metric
/// * `.json`    – DataTable document (`cols` / `rows` with `{"v": ...}` cells)
/// * `.csv`     – column-id header, optional description row
pub fn load_file(path: &Path) -> Result<QcDataset> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let dataset = match ext.as_str() {
        "parquet" | "pq" => load_parquet(path),
        "json" => load_json(path),
        "csv" => load_csv(path),
        other => bail!("Unsupported file extension: .{other}"),
    }
    .with_context(|| format!("loading {}", path.display()))?;
    log::info!("Read {} rows from {}", dataset.len(), path.display());
    Ok(dataset)
}

// ---------------------------------------------------------------------------
// Column layout shared by every format
// ---------------------------------------------------------------------------

/// Where the fixed columns sit in a source table, and which columns are metrics.
#[derive(Debug)]
struct ColumnLayout {
    id: usize,
    start_time: usize,
    path: usize,
    instrument: usize,
    category: usize,
    transaction: Option<usize>,
    /// (source column, metric code)
    metrics: Vec<(usize, String)>,
}

fn is_fixed(name: &str) -> bool {
    FIXED_COLUMNS.iter().any(|c| *c == name)
}

impl ColumnLayout {
    fn new<S: AsRef<str>>(names: &[S], is_metric: impl Fn(usize) -> bool) -> Result<Self> {
        let find = |name: &str| names.iter().position(|n| n.as_ref() == name);
        let require = |name: &str| find(name).ok_or_else(|| EngineError::ColumnNotFound(name.to_string()));
        let metrics = names
            .iter()
            .enumerate()
            .filter(|(i, n)| !is_fixed(n.as_ref()) && is_metric(*i))
            .map(|(i, n)| (i, n.as_ref().to_string()))
            .collect();
        Ok(Self {
            id: require(COL_ID)?,
            start_time: require(COL_START_TIME)?,
            path: require(COL_PATH)?,
            instrument: require(COL_INSTRUMENT)?,
            category: require(COL_CATEGORY)?,
            transaction: find(COL_TRANSACTION),
            metrics,
        })
    }

    fn metric_codes(&self) -> Vec<String> {
        self.metrics.iter().map(|(_, code)| code.clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Parse a timestamp into epoch milliseconds (UTC).
///
/// Accepts `Date(y, m, d, H, M, S, ms)` with a zero-based month, RFC 3339,
/// `YYYY-MM-DD HH:MM:SS[.fff]`, a bare date, or integer milliseconds.
pub fn parse_timestamp(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Some(args) = text.strip_prefix("Date(").and_then(|s| s.strip_suffix(')')) {
        return parse_date_call(args);
    }
    if let Ok(ms) = text.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Some(t.timestamp_millis());
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(text, format) {
            return Some(t.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc().timestamp_millis())
}

fn parse_date_call(args: &str) -> Option<i64> {
    let parts: Vec<u32> = args
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    let part = |i: usize| parts.get(i).copied().unwrap_or(0);
    if parts.len() < 3 {
        return None;
    }
    let date = NaiveDate::from_ymd_opt(i32::try_from(part(0)).ok()?, part(1) + 1, part(2))?;
    let time = date.and_hms_milli_opt(part(3), part(4), part(5), part(6))?;
    Some(time.and_utc().timestamp_millis())
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema (DataTable literal):
///
/// ```json
/// {
///   "cols": [{"id": "id", "type": "number"}, {"id": "startTime", "type": "datetime"}, ...],
///   "rows": [{"c": [{"v": 17}, {"v": "Date(2024, 4, 3, 10, 15, 0, 0)"}, null, ...]}, ...]
/// }
/// ```
///
/// Non-fixed columns of type `number` become metrics.
fn load_json(path: &Path) -> Result<QcDataset> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    parse_data_table(&text)
}

fn parse_data_table(text: &str) -> Result<QcDataset> {
    let root: JsonValue = serde_json::from_str(text).context("parsing JSON")?;
    let cols = root
        .get("cols")
        .and_then(JsonValue::as_array)
        .context("Expected a 'cols' array")?;
    let rows = root
        .get("rows")
        .and_then(JsonValue::as_array)
        .context("Expected a 'rows' array")?;

    let ids: Vec<&str> = cols
        .iter()
        .map(|c| c.get("id").and_then(JsonValue::as_str).unwrap_or(""))
        .collect();
    let types: Vec<&str> = cols
        .iter()
        .map(|c| c.get("type").and_then(JsonValue::as_str).unwrap_or("number"))
        .collect();
    let layout = ColumnLayout::new(&ids, |i| types[i] == "number")?;

    let mut out = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let cells = row
            .get("c")
            .and_then(JsonValue::as_array)
            .with_context(|| format!("Row {i} has no 'c' array"))?;
        let cell = |col: usize| match cells.get(col) {
            Some(JsonValue::Object(o)) => o.get("v").filter(|v| !v.is_null()),
            Some(JsonValue::Null) | None => None,
            Some(other) => Some(other),
        };
        let string = |col: usize| match cell(col) {
            Some(JsonValue::String(s)) => s.clone(),
            Some(v) => v.to_string(),
            None => String::new(),
        };

        let id = cell(layout.id)
            .and_then(JsonValue::as_i64)
            .with_context(|| format!("Row {i}: missing or invalid id"))?;
        let start_time = match cell(layout.start_time) {
            Some(JsonValue::String(s)) => parse_timestamp(s),
            Some(v) => v.as_i64(),
            None => None,
        }
        .with_context(|| format!("Row {i}: missing or invalid {COL_START_TIME}"))?;

        out.push(Row {
            id,
            start_time,
            path: string(layout.path),
            instrument: string(layout.instrument),
            category: string(layout.category),
            transaction: layout.transaction.and_then(|c| cell(c)).and_then(JsonValue::as_i64),
            values: layout
                .metrics
                .iter()
                .map(|(col, _)| cell(*col).and_then(JsonValue::as_f64))
                .collect(),
        });
    }

    Ok(QcDataset::from_rows(layout.metric_codes(), out))
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row with column ids. A second row whose id cell is
/// not an integer is taken as column descriptions and skipped. Every
/// non-fixed column is a metric; empty cells are missing values.
fn load_csv(path: &Path) -> Result<QcDataset> {
    let file = std::fs::File::open(path).context("opening CSV")?;
    read_csv(file)
}

fn read_csv<R: std::io::Read>(input: R) -> Result<QcDataset> {
    let mut reader = csv::Reader::from_reader(input);
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let layout = ColumnLayout::new(&headers, |_| true)?;

    let mut rows = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        let field = |col: usize| record.get(col).unwrap_or("").trim();

        let Ok(id) = field(layout.id).parse::<i64>() else {
            if row_no == 0 {
                log::debug!("skipping CSV description row");
                continue;
            }
            bail!("CSV row {row_no}: '{}' is not a valid id", field(layout.id));
        };
        let start_time = parse_timestamp(field(layout.start_time)).with_context(|| {
            format!("CSV row {row_no}: '{}' is not a timestamp", field(layout.start_time))
        })?;
        let values = layout
            .metrics
            .iter()
            .map(|(col, code)| {
                let raw = field(*col);
                if raw.is_empty() {
                    return Ok(None);
                }
                raw.parse::<f64>()
                    .map(Some)
                    .with_context(|| format!("CSV row {row_no}, {code}: '{raw}' is not a number"))
            })
            .collect::<Result<Vec<_>>>()?;

        rows.push(Row {
            id,
            start_time,
            path: field(layout.path).to_string(),
            instrument: field(layout.instrument).to_string(),
            category: field(layout.category).to_string(),
            transaction: layout.transaction.and_then(|c| field(c).parse().ok()),
            values,
        });
    }

    Ok(QcDataset::from_rows(layout.metric_codes(), rows))
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file with one row per run.
///
/// Expected schema:
/// - `id`, `transaction`: any integer type
/// - `startTime`: Timestamp, Date64 or Int64 milliseconds
/// - `path`, `instrument`, `category`: Utf8 / LargeUtf8
/// - every other numeric column is a metric; non-numeric extras are ignored
fn load_parquet(path: &Path) -> Result<QcDataset> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let schema = Arc::clone(builder.schema());
    let reader = builder.build().context("building parquet reader")?;

    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    let layout = ColumnLayout::new(&names, |i| schema.field(i).data_type().is_numeric())?;
    for field in schema.fields() {
        if !is_fixed(field.name()) && !field.data_type().is_numeric() {
            log::debug!("ignoring non-numeric column {} ({:?})", field.name(), field.data_type());
        }
    }

    let mut rows = Vec::new();
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;

        let ids = cast_column(batch.column(layout.id), &DataType::Int64, COL_ID)?;
        let ids = ids.as_primitive::<Int64Type>();
        let times = time_column(batch.column(layout.start_time))?;
        let times = times.as_primitive::<Int64Type>();
        let paths = cast_column(batch.column(layout.path), &DataType::Utf8, COL_PATH)?;
        let paths = paths.as_string::<i32>();
        let instruments = cast_column(batch.column(layout.instrument), &DataType::Utf8, COL_INSTRUMENT)?;
        let instruments = instruments.as_string::<i32>();
        let categories = cast_column(batch.column(layout.category), &DataType::Utf8, COL_CATEGORY)?;
        let categories = categories.as_string::<i32>();
        let transactions = layout
            .transaction
            .map(|c| cast_column(batch.column(c), &DataType::Int64, COL_TRANSACTION))
            .transpose()?;
        let metrics = layout
            .metrics
            .iter()
            .map(|(c, code)| cast_column(batch.column(*c), &DataType::Float64, code))
            .collect::<Result<Vec<_>>>()?;

        for row in 0..batch.num_rows() {
            if ids.is_null(row) || times.is_null(row) {
                bail!("Row {row}: null id or {COL_START_TIME}");
            }
            let text = |a: &arrow::array::StringArray| {
                if a.is_null(row) {
                    String::new()
                } else {
                    a.value(row).to_string()
                }
            };
            rows.push(Row {
                id: ids.value(row),
                start_time: times.value(row),
                path: text(paths),
                instrument: text(instruments),
                category: text(categories),
                transaction: transactions.as_ref().and_then(|t| {
                    let t = t.as_primitive::<Int64Type>();
                    (!t.is_null(row)).then(|| t.value(row))
                }),
                values: metrics
                    .iter()
                    .map(|m| {
                        let m = m.as_primitive::<Float64Type>();
                        (!m.is_null(row)).then(|| m.value(row))
                    })
                    .collect(),
            });
        }
    }

    Ok(QcDataset::from_rows(layout.metric_codes(), rows))
}

// -- Arrow helpers --

fn cast_column(col: &Arc<dyn Array>, to: &DataType, name: &str) -> Result<Arc<dyn Array>> {
    cast(col, to).with_context(|| format!("column '{name}': cannot read {:?} as {to:?}", col.data_type()))
}

/// Normalise the start time column to Int64 epoch milliseconds.
fn time_column(col: &Arc<dyn Array>) -> Result<Arc<dyn Array>> {
    let millis = match col.data_type() {
        DataType::Timestamp(TimeUnit::Millisecond, None) => Arc::clone(col),
        DataType::Timestamp(_, _) => cast_column(col, &DataType::Timestamp(TimeUnit::Millisecond, None), COL_START_TIME)?,
        DataType::Date32 => cast_column(col, &DataType::Date64, COL_START_TIME)?,
        _ => Arc::clone(col),
    };
    cast_column(&millis, &DataType::Int64, COL_START_TIME)
}
