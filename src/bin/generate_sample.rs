use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use qc_trends::metrics::{MetricCatalog, MetricGroup};

const DAYS: i64 = 120;
const DAY_MS: i64 = 24 * 60 * 60 * 1000;
/// 2024-01-01T00:00:00Z
const START_MS: i64 = 1_704_067_200_000;

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5)).rotate_left(7).wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }

    fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }
}

/// Typical magnitude of a metric, so the charts look plausible.
fn baseline(group: MetricGroup, rng: &mut SimpleRng) -> f64 {
    let scale = match group {
        MetricGroup::Chromatography => 20.0,
        MetricGroup::DynamicSampling => 5_000.0,
        MetricGroup::IonSource => 1.0,
        MetricGroup::Ms1Signal => 1e6,
        MetricGroup::Ms2Signal => 200.0,
        MetricGroup::Protease => 30.0,
        MetricGroup::ProteinId => 50.0,
        MetricGroup::Other => 10.0,
    };
    scale * (0.5 + rng.next_f64())
}

fn main() {
    let mut rng = SimpleRng::new(42);
    let catalog = MetricCatalog::builtin();
    let instruments = ["Orbi0012", "QEX30210", "QEX30288"];
    let categories = ["yeast", "bsa", "contaminants"];

    let mut ids = Vec::new();
    let mut times = Vec::new();
    let mut paths = Vec::new();
    let mut instrument_col = Vec::new();
    let mut category_col = Vec::new();
    let mut transactions = Vec::new();
    let mut values: Vec<Vec<Option<f64>>> = vec![Vec::new(); catalog.len()];

    let baselines: Vec<Vec<f64>> = instruments
        .iter()
        .map(|_| catalog.iter().map(|m| baseline(m.group(), &mut rng)).collect())
        .collect();

    let mut id: i64 = 1;
    for day in 0..DAYS {
        for (i, instrument) in instruments.iter().enumerate() {
            for category in &categories {
                if rng.chance(0.25) {
                    continue;
                }
                let time = START_MS + day * DAY_MS + (rng.next_f64() * DAY_MS as f64) as i64;
                ids.push(id);
                times.push(time);
                paths.push(format!("/mnt/qc/{instrument}/{day:03}_{category}_{id}.RAW"));
                instrument_col.push(instrument.to_string());
                category_col.push(category.to_string());
                transactions.push(10_000 + id);

                for (m, metric) in catalog.iter().enumerate() {
                    let base = baselines[i][m];
                    let value = if rng.chance(0.03) {
                        None
                    } else if metric.is_identification_count() && rng.chance(0.2) {
                        Some(0.0)
                    } else if rng.chance(0.04) {
                        // Occasional bad run.
                        Some(rng.gauss(base * 2.5, base * 0.3))
                    } else {
                        Some(rng.gauss(base, base * 0.08))
                    };
                    values[m].push(value);
                }
                id += 1;
            }
        }
    }

    let mut fields = vec![
        Field::new("id", DataType::Int64, false),
        Field::new("startTime", DataType::Timestamp(TimeUnit::Millisecond, None), false),
        Field::new("path", DataType::Utf8, false),
        Field::new("instrument", DataType::Utf8, false),
        Field::new("category", DataType::Utf8, false),
        Field::new("transaction", DataType::Int64, true),
    ];
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(ids)),
        Arc::new(TimestampMillisecondArray::from(times)),
        Arc::new(StringArray::from(paths)),
        Arc::new(StringArray::from(instrument_col)),
        Arc::new(StringArray::from(category_col)),
        Arc::new(Int64Array::from(transactions)),
    ];
    for (metric, column) in catalog.iter().zip(values) {
        fields.push(Field::new(metric.code, DataType::Float64, true));
        columns.push(Arc::new(Float64Array::from(column)));
    }

    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), columns).expect("Failed to create RecordBatch");
    let rows = batch.num_rows();

    // Write Parquet
    let output_path = "sample_qc.parquet";
    let file = std::fs::File::create(output_path).expect("Failed to create output file");
    let mut writer = ArrowWriter::try_new(file, schema, None).expect("Failed to create writer");
    writer.write(&batch).expect("Failed to write batch");
    writer.close().expect("Failed to close writer");

    println!(
        "Wrote {rows} runs ({} instruments, {} metrics) to {output_path}",
        instruments.len(),
        catalog.len()
    );
}
