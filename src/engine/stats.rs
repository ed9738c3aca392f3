use super::projection::Projection;

/// Share of the sample cut from each end before computing the band.
pub const TRIM_PERCENT: usize = 5;
pub const PRIMARY_SIGMAS: f64 = 3.0;
pub const SECONDARY_SIGMAS: f64 = 5.0;

// ---------------------------------------------------------------------------
// HighlightBands – advisory "normal range" of a chart
// ---------------------------------------------------------------------------

/// ±3σ (primary) and ±5σ (secondary) bounds around a trimmed mean.
///
/// A band with `low > high` is disabled and must be rendered without any
/// highlight. Bands only annotate the chart; they never filter data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HighlightBands {
    pub low: f64,
    pub high: f64,
    pub low2: f64,
    pub high2: f64,
}

impl HighlightBands {
    pub const DISABLED: HighlightBands = HighlightBands {
        low: 1.0,
        high: -1.0,
        low2: 1.0,
        high2: -1.0,
    };

    pub fn is_enabled(&self) -> bool {
        self.low < self.high
    }

    fn around(mean: f64, stdev: f64) -> Self {
        HighlightBands {
            low: mean - PRIMARY_SIGMAS * stdev,
            high: mean + PRIMARY_SIGMAS * stdev,
            low2: mean - SECONDARY_SIGMAS * stdev,
            high2: mean + SECONDARY_SIGMAS * stdev,
        }
    }
}

impl Default for HighlightBands {
    fn default() -> Self {
        Self::DISABLED
    }
}

// ---------------------------------------------------------------------------
// Trimmed statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimmedStats {
    pub mean: f64,
    pub stdev: f64,
    /// Number of values left after trimming.
    pub count: usize,
}

/// Sort ascending and keep `[n*5/100, n*95/100)`, the plain proportional cut.
pub fn trim(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let start = n * TRIM_PERCENT / 100;
    let end = n * (100 - TRIM_PERCENT) / 100;
    sorted[start..end].to_vec()
}

/// Mean and Bessel-corrected deviation of the trimmed sample.
///
/// An empty sample has mean 0; fewer than two values give a deviation of 1.
pub fn trimmed_stats(values: &[f64]) -> TrimmedStats {
    let kept = trim(values);
    let count = kept.len();
    let mean = if count > 0 {
        kept.iter().sum::<f64>() / count as f64
    } else {
        0.0
    };
    let stdev = if count > 1 {
        let sum_squares: f64 = kept.iter().map(|v| (v - mean) * (v - mean)).sum();
        (sum_squares / (count - 1) as f64).sqrt()
    } else {
        1.0
    };
    TrimmedStats { mean, stdev, count }
}

pub fn bands_for_values(values: &[f64]) -> HighlightBands {
    let stats = trimmed_stats(values);
    HighlightBands::around(stats.mean, stats.stdev)
}

/// Bands for a projection: only defined when it carries exactly one series.
pub fn bands_for(projection: &Projection) -> HighlightBands {
    if projection.instruments.len() != 1 {
        return HighlightBands::DISABLED;
    }
    bands_for_values(&projection.series_values(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::projection::ProjectedRow;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn one_to_hundred_drops_five_from_each_end() {
        let values: Vec<f64> = (1..=100).rev().map(f64::from).collect();
        let kept = trim(&values);
        assert_eq!(kept.len(), 90);
        assert_eq!(kept.first().copied(), Some(6.0));
        assert_eq!(kept.last().copied(), Some(95.0));

        let stats = trimmed_stats(&values);
        assert!(close(stats.mean, 50.5));
        // Sample deviation of 6..=95.
        let expected = ((90.0 * 90.0 - 1.0) / 12.0 * 90.0 / 89.0_f64).sqrt();
        assert!(close(stats.stdev, expected));
    }

    #[test]
    fn small_samples_use_unit_deviation() {
        // The integer cut keeps only the lower of two values.
        let stats = trimmed_stats(&[9.0, 4.0]);
        assert_eq!(stats.count, 1);
        assert_eq!(stats.mean, 4.0);
        assert_eq!(stats.stdev, 1.0);
    }

    #[test]
    fn single_value_is_cut_entirely() {
        assert!(trim(&[4.0]).is_empty());
        let stats = trimmed_stats(&[4.0]);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.mean, 0.0);
        assert_eq!(stats.stdev, 1.0);
    }

    #[test]
    fn empty_sample_has_zero_mean() {
        let stats = trimmed_stats(&[]);
        assert_eq!(stats.mean, 0.0);
        assert_eq!(stats.stdev, 1.0);
        let bands = bands_for_values(&[]);
        assert_eq!(bands.low, -3.0);
        assert_eq!(bands.high2, 5.0);
    }

    #[test]
    fn secondary_band_is_outside_primary() {
        let bands = bands_for_values(&[1.0, 2.0, 3.0, 4.0, 10.0]);
        assert!(bands.is_enabled());
        assert!(bands.low2 < bands.low);
        assert!(bands.high2 > bands.high);
    }

    #[test]
    fn multiple_series_disable_the_band() {
        let projection = Projection {
            metric_code: "p_1".into(),
            instruments: vec!["A".into(), "B".into()],
            rows: vec![
                ProjectedRow { row: 0, timestamp: 0, values: vec![Some(1.0), None] },
                ProjectedRow { row: 1, timestamp: 1, values: vec![None, Some(2.0)] },
            ],
        };
        let bands = bands_for(&projection);
        assert!(bands.low > bands.high);
        assert!(!bands.is_enabled());
    }
}
