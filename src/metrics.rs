use std::fmt;

use crate::error::EngineError;

// ---------------------------------------------------------------------------
// Direction – which side of the normal range is "good"
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    LowIsGood,
    HighIsGood,
    MidRangeIsGood,
    Unscored,
}

impl Direction {
    /// Whether values above the band are flagged.
    pub fn shades_above(self) -> bool {
        matches!(self, Direction::LowIsGood | Direction::MidRangeIsGood)
    }

    /// Whether values below the band are flagged.
    pub fn shades_below(self) -> bool {
        matches!(self, Direction::HighIsGood | Direction::MidRangeIsGood)
    }
}

// ---------------------------------------------------------------------------
// MetricGroup – section a metric is listed under
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricGroup {
    Chromatography,
    DynamicSampling,
    IonSource,
    Ms1Signal,
    Ms2Signal,
    Protease,
    ProteinId,
    Other,
}

impl MetricGroup {
    /// Group of a metric code: the prefix before the first underscore.
    pub fn of_code(code: &str) -> Self {
        if code == "duration" {
            return MetricGroup::Chromatography;
        }
        match code.split('_').next().unwrap_or("") {
            "c" => MetricGroup::Chromatography,
            "ds" => MetricGroup::DynamicSampling,
            "is" => MetricGroup::IonSource,
            "ms1" => MetricGroup::Ms1Signal,
            "ms2" => MetricGroup::Ms2Signal,
            "p" => MetricGroup::Protease,
            "id" => MetricGroup::ProteinId,
            _ => MetricGroup::Other,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            MetricGroup::Chromatography => "Chromatography",
            MetricGroup::DynamicSampling => "Dynamic Sampling",
            MetricGroup::IonSource => "Ion Source",
            MetricGroup::Ms1Signal => "MS1 Signal",
            MetricGroup::Ms2Signal => "MS2 Signal",
            MetricGroup::Protease => "Protease",
            MetricGroup::ProteinId => "Protein ID",
            MetricGroup::Other => "Other",
        }
    }
}

impl fmt::Display for MetricGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

// ---------------------------------------------------------------------------
// MetricDefinition
// ---------------------------------------------------------------------------

/// Static catalog entry for one QC metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDefinition {
    pub code: &'static str,
    pub label: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub direction: Direction,
    /// Fixed y-axis range, when the metric has a natural one.
    pub range: Option<[f64; 2]>,
    pub help_link: Option<&'static str>,
    /// Shown in the compact dashboard.
    pub is_simple_view: bool,
}

impl MetricDefinition {
    pub fn group(&self) -> MetricGroup {
        MetricGroup::of_code(self.code)
    }

    /// Identification counts treat a raw zero as "no match" rather than a measurement.
    pub fn is_identification_count(&self) -> bool {
        self.group() == MetricGroup::ProteinId
    }
}

// ---------------------------------------------------------------------------
// MetricCatalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricCatalog {
    metrics: Vec<MetricDefinition>,
}

impl MetricCatalog {
    pub fn new(metrics: Vec<MetricDefinition>) -> Self {
        Self { metrics }
    }

    /// The QuaMeter metric set.
    pub fn builtin() -> Self {
        Self::new(builtin_metrics())
    }

    pub fn get(&self, code: &str) -> Result<&MetricDefinition, EngineError> {
        self.metrics
            .iter()
            .find(|m| m.code == code)
            .ok_or_else(|| EngineError::MetricNotFound(code.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.metrics.iter()
    }

    /// Metrics of the compact dashboard, in catalog order.
    pub fn simple(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.metrics.iter().filter(|m| m.is_simple_view)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

impl Default for MetricCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[allow(clippy::too_many_arguments)]
const fn metric(
    code: &'static str,
    label: &'static str,
    name: &'static str,
    direction: Direction,
    is_simple_view: bool,
    range: Option<[f64; 2]>,
    help_link: Option<&'static str>,
    description: &'static str,
) -> MetricDefinition {
    MetricDefinition {
        code,
        label,
        name,
        description,
        direction,
        range,
        help_link,
        is_simple_view,
    }
}

fn builtin_metrics() -> Vec<MetricDefinition> {
    use Direction::*;
    vec![
        metric("c_1a", "C-1A", "Bleed Ratio", LowIsGood, false, None, None,
            "Fraction of peptides with repeat identifications >4 min earlier than identification closest to the chromatographic maximum"),
        metric("c_1b", "C-1B", "Peak Tailing Ratio", LowIsGood, false, None, None,
            "Fraction of peptides with repeat identifications >4 min later than identification closest to the chromatographic maximum"),
        metric("c_2a", "C-2A", "Retention Window", HighIsGood, false, None, Some("help/retention_spread.html"),
            "Retention time period over which the middle 50% of the identified peptides eluted (minutes)"),
        metric("duration", "Duration", "Duration", MidRangeIsGood, false, None, None,
            "Acquisition duration (minutes)"),
        metric("c_2b", "C-2B", "ID Rate", HighIsGood, true, None, Some("help/peptides_per_minute.html"),
            "Rate of peptide identification during the C-2A time range"),
        metric("c_3a", "C-3A", "Peak Width", LowIsGood, true, Some([0.0, 40.0]), Some("help/peak_width.html"),
            "Median identified peak width"),
        metric("c_3b", "C-3B", "Peak Width Spread", LowIsGood, true, Some([0.0, 40.0]), Some("help/peak_width_variability.html"),
            "Interquantile range for peak widths"),
        metric("c_4a", "C-4A", "Late Peak Width", LowIsGood, false, None, None,
            "Median peak width over last 10% of the elution time"),
        metric("c_4b", "C-4B", "Early Peak Width", LowIsGood, false, None, None,
            "Median peak width over first 10% of the elution time"),
        metric("c_4c", "C-4C", "Middle Peak Width", LowIsGood, false, None, None,
            "Median peak width over middle 10% of the elution time"),
        metric("ds_1a", "DS-1A", "Singly Identified", HighIsGood, false, None, None,
            "Ratio of singly to doubly identified peptide ions."),
        metric("ds_1b", "DS-1B", "Triply Identified", HighIsGood, false, None, None,
            "Ratio of doubly to triply identified peptide ions."),
        metric("ds_2a", "DS-2A", "MS1 Scans", MidRangeIsGood, false, None, None,
            "Number of MS1 scans acquired during the C-2A time range"),
        metric("ds_2b", "DS-2B", "MS2 Scans", HighIsGood, false, None, None,
            "Number of MS2 scans acquired during the C-2A time range"),
        metric("ds_3a", "DS-3A", "Peak Sampling", LowIsGood, false, None, None,
            "Median ratio of the maximum MS1 peak intensity over the MS1 intensity at the sampling time for all identified peptides. We want to capture peak at its apex."),
        metric("ds_3b", "DS-3B", "Low Peak Sampling", LowIsGood, false, None, None,
            "Median ratio of the maximum MS1 peak intensity over the MS1 intensity at the sampling time for peptides with peak intensity in bottom 50%. We want to capture peak at its apex even for low-intensity peptides."),
        metric("is_1a", "IS-1A", "TIC Drop", LowIsGood, false, None, None,
            "TIC dropped more than 10x in two consecutive MS1 scans (within the C-2A time range)"),
        metric("is_1b", "IS-1B", "TIC Jump", LowIsGood, false, None, None,
            "TIC jumped more than 10x in two consecutive MS1 scans (within the C-2A time range)"),
        metric("is_2", "IS-2", "Precursor", MidRangeIsGood, true, None, None,
            "Median precursor of identified peptide ions"),
        metric("is_3a", "IS-3A", "1+ charge", LowIsGood, false, None, None,
            "Ratio of 1+/2+ identified peptides"),
        metric("is_3b", "IS-3B", "3+ charge", LowIsGood, false, None, None,
            "Ratio of 3+/2+ identified peptides"),
        metric("is_3c", "IS-3C", "4+ charge", LowIsGood, false, None, None,
            "Ratio of 4+/2+ identified peptides"),
        metric("ms1_1", "MS1-1", "MS1 Injection", LowIsGood, false, None, None,
            "Median injection time for MS1 spectra"),
        metric("ms1_2a", "MS1-2A", "MS1 S/N", HighIsGood, true, None, None,
            "Ratio of maximum to median signal in MS1 spectra"),
        metric("ms1_3a", "MS1-3A", "MS1 Dynamic Range", HighIsGood, false, None, None,
            "Dynamic range - ratio of 95th and 5th percentile of MS1 maximum identities for identified peptides in C-2A time range"),
        metric("ms1_2b", "MS1-2B", "MS1 TIC", HighIsGood, true, None, None,
            "Median MS1 Total Ion Current"),
        metric("ms1_5a", "MS1-5A", "AMU Error Median", Unscored, false, None, None,
            "Median difference between the theoretical precursor m/z and the measured precursor m/z value as reported in the scan header"),
        metric("ms1_5b", "MS1-5B", "AMU Error Mean", Unscored, false, None, None,
            "Mean absolute difference between the theoretical precursor m/z and the measured precursor m/z value as reported in the scan header"),
        metric("ms1_5c", "MS1-5C", "PPM Error", Unscored, true, None, None,
            "Median precursor mass error in PPM"),
        metric("ms1_5d", "MS1-5D", "PPM Error Range", Unscored, false, None, None,
            "Interquartile range for mass error in PPM"),
        metric("ms2_1", "MS2-1", "MS2 Injection", LowIsGood, false, None, None,
            "Median injection time for MS2 spectra"),
        metric("ms2_2", "MS2-2", "MS2 S/N", HighIsGood, true, None, None,
            "Ratio of maximum to median signal in MS2 spectra"),
        metric("ms2_3", "MS2-3", "MS2 Peaks#", MidRangeIsGood, true, None, None,
            "Median number of MS2 peaks"),
        metric("ms2_4a", "MS2-4A", "MS2 ID 1", MidRangeIsGood, false, None, None,
            "Fraction of MS2 scans identified in the 1st quartile of peptides sorted by MS1 max intensity"),
        metric("ms2_4b", "MS2-4B", "MS2 ID 2", MidRangeIsGood, false, None, None,
            "Fraction of MS2 scans identified in the 2nd quartile of peptides sorted by MS1 max intensity"),
        metric("ms2_4c", "MS2-4C", "MS2 ID 3", MidRangeIsGood, false, None, None,
            "Fraction of MS2 scans identified in the 3rd quartile of peptides sorted by MS1 max intensity"),
        metric("ms2_4d", "MS2-4D", "MS2 ID 4", MidRangeIsGood, false, None, None,
            "Fraction of MS2 scans identified in the 4th quartile of peptides sorted by MS1 max intensity"),
        metric("p_1", "P-1", "Search Score", HighIsGood, true, None, None,
            "Median peptide ID score"),
        metric("p_2a", "P-2A", "MS2 Tryptic Spectra", HighIsGood, false, None, None,
            "Number of MS2 spectra identifying tryptic peptide ions"),
        metric("p_2b", "P-2B", "MS2 Tryptic Ions", HighIsGood, false, None, None,
            "Number of tryptic peptide ions identified"),
        metric("p_2c", "P-2C", "Distinct Peptides", HighIsGood, false, None, None,
            "Number of distinct identified tryptic peptide sequences, ignoring modifications and charge state"),
        metric("p_3", "P-3", "Semitryptic Ratio", LowIsGood, true, None, None,
            "Ratio of semitryptic/tryptic peptides"),
        metric("id_1", "ID-1", "Identified Spectra", LowIsGood, true, None, None,
            "Number of identified spectra matching requested proteins for given category"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_has_unique_codes() {
        let catalog = MetricCatalog::builtin();
        let mut codes: Vec<&str> = catalog.iter().map(|m| m.code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), catalog.len());
        assert_eq!(catalog.len(), 43);
    }

    #[test]
    fn unknown_code_is_metric_not_found() {
        let catalog = MetricCatalog::builtin();
        assert_eq!(
            catalog.get("zz_9").unwrap_err(),
            EngineError::MetricNotFound("zz_9".into())
        );
    }

    #[test]
    fn groups_follow_code_prefix() {
        assert_eq!(MetricGroup::of_code("duration"), MetricGroup::Chromatography);
        assert_eq!(MetricGroup::of_code("ms1_5c"), MetricGroup::Ms1Signal);
        assert_eq!(MetricGroup::of_code("id_1"), MetricGroup::ProteinId);
        let catalog = MetricCatalog::builtin();
        assert!(catalog.get("id_1").unwrap().is_identification_count());
        assert!(!catalog.get("p_1").unwrap().is_identification_count());
    }

    #[test]
    fn range_direction_shades_both_sides() {
        assert!(Direction::MidRangeIsGood.shades_above());
        assert!(Direction::MidRangeIsGood.shades_below());
        assert!(!Direction::Unscored.shades_above());
        assert!(!Direction::HighIsGood.shades_above());
    }
}
