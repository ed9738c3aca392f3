use std::collections::{BTreeMap, BTreeSet};

use crate::data::model::QcDataset;
use crate::error::{EngineError, PersistenceError};
use crate::persistence::{AnnotationRecord, HiddenMark, NewAnnotation};

// ---------------------------------------------------------------------------
// Overlay markers
// ---------------------------------------------------------------------------

/// One annotation drawn on a chart.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationMarker {
    pub row_id: i64,
    pub instrument: String,
    /// Epoch milliseconds of the annotated run.
    pub timestamp: i64,
    /// Single-character flag shown on the chart.
    pub short_text: String,
    pub text: String,
}

fn short_text(text: &str) -> String {
    text.trim()
        .chars()
        .next()
        .map_or_else(|| "A".to_string(), |c| c.to_string())
}

/// Markers for `metric_code`. Records whose result id is not in `dataset`
/// are skipped.
pub fn build_overlay(records: &[AnnotationRecord], dataset: &QcDataset, metric_code: &str) -> Vec<AnnotationMarker> {
    records
        .iter()
        .filter(|r| r.metric_code == metric_code)
        .filter_map(|r| {
            let row = dataset.index_of_id(r.result_id).and_then(|i| dataset.row(i))?;
            Some(AnnotationMarker {
                row_id: r.result_id,
                instrument: row.instrument.clone(),
                timestamp: row.start_time,
                short_text: short_text(&r.text),
                text: r.text.clone(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Request tickets
// ---------------------------------------------------------------------------

/// Identifies a control that is busy while its request is outstanding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PendingKey {
    Hide(i64),
    Annotation { row_id: i64, metric_code: String },
}

/// An issued hide request. Hand it back to `finish_hide` with the result.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct HideTicket {
    pub row_id: i64,
    pub reason: String,
}

impl HideTicket {
    pub fn key(&self) -> PendingKey {
        PendingKey::Hide(self.row_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct AnnotationTicket {
    pub annotation: NewAnnotation,
}

impl AnnotationTicket {
    pub fn key(&self) -> PendingKey {
        PendingKey::Annotation {
            row_id: self.annotation.result_id,
            metric_code: self.annotation.metric_code.clone(),
        }
    }
}

/// An issued list fetch, tagged with the generation it was started under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct FetchTicket {
    pub generation: u64,
}

impl FetchTicket {
    fn check(self, current: u64) -> Result<(), EngineError> {
        if self.generation == current {
            Ok(())
        } else {
            Err(EngineError::StaleGeneration {
                expected: current,
                actual: self.generation,
            })
        }
    }
}

/// The annotation form opened by clicking a point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationDraft {
    pub row_id: i64,
    pub metric_code: String,
    pub text: String,
}

// ---------------------------------------------------------------------------
// AnnotationManager
// ---------------------------------------------------------------------------

/// Session cache of annotations and hidden marks plus the requests in flight.
#[derive(Debug, Default)]
pub struct AnnotationManager {
    annotations: Vec<AnnotationRecord>,
    hidden: BTreeMap<i64, String>,
    in_flight: BTreeSet<PendingKey>,
    draft: Option<AnnotationDraft>,
}

impl AnnotationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn annotations(&self) -> &[AnnotationRecord] {
        &self.annotations
    }

    /// Annotations on one result, any metric.
    pub fn annotations_for_row(&self, row_id: i64) -> impl Iterator<Item = &AnnotationRecord> {
        self.annotations.iter().filter(move |a| a.result_id == row_id)
    }

    pub fn overlay(&self, dataset: &QcDataset, metric_code: &str) -> Vec<AnnotationMarker> {
        build_overlay(&self.annotations, dataset, metric_code)
    }

    pub fn hidden_reason(&self, row_id: i64) -> Option<&str> {
        self.hidden.get(&row_id).map(String::as_str)
    }

    pub fn hidden_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.hidden.keys().copied()
    }

    pub fn is_busy(&self, key: &PendingKey) -> bool {
        self.in_flight.contains(key)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn claim(&mut self, key: PendingKey) -> Result<(), EngineError> {
        if !self.in_flight.insert(key) {
            return Err(EngineError::RequestInFlight);
        }
        Ok(())
    }

    // -- hide ---------------------------------------------------------------

    pub fn begin_hide(&mut self, row_id: i64, reason: &str) -> Result<HideTicket, EngineError> {
        self.claim(PendingKey::Hide(row_id))?;
        Ok(HideTicket {
            row_id,
            reason: reason.to_string(),
        })
    }

    /// Release the control and record the mark on success.
    pub fn finish_hide(&mut self, ticket: &HideTicket, result: Result<(), PersistenceError>) -> Result<(), EngineError> {
        self.in_flight.remove(&ticket.key());
        match result {
            Ok(()) => {
                self.hidden.insert(ticket.row_id, ticket.reason.clone());
                Ok(())
            }
            Err(e) => Err(EngineError::HideFailed(e.to_string())),
        }
    }

    // -- annotate -----------------------------------------------------------

    pub fn begin_annotation(&mut self, row_id: i64, metric_code: &str, text: &str) -> Result<AnnotationTicket, EngineError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EngineError::AnnotationSubmitFailed("annotation text is empty".to_string()));
        }
        let annotation = NewAnnotation {
            metric_code: metric_code.to_string(),
            result_id: row_id,
            text: text.to_string(),
        };
        self.claim(PendingKey::Annotation {
            row_id,
            metric_code: metric_code.to_string(),
        })?;
        Ok(AnnotationTicket { annotation })
    }

    /// On success the record joins the cache and a matching draft closes.
    /// On failure nothing but the busy flag changes.
    pub fn finish_annotation(
        &mut self,
        ticket: &AnnotationTicket,
        result: Result<(), PersistenceError>,
    ) -> Result<(), EngineError> {
        self.in_flight.remove(&ticket.key());
        if let Err(e) = result {
            return Err(EngineError::AnnotationSubmitFailed(e.to_string()));
        }
        let a = &ticket.annotation;
        self.annotations.push(AnnotationRecord {
            id: None,
            metric_code: a.metric_code.clone(),
            result_id: a.result_id,
            text: a.text.clone(),
        });
        if self
            .draft
            .as_ref()
            .is_some_and(|d| d.row_id == a.result_id && d.metric_code == a.metric_code)
        {
            self.draft = None;
        }
        Ok(())
    }

    // -- fetch --------------------------------------------------------------

    pub fn begin_fetch(&self, generation: u64) -> FetchTicket {
        FetchTicket { generation }
    }

    /// Replace the annotation cache unless the fetch is stale.
    pub fn accept_annotations(
        &mut self,
        ticket: FetchTicket,
        current_generation: u64,
        records: Vec<AnnotationRecord>,
    ) -> Result<(), EngineError> {
        ticket.check(current_generation)?;
        self.annotations = records;
        Ok(())
    }

    pub fn accept_hidden(&mut self, ticket: FetchTicket, current_generation: u64, marks: Vec<HiddenMark>) -> Result<(), EngineError> {
        ticket.check(current_generation)?;
        self.hidden = marks.into_iter().map(|m| (m.result_id, m.reason)).collect();
        Ok(())
    }

    // -- draft --------------------------------------------------------------

    /// Open (or retarget) the form for this point. Text typed for the same
    /// point is kept.
    pub fn open_draft(&mut self, row_id: i64, metric_code: &str) -> &mut AnnotationDraft {
        let same = self
            .draft
            .as_ref()
            .is_some_and(|d| d.row_id == row_id && d.metric_code == metric_code);
        if !same {
            self.draft = None;
        }
        self.draft.get_or_insert_with(|| AnnotationDraft {
            row_id,
            metric_code: metric_code.to_string(),
            text: String::new(),
        })
    }

    pub fn draft(&self) -> Option<&AnnotationDraft> {
        self.draft.as_ref()
    }

    pub fn draft_mut(&mut self) -> Option<&mut AnnotationDraft> {
        self.draft.as_mut()
    }

    pub fn close_draft(&mut self) -> Option<AnnotationDraft> {
        self.draft.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::fixtures::row;

    fn dataset() -> QcDataset {
        QcDataset::from_rows(
            vec!["c_2b".into()],
            vec![
                row(1, 1_000, "QE1", "yeast", &[Some(1.0)]),
                row(2, 2_000, "Orbi", "yeast", &[Some(2.0)]),
            ],
        )
    }

    fn record(metric: &str, result_id: i64, text: &str) -> AnnotationRecord {
        AnnotationRecord {
            id: None,
            metric_code: metric.into(),
            result_id,
            text: text.into(),
        }
    }

    #[test]
    fn overlay_keeps_known_rows_of_the_metric() {
        let records = vec![
            record("c_2b", 2, "  new column"),
            record("c_2b", 99, "expired"),
            record("p_1", 1, "other metric"),
        ];
        let markers = build_overlay(&records, &dataset(), "c_2b");
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].row_id, 2);
        assert_eq!(markers[0].instrument, "Orbi");
        assert_eq!(markers[0].timestamp, 2_000);
        assert_eq!(markers[0].short_text, "n");
    }

    #[test]
    fn blank_text_gets_default_flag() {
        assert_eq!(short_text("   "), "A");
    }

    #[test]
    fn second_hide_for_same_row_is_refused_until_finished() {
        let mut m = AnnotationManager::new();
        let ticket = m.begin_hide(42, "bad run").unwrap();
        assert_eq!(m.begin_hide(42, "again"), Err(EngineError::RequestInFlight));
        assert!(m.begin_hide(43, "other row").is_ok());

        m.finish_hide(&ticket, Ok(())).unwrap();
        assert!(!m.is_busy(&PendingKey::Hide(42)));
        assert_eq!(m.hidden_reason(42), Some("bad run"));
    }

    #[test]
    fn failed_hide_records_nothing() {
        let mut m = AnnotationManager::new();
        let ticket = m.begin_hide(42, "bad run").unwrap();
        let err = m
            .finish_hide(&ticket, Err(PersistenceError::Rejected("nope".into())))
            .unwrap_err();
        assert!(matches!(err, EngineError::HideFailed(_)));
        assert_eq!(m.hidden_reason(42), None);
        assert_eq!(m.in_flight(), 0);
    }

    #[test]
    fn annotation_failure_keeps_draft() {
        let mut m = AnnotationManager::new();
        m.open_draft(1, "c_2b").text = "spray".into();
        let ticket = m.begin_annotation(1, "c_2b", "spray").unwrap();
        let err = m
            .finish_annotation(&ticket, Err(PersistenceError::Rejected("down".into())))
            .unwrap_err();
        assert!(matches!(err, EngineError::AnnotationSubmitFailed(_)));
        assert_eq!(m.draft().map(|d| d.text.as_str()), Some("spray"));
        assert!(m.annotations().is_empty());

        let ticket = m.begin_annotation(1, "c_2b", "spray").unwrap();
        m.finish_annotation(&ticket, Ok(())).unwrap();
        assert!(m.draft().is_none());
        assert_eq!(m.annotations_for_row(1).count(), 1);
    }

    #[test]
    fn same_row_different_metric_is_independent() {
        let mut m = AnnotationManager::new();
        let _a = m.begin_annotation(1, "c_2b", "x").unwrap();
        assert!(m.begin_annotation(1, "p_1", "y").is_ok());
        assert_eq!(m.begin_annotation(1, "c_2b", "z"), Err(EngineError::RequestInFlight));
    }

    #[test]
    fn stale_fetch_is_discarded() {
        let mut m = AnnotationManager::new();
        let ticket = m.begin_fetch(3);
        let err = m
            .accept_annotations(ticket, 4, vec![record("c_2b", 1, "late")])
            .unwrap_err();
        assert_eq!(err, EngineError::StaleGeneration { expected: 4, actual: 3 });
        assert!(m.annotations().is_empty());

        let ticket = m.begin_fetch(4);
        m.accept_annotations(ticket, 4, vec![record("c_2b", 1, "fresh")]).unwrap();
        assert_eq!(m.annotations().len(), 1);
    }

    #[test]
    fn reopening_draft_for_same_point_keeps_text() {
        let mut m = AnnotationManager::new();
        m.open_draft(1, "c_2b").text = "half typed".into();
        assert_eq!(m.open_draft(1, "c_2b").text, "half typed");
        assert_eq!(m.open_draft(2, "c_2b").text, "");
    }
}
