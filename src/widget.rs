//! Boundary between the engine and the chart widgets / surrounding UI.

use crate::color::Rgb;
use crate::engine::annotations::AnnotationMarker;
use crate::engine::projection::ProjectedRow;
use crate::engine::stats::HighlightBands;
use crate::engine::sync::EventSink;
use crate::engine::view::{DisplayMode, ViewKey};
use crate::metrics::{Direction, MetricDefinition};

/// Visible x-range of a chart, in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub start: f64,
    pub end: f64,
}

/// Events a chart widget reports. Positions index the rows of the widget's
/// latest [`ChartUpdate`]; `None` means "no point".
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WidgetEvent {
    ZoomChanged(TimeWindow),
    PointHovered(Option<usize>),
    PointClicked(Option<usize>),
}

/// Full redraw payload for one chart.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartUpdate {
    /// Generation the data was computed under.
    pub generation: u64,
    /// Display labels: time column, then one per series.
    pub columns: Vec<String>,
    /// Raw instrument of each series.
    pub instruments: Vec<String>,
    pub rows: Vec<ProjectedRow>,
    pub value_range: Option<[f64; 2]>,
    pub colors: Vec<Rgb>,
    pub bands: HighlightBands,
    pub direction: Direction,
}

/// A rendering widget owned by one view.
pub trait ChartWidget {
    fn update(&mut self, update: ChartUpdate);

    fn set_window(&mut self, window: Option<TimeWindow>);

    fn set_hovered(&mut self, position: Option<usize>);

    fn set_selected(&mut self, position: Option<usize>);

    fn set_annotations(&mut self, annotations: Vec<AnnotationMarker>);
}

/// Creates widgets for new views and switches the visible container.
pub trait ChartHost {
    fn attach(&mut self, key: &ViewKey, metric: &MetricDefinition, events: EventSink) -> Box<dyn ChartWidget>;

    fn show_mode(&mut self, _mode: DisplayMode) {}
}

/// Callbacks for the surrounding UI. All default to no-ops.
pub trait SessionObserver {
    fn on_filter_changed(&mut self) {}

    fn on_selection_changed(&mut self, _row_id: Option<i64>) {}

    fn on_hide_failed(&mut self, _message: &str) {}

    fn on_annotation_failed(&mut self, _message: &str) {}
}
