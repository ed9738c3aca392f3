use std::cell::RefCell;
use std::ops::RangeInclusive;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use eframe::egui::{self, Align2, Color32, RichText, Stroke, Ui};
use egui_plot::{GridMark, Legend, Line, Plot, PlotBounds, PlotPoint, PlotPoints, PlotUi, Points, Polygon, Text, VLine};

use qc_trends::color::Rgb;
use qc_trends::engine::annotations::AnnotationMarker;
use qc_trends::engine::sync::EventSink;
use qc_trends::engine::view::{DisplayMode, ViewKey};
use qc_trends::metrics::{MetricDefinition, MetricGroup};
use qc_trends::widget::{ChartHost, ChartUpdate, ChartWidget, TimeWindow, WidgetEvent};

/// Pointer distance (screen points) within which a data point counts as hovered.
const HOVER_RADIUS: f32 = 10.0;
const CHART_HEIGHT: f32 = 170.0;

const NORMAL_BAND: Color32 = Color32::from_rgba_premultiplied(40, 90, 40, 40);
const WARN_BAND: Color32 = Color32::from_rgba_premultiplied(110, 80, 20, 40);

fn color32(c: Rgb) -> Color32 {
    Color32::from_rgb(c.red, c.green, c.blue)
}

fn format_day(mark: GridMark, _range: &RangeInclusive<f64>) -> String {
    DateTime::<Utc>::from_timestamp_millis(mark.value as i64)
        .map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Chart state shared between the engine's handle and the painter
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ChartState {
    data: Option<ChartUpdate>,
    /// Window pushed by the coordinator, applied on the next frame.
    /// `Some(None)` means "back to automatic bounds".
    window_request: Option<Option<TimeWindow>>,
    /// Last x-range drawn, to notice user zoom / pan.
    last_x: Option<(f64, f64)>,
    hovered: Option<usize>,
    /// Whether `hovered` came from the pointer over this chart.
    hover_is_local: bool,
    selected: Option<usize>,
    annotations: Vec<AnnotationMarker>,
}

type SharedChart = Rc<RefCell<ChartState>>;

/// The engine-side handle of one egui chart.
struct EguiChart {
    state: SharedChart,
}

impl ChartWidget for EguiChart {
    fn update(&mut self, update: ChartUpdate) {
        self.state.borrow_mut().data = Some(update);
    }

    fn set_window(&mut self, window: Option<TimeWindow>) {
        self.state.borrow_mut().window_request = Some(window);
    }

    fn set_hovered(&mut self, position: Option<usize>) {
        let mut state = self.state.borrow_mut();
        state.hovered = position;
        state.hover_is_local = false;
    }

    fn set_selected(&mut self, position: Option<usize>) {
        self.state.borrow_mut().selected = position;
    }

    fn set_annotations(&mut self, annotations: Vec<AnnotationMarker>) {
        self.state.borrow_mut().annotations = annotations;
    }
}

// ---------------------------------------------------------------------------
// ChartBoard – every chart created so far, in creation order
// ---------------------------------------------------------------------------

struct ChartEntry {
    key: ViewKey,
    metric: MetricDefinition,
    state: SharedChart,
    events: EventSink,
}

#[derive(Default)]
pub struct ChartBoard {
    entries: Vec<ChartEntry>,
    mode: DisplayMode,
}

impl ChartBoard {
    pub fn shared() -> Rc<RefCell<ChartBoard>> {
        Rc::new(RefCell::new(ChartBoard::default()))
    }

    /// Render the charts of the visible dashboard, grouped by metric group.
    pub fn show(&self, ui: &mut Ui) {
        let mut visible = self.entries.iter().filter(|e| e.key.mode == self.mode).peekable();
        if visible.peek().is_none() {
            ui.centered_and_justified(|ui: &mut Ui| {
                ui.heading("Open a file to view QC trends  (File → Open…)");
            });
            return;
        }

        egui::ScrollArea::vertical()
            .auto_shrink([false, false])
            .show(ui, |ui: &mut Ui| {
                let mut group: Option<MetricGroup> = None;
                for entry in visible {
                    let g = entry.metric.group();
                    if group != Some(g) {
                        group = Some(g);
                        ui.add_space(6.0);
                        ui.heading(g.title());
                        ui.separator();
                    }
                    metric_chart(ui, entry);
                }
            });
    }
}

/// The `ChartHost` the session attaches widgets through.
pub struct BoardHost(pub Rc<RefCell<ChartBoard>>);

impl ChartHost for BoardHost {
    fn attach(&mut self, key: &ViewKey, metric: &MetricDefinition, events: EventSink) -> Box<dyn ChartWidget> {
        let state = SharedChart::default();
        self.0.borrow_mut().entries.push(ChartEntry {
            key: key.clone(),
            metric: metric.clone(),
            state: Rc::clone(&state),
            events,
        });
        Box::new(EguiChart { state })
    }

    fn show_mode(&mut self, mode: DisplayMode) {
        self.0.borrow_mut().mode = mode;
    }
}

// ---------------------------------------------------------------------------
// One metric chart
// ---------------------------------------------------------------------------

fn metric_chart(ui: &mut Ui, entry: &ChartEntry) {
    let metric = &entry.metric;
    ui.horizontal(|ui: &mut Ui| {
        ui.label(RichText::new(format!("{}  {}", metric.label, metric.name)).strong())
            .on_hover_text(metric.description);
        if let Some(link) = metric.help_link {
            ui.hyperlink_to("?", link);
        }
    });

    let mut state = entry.state.borrow_mut();
    let Some(data) = state.data.clone() else {
        ui.label("No data");
        return;
    };

    let mut plot = Plot::new(entry.key.to_string())
        .height(CHART_HEIGHT)
        .legend(Legend::default())
        .x_axis_formatter(format_day)
        .allow_boxed_zoom(true)
        .allow_drag(true)
        .allow_scroll(true)
        .allow_zoom(true);
    if let Some([lo, hi]) = data.value_range {
        plot = plot.include_y(lo).include_y(hi);
    }

    let window_request = state.window_request.take();
    let selected = state.selected;
    let hovered = state.hovered;
    let annotations = state.annotations.clone();

    let response = plot.show(ui, |plot_ui: &mut PlotUi| {
        match window_request {
            Some(Some(window)) => {
                let bounds = plot_ui.plot_bounds();
                plot_ui.set_plot_bounds(PlotBounds::from_min_max(
                    [window.start, bounds.min()[1]],
                    [window.end, bounds.max()[1]],
                ));
            }
            Some(None) => plot_ui.set_auto_bounds(true),
            None => {}
        }
        draw_bands(plot_ui, &data);
        draw_series(plot_ui, &data, hovered, selected);
        draw_annotations(plot_ui, &data, &annotations);
        nearest_point(plot_ui, &data)
    });

    // -- report user interaction --
    let bounds = response.transform.bounds();
    let x = (bounds.min()[0], bounds.max()[0]);
    let user_moved = response.response.dragged()
        || response.response.double_clicked()
        || (response.response.hovered() && ui.input(|i| i.zoom_delta() != 1.0 || i.smooth_scroll_delta != egui::Vec2::ZERO));
    if window_request.is_none() && user_moved && state.last_x != Some(x) {
        entry.events.emit(WidgetEvent::ZoomChanged(TimeWindow { start: x.0, end: x.1 }));
    }
    state.last_x = Some(x);

    let over = response.inner;
    if (response.response.hovered() || state.hover_is_local) && over != state.hovered {
        state.hovered = over;
        state.hover_is_local = over.is_some();
        entry.events.emit(WidgetEvent::PointHovered(over));
    }

    if response.response.clicked() {
        state.selected = if over.is_some() && over == state.selected { None } else { over };
        entry.events.emit(WidgetEvent::PointClicked(over));
    }
}

/// The single value a projected row carries, with its series.
fn point_of(data: &ChartUpdate, position: usize) -> Option<(usize, [f64; 2])> {
    let row = data.rows.get(position)?;
    row.values
        .iter()
        .enumerate()
        .find_map(|(s, v)| v.map(|v| (s, [row.timestamp as f64, v])))
}

fn time_extent(data: &ChartUpdate) -> Option<(f64, f64)> {
    let first = data.rows.first()?.timestamp as f64;
    let last = data.rows.last()?.timestamp as f64;
    Some((first, last))
}

fn band(x: (f64, f64), lo: f64, hi: f64) -> Vec<[f64; 2]> {
    vec![[x.0, lo], [x.1, lo], [x.1, hi], [x.0, hi]]
}

fn draw_bands(plot_ui: &mut PlotUi, data: &ChartUpdate) {
    let b = data.bands;
    let Some(x) = time_extent(data).filter(|_| b.is_enabled()) else {
        return;
    };
    plot_ui.polygon(
        Polygon::new(band(x, b.low, b.high))
            .fill_color(NORMAL_BAND)
            .stroke(Stroke::NONE),
    );
    if data.direction.shades_above() {
        plot_ui.polygon(
            Polygon::new(band(x, b.high, b.high2))
                .fill_color(WARN_BAND)
                .stroke(Stroke::NONE),
        );
    }
    if data.direction.shades_below() {
        plot_ui.polygon(
            Polygon::new(band(x, b.low2, b.low))
                .fill_color(WARN_BAND)
                .stroke(Stroke::NONE),
        );
    }
}

fn draw_series(plot_ui: &mut PlotUi, data: &ChartUpdate, hovered: Option<usize>, selected: Option<usize>) {
    for (s, instrument) in data.instruments.iter().enumerate() {
        let color = data.colors.get(s).copied().map_or(Color32::LIGHT_BLUE, color32);
        let name = data.columns.get(s + 1).map_or(instrument.as_str(), String::as_str);
        let points: Vec<[f64; 2]> = data
            .rows
            .iter()
            .filter_map(|r| r.values.get(s).copied().flatten().map(|v| [r.timestamp as f64, v]))
            .collect();
        plot_ui.line(Line::new(PlotPoints::from(points.clone())).color(color).width(1.0).name(name));
        plot_ui.points(Points::new(PlotPoints::from(points)).color(color).radius(2.0).name(name));
    }

    if let Some((s, p)) = hovered.and_then(|h| point_of(data, h)) {
        let color = data.colors.get(s).copied().map_or(Color32::WHITE, color32);
        plot_ui.points(Points::new(PlotPoints::from(vec![p])).color(color).radius(5.0));
    }
    if let Some((_, p)) = selected.and_then(|i| point_of(data, i)) {
        plot_ui.vline(VLine::new(p[0]).color(Color32::RED).width(1.0));
        plot_ui.points(
            Points::new(PlotPoints::from(vec![p]))
                .color(Color32::RED)
                .radius(6.0)
                .filled(false),
        );
    }
}

fn draw_annotations(plot_ui: &mut PlotUi, data: &ChartUpdate, annotations: &[AnnotationMarker]) {
    for marker in annotations {
        let Some(s) = data.instruments.iter().position(|i| *i == marker.instrument) else {
            continue;
        };
        let y = data
            .rows
            .iter()
            .find(|r| r.timestamp == marker.timestamp)
            .and_then(|r| r.values.get(s).copied().flatten());
        if let Some(y) = y {
            plot_ui.text(
                Text::new(PlotPoint::new(marker.timestamp as f64, y), RichText::new(&marker.short_text).strong())
                    .anchor(Align2::CENTER_BOTTOM)
                    .color(Color32::YELLOW),
            );
        }
    }
}

/// Position of the data point under the pointer, if any.
fn nearest_point(plot_ui: &PlotUi, data: &ChartUpdate) -> Option<usize> {
    if !plot_ui.response().hovered() {
        return None;
    }
    let pointer = plot_ui.screen_from_plot(plot_ui.pointer_coordinate()?);
    (0..data.rows.len())
        .filter_map(|i| {
            let (_, p) = point_of(data, i)?;
            let d = plot_ui.screen_from_plot(PlotPoint::new(p[0], p[1])).distance(pointer);
            (d <= HOVER_RADIUS).then_some((i, d))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}
