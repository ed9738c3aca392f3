use std::fmt;

use super::annotations::AnnotationMarker;
use super::projection::{project, Projection};
use super::stats::{bands_for, HighlightBands};
use crate::color::InstrumentPalette;
use crate::config::InstrumentsConfig;
use crate::data::model::DatasetProvider;
use crate::error::EngineError;
use crate::metrics::{Direction, MetricCatalog};
use crate::widget::{ChartUpdate, ChartWidget};

pub type ViewId = usize;

// ---------------------------------------------------------------------------
// DisplayMode / ViewKey
// ---------------------------------------------------------------------------

/// Which dashboard a view belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum DisplayMode {
    /// Only metrics flagged for the compact dashboard.
    #[default]
    Simple,
    /// Every metric in the catalog.
    Detailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewKey {
    pub mode: DisplayMode,
    pub metric_code: String,
}

impl ViewKey {
    pub fn new(mode: DisplayMode, metric_code: &str) -> Self {
        Self {
            mode,
            metric_code: metric_code.to_string(),
        }
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            DisplayMode::Simple => "simpleGraph",
            DisplayMode::Detailed => "graph",
        };
        write!(f, "{mode}-{}", self.metric_code)
    }
}

// ---------------------------------------------------------------------------
// RefreshContext – one filter snapshot shared by every view of a pass
// ---------------------------------------------------------------------------

pub struct RefreshContext<'a> {
    pub catalog: &'a MetricCatalog,
    pub dataset: &'a dyn DatasetProvider,
    pub instruments: &'a [String],
    pub eligible_rows: &'a [usize],
    pub palette: &'a InstrumentPalette,
    pub aliases: &'a InstrumentsConfig,
    pub generation: u64,
}

// ---------------------------------------------------------------------------
// View
// ---------------------------------------------------------------------------

/// One rendered metric chart.
pub struct View {
    pub key: ViewKey,
    pub projection: Projection,
    pub bands: HighlightBands,
    pub annotations: Vec<AnnotationMarker>,
    /// Generation of the current projection.
    pub generation: u64,
    widget: Box<dyn ChartWidget>,
}

impl View {
    pub fn new(key: ViewKey, widget: Box<dyn ChartWidget>) -> Self {
        let projection = Projection::empty(&key.metric_code, &[]);
        Self {
            key,
            projection,
            bands: HighlightBands::DISABLED,
            annotations: Vec::new(),
            generation: 0,
            widget,
        }
    }

    pub fn widget_mut(&mut self) -> &mut dyn ChartWidget {
        self.widget.as_mut()
    }

    /// Recompute projection and bands, then push them to the widget.
    ///
    /// On failure the widget still receives an empty, unbanded projection.
    pub fn refresh(&mut self, ctx: &RefreshContext<'_>) -> Result<(), EngineError> {
        let result = project(
            ctx.catalog,
            &self.key.metric_code,
            ctx.dataset,
            ctx.instruments,
            ctx.eligible_rows,
        );
        let outcome = match result {
            Ok(projection) => {
                self.bands = bands_for(&projection);
                self.projection = projection;
                Ok(())
            }
            Err(e) => {
                self.bands = HighlightBands::DISABLED;
                self.projection = Projection::empty(&self.key.metric_code, ctx.instruments);
                Err(e)
            }
        };
        self.generation = ctx.generation;
        self.push(ctx);
        outcome
    }

    fn push(&mut self, ctx: &RefreshContext<'_>) {
        let (value_range, direction) = match ctx.catalog.get(&self.key.metric_code) {
            Ok(metric) => (metric.range, metric.direction),
            Err(_) => (None, Direction::Unscored),
        };
        let columns = self
            .projection
            .columns()
            .into_iter()
            .enumerate()
            .map(|(i, c)| if i == 0 { c } else { ctx.aliases.display_name(&c).to_string() })
            .collect();
        let update = ChartUpdate {
            generation: self.generation,
            columns,
            instruments: self.projection.instruments.clone(),
            rows: self.projection.rows.clone(),
            value_range,
            colors: ctx.palette.colors_for(&self.projection.instruments),
            bands: self.bands,
            direction,
        };
        self.widget.update(update);
    }

    pub fn set_annotations(&mut self, annotations: Vec<AnnotationMarker>) {
        self.annotations = annotations.clone();
        self.widget.set_annotations(annotations);
    }
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("key", &self.key)
            .field("rows", &self.projection.rows.len())
            .field("bands", &self.bands)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ViewRegistry
// ---------------------------------------------------------------------------

/// All views created so far. Views are never removed; ids stay valid.
#[derive(Debug, Default)]
pub struct ViewRegistry {
    views: Vec<View>,
}

impl ViewRegistry {
    /// The id the next registered view will get.
    pub fn next_id(&self) -> ViewId {
        self.views.len()
    }

    pub fn register(&mut self, view: View) -> ViewId {
        self.views.push(view);
        self.views.len() - 1
    }

    pub fn get(&self, id: ViewId) -> Option<&View> {
        self.views.get(id)
    }

    pub fn get_mut(&mut self, id: ViewId) -> Option<&mut View> {
        self.views.get_mut(id)
    }

    pub fn find(&self, key: &ViewKey) -> Option<ViewId> {
        self.views.iter().position(|v| &v.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ViewId, &View)> {
        self.views.iter().enumerate()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ViewId, &mut View)> {
        self.views.iter_mut().enumerate()
    }

    /// Views of `metric_code`, in any mode.
    pub fn for_metric<'a>(&'a mut self, metric_code: &'a str) -> impl Iterator<Item = &'a mut View> + 'a {
        self.views.iter_mut().filter(move |v| v.key.metric_code == metric_code)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}
