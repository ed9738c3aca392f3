use std::path::Path;

use crate::color::InstrumentPalette;
use crate::config::Config;
use crate::data::export;
use crate::data::filter::FilterState;
use crate::data::model::{DatasetProvider, QcDataset, Row};
use crate::engine::annotations::{AnnotationManager, AnnotationTicket, FetchTicket, HideTicket, PendingKey};
use crate::engine::sync::{SyncCoordinator, SyncOutcome};
use crate::engine::view::{DisplayMode, RefreshContext, View, ViewId, ViewKey, ViewRegistry};
use crate::error::{EngineError, PersistenceError};
use crate::metrics::MetricCatalog;
use crate::persistence::{AnnotationRecord, AnnotationStore, HiddenMark};
use crate::widget::{ChartHost, SessionObserver, WidgetEvent};

// ---------------------------------------------------------------------------
// Reports handed back to the UI
// ---------------------------------------------------------------------------

/// What one `refresh_all` pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshReport {
    pub generation: u64,
    pub refreshed: usize,
    /// Views whose refresh aborted; they show an empty projection.
    pub failed: Vec<(ViewKey, EngineError)>,
}

/// A result file path split for display: directory, underscore tokens of
/// the file stem, extension.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PathTokens {
    pub directory: String,
    pub tokens: Vec<String>,
    pub extension: String,
}

impl PathTokens {
    pub fn parse(path: &str) -> Self {
        let (directory, file) = match path.rfind(['/', '\\']) {
            Some(i) => (&path[..=i], &path[i + 1..]),
            None => ("", path),
        };
        let (stem, extension) = match file.rfind('.') {
            Some(i) if i > 0 => (&file[..i], &file[i + 1..]),
            _ => (file, ""),
        };
        Self {
            directory: directory.to_string(),
            tokens: stem.split('_').map(str::to_string).collect(),
            extension: extension.to_string(),
        }
    }
}

/// Everything the UI shows about one highlighted row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowDetails {
    pub row_id: i64,
    pub start_time: i64,
    pub instrument: String,
    pub category: String,
    pub path: PathTokens,
    pub search_link: Option<String>,
    pub qa_link: Option<String>,
    pub hidden_reason: Option<String>,
    pub annotations: Vec<AnnotationRecord>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Eligibility for one refresh pass. The generation only advances once the
/// row set is known.
fn begin_pass<D: DatasetProvider + ?Sized>(
    filters: &FilterState,
    dataset: &D,
    sync: &mut SyncCoordinator,
) -> Result<(Vec<usize>, u64), EngineError> {
    let eligible = filters.eligible_rows(dataset)?;
    Ok((eligible, sync.advance_generation()))
}

/// The engine facade: one loaded dataset, its filters, every view and the
/// point-level metadata. Rendering code talks to the engine only through
/// this type.
pub struct Session {
    config: Config,
    catalog: MetricCatalog,
    dataset: QcDataset,
    filters: FilterState,
    palette: InstrumentPalette,
    /// Rows passing the filters, computed once per refresh.
    eligible_rows: Vec<usize>,
    registry: ViewRegistry,
    sync: SyncCoordinator,
    annotations: AnnotationManager,
    mode: DisplayMode,
    host: Box<dyn ChartHost>,
    observers: Vec<Box<dyn SessionObserver>>,
}

impl Session {
    pub fn new(config: Config, catalog: MetricCatalog, host: Box<dyn ChartHost>) -> Self {
        let filters = FilterState::new(config.filters.category_pools());
        Self {
            config,
            catalog,
            dataset: QcDataset::default(),
            filters,
            palette: InstrumentPalette::default(),
            eligible_rows: Vec::new(),
            registry: ViewRegistry::default(),
            sync: SyncCoordinator::new(),
            annotations: AnnotationManager::new(),
            mode: DisplayMode::default(),
            host,
            observers: Vec::new(),
        }
    }

    pub fn add_observer(&mut self, observer: Box<dyn SessionObserver>) {
        self.observers.push(observer);
    }

    fn notify(&mut self, mut f: impl FnMut(&mut dyn SessionObserver)) {
        for observer in &mut self.observers {
            f(observer.as_mut());
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &MetricCatalog {
        &self.catalog
    }

    pub fn dataset(&self) -> &QcDataset {
        &self.dataset
    }

    pub fn filters(&self) -> &FilterState {
        &self.filters
    }

    pub fn palette(&self) -> &InstrumentPalette {
        &self.palette
    }

    pub fn eligible_rows(&self) -> &[usize] {
        &self.eligible_rows
    }

    pub fn views(&self) -> &ViewRegistry {
        &self.registry
    }

    pub fn view(&self, key: &ViewKey) -> Option<&View> {
        self.registry.find(key).and_then(|id| self.registry.get(id))
    }

    pub fn sync(&self) -> &SyncCoordinator {
        &self.sync
    }

    pub fn annotations(&self) -> &AnnotationManager {
        &self.annotations
    }

    /// For editing the open annotation draft.
    pub fn annotations_mut(&mut self) -> &mut AnnotationManager {
        &mut self.annotations
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn generation(&self) -> u64 {
        self.sync.generation()
    }

    pub fn selected_row_id(&self) -> Option<i64> {
        self.row_id_at(self.sync.selected())
    }

    fn row_id_at(&self, index: Option<usize>) -> Option<i64> {
        index.and_then(|i| self.dataset.row(i)).map(|r| r.id)
    }

    // -- dataset & views ----------------------------------------------------

    /// Replace the dataset: reset filters to their defaults, forget points,
    /// create the current mode's views and refresh everything.
    pub fn load_dataset(&mut self, dataset: QcDataset) -> Result<RefreshReport, EngineError> {
        log::info!(
            "Loaded {} rows, {} instruments, {} categories",
            dataset.len(),
            dataset.instruments().len(),
            dataset.category_counts().len()
        );
        let mut filters = FilterState::for_dataset(&dataset, self.config.filters.category_pools(), &self.config.filters);
        for id in self.annotations.hidden_ids() {
            if dataset.index_of_id(id).is_some() {
                filters.mark_hidden(id);
            }
        }
        self.filters = filters;
        self.palette = InstrumentPalette::new(dataset.instruments());
        self.dataset = dataset;

        if self.sync.reset(&mut self.registry) {
            self.annotations.close_draft();
            self.notify(|o| o.on_selection_changed(None));
        }
        self.ensure_views(self.mode);
        let report = self.refresh_all()?;
        self.notify(|o| o.on_filter_changed());
        Ok(report)
    }

    /// Create the view for `(mode, metric_code)`, or return the existing one.
    pub fn create_view(&mut self, mode: DisplayMode, metric_code: &str) -> Result<ViewId, EngineError> {
        let key = ViewKey::new(mode, metric_code);
        if let Some(id) = self.registry.find(&key) {
            return Ok(id);
        }
        let metric = self.catalog.get(metric_code)?;
        let id = self.registry.next_id();
        let widget = self.host.attach(&key, metric, self.sync.sink(id));
        let mut view = View::new(key, widget);

        let instruments = self.filters.active_instruments();
        {
            let _guard = self.sync.enter();
            let ctx = RefreshContext {
                catalog: &self.catalog,
                dataset: &self.dataset,
                instruments: &instruments,
                eligible_rows: &self.eligible_rows,
                palette: &self.palette,
                aliases: &self.config.instruments,
                generation: self.sync.generation(),
            };
            if let Err(e) = view.refresh(&ctx) {
                log::warn!("view {} created without data: {e}", view.key);
            }
            view.set_annotations(self.annotations.overlay(&self.dataset, metric_code));

            let selected = self.sync.selected().and_then(|r| view.projection.position_of(r));
            let hovered = self.sync.hovered().and_then(|r| view.projection.position_of(r));
            let widget = view.widget_mut();
            widget.set_window(self.sync.window());
            widget.set_selected(selected);
            widget.set_hovered(hovered);
        }
        log::debug!("created view {} as #{id}", ViewKey::new(mode, metric_code));
        Ok(self.registry.register(view))
    }

    fn ensure_views(&mut self, mode: DisplayMode) {
        let codes: Vec<&'static str> = match mode {
            DisplayMode::Simple => self.catalog.simple().map(|m| m.code).collect(),
            DisplayMode::Detailed => self.catalog.iter().map(|m| m.code).collect(),
        };
        for code in codes {
            if let Err(e) = self.create_view(mode, code) {
                log::warn!("skipping view for {code}: {e}");
            }
        }
    }

    /// Switch dashboards. Views of the target mode are created on first use;
    /// no view is ever destroyed.
    pub fn set_mode(&mut self, mode: DisplayMode) {
        if mode == self.mode {
            return;
        }
        log::info!("Switching to {mode:?} view");
        self.mode = mode;
        if !self.dataset.is_empty() {
            self.ensure_views(mode);
        }
        self.host.show_mode(mode);
    }

    /// Recompute eligibility once and push the same row set to every view.
    ///
    /// A missing fixed column fails the whole pass; a failing metric only
    /// aborts its own view, which is listed in the report.
    pub fn refresh_all(&mut self) -> Result<RefreshReport, EngineError> {
        let (eligible_rows, generation) =
            begin_pass(&self.filters, &self.dataset, &mut self.sync).map_err(|e| {
                log::error!("refresh aborted: {e}");
                e
            })?;
        self.eligible_rows = eligible_rows;
        let instruments = self.filters.active_instruments();
        let mut report = RefreshReport {
            generation,
            ..Default::default()
        };

        {
            let _guard = self.sync.enter();
            let ctx = RefreshContext {
                catalog: &self.catalog,
                dataset: &self.dataset,
                instruments: &instruments,
                eligible_rows: &self.eligible_rows,
                palette: &self.palette,
                aliases: &self.config.instruments,
                generation,
            };
            for (_, view) in self.registry.iter_mut() {
                match view.refresh(&ctx) {
                    Ok(()) => report.refreshed += 1,
                    Err(e) => {
                        log::warn!("view {} not refreshed: {e}", view.key);
                        report.failed.push((view.key.clone(), e));
                    }
                }
                let overlay = self.annotations.overlay(&self.dataset, &view.key.metric_code);
                view.set_annotations(overlay);
            }
        }

        let eligible = &self.eligible_rows;
        let dropped = self
            .sync
            .resync(&mut self.registry, |row| eligible.binary_search(&row).is_ok());
        if dropped {
            self.annotations.close_draft();
            self.notify(|o| o.on_selection_changed(None));
        }
        log::debug!(
            "generation {generation}: {} eligible rows, {} views refreshed",
            self.eligible_rows.len(),
            report.refreshed
        );
        Ok(report)
    }

    fn refresh_overlays(&mut self, metric_code: Option<&str>) {
        for (_, view) in self.registry.iter_mut() {
            if metric_code.is_some_and(|code| code != view.key.metric_code) {
                continue;
            }
            let overlay = self.annotations.overlay(&self.dataset, &view.key.metric_code);
            view.set_annotations(overlay);
        }
    }

    // -- filters ------------------------------------------------------------

    pub fn select_category(&mut self, category: &str) -> Result<RefreshReport, EngineError> {
        if self.filters.selected_category() == Some(category) {
            return Ok(RefreshReport {
                generation: self.generation(),
                ..Default::default()
            });
        }
        log::debug!("category → {category}");
        self.filters.select_category(category);
        let report = self.refresh_all()?;
        self.notify(|o| o.on_filter_changed());
        Ok(report)
    }

    pub fn toggle_instrument(&mut self, instrument: &str) -> Result<RefreshReport, EngineError> {
        if !self.filters.knows_instrument(instrument) {
            log::debug!("ignoring toggle of unknown instrument {instrument}");
            return Ok(RefreshReport {
                generation: self.generation(),
                ..Default::default()
            });
        }
        let active = self.filters.toggle_instrument(instrument);
        log::debug!("instrument {instrument} {}", if active { "on" } else { "off" });
        let report = self.refresh_all()?;
        self.notify(|o| o.on_filter_changed());
        Ok(report)
    }

    // -- widget events ------------------------------------------------------

    /// Relay one widget event. A click also opens the annotation draft for
    /// the clicked point.
    pub fn handle_event(&mut self, origin: ViewId, event: WidgetEvent) -> SyncOutcome {
        let outcome = self.sync.dispatch(origin, event, &mut self.registry);
        if let Some(selection) = outcome.selection_changed {
            let row_id = self.row_id_at(selection);
            match (row_id, self.registry.get(origin)) {
                (Some(id), Some(view)) => {
                    let metric = view.key.metric_code.clone();
                    self.annotations.open_draft(id, &metric);
                }
                _ => {
                    self.annotations.close_draft();
                }
            }
            self.notify(|o| o.on_selection_changed(row_id));
        }
        outcome
    }

    /// Drain the events widgets queued since the last call. Events queued
    /// under an older generation are discarded.
    pub fn pump_events(&mut self) -> usize {
        let mut handled = 0;
        while let Some(queued) = self.sync.next_event() {
            let current = self.sync.generation();
            if queued.generation != current {
                let stale = EngineError::StaleGeneration {
                    expected: current,
                    actual: queued.generation,
                };
                log::debug!("dropping {:?} from view {}: {stale}", queued.event, queued.origin);
                continue;
            }
            if self.handle_event(queued.origin, queued.event).accepted {
                handled += 1;
            }
        }
        handled
    }

    /// Deselect everywhere. Calling it with nothing selected does nothing.
    pub fn clear_selection(&mut self) -> bool {
        if !self.sync.clear_selection(&mut self.registry) {
            return false;
        }
        self.annotations.close_draft();
        self.notify(|o| o.on_selection_changed(None));
        true
    }

    /// Details of the selected row, or of the hovered one when nothing is
    /// selected.
    pub fn highlighted_row(&self) -> Option<RowDetails> {
        let index = self.sync.selected().or(self.sync.hovered())?;
        self.dataset.row(index).map(|row| self.details(row))
    }

    pub fn selection_details(&self) -> Option<RowDetails> {
        let index = self.sync.selected()?;
        self.dataset.row(index).map(|row| self.details(row))
    }

    fn details(&self, row: &Row) -> RowDetails {
        let links = &self.config.links;
        RowDetails {
            row_id: row.id,
            start_time: row.start_time,
            instrument: row.instrument.clone(),
            category: row.category.clone(),
            path: PathTokens::parse(&row.path),
            search_link: row.transaction.map(|t| links.search_link(t)),
            qa_link: row.transaction.map(|t| links.qa_link(t)),
            hidden_reason: self.annotations.hidden_reason(row.id).map(str::to_string),
            annotations: self.annotations.annotations_for_row(row.id).cloned().collect(),
        }
    }

    // -- hide ---------------------------------------------------------------

    pub fn is_busy(&self, key: &PendingKey) -> bool {
        self.annotations.is_busy(key)
    }

    /// Claim the hide control for `row_id`. The request itself is sent by the
    /// caller; its result goes to [`Session::complete_hide`].
    pub fn begin_hide(&mut self, row_id: i64, reason: &str) -> Result<HideTicket, EngineError> {
        if self.dataset.index_of_id(row_id).is_none() {
            return Err(EngineError::RowNotFound(row_id));
        }
        self.annotations.begin_hide(row_id, reason)
    }

    /// On success the row leaves every view and the selection is cleared.
    /// On failure nothing changes and observers hear about it.
    pub fn complete_hide(&mut self, ticket: HideTicket, result: Result<(), PersistenceError>) -> Result<(), EngineError> {
        if let Err(e) = self.annotations.finish_hide(&ticket, result) {
            log::warn!("hiding result {} failed: {e}", ticket.row_id);
            let message = e.to_string();
            self.notify(|o| o.on_hide_failed(&message));
            return Err(e);
        }
        log::info!("Hid result {} ({})", ticket.row_id, ticket.reason);
        self.filters.mark_hidden(ticket.row_id);
        self.clear_selection();
        self.refresh_all()?;
        self.notify(|o| o.on_filter_changed());
        Ok(())
    }

    pub fn hide_point(&mut self, store: &dyn AnnotationStore, row_id: i64, reason: &str) -> Result<(), EngineError> {
        let ticket = self.begin_hide(row_id, reason)?;
        let result = store.hide(ticket.row_id, &ticket.reason);
        self.complete_hide(ticket, result)
    }

    // -- annotate -----------------------------------------------------------

    pub fn begin_annotation(&mut self, row_id: i64, metric_code: &str, text: &str) -> Result<AnnotationTicket, EngineError> {
        self.catalog.get(metric_code)?;
        if self.dataset.index_of_id(row_id).is_none() {
            return Err(EngineError::RowNotFound(row_id));
        }
        match self.annotations.begin_annotation(row_id, metric_code, text) {
            Err(EngineError::AnnotationSubmitFailed(message)) => {
                self.notify(|o| o.on_annotation_failed(&message));
                Err(EngineError::AnnotationSubmitFailed(message))
            }
            other => other,
        }
    }

    /// Claim the control for the open draft.
    pub fn begin_draft_annotation(&mut self) -> Result<Option<AnnotationTicket>, EngineError> {
        let Some(draft) = self.annotations.draft().cloned() else {
            return Ok(None);
        };
        self.begin_annotation(draft.row_id, &draft.metric_code, &draft.text).map(Some)
    }

    /// On success the overlay of the metric's views is rebuilt and the draft
    /// closes; on failure the draft stays open for a retry.
    pub fn complete_annotation(
        &mut self,
        ticket: AnnotationTicket,
        result: Result<(), PersistenceError>,
    ) -> Result<(), EngineError> {
        if let Err(e) = self.annotations.finish_annotation(&ticket, result) {
            log::warn!(
                "annotating result {} / {} failed: {e}",
                ticket.annotation.result_id,
                ticket.annotation.metric_code
            );
            let message = e.to_string();
            self.notify(|o| o.on_annotation_failed(&message));
            return Err(e);
        }
        log::info!(
            "Annotated result {} for {}",
            ticket.annotation.result_id,
            ticket.annotation.metric_code
        );
        self.refresh_overlays(Some(&ticket.annotation.metric_code));
        Ok(())
    }

    pub fn submit_annotation(
        &mut self,
        store: &dyn AnnotationStore,
        row_id: i64,
        metric_code: &str,
        text: &str,
    ) -> Result<(), EngineError> {
        let ticket = self.begin_annotation(row_id, metric_code, text)?;
        let result = store.add_annotation(&ticket.annotation);
        self.complete_annotation(ticket, result)
    }

    // -- fetch --------------------------------------------------------------

    /// Tag a list fetch with the current generation.
    pub fn begin_fetch(&self) -> FetchTicket {
        self.annotations.begin_fetch(self.sync.generation())
    }

    /// Fails with `StaleGeneration` when the filters or dataset changed
    /// since the fetch started; the result is then dropped.
    pub fn complete_annotation_fetch(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<AnnotationRecord>, PersistenceError>,
    ) -> Result<(), EngineError> {
        let records = result.map_err(|e| {
            log::warn!("annotation list unavailable: {e}");
            EngineError::AnnotationFetchFailed(e.to_string())
        })?;
        if let Err(e) = self
            .annotations
            .accept_annotations(ticket, self.sync.generation(), records)
        {
            log::debug!("annotation list dropped: {e}");
            return Err(e);
        }
        self.refresh_overlays(None);
        Ok(())
    }

    /// Cache hidden marks; marks on loaded rows not hidden yet are hidden
    /// and trigger a refresh.
    pub fn complete_hidden_fetch(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<HiddenMark>, PersistenceError>,
    ) -> Result<(), EngineError> {
        let marks = result.map_err(|e| {
            log::warn!("hidden list unavailable: {e}");
            EngineError::AnnotationFetchFailed(e.to_string())
        })?;
        if let Err(e) = self.annotations.accept_hidden(ticket, self.sync.generation(), marks) {
            log::debug!("hidden list dropped: {e}");
            return Err(e);
        }
        let newly_hidden: Vec<i64> = self
            .annotations
            .hidden_ids()
            .filter(|id| !self.filters.hidden_row_ids().contains(id) && self.dataset.index_of_id(*id).is_some())
            .collect();
        if newly_hidden.is_empty() {
            return Ok(());
        }
        for id in newly_hidden {
            self.filters.mark_hidden(id);
        }
        self.refresh_all()?;
        self.notify(|o| o.on_filter_changed());
        Ok(())
    }

    /// Fetch both lists from `store` in one go.
    pub fn reload_annotations(&mut self, store: &dyn AnnotationStore) -> Result<(), EngineError> {
        let ticket = self.begin_fetch();
        self.complete_hidden_fetch(ticket, store.list_hidden())?;
        let ticket = self.begin_fetch();
        self.complete_annotation_fetch(ticket, store.list_annotations())
    }

    // -- export -------------------------------------------------------------

    /// Write the currently eligible rows as CSV.
    pub fn export_csv(&self, path: &Path) -> anyhow::Result<usize> {
        export::write_csv_file(path, &self.dataset, &self.eligible_rows, &self.catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::CellValue;

    #[test]
    fn path_splits_into_directory_tokens_and_extension() {
        let tokens = PathTokens::parse("/data/qc/QE1/2024_05_yeast_a.RAW");
        assert_eq!(tokens.directory, "/data/qc/QE1/");
        assert_eq!(tokens.tokens, vec!["2024", "05", "yeast", "a"]);
        assert_eq!(tokens.extension, "RAW");
    }

    /// A table without a category column.
    struct NoCategory;

    impl DatasetProvider for NoCategory {
        fn row_count(&self) -> usize {
            1
        }

        fn column_index(&self, name: &str) -> Result<usize, EngineError> {
            Err(EngineError::ColumnNotFound(name.to_string()))
        }

        fn value(&self, _row: usize, _column: usize) -> CellValue<'_> {
            CellValue::Null
        }
    }

    #[test]
    fn failed_pass_keeps_the_generation() {
        let mut sync = SyncCoordinator::new();
        let mut filters = FilterState::default();
        filters.select_category("yeast");

        let err = begin_pass(&filters, &NoCategory, &mut sync).unwrap_err();
        assert!(matches!(err, EngineError::ColumnNotFound(_)));
        assert_eq!(sync.generation(), 0);

        let (rows, generation) = begin_pass(&filters, &QcDataset::default(), &mut sync).unwrap();
        assert!(rows.is_empty());
        assert_eq!(generation, 1);
        assert_eq!(sync.generation(), 1);
    }

    #[test]
    fn bare_file_name_has_no_directory() {
        let tokens = PathTokens::parse("run.d");
        assert_eq!(tokens.directory, "");
        assert_eq!(tokens.tokens, vec!["run"]);
        assert_eq!(tokens.extension, "d");
    }
}
