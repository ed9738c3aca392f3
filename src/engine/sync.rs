use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use super::view::{ViewId, ViewRegistry};
use crate::widget::{TimeWindow, WidgetEvent};

// ---------------------------------------------------------------------------
// Phase / generation shared with every widget's sink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Propagating,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueuedEvent {
    pub origin: ViewId,
    pub generation: u64,
    pub event: WidgetEvent,
}

#[derive(Debug, Default)]
struct Shared {
    phase: Cell<Phase>,
    generation: Cell<u64>,
    queue: RefCell<VecDeque<QueuedEvent>>,
}

/// Handle a widget uses to report events. Events are only accepted while the
/// coordinator is idle; anything fired during a propagation is dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    origin: ViewId,
    shared: Rc<Shared>,
}

impl EventSink {
    /// Queue an event. Returns `false` when it was rejected.
    pub fn emit(&self, event: WidgetEvent) -> bool {
        if self.shared.phase.get() == Phase::Propagating {
            log::debug!("view {} fired {:?} during propagation, dropped", self.origin, event);
            return false;
        }
        self.shared.queue.borrow_mut().push_back(QueuedEvent {
            origin: self.origin,
            generation: self.shared.generation.get(),
            event,
        });
        true
    }

    pub fn origin(&self) -> ViewId {
        self.origin
    }
}

/// Holds the coordinator in `Propagating` until dropped.
#[must_use]
pub struct PropagationGuard {
    shared: Rc<Shared>,
}

impl Drop for PropagationGuard {
    fn drop(&mut self) {
        self.shared.phase.set(Phase::Idle);
    }
}

// ---------------------------------------------------------------------------
// Outcome of one dispatch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SyncOutcome {
    /// `false` when the event was refused (re-entrant, stale or unknown origin).
    pub accepted: bool,
    /// Number of widgets that received an option update.
    pub updated: usize,
    /// New selection (dataset row) when it changed.
    pub selection_changed: Option<Option<usize>>,
}

impl SyncOutcome {
    fn rejected() -> Self {
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// SyncCoordinator
// ---------------------------------------------------------------------------

/// Relays zoom / hover / selection between views without feedback loops.
///
/// Owns the process-wide selected and hovered rows (dataset indices) and the
/// generation counter that tags every filter / load state.
#[derive(Debug, Default)]
pub struct SyncCoordinator {
    shared: Rc<Shared>,
    window: Option<TimeWindow>,
    selected: Option<usize>,
    hovered: Option<usize>,
}

impl SyncCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sink(&self, origin: ViewId) -> EventSink {
        EventSink {
            origin,
            shared: Rc::clone(&self.shared),
        }
    }

    pub fn phase(&self) -> Phase {
        self.shared.phase.get()
    }

    pub fn generation(&self) -> u64 {
        self.shared.generation.get()
    }

    /// Start a new generation; queued events from older ones become stale.
    pub fn advance_generation(&mut self) -> u64 {
        let next = self.shared.generation.get() + 1;
        self.shared.generation.set(next);
        next
    }

    /// Enter `Propagating`, or `None` if a propagation is already running.
    pub fn enter(&self) -> Option<PropagationGuard> {
        if self.shared.phase.get() == Phase::Propagating {
            return None;
        }
        self.shared.phase.set(Phase::Propagating);
        Some(PropagationGuard {
            shared: Rc::clone(&self.shared),
        })
    }

    pub fn next_event(&self) -> Option<QueuedEvent> {
        self.shared.queue.borrow_mut().pop_front()
    }

    pub fn pending_events(&self) -> usize {
        self.shared.queue.borrow().len()
    }

    pub fn window(&self) -> Option<TimeWindow> {
        self.window
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn hovered(&self) -> Option<usize> {
        self.hovered
    }

    /// Apply one widget event to every view except its origin.
    pub fn dispatch(&mut self, origin: ViewId, event: WidgetEvent, views: &mut ViewRegistry) -> SyncOutcome {
        let Some(_guard) = self.enter() else {
            log::debug!("dropping {:?} from view {}: already propagating", event, origin);
            return SyncOutcome::rejected();
        };
        let Some(origin_view) = views.get(origin) else {
            log::warn!("event {:?} from unregistered view {}", event, origin);
            return SyncOutcome::rejected();
        };
        let row = match event {
            WidgetEvent::PointHovered(p) | WidgetEvent::PointClicked(p) => {
                p.and_then(|p| origin_view.projection.rows.get(p).map(|r| r.row))
            }
            WidgetEvent::ZoomChanged(_) => None,
        };

        let mut outcome = SyncOutcome {
            accepted: true,
            ..Default::default()
        };
        match event {
            WidgetEvent::ZoomChanged(window) => self.window = Some(window),
            WidgetEvent::PointHovered(_) => {
                if row == self.hovered {
                    return outcome;
                }
                self.hovered = row;
            }
            WidgetEvent::PointClicked(_) => {
                // Clicking the selected point again releases it.
                let next = if row.is_some() && row == self.selected { None } else { row };
                if next == self.selected {
                    return outcome;
                }
                self.selected = next;
                outcome.selection_changed = Some(next);
            }
        }

        for (id, view) in views.iter_mut() {
            if id == origin {
                continue;
            }
            match event {
                WidgetEvent::ZoomChanged(window) => view.widget_mut().set_window(Some(window)),
                WidgetEvent::PointHovered(_) => {
                    let position = self.hovered.and_then(|r| view.projection.position_of(r));
                    view.widget_mut().set_hovered(position);
                }
                WidgetEvent::PointClicked(_) => {
                    let position = self.selected.and_then(|r| view.projection.position_of(r));
                    view.widget_mut().set_selected(position);
                }
            }
            outcome.updated += 1;
        }
        log::trace!("{:?} from view {} reached {} views", event, origin, outcome.updated);
        outcome
    }

    /// Clear the selection everywhere. Returns whether anything changed.
    pub fn clear_selection(&mut self, views: &mut ViewRegistry) -> bool {
        if self.selected.is_none() {
            return false;
        }
        let _guard = self.enter();
        self.selected = None;
        for (_, view) in views.iter_mut() {
            view.widget_mut().set_selected(None);
        }
        true
    }

    /// Forget window, selection and hover, e.g. when a new dataset replaces
    /// the rows they point at. Returns whether the selection changed.
    pub fn reset(&mut self, views: &mut ViewRegistry) -> bool {
        let had_selection = self.selected.is_some();
        let _guard = self.enter();
        self.window = None;
        self.selected = None;
        self.hovered = None;
        for (_, view) in views.iter_mut() {
            let widget = view.widget_mut();
            widget.set_window(None);
            widget.set_selected(None);
            widget.set_hovered(None);
        }
        had_selection
    }

    /// Re-apply the shared window, hover and selection after the views got
    /// new projections. Points on rows failing `keep` are dropped first.
    /// Returns whether the selection was dropped.
    pub fn resync(&mut self, views: &mut ViewRegistry, keep: impl Fn(usize) -> bool) -> bool {
        let _guard = self.enter();
        let dropped = self.selected.is_some_and(|r| !keep(r));
        if dropped {
            self.selected = None;
        }
        if self.hovered.is_some_and(|r| !keep(r)) {
            self.hovered = None;
        }
        for (_, view) in views.iter_mut() {
            let selected = self.selected.and_then(|r| view.projection.position_of(r));
            let hovered = self.hovered.and_then(|r| view.projection.position_of(r));
            let widget = view.widget_mut();
            widget.set_window(self.window);
            widget.set_hovered(hovered);
            widget.set_selected(selected);
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::annotations::AnnotationMarker;
    use crate::engine::projection::{ProjectedRow, Projection};
    use crate::engine::view::{DisplayMode, View, ViewKey};
    use crate::widget::{ChartUpdate, ChartWidget};

    type Calls = Rc<RefCell<Vec<String>>>;

    /// Records every push and re-fires zoom changes like a chart library.
    struct Recorder {
        calls: Calls,
        sink: EventSink,
    }

    impl ChartWidget for Recorder {
        fn update(&mut self, _update: ChartUpdate) {}

        fn set_window(&mut self, window: Option<TimeWindow>) {
            self.calls.borrow_mut().push(format!("window {window:?}"));
            if let Some(w) = window {
                self.sink.emit(WidgetEvent::ZoomChanged(w));
            }
        }

        fn set_hovered(&mut self, position: Option<usize>) {
            self.calls.borrow_mut().push(format!("hover {position:?}"));
        }

        fn set_selected(&mut self, position: Option<usize>) {
            self.calls.borrow_mut().push(format!("select {position:?}"));
        }

        fn set_annotations(&mut self, _annotations: Vec<AnnotationMarker>) {}
    }

    /// `rows` are the dataset rows each view shows.
    fn setup(rows: &[&[usize]]) -> (SyncCoordinator, ViewRegistry, Vec<Calls>) {
        let sync = SyncCoordinator::new();
        let mut views = ViewRegistry::default();
        let mut calls = Vec::new();
        for (i, shown) in rows.iter().enumerate() {
            let log = Calls::default();
            let widget = Recorder {
                calls: Rc::clone(&log),
                sink: sync.sink(views.next_id()),
            };
            let mut view = View::new(ViewKey::new(DisplayMode::Simple, &format!("m{i}")), Box::new(widget));
            view.projection = Projection {
                metric_code: format!("m{i}"),
                instruments: vec!["QE1".into()],
                rows: shown
                    .iter()
                    .map(|&row| ProjectedRow {
                        row,
                        timestamp: row as i64 * 1000,
                        values: vec![Some(1.0)],
                    })
                    .collect(),
            };
            views.register(view);
            calls.push(log);
        }
        (sync, views, calls)
    }

    const WINDOW: TimeWindow = TimeWindow { start: 0.0, end: 5000.0 };

    #[test]
    fn zoom_skips_origin_and_swallows_echoes() {
        let (mut sync, mut views, calls) = setup(&[&[0, 1], &[0, 1], &[0, 1]]);
        let outcome = sync.dispatch(1, WidgetEvent::ZoomChanged(WINDOW), &mut views);

        assert!(outcome.accepted);
        assert_eq!(outcome.updated, 2);
        assert!(calls[1].borrow().is_empty());
        assert_eq!(calls[0].borrow().len(), 1);
        assert_eq!(calls[2].borrow().len(), 1);
        assert_eq!(sync.pending_events(), 0);
        assert_eq!(sync.phase(), Phase::Idle);
    }

    #[test]
    fn sink_rejects_events_while_propagating() {
        let sync = SyncCoordinator::new();
        let sink = sync.sink(0);
        {
            let _guard = sync.enter();
            assert!(sync.enter().is_none());
            assert!(!sink.emit(WidgetEvent::PointHovered(None)));
        }
        assert!(sink.emit(WidgetEvent::PointHovered(None)));
        let queued = sync.next_event().unwrap();
        assert_eq!(queued.origin, 0);
        assert_eq!(queued.generation, 0);
    }

    #[test]
    fn selection_maps_through_each_projection() {
        // Row 7 is the second point of view 0 and the first of view 1; view 2 lacks it.
        let (mut sync, mut views, calls) = setup(&[&[3, 7], &[7, 9], &[3, 9]]);
        let outcome = sync.dispatch(0, WidgetEvent::PointClicked(Some(1)), &mut views);

        assert_eq!(outcome.selection_changed, Some(Some(7)));
        assert_eq!(sync.selected(), Some(7));
        assert_eq!(*calls[1].borrow(), vec!["select Some(0)"]);
        assert_eq!(*calls[2].borrow(), vec!["select None"]);
    }

    #[test]
    fn repeated_hover_is_not_relayed() {
        let (mut sync, mut views, calls) = setup(&[&[0, 1], &[0, 1]]);
        sync.dispatch(0, WidgetEvent::PointHovered(Some(1)), &mut views);
        let again = sync.dispatch(0, WidgetEvent::PointHovered(Some(1)), &mut views);
        assert!(again.accepted);
        assert_eq!(again.updated, 0);
        assert_eq!(calls[1].borrow().len(), 1);
    }

    #[test]
    fn unknown_origin_is_rejected() {
        let (mut sync, mut views, _) = setup(&[&[0]]);
        let outcome = sync.dispatch(5, WidgetEvent::PointClicked(Some(0)), &mut views);
        assert!(!outcome.accepted);
        assert_eq!(sync.phase(), Phase::Idle);
    }

    #[test]
    fn clear_selection_only_reports_real_changes() {
        let (mut sync, mut views, calls) = setup(&[&[0, 1], &[0, 1]]);
        assert!(!sync.clear_selection(&mut views));
        sync.dispatch(0, WidgetEvent::PointClicked(Some(0)), &mut views);
        assert!(sync.clear_selection(&mut views));
        assert_eq!(sync.selected(), None);
        assert_eq!(calls[0].borrow().last().map(String::as_str), Some("select None"));
    }

    #[test]
    fn resync_drops_points_on_filtered_rows() {
        let (mut sync, mut views, calls) = setup(&[&[0, 1, 2], &[0, 1, 2]]);
        sync.dispatch(0, WidgetEvent::ZoomChanged(WINDOW), &mut views);
        sync.dispatch(0, WidgetEvent::PointClicked(Some(2)), &mut views);
        sync.dispatch(0, WidgetEvent::PointHovered(Some(1)), &mut views);
        calls[1].borrow_mut().clear();

        let dropped = sync.resync(&mut views, |row| row != 2);

        assert!(dropped);
        assert_eq!(sync.selected(), None);
        assert_eq!(sync.hovered(), Some(1));
        assert_eq!(
            *calls[1].borrow(),
            vec![format!("window {:?}", Some(WINDOW)), "hover Some(1)".into(), "select None".into()]
        );
        assert_eq!(sync.pending_events(), 0);
    }

    #[test]
    fn reset_forgets_everything() {
        let (mut sync, mut views, _) = setup(&[&[0, 1], &[0, 1]]);
        sync.dispatch(1, WidgetEvent::ZoomChanged(WINDOW), &mut views);
        sync.dispatch(1, WidgetEvent::PointClicked(Some(0)), &mut views);
        assert!(sync.reset(&mut views));
        assert_eq!(sync.window(), None);
        assert_eq!(sync.selected(), None);
        assert!(!sync.reset(&mut views));
    }

    #[test]
    fn generation_advances_monotonically() {
        let mut sync = SyncCoordinator::new();
        let sink = sync.sink(0);
        assert_eq!(sync.advance_generation(), 1);
        assert_eq!(sync.advance_generation(), 2);
        sink.emit(WidgetEvent::PointClicked(None));
        assert_eq!(sync.next_event().map(|e| e.generation), Some(2));
    }
}
