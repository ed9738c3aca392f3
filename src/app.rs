use std::cell::RefCell;
use std::rc::Rc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use eframe::egui;

use qc_trends::config::Config;
use qc_trends::data::loader;
use qc_trends::engine::annotations::{AnnotationTicket, FetchTicket, HideTicket};
use qc_trends::metrics::MetricCatalog;
use qc_trends::persistence::{AnnotationRecord, AnnotationStore, HiddenMark};
use qc_trends::widget::SessionObserver;
use qc_trends::{EngineError, PersistenceError, Session};

use crate::ui::panels::{self, Action};
use crate::ui::plot::{BoardHost, ChartBoard};

// ---------------------------------------------------------------------------
// Persistence worker
// ---------------------------------------------------------------------------

enum Request {
    Hide(HideTicket),
    Annotate(AnnotationTicket),
    ListAnnotations(FetchTicket),
    ListHidden(FetchTicket),
}

enum Completion {
    Hide(HideTicket, Result<(), PersistenceError>),
    Annotate(AnnotationTicket, Result<(), PersistenceError>),
    Annotations(FetchTicket, Result<Vec<AnnotationRecord>, PersistenceError>),
    Hidden(FetchTicket, Result<Vec<HiddenMark>, PersistenceError>),
}

/// Run store requests off the UI thread; each completion wakes the UI.
fn spawn_worker(store: Box<dyn AnnotationStore + Send>, ctx: egui::Context) -> (Sender<Request>, Receiver<Completion>) {
    let (request_tx, request_rx) = unbounded::<Request>();
    let (done_tx, done_rx) = unbounded::<Completion>();
    thread::spawn(move || {
        for request in request_rx {
            let done = match request {
                Request::Hide(t) => {
                    let result = store.hide(t.row_id, &t.reason);
                    Completion::Hide(t, result)
                }
                Request::Annotate(t) => {
                    let result = store.add_annotation(&t.annotation);
                    Completion::Annotate(t, result)
                }
                Request::ListAnnotations(t) => Completion::Annotations(t, store.list_annotations()),
                Request::ListHidden(t) => Completion::Hidden(t, store.list_hidden()),
            };
            if done_tx.send(done).is_err() {
                break;
            }
            ctx.request_repaint();
        }
        log::debug!("persistence worker stopped");
    });
    (request_tx, done_rx)
}

// ---------------------------------------------------------------------------
// Status line fed by session callbacks
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct StatusLine(Rc<RefCell<Option<String>>>);

impl StatusLine {
    fn set(&self, message: impl Into<String>) {
        *self.0.borrow_mut() = Some(message.into());
    }

    fn get(&self) -> Option<String> {
        self.0.borrow().clone()
    }
}

impl SessionObserver for StatusLine {
    fn on_filter_changed(&mut self) {
        *self.0.borrow_mut() = None;
    }

    fn on_hide_failed(&mut self, message: &str) {
        self.set(message);
    }

    fn on_annotation_failed(&mut self, message: &str) {
        self.set(message);
    }
}

// ---------------------------------------------------------------------------
// eframe App implementation
// ---------------------------------------------------------------------------

pub struct QcTrendsApp {
    session: Session,
    board: Rc<RefCell<ChartBoard>>,
    requests: Option<Sender<Request>>,
    completions: Option<Receiver<Completion>>,
    status: StatusLine,
    hide_reason: String,
}

impl QcTrendsApp {
    pub fn new(ctx: &egui::Context, config: Config) -> Self {
        let board = ChartBoard::shared();
        let mut session = Session::new(
            config.clone(),
            MetricCatalog::builtin(),
            Box::new(BoardHost(Rc::clone(&board))),
        );
        let status = StatusLine::default();
        session.add_observer(Box::new(status.clone()));

        let (requests, completions) = match qc_trends::persistence::open_store(&config.persistence) {
            Ok(store) => {
                let (tx, rx) = spawn_worker(store, ctx.clone());
                (Some(tx), Some(rx))
            }
            Err(e) => {
                log::error!("annotation store unavailable: {e}");
                status.set(format!("Annotations unavailable: {e}"));
                (None, None)
            }
        };

        let mut app = Self {
            session,
            board,
            requests,
            completions,
            status,
            hide_reason: String::new(),
        };
        app.request_lists();
        app
    }

    fn send(&self, request: Request) {
        let sent = self.requests.as_ref().is_some_and(|tx| tx.send(request).is_ok());
        if !sent {
            self.status.set("Annotation store is not available");
        }
    }

    fn request_lists(&self) {
        self.send(Request::ListHidden(self.session.begin_fetch()));
        self.send(Request::ListAnnotations(self.session.begin_fetch()));
    }

    fn drain_completions(&mut self) {
        let Some(rx) = self.completions.clone() else {
            return;
        };
        for done in rx.try_iter() {
            match done {
                Completion::Hide(ticket, result) => {
                    if self.session.complete_hide(ticket, result).is_ok() {
                        self.hide_reason.clear();
                    }
                }
                Completion::Annotate(ticket, result) => {
                    if self.session.complete_annotation(ticket, result).is_ok() {
                        self.send(Request::ListAnnotations(self.session.begin_fetch()));
                    }
                }
                Completion::Annotations(ticket, result) => match self.session.complete_annotation_fetch(ticket, result) {
                    Err(EngineError::StaleGeneration { .. }) => {
                        self.send(Request::ListAnnotations(self.session.begin_fetch()));
                    }
                    Err(e) => self.status.set(e.to_string()),
                    Ok(()) => {}
                },
                Completion::Hidden(ticket, result) => match self.session.complete_hidden_fetch(ticket, result) {
                    Err(EngineError::StaleGeneration { .. }) => {
                        self.send(Request::ListHidden(self.session.begin_fetch()));
                    }
                    Err(e) => self.status.set(e.to_string()),
                    Ok(()) => {}
                },
            }
        }
    }

    fn apply(&mut self, action: Action) {
        let result = match action {
            Action::Open(path) => match loader::load_file(&path) {
                Ok(dataset) => self.session.load_dataset(dataset).map(|_| self.request_lists()),
                Err(e) => {
                    log::error!("Failed to load file: {e:#}");
                    self.status.set(format!("Error: {e:#}"));
                    Ok(())
                }
            },
            Action::Export(path) => {
                if let Err(e) = self.session.export_csv(&path) {
                    log::error!("Export failed: {e:#}");
                    self.status.set(format!("Error: {e:#}"));
                }
                Ok(())
            }
            Action::ReloadAnnotations => {
                self.request_lists();
                Ok(())
            }
            Action::SelectCategory(category) => self.session.select_category(&category).map(drop),
            Action::ToggleInstrument(instrument) => self.session.toggle_instrument(&instrument).map(drop),
            Action::SetMode(mode) => {
                self.session.set_mode(mode);
                Ok(())
            }
            Action::ClearSelection => {
                self.session.clear_selection();
                Ok(())
            }
            Action::Hide { row_id, reason } => self
                .session
                .begin_hide(row_id, &reason)
                .map(|ticket| self.send(Request::Hide(ticket))),
            Action::SubmitDraft => self
                .session
                .begin_draft_annotation()
                .map(|ticket| ticket.into_iter().for_each(|t| self.send(Request::Annotate(t)))),
        };
        if let Err(e) = result {
            log::warn!("{e}");
            self.status.set(e.to_string());
        }
    }
}

impl eframe::App for QcTrendsApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_completions();
        let mut actions = Vec::new();
        let status = self.status.get();

        // ---- Top panel: menu bar ----
        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            panels::top_bar(ui, &self.session, status.as_deref(), &mut actions);
        });

        // ---- Left side panel: filters ----
        egui::SidePanel::left("filter_panel")
            .default_width(220.0)
            .resizable(true)
            .show(ctx, |ui| {
                panels::side_panel(ui, &self.session, &mut actions);
            });

        // ---- Right side panel: selection ----
        egui::SidePanel::right("selection_panel")
            .default_width(260.0)
            .resizable(true)
            .show(ctx, |ui| {
                panels::selection_panel(ui, &mut self.session, &mut self.hide_reason, &mut actions);
            });

        // ---- Bottom panel: annotations ----
        egui::TopBottomPanel::bottom("annotations")
            .resizable(true)
            .default_height(120.0)
            .show(ctx, |ui| {
                panels::annotations_table(ui, &self.session);
            });

        // ---- Central panel: charts ----
        egui::CentralPanel::default().show(ctx, |ui| {
            self.board.borrow().show(ui);
        });

        if self.session.pump_events() > 0 {
            ctx.request_repaint();
        }
        for action in actions {
            self.apply(action);
        }
    }
}
