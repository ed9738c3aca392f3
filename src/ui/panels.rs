use std::path::PathBuf;

use chrono::{DateTime, Utc};
use eframe::egui::{self, Color32, RichText, ScrollArea, Ui};
use egui_extras::{Column, TableBuilder};

use qc_trends::engine::annotations::PendingKey;
use qc_trends::engine::view::DisplayMode;
use qc_trends::Session;

/// What the user asked for this frame. The app carries these out after
/// drawing, when no panel borrows the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Open(PathBuf),
    Export(PathBuf),
    ReloadAnnotations,
    SelectCategory(String),
    ToggleInstrument(String),
    SetMode(DisplayMode),
    ClearSelection,
    Hide { row_id: i64, reason: String },
    SubmitDraft,
}

fn format_time(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

// ---------------------------------------------------------------------------
// Left side panel – filter buttons
// ---------------------------------------------------------------------------

/// Render the category / instrument filters and the dashboard switch.
pub fn side_panel(ui: &mut Ui, session: &Session, actions: &mut Vec<Action>) {
    ui.heading("Filters");
    ui.separator();

    let dataset = session.dataset();
    if dataset.is_empty() {
        ui.label("No dataset loaded.");
        return;
    }
    let highlighted = session.highlighted_row();
    let filters = session.filters();

    ScrollArea::vertical()
        .auto_shrink([false, false])
        .show(ui, |ui: &mut Ui| {
            ui.strong("View");
            ui.horizontal(|ui: &mut Ui| {
                for (mode, label) in [(DisplayMode::Simple, "Simple"), (DisplayMode::Detailed, "Detailed")] {
                    if ui.selectable_label(session.mode() == mode, label).clicked() {
                        actions.push(Action::SetMode(mode));
                    }
                }
            });
            ui.separator();

            ui.strong("Category");
            for (category, count) in dataset.category_counts() {
                let mut text = RichText::new(format!("{category}  ({count})"));
                if highlighted.as_ref().is_some_and(|h| h.category == *category) {
                    text = text.underline();
                }
                if ui
                    .selectable_label(filters.selected_category() == Some(category.as_str()), text)
                    .clicked()
                {
                    actions.push(Action::SelectCategory(category.clone()));
                }
            }
            ui.separator();

            ui.strong("Instrument");
            for instrument in dataset.instruments() {
                let count = dataset.instrument_counts().get(instrument).copied().unwrap_or(0);
                let c = session.palette().color_for(instrument);
                let name = session.config().instruments.display_name(instrument);
                let mut text = RichText::new(format!("{name}  ({count})")).color(Color32::from_rgb(c.red, c.green, c.blue));
                if highlighted.as_ref().is_some_and(|h| h.instrument == *instrument) {
                    text = text.underline();
                }
                let mut active = filters.is_instrument_active(instrument);
                if ui.checkbox(&mut active, text).changed() {
                    actions.push(Action::ToggleInstrument(instrument.clone()));
                }
            }
        });
}

// ---------------------------------------------------------------------------
// Right side panel – highlighted row, hide and annotate
// ---------------------------------------------------------------------------

/// Details of the selected (or hovered) run plus the hide / annotate forms.
pub fn selection_panel(ui: &mut Ui, session: &mut Session, hide_reason: &mut String, actions: &mut Vec<Action>) {
    ui.heading("Selection");
    ui.separator();

    let Some(details) = session.highlighted_row() else {
        ui.label("Hover or click a point.");
        return;
    };
    let selected = session.selected_row_id() == Some(details.row_id);

    egui::Grid::new("row_details").num_columns(2).show(ui, |ui: &mut Ui| {
        ui.label("Result");
        ui.label(details.row_id.to_string());
        ui.end_row();
        ui.label("Started");
        ui.label(format_time(details.start_time));
        ui.end_row();
        ui.label("Instrument");
        ui.label(session.config().instruments.display_name(&details.instrument));
        ui.end_row();
        ui.label("Category");
        ui.label(&details.category);
        ui.end_row();
    });

    ui.horizontal_wrapped(|ui: &mut Ui| {
        ui.label(RichText::new(&details.path.directory).weak());
        for token in &details.path.tokens {
            ui.label(RichText::new(token).monospace());
        }
        if !details.path.extension.is_empty() {
            ui.label(RichText::new(format!(".{}", details.path.extension)).weak());
        }
    });

    if let Some(reason) = &details.hidden_reason {
        ui.label(RichText::new(format!("Hidden: {reason}")).color(Color32::YELLOW));
    }
    for annotation in &details.annotations {
        ui.label(format!("{}: {}", annotation.metric_code, annotation.text));
    }

    if !selected {
        return;
    }

    ui.horizontal(|ui: &mut Ui| {
        if let Some(link) = &details.search_link {
            ui.hyperlink_to("Search", link);
        }
        if let Some(link) = &details.qa_link {
            ui.hyperlink_to("QA report", link);
        }
        if ui.small_button("Deselect").clicked() {
            actions.push(Action::ClearSelection);
        }
    });
    ui.separator();

    ui.strong("Hide this run");
    ui.text_edit_singleline(hide_reason);
    let hide_busy = session.is_busy(&PendingKey::Hide(details.row_id));
    if ui
        .add_enabled(!hide_busy && !hide_reason.trim().is_empty(), egui::Button::new("Hide"))
        .clicked()
    {
        actions.push(Action::Hide {
            row_id: details.row_id,
            reason: hide_reason.trim().to_string(),
        });
    }
    ui.separator();

    let Some(draft) = session.annotations().draft().cloned() else {
        return;
    };
    let busy = session.is_busy(&PendingKey::Annotation {
        row_id: draft.row_id,
        metric_code: draft.metric_code.clone(),
    });
    let label = session
        .catalog()
        .get(&draft.metric_code)
        .map_or(draft.metric_code.clone(), |m| m.label.to_string());
    ui.strong(format!("Annotate {label}"));
    if let Some(d) = session.annotations_mut().draft_mut() {
        ui.add(egui::TextEdit::multiline(&mut d.text).desired_rows(3));
    }
    if ui.add_enabled(!busy, egui::Button::new("Submit")).clicked() {
        actions.push(Action::SubmitDraft);
    }
}

// ---------------------------------------------------------------------------
// Bottom panel – annotation table
// ---------------------------------------------------------------------------

pub fn annotations_table(ui: &mut Ui, session: &Session) {
    let records = session.annotations().annotations();
    TableBuilder::new(ui)
        .striped(true)
        .column(Column::auto().at_least(70.0))
        .column(Column::auto().at_least(70.0))
        .column(Column::remainder())
        .header(18.0, |mut header| {
            header.col(|ui| {
                ui.strong("Result");
            });
            header.col(|ui| {
                ui.strong("Metric");
            });
            header.col(|ui| {
                ui.strong("Annotation");
            });
        })
        .body(|body| {
            body.rows(18.0, records.len(), |mut row| {
                let record = &records[row.index()];
                row.col(|ui| {
                    ui.label(record.result_id.to_string());
                });
                row.col(|ui| {
                    ui.label(&record.metric_code);
                });
                row.col(|ui| {
                    ui.label(&record.text);
                });
            });
        });
}

// ---------------------------------------------------------------------------
// Top bar
// ---------------------------------------------------------------------------

/// Render the top menu / toolbar.
pub fn top_bar(ui: &mut Ui, session: &Session, status: Option<&str>, actions: &mut Vec<Action>) {
    egui::menu::bar(ui, |ui: &mut Ui| {
        ui.menu_button("File", |ui: &mut Ui| {
            if ui.button("Open…").clicked() {
                if let Some(path) = open_file_dialog() {
                    actions.push(Action::Open(path));
                }
                ui.close_menu();
            }
            if ui
                .add_enabled(!session.dataset().is_empty(), egui::Button::new("Export CSV…"))
                .clicked()
            {
                if let Some(path) = save_file_dialog() {
                    actions.push(Action::Export(path));
                }
                ui.close_menu();
            }
            if ui.button("Reload annotations").clicked() {
                actions.push(Action::ReloadAnnotations);
                ui.close_menu();
            }
        });

        ui.separator();

        let dataset = session.dataset();
        if !dataset.is_empty() {
            ui.label(format!(
                "{} runs loaded, {} shown, {} hidden",
                dataset.len(),
                session.eligible_rows().len(),
                session.filters().hidden_row_ids().len()
            ));
        }

        if let Some(msg) = status {
            ui.separator();
            ui.label(RichText::new(msg).color(Color32::RED));
        }
    });
}

// ---------------------------------------------------------------------------
// File dialogs
// ---------------------------------------------------------------------------

pub fn open_file_dialog() -> Option<PathBuf> {
    rfd::FileDialog::new()
        .set_title("Open QC data")
        .add_filter("Supported files", &["parquet", "pq", "json", "csv"])
        .add_filter("Parquet", &["parquet", "pq"])
        .add_filter("JSON", &["json"])
        .add_filter("CSV", &["csv"])
        .pick_file()
}

pub fn save_file_dialog() -> Option<PathBuf> {
    rfd::FileDialog::new()
        .set_title("Export shown runs")
        .add_filter("CSV", &["csv"])
        .set_file_name("qc-export.csv")
        .save_file()
}
