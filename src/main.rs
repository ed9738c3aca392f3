mod app;
mod ui;

use app::QcTrendsApp;
use eframe::egui;
use qc_trends::config::Config;

fn main() -> eframe::Result {
    env_logger::init();

    let config = Config::load().unwrap_or_else(|e| {
        log::error!("{e:#}; using defaults");
        Config::default()
    });

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1400.0, 900.0])
            .with_min_inner_size([800.0, 500.0]),
        ..Default::default()
    };

    eframe::run_native(
        "QC Trends",
        options,
        Box::new(|cc| Ok(Box::new(QcTrendsApp::new(&cc.egui_ctx, config)))),
    )
}
