mod domain;
mod infrastructure;
mod presentation;

use domain::settings::{Settings, SettingsService};
use eframe::egui;
use std::path::PathBuf;

fn main() -> Result<(), eframe::Error> {
    let settings = match SettingsService::new() {
        Ok(service) => {
            // Write the defaults out once so they can be edited by hand
            if !service.path().exists() {
                if let Err(e) = service.save() {
                    eprintln!("Failed to write {}: {}", service.path().display(), e);
                }
            }
            service.get().clone()
        }
        Err(e) => {
            eprintln!("Failed to load settings, using defaults: {}", e);
            Settings::default()
        }
    };

    let data_dir = settings
        .data_file_path()
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let logging_guard = infrastructure::logging::init_logger(&settings.log_settings, &data_dir)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    tracing::info!("Starting IMU Logger");

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([480.0, 360.0])
            .with_title("IMU Logger"),
        ..Default::default()
    };

    eframe::run_native(
        "IMU Logger",
        options,
        Box::new(|cc| {
            Ok(Box::new(presentation::ImuLoggerApp::new(
                cc,
                settings,
                logging_guard,
            )))
        }),
    )
}
