use crate::domain::models::{SessionState, StatusMessage};
use crate::presentation::theme;
use eframe::egui;
use std::path::Path;

pub struct Components;

impl Components {
    /// Full-width banner naming the session state, colored by phase
    pub fn state_banner(ui: &mut egui::Ui, state: SessionState) {
        let (bg, fg) = theme::state_colors(state);
        egui::Frame::none()
            .fill(bg)
            .inner_margin(egui::Margin::symmetric(12.0, 8.0))
            .show(ui, |ui| {
                ui.set_width(ui.available_width());
                ui.label(
                    egui::RichText::new(state.to_string())
                        .color(fg)
                        .size(18.0)
                        .strong(),
                );
            });
    }

    /// Latest worker message, or a neutral placeholder before the first one
    pub fn status_line(ui: &mut egui::Ui, status: Option<&StatusMessage>) {
        match status {
            Some(msg) => {
                ui.colored_label(theme::severity_color(msg.severity), &msg.message);
            }
            None => {
                ui.weak("Ready");
            }
        }
    }

    /// Sample counter and output path
    pub fn capture_summary(ui: &mut egui::Ui, samples: u64, data_file: &Path) {
        ui.horizontal(|ui| {
            ui.label(
                egui::RichText::new(samples.to_string())
                    .monospace()
                    .size(28.0)
                    .strong(),
            );
            ui.label(if samples == 1 { "sample" } else { "samples" });
        });
        ui.label(
            egui::RichText::new(data_file.display().to_string())
                .monospace()
                .small(),
        )
        .on_hover_text("Each notification is appended as one line");
    }
}
