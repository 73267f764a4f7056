use crate::domain::models::{MessageSeverity, SessionState};
use eframe::egui;

/// Banner colors (background, text) for each session state
pub fn state_colors(state: SessionState) -> (egui::Color32, egui::Color32) {
    match state {
        SessionState::Subscribed => (egui::Color32::from_rgb(0, 200, 100), egui::Color32::BLACK),
        SessionState::Connected | SessionState::DiscoveringServices => {
            (egui::Color32::from_rgb(0, 200, 255), egui::Color32::BLACK)
        }
        SessionState::Scanning | SessionState::Connecting => {
            (egui::Color32::from_rgb(255, 200, 0), egui::Color32::BLACK)
        }
        SessionState::Failed => (egui::Color32::from_rgb(255, 50, 50), egui::Color32::WHITE),
        SessionState::Idle | SessionState::Disconnected => {
            (egui::Color32::from_gray(100), egui::Color32::WHITE)
        }
    }
}

pub fn severity_color(severity: MessageSeverity) -> egui::Color32 {
    match severity {
        MessageSeverity::Info => egui::Color32::from_rgb(50, 50, 255),
        MessageSeverity::Success => egui::Color32::from_rgb(0, 150, 0),
        MessageSeverity::Warning => egui::Color32::from_rgb(200, 150, 0),
        MessageSeverity::Error => egui::Color32::RED,
    }
}

/// Flat, square-cornered light style
pub fn configure_style(ctx: &egui::Context) {
    let mut style = (*ctx.style()).clone();

    style
        .text_styles
        .iter_mut()
        .for_each(|(text_style, font_id)| {
            font_id.size = match text_style {
                egui::TextStyle::Heading => 26.0,
                egui::TextStyle::Body | egui::TextStyle::Button => 15.0,
                _ => font_id.size,
            };
        });

    style.spacing.item_spacing = egui::vec2(10.0, 10.0);
    style.spacing.button_padding = egui::vec2(16.0, 10.0);

    let stroke = egui::Stroke::new(2.0, egui::Color32::BLACK);
    for widget in [
        &mut style.visuals.widgets.noninteractive,
        &mut style.visuals.widgets.inactive,
        &mut style.visuals.widgets.hovered,
        &mut style.visuals.widgets.active,
    ] {
        widget.bg_stroke = stroke;
        widget.rounding = egui::Rounding::ZERO;
    }
    style.visuals.widgets.hovered.bg_fill = egui::Color32::from_rgb(255, 220, 0);
    style.visuals.widgets.active.bg_fill = egui::Color32::from_rgb(0, 255, 100);

    style.visuals.panel_fill = egui::Color32::from_rgb(245, 245, 245);

    ctx.set_style(style);
}
