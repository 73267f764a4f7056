use crate::domain::models::{AppEvent, MessageSeverity, SessionState, StatusMessage, UiCommand};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::protocol::TARGET_NAME;
use crate::infrastructure::bluetooth::{spawn_ble_worker, BleWorkerHandle};
use crate::infrastructure::logging::LoggingGuard;
use crate::presentation::components::Components;
use crate::presentation::theme;
use eframe::egui;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

pub struct ImuLoggerApp {
    // Bluetooth; dropping the handle tears the session down
    pub(crate) ble_worker: Option<BleWorkerHandle>,
    pub(crate) app_rx: mpsc::UnboundedReceiver<AppEvent>,

    // State
    pub(crate) session_state: SessionState,
    pub(crate) status_message: Option<StatusMessage>,
    pub(crate) samples_recorded: u64,
    pub(crate) data_file: PathBuf,

    // Logging guard
    pub(crate) _logging_guard: Option<LoggingGuard>,
}

impl ImuLoggerApp {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        settings: Settings,
        logging_guard: Option<LoggingGuard>,
    ) -> Self {
        theme::configure_style(&cc.egui_ctx);

        let (app_tx, app_rx) = mpsc::unbounded_channel();
        let data_file = settings.data_file_path();

        let (ble_worker, status_message) = match spawn_ble_worker(settings, app_tx) {
            Ok(handle) => (Some(handle), None),
            Err(e) => {
                error!("Failed to start BLE worker: {}", e);
                (
                    None,
                    Some(StatusMessage::new(
                        format!("Failed to start Bluetooth: {}", e),
                        MessageSeverity::Error,
                    )),
                )
            }
        };

        Self {
            ble_worker,
            app_rx,
            session_state: SessionState::Idle,
            status_message,
            samples_recorded: 0,
            data_file,
            _logging_guard: logging_guard,
        }
    }

    fn send_command(&mut self, command: UiCommand) {
        let Some(worker) = &self.ble_worker else {
            return;
        };
        if !worker.send(command) {
            error!("BLE worker is gone, dropping {:?}", command);
            self.ble_worker = None;
            self.status_message = Some(StatusMessage::new(
                "Bluetooth worker stopped",
                MessageSeverity::Error,
            ));
        }
    }

    fn handle_events(&mut self) {
        while let Ok(event) = self.app_rx.try_recv() {
            match event {
                AppEvent::SessionState(state) => {
                    if state == SessionState::Scanning {
                        self.samples_recorded = 0;
                    }
                    self.session_state = state;
                }
                AppEvent::LogMessage(msg) => self.status_message = Some(msg),
                AppEvent::SamplesRecorded(count) => self.samples_recorded = count,
            }
        }
    }

    fn render_controls(&mut self, ui: &mut egui::Ui) {
        let active =
            self.session_state.is_busy() || self.session_state == SessionState::Subscribed;

        ui.add_enabled_ui(self.ble_worker.is_some(), |ui| {
            if active {
                if ui.button("Stop").clicked() {
                    info!("User stopped the session");
                    self.send_command(UiCommand::StopSession);
                }
            } else if ui
                .button(format!("Scan for {}", TARGET_NAME))
                .clicked()
            {
                info!("User started a scan");
                self.send_command(UiCommand::StartScan);
            }
        });
    }
}

impl eframe::App for ImuLoggerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_events();

        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            Components::status_line(ui, self.status_message.as_ref());
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("IMU Logger");
            ui.add_space(10.0);
            Components::state_banner(ui, self.session_state);
            ui.add_space(10.0);
            self.render_controls(ui);
            ui.separator();
            Components::capture_summary(ui, self.samples_recorded, &self.data_file);
        });

        // Worker events arrive off the UI thread
        ctx.request_repaint_after(Duration::from_millis(100));
    }
}
