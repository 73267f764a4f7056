//! BLE Worker
//!
//! Owns the current [`Session`] and the session event channel. UI commands
//! and backend events are handled one at a time, in arrival order, on a
//! dedicated thread running a current-thread tokio runtime.

use crate::domain::models::{
    AppEvent, MessageSeverity, SessionEvent, SessionId, SessionState, StatusMessage, UiCommand,
};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::central::{BleCentral, EventSender};
use crate::infrastructure::bluetooth::error::BleError;
use crate::infrastructure::bluetooth::session::Session;
use crate::infrastructure::bluetooth::simulated::{SimulatedCentral, SimulatedPeripheral};
use crate::infrastructure::permissions::{self, PermissionQuery};
use crate::infrastructure::storage::CsvSampleWriter;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

/// Build the radio backend for one session
fn create_central(settings: &Settings, events: EventSender) -> Result<Box<dyn BleCentral>, BleError> {
    if settings.use_simulated_peripheral {
        info!("Using the simulated peripheral");
        return Ok(Box::new(SimulatedCentral::new(
            events,
            SimulatedPeripheral::default(),
        )));
    }
    native_central(events)
}

#[cfg(windows)]
fn native_central(events: EventSender) -> Result<Box<dyn BleCentral>, BleError> {
    Ok(Box::new(super::winrt::WinRtCentral::new(events)))
}

#[cfg(not(windows))]
fn native_central(_events: EventSender) -> Result<Box<dyn BleCentral>, BleError> {
    Err(BleError::AdapterUnavailable(
        "no native Bluetooth LE backend on this platform".to_string(),
    ))
}

pub struct BleWorker {
    settings: Settings,
    app_tx: mpsc::UnboundedSender<AppEvent>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    session: Option<Session>,
    last_id: SessionId,
    permission: PermissionQuery,
}

impl BleWorker {
    pub fn new(settings: Settings, app_tx: mpsc::UnboundedSender<AppEvent>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let permission: PermissionQuery = if settings.use_simulated_peripheral {
            permissions::always_granted
        } else {
            permissions::platform_permission
        };
        Self {
            settings,
            app_tx,
            events_tx,
            events_rx,
            session: None,
            last_id: SessionId(0),
            permission,
        }
    }

    /// Replace the source of the scan grant
    pub fn with_permission_query(mut self, query: PermissionQuery) -> Self {
        self.permission = query;
        self
    }

    /// Process commands and events until `Shutdown` or the UI goes away
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<UiCommand>) {
        info!("BLE worker started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(UiCommand::StartScan) => self.start_session().await,
                    Some(UiCommand::StopSession) => self.end_session(),
                    Some(UiCommand::Shutdown) | None => break,
                },
                Some(event) = self.events_rx.recv() => self.dispatch(event),
            }
        }
        self.end_session();
        info!("BLE worker stopped");
    }

    async fn start_session(&mut self) {
        // A new scan always replaces the previous attempt
        self.end_session();

        let permission = match (self.permission)().await {
            Ok(permission) => permission,
            Err(e) => {
                self.report_unavailable(&e);
                return;
            }
        };

        self.last_id = self.last_id.next();
        let events = EventSender::new(self.last_id, self.events_tx.clone());
        let central = match create_central(&self.settings, events.clone()) {
            Ok(central) => central,
            Err(e) => {
                self.report_unavailable(&e);
                return;
            }
        };
        let sink = CsvSampleWriter::new(self.settings.data_file_path());

        let mut session = Session::new(central, Box::new(sink), events, self.app_tx.clone());
        info!("Session {} created", session.id());
        session.start(permission);
        self.session = Some(session);
    }

    fn end_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!("Ending session {}", session.id());
            session.teardown();
        }
    }

    fn dispatch(&mut self, event: SessionEvent) {
        match self.session.as_mut() {
            Some(session) if session.id() == event.session => session.handle_event(event.event),
            _ => trace!("Dropping stale event from session {}", event.session),
        }
    }

    fn report_unavailable(&self, err: &BleError) {
        error!("Cannot start scan: {}", err);
        let _ = self.app_tx.send(AppEvent::SessionState(SessionState::Failed));
        let _ = self.app_tx.send(AppEvent::LogMessage(StatusMessage::new(
            err.to_string(),
            MessageSeverity::Error,
        )));
    }
}

/// Command side of a running [`BleWorker`] thread.
///
/// Dropping the handle shuts the worker down and waits for it, so the
/// current session is torn down before the process exits.
pub struct BleWorkerHandle {
    commands: mpsc::UnboundedSender<UiCommand>,
    thread: Option<JoinHandle<()>>,
}

impl BleWorkerHandle {
    /// Returns false once the worker has stopped
    pub fn send(&self, command: UiCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.commands.send(UiCommand::Shutdown);
        if thread.join().is_err() {
            error!("BLE worker thread panicked");
        }
    }
}

impl Drop for BleWorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run a [`BleWorker`] on its own thread
pub fn spawn_ble_worker(
    settings: Settings,
    app_tx: mpsc::UnboundedSender<AppEvent>,
) -> std::io::Result<BleWorkerHandle> {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let thread = std::thread::Builder::new()
        .name("ble-worker".to_string())
        .spawn(move || {
            runtime.block_on(BleWorker::new(settings, app_tx).run(cmd_rx));
        })?;

    Ok(BleWorkerHandle {
        commands: cmd_tx,
        thread: Some(thread),
    })
}
