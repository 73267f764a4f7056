//! BLE Session
//!
//! One [`Session`] is built per scan attempt. It owns the scan timer, the
//! backend and the connection handle, and advances by consuming
//! [`BleEvent`]s in channel order:
//!
//! ```text
//! Idle -> Scanning -> Connecting -> Connected -> DiscoveringServices -> Subscribed
//!            |            |                            |
//!            v            v                            v
//!         Failed     Disconnected                   Failed
//! ```
//!
//! Every error ends the session. Teardown cancels the timer, stops the scan
//! and releases the connection; calling it again does nothing.

use crate::domain::models::{
    AppEvent, BleEvent, DiscoveredDevice, GattService, GattStatus, LinkState, MessageSeverity,
    PermissionStatus, SessionId, SessionState, StatusMessage,
};
use crate::infrastructure::bluetooth::central::{BleCentral, ConnectionHandle, EventSender};
use crate::infrastructure::bluetooth::error::SessionError;
use crate::infrastructure::bluetooth::protocol::{
    self, CCCD_UUID, ENABLE_NOTIFICATION_VALUE, IMU_DATA_CHAR_UUID, IMU_SERVICE_UUID,
    SCAN_TIMEOUT, TARGET_NAME,
};
use crate::infrastructure::storage::SampleSink;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

pub struct Session {
    id: SessionId,
    state: SessionState,
    central: Box<dyn BleCentral>,
    sink: Box<dyn SampleSink>,
    events: EventSender,
    app_tx: mpsc::UnboundedSender<AppEvent>,
    scan_timer: Option<JoinHandle<()>>,
    scanning: bool,
    device: Option<DiscoveredDevice>,
    connection: Option<ConnectionHandle>,
    samples_recorded: u64,
}

impl Session {
    pub fn new(
        central: Box<dyn BleCentral>,
        sink: Box<dyn SampleSink>,
        events: EventSender,
        app_tx: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            id: events.session(),
            state: SessionState::Idle,
            central,
            sink,
            events,
            app_tx,
            scan_timer: None,
            scanning: false,
            device: None,
            connection: None,
            samples_recorded: 0,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn device(&self) -> Option<&DiscoveredDevice> {
        self.device.as_ref()
    }

    pub fn samples_recorded(&self) -> u64 {
        self.samples_recorded
    }

    /// Begin the scan phase. Must be called from within a tokio runtime.
    pub fn start(&mut self, permission: PermissionStatus) {
        if self.state != SessionState::Idle {
            warn!("Session {} already started ({:?})", self.id, self.state);
            return;
        }
        if let Err(e) = self.try_start(permission) {
            self.fail(e);
        }
    }

    fn try_start(&mut self, permission: PermissionStatus) -> Result<(), SessionError> {
        if permission != PermissionStatus::Granted {
            return Err(SessionError::PermissionDenied);
        }

        info!("Session {}: starting BLE scan for '{}'", self.id, TARGET_NAME);
        self.central.start_scan()?;
        self.scanning = true;
        self.arm_scan_timer();

        self.set_state(SessionState::Scanning);
        self.send_log(
            format!("Scanning for {}...", TARGET_NAME),
            MessageSeverity::Info,
        );
        Ok(())
    }

    fn arm_scan_timer(&mut self) {
        let events = self.events.clone();
        self.scan_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(SCAN_TIMEOUT).await;
            events.send(BleEvent::ScanTimedOut);
        }));
    }

    /// Apply one event from the session channel
    pub fn handle_event(&mut self, event: BleEvent) {
        if self.state.is_terminal() {
            debug!(
                "Session {} ended ({:?}), ignoring {:?}",
                self.id, self.state, event
            );
            return;
        }

        let result = match event {
            BleEvent::ScanResult(device) => self.on_scan_result(device),
            BleEvent::ScanTimedOut => self.on_scan_timeout(),
            BleEvent::ConnectionStateChanged(link) => self.on_link_state(link),
            BleEvent::ServicesDiscovered(result) => self.on_services_discovered(result),
            BleEvent::DescriptorWritten(result) => self.on_descriptor_written(result),
            BleEvent::CharacteristicChanged {
                characteristic,
                value,
            } => self.on_characteristic_changed(characteristic, &value),
        };

        if let Err(e) = result {
            self.fail(e);
        }
    }

    fn on_scan_result(&mut self, device: DiscoveredDevice) -> Result<(), SessionError> {
        if self.state != SessionState::Scanning {
            trace!("Late scan result from {} ignored", device);
            return Ok(());
        }

        debug!("Found device: {}", device);
        if !protocol::matches_target(device.name.as_deref(), TARGET_NAME) {
            return Ok(());
        }

        // Halt discovery before connecting so a second match cannot race in
        self.halt_scan();

        info!("Found {}, connecting...", device);
        self.send_log(
            format!("Found {}, connecting...", device.display_name()),
            MessageSeverity::Info,
        );
        self.set_state(SessionState::Connecting);

        let handle = self.central.connect(&device)?;
        debug!("Session {} owns connection {}", self.id, handle.id());
        self.connection = Some(handle);
        self.device = Some(device);
        Ok(())
    }

    fn on_scan_timeout(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Scanning {
            debug!("Scan timeout after scan already halted, ignoring");
            return Ok(());
        }

        self.scan_timer = None;
        self.halt_scan();
        Err(SessionError::DeviceNotFound {
            target: TARGET_NAME.to_string(),
        })
    }

    fn on_link_state(&mut self, link: LinkState) -> Result<(), SessionError> {
        match (self.state, link) {
            (SessionState::Connecting, LinkState::Connected) => {
                info!("Connected to GATT server. Discovering services...");
                self.set_state(SessionState::Connected);
                self.send_log("Connected, discovering services...", MessageSeverity::Info);

                let connection = self.connection.as_ref().ok_or(SessionError::LinkLost)?;
                self.central.discover_services(connection)?;
                self.set_state(SessionState::DiscoveringServices);
                Ok(())
            }
            (SessionState::Connecting, LinkState::Disconnected) => {
                Err(SessionError::ConnectFailure {
                    device: self
                        .device
                        .as_ref()
                        .map(|d| d.display_name().to_string())
                        .unwrap_or_else(|| "device".to_string()),
                })
            }
            (
                SessionState::Connected
                | SessionState::DiscoveringServices
                | SessionState::Subscribed,
                LinkState::Disconnected,
            ) => Err(SessionError::LinkLost),
            (state, link) => {
                debug!("Ignoring link state {:?} while {:?}", link, state);
                Ok(())
            }
        }
    }

    fn on_services_discovered(
        &mut self,
        result: Result<Vec<GattService>, GattStatus>,
    ) -> Result<(), SessionError> {
        if self.state != SessionState::DiscoveringServices {
            debug!("Unexpected service discovery result while {:?}", self.state);
            return Ok(());
        }

        let services = result.map_err(SessionError::DiscoveryFailed)?;
        info!("Services discovered: {}", services.len());

        let service = services
            .iter()
            .find(|s| s.uuid == IMU_SERVICE_UUID)
            .ok_or(SessionError::ServiceMissing)?;
        let characteristic = service
            .characteristics
            .iter()
            .find(|c| c.uuid == IMU_DATA_CHAR_UUID)
            .ok_or(SessionError::CharacteristicMissing)?;
        if !characteristic.descriptors.contains(&CCCD_UUID) {
            return Err(SessionError::DescriptorMissing);
        }

        let connection = self.connection.as_ref().ok_or(SessionError::LinkLost)?;
        self.central
            .set_notify(connection, IMU_DATA_CHAR_UUID, true)?;
        self.central.write_descriptor(
            connection,
            IMU_DATA_CHAR_UUID,
            CCCD_UUID,
            &ENABLE_NOTIFICATION_VALUE,
        )?;

        info!("Subscribed to IMU data on {}", IMU_DATA_CHAR_UUID);
        self.set_state(SessionState::Subscribed);
        self.send_log("Subscribed to IMU data", MessageSeverity::Success);
        Ok(())
    }

    fn on_descriptor_written(&mut self, result: Result<(), GattStatus>) -> Result<(), SessionError> {
        if self.state != SessionState::Subscribed {
            return Ok(());
        }
        match result {
            Ok(()) => {
                debug!("Notification descriptor written");
                Ok(())
            }
            Err(status) => Err(SessionError::SubscriptionRejected(status)),
        }
    }

    fn on_characteristic_changed(
        &mut self,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), SessionError> {
        if self.state != SessionState::Subscribed || characteristic != IMU_DATA_CHAR_UUID {
            trace!("Ignoring notification from {}", characteristic);
            return Ok(());
        }

        let record = protocol::format_sample(value);
        debug!("Received IMU data: {}", record);
        self.sink.append(&record)?;

        self.samples_recorded += 1;
        let _ = self
            .app_tx
            .send(AppEvent::SamplesRecorded(self.samples_recorded));
        Ok(())
    }

    /// End the session: cancel the timer, stop scanning, release the link.
    ///
    /// Safe to call any number of times.
    pub fn teardown(&mut self) {
        let released = self.release();
        if !self.state.is_terminal() {
            info!("Session {} torn down", self.id);
            self.set_state(SessionState::Disconnected);
            if released {
                self.send_log("Disconnected", MessageSeverity::Info);
            }
        }
    }

    fn fail(&mut self, err: SessionError) {
        let (next, severity) = match err {
            SessionError::LinkLost | SessionError::ConnectFailure { .. } => {
                (SessionState::Disconnected, MessageSeverity::Warning)
            }
            SessionError::DeviceNotFound { .. } => (SessionState::Failed, MessageSeverity::Warning),
            _ => (SessionState::Failed, MessageSeverity::Error),
        };

        match severity {
            MessageSeverity::Error => error!("Session {} failed: {}", self.id, err),
            _ => warn!("Session {} ended: {}", self.id, err),
        }

        self.release();
        self.set_state(next);
        self.send_log(err.to_string(), severity);
    }

    /// Cancel the timer and stop discovery. Returns true if a scan was running.
    fn halt_scan(&mut self) -> bool {
        if let Some(timer) = self.scan_timer.take() {
            timer.abort();
        }
        if !self.scanning {
            return false;
        }
        self.scanning = false;
        if let Err(e) = self.central.stop_scan() {
            warn!("Failed to stop scan: {}", e);
        }
        info!("BLE scan stopped");
        true
    }

    fn release(&mut self) -> bool {
        let mut released = self.halt_scan();
        if let Some(connection) = self.connection.take() {
            info!("Releasing connection {}", connection.id());
            self.central.close(connection);
            released = true;
        }
        released
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        debug!("Session {}: {:?} -> {:?}", self.id, self.state, state);
        self.state = state;
        let _ = self.app_tx.send(AppEvent::SessionState(state));
    }

    fn send_log(&self, message: impl Into<String>, severity: MessageSeverity) {
        let _ = self
            .app_tx
            .send(AppEvent::LogMessage(StatusMessage::new(message, severity)));
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{GattCharacteristic, SessionEvent};
    use crate::infrastructure::bluetooth::error::BleError;
    use crate::infrastructure::storage::CsvSampleWriter;
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        StartScan,
        StopScan,
        Connect(u64),
        DiscoverServices(u64),
        SetNotify(Uuid, bool),
        WriteDescriptor(Uuid, Uuid, Vec<u8>),
        Close(u64),
    }

    #[derive(Clone, Default)]
    struct RecordingCentral {
        calls: Arc<Mutex<Vec<Call>>>,
        fail_scan: bool,
    }

    impl RecordingCentral {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls().iter().filter(|c| pred(c)).count()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl BleCentral for RecordingCentral {
        fn start_scan(&mut self) -> Result<(), BleError> {
            if self.fail_scan {
                return Err(BleError::ScanFailed("radio off".into()));
            }
            self.record(Call::StartScan);
            Ok(())
        }

        fn stop_scan(&mut self) -> Result<(), BleError> {
            self.record(Call::StopScan);
            Ok(())
        }

        fn connect(&mut self, device: &DiscoveredDevice) -> Result<ConnectionHandle, BleError> {
            self.record(Call::Connect(device.address));
            Ok(ConnectionHandle::new(device.address))
        }

        fn discover_services(&mut self, connection: &ConnectionHandle) -> Result<(), BleError> {
            self.record(Call::DiscoverServices(connection.id()));
            Ok(())
        }

        fn set_notify(
            &mut self,
            _connection: &ConnectionHandle,
            characteristic: Uuid,
            enabled: bool,
        ) -> Result<(), BleError> {
            self.record(Call::SetNotify(characteristic, enabled));
            Ok(())
        }

        fn write_descriptor(
            &mut self,
            _connection: &ConnectionHandle,
            characteristic: Uuid,
            descriptor: Uuid,
            value: &[u8],
        ) -> Result<(), BleError> {
            self.record(Call::WriteDescriptor(
                characteristic,
                descriptor,
                value.to_vec(),
            ));
            Ok(())
        }

        fn close(&mut self, connection: ConnectionHandle) {
            self.record(Call::Close(connection.id()));
        }
    }

    #[derive(Clone, Default)]
    struct MemorySink {
        lines: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl SampleSink for MemorySink {
        fn append(&mut self, record: &str) -> io::Result<()> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::Other, "storage full"));
            }
            self.lines.lock().unwrap().push(record.to_string());
            Ok(())
        }
    }

    struct Harness {
        session: Session,
        central: RecordingCentral,
        lines: Arc<Mutex<Vec<String>>>,
        events_rx: mpsc::UnboundedReceiver<SessionEvent>,
        app_rx: mpsc::UnboundedReceiver<AppEvent>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with(RecordingCentral::default(), MemorySink::default())
        }

        fn with(central: RecordingCentral, sink: MemorySink) -> Self {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let (app_tx, app_rx) = mpsc::unbounded_channel();
            let lines = sink.lines.clone();
            let session = Session::new(
                Box::new(central.clone()),
                Box::new(sink),
                EventSender::new(SessionId(1), events_tx),
                app_tx,
            );
            Self {
                session,
                central,
                lines,
                events_rx,
                app_rx,
            }
        }

        fn started() -> Self {
            let mut harness = Self::new();
            harness.session.start(PermissionStatus::Granted);
            harness
        }

        fn subscribed() -> Self {
            let mut harness = Self::started();
            harness.session.handle_event(scan_result(Some("ArduinoIMU"), 1));
            harness
                .session
                .handle_event(BleEvent::ConnectionStateChanged(LinkState::Connected));
            harness
                .session
                .handle_event(BleEvent::ServicesDiscovered(Ok(imu_layout())));
            assert_eq!(harness.session.state(), SessionState::Subscribed);
            harness
        }

        fn last_status(&mut self) -> Option<StatusMessage> {
            let mut last = None;
            while let Ok(event) = self.app_rx.try_recv() {
                if let AppEvent::LogMessage(msg) = event {
                    last = Some(msg);
                }
            }
            last
        }
    }

    fn scan_result(name: Option<&str>, address: u64) -> BleEvent {
        BleEvent::ScanResult(DiscoveredDevice {
            name: name.map(str::to_string),
            address,
        })
    }

    fn imu_layout() -> Vec<GattService> {
        vec![
            GattService {
                uuid: Uuid::from_u128(0x00001800_0000_1000_8000_00805f9b34fb),
                characteristics: vec![],
            },
            GattService {
                uuid: IMU_SERVICE_UUID,
                characteristics: vec![GattCharacteristic {
                    uuid: IMU_DATA_CHAR_UUID,
                    descriptors: vec![CCCD_UUID],
                }],
            },
        ]
    }

    fn notification(value: &[u8]) -> BleEvent {
        BleEvent::CharacteristicChanged {
            characteristic: IMU_DATA_CHAR_UUID,
            value: value.to_vec(),
        }
    }

    fn is_descriptor_write(call: &Call) -> bool {
        matches!(call, Call::WriteDescriptor(..))
    }

    #[tokio::test]
    async fn test_permission_denied_refuses_scan() {
        let mut h = Harness::new();
        h.session.start(PermissionStatus::Denied);

        assert_eq!(h.session.state(), SessionState::Failed);
        assert!(h.central.calls().is_empty());
        assert_eq!(
            h.last_status().unwrap().message,
            "Bluetooth permissions are required to scan"
        );
    }

    #[tokio::test]
    async fn test_scan_start_failure_is_terminal() {
        let central = RecordingCentral {
            fail_scan: true,
            ..Default::default()
        };
        let mut h = Harness::with(central, MemorySink::default());
        h.session.start(PermissionStatus::Granted);

        assert_eq!(h.session.state(), SessionState::Failed);
        assert_eq!(h.last_status().unwrap().severity, MessageSeverity::Error);
    }

    #[tokio::test]
    async fn test_unnamed_and_unrelated_devices_are_skipped() {
        let mut h = Harness::started();
        h.session.handle_event(scan_result(None, 1));
        h.session.handle_event(scan_result(Some(""), 2));
        h.session.handle_event(scan_result(Some("Heart Rate"), 3));

        assert_eq!(h.session.state(), SessionState::Scanning);
        assert_eq!(h.central.calls(), vec![Call::StartScan]);
    }

    #[tokio::test]
    async fn test_match_stops_scan_before_connecting() {
        let mut h = Harness::started();
        h.session.handle_event(scan_result(Some("my arduino"), 0xAB));

        assert_eq!(h.session.state(), SessionState::Connecting);
        assert_eq!(
            h.central.calls(),
            vec![Call::StartScan, Call::StopScan, Call::Connect(0xAB)]
        );
        assert_eq!(h.session.device().unwrap().address, 0xAB);
    }

    #[tokio::test]
    async fn test_second_match_is_ignored() {
        let mut h = Harness::started();
        h.session.handle_event(scan_result(Some("ArduinoIMU"), 1));
        h.session.handle_event(scan_result(Some("ArduinoIMU"), 2));

        assert_eq!(h.central.count(|c| matches!(c, Call::Connect(_))), 1);
    }

    #[tokio::test]
    async fn test_timeout_after_match_is_ignored() {
        let mut h = Harness::started();
        h.session.handle_event(scan_result(Some("ArduinoIMU"), 1));
        h.session.handle_event(BleEvent::ScanTimedOut);

        assert_eq!(h.session.state(), SessionState::Connecting);
        assert_eq!(h.central.count(|c| *c == Call::StopScan), 1);
    }

    #[tokio::test]
    async fn test_match_after_timeout_is_ignored() {
        let mut h = Harness::started();
        h.session.handle_event(BleEvent::ScanTimedOut);
        h.session.handle_event(scan_result(Some("ArduinoIMU"), 1));

        assert_eq!(h.session.state(), SessionState::Failed);
        assert_eq!(h.central.count(|c| *c == Call::StopScan), 1);
        assert_eq!(h.central.count(|c| matches!(c, Call::Connect(_))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_times_out_after_ten_seconds() {
        let mut h = Harness::started();

        tokio::time::sleep(Duration::from_millis(9_900)).await;
        assert!(h.events_rx.try_recv().is_err());

        let event = h.events_rx.recv().await.unwrap();
        assert_eq!(event.session, SessionId(1));
        assert_eq!(event.event, BleEvent::ScanTimedOut);

        h.session.handle_event(event.event);
        assert_eq!(h.session.state(), SessionState::Failed);
        assert_eq!(h.central.count(|c| *c == Call::StopScan), 1);

        let status = h.last_status().unwrap();
        assert_eq!(status.severity, MessageSeverity::Warning);
        assert!(status.message.contains("no device matching"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_match_cancels_timer() {
        let mut h = Harness::started();
        tokio::time::sleep(Duration::from_secs(3)).await;
        h.session.handle_event(scan_result(Some("ArduinoIMU"), 1));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(h.events_rx.try_recv().is_err());
        assert_eq!(h.central.count(|c| *c == Call::StopScan), 1);
    }

    #[tokio::test]
    async fn test_connected_triggers_discovery() {
        let mut h = Harness::started();
        h.session.handle_event(scan_result(Some("ArduinoIMU"), 5));
        h.session
            .handle_event(BleEvent::ConnectionStateChanged(LinkState::Connected));

        assert_eq!(h.session.state(), SessionState::DiscoveringServices);
        assert_eq!(h.central.calls().last(), Some(&Call::DiscoverServices(5)));
    }

    #[tokio::test]
    async fn test_discovery_success_subscribes_once() {
        let h = Harness::subscribed();

        assert_eq!(h.central.count(is_descriptor_write), 1);
        assert!(h
            .central
            .calls()
            .contains(&Call::SetNotify(IMU_DATA_CHAR_UUID, true)));
        assert!(h.central.calls().contains(&Call::WriteDescriptor(
            IMU_DATA_CHAR_UUID,
            CCCD_UUID,
            vec![0x01, 0x00]
        )));
    }

    #[tokio::test]
    async fn test_missing_characteristic_fails_without_write() {
        let mut h = Harness::started();
        h.session.handle_event(scan_result(Some("ArduinoIMU"), 1));
        h.session
            .handle_event(BleEvent::ConnectionStateChanged(LinkState::Connected));

        let mut layout = imu_layout();
        layout[1].characteristics.clear();
        h.session.handle_event(BleEvent::ServicesDiscovered(Ok(layout)));

        assert_eq!(h.session.state(), SessionState::Failed);
        assert_eq!(h.central.count(is_descriptor_write), 0);
        assert_eq!(h.central.count(|c| *c == Call::Close(1)), 1);
        assert_eq!(h.last_status().unwrap().message, "IMU characteristic not found");
    }

    #[tokio::test]
    async fn test_missing_service_fails() {
        let mut h = Harness::started();
        h.session.handle_event(scan_result(Some("ArduinoIMU"), 1));
        h.session
            .handle_event(BleEvent::ConnectionStateChanged(LinkState::Connected));
        h.session
            .handle_event(BleEvent::ServicesDiscovered(Ok(vec![imu_layout().remove(0)])));

        assert_eq!(h.session.state(), SessionState::Failed);
        assert_eq!(h.central.count(is_descriptor_write), 0);
        assert_eq!(h.last_status().unwrap().message, "IMU service not found");
    }

    #[tokio::test]
    async fn test_missing_cccd_fails() {
        let mut h = Harness::started();
        h.session.handle_event(scan_result(Some("ArduinoIMU"), 1));
        h.session
            .handle_event(BleEvent::ConnectionStateChanged(LinkState::Connected));

        let mut layout = imu_layout();
        layout[1].characteristics[0].descriptors.clear();
        h.session.handle_event(BleEvent::ServicesDiscovered(Ok(layout)));

        assert_eq!(h.session.state(), SessionState::Failed);
        assert_eq!(h.central.count(is_descriptor_write), 0);
    }

    #[tokio::test]
    async fn test_discovery_error_fails() {
        let mut h = Harness::started();
        h.session.handle_event(scan_result(Some("ArduinoIMU"), 1));
        h.session
            .handle_event(BleEvent::ConnectionStateChanged(LinkState::Connected));
        h.session
            .handle_event(BleEvent::ServicesDiscovered(Err(GattStatus(133))));

        assert_eq!(h.session.state(), SessionState::Failed);
        assert_eq!(h.central.count(is_descriptor_write), 0);
        assert!(h
            .last_status()
            .unwrap()
            .message
            .starts_with("Service discovery failed"));
    }

    #[tokio::test]
    async fn test_rejected_subscription_fails() {
        let mut h = Harness::subscribed();
        h.session
            .handle_event(BleEvent::DescriptorWritten(Err(GattStatus(5))));

        assert_eq!(h.session.state(), SessionState::Failed);
        assert_eq!(h.central.count(|c| matches!(c, Call::Close(_))), 1);
    }

    #[tokio::test]
    async fn test_notification_appends_line() {
        let mut h = Harness::subscribed();
        h.session
            .handle_event(BleEvent::DescriptorWritten(Ok(())));
        h.session.handle_event(notification(&[1, 2, 255]));

        assert_eq!(*h.lines.lock().unwrap(), vec!["1,2,255".to_string()]);
        assert_eq!(h.session.samples_recorded(), 1);
    }

    #[tokio::test]
    async fn test_other_characteristic_is_ignored() {
        let mut h = Harness::subscribed();
        h.session.handle_event(BleEvent::CharacteristicChanged {
            characteristic: CCCD_UUID,
            value: vec![9],
        });

        assert!(h.lines.lock().unwrap().is_empty());
        assert_eq!(h.session.samples_recorded(), 0);
    }

    #[tokio::test]
    async fn test_storage_failure_ends_session() {
        let sink = MemorySink {
            fail: true,
            ..Default::default()
        };
        let mut h = Harness::with(RecordingCentral::default(), sink);
        h.session.start(PermissionStatus::Granted);
        h.session.handle_event(scan_result(Some("ArduinoIMU"), 1));
        h.session
            .handle_event(BleEvent::ConnectionStateChanged(LinkState::Connected));
        h.session
            .handle_event(BleEvent::ServicesDiscovered(Ok(imu_layout())));
        h.session.handle_event(notification(&[1]));

        assert_eq!(h.session.state(), SessionState::Failed);
        assert_eq!(h.central.count(|c| matches!(c, Call::Close(_))), 1);
        let status = h.last_status().unwrap();
        assert_eq!(status.severity, MessageSeverity::Error);
        assert!(status.message.starts_with("Failed to save IMU data"));
    }

    #[tokio::test]
    async fn test_disconnect_while_connecting_is_connect_failure() {
        let mut h = Harness::started();
        h.session.handle_event(scan_result(Some("ArduinoIMU"), 1));
        h.session
            .handle_event(BleEvent::ConnectionStateChanged(LinkState::Disconnected));

        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert_eq!(h.central.count(|c| *c == Call::Close(1)), 1);
        assert_eq!(
            h.last_status().unwrap().message,
            "Failed to connect to ArduinoIMU"
        );
    }

    #[tokio::test]
    async fn test_link_loss_releases_connection_once() {
        let mut h = Harness::subscribed();
        h.session
            .handle_event(BleEvent::ConnectionStateChanged(LinkState::Disconnected));
        // The platform may report the same loss again
        h.session
            .handle_event(BleEvent::ConnectionStateChanged(LinkState::Disconnected));
        h.session.teardown();

        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert_eq!(h.central.count(|c| matches!(c, Call::Close(_))), 1);
        assert!(h.lines.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_events_after_end_are_ignored() {
        let mut h = Harness::subscribed();
        h.session.teardown();
        h.session.handle_event(notification(&[1, 2]));

        assert!(h.lines.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let mut h = Harness::subscribed();
        h.session.teardown();
        h.session.teardown();

        assert_eq!(h.central.count(|c| *c == Call::Close(1)), 1);
        assert_eq!(h.session.state(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_while_scanning_cancels_timer() {
        let mut h = Harness::started();
        h.session.teardown();
        h.session.teardown();

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(h.events_rx.try_recv().is_err());
        assert_eq!(h.central.count(|c| *c == Call::StopScan), 1);
        assert_eq!(h.central.count(|c| matches!(c, Call::Close(_))), 0);
    }

    #[tokio::test]
    async fn test_drop_releases_connection() {
        let h = Harness::subscribed();
        let central = h.central.clone();
        drop(h);

        assert_eq!(central.count(|c| matches!(c, Call::Close(_))), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_capture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("imu_data.csv");
        std::fs::write(&path, "prior\n").unwrap();

        let central = RecordingCentral::default();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let (app_tx, _app_rx) = mpsc::unbounded_channel();
        let mut session = Session::new(
            Box::new(central.clone()),
            Box::new(CsvSampleWriter::new(&path)),
            EventSender::new(SessionId(1), events_tx),
            app_tx,
        );
        session.start(PermissionStatus::Granted);

        tokio::time::sleep(Duration::from_secs(3)).await;
        session.handle_event(scan_result(Some("ArduinoIMU"), 0x42));
        tokio::time::sleep(Duration::from_millis(200)).await;
        session.handle_event(BleEvent::ConnectionStateChanged(LinkState::Connected));
        tokio::time::sleep(Duration::from_millis(300)).await;
        session.handle_event(BleEvent::ServicesDiscovered(Ok(imu_layout())));

        assert_eq!(session.state(), SessionState::Subscribed);
        assert_eq!(central.count(is_descriptor_write), 1);

        for payload in [[10u8, 20], [11, 21], [12, 22]] {
            session.handle_event(notification(&payload));
        }

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "prior\n10,20\n11,21\n12,22\n"
        );
        assert_eq!(central.count(|c| *c == Call::StopScan), 1);
    }
}
