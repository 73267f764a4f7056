//! BLE Central Abstraction
//!
//! The session drives the radio through [`BleCentral`]. Every method is a
//! fire-and-forget request: it returns as soon as the platform accepted it,
//! and the outcome arrives later as a [`BleEvent`] posted through the
//! backend's [`EventSender`].

use crate::domain::models::{BleEvent, DiscoveredDevice, SessionEvent, SessionId};
use crate::infrastructure::bluetooth::error::BleError;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

/// Owned token for one open GATT link.
///
/// Not `Clone`: [`BleCentral::close`] consumes it, so a link can only be
/// released once.
#[derive(Debug, PartialEq, Eq)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Posts backend results into the ordered session channel
#[derive(Debug, Clone)]
pub struct EventSender {
    session: SessionId,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSender {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Returns false once the receiving worker is gone
    pub fn send(&self, event: BleEvent) -> bool {
        trace!("Session {} event: {:?}", self.session, event);
        self.tx
            .send(SessionEvent {
                session: self.session,
                event,
            })
            .is_ok()
    }
}

/// Radio operations used by a session
pub trait BleCentral: Send {
    /// Begin discovery; each advertisement is posted as [`BleEvent::ScanResult`]
    fn start_scan(&mut self) -> Result<(), BleError>;

    fn stop_scan(&mut self) -> Result<(), BleError>;

    /// Request a link; completion is posted as [`BleEvent::ConnectionStateChanged`]
    fn connect(&mut self, device: &DiscoveredDevice) -> Result<ConnectionHandle, BleError>;

    /// Completion is posted as [`BleEvent::ServicesDiscovered`]
    fn discover_services(&mut self, connection: &ConnectionHandle) -> Result<(), BleError>;

    /// Route incoming notifications of `characteristic` to the event channel
    fn set_notify(
        &mut self,
        connection: &ConnectionHandle,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), BleError>;

    /// Completion is posted as [`BleEvent::DescriptorWritten`]
    fn write_descriptor(
        &mut self,
        connection: &ConnectionHandle,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), BleError>;

    /// Release the link
    fn close(&mut self, connection: ConnectionHandle);
}
