//! Bluetooth Module
//!
//! Drives one BLE peripheral from scan to notification capture.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        BleWorker                          │
//! │   (owns the current session and the event channel)        │
//! └─────────────────────┬────────────────────────────────────┘
//!                       │ SessionEvent (ordered)
//!                       ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                         Session                           │
//! │   (state machine: scan -> connect -> discover -> notify)  │
//! └──────────┬──────────────────────────────┬────────────────┘
//!            │ BleCentral                   │ SampleSink
//!     ┌──────┴───────┐                ┌─────┴──────┐
//!     ▼              ▼                ▼            │
//! ┌─────────┐  ┌───────────┐   ┌──────────────┐    │
//! │ WinRT   │  │ Simulated │   │ CSV writer   │    │
//! │ central │  │ central   │   │ (storage)    │    │
//! └─────────┘  └───────────┘   └──────────────┘    │
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - GATT identifiers, name filter and sample encoding
//! - [`central`] - Backend trait and the session event sender
//! - [`session`] - Per-attempt state machine
//! - [`worker`] - Event loop thread
//! - [`simulated`] - In-process peripheral
//! - `scanner`, `connection`, `winrt` - Windows backend

pub mod central;
pub mod error;
pub mod protocol;
pub mod session;
pub mod simulated;
pub mod worker;

#[cfg(windows)]
pub mod connection;
#[cfg(windows)]
pub mod scanner;
#[cfg(windows)]
pub mod winrt;

pub use worker::{spawn_ble_worker, BleWorkerHandle};
