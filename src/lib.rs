//! Bluetooth LE client for heart-rate monitors.
//!
//! [`HeartRateClient`] scans for peripherals advertising the Heart Rate
//! service, connects to one by name, walks its services and characteristics,
//! subscribes to heart-rate measurements and reads the body sensor location
//! and manufacturer name. Results go to an [`HrmObserver`].
//!
//! The client does no I/O of its own. A [`Transport`] carries out its
//! commands and reports completions as [`AdapterEvent`]s, which are fed back
//! through [`HeartRateClient::handle_event`]; [`HrmManager`] does that on a
//! tokio task.
//!
//! ```no_run
//! use hrm::{HeartRateClient, HrmManager, HrmObserver, SimulatedTransport};
//! use hrm::config::SimulatedConfig;
//!
//! struct Print;
//!
//! impl HrmObserver for Print {
//!     fn heart_rate_updated(&self, heart_rate: u8, _error: Option<&hrm::UpdateError>) {
//!         println!("HR: {heart_rate}");
//!     }
//! }
//!
//! # async fn demo() {
//! let (transport, events) = SimulatedTransport::new(SimulatedConfig::default());
//! let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
//! let manager = HrmManager::new(HeartRateClient::new(transport, Print), events, rx);
//! let client = manager.client();
//! client.start_scan();
//! tokio::spawn(manager.run());
//! # }
//! ```

mod client;
pub mod config;
pub mod decode;
pub mod error;
pub mod gatt;
pub mod logging;
mod manager;
mod observer;
pub mod signal;
pub mod state;
pub mod transport;

pub use client::HeartRateClient;
pub use error::{DecodeError, HrmError, ProtocolMisuse, Result, TransportError, UpdateError};
pub use manager::HrmManager;
pub use observer::{HrmObserver, Notification};
pub use state::{ClientState, ConnectionPhase};
#[cfg(feature = "ble")]
pub use transport::BleTransport;
pub use transport::{AdapterEvent, AdapterState, SimulatedTransport, Transport, TransportCommand};
