//! The seam between the client and a Bluetooth stack.
//!
//! Commands are fire-and-forget: a backend starts the work and reports the
//! outcome later as an [`AdapterEvent`] on its event stream. Handles are
//! opaque numbers minted by the backend.
//!
//! - [`SimulatedTransport`] plays a heart-rate strap in-process.
//! - [`BleTransport`] talks to real hardware through btleplug (requires the
//!   `ble` feature).

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use uuid::Uuid;

use crate::config::{HrmConfig, TransportKind};
use crate::error::TransportError;

#[cfg(feature = "ble")]
mod ble;
mod simulated;

#[cfg(feature = "ble")]
pub use ble::BleTransport;
pub use simulated::SimulatedTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeripheralHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CharacteristicHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AdapterState {
    #[default]
    Unknown,
    PoweredOff,
    PoweredOn,
    Unauthorized,
    Unsupported,
}

/// A service or characteristic as reported by discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discovered<H> {
    pub uuid: Uuid,
    pub handle: H,
}

pub type DiscoveredService = Discovered<ServiceHandle>;
pub type DiscoveredCharacteristic = Discovered<CharacteristicHandle>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    PowerStateChanged(AdapterState),
    PeripheralDiscovered {
        peripheral: PeripheralHandle,
        name: Option<String>,
    },
    Connected {
        peripheral: PeripheralHandle,
    },
    Disconnected {
        peripheral: PeripheralHandle,
        error: Option<TransportError>,
    },
    ServicesDiscovered {
        peripheral: PeripheralHandle,
        services: Vec<DiscoveredService>,
    },
    CharacteristicsDiscovered {
        peripheral: PeripheralHandle,
        service: ServiceHandle,
        characteristics: Vec<DiscoveredCharacteristic>,
    },
    ValueUpdated {
        peripheral: PeripheralHandle,
        characteristic: CharacteristicHandle,
        value: Vec<u8>,
        error: Option<TransportError>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    /// Bring the adapter up; answered by a `PowerStateChanged` event.
    PowerUp,
    Scan {
        services: Vec<Uuid>,
    },
    StopScan,
    Connect(PeripheralHandle),
    Disconnect(PeripheralHandle),
    DiscoverServices(PeripheralHandle),
    DiscoverCharacteristics {
        peripheral: PeripheralHandle,
        service: ServiceHandle,
    },
    SetNotify {
        peripheral: PeripheralHandle,
        characteristic: CharacteristicHandle,
        enabled: bool,
    },
    ReadValue {
        peripheral: PeripheralHandle,
        characteristic: CharacteristicHandle,
    },
}

pub trait Transport: Send + Sync {
    fn power_state(&self) -> AdapterState;

    /// Starts `command` without waiting for it to finish.
    fn execute(&self, command: TransportCommand);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn power_state(&self) -> AdapterState {
        (**self).power_state()
    }

    fn execute(&self, command: TransportCommand) {
        (**self).execute(command)
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = AdapterEvent> + Send>>;

/// Builds the backend selected in `config`.
pub async fn open_transport(
    config: &HrmConfig,
) -> anyhow::Result<(Arc<dyn Transport>, EventStream)> {
    match config.transport {
        TransportKind::Simulated => {
            let (transport, events) = SimulatedTransport::new(config.simulated.clone());
            Ok((Arc::new(transport), events))
        }
        #[cfg(feature = "ble")]
        TransportKind::Ble => {
            let (transport, events) = BleTransport::new().await?;
            Ok((Arc::new(transport), events))
        }
        #[cfg(not(feature = "ble"))]
        TransportKind::Ble => anyhow::bail!("built without the `ble` feature"),
    }
}
