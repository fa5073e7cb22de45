use tokio::sync::mpsc::UnboundedSender;

use crate::error::UpdateError;
use crate::observer::HrmObserver;

/// Observer callbacks, as messages for a UI thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HrmSignal {
    Connected,
    Disconnected,
    HeartRate {
        heart_rate: u8,
        error: Option<UpdateError>,
    },
    DeviceInfo {
        manufacturer: String,
        error: Option<UpdateError>,
    },
    BodyLocation {
        location: String,
        error: Option<UpdateError>,
    },
    DiscoveredPeripherals(Vec<String>),
}

/// Requests from a UI to the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCommand {
    StartScanning,
    StopScanning,
    ConnectDevice(String),
    DisconnectDevice,
    SetDebugging(bool),
}

/// Forwards every callback as an [`HrmSignal`]. A receiver that went away is
/// not an error; the signal is dropped.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: UnboundedSender<HrmSignal>,
}

impl ChannelObserver {
    pub fn new(tx: UnboundedSender<HrmSignal>) -> Self {
        ChannelObserver { tx }
    }

    fn send(&self, signal: HrmSignal) {
        let _ = self.tx.send(signal);
    }
}

impl HrmObserver for ChannelObserver {
    fn connected(&self) {
        self.send(HrmSignal::Connected);
    }

    fn disconnected(&self) {
        self.send(HrmSignal::Disconnected);
    }

    fn heart_rate_updated(&self, heart_rate: u8, error: Option<&UpdateError>) {
        self.send(HrmSignal::HeartRate {
            heart_rate,
            error: error.cloned(),
        });
    }

    fn device_info_updated(&self, manufacturer: &str, error: Option<&UpdateError>) {
        self.send(HrmSignal::DeviceInfo {
            manufacturer: manufacturer.to_string(),
            error: error.cloned(),
        });
    }

    fn body_location_updated(&self, location: &str, error: Option<&UpdateError>) {
        self.send(HrmSignal::BodyLocation {
            location: location.to_string(),
            error: error.cloned(),
        });
    }

    fn monitors_discovered(&self, monitors: &[String]) {
        self.send(HrmSignal::DiscoveredPeripherals(monitors.to_vec()));
    }
}
