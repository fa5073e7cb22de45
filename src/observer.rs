use crate::error::UpdateError;

/// Receives everything the client has to say.
///
/// Callbacks run on whatever context feeds events into
/// [`HeartRateClient::handle_event`](crate::HeartRateClient::handle_event),
/// one per causing event and in the order those events arrived. A failed
/// update carries the error next to a sentinel value (`0` or `""`).
pub trait HrmObserver: Send + Sync {
    fn connected(&self) {}

    fn disconnected(&self) {}

    fn heart_rate_updated(&self, _heart_rate: u8, _error: Option<&UpdateError>) {}

    fn device_info_updated(&self, _manufacturer: &str, _error: Option<&UpdateError>) {}

    fn body_location_updated(&self, _location: &str, _error: Option<&UpdateError>) {}

    /// Always the full de-duplicated set of names seen during this scan.
    fn monitors_discovered(&self, _monitors: &[String]) {}
}

impl<O: HrmObserver + ?Sized> HrmObserver for std::sync::Arc<O> {
    fn connected(&self) {
        (**self).connected()
    }

    fn disconnected(&self) {
        (**self).disconnected()
    }

    fn heart_rate_updated(&self, heart_rate: u8, error: Option<&UpdateError>) {
        (**self).heart_rate_updated(heart_rate, error)
    }

    fn device_info_updated(&self, manufacturer: &str, error: Option<&UpdateError>) {
        (**self).device_info_updated(manufacturer, error)
    }

    fn body_location_updated(&self, location: &str, error: Option<&UpdateError>) {
        (**self).body_location_updated(location, error)
    }

    fn monitors_discovered(&self, monitors: &[String]) {
        (**self).monitors_discovered(monitors)
    }
}

/// A notification produced by the state machine, waiting to be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
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
    MonitorsDiscovered(Vec<String>),
}

impl Notification {
    pub fn deliver(&self, observer: &dyn HrmObserver) {
        match self {
            Notification::Connected => observer.connected(),
            Notification::Disconnected => observer.disconnected(),
            Notification::HeartRate { heart_rate, error } => {
                observer.heart_rate_updated(*heart_rate, error.as_ref())
            }
            Notification::DeviceInfo {
                manufacturer,
                error,
            } => observer.device_info_updated(manufacturer, error.as_ref()),
            Notification::BodyLocation { location, error } => {
                observer.body_location_updated(location, error.as_ref())
            }
            Notification::MonitorsDiscovered(monitors) => observer.monitors_discovered(monitors),
        }
    }
}
