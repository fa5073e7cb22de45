//! A heart-rate strap that lives in the process.
//!
//! Answers every command with the events a Polar-style strap would produce:
//! a Heart Rate service, a Device Information service and a Battery service
//! the client is expected to ignore. While notifications are on, random
//! readings are streamed at the configured interval.

use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::SimulatedConfig;
use crate::error::TransportError;
use crate::gatt::{uuid_from_u16, CharacteristicKind, ServiceKind, HEART_RATE_SERVICE_UUID};

use super::{
    AdapterEvent, AdapterState, CharacteristicHandle, Discovered, EventStream, PeripheralHandle,
    ServiceHandle, Transport, TransportCommand,
};

const HEART_RATE_SERVICE: ServiceHandle = ServiceHandle(1);
const DEVICE_INFORMATION_SERVICE: ServiceHandle = ServiceHandle(2);
const BATTERY_SERVICE: ServiceHandle = ServiceHandle(3);

const MEASUREMENT: CharacteristicHandle = CharacteristicHandle(10);
const BODY_LOCATION: CharacteristicHandle = CharacteristicHandle(11);
const MANUFACTURER_NAME: CharacteristicHandle = CharacteristicHandle(20);
const BATTERY_LEVEL: CharacteristicHandle = CharacteristicHandle(30);

#[derive(Default)]
struct SimState {
    power: AdapterState,
    connected: Option<PeripheralHandle>,
    streaming: Option<CancellationToken>,
}

pub struct SimulatedTransport {
    config: SimulatedConfig,
    tx: UnboundedSender<AdapterEvent>,
    state: Mutex<SimState>,
}

impl SimulatedTransport {
    /// The adapter starts in `Unknown` and powers up on request. An inverted
    /// bpm range is swapped.
    pub fn new(mut config: SimulatedConfig) -> (Self, EventStream) {
        if config.bpm_min > config.bpm_max {
            std::mem::swap(&mut config.bpm_min, &mut config.bpm_max);
        }
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = futures::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed();
        let transport = SimulatedTransport {
            config,
            tx,
            state: Mutex::new(SimState::default()),
        };
        (transport, events)
    }

    /// Drops the link as if the strap went out of range.
    pub fn drop_link(&self) {
        let mut state = self.state.lock();
        let Some(peripheral) = state.connected.take() else {
            return;
        };
        stop_stream(&mut state);
        self.emit(AdapterEvent::Disconnected {
            peripheral,
            error: Some(TransportError::new("connection timeout")),
        });
    }

    fn monitor(&self, peripheral: PeripheralHandle) -> Option<&str> {
        let index = usize::try_from(peripheral.0.checked_sub(1)?).ok()?;
        self.config.monitors.get(index).map(String::as_str)
    }

    fn emit(&self, event: AdapterEvent) {
        if self.tx.send(event).is_err() {
            trace!("event stream dropped");
        }
    }

    fn start_stream(&self, state: &mut SimState, peripheral: PeripheralHandle) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime, heart rate stream not started");
            return;
        };
        let token = CancellationToken::new();
        if let Some(previous) = state.streaming.replace(token.clone()) {
            previous.cancel();
        }
        runtime.spawn(transmit_fake_hr_data(
            self.tx.clone(),
            peripheral,
            self.config.bpm_min..=self.config.bpm_max,
            Duration::from_millis(self.config.interval_ms),
            token,
        ));
    }

    fn read(&self, peripheral: PeripheralHandle, characteristic: CharacteristicHandle) {
        let (value, error) = match characteristic {
            BODY_LOCATION => (vec![self.config.body_location], None),
            MANUFACTURER_NAME => (self.config.manufacturer.as_bytes().to_vec(), None),
            BATTERY_LEVEL => (vec![100], None),
            _ => (Vec::new(), Some(TransportError::new("read not permitted"))),
        };
        self.emit(AdapterEvent::ValueUpdated {
            peripheral,
            characteristic,
            value,
            error,
        });
    }
}

impl Transport for SimulatedTransport {
    fn power_state(&self) -> AdapterState {
        self.state.lock().power
    }

    fn execute(&self, command: TransportCommand) {
        let mut state = self.state.lock();
        match command {
            TransportCommand::PowerUp => {
                state.power = AdapterState::PoweredOn;
                self.emit(AdapterEvent::PowerStateChanged(AdapterState::PoweredOn));
            }
            TransportCommand::Scan { services } => {
                if state.power != AdapterState::PoweredOn {
                    warn!(power = ?state.power, "scan requested while adapter is not powered on");
                    return;
                }
                if !services.is_empty() && !services.contains(&HEART_RATE_SERVICE_UUID) {
                    return;
                }
                for (index, name) in self.config.monitors.iter().enumerate() {
                    self.emit(AdapterEvent::PeripheralDiscovered {
                        peripheral: PeripheralHandle(index as u64 + 1),
                        name: Some(name.clone()),
                    });
                }
            }
            TransportCommand::StopScan => {}
            TransportCommand::Connect(peripheral) => {
                let Some(name) = self.monitor(peripheral) else {
                    warn!(?peripheral, "connect to unknown peripheral");
                    return;
                };
                debug!(monitor = name, "simulated connect");
                state.connected = Some(peripheral);
                self.emit(AdapterEvent::Connected { peripheral });
            }
            TransportCommand::Disconnect(peripheral) => {
                // a link that already dropped was reported then
                if state.connected != Some(peripheral) {
                    return;
                }
                state.connected = None;
                stop_stream(&mut state);
                self.emit(AdapterEvent::Disconnected {
                    peripheral,
                    error: None,
                });
            }
            TransportCommand::DiscoverServices(peripheral) => {
                if state.connected != Some(peripheral) {
                    return;
                }
                self.emit(AdapterEvent::ServicesDiscovered {
                    peripheral,
                    services: vec![
                        Discovered {
                            uuid: ServiceKind::HeartRate.uuid(),
                            handle: HEART_RATE_SERVICE,
                        },
                        Discovered {
                            uuid: ServiceKind::DeviceInformation.uuid(),
                            handle: DEVICE_INFORMATION_SERVICE,
                        },
                        Discovered {
                            uuid: uuid_from_u16(0x180F),
                            handle: BATTERY_SERVICE,
                        },
                    ],
                });
            }
            TransportCommand::DiscoverCharacteristics {
                peripheral,
                service,
            } => {
                if state.connected != Some(peripheral) {
                    return;
                }
                let characteristics = match service {
                    HEART_RATE_SERVICE => vec![
                        Discovered {
                            uuid: CharacteristicKind::HeartRateMeasurement.uuid(),
                            handle: MEASUREMENT,
                        },
                        Discovered {
                            uuid: CharacteristicKind::BodySensorLocation.uuid(),
                            handle: BODY_LOCATION,
                        },
                    ],
                    DEVICE_INFORMATION_SERVICE => vec![Discovered {
                        uuid: CharacteristicKind::ManufacturerName.uuid(),
                        handle: MANUFACTURER_NAME,
                    }],
                    BATTERY_SERVICE => vec![Discovered {
                        uuid: uuid_from_u16(0x2A19),
                        handle: BATTERY_LEVEL,
                    }],
                    _ => Vec::new(),
                };
                self.emit(AdapterEvent::CharacteristicsDiscovered {
                    peripheral,
                    service,
                    characteristics,
                });
            }
            TransportCommand::SetNotify {
                peripheral,
                characteristic,
                enabled,
            } => {
                if state.connected != Some(peripheral) || characteristic != MEASUREMENT {
                    return;
                }
                if enabled {
                    self.start_stream(&mut state, peripheral);
                } else {
                    stop_stream(&mut state);
                }
            }
            TransportCommand::ReadValue {
                peripheral,
                characteristic,
            } => {
                if state.connected == Some(peripheral) {
                    self.read(peripheral, characteristic);
                }
            }
        }
    }
}

fn stop_stream(state: &mut SimState) {
    if let Some(token) = state.streaming.take() {
        token.cancel();
    }
}

async fn transmit_fake_hr_data(
    tx: UnboundedSender<AdapterEvent>,
    peripheral: PeripheralHandle,
    bpm: std::ops::RangeInclusive<u8>,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let heart_rate = rand::thread_rng().gen_range(bpm.clone());
                let event = AdapterEvent::ValueUpdated {
                    peripheral,
                    characteristic: MEASUREMENT,
                    value: vec![0x00, heart_rate],
                    error: None,
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::*;

    fn drain(events: &mut EventStream) -> Vec<AdapterEvent> {
        let mut out = Vec::new();
        while let Some(Some(event)) = events.next().now_or_never() {
            out.push(event);
        }
        out
    }

    #[test]
    fn scan_requires_power() {
        let (transport, mut events) = SimulatedTransport::new(SimulatedConfig::default());
        transport.execute(TransportCommand::Scan {
            services: vec![HEART_RATE_SERVICE_UUID],
        });
        assert!(drain(&mut events).is_empty());

        transport.execute(TransportCommand::PowerUp);
        assert_eq!(transport.power_state(), AdapterState::PoweredOn);
        transport.execute(TransportCommand::Scan {
            services: vec![HEART_RATE_SERVICE_UUID],
        });
        let events = drain(&mut events);
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[1],
            AdapterEvent::PeripheralDiscovered {
                peripheral: PeripheralHandle(1),
                name: Some("Polar H7".to_string())
            }
        );
    }

    #[test]
    fn reads_answer_with_configured_values() {
        let config = SimulatedConfig {
            manufacturer: "Garmin".to_string(),
            body_location: 2,
            ..SimulatedConfig::default()
        };
        let (transport, mut events) = SimulatedTransport::new(config);
        let strap = PeripheralHandle(2);
        transport.execute(TransportCommand::Connect(strap));
        transport.execute(TransportCommand::ReadValue {
            peripheral: strap,
            characteristic: MANUFACTURER_NAME,
        });
        transport.execute(TransportCommand::ReadValue {
            peripheral: strap,
            characteristic: BODY_LOCATION,
        });

        let events = drain(&mut events);
        assert_eq!(events[0], AdapterEvent::Connected { peripheral: strap });
        assert!(matches!(
            &events[1],
            AdapterEvent::ValueUpdated { value, error: None, .. } if value.as_slice() == b"Garmin"
        ));
        assert!(matches!(
            &events[2],
            AdapterEvent::ValueUpdated { value, .. } if value.as_slice() == [2u8]
        ));
    }

    #[test]
    fn unknown_peripherals_never_connect() {
        let (transport, mut events) = SimulatedTransport::new(SimulatedConfig::default());
        transport.execute(TransportCommand::Connect(PeripheralHandle(0)));
        transport.execute(TransportCommand::Connect(PeripheralHandle(42)));
        assert!(drain(&mut events).is_empty());
    }

    #[test]
    fn disconnect_reports_each_link_once() {
        let (transport, mut events) = SimulatedTransport::new(SimulatedConfig::default());
        let strap = PeripheralHandle(1);
        transport.execute(TransportCommand::Connect(strap));
        transport.drop_link();
        transport.execute(TransportCommand::Disconnect(strap));

        let events = drain(&mut events);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1],
            AdapterEvent::Disconnected { error: Some(_), .. }
        ));
    }

    #[tokio::test]
    async fn inverted_bpm_range_is_swapped() {
        let config = SimulatedConfig {
            bpm_min: 90,
            bpm_max: 80,
            interval_ms: 10,
            ..SimulatedConfig::default()
        };
        let (transport, mut events) = SimulatedTransport::new(config);
        let strap = PeripheralHandle(1);
        transport.execute(TransportCommand::Connect(strap));
        transport.execute(TransportCommand::SetNotify {
            peripheral: strap,
            characteristic: MEASUREMENT,
            enabled: true,
        });

        events.next().await;
        match events.next().await {
            Some(AdapterEvent::ValueUpdated { value, .. }) => {
                assert!((80..=90).contains(&value[1]));
            }
            other => panic!("expected a reading, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn notifications_stream_until_disabled() {
        let config = SimulatedConfig {
            bpm_min: 60,
            bpm_max: 60,
            interval_ms: 10,
            ..SimulatedConfig::default()
        };
        let (transport, mut events) = SimulatedTransport::new(config);
        let strap = PeripheralHandle(1);
        transport.execute(TransportCommand::Connect(strap));
        transport.execute(TransportCommand::SetNotify {
            peripheral: strap,
            characteristic: MEASUREMENT,
            enabled: true,
        });

        assert_eq!(
            events.next().await,
            Some(AdapterEvent::Connected { peripheral: strap })
        );
        assert_eq!(
            events.next().await,
            Some(AdapterEvent::ValueUpdated {
                peripheral: strap,
                characteristic: MEASUREMENT,
                value: vec![0x00, 60],
                error: None,
            })
        );

        transport.drop_link();
        // a reading may already be queued ahead of the disconnect
        loop {
            match events.next().await {
                Some(AdapterEvent::ValueUpdated { .. }) => continue,
                other => {
                    assert!(matches!(
                        other,
                        Some(AdapterEvent::Disconnected { error: Some(_), .. })
                    ));
                    break;
                }
            }
        }
    }
}
