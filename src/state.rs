//! Discovery, connection and subscription state machine.
//!
//! [`Machine`] never touches the transport or the observer. Every entry point
//! mutates state and returns the [`Effect`]s the caller has to carry out, in
//! order. Events for a peripheral other than the active target are dropped,
//! which is what keeps stale completions from a torn-down connection quiet.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use tracing::{debug, info, trace};

use crate::decode::decode_update;
use crate::error::{ProtocolMisuse, TransportError};
use crate::gatt::{CharacteristicKind, ServiceKind, SCAN_FILTER};
use crate::observer::Notification;
use crate::transport::{
    AdapterEvent, AdapterState, CharacteristicHandle, DiscoveredCharacteristic, DiscoveredService,
    PeripheralHandle, ServiceHandle, TransportCommand,
};

/// Where the client is as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Scanning,
    Connecting,
    DiscoveringServices,
    DiscoveringCharacteristics,
    /// Heart-rate notifications are enabled.
    Active,
    /// Teardown requested, waiting for the adapter to confirm.
    Disconnected,
}

/// Progress of the single active connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Connecting,
    ServiceDiscovery,
    /// At least one recognized service is waiting for its characteristics.
    CharacteristicDiscovery,
    Subscribed,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Command(TransportCommand),
    Notify(Notification),
}

#[derive(Debug)]
struct ActiveConnection {
    name: String,
    peripheral: PeripheralHandle,
    phase: ConnectionPhase,
    services: HashMap<ServiceHandle, ServiceKind>,
    pending: HashSet<ServiceHandle>,
    characteristics: HashMap<CharacteristicHandle, CharacteristicKind>,
}

impl ActiveConnection {
    fn new(name: String, peripheral: PeripheralHandle) -> Self {
        Self {
            name,
            peripheral,
            phase: ConnectionPhase::Connecting,
            services: HashMap::new(),
            pending: HashSet::new(),
            characteristics: HashMap::new(),
        }
    }

    fn is_subscribed(&self) -> bool {
        self.characteristics
            .values()
            .any(|kind| *kind == CharacteristicKind::HeartRateMeasurement)
    }
}

#[derive(Debug)]
pub struct Machine {
    adapter_state: AdapterState,
    scanning: bool,
    monitors: BTreeMap<String, PeripheralHandle>,
    connection: Option<ActiveConnection>,
    /// Links given up on whose `Disconnected` has not arrived yet, counted
    /// per peripheral.
    abandoned: HashMap<PeripheralHandle, usize>,
    debugging: bool,
}

impl Machine {
    pub fn new(adapter_state: AdapterState) -> Self {
        Self {
            adapter_state,
            scanning: false,
            monitors: BTreeMap::new(),
            connection: None,
            abandoned: HashMap::new(),
            debugging: false,
        }
    }

    pub fn adapter_state(&self) -> AdapterState {
        self.adapter_state
    }

    pub fn state(&self) -> ClientState {
        match &self.connection {
            Some(conn) => match conn.phase {
                ConnectionPhase::Connecting => ClientState::Connecting,
                ConnectionPhase::ServiceDiscovery => ClientState::DiscoveringServices,
                ConnectionPhase::CharacteristicDiscovery => ClientState::DiscoveringCharacteristics,
                ConnectionPhase::Subscribed => ClientState::Active,
                ConnectionPhase::Disconnected => ClientState::Disconnected,
            },
            None if self.scanning => ClientState::Scanning,
            None => ClientState::Idle,
        }
    }

    pub fn connection_phase(&self) -> Option<ConnectionPhase> {
        self.connection.as_ref().map(|conn| conn.phase)
    }

    /// Names seen since the last scan started, sorted.
    pub fn discovered_monitors(&self) -> Vec<String> {
        self.monitors.keys().cloned().collect()
    }

    pub fn active_monitor(&self) -> Option<&str> {
        self.connection.as_ref().map(|conn| conn.name.as_str())
    }

    pub fn is_debugging(&self) -> bool {
        self.debugging
    }

    pub fn set_debugging(&mut self, enabled: bool) {
        self.debugging = enabled;
    }

    pub fn start_scan(&mut self) -> Vec<Effect> {
        if self.scanning {
            return Vec::new();
        }
        if let Some(conn) = &self.connection {
            self.report(format_args!(
                "[INFO] Scan request ignored, busy with {}",
                conn.name
            ));
            return Vec::new();
        }

        self.monitors.clear();
        self.scanning = true;

        if self.adapter_state == AdapterState::PoweredOn {
            self.report(format_args!("[INFO] Scanning for heart rate monitors"));
            vec![scan_command()]
        } else {
            self.report(format_args!(
                "[INFO] Adapter is {:?}, scan deferred until powered on",
                self.adapter_state
            ));
            vec![Effect::Command(TransportCommand::PowerUp)]
        }
    }

    pub fn stop_scan(&mut self) -> Vec<Effect> {
        if self.scanning {
            self.report(format_args!("[INFO] Stopped scanning"));
        }
        self.scanning = false;
        vec![Effect::Command(TransportCommand::StopScan)]
    }

    pub fn connect(&mut self, name: &str) -> Result<Vec<Effect>, ProtocolMisuse> {
        if name.is_empty() {
            return Err(ProtocolMisuse::EmptyName);
        }
        let peripheral = *self
            .monitors
            .get(name)
            .ok_or_else(|| ProtocolMisuse::UnknownMonitor(name.to_string()))?;

        if let Some(conn) = &self.connection {
            if conn.peripheral == peripheral && conn.phase != ConnectionPhase::Disconnected {
                debug!(monitor = name, "already connecting to this monitor");
                return Ok(Vec::new());
            }
        }

        self.report(format_args!("[INFO] Connecting to Heart Rate Monitor: {name}"));
        let mut effects = self.stop_scan();
        if let Some(previous) = self.connection.take() {
            // One Disconnected per abandoned link is swallowed, even when the
            // new target is the same peripheral.
            self.report(format_args!("[INFO] Abandoning {}", previous.name));
            if previous.phase != ConnectionPhase::Disconnected {
                effects.push(Effect::Command(TransportCommand::Disconnect(
                    previous.peripheral,
                )));
            }
            *self.abandoned.entry(previous.peripheral).or_default() += 1;
        }
        self.connection = Some(ActiveConnection::new(name.to_string(), peripheral));
        effects.push(Effect::Command(TransportCommand::Connect(peripheral)));
        Ok(effects)
    }

    pub fn disconnect(&mut self) -> Vec<Effect> {
        let Some(conn) = self.connection.as_mut() else {
            return Vec::new();
        };
        if conn.phase == ConnectionPhase::Disconnected {
            return Vec::new();
        }
        conn.phase = ConnectionPhase::Disconnected;
        let peripheral = conn.peripheral;
        self.report(format_args!("[INFO] Disconnecting from {peripheral:?}"));
        vec![Effect::Command(TransportCommand::Disconnect(peripheral))]
    }

    pub fn handle_event(&mut self, event: AdapterEvent) -> Vec<Effect> {
        match event {
            AdapterEvent::PowerStateChanged(state) => self.on_power_state(state),
            AdapterEvent::PeripheralDiscovered { peripheral, name } => {
                self.on_discovered(peripheral, name)
            }
            AdapterEvent::Connected { peripheral } => self.on_connected(peripheral),
            AdapterEvent::Disconnected { peripheral, error } => {
                self.on_disconnected(peripheral, error)
            }
            AdapterEvent::ServicesDiscovered {
                peripheral,
                services,
            } => self.on_services(peripheral, services),
            AdapterEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                characteristics,
            } => self.on_characteristics(peripheral, service, characteristics),
            AdapterEvent::ValueUpdated {
                peripheral,
                characteristic,
                value,
                error,
            } => self.on_value(peripheral, characteristic, &value, error),
        }
    }

    fn on_power_state(&mut self, state: AdapterState) -> Vec<Effect> {
        self.adapter_state = state;
        self.report(format_args!("[INFO] Update state to: {state:?}"));
        if state == AdapterState::PoweredOn && self.scanning {
            vec![scan_command()]
        } else {
            Vec::new()
        }
    }

    fn on_discovered(&mut self, peripheral: PeripheralHandle, name: Option<String>) -> Vec<Effect> {
        let Some(name) = name.filter(|name| !name.is_empty()) else {
            trace!(?peripheral, "ignoring unnamed peripheral");
            return Vec::new();
        };
        self.report(format_args!("[INFO] Found Heart Rate Monitor: {name}"));
        self.monitors.insert(name, peripheral);
        vec![Effect::Notify(Notification::MonitorsDiscovered(
            self.discovered_monitors(),
        ))]
    }

    fn on_connected(&mut self, peripheral: PeripheralHandle) -> Vec<Effect> {
        let Some(conn) = self.target_mut(peripheral) else {
            return Vec::new();
        };
        if conn.phase != ConnectionPhase::Connecting {
            trace!(?peripheral, phase = ?conn.phase, "duplicate connect completion");
            return Vec::new();
        }
        conn.phase = ConnectionPhase::ServiceDiscovery;
        let name = conn.name.clone();
        self.report(format_args!("[INFO] Did Connect to Peripheral: {name}"));
        vec![
            Effect::Notify(Notification::Connected),
            Effect::Command(TransportCommand::DiscoverServices(peripheral)),
        ]
    }

    fn on_disconnected(
        &mut self,
        peripheral: PeripheralHandle,
        error: Option<TransportError>,
    ) -> Vec<Effect> {
        if let Some(pending) = self.abandoned.get_mut(&peripheral) {
            *pending -= 1;
            if *pending == 0 {
                self.abandoned.remove(&peripheral);
            }
            trace!(?peripheral, "disconnect of an abandoned link");
            return Vec::new();
        }
        if self.target_mut(peripheral).is_none() {
            return Vec::new();
        }
        if let Some(conn) = self.connection.take() {
            match &error {
                Some(error) => self.report(format_args!(
                    "[INFO] Disconnected from {}: {error}",
                    conn.name
                )),
                None => self.report(format_args!("[INFO] Disconnected from {}", conn.name)),
            }
        }
        vec![Effect::Notify(Notification::Disconnected)]
    }

    fn on_services(
        &mut self,
        peripheral: PeripheralHandle,
        services: Vec<DiscoveredService>,
    ) -> Vec<Effect> {
        let debugging = self.debugging;
        let Some(conn) = self.target_mut(peripheral) else {
            return Vec::new();
        };
        if matches!(
            conn.phase,
            ConnectionPhase::Connecting | ConnectionPhase::Disconnected
        ) {
            trace!(?peripheral, phase = ?conn.phase, "services discovered out of phase");
            return Vec::new();
        }

        let mut effects = Vec::new();
        for service in services {
            if debugging {
                info!(target: "hrm::diagnostics", "[INFO] Did discover service: {}", service.uuid);
            }
            let Some(kind) = ServiceKind::from_uuid(&service.uuid) else {
                continue;
            };
            conn.services.insert(service.handle, kind);
            conn.pending.insert(service.handle);
            effects.push(Effect::Command(TransportCommand::DiscoverCharacteristics {
                peripheral,
                service: service.handle,
            }));
        }
        if !conn.pending.is_empty() && conn.phase == ConnectionPhase::ServiceDiscovery {
            conn.phase = ConnectionPhase::CharacteristicDiscovery;
        }
        effects
    }

    fn on_characteristics(
        &mut self,
        peripheral: PeripheralHandle,
        service: ServiceHandle,
        characteristics: Vec<DiscoveredCharacteristic>,
    ) -> Vec<Effect> {
        let debugging = self.debugging;
        let Some(conn) = self.target_mut(peripheral) else {
            return Vec::new();
        };
        let Some(service_kind) = conn.services.get(&service).copied() else {
            trace!(?service, "characteristics for an unrecognized service");
            return Vec::new();
        };
        if conn.phase == ConnectionPhase::Disconnected {
            return Vec::new();
        }
        conn.pending.remove(&service);

        let mut effects = Vec::new();
        for characteristic in characteristics {
            if debugging {
                info!(
                    target: "hrm::diagnostics",
                    "[INFO] Did discover characteristic {} for {service_kind:?}",
                    characteristic.uuid
                );
            }
            let Some(kind) = CharacteristicKind::from_uuid(&characteristic.uuid)
                .filter(|kind| kind.service() == service_kind)
            else {
                continue;
            };
            conn.characteristics.insert(characteristic.handle, kind);
            let command = match kind {
                CharacteristicKind::HeartRateMeasurement => TransportCommand::SetNotify {
                    peripheral,
                    characteristic: characteristic.handle,
                    enabled: true,
                },
                CharacteristicKind::BodySensorLocation | CharacteristicKind::ManufacturerName => {
                    TransportCommand::ReadValue {
                        peripheral,
                        characteristic: characteristic.handle,
                    }
                }
            };
            effects.push(Effect::Command(command));
        }

        if conn.is_subscribed() {
            conn.phase = ConnectionPhase::Subscribed;
        }
        effects
    }

    fn on_value(
        &mut self,
        peripheral: PeripheralHandle,
        characteristic: CharacteristicHandle,
        value: &[u8],
        error: Option<TransportError>,
    ) -> Vec<Effect> {
        let Some(conn) = self.target_mut(peripheral) else {
            return Vec::new();
        };
        if conn.phase == ConnectionPhase::Disconnected {
            return Vec::new();
        }
        let Some(kind) = conn.characteristics.get(&characteristic).copied() else {
            trace!(?characteristic, "dropping update for unrecognized characteristic");
            return Vec::new();
        };
        let notification = decode_update(kind, value, error);
        self.report(format_args!("[INFO] {kind:?} updated: {notification:?}"));
        vec![Effect::Notify(notification)]
    }

    fn target_mut(&mut self, peripheral: PeripheralHandle) -> Option<&mut ActiveConnection> {
        let conn = self.connection.as_mut()?;
        if conn.peripheral == peripheral {
            Some(conn)
        } else {
            trace!(?peripheral, target = ?conn.peripheral, "event for a stale peripheral");
            None
        }
    }

    fn report(&self, message: fmt::Arguments<'_>) {
        if self.debugging {
            info!(target: "hrm::diagnostics", "{message}");
        }
    }
}

fn scan_command() -> Effect {
    Effect::Command(TransportCommand::Scan {
        services: SCAN_FILTER.to_vec(),
    })
}
