//! btleplug backend.
//!
//! Commands run one after another on a worker task, except connects, which
//! run on their own task so a stalled connect can be cancelled by a later
//! `Disconnect` or `Connect`. Adapter and notification streams are pumped on
//! their own tasks. Each link reports exactly one `Disconnected`.
//!
//! btleplug discovers every characteristic together with its service, so
//! characteristic discovery is answered from what service discovery already
//! found.
//!
//! On Linux this needs the D-Bus development files:
//! ```bash
//! apt install libdbus-1-dev pkg-config
//! ```

use std::collections::{BTreeSet, HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, Result};
use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
    ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{HrmError, TransportError};

use super::{
    AdapterEvent, AdapterState, CharacteristicHandle, Discovered, EventStream, PeripheralHandle,
    ServiceHandle, Transport, TransportCommand,
};

pub struct BleTransport {
    shared: Arc<Shared>,
    commands: UnboundedSender<TransportCommand>,
}

struct Shared {
    adapter: Adapter,
    tx: UnboundedSender<AdapterEvent>,
    power: Mutex<AdapterState>,
    registry: Mutex<Registry>,
}

/// Maps the opaque handles handed to the client back onto btleplug objects.
#[derive(Default)]
struct Registry {
    last_handle: u64,
    peripherals: HashMap<u64, Peripheral>,
    by_id: HashMap<PeripheralId, u64>,
    names: HashMap<u64, String>,
    services: HashMap<u64, (PeripheralHandle, Uuid, BTreeSet<Characteristic>)>,
    characteristics: HashMap<u64, (PeripheralHandle, Characteristic)>,
    notifying: HashSet<PeripheralHandle>,
    /// Peripherals with a link requested and not yet reported disconnected.
    links: HashSet<PeripheralHandle>,
    connecting: HashMap<PeripheralHandle, CancellationToken>,
}

impl Registry {
    fn mint(&mut self) -> u64 {
        self.last_handle += 1;
        self.last_handle
    }

    fn peripheral_handle(&mut self, peripheral: &Peripheral) -> PeripheralHandle {
        let id = peripheral.id();
        if let Some(handle) = self.by_id.get(&id) {
            return PeripheralHandle(*handle);
        }
        let handle = self.mint();
        self.by_id.insert(id, handle);
        self.peripherals.insert(handle, peripheral.clone());
        PeripheralHandle(handle)
    }

    /// Records `name` and reports whether it differs from what was known.
    fn rename(&mut self, peripheral: PeripheralHandle, name: &str) -> bool {
        match self.names.get(&peripheral.0) {
            Some(known) if known == name => false,
            _ => {
                self.names.insert(peripheral.0, name.to_string());
                true
            }
        }
    }

    /// The client starts every scan with an empty list, so every monitor
    /// must be announced again.
    fn forget_names(&mut self) {
        self.names.clear();
    }

    /// Opens a link to `peripheral`, cancelling any connect still pending.
    fn begin_connect(&mut self, peripheral: PeripheralHandle) -> CancellationToken {
        for (_, pending) in self.connecting.drain() {
            pending.cancel();
        }
        let token = CancellationToken::new();
        self.connecting.insert(peripheral, token.clone());
        self.links.insert(peripheral);
        token
    }

    fn cancel_connect(&mut self, peripheral: PeripheralHandle) {
        if let Some(pending) = self.connecting.remove(&peripheral) {
            pending.cancel();
        }
    }

    /// True the first time a link is closed.
    fn close_link(&mut self, peripheral: PeripheralHandle) -> bool {
        self.notifying.remove(&peripheral);
        self.cancel_connect(peripheral);
        self.links.remove(&peripheral)
    }

    fn service_handle(
        &mut self,
        peripheral: PeripheralHandle,
        uuid: Uuid,
        characteristics: BTreeSet<Characteristic>,
    ) -> ServiceHandle {
        let existing = self
            .services
            .iter()
            .find(|(_, (owner, known, _))| *owner == peripheral && *known == uuid)
            .map(|(handle, _)| *handle);
        let handle = existing.unwrap_or_else(|| self.mint());
        self.services
            .insert(handle, (peripheral, uuid, characteristics));
        ServiceHandle(handle)
    }

    fn characteristic_handle(
        &mut self,
        peripheral: PeripheralHandle,
        characteristic: &Characteristic,
    ) -> CharacteristicHandle {
        let existing = self
            .characteristics
            .iter()
            .find(|(_, (owner, known))| *owner == peripheral && known == characteristic)
            .map(|(handle, _)| *handle);
        let handle = existing.unwrap_or_else(|| {
            let handle = self.mint();
            self.characteristics
                .insert(handle, (peripheral, characteristic.clone()));
            handle
        });
        CharacteristicHandle(handle)
    }

    fn find_characteristic(
        &self,
        peripheral: PeripheralHandle,
        uuid: Uuid,
    ) -> Option<CharacteristicHandle> {
        self.characteristics
            .iter()
            .find(|(_, (owner, known))| *owner == peripheral && known.uuid == uuid)
            .map(|(handle, _)| CharacteristicHandle(*handle))
    }
}

impl BleTransport {
    /// Opens the first Bluetooth adapter. Must be called inside a tokio runtime.
    pub async fn new() -> Result<(Self, EventStream)> {
        let manager = Manager::new()
            .await
            .context("failed to start Bluetooth manager")?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(HrmError::NoAdapter)?;
        let adapter_name = adapter
            .adapter_info()
            .await
            .unwrap_or_else(|_| "No name adapter".to_string());
        let power = read_power(&adapter).await;
        info!(adapter = %adapter_name, ?power, "using Bluetooth adapter");
        let central_events = adapter.events().await?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            adapter,
            tx,
            power: Mutex::new(power),
            registry: Mutex::new(Registry::default()),
        });

        let (commands, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump_central_events(Arc::clone(&shared), central_events));
        tokio::spawn(run_commands(Arc::clone(&shared), command_rx));

        let events = futures::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed();
        Ok((BleTransport { shared, commands }, events))
    }
}

impl Transport for BleTransport {
    fn power_state(&self) -> AdapterState {
        *self.shared.power.lock()
    }

    fn execute(&self, command: TransportCommand) {
        if self.commands.send(command).is_err() {
            warn!("Bluetooth command worker has stopped");
        }
    }
}

impl Shared {
    fn emit(&self, event: AdapterEvent) {
        let _ = self.tx.send(event);
    }

    fn set_power(&self, power: AdapterState) {
        *self.power.lock() = power;
        self.emit(AdapterEvent::PowerStateChanged(power));
    }

    /// Reports the end of a link unless it was already reported.
    fn link_closed(&self, peripheral: PeripheralHandle, error: Option<TransportError>) {
        let was_open = self.registry.lock().close_link(peripheral);
        if was_open {
            self.emit(AdapterEvent::Disconnected { peripheral, error });
        }
    }

    fn peripheral(&self, handle: PeripheralHandle) -> Result<Peripheral> {
        self.registry
            .lock()
            .peripherals
            .get(&handle.0)
            .cloned()
            .with_context(|| format!("unknown peripheral {handle:?}"))
    }

    fn characteristic(&self, handle: CharacteristicHandle) -> Result<Characteristic> {
        self.registry
            .lock()
            .characteristics
            .get(&handle.0)
            .map(|(_, characteristic)| characteristic.clone())
            .with_context(|| format!("unknown characteristic {handle:?}"))
    }
}

async fn run_commands(shared: Arc<Shared>, mut commands: UnboundedReceiver<TransportCommand>) {
    while let Some(command) = commands.recv().await {
        debug!(?command, "running Bluetooth command");
        if let Err(err) = run_command(&shared, command).await {
            warn!("Bluetooth command failed: {err:#}");
        }
    }
}

async fn run_command(shared: &Arc<Shared>, command: TransportCommand) -> Result<()> {
    match command {
        TransportCommand::PowerUp => {
            // btleplug cannot switch the radio on; report what the adapter
            // says and wait for a StateUpdate otherwise
            let power = read_power(&shared.adapter).await;
            if power != AdapterState::PoweredOn {
                warn!(?power, "Bluetooth adapter is not powered on");
            }
            shared.set_power(power);
        }
        TransportCommand::Scan { services } => {
            shared.registry.lock().forget_names();
            shared.adapter.start_scan(ScanFilter { services }).await?;
        }
        TransportCommand::StopScan => {
            shared.adapter.stop_scan().await?;
        }
        TransportCommand::Connect(handle) => {
            let peripheral = shared.peripheral(handle)?;
            let token = shared.registry.lock().begin_connect(handle);
            tokio::spawn(connect_peripheral(Arc::clone(shared), handle, peripheral, token));
        }
        TransportCommand::Disconnect(handle) => {
            shared.registry.lock().cancel_connect(handle);
            let peripheral = shared.peripheral(handle)?;
            if let Err(err) = peripheral.disconnect().await {
                warn!(?handle, "disconnect failed: {err}");
            }
            shared.link_closed(handle, None);
        }
        TransportCommand::DiscoverServices(handle) => {
            let peripheral = shared.peripheral(handle)?;
            peripheral.discover_services().await?;
            let services = {
                let mut registry = shared.registry.lock();
                peripheral
                    .services()
                    .into_iter()
                    .map(|service| Discovered {
                        uuid: service.uuid,
                        handle: registry.service_handle(
                            handle,
                            service.uuid,
                            service.characteristics,
                        ),
                    })
                    .collect()
            };
            shared.emit(AdapterEvent::ServicesDiscovered {
                peripheral: handle,
                services,
            });
        }
        TransportCommand::DiscoverCharacteristics {
            peripheral,
            service,
        } => {
            let characteristics = {
                let mut registry = shared.registry.lock();
                let (_, _, found) = registry
                    .services
                    .get(&service.0)
                    .cloned()
                    .with_context(|| format!("unknown service {service:?}"))?;
                found
                    .iter()
                    .map(|characteristic| Discovered {
                        uuid: characteristic.uuid,
                        handle: registry.characteristic_handle(peripheral, characteristic),
                    })
                    .collect()
            };
            shared.emit(AdapterEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                characteristics,
            });
        }
        TransportCommand::SetNotify {
            peripheral: handle,
            characteristic,
            enabled,
        } => {
            let peripheral = shared.peripheral(handle)?;
            let characteristic = shared.characteristic(characteristic)?;
            if enabled {
                peripheral.subscribe(&characteristic).await?;
                pump_notifications(Arc::clone(shared), handle, peripheral).await?;
            } else {
                peripheral.unsubscribe(&characteristic).await?;
            }
        }
        TransportCommand::ReadValue {
            peripheral: handle,
            characteristic,
        } => {
            let peripheral = shared.peripheral(handle)?;
            let target = shared.characteristic(characteristic)?;
            let (value, error) = match peripheral.read(&target).await {
                Ok(value) => (value, None),
                Err(err) => (Vec::new(), Some(TransportError::new(err.to_string()))),
            };
            shared.emit(AdapterEvent::ValueUpdated {
                peripheral: handle,
                characteristic,
                value,
                error,
            });
        }
    }
    Ok(())
}

async fn pump_central_events(
    shared: Arc<Shared>,
    mut events: Pin<Box<dyn Stream<Item = CentralEvent> + Send>>,
) {
    while let Some(event) = events.next().await {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let Ok(peripheral) = shared.adapter.peripheral(&id).await else {
                    continue;
                };
                let name = match peripheral.properties().await {
                    Ok(Some(properties)) => properties.local_name,
                    _ => None,
                };
                let Some(name) = name else {
                    continue;
                };
                let (handle, renamed) = {
                    let mut registry = shared.registry.lock();
                    let handle = registry.peripheral_handle(&peripheral);
                    (handle, registry.rename(handle, &name))
                };
                if renamed {
                    shared.emit(AdapterEvent::PeripheralDiscovered {
                        peripheral: handle,
                        name: Some(name),
                    });
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                let handle = shared.registry.lock().by_id.get(&id).copied();
                if let Some(handle) = handle {
                    shared.link_closed(
                        PeripheralHandle(handle),
                        Some(TransportError::new("peripheral disconnected")),
                    );
                }
            }
            CentralEvent::StateUpdate(state) => {
                shared.set_power(adapter_state_from(state));
            }
            _ => {}
        }
    }
    info!("Bluetooth adapter event stream ended");
}

async fn connect_peripheral(
    shared: Arc<Shared>,
    handle: PeripheralHandle,
    peripheral: Peripheral,
    token: CancellationToken,
) {
    let result = tokio::select! {
        _ = token.cancelled() => {
            debug!(?handle, "connect cancelled");
            return;
        }
        result = establish(&peripheral) => result,
    };
    if token.is_cancelled() {
        return;
    }
    shared.registry.lock().connecting.remove(&handle);
    match result {
        Ok(()) => shared.emit(AdapterEvent::Connected { peripheral: handle }),
        Err(err) => {
            warn!(?handle, "connect failed: {err:#}");
            shared.link_closed(handle, Some(TransportError::new(format!("{err:#}"))));
        }
    }
}

async fn establish(peripheral: &Peripheral) -> Result<()> {
    if !peripheral.is_connected().await? {
        peripheral.connect().await?;
    }
    Ok(())
}

async fn read_power(adapter: &Adapter) -> AdapterState {
    match adapter.adapter_state().await {
        Ok(state) => adapter_state_from(state),
        Err(err) => {
            warn!("failed to read adapter state: {err}");
            AdapterState::Unknown
        }
    }
}

fn adapter_state_from(state: CentralState) -> AdapterState {
    match state {
        CentralState::PoweredOn => AdapterState::PoweredOn,
        CentralState::PoweredOff => AdapterState::PoweredOff,
        _ => AdapterState::Unknown,
    }
}

async fn pump_notifications(
    shared: Arc<Shared>,
    handle: PeripheralHandle,
    peripheral: Peripheral,
) -> Result<()> {
    if !shared.registry.lock().notifying.insert(handle) {
        return Ok(());
    }
    let mut notifications = peripheral.notifications().await?;
    tokio::spawn(async move {
        while let Some(notification) = notifications.next().await {
            let characteristic = shared
                .registry
                .lock()
                .find_characteristic(handle, notification.uuid);
            let Some(characteristic) = characteristic else {
                continue;
            };
            shared.emit(AdapterEvent::ValueUpdated {
                peripheral: handle,
                characteristic,
                value: notification.value,
                error: None,
            });
        }
        shared.registry.lock().notifying.remove(&handle);
        debug!(?handle, "notification stream ended");
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescans_announce_known_names_again() {
        let mut registry = Registry::default();
        let strap = PeripheralHandle(1);
        assert!(registry.rename(strap, "Polar H7"));
        assert!(!registry.rename(strap, "Polar H7"));

        registry.forget_names();
        assert!(registry.rename(strap, "Polar H7"));
    }

    #[test]
    fn a_new_connect_cancels_the_pending_one() {
        let mut registry = Registry::default();
        let first = registry.begin_connect(PeripheralHandle(1));
        let second = registry.begin_connect(PeripheralHandle(2));
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        registry.cancel_connect(PeripheralHandle(2));
        assert!(second.is_cancelled());
    }

    #[test]
    fn each_link_closes_once() {
        let mut registry = Registry::default();
        let strap = PeripheralHandle(1);
        let pending = registry.begin_connect(strap);
        assert!(registry.close_link(strap));
        assert!(pending.is_cancelled());
        assert!(!registry.close_link(strap));
    }

    #[test]
    fn central_states_map_onto_adapter_states() {
        assert_eq!(
            adapter_state_from(CentralState::PoweredOn),
            AdapterState::PoweredOn
        );
        assert_eq!(
            adapter_state_from(CentralState::PoweredOff),
            AdapterState::PoweredOff
        );
        assert_eq!(
            adapter_state_from(CentralState::Unknown),
            AdapterState::Unknown
        );
    }
}
