use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::client::HeartRateClient;
use crate::config::HrmConfig;
use crate::observer::HrmObserver;
use crate::signal::UiCommand;
use crate::state::ClientState;
use crate::transport::{open_transport, EventStream, Transport};

/// Drives a [`HeartRateClient`]: transport events and UI commands are fed
/// into it one at a time, in the order they arrive.
pub struct HrmManager<T, O> {
    client: Arc<HeartRateClient<T, O>>,
    events: EventStream,
    rx_from_gui: UnboundedReceiver<UiCommand>,
    auto_scan: bool,
    preferred_monitor: Option<String>,
    shutdown: CancellationToken,
}

impl<O: HrmObserver> HrmManager<Arc<dyn Transport>, O> {
    /// Opens the transport `config` asks for and wraps it in a manager.
    pub async fn from_config(
        config: &HrmConfig,
        observer: O,
    ) -> Result<(Self, UnboundedSender<UiCommand>)> {
        let (transport, events) = open_transport(config)
            .await
            .context("failed to open Bluetooth transport")?;
        let (tx_to_manager, rx_from_gui) = mpsc::unbounded_channel();
        let client = HeartRateClient::new(transport, observer);
        let manager = HrmManager::new(client, events, rx_from_gui).with_config(config);
        Ok((manager, tx_to_manager))
    }
}

impl<T: Transport, O: HrmObserver> HrmManager<T, O> {
    pub fn new(
        client: HeartRateClient<T, O>,
        events: EventStream,
        rx_from_gui: UnboundedReceiver<UiCommand>,
    ) -> Self {
        HrmManager {
            client: Arc::new(client),
            events,
            rx_from_gui,
            auto_scan: false,
            preferred_monitor: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: &HrmConfig) -> Self {
        if config.debug {
            self.client.enable_debugging();
        }
        self.auto_scan = config.auto_scan;
        self.preferred_monitor = config.preferred_monitor.clone();
        self
    }

    pub fn client(&self) -> Arc<HeartRateClient<T, O>> {
        Arc::clone(&self.client)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs until cancelled or until the transport's event stream ends. A
    /// closed UI channel only stops command intake.
    pub async fn run(mut self) {
        if self.auto_scan {
            self.client.start_scan();
        }

        let mut gui_open = true;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("event loop cancelled");
                    break;
                }
                event = self.events.next() => {
                    let Some(event) = event else {
                        info!("transport event stream closed");
                        break;
                    };
                    self.client.handle_event(event);
                    self.connect_preferred();
                }
                command = self.rx_from_gui.recv(), if gui_open => match command {
                    Some(command) => self.read_command(command),
                    None => gui_open = false,
                },
            }
        }
    }

    fn read_command(&self, command: UiCommand) {
        match command {
            UiCommand::StartScanning => self.client.start_scan(),
            UiCommand::StopScanning => self.client.stop_scan(),
            UiCommand::ConnectDevice(name) => self.client.connect_to_heart_rate_monitor(&name),
            UiCommand::DisconnectDevice => self.client.disconnect(),
            UiCommand::SetDebugging(true) => self.client.enable_debugging(),
            UiCommand::SetDebugging(false) => self.client.disable_debugging(),
        }
    }

    fn connect_preferred(&self) {
        let Some(name) = self.preferred_monitor.as_deref() else {
            return;
        };
        if self.client.state() != ClientState::Scanning {
            return;
        }
        if self.client.discovered_monitors().iter().any(|monitor| monitor == name) {
            info!(monitor = name, "preferred monitor found, connecting");
            self.client.connect_to_heart_rate_monitor(name);
        }
    }
}
