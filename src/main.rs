use std::{sync::Arc, thread::sleep, time::{Duration, SystemTime}};

use eframe::egui;
use hrm::config::{load_config, HrmConfig};
use hrm::logging::init_logging;
use hrm::signal::{ChannelObserver, HrmSignal, UiCommand};
use hrm::{ClientState, HeartRateClient, HrmManager, Transport};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{error, info, warn};

mod widget;

const MAX_FPS: f64 = 165.0;

type Client = HeartRateClient<Arc<dyn Transport>, ChannelObserver>;


#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging("info");

    let config = load_config().unwrap_or_else(|e| {
        warn!(code = e.error_code(), error = %e, "failed to load config, using defaults");
        HrmConfig::default()
    });

    let (tx, rx) = mpsc::unbounded_channel();
    let (manager, tx_from_gui) = HrmManager::from_config(&config, ChannelObserver::new(tx)).await?;
    let client = manager.client();
    let shutdown = manager.shutdown_token();
    tokio::spawn(manager.run());

    let debugging = config.debug;
    let native_options = eframe::NativeOptions::default();
    let result = eframe::run_native(
        "hrm",
        native_options,
        Box::new(move |cc| Ok(Box::new(MyApp::new(cc, client, rx, tx_from_gui, debugging)))),
    );

    shutdown.cancel();
    if let Err(e) = result {
        error!(error = %e, "window closed with an error");
    }
    info!("bye");
    Ok(())
}


struct MyApp {
    client: Arc<Client>,
    rx_from_hrm: UnboundedReceiver<HrmSignal>,
    tx_from_gui: UnboundedSender<UiCommand>,
    live_heart_rate: Option<u8>,
    body_location: String,
    manufacturer: String,
    peris: Vec<String>,
    debugging: bool,
    frame_time: Duration,
}

impl MyApp {
    fn new(
        _cc: &eframe::CreationContext<'_>,
        client: Arc<Client>,
        rx_from_hrm: UnboundedReceiver<HrmSignal>,
        tx_from_gui: UnboundedSender<UiCommand>,
        debugging: bool,
    ) -> Self {
        MyApp {
            client,
            rx_from_hrm,
            tx_from_gui,
            live_heart_rate: None,
            body_location: String::new(),
            manufacturer: String::new(),
            peris: vec![],
            debugging,
            frame_time: Duration::from_secs_f64(1.0/MAX_FPS),
        }
    }

    fn read_channel(&mut self) {
        while let Ok(signal) = self.rx_from_hrm.try_recv() {
            match signal {
                HrmSignal::DiscoveredPeripherals(peris) => self.peris = peris,
                HrmSignal::Connected => info!("connected"),
                HrmSignal::Disconnected => {
                    self.live_heart_rate = None;
                    self.body_location.clear();
                    self.manufacturer.clear();
                }
                HrmSignal::HeartRate { heart_rate, error } => match error {
                    None => self.live_heart_rate = Some(heart_rate),
                    Some(e) => warn!(error = %e, "heart rate update failed"),
                },
                HrmSignal::BodyLocation { location, error } => match error {
                    None => self.body_location = location,
                    Some(e) => warn!(error = %e, "body location update failed"),
                },
                HrmSignal::DeviceInfo { manufacturer, error } => match error {
                    None => self.manufacturer = manufacturer,
                    Some(e) => warn!(error = %e, "device info update failed"),
                },
            }
        }
    }

    fn send(&self, command: UiCommand) {
        if self.tx_from_gui.send(command).is_err() {
            warn!("event loop is gone");
        }
    }
}

impl eframe::App for MyApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = SystemTime::now();

        self.read_channel();
        // the client is the source of truth, it also knows about auto-connects
        let scanning = self.client.state() == ClientState::Scanning;
        let active_device = self.client.active_monitor();

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.add(widget::get_heart_rate_label(self.live_heart_rate));
            if !self.body_location.is_empty() {
                ui.add(widget::get_info_label("Location", &self.body_location));
            }
            if !self.manufacturer.is_empty() {
                ui.add(widget::get_info_label("Manufacturer", &self.manufacturer));
            }

            ui.horizontal(|ui| {
                if ui.add(widget::get_scan_button(scanning)).clicked() {
                    if scanning {
                        self.send(UiCommand::StopScanning);
                    } else {
                        self.send(UiCommand::StartScanning);
                    }
                }
                if ui.checkbox(&mut self.debugging, "Debug").changed() {
                    self.send(UiCommand::SetDebugging(self.debugging));
                }
            });

            if let Some(device) = &active_device {
                ui.horizontal(|ui| {
                    ui.add(widget::get_active_device_frame(device));
                    if ui.add(widget::get_disconnect_device_button()).clicked() {
                        self.send(UiCommand::DisconnectDevice);
                    }
                });
            }

            for device in self.peris.clone() {
                if active_device.as_deref() == Some(device.as_str()) {
                    continue;
                }
                if ui.add(widget::get_device_button(&device)).clicked() {
                    info!(device = %device, "connecting");
                    self.send(UiCommand::ConnectDevice(device));
                }
            }
        });

        let elapsed = now.elapsed().unwrap_or(Duration::from_micros(300));
        ctx.request_repaint();
        if elapsed < self.frame_time {
            sleep(self.frame_time - elapsed);
        }
    }
}
