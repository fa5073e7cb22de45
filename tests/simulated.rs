use std::sync::Arc;
use std::time::Duration;

use hrm::config::{HrmConfig, SimulatedConfig};
use hrm::signal::{ChannelObserver, HrmSignal, UiCommand};
use hrm::{ClientState, HeartRateClient, HrmManager, SimulatedTransport};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn fast_strap() -> SimulatedConfig {
    SimulatedConfig {
        bpm_min: 60,
        bpm_max: 65,
        interval_ms: 20,
        ..SimulatedConfig::default()
    }
}

async fn next_signal(rx: &mut UnboundedReceiver<HrmSignal>) -> HrmSignal {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a signal")
        .expect("signal channel closed")
}

/// Waits for a signal matching `pred`, skipping everything else.
async fn wait_for(
    rx: &mut UnboundedReceiver<HrmSignal>,
    pred: impl Fn(&HrmSignal) -> bool,
) -> HrmSignal {
    loop {
        let signal = next_signal(rx).await;
        if pred(&signal) {
            return signal;
        }
    }
}

#[tokio::test]
async fn preferred_monitor_streams_after_auto_scan() {
    let config = HrmConfig {
        auto_scan: true,
        preferred_monitor: Some("Polar H7".to_string()),
        simulated: fast_strap(),
        ..HrmConfig::default()
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (manager, _tx_from_gui) = HrmManager::from_config(&config, ChannelObserver::new(tx))
        .await
        .unwrap();
    let client = manager.client();
    let shutdown = manager.shutdown_token();
    let handle = tokio::spawn(manager.run());

    assert_eq!(
        next_signal(&mut rx).await,
        HrmSignal::DiscoveredPeripherals(vec!["Polar H7".to_string()])
    );
    wait_for(&mut rx, |s| *s == HrmSignal::Connected).await;

    let mut location = None;
    let mut manufacturer = None;
    let mut heart_rate = None;
    while location.is_none() || manufacturer.is_none() || heart_rate.is_none() {
        match next_signal(&mut rx).await {
            HrmSignal::BodyLocation { location: l, error } => {
                assert_eq!(error, None);
                location = Some(l);
            }
            HrmSignal::DeviceInfo { manufacturer: m, error } => {
                assert_eq!(error, None);
                manufacturer = Some(m);
            }
            HrmSignal::HeartRate { heart_rate: hr, error } => {
                assert_eq!(error, None);
                heart_rate = Some(hr);
            }
            HrmSignal::DiscoveredPeripherals(_) => {}
            other => panic!("unexpected signal {other:?}"),
        }
    }
    assert_eq!(location.as_deref(), Some("Chest"));
    assert_eq!(manufacturer.as_deref(), Some("Polar Electro Oy"));
    assert!((60..=65).contains(&heart_rate.unwrap()));
    assert_eq!(client.state(), ClientState::Active);
    assert_eq!(client.active_monitor().as_deref(), Some("Polar H7"));

    shutdown.cancel();
    timeout(WAIT, handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn ui_commands_drive_the_client() {
    let config = HrmConfig {
        auto_scan: false,
        simulated: fast_strap(),
        ..HrmConfig::default()
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (manager, tx_from_gui) = HrmManager::from_config(&config, ChannelObserver::new(tx))
        .await
        .unwrap();
    let client = manager.client();
    let shutdown = manager.shutdown_token();
    let handle = tokio::spawn(manager.run());

    tx_from_gui.send(UiCommand::SetDebugging(true)).unwrap();
    // nothing has been discovered yet, so this name is ignored
    tx_from_gui
        .send(UiCommand::ConnectDevice("Polar H7".to_string()))
        .unwrap();
    tx_from_gui.send(UiCommand::StartScanning).unwrap();
    wait_for(&mut rx, |s| {
        matches!(s, HrmSignal::DiscoveredPeripherals(names) if names.len() == 2)
    })
    .await;
    assert!(client.is_debugging());
    assert_eq!(client.active_monitor(), None);
    assert_eq!(client.state(), ClientState::Scanning);

    tx_from_gui
        .send(UiCommand::ConnectDevice("Wahoo TICKR".to_string()))
        .unwrap();
    wait_for(&mut rx, |s| *s == HrmSignal::Connected).await;
    wait_for(&mut rx, |s| matches!(s, HrmSignal::HeartRate { error: None, .. })).await;
    assert_eq!(client.active_monitor().as_deref(), Some("Wahoo TICKR"));

    tx_from_gui.send(UiCommand::DisconnectDevice).unwrap();
    wait_for(&mut rx, |s| *s == HrmSignal::Disconnected).await;
    assert_eq!(client.state(), ClientState::Idle);

    // a closed UI channel leaves the event loop running
    drop(tx_from_gui);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished());

    shutdown.cancel();
    timeout(WAIT, handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn dropped_link_reports_disconnect_and_stops_readings() {
    let (transport, events) = SimulatedTransport::new(fast_strap());
    let transport = Arc::new(transport);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (_tx_from_gui, rx_from_gui) = mpsc::unbounded_channel();
    let manager = HrmManager::new(
        HeartRateClient::new(Arc::clone(&transport), ChannelObserver::new(tx)),
        events,
        rx_from_gui,
    );
    let client = manager.client();
    let shutdown = manager.shutdown_token();
    let handle = tokio::spawn(manager.run());

    client.start_scan();
    wait_for(&mut rx, |s| {
        matches!(s, HrmSignal::DiscoveredPeripherals(names) if names.len() == 2)
    })
    .await;
    client.connect_to_heart_rate_monitor("Polar H7");
    wait_for(&mut rx, |s| matches!(s, HrmSignal::HeartRate { .. })).await;

    transport.drop_link();
    wait_for(&mut rx, |s| *s == HrmSignal::Disconnected).await;
    assert_eq!(client.state(), ClientState::Idle);

    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(signal) = rx.try_recv() {
        assert!(
            !matches!(signal, HrmSignal::HeartRate { .. }),
            "reading after disconnect"
        );
    }

    shutdown.cancel();
    timeout(WAIT, handle).await.unwrap().unwrap();
}
