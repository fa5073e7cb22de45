use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::debug;

use crate::observer::HrmObserver;
use crate::state::{ClientState, ConnectionPhase, Effect, Machine};
use crate::transport::{AdapterEvent, AdapterState, Transport};

/// Heart-rate monitor client.
///
/// Commands and transport events both go through the same mutex-guarded
/// [`Machine`]. The transport commands and observer callbacks a step produces
/// are queued under that lock and carried out by one caller at a time, in
/// the order the machine produced them. The lock is not held while they run,
/// so an observer may call straight back into the client; whatever it
/// triggers runs after the effects already queued.
pub struct HeartRateClient<T, O> {
    transport: T,
    observer: O,
    inner: Mutex<Inner>,
}

struct Inner {
    machine: Machine,
    queue: VecDeque<Effect>,
    draining: bool,
}

impl<T: Transport, O: HrmObserver> HeartRateClient<T, O> {
    pub fn new(transport: T, observer: O) -> Self {
        let machine = Machine::new(transport.power_state());
        HeartRateClient {
            transport,
            observer,
            inner: Mutex::new(Inner {
                machine,
                queue: VecDeque::new(),
                draining: false,
            }),
        }
    }

    /// Scans for peripherals advertising the Heart Rate service, powering the
    /// adapter up first if needed.
    pub fn start_scan(&self) {
        self.step(Machine::start_scan);
    }

    pub fn stop_scan(&self) {
        self.step(Machine::stop_scan);
    }

    /// Connects to a monitor found by the current or last scan. Empty or
    /// unknown names are ignored.
    pub fn connect_to_heart_rate_monitor(&self, name: &str) {
        self.step(|machine| {
            machine.connect(name).unwrap_or_else(|misuse| {
                debug!(%misuse, "connect request ignored");
                Vec::new()
            })
        });
    }

    /// Tears down the active connection. The observer hears about it when the
    /// adapter confirms.
    pub fn disconnect(&self) {
        self.step(Machine::disconnect);
    }

    pub fn enable_debugging(&self) {
        self.inner.lock().machine.set_debugging(true);
    }

    pub fn disable_debugging(&self) {
        self.inner.lock().machine.set_debugging(false);
    }

    /// Feeds one transport event through the state machine.
    pub fn handle_event(&self, event: AdapterEvent) {
        self.step(|machine| machine.handle_event(event));
    }

    /// Runs one state change and queues its effects in the same critical
    /// section. If another caller is already draining the queue it will run
    /// them; otherwise this caller drains.
    fn step(&self, change: impl FnOnce(&mut Machine) -> Vec<Effect>) {
        {
            let mut inner = self.inner.lock();
            let effects = change(&mut inner.machine);
            inner.queue.extend(effects);
            if inner.draining {
                return;
            }
            inner.draining = true;
        }
        self.drain();
    }

    fn drain(&self) {
        loop {
            let effect = {
                let mut inner = self.inner.lock();
                match inner.queue.pop_front() {
                    Some(effect) => effect,
                    None => {
                        inner.draining = false;
                        return;
                    }
                }
            };
            match effect {
                Effect::Command(command) => {
                    debug!(?command, "transport command");
                    self.transport.execute(command);
                }
                Effect::Notify(notification) => notification.deliver(&self.observer),
            }
        }
    }
}

impl<T, O> HeartRateClient<T, O> {
    pub fn adapter_state(&self) -> AdapterState {
        self.inner.lock().machine.adapter_state()
    }

    pub fn state(&self) -> ClientState {
        self.inner.lock().machine.state()
    }

    pub fn connection_phase(&self) -> Option<ConnectionPhase> {
        self.inner.lock().machine.connection_phase()
    }

    pub fn discovered_monitors(&self) -> Vec<String> {
        self.inner.lock().machine.discovered_monitors()
    }

    pub fn active_monitor(&self) -> Option<String> {
        self.inner.lock().machine.active_monitor().map(str::to_owned)
    }

    pub fn is_debugging(&self) -> bool {
        self.inner.lock().machine.is_debugging()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }
}
