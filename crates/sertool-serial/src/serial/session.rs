//! Port session management.
//!
//! [`PortSessionManager`] owns at most one open port together with its RX
//! watcher, a forwarder thread that turns watcher signals into
//! [`SessionEvent::DataReceived`], and up to one player per sequence slot.
//! All of its methods are called from the owning thread; background
//! threads only talk back through the [`EventSink`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::cancel::{self, lock_or_recover};
use super::error::{SerialError, SerialResult};
use super::events::{EventSink, SessionEvent};
use super::port::SerialPort;
use super::port_scanner;
use super::rx_watcher::{RxDrain, RxWatcher, WatcherSignal};
use super::sequence::{PlayerHandle, TxSequencePlayer};
use super::transport::{NativeTransport, SerialTransport, SimulatedTransport};
use super::types::{ChannelSnapshot, ParsedSequence, SequenceIndex, SerialSettings, SessionState};

/// Default bound on how long teardown waits for each worker thread.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(1);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Transport providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Source of transports for the ports a session connects to.
pub trait TransportProvider: Send + Sync {
    /// A transport able to drive `settings.port_name`.
    fn transport_for(&self, settings: &SerialSettings) -> SerialResult<Arc<dyn SerialTransport>>;

    /// Names of the ports this provider can open.
    fn list_ports(&self) -> SerialResult<Vec<String>>;
}

/// Real OS serial ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeProvider;

impl TransportProvider for NativeProvider {
    fn transport_for(&self, settings: &SerialSettings) -> SerialResult<Arc<dyn SerialTransport>> {
        Ok(Arc::new(NativeTransport::new(settings.port_name.clone())))
    }

    fn list_ports(&self) -> SerialResult<Vec<String>> {
        port_scanner::list_available_ports()
    }
}

/// In-memory ports keyed by name, for tests and demos.
#[derive(Default)]
pub struct SimulatedProvider {
    ports: Mutex<HashMap<String, Arc<SimulatedTransport>>>,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a port, or return the one already registered under `name`.
    pub fn add(&self, name: &str) -> Arc<SimulatedTransport> {
        lock_or_recover(&self.ports)
            .entry(name.to_string())
            .or_insert_with(|| SimulatedTransport::new(name))
            .clone()
    }

    /// Register a preconfigured transport, replacing any with the same name.
    pub fn insert(&self, transport: Arc<SimulatedTransport>) {
        let name = transport.port_name();
        lock_or_recover(&self.ports).insert(name, transport);
    }

    pub fn get(&self, name: &str) -> Option<Arc<SimulatedTransport>> {
        lock_or_recover(&self.ports).get(name).cloned()
    }
}

impl TransportProvider for SimulatedProvider {
    fn transport_for(&self, settings: &SerialSettings) -> SerialResult<Arc<dyn SerialTransport>> {
        match self.get(&settings.port_name) {
            Some(t) => Ok(t as Arc<dyn SerialTransport>),
            None => Err(SerialError::connection_failed("no such simulated port")
                .with_port(&settings.port_name)),
        }
    }

    fn list_ports(&self) -> SerialResult<Vec<String>> {
        let mut names: Vec<String> = lock_or_recover(&self.ports).keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Active session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type PlayerMap = Arc<Mutex<HashMap<SequenceIndex, PlayerHandle>>>;

/// State shared between the manager and the forwarder thread.
struct SessionLink {
    port_name: String,
    /// Set once the RX side failed and the port was closed underneath us.
    dead: AtomicBool,
    closed_reported: AtomicBool,
}

impl SessionLink {
    /// Emit `Closed` unless it was already emitted for this session.
    fn report_closed(&self, sink: &EventSink) {
        if !self.closed_reported.swap(true, Ordering::SeqCst) {
            sink.emit(SessionEvent::Closed {
                port_name: self.port_name.clone(),
            });
        }
    }
}

struct ActiveSession {
    port: Arc<SerialPort>,
    watcher: RxWatcher,
    drain: RxDrain,
    forwarder: Option<JoinHandle<()>>,
    players: PlayerMap,
    link: Arc<SessionLink>,
}

impl ActiveSession {
    fn is_alive(&self) -> bool {
        !self.link.dead.load(Ordering::SeqCst) && self.port.is_connected()
    }

    fn teardown(mut self, sink: &EventSink, timeout: Duration) {
        let port_name = self.link.port_name.clone();

        let mut players: Vec<PlayerHandle> = lock_or_recover(&self.players)
            .drain()
            .map(|(_, p)| p)
            .collect();
        for player in &players {
            player.request_stop();
        }
        for player in &mut players {
            player.join_within(timeout);
        }

        self.watcher.request_stop();
        self.watcher.join_within(timeout);
        self.port.close();

        if let Some(forwarder) = self.forwarder.take() {
            if cancel::join_within(forwarder, timeout).is_err() {
                log::warn!("{}: RX forwarder did not stop within {:?}", port_name, timeout);
            }
        }

        self.link.report_closed(sink);
        log::info!("{}: session closed", port_name);
    }
}

fn forward(
    signals: Receiver<WatcherSignal>,
    drain: RxDrain,
    port: Arc<SerialPort>,
    players: PlayerMap,
    link: Arc<SessionLink>,
    sink: EventSink,
) {
    let flush = |drain: &RxDrain| {
        let data = drain.get_and_clear();
        if !data.is_empty() {
            sink.emit(SessionEvent::DataReceived { data });
        }
    };

    for signal in signals {
        match signal {
            WatcherSignal::DataAvailable => flush(&drain),
            WatcherSignal::Failed(e) => {
                flush(&drain);
                link.dead.store(true, Ordering::SeqCst);
                log::error!("{}: receive failed, closing port: {}", link.port_name, e);
                for player in lock_or_recover(&players).values() {
                    player.request_stop();
                }
                port.close();
                sink.emit(SessionEvent::Error {
                    message: format!("Serial port {} lost: {}", link.port_name, e.message),
                });
                link.report_closed(&sink);
            }
        }
    }
    // Watcher gone; pick up anything it stored after the last signal.
    flush(&drain);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Connection state machine: `Disconnected` <-> `Connected`.
pub struct PortSessionManager {
    provider: Arc<dyn TransportProvider>,
    sink: EventSink,
    session: Option<ActiveSession>,
    stop_timeout: Duration,
}

impl PortSessionManager {
    pub fn new(provider: Arc<dyn TransportProvider>, sink: EventSink) -> Self {
        Self {
            provider,
            sink,
            session: None,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Manager over real OS ports.
    pub fn native(sink: EventSink) -> Self {
        Self::new(Arc::new(NativeProvider), sink)
    }

    /// Bound on each worker join during teardown.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn list_ports(&self) -> SerialResult<Vec<String>> {
        self.provider.list_ports()
    }

    /// Open `settings.port_name` and start receiving.
    ///
    /// Any existing session is torn down first. Failure is reported as an
    /// `Error` event followed by `Closed`; the manager stays disconnected
    /// and `false` is returned.
    pub fn connect(&mut self, settings: &SerialSettings) -> bool {
        self.disconnect();

        match self.open_session(settings) {
            Ok(session) => {
                self.session = Some(session);
                self.sink.emit(SessionEvent::Connected {
                    port_name: settings.port_name.clone(),
                });
                true
            }
            Err(e) => {
                log::warn!("Unable to connect to {}: {}", settings.port_name, e);
                self.sink.emit(SessionEvent::Error {
                    message: format!(
                        "Unable to open serial port {}: {}",
                        settings.port_name, e.message
                    ),
                });
                self.sink.emit(SessionEvent::Closed {
                    port_name: settings.port_name.clone(),
                });
                false
            }
        }
    }

    fn open_session(&self, settings: &SerialSettings) -> SerialResult<ActiveSession> {
        let transport = self.provider.transport_for(settings)?;
        let port = Arc::new(SerialPort::new(transport));
        port.init(settings)?;

        let (signal_tx, signal_rx) = mpsc::channel();
        let watcher = match RxWatcher::spawn(port.clone(), signal_tx) {
            Ok(w) => w,
            Err(e) => {
                port.close();
                return Err(e);
            }
        };
        let drain = watcher.drain_handle();
        let players: PlayerMap = Arc::new(Mutex::new(HashMap::new()));
        let link = Arc::new(SessionLink {
            port_name: settings.port_name.clone(),
            dead: AtomicBool::new(false),
            closed_reported: AtomicBool::new(false),
        });

        let forwarder = {
            let drain = drain.clone();
            let port = port.clone();
            let players = players.clone();
            let link = link.clone();
            let sink = self.sink.clone();
            thread::Builder::new()
                .name(format!("rx-forward-{}", settings.port_name))
                .spawn(move || forward(signal_rx, drain, port, players, link, sink))
        };
        let forwarder = match forwarder {
            Ok(handle) => handle,
            Err(e) => {
                watcher.request_stop();
                port.close();
                return Err(SerialError::io(format!(
                    "unable to start RX forwarder thread: {}",
                    e
                ))
                .with_port(&settings.port_name));
            }
        };

        Ok(ActiveSession {
            port,
            watcher,
            drain,
            forwarder: Some(forwarder),
            players,
            link,
        })
    }

    /// Stop every player, stop the watcher, close the port, emit `Closed`.
    ///
    /// No-op when already disconnected. A session whose receiver already
    /// failed is reaped without a second `Closed`.
    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.teardown(&self.sink, self.stop_timeout);
        }
    }

    pub fn state(&self) -> SessionState {
        if self.is_connected() {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.as_ref().map(|s| s.is_alive()).unwrap_or(false)
    }

    /// Settings of the open port.
    pub fn settings(&self) -> Option<SerialSettings> {
        self.live_session().and_then(|s| s.port.settings())
    }

    /// Send one channel payload.
    ///
    /// Write failures are returned to the caller; the session stays as it is.
    pub fn write_channel(&self, data: &[u8]) -> SerialResult<usize> {
        let session = self.live_session().ok_or_else(SerialError::not_connected)?;
        session.port.write(data)
    }

    /// Start playing `sequence` in slot `seq`.
    ///
    /// Returns `Ok(false)` without side effects if that slot is already
    /// playing. Every channel the sequence references must hold data in
    /// `snapshot`.
    pub fn start_sequence(
        &self,
        seq: SequenceIndex,
        snapshot: ChannelSnapshot,
        sequence: ParsedSequence,
    ) -> SerialResult<bool> {
        let session = self.live_session().ok_or_else(SerialError::not_connected)?;
        if sequence.is_empty() {
            return Err(SerialError::invalid_sequence(format!(
                "sequence {} has no blocks",
                seq
            )));
        }
        let missing = snapshot.missing_channels(&sequence);
        if !missing.is_empty() {
            let names: Vec<String> = missing.iter().map(|c| c.to_string()).collect();
            return Err(SerialError::invalid_channel(format!(
                "sequence {} uses data channel(s) without valid data: {}",
                seq,
                names.join(", ")
            )));
        }

        let mut players = lock_or_recover(&session.players);
        players.retain(|_, p| !p.is_finished());
        if players.contains_key(&seq) {
            log::debug!("Sequence {} already running, start ignored", seq);
            return Ok(false);
        }

        let handle = TxSequencePlayer::new(
            session.port.clone(),
            seq,
            snapshot,
            sequence,
            self.sink.clone(),
        )
        .spawn()?;
        players.insert(seq, handle);
        log::info!("Sequence {} started", seq);
        Ok(true)
    }

    /// Signal the player in slot `seq` to stop. Does not wait for it.
    ///
    /// Returns `true` if a running player was signalled.
    pub fn stop_sequence(&self, seq: SequenceIndex) -> bool {
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        match lock_or_recover(&session.players).get(&seq) {
            Some(player) if !player.is_finished() => {
                player.request_stop();
                true
            }
            _ => false,
        }
    }

    pub fn stop_all_sequences(&self) {
        if let Some(session) = self.session.as_ref() {
            for player in lock_or_recover(&session.players).values() {
                player.request_stop();
            }
        }
    }

    /// Slots whose player is still running, ascending.
    pub fn running_sequences(&self) -> Vec<SequenceIndex> {
        let Some(session) = self.session.as_ref() else {
            return Vec::new();
        };
        let mut running: Vec<SequenceIndex> = lock_or_recover(&session.players)
            .iter()
            .filter(|(_, p)| !p.is_finished())
            .map(|(seq, _)| *seq)
            .collect();
        running.sort();
        running
    }

    /// Take whatever the watcher buffered and the forwarder has not sent yet.
    pub fn drain_received(&self) -> Vec<u8> {
        self.session
            .as_ref()
            .map(|s| s.drain.get_and_clear())
            .unwrap_or_default()
    }

    fn live_session(&self) -> Option<&ActiveSession> {
        self.session.as_ref().filter(|s| s.is_alive())
    }
}

impl Drop for PortSessionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}
