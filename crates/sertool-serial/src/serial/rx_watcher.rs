//! Background receiver for one connected port.
//!
//! The watcher thread blocks on a single-byte read, then drains whatever
//! else the OS already buffered and appends the burst to a shared buffer.
//! Notification is edge-triggered: one [`WatcherSignal::DataAvailable`]
//! per transition from "nothing pending" to "something pending", re-armed
//! by [`RxWatcher::get_and_clear`].

use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::cancel::{self, lock_or_recover, CancelToken};
use super::error::{SerialError, SerialResult};
use super::port::SerialPort;

/// Message from the watcher thread to its owner.
#[derive(Debug, Clone)]
pub enum WatcherSignal {
    /// The buffer went from empty to non-empty.
    DataAvailable,
    /// Reading failed; the thread has exited.
    Failed(SerialError),
}

#[derive(Debug, Default)]
struct RxBuffer {
    data: Vec<u8>,
    notified: bool,
}

/// Cloneable handle on a watcher's buffer, for a consumer on another thread.
#[derive(Debug, Clone)]
pub struct RxDrain {
    buffer: Arc<Mutex<RxBuffer>>,
}

impl RxDrain {
    /// Take everything received so far and re-arm notification.
    pub fn get_and_clear(&self) -> Vec<u8> {
        let mut buf = lock_or_recover(&self.buffer);
        buf.notified = false;
        std::mem::take(&mut buf.data)
    }
}

pub struct RxWatcher {
    port_name: String,
    buffer: Arc<Mutex<RxBuffer>>,
    cancel: CancelToken,
    port: Arc<SerialPort>,
    handle: Option<JoinHandle<()>>,
}

impl RxWatcher {
    /// Start watching `port`, reporting to `signals`.
    pub fn spawn(port: Arc<SerialPort>, signals: Sender<WatcherSignal>) -> SerialResult<Self> {
        let port_name = port.port_name();
        let buffer = Arc::new(Mutex::new(RxBuffer::default()));
        let cancel = CancelToken::new();

        let handle = {
            let port = port.clone();
            let buffer = buffer.clone();
            let cancel = cancel.clone();
            thread::Builder::new()
                .name(format!("rx-watcher-{}", port_name))
                .spawn(move || watch(port, buffer, cancel, signals))
                .map_err(|e| {
                    SerialError::io(format!("unable to start RX watcher thread: {}", e))
                        .with_port(&port_name)
                })?
        };

        log::debug!("{}: RX watcher started", port_name);
        Ok(Self {
            port_name,
            buffer,
            cancel,
            port,
            handle: Some(handle),
        })
    }

    /// Ask the thread to stop and wake it if it is blocked in a read.
    pub fn request_stop(&self) {
        self.cancel.cancel();
        self.port.interrupt_read();
    }

    /// Take everything received so far and re-arm notification.
    pub fn get_and_clear(&self) -> Vec<u8> {
        self.drain_handle().get_and_clear()
    }

    pub fn drain_handle(&self) -> RxDrain {
        RxDrain {
            buffer: self.buffer.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Wait up to `timeout` for the thread to exit.
    ///
    /// Returns `false` if it is still running; the thread is then left
    /// detached and will exit on its own once the read returns.
    pub fn join_within(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        match cancel::join_within(handle, timeout) {
            Ok(()) => true,
            Err(_detached) => {
                log::warn!(
                    "{}: RX watcher did not stop within {:?}",
                    self.port_name,
                    timeout
                );
                false
            }
        }
    }
}

impl Drop for RxWatcher {
    fn drop(&mut self) {
        self.request_stop();
    }
}

fn watch(
    port: Arc<SerialPort>,
    buffer: Arc<Mutex<RxBuffer>>,
    cancel: CancelToken,
    signals: Sender<WatcherSignal>,
) {
    let port_name = port.port_name();
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let first = match port.read_next_byte(&cancel) {
            Ok(Some(byte)) => byte,
            Ok(None) => break,
            Err(e) => {
                if !cancel.is_cancelled() {
                    log::error!("{}: RX read failed: {}", port_name, e);
                    let _ = signals.send(WatcherSignal::Failed(e));
                }
                break;
            }
        };

        // A byte already taken from the OS is stored even if a stop raced it.
        let rest = port.drain_available();
        let first_edge = {
            let mut buf = lock_or_recover(&buffer);
            buf.data.push(first);
            if let Ok(bytes) = &rest {
                buf.data.extend_from_slice(bytes);
            }
            !std::mem::replace(&mut buf.notified, true)
        };
        if first_edge {
            let _ = signals.send(WatcherSignal::DataAvailable);
        }

        if let Err(e) = rest {
            if !cancel.is_cancelled() {
                log::error!("{}: RX drain failed: {}", port_name, e);
                let _ = signals.send(WatcherSignal::Failed(e));
            }
            break;
        }
    }
    log::debug!("{}: RX watcher exited", port_name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::error::SerialErrorKind;
    use crate::serial::transport::{SerialTransport, SimulatedTransport};
    use crate::serial::types::SerialSettings;
    use std::sync::mpsc;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(2);

    fn connected_port(name: &str) -> (Arc<SimulatedTransport>, Arc<SerialPort>) {
        let sim = SimulatedTransport::new(name);
        let port = Arc::new(SerialPort::new(sim.clone()));
        port.init(&SerialSettings::for_port(name)).unwrap();
        (sim, port)
    }

    fn wait_for_bytes(watcher: &RxWatcher, len: usize) -> Vec<u8> {
        let deadline = Instant::now() + WAIT;
        let mut got = Vec::new();
        while got.len() < len && Instant::now() < deadline {
            got.extend(watcher.get_and_clear());
            thread::sleep(Duration::from_millis(2));
        }
        got
    }

    #[test]
    fn test_burst_raises_single_notification() {
        let (sim, port) = connected_port("RX0");
        let (tx, rx) = mpsc::channel();
        let mut watcher = RxWatcher::spawn(port, tx).unwrap();

        sim.inject_rx(&[1, 2, 3]);
        assert!(matches!(rx.recv_timeout(WAIT), Ok(WatcherSignal::DataAvailable)));
        sim.inject_rx(&[4, 5]);
        thread::sleep(Duration::from_millis(50));
        assert!(rx.try_recv().is_err(), "no second edge before a drain");

        assert_eq!(watcher.get_and_clear(), vec![1, 2, 3, 4, 5]);
        assert!(watcher.get_and_clear().is_empty());

        watcher.request_stop();
        assert!(watcher.join_within(WAIT));
    }

    #[test]
    fn test_drain_rearms_notification() {
        let (sim, port) = connected_port("RX1");
        let (tx, rx) = mpsc::channel();
        let mut watcher = RxWatcher::spawn(port, tx).unwrap();

        sim.inject_rx(&[0xAA]);
        assert!(matches!(rx.recv_timeout(WAIT), Ok(WatcherSignal::DataAvailable)));
        assert_eq!(wait_for_bytes(&watcher, 1), vec![0xAA]);

        sim.inject_rx(&[0xBB]);
        assert!(matches!(rx.recv_timeout(WAIT), Ok(WatcherSignal::DataAvailable)));
        assert_eq!(wait_for_bytes(&watcher, 1), vec![0xBB]);

        watcher.request_stop();
        assert!(watcher.join_within(WAIT));
    }

    #[test]
    fn test_arrivals_before_drain_keep_order() {
        let (sim, port) = connected_port("RX2");
        let (tx, rx) = mpsc::channel();
        let mut watcher = RxWatcher::spawn(port, tx).unwrap();

        sim.inject_rx(b"first");
        assert!(rx.recv_timeout(WAIT).is_ok());
        thread::sleep(Duration::from_millis(20));
        sim.inject_rx(b"second");
        let got = wait_for_bytes(&watcher, 11);
        assert_eq!(got, b"firstsecond".to_vec());

        watcher.request_stop();
        assert!(watcher.join_within(WAIT));
    }

    #[test]
    fn test_stop_is_bounded_while_idle() {
        let (_sim, port) = connected_port("RX3");
        let (tx, _rx) = mpsc::channel();
        let mut watcher = RxWatcher::spawn(port, tx).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(watcher.is_running());

        let start = Instant::now();
        watcher.request_stop();
        assert!(watcher.join_within(WAIT));
        assert!(start.elapsed() < Duration::from_millis(500));
        assert!(!watcher.is_running());
    }

    #[test]
    fn test_read_error_reports_failure_and_exits() {
        let (sim, port) = connected_port("RX4");
        let (tx, rx) = mpsc::channel();
        let mut watcher = RxWatcher::spawn(port, tx).unwrap();

        sim.inject_read_error("device removed");
        match rx.recv_timeout(WAIT) {
            Ok(WatcherSignal::Failed(e)) => assert_eq!(e.kind, SerialErrorKind::ReadFailed),
            other => panic!("expected failure signal, got {:?}", other),
        }
        assert!(watcher.join_within(WAIT));
    }

    /// Cancels the caller's token and still hands back a byte, the way a
    /// real read can complete just as a stop request lands.
    struct RacingTransport;

    impl SerialTransport for RacingTransport {
        fn open(&self, _settings: &SerialSettings) -> SerialResult<()> {
            Ok(())
        }
        fn close(&self) {}
        fn is_open(&self) -> bool {
            true
        }
        fn write(&self, data: &[u8]) -> SerialResult<usize> {
            Ok(data.len())
        }
        fn bytes_available(&self) -> SerialResult<usize> {
            Ok(0)
        }
        fn read_available(&self) -> SerialResult<Vec<u8>> {
            Ok(Vec::new())
        }
        fn read_byte(&self, cancel: &CancelToken) -> SerialResult<Option<u8>> {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            cancel.cancel();
            Ok(Some(0x5A))
        }
        fn interrupt_read(&self) {}
        fn clear_input(&self) -> SerialResult<()> {
            Ok(())
        }
        fn clear_output(&self) -> SerialResult<()> {
            Ok(())
        }
        fn port_name(&self) -> String {
            "RACE".to_string()
        }
    }

    #[test]
    fn test_byte_read_concurrently_with_stop_is_kept() {
        let port = Arc::new(SerialPort::new(Arc::new(RacingTransport)));
        let (tx, rx) = mpsc::channel();
        let mut watcher = RxWatcher::spawn(port, tx).unwrap();

        assert!(watcher.join_within(WAIT));
        assert!(matches!(rx.try_recv(), Ok(WatcherSignal::DataAvailable)));
        assert!(!watcher.is_running());
        assert_eq!(watcher.get_and_clear(), vec![0x5A]);
    }
}
