//! Serial port transport abstraction.
//!
//! [`SerialTransport`] is the seam between the port wrapper and the OS.
//! [`NativeTransport`] drives a real device through the `serialport`
//! crate; [`SimulatedTransport`] is a fully in-memory port used by tests
//! and offline demos, with hooks to inject RX data and force failures.
//!
//! Reads and writes may be issued concurrently from different threads,
//! so implementations keep the two directions independent.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use serialport::ClearBuffer;

use super::cancel::{lock_or_recover, CancelToken, WAIT_SLICE};
use super::error::{SerialError, SerialResult};
use super::types::*;

/// Interval between checks of the OS input queue while waiting for RX.
pub const RX_POLL_INTERVAL: Duration = WAIT_SLICE;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Transport trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Platform-agnostic serial port transport.
///
/// Implementations must be `Send + Sync` so they can be held behind an
/// `Arc` and used from the RX watcher, sequence players, and the owning
/// thread at the same time.
pub trait SerialTransport: Send + Sync {
    /// Open the port with the given settings.
    fn open(&self, settings: &SerialSettings) -> SerialResult<()>;

    /// Close the port. Closing a closed port is a no-op.
    fn close(&self);

    fn is_open(&self) -> bool;

    /// Write `data`, returning how many bytes the OS accepted.
    fn write(&self, data: &[u8]) -> SerialResult<usize>;

    /// Number of bytes already buffered by the OS.
    fn bytes_available(&self) -> SerialResult<usize>;

    /// Return whatever is already buffered without blocking.
    fn read_available(&self) -> SerialResult<Vec<u8>>;

    /// Block until one byte arrives or `cancel` fires.
    ///
    /// Returns `Ok(None)` only when cancelled with nothing read. A byte
    /// that was read is always returned, even if cancellation raced it.
    fn read_byte(&self, cancel: &CancelToken) -> SerialResult<Option<u8>>;

    /// Wake a thread blocked in [`read_byte`](Self::read_byte) so it
    /// re-checks its cancel token.
    fn interrupt_read(&self);

    /// Discard pending input.
    fn clear_input(&self) -> SerialResult<()>;

    /// Discard pending output.
    fn clear_output(&self) -> SerialResult<()>;

    fn port_name(&self) -> String;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Native transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type BoxedPort = Box<dyn serialport::SerialPort>;

/// OS serial port via the `serialport` crate.
///
/// The device is opened once with the TX timeout and cloned into a reader
/// handle. Clones share their comm timeouts on Windows, so the reader never
/// changes them; it only reads bytes the OS already queued and otherwise
/// sleeps on its cancel token for [`RX_POLL_INTERVAL`].
pub struct NativeTransport {
    name: String,
    open: AtomicBool,
    reader: Mutex<Option<BoxedPort>>,
    writer: Mutex<Option<BoxedPort>>,
}

impl NativeTransport {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            name: port_name.into(),
            open: AtomicBool::new(false),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
        }
    }

    fn with_writer<T>(&self, f: impl FnOnce(&mut BoxedPort) -> SerialResult<T>) -> SerialResult<T> {
        let mut guard = lock_or_recover(&self.writer);
        match guard.as_mut() {
            Some(port) => f(port),
            None => Err(SerialError::not_connected().with_port(&self.name)),
        }
    }
}

pub(crate) fn to_data_bits(bits: DataBits) -> serialport::DataBits {
    match bits {
        DataBits::Five => serialport::DataBits::Five,
        DataBits::Six => serialport::DataBits::Six,
        DataBits::Seven => serialport::DataBits::Seven,
        DataBits::Eight => serialport::DataBits::Eight,
    }
}

pub(crate) fn to_parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Even => serialport::Parity::Even,
        Parity::Odd => serialport::Parity::Odd,
    }
}

pub(crate) fn to_stop_bits(bits: StopBits) -> serialport::StopBits {
    match bits {
        StopBits::One => serialport::StopBits::One,
        StopBits::Two => serialport::StopBits::Two,
    }
}

/// The one timeout set on the device; the reader handle inherits it.
pub(crate) fn device_timeout(settings: &SerialSettings) -> Duration {
    Duration::from_millis(settings.tx_timeout_ms)
}

/// Call `try_read` until it yields a byte or fails, sleeping on `cancel`
/// between empty polls. A byte returned by `try_read` wins over a
/// concurrent cancel.
pub(crate) fn poll_byte(
    cancel: &CancelToken,
    mut try_read: impl FnMut() -> SerialResult<Option<u8>>,
) -> SerialResult<Option<u8>> {
    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        if let Some(byte) = try_read()? {
            return Ok(Some(byte));
        }
        if cancel.wait_timeout(RX_POLL_INTERVAL) {
            return Ok(None);
        }
    }
}

/// RTS/CTS wins when both flow control flags are set.
pub(crate) fn to_flow_control(settings: &SerialSettings) -> serialport::FlowControl {
    if settings.hw_flow_control {
        serialport::FlowControl::Hardware
    } else if settings.sw_flow_control {
        serialport::FlowControl::Software
    } else {
        serialport::FlowControl::None
    }
}

impl SerialTransport for NativeTransport {
    fn open(&self, settings: &SerialSettings) -> SerialResult<()> {
        self.close();

        if settings.hw_flow_control && settings.sw_flow_control {
            log::warn!(
                "{}: both RTS/CTS and XON/XOFF requested, using RTS/CTS",
                self.name
            );
        }

        let writer = serialport::new(self.name.as_str(), settings.baud_rate.value())
            .data_bits(to_data_bits(settings.data_bits))
            .parity(to_parity(settings.parity))
            .stop_bits(to_stop_bits(settings.stop_bits))
            .flow_control(to_flow_control(settings))
            .timeout(device_timeout(settings))
            .open()
            .map_err(|e| {
                SerialError::connection_failed(format!(
                    "unable to open serial port with settings: {} ({})",
                    settings, e
                ))
                .with_port(&self.name)
            })?;

        let reader = writer
            .try_clone()
            .map_err(|e| SerialError::connection_failed(e.to_string()).with_port(&self.name))?;

        *lock_or_recover(&self.writer) = Some(writer);
        *lock_or_recover(&self.reader) = Some(reader);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            log::debug!("{}: closing native handle", self.name);
        }
        lock_or_recover(&self.writer).take();
        lock_or_recover(&self.reader).take();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn write(&self, data: &[u8]) -> SerialResult<usize> {
        self.with_writer(|port| {
            let mut written = 0;
            while written < data.len() {
                match port.write(&data[written..]) {
                    Ok(0) => break,
                    Ok(n) => written += n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) if e.kind() == ErrorKind::TimedOut => break,
                    Err(e) => return Err(SerialError::write_failed(e.to_string())),
                }
            }
            port.flush()
                .map_err(|e| SerialError::write_failed(e.to_string()))?;
            Ok(written)
        })
    }

    fn bytes_available(&self) -> SerialResult<usize> {
        self.with_writer(|port| Ok(port.bytes_to_read()? as usize))
    }

    fn read_available(&self) -> SerialResult<Vec<u8>> {
        let mut guard = lock_or_recover(&self.reader);
        let port = guard
            .as_mut()
            .ok_or_else(|| SerialError::not_connected().with_port(&self.name))?;
        let pending = port.bytes_to_read()? as usize;
        if pending == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; pending];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(SerialError::read_failed(e.to_string()).with_port(&self.name)),
        }
    }

    fn read_byte(&self, cancel: &CancelToken) -> SerialResult<Option<u8>> {
        poll_byte(cancel, || {
            let mut guard = lock_or_recover(&self.reader);
            let port = guard
                .as_mut()
                .ok_or_else(|| SerialError::not_connected().with_port(&self.name))?;
            let pending = port
                .bytes_to_read()
                .map_err(|e| SerialError::read_failed(e.to_string()).with_port(&self.name))?;
            if pending == 0 {
                return Ok(None);
            }
            let mut byte = [0u8; 1];
            match port.read(&mut byte) {
                Ok(1) => Ok(Some(byte[0])),
                Ok(_) => Ok(None),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => Ok(None),
                Err(e) => Err(SerialError::read_failed(e.to_string()).with_port(&self.name)),
            }
        })
    }

    fn interrupt_read(&self) {
        // The poll loop waits on the caller's cancel token.
    }

    fn clear_input(&self) -> SerialResult<()> {
        self.with_writer(|port| Ok(port.clear(ClearBuffer::Input)?))
    }

    fn clear_output(&self) -> SerialResult<()> {
        self.with_writer(|port| Ok(port.clear(ClearBuffer::Output)?))
    }

    fn port_name(&self) -> String {
        self.name.clone()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Simulated transport (for testing & offline use)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct SimState {
    open: bool,
    rx_buf: VecDeque<u8>,
    tx_buf: Vec<u8>,
    loopback: bool,
    settings: Option<SerialSettings>,
    open_count: usize,
    fail_open: Option<String>,
    fail_writes: bool,
    short_writes: bool,
    read_error: Option<String>,
}

/// A fully in-memory transport useful for unit tests and UI demos.
pub struct SimulatedTransport {
    name: String,
    state: Mutex<SimState>,
    changed: Condvar,
}

impl SimulatedTransport {
    /// Create a new simulated transport for the given port name.
    pub fn new(port_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: port_name.into(),
            state: Mutex::new(SimState::default()),
            changed: Condvar::new(),
        })
    }

    /// Create a transport that echoes every write back into RX.
    pub fn with_loopback(port_name: impl Into<String>) -> Arc<Self> {
        let t = Self::new(port_name);
        t.set_loopback(true);
        t
    }

    pub fn set_loopback(&self, enabled: bool) {
        lock_or_recover(&self.state).loopback = enabled;
    }

    /// Make the next opens fail with `reason` (`None` restores success).
    pub fn set_fail_open(&self, reason: Option<&str>) {
        lock_or_recover(&self.state).fail_open = reason.map(str::to_string);
    }

    /// Make every write fail outright.
    pub fn set_fail_writes(&self, enabled: bool) {
        lock_or_recover(&self.state).fail_writes = enabled;
    }

    /// Make every write accept only half of the payload.
    pub fn set_short_writes(&self, enabled: bool) {
        lock_or_recover(&self.state).short_writes = enabled;
    }

    /// Inject bytes into the receive buffer (simulate incoming data).
    pub fn inject_rx(&self, data: &[u8]) {
        lock_or_recover(&self.state).rx_buf.extend(data);
        self.changed.notify_all();
    }

    /// Make the pending or next blocking read fail.
    pub fn inject_read_error(&self, reason: &str) {
        lock_or_recover(&self.state).read_error = Some(reason.to_string());
        self.changed.notify_all();
    }

    /// Drain all bytes from the transmit buffer (for test assertions).
    pub fn drain_tx(&self) -> Vec<u8> {
        std::mem::take(&mut lock_or_recover(&self.state).tx_buf)
    }

    /// Peek at the transmit buffer contents without draining.
    pub fn peek_tx(&self) -> Vec<u8> {
        lock_or_recover(&self.state).tx_buf.clone()
    }

    /// Block until at least `len` bytes were transmitted or `timeout` passes.
    pub fn wait_for_tx(&self, len: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = lock_or_recover(&self.state);
        while state.tx_buf.len() < len {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.changed.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    /// How many times the port has been opened successfully.
    pub fn open_count(&self) -> usize {
        lock_or_recover(&self.state).open_count
    }

    /// Settings used by the most recent successful open.
    pub fn last_settings(&self) -> Option<SerialSettings> {
        lock_or_recover(&self.state).settings.clone()
    }
}

impl SerialTransport for SimulatedTransport {
    fn open(&self, settings: &SerialSettings) -> SerialResult<()> {
        let mut state = lock_or_recover(&self.state);
        if let Some(reason) = &state.fail_open {
            return Err(SerialError::connection_failed(reason.clone()).with_port(&self.name));
        }
        state.open = true;
        state.settings = Some(settings.clone());
        state.open_count += 1;
        Ok(())
    }

    fn close(&self) {
        lock_or_recover(&self.state).open = false;
        self.changed.notify_all();
    }

    fn is_open(&self) -> bool {
        lock_or_recover(&self.state).open
    }

    fn write(&self, data: &[u8]) -> SerialResult<usize> {
        let mut state = lock_or_recover(&self.state);
        if !state.open {
            return Err(SerialError::not_connected().with_port(&self.name));
        }
        if state.fail_writes {
            return Err(SerialError::write_failed("simulated write failure").with_port(&self.name));
        }
        let accepted = if state.short_writes { data.len() / 2 } else { data.len() };
        state.tx_buf.extend_from_slice(&data[..accepted]);
        if state.loopback {
            state.rx_buf.extend(&data[..accepted]);
        }
        drop(state);
        self.changed.notify_all();
        Ok(accepted)
    }

    fn bytes_available(&self) -> SerialResult<usize> {
        let state = lock_or_recover(&self.state);
        if !state.open {
            return Err(SerialError::not_connected().with_port(&self.name));
        }
        Ok(state.rx_buf.len())
    }

    fn read_available(&self) -> SerialResult<Vec<u8>> {
        let mut state = lock_or_recover(&self.state);
        if !state.open {
            return Err(SerialError::not_connected().with_port(&self.name));
        }
        Ok(state.rx_buf.drain(..).collect())
    }

    fn read_byte(&self, cancel: &CancelToken) -> SerialResult<Option<u8>> {
        let mut state = lock_or_recover(&self.state);
        loop {
            if let Some(byte) = state.rx_buf.pop_front() {
                return Ok(Some(byte));
            }
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if let Some(reason) = state.read_error.take() {
                return Err(SerialError::read_failed(reason).with_port(&self.name));
            }
            if !state.open {
                return Err(SerialError::not_connected().with_port(&self.name));
            }
            state = match self.changed.wait_timeout(state, WAIT_SLICE) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn interrupt_read(&self) {
        self.changed.notify_all();
    }

    fn clear_input(&self) -> SerialResult<()> {
        lock_or_recover(&self.state).rx_buf.clear();
        Ok(())
    }

    fn clear_output(&self) -> SerialResult<()> {
        Ok(())
    }

    fn port_name(&self) -> String {
        self.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn open_sim(name: &str) -> Arc<SimulatedTransport> {
        let t = SimulatedTransport::new(name);
        t.open(&SerialSettings::for_port(name)).unwrap();
        t
    }

    #[test]
    fn test_simulated_open_close() {
        let t = SimulatedTransport::new("SIM0");
        assert!(!t.is_open());
        t.open(&SerialSettings::for_port("SIM0")).unwrap();
        assert!(t.is_open());
        assert_eq!(t.open_count(), 1);
        assert_eq!(t.last_settings().unwrap().port_name, "SIM0");
        t.close();
        assert!(!t.is_open());
    }

    #[test]
    fn test_simulated_fail_open() {
        let t = SimulatedTransport::new("SIM0");
        t.set_fail_open(Some("busy"));
        let err = t.open(&SerialSettings::for_port("SIM0")).unwrap_err();
        assert_eq!(err.kind, crate::serial::error::SerialErrorKind::ConnectionFailed);
        assert!(!t.is_open());
        t.set_fail_open(None);
        assert!(t.open(&SerialSettings::for_port("SIM0")).is_ok());
    }

    #[test]
    fn test_simulated_write_and_drain() {
        let t = open_sim("SIM1");
        assert_eq!(t.write(b"hello").unwrap(), 5);
        assert_eq!(t.peek_tx(), b"hello");
        assert_eq!(t.drain_tx(), b"hello");
        assert!(t.drain_tx().is_empty());
    }

    #[test]
    fn test_simulated_write_closed() {
        let t = SimulatedTransport::new("SIM1");
        assert!(t.write(b"x").is_err());
    }

    #[test]
    fn test_simulated_short_write() {
        let t = open_sim("SIM1");
        t.set_short_writes(true);
        assert_eq!(t.write(&[1, 2, 3, 4]).unwrap(), 2);
    }

    #[test]
    fn test_simulated_loopback() {
        let t = SimulatedTransport::with_loopback("LOOP");
        t.open(&SerialSettings::for_port("LOOP")).unwrap();
        t.write(&[7, 8, 9]).unwrap();
        assert_eq!(t.bytes_available().unwrap(), 3);
        assert_eq!(t.read_available().unwrap(), vec![7, 8, 9]);
    }

    #[test]
    fn test_simulated_read_byte_then_available() {
        let t = open_sim("SIM2");
        t.inject_rx(&[1, 2, 3]);
        let cancel = CancelToken::new();
        assert_eq!(t.read_byte(&cancel).unwrap(), Some(1));
        assert_eq!(t.read_available().unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_simulated_read_byte_blocks_until_data() {
        let t = open_sim("SIM3");
        let reader = t.clone();
        let handle = thread::spawn(move || reader.read_byte(&CancelToken::new()));
        thread::sleep(Duration::from_millis(30));
        t.inject_rx(&[0x42]);
        assert_eq!(handle.join().unwrap().unwrap(), Some(0x42));
    }

    #[test]
    fn test_simulated_read_byte_cancel() {
        let t = open_sim("SIM4");
        let cancel = CancelToken::new();
        let reader = t.clone();
        let c = cancel.clone();
        let start = Instant::now();
        let handle = thread::spawn(move || reader.read_byte(&c));
        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        t.interrupt_read();
        assert_eq!(handle.join().unwrap().unwrap(), None);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_simulated_read_error() {
        let t = open_sim("SIM5");
        t.inject_read_error("cable unplugged");
        let err = t.read_byte(&CancelToken::new()).unwrap_err();
        assert_eq!(err.kind, crate::serial::error::SerialErrorKind::ReadFailed);
    }

    #[test]
    fn test_wait_for_tx() {
        let t = open_sim("SIM6");
        let writer = t.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            writer.write(&[1, 2]).unwrap();
        });
        assert!(t.wait_for_tx(2, Duration::from_secs(2)));
        assert!(!t.wait_for_tx(3, Duration::from_millis(20)));
    }

    #[test]
    fn test_flow_control_mapping() {
        let mut s = SerialSettings::default();
        assert_eq!(to_flow_control(&s), serialport::FlowControl::None);
        s.sw_flow_control = true;
        assert_eq!(to_flow_control(&s), serialport::FlowControl::Software);
        s.hw_flow_control = true;
        assert_eq!(to_flow_control(&s), serialport::FlowControl::Hardware);
    }

    #[test]
    fn test_line_parameter_mapping() {
        assert_eq!(to_data_bits(DataBits::Seven), serialport::DataBits::Seven);
        assert_eq!(to_parity(Parity::Odd), serialport::Parity::Odd);
        assert_eq!(to_stop_bits(StopBits::Two), serialport::StopBits::Two);
    }

    #[test]
    fn test_device_timeout_is_tx_timeout() {
        let mut s = SerialSettings::default();
        s.rx_timeout_ms = 20;
        s.tx_timeout_ms = 750;
        assert_eq!(device_timeout(&s), Duration::from_millis(750));
    }

    #[test]
    fn test_poll_byte_retries_until_data() {
        let cancel = CancelToken::new();
        let mut polls = 0;
        let got = poll_byte(&cancel, || {
            polls += 1;
            Ok(if polls < 4 { None } else { Some(0x5A) })
        });
        assert_eq!(got.unwrap(), Some(0x5A));
        assert_eq!(polls, 4);
    }

    #[test]
    fn test_poll_byte_cancel_while_idle() {
        let cancel = CancelToken::new();
        let c = cancel.clone();
        let start = Instant::now();
        let handle = thread::spawn(move || poll_byte(&c, || Ok(None)));
        thread::sleep(Duration::from_millis(30));
        cancel.cancel();
        assert_eq!(handle.join().unwrap().unwrap(), None);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_poll_byte_keeps_byte_read_during_cancel() {
        let cancel = CancelToken::new();
        let got = poll_byte(&cancel, || {
            cancel.cancel();
            Ok(Some(9))
        });
        assert_eq!(got.unwrap(), Some(9));
    }

    #[test]
    fn test_poll_byte_propagates_read_error() {
        let cancel = CancelToken::new();
        let err = poll_byte(&cancel, || Err(SerialError::read_failed("gone"))).unwrap_err();
        assert_eq!(err.kind, crate::serial::error::SerialErrorKind::ReadFailed);
    }

    #[test]
    fn test_native_closed_operations() {
        let t = NativeTransport::new("/dev/does-not-exist");
        assert!(!t.is_open());
        assert!(t.write(b"x").is_err());
        assert!(t.read_available().is_err());
        t.close();
        assert_eq!(t.port_name(), "/dev/does-not-exist");
    }
}
