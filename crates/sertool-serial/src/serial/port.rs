//! Stateful wrapper around one serial handle.
//!
//! A [`SerialPort`] is shared (behind an `Arc`) by the RX watcher, every
//! running sequence player, and the session manager. Reads go straight to
//! the transport; writes are serialized through one mutex so concurrent
//! senders never interleave their byte streams.

use std::sync::{Arc, Mutex};

use super::cancel::{lock_or_recover, CancelToken};
use super::error::{SerialError, SerialResult};
use super::port_scanner;
use super::transport::SerialTransport;
use super::types::SerialSettings;

pub struct SerialPort {
    transport: Arc<dyn SerialTransport>,
    write_lock: Mutex<()>,
    settings: Mutex<Option<SerialSettings>>,
}

impl SerialPort {
    pub fn new(transport: Arc<dyn SerialTransport>) -> Self {
        Self {
            transport,
            write_lock: Mutex::new(()),
            settings: Mutex::new(None),
        }
    }

    /// Names of all serial ports the OS reports.
    pub fn list_available_ports() -> SerialResult<Vec<String>> {
        port_scanner::list_available_ports()
    }

    /// Open the port with `settings`, closing any previous handle first.
    ///
    /// On failure the port is left closed.
    pub fn init(&self, settings: &SerialSettings) -> SerialResult<()> {
        self.close();

        let name = self.transport.port_name();
        if settings.port_name != name {
            return Err(SerialError::connection_failed(format!(
                "settings target '{}' but this handle drives '{}'",
                settings.port_name, name
            ))
            .with_port(name));
        }

        if let Err(e) = self.transport.open(settings) {
            self.transport.close();
            return Err(e);
        }

        *lock_or_recover(&self.settings) = Some(settings.clone());
        log::info!("Serial port initialized: {}", settings);
        Ok(())
    }

    /// [`init`](Self::init) reporting failure as `false`.
    pub fn try_init(&self, settings: &SerialSettings) -> bool {
        match self.init(settings) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Unable to init serial port: {}", e);
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_open()
    }

    /// Close the port if open.
    pub fn close(&self) {
        if self.transport.is_open() {
            log::info!("Closing serial port {}", self.transport.port_name());
        }
        self.transport.close();
        lock_or_recover(&self.settings).take();
    }

    /// Write all of `data`, failing if the OS accepts fewer bytes.
    pub fn write(&self, data: &[u8]) -> SerialResult<usize> {
        if !self.is_connected() {
            return Err(SerialError::not_connected().with_port(self.transport.port_name()));
        }
        if data.is_empty() {
            return Ok(0);
        }

        let _serialized = lock_or_recover(&self.write_lock);
        let written = self
            .transport
            .write(data)
            .map_err(|e| e.with_port(self.transport.port_name()))?;
        if written != data.len() {
            return Err(
                SerialError::short_write(written, data.len()).with_port(self.transport.port_name())
            );
        }
        log::debug!("{}: wrote {} bytes", self.transport.port_name(), written);
        Ok(written)
    }

    /// True if the OS holds received bytes not yet read.
    pub fn is_data_available(&self) -> bool {
        self.transport
            .bytes_available()
            .map(|n| n > 0)
            .unwrap_or(false)
    }

    /// Non-blocking: whatever the OS has already buffered.
    pub fn drain_available(&self) -> SerialResult<Vec<u8>> {
        self.transport.read_available()
    }

    /// Block until one byte arrives, or return `Ok(None)` once `cancel` fires.
    pub fn read_next_byte(&self, cancel: &CancelToken) -> SerialResult<Option<u8>> {
        self.transport.read_byte(cancel)
    }

    /// Wake a reader blocked in [`read_next_byte`](Self::read_next_byte).
    pub fn interrupt_read(&self) {
        self.transport.interrupt_read();
    }

    /// Discard unread input.
    pub fn flush_read_buffer(&self) -> SerialResult<()> {
        self.ensure_connected()?;
        self.transport.clear_input()
    }

    /// Discard unsent output.
    pub fn flush_write_buffer(&self) -> SerialResult<()> {
        self.ensure_connected()?;
        let _serialized = lock_or_recover(&self.write_lock);
        self.transport.clear_output()
    }

    /// Settings of the currently open handle.
    pub fn settings(&self) -> Option<SerialSettings> {
        lock_or_recover(&self.settings).clone()
    }

    pub fn port_name(&self) -> String {
        self.transport.port_name()
    }

    fn ensure_connected(&self) -> SerialResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SerialError::not_connected().with_port(self.transport.port_name()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::error::SerialErrorKind;
    use crate::serial::transport::SimulatedTransport;
    use std::thread;

    fn sim_port(name: &str) -> (Arc<SimulatedTransport>, SerialPort) {
        let sim = SimulatedTransport::new(name);
        let port = SerialPort::new(sim.clone());
        (sim, port)
    }

    #[test]
    fn test_init_and_close() {
        let (_sim, port) = sim_port("COM1");
        assert!(!port.is_connected());
        port.init(&SerialSettings::for_port("COM1")).unwrap();
        assert!(port.is_connected());
        assert_eq!(port.settings().unwrap().port_name, "COM1");
        port.close();
        assert!(!port.is_connected());
        assert!(port.settings().is_none());
    }

    #[test]
    fn test_init_closes_previous_handle() {
        let (sim, port) = sim_port("COM1");
        port.init(&SerialSettings::for_port("COM1")).unwrap();
        let mut s = SerialSettings::for_port("COM1");
        s.rx_timeout_ms = 50;
        port.init(&s).unwrap();
        assert_eq!(sim.open_count(), 2);
        assert_eq!(port.settings().unwrap().rx_timeout_ms, 50);
    }

    #[test]
    fn test_init_failure_leaves_port_closed() {
        let (sim, port) = sim_port("COM2");
        sim.set_fail_open(Some("access denied"));
        let err = port.init(&SerialSettings::for_port("COM2")).unwrap_err();
        assert_eq!(err.kind, SerialErrorKind::ConnectionFailed);
        assert!(!port.is_connected());
        assert!(!port.try_init(&SerialSettings::for_port("COM2")));
    }

    #[test]
    fn test_init_rejects_mismatched_port() {
        let (_sim, port) = sim_port("COM2");
        assert!(port.init(&SerialSettings::for_port("COM9")).is_err());
        assert!(!port.is_connected());
    }

    #[test]
    fn test_write_requires_connection() {
        let (_sim, port) = sim_port("COM3");
        let err = port.write(&[1]).unwrap_err();
        assert_eq!(err.kind, SerialErrorKind::NotConnected);
        assert_eq!(err.port_name.as_deref(), Some("COM3"));
    }

    #[test]
    fn test_write_counts_bytes() {
        let (sim, port) = sim_port("COM3");
        port.init(&SerialSettings::for_port("COM3")).unwrap();
        assert_eq!(port.write(&[1, 2, 3]).unwrap(), 3);
        assert_eq!(port.write(&[]).unwrap(), 0);
        assert_eq!(sim.drain_tx(), vec![1, 2, 3]);
    }

    #[test]
    fn test_short_write_is_error() {
        let (sim, port) = sim_port("COM3");
        port.init(&SerialSettings::for_port("COM3")).unwrap();
        sim.set_short_writes(true);
        let err = port.write(&[1, 2, 3, 4]).unwrap_err();
        assert_eq!(err.kind, SerialErrorKind::WriteFailed);
        assert!(port.is_connected());
    }

    #[test]
    fn test_concurrent_writes_do_not_interleave() {
        let (sim, port) = sim_port("COM4");
        port.init(&SerialSettings::for_port("COM4")).unwrap();
        let port = Arc::new(port);
        let handles: Vec<_> = (0u8..4)
            .map(|id| {
                let p = port.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        p.write(&[id; 8]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let tx = sim.drain_tx();
        assert_eq!(tx.len(), 4 * 50 * 8);
        for chunk in tx.chunks(8) {
            assert!(chunk.iter().all(|b| *b == chunk[0]));
        }
    }

    #[test]
    fn test_drain_and_data_available() {
        let (sim, port) = sim_port("COM5");
        port.init(&SerialSettings::for_port("COM5")).unwrap();
        assert!(!port.is_data_available());
        sim.inject_rx(&[9, 8]);
        assert!(port.is_data_available());
        assert_eq!(port.drain_available().unwrap(), vec![9, 8]);
        assert!(port.drain_available().unwrap().is_empty());
    }

    #[test]
    fn test_flush_buffers() {
        let (sim, port) = sim_port("COM6");
        assert!(port.flush_read_buffer().is_err());
        assert!(port.flush_write_buffer().is_err());
        port.init(&SerialSettings::for_port("COM6")).unwrap();
        sim.inject_rx(&[1, 2, 3]);
        port.flush_read_buffer().unwrap();
        port.flush_write_buffer().unwrap();
        assert!(!port.is_data_available());
    }
}
