//! Serial crate: sub-modules.

pub mod types;
pub mod error;
pub mod parser;
pub mod cancel;
pub mod transport;
pub mod port;
pub mod port_scanner;
pub mod events;
pub mod rx_watcher;
pub mod sequence;
pub mod session;
pub mod logging;

// Re-export top-level items for convenience.
pub use types::*;
pub use error::{SerialError, SerialErrorKind, SerialResult};
pub use parser::{parse_channel_data, parse_seq_data, ParseOutcome, TextFieldStatus};
pub use port::SerialPort;
pub use events::{EventSink, SessionEvent};
pub use session::{NativeProvider, PortSessionManager, SimulatedProvider, TransportProvider};
