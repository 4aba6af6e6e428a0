//! Serial tool application layer.
//!
//! The port, RX watcher, sequence players and session state machine live
//! in the `sertool-serial` crate. This package adds what a front end needs
//! around them: the persisted configuration document, the recently-used
//! configuration list, output rendering, logger setup and the CLI.

pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod logging;
pub mod paths;
pub mod recent;

pub use sertool_serial::serial;

pub use config::{AppConfig, LoadReport};
pub use display::OutputRepresentation;
pub use error::{ConfigError, ConfigErrorKind, ConfigResult};
