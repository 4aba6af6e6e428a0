//! # Serial Tool – Serial / UART core
//!
//! Manual serial-link exerciser core providing:
//!
//! - **Text grammars** – channel data (`1; 0x2A; "Hi"`) and playback
//!   sequences (`(1, 500); (2, 100, 3)`) parsed into exact bytes and plans
//! - **Port** – thread-safe wrapper over one OS serial handle with
//!   serialized writes and a cancellable single-byte read
//! - **RX Watcher** – background thread accumulating inbound bytes with
//!   edge-triggered "data available" notification
//! - **Sequence Player** – one background thread per timed/repeated sequence
//! - **Session Management** – connect/disconnect state machine reporting
//!   through an explicit event sink
//! - **Traffic Capture** – RX/TX history with plain and CSV export

pub mod serial;
