//! Events reported to the owning front end.
//!
//! Background threads never call front-end code directly. They hand
//! events to an [`EventSink`], a cloneable sending half of a
//! `std::sync::mpsc` channel, and the owner drains the receiving half on
//! its own thread.

use std::sync::mpsc::{self, Receiver, Sender};

use serde::Serialize;

use super::types::{ChannelIndex, SequenceIndex};

/// Something the session layer wants the front end to know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// Port opened and RX watcher running.
    #[serde(rename_all = "camelCase")]
    Connected { port_name: String },
    /// Port closed, or a connect attempt failed.
    #[serde(rename_all = "camelCase")]
    Closed { port_name: String },
    /// One drained RX burst, in arrival order.
    DataReceived { data: Vec<u8> },
    /// A sequence player wrote one channel payload.
    SequenceByteSent {
        sequence: SequenceIndex,
        channel: ChannelIndex,
    },
    /// A sequence player ended, naturally, stopped, or on error.
    SequenceFinished { sequence: SequenceIndex },
    /// Human-readable connection, read, or write failure.
    Error { message: String },
}

impl SessionEvent {
    /// Stable event name for front ends that dispatch on strings.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Closed { .. } => "closed",
            Self::DataReceived { .. } => "data-received",
            Self::SequenceByteSent { .. } => "sequence-byte-sent",
            Self::SequenceFinished { .. } => "sequence-finished",
            Self::Error { .. } => "error",
        }
    }
}

/// Sending half handed to every component that reports events.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<SessionEvent>,
}

impl EventSink {
    pub fn new(tx: Sender<SessionEvent>) -> Self {
        Self { tx }
    }

    /// A sink plus the receiver the owner should drain.
    pub fn channel() -> (Self, Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self::new(tx), rx)
    }

    /// Deliver an event; a dropped receiver is not an error.
    pub fn emit(&self, event: SessionEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            log::debug!("event receiver gone, dropping '{}' event", name);
        }
    }
}
