//! Timed playback of one parsed sequence.
//!
//! Each [`TxSequencePlayer`] runs on its own thread and makes exactly one
//! pass over its blocks: for every block it writes the channel payload
//! `repeat` times, reporting each write and waiting `delay_ms` after it.
//! Stop is cooperative and checked around every write and wait; waits are
//! sliced so a stop lands promptly even during long delays. The player
//! reports [`SessionEvent::SequenceFinished`] exactly once however the
//! pass ends.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::cancel::{self, CancelToken};
use super::error::{SerialError, SerialResult};
use super::events::{EventSink, SessionEvent};
use super::port::SerialPort;
use super::types::{ChannelSnapshot, ParsedSequence, SequenceIndex};

/// How a playback pass ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Completed,
    Stopped,
}

pub struct TxSequencePlayer {
    port: Arc<SerialPort>,
    sequence: SequenceIndex,
    snapshot: ChannelSnapshot,
    blocks: ParsedSequence,
    sink: EventSink,
    stop: CancelToken,
}

impl TxSequencePlayer {
    pub fn new(
        port: Arc<SerialPort>,
        sequence: SequenceIndex,
        snapshot: ChannelSnapshot,
        blocks: ParsedSequence,
        sink: EventSink,
    ) -> Self {
        Self {
            port,
            sequence,
            snapshot,
            blocks,
            sink,
            stop: CancelToken::new(),
        }
    }

    /// Start the playback thread.
    pub fn spawn(self) -> SerialResult<PlayerHandle> {
        let sequence = self.sequence;
        let stop = self.stop.clone();
        let handle = thread::Builder::new()
            .name(format!("tx-sequence-{}", sequence))
            .spawn(move || self.run_to_end())
            .map_err(|e| {
                SerialError::io(format!(
                    "unable to start sequence {} thread: {}",
                    sequence, e
                ))
            })?;
        Ok(PlayerHandle {
            sequence,
            stop,
            handle: Some(handle),
        })
    }

    fn run_to_end(self) {
        let _finished = FinishGuard {
            sink: self.sink.clone(),
            sequence: self.sequence,
        };
        let started = Instant::now();
        match self.play() {
            Ok(PlayOutcome::Completed) => log::info!(
                "Sequence {} completed in {:?}",
                self.sequence,
                started.elapsed()
            ),
            Ok(PlayOutcome::Stopped) => log::info!("Sequence {} stopped on request", self.sequence),
            Err(e) => {
                log::error!("Exception while transmitting sequence {}: {}", self.sequence, e);
                self.sink.emit(SessionEvent::Error {
                    message: format!("Sequence {} aborted: {}", self.sequence, e.message),
                });
            }
        }
    }

    fn play(&self) -> SerialResult<PlayOutcome> {
        for block in &self.blocks {
            if self.stop.is_cancelled() {
                return Ok(PlayOutcome::Stopped);
            }
            let data = self.snapshot.get(block.channel).ok_or_else(|| {
                SerialError::invalid_channel(format!(
                    "data channel {} referenced by sequence {} holds no data",
                    block.channel, self.sequence
                ))
            })?;
            let delay = Duration::from_millis(block.delay_ms);

            for _ in 0..block.repeat {
                if self.stop.is_cancelled() {
                    return Ok(PlayOutcome::Stopped);
                }
                self.port.write(data)?;
                self.sink.emit(SessionEvent::SequenceByteSent {
                    sequence: self.sequence,
                    channel: block.channel,
                });
                if self.stop.is_cancelled() || self.stop.wait_timeout(delay) {
                    return Ok(PlayOutcome::Stopped);
                }
            }
        }
        Ok(PlayOutcome::Completed)
    }
}

/// Emits `SequenceFinished` when the player thread unwinds, however it ends.
struct FinishGuard {
    sink: EventSink,
    sequence: SequenceIndex,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.sink.emit(SessionEvent::SequenceFinished {
            sequence: self.sequence,
        });
    }
}

/// Owner's handle on a running player.
pub struct PlayerHandle {
    sequence: SequenceIndex,
    stop: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl PlayerHandle {
    pub fn sequence(&self) -> SequenceIndex {
        self.sequence
    }

    /// Signal the player to stop. Does not block.
    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }

    /// Wait up to `timeout` for the player thread to exit.
    pub fn join_within(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        match cancel::join_within(handle, timeout) {
            Ok(()) => true,
            Err(handle) => {
                log::warn!("Sequence {} did not stop within {:?}", self.sequence, timeout);
                self.handle = Some(handle);
                false
            }
        }
    }
}
