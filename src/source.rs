//! Packet source abstraction
//!
//! The viewer never talks to USB directly. Anything that can hand out bulk
//! transfers one at a time (a claimed device endpoint, a replayed capture file,
//! a scripted test stream) implements [`PacketSource`].

use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a packet source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// No data arrived within the timeout. Expected and retried.
    #[error("transfer timed out")]
    Timeout,

    /// The device sent more than the buffer could hold. Retried.
    #[error("transfer overflow")]
    Overflow,

    /// A finite source has no more packets.
    #[error("packet source exhausted")]
    Exhausted,

    /// Any other transport failure. Fatal to the capture loop.
    #[error("transport error: {0}")]
    Transport(String),
}

impl SourceError {
    /// Whether the fetch loop should simply try again
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Timeout | SourceError::Overflow)
    }
}

/// Result type alias for source operations.
pub type Result<T> = std::result::Result<T, SourceError>;

/// A blocking producer of raw bulk-transfer packets
pub trait PacketSource {
    /// Read one packet into `buf`, waiting at most `timeout`
    ///
    /// Returns the number of bytes written. Packets longer than `buf` are
    /// truncated.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Timeout`] when nothing arrived in time,
    /// [`SourceError::Exhausted`] at the end of a finite source, and
    /// [`SourceError::Transport`] on unrecoverable failures.
    fn read_packet(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;
}

impl<S: PacketSource + ?Sized> PacketSource for Box<S> {
    fn read_packet(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).read_packet(buf, timeout)
    }
}

/// One scripted event of a [`MemorySource`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// Deliver these bytes
    Packet(Vec<u8>),
    /// Report a timeout
    Timeout,
    /// Report a fatal transport error
    Error(String),
}

/// In-memory packet source, replays a fixed script of events
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    events: VecDeque<SourceEvent>,
}

impl MemorySource {
    /// Create a source that delivers `packets` in order
    pub fn new<I>(packets: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        Self {
            events: packets.into_iter().map(SourceEvent::Packet).collect(),
        }
    }

    /// Create a source from an explicit event script
    pub fn from_events<I>(events: I) -> Self
    where
        I: IntoIterator<Item = SourceEvent>,
    {
        Self {
            events: events.into_iter().collect(),
        }
    }

    /// Append a packet to the end of the script
    pub fn push_packet(&mut self, packet: Vec<u8>) {
        self.events.push_back(SourceEvent::Packet(packet));
    }

    /// Append an event to the end of the script
    pub fn push_event(&mut self, event: SourceEvent) {
        self.events.push_back(event);
    }

    /// Number of events not yet delivered
    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

impl PacketSource for MemorySource {
    fn read_packet(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        match self.events.pop_front() {
            Some(SourceEvent::Packet(packet)) => {
                let n = packet.len().min(buf.len());
                buf[..n].copy_from_slice(&packet[..n]);
                Ok(n)
            }
            Some(SourceEvent::Timeout) => Err(SourceError::Timeout),
            Some(SourceEvent::Error(message)) => Err(SourceError::Transport(message)),
            None => Err(SourceError::Exhausted),
        }
    }
}
