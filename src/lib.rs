//! Step-sequence a handful of virtual light strips and mirror the active ones
//! onto a serial LED controller.
//!
//! The [`Sequencer`] owns one of everything: the [`SequenceStore`] with the
//! per-strip beat rows, the [`LedMapping`] from strips to hardware channels,
//! the [`DiffGate`] that keeps the serial line quiet while nothing changes, the
//! [`BeatClock`] and the single [`DeviceSession`]. Drive it with
//! [`runner::run`] (blocking) or, with the `tokio` feature, `tokio::run`.

use std::{io, time::Duration};

use strip_sequencer_shared::{DEFAULT_BAUD_RATE, DEFAULT_BPM};
use thiserror::Error;

pub mod assembler;
pub mod clock;
pub mod frame;
pub mod mapping;
pub mod runner;
pub mod sequence;
pub mod sequencer;
pub mod session;
#[cfg(feature = "tokio")]
pub mod tokio;
pub mod transport;

pub use assembler::{parse_led_count, StreamAssembler};
pub use clock::{tick_interval, BeatClock, ClockState};
pub use frame::{active_channels, encode_frame, ChannelSet, DiffGate};
pub use mapping::LedMapping;
pub use sequence::{SequenceStore, Strip, StripId};
pub use sequencer::{Command, Sequencer};
pub use session::{DeviceSession, SessionState};
pub use transport::{MemoryTransport, SerialTransport, Transport};

/// Serial settings used when the sequencer opens the controller.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
	pub port:         String,
	pub baud_rate:    u32,
	/// How long a single read waits before reporting that nothing arrived.
	pub read_timeout: Duration,
}

impl DeviceConfig {
	pub fn new(port: impl Into<String>) -> Self {
		Self {
			port: port.into(),
			..Self::default()
		}
	}
}

impl Default for DeviceConfig {
	fn default() -> Self {
		Self {
			port:         String::new(),
			baud_rate:    DEFAULT_BAUD_RATE,
			read_timeout: Duration::from_millis(10),
		}
	}
}

#[derive(Debug, Clone)]
pub struct Config {
	pub bpm:    u32,
	pub device: DeviceConfig,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			bpm:    DEFAULT_BPM,
			device: DeviceConfig::default(),
		}
	}
}

/// Handshake failures. Both end the current session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
	#[error("stream closed before the handshake completed")]
	StreamClosed,
	#[error("invalid ack: {0:?}")]
	InvalidAck(String),
}

#[derive(Error, Debug)]
pub enum Error {
	#[error("strip index {index} is out of bounds ({len} strips)")]
	StripOutOfBounds { index: usize, len: usize },
	#[error("beat index {index} is out of bounds ({len} beats)")]
	BeatOutOfBounds { index: usize, len: usize },
	#[error("channel {channel} is outside 1..={channel_count}")]
	ChannelOutOfRange { channel: u16, channel_count: u16 },
	#[error("no strip with id {0}")]
	UnknownStrip(StripId),
	#[error("tempo {bpm} bpm is outside {min}..={max}")]
	TempoOutOfRange { bpm: u32, min: u32, max: u32 },
	#[error(transparent)]
	Protocol(#[from] ProtocolError),
	#[error("device is not connected")]
	NotConnected,
	#[error("a device session is already active")]
	SessionActive,
	#[error("transport failure: {0}")]
	Transport(#[from] io::Error),
	#[error("serial port: {0}")]
	Serial(#[from] serialport::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
