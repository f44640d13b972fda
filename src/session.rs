use std::fmt;

use strip_sequencer_shared::{HELLO_MESSAGE, READY_MARKER};
use tracing::{debug, info, warn};

use crate::{parse_led_count, Error, ProtocolError, Result, StreamAssembler, Transport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
	Disconnected,
	Opening,
	AwaitingReady,
	Handshaking,
	AwaitingAck,
	Connected { channel_count: u16 },
	Faulted { reason: String },
}

impl SessionState {
	/// True while the session waits for the device to say something.
	pub fn is_handshaking(&self) -> bool {
		matches!(self, Self::AwaitingReady | Self::AwaitingAck)
	}
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Disconnected => f.write_str("disconnected"),
			Self::Opening => f.write_str("opening"),
			Self::AwaitingReady => f.write_str("awaiting ready"),
			Self::Handshaking => f.write_str("handshaking"),
			Self::AwaitingAck => f.write_str("awaiting ack"),
			Self::Connected { channel_count } => write!(f, "connected ({channel_count} channels)"),
			Self::Faulted { reason } => write!(f, "faulted: {reason}"),
		}
	}
}

/// The one connection to the LED controller.
///
/// Handshake: wait for `READY` anywhere in the device output, send `HELLO`,
/// then read one line carrying `LEDCOUNT<n>`. Any failure on the way faults the
/// session and drops the transport; only an explicit [`connect`](Self::connect)
/// starts over.
pub struct DeviceSession<T> {
	state:     SessionState,
	transport: Option<T>,
	assembler: StreamAssembler,
}

impl<T> Default for DeviceSession<T> {
	fn default() -> Self {
		Self {
			state:     SessionState::Disconnected,
			transport: None,
			assembler: StreamAssembler::new(),
		}
	}
}

impl<T: Transport> DeviceSession<T> {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn state(&self) -> &SessionState {
		&self.state
	}

	pub fn is_connected(&self) -> bool {
		matches!(self.state, SessionState::Connected { .. })
	}

	pub fn channel_count(&self) -> Option<u16> {
		match self.state {
			SessionState::Connected { channel_count } => Some(channel_count),
			_ => None,
		}
	}

	/// Opens the transport with `open` and starts waiting for the ready marker.
	///
	/// Allowed when disconnected or after a fault.
	pub fn connect<F>(&mut self, open: F) -> Result<()>
	where
		F: FnOnce() -> Result<T>,
	{
		if !matches!(self.state, SessionState::Disconnected | SessionState::Faulted { .. }) {
			return Err(Error::SessionActive);
		}

		self.set_state(SessionState::Opening);
		self.assembler = StreamAssembler::new();

		match open() {
			Ok(transport) => {
				self.transport = Some(transport);
				self.set_state(SessionState::AwaitingReady);
				Ok(())
			}
			Err(e) => {
				self.fault(e.to_string());
				Err(e)
			}
		}
	}

	/// Performs one read while the handshake is pending or the device is connected.
	///
	/// Returns the channel count once the device acknowledged. Output read
	/// after that is only logged, but a closed stream still faults the session.
	pub fn pump(&mut self) -> Result<Option<u16>> {
		if !(self.state.is_handshaking() || self.is_connected()) {
			return Ok(None);
		}
		let Some(transport) = self.transport.as_mut() else {
			return Ok(None);
		};

		match transport.read_chunk() {
			Ok(Some(chunk)) if chunk.is_empty() => Ok(None),
			Ok(Some(chunk)) => self.receive(&chunk),
			Ok(None) => self.end_of_stream().map(|_| None),
			Err(e) => {
				self.fault(format!("read failed: {e}"));
				Err(e.into())
			}
		}
	}

	/// Feeds device output into the handshake.
	pub fn receive(&mut self, chunk: &[u8]) -> Result<Option<u16>> {
		if !self.state.is_handshaking() {
			debug!(rx = %String::from_utf8_lossy(chunk), "ignoring device output");
			return Ok(None);
		}
		self.assembler.push(chunk);

		if self.state == SessionState::AwaitingReady {
			if !self.assembler.take_marker(READY_MARKER) {
				return Ok(None);
			}
			info!(rx = READY_MARKER, "device ready");

			self.set_state(SessionState::Handshaking);
			self.write(HELLO_MESSAGE)?;
			info!(tx = HELLO_MESSAGE.trim_end(), "sent handshake");
			self.set_state(SessionState::AwaitingAck);
		}

		// the ready marker is usually followed by a bare line ending
		while let Some(line) = self.assembler.take_line() {
			if line.is_empty() {
				continue;
			}
			info!(rx = %line, "handshake ack");

			return match parse_led_count(&line) {
				Some(channel_count) => {
					self.set_state(SessionState::Connected { channel_count });
					Ok(Some(channel_count))
				}
				None => {
					let error = ProtocolError::InvalidAck(line);
					self.fault(error.to_string());
					Err(error.into())
				}
			};
		}

		Ok(None)
	}

	/// The transport reported end of data.
	pub fn end_of_stream(&mut self) -> Result<()> {
		match self.state {
			SessionState::Disconnected | SessionState::Faulted { .. } => Ok(()),
			_ => {
				let error = ProtocolError::StreamClosed;
				self.fault(error.to_string());
				Err(error.into())
			}
		}
	}

	/// Writes a frame. Only allowed once connected.
	pub fn transmit(&mut self, frame: &str) -> Result<()> {
		if !self.is_connected() {
			return Err(Error::NotConnected);
		}
		self.write(frame)?;
		debug!(tx = frame.trim_end(), "frame sent");
		Ok(())
	}

	/// Passes an operator command through to the device, newline terminated.
	pub fn forward_raw(&mut self, text: &str) -> Result<()> {
		if !self.is_connected() {
			return Err(Error::NotConnected);
		}
		self.write(&format!("{text}\n"))?;
		info!(tx = text, "forwarded command");
		Ok(())
	}

	/// Closes the transport from any state.
	pub fn disconnect(&mut self) {
		if let Some(mut transport) = self.transport.take() {
			transport.close();
		}
		self.assembler.clear();
		self.set_state(SessionState::Disconnected);
	}

	fn write(&mut self, text: &str) -> Result<()> {
		let Some(transport) = self.transport.as_mut() else {
			return Err(Error::NotConnected);
		};

		if let Err(e) = transport.write(text.as_bytes()) {
			self.fault(format!("write failed: {e}"));
			return Err(e.into());
		}
		Ok(())
	}

	fn fault(&mut self, reason: String) {
		warn!(state = %self.state, %reason, "device session faulted");
		if let Some(mut transport) = self.transport.take() {
			transport.close();
		}
		self.assembler.clear();
		self.state = SessionState::Faulted { reason };
	}

	fn set_state(&mut self, state: SessionState) {
		debug!(from = %self.state, to = %state, "device session");
		self.state = state;
	}
}
