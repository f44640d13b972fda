use std::{
	collections::VecDeque,
	io,
	io::{Read, Write},
	sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serialport::{SerialPort, SerialPortType};
use tracing::{debug, info, warn};

use crate::{DeviceConfig, Result};

pub(crate) const READ_BUFFER_LEN: usize = 256;

/// Byte stream to the LED controller.
pub trait Transport {
	/// Reads whatever arrived since the last call.
	///
	/// `Ok(None)` means the stream ended. An empty chunk means nothing arrived
	/// before the read timeout.
	fn read_chunk(&mut self) -> io::Result<Option<Vec<u8>>>;

	fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

	/// Releases the underlying device. Reads after this report end of stream.
	fn close(&mut self);
}

pub struct SerialTransport {
	port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
	pub fn open(config: &DeviceConfig) -> Result<Self> {
		info!(port = %config.port, baud_rate = config.baud_rate, "opening serial device");

		let port = serialport::new(&config.port, config.baud_rate)
			.timeout(config.read_timeout)
			.open()?;

		Ok(Self { port: Some(port) })
	}

	/// Lists serial devices, USB ones first since that is where controllers usually show up.
	pub fn available_ports() -> Result<Vec<String>> {
		let mut ports = serialport::available_ports()?;
		ports.sort_by_key(|p| !matches!(p.port_type, SerialPortType::UsbPort(_)));
		Ok(ports.into_iter().map(|p| p.port_name).collect())
	}
}

impl Transport for SerialTransport {
	fn read_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
		let Some(port) = self.port.as_mut() else {
			return Ok(None);
		};

		let mut buffer = [0u8; READ_BUFFER_LEN];
		match port.read(&mut buffer) {
			Ok(0) => Ok(None),
			Ok(n) => Ok(Some(buffer[..n].to_vec())),
			Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Some(Vec::new())),
			Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Some(Vec::new())),
			Err(e) => Err(e),
		}
	}

	fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
		let Some(port) = self.port.as_mut() else {
			return Err(io::ErrorKind::NotConnected.into());
		};

		match port.write_all(bytes) {
			Err(ref e) if e.kind() == io::ErrorKind::TimedOut => {
				warn!("serial timeout while writing {} bytes", bytes.len());
				Err(io::ErrorKind::TimedOut.into())
			}
			result => result.and_then(|_| port.flush()),
		}
	}

	fn close(&mut self) {
		if self.port.take().is_some() {
			debug!("serial device closed");
		}
	}
}

#[derive(Debug, Default)]
struct Wire {
	incoming:    VecDeque<Vec<u8>>,
	written:     Vec<String>,
	hung_up:     bool,
	closed:      bool,
	fail_writes: bool,
}

/// In-memory stand-in for a controller.
///
/// Clones share the same wire, so a test keeps one handle to feed device
/// output and inspect what the session wrote while the session owns another.
#[derive(Debug, Default, Clone)]
pub struct MemoryTransport {
	wire: Arc<Mutex<Wire>>,
}

impl MemoryTransport {
	pub fn new() -> Self {
		Self::default()
	}

	/// Another handle on the same wire with the closed flag cleared, like
	/// opening the port again after it was closed.
	pub fn reopen(&self) -> Self {
		self.wire().closed = false;
		self.clone()
	}

	/// Queues a chunk for the session to read.
	pub fn feed(&self, chunk: impl AsRef<[u8]>) {
		self.wire().incoming.push_back(chunk.as_ref().to_vec());
	}

	/// Ends the stream once the queued chunks have been read.
	pub fn hang_up(&self) {
		self.wire().hung_up = true;
	}

	pub fn fail_writes(&self, fail: bool) {
		self.wire().fail_writes = fail;
	}

	pub fn is_closed(&self) -> bool {
		self.wire().closed
	}

	/// Everything written so far, one entry per write.
	pub fn written(&self) -> Vec<String> {
		self.wire().written.clone()
	}

	pub fn take_written(&self) -> Vec<String> {
		std::mem::take(&mut self.wire().written)
	}

	fn wire(&self) -> MutexGuard<'_, Wire> {
		self.wire.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

impl Transport for MemoryTransport {
	fn read_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
		let mut wire = self.wire();
		if wire.closed {
			return Ok(None);
		}
		match wire.incoming.pop_front() {
			Some(chunk) => Ok(Some(chunk)),
			None if wire.hung_up => Ok(None),
			None => Ok(Some(Vec::new())),
		}
	}

	fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
		let mut wire = self.wire();
		if wire.closed {
			return Err(io::ErrorKind::NotConnected.into());
		}
		if wire.fail_writes {
			return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
		}
		wire.written.push(String::from_utf8_lossy(bytes).into_owned());
		Ok(())
	}

	fn close(&mut self) {
		self.wire().closed = true;
	}
}
