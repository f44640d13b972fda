use std::{
	future,
	io,
	mem,
	sync::{Arc, Mutex, PoisonError},
};

use tokio::{
	io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf},
	sync::{
		mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender},
		Notify,
	},
	task::JoinHandle,
	time::{self, Instant},
};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use crate::{transport::READ_BUFFER_LEN, Command, DeviceConfig, Result, Sequencer, Transport};

/// Async counterpart of [`crate::runner::run`].
///
/// Meant for a current-thread runtime: the sequencer is only ever touched from
/// this future. `readable` is notified by transports whose reads happen in the
/// background, such as [`AsyncSerialTransport`]; the device is pumped right
/// away then. A pending handshake is also pumped on a short interval.
pub async fn run<T: Transport>(
	sequencer: &mut Sequencer<T>,
	mut commands: UnboundedReceiver<Command>,
	readable: &Notify,
) {
	info!("sequencer running");

	loop {
		let wakeup = sequencer.next_wakeup(Instant::now().into_std());
		let sleep = async {
			match wakeup {
				Some(at) => time::sleep_until(Instant::from_std(at)).await,
				None => future::pending().await,
			}
		};

		let mut device_output = false;
		tokio::select! {
			command = commands.recv() => match command {
				None | Some(Command::Shutdown) => break,
				Some(command) => {
					if let Err(e) = sequencer.handle(command, Instant::now().into_std()) {
						warn!("command rejected: {e}");
					}
				}
			},
			_ = readable.notified() => device_output = true,
			_ = sleep => {}
		}

		if device_output || sequencer.handshake_pending() {
			if let Err(e) = sequencer.pump_device() {
				warn!("device read failed: {e}");
			}
		}
		if let Err(e) = sequencer.on_wakeup(Instant::now().into_std()) {
			warn!("tick failed: {e}");
		}
	}

	if let Err(e) = sequencer.handle(Command::Shutdown, Instant::now().into_std()) {
		warn!("shutdown: {e}");
	}
	info!("sequencer stopped");
}

/// Opens [`AsyncSerialTransport`]s for one serial device.
///
/// Clones share the notifier that [`run`] waits on, so one link can serve as
/// the sequencer's opener while the runner holds another.
#[derive(Clone)]
pub struct SerialLink {
	config:   DeviceConfig,
	readable: Arc<Notify>,
	writers:  Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl SerialLink {
	pub fn new(config: DeviceConfig) -> Self {
		Self {
			config,
			readable: Arc::new(Notify::new()),
			writers: Arc::default(),
		}
	}

	/// Notified whenever an open transport has read something.
	pub fn readable(&self) -> &Notify {
		&self.readable
	}

	/// Opens the port and spawns its reader and writer tasks.
	///
	/// Has to be called from inside a tokio runtime.
	pub fn open(&self) -> Result<AsyncSerialTransport> {
		info!(port = %self.config.port, baud_rate = self.config.baud_rate, "opening serial device");

		let port = tokio_serial::new(self.config.port.as_str(), self.config.baud_rate)
			.timeout(self.config.read_timeout)
			.open_native_async()?;
		let (reader, writer) = tokio::io::split(port);

		let (incoming_tx, incoming) = mpsc::unbounded_channel();
		let (outgoing, outgoing_rx) = mpsc::unbounded_channel();

		let reader = tokio::spawn(read_device(reader, incoming_tx.clone(), self.readable.clone()));
		let writer = tokio::spawn(write_device(writer, outgoing_rx, incoming_tx, self.readable.clone()));

		let mut writers = self.writers.lock().unwrap_or_else(PoisonError::into_inner);
		writers.retain(|writer| !writer.is_finished());
		writers.push(writer);

		Ok(AsyncSerialTransport::from_channels(incoming, outgoing, reader))
	}

	/// Waits until every writer task has finished, so frames queued before a
	/// disconnect reach the device. Call it once [`run`] has returned.
	pub async fn flush(&self) {
		let writers = mem::take(&mut *self.writers.lock().unwrap_or_else(PoisonError::into_inner));
		for writer in writers {
			if let Err(e) = writer.await {
				warn!("serial writer task failed: {e}");
			}
		}
	}
}

/// What the background tasks report back to the transport.
#[derive(Debug)]
enum Incoming {
	Data(Vec<u8>),
	Closed,
	Failed(io::Error),
}

/// Serial transport whose reads and writes happen in spawned tasks.
///
/// [`Transport::read_chunk`] only drains what the reader task already
/// received and [`Transport::write`] only queues bytes, so neither ever blocks
/// the runtime.
pub struct AsyncSerialTransport {
	incoming: UnboundedReceiver<Incoming>,
	outgoing: Option<UnboundedSender<Vec<u8>>>,
	reader:   JoinHandle<()>,
	ended:    bool,
}

impl AsyncSerialTransport {
	fn from_channels(
		incoming: UnboundedReceiver<Incoming>,
		outgoing: UnboundedSender<Vec<u8>>,
		reader: JoinHandle<()>,
	) -> Self {
		Self {
			incoming,
			outgoing: Some(outgoing),
			reader,
			ended: false,
		}
	}
}

impl Transport for AsyncSerialTransport {
	fn read_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
		let mut chunk = Vec::new();
		while !self.ended {
			match self.incoming.try_recv() {
				Ok(Incoming::Data(data)) => chunk.extend_from_slice(&data),
				Ok(Incoming::Failed(e)) => return Err(e),
				Ok(Incoming::Closed) | Err(TryRecvError::Disconnected) => self.ended = true,
				Err(TryRecvError::Empty) => break,
			}
		}

		if self.ended && chunk.is_empty() {
			Ok(None)
		} else {
			Ok(Some(chunk))
		}
	}

	fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
		let Some(outgoing) = self.outgoing.as_ref() else {
			return Err(io::ErrorKind::NotConnected.into());
		};
		outgoing
			.send(bytes.to_vec())
			.map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "serial writer stopped"))
	}

	/// Stops reading right away; bytes already queued are still written.
	fn close(&mut self) {
		if self.outgoing.take().is_some() {
			debug!("serial device closed");
		}
		self.reader.abort();
		self.incoming.close();
		self.ended = true;
	}
}

impl Drop for AsyncSerialTransport {
	fn drop(&mut self) {
		self.reader.abort();
	}
}

async fn read_device(mut port: ReadHalf<SerialStream>, incoming: UnboundedSender<Incoming>, readable: Arc<Notify>) {
	let mut buffer = [0u8; READ_BUFFER_LEN];

	loop {
		let (event, last) = match port.read(&mut buffer).await {
			Ok(0) => (Incoming::Closed, true),
			Ok(n) => (Incoming::Data(buffer[..n].to_vec()), false),
			Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => continue,
			Err(e) => (Incoming::Failed(e), true),
		};

		if incoming.send(event).is_err() {
			break;
		}
		readable.notify_one();
		if last {
			break;
		}
	}
	debug!("serial reader stopped");
}

async fn write_device(
	mut port: WriteHalf<SerialStream>,
	mut outgoing: UnboundedReceiver<Vec<u8>>,
	incoming: UnboundedSender<Incoming>,
	readable: Arc<Notify>,
) {
	while let Some(bytes) = outgoing.recv().await {
		let written = match port.write_all(&bytes).await {
			Ok(()) => port.flush().await,
			Err(e) => Err(e),
		};

		if let Err(e) = written {
			warn!("serial write of {} bytes failed: {e}", bytes.len());
			if incoming.send(Incoming::Failed(e)).is_ok() {
				readable.notify_one();
			}
			break;
		}
	}
	debug!("serial writer stopped");
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use tokio::sync::mpsc;

	use super::*;
	use crate::{Config, Error, MemoryTransport, SessionState};

	fn sequencer(wire: &MemoryTransport) -> Sequencer<MemoryTransport> {
		let device = wire.clone();
		Sequencer::new(&Config::default(), move || Ok(device.clone())).unwrap()
	}

	#[tokio::test(start_paused = true)]
	async fn play_twice_runs_a_single_timer() {
		let wire = MemoryTransport::new();
		let mut sequencer = sequencer(&wire);
		let (tx, rx) = mpsc::unbounded_channel();

		tx.send(Command::Play).unwrap();
		tx.send(Command::Play).unwrap();
		let driver = async move {
			time::sleep(Duration::from_millis(1010)).await;
			tx.send(Command::Shutdown).unwrap();
		};

		let notify = Notify::new();
		tokio::join!(run(&mut sequencer, rx, &notify), driver);

		assert_eq!(sequencer.clock().ticks(), 8);
	}

	#[tokio::test(start_paused = true)]
	async fn plays_a_pattern_on_the_device() {
		let wire = MemoryTransport::new();
		wire.feed("READY\n");
		wire.feed("LEDCOUNT2\n");
		let mut sequencer = sequencer(&wire);
		let (tx, rx) = mpsc::unbounded_channel();

		for command in [
			Command::AddStrip { name: "left".into() },
			Command::AddStrip { name: "right".into() },
			Command::Toggle { strip: 0, beat: 0 },
			Command::Toggle { strip: 1, beat: 1 },
			Command::Connect,
		] {
			tx.send(command).unwrap();
		}
		let driver = async move {
			time::sleep(Duration::from_millis(100)).await;
			tx.send(Command::Play).unwrap();
			// three ticks: beats 0, 1 and 2
			time::sleep(Duration::from_millis(400)).await;
			tx.send(Command::Shutdown).unwrap();
		};

		let notify = Notify::new();
		tokio::join!(run(&mut sequencer, rx, &notify), driver);

		assert_eq!(wire.written(), [
			"HELLO\n",
			"LED1ON,LED2OFF,STOP\n",
			"LED1OFF,LED2ON,STOP\n",
			"LED1OFF,LED2OFF,STOP\n",
		]);
	}

	#[tokio::test]
	async fn reads_drain_everything_received_then_end() {
		let (device, incoming) = mpsc::unbounded_channel();
		let (outgoing, mut written) = mpsc::unbounded_channel();
		let mut transport = AsyncSerialTransport::from_channels(incoming, outgoing, tokio::spawn(future::pending()));

		assert_eq!(transport.read_chunk().unwrap(), Some(Vec::new()));

		device.send(Incoming::Data(b"REA".to_vec())).unwrap();
		device.send(Incoming::Data(b"DY\n".to_vec())).unwrap();
		device.send(Incoming::Closed).unwrap();
		assert_eq!(transport.read_chunk().unwrap(), Some(b"READY\n".to_vec()));
		assert_eq!(transport.read_chunk().unwrap(), None);

		transport.write(b"HELLO\n").unwrap();
		transport.close();
		assert!(transport.write(b"STOP\n").is_err());
		assert_eq!(written.recv().await, Some(b"HELLO\n".to_vec()));
		assert_eq!(written.recv().await, None);
	}

	#[tokio::test]
	async fn failed_background_write_surfaces_on_the_next_read() {
		let (device, incoming) = mpsc::unbounded_channel();
		let (outgoing, _written) = mpsc::unbounded_channel();
		let mut transport = AsyncSerialTransport::from_channels(incoming, outgoing, tokio::spawn(future::pending()));

		device
			.send(Incoming::Failed(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")))
			.unwrap();
		assert_eq!(transport.read_chunk().unwrap_err().kind(), io::ErrorKind::BrokenPipe);
	}

	#[tokio::test(start_paused = true)]
	async fn device_output_wakes_the_runner() {
		let readable = Arc::new(Notify::new());
		let (device, incoming) = mpsc::unbounded_channel();
		let (outgoing, mut written) = mpsc::unbounded_channel();

		let mut channels = Some((incoming, outgoing));
		let mut sequencer = Sequencer::new(&Config::default(), move || {
			let (incoming, outgoing) = channels.take().ok_or(Error::NotConnected)?;
			Ok(AsyncSerialTransport::from_channels(incoming, outgoing, tokio::spawn(future::pending())))
		})
		.unwrap();
		let (tx, rx) = mpsc::unbounded_channel();

		for command in [
			Command::AddStrip { name: "solo".into() },
			Command::Toggle { strip: 0, beat: 0 },
			Command::Toggle { strip: 0, beat: 4 },
			Command::Connect,
		] {
			tx.send(command).unwrap();
		}
		let notifier = readable.clone();
		let driver = async move {
			time::sleep(Duration::from_millis(5)).await;
			device.send(Incoming::Data(b"READY\r\n".to_vec())).unwrap();
			notifier.notify_one();
			time::sleep(Duration::from_millis(5)).await;
			device.send(Incoming::Data(b"LEDCOUNT1\r\n".to_vec())).unwrap();
			notifier.notify_one();

			time::sleep(Duration::from_millis(10)).await;
			tx.send(Command::Play).unwrap();
			// ticks at 145 ms and 270 ms, then the device goes away before beat 4
			time::sleep(Duration::from_millis(280)).await;
			device.send(Incoming::Closed).unwrap();
			notifier.notify_one();

			time::sleep(Duration::from_millis(700)).await;
			tx.send(Command::Shutdown).unwrap();
		};

		tokio::join!(run(&mut sequencer, rx, &readable), driver);

		let mut frames = Vec::new();
		while let Some(bytes) = written.recv().await {
			frames.push(String::from_utf8(bytes).unwrap());
		}
		assert_eq!(frames, ["HELLO\n", "LED1ON,STOP\n", "LED1OFF,STOP\n"]);
		assert_eq!(sequencer.session().state(), &SessionState::Disconnected);
		assert_eq!(sequencer.clock().ticks(), 7);
	}
}
