use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::{
	active_channels,
	encode_frame,
	BeatClock,
	ChannelSet,
	ClockState,
	Config,
	DeviceSession,
	DiffGate,
	Error,
	LedMapping,
	Result,
	SequenceStore,
	SessionState,
	StripId,
	Transport,
};

/// How often a pending handshake is pumped for device output.
pub const HANDSHAKE_POLL: Duration = Duration::from_millis(10);

/// Operator input, sent by whatever front end sits on top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
	Play,
	Pause,
	Resume,
	Stop,
	SetBpm(u32),
	Toggle { strip: usize, beat: usize },
	AddStrip { name: String },
	RemoveStrip(usize),
	DuplicateStrip(usize),
	Reorder { from: usize, to: usize },
	Rename { index: usize, name: String },
	SetMapping { strip: StripId, channel: Option<u16> },
	/// Light a single strip on the device, or nothing with `None`.
	Preview(Option<StripId>),
	Connect,
	Disconnect,
	/// Raw line for the device, e.g. typed into a serial monitor.
	Forward(String),
	Shutdown,
}

type Opener<T> = Box<dyn FnMut() -> Result<T>>;

/// Everything needed to play a pattern and keep the device in sync with it.
pub struct Sequencer<T> {
	store:   SequenceStore,
	mapping: LedMapping,
	gate:    DiffGate,
	clock:   BeatClock,
	session: DeviceSession<T>,
	open:    Opener<T>,
}

impl<T: Transport> Sequencer<T> {
	/// `open` is called on every [`Command::Connect`] to get a fresh transport.
	pub fn new<F>(config: &Config, open: F) -> Result<Self>
	where
		F: FnMut() -> Result<T> + 'static,
	{
		Ok(Self {
			store:   SequenceStore::new(),
			mapping: LedMapping::new(),
			gate:    DiffGate::new(),
			clock:   BeatClock::new(config.bpm)?,
			session: DeviceSession::new(),
			open:    Box::new(open),
		})
	}

	pub fn store(&self) -> &SequenceStore {
		&self.store
	}

	pub fn mapping(&self) -> &LedMapping {
		&self.mapping
	}

	pub fn gate(&self) -> &DiffGate {
		&self.gate
	}

	pub fn clock(&self) -> &BeatClock {
		&self.clock
	}

	pub fn session(&self) -> &DeviceSession<T> {
		&self.session
	}

	pub fn handle(&mut self, command: Command, now: Instant) -> Result<()> {
		debug!(?command, "handling command");

		match command {
			Command::Play => self.play(now),
			Command::Pause => self.pause(),
			Command::Resume => self.resume(now),
			Command::Stop => return self.stop(),
			Command::SetBpm(bpm) => return self.set_bpm(bpm, now),
			Command::Toggle { strip, beat } => return self.toggle(strip, beat).map(|_| ()),
			Command::AddStrip { name } => {
				self.add_strip(name);
			}
			Command::RemoveStrip(index) => return self.remove_strip(index).map(|_| ()),
			Command::DuplicateStrip(index) => return self.duplicate_strip(index).map(|_| ()),
			Command::Reorder { from, to } => return self.reorder(from, to),
			Command::Rename { index, name } => return self.rename(index, name),
			Command::SetMapping { strip, channel } => return self.set_mapping(strip, channel),
			Command::Preview(strip) => return self.preview(strip).map(|_| ()),
			Command::Connect => return self.connect(),
			Command::Disconnect => self.disconnect(),
			Command::Forward(text) => return self.forward_raw(&text),
			Command::Shutdown => {
				let stopped = self.stop();
				self.disconnect();
				return stopped;
			}
		}

		Ok(())
	}

	pub fn play(&mut self, now: Instant) {
		self.clock.play(now);
	}

	pub fn pause(&mut self) {
		self.clock.pause();
	}

	pub fn resume(&mut self, now: Instant) {
		self.clock.resume(now);
	}

	/// Stops playback and tells a connected device to go dark.
	pub fn stop(&mut self) -> Result<()> {
		self.clock.stop();
		self.send(ChannelSet::new())
	}

	pub fn set_bpm(&mut self, bpm: u32, now: Instant) -> Result<()> {
		self.clock.set_bpm(bpm, now)
	}

	pub fn toggle(&mut self, strip: usize, beat: usize) -> Result<bool> {
		self.store.toggle(strip, beat)
	}

	pub fn add_strip(&mut self, name: impl Into<String>) -> StripId {
		self.store.add_strip(name)
	}

	pub fn remove_strip(&mut self, index: usize) -> Result<StripId> {
		let strip = self.store.remove_strip(index)?;
		self.mapping.forget(strip.id);
		Ok(strip.id)
	}

	/// Clones a strip with its beats. The clone starts unmapped.
	pub fn duplicate_strip(&mut self, index: usize) -> Result<StripId> {
		self.store.duplicate_strip(index)
	}

	pub fn reorder(&mut self, from: usize, to: usize) -> Result<()> {
		self.store.reorder(from, to)
	}

	pub fn rename(&mut self, index: usize, name: impl Into<String>) -> Result<()> {
		self.store.rename(index, name)
	}

	pub fn set_mapping(&mut self, strip: StripId, channel: Option<u16>) -> Result<()> {
		if self.store.index_of(strip).is_none() {
			return Err(Error::UnknownStrip(strip));
		}
		self.mapping.set_mapping(strip, channel)
	}

	/// Lights only `strip` on the device, or nothing.
	///
	/// A strip without a channel leaves the device alone. Previews bypass the
	/// change check and leave the playback cache invalid, so the next tick
	/// always repaints the device. Ignored while playing.
	pub fn preview(&mut self, strip: Option<StripId>) -> Result<bool> {
		if self.clock.state() == ClockState::Playing || !self.session.is_connected() {
			return Ok(false);
		}

		let active = match strip {
			Some(id) => match self.mapping.channel_of(id) {
				Some(channel) => ChannelSet::from([channel]),
				None => {
					debug!(strip = %id, "not previewing an unmapped strip");
					return Ok(false);
				}
			},
			None => ChannelSet::new(),
		};
		let channel_count = self.mapping.channel_count();

		let result = self.session.transmit(&encode_frame(&active, channel_count));
		self.gate.invalidate();
		self.settle_session();
		result.map(|_| true)
	}

	pub fn connect(&mut self) -> Result<()> {
		let open = &mut self.open;
		let result = self.session.connect(|| open());
		self.settle_session();
		result
	}

	/// Reads from the device once. Drives a pending handshake and notices a
	/// connected device going away.
	pub fn pump_device(&mut self) -> Result<()> {
		let result = self.session.pump();
		self.handshake_step(result)
	}

	/// Feeds device output that was read elsewhere.
	pub fn receive(&mut self, chunk: &[u8]) -> Result<()> {
		let result = self.session.receive(chunk);
		self.handshake_step(result)
	}

	pub fn disconnect(&mut self) {
		if self.session.state() != &SessionState::Disconnected {
			info!("disconnecting device");
		}
		self.session.disconnect();
		self.gate.reset();
		self.mapping.clear();
	}

	pub fn forward_raw(&mut self, text: &str) -> Result<()> {
		let result = self.session.forward_raw(text);
		self.settle_session();
		result
	}

	pub fn handshake_pending(&self) -> bool {
		self.session.state().is_handshaking()
	}

	/// When the runner has to call [`on_wakeup`](Self::on_wakeup) next.
	pub fn next_wakeup(&self, now: Instant) -> Option<Instant> {
		let poll = self.handshake_pending().then(|| now + HANDSHAKE_POLL);
		match (self.clock.next_deadline(), poll) {
			(Some(tick), Some(poll)) => Some(tick.min(poll)),
			(tick, poll) => tick.or(poll),
		}
	}

	/// Fires every tick that is due by `now`.
	pub fn on_wakeup(&mut self, now: Instant) -> Result<()> {
		while let Some(beat) = self.clock.poll(now) {
			self.tick(beat)?;
		}
		Ok(())
	}

	fn tick(&mut self, beat: usize) -> Result<()> {
		let column = self.store.read_column(beat)?;
		let active = active_channels(column, self.store.strips(), &self.mapping);
		self.send(active)
	}

	fn send(&mut self, active: ChannelSet) -> Result<()> {
		if !self.session.is_connected() {
			return Ok(());
		}

		let result = self.gate.submit(active, &mut self.session);
		self.settle_session();
		result.map(|_| ())
	}

	fn handshake_step(&mut self, result: Result<Option<u16>>) -> Result<()> {
		if let Ok(Some(channel_count)) = result {
			info!(channel_count, "device connected");
			self.gate.reset();
			self.mapping.auto_assign(self.store.strips(), channel_count);
		}
		self.settle_session();
		result.map(|_| ())
	}

	/// Drops device state once the session faulted.
	fn settle_session(&mut self) {
		if let SessionState::Faulted { reason } = self.session.state() {
			if !self.mapping.is_empty() || self.gate.last_sent().is_some() {
				warn!(%reason, "dropping device state after fault");
			}
			self.gate.reset();
			self.mapping.clear();
		}
	}
}
