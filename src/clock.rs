use std::time::{Duration, Instant};

use strip_sequencer_shared::{BEAT_COUNT, MAX_BPM, MIN_BPM, STEPS_PER_BEAT};
use tracing::{debug, info, warn};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
	Stopped,
	Playing,
	Paused,
}

/// Time between two steps: a quarter of a beat at `bpm`.
pub fn tick_interval(bpm: u32) -> Duration {
	Duration::from_nanos(60_000_000_000 / (u64::from(bpm.max(1)) * u64::from(STEPS_PER_BEAT)))
}

/// Beat cursor plus a single fixed-rate deadline.
///
/// There is exactly one pending deadline while playing and none otherwise;
/// restarting replaces it, so two schedules can never run side by side. The
/// clock never sleeps itself, the runner waits for [`next_deadline`](Self::next_deadline)
/// and then calls [`poll`](Self::poll).
#[derive(Debug, Clone)]
pub struct BeatClock {
	state:     ClockState,
	bpm:       u32,
	interval:  Duration,
	cursor:    usize,
	next_tick: Option<Instant>,
	ticks:     u64,
}

impl BeatClock {
	pub fn new(bpm: u32) -> Result<Self> {
		check_bpm(bpm)?;
		Ok(Self {
			state: ClockState::Stopped,
			bpm,
			interval: tick_interval(bpm),
			cursor: 0,
			next_tick: None,
			ticks: 0,
		})
	}

	pub fn state(&self) -> ClockState {
		self.state
	}

	pub fn bpm(&self) -> u32 {
		self.bpm
	}

	pub fn interval(&self) -> Duration {
		self.interval
	}

	/// Beat the next tick will read.
	pub fn cursor(&self) -> usize {
		self.cursor
	}

	pub fn next_deadline(&self) -> Option<Instant> {
		self.next_tick
	}

	/// Ticks fired since the clock was created.
	pub fn ticks(&self) -> u64 {
		self.ticks
	}

	/// Starts or resumes playback. Returns false if it was already playing.
	pub fn play(&mut self, now: Instant) -> bool {
		if self.state == ClockState::Playing {
			debug!("already playing");
			return false;
		}

		info!(bpm = self.bpm, cursor = self.cursor, "playing");
		self.state = ClockState::Playing;
		self.next_tick = Some(now + self.interval);
		true
	}

	pub fn pause(&mut self) -> bool {
		if self.state != ClockState::Playing {
			return false;
		}

		info!(cursor = self.cursor, "paused");
		self.state = ClockState::Paused;
		self.next_tick = None;
		true
	}

	pub fn resume(&mut self, now: Instant) -> bool {
		if self.state != ClockState::Paused {
			return false;
		}
		self.play(now)
	}

	/// Stops and rewinds to the first beat.
	pub fn stop(&mut self) {
		if self.state != ClockState::Stopped {
			info!("stopped");
		}
		self.state = ClockState::Stopped;
		self.next_tick = None;
		self.cursor = 0;
	}

	/// Changes the tempo. While playing, the next tick comes one new interval
	/// after `now`; the old phase is not kept.
	pub fn set_bpm(&mut self, bpm: u32, now: Instant) -> Result<()> {
		check_bpm(bpm)?;

		self.bpm = bpm;
		self.interval = tick_interval(bpm);
		if self.state == ClockState::Playing {
			self.next_tick = Some(now + self.interval);
		}

		debug!(bpm, interval = ?self.interval, "tempo changed");
		Ok(())
	}

	/// Fires the pending tick if it is due and returns the beat it reads.
	pub fn poll(&mut self, now: Instant) -> Option<usize> {
		let deadline = self.next_tick?;
		if now < deadline {
			return None;
		}

		let beat = self.cursor;
		self.cursor = (self.cursor + 1) % BEAT_COUNT;
		self.ticks += 1;

		let mut next = deadline + self.interval;
		if next < now {
			let behind = now - deadline;
			warn!(?behind, "clock fell behind, dropping missed ticks");
			next = now + self.interval;
		}
		self.next_tick = Some(next);

		Some(beat)
	}
}

fn check_bpm(bpm: u32) -> Result<()> {
	if !(MIN_BPM..=MAX_BPM).contains(&bpm) {
		return Err(Error::TempoOutOfRange {
			bpm,
			min: MIN_BPM,
			max: MAX_BPM,
		});
	}
	Ok(())
}
