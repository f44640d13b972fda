use std::collections::BTreeSet;

use strip_sequencer_shared::{CHANNEL_OFF, CHANNEL_ON, CHANNEL_PREFIX, FRAME_TERMINATOR, TOKEN_SEPARATOR};
use tracing::trace;

use crate::{DeviceSession, LedMapping, Result, Strip, Transport};

/// Lit channels, ascending.
pub type ChannelSet = BTreeSet<u16>;

/// Channels of the mapped strips that are on in `column`.
pub fn active_channels(
	column: impl IntoIterator<Item = (usize, bool)>,
	strips: &[Strip],
	mapping: &LedMapping,
) -> ChannelSet {
	column
		.into_iter()
		.filter(|(_, active)| *active)
		.filter_map(|(index, _)| strips.get(index))
		.filter_map(|strip| mapping.channel_of(strip.id))
		.collect()
}

/// Encodes every channel from 1 to `channel_count`, not just the changes.
///
/// The controller keeps no state between frames, so a lost frame is repaired
/// by the next one.
pub fn encode_frame(active: &ChannelSet, channel_count: u16) -> String {
	let mut frame = String::with_capacity(usize::from(channel_count) * 9 + FRAME_TERMINATOR.len());

	for channel in 1..=channel_count {
		let state = if active.contains(&channel) { CHANNEL_ON } else { CHANNEL_OFF };
		frame.push_str(CHANNEL_PREFIX);
		frame.push_str(&channel.to_string());
		frame.push_str(state);
		frame.push(TOKEN_SEPARATOR);
	}
	frame.push_str(FRAME_TERMINATOR);

	frame
}

/// Only lets a frame through when the lit channels differ from the last one sent.
#[derive(Debug, Default, Clone)]
pub struct DiffGate {
	last_sent: Option<ChannelSet>,
}

impl DiffGate {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn last_sent(&self) -> Option<&ChannelSet> {
		self.last_sent.as_ref()
	}

	/// Sends `active` if it changed. Returns whether a frame went out.
	///
	/// The cache is only updated once the write succeeded.
	pub fn submit<T: Transport>(&mut self, active: ChannelSet, session: &mut DeviceSession<T>) -> Result<bool> {
		if self.last_sent.as_ref() == Some(&active) {
			trace!(?active, "frame unchanged");
			return Ok(false);
		}

		let channel_count = session.channel_count().unwrap_or(0);
		session.transmit(&encode_frame(&active, channel_count))?;
		self.last_sent = Some(active);

		Ok(true)
	}

	/// Forgets the last frame after the device went away.
	pub fn reset(&mut self) {
		self.last_sent = None;
	}

	/// Marks the device contents as unknown, e.g. after something bypassed
	/// the gate. The next submit transmits whatever it carries.
	pub fn invalidate(&mut self) {
		if self.last_sent.take().is_some() {
			trace!("frame cache invalidated");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{MemoryTransport, SequenceStore, SessionState};

	fn connected(channel_count: u16) -> (DeviceSession<MemoryTransport>, MemoryTransport) {
		let wire = MemoryTransport::new();
		let mut session = DeviceSession::new();
		session.connect(|| Ok(wire.clone())).unwrap();
		session.receive(format!("READY\nLEDCOUNT{channel_count}\n").as_bytes()).unwrap();
		assert_eq!(session.state(), &SessionState::Connected { channel_count });
		wire.take_written();
		(session, wire)
	}

	#[test]
	fn encodes_the_full_channel_range() {
		let active = ChannelSet::from([1, 3]);
		assert_eq!(encode_frame(&active, 4), "LED1ON,LED2OFF,LED3ON,LED4OFF,STOP\n");
		assert_eq!(encode_frame(&ChannelSet::new(), 2), "LED1OFF,LED2OFF,STOP\n");
		assert_eq!(encode_frame(&ChannelSet::new(), 0), "STOP\n");
	}

	#[test]
	fn active_channels_skip_unmapped_strips() {
		let mut store = SequenceStore::new();
		for name in ["a", "b", "c"] {
			store.add_strip(name);
		}
		let mut mapping = LedMapping::new();
		mapping.auto_assign(store.strips(), 2);
		mapping.set_mapping(store.strips()[0].id, Some(2)).unwrap();

		for strip in 0..3 {
			store.toggle(strip, 0).unwrap();
		}
		store.toggle(1, 0).unwrap();

		// a -> 2 (on), b -> unmapped after eviction (off), c -> unmapped (on)
		let active = active_channels(store.read_column(0).unwrap(), store.strips(), &mapping);
		assert_eq!(active, ChannelSet::from([2]));
	}

	#[test]
	fn gate_sends_only_on_change() {
		let (mut session, wire) = connected(3);
		let mut gate = DiffGate::new();

		assert!(gate.submit(ChannelSet::new(), &mut session).unwrap());
		assert_eq!(wire.take_written(), ["LED1OFF,LED2OFF,LED3OFF,STOP\n"]);

		assert!(!gate.submit(ChannelSet::new(), &mut session).unwrap());
		assert!(wire.take_written().is_empty());

		assert!(gate.submit(ChannelSet::from([2]), &mut session).unwrap());
		assert_eq!(wire.take_written(), ["LED1OFF,LED2ON,LED3OFF,STOP\n"]);
		assert_eq!(gate.last_sent(), Some(&ChannelSet::from([2])));
	}

	#[test]
	fn invalidate_forces_the_next_frame() {
		let (mut session, wire) = connected(1);
		let mut gate = DiffGate::new();

		gate.submit(ChannelSet::from([1]), &mut session).unwrap();
		gate.invalidate();
		assert_eq!(gate.last_sent(), None);
		assert!(gate.submit(ChannelSet::from([1]), &mut session).unwrap());
		assert_eq!(wire.take_written(), ["LED1ON,STOP\n", "LED1ON,STOP\n"]);

		gate.reset();
		assert!(gate.submit(ChannelSet::from([1]), &mut session).unwrap());
	}

	#[test]
	fn failed_write_keeps_the_cache() {
		let (mut session, wire) = connected(2);
		let mut gate = DiffGate::new();
		gate.submit(ChannelSet::from([1]), &mut session).unwrap();

		wire.fail_writes(true);
		assert!(gate.submit(ChannelSet::from([2]), &mut session).is_err());
		assert_eq!(gate.last_sent(), Some(&ChannelSet::from([1])));
		assert!(matches!(session.state(), SessionState::Faulted { .. }));
	}

	#[test]
	fn nothing_is_cached_while_disconnected() {
		let mut session = DeviceSession::<MemoryTransport>::new();
		let mut gate = DiffGate::new();

		assert!(gate.submit(ChannelSet::new(), &mut session).is_err());
		assert_eq!(gate.last_sent(), None);
	}
}
