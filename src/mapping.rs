use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::{Error, Result, Strip, StripId};

/// Which hardware channel, if any, lights up for each strip.
///
/// Both directions are indexed so a channel can never end up with two owners.
#[derive(Debug, Default, Clone)]
pub struct LedMapping {
	channel_count: u16,
	by_strip:      HashMap<StripId, u16>,
	by_channel:    BTreeMap<u16, StripId>,
}

impl LedMapping {
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of channels the connected device reported, 0 when disconnected.
	pub fn channel_count(&self) -> u16 {
		self.channel_count
	}

	pub fn channel_of(&self, strip: StripId) -> Option<u16> {
		self.by_strip.get(&strip).copied()
	}

	pub fn owner_of(&self, channel: u16) -> Option<StripId> {
		self.by_channel.get(&channel).copied()
	}

	pub fn len(&self) -> usize {
		self.by_strip.len()
	}

	pub fn is_empty(&self) -> bool {
		self.by_strip.is_empty()
	}

	/// Throws away every mapping and hands channels `1..` out in display order.
	///
	/// Strips beyond `channel_count` stay unmapped.
	pub fn auto_assign(&mut self, strips: &[Strip], channel_count: u16) {
		self.by_strip.clear();
		self.by_channel.clear();
		self.channel_count = channel_count;

		for (strip, channel) in strips.iter().zip(1..=channel_count) {
			self.by_strip.insert(strip.id, channel);
			self.by_channel.insert(channel, strip.id);
		}

		debug!(
			mapped = self.by_strip.len(),
			unmapped = strips.len() - self.by_strip.len(),
			channel_count,
			"assigned channels"
		);
	}

	/// Maps `strip` to `channel`, taking the channel away from whoever had it.
	///
	/// `None` only unmaps `strip`.
	pub fn set_mapping(&mut self, strip: StripId, channel: Option<u16>) -> Result<()> {
		let Some(channel) = channel else {
			self.forget(strip);
			return Ok(());
		};

		if !(1..=self.channel_count).contains(&channel) {
			return Err(Error::ChannelOutOfRange {
				channel,
				channel_count: self.channel_count,
			});
		}

		if let Some(owner) = self.by_channel.remove(&channel) {
			debug!(%owner, channel, "evicting previous owner");
			self.by_strip.remove(&owner);
		}
		if let Some(previous) = self.by_strip.insert(strip, channel) {
			self.by_channel.remove(&previous);
		}
		self.by_channel.insert(channel, strip);

		Ok(())
	}

	/// Drops the mapping of `strip`, if it had one.
	pub fn forget(&mut self, strip: StripId) {
		if let Some(channel) = self.by_strip.remove(&strip) {
			self.by_channel.remove(&channel);
		}
	}

	pub fn clear(&mut self) {
		self.by_strip.clear();
		self.by_channel.clear();
		self.channel_count = 0;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::SequenceStore;

	fn strips(count: usize) -> SequenceStore {
		let mut store = SequenceStore::new();
		for i in 0..count {
			store.add_strip(format!("strip {}", i + 1));
		}
		store
	}

	fn assert_injective(mapping: &LedMapping) {
		assert_eq!(mapping.by_strip.len(), mapping.by_channel.len());
		for (strip, channel) in &mapping.by_strip {
			assert_eq!(mapping.owner_of(*channel), Some(*strip));
		}
	}

	#[test]
	fn auto_assign_stops_when_channels_run_out() {
		let store = strips(3);
		let [a, b, c] = [0, 1, 2].map(|i| store.strips()[i].id);

		let mut mapping = LedMapping::new();
		mapping.auto_assign(store.strips(), 2);

		assert_eq!(mapping.channel_of(a), Some(1));
		assert_eq!(mapping.channel_of(b), Some(2));
		assert_eq!(mapping.channel_of(c), None);
		assert_eq!(mapping.channel_count(), 2);
	}

	#[test]
	fn auto_assign_is_idempotent() {
		let store = strips(4);
		let mut mapping = LedMapping::new();

		mapping.auto_assign(store.strips(), 6);
		let first = mapping.by_strip.clone();
		mapping.auto_assign(store.strips(), 6);

		assert_eq!(mapping.by_strip, first);
		assert_injective(&mapping);
	}

	#[test]
	fn auto_assign_clears_manual_mappings() {
		let store = strips(2);
		let [a, b] = [0, 1].map(|i| store.strips()[i].id);
		let mut mapping = LedMapping::new();
		mapping.auto_assign(store.strips(), 8);
		mapping.set_mapping(a, Some(7)).unwrap();

		mapping.auto_assign(store.strips(), 8);
		assert_eq!(mapping.channel_of(a), Some(1));
		assert_eq!(mapping.channel_of(b), Some(2));
		assert_eq!(mapping.owner_of(7), None);
	}

	#[test]
	fn set_mapping_evicts_the_previous_owner() {
		let store = strips(2);
		let [a, b] = [0, 1].map(|i| store.strips()[i].id);
		let mut mapping = LedMapping::new();
		mapping.auto_assign(store.strips(), 4);

		mapping.set_mapping(b, Some(1)).unwrap();

		assert_eq!(mapping.channel_of(b), Some(1));
		assert_eq!(mapping.channel_of(a), None);
		assert_eq!(mapping.owner_of(2), None);
		assert_injective(&mapping);
	}

	#[test]
	fn set_mapping_rejects_channels_out_of_range() {
		let store = strips(1);
		let a = store.strips()[0].id;
		let mut mapping = LedMapping::new();
		mapping.auto_assign(store.strips(), 3);

		for channel in [0, 4] {
			assert!(matches!(
				mapping.set_mapping(a, Some(channel)),
				Err(Error::ChannelOutOfRange { channel_count: 3, .. })
			));
		}
		assert_eq!(mapping.channel_of(a), Some(1));
	}

	#[test]
	fn set_mapping_fails_while_no_device_reported_channels() {
		let store = strips(1);
		let mut mapping = LedMapping::new();
		assert!(mapping.set_mapping(store.strips()[0].id, Some(1)).is_err());
	}

	#[test]
	fn clearing_a_mapping_leaves_others_alone() {
		let store = strips(3);
		let ids: Vec<_> = store.strips().iter().map(|s| s.id).collect();
		let mut mapping = LedMapping::new();
		mapping.auto_assign(store.strips(), 3);

		mapping.set_mapping(ids[1], None).unwrap();

		assert_eq!(mapping.channel_of(ids[0]), Some(1));
		assert_eq!(mapping.channel_of(ids[1]), None);
		assert_eq!(mapping.channel_of(ids[2]), Some(3));
		assert_eq!(mapping.owner_of(2), None);
	}

	#[test]
	fn mapping_stays_injective_under_reassignment() {
		let store = strips(5);
		let ids: Vec<_> = store.strips().iter().map(|s| s.id).collect();
		let mut mapping = LedMapping::new();
		mapping.auto_assign(store.strips(), 4);

		let moves = [(4, 1), (0, 4), (2, 2), (1, 1), (3, 3), (4, 3), (2, 4)];
		for (strip, channel) in moves {
			mapping.set_mapping(ids[strip], Some(channel)).unwrap();
			assert_eq!(mapping.channel_of(ids[strip]), Some(channel));
			assert_injective(&mapping);
		}
	}
}
