use std::fmt;

use strip_sequencer_shared::BEAT_COUNT;

use crate::{Error, Result};

pub type Row = [bool; BEAT_COUNT];

/// Stable strip identity, independent of where the strip sits in the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StripId(u64);

impl fmt::Display for StripId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strip {
	pub id:   StripId,
	pub name: String,
}

/// Strips in display order, each with its row of beats.
///
/// Row `i` always belongs to strip `i`; every mutation moves both together.
#[derive(Debug, Default, Clone)]
pub struct SequenceStore {
	strips:  Vec<Strip>,
	rows:    Vec<Row>,
	next_id: u64,
}

impl SequenceStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.strips.len()
	}

	pub fn is_empty(&self) -> bool {
		self.strips.is_empty()
	}

	pub fn strips(&self) -> &[Strip] {
		&self.strips
	}

	pub fn row(&self, index: usize) -> Result<&Row> {
		self.check_strip(index)?;
		Ok(&self.rows[index])
	}

	pub fn index_of(&self, id: StripId) -> Option<usize> {
		self.strips.iter().position(|strip| strip.id == id)
	}

	/// Flips one cell and returns its new value.
	pub fn toggle(&mut self, strip_index: usize, beat_index: usize) -> Result<bool> {
		self.check_strip(strip_index)?;
		check_beat(beat_index)?;

		let cell = &mut self.rows[strip_index][beat_index];
		*cell = !*cell;
		Ok(*cell)
	}

	/// Appends a strip with an empty row.
	pub fn add_strip(&mut self, name: impl Into<String>) -> StripId {
		self.push(name.into(), [false; BEAT_COUNT])
	}

	pub fn remove_strip(&mut self, index: usize) -> Result<Strip> {
		self.check_strip(index)?;
		self.rows.remove(index);
		Ok(self.strips.remove(index))
	}

	/// Appends a copy of strip `index` and its beats under a fresh id.
	pub fn duplicate_strip(&mut self, index: usize) -> Result<StripId> {
		self.check_strip(index)?;
		let name = format!("{} (clone)", self.strips[index].name);
		let row = self.rows[index];
		Ok(self.push(name, row))
	}

	/// Moves a strip and its row from `old_index` to `new_index`.
	///
	/// `new_index` is the position in the list after the strip was taken out,
	/// which is what a drag-and-drop list reports.
	pub fn reorder(&mut self, old_index: usize, new_index: usize) -> Result<()> {
		self.check_strip(old_index)?;
		self.check_strip(new_index)?;

		let strip = self.strips.remove(old_index);
		let row = self.rows.remove(old_index);
		self.strips.insert(new_index, strip);
		self.rows.insert(new_index, row);
		Ok(())
	}

	pub fn rename(&mut self, index: usize, name: impl Into<String>) -> Result<()> {
		self.check_strip(index)?;
		self.strips[index].name = name.into();
		Ok(())
	}

	/// `(strip_index, active)` for every strip at `beat_index`.
	pub fn read_column(&self, beat_index: usize) -> Result<impl Iterator<Item = (usize, bool)> + '_> {
		check_beat(beat_index)?;
		Ok(self.rows.iter().map(move |row| row[beat_index]).enumerate())
	}

	fn push(&mut self, name: String, row: Row) -> StripId {
		let id = StripId(self.next_id);
		self.next_id += 1;

		self.strips.push(Strip { id, name });
		self.rows.push(row);
		id
	}

	fn check_strip(&self, index: usize) -> Result<()> {
		if index >= self.strips.len() {
			return Err(Error::StripOutOfBounds {
				index,
				len: self.strips.len(),
			});
		}
		Ok(())
	}
}

fn check_beat(index: usize) -> Result<()> {
	if index >= BEAT_COUNT {
		return Err(Error::BeatOutOfBounds {
			index,
			len: BEAT_COUNT,
		});
	}
	Ok(())
}
