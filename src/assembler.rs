use strip_sequencer_shared::{ACK_PREFIX, LINE_TERMINATOR};

/// Rebuilds protocol messages from whatever chunk sizes the serial line hands us.
///
/// The buffer is bytes rather than text because a chunk boundary can split a
/// UTF-8 sequence. It is never capped: a device that keeps talking without ever
/// sending the marker or a newline grows it for as long as the session waits.
#[derive(Debug, Default, Clone)]
pub struct StreamAssembler {
	buffer: Vec<u8>,
}

impl StreamAssembler {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, chunk: &[u8]) {
		self.buffer.extend_from_slice(chunk);
	}

	pub fn buffered(&self) -> &[u8] {
		&self.buffer
	}

	pub fn clear(&mut self) {
		self.buffer.clear();
	}

	/// Consumes everything up to and including the first `marker`.
	///
	/// Returns false and keeps the buffer when the marker has not arrived yet.
	pub fn take_marker(&mut self, marker: &str) -> bool {
		let marker = marker.as_bytes();
		if marker.is_empty() {
			return true;
		}

		let Some(start) = self
			.buffer
			.windows(marker.len())
			.position(|window| window == marker)
		else {
			return false;
		};

		self.buffer.drain(..start + marker.len());
		true
	}

	/// Removes the next complete line and returns it trimmed.
	pub fn take_line(&mut self) -> Option<String> {
		let end = self.buffer.iter().position(|b| *b == LINE_TERMINATOR)?;
		let line: Vec<u8> = self.buffer.drain(..=end).collect();
		Some(String::from_utf8_lossy(&line).trim().to_string())
	}
}

/// Pulls the channel count out of an acknowledgement such as `LEDCOUNT12`.
///
/// The prefix may appear anywhere in the line but must be followed by at least
/// one digit. Counts that do not fit a `u16` are treated as garbage.
pub fn parse_led_count(line: &str) -> Option<u16> {
	line.match_indices(ACK_PREFIX).find_map(|(start, _)| {
		let rest = &line[start + ACK_PREFIX.len()..];
		let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
		if digits == 0 {
			return None;
		}
		rest[..digits].parse().ok()
	})
}

#[cfg(test)]
mod tests {
	use strip_sequencer_shared::READY_MARKER;

	use super::*;

	#[test]
	fn marker_split_across_chunks() {
		let mut assembler = StreamAssembler::new();

		assembler.push(b"RE");
		assert!(!assembler.take_marker(READY_MARKER));

		assembler.push(b"ADY_LEDCOUNT5\n");
		assert!(assembler.take_marker(READY_MARKER));
		assert_eq!(assembler.buffered(), b"_LEDCOUNT5\n");

		let line = assembler.take_line().unwrap();
		assert_eq!(line, "_LEDCOUNT5");
		assert_eq!(parse_led_count(&line), Some(5));
		assert!(assembler.buffered().is_empty());
	}

	#[test]
	fn marker_after_boot_noise() {
		let mut assembler = StreamAssembler::new();
		assembler.push(b"\0\0boot v1.2\r\nREADY\r\nextra");

		assert!(assembler.take_marker(READY_MARKER));
		assert_eq!(assembler.buffered(), b"\r\nextra");
		assert!(!assembler.take_marker(READY_MARKER));
	}

	#[test]
	fn line_waits_for_newline() {
		let mut assembler = StreamAssembler::new();
		assembler.push(b"  LEDCO");
		assert_eq!(assembler.take_line(), None);
		assembler.push(b"UNT12\r");
		assert_eq!(assembler.take_line(), None);
		assembler.push(b"\nnext");

		assert_eq!(assembler.take_line().as_deref(), Some("LEDCOUNT12"));
		assert_eq!(assembler.buffered(), b"next");
	}

	#[test]
	fn split_utf8_sequence_survives() {
		let mut assembler = StreamAssembler::new();
		let text = "ciao è\n".as_bytes();
		let (head, tail) = text.split_at(6);

		assembler.push(head);
		assembler.push(tail);
		assert_eq!(assembler.take_line().as_deref(), Some("ciao è"));
	}

	#[test]
	fn led_count_parsing() {
		assert_eq!(parse_led_count("LEDCOUNT8"), Some(8));
		assert_eq!(parse_led_count("OK LEDCOUNT 3 LEDCOUNT42x"), Some(42));
		assert_eq!(parse_led_count("LEDCOUNT0"), Some(0));
		assert_eq!(parse_led_count("LEDCOUNT"), None);
		assert_eq!(parse_led_count("HELLO"), None);
		assert_eq!(parse_led_count("LEDCOUNT99999999"), None);
	}
}
