use std::{
	sync::mpsc::{Receiver, RecvTimeoutError},
	time::{Duration, Instant},
};

use tracing::{info, warn};

use crate::{Command, Sequencer, Transport};

/// Upper bound on how long the loop sleeps with nothing scheduled.
const IDLE_WAIT: Duration = Duration::from_millis(250);

/// Drives `sequencer` on the current thread until [`Command::Shutdown`] or
/// until every sender is gone.
///
/// Commands that fail are logged and dropped; the loop keeps going.
pub fn run<T: Transport>(sequencer: &mut Sequencer<T>, commands: Receiver<Command>) {
	info!("sequencer running");

	loop {
		let now = Instant::now();
		let timeout = sequencer
			.next_wakeup(now)
			.map_or(IDLE_WAIT, |wakeup| wakeup.saturating_duration_since(now));

		match commands.recv_timeout(timeout) {
			Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
			Ok(command) => {
				if let Err(e) = sequencer.handle(command, Instant::now()) {
					warn!("command rejected: {e}");
				}
			}
			Err(RecvTimeoutError::Timeout) => {}
		}

		if sequencer.handshake_pending() {
			if let Err(e) = sequencer.pump_device() {
				warn!("handshake failed: {e}");
			}
		}
		if let Err(e) = sequencer.on_wakeup(Instant::now()) {
			warn!("tick failed: {e}");
		}
	}

	if let Err(e) = sequencer.handle(Command::Shutdown, Instant::now()) {
		warn!("shutdown: {e}");
	}
	info!("sequencer stopped");
}
