#![no_std]

/// Steps in one sequence row.
pub const BEAT_COUNT: usize = 16;
/// Clock ticks per beat, every row step is a sixteenth note.
pub const STEPS_PER_BEAT: u32 = 4;

pub const DEFAULT_BPM: u32 = 120;
pub const MIN_BPM: u32 = 60;
pub const MAX_BPM: u32 = 200;

/// The controller prints this somewhere in its boot output once it accepts commands.
pub const READY_MARKER: &str = "READY";
pub const HELLO_MESSAGE: &str = "HELLO\n";
/// Prefix of the handshake acknowledgement, followed by the decimal channel count.
pub const ACK_PREFIX: &str = "LEDCOUNT";

pub const CHANNEL_PREFIX: &str = "LED";
pub const CHANNEL_ON: &str = "ON";
pub const CHANNEL_OFF: &str = "OFF";
pub const TOKEN_SEPARATOR: char = ',';
pub const FRAME_TERMINATOR: &str = "STOP\n";
pub const LINE_TERMINATOR: u8 = b'\n';

pub const DEFAULT_BAUD_RATE: u32 = 115_200;
