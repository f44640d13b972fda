use std::time::Duration;

use clap::Parser;
use strip_sequencer::{tokio::SerialLink, Command, Config, DeviceConfig, MemoryTransport, Sequencer};
use tokio::{
	sync::{mpsc, Notify},
	time,
};
use tracing_subscriber::EnvFilter;

/// Plays a short pattern from a tokio runtime, on the given serial port or an
/// in-memory device.
#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
	/// Serial device of the LED controller.
	port:      Option<String>,
	#[arg(short, long, default_value_t = 115_200)]
	baud_rate: u32,
	#[arg(short = 't', long, default_value_t = 120)]
	bpm:       u32,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let args = Args::parse();
	let config = Config {
		bpm: args.bpm,
		..Config::default()
	};

	let (tx, rx) = mpsc::unbounded_channel();
	let script = async move {
		for i in 0..3 {
			tx.send(Command::AddStrip {
				name: format!("strip {}", i + 1),
			})?;
		}
		for beat in (0..16).step_by(2) {
			tx.send(Command::Toggle { strip: beat % 3, beat })?;
		}
		tx.send(Command::Connect)?;
		time::sleep(Duration::from_millis(500)).await;

		tx.send(Command::Play)?;
		time::sleep(Duration::from_secs(4)).await;
		tx.send(Command::Shutdown)?;

		Ok::<_, eyre::Report>(())
	};

	match args.port {
		Some(port) => {
			let link = SerialLink::new(DeviceConfig {
				baud_rate: args.baud_rate,
				..DeviceConfig::new(port)
			});
			let opener = link.clone();
			let mut sequencer = Sequencer::new(&config, move || opener.open())?;
			let (_, script) = tokio::join!(strip_sequencer::tokio::run(&mut sequencer, rx, link.readable()), script);
			link.flush().await;
			script?;
		}
		None => {
			let device = MemoryTransport::new();
			device.feed("READY\r\nLEDCOUNT3\r\n");
			let mut sequencer = Sequencer::new(&config, move || Ok(device.reopen()))?;
			let readable = Notify::new();
			let (_, script) = tokio::join!(strip_sequencer::tokio::run(&mut sequencer, rx, &readable), script);
			script?;
		}
	}

	Ok(())
}
