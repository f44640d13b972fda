use std::{sync::mpsc, thread, time::Duration};

use clap::Parser;
use eyre::WrapErr;
use strip_sequencer::{
	runner,
	Command,
	Config,
	DeviceConfig,
	MemoryTransport,
	Result,
	Sequencer,
	SerialTransport,
	Transport,
};
use tracing_subscriber::EnvFilter;

/// Plays a two-bar chase on the controller at the given serial port, or on an
/// in-memory device when no port is given.
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

fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let args = Args::parse();
	let (tx, rx) = mpsc::channel();

	let player = match args.port {
		Some(port) => {
			let config = Config {
				bpm:    args.bpm,
				device: DeviceConfig {
					baud_rate: args.baud_rate,
					..DeviceConfig::new(port)
				},
			};
			let device = config.device.clone();
			spawn(config, move || SerialTransport::open(&device), rx)
		}
		None => {
			let available = SerialTransport::available_ports().unwrap_or_default();
			tracing::info!(?available, "no port given, using an in-memory device");

			let device = MemoryTransport::new();
			device.feed("READY\r\n");
			device.feed("LEDCOUNT4\r\n");
			let config = Config {
				bpm: args.bpm,
				..Config::default()
			};
			spawn(config, move || Ok(device.reopen()), rx)
		}
	};

	for i in 0..4 {
		tx.send(Command::AddStrip {
			name: format!("strip {}", i + 1),
		})?;
	}
	for beat in 0..16 {
		tx.send(Command::Toggle { strip: beat % 4, beat })?;
	}
	tx.send(Command::Connect)?;
	thread::sleep(Duration::from_millis(500));

	tx.send(Command::Play)?;
	thread::sleep(Duration::from_secs(2));
	tx.send(Command::SetBpm(180))?;
	thread::sleep(Duration::from_secs(2));
	tx.send(Command::Stop)?;
	tx.send(Command::Shutdown)?;

	player
		.join()
		.map_err(|_| eyre::eyre!("sequencer thread panicked"))?
		.wrap_err("running sequencer")?;

	Ok(())
}

fn spawn<T, F>(config: Config, open: F, rx: mpsc::Receiver<Command>) -> thread::JoinHandle<Result<()>>
where
	T: Transport,
	F: FnMut() -> Result<T> + Send + 'static,
{
	thread::spawn(move || {
		let mut sequencer = Sequencer::new(&config, open)?;
		runner::run(&mut sequencer, rx);
		Ok(())
	})
}
