//! Kinetic CLI: play or render the motion instruments driven by a simulated swing.

mod sim;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use kinetic_engine::prelude::*;
use kinetic_engine::tuning::{drone_partials, keys_partials, partials_from_file_or};
use kinetic_motion::prelude::{AccEngine, BeatConfig};
use log::info;
use strum::IntoEnumIterator;

use crate::sim::{SwingSimulator, FEED_PERIOD, FEED_RATE};

#[derive(Parser, Debug)]
#[command(name = "kinetic", version, about = "Motion-driven instruments, played by a simulated swing")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List audio output devices
    Devices,
    /// Play live on an output device
    Play(PlayArgs),
    /// Render offline to a 16-bit stereo WAV file
    Render(RenderArgs),
}

#[derive(Args, Debug)]
struct VoiceArgs {
    /// Instrument in focus at the start
    #[arg(short, long, default_value_t = InstrumentKind::Keys)]
    instrument: InstrumentKind,

    /// Beat classifier thresholds (JSON, missing fields keep their defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output gain before the compressor
    #[arg(short, long, default_value_t = 0.8)]
    gain: f64,

    /// Enable the ambient echo
    #[arg(long)]
    echo: bool,

    /// Directory with hihat_open/ride/snare/kick/floor_tom .wav or .pcm files
    #[arg(long)]
    drums_dir: Option<PathBuf>,

    /// Partial table overrides (JSON)
    #[arg(long)]
    keys_tuning: Option<PathBuf>,
    #[arg(long)]
    drone_tuning: Option<PathBuf>,

    /// Move focus to the next instrument every N seconds
    #[arg(long)]
    switch_every: Option<f64>,
}

#[derive(Args, Debug)]
struct PlayArgs {
    #[command(flatten)]
    voice: VoiceArgs,

    /// Output device name (default device when omitted)
    #[arg(short, long)]
    device: Option<String>,

    /// Requested sample rate; the device may pick the closest it supports
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Stop after N seconds (runs until Ctrl+C otherwise)
    #[arg(long)]
    duration: Option<f64>,
}

#[derive(Args, Debug)]
struct RenderArgs {
    #[command(flatten)]
    voice: VoiceArgs,

    #[arg(short, long, default_value = "kinetic.wav")]
    out: PathBuf,

    #[arg(short, long, default_value_t = 10.0)]
    seconds: f64,

    #[arg(long, default_value_t = 48_000)]
    sample_rate: u32,
}

fn build_instruments(voice: &VoiceArgs, sample_rate: f64) -> anyhow::Result<Vec<InstrumentHandle>> {
    let tuning = |path: &Option<PathBuf>, name: &'static str, builtin: Vec<PartialTuning>| match path {
        Some(p) => partials_from_file_or(p, name, builtin),
        None => builtin,
    };

    InstrumentKind::iter()
        .map(|kind| -> anyhow::Result<InstrumentHandle> {
            Ok(match kind {
                InstrumentKind::Keys => {
                    handle(KeysInstrument::with_tuning(tuning(&voice.keys_tuning, "keys", keys_partials()), sample_rate))
                }
                InstrumentKind::Drone => handle(DroneInstrument::with_tuning(
                    tuning(&voice.drone_tuning, "drone", drone_partials()),
                    sample_rate,
                )),
                InstrumentKind::Drums => match &voice.drums_dir {
                    Some(dir) => handle(
                        DrumKitInstrument::from_dir(dir)
                            .with_context(|| format!("loading drum samples from {}", dir.display()))?,
                    ),
                    None => kind.build(sample_rate)?,
                },
            })
        })
        .collect()
}

fn load_beat_config(path: Option<&Path>) -> anyhow::Result<BeatConfig> {
    match path {
        Some(p) => BeatConfig::from_path(p).with_context(|| format!("reading beat config {}", p.display())),
        None => Ok(BeatConfig::default()),
    }
}

/// The simulated performer: feeds the conductor and rotates focus when asked to.
struct Session {
    conductor: Conductor,
    sim: SwingSimulator,
    switch_every: Option<f64>,
    since_switch: f64,
}

impl Session {
    fn new(voice: &VoiceArgs, sound: Arc<SoundEngine>) -> anyhow::Result<Self> {
        sound.set_gain(voice.gain);
        if voice.echo {
            sound.add_echo_preset();
        }

        let instruments = build_instruments(voice, sound.sample_rate())?;
        let acc = AccEngine::new(load_beat_config(voice.config.as_deref())?);
        let mut conductor = Conductor::new(acc, sound, instruments);
        let first = InstrumentKind::iter().position(|k| k == voice.instrument).unwrap_or_default();
        conductor.select_instrument(first)?;

        Ok(Self { conductor, sim: SwingSimulator::new(), switch_every: voice.switch_every, since_switch: 0.0 })
    }

    /// One sensor frame. `live` stamps it with the wall clock, otherwise with the simulated time.
    fn step(&mut self, live: bool) -> anyhow::Result<()> {
        let f = self.sim.next_frame();
        let played = if live {
            self.conductor.feed_acc(f.acc, f.gyro, f.mag)
        } else {
            self.conductor.feed_acc_at(f.t, f.acc, f.gyro, f.mag)
        };
        if played {
            let acc = self.conductor.acc_engine();
            info!(
                "beat #{}: note {:.2}, amplitude {:.2}, heading {:.0}°",
                self.conductor.beats_count(),
                acc.acc_beat_frequency(),
                acc.acc_beat_amplitude(),
                self.conductor.geo_orientation_angle()
            );
        }
        self.conductor.tick(FEED_PERIOD);

        if let Some(every) = self.switch_every {
            self.since_switch += FEED_PERIOD;
            if self.since_switch >= every {
                self.since_switch = 0.0;
                let n = self.conductor.instruments().len();
                let next = self.conductor.current_index().map_or(0, |i| (i + 1) % n);
                self.conductor.select_instrument(next)?;
            }
        }
        Ok(())
    }
}

fn play(args: PlayArgs) -> anyhow::Result<()> {
    let device = OutputDevice::open(args.device.as_deref(), args.sample_rate)?;
    let sound = Arc::new(SoundEngine::new(f64::from(device.sample_rate())));
    let mut session = Session::new(&args.voice, Arc::clone(&sound))?;

    let _stream = device.play(sound)?;
    println!("Playing `{}` on {}, press Ctrl+C to stop", args.voice.instrument, device.name());

    let start = Instant::now();
    let period = Duration::from_secs_f64(FEED_PERIOD);
    let mut next = start;
    loop {
        if args.duration.is_some_and(|d| start.elapsed().as_secs_f64() >= d) {
            return Ok(());
        }
        session.step(true)?;
        next += period;
        thread::sleep(next.saturating_duration_since(Instant::now()));
    }
}

fn to_i16(x: f32) -> i16 {
    (x.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

fn render(args: RenderArgs) -> anyhow::Result<()> {
    let sample_rate = f64::from(args.sample_rate);
    let sound = Arc::new(SoundEngine::new(sample_rate));
    let mut session = Session::new(&args.voice, Arc::clone(&sound))?;

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: args.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&args.out, spec)
        .with_context(|| format!("creating {}", args.out.display()))?;

    let frames_per_feed = (sample_rate / FEED_RATE).round() as usize;
    let feeds = (args.seconds.max(0.0) * FEED_RATE).ceil() as usize;
    let mut buffer = vec![0.0_f32; frames_per_feed * 2];
    for _ in 0..feeds {
        session.step(false)?;
        sound.generate_interleaved(&mut buffer);
        for &x in &buffer {
            writer.write_sample(to_i16(x))?;
        }
    }
    writer.finalize()?;

    info!(
        "rendered {:.1}s, {} beats, to {}",
        feeds as f64 / FEED_RATE,
        session.conductor.beats_count(),
        args.out.display()
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Devices => {
            println!("Available output devices:");
            for name in list_output_devices()? {
                println!("- {name}");
            }
            Ok(())
        }
        Command::Play(args) => play(args),
        Command::Render(args) => render(args),
    }
}
