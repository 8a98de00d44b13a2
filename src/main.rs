use std::path::PathBuf;

use beat_scheduler_lib::config::storage;
use beat_scheduler_lib::scheduler::sim::scatter_jitter;
use beat_scheduler_lib::{
    AppConfig, DriftPolicy, EngineEvent, Metronome, MetronomeEngine, Result, SchedulerError,
    Settings, Simulation, TickEvent, TimeSignature,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => storage::try_load_config_from(path)?,
        None => storage::load_config(),
    };
    init_tracing(&config.settings);

    match cli.command {
        Commands::Run {
            bpm,
            metronome,
            beats,
        } => run_live(&config, bpm, metronome, beats),
        Commands::Simulate {
            bpm,
            beats,
            jitter_ms,
            change_at_beat,
            to_bpm,
        } => run_simulation(&config.policy, bpm, beats, jitter_ms, change_at_beat.zip(to_bpm)),
        Commands::Config { write_defaults } => show_config(cli.config, &config, write_defaults),
    }
}

fn run_live(
    config: &AppConfig,
    bpm: Option<f64>,
    index: Option<usize>,
    beats: Option<u64>,
) -> Result<()> {
    let metronome = match bpm {
        Some(bpm) => Metronome::new("", bpm),
        None => config.runnable(index)?.clone(),
    };
    let signature = metronome.configuration.time_signature;
    tracing::info!(
        title = metronome.display_title(),
        bpm = metronome.bpm(),
        beats_per_measure = signature.beats_per_measure(),
        beat_unit = signature.beat_unit(),
        "starting metronome"
    );

    let engine = MetronomeEngine::new(metronome.bpm(), config.policy);
    let events = engine.event_receiver();
    engine.start()?;

    let mut origin = None;
    for event in events.iter() {
        match event {
            EngineEvent::Tick(tick) => {
                let origin = *origin.get_or_insert(tick.at_ms);
                print_tick(&tick, signature, tick.at_ms - origin);
                if beats.is_some_and(|limit| tick.beat + 1 >= limit) {
                    engine.stop()?;
                    break;
                }
            }
            EngineEvent::StateChanged(status) => {
                tracing::debug!(?status, "engine state");
            }
            EngineEvent::Error(message) => return Err(SchedulerError::msg(message)),
        }
    }

    Ok(())
}

fn run_simulation(
    policy: &DriftPolicy,
    bpm: f64,
    beats: usize,
    jitter_ms: f64,
    change: Option<(usize, f64)>,
) -> Result<()> {
    let mut sim = Simulation::with_jitter(bpm, scatter_jitter(jitter_ms)).with_policy(*policy)?;
    sim.start()?;

    match change {
        Some((at_beat, to_bpm)) if at_beat < beats => {
            sim.run_beats(at_beat)?;
            tracing::info!(at_beat, to_bpm, "changing tempo");
            sim.set_bpm(to_bpm)?;
            sim.run_beats(beats - at_beat)?;
        }
        _ => sim.run_beats(beats)?,
    }

    let mut worst: f64 = 0.0;
    for tick in sim.ticks() {
        let offset = DriftPolicy::phase(tick.at_ms, tick.interval_ms);
        worst = worst.max(offset);
        println!(
            "{:>5} | {:>10.1} ms | interval {:>7.1} ms | off grid {:>6.1} ms",
            tick.beat, tick.at_ms, tick.interval_ms, offset
        );
    }
    println!("{} ticks, worst offset {:.1} ms", sim.tick_count(), worst);

    Ok(())
}

fn show_config(path: Option<PathBuf>, config: &AppConfig, write_defaults: bool) -> Result<()> {
    let path = path.unwrap_or_else(storage::config_path);
    if write_defaults {
        storage::save_config_to(&path, &AppConfig::default())?;
        println!("wrote defaults to {}", path.display());
        return Ok(());
    }

    println!("{}", path.display());
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

fn print_tick(tick: &TickEvent, signature: TimeSignature, since_start_ms: f64) {
    let position = signature.position(tick.beat);
    let marker = if signature.is_downbeat(tick.beat) {
        "*"
    } else if tick.flash() {
        "+"
    } else {
        "-"
    };
    println!(
        "{:>5} | {:>10.1} ms | {}.{} {}",
        tick.beat,
        since_start_ms,
        position.measure + 1,
        position.beat_in_measure + 1,
        marker
    );
}

fn init_tracing(settings: &Settings) {
    let default_level = if settings.debug_mode { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Drift-correcting metronome scheduler", long_about = None)]
struct Cli {
    /// Config file to use instead of the one in the user config directory.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Tick in real time and print every beat.
    Run {
        /// Tempo to use instead of a configured metronome.
        #[arg(long)]
        bpm: Option<f64>,
        /// Index of the configured metronome to run. Paused metronomes are
        /// refused, and skipped when no index is given.
        #[arg(short, long)]
        metronome: Option<usize>,
        /// Stop after this many beats.
        #[arg(short, long)]
        beats: Option<u64>,
    },
    /// Run the scheduler in virtual time with injected timer lateness.
    Simulate {
        #[arg(long, default_value_t = 60.0)]
        bpm: f64,
        #[arg(short, long, default_value_t = 16)]
        beats: usize,
        /// Upper bound on how late each wake-up arrives.
        #[arg(long, default_value_t = 50.0)]
        jitter_ms: f64,
        /// Beat after which the tempo changes (needs --to-bpm).
        #[arg(long, requires = "to_bpm")]
        change_at_beat: Option<usize>,
        #[arg(long)]
        to_bpm: Option<f64>,
    },
    /// Show the config file location and its effective contents.
    Config {
        /// Overwrite the config file with the defaults.
        #[arg(long)]
        write_defaults: bool,
    },
}
