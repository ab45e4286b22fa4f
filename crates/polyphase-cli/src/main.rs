//! Polyphase CLI - The `polyphase` command.
//!
//! Plays, renders and traces polyrhythms described by rhythm files.
//!
//! ```toml
//! rhythms = [3, 4]
//! layers = [[3, 2, 1], [3, 1, 2, 3]]
//! ```

mod play;
mod render;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use env_logger::Env;
use polyphase_core::config::EngineConfig;
use polyphase_core::{AudioSink, PlaybackEngine};
use std::collections::HashSet;
use std::path::PathBuf;

/// Polyphase - polyrhythm playback engine
#[derive(Parser, Debug)]
#[command(name = "polyphase")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Play polyrhythms as just-intonation tone rows", long_about = None)]
struct Args {
    /// Configuration file (defaults to the per-user config location)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a rhythm file on the default audio device
    Play {
        #[command(flatten)]
        playback: PlaybackArgs,

        /// Stop after this many seconds (runs until Ctrl-C otherwise)
        #[arg(short, long)]
        duration: Option<f64>,

        /// Reload the rhythm file when it changes
        #[arg(short, long)]
        watch: bool,
    },

    /// Render a rhythm file to a WAV file
    Render {
        #[command(flatten)]
        playback: PlaybackArgs,

        /// Output WAV file
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Length of the render in seconds
        #[arg(short, long, default_value_t = 8.0)]
        duration: f64,
    },

    /// Print the notes a rhythm file would trigger, without audio
    Trace {
        #[command(flatten)]
        playback: PlaybackArgs,

        /// Length of the trace in seconds (defaults to one cycle)
        #[arg(short, long)]
        duration: Option<f64>,
    },

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the configuration file location
    ConfigPath,
}

/// Playback parameters shared by `play`, `render` and `trace`.
#[derive(ClapArgs, Debug, Clone)]
pub struct PlaybackArgs {
    /// Rhythm file (TOML)
    #[arg(value_name = "RHYTHM")]
    pub rhythm: PathBuf,

    /// Cycle duration in seconds
    #[arg(short, long)]
    pub tempo: Option<f64>,

    /// Tempo multiplier
    #[arg(short, long)]
    pub multiplier: Option<f64>,

    /// Fundamental frequency in Hz
    #[arg(short, long)]
    pub fundamental: Option<f64>,

    /// Sustain notes until the next note of the same layer
    #[arg(short, long)]
    pub legato: bool,

    /// Start phase offset in milliseconds
    #[arg(long, value_name = "MS")]
    pub phase_ms: Option<f64>,

    /// Mute a layer (0-3), may be repeated
    #[arg(long = "mute", value_name = "LAYER")]
    pub muted_layers: Vec<usize>,

    /// Solo one layer (0-3)
    #[arg(long, value_name = "LAYER")]
    pub solo: Option<usize>,

    /// Only play these ratios (e.g. "3/2"), may be repeated
    #[arg(long = "ratio", value_name = "FRACTION")]
    pub ratios: Vec<String>,
}

impl PlaybackArgs {
    /// Fold the command-line overrides into the configuration.
    pub fn apply_to(&self, config: &mut EngineConfig) -> Result<()> {
        if let Some(tempo) = self.tempo {
            config.transport.cycle_duration_seconds = tempo;
        }
        if let Some(hz) = self.fundamental {
            config.tone.fundamental_hz = hz;
        }
        if self.legato {
            config.voice.legato = true;
        }
        config.validate().context("Invalid playback settings")?;
        Ok(())
    }

    /// Apply the live playback controls to a freshly created engine.
    pub fn apply_to_engine<S: AudioSink>(&self, engine: &mut PlaybackEngine<S>) -> Result<()> {
        if let Some(multiplier) = self.multiplier {
            engine.set_tempo_multiplier(multiplier)?;
        }
        engine.set_layer_solo(self.solo)?;
        for &layer in &self.muted_layers {
            engine.set_layer_mute(layer, true)?;
        }
        if !self.ratios.is_empty() {
            let known: HashSet<&str> = engine
                .rhythm()
                .available_ratios
                .iter()
                .map(|r| r.fraction.as_str())
                .collect();
            for fraction in &self.ratios {
                if !known.contains(fraction.as_str()) {
                    log::warn!("Ratio {} does not occur in this rhythm", fraction);
                }
            }
            engine.set_selected_ratios(self.ratios.iter().cloned().collect());
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    match args.command {
        Commands::Play {
            playback,
            duration,
            watch,
        } => {
            let config = load_config(args.config.as_ref())?;
            play::run(config, &playback, duration, watch)
        }
        Commands::Render {
            playback,
            output,
            duration,
        } => {
            let config = load_config(args.config.as_ref())?;
            render::render(config, &playback, &output, duration)
        }
        Commands::Trace { playback, duration } => {
            let config = load_config(args.config.as_ref())?;
            render::trace(config, &playback, duration)
        }
        Commands::Init { force } => init_config(args.config, force),
        Commands::ConfigPath => {
            let path = EngineConfig::config_path()?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(EngineConfig::load_or_default()),
    }
}

fn init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => EngineConfig::config_path()?,
    };
    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    EngineConfig::write_default_config(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
