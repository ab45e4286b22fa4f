//! Polyphase Core - Real-time polyrhythm playback.
//!
//! This crate turns rhythm data (up to four layers of "spaces") into sound:
//!
//! - **Tone rows** - One pitch per space, derived from a fundamental
//! - **Event table** - When each note starts within one cycle, in ticks
//! - **Timing** - Transport clock mapping audio time to absolute ticks
//! - **Scheduler** - Lookahead scheduling of due occurrences
//! - **Voices** - Standard, legato and bridge voices on an audio sink
//! - **Filter** - Solo, mute and ratio selection applied at dispatch time
//! - **Runtime** - The engine confined to its own thread
//!
//! # Architecture
//!
//! [`PlaybackEngine`] is a single-owner struct. Something polls it every
//! schedule interval; in live playback that is the [`Runtime`] thread,
//! which receives commands as [`state::EngineMessage`]s and publishes a
//! [`state::PlaybackStatus`] after every change. Audio leaves the engine
//! through the [`AudioSink`] trait.
//!
//! # Feature Flags
//!
//! - `native` - Audio output on the default device via cpal

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod event_table;
pub mod events;
pub mod filter;
pub mod offline;
pub mod rhythm;
pub mod runtime;
pub mod scheduler;
pub mod state;
pub mod timing;
pub mod tone_row;
pub mod voice;

/// Number of rhythm layers (A to D).
pub const MAX_LAYERS: usize = 4;

pub use audio::{AudioSink, RecordingSink, SynthHandle, VoiceSpec, Waveform};
pub use config::EngineConfig;
pub use engine::PlaybackEngine;
pub use error::{Error, Result};
pub use event_table::{EventTable, ScheduledEvent};
pub use events::PlaybackEvent;
pub use filter::{is_audible, Audibility, RatioIndex};
pub use offline::{render_samples, render_to_wav, RenderOptions, RenderSummary};
pub use rhythm::{FileRhythmProvider, RhythmData, RhythmProvider};
pub use runtime::{Runtime, RuntimeHandle};
pub use scheduler::{DueEvent, LookaheadScheduler};
pub use timing::TransportClock;
pub use tone_row::{generate_tone_rows, NoteDescriptor, ToneRows};
pub use voice::{Adsr, VoiceManager, VoiceSettings};

#[cfg(feature = "native")]
pub use audio::output::AudioOutput;
