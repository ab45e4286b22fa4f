//! The playback engine.
//!
//! [`PlaybackEngine`] owns all playback state: rhythm data, tone rows, the
//! event table, the transport clock, the lookahead scheduler, the voice
//! manager and the live mute/selection state. It is single-owner and has no
//! interior locking; [`crate::runtime`] confines it to one thread.
//!
//! The engine does not keep time by itself. Something calls
//! [`PlaybackEngine::poll`] every schedule interval: the runtime thread for
//! live playback, the offline renderer in lock step with the synth, or a test.

use crate::audio::AudioSink;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::event_table::{cycle_ticks_for, EventTable};
use crate::events::PlaybackEvent;
use crate::filter::{safe_minimum_cycle_duration, Audibility, RatioIndex};
use crate::rhythm::{RhythmData, RhythmProvider};
use crate::scheduler::LookaheadScheduler;
use crate::timing::TransportClock;
use crate::tone_row::{generate_tone_rows, ToneRows};
use crate::voice::{Adsr, VoiceManager};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashSet;

/// Real-time polyrhythm player.
pub struct PlaybackEngine<S: AudioSink> {
    config: EngineConfig,
    provider: Box<dyn RhythmProvider + Send>,
    sink: S,

    rhythm: RhythmData,
    ratio_index: RatioIndex,
    rows: ToneRows,
    table: EventTable,

    clock: TransportClock,
    scheduler: LookaheadScheduler,
    voices: VoiceManager,
    audibility: Audibility,

    cycle_duration: f64,
    tempo_multiplier: f64,
    fundamental_hz: f64,
    playing: bool,

    subscribers: Vec<Sender<PlaybackEvent>>,
}

impl<S: AudioSink> PlaybackEngine<S> {
    /// Create an engine from its collaborators.
    ///
    /// Pulls the initial rhythm from `provider`. An empty rhythm is accepted;
    /// only [`PlaybackEngine::start`] rejects it.
    pub fn new(
        config: EngineConfig,
        provider: Box<dyn RhythmProvider + Send>,
        mut sink: S,
    ) -> Result<Self> {
        config.validate()?;
        let rhythm = provider.rhythm_data()?;
        sink.set_master_gain(config.audio.master_gain)?;

        let tps = config.transport.ticks_per_second;
        let cycle_duration = config.transport.cycle_duration_seconds;
        let fundamental_hz = config.tone.fundamental_hz;

        let mut engine = Self {
            voices: VoiceManager::new(config.voice_settings()),
            clock: TransportClock::new(tps, cycle_ticks_for(cycle_duration, tps)),
            scheduler: LookaheadScheduler::new(),
            audibility: Audibility::default(),
            ratio_index: RatioIndex::default(),
            rows: Default::default(),
            table: EventTable::default(),
            rhythm: RhythmData::default(),
            cycle_duration,
            tempo_multiplier: 1.0,
            fundamental_hz,
            playing: false,
            subscribers: Vec::new(),
            config,
            provider,
            sink,
        };
        engine.install_rhythm(rhythm)?;
        if engine.clamp_cycle_duration() {
            engine.rebuild_table();
            engine.clock.set_cycle_ticks(engine.table.cycle_ticks());
        }
        Ok(engine)
    }

    /// Raise the cycle duration to the safe minimum; true when it changed.
    fn clamp_cycle_duration(&mut self) -> bool {
        let minimum = self.safe_minimum_cycle_duration();
        if self.cycle_duration >= minimum {
            return false;
        }
        log::warn!(
            "Cycle duration {:.4}s is below the safe minimum, using {:.4}s",
            self.cycle_duration,
            minimum
        );
        self.cycle_duration = minimum;
        true
    }

    fn install_rhythm(&mut self, rhythm: RhythmData) -> Result<()> {
        let rows = generate_tone_rows(
            &rhythm.spaces_plot,
            &rhythm.spaces_by_layer,
            self.fundamental_hz,
            self.config.tone.max_frequency_hz,
        )?;
        self.ratio_index = RatioIndex::new(&rhythm.ratio_to_spaces_indices);
        self.rows = rows;
        self.rhythm = rhythm;
        self.rebuild_table();
        Ok(())
    }

    fn rebuild_table(&mut self) {
        self.table = EventTable::build(
            &self.rhythm.rhythms,
            &self.rows,
            self.cycle_duration,
            self.config.transport.ticks_per_second,
        );
    }

    fn emit(&mut self, event: PlaybackEvent) {
        log::trace!("emit {}", event.kind());
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Receive playback notifications.
    pub fn subscribe(&mut self) -> Receiver<PlaybackEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Replace the rhythm data.
    ///
    /// Playback continues on the new table from the current position. Empty
    /// data stops playback.
    pub fn set_rhythm_data(&mut self, rhythm: RhythmData) -> Result<()> {
        self.install_rhythm(rhythm)?;
        if self.clamp_cycle_duration() {
            self.apply_timing_change();
        }
        log::info!(
            "Rhythm updated: multipliers {:?}, {} events per cycle",
            self.rhythm.rhythms,
            self.table.len()
        );
        if self.playing && self.table.is_empty() {
            log::warn!("New rhythm has nothing to play, stopping");
            self.stop();
        }
        Ok(())
    }

    /// Pull fresh rhythm data from the provider.
    pub fn reload_rhythm(&mut self) -> Result<()> {
        let rhythm = self.provider.rhythm_data()?;
        self.set_rhythm_data(rhythm)
    }

    /// Start playback, optionally at a phase offset in milliseconds.
    ///
    /// Starting while playing does nothing.
    pub fn start(&mut self, start_phase_ms: Option<f64>) -> Result<()> {
        if self.playing {
            log::debug!("start ignored: already playing");
            return Ok(());
        }

        self.clamp_cycle_duration();
        self.rebuild_table();
        if self.table.is_empty() {
            return Err(Error::NothingToPlay);
        }

        let cycle_ticks = self.table.cycle_ticks();
        self.clock.set_cycle_ticks(cycle_ticks);
        self.clock.set_multiplier(self.tempo_multiplier);

        let start_tick = match start_phase_ms {
            Some(ms) if ms.is_finite() => self.clock.ticks_for_millis(ms) % cycle_ticks,
            Some(ms) => return Err(Error::InvalidTempo(format!("start phase {} ms", ms))),
            None => self.scheduler.last_scheduled_tick() % cycle_ticks,
        };

        let now = self.sink.current_time();
        self.clock.anchor(now, start_tick);
        self.scheduler.reset_to_tick(start_tick);
        self.playing = true;

        log::info!(
            "Playback started at tick {} (cycle {} ticks, {:.3}s)",
            start_tick,
            cycle_ticks,
            self.cycle_duration
        );
        self.emit(PlaybackEvent::Started);
        self.poll();
        Ok(())
    }

    /// Stop playback and release every voice.
    ///
    /// Safe to call repeatedly or without a prior start.
    pub fn stop(&mut self) {
        let was_playing = self.playing;
        self.playing = false;
        self.scheduler.reset_to_tick(0);

        if let Err(e) = self.voices.stop(&mut self.sink) {
            log::error!("Failed to release voices on stop: {}", e);
        }

        if was_playing {
            log::info!("Playback stopped");
            self.emit(PlaybackEvent::Stopped);
        }
    }

    /// Start when stopped, stop when playing.
    pub fn toggle(&mut self) -> Result<()> {
        if self.playing {
            self.stop();
            Ok(())
        } else {
            self.start(None)
        }
    }

    /// Change the cycle duration, preserving the position within the cycle.
    ///
    /// Requests below [`PlaybackEngine::safe_minimum_cycle_duration`] are
    /// raised to it.
    pub fn set_tempo(&mut self, cycle_duration_seconds: f64) -> Result<()> {
        if !cycle_duration_seconds.is_finite() || cycle_duration_seconds <= 0.0 {
            return Err(Error::InvalidTempo(format!(
                "cycle duration must be positive, got {}",
                cycle_duration_seconds
            )));
        }

        self.cycle_duration = cycle_duration_seconds;
        self.clamp_cycle_duration();
        self.apply_timing_change();
        Ok(())
    }

    /// Scale playback speed without changing the cycle length in ticks.
    pub fn set_tempo_multiplier(&mut self, multiplier: f64) -> Result<()> {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(Error::InvalidTempo(format!(
                "tempo multiplier must be positive, got {}",
                multiplier
            )));
        }
        self.tempo_multiplier = multiplier;
        self.apply_timing_change();
        Ok(())
    }

    fn apply_timing_change(&mut self) {
        self.rebuild_table();
        let cycle_ticks = self.table.cycle_ticks();

        let phase = if self.playing {
            let now = self.sink.current_time();
            let phase = self.clock.reanchor(now, cycle_ticks, self.tempo_multiplier);
            let resume_tick = self.clock.start_tick();
            self.scheduler.reset_to_tick(resume_tick);
            self.voices.request_cleanup();
            if let Err(e) = self
                .voices
                .arm_bridge(&mut self.sink, &self.table, resume_tick, now)
            {
                log::error!("Failed to start bridge voice: {}", e);
            }
            phase
        } else {
            self.clock.set_cycle_ticks(cycle_ticks);
            self.clock.set_multiplier(self.tempo_multiplier);
            0.0
        };

        log::info!(
            "Tempo changed: cycle {:.3}s x{:.3} ({} ticks), phase {:.4}",
            self.cycle_duration,
            self.tempo_multiplier,
            cycle_ticks,
            phase
        );
        self.emit(PlaybackEvent::TempoChanged {
            cycle_duration: self.cycle_duration,
            tempo_multiplier: self.tempo_multiplier,
            phase,
        });
    }

    /// Change the fundamental; takes effect on the next scheduled notes.
    pub fn set_fundamental_frequency(&mut self, hz: f64) -> Result<()> {
        if !hz.is_finite() || hz <= 0.0 {
            return Err(Error::InvalidFrequency(hz));
        }
        self.fundamental_hz = hz;
        self.rows = generate_tone_rows(
            &self.rhythm.spaces_plot,
            &self.rhythm.spaces_by_layer,
            hz,
            self.config.tone.max_frequency_hz,
        )?;
        self.rebuild_table();
        log::debug!("Fundamental set to {:.2} Hz", hz);
        Ok(())
    }

    /// Switch between standard and legato voices.
    pub fn set_legato(&mut self, legato: bool) -> Result<()> {
        self.voices.set_legato(&mut self.sink, legato)
    }

    pub fn set_layer_solo(&mut self, layer: Option<usize>) -> Result<()> {
        self.audibility.set_solo(layer)
    }

    pub fn set_layer_mute(&mut self, layer: usize, muted: bool) -> Result<()> {
        self.audibility.set_mute(layer, muted)
    }

    /// Restrict playback to the given fractions; empty means all.
    pub fn set_selected_ratios(&mut self, fractions: HashSet<String>) {
        self.audibility.selected_ratios = fractions;
    }

    pub fn set_envelope(&mut self, envelope: Adsr) -> Result<()> {
        self.voices.set_envelope(envelope)
    }

    pub fn set_master_gain(&mut self, gain: f32) -> Result<()> {
        if !gain.is_finite() || gain < 0.0 {
            return Err(Error::Config(format!("master gain must be non-negative, got {}", gain)));
        }
        self.sink.set_master_gain(gain)
    }

    /// Run one scheduling pass.
    ///
    /// Processes voice-ended notifications, then dispatches every occurrence
    /// inside the lookahead window. Errors on individual events are logged
    /// and skipped. Returns the number of notes that sounded.
    pub fn poll(&mut self) -> usize {
        for id in self.sink.drain_ended() {
            self.voices.on_voice_ended(id);
        }
        let now = self.sink.current_time();
        self.voices.reap_expired(now);

        if !self.playing {
            return 0;
        }

        let due = self.scheduler.collect_due_events(
            &self.clock,
            now,
            &self.table,
            self.config.lookahead_seconds(),
        );

        let mut sounded = 0;
        for (tick, events) in due {
            let start_time = self.clock.abs_tick_to_time(tick);
            for event in events {
                let Some(note) = self.rows[event.layer].get(event.note_index) else {
                    log::error!(
                        "Event refers to missing note {} on layer {}",
                        event.note_index,
                        event.layer
                    );
                    continue;
                };
                let duration = self.clock.ticks_to_seconds(event.duration_ticks);

                match self.voices.play_event_at_time(
                    &mut self.sink,
                    note,
                    duration,
                    event.layer,
                    &self.audibility,
                    &self.ratio_index,
                    start_time,
                    tick,
                ) {
                    Ok(Some(_)) => {
                        sounded += 1;
                        let triggered = PlaybackEvent::NoteTriggered {
                            layer: event.layer,
                            ratio: note.ratio,
                            frequency: note.frequency,
                            duration,
                            start_time,
                            abs_tick: tick,
                        };
                        self.emit(triggered);
                    }
                    Ok(None) => {}
                    Err(e) => log::error!(
                        "Failed to play layer {} note {} at tick {}: {}",
                        event.layer,
                        event.note_index,
                        tick,
                        e
                    ),
                }
            }
        }
        sounded
    }

    /// Shortest cycle duration [`PlaybackEngine::set_tempo`] accepts.
    pub fn safe_minimum_cycle_duration(&self) -> f64 {
        safe_minimum_cycle_duration(&self.rhythm.rhythms, &self.audibility, &self.ratio_index)
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Position within the cycle, `[0, 1)`; 0 while stopped.
    pub fn current_phase(&self) -> f64 {
        if self.playing {
            self.clock.phase_at(self.sink.current_time())
        } else {
            0.0
        }
    }

    pub fn cycle_ticks(&self) -> u64 {
        self.table.cycle_ticks()
    }

    pub fn cycle_duration(&self) -> f64 {
        self.cycle_duration
    }

    pub fn tempo_multiplier(&self) -> f64 {
        self.tempo_multiplier
    }

    pub fn fundamental_frequency(&self) -> f64 {
        self.fundamental_hz
    }

    pub fn is_legato(&self) -> bool {
        self.voices.is_legato()
    }

    /// Current tone rows.
    pub fn notes(&self) -> &ToneRows {
        &self.rows
    }

    pub fn event_table(&self) -> &EventTable {
        &self.table
    }

    pub fn rhythm(&self) -> &RhythmData {
        &self.rhythm
    }

    pub fn active_voice_count(&self) -> usize {
        self.voices.active_voice_count()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{RecordingSink, SinkCommand};
    use crate::filter::MIN_CYCLE_FLOOR_SECONDS;

    fn three_against_four() -> RhythmData {
        RhythmData::from_layers(
            [3, 4, 0, 0],
            [vec![3, 2, 1], vec![3, 1, 2, 3], vec![], vec![]],
            110.0,
        )
        .unwrap()
    }

    fn engine_with(config: EngineConfig) -> PlaybackEngine<RecordingSink> {
        let _ = env_logger::builder().is_test(true).try_init();
        PlaybackEngine::new(config, Box::new(three_against_four()), RecordingSink::new()).unwrap()
    }

    fn engine() -> PlaybackEngine<RecordingSink> {
        engine_with(EngineConfig::default())
    }

    /// Advance the sink clock in poll-sized steps up to `until`.
    fn run_until(engine: &mut PlaybackEngine<RecordingSink>, until: f64) {
        let mut t = engine.sink().current_time();
        while t < until {
            t = (t + 0.03).min(until);
            engine.sink_mut().advance_to(t);
            engine.poll();
        }
    }

    fn triggered(rx: &Receiver<PlaybackEvent>) -> Vec<(usize, u64, f64)> {
        rx.try_iter()
            .filter_map(|e| match e {
                PlaybackEvent::NoteTriggered {
                    layer,
                    abs_tick,
                    ratio,
                    ..
                } => Some((layer, abs_tick, ratio)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_start_with_empty_rhythm_reports_nothing_to_play() {
        let mut engine = PlaybackEngine::new(
            EngineConfig::default(),
            Box::new(RhythmData::default()),
            RecordingSink::new(),
        )
        .unwrap();
        assert!(matches!(engine.start(None), Err(Error::NothingToPlay)));
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_first_second_fires_five_notes() {
        let mut engine = engine();
        let rx = engine.subscribe();
        assert_eq!(engine.cycle_ticks(), 1920);

        engine.start(None).unwrap();
        // Window end of tick 961 means audio time 961/960 s minus lookahead.
        run_until(&mut engine, 961.0 / 960.0 - 0.15 + 1e-6);

        let notes = triggered(&rx);
        let a: Vec<u64> = notes.iter().filter(|n| n.0 == 0).map(|n| n.1).collect();
        let b: Vec<u64> = notes.iter().filter(|n| n.0 == 1).map(|n| n.1).collect();
        assert_eq!(a, vec![0, 640]);
        assert_eq!(b, vec![0, 480, 960]);
        assert_eq!(notes.len(), 5);
    }

    #[test]
    fn test_notes_start_at_exact_tick_times() {
        let mut engine = engine();
        engine.sink_mut().advance_to(5.0);
        engine.start(None).unwrap();
        run_until(&mut engine, 6.0);

        let starts: Vec<f64> = engine.sink().started().iter().map(|s| s.start_time).collect();
        for expected in [5.0, 5.5, 5.0 + 640.0 / 960.0, 6.0] {
            assert!(
                starts.iter().any(|s| (s - expected).abs() < 1e-9),
                "no note at {expected}"
            );
        }
    }

    #[test]
    fn test_late_poll_catches_up_from_live_clock() {
        let mut engine = engine();
        let rx = engine.subscribe();
        engine.start(None).unwrap();
        assert_eq!(triggered(&rx).len(), 2);
        assert_eq!(engine.sink().started().len(), 2);

        // No polls for a full second, far beyond the lookahead.
        engine.sink_mut().advance_to(1.0);
        engine.poll();

        let caught_up: Vec<(usize, u64)> = triggered(&rx).iter().map(|n| (n.0, n.1)).collect();
        assert_eq!(caught_up, vec![(1, 480), (0, 640), (1, 960)]);

        let starts = engine.sink().started();
        assert_eq!(starts.len(), 5);
        for spec in &starts[2..] {
            assert!((spec.start_time - 1.0).abs() < 1e-9, "start {}", spec.start_time);
        }

        // Nothing is replayed and the next window follows the clock.
        engine.poll();
        assert!(triggered(&rx).is_empty());
        engine.sink_mut().advance_to(1.2);
        engine.poll();
        let next: Vec<(usize, u64)> = triggered(&rx).iter().map(|n| (n.0, n.1)).collect();
        assert_eq!(next, vec![(0, 1280)]);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut engine = engine();
        let rx = engine.subscribe();
        engine.stop();

        engine.start(None).unwrap();
        run_until(&mut engine, 0.5);
        assert!(engine.active_voice_count() > 0);

        engine.stop();
        engine.stop();
        assert_eq!(engine.active_voice_count(), 0);
        assert!(!engine.is_playing());

        let stopped = rx
            .try_iter()
            .filter(|e| *e == PlaybackEvent::Stopped)
            .count();
        assert_eq!(stopped, 1);

        // Late voice-ended notifications are harmless.
        engine.sink_mut().advance_to(2.0);
        assert_eq!(engine.poll(), 0);
        assert_eq!(engine.active_voice_count(), 0);
    }

    #[test]
    fn test_phase_continuity_across_tempo_changes() {
        let mut engine = engine();
        engine.start(None).unwrap();

        let mut t = 0.0;
        for duration in [3.0, 1.1, 7.3, 0.9, 2.0] {
            t += 0.77;
            run_until(&mut engine, t);
            let before = engine.current_phase();
            engine.set_tempo(duration).unwrap();
            let after = engine.current_phase();

            let diff = (before - after).abs();
            let wrapped = diff.min(1.0 - diff);
            assert!(
                wrapped <= 1.0 / engine.cycle_ticks() as f64 + 1e-12,
                "jump of {wrapped} when changing to {duration}s"
            );
        }
    }

    #[test]
    fn test_tempo_change_keeps_scheduling_exactly_once() {
        let mut engine = engine();
        let rx = engine.subscribe();
        engine.start(None).unwrap();
        run_until(&mut engine, 0.7);
        engine.set_tempo(4.0).unwrap();
        run_until(&mut engine, 6.0);

        let notes = triggered(&rx);
        let mut seen = HashSet::new();
        for (layer, tick, _) in &notes {
            assert!(seen.insert((*layer, *tick)), "duplicate at layer {layer} tick {tick}");
        }
    }

    #[test]
    fn test_set_tempo_clamps_to_safe_minimum() {
        let mut engine = engine();
        engine.set_tempo(0.001).unwrap();
        assert_eq!(engine.cycle_duration(), MIN_CYCLE_FLOOR_SECONDS);
        assert!(matches!(engine.set_tempo(f64::NAN), Err(Error::InvalidTempo(_))));
        assert!(matches!(engine.set_tempo(-1.0), Err(Error::InvalidTempo(_))));
    }

    #[test]
    fn test_configured_cycle_is_clamped_to_safe_minimum() {
        let data = RhythmData::from_layers(
            [3, 8, 0, 0],
            [vec![3, 2, 1], vec![1; 8], vec![], vec![]],
            110.0,
        )
        .unwrap();
        let mut config = EngineConfig::default();
        config.transport.cycle_duration_seconds = 0.001;
        let mut engine =
            PlaybackEngine::new(config, Box::new(data), RecordingSink::new()).unwrap();

        assert_eq!(engine.cycle_duration(), engine.safe_minimum_cycle_duration());
        assert!(engine.cycle_duration() >= 0.08 - 1e-12);
        assert_eq!(engine.cycle_ticks(), 77);

        // Two cycles of lookahead at most: 11 notes per cycle.
        engine.start(None).unwrap();
        assert!(engine.active_voice_count() <= 33);
    }

    #[test]
    fn test_rhythm_update_raises_cycle_to_new_minimum() {
        let mut engine = engine();
        let rx = engine.subscribe();
        engine.start(None).unwrap();
        engine.set_tempo(0.05).unwrap();
        assert_eq!(engine.cycle_duration(), MIN_CYCLE_FLOOR_SECONDS);
        let _ = rx.try_iter().count();

        let fast =
            RhythmData::from_layers([40, 0, 0, 0], [vec![1; 40], vec![], vec![], vec![]], 110.0)
                .unwrap();
        engine.set_rhythm_data(fast).unwrap();

        assert!((engine.cycle_duration() - 0.4).abs() < 1e-12);
        assert_eq!(engine.cycle_ticks(), 384);
        assert!(engine.is_playing());
        let retimed = rx.try_iter().any(|e| match e {
            PlaybackEvent::TempoChanged { cycle_duration, .. } => {
                (cycle_duration - 0.4).abs() < 1e-12
            }
            _ => false,
        });
        assert!(retimed);
    }

    #[test]
    fn test_safe_minimum_follows_selection() {
        let data = RhythmData::from_layers(
            [3, 8, 0, 0],
            [vec![3, 2, 1], vec![1; 8], vec![], vec![]],
            110.0,
        )
        .unwrap();
        let mut engine =
            PlaybackEngine::new(EngineConfig::default(), Box::new(data), RecordingSink::new())
                .unwrap();
        assert!(engine.safe_minimum_cycle_duration() >= 0.08);

        engine.set_selected_ratios(["1/1".to_string()].into_iter().collect());
        assert_eq!(engine.safe_minimum_cycle_duration(), MIN_CYCLE_FLOOR_SECONDS);
    }

    #[test]
    fn test_selection_change_only_affects_later_events() {
        let mut engine = engine();
        let rx = engine.subscribe();
        engine.start(None).unwrap();
        run_until(&mut engine, 1.0);

        let before: Vec<SinkCommand> = engine.sink().commands().to_vec();
        let played_before = triggered(&rx);
        assert!(played_before.iter().any(|n| n.2 != 1.5));

        engine.set_selected_ratios(["3/2".to_string()].into_iter().collect());
        run_until(&mut engine, 5.0);

        assert_eq!(&engine.sink().commands()[..before.len()], before.as_slice());
        let played_after = triggered(&rx);
        assert!(!played_after.is_empty());
        assert!(played_after.iter().all(|n| n.2 == 1.5));
    }

    #[test]
    fn test_mute_and_solo() {
        let mut engine = engine();
        let rx = engine.subscribe();
        engine.set_layer_mute(0, true).unwrap();
        assert!(matches!(engine.set_layer_mute(4, true), Err(Error::InvalidLayer(4))));

        engine.start(None).unwrap();
        run_until(&mut engine, 2.0);
        assert!(triggered(&rx).iter().all(|n| n.0 == 1));

        engine.set_layer_mute(0, false).unwrap();
        engine.set_layer_solo(Some(0)).unwrap();
        run_until(&mut engine, 4.0);
        let notes = triggered(&rx);
        assert!(!notes.is_empty());
        assert!(notes.iter().all(|n| n.0 == 0));
    }

    #[test]
    fn test_tempo_change_arms_bridge_in_standard_mode() {
        let mut engine = engine();
        engine.start(None).unwrap();
        run_until(&mut engine, 0.6);

        let held_before = engine
            .sink()
            .started()
            .iter()
            .filter(|s| s.stop_time.is_none())
            .count();
        assert_eq!(held_before, 0);

        engine.set_tempo(3.0).unwrap();
        let held = engine
            .sink()
            .started()
            .iter()
            .filter(|s| s.stop_time.is_none())
            .count();
        assert_eq!(held, 1);

        // The bridge is released once the bridged layer plays again.
        run_until(&mut engine, 3.0);
        let bridge_released = engine.sink().commands().iter().any(|c| {
            matches!(c, SinkCommand::Release { fade, .. } if *fade == crate::voice::LEGATO_FADE_SECONDS)
        });
        assert!(bridge_released);
    }

    #[test]
    fn test_legato_voices_never_overlap_per_layer() {
        let mut config = EngineConfig::default();
        config.voice.legato = true;
        let mut engine = engine_with(config);
        engine.start(None).unwrap();

        // Sample the timeline while running; at most one voice per layer.
        let mut t = 0.0;
        while t < 4.0 {
            t += 0.03;
            engine.sink_mut().advance_to(t);
            engine.poll();
            for offset in [0.0, 0.01, 0.02] {
                assert!(engine.sink().sounding_any_at(t + offset) <= 2);
            }
            assert!(engine.active_voice_count() <= 2);
        }
        assert!(engine.sink().started().iter().all(|s| s.stop_time.is_none()));

        engine.set_legato(false).unwrap();
        assert_eq!(engine.active_voice_count(), 0);
    }

    #[test]
    fn test_start_at_phase_offset() {
        let mut engine = engine();
        let rx = engine.subscribe();
        engine.start(Some(500.0)).unwrap();

        let notes = triggered(&rx);
        // Layer B's second note has space 1: ratio 3.
        assert_eq!(notes, vec![(1, 480, 3.0)]);
        assert!(engine.current_phase() >= 0.25);
    }

    #[test]
    fn test_toggle_and_notifications() {
        let mut engine = engine();
        let rx = engine.subscribe();
        engine.toggle().unwrap();
        assert!(engine.is_playing());
        engine.set_tempo_multiplier(2.0).unwrap();
        engine.toggle().unwrap();
        assert!(!engine.is_playing());

        let kinds: Vec<&str> = rx
            .try_iter()
            .map(|e| e.kind())
            .filter(|k| *k != "note-triggered")
            .collect();
        assert_eq!(kinds, vec!["started", "tempo-changed", "stopped"]);
        assert!(matches!(engine.set_tempo_multiplier(0.0), Err(Error::InvalidTempo(_))));
    }

    #[test]
    fn test_fundamental_change_retunes_rows() {
        let mut engine = engine();
        engine.set_fundamental_frequency(220.0).unwrap();
        assert!((engine.notes()[0][1].frequency - 330.0).abs() < 1e-9);
        assert!(matches!(
            engine.set_fundamental_frequency(0.0),
            Err(Error::InvalidFrequency(_))
        ));
    }

    #[test]
    fn test_empty_rhythm_update_stops_playback() {
        let mut engine = engine();
        engine.start(None).unwrap();
        engine.set_rhythm_data(RhythmData::default()).unwrap();
        assert!(!engine.is_playing());
        assert!(engine.event_table().is_empty());

        engine.reload_rhythm().unwrap();
        assert_eq!(engine.event_table().len(), 7);
    }
}
