//! Timing primitives for transport and scheduling.
//!
//! - [`TransportClock`] - maps audio-clock seconds to absolute ticks and back
//!
//! All phase arithmetic happens in integer ticks so that cycle lengths never
//! drift. Seconds only appear at the boundary to the audio subsystem.

/// Default scheduler resolution.
pub const DEFAULT_TICKS_PER_SECOND: u32 = 960;

/// Float noise allowance when flooring elapsed ticks.
const TICK_EPSILON: f64 = 1e-6;

/// Transport-aware clock for converting between audio time and ticks.
///
/// The clock keeps an anchor point (an absolute tick at a specific audio
/// time) and a tick rate. Changing the rate re-anchors at "now" so the
/// position within the cycle carries over.
#[derive(Clone, Debug)]
pub struct TransportClock {
    ticks_per_second: u32,
    tempo_multiplier: f64,
    cycle_ticks: u64,
    start_time: f64,
    start_tick: u64,
    seconds_per_tick: f64,
}

impl TransportClock {
    /// Create a clock anchored at time 0, tick 0.
    pub fn new(ticks_per_second: u32, cycle_ticks: u64) -> Self {
        let ticks_per_second = ticks_per_second.max(1);
        Self {
            ticks_per_second,
            tempo_multiplier: 1.0,
            cycle_ticks: cycle_ticks.max(1),
            start_time: 0.0,
            start_tick: 0,
            seconds_per_tick: 1.0 / ticks_per_second as f64,
        }
    }

    /// Anchor `tick` at audio time `now`.
    pub fn anchor(&mut self, now: f64, tick: u64) {
        self.start_time = now;
        self.start_tick = tick;
    }

    /// Absolute tick at audio time `t`.
    ///
    /// Times before the anchor are treated as the anchor time.
    pub fn time_to_abs_tick(&self, t: f64) -> u64 {
        let elapsed = (t - self.start_time).max(0.0);
        let ticks = elapsed * self.ticks_per_second as f64 * self.tempo_multiplier;
        self.start_tick + (ticks + TICK_EPSILON).floor() as u64
    }

    /// Audio time of an absolute tick.
    pub fn abs_tick_to_time(&self, tick: u64) -> f64 {
        let delta = tick as f64 - self.start_tick as f64;
        self.start_time + delta * self.seconds_per_tick
    }

    /// Fractional position within the cycle at audio time `t`, in `[0, 1)`.
    pub fn phase_at(&self, t: f64) -> f64 {
        let tick = self.time_to_abs_tick(t);
        (tick % self.cycle_ticks) as f64 / self.cycle_ticks as f64
    }

    /// Re-anchor at `now` with new cycle length and tempo multiplier,
    /// preserving the position within the cycle.
    ///
    /// Returns the phase that was carried over.
    pub fn reanchor(&mut self, now: f64, cycle_ticks: u64, tempo_multiplier: f64) -> f64 {
        let phase = self.phase_at(now);
        let cycle_ticks = cycle_ticks.max(1);

        self.cycle_ticks = cycle_ticks;
        self.set_multiplier(tempo_multiplier);
        self.start_tick = ((phase * cycle_ticks as f64).round() as u64) % cycle_ticks;
        self.start_time = now;

        log::debug!(
            "Transport re-anchored: phase={:.4} cycle_ticks={} multiplier={:.3} start_tick={}",
            phase,
            cycle_ticks,
            self.tempo_multiplier,
            self.start_tick
        );

        phase
    }

    /// Set the cycle length without re-anchoring (stopped transport only).
    pub fn set_cycle_ticks(&mut self, cycle_ticks: u64) {
        self.cycle_ticks = cycle_ticks.max(1);
    }

    /// Set the tempo multiplier without re-anchoring (stopped transport only).
    pub fn set_multiplier(&mut self, tempo_multiplier: f64) {
        self.tempo_multiplier = tempo_multiplier;
        self.seconds_per_tick = 1.0 / (self.ticks_per_second as f64 * tempo_multiplier);
    }

    /// Ticks corresponding to a millisecond offset at the current rate.
    pub fn ticks_for_millis(&self, millis: f64) -> u64 {
        let ticks = millis / 1000.0 * self.ticks_per_second as f64 * self.tempo_multiplier;
        ticks.max(0.0).round() as u64
    }

    /// Duration in seconds of a tick span.
    pub fn ticks_to_seconds(&self, ticks: u64) -> f64 {
        ticks as f64 * self.seconds_per_tick
    }

    pub fn ticks_per_second(&self) -> u32 {
        self.ticks_per_second
    }

    pub fn tempo_multiplier(&self) -> f64 {
        self.tempo_multiplier
    }

    pub fn cycle_ticks(&self) -> u64 {
        self.cycle_ticks
    }

    pub fn seconds_per_tick(&self) -> f64 {
        self.seconds_per_tick
    }

    /// Anchor tick.
    pub fn start_tick(&self) -> u64 {
        self.start_tick
    }

    /// Anchor time.
    pub fn start_time(&self) -> f64 {
        self.start_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_time_conversion() {
        let mut clock = TransportClock::new(960, 1920);
        clock.anchor(10.0, 0);
        assert_eq!(clock.time_to_abs_tick(10.0), 0);
        assert_eq!(clock.time_to_abs_tick(11.0), 960);
        assert_eq!(clock.time_to_abs_tick(10.0015), 1);
        assert!((clock.abs_tick_to_time(480) - 10.5).abs() < 1e-12);
    }

    #[test]
    fn test_roundtrip_is_exact_for_many_ticks() {
        let mut clock = TransportClock::new(960, 1920);
        clock.anchor(3.25, 100);
        clock.set_multiplier(1.37);
        for tick in (100..2_000_000).step_by(7919) {
            let t = clock.abs_tick_to_time(tick);
            assert_eq!(clock.time_to_abs_tick(t), tick, "tick {tick}");
        }
    }

    #[test]
    fn test_times_before_anchor_clamp() {
        let mut clock = TransportClock::new(960, 1920);
        clock.anchor(5.0, 42);
        assert_eq!(clock.time_to_abs_tick(1.0), 42);
    }

    #[test]
    fn test_tempo_multiplier_scales_rate() {
        let mut clock = TransportClock::new(960, 1920);
        clock.set_multiplier(2.0);
        assert_eq!(clock.time_to_abs_tick(1.0), 1920);
        assert!((clock.seconds_per_tick() - 1.0 / 1920.0).abs() < 1e-15);
        assert!((clock.ticks_to_seconds(960) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_reanchor_preserves_phase() {
        let mut clock = TransportClock::new(960, 1920);
        // 1.5 s into a 2 s cycle: phase 0.75
        let phase = clock.reanchor(1.5, 960, 1.0);
        assert!((phase - 0.75).abs() < 1e-12);
        assert_eq!(clock.start_tick(), 720);
        assert_eq!(clock.start_time(), 1.5);
        assert!((clock.phase_at(1.5) - 0.75).abs() < 1.0 / 960.0);
    }

    #[test]
    fn test_reanchor_wraps_full_phase() {
        let mut clock = TransportClock::new(960, 1000);
        clock.anchor(0.0, 999);
        let phase = clock.reanchor(0.0, 3, 1.0);
        assert!((phase - 0.999).abs() < 1e-12);
        // round(0.999 * 3) = 3, wraps to 0
        assert_eq!(clock.start_tick(), 0);
    }

    #[test]
    fn test_phase_continuity_across_many_changes() {
        let mut clock = TransportClock::new(960, 1920);
        let mut now = 0.0;
        for (i, cycle) in [1920u64, 777, 4001, 13, 960, 2500].iter().enumerate() {
            now += 0.173 * (i + 1) as f64;
            let before = clock.phase_at(now);
            clock.reanchor(now, *cycle, 1.0 + i as f64 * 0.25);
            let after = clock.phase_at(now);
            let diff = (before - after).abs();
            let wrapped = diff.min(1.0 - diff);
            assert!(wrapped <= 1.0 / *cycle as f64, "jump {wrapped} on change {i}");
        }
    }

    #[test]
    fn test_ticks_for_millis() {
        let clock = TransportClock::new(960, 1920);
        assert_eq!(clock.ticks_for_millis(500.0), 480);
        assert_eq!(clock.ticks_for_millis(-3.0), 0);
    }
}
