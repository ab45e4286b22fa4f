//! Tick-based lookahead scheduler.
//!
//! The scheduler collects event occurrences that fall inside the tick window
//! about to elapse and hands them back for dispatch. Windows are derived from
//! the live transport clock every poll, so a late poll compresses timing but
//! never desynchronises.

use crate::event_table::EventTable;
use crate::timing::TransportClock;
use std::collections::BTreeMap;

/// Occurrences of a single event considered per window.
const MAX_OCCURRENCES_PER_EVENT: usize = 2048;

/// One occurrence of a table event at an absolute tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DueEvent {
    pub layer: usize,
    pub note_index: usize,
    pub abs_tick: u64,
    pub duration_ticks: u64,
}

/// Lookahead scheduler state.
///
/// Only tracks the end of the last scheduled window. The tick never regresses
/// while running, which is what makes each occurrence dispatch exactly once.
#[derive(Debug, Default)]
pub struct LookaheadScheduler {
    last_scheduled_tick: u64,
}

impl LookaheadScheduler {
    /// Create a scheduler starting at tick 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart scheduling from `tick`.
    ///
    /// Call this on start, stop and transport re-anchoring.
    pub fn reset_to_tick(&mut self, tick: u64) {
        self.last_scheduled_tick = tick;
    }

    /// First tick of the next window.
    pub fn last_scheduled_tick(&self) -> u64 {
        self.last_scheduled_tick
    }

    /// Collect every occurrence due before `now + lookahead_seconds`.
    ///
    /// # Returns
    /// Occurrences grouped by absolute tick, ascending; within a tick, by layer.
    pub fn collect_due_events(
        &mut self,
        clock: &TransportClock,
        now: f64,
        table: &EventTable,
        lookahead_seconds: f64,
    ) -> Vec<(u64, Vec<DueEvent>)> {
        let window_end = clock.time_to_abs_tick(now + lookahead_seconds);
        self.collect_until(table, window_end)
    }

    /// Collect the window `[last_scheduled_tick, window_end)` and advance.
    ///
    /// A `window_end` at or before the last scheduled tick yields nothing and
    /// leaves the scheduler untouched.
    pub fn collect_until(&mut self, table: &EventTable, window_end: u64) -> Vec<(u64, Vec<DueEvent>)> {
        let window_start = self.last_scheduled_tick;
        if window_end <= window_start {
            return Vec::new();
        }

        let due = collect_window(table, window_start, window_end);
        self.last_scheduled_tick = window_end;

        if !due.is_empty() {
            log::trace!(
                "Scheduled window [{}, {}): {} ticks with events",
                window_start,
                window_end,
                due.len()
            );
        }

        due
    }
}

/// All occurrences in `[start, end)`, grouped by absolute tick.
pub fn collect_window(table: &EventTable, start: u64, end: u64) -> Vec<(u64, Vec<DueEvent>)> {
    let cycle_ticks = table.cycle_ticks().max(1);
    let mut by_tick: BTreeMap<u64, Vec<DueEvent>> = BTreeMap::new();

    for event in table.events() {
        let mut abs_tick = event.first_occurrence_from(start, cycle_ticks);
        let mut count = 0;
        while abs_tick < end {
            if count == MAX_OCCURRENCES_PER_EVENT {
                log::warn!(
                    "Window [{}, {}) truncated for layer {} note {}",
                    start,
                    end,
                    event.layer,
                    event.note_index
                );
                break;
            }
            by_tick.entry(abs_tick).or_default().push(DueEvent {
                layer: event.layer,
                note_index: event.note_index,
                abs_tick,
                duration_ticks: event.duration_ticks,
            });
            abs_tick += cycle_ticks;
            count += 1;
        }
    }

    for events in by_tick.values_mut() {
        events.sort_by_key(|e| (e.layer, e.note_index));
    }

    by_tick.into_iter().collect()
}
