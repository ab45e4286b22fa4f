//! Tick-indexed event table for one full cycle.
//!
//! Each active layer spreads its notes evenly across the cycle. The table is
//! cheap to build and is rebuilt wholesale whenever the cycle duration or the
//! rhythm data changes. The scheduler replicates each event across cycles by
//! adding multiples of [`EventTable::cycle_ticks`].

use crate::tone_row::ToneRows;
use crate::MAX_LAYERS;

/// Convert a cycle duration into whole ticks (at least one).
pub fn cycle_ticks_for(cycle_duration_seconds: f64, ticks_per_second: u32) -> u64 {
    let ticks = (cycle_duration_seconds * ticks_per_second as f64).round();
    if ticks.is_finite() && ticks >= 1.0 {
        ticks as u64
    } else {
        1
    }
}

/// One note occurrence within a single cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduledEvent {
    /// Layer this event belongs to (0..4).
    pub layer: usize,
    /// Index into the layer's tone row.
    pub note_index: usize,
    /// Offset within the cycle, `0..cycle_ticks`.
    pub start_tick: u64,
    /// Length in ticks, at least 1.
    pub duration_ticks: u64,
}

impl ScheduledEvent {
    /// First absolute occurrence of this event at or after `from_tick`.
    pub fn first_occurrence_from(&self, from_tick: u64, cycle_ticks: u64) -> u64 {
        if from_tick <= self.start_tick {
            return self.start_tick;
        }
        let cycles = (from_tick - self.start_tick).div_ceil(cycle_ticks);
        self.start_tick + cycles * cycle_ticks
    }
}

/// Per-layer event lists for one cycle.
#[derive(Clone, Debug, Default)]
pub struct EventTable {
    cycle_ticks: u64,
    layers: [Vec<ScheduledEvent>; MAX_LAYERS],
}

impl EventTable {
    /// Build the table from layer multipliers and tone rows.
    ///
    /// Layers with a multiplier `<= 1` or without notes stay empty.
    pub fn build(
        rhythms: &[u32; MAX_LAYERS],
        rows: &ToneRows,
        cycle_duration_seconds: f64,
        ticks_per_second: u32,
    ) -> Self {
        let cycle_ticks = cycle_ticks_for(cycle_duration_seconds, ticks_per_second);
        let mut layers: [Vec<ScheduledEvent>; MAX_LAYERS] = Default::default();

        for (layer, events) in layers.iter_mut().enumerate() {
            let r = rhythms[layer];
            let notes = &rows[layer];
            if r <= 1 || notes.is_empty() {
                continue;
            }

            let ticks_per_note = cycle_ticks as f64 / r as f64;
            let duration_ticks = (ticks_per_note.round() as u64).max(1);

            *events = (0..notes.len())
                .map(|i| ScheduledEvent {
                    layer,
                    note_index: i,
                    start_tick: ((i as f64 * ticks_per_note).round() as u64) % cycle_ticks,
                    duration_ticks,
                })
                .collect();
        }

        log::debug!(
            "Built event table: cycle_ticks={} events per layer {:?}",
            cycle_ticks,
            layers.iter().map(|l| l.len()).collect::<Vec<_>>()
        );

        Self { cycle_ticks, layers }
    }

    /// Ticks in one cycle.
    pub fn cycle_ticks(&self) -> u64 {
        self.cycle_ticks
    }

    /// Events of one layer.
    pub fn layer(&self, layer: usize) -> &[ScheduledEvent] {
        self.layers.get(layer).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All events across layers.
    pub fn events(&self) -> impl Iterator<Item = &ScheduledEvent> {
        self.layers.iter().flatten()
    }

    /// Total number of events in one cycle.
    pub fn len(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }

    /// True when no layer has events.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Absolute tick of the layer's next event at or after `from_tick`.
    pub fn next_event_tick(&self, layer: usize, from_tick: u64) -> Option<u64> {
        self.layer(layer)
            .iter()
            .map(|e| e.first_occurrence_from(from_tick, self.cycle_ticks))
            .min()
    }
}
