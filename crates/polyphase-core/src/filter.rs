//! Mute and selection filter.
//!
//! Audibility is decided at dispatch time from live solo, mute and selection
//! state. Nothing here is cached in the event table, so toggling a ratio
//! while playing affects the next occurrence and nothing earlier.

use crate::error::{Error, Result};
use crate::tone_row::NoteDescriptor;
use crate::MAX_LAYERS;
use std::collections::{HashMap, HashSet};

/// Absolute lower bound for a cycle duration.
pub const MIN_CYCLE_FLOOR_SECONDS: f64 = 0.05;

/// Shortest pulse allowed on the fastest audible layer.
pub const MIN_PULSE_SECONDS: f64 = 0.01;

/// Reverse lookup from a global spaces-plot index to the fraction owning it.
#[derive(Clone, Debug, Default)]
pub struct RatioIndex {
    by_global_index: HashMap<usize, String>,
    fractions: HashSet<String>,
}

impl RatioIndex {
    /// Build from the provider's `fraction -> global indices` map.
    pub fn new(ratio_to_spaces_indices: &HashMap<String, Vec<usize>>) -> Self {
        let by_global_index = ratio_to_spaces_indices
            .iter()
            .flat_map(|(fraction, indices)| indices.iter().map(move |&i| (i, fraction.clone())))
            .collect();
        Self {
            by_global_index,
            fractions: ratio_to_spaces_indices.keys().cloned().collect(),
        }
    }

    /// Fraction owning a global index.
    pub fn fraction_for(&self, global_index: usize) -> Option<&str> {
        self.by_global_index.get(&global_index).map(String::as_str)
    }

    /// Number of distinct fractions.
    pub fn fraction_count(&self) -> usize {
        self.fractions.len()
    }

    /// True when every fraction of the scale is in `selection`.
    pub fn covered_by(&self, selection: &HashSet<String>) -> bool {
        self.fractions.iter().all(|f| selection.contains(f))
    }
}

/// Decide whether a note should sound.
///
/// An empty `selected_ratios` set means every ratio is audible. With a
/// non-empty selection, a note whose global index no fraction owns is silent.
pub fn is_audible(
    note: &NoteDescriptor,
    layer: usize,
    solo_layer: Option<usize>,
    muted_layers: &[bool; MAX_LAYERS],
    selected_ratios: &HashSet<String>,
    ratio_index: &RatioIndex,
) -> bool {
    if note.muted_by_frequency {
        return false;
    }

    if solo_layer.is_some_and(|solo| solo != layer) {
        return false;
    }

    if muted_layers.get(layer).copied().unwrap_or(true) {
        return false;
    }

    if selected_ratios.is_empty() {
        return true;
    }

    ratio_index
        .fraction_for(note.global_index)
        .is_some_and(|fraction| selected_ratios.contains(fraction))
}

/// Live solo, mute and selection state.
#[derive(Clone, Debug, Default)]
pub struct Audibility {
    pub solo_layer: Option<usize>,
    pub muted_layers: [bool; MAX_LAYERS],
    pub selected_ratios: HashSet<String>,
}

impl Audibility {
    /// Check a note against the current state.
    pub fn allows(&self, note: &NoteDescriptor, layer: usize, ratio_index: &RatioIndex) -> bool {
        is_audible(
            note,
            layer,
            self.solo_layer,
            &self.muted_layers,
            &self.selected_ratios,
            ratio_index,
        )
    }

    /// Solo a layer, or clear the solo with `None`.
    pub fn set_solo(&mut self, layer: Option<usize>) -> Result<()> {
        if let Some(layer) = layer {
            check_layer(layer)?;
        }
        self.solo_layer = layer;
        Ok(())
    }

    /// Mute or unmute a layer.
    pub fn set_mute(&mut self, layer: usize, muted: bool) -> Result<()> {
        check_layer(layer)?;
        self.muted_layers[layer] = muted;
        Ok(())
    }

    /// True when the layer is not excluded by solo or mute.
    pub fn layer_enabled(&self, layer: usize) -> bool {
        let soloed_out = self.solo_layer.is_some_and(|solo| solo != layer);
        !soloed_out && !self.muted_layers.get(layer).copied().unwrap_or(true)
    }

    /// True when the selection leaves at least one available ratio out.
    pub fn selection_restricts(&self, ratio_index: &RatioIndex) -> bool {
        !self.selected_ratios.is_empty() && !ratio_index.covered_by(&self.selected_ratios)
    }
}

fn check_layer(layer: usize) -> Result<()> {
    if layer >= MAX_LAYERS {
        return Err(Error::InvalidLayer(layer));
    }
    Ok(())
}

/// Shortest cycle duration that keeps every audible pulse playable.
///
/// With part of the scale deselected the floor applies regardless of the
/// multipliers. Otherwise the fastest audible layer needs
/// [`MIN_PULSE_SECONDS`] per pulse.
pub fn safe_minimum_cycle_duration(
    rhythms: &[u32; MAX_LAYERS],
    audibility: &Audibility,
    ratio_index: &RatioIndex,
) -> f64 {
    if audibility.selection_restricts(ratio_index) {
        return MIN_CYCLE_FLOOR_SECONDS;
    }

    let fastest = rhythms
        .iter()
        .enumerate()
        .filter(|&(layer, &r)| r > 1 && audibility.layer_enabled(layer))
        .map(|(_, &r)| r)
        .max()
        .unwrap_or(0);

    (fastest as f64 * MIN_PULSE_SECONDS).max(MIN_CYCLE_FLOOR_SECONDS)
}
