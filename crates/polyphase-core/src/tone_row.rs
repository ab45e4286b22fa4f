//! Tone rows: per-layer note descriptors derived from space values.
//!
//! Every space becomes a pitch. The longest space in the whole plot is the
//! global fundamental, and a space `s` sounds at `fundamental_hz * max / s`.

use crate::error::{Error, Result};
use crate::MAX_LAYERS;

/// One note of a layer's tone row.
///
/// Immutable once generated. Whether the note is audible right now is decided
/// by [`crate::filter`] at dispatch time, never stored here.
#[derive(Clone, Debug, PartialEq)]
pub struct NoteDescriptor {
    /// Position within the layer's spaces.
    pub layer_space_index: usize,
    /// Position within the flattened spaces plot.
    pub global_index: usize,
    /// The space value this note came from.
    pub space: u32,
    /// Frequency relative to the fundamental.
    pub ratio: f64,
    /// Absolute frequency in Hz.
    pub frequency: f64,
    /// Above the audible ceiling.
    pub muted_by_frequency: bool,
}

/// Per-layer tone rows.
pub type ToneRows = [Vec<NoteDescriptor>; MAX_LAYERS];

/// Generate the tone rows for all layers.
///
/// `spaces_plot` feeds the global fundamental and must not contain zeros.
/// The global index of each note is its offset in the flattened layer order.
/// An empty input yields empty rows.
pub fn generate_tone_rows(
    spaces_plot: &[u32],
    spaces_by_layer: &[Vec<u32>; MAX_LAYERS],
    fundamental_hz: f64,
    max_frequency_hz: f64,
) -> Result<ToneRows> {
    if let Some(index) = spaces_plot.iter().position(|&s| s == 0) {
        return Err(Error::InvalidPlotSpace { index });
    }
    for (layer, spaces) in spaces_by_layer.iter().enumerate() {
        if let Some(index) = spaces.iter().position(|&s| s == 0) {
            return Err(Error::InvalidSpace { layer, index });
        }
    }

    let global_fundamental = spaces_plot
        .iter()
        .chain(spaces_by_layer.iter().flatten())
        .copied()
        .max()
        .unwrap_or(0);

    let mut rows: ToneRows = Default::default();
    if global_fundamental == 0 {
        return Ok(rows);
    }

    let mut offset = 0;
    for (layer, spaces) in spaces_by_layer.iter().enumerate() {
        rows[layer] = spaces
            .iter()
            .enumerate()
            .map(|(i, &space)| {
                let ratio = global_fundamental as f64 / space as f64;
                let frequency = fundamental_hz * ratio;
                NoteDescriptor {
                    layer_space_index: i,
                    global_index: offset + i,
                    space,
                    ratio,
                    frequency,
                    muted_by_frequency: frequency > max_frequency_hz,
                }
            })
            .collect();
        offset += spaces.len();
    }

    log::debug!(
        "Generated tone rows: fundamental space {}, notes per layer {:?}",
        global_fundamental,
        rows.iter().map(|r| r.len()).collect::<Vec<_>>()
    );

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layers() -> [Vec<u32>; MAX_LAYERS] {
        [vec![3, 2, 1], vec![3, 1, 2, 3], vec![], vec![]]
    }

    #[test]
    fn test_ratios_relative_to_longest_space() {
        let plot = [3, 2, 1, 3, 1, 2, 3];
        let rows = generate_tone_rows(&plot, &layers(), 100.0, 10_000.0).unwrap();

        let ratios: Vec<f64> = rows[0].iter().map(|n| n.ratio).collect();
        assert_eq!(ratios, vec![1.0, 1.5, 3.0]);
        assert!((rows[0][1].frequency - 150.0).abs() < 1e-9);
        assert!((rows[1][1].frequency - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_global_index_follows_flattened_order() {
        let plot = [3, 2, 1, 3, 1, 2, 3];
        let rows = generate_tone_rows(&plot, &layers(), 100.0, 10_000.0).unwrap();

        let layer_b: Vec<usize> = rows[1].iter().map(|n| n.global_index).collect();
        assert_eq!(layer_b, vec![3, 4, 5, 6]);
        assert_eq!(rows[1][2].layer_space_index, 2);
    }

    #[test]
    fn test_frequency_ceiling_marks_notes() {
        let plot = [3, 2, 1, 3, 1, 2, 3];
        let rows = generate_tone_rows(&plot, &layers(), 100.0, 200.0).unwrap();

        let muted: Vec<bool> = rows[0].iter().map(|n| n.muted_by_frequency).collect();
        assert_eq!(muted, vec![false, false, true]);
    }

    #[test]
    fn test_zero_space_is_an_error() {
        let mut spaces = layers();
        spaces[3] = vec![4, 0];
        let err = generate_tone_rows(&[4], &spaces, 100.0, 1000.0).unwrap_err();
        assert!(matches!(err, Error::InvalidSpace { layer: 3, index: 1 }));
    }

    #[test]
    fn test_zero_in_spaces_plot_is_an_error() {
        let mut spaces: [Vec<u32>; MAX_LAYERS] = Default::default();
        spaces[0] = vec![3, 2];
        let err = generate_tone_rows(&[3, 0, 2], &spaces, 100.0, 1000.0).unwrap_err();
        assert!(matches!(err, Error::InvalidPlotSpace { index: 1 }));
    }

    #[test]
    fn test_empty_plot_yields_no_notes() {
        let rows = generate_tone_rows(&[], &Default::default(), 100.0, 1000.0).unwrap();
        assert!(rows.iter().all(|r| r.is_empty()));
    }
}
