//! Rhythm data consumed by the playback core.
//!
//! The composite-rhythm math lives outside this crate. Whatever produces it
//! hands the engine a [`RhythmData`] snapshot through the [`RhythmProvider`]
//! trait:
//!
//! - [`RhythmData`] - flattened spaces plot, per-layer spaces, multipliers, scale
//! - [`AvailableRatio`] - one entry of the scale description
//! - [`RhythmFile`] - TOML representation used by the CLI

use crate::error::{Error, Result};
use crate::MAX_LAYERS;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Reference frequency used when a rhythm file does not specify one.
pub const DEFAULT_REFERENCE_HZ: f64 = 110.0;

/// One ratio of the scale derived from the spaces plot.
#[derive(Clone, Debug, PartialEq)]
pub struct AvailableRatio {
    /// Reduced fraction, e.g. "3/2".
    pub fraction: String,
    /// Frequency ratio relative to the fundamental.
    pub ratio: f64,
    /// Interval size in cents.
    pub cents: f64,
    /// Rounded frequency at the reference pitch.
    pub frequency: u32,
}

/// Snapshot of everything the rhythm generator produced for one rhythm.
#[derive(Clone, Debug, Default)]
pub struct RhythmData {
    /// All layers' spaces, flattened (layer A first, then B, C, D).
    pub spaces_plot: Vec<u32>,
    /// Spaces per layer.
    pub spaces_by_layer: [Vec<u32>; MAX_LAYERS],
    /// Rhythm multiplier per layer (`<= 1` means inactive).
    pub rhythms: [u32; MAX_LAYERS],
    /// Scale description.
    pub available_ratios: Vec<AvailableRatio>,
    /// Which flattened spaces-plot indices belong to each fraction.
    pub ratio_to_spaces_indices: HashMap<String, Vec<usize>>,
}

impl RhythmData {
    /// Assemble rhythm data from per-layer spaces.
    ///
    /// Flattens the layers into the spaces plot and derives the scale: each
    /// distinct space maps to the reduced fraction `max_space / space`.
    pub fn from_layers(
        rhythms: [u32; MAX_LAYERS],
        layers: [Vec<u32>; MAX_LAYERS],
        reference_hz: f64,
    ) -> Result<Self> {
        if !reference_hz.is_finite() || reference_hz <= 0.0 {
            return Err(Error::InvalidFrequency(reference_hz));
        }

        for (layer, spaces) in layers.iter().enumerate() {
            if let Some(index) = spaces.iter().position(|&s| s == 0) {
                return Err(Error::InvalidSpace { layer, index });
            }
        }

        let spaces_plot: Vec<u32> = layers.iter().flatten().copied().collect();
        let fundamental = spaces_plot.iter().copied().max().unwrap_or(0);

        let mut ratio_to_spaces_indices: HashMap<String, Vec<usize>> = HashMap::new();
        let mut available_ratios: Vec<AvailableRatio> = Vec::new();

        for (global_index, &space) in spaces_plot.iter().enumerate() {
            let fraction = reduced_fraction(fundamental, space);
            if !ratio_to_spaces_indices.contains_key(&fraction) {
                let ratio = fundamental as f64 / space as f64;
                available_ratios.push(AvailableRatio {
                    fraction: fraction.clone(),
                    ratio,
                    cents: 1200.0 * ratio.log2(),
                    frequency: (reference_hz * ratio).round() as u32,
                });
            }
            ratio_to_spaces_indices
                .entry(fraction)
                .or_default()
                .push(global_index);
        }

        available_ratios.sort_by(|a, b| a.ratio.total_cmp(&b.ratio));

        Ok(Self {
            spaces_plot,
            spaces_by_layer: layers,
            rhythms,
            available_ratios,
            ratio_to_spaces_indices,
        })
    }

    /// Parse a rhythm file from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: RhythmFile = toml::from_str(content)?;
        file.into_rhythm_data()
    }

    /// Load a rhythm file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// True when no layer has any spaces.
    pub fn is_empty(&self) -> bool {
        self.spaces_by_layer.iter().all(|l| l.is_empty())
    }

    /// Multipliers of layers that can produce events.
    pub fn active_layers(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.rhythms
            .iter()
            .copied()
            .enumerate()
            .filter(|&(layer, r)| r > 1 && !self.spaces_by_layer[layer].is_empty())
    }
}

fn reduced_fraction(numerator: u32, denominator: u32) -> String {
    let g = gcd(numerator, denominator).max(1);
    format!("{}/{}", numerator / g, denominator / g)
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Anything that can supply the engine with rhythm data.
pub trait RhythmProvider {
    /// Produce the current rhythm snapshot.
    fn rhythm_data(&self) -> Result<RhythmData>;
}

impl RhythmProvider for RhythmData {
    fn rhythm_data(&self) -> Result<RhythmData> {
        Ok(self.clone())
    }
}

/// Provider that re-reads a rhythm file on every request.
#[derive(Clone, Debug)]
pub struct FileRhythmProvider {
    path: PathBuf,
}

impl FileRhythmProvider {
    /// Create a provider for the given rhythm file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RhythmProvider for FileRhythmProvider {
    fn rhythm_data(&self) -> Result<RhythmData> {
        RhythmData::load(&self.path)
    }
}

/// On-disk rhythm description.
///
/// ```toml
/// rhythms = [3, 4]
/// layers = [[3, 2, 1], [3, 1, 2, 3]]
/// reference_hz = 110.0
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RhythmFile {
    /// Multiplier per layer, up to four.
    pub rhythms: Vec<u32>,
    /// Spaces per layer, up to four.
    #[serde(default)]
    pub layers: Vec<Vec<u32>>,
    /// Reference pitch for the scale description.
    #[serde(default = "default_reference_hz")]
    pub reference_hz: f64,
}

fn default_reference_hz() -> f64 {
    DEFAULT_REFERENCE_HZ
}

impl RhythmFile {
    /// Convert into rhythm data, padding missing layers as inactive.
    pub fn into_rhythm_data(self) -> Result<RhythmData> {
        if self.rhythms.len() > MAX_LAYERS || self.layers.len() > MAX_LAYERS {
            return Err(Error::InvalidRhythm(format!(
                "at most {} layers are supported (got {} rhythms, {} layers)",
                MAX_LAYERS,
                self.rhythms.len(),
                self.layers.len()
            )));
        }

        let mut rhythms = [0u32; MAX_LAYERS];
        for (slot, r) in rhythms.iter_mut().zip(self.rhythms) {
            *slot = r;
        }

        let mut layers: [Vec<u32>; MAX_LAYERS] = Default::default();
        for (slot, spaces) in layers.iter_mut().zip(self.layers) {
            *slot = spaces;
        }

        RhythmData::from_layers(rhythms, layers, self.reference_hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_against_four() -> RhythmData {
        RhythmData::from_layers(
            [3, 4, 0, 0],
            [vec![3, 2, 1], vec![3, 1, 2, 3], vec![], vec![]],
            DEFAULT_REFERENCE_HZ,
        )
        .unwrap()
    }

    #[test]
    fn test_from_layers_flattens_spaces() {
        let data = three_against_four();
        assert_eq!(data.spaces_plot, vec![3, 2, 1, 3, 1, 2, 3]);
        assert_eq!(data.rhythms, [3, 4, 0, 0]);
    }

    #[test]
    fn test_from_layers_derives_ratio_map() {
        let data = three_against_four();
        assert_eq!(data.ratio_to_spaces_indices["1/1"], vec![0, 3, 6]);
        assert_eq!(data.ratio_to_spaces_indices["3/2"], vec![1, 5]);
        assert_eq!(data.ratio_to_spaces_indices["3/1"], vec![2, 4]);

        let fractions: Vec<&str> = data
            .available_ratios
            .iter()
            .map(|r| r.fraction.as_str())
            .collect();
        assert_eq!(fractions, vec!["1/1", "3/2", "3/1"]);

        let fifth = &data.available_ratios[1];
        assert!((fifth.cents - 701.955).abs() < 0.01);
        assert_eq!(fifth.frequency, 165);
    }

    #[test]
    fn test_from_layers_rejects_zero_space() {
        let err = RhythmData::from_layers(
            [2, 0, 0, 0],
            [vec![2, 0], vec![], vec![], vec![]],
            DEFAULT_REFERENCE_HZ,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidSpace { layer: 0, index: 1 }));
    }

    #[test]
    fn test_empty_rhythm_is_not_an_error() {
        let data =
            RhythmData::from_layers([0; 4], Default::default(), DEFAULT_REFERENCE_HZ).unwrap();
        assert!(data.is_empty());
        assert!(data.available_ratios.is_empty());
        assert_eq!(data.active_layers().count(), 0);
    }

    #[test]
    fn test_rhythm_file_parsing() {
        let data = RhythmData::from_toml_str(
            r#"
            rhythms = [3, 4]
            layers = [[3, 2, 1], [3, 1, 2, 3]]
            "#,
        )
        .unwrap();
        assert_eq!(data.rhythms, [3, 4, 0, 0]);
        assert!(data.spaces_by_layer[2].is_empty());
        let active: Vec<_> = data.active_layers().collect();
        assert_eq!(active, vec![(0, 3), (1, 4)]);
    }

    #[test]
    fn test_rhythm_file_rejects_five_layers() {
        let err = RhythmData::from_toml_str("rhythms = [2, 3, 4, 5, 6]").unwrap_err();
        assert!(matches!(err, Error::InvalidRhythm(_)));
    }

    #[test]
    fn test_gcd_reduction() {
        assert_eq!(reduced_fraction(6, 4), "3/2");
        assert_eq!(reduced_fraction(5, 5), "1/1");
        assert_eq!(gcd(12, 18), 6);
    }

    #[test]
    fn test_demo_rhythms_parse() {
        let demo = RhythmData::from_toml_str(include_str!("../../../demos/three_against_four.toml"))
            .unwrap();
        assert_eq!(demo.rhythms, [3, 4, 0, 0]);

        let demo = RhythmData::from_toml_str(include_str!("../../../demos/four_layers.toml")).unwrap();
        assert_eq!(demo.active_layers().count(), 4);
        assert_eq!(demo.spaces_plot.len(), 17);
    }
}
