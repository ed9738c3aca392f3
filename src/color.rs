use std::collections::BTreeMap;

use palette::{Hsl, IntoColor, Srgb};

/// 8-bit sRGB colour handed to chart widgets.
pub type Rgb = Srgb<u8>;

const FALLBACK: Rgb = Srgb::new(128, 128, 128);

// ---------------------------------------------------------------------------
// Color palette generator
// ---------------------------------------------------------------------------

/// Generates `n` visually distinct colours using evenly spaced hues.
pub fn generate_palette(n: usize) -> Vec<Rgb> {
    if n == 0 {
        return Vec::new();
    }
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n as f32) * 360.0;
            let hsl = Hsl::new(hue, 0.75, 0.55);
            let rgb: Srgb = hsl.into_color();
            rgb.into_format::<u8>()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Instrument colours
// ---------------------------------------------------------------------------

/// One colour per instrument, fixed for the lifetime of a dataset load so a
/// series keeps its colour while other instruments are toggled.
#[derive(Debug, Clone, Default)]
pub struct InstrumentPalette {
    mapping: BTreeMap<String, Rgb>,
}

impl InstrumentPalette {
    /// Assign colours in the given (first-seen) order.
    pub fn new(instruments: &[String]) -> Self {
        let mapping = instruments
            .iter()
            .cloned()
            .zip(generate_palette(instruments.len()))
            .collect();
        Self { mapping }
    }

    pub fn color_for(&self, instrument: &str) -> Rgb {
        self.mapping.get(instrument).copied().unwrap_or(FALLBACK)
    }

    /// Colours for a list of series, in the same order.
    pub fn colors_for(&self, instruments: &[String]) -> Vec<Rgb> {
        instruments.iter().map(|i| self.color_for(i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palette_has_distinct_entries() {
        let p = generate_palette(4);
        assert_eq!(p.len(), 4);
        assert_ne!(p[0], p[1]);
        assert!(generate_palette(0).is_empty());
    }

    #[test]
    fn colours_do_not_move_when_a_series_is_dropped() {
        let all = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let palette = InstrumentPalette::new(&all);
        let full = palette.colors_for(&all);
        let partial = palette.colors_for(&["C".to_string()]);
        assert_eq!(partial[0], full[2]);
        assert_eq!(palette.color_for("unknown"), FALLBACK);
    }
}
