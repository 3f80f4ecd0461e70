//! Five-piece drum kit on a 500×500 pad map.
//!
//! The heading picks the column and the swing height the row, like the keyboard. The pad
//! under that point is hit; off the pads, the nearest one is. Drums play at native speed.

use std::path::Path;

use kinetic_core::prelude::*;

use crate::error::{Error, Result};
use crate::instrument::{ControlInput, Instrument, SampleDriven};
use crate::kinetic::KineticState;
use crate::layout::{pick, Rect};
use crate::sampler::{Sampler, SamplerSample};

pub const DRUM_NATIVE_FREQUENCY: Frequency = 200.0;
pub const BG_WIDTH: f64 = 500.0;
pub const BG_HEIGHT: f64 = 500.0;
const BG_GEO_HEMI_RANGE: f64 = 90.0;

/// Pad name (also the sample file stem) and its hit rect.
pub const DRUM_PADS: [(&str, Rect); 5] = [
    ("hihat_open", Rect::new(0.0, 0.0, 250.0, 300.0)),
    ("ride", Rect::new(250.0, 0.0, 500.0, 300.0)),
    ("snare", Rect::new(0.0, 150.0, 150.0, 500.0)),
    ("kick", Rect::new(150.0, 150.0, 330.0, 500.0)),
    ("floor_tom", Rect::new(330.0, 150.0, 500.0, 500.0)),
];

#[derive(Clone, Debug, PartialEq)]
pub struct Drum {
    pub sample_index: usize,
    pub rect: Rect,
}

#[derive(Clone, Debug, Default)]
pub struct DrumKitInstrument {
    kinetic: KineticState,
    sampler: Sampler,
    drums: Vec<Drum>,
    rects: Vec<Rect>,
    last_hit: Option<usize>,
}

impl DrumKitInstrument {
    /// An empty kit; add pads with [`load_drum`](Self::load_drum).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_drum(&mut self, sample: SamplerSample, rect: Rect) -> usize {
        let sample_index = self.sampler.add_sample(sample);
        self.drums.push(Drum { sample_index, rect });
        self.rects.push(rect);
        self.drums.len() - 1
    }

    /// Load `<pad>.wav` (or `<pad>.pcm`) for every pad from `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut kit = Self::new();
        for (pad, rect) in DRUM_PADS {
            let wav = dir.join(format!("{pad}.wav"));
            let path = if wav.exists() { wav } else { dir.join(format!("{pad}.pcm")) };
            kit.load_drum(SamplerSample::load(&path, DRUM_NATIVE_FREQUENCY, 1.0)?, rect);
        }
        Ok(kit)
    }

    /// A kit of short synthesized hits, for when no recorded samples are at hand.
    pub fn synthesized(sample_rate: Frequency) -> Result<Self> {
        let mut kit = Self::new();
        for (pad, rect) in DRUM_PADS {
            let hit = synth_hit(pad, sample_rate).ok_or_else(|| Error::EmptySample(pad.to_string()))?;
            kit.load_drum(SamplerSample::from_interleaved(pad, hit, DRUM_NATIVE_FREQUENCY, 1.0)?, rect);
        }
        Ok(kit)
    }

    #[inline] pub fn drums(&self) -> &[Drum] { &self.drums }
    #[inline] pub fn last_hit_drum(&self) -> Option<usize> { self.last_hit }
    #[inline] pub fn sampler(&self) -> &Sampler { &self.sampler }

    pub fn drum_at(&self, x: f64, y: f64) -> Option<usize> {
        pick(&self.rects, x, y)
    }
}

impl Instrument for DrumKitInstrument {
    fn name(&self) -> &str {
        "drums"
    }

    fn unnormalize_frequency(&self, _norm_freq: f64) -> Frequency {
        DRUM_NATIVE_FREQUENCY
    }

    fn add_beat(&mut self, norm_freq: f64, volume: Volume) {
        let geo = self.kinetic.input().geo_angle;
        let geo_input = 1.0 - clamp01((geo + BG_GEO_HEMI_RANGE) / (2.0 * BG_GEO_HEMI_RANGE));
        let x_axis_input = 1.0 - norm_freq;

        self.last_hit = self.drum_at(geo_input * BG_WIDTH, x_axis_input * BG_HEIGHT);
        if let Some(drum) = self.last_hit {
            let index = self.drums[drum].sample_index;
            let native_volume = self.sampler.sample(index).native_volume;
            self.sampler.add_beat(self.unnormalize_frequency(0.0), volume / native_volume, index);
        }
    }

    fn update_input(&mut self, input: &ControlInput) {
        self.kinetic.update_input(input);
    }

    fn on_gain_focus(&mut self) {
        self.kinetic.gain_focus();
    }

    fn on_lose_focus(&mut self) {
        self.kinetic.lose_focus();
    }

    fn generate_sample(&mut self) -> StereoSample {
        self.sampler.generate_sample()
    }
}

impl SampleDriven for DrumKitInstrument {
    fn samples(&self) -> &[SamplerSample] {
        self.sampler.samples()
    }

    fn add_sample(&mut self, sample: SamplerSample) -> usize {
        self.sampler.add_sample(sample)
    }
}

/// Interleaved stereo hit for a pad name: decaying sines (with a pitch drop for the
/// shells) plus noise for the metal and the snare wires.
fn synth_hit(pad: &str, sample_rate: Frequency) -> Option<Vec<Sample>> {
    // (duration, decay, start Hz, end Hz, tone level, noise level)
    let (duration, decay, f0, f1, tone, noise) = match pad {
        "kick" => (0.35, 0.12, 120.0, 45.0, 0.9, 0.0),
        "snare" => (0.25, 0.06, 190.0, 180.0, 0.4, 0.6),
        "hihat_open" => (0.4, 0.15, 0.0, 0.0, 0.0, 0.5),
        "ride" => (1.0, 0.4, 520.0, 520.0, 0.3, 0.2),
        "floor_tom" => (0.5, 0.2, 90.0, 70.0, 0.8, 0.05),
        _ => return None,
    };

    let frames = (duration * sample_rate) as usize;
    let mut body = WaveSource::new(WaveType::Sine, sample_rate);
    let mut hiss = WaveSource::new(WaveType::Noise, sample_rate);
    hiss.set_frequency(sample_rate * 0.5);

    let mut out = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        let t = i as f64 / sample_rate;
        body.set_frequency(lerp(f0, f1, t / duration));
        let env = (-t / decay).exp();
        let x = (body.update() * tone + hiss.update() * noise) * env;
        out.extend_from_slice(&[x, x]);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use more_asserts::assert_gt;

    fn kit() -> DrumKitInstrument {
        DrumKitInstrument::synthesized(DEFAULT_SAMPLE_RATE).expect("synth kit")
    }

    #[test]
    fn synthesized_kit_has_every_pad() {
        let k = kit();
        assert_eq!(k.drums().len(), DRUM_PADS.len());
        assert_eq!(k.samples().len(), DRUM_PADS.len());
        assert!(k.samples().iter().all(|s| s.frames() > 1000));
        assert!(synth_hit("cowbell", DEFAULT_SAMPLE_RATE).is_none());
    }

    #[test]
    fn low_centre_swing_hits_the_kick() {
        let mut k = kit();
        k.add_beat(0.2, 4.0);
        // (250, 400): inside the kick pad only
        assert_eq!(k.last_hit_drum(), Some(3));
        let peak = (0..2000).map(|_| k.generate_sample().max_abs()).fold(0.0, f64::max);
        assert_gt!(peak, 0.1);
    }

    #[test]
    fn overlapping_pads_pick_the_nearest_centre() {
        let k = kit();
        // hihat (0..250, 0..300) and snare (0..150, 150..500) overlap; (50, 280) is closer to the snare
        assert_eq!(k.drum_at(50.0, 280.0), Some(2));
        assert_eq!(k.drum_at(50.0, 160.0), Some(0));
    }

    #[test]
    fn heading_moves_across_the_kit() {
        let mut k = kit();
        k.update_input(&ControlInput { geo_angle: -80.0, ..Default::default() });
        k.add_beat(0.9, 4.0);
        assert_eq!(k.last_hit_drum(), Some(1));
    }

    #[test]
    fn drums_play_at_native_speed() {
        let mut k = kit();
        k.add_beat(0.5, 2.0);
        assert_eq!(k.sampler().beats().get(0).speed_multiplier, 1.0);
    }
}
