//! Sample playback voices.
//!
//! A [`Sampler`] owns the loaded [`SamplerSample`]s and a small ring of beat records, each
//! a [`WaveSource`] in stereo-sample mode. A beat plays its sample once, sped up or slowed
//! down by `target frequency / native frequency`, and then goes quiet. When the ring is full,
//! a new beat overwrites the oldest.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use kinetic_core::dsp::convert_i16_to_samples;
use kinetic_core::prelude::*;
use log::debug;

use crate::error::{Error, Result};
use crate::instrument::{Instrument, SampleDriven};

/// Max simultaneously sounding beats.
pub const MAX_BEATS: usize = 6;
pub const DEFAULT_SAMPLE_NATIVE_FREQUENCY: Frequency = 440.0;

/// Interleaved stereo PCM plus the pitch and level it was recorded at.
#[derive(Clone, Debug)]
pub struct SamplerSample {
    pub name: String,
    buffer: Arc<[Sample]>,
    offset: usize,
    len: usize,
    pub native_frequency: Frequency,
    pub native_volume: Volume,
}

impl SamplerSample {
    pub fn from_interleaved(
        name: impl Into<String>,
        mut buffer: Vec<Sample>,
        native_frequency: Frequency,
        native_volume: Volume,
    ) -> Result<Self> {
        let name = name.into();
        buffer.truncate(buffer.len() & !1);
        if buffer.is_empty() {
            return Err(Error::EmptySample(name));
        }
        let len = buffer.len();
        Ok(Self { name, buffer: buffer.into(), offset: 0, len, native_frequency, native_volume })
    }

    /// Raw little-endian 16-bit interleaved stereo.
    pub fn from_pcm_bytes(
        name: impl Into<String>,
        bytes: &[u8],
        native_frequency: Frequency,
        native_volume: Volume,
    ) -> Result<Self> {
        let pcm: Vec<i16> = bytes.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect();
        Self::from_interleaved(name, convert_i16_to_samples(&pcm), native_frequency, native_volume)
    }

    /// Load a `.wav` (16-bit int or 32-bit float, stereo) or raw `.pcm` file.
    pub fn load(path: impl AsRef<Path>, native_frequency: Frequency, native_volume: Volume) -> Result<Self> {
        let path = path.as_ref();
        let name = path.file_stem().map_or_else(|| path.display().to_string(), |s| s.to_string_lossy().into_owned());

        let is_wav = path.extension().is_some_and(|e| e.eq_ignore_ascii_case("wav"));
        if !is_wav {
            return Self::from_pcm_bytes(name, &fs::read(path)?, native_frequency, native_volume);
        }

        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        if spec.channels != 2 {
            return Err(Error::NotStereo { name, channels: spec.channels });
        }
        let buffer = match spec.sample_format {
            hound::SampleFormat::Float => {
                reader.samples::<f32>().map(|s| s.map(Sample::from)).collect::<std::result::Result<Vec<_>, _>>()?
            }
            hound::SampleFormat::Int => {
                let scale = 1.0 / ((1_i64 << (spec.bits_per_sample - 1)) - 1) as Sample;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| Sample::from(v) * scale))
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
        };
        Self::from_interleaved(name, buffer, native_frequency, native_volume)
    }

    /// Play only `len` interleaved values starting at `offset`.
    pub fn with_window(mut self, offset: usize, len: usize) -> Self {
        assert!(offset + len <= self.buffer.len(), "sample window past the end of `{}`", self.name);
        self.offset = offset;
        self.len = len & !1;
        self
    }

    #[inline] pub fn frames(&self) -> usize { self.len / 2 }

    fn playable(&self) -> Arc<[Sample]> {
        if self.offset == 0 && self.len == self.buffer.len() {
            Arc::clone(&self.buffer)
        } else {
            self.buffer[self.offset..self.offset + self.len].into()
        }
    }
}

#[derive(Clone, Debug)]
pub struct SamplerBeat {
    pub fundamental_frequency: Frequency,
    pub speed_multiplier: f64,
    pub finished: bool,
    pub left_volume: Volume,
    pub right_volume: Volume,
    wave: WaveSource,
}

impl Default for SamplerBeat {
    fn default() -> Self {
        Self {
            fundamental_frequency: 0.0,
            speed_multiplier: 1.0,
            finished: true,
            left_volume: 0.0,
            right_volume: 0.0,
            wave: WaveSource::new(WaveType::StereoSample, DEFAULT_SAMPLE_RATE),
        }
    }
}

impl SamplerBeat {
    fn generate(&mut self) -> StereoSample {
        let out = if self.speed_multiplier == 1.0 {
            self.wave.update_stereo_fixed_speed()
        } else {
            self.wave.update_stereo()
        };
        self.finished = self.wave.sample_finished();
        StereoSample::new(out.left * self.left_volume, out.right * self.right_volume)
    }
}

#[derive(Clone, Debug)]
pub struct Sampler {
    samples: Vec<SamplerSample>,
    beats: CircularBuffer<SamplerBeat>,
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler {
    pub fn new() -> Self {
        Self { samples: Vec::new(), beats: CircularBuffer::new(MAX_BEATS, false) }
    }

    /// Start `sample_index` at `frequency`. `volume` is relative to the sample's native level
    /// and shaped as `(0.3·v)²`, capped at 1.
    pub fn add_beat(&mut self, frequency: Frequency, volume: Volume, sample_index: usize) {
        let sample = &self.samples[sample_index];
        let volume = (volume * 0.3).powi(2).min(1.0);
        let speed = frequency / sample.native_frequency;

        let mut beat = SamplerBeat {
            fundamental_frequency: frequency,
            speed_multiplier: speed,
            finished: false,
            left_volume: volume,
            right_volume: volume,
            ..Default::default()
        };
        beat.wave.set_sample(sample.playable());
        beat.wave.set_sample_play_speed(speed);
        debug!("sampler: `{}` at speed {speed:.2}, volume {volume:.2}", sample.name);

        self.beats.push(beat);
    }

    pub fn generate_sample(&mut self) -> StereoSample {
        let mut out = StereoSample::default();
        for bp in 0..self.beats.occupied() {
            let beat = self.beats.get_mut(bp);
            if !beat.finished && (beat.left_volume != 0.0 || beat.right_volume != 0.0) {
                out += beat.generate();
            }
        }
        out
    }

    /// Beats still playing.
    pub fn active_beats(&self) -> usize {
        self.beats.iter().filter(|b| !b.finished).count()
    }

    #[inline] pub fn beats(&self) -> &CircularBuffer<SamplerBeat> { &self.beats }
}

impl SampleDriven for Sampler {
    fn samples(&self) -> &[SamplerSample] {
        &self.samples
    }

    fn add_sample(&mut self, sample: SamplerSample) -> usize {
        self.samples.push(sample);
        self.samples.len() - 1
    }
}

/// One pitched sample played by beats, pitch following the beat height.
#[derive(Clone, Debug)]
pub struct SamplerInstrument {
    sampler: Sampler,
    current: usize,
}

impl SamplerInstrument {
    pub fn new(sample: SamplerSample) -> Self {
        let mut sampler = Sampler::new();
        let current = sampler.add_sample(sample);
        Self { sampler, current }
    }

    /// Switch which loaded sample new beats play.
    pub fn set_current_sample(&mut self, index: usize) {
        assert!(index < self.sampler.samples().len(), "no sample {index}");
        self.current = index;
    }

    #[inline] pub fn sampler(&self) -> &Sampler { &self.sampler }
}

impl Instrument for SamplerInstrument {
    fn name(&self) -> &str {
        "sampler"
    }

    fn add_beat(&mut self, norm_freq: f64, volume: Volume) {
        let native_volume = self.sampler.sample(self.current).native_volume;
        let frequency = self.unnormalize_frequency(norm_freq);
        self.sampler.add_beat(frequency, volume / native_volume, self.current);
    }

    fn generate_sample(&mut self) -> StereoSample {
        self.sampler.generate_sample()
    }
}

impl SampleDriven for SamplerInstrument {
    fn samples(&self) -> &[SamplerSample] {
        self.sampler.samples()
    }

    fn add_sample(&mut self, sample: SamplerSample) -> usize {
        self.sampler.add_sample(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;
    use more_asserts::assert_le;

    fn ramp(frames: usize, native: Frequency) -> SamplerSample {
        let buf = (0..frames * 2).map(|i| (i + 1) as f64 * 0.01).collect();
        SamplerSample::from_interleaved("ramp", buf, native, 1.0).expect("non-empty")
    }

    fn temp_wav(name: &str, channels: u16) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("kinetic-{}-{name}.wav", std::process::id()));
        let spec = hound::WavSpec { channels, sample_rate: 44_100, bits_per_sample: 16, sample_format: hound::SampleFormat::Int };
        let mut w = hound::WavWriter::create(&path, spec).expect("temp wav");
        for i in 0..64 {
            w.write_sample((i * 100) as i16).expect("write");
        }
        w.finalize().expect("finalize");
        path
    }

    #[test]
    fn native_speed_plays_frames_in_order() {
        let mut s = Sampler::new();
        let i = s.add_sample(ramp(2, 200.0));
        s.add_beat(200.0, 10.0, i);
        assert_eq!(s.generate_sample(), StereoSample::new(0.01, 0.02));
        assert_eq!(s.generate_sample(), StereoSample::new(0.03, 0.04));
        assert_eq!(s.active_beats(), 0);
        assert_eq!(s.generate_sample(), StereoSample::default());
    }

    #[test]
    fn half_speed_lasts_twice_as_long() {
        let mut s = Sampler::new();
        let i = s.add_sample(ramp(4, 400.0));
        s.add_beat(200.0, 10.0, i);
        let mut ticks = 0;
        while s.active_beats() > 0 && ticks < 100 {
            s.generate_sample();
            ticks += 1;
        }
        assert!((7..=9).contains(&ticks), "ticks = {ticks}");
    }

    #[test]
    fn volume_is_squared_and_capped() {
        let mut s = Sampler::new();
        let i = s.add_sample(ramp(8, 440.0));
        s.add_beat(440.0, 1.0, i);
        s.add_beat(440.0, 100.0, i);
        assert!(approx_eq!(f64, s.beats().get(1).left_volume, 0.09, epsilon = 1e-12));
        assert_eq!(s.beats().get(0).left_volume, 1.0);
    }

    #[test]
    fn ring_keeps_only_the_newest_beats() {
        let mut s = Sampler::new();
        let i = s.add_sample(ramp(1000, 440.0));
        for _ in 0..MAX_BEATS + 3 {
            s.add_beat(440.0, 1.0, i);
        }
        assert_eq!(s.beats().occupied(), MAX_BEATS);
        assert_le!(s.active_beats(), MAX_BEATS);
    }

    #[test]
    fn window_limits_playback() {
        let sample = ramp(10, 100.0).with_window(4, 4);
        assert_eq!(sample.frames(), 2);
        let mut s = Sampler::new();
        let i = s.add_sample(sample);
        s.add_beat(100.0, 10.0, i);
        assert_eq!(s.generate_sample(), StereoSample::new(0.05, 0.06));
    }

    #[test]
    fn pcm_bytes_decode_as_interleaved_i16() {
        let bytes = [0xff, 0x7f, 0x00, 0x00, 0x01, 0x80];
        let s = SamplerSample::from_pcm_bytes("pcm", &bytes, 440.0, 1.0).expect("two values");
        assert_eq!(s.frames(), 1);
        assert!(SamplerSample::from_pcm_bytes("empty", &[], 440.0, 1.0).is_err());
    }

    #[test]
    fn stereo_wav_loads_and_mono_is_refused() {
        let stereo = temp_wav("stereo", 2);
        let s = SamplerSample::load(&stereo, 440.0, 1.0).expect("stereo wav");
        assert_eq!(s.frames(), 32);
        let _ = std::fs::remove_file(&stereo);

        let mono = temp_wav("mono", 1);
        let err = SamplerSample::load(&mono, 440.0, 1.0).unwrap_err();
        assert!(matches!(err, Error::NotStereo { channels: 1, .. }));
        let _ = std::fs::remove_file(&mono);
    }

    #[test]
    fn instrument_pitches_with_the_beat_height() {
        let mut inst = SamplerInstrument::new(ramp(100, 200.0));
        inst.add_beat(0.0, 10.0);
        assert_eq!(inst.sampler().beats().get(0).speed_multiplier, 1.0);
        inst.add_beat(1.0, 10.0);
        assert_eq!(inst.sampler().beats().get(0).speed_multiplier, 3.0);
    }
}
