//! Realtime output through cpal.
//!
//! Open the device first: its sample rate decides the rate the [`SoundEngine`] is built
//! with. Then [`OutputDevice::play`] hands the engine to the audio callback.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{error, info};

use crate::error::{Error, Result};
use crate::mixer::{SoundEngine, OUTPUT_CHANNELS};

/// Names of the default host's output devices.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    for device in host.output_devices()? {
        names.push(device.name()?);
    }
    Ok(names)
}

fn pick_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    if let Some(name) = name {
        for device in host.output_devices()? {
            if device.name()? == name {
                return Ok(device);
            }
        }
        return Err(Error::Device(format!("requested device not found: {name}")));
    }
    host.default_output_device()
        .ok_or_else(|| Error::Device("no default output device".to_string()))
}

/// Closest supported config to `req_sr`, preferring stereo.
fn choose_config(device: &cpal::Device, req_sr: Option<u32>) -> Result<cpal::SupportedStreamConfig> {
    let Some(sr) = req_sr else {
        return Ok(device.default_output_config()?);
    };

    let mut best: Option<(u64, cpal::SupportedStreamConfigRange)> = None;
    for range in device.supported_output_configs()? {
        let (lo, hi) = (range.min_sample_rate().0, range.max_sample_rate().0);
        let sr_pen = if (lo..=hi).contains(&sr) { 0 } else { u64::from(lo.abs_diff(sr).min(hi.abs_diff(sr))) };
        let ch_pen = u64::from(range.channels().abs_diff(OUTPUT_CHANNELS as u16));
        let score = sr_pen.saturating_mul(1000) + ch_pen;
        if best.as_ref().map_or(true, |(s, _)| score < *s) {
            best = Some((score, range));
        }
    }

    let (_, range) = best.ok_or_else(|| Error::Device("no supported output configs".to_string()))?;
    let sr = sr.clamp(range.min_sample_rate().0, range.max_sample_rate().0);
    Ok(range.with_sample_rate(cpal::SampleRate(sr)))
}

/// An opened, not yet playing output device.
pub struct OutputDevice {
    device: cpal::Device,
    name: String,
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
}

impl OutputDevice {
    /// Open `name` (or the default device) near `sample_rate` (or its default rate).
    pub fn open(name: Option<&str>, sample_rate: Option<u32>) -> Result<Self> {
        let device = pick_device(name)?;
        let supported = choose_config(&device, sample_rate)?;
        let name = device.name()?;
        Ok(Self {
            device,
            name,
            sample_format: supported.sample_format(),
            config: supported.config(),
        })
    }

    #[inline] pub fn name(&self) -> &str { &self.name }
    #[inline] pub fn sample_rate(&self) -> u32 { self.config.sample_rate.0 }
    #[inline] pub fn channels(&self) -> u16 { self.config.channels }

    /// Start rendering `engine`. Audio stops when the returned stream is dropped.
    pub fn play(&self, engine: Arc<SoundEngine>) -> Result<cpal::Stream> {
        let stream = match self.sample_format {
            cpal::SampleFormat::F32 => self.build_stream::<f32>(engine)?,
            cpal::SampleFormat::I16 => self.build_stream::<i16>(engine)?,
            cpal::SampleFormat::U16 => self.build_stream::<u16>(engine)?,
            other => return Err(Error::Device(format!("unsupported device sample format: {other:?}"))),
        };
        stream.play()?;
        info!(
            "stream: `{}` at {} Hz, {} ch, {:?}",
            self.name, self.config.sample_rate.0, self.config.channels, self.sample_format
        );
        Ok(stream)
    }

    fn build_stream<T>(&self, engine: Arc<SoundEngine>) -> Result<cpal::Stream>
    where
        T: cpal::Sample + cpal::FromSample<f32> + cpal::SizedSample + Send + 'static,
    {
        let channels = usize::from(self.config.channels);
        let mut stereo: Vec<f32> = Vec::new();

        let stream = self.device.build_output_stream(
            &self.config,
            move |output: &mut [T], _| {
                let frames = output.len() / channels;
                stereo.resize(frames * OUTPUT_CHANNELS, 0.0);
                engine.generate_interleaved(&mut stereo);
                for (frame, lr) in output.chunks_mut(channels).zip(stereo.chunks_exact(OUTPUT_CHANNELS)) {
                    spread_frame(frame, lr[0], lr[1]);
                }
            },
            |e| error!("stream: {e}"),
            None,
        )?;
        Ok(stream)
    }
}

/// Write one stereo frame into a device frame of any width: mono gets the mid signal,
/// extra channels stay silent.
fn spread_frame<T>(frame: &mut [T], left: f32, right: f32)
where
    T: cpal::Sample + cpal::FromSample<f32>,
{
    match frame {
        [mono] => *mono = T::from_sample((left + right) * 0.5),
        [l, r, rest @ ..] => {
            *l = T::from_sample(left);
            *r = T::from_sample(right);
            rest.iter_mut().for_each(|x| *x = T::EQUILIBRIUM);
        }
        [] => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_spread_to_any_width() {
        let mut mono = [0.0_f32];
        spread_frame(&mut mono, 0.5, -0.1);
        assert!((mono[0] - 0.2).abs() < 1e-6);

        let mut quad = [9_i16; 4];
        spread_frame(&mut quad, 0.0, 0.0);
        assert_eq!(quad, [0; 4]);

        let mut wide = [0.0_f32; 3];
        spread_frame(&mut wide, 0.25, -0.25);
        assert_eq!(wide, [0.25, -0.25, 0.0]);

        let mut unsigned = [0_u16; 2];
        spread_frame(&mut unsigned, 0.0, 0.0);
        assert_eq!(unsigned, [<u16 as cpal::Sample>::EQUILIBRIUM; 2]);
    }
}
