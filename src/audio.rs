//! WAV helpers for the sample-exact parts of the pipeline.

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;

use crate::error::{DubError, Result};
use crate::timing::samples_to_seconds;

/// Mono PCM samples in `[-1.0, 1.0]` with their sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn silence(len: usize, sample_rate: u32) -> Self {
        Self { samples: vec![0.0; len], sample_rate }
    }

    pub fn duration(&self) -> f64 {
        samples_to_seconds(self.samples.len(), self.sample_rate)
    }

    /// Largest absolute sample value, 0.0 for an empty waveform
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
    }

    /// Pad with silence or cut so exactly `len` samples remain
    pub fn fit_to_len(&mut self, len: usize) {
        self.samples.resize(len, 0.0);
    }
}

/// Read a WAV file, down-mixing to mono
pub fn read_wav<P: AsRef<Path>>(path: P) -> Result<Waveform> {
    let path = path.as_ref();
    let mut reader = WavReader::open(path)
        .map_err(|e| DubError::Media(format!("Failed to open {}: {}", path.display(), e)))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok(Waveform { samples, sample_rate: spec.sample_rate })
}

/// Write 16-bit mono PCM
pub fn write_wav<P: AsRef<Path>>(path: P, waveform: &Waveform) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: waveform.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path.as_ref(), spec)?;
    for &sample in &waveform.samples {
        let s = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Duration of a WAV file from its header
pub fn wav_duration<P: AsRef<Path>>(path: P) -> Result<f64> {
    let path = path.as_ref();
    let reader = WavReader::open(path)
        .map_err(|e| DubError::Media(format!("Failed to open {}: {}", path.display(), e)))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Ok(0.0);
    }
    // duration() counts frames, not interleaved samples
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_measure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let wave = Waveform {
            samples: (0..24000).map(|i| ((i as f32) * 0.01).sin() * 0.5).collect(),
            sample_rate: 16000,
        };
        write_wav(&path, &wave).unwrap();
        assert!((wav_duration(&path).unwrap() - 1.5).abs() < 1e-9);

        let back = read_wav(&path).unwrap();
        assert_eq!(back.samples.len(), 24000);
        assert!((back.samples[100] - wave.samples[100]).abs() < 1e-3);
    }

    #[test]
    fn test_stereo_is_downmixed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for _ in 0..800 {
            writer.write_sample(i16::MAX).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let wave = read_wav(&path).unwrap();
        assert_eq!(wave.samples.len(), 800);
        assert!((wave.samples[0] - 0.5).abs() < 1e-3);
        assert!((wav_duration(&path).unwrap() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_fit_to_len_pads_and_trims() {
        let mut wave = Waveform { samples: vec![0.3; 10], sample_rate: 10 };
        assert!((wave.peak() - 0.3).abs() < 1e-6);
        wave.fit_to_len(15);
        assert_eq!(wave.samples.len(), 15);
        assert_eq!(wave.samples[14], 0.0);
        wave.fit_to_len(4);
        assert_eq!(wave.samples, vec![0.3; 4]);
    }
}
