//! PCM buffers and audio acquisition sources

use crate::error::AcquisitionError;
use hound::WavReader;
use std::borrow::Cow;
use std::path::{Path, PathBuf};

/// Decoded PCM audio, interleaved when `channels > 1`.
///
/// Construction validates the buffer contract: a positive sample rate, at
/// least one channel, a whole number of sample frames, and finite samples.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl PcmBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self, AcquisitionError> {
        if sample_rate == 0 {
            return Err(AcquisitionError::InvalidBuffer(
                "sample rate must be > 0".to_string(),
            ));
        }
        if channels == 0 {
            return Err(AcquisitionError::InvalidBuffer(
                "channel count must be > 0".to_string(),
            ));
        }
        if samples.len() % channels as usize != 0 {
            return Err(AcquisitionError::InvalidBuffer(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                channels
            )));
        }
        if let Some(pos) = samples.iter().position(|s| !s.is_finite()) {
            return Err(AcquisitionError::InvalidBuffer(format!(
                "non-finite sample at index {}",
                pos
            )));
        }

        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    /// Mono buffer shortcut
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Result<Self, AcquisitionError> {
        Self::new(samples, sample_rate, 1)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Samples per channel
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration_sec(&self) -> f32 {
        self.frames() as f32 / self.sample_rate as f32
    }

    /// Down-mix to mono by averaging channels. Borrows when already mono.
    pub fn to_mono(&self) -> Cow<'_, PcmBuffer> {
        if self.channels == 1 {
            return Cow::Borrowed(self);
        }

        let channels = self.channels as usize;
        let samples = self
            .samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();

        Cow::Owned(PcmBuffer {
            samples,
            sample_rate: self.sample_rate,
            channels: 1,
        })
    }

    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        (self.samples.iter().map(|&x| x * x).sum::<f32>() / self.samples.len() as f32).sqrt()
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, &x| acc.max(x.abs()))
    }
}

/// External collaborator that delivers decoded audio.
///
/// Download, decoding and retry policy all live behind this trait; the
/// transcription core only sees the resulting buffer or the source's error.
pub trait AudioSource {
    fn acquire(&self) -> Result<PcmBuffer, AcquisitionError>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// Source backed by an already decoded buffer
#[derive(Debug, Clone)]
pub struct MemorySource {
    buffer: PcmBuffer,
}

impl MemorySource {
    pub fn new(buffer: PcmBuffer) -> Self {
        Self { buffer }
    }
}

impl AudioSource for MemorySource {
    fn acquire(&self) -> Result<PcmBuffer, AcquisitionError> {
        Ok(self.buffer.clone())
    }

    fn describe(&self) -> String {
        format!(
            "in-memory buffer ({} Hz, {} ch, {:.2}s)",
            self.buffer.sample_rate,
            self.buffer.channels,
            self.buffer.duration_sec()
        )
    }
}

/// Source that decodes a local WAV file
#[derive(Debug, Clone)]
pub struct WavFileSource {
    path: PathBuf,
}

impl WavFileSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl AudioSource for WavFileSource {
    fn acquire(&self) -> Result<PcmBuffer, AcquisitionError> {
        let extension = self
            .path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("")
            .to_lowercase();

        if extension != "wav" && extension != "wave" {
            return Err(AcquisitionError::UnsupportedFormat(format!(
                "unsupported audio format: {:?}",
                extension
            )));
        }

        load_wav_file(&self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Decode a WAV file into an interleaved buffer normalized to [-1, 1]
pub fn load_wav_file<P: AsRef<Path>>(path: P) -> Result<PcmBuffer, AcquisitionError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(AcquisitionError::Io(format!(
            "audio file does not exist: {}",
            path.display()
        )));
    }

    let mut reader = WavReader::open(path).map_err(|e| AcquisitionError::Io(e.to_string()))?;
    let spec = reader.spec();

    if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
        return Err(AcquisitionError::UnsupportedFormat(format!(
            "unsupported bit depth: {}",
            spec.bits_per_sample
        )));
    }

    let mut samples: Vec<f32> = Vec::with_capacity(reader.len() as usize);
    match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
            for sample in reader.samples::<i32>() {
                let sample = sample.map_err(|e| AcquisitionError::Io(e.to_string()))?;
                samples.push(sample as f32 / max_value);
            }
        }
        hound::SampleFormat::Float => {
            for sample in reader.samples::<f32>() {
                samples.push(sample.map_err(|e| AcquisitionError::Io(e.to_string()))?);
            }
        }
    }

    log::debug!(
        "Decoded {} ({} Hz, {} ch, {}-bit, {} samples)",
        path.display(),
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample,
        samples.len()
    );

    PcmBuffer::new(samples, spec.sample_rate, spec.channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_contract_violations() {
        assert!(PcmBuffer::mono(vec![0.0; 10], 0).is_err());
        assert!(PcmBuffer::new(vec![0.0; 3], 44100, 2).is_err());
        assert!(PcmBuffer::mono(vec![0.0, f32::NAN], 44100).is_err());
        assert!(PcmBuffer::mono(vec![0.0, f32::INFINITY], 44100).is_err());
        assert!(PcmBuffer::new(vec![], 44100, 0).is_err());
    }

    #[test]
    fn stereo_downmix_averages_channels() {
        let buffer = PcmBuffer::new(vec![1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 8000, 2).unwrap();
        let mono = buffer.to_mono();
        assert_eq!(mono.channels(), 1);
        assert_eq!(mono.samples(), &[0.5, 0.5, 0.0]);
        assert_eq!(buffer.frames(), 3);
    }

    #[test]
    fn mono_downmix_borrows() {
        let buffer = PcmBuffer::mono(vec![0.1, 0.2], 8000).unwrap();
        assert!(matches!(buffer.to_mono(), Cow::Borrowed(_)));
    }

    #[test]
    fn level_statistics() {
        let buffer = PcmBuffer::mono(vec![0.5, -0.5, 0.5, -0.5], 8000).unwrap();
        assert!((buffer.rms() - 0.5).abs() < 1e-6);
        assert!((buffer.peak() - 0.5).abs() < 1e-6);
        assert!((buffer.duration_sec() - 0.0005).abs() < 1e-7);
    }

    #[test]
    fn missing_file_is_an_acquisition_error() {
        let source = WavFileSource::new("/definitely/not/here.wav");
        assert!(matches!(source.acquire(), Err(AcquisitionError::Io(_))));
        let source = WavFileSource::new("song.mp3");
        assert!(matches!(
            source.acquire(),
            Err(AcquisitionError::UnsupportedFormat(_))
        ));
    }
}
