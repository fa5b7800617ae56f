//! Spectral processing utilities (windowing, FFT magnitude spectra)

use crate::config::WindowKind;
use crate::error::{Result, TranscriptionError};
use crate::passes::frame::Frame;
use ndarray::Array2;
use rustfft::{num_complex::Complex32, Fft, FftPlanner};
use std::sync::Arc;

/// Generate window function
pub fn generate_window(kind: WindowKind, size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    let denom = (size - 1) as f32;
    match kind {
        WindowKind::Hann => (0..size)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / denom).cos()))
            .collect(),
        WindowKind::Hamming => (0..size)
            .map(|i| 0.54 - 0.46 * (2.0 * std::f32::consts::PI * i as f32 / denom).cos())
            .collect(),
        WindowKind::Rectangular => vec![1.0; size],
    }
}

/// Magnitude spectrum of one frame.
///
/// Bins are linear: bin `k` sits at `k * bin_hz` with
/// `bin_hz = sample_rate / frame_size`, for `k` in `0..=frame_size/2`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralFrame {
    pub index: usize,
    /// Centre of the originating frame, in seconds
    pub time: f32,
    pub bin_hz: f32,
    pub magnitudes: Vec<f32>,
}

impl SpectralFrame {
    pub fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.bin_hz
    }

    /// Sum of squared magnitudes
    pub fn energy(&self) -> f32 {
        self.magnitudes.iter().map(|m| m * m).sum()
    }

    pub fn num_bins(&self) -> usize {
        self.magnitudes.len()
    }
}

/// FFT magnitude analyzer shared by all frames of a job.
///
/// The planned FFT is immutable and `Sync`, so one analyzer serves every
/// worker thread.
#[derive(Clone)]
pub struct SpectralAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    frame_size: usize,
    sample_rate: u32,
    scale: f32,
}

impl std::fmt::Debug for SpectralAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralAnalyzer")
            .field("frame_size", &self.frame_size)
            .field("sample_rate", &self.sample_rate)
            .field("scale", &self.scale)
            .finish()
    }
}

impl SpectralAnalyzer {
    /// `window_sum` is the sum of the window the frames were shaped with;
    /// magnitudes are scaled by `2 / window_sum` so a sinusoid of amplitude
    /// `a` peaks near `a`.
    pub fn new(frame_size: usize, sample_rate: u32, window_sum: f32) -> Result<Self> {
        if frame_size < 2 || sample_rate == 0 {
            return Err(TranscriptionError::InvalidConfig(format!(
                "cannot analyze {}-sample frames at {} Hz",
                frame_size, sample_rate
            )));
        }
        if !(window_sum.is_finite() && window_sum > 0.0) {
            return Err(TranscriptionError::InvalidConfig(
                "window sum must be positive".to_string(),
            ));
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(frame_size);

        Ok(Self {
            fft,
            frame_size,
            sample_rate,
            scale: 2.0 / window_sum,
        })
    }

    pub fn bin_hz(&self) -> f32 {
        self.sample_rate as f32 / self.frame_size as f32
    }

    pub fn num_bins(&self) -> usize {
        self.frame_size / 2 + 1
    }

    /// Compute the magnitude spectrum of an already windowed frame
    pub fn analyze(&self, frame: &Frame) -> Result<SpectralFrame> {
        if frame.samples.len() != self.frame_size {
            return Err(TranscriptionError::Analysis(format!(
                "frame {} has {} samples, expected {}",
                frame.index,
                frame.samples.len(),
                self.frame_size
            )));
        }
        if let Some(pos) = frame.samples.iter().position(|s| !s.is_finite()) {
            return Err(TranscriptionError::Analysis(format!(
                "non-finite sample at offset {} of frame {}",
                pos, frame.index
            )));
        }

        let mut buffer: Vec<Complex32> = frame
            .samples
            .iter()
            .map(|&s| Complex32::new(s, 0.0))
            .collect();
        self.fft.process(&mut buffer);

        let magnitudes: Vec<f32> = buffer[..self.num_bins()]
            .iter()
            .map(|c| c.norm() * self.scale)
            .collect();

        if magnitudes.iter().any(|m| !m.is_finite()) {
            return Err(TranscriptionError::Analysis(format!(
                "transform of frame {} produced non-finite magnitudes",
                frame.index
            )));
        }

        Ok(SpectralFrame {
            index: frame.index,
            time: frame.center_time,
            bin_hz: self.bin_hz(),
            magnitudes,
        })
    }
}

/// Stack frames into a `(bins, frames)` magnitude matrix, keeping bins up to `max_hz`
pub fn spectrogram(frames: &[SpectralFrame], max_hz: f32) -> Array2<f32> {
    let Some(first) = frames.first() else {
        return Array2::zeros((0, 0));
    };
    let n_bins = ((max_hz / first.bin_hz).ceil() as usize + 1).min(first.num_bins());

    let mut s = Array2::<f32>::zeros((n_bins, frames.len()));
    for (t, frame) in frames.iter().enumerate() {
        for (f, &mag) in frame.magnitudes.iter().take(n_bins).enumerate() {
            s[[f, t]] = mag;
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine_frame(freq: f32, amp: f32, sr: u32, n: usize) -> Frame {
        let window = generate_window(WindowKind::Hann, n);
        let samples = (0..n)
            .map(|i| amp * (2.0 * PI * freq * i as f32 / sr as f32).sin() * window[i])
            .collect();
        Frame {
            index: 0,
            start_time: 0.0,
            center_time: n as f32 / 2.0 / sr as f32,
            samples,
        }
    }

    #[test]
    fn hann_window_endpoints() {
        let w = generate_window(WindowKind::Hann, 8);
        assert!(w[0].abs() < 1e-6);
        assert!(w[7].abs() < 1e-6);
        assert!(w.iter().all(|&x| (0.0..=1.0).contains(&x)));
    }

    #[test]
    fn sine_peaks_at_its_bin_with_unit_scaling() {
        let sr = 44100;
        let n = 4096;
        let window_sum: f32 = generate_window(WindowKind::Hann, n).iter().sum();
        let analyzer = SpectralAnalyzer::new(n, sr, window_sum).unwrap();
        let spectrum = analyzer.analyze(&sine_frame(1000.0, 0.5, sr, n)).unwrap();

        let (peak_bin, peak_mag) = spectrum
            .magnitudes
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |best, (i, &m)| if m > best.1 { (i, m) } else { best });

        assert!((spectrum.bin_frequency(peak_bin) - 1000.0).abs() <= spectrum.bin_hz);
        // Scalloping loss of a Hann window is at most ~1.4 dB
        assert!(peak_mag > 0.5 * 0.84 && peak_mag < 0.51, "peak {}", peak_mag);
        assert!(spectrum.magnitudes.iter().all(|&m| m >= 0.0));
        assert_eq!(spectrum.num_bins(), n / 2 + 1);
    }

    #[test]
    fn analysis_is_deterministic() {
        let analyzer = SpectralAnalyzer::new(1024, 8000, 512.0).unwrap();
        let frame = sine_frame(440.0, 0.3, 8000, 1024);
        assert_eq!(analyzer.analyze(&frame).unwrap(), analyzer.analyze(&frame).unwrap());
    }

    #[test]
    fn non_finite_frames_fail_analysis() {
        let analyzer = SpectralAnalyzer::new(64, 8000, 32.0).unwrap();
        let mut frame = sine_frame(440.0, 0.3, 8000, 64);
        frame.samples[10] = f32::NAN;
        assert!(matches!(
            analyzer.analyze(&frame),
            Err(TranscriptionError::Analysis(_))
        ));
    }

    #[test]
    fn spectrogram_shape_respects_max_frequency() {
        let frames = vec![
            SpectralFrame {
                index: 0,
                time: 0.0,
                bin_hz: 10.0,
                magnitudes: vec![1.0; 100],
            };
            3
        ];
        let s = spectrogram(&frames, 200.0);
        assert_eq!(s.shape(), &[21, 3]);
    }
}
