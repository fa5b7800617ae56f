//! Pitch and onset detection
//!
//! Pitch candidates come from harmonic matching of spectral peaks; onsets
//! from normalized positive spectral flux followed by a local-maximum gate.

use crate::config::DetectionConfig;
use crate::error::{Result, TranscriptionError};
use crate::pipeline::CancellationToken;
use crate::spectral::SpectralFrame;
use serde::{Deserialize, Serialize};

/// A possible fundamental present in one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PitchCandidate {
    pub time: f32,
    pub frequency: f32,
    /// Share of the frame energy explained by this candidate's harmonics
    pub confidence: f32,
    /// Energy of the matched harmonic peaks
    pub energy: f32,
}

impl PitchCandidate {
    /// Fractional MIDI pitch (A4 = 69 at 440 Hz)
    pub fn midi_pitch(&self) -> f32 {
        frequency_to_midi(self.frequency)
    }
}

pub fn frequency_to_midi(frequency: f32) -> f32 {
    69.0 + 12.0 * (frequency / 440.0).log2()
}

/// Onset detection function value for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnsetEvent {
    pub frame_index: usize,
    pub time: f32,
    pub strength: f32,
    pub is_onset: bool,
}

/// Detector output for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDetection {
    pub index: usize,
    pub time: f32,
    pub candidates: Vec<PitchCandidate>,
    pub onset: OnsetEvent,
}

/// Local spectral maximum
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralPeak {
    pub bin: usize,
    /// Interpolated frequency in Hz
    pub frequency: f32,
    pub magnitude: f32,
    /// Squared magnitudes between the flanking valleys
    pub energy: f32,
}

/// Find spectral peaks above the absolute and relative floors, in ascending frequency
pub fn find_peaks(frame: &SpectralFrame, config: &DetectionConfig) -> Vec<SpectralPeak> {
    let m = &frame.magnitudes;
    if m.len() < 3 {
        return Vec::new();
    }

    let max_mag = m[1..].iter().cloned().fold(0.0f32, f32::max);
    let relative_floor = max_mag * 10f32.powf(config.relative_floor_db / 20.0);
    let floor = config.peak_floor.max(relative_floor);
    if max_mag < floor {
        return Vec::new();
    }

    let mut peaks = Vec::new();
    for k in 1..m.len() - 1 {
        if m[k] < floor || m[k] <= m[k - 1] || m[k] < m[k + 1] {
            continue;
        }

        // Parabolic interpolation on log magnitude
        let (a, b, c) = (
            (m[k - 1] + 1e-12).ln(),
            (m[k] + 1e-12).ln(),
            (m[k + 1] + 1e-12).ln(),
        );
        let denom = a - 2.0 * b + c;
        let offset = if denom.abs() > 1e-12 {
            (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
        } else {
            0.0
        };

        // Left valley is included, right valley belongs to the next peak
        let mut left = k;
        while left > 0 && m[left - 1] < m[left] {
            left -= 1;
        }
        let mut right = k + 1;
        while right < m.len() && m[right] <= m[right - 1] {
            right += 1;
        }
        let right = if right < m.len() { right - 1 } else { right };
        let right = right.max(k + 1);

        peaks.push(SpectralPeak {
            bin: k,
            frequency: (k as f32 + offset) * frame.bin_hz,
            magnitude: m[k],
            energy: m[left..right].iter().map(|x| x * x).sum(),
        });
    }

    peaks
}

/// Group peaks into harmonic series and score each series' fundamental
pub fn match_harmonics(
    peaks: &[SpectralPeak],
    total_energy: f32,
    time: f32,
    config: &DetectionConfig,
) -> Vec<PitchCandidate> {
    if total_energy <= 0.0 {
        return Vec::new();
    }

    let mut claimed = vec![false; peaks.len()];
    let mut candidates = Vec::new();

    for i in 0..peaks.len() {
        let f0 = peaks[i].frequency;
        if claimed[i] || f0 < config.min_f0_hz || f0 > config.max_f0_hz {
            continue;
        }
        claimed[i] = true;
        let mut energy = peaks[i].energy;

        for h in 2..=config.max_harmonics {
            let target = f0 * h as f32;
            let tolerance = target * config.harmonic_tolerance;
            let best = peaks
                .iter()
                .enumerate()
                .skip(i + 1)
                .filter(|(j, p)| !claimed[*j] && (p.frequency - target).abs() <= tolerance)
                .min_by(|(_, a), (_, b)| {
                    (a.frequency - target)
                        .abs()
                        .total_cmp(&(b.frequency - target).abs())
                })
                .map(|(j, _)| j);

            if let Some(j) = best {
                claimed[j] = true;
                energy += peaks[j].energy;
            }
        }

        let confidence = (energy / total_energy).clamp(0.0, 1.0);
        if confidence >= config.min_candidate_confidence {
            candidates.push(PitchCandidate {
                time,
                frequency: f0,
                confidence,
                energy,
            });
        }
    }

    candidates
}

/// Normalized positive spectral flux between two frames, in [0, 1]
pub fn onset_strength(previous: Option<&SpectralFrame>, current: &SpectralFrame) -> f32 {
    let Some(previous) = previous else {
        return 0.0;
    };
    let total: f32 = current.magnitudes.iter().sum();
    if total <= f32::EPSILON {
        return 0.0;
    }
    let rise: f32 = current
        .magnitudes
        .iter()
        .zip(&previous.magnitudes)
        .map(|(c, p)| (c - p).max(0.0))
        .sum();
    (rise / total).clamp(0.0, 1.0)
}

/// Mark frames whose strength is a thresholded local maximum
pub fn pick_onsets(strengths: &[f32], threshold: f32, window: usize) -> Vec<bool> {
    (0..strengths.len())
        .map(|t| {
            let s = strengths[t];
            if s < threshold {
                return false;
            }
            let dominates_past = strengths[t.saturating_sub(window)..t].iter().all(|&p| s >= p);
            let beats_next = strengths.get(t + 1).map_or(true, |&n| s > n);
            dominates_past && beats_next
        })
        .collect()
}

/// Detection fold state
struct DetectorState<'a> {
    previous: Option<&'a SpectralFrame>,
    detections: Vec<FrameDetection>,
}

/// Run pitch and onset detection over all spectral frames
pub fn detect(
    spectra: &[SpectralFrame],
    config: &DetectionConfig,
    cancel: &CancellationToken,
    check_every: usize,
) -> Result<Vec<FrameDetection>> {
    let check_every = check_every.max(1);
    let initial = DetectorState {
        previous: None,
        detections: Vec::with_capacity(spectra.len()),
    };

    let state = spectra.iter().enumerate().try_fold(initial, |mut state, (i, frame)| {
        if i % check_every == 0 {
            cancel.check()?;
        }

        let peaks = find_peaks(frame, config);
        let candidates = match_harmonics(&peaks, frame.energy(), frame.time, config);
        let strength = onset_strength(state.previous, frame);

        state.detections.push(FrameDetection {
            index: frame.index,
            time: frame.time,
            candidates,
            onset: OnsetEvent {
                frame_index: frame.index,
                time: frame.time,
                strength,
                is_onset: false,
            },
        });
        state.previous = Some(frame);
        Ok::<_, TranscriptionError>(state)
    })?;

    let mut detections = state.detections;
    let strengths: Vec<f32> = detections.iter().map(|d| d.onset.strength).collect();
    let flags = pick_onsets(&strengths, config.onset_threshold, config.onset_window);
    for (detection, is_onset) in detections.iter_mut().zip(flags) {
        detection.onset.is_onset = is_onset;
    }

    let onsets = detections.iter().filter(|d| d.onset.is_onset).count();
    let candidates: usize = detections.iter().map(|d| d.candidates.len()).sum();
    log::debug!(
        "Detected {} pitch candidates and {} onsets over {} frames",
        candidates,
        onsets,
        detections.len()
    );

    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with(bins: &[(usize, f32)], len: usize) -> SpectralFrame {
        let mut magnitudes = vec![0.0; len];
        for &(bin, mag) in bins {
            magnitudes[bin] = mag;
            magnitudes[bin - 1] = mag * 0.5;
            magnitudes[bin + 1] = mag * 0.5;
        }
        SpectralFrame {
            index: 0,
            time: 0.0,
            bin_hz: 10.0,
            magnitudes,
        }
    }

    #[test]
    fn midi_conversion() {
        assert!((frequency_to_midi(440.0) - 69.0).abs() < 1e-4);
        assert!((frequency_to_midi(261.63) - 60.0).abs() < 0.01);
    }

    #[test]
    fn peaks_are_found_with_symmetric_interpolation() {
        let frame = frame_with(&[(20, 0.5), (60, 0.2)], 128);
        let peaks = find_peaks(&frame, &DetectionConfig::default());
        assert_eq!(peaks.len(), 2);
        assert!((peaks[0].frequency - 200.0).abs() < 1e-3);
        assert!((peaks[0].energy - 0.375).abs() < 1e-6);
        assert!(peaks[0].frequency < peaks[1].frequency);
    }

    #[test]
    fn weak_peaks_fall_below_relative_floor() {
        let frame = frame_with(&[(20, 0.5), (60, 0.001)], 128);
        let peaks = find_peaks(&frame, &DetectionConfig::default());
        assert_eq!(peaks.len(), 1);
    }

    #[test]
    fn harmonic_series_collapses_to_fundamental() {
        // 100 Hz with partials at 200 and 300 Hz
        let frame = frame_with(&[(10, 0.5), (20, 0.3), (30, 0.2)], 128);
        let config = DetectionConfig {
            min_f0_hz: 50.0,
            ..DetectionConfig::default()
        };
        let peaks = find_peaks(&frame, &config);
        let candidates = match_harmonics(&peaks, frame.energy(), 0.0, &config);
        assert_eq!(candidates.len(), 1);
        assert!((candidates[0].frequency - 100.0).abs() < 1e-3);
        assert!((candidates[0].confidence - 1.0).abs() < 1e-4);
    }

    #[test]
    fn onset_strength_is_normalized() {
        let quiet = frame_with(&[(20, 0.1)], 64);
        let loud = frame_with(&[(20, 0.4)], 64);
        assert_eq!(onset_strength(None, &loud), 0.0);
        assert!((onset_strength(Some(&quiet), &loud) - 0.75).abs() < 1e-5);
        assert_eq!(onset_strength(Some(&loud), &quiet), 0.0);
    }

    #[test]
    fn onset_gate_requires_local_maximum() {
        let strengths = [0.0, 0.9, 0.4, 0.2, 0.5, 0.6, 0.2, 0.0, 0.1, 0.35];
        let flags = pick_onsets(&strengths, 0.3, 3);
        assert_eq!(
            flags,
            vec![false, true, false, false, false, true, false, false, false, true]
        );
    }

    #[test]
    fn plateau_is_not_an_onset() {
        let flags = pick_onsets(&[0.0, 0.5, 0.5, 0.0], 0.3, 3);
        assert_eq!(flags, vec![false, false, true, false]);
    }
}
