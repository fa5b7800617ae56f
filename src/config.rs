//! Configuration system for the transcription pipeline

use crate::error::{Result, TranscriptionError};
use crate::notation::NotationSettings;
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: String,
    pub framing: FramingConfig,
    pub analysis: AnalysisConfig,
    pub detection: DetectionConfig,
    pub segmentation: SegmentationConfig,
    pub quantize: QuantizeConfig,
    pub tracks: TrackConfig,
    pub notation: NotationSettings,
    pub export: ExportConfig,
    pub qa: QaConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            framing: FramingConfig::default(),
            analysis: AnalysisConfig::default(),
            detection: DetectionConfig::default(),
            segmentation: SegmentationConfig::default(),
            quantize: QuantizeConfig::default(),
            tracks: TrackConfig::default(),
            notation: NotationSettings::default(),
            export: ExportConfig::default(),
            qa: QaConfig::default(),
        }
    }
}

/// Analysis window shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Hann,
    Hamming,
    Rectangular,
}

/// Signal framing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FramingConfig {
    /// Frame length N in samples
    pub frame_size: usize,
    /// Hop H in samples, 0 < H <= N
    pub hop_size: usize,
    pub window: WindowKind,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            frame_size: 4096,
            hop_size: 512,
            window: WindowKind::Hann,
        }
    }
}

impl FramingConfig {
    /// Frames the analysis window needs to sweep fully across an edge.
    pub fn ramp_frames(&self) -> usize {
        self.frame_size.div_ceil(self.hop_size.max(1))
    }
}

/// Spectral analysis scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Frames per work unit; cancellation is checked between units
    pub chunk_frames: usize,
    /// Analyze frames on the rayon pool
    pub parallel: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            chunk_frames: 64,
            parallel: true,
        }
    }
}

/// Pitch and onset detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Lowest fundamental considered (A0)
    pub min_f0_hz: f32,
    /// Highest fundamental considered (C8)
    pub max_f0_hz: f32,
    /// Peaks below this normalized magnitude are ignored (-60 dBFS)
    pub peak_floor: f32,
    /// Peaks this far below the frame maximum are ignored
    pub relative_floor_db: f32,
    pub max_harmonics: usize,
    /// Relative frequency tolerance when matching harmonics
    pub harmonic_tolerance: f32,
    /// Candidates below this confidence are not reported
    pub min_candidate_confidence: f32,
    pub onset_threshold: f32,
    /// Previous frames an onset must dominate
    pub onset_window: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_f0_hz: 27.5,
            max_f0_hz: 4186.0,
            peak_floor: 1e-3,
            relative_floor_db: -30.0,
            max_harmonics: 8,
            harmonic_tolerance: 0.03,
            min_candidate_confidence: 0.05,
            onset_threshold: 0.3,
            onset_window: 3,
        }
    }
}

/// Note segmentation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Confidence required to open a note
    pub min_confidence: f32,
    /// Nearest-frequency continuation tolerance in semitones
    pub semitone_tolerance: f32,
    /// K: consecutive unmatched frames that close a note
    pub max_missing_frames: usize,
    pub min_duration_ms: f32,
    /// Edge frames below this share of the attack/release reference are trimmed
    pub edge_energy_ratio: f32,
    /// Energy rise over the pre-onset level that re-articulates a held pitch
    pub rearticulation_ratio: f32,
    pub velocity_floor_energy: f32,
    pub velocity_ceiling_energy: f32,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.2,
            semitone_tolerance: 1.0,
            max_missing_frames: 2,
            min_duration_ms: 30.0,
            edge_energy_ratio: 0.5,
            rearticulation_ratio: 1.5,
            velocity_floor_energy: 1e-4,
            velocity_ceiling_energy: 0.5,
        }
    }
}

/// Quantization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizeConfig {
    pub tempo_bpm: f32,
    pub ticks_per_quarter: u16,
}

impl Default for QuantizeConfig {
    fn default() -> Self {
        Self {
            tempo_bpm: 120.0,
            ticks_per_quarter: 480,
        }
    }
}

/// How notes are distributed over MIDI tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackLayout {
    /// Every note on one track
    Single,
    /// Upper/lower register split, like the two staves of a piano score
    Split,
}

/// Track assignment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    pub layout: TrackLayout,
    /// Lowest pitch of the upper track in split layout (middle C)
    pub split_pitch: u8,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            layout: TrackLayout::Single,
            split_pitch: 60,
        }
    }
}

impl TrackConfig {
    pub fn track_count(&self) -> usize {
        match self.layout {
            TrackLayout::Single => 1,
            TrackLayout::Split => 2,
        }
    }

    pub fn track_for_pitch(&self, pitch: u8) -> usize {
        match self.layout {
            TrackLayout::Single => 0,
            TrackLayout::Split if pitch >= self.split_pitch => 0,
            TrackLayout::Split => 1,
        }
    }

    pub fn track_name(&self, track: usize) -> &'static str {
        match (self.layout, track) {
            (TrackLayout::Single, _) => "Transcription",
            (TrackLayout::Split, 0) => "Upper",
            (TrackLayout::Split, _) => "Lower",
        }
    }
}

/// Export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// MIDI channel of track 0; further tracks use the following channels
    pub channel: u8,
    pub emit_meta_events: bool,
    pub write_analysis: bool,
    pub write_score: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            emit_meta_events: true,
            write_analysis: true,
            write_score: true,
        }
    }
}

/// QA artifacts configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    pub generate_images: bool,
    /// Highest frequency shown in the spectrogram plot
    pub spectrogram_max_hz: f32,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            generate_images: true,
            spectrogram_max_hz: 4200.0,
        }
    }
}

/// Validate configuration parameters
pub fn validate_config(config: &Config) -> Result<()> {
    let invalid = |msg: String| Err(TranscriptionError::InvalidConfig(msg));

    let framing = &config.framing;
    if framing.frame_size < 4 {
        return invalid(format!("frame_size {} is too small", framing.frame_size));
    }
    if framing.hop_size == 0 || framing.hop_size > framing.frame_size {
        return invalid(format!(
            "hop_size must be in 1..={} (got {})",
            framing.frame_size, framing.hop_size
        ));
    }
    if config.analysis.chunk_frames == 0 {
        return invalid("analysis.chunk_frames must be > 0".to_string());
    }

    let detection = &config.detection;
    if !(detection.min_f0_hz > 0.0 && detection.min_f0_hz < detection.max_f0_hz) {
        return invalid("detection f0 range must satisfy 0 < min < max".to_string());
    }
    if detection.max_harmonics == 0 {
        return invalid("detection.max_harmonics must be >= 1".to_string());
    }
    if !(0.0..0.5).contains(&detection.harmonic_tolerance) {
        return invalid("detection.harmonic_tolerance must be in [0, 0.5)".to_string());
    }
    if !(0.0..=1.0).contains(&detection.onset_threshold) {
        return invalid("detection.onset_threshold must be in [0, 1]".to_string());
    }

    let segmentation = &config.segmentation;
    if !(0.0..=1.0).contains(&segmentation.min_confidence) {
        return invalid("segmentation.min_confidence must be in [0, 1]".to_string());
    }
    if segmentation.semitone_tolerance <= 0.0 {
        return invalid("segmentation.semitone_tolerance must be > 0".to_string());
    }
    if segmentation.max_missing_frames == 0 {
        return invalid("segmentation.max_missing_frames must be >= 1".to_string());
    }
    if !(segmentation.rearticulation_ratio > 1.0) {
        return invalid("segmentation.rearticulation_ratio must be > 1".to_string());
    }
    if segmentation.velocity_ceiling_energy <= segmentation.velocity_floor_energy {
        return invalid("velocity ceiling energy must exceed the floor".to_string());
    }

    let quantize = &config.quantize;
    if !(quantize.tempo_bpm.is_finite() && quantize.tempo_bpm >= 4.0) {
        return invalid(format!("tempo {} BPM is out of range", quantize.tempo_bpm));
    }
    if quantize.ticks_per_quarter == 0 || quantize.ticks_per_quarter > 0x7FFF {
        return invalid(format!(
            "ticks_per_quarter {} must be in 1..=32767",
            quantize.ticks_per_quarter
        ));
    }

    if config.tracks.split_pitch > 127 {
        return invalid("tracks.split_pitch must be a MIDI note".to_string());
    }
    if config.export.channel > 15 {
        return invalid(format!("export.channel {} must be 0..=15", config.export.channel));
    }

    Ok(())
}

/// Load configuration from JSON file
pub fn load_config<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Save configuration to JSON file
pub fn save_config<P: AsRef<std::path::Path>>(config: &Config, path: P) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
