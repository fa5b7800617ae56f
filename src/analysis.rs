//! Note data model and the JSON analysis report

use crate::config::Config;
use crate::pipeline::Transcription;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A detected note in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    /// MIDI note number
    pub pitch: u8,
    pub start: f32,
    pub duration: f32,
    /// 1..=127
    pub velocity: u8,
    pub track: usize,
}

impl NoteEvent {
    pub fn end(&self) -> f32 {
        self.start + self.duration
    }
}

/// A note snapped to the tick grid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizedNoteEvent {
    pub pitch: u8,
    pub start_tick: u32,
    pub duration_ticks: u32,
    pub velocity: u8,
    pub track: usize,
}

impl QuantizedNoteEvent {
    pub fn end_tick(&self) -> u32 {
        self.start_tick.saturating_add(self.duration_ticks)
    }
}

/// One output track as handed to the MIDI assembler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiTrackData {
    pub name: String,
    pub channel: u8,
    pub notes: Vec<QuantizedNoteEvent>,
}

/// Export analysis results to JSON
pub fn export_analysis(
    transcription: &Transcription,
    config: &Config,
    output_dir: &Path,
) -> crate::error::Result<()> {
    std::fs::create_dir_all(output_dir)?;
    let analysis_path = output_dir.join("analysis.json");

    let report = build_report(transcription, config);
    let json = serde_json::to_string_pretty(&report)?;
    std::fs::write(&analysis_path, json)?;

    log::info!("Exported analysis results to {}", analysis_path.display());
    Ok(())
}

/// Assemble the report structure without touching the filesystem
pub fn build_report(transcription: &Transcription, config: &Config) -> AnalysisReport {
    let notes = &transcription.notes;
    let velocities: Vec<f32> = notes.iter().map(|n| n.velocity as f32).collect();

    AnalysisReport {
        version: env!("CARGO_PKG_VERSION").to_string(),
        audio_info: AudioInfo {
            duration_seconds: transcription.duration_sec,
            sample_rate: transcription.sample_rate,
            channels: transcription.channels,
            frames_analyzed: transcription.frame_count,
        },
        settings: SettingsSummary {
            frame_size: config.framing.frame_size,
            hop_size: config.framing.hop_size,
            tempo_bpm: config.quantize.tempo_bpm,
            ticks_per_quarter: config.quantize.ticks_per_quarter,
            track_layout: format!("{:?}", config.tracks.layout).to_lowercase(),
        },
        summary: NoteSummary {
            note_count: notes.len(),
            quantized_count: transcription.quantized.len(),
            onset_count: transcription.onsets.iter().filter(|o| o.is_onset).count(),
            lowest_pitch: notes.iter().map(|n| n.pitch).min(),
            highest_pitch: notes.iter().map(|n| n.pitch).max(),
            mean_velocity: if velocities.is_empty() {
                0.0
            } else {
                velocities.iter().sum::<f32>() / velocities.len() as f32
            },
            notes_per_track: transcription
                .tracks
                .iter()
                .map(|t| TrackSummary {
                    name: t.name.clone(),
                    channel: t.channel,
                    notes: t.notes.len(),
                })
                .collect(),
            midi_bytes: transcription.midi.len(),
        },
        notes: notes.clone(),
        quantized_notes: transcription.quantized.clone(),
        onset_times: transcription
            .onsets
            .iter()
            .filter(|o| o.is_onset)
            .map(|o| o.time)
            .collect(),
    }
}

#[derive(Debug, Serialize)]
pub struct AnalysisReport {
    pub version: String,
    pub audio_info: AudioInfo,
    pub settings: SettingsSummary,
    pub summary: NoteSummary,
    pub notes: Vec<NoteEvent>,
    pub quantized_notes: Vec<QuantizedNoteEvent>,
    pub onset_times: Vec<f32>,
}

#[derive(Debug, Serialize)]
pub struct AudioInfo {
    pub duration_seconds: f32,
    pub sample_rate: u32,
    pub channels: u16,
    pub frames_analyzed: usize,
}

#[derive(Debug, Serialize)]
pub struct SettingsSummary {
    pub frame_size: usize,
    pub hop_size: usize,
    pub tempo_bpm: f32,
    pub ticks_per_quarter: u16,
    pub track_layout: String,
}

#[derive(Debug, Serialize)]
pub struct NoteSummary {
    pub note_count: usize,
    pub quantized_count: usize,
    pub onset_count: usize,
    pub lowest_pitch: Option<u8>,
    pub highest_pitch: Option<u8>,
    pub mean_velocity: f32,
    pub notes_per_track: Vec<TrackSummary>,
    pub midi_bytes: usize,
}

#[derive(Debug, Serialize)]
pub struct TrackSummary {
    pub name: String,
    pub channel: u8,
    pub notes: usize,
}
