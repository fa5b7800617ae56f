//! Quantization of note times to MIDI ticks

use crate::analysis::{NoteEvent, QuantizedNoteEvent};
use crate::config::QuantizeConfig;
use crate::error::{Result, TranscriptionError};

/// Fixed-tempo mapping between seconds and ticks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickGrid {
    tempo_bpm: f32,
    ticks_per_quarter: u16,
}

impl TickGrid {
    pub fn new(tempo_bpm: f32, ticks_per_quarter: u16) -> Result<Self> {
        if !(tempo_bpm.is_finite() && tempo_bpm > 0.0) {
            return Err(TranscriptionError::InvalidConfig(format!(
                "tempo {} BPM must be positive",
                tempo_bpm
            )));
        }
        if ticks_per_quarter == 0 || ticks_per_quarter > 0x7FFF {
            return Err(TranscriptionError::InvalidConfig(format!(
                "ticks per quarter {} must be in 1..=32767",
                ticks_per_quarter
            )));
        }
        Ok(Self {
            tempo_bpm,
            ticks_per_quarter,
        })
    }

    pub fn from_config(config: &QuantizeConfig) -> Result<Self> {
        Self::new(config.tempo_bpm, config.ticks_per_quarter)
    }

    pub fn tempo_bpm(&self) -> f32 {
        self.tempo_bpm
    }

    pub fn ticks_per_quarter(&self) -> u16 {
        self.ticks_per_quarter
    }

    pub fn ticks_per_second(&self) -> f64 {
        self.tempo_bpm as f64 / 60.0 * self.ticks_per_quarter as f64
    }

    /// Microseconds per quarter note, as carried by the MIDI tempo event
    pub fn micros_per_quarter(&self) -> u32 {
        (60_000_000.0 / self.tempo_bpm as f64).round() as u32
    }

    /// Nearest tick; negative times clamp to 0
    pub fn to_ticks(&self, seconds: f32) -> u32 {
        let ticks = (seconds.max(0.0) as f64 * self.ticks_per_second()).round();
        ticks.min(u32::MAX as f64) as u32
    }

    pub fn to_seconds(&self, ticks: u32) -> f32 {
        (ticks as f64 / self.ticks_per_second()) as f32
    }
}

/// Snap notes to the tick grid.
///
/// Start and duration are rounded independently. Where two notes on the same
/// track and pitch overlap, the earlier one is cut at the later one's start;
/// notes left with no duration are dropped. Output is ordered by start tick.
pub fn quantize(notes: &[NoteEvent], grid: &TickGrid) -> Vec<QuantizedNoteEvent> {
    let mut quantized: Vec<QuantizedNoteEvent> = notes
        .iter()
        .map(|note| QuantizedNoteEvent {
            pitch: note.pitch,
            start_tick: grid.to_ticks(note.start),
            duration_ticks: grid.to_ticks(note.duration),
            velocity: note.velocity,
            track: note.track,
        })
        .filter(|note| note.duration_ticks > 0)
        .collect();

    quantized.sort_by_key(|n| (n.track, n.pitch, n.start_tick, n.duration_ticks));

    let mut truncated = 0usize;
    for i in 1..quantized.len() {
        let (head, tail) = quantized.split_at_mut(i);
        let previous = &mut head[i - 1];
        let current = &tail[0];
        if previous.track != current.track || previous.pitch != current.pitch {
            continue;
        }
        if previous.end_tick() > current.start_tick {
            previous.duration_ticks = current.start_tick - previous.start_tick;
            truncated += 1;
        }
    }

    quantized.retain(|n| n.duration_ticks > 0);
    quantized.sort_by_key(|n| (n.start_tick, n.track, n.pitch));

    log::debug!(
        "Quantized {} notes to {} ticks/quarter at {} BPM ({} truncated, {} dropped)",
        quantized.len(),
        grid.ticks_per_quarter,
        grid.tempo_bpm,
        truncated,
        notes.len() - quantized.len()
    );
    quantized
}
