//! Standard MIDI File assembly and export

use crate::analysis::{MidiTrackData, QuantizedNoteEvent};
use crate::config::{Config, TrackConfig};
use crate::error::{Result, TranscriptionError};
use crate::notation::{KeySignature, TimeSignature};
use crate::passes::quantize::TickGrid;
use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::path::Path;

const MAX_DELTA: u32 = (1 << 28) - 1;

/// Header-track settings for the assembled file
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyOptions {
    pub ticks_per_quarter: u16,
    pub micros_per_quarter: u32,
    /// Emit tempo, time and key signature on track 0
    pub emit_meta_events: bool,
    pub time_signature: TimeSignature,
    pub key_signature: KeySignature,
}

impl AssemblyOptions {
    pub fn new(grid: &TickGrid, config: &Config) -> Self {
        Self {
            ticks_per_quarter: grid.ticks_per_quarter(),
            micros_per_quarter: grid.micros_per_quarter(),
            emit_meta_events: config.export.emit_meta_events,
            time_signature: config.notation.time_signature,
            key_signature: config.notation.key_signature,
        }
    }
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            ticks_per_quarter: 480,
            micros_per_quarter: 500_000,
            emit_meta_events: true,
            time_signature: TimeSignature::default(),
            key_signature: KeySignature::default(),
        }
    }
}

/// Distribute quantized notes over the configured tracks
pub fn build_tracks(
    notes: &[QuantizedNoteEvent],
    tracks: &TrackConfig,
    base_channel: u8,
) -> Vec<MidiTrackData> {
    (0..tracks.track_count())
        .map(|track| MidiTrackData {
            name: tracks.track_name(track).to_string(),
            channel: (base_channel as usize + track).min(15) as u8,
            notes: notes.iter().filter(|n| n.track == track).cloned().collect(),
        })
        .collect()
}

/// Absolute-time event before delta encoding
#[derive(Debug, Clone, Copy)]
struct TimedEvent {
    tick: u32,
    /// Note-Off sorts before Note-On at the same tick
    order: u8,
    kind: TrackEventKind<'static>,
}

fn check_range(value: u8, max: u8, what: &str, track: usize) -> Result<()> {
    if value > max {
        return Err(TranscriptionError::Assembly(format!(
            "{} {} out of range on track {}",
            what, value, track
        )));
    }
    Ok(())
}

fn note_events(track_index: usize, track: &MidiTrackData) -> Result<Vec<TimedEvent>> {
    check_range(track.channel, 15, "channel", track_index)?;
    let channel = u4::new(track.channel);

    let mut events = Vec::with_capacity(track.notes.len() * 2);
    for note in &track.notes {
        check_range(note.pitch, 127, "pitch", track_index)?;
        check_range(note.velocity, 127, "velocity", track_index)?;
        if note.velocity == 0 {
            return Err(TranscriptionError::Assembly(format!(
                "zero velocity for pitch {} on track {}",
                note.pitch, track_index
            )));
        }
        if note.duration_ticks == 0 {
            return Err(TranscriptionError::Assembly(format!(
                "zero-length note at tick {} on track {}",
                note.start_tick, track_index
            )));
        }
        let end = note.start_tick.checked_add(note.duration_ticks).ok_or_else(|| {
            TranscriptionError::Assembly(format!("note end overflows at tick {}", note.start_tick))
        })?;

        let key = u7::new(note.pitch);
        events.push(TimedEvent {
            tick: note.start_tick,
            order: 1,
            kind: TrackEventKind::Midi {
                channel,
                message: MidiMessage::NoteOn {
                    key,
                    vel: u7::new(note.velocity),
                },
            },
        });
        events.push(TimedEvent {
            tick: end,
            order: 0,
            kind: TrackEventKind::Midi {
                channel,
                message: MidiMessage::NoteOff {
                    key,
                    vel: u7::new(0),
                },
            },
        });
    }

    // Stable: equal (tick, order) keep note order
    events.sort_by_key(|e| (e.tick, e.order));
    Ok(events)
}

fn header_events(options: &AssemblyOptions) -> Result<Vec<TrackEventKind<'static>>> {
    if options.micros_per_quarter == 0 || options.micros_per_quarter > 0xFF_FFFF {
        return Err(TranscriptionError::Assembly(format!(
            "tempo of {} us per quarter does not fit the tempo event",
            options.micros_per_quarter
        )));
    }
    let meter = options.time_signature;
    let key = options.key_signature;

    Ok(vec![
        TrackEventKind::Meta(MetaMessage::Tempo(u24::new(options.micros_per_quarter))),
        TrackEventKind::Meta(MetaMessage::TimeSignature(
            meter.numerator(),
            meter.denominator_log2(),
            24, // MIDI clocks per metronome click
            8,  // 32nd notes per quarter note
        )),
        TrackEventKind::Meta(MetaMessage::KeySignature(key.sharps(), key.is_minor())),
    ])
}

/// Encode tracks as a Standard MIDI File.
///
/// One track yields format 0, more yield format 1. Events are delta-encoded
/// in absolute tick order and every track ends with End-of-Track.
pub fn assemble(tracks: &[MidiTrackData], options: &AssemblyOptions) -> Result<Vec<u8>> {
    if tracks.is_empty() {
        return Err(TranscriptionError::Assembly("no tracks to write".to_string()));
    }
    if tracks.len() > u16::MAX as usize {
        return Err(TranscriptionError::Assembly(format!(
            "{} tracks exceed the SMF limit of {}",
            tracks.len(),
            u16::MAX
        )));
    }
    if options.ticks_per_quarter == 0 || options.ticks_per_quarter > 0x7FFF {
        return Err(TranscriptionError::Assembly(format!(
            "division {} is not a valid ticks-per-quarter value",
            options.ticks_per_quarter
        )));
    }

    let mut smf_tracks: Vec<Vec<TrackEvent>> = Vec::with_capacity(tracks.len());
    for (index, track) in tracks.iter().enumerate() {
        let mut events: Vec<TrackEvent> = vec![TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::TrackName(track.name.as_bytes())),
        }];
        if index == 0 && options.emit_meta_events {
            events.extend(header_events(options)?.into_iter().map(|kind| TrackEvent {
                delta: u28::new(0),
                kind,
            }));
        }

        let mut current_tick = 0u32;
        for event in note_events(index, track)? {
            let delta = event.tick.checked_sub(current_tick).ok_or_else(|| {
                TranscriptionError::Assembly(format!(
                    "negative delta at tick {} on track {}",
                    event.tick, index
                ))
            })?;
            if delta > MAX_DELTA {
                return Err(TranscriptionError::Assembly(format!(
                    "delta of {} ticks exceeds 28 bits on track {}",
                    delta, index
                )));
            }
            events.push(TrackEvent {
                delta: u28::new(delta),
                kind: event.kind,
            });
            current_tick = event.tick;
        }

        events.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });
        smf_tracks.push(events);
    }

    let header = Header {
        format: if smf_tracks.len() == 1 {
            Format::SingleTrack
        } else {
            Format::Parallel
        },
        timing: Timing::Metrical(u15::new(options.ticks_per_quarter)),
    };
    let smf = Smf {
        header,
        tracks: smf_tracks,
    };

    let mut bytes = Vec::new();
    smf.write(&mut bytes)
        .map_err(|e| TranscriptionError::Assembly(format!("failed to write MIDI data: {:?}", e)))?;
    Ok(bytes)
}

/// Write `transcription.mid`
pub fn export_midi(midi: &[u8], output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)?;
    let midi_path = output_dir.join("transcription.mid");
    std::fs::write(&midi_path, midi)?;
    log::info!("Exported {} bytes of MIDI to {}", midi.len(), midi_path.display());
    Ok(())
}
