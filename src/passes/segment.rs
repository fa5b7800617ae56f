//! Note segmentation: frame-level candidates and onsets into note events

use crate::analysis::NoteEvent;
use crate::config::{SegmentationConfig, TrackConfig};
use crate::error::{Result, TranscriptionError};
use crate::passes::detect::FrameDetection;
use crate::pipeline::CancellationToken;

/// Maps frame indices to time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTiming {
    pub sample_rate: u32,
    pub frame_size: usize,
    pub hop_size: usize,
    pub frame_count: usize,
    /// Input duration in seconds
    pub duration: f32,
}

impl FrameTiming {
    pub fn center(&self, index: usize) -> f32 {
        (index * self.hop_size) as f32 / self.sample_rate as f32
            + self.frame_size as f32 / 2.0 / self.sample_rate as f32
    }

    fn half_hop(&self) -> f32 {
        self.hop_size as f32 / 2.0 / self.sample_rate as f32
    }

    /// Start of the hop cell owned by a frame; the first cell starts at 0
    pub fn cell_start(&self, index: usize) -> f32 {
        if index == 0 {
            0.0
        } else {
            (self.center(index) - self.half_hop()).max(0.0)
        }
    }

    /// End of the hop cell owned by a frame; the last cell ends with the input
    pub fn cell_end(&self, index: usize) -> f32 {
        if index + 1 >= self.frame_count {
            self.duration.max(self.center(index))
        } else {
            (self.center(index) + self.half_hop()).min(self.duration)
        }
    }

    /// Frames the analysis window needs to sweep across an edge
    pub fn ramp_frames(&self) -> usize {
        self.frame_size.div_ceil(self.hop_size.max(1))
    }
}

#[derive(Debug, Clone, Copy)]
struct NoteFrame {
    index: usize,
    pitch: f32,
    energy: f32,
}

/// A note that is still sounding
#[derive(Debug)]
struct ActiveNote {
    opened_at: usize,
    frames: Vec<NoteFrame>,
    missing: usize,
    /// Onset frame and pre-onset energy while a re-strike is being checked
    pending: Option<(usize, f32)>,
}

impl ActiveNote {
    fn last(&self) -> NoteFrame {
        // Opened with one frame, only ever grows
        self.frames[self.frames.len() - 1]
    }
}

/// Segmentation fold state: an arena of active-note slots
struct Segmenter<'a> {
    config: &'a SegmentationConfig,
    tracks: &'a TrackConfig,
    timing: FrameTiming,
    ramp: usize,
    slots: Vec<Option<ActiveNote>>,
    free: Vec<usize>,
    armed_until: usize,
    notes: Vec<NoteEvent>,
    discarded: usize,
}

impl<'a> Segmenter<'a> {
    fn new(config: &'a SegmentationConfig, tracks: &'a TrackConfig, timing: FrameTiming) -> Self {
        Self {
            config,
            tracks,
            timing,
            ramp: timing.ramp_frames(),
            slots: Vec::new(),
            free: Vec::new(),
            armed_until: 0,
            notes: Vec::new(),
            discarded: 0,
        }
    }

    fn open(&mut self, note: ActiveNote) {
        match self.free.pop() {
            Some(slot) => self.slots[slot] = Some(note),
            None => self.slots.push(Some(note)),
        }
    }

    fn close(&mut self, slot: usize) {
        if let Some(note) = self.slots[slot].take() {
            self.free.push(slot);
            match self.finalize(&note.frames) {
                Some(event) => self.notes.push(event),
                None => self.discarded += 1,
            }
        }
    }

    /// End a held note at `onset_at` and continue its later frames as a new note
    fn split(&mut self, slot: usize, onset_at: usize) {
        let Some(mut note) = self.slots[slot].take() else {
            return;
        };
        let cut = note.frames.partition_point(|f| f.index < onset_at);
        let restruck = note.frames.split_off(cut);
        match self.finalize(&note.frames) {
            Some(event) => self.notes.push(event),
            None => self.discarded += 1,
        }
        self.slots[slot] = Some(ActiveNote {
            opened_at: onset_at,
            frames: restruck,
            missing: note.missing,
            pending: None,
        });
    }

    fn step(&mut self, detection: &FrameDetection) {
        let t = detection.index;
        let onset = detection.onset.is_onset;
        if onset || t == 0 {
            self.armed_until = t + self.ramp;
        }

        let candidates = &detection.candidates;
        let pitches: Vec<f32> = candidates.iter().map(|c| c.midi_pitch()).collect();

        // Greedy nearest-pitch matching, one candidate per note
        let mut pairs: Vec<(f32, usize, usize)> = Vec::new();
        for (slot, note) in self.slots.iter().enumerate() {
            let Some(note) = note else { continue };
            let reference = note.last().pitch;
            for (c, &pitch) in pitches.iter().enumerate() {
                let distance = (pitch - reference).abs();
                if distance <= self.config.semitone_tolerance {
                    pairs.push((distance, slot, c));
                }
            }
        }
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut note_match: Vec<Option<usize>> = vec![None; self.slots.len()];
        let mut used = vec![false; candidates.len()];
        for (_, slot, c) in pairs {
            if note_match[slot].is_none() && !used[c] {
                note_match[slot] = Some(c);
                used[c] = true;
            }
        }

        // An onset only re-articulates the held pitches whose own energy
        // rises within the following ramp
        if onset {
            for note in self.slots.iter_mut().flatten() {
                if note.pending.is_none() && t.saturating_sub(note.opened_at) > self.ramp {
                    note.pending = Some((t, note.last().energy));
                }
            }
        }

        let mut restruck = Vec::new();
        for slot in 0..self.slots.len() {
            let Some(note) = self.slots[slot].as_mut() else {
                continue;
            };
            match note_match[slot] {
                Some(c) => {
                    let energy = candidates[c].energy;
                    note.frames.push(NoteFrame {
                        index: t,
                        pitch: pitches[c],
                        energy,
                    });
                    note.missing = 0;
                    if let Some((onset_at, reference)) = note.pending {
                        if t > onset_at + self.ramp {
                            note.pending = None;
                        } else if energy >= self.config.rearticulation_ratio * reference {
                            restruck.push((slot, onset_at));
                        }
                    }
                }
                None => {
                    note.missing += 1;
                    if note.missing >= self.config.max_missing_frames {
                        self.close(slot);
                    }
                }
            }
        }
        for (slot, onset_at) in restruck {
            self.split(slot, onset_at);
        }

        if t < self.armed_until {
            for (c, candidate) in candidates.iter().enumerate() {
                if used[c] || candidate.confidence < self.config.min_confidence {
                    continue;
                }
                self.open(ActiveNote {
                    opened_at: t,
                    frames: vec![NoteFrame {
                        index: t,
                        pitch: pitches[c],
                        energy: candidate.energy,
                    }],
                    missing: 0,
                    pending: None,
                });
            }
        }
    }

    /// Trim window smear off both edges and turn the frames into a note
    fn finalize(&self, frames: &[NoteFrame]) -> Option<NoteEvent> {
        let reach = 2 * self.ramp;
        let ratio = self.config.edge_energy_ratio;

        let attack = frames.iter().take(reach).map(|f| f.energy).fold(0.0f32, f32::max);
        let first = frames.iter().position(|f| f.energy >= ratio * attack)?;
        let frames = &frames[first..];

        let last = self.release_end(frames, ratio)?;
        let frames = &frames[..=last];

        let start = self.timing.cell_start(frames[0].index);
        let end = self.timing.cell_end(frames[frames.len() - 1].index);
        let duration = end - start;
        if duration * 1000.0 < self.config.min_duration_ms || duration <= 0.0 {
            return None;
        }

        let mut pitches: Vec<f32> = frames.iter().map(|f| f.pitch).collect();
        pitches.sort_by(f32::total_cmp);
        let mid = pitches.len() / 2;
        let median = if pitches.len() % 2 == 0 {
            (pitches[mid - 1] + pitches[mid]) / 2.0
        } else {
            pitches[mid]
        };
        let pitch = median.round().clamp(0.0, 127.0) as u8;

        Some(NoteEvent {
            pitch,
            start,
            duration,
            velocity: energy_to_velocity(
                attack,
                self.config.velocity_floor_energy,
                self.config.velocity_ceiling_energy,
            ),
            track: self.tracks.track_for_pitch(pitch),
        })
    }

    /// Index of the last frame kept once the release smear is trimmed.
    ///
    /// Only the final `ramp` frames can hold smear. They are compared with the
    /// energy just before them, carried forward at the decay rate measured
    /// over the preceding ramp, so a decaying note keeps its natural tail.
    fn release_end(&self, frames: &[NoteFrame], ratio: f32) -> Option<usize> {
        let span = frames.len().saturating_sub(self.ramp);
        if span == 0 {
            let release = frames.iter().map(|f| f.energy).fold(0.0f32, f32::max);
            return frames.iter().rposition(|f| f.energy >= ratio * release);
        }

        let anchor = frames[span - 1].energy;
        let rate = if span > self.ramp && frames[span - 1 - self.ramp].energy > 0.0 {
            (anchor / frames[span - 1 - self.ramp].energy)
                .powf(1.0 / self.ramp as f32)
                .min(1.0)
        } else {
            1.0
        };

        let kept = frames[span..]
            .iter()
            .enumerate()
            .rposition(|(k, f)| f.energy >= ratio * anchor * rate.powi(k as i32 + 1));
        Some(kept.map_or(span - 1, |k| span + k))
    }

    fn finish(mut self) -> (Vec<NoteEvent>, usize) {
        for slot in 0..self.slots.len() {
            self.close(slot);
        }
        self.notes.sort_by(|a, b| {
            a.start
                .total_cmp(&b.start)
                .then(a.pitch.cmp(&b.pitch))
        });
        (self.notes, self.discarded)
    }
}

/// Linear energy-to-velocity map, clipped to 1..=127
pub fn energy_to_velocity(energy: f32, floor: f32, ceiling: f32) -> u8 {
    let span = (ceiling - floor).max(f32::EPSILON);
    let scaled = 1.0 + (energy - floor) / span * 126.0;
    scaled.round().clamp(1.0, 127.0) as u8
}

/// Segment frame detections into note events
pub fn segment(
    detections: &[FrameDetection],
    timing: FrameTiming,
    config: &SegmentationConfig,
    tracks: &TrackConfig,
    cancel: &CancellationToken,
    check_every: usize,
) -> Result<Vec<NoteEvent>> {
    let check_every = check_every.max(1);

    let segmenter = detections.iter().enumerate().try_fold(
        Segmenter::new(config, tracks, timing),
        |mut segmenter, (i, detection)| {
            if i % check_every == 0 {
                cancel.check()?;
            }
            segmenter.step(detection);
            Ok::<_, TranscriptionError>(segmenter)
        },
    )?;

    let (notes, discarded) = segmenter.finish();
    log::debug!(
        "Segmented {} notes ({} discarded as too short)",
        notes.len(),
        discarded
    );
    Ok(notes)
}
