//! Notation settings and the score hand-off consumed by an engraver

use crate::analysis::QuantizedNoteEvent;
use crate::config::{QuantizeConfig, TrackConfig, TrackLayout};
use crate::error::{Result, TranscriptionError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Staff clef
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Clef {
    Treble,
    Bass,
    Alto,
}

impl Clef {
    pub fn name(&self) -> &'static str {
        match self {
            Clef::Treble => "treble",
            Clef::Bass => "bass",
            Clef::Alto => "alto",
        }
    }
}

const MAJOR_KEYS: [&str; 15] = [
    "Cb", "Gb", "Db", "Ab", "Eb", "Bb", "F", "C", "G", "D", "A", "E", "B", "F#", "C#",
];
const MINOR_KEYS: [&str; 15] = [
    "Ab", "Eb", "Bb", "F", "C", "G", "D", "A", "E", "B", "F#", "C#", "G#", "D#", "A#",
];

/// Key signature as a position on the circle of fifths.
///
/// Written as a tonic with optional accidental and an `m` suffix for minor:
/// `"C"`, `"Bb"`, `"F#m"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeySignature {
    sharps: i8,
    minor: bool,
}

impl KeySignature {
    pub fn new(sharps: i8, minor: bool) -> Result<Self> {
        if !(-7..=7).contains(&sharps) {
            return Err(TranscriptionError::InvalidConfig(format!(
                "key signature with {} accidentals",
                sharps
            )));
        }
        Ok(Self { sharps, minor })
    }

    /// Positive for sharps, negative for flats
    pub fn sharps(&self) -> i8 {
        self.sharps
    }

    pub fn is_minor(&self) -> bool {
        self.minor
    }

    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || TranscriptionError::InvalidConfig(format!("unknown key signature {:?}", text));

        let text = text.trim();
        let (tonic, minor) = match text.strip_suffix('m') {
            Some(rest) => (rest, true),
            None => (text, false),
        };

        let mut chars = tonic.chars();
        let letter = chars.next().ok_or_else(invalid)?;
        let mut fifths: i8 = match letter.to_ascii_uppercase() {
            'F' => -1,
            'C' => 0,
            'G' => 1,
            'D' => 2,
            'A' => 3,
            'E' => 4,
            'B' => 5,
            _ => return Err(invalid()),
        };
        match chars.as_str() {
            "" => {}
            "#" => fifths += 7,
            "b" => fifths -= 7,
            _ => return Err(invalid()),
        }
        if minor {
            fifths -= 3;
        }

        Self::new(fifths, minor).map_err(|_| invalid())
    }

    /// Pitch-class names spelled for this key
    fn pitch_names(&self) -> [&'static str; 12] {
        if self.sharps >= 0 {
            ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"]
        } else {
            ["C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B"]
        }
    }

    /// Scientific pitch name of a MIDI note, e.g. 60 -> "C4"
    pub fn spell(&self, pitch: u8) -> String {
        let octave = pitch as i32 / 12 - 1;
        format!("{}{}", self.pitch_names()[(pitch % 12) as usize], octave)
    }
}

impl fmt::Display for KeySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let index = (self.sharps + 7) as usize;
        if self.minor {
            write!(f, "{}m", MINOR_KEYS[index])
        } else {
            write!(f, "{}", MAJOR_KEYS[index])
        }
    }
}

impl TryFrom<String> for KeySignature {
    type Error = TranscriptionError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<KeySignature> for String {
    fn from(key: KeySignature) -> Self {
        key.to_string()
    }
}

/// Meter such as `"4/4"` or `"6/8"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeSignature {
    numerator: u8,
    denominator: u8,
}

impl TimeSignature {
    pub fn new(numerator: u8, denominator: u8) -> Result<Self> {
        if numerator == 0 || numerator > 32 {
            return Err(TranscriptionError::InvalidConfig(format!(
                "time signature numerator {} out of range",
                numerator
            )));
        }
        if !denominator.is_power_of_two() || denominator > 64 {
            return Err(TranscriptionError::InvalidConfig(format!(
                "time signature denominator {} must be a power of two up to 64",
                denominator
            )));
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || TranscriptionError::InvalidConfig(format!("unknown time signature {:?}", text));
        let (num, den) = text.trim().split_once('/').ok_or_else(invalid)?;
        let numerator = num.trim().parse::<u8>().map_err(|_| invalid())?;
        let denominator = den.trim().parse::<u8>().map_err(|_| invalid())?;
        Self::new(numerator, denominator)
    }

    pub fn numerator(&self) -> u8 {
        self.numerator
    }

    pub fn denominator(&self) -> u8 {
        self.denominator
    }

    /// Denominator as the power of two used by the MIDI meta event
    pub fn denominator_log2(&self) -> u8 {
        self.denominator.trailing_zeros() as u8
    }

    /// Ticks in one beat of this meter at the given resolution
    pub fn ticks_per_beat(&self, ticks_per_quarter: u16) -> u32 {
        (ticks_per_quarter as u32 * 4 / self.denominator as u32).max(1)
    }

    pub fn ticks_per_measure(&self, ticks_per_quarter: u16) -> u32 {
        self.ticks_per_beat(ticks_per_quarter) * self.numerator as u32
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl TryFrom<String> for TimeSignature {
    type Error = TranscriptionError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TimeSignature> for String {
    fn from(meter: TimeSignature) -> Self {
        meter.to_string()
    }
}

/// Sheet-music settings forwarded to the engraver and the MIDI header track
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotationSettings {
    pub clef: Clef,
    pub key_signature: KeySignature,
    pub time_signature: TimeSignature,
}

impl Default for NotationSettings {
    fn default() -> Self {
        Self {
            clef: Clef::Treble,
            key_signature: KeySignature::default(),
            time_signature: TimeSignature::default(),
        }
    }
}

/// One note positioned on a staff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreNote {
    pub pitch: u8,
    pub name: String,
    pub start_tick: u32,
    pub duration_ticks: u32,
    pub velocity: u8,
    /// 1-based measure number
    pub measure: u32,
    /// 1-based beat within the measure; fractional for off-beat starts
    pub beat: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreStaff {
    pub track: usize,
    pub name: String,
    pub clef: Clef,
    pub notes: Vec<ScoreNote>,
}

/// Everything an engraver needs to lay out the transcription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreHandoff {
    pub tempo_bpm: f32,
    pub ticks_per_quarter: u16,
    pub key_signature: KeySignature,
    pub time_signature: TimeSignature,
    pub measures: u32,
    pub staves: Vec<ScoreStaff>,
}

/// Place quantized notes on staves, measures and beats
pub fn build_score(
    notes: &[QuantizedNoteEvent],
    tracks: &TrackConfig,
    quantize: &QuantizeConfig,
    settings: &NotationSettings,
) -> ScoreHandoff {
    let tpq = quantize.ticks_per_quarter;
    let meter = settings.time_signature;
    let ticks_per_beat = meter.ticks_per_beat(tpq);
    let ticks_per_measure = meter.ticks_per_measure(tpq);

    let mut staves: Vec<ScoreStaff> = (0..tracks.track_count())
        .map(|track| ScoreStaff {
            track,
            name: tracks.track_name(track).to_string(),
            clef: match (tracks.layout, track) {
                (TrackLayout::Split, 1) => Clef::Bass,
                _ => settings.clef,
            },
            notes: Vec::new(),
        })
        .collect();

    let mut last_tick = 0u32;
    for note in notes {
        let Some(staff) = staves.get_mut(note.track) else {
            log::warn!("Note on unknown track {} left out of score", note.track);
            continue;
        };
        let in_measure = note.start_tick % ticks_per_measure;
        staff.notes.push(ScoreNote {
            pitch: note.pitch,
            name: settings.key_signature.spell(note.pitch),
            start_tick: note.start_tick,
            duration_ticks: note.duration_ticks,
            velocity: note.velocity,
            measure: note.start_tick / ticks_per_measure + 1,
            beat: 1.0 + in_measure as f32 / ticks_per_beat as f32,
        });
        last_tick = last_tick.max(note.end_tick());
    }

    for staff in &mut staves {
        staff.notes.sort_by_key(|n| (n.start_tick, n.pitch));
    }

    ScoreHandoff {
        tempo_bpm: quantize.tempo_bpm,
        ticks_per_quarter: tpq,
        key_signature: settings.key_signature,
        time_signature: meter,
        measures: last_tick.div_ceil(ticks_per_measure),
        staves,
    }
}

/// Write `score.json`
pub fn export_score(score: &ScoreHandoff, output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)?;
    let score_path = output_dir.join("score.json");
    let json = serde_json::to_string_pretty(score)?;
    std::fs::write(&score_path, json)?;
    log::info!("Exported score hand-off to {}", score_path.display());
    Ok(())
}
