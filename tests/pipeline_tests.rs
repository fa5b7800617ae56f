//! End-to-end transcription tests on synthetic recordings

use audio2midi::config::{Config, TrackLayout};
use audio2midi::pipeline::{NoOpListener, PipelineEvent, ProgressListener, Stage};
use audio2midi::{
    CancellationToken, JobState, MemorySource, PcmBuffer, Pipeline, Transcriber,
    TranscriptionError, TranscriptionJob,
};
use midly::{MidiMessage, Smf, TrackEventKind};
use std::f32::consts::PI;

const SR: u32 = 44100;

fn midi_to_hz(pitch: u8) -> f32 {
    440.0 * 2f32.powf((pitch as f32 - 69.0) / 12.0)
}

/// Sum of sines at the given pitches, padded with 0.25 s of silence either side
fn generate_tones(pitches: &[u8], seconds: f32) -> Vec<f32> {
    let pad = vec![0.0; SR as usize / 4];
    let n = (seconds * SR as f32) as usize;
    let amplitude = 0.5 / pitches.len().max(1) as f32;

    let mut audio = pad.clone();
    audio.extend((0..n).map(|i| {
        let t = i as f32 / SR as f32;
        pitches
            .iter()
            .map(|&p| amplitude * (2.0 * PI * midi_to_hz(p) * t).sin())
            .sum::<f32>()
    }));
    audio.extend(pad);
    audio
}

/// Sines that each sound over their own `(pitch, start, end)` span, after 0.25 s of silence
fn generate_voices(voices: &[(u8, f32, f32)], seconds: f32) -> Vec<f32> {
    let pad = SR as usize / 4;
    let n = (seconds * SR as f32) as usize;
    let mut audio = vec![0.0; pad];
    audio.extend((0..n).map(|i| {
        let t = i as f32 / SR as f32;
        voices
            .iter()
            .filter(|&&(_, start, end)| t >= start && t < end)
            .map(|&(p, _, _)| 0.25 * (2.0 * PI * midi_to_hz(p) * t).sin())
            .sum::<f32>()
    }));
    audio.extend(vec![0.0; pad]);
    audio
}

/// Struck A4 tones decaying as `exp(-3t)`, cut off at the end of the input
fn generate_strikes(strikes: &[f32], seconds: f32) -> Vec<f32> {
    let pad = SR as usize / 4;
    let n = (seconds * SR as f32) as usize;
    let mut audio = vec![0.0; pad];
    audio.extend((0..n).map(|i| {
        let t = i as f32 / SR as f32;
        strikes
            .iter()
            .filter(|&&s| t >= s)
            .map(|&s| 0.5 * (-3.0 * (t - s)).exp() * (2.0 * PI * 440.0 * (t - s)).sin())
            .sum::<f32>()
    }));
    audio.extend(vec![0.0; pad]);
    audio
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.qa.generate_images = false;
    config
}

fn transcribe(samples: Vec<f32>, config: Config) -> audio2midi::Transcription {
    let buffer = PcmBuffer::mono(samples, SR).unwrap();
    Pipeline::new(config)
        .unwrap()
        .transcribe(&buffer, &CancellationToken::new(), &mut NoOpListener)
        .unwrap()
}

fn note_on_count(bytes: &[u8]) -> usize {
    let smf = Smf::parse(bytes).unwrap();
    smf.tracks
        .iter()
        .flatten()
        .filter(|e| {
            matches!(
                e.kind,
                TrackEventKind::Midi {
                    message: MidiMessage::NoteOn { .. },
                    ..
                }
            )
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_yields_no_notes() {
        let result = transcribe(vec![0.0; SR as usize], test_config());
        assert!(result.notes.is_empty());
        assert!(result.quantized.is_empty());

        let smf = Smf::parse(&result.midi).unwrap();
        assert_eq!(smf.tracks.len(), 1);
        assert_eq!(note_on_count(&result.midi), 0);
    }

    #[test]
    fn test_single_tone_is_one_note() {
        let result = transcribe(generate_tones(&[69], 1.0), test_config());

        assert_eq!(result.notes.len(), 1, "notes: {:?}", result.notes);
        let note = &result.notes[0];
        assert_eq!(note.pitch, 69);
        assert!((note.start - 0.25).abs() < 0.05, "start {}", note.start);
        assert!((note.duration - 1.0).abs() < 0.05, "duration {}", note.duration);
        assert!(note.velocity >= 1 && note.velocity <= 127);
        assert_eq!(note_on_count(&result.midi), 1);
    }

    #[test]
    fn test_dyad_yields_both_pitches() {
        let result = transcribe(generate_tones(&[60, 64], 2.0), test_config());
        let notes = &result.notes;
        let pitches: Vec<u8> = notes.iter().map(|n| n.pitch).collect();
        assert_eq!(notes.len(), 2, "notes: {:?}", notes);
        assert!(pitches.contains(&60) && pitches.contains(&64), "pitches: {:?}", pitches);
        assert!(notes[0].start < notes[1].end() && notes[1].start < notes[0].end());
        for note in notes {
            assert!((note.duration - 2.0).abs() < 0.05, "duration {}", note.duration);
        }
    }

    #[test]
    fn test_entering_voice_does_not_split_held_note() {
        let audio = generate_voices(&[(60, 0.0, 2.0), (64, 1.0, 2.0)], 2.0);
        let result = transcribe(audio, test_config());

        let held: Vec<_> = result.notes.iter().filter(|n| n.pitch == 60).collect();
        assert_eq!(held.len(), 1, "notes: {:?}", result.notes);
        assert!(held[0].duration > 1.9, "duration {}", held[0].duration);

        let entering: Vec<_> = result.notes.iter().filter(|n| n.pitch == 64).collect();
        assert_eq!(entering.len(), 1, "notes: {:?}", result.notes);
        assert!((entering[0].start - 1.25).abs() < 0.05, "start {}", entering[0].start);
    }

    #[test]
    fn test_legato_line_has_no_fragments() {
        let audio = generate_voices(
            &[(60, 0.0, 0.4), (62, 0.4, 0.8), (64, 0.8, 1.2), (65, 1.2, 1.6)],
            1.6,
        );
        let result = transcribe(audio, test_config());
        let pitches: Vec<u8> = result.notes.iter().map(|n| n.pitch).collect();
        assert_eq!(pitches, vec![60, 62, 64, 65], "notes: {:?}", result.notes);
    }

    #[test]
    fn test_decaying_strikes_keep_their_length() {
        let result = transcribe(generate_strikes(&[0.0, 0.5], 1.0), test_config());

        assert_eq!(result.notes.len(), 2, "notes: {:?}", result.notes);
        for note in &result.notes {
            assert_eq!(note.pitch, 69);
            assert!((note.duration - 0.5).abs() < 0.05, "duration {}", note.duration);
        }
        assert!((result.notes[1].start - 0.75).abs() < 0.05);
    }

    #[test]
    fn test_split_layout_writes_two_tracks() {
        let mut config = test_config();
        config.tracks.layout = TrackLayout::Split;
        let result = transcribe(generate_tones(&[48, 71], 1.0), config);

        assert_eq!(result.tracks.len(), 2);
        let smf = Smf::parse(&result.midi).unwrap();
        assert_eq!(smf.header.format, midly::Format::Parallel);
        assert_eq!(smf.tracks.len(), 2);
        for note in &result.quantized {
            assert_eq!(note.track, usize::from(note.pitch < 60));
        }
    }

    #[test]
    fn test_transcription_is_deterministic() {
        let audio = generate_tones(&[57, 64], 1.0);
        let first = transcribe(audio.clone(), test_config());

        let mut sequential = test_config();
        sequential.analysis.parallel = false;
        let second = transcribe(audio, sequential);

        assert_eq!(first.notes, second.notes);
        assert_eq!(first.midi, second.midi);
    }

    struct CancelAt {
        token: CancellationToken,
        percent: u8,
        events: Vec<PipelineEvent>,
    }

    impl ProgressListener for CancelAt {
        fn on_event(&mut self, event: PipelineEvent) {
            if let PipelineEvent::Progress { percent, .. } = event {
                if percent >= self.percent {
                    self.token.cancel();
                }
            }
            self.events.push(event);
        }
    }

    #[test]
    fn test_cancellation_mid_analysis() {
        let mut config = test_config();
        config.analysis.chunk_frames = 4;
        let token = CancellationToken::new();
        let mut listener = CancelAt {
            token: token.clone(),
            percent: 22,
            events: Vec::new(),
        };

        let buffer = PcmBuffer::mono(generate_tones(&[69], 2.0), SR).unwrap();
        let mut job = TranscriptionJob::new(MemorySource::new(buffer), Pipeline::new(config).unwrap());
        assert_eq!(job.run(&token, &mut listener), &JobState::Cancelled);
        assert!(job.result().is_none());
        assert!(!listener
            .events
            .contains(&PipelineEvent::StageStarted(Stage::Detecting)));
        assert!(job.history().contains(&JobState::Analyzing));
    }

    #[test]
    fn test_progress_is_monotonic_and_complete() {
        #[derive(Default)]
        struct Percents(Vec<u8>);
        impl ProgressListener for Percents {
            fn on_event(&mut self, event: PipelineEvent) {
                if let PipelineEvent::Progress { percent, .. } = event {
                    self.0.push(percent);
                }
            }
        }

        let buffer = PcmBuffer::mono(generate_tones(&[69], 0.5), SR).unwrap();
        let mut percents = Percents::default();
        Pipeline::new(test_config())
            .unwrap()
            .transcribe(&buffer, &CancellationToken::new(), &mut percents)
            .unwrap();

        assert!(percents.0.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(percents.0.last(), Some(&100));
        for stage in Stage::ALL {
            assert!(percents.0.contains(&stage.completed_percent()));
        }
    }

    #[test]
    fn test_stereo_input_is_downmixed() {
        let mono = generate_tones(&[69], 0.5);
        let stereo: Vec<f32> = mono.iter().flat_map(|&s| [s, s]).collect();
        let buffer = PcmBuffer::new(stereo, SR, 2).unwrap();
        let result = Pipeline::new(test_config())
            .unwrap()
            .transcribe(&buffer, &CancellationToken::new(), &mut NoOpListener)
            .unwrap();
        assert_eq!(result.channels, 2);
        assert!(result.notes.iter().any(|n| n.pitch == 69));
    }

    #[test]
    fn test_process_writes_outputs() {
        let dir = std::env::temp_dir().join(format!("audio2midi-process-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let wav_path = dir.join("tone.wav");

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SR,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&wav_path, spec).unwrap();
        for sample in generate_tones(&[69], 0.5) {
            writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();

        let output = dir.join("out");
        let transcriber = Transcriber::new(test_config()).unwrap();
        let result = transcriber.process(&wav_path, &output).unwrap();
        assert!(result.is_some());
        assert!(output.join("transcription.mid").is_file());
        assert!(output.join("analysis.json").is_file());
        assert!(output.join("score.json").is_file());
        assert!(!output.join("qa").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_process_short_input_returns_none() {
        let buffer = PcmBuffer::mono(vec![0.1; 1000], SR).unwrap();
        let output = std::env::temp_dir().join(format!("audio2midi-short-{}", std::process::id()));
        let transcriber = Transcriber::new(test_config()).unwrap();
        let result = transcriber
            .process_with(
                MemorySource::new(buffer),
                &output,
                &CancellationToken::new(),
                &mut NoOpListener,
            )
            .unwrap();
        assert!(result.is_none());
        assert!(!output.join("transcription.mid").exists());
    }

    #[test]
    fn test_missing_file_is_acquisition_error() {
        let transcriber = Transcriber::new(test_config()).unwrap();
        let result = transcriber.process("/nonexistent/input.wav", std::env::temp_dir());
        assert!(matches!(result, Err(TranscriptionError::Acquisition(_))));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = test_config();
        config.framing.hop_size = 0;
        assert!(matches!(
            Transcriber::new(config),
            Err(TranscriptionError::InvalidConfig(_))
        ));
    }
}
