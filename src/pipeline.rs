//! Stage driver: runs the transcription stages in order with progress and cancellation

use crate::analysis::{MidiTrackData, NoteEvent, QuantizedNoteEvent};
use crate::audio::PcmBuffer;
use crate::config::{validate_config, Config};
use crate::error::{Result, TranscriptionError};
use crate::midi::{self, AssemblyOptions};
use crate::notation::{self, ScoreHandoff};
use crate::passes::detect::{self, OnsetEvent};
use crate::passes::frame::Framer;
use crate::passes::quantize::{self, TickGrid};
use crate::passes::segment::{self, FrameTiming};
use crate::passes::spectrum;
use crate::spectral::{self, SpectralAnalyzer};
use ndarray::Array2;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Pipeline stages after acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Framing,
    Analyzing,
    Detecting,
    Segmenting,
    Quantizing,
    Assembling,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Framing,
        Stage::Analyzing,
        Stage::Detecting,
        Stage::Segmenting,
        Stage::Quantizing,
        Stage::Assembling,
    ];

    /// Overall progress once this stage has completed
    pub fn completed_percent(&self) -> u8 {
        match self {
            Stage::Framing => 10,
            Stage::Analyzing => 35,
            Stage::Detecting => 55,
            Stage::Segmenting => 70,
            Stage::Quantizing => 85,
            Stage::Assembling => 100,
        }
    }

    /// Overall progress when this stage begins
    pub fn started_percent(&self) -> u8 {
        match self {
            Stage::Framing => 0,
            Stage::Analyzing => Stage::Framing.completed_percent(),
            Stage::Detecting => Stage::Analyzing.completed_percent(),
            Stage::Segmenting => Stage::Detecting.completed_percent(),
            Stage::Quantizing => Stage::Segmenting.completed_percent(),
            Stage::Assembling => Stage::Quantizing.completed_percent(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Framing => "framing",
            Stage::Analyzing => "analyzing",
            Stage::Detecting => "detecting",
            Stage::Segmenting => "segmenting",
            Stage::Quantizing => "quantizing",
            Stage::Assembling => "assembling",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Events emitted while a transcription runs.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StageStarted(Stage),
    /// Overall percentage, never decreasing within a run
    Progress { stage: Stage, percent: u8 },
    StageFinished(Stage),
}

/// Observer for pipeline progress. Implement this for UI, logging, etc.
pub trait ProgressListener {
    fn on_event(&mut self, event: PipelineEvent);
}

/// No-op listener
pub struct NoOpListener;

impl ProgressListener for NoOpListener {
    #[inline(always)]
    fn on_event(&mut self, _event: PipelineEvent) {}
}

/// Listener that forwards stage transitions to the `log` facade
pub struct LogListener;

impl ProgressListener for LogListener {
    fn on_event(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::StageStarted(stage) => log::info!("Stage {} started", stage),
            PipelineEvent::Progress { stage, percent } => {
                log::debug!("{}: {}%", stage, percent)
            }
            PipelineEvent::StageFinished(stage) => {
                log::info!("Stage {} finished ({}%)", stage, stage.completed_percent())
            }
        }
    }
}

/// Shared cancellation flag, checked between units of work
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(TranscriptionError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Wraps a listener and keeps reported percentages monotonic
pub struct ProgressTracker<'a> {
    listener: &'a mut dyn ProgressListener,
    percent: u8,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(listener: &'a mut dyn ProgressListener) -> Self {
        Self {
            listener,
            percent: 0,
        }
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn start(&mut self, stage: Stage) {
        self.listener.on_event(PipelineEvent::StageStarted(stage));
    }

    pub fn report(&mut self, stage: Stage, percent: u8) {
        let percent = percent.min(100);
        if percent > self.percent {
            self.percent = percent;
            self.listener.on_event(PipelineEvent::Progress { stage, percent });
        }
    }

    /// Progress part-way through a stage
    pub fn within(&mut self, stage: Stage, done: usize, total: usize) {
        if total == 0 {
            return;
        }
        let from = stage.started_percent() as usize;
        let to = stage.completed_percent() as usize;
        let percent = from + (to - from) * done.min(total) / total;
        self.report(stage, percent as u8);
    }

    pub fn finish(&mut self, stage: Stage) {
        self.report(stage, stage.completed_percent());
        self.listener.on_event(PipelineEvent::StageFinished(stage));
    }
}

/// Everything one transcription run produces
#[derive(Debug, Clone)]
pub struct Transcription {
    pub notes: Vec<NoteEvent>,
    pub quantized: Vec<QuantizedNoteEvent>,
    pub tracks: Vec<MidiTrackData>,
    /// Onset detection function for every frame
    pub onsets: Vec<OnsetEvent>,
    /// `(bins, frames)` magnitudes, kept only when QA images are enabled
    pub spectrogram: Option<Array2<f32>>,
    pub score: ScoreHandoff,
    pub midi: Vec<u8>,
    pub frame_count: usize,
    pub hop_seconds: f32,
    pub bin_hz: f32,
    pub duration_sec: f32,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Configured stage driver.
///
/// Stages hold no state between runs; one pipeline may transcribe any number
/// of buffers.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: Config,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        validate_config(&config)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Transcribe a decoded buffer into MIDI.
    ///
    /// Inputs shorter than one frame report full progress and return
    /// `EmptyInput`; a cancelled token
    /// returns `Cancelled` and discards all partial results.
    pub fn transcribe(
        &self,
        buffer: &PcmBuffer,
        cancel: &CancellationToken,
        listener: &mut dyn ProgressListener,
    ) -> Result<Transcription> {
        let config = &self.config;
        let mut progress = ProgressTracker::new(listener);
        let mono = buffer.to_mono();
        let check_every = config.analysis.chunk_frames;

        // Framing
        progress.start(Stage::Framing);
        let framer = Framer::new(mono.samples(), mono.sample_rate(), &config.framing)?;
        if framer.is_empty() {
            // Nothing left to run
            progress.report(Stage::Framing, 100);
            progress.finish(Stage::Framing);
            return Err(TranscriptionError::EmptyInput {
                samples: mono.samples().len(),
                frame_size: config.framing.frame_size,
            });
        }
        log::info!(
            "Framing {:.2}s of audio into {} frames ({} / {})",
            mono.duration_sec(),
            framer.len(),
            config.framing.frame_size,
            config.framing.hop_size
        );
        progress.finish(Stage::Framing);
        cancel.check()?;

        // Spectral analysis
        progress.start(Stage::Analyzing);
        let analyzer =
            SpectralAnalyzer::new(framer.frame_size(), framer.sample_rate(), framer.window_sum())?;
        let spectra = spectrum::analyze_frames(
            &framer,
            &analyzer,
            &config.analysis,
            cancel,
            |done, total| progress.within(Stage::Analyzing, done, total),
        )?;
        progress.finish(Stage::Analyzing);
        cancel.check()?;

        // Pitch and onset detection
        progress.start(Stage::Detecting);
        let detections = detect::detect(&spectra, &config.detection, cancel, check_every)?;
        progress.finish(Stage::Detecting);
        cancel.check()?;

        let spectrogram = config
            .qa
            .generate_images
            .then(|| spectral::spectrogram(&spectra, config.qa.spectrogram_max_hz));
        drop(spectra);

        // Segmentation
        progress.start(Stage::Segmenting);
        let timing = FrameTiming {
            sample_rate: framer.sample_rate(),
            frame_size: framer.frame_size(),
            hop_size: framer.hop_size(),
            frame_count: framer.len(),
            duration: mono.duration_sec(),
        };
        let notes = segment::segment(
            &detections,
            timing,
            &config.segmentation,
            &config.tracks,
            cancel,
            check_every,
        )?;
        log::info!("Segmented {} notes", notes.len());
        progress.finish(Stage::Segmenting);
        cancel.check()?;

        // Quantization
        progress.start(Stage::Quantizing);
        let grid = TickGrid::from_config(&config.quantize)?;
        let quantized = quantize::quantize(&notes, &grid);
        progress.finish(Stage::Quantizing);
        cancel.check()?;

        // Assembly
        progress.start(Stage::Assembling);
        let tracks = midi::build_tracks(&quantized, &config.tracks, config.export.channel);
        let midi_bytes = midi::assemble(&tracks, &AssemblyOptions::new(&grid, config))?;
        let score = notation::build_score(
            &quantized,
            &config.tracks,
            &config.quantize,
            &config.notation,
        );
        progress.finish(Stage::Assembling);
        log::info!(
            "Assembled {} notes on {} track(s) into {} bytes",
            quantized.len(),
            tracks.len(),
            midi_bytes.len()
        );

        Ok(Transcription {
            notes,
            quantized,
            tracks,
            onsets: detections.into_iter().map(|d| d.onset).collect(),
            spectrogram,
            score,
            midi: midi_bytes,
            frame_count: framer.len(),
            hop_seconds: framer.hop_size() as f32 / framer.sample_rate() as f32,
            bin_hz: analyzer.bin_hz(),
            duration_sec: mono.duration_sec(),
            sample_rate: buffer.sample_rate(),
            channels: buffer.channels(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Vec<PipelineEvent>);

    impl ProgressListener for Recorder {
        fn on_event(&mut self, event: PipelineEvent) {
            self.0.push(event);
        }
    }

    #[test]
    fn stage_percentages_are_increasing() {
        let percents: Vec<u8> = Stage::ALL.iter().map(|s| s.completed_percent()).collect();
        assert_eq!(percents, vec![10, 35, 55, 70, 85, 100]);
        for stage in Stage::ALL {
            assert!(stage.started_percent() < stage.completed_percent());
        }
    }

    #[test]
    fn tracker_never_goes_backwards() {
        let mut recorder = Recorder::default();
        {
            let mut tracker = ProgressTracker::new(&mut recorder);
            tracker.within(Stage::Analyzing, 1, 2);
            tracker.report(Stage::Analyzing, 15);
            tracker.finish(Stage::Analyzing);
            tracker.report(Stage::Detecting, 20);
        }
        let percents: Vec<u8> = recorder
            .0
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect();
        assert_eq!(percents, vec![22, 35]);
    }

    #[test]
    fn token_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.check(), Err(TranscriptionError::Cancelled));
    }

    #[test]
    fn short_buffer_is_empty_input() {
        let pipeline = Pipeline::new(Config::default()).unwrap();
        let buffer = PcmBuffer::mono(vec![0.0; 1000], 44100).unwrap();
        let mut recorder = Recorder::default();
        let result = pipeline.transcribe(&buffer, &CancellationToken::new(), &mut recorder);
        assert!(matches!(
            result,
            Err(TranscriptionError::EmptyInput {
                samples: 1000,
                frame_size: 4096
            })
        ));
        assert_eq!(
            recorder.0.last(),
            Some(&PipelineEvent::StageFinished(Stage::Framing))
        );
        assert!(recorder.0.contains(&PipelineEvent::Progress {
            stage: Stage::Framing,
            percent: 100
        }));
    }
}
