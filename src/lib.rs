//! Audio-to-MIDI Transcription System
//!
//! A deterministic, non-ML pipeline that turns decoded audio into a
//! multi-track Standard MIDI File: framing, FFT analysis, harmonic pitch
//! and onset detection, note segmentation, quantization and assembly.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod job;
pub mod midi;
pub mod notation;
pub mod passes;
pub mod pipeline;
pub mod qa;
pub mod spectral;

pub use audio::{AudioSource, MemorySource, PcmBuffer, WavFileSource};
pub use config::Config;
pub use error::{AcquisitionError, Result, TranscriptionError};
pub use job::{JobState, TranscriptionJob};
pub use pipeline::{CancellationToken, Pipeline, ProgressListener, Transcription};

use pipeline::NoOpListener;
use std::path::Path;

/// Main processing entry point for audio-to-MIDI conversion
pub struct Transcriber {
    pipeline: Pipeline,
}

impl Transcriber {
    /// Create a new processor; fails on an invalid configuration
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self {
            pipeline: Pipeline::new(config)?,
        })
    }

    pub fn config(&self) -> &Config {
        self.pipeline.config()
    }

    /// Transcribe a WAV file and write the results to `output_dir`.
    ///
    /// Returns `Ok(None)` when the input was too short to analyze.
    pub fn process<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input_path: P,
        output_dir: Q,
    ) -> Result<Option<Transcription>> {
        self.process_with(
            WavFileSource::new(input_path),
            output_dir,
            &CancellationToken::new(),
            &mut NoOpListener,
        )
    }

    /// Run a job for any source, with caller-supplied cancellation and progress
    pub fn process_with<S: AudioSource, Q: AsRef<Path>>(
        &self,
        source: S,
        output_dir: Q,
        cancel: &CancellationToken,
        listener: &mut dyn ProgressListener,
    ) -> Result<Option<Transcription>> {
        let mut job = TranscriptionJob::new(source, self.pipeline.clone());

        match job.run(cancel, listener).clone() {
            JobState::Done => {}
            JobState::Cancelled => return Err(TranscriptionError::Cancelled),
            JobState::Failed(err) => return Err(err),
            other => {
                return Err(TranscriptionError::Analysis(format!(
                    "job stopped in non-terminal state {}",
                    other
                )))
            }
        }

        let Some(transcription) = job.take_result() else {
            return Ok(None);
        };
        self.export_results(&transcription, output_dir.as_ref())?;
        Ok(Some(transcription))
    }

    /// Export MIDI and the inspection artifacts
    fn export_results(&self, transcription: &Transcription, output_dir: &Path) -> Result<()> {
        let config = self.config();
        midi::export_midi(&transcription.midi, output_dir)?;
        if config.export.write_analysis {
            analysis::export_analysis(transcription, config, output_dir)?;
        }
        if config.export.write_score {
            notation::export_score(&transcription.score, output_dir)?;
        }
        if config.qa.generate_images {
            if let Err(err) = qa::generate_artifacts(transcription, output_dir) {
                log::warn!("QA artifacts skipped: {}", err);
            }
        }
        Ok(())
    }
}

/// Validate configuration and input file before processing
pub fn validate_input<P: AsRef<Path>>(input_path: P, config: &Config) -> Result<()> {
    let path = input_path.as_ref();
    if !path.is_file() {
        return Err(AcquisitionError::Io(format!("audio file does not exist: {}", path.display())).into());
    }
    config::validate_config(config)?;
    Ok(())
}
