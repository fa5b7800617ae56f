//! Transcription job state machine

use crate::audio::AudioSource;
use crate::error::{Result, TranscriptionError};
use crate::pipeline::{
    CancellationToken, Pipeline, PipelineEvent, ProgressListener, Stage, Transcription,
};
use std::fmt;

/// Lifecycle of one transcription job.
///
/// Moves strictly forward through the stages. `Done`, `Failed` and
/// `Cancelled` are terminal; there are no retries.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Pending,
    Acquiring,
    Framing,
    Analyzing,
    Detecting,
    Segmenting,
    Quantizing,
    Assembling,
    Done,
    Failed(TranscriptionError),
    Cancelled,
}

impl JobState {
    fn rank(&self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::Acquiring => 1,
            JobState::Framing => 2,
            JobState::Analyzing => 3,
            JobState::Detecting => 4,
            JobState::Segmenting => 5,
            JobState::Quantizing => 6,
            JobState::Assembling => 7,
            JobState::Done | JobState::Failed(_) | JobState::Cancelled => 8,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 8
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Acquiring => "acquiring",
            JobState::Framing => "framing",
            JobState::Analyzing => "analyzing",
            JobState::Detecting => "detecting",
            JobState::Segmenting => "segmenting",
            JobState::Quantizing => "quantizing",
            JobState::Assembling => "assembling",
            JobState::Done => "done",
            JobState::Failed(_) => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl From<Stage> for JobState {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Framing => JobState::Framing,
            Stage::Analyzing => JobState::Analyzing,
            Stage::Detecting => JobState::Detecting,
            Stage::Segmenting => JobState::Segmenting,
            Stage::Quantizing => JobState::Quantizing,
            Stage::Assembling => JobState::Assembling,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Failed(err) => write!(f, "failed ({})", err),
            other => f.write_str(other.name()),
        }
    }
}

fn transition(state: &mut JobState, history: &mut Vec<JobState>, next: JobState) {
    if state.is_terminal() || next.rank() <= state.rank() {
        log::warn!("Ignoring job transition {} -> {}", state, next);
        return;
    }
    log::debug!("Job {} -> {}", state, next);
    history.push(std::mem::replace(state, next));
}

/// Tracks stage starts into the job state, then forwards the event
struct JobListener<'a> {
    state: &'a mut JobState,
    history: &'a mut Vec<JobState>,
    inner: &'a mut dyn ProgressListener,
}

impl ProgressListener for JobListener<'_> {
    fn on_event(&mut self, event: PipelineEvent) {
        if let PipelineEvent::StageStarted(stage) = event {
            transition(self.state, self.history, stage.into());
        }
        self.inner.on_event(event);
    }
}

/// One audio source taken through the pipeline
pub struct TranscriptionJob<S: AudioSource> {
    source: S,
    pipeline: Pipeline,
    state: JobState,
    history: Vec<JobState>,
    result: Option<Transcription>,
    warning: Option<TranscriptionError>,
}

impl<S: AudioSource> TranscriptionJob<S> {
    pub fn new(source: S, pipeline: Pipeline) -> Self {
        Self {
            source,
            pipeline,
            state: JobState::Pending,
            history: Vec::new(),
            result: None,
            warning: None,
        }
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    /// States the job has left, in order
    pub fn history(&self) -> &[JobState] {
        &self.history
    }

    pub fn result(&self) -> Option<&Transcription> {
        self.result.as_ref()
    }

    pub fn take_result(&mut self) -> Option<Transcription> {
        self.result.take()
    }

    /// Non-fatal problem that still ended in `Done` (empty input)
    pub fn warning(&self) -> Option<&TranscriptionError> {
        self.warning.as_ref()
    }

    /// Run the job to a terminal state. A job runs at most once.
    pub fn run(
        &mut self,
        cancel: &CancellationToken,
        listener: &mut dyn ProgressListener,
    ) -> &JobState {
        if self.state != JobState::Pending {
            log::warn!("Job already ran (state: {})", self.state);
            return &self.state;
        }

        log::info!("Transcribing {}", self.source.describe());
        transition(&mut self.state, &mut self.history, JobState::Acquiring);

        let next = match self.execute(cancel, listener) {
            Ok(transcription) => {
                self.result = Some(transcription);
                JobState::Done
            }
            Err(err @ TranscriptionError::EmptyInput { .. }) => {
                log::warn!("{}; no MIDI produced", err);
                self.warning = Some(err);
                JobState::Done
            }
            Err(TranscriptionError::Cancelled) => {
                log::info!("Job cancelled");
                JobState::Cancelled
            }
            Err(err) => {
                log::error!("Job failed ({}): {}", err.kind().name(), err);
                JobState::Failed(err)
            }
        };
        transition(&mut self.state, &mut self.history, next);
        &self.state
    }

    fn execute(
        &mut self,
        cancel: &CancellationToken,
        listener: &mut dyn ProgressListener,
    ) -> Result<Transcription> {
        cancel.check()?;
        let buffer = self.source.acquire()?;
        log::debug!(
            "Acquired {:.2}s at {} Hz, {} channel(s), peak {:.3}, rms {:.3}",
            buffer.duration_sec(),
            buffer.sample_rate(),
            buffer.channels(),
            buffer.peak(),
            buffer.rms()
        );
        cancel.check()?;

        let mut tracking = JobListener {
            state: &mut self.state,
            history: &mut self.history,
            inner: listener,
        };
        self.pipeline.transcribe(&buffer, cancel, &mut tracking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{MemorySource, PcmBuffer};
    use crate::config::Config;
    use crate::error::AcquisitionError;
    use crate::pipeline::NoOpListener;

    struct FailingSource;

    impl AudioSource for FailingSource {
        fn acquire(&self) -> std::result::Result<PcmBuffer, AcquisitionError> {
            Err(AcquisitionError::Unavailable("video is private".to_string()))
        }

        fn describe(&self) -> String {
            "failing source".to_string()
        }
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(Config::default()).unwrap()
    }

    #[test]
    fn acquisition_failure_passes_through() {
        let mut job = TranscriptionJob::new(FailingSource, pipeline());
        let state = job.run(&CancellationToken::new(), &mut NoOpListener).clone();
        assert_eq!(
            state,
            JobState::Failed(TranscriptionError::Acquisition(AcquisitionError::Unavailable(
                "video is private".to_string()
            )))
        );
        assert_eq!(job.history(), &[JobState::Pending, JobState::Acquiring]);
        assert!(job.result().is_none());
    }

    #[test]
    fn empty_input_finishes_done_with_warning() {
        let buffer = PcmBuffer::mono(vec![0.0; 100], 44100).unwrap();
        let mut job = TranscriptionJob::new(MemorySource::new(buffer), pipeline());
        assert_eq!(job.run(&CancellationToken::new(), &mut NoOpListener), &JobState::Done);
        assert!(job.result().is_none());
        assert!(matches!(
            job.warning(),
            Some(TranscriptionError::EmptyInput { .. })
        ));
    }

    #[test]
    fn cancelled_before_start() {
        let buffer = PcmBuffer::mono(vec![0.0; 10_000], 44100).unwrap();
        let mut job = TranscriptionJob::new(MemorySource::new(buffer), pipeline());
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(job.run(&token, &mut NoOpListener), &JobState::Cancelled);
        assert!(job.result().is_none());
    }

    #[test]
    fn jobs_do_not_rerun() {
        let mut job = TranscriptionJob::new(FailingSource, pipeline());
        job.run(&CancellationToken::new(), &mut NoOpListener);
        let history_len = job.history().len();
        job.run(&CancellationToken::new(), &mut NoOpListener);
        assert_eq!(job.history().len(), history_len);
    }

    #[test]
    fn transitions_only_move_forward() {
        let mut state = JobState::Analyzing;
        let mut history = Vec::new();
        transition(&mut state, &mut history, JobState::Framing);
        assert_eq!(state, JobState::Analyzing);
        transition(&mut state, &mut history, JobState::Cancelled);
        transition(&mut state, &mut history, JobState::Done);
        assert_eq!(state, JobState::Cancelled);
        assert_eq!(history, vec![JobState::Analyzing]);
    }
}
