use audio2midi::pipeline::{PipelineEvent, ProgressListener};
use indicatif::{ProgressBar, ProgressStyle};

/// CLI progress bar over the overall 0-100% of a transcription.
pub struct CliListener {
    pb: ProgressBar,
}

impl CliListener {
    pub fn new() -> Self {
        let pb = ProgressBar::new(100);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} {msg:<11} [{bar:40.cyan/blue}] {pos:>3}% ({elapsed})",
            )
            .unwrap()
            .progress_chars("#>-"),
        );
        Self { pb }
    }

    pub fn abandon(&self) {
        self.pb.abandon();
    }
}

impl ProgressListener for CliListener {
    fn on_event(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::StageStarted(stage) => self.pb.set_message(stage.name()),
            PipelineEvent::Progress { percent, .. } => {
                self.pb.set_position(percent as u64);
                if percent >= 100 {
                    self.pb.finish_with_message("done");
                }
            }
            PipelineEvent::StageFinished(_) => {}
        }
    }
}
