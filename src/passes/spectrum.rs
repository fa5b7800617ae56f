//! Spectral analysis stage: magnitude spectra for every frame

use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::passes::frame::{Frame, Framer};
use crate::pipeline::CancellationToken;
use crate::spectral::{SpectralAnalyzer, SpectralFrame};
use rayon::prelude::*;

/// Analyze all frames in time order.
///
/// Frames are processed in chunks of `config.chunk_frames`; within a chunk
/// the transforms run on the rayon pool. `on_chunk(done, total)` fires after
/// each chunk, and the token is checked before each one.
pub fn analyze_frames<F>(
    framer: &Framer<'_>,
    analyzer: &SpectralAnalyzer,
    config: &AnalysisConfig,
    cancel: &CancellationToken,
    mut on_chunk: F,
) -> Result<Vec<SpectralFrame>>
where
    F: FnMut(usize, usize),
{
    let total = framer.len();
    let chunk_frames = config.chunk_frames.max(1);
    let mut spectra = Vec::with_capacity(total);

    let mut start = 0;
    while start < total {
        cancel.check()?;

        let end = (start + chunk_frames).min(total);
        let frames: Vec<Frame> = (start..end).filter_map(|i| framer.frame_at(i)).collect();

        let chunk: Vec<SpectralFrame> = if config.parallel {
            frames
                .par_iter()
                .map(|frame| analyzer.analyze(frame))
                .collect::<Result<_>>()?
        } else {
            frames
                .iter()
                .map(|frame| analyzer.analyze(frame))
                .collect::<Result<_>>()?
        };
        spectra.extend(chunk);

        on_chunk(end, total);
        start = end;
    }

    log::debug!(
        "Analyzed {} frames in chunks of {} ({})",
        total,
        chunk_frames,
        if config.parallel { "parallel" } else { "sequential" }
    );

    Ok(spectra)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FramingConfig;
    use crate::error::TranscriptionError;

    fn tone(n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 8000.0).sin())
            .collect()
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let samples = tone(8000);
        let framing = FramingConfig {
            frame_size: 512,
            hop_size: 128,
            ..FramingConfig::default()
        };
        let framer = Framer::new(&samples, 8000, &framing).unwrap();
        let analyzer = SpectralAnalyzer::new(512, 8000, framer.window_sum()).unwrap();
        let token = CancellationToken::new();

        let parallel = AnalysisConfig {
            chunk_frames: 7,
            parallel: true,
        };
        let sequential = AnalysisConfig {
            chunk_frames: 64,
            parallel: false,
        };

        let mut calls = Vec::new();
        let a = analyze_frames(&framer, &analyzer, &parallel, &token, |done, total| {
            calls.push((done, total))
        })
        .unwrap();
        let b = analyze_frames(&framer, &analyzer, &sequential, &token, |_, _| {}).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.len(), framer.len());
        assert!(a.iter().enumerate().all(|(i, s)| s.index == i));
        assert_eq!(calls.last(), Some(&(framer.len(), framer.len())));
        assert!(calls.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn cancelled_token_stops_analysis() {
        let samples = tone(4000);
        let framing = FramingConfig {
            frame_size: 256,
            hop_size: 64,
            ..FramingConfig::default()
        };
        let framer = Framer::new(&samples, 8000, &framing).unwrap();
        let analyzer = SpectralAnalyzer::new(256, 8000, framer.window_sum()).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let result = analyze_frames(&framer, &analyzer, &AnalysisConfig::default(), &token, |_, _| {});
        assert_eq!(result, Err(TranscriptionError::Cancelled));
    }
}
