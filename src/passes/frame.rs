//! Signal framing: overlapping windowed frames over a mono buffer

use crate::config::FramingConfig;
use crate::error::{Result, TranscriptionError};
use crate::spectral::generate_window;

/// One windowed analysis frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub index: usize,
    /// Time of the first sample, in seconds
    pub start_time: f32,
    /// Time of the frame centre, in seconds
    pub center_time: f32,
    pub samples: Vec<f32>,
}

/// Number of whole frames that fit in `len` samples
pub fn frame_count(len: usize, frame_size: usize, hop_size: usize) -> usize {
    if len < frame_size || hop_size == 0 {
        0
    } else {
        (len - frame_size) / hop_size + 1
    }
}

/// Splits a mono signal into overlapping windowed frames.
///
/// Frames are produced on demand; [`Framer::frames`] may be called any
/// number of times and always starts again from frame 0.
#[derive(Debug, Clone)]
pub struct Framer<'a> {
    samples: &'a [f32],
    sample_rate: u32,
    frame_size: usize,
    hop_size: usize,
    window: Vec<f32>,
}

impl<'a> Framer<'a> {
    pub fn new(samples: &'a [f32], sample_rate: u32, config: &FramingConfig) -> Result<Self> {
        if config.hop_size == 0 || config.hop_size > config.frame_size {
            return Err(TranscriptionError::InvalidConfig(format!(
                "hop size {} must be in 1..={}",
                config.hop_size, config.frame_size
            )));
        }
        if sample_rate == 0 {
            return Err(TranscriptionError::InvalidConfig(
                "sample rate must be > 0".to_string(),
            ));
        }

        Ok(Self {
            samples,
            sample_rate,
            frame_size: config.frame_size,
            hop_size: config.hop_size,
            window: generate_window(config.window, config.frame_size),
        })
    }

    pub fn len(&self) -> usize {
        frame_count(self.samples.len(), self.frame_size, self.hop_size)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Sum of the window coefficients, used for magnitude normalization
    pub fn window_sum(&self) -> f32 {
        self.window.iter().sum()
    }

    /// Build frame `index`, or `None` past the last whole frame
    pub fn frame_at(&self, index: usize) -> Option<Frame> {
        if index >= self.len() {
            return None;
        }
        let start = index * self.hop_size;
        let samples = self.samples[start..start + self.frame_size]
            .iter()
            .zip(&self.window)
            .map(|(s, w)| s * w)
            .collect();
        let sr = self.sample_rate as f32;

        Some(Frame {
            index,
            start_time: start as f32 / sr,
            center_time: (start as f32 + self.frame_size as f32 / 2.0) / sr,
            samples,
        })
    }

    pub fn frames(&self) -> Frames<'_, 'a> {
        Frames {
            framer: self,
            next: 0,
        }
    }
}

/// Iterator returned by [`Framer::frames`]
#[derive(Debug)]
pub struct Frames<'f, 'a> {
    framer: &'f Framer<'a>,
    next: usize,
}

impl Iterator for Frames<'_, '_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        let frame = self.framer.frame_at(self.next)?;
        self.next += 1;
        Some(frame)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.framer.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Frames<'_, '_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowKind;

    fn framing(frame_size: usize, hop_size: usize) -> FramingConfig {
        FramingConfig {
            frame_size,
            hop_size,
            window: WindowKind::Rectangular,
        }
    }

    #[test]
    fn count_formula() {
        assert_eq!(frame_count(4095, 4096, 512), 0);
        assert_eq!(frame_count(4096, 4096, 512), 1);
        assert_eq!(frame_count(4096 + 511, 4096, 512), 1);
        assert_eq!(frame_count(4096 + 512, 4096, 512), 2);
        assert_eq!(frame_count(44100, 4096, 512), 79);
    }

    #[test]
    fn frames_overlap_by_frame_minus_hop() {
        let samples: Vec<f32> = (0..20).map(|i| i as f32).collect();
        let config = framing(8, 4);
        let framer = Framer::new(&samples, 4, &config).unwrap();
        let frames: Vec<Frame> = framer.frames().collect();

        assert_eq!(frames.len(), 4);
        assert_eq!(frames[1].samples[0], 4.0);
        assert_eq!(&frames[0].samples[4..], &frames[1].samples[..4]);
        assert_eq!(frames[2].start_time, 2.0);
        assert_eq!(frames[2].center_time, 3.0);
    }

    #[test]
    fn iteration_restarts() {
        let samples = vec![0.25; 64];
        let config = framing(16, 8);
        let framer = Framer::new(&samples, 8000, &config).unwrap();
        let first: Vec<usize> = framer.frames().map(|f| f.index).collect();
        let second: Vec<usize> = framer.frames().map(|f| f.index).collect();
        assert_eq!(first, second);
        assert_eq!(framer.frames().len(), 7);
    }

    #[test]
    fn short_input_has_no_frames() {
        let samples = vec![0.0; 10];
        let config = framing(16, 8);
        let framer = Framer::new(&samples, 8000, &config).unwrap();
        assert!(framer.is_empty());
        assert!(framer.frames().next().is_none());
    }

    #[test]
    fn invalid_hop_is_rejected() {
        let samples = vec![0.0; 10];
        assert!(Framer::new(&samples, 8000, &framing(16, 0)).is_err());
        assert!(Framer::new(&samples, 8000, &framing(16, 17)).is_err());
    }
}
