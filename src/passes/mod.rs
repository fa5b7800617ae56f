//! Transcription stages, in pipeline order
//!
//! Each stage is a pure transformation of the previous stage's output.

pub mod frame;
pub mod spectrum;
pub mod detect;
pub mod segment;
pub mod quantize;
