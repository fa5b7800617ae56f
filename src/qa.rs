//! QA artifacts generation

use crate::error::{Result, TranscriptionError};
use crate::pipeline::Transcription;
use plotters::prelude::*;
use std::fs;
use std::path::Path;

fn plot_error<E: std::fmt::Debug>(what: &str, e: E) -> TranscriptionError {
    TranscriptionError::Export(format!("Failed to {}: {:?}", what, e))
}

/// Generate QA plots under `<output_dir>/qa`
pub fn generate_artifacts(transcription: &Transcription, output_dir: &Path) -> Result<()> {
    let qa_dir = output_dir.join("qa");
    fs::create_dir_all(&qa_dir)?;

    generate_piano_roll(transcription, &qa_dir)?;
    generate_onset_plot(transcription, &qa_dir)?;
    if transcription.spectrogram.is_some() {
        generate_spectrogram_plot(transcription, &qa_dir)?;
    }

    log::info!("QA artifacts generated in {}", qa_dir.display());
    Ok(())
}

/// Notes as horizontal bars over time and pitch
fn generate_piano_roll(transcription: &Transcription, output_dir: &Path) -> Result<()> {
    let path = output_dir.join("piano_roll.png");
    let root = BitMapBackend::new(&path, (1200, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| plot_error("fill plot background", e))?;

    let notes = &transcription.notes;
    let low = notes.iter().map(|n| n.pitch).min().unwrap_or(60).saturating_sub(2) as i32;
    let high = notes.iter().map(|n| n.pitch).max().unwrap_or(72).saturating_add(3) as i32;
    let duration = transcription.duration_sec.max(0.1) as f64;

    let mut chart = ChartBuilder::on(&root)
        .caption("Piano Roll", ("sans-serif", 30))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0f64..duration, low..high)
        .map_err(|e| plot_error("build chart", e))?;

    chart
        .configure_mesh()
        .x_desc("Time (seconds)")
        .y_desc("MIDI pitch")
        .draw()
        .map_err(|e| plot_error("draw mesh", e))?;

    let palette = [BLUE, RED, GREEN, MAGENTA];
    chart
        .draw_series(notes.iter().map(|note| {
            let color = palette[note.track % palette.len()];
            let alpha = 0.3 + 0.7 * note.velocity as f64 / 127.0;
            Rectangle::new(
                [
                    (note.start as f64, note.pitch as i32),
                    (note.end() as f64, note.pitch as i32 + 1),
                ],
                color.mix(alpha).filled(),
            )
        }))
        .map_err(|e| plot_error("draw notes", e))?;

    root.present().map_err(|e| plot_error("write piano roll", e))?;
    Ok(())
}

/// Onset detection function with picked onsets highlighted
fn generate_onset_plot(transcription: &Transcription, output_dir: &Path) -> Result<()> {
    let path = output_dir.join("onsets.png");
    let root = BitMapBackend::new(&path, (1200, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| plot_error("fill plot background", e))?;

    let duration = transcription.duration_sec.max(0.1) as f64;
    let mut chart = ChartBuilder::on(&root)
        .caption("Onset Strength", ("sans-serif", 30))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(40)
        .build_cartesian_2d(0.0f64..duration, 0.0f64..1.0f64)
        .map_err(|e| plot_error("build chart", e))?;

    chart
        .configure_mesh()
        .x_desc("Time (seconds)")
        .y_desc("Normalized flux")
        .draw()
        .map_err(|e| plot_error("draw mesh", e))?;

    chart
        .draw_series(LineSeries::new(
            transcription
                .onsets
                .iter()
                .map(|o| (o.time as f64, o.strength as f64)),
            &BLACK,
        ))
        .map_err(|e| plot_error("draw onset curve", e))?;

    chart
        .draw_series(
            transcription
                .onsets
                .iter()
                .filter(|o| o.is_onset)
                .map(|o| Circle::new((o.time as f64, o.strength as f64), 4, RED.filled())),
        )
        .map_err(|e| plot_error("draw onsets", e))?;

    root.present().map_err(|e| plot_error("write onset plot", e))?;
    Ok(())
}

/// Magnitude spectrogram heatmap in dB
fn generate_spectrogram_plot(transcription: &Transcription, output_dir: &Path) -> Result<()> {
    let Some(spectrogram) = transcription.spectrogram.as_ref() else {
        return Ok(());
    };
    let (n_bins, n_frames) = spectrogram.dim();
    if n_bins == 0 || n_frames == 0 {
        return Ok(());
    }

    let path = output_dir.join("spectrogram.png");
    let root = BitMapBackend::new(&path, (1200, 800)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| plot_error("fill plot background", e))?;

    let hop = transcription.hop_seconds as f64;
    let bin_hz = transcription.bin_hz as f64;
    let mut chart = ChartBuilder::on(&root)
        .caption("Spectrogram", ("sans-serif", 30))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0f64..n_frames as f64 * hop, 0.0f64..n_bins as f64 * bin_hz)
        .map_err(|e| plot_error("build chart", e))?;

    chart
        .configure_mesh()
        .x_desc("Time (seconds)")
        .y_desc("Frequency (Hz)")
        .draw()
        .map_err(|e| plot_error("draw mesh", e))?;

    let max_magnitude = spectrogram.iter().cloned().fold(0.0f32, f32::max);
    if max_magnitude <= 0.0 {
        root.present().map_err(|e| plot_error("write spectrogram", e))?;
        return Ok(());
    }

    chart
        .draw_series(spectrogram.indexed_iter().map(|((bin, frame), &magnitude)| {
            let db = if magnitude > 0.0 {
                20.0 * (magnitude / max_magnitude).log10()
            } else {
                -80.0
            };
            let intensity = ((db + 80.0) / 80.0).clamp(0.0, 1.0) as f64;
            let x = frame as f64 * hop;
            let y = bin as f64 * bin_hz;
            Rectangle::new(
                [(x, y), (x + hop, y + bin_hz)],
                HSLColor(0.7 - 0.7 * intensity, 0.9, 0.1 + 0.5 * intensity).filled(),
            )
        }))
        .map_err(|e| plot_error("draw spectrogram", e))?;

    root.present().map_err(|e| plot_error("write spectrogram", e))?;
    Ok(())
}
