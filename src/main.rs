mod progress;

use audio2midi::config::TrackLayout;
use audio2midi::notation::{Clef, KeySignature, TimeSignature};
use audio2midi::pipeline::{LogListener, NoOpListener};
use audio2midi::{validate_input, CancellationToken, Config, Transcriber, WavFileSource};
use clap::{Parser, Subcommand, ValueEnum};
use progress::CliListener;
use std::path::PathBuf;

/// Audio-to-MIDI Transcription System
#[derive(Parser)]
#[command(name = "audio2midi")]
#[command(about = "Transcribe polyphonic audio recordings into multi-track MIDI")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LayoutArg {
    Single,
    Split,
}

#[derive(Clone, Copy, ValueEnum)]
enum ClefArg {
    Treble,
    Bass,
    Alto,
}

#[derive(Subcommand)]
enum Commands {
    /// Transcribe an audio file to MIDI
    Transcribe {
        /// Input audio file (WAV)
        input: PathBuf,

        /// Output directory for results
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,

        /// Custom configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Tempo of the tick grid in BPM
        #[arg(long)]
        tempo: Option<f32>,

        /// Ticks per quarter note
        #[arg(long)]
        ppq: Option<u16>,

        /// Track layout
        #[arg(long, value_enum)]
        layout: Option<LayoutArg>,

        /// Lowest pitch of the upper track in split layout
        #[arg(long)]
        split_pitch: Option<u8>,

        /// Clef of the first staff
        #[arg(long, value_enum)]
        clef: Option<ClefArg>,

        /// Key signature (e.g., "Eb", "F#m")
        #[arg(long)]
        key: Option<String>,

        /// Time signature (e.g., "3/4")
        #[arg(long)]
        time_signature: Option<String>,

        /// Skip QA images
        #[arg(long)]
        no_plots: bool,

        /// Log stage progress instead of drawing a progress bar
        #[arg(long)]
        no_progress: bool,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Quiet output
        #[arg(short, long)]
        quiet: bool,
    },
    /// Validate configuration file
    ValidateConfig {
        /// Configuration file to validate
        config: PathBuf,
    },
    /// Show default configuration
    ShowConfig {
        /// Also write it to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Transcribe {
            input,
            output,
            config,
            tempo,
            ppq,
            layout,
            split_pitch,
            clef,
            key,
            time_signature,
            no_plots,
            no_progress,
            verbose,
            quiet,
        } => {
            if verbose && quiet {
                anyhow::bail!("Cannot specify both --verbose and --quiet");
            }
            init_logging(verbose, quiet);

            let mut config = if let Some(config_path) = config {
                audio2midi::config::load_config(config_path)?
            } else {
                Config::default()
            };

            // Command-line overrides
            if let Some(tempo) = tempo {
                config.quantize.tempo_bpm = tempo;
            }
            if let Some(ppq) = ppq {
                config.quantize.ticks_per_quarter = ppq;
            }
            if let Some(layout) = layout {
                config.tracks.layout = match layout {
                    LayoutArg::Single => TrackLayout::Single,
                    LayoutArg::Split => TrackLayout::Split,
                };
            }
            if let Some(split_pitch) = split_pitch {
                config.tracks.split_pitch = split_pitch;
            }
            if let Some(clef) = clef {
                config.notation.clef = match clef {
                    ClefArg::Treble => Clef::Treble,
                    ClefArg::Bass => Clef::Bass,
                    ClefArg::Alto => Clef::Alto,
                };
            }
            if let Some(key) = key {
                config.notation.key_signature = KeySignature::parse(&key)?;
            }
            if let Some(meter) = time_signature {
                config.notation.time_signature = TimeSignature::parse(&meter)?;
            }
            if no_plots {
                config.qa.generate_images = false;
            }

            validate_input(&input, &config)?;
            let processor = Transcriber::new(config)?;

            if !quiet {
                println!("Processing {}...", input.display());
            }

            let cancel = CancellationToken::new();
            let source = WavFileSource::new(&input);
            let result = if quiet {
                processor.process_with(source, &output, &cancel, &mut NoOpListener)
            } else if no_progress {
                processor.process_with(source, &output, &cancel, &mut LogListener)
            } else {
                let mut listener = CliListener::new();
                let result = processor.process_with(source, &output, &cancel, &mut listener);
                if result.is_err() {
                    listener.abandon();
                }
                result
            };

            match result? {
                Some(transcription) if !quiet => {
                    println!(
                        "Transcribed {} notes on {} track(s); results saved to {}",
                        transcription.quantized.len(),
                        transcription.tracks.len(),
                        output.display()
                    );
                }
                None if !quiet => {
                    println!("Input is shorter than one analysis frame; no MIDI written");
                }
                _ => {}
            }
        }
        Commands::ValidateConfig { config } => {
            let config = audio2midi::config::load_config(config)?;
            println!("Configuration is valid");
            if let Ok(json) = serde_json::to_string_pretty(&config) {
                println!("{}", json);
            }
        }
        Commands::ShowConfig { output } => {
            let config = Config::default();
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
            if let Some(path) = output {
                audio2midi::config::save_config(&config, &path)?;
                eprintln!("Default configuration written to {}", path.display());
            }
        }
    }

    Ok(())
}
