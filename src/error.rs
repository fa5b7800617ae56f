//! Error types for the audio-to-MIDI transcription system

use std::fmt;

/// Failure reported by an audio acquisition source.
///
/// The pipeline never inspects or rewrites these; they surface unchanged
/// inside [`TranscriptionError::Acquisition`].
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionError {
    /// Source could not be read (missing file, permission, decode I/O)
    Io(String),
    /// Container or sample format the source cannot decode
    UnsupportedFormat(String),
    /// Decoded data violates the PCM buffer contract
    InvalidBuffer(String),
    /// Remote source unavailable (private, deleted, region-blocked)
    Unavailable(String),
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionError::Io(msg) => write!(f, "audio source I/O error - {}", msg),
            AcquisitionError::UnsupportedFormat(msg) => {
                write!(f, "unsupported audio format - {}", msg)
            }
            AcquisitionError::InvalidBuffer(msg) => write!(f, "invalid PCM buffer - {}", msg),
            AcquisitionError::Unavailable(msg) => write!(f, "audio source unavailable - {}", msg),
        }
    }
}

impl std::error::Error for AcquisitionError {}

/// Coarse error category, used by the job layer when reporting failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Acquisition,
    EmptyInput,
    Analysis,
    Assembly,
    Cancelled,
    InvalidConfig,
    Export,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Acquisition => "acquisition",
            ErrorKind::EmptyInput => "empty_input",
            ErrorKind::Analysis => "analysis",
            ErrorKind::Assembly => "assembly",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::Export => "export",
        }
    }
}

/// Error type for transcription processing
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptionError {
    /// E001: Upstream acquisition failure, passed through unchanged
    Acquisition(AcquisitionError),
    /// E002: Buffer too short to yield a single analysis frame
    EmptyInput { samples: usize, frame_size: usize },
    /// E003: Spectral transform failure (non-finite data)
    Analysis(String),
    /// E004: MIDI assembly invariant violated
    Assembly(String),
    /// E005: Job cancelled by the caller
    Cancelled,
    /// E006: Configuration parameter out of range
    InvalidConfig(String),
    /// E007: Writing results to disk failed
    Export(String),
}

impl TranscriptionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TranscriptionError::Acquisition(_) => ErrorKind::Acquisition,
            TranscriptionError::EmptyInput { .. } => ErrorKind::EmptyInput,
            TranscriptionError::Analysis(_) => ErrorKind::Analysis,
            TranscriptionError::Assembly(_) => ErrorKind::Assembly,
            TranscriptionError::Cancelled => ErrorKind::Cancelled,
            TranscriptionError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            TranscriptionError::Export(_) => ErrorKind::Export,
        }
    }

    /// Empty input and cancellation end a job without marking it failed.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            TranscriptionError::EmptyInput { .. } | TranscriptionError::Cancelled
        )
    }
}

impl fmt::Display for TranscriptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptionError::Acquisition(err) => write!(f, "E001: Acquisition failed - {}", err),
            TranscriptionError::EmptyInput {
                samples,
                frame_size,
            } => write!(
                f,
                "E002: Empty input - {} samples is shorter than one {}-sample frame",
                samples, frame_size
            ),
            TranscriptionError::Analysis(msg) => write!(f, "E003: Analysis error - {}", msg),
            TranscriptionError::Assembly(msg) => write!(f, "E004: MIDI assembly error - {}", msg),
            TranscriptionError::Cancelled => write!(f, "E005: Transcription cancelled"),
            TranscriptionError::InvalidConfig(msg) => {
                write!(f, "E006: Invalid configuration parameter - {}", msg)
            }
            TranscriptionError::Export(msg) => write!(f, "E007: Export error - {}", msg),
        }
    }
}

impl std::error::Error for TranscriptionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TranscriptionError::Acquisition(err) => Some(err),
            _ => None,
        }
    }
}

impl From<AcquisitionError> for TranscriptionError {
    fn from(err: AcquisitionError) -> Self {
        TranscriptionError::Acquisition(err)
    }
}

impl From<std::io::Error> for TranscriptionError {
    fn from(err: std::io::Error) -> Self {
        TranscriptionError::Export(format!("File I/O error: {}", err))
    }
}

impl From<serde_json::Error> for TranscriptionError {
    fn from(err: serde_json::Error) -> Self {
        TranscriptionError::Export(format!("JSON serialization error: {}", err))
    }
}

/// Result type alias for transcription operations
pub type Result<T> = std::result::Result<T, TranscriptionError>;
