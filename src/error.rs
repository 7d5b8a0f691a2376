use std::path::PathBuf;

/// A request rejected before any engine call.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No text to synthesize. Enter the text to be spoken.")]
    EmptyText,
    #[error("No reference audio selected. Choose a .wav or .mp3 prompt file.")]
    MissingPromptAudio,
    #[error("No prompt text. Enter the transcript of the reference audio.")]
    EmptyPromptText,
    #[error("Reference audio not found: {0}")]
    PromptAudioNotFound(PathBuf),
    #[error("Reference audio is not a supported audio file (.wav or .mp3): {0}")]
    UnsupportedPromptAudio(PathBuf),
}

/// Failure at the concatenation boundary.
#[derive(thiserror::Error, Debug)]
pub enum ConcatError {
    #[error("Concatenation tool not found at {0}. Long-text merging is unavailable.")]
    ToolUnavailable(PathBuf),
    #[error("Concatenation failed with exit code {exit_code:?}: {stderr}")]
    ConcatFailed {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("Failed to write concatenation manifest: {0}")]
    Manifest(#[source] std::io::Error),
    #[error("Failed to launch concatenation tool: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("No audio files to concatenate")]
    NoInputs,
}

/// Error taxonomy of a synthesis run.
///
/// Attempt-level variants are converted into state transitions by the
/// orchestrator; the one that ends a run becomes the result's diagnostic.
#[derive(thiserror::Error, Debug)]
pub enum SynthesisError {
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    EmptyOutput(String),
    #[error("{0}")]
    Engine(String),
    #[error(transparent)]
    Concat(#[from] ConcatError),
    #[error("File system error on {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write audio to {path}: {source}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },
    #[error("Synthesis task aborted unexpectedly: {0}")]
    Internal(String),
}

impl SynthesisError {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}
