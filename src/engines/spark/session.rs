use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

use derive_builder::Builder;
use tempfile::TempDir;

use crate::Waveform;

/// Marker Spark-TTS prints when the LLM produced no semantic tokens.
pub const EMPTY_SEMANTIC_TOKENS: &str = "Semantic tokens are empty";

/// Lines of engine stderr kept in error messages.
const STDERR_TAIL_LINES: usize = 5;

#[derive(thiserror::Error, Debug)]
pub enum SparkError {
    #[error("Python interpreter not found: {0}")]
    PythonNotFound(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to read synthesized audio: {0}")]
    Wav(#[from] hound::Error),
    #[error("Semantic tokens are empty")]
    EmptySemanticTokens,
    #[error("Spark-TTS inference exited with code {code:?}: {stderr}")]
    InferenceFailed { code: Option<i32>, stderr: String },
    #[error("Spark-TTS wrote no audio file to {0}")]
    NoOutput(PathBuf),
    #[error("Invalid engine session: {0}")]
    Session(#[from] EngineSessionBuilderError),
}

/// One inference attempt: a fresh Spark-TTS process with its own scratch
/// directory.
///
/// The scratch directory lives as long as the session and is removed when it
/// is dropped.
#[derive(Debug, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct EngineSession {
    python: PathBuf,
    /// Python module run with `-m`.
    script: String,
    /// Relative paths are interpreted from `working_dir`.
    model_dir: PathBuf,
    #[builder(default)]
    device: u32,
    #[builder(setter(into, strip_option), default)]
    working_dir: Option<PathBuf>,
    text: String,
    prompt_text: String,
    prompt_audio: PathBuf,
    #[builder(setter(skip))]
    scratch: Option<TempDir>,
}

impl EngineSessionBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(dir) = &self.model_dir {
            if dir.as_os_str().is_empty() {
                return Err("model_dir must not be empty".to_string());
            }
        }
        if let Some(text) = &self.text {
            if text.trim().is_empty() {
                return Err("text must not be empty".to_string());
            }
        }
        Ok(())
    }
}

impl EngineSession {
    /// Run inference and read back the produced audio.
    pub fn run(&mut self) -> Result<Waveform, SparkError> {
        let scratch = tempfile::Builder::new().prefix("spark-tts-").tempdir()?;
        let save_dir = scratch.path().to_path_buf();
        self.scratch = Some(scratch);

        let mut command = Command::new(&self.python);
        command
            .arg("-m")
            .arg(&self.script)
            .arg("--model_dir")
            .arg(&self.model_dir)
            .arg("--device")
            .arg(self.device.to_string())
            .arg("--save_dir")
            .arg(&save_dir)
            .arg("--text")
            .arg(&self.text)
            .arg("--prompt_text")
            .arg(&self.prompt_text)
            .arg("--prompt_speech_path")
            .arg(&self.prompt_audio)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        log::info!(
            "Running Spark-TTS inference on {} chars with model {} (device {})",
            self.text.chars().count(),
            self.model_dir.display(),
            self.device
        );
        let started = Instant::now();
        let output = command.output().map_err(|e| match e.kind() {
            ErrorKind::NotFound => SparkError::PythonNotFound(self.python.clone()),
            _ => SparkError::Io(e),
        })?;
        log::info!(
            "Spark-TTS process finished in {:.2}s with status {:?}",
            started.elapsed().as_secs_f64(),
            output.status.code()
        );

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stdout.contains(EMPTY_SEMANTIC_TOKENS) || stderr.contains(EMPTY_SEMANTIC_TOKENS) {
            log::warn!("Spark-TTS produced no semantic tokens");
            return Err(SparkError::EmptySemanticTokens);
        }
        if !output.status.success() {
            return Err(SparkError::InferenceFailed {
                code: output.status.code(),
                stderr: stderr_tail(&stderr),
            });
        }

        let wav = find_wav(&save_dir)?.ok_or(SparkError::NoOutput(save_dir))?;
        read_waveform(&wav)
    }

    /// Scratch directory of the last [`run`](Self::run), while the session is
    /// alive.
    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(TempDir::path)
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// The engine names its output by timestamp; take the newest name.
fn find_wav(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut wavs: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("wav"))
        })
        .collect();
    wavs.sort();
    Ok(wavs.pop())
}

/// Read a WAV file as mono f32 samples, averaging channels when needed.
pub fn read_waveform(path: &Path) -> Result<Waveform, SparkError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let channels = usize::from(spec.channels.max(1));
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };
    log::debug!(
        "Read {} samples at {}Hz from {}",
        samples.len(),
        spec.sample_rate,
        path.display()
    );
    Ok(Waveform::new(samples, spec.sample_rate))
}
