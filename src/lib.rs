//! # spark-tts-rs
//!
//! Synthesis orchestration for voice-cloning text-to-speech engines that fail
//! silently on some inputs.
//!
//! ## Features
//!
//! - **Escalating text repair**: degenerate engine output triggers a ladder of
//!   progressively more aggressive text rewrites ([`sanitizer`])
//! - **Background execution**: inference runs on a worker thread and reports
//!   through a typed progress stream ([`runner`])
//! - **Chunked mode**: long text is split, synthesized piece by piece and merged
//!   with ffmpeg ([`chunker`], [`concat`])
//! - **Guaranteed cleanup**: every temporary file of a run is removed before the
//!   terminal result is emitted ([`cleanup`])
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use spark_tts_rs::{
//!     engines::spark::{SparkEngine, SparkModelParams},
//!     Orchestrator, SynthesisRequestBuilder, TaskRunner, TaskEvent,
//! };
//!
//! let engine = SparkEngine::new(SparkModelParams::default());
//! let runner = TaskRunner::new();
//!
//! let request = SynthesisRequestBuilder::default()
//!     .text("每日资讯简报。今天天气晴朗。")
//!     .prompt_text("参考音频对应的文本")
//!     .prompt_audio_path("voices/reference.wav")
//!     .output_path("Resources/output/sparktts_simple_20250101_120000.wav")
//!     .build()?;
//!
//! let handle = runner.submit(Orchestrator::new(engine), request)?;
//! for event in handle.events() {
//!     match event {
//!         TaskEvent::Progress(p) => println!("{}", p.message),
//!         TaskEvent::Finished(result) => println!("done: {:?}", result.output_path),
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod chunker;
pub mod cleanup;
pub mod concat;
pub mod config;
pub mod engines;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod request;
pub mod runner;
pub mod sanitizer;

use std::path::Path;

pub use cleanup::{CleanupManager, CleanupReport, RunState, TempArtifact};
pub use concat::ConcatenationEngine;
pub use config::AppConfig;
pub use error::{ConcatError, SynthesisError, ValidationError};
pub use orchestrator::{Orchestrator, OrchestratorState, SynthesisResult};
pub use progress::{ProgressEvent, ProgressReporter, Stage, TaskEvent};
pub use request::{SynthesisRequest, SynthesisRequestBuilder};
pub use runner::{RunnerError, TaskHandle, TaskRunner};
pub use sanitizer::{sanitize, EscalationLadder, RetryLevel};

/// Output sample rate of the inference boundary.
pub const OUTPUT_SAMPLE_RATE: u32 = 16000;

/// Mono audio produced by one successful inference call.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    /// Raw audio samples as f32 values
    pub samples: Vec<f32>,
    /// Sample rate of the audio (16000 for Spark-TTS)
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Write the audio to a 16-bit PCM WAV file.
    ///
    /// 16-bit PCM keeps chunk files compatible with ffmpeg's stream-copy
    /// concatenation, which cannot mix sample formats.
    pub fn write_wav(&self, path: &Path) -> Result<(), hound::Error> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in &self.samples {
            let clamped = sample.clamp(-1.0, 1.0);
            writer.write_sample((clamped * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
        Ok(())
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Outcome of a single inference attempt.
///
/// Never persisted beyond the attempt that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceOutcome {
    /// The engine produced audio.
    Waveform(Waveform),
    /// The engine's semantic token sequence was empty. Recoverable by
    /// rewriting the text.
    EmptyOutput,
    /// Any other engine failure.
    EngineError(String),
}

/// Boundary to an opaque voice-cloning text-to-speech engine.
///
/// One call is one attempt: implementations must not retry internally, and
/// should build a fresh engine session per call rather than sharing mutable
/// engine state between attempts.
pub trait InferenceGateway: Send {
    /// Synthesize `text` in the voice of `prompt_audio`, whose transcript is
    /// `prompt_text`. Blocks until inference finishes.
    fn synthesize(&mut self, text: &str, prompt_text: &str, prompt_audio: &Path)
        -> InferenceOutcome;
}

impl<G: InferenceGateway + ?Sized> InferenceGateway for Box<G> {
    fn synthesize(
        &mut self,
        text: &str,
        prompt_text: &str,
        prompt_audio: &Path,
    ) -> InferenceOutcome {
        (**self).synthesize(text, prompt_text, prompt_audio)
    }
}

#[cfg(test)]
mod tests {
    use super::Waveform;

    #[test]
    fn writes_16k_mono_pcm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let wave = Waveform::new(vec![0.0, 0.5, -0.5, 1.5], 16000);
        wave.write_wav(&path).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 16000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[3], i16::MAX);
    }

    #[test]
    fn duration_uses_sample_rate() {
        let wave = Waveform::new(vec![0.0; 8000], 16000);
        assert!((wave.duration_secs() - 0.5).abs() < f64::EPSILON);
    }
}
