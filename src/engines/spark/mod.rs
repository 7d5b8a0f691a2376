//! Spark-TTS voice-cloning engine.
//!
//! Spark-TTS is a Python model; this engine drives its inference CLI in a
//! child process, one process per attempt. A prompt WAV/MP3 plus its
//! transcript select the voice.
//!
//! # System Requirements
//!
//! - A Python environment with the Spark-TTS requirements installed
//! - A checkout of the Spark-TTS repository (the `cli.inference` module)
//!
//! # Model Directory Layout
//!
//! ```text
//! pretrained_models/Spark-TTS-0.5B/
//! ├── BiCodec/
//! ├── LLM/
//! ├── wav2vec2-large-xlsr-53/
//! └── config.yaml
//! ```
//!
//! Download: <https://huggingface.co/SparkAudio/Spark-TTS-0.5B>
//!
//! # Failure Mapping
//!
//! | Process result | Outcome |
//! |---|---|
//! | stderr mentions `Semantic tokens are empty` | `EmptyOutput` |
//! | other non-zero exit, no WAV written | `EngineError` |
//! | WAV written to the scratch directory | `Waveform` |
//!
//! # Example
//!
//! ```rust,no_run
//! use spark_tts_rs::engines::spark::{SparkEngine, SparkModelParams};
//! use spark_tts_rs::{InferenceGateway, InferenceOutcome};
//! use std::path::Path;
//!
//! let mut engine = SparkEngine::new(SparkModelParams {
//!     working_dir: Some("third_party/Spark-TTS".into()),
//!     ..Default::default()
//! });
//! match engine.synthesize("今天天气晴朗。", "参考文本", Path::new("voices/ref.wav")) {
//!     InferenceOutcome::Waveform(w) => println!("{} samples", w.samples.len()),
//!     other => println!("no audio: {other:?}"),
//! }
//! ```

pub mod engine;
pub mod session;

pub use engine::{SparkEngine, SparkModelParams};
pub use session::{EngineSession, EngineSessionBuilder, SparkError};
