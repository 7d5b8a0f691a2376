use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{InferenceGateway, InferenceOutcome};

use super::session::{EngineSession, EngineSessionBuilder, SparkError};

/// Where and how to run Spark-TTS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SparkModelParams {
    /// Model checkpoint directory. Relative paths are interpreted from
    /// `working_dir`.
    pub model_dir: PathBuf,
    /// CUDA device index. The engine falls back to CPU when CUDA is absent.
    pub device: u32,
    /// Python interpreter of the Spark-TTS environment.
    pub python: PathBuf,
    /// Inference module run with `python -m`.
    pub script: String,
    /// Spark-TTS checkout the module is run from. `None` keeps the current
    /// directory.
    pub working_dir: Option<PathBuf>,
}

impl Default for SparkModelParams {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("pretrained_models").join("Spark-TTS-0.5B"),
            device: 0,
            python: PathBuf::from("python"),
            script: "cli.inference".to_string(),
            working_dir: None,
        }
    }
}

/// Spark-TTS voice-cloning engine.
///
/// Holds only configuration. Every [`synthesize`](InferenceGateway::synthesize)
/// call builds a new [`EngineSession`], so no engine state survives between
/// attempts.
///
/// ```rust,no_run
/// use spark_tts_rs::engines::spark::{SparkEngine, SparkModelParams};
/// use spark_tts_rs::Orchestrator;
///
/// let engine = SparkEngine::new(SparkModelParams {
///     python: "/opt/spark/venv/bin/python".into(),
///     working_dir: Some("/opt/spark/Spark-TTS".into()),
///     device: 1,
///     ..Default::default()
/// });
/// let orchestrator = Orchestrator::new(engine);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SparkEngine {
    params: SparkModelParams,
    sessions: usize,
}

impl SparkEngine {
    pub fn new(params: SparkModelParams) -> Self {
        log::info!(
            "Spark-TTS engine configured with model {} (device {})",
            params.model_dir.display(),
            params.device
        );
        Self {
            params,
            sessions: 0,
        }
    }

    pub fn params(&self) -> &SparkModelParams {
        &self.params
    }

    /// Number of sessions started so far.
    pub fn sessions(&self) -> usize {
        self.sessions
    }

    /// Build the session for one attempt.
    pub fn session(
        &self,
        text: &str,
        prompt_text: &str,
        prompt_audio: &Path,
    ) -> Result<EngineSession, SparkError> {
        let mut builder = EngineSessionBuilder::default();
        builder
            .python(self.params.python.clone())
            .script(self.params.script.clone())
            .model_dir(self.params.model_dir.clone())
            .device(self.params.device)
            .text(text)
            .prompt_text(prompt_text)
            .prompt_audio(prompt_audio);
        if let Some(dir) = &self.params.working_dir {
            builder.working_dir(dir.clone());
        }
        Ok(builder.build()?)
    }
}

impl InferenceGateway for SparkEngine {
    fn synthesize(
        &mut self,
        text: &str,
        prompt_text: &str,
        prompt_audio: &Path,
    ) -> InferenceOutcome {
        self.sessions += 1;
        let result = self
            .session(text, prompt_text, prompt_audio)
            .and_then(|mut session| session.run());

        match result {
            Ok(waveform) => InferenceOutcome::Waveform(waveform),
            Err(SparkError::EmptySemanticTokens) => InferenceOutcome::EmptyOutput,
            Err(e) => {
                log::error!("Spark-TTS session {} failed: {e}", self.sessions);
                InferenceOutcome::EngineError(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SparkEngine, SparkModelParams};
    use crate::{InferenceGateway, InferenceOutcome};
    use std::path::Path;

    #[test]
    fn blank_text_is_an_engine_error() {
        let mut engine = SparkEngine::new(SparkModelParams::default());
        match engine.synthesize("  ", "参考", Path::new("ref.wav")) {
            InferenceOutcome::EngineError(msg) => assert!(msg.contains("text must not be empty")),
            other => panic!("expected EngineError, got {other:?}"),
        }
        assert_eq!(engine.sessions(), 1);
    }

    #[test]
    fn params_default_to_bundled_checkpoint() {
        let params = SparkModelParams::default();
        assert!(params.model_dir.ends_with("Spark-TTS-0.5B"));
        assert_eq!(params.script, "cli.inference");
        let session = SparkEngine::new(params)
            .session("文本", "参考", Path::new("ref.wav"))
            .unwrap();
        assert!(session.scratch_dir().is_none());
    }

    #[cfg(unix)]
    mod with_fake_python {
        use super::super::{SparkEngine, SparkModelParams};
        use crate::{InferenceGateway, InferenceOutcome, Waveform};
        use std::os::unix::fs::PermissionsExt;
        use std::path::{Path, PathBuf};

        fn engine(dir: &Path, body: &str) -> SparkEngine {
            let python = dir.join("fake-python");
            std::fs::write(&python, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&python, std::fs::Permissions::from_mode(0o755)).unwrap();
            SparkEngine::new(SparkModelParams {
                python,
                working_dir: Some(dir.to_path_buf()),
                ..Default::default()
            })
        }

        fn fixture(dir: &Path) -> PathBuf {
            let path = dir.join("fixture.wav");
            Waveform::new(vec![0.25; 320], 16000).write_wav(&path).unwrap();
            path
        }

        #[test]
        fn copied_wav_becomes_waveform() {
            let dir = tempfile::tempdir().unwrap();
            let wav = fixture(dir.path());
            let script = format!(
                r#"save=""
while [ "$#" -gt 0 ]; do
  case "$1" in
    --save_dir) save="$2"; shift 2 ;;
    *) shift ;;
  esac
done
cp '{}' "$save/20250101120000.wav""#,
                wav.display()
            );
            let mut engine = engine(dir.path(), &script);

            match engine.synthesize("今天天气晴朗。", "参考", Path::new("ref.wav")) {
                InferenceOutcome::Waveform(w) => {
                    assert_eq!(w.sample_rate, 16000);
                    assert_eq!(w.samples.len(), 320);
                    assert!((w.samples[0] - 0.25).abs() < 1e-3);
                }
                other => panic!("expected Waveform, got {other:?}"),
            }
        }

        #[test]
        fn empty_semantic_tokens_is_empty_output() {
            let dir = tempfile::tempdir().unwrap();
            let mut engine = engine(
                dir.path(),
                "echo 'Traceback (most recent call last):' >&2\n\
                 echo 'ValueError: Semantic tokens are empty' >&2\nexit 1",
            );
            assert_eq!(
                engine.synthesize("短", "参考", Path::new("ref.wav")),
                InferenceOutcome::EmptyOutput
            );
        }

        #[test]
        fn other_crash_is_engine_error() {
            let dir = tempfile::tempdir().unwrap();
            let mut engine = engine(
                dir.path(),
                "echo 'RuntimeError: CUDA out of memory' >&2\nexit 1",
            );
            match engine.synthesize("文本", "参考", Path::new("ref.wav")) {
                InferenceOutcome::EngineError(msg) => {
                    assert!(msg.contains("CUDA out of memory"));
                    assert!(msg.contains("code Some(1)"));
                }
                other => panic!("expected EngineError, got {other:?}"),
            }
        }
    }
}
