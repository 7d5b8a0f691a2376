use std::path::{Path, PathBuf};

use derive_builder::Builder;
use time::OffsetDateTime;

use crate::concat::manifest_path_for;
use crate::error::ValidationError;
use crate::progress::now_local;

/// Prompt audio extensions the engine's tokenizer can load.
pub const PROMPT_AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3"];

/// One text-to-speech job. Immutable once submitted.
///
/// Built with [`SynthesisRequestBuilder`]:
///
/// ```rust
/// use spark_tts_rs::SynthesisRequestBuilder;
///
/// let request = SynthesisRequestBuilder::default()
///     .text("今天天气晴朗。")
///     .prompt_text("参考文本")
///     .prompt_audio_path("voices/reference.wav")
///     .output_path("out/result.wav")
///     .chunked(true)
///     .build()?;
/// assert!(request.chunked);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
#[builder(setter(into))]
pub struct SynthesisRequest {
    /// Text to speak.
    pub text: String,
    /// Transcript of the prompt audio.
    pub prompt_text: String,
    /// Reference voice sample (.wav or .mp3).
    pub prompt_audio_path: PathBuf,
    /// Final audio file location.
    pub output_path: PathBuf,
    /// Split the text into chunks, synthesize each one and merge the results.
    #[builder(default)]
    pub chunked: bool,
}

impl SynthesisRequest {
    /// Check the request fields. No engine is involved.
    ///
    /// Whitespace-only text and prompt text count as empty.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.text.trim().is_empty() {
            return Err(ValidationError::EmptyText);
        }
        if self.prompt_audio_path.as_os_str().is_empty() {
            return Err(ValidationError::MissingPromptAudio);
        }
        if self.prompt_text.trim().is_empty() {
            return Err(ValidationError::EmptyPromptText);
        }
        if !self.prompt_audio_path.exists() {
            return Err(ValidationError::PromptAudioNotFound(
                self.prompt_audio_path.clone(),
            ));
        }
        if !has_audio_extension(&self.prompt_audio_path) {
            return Err(ValidationError::UnsupportedPromptAudio(
                self.prompt_audio_path.clone(),
            ));
        }
        Ok(())
    }

    /// Directory the output and all temporary artifacts live in.
    pub fn output_dir(&self) -> &Path {
        match self.output_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    fn output_stem(&self) -> String {
        self.output_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "synthesis".to_string())
    }

    /// Sibling path for the audio of chunk `index`.
    ///
    /// Names are qualified by the output's (timestamped) stem so artifacts of
    /// different requests never collide.
    pub fn chunk_path(&self, index: usize) -> PathBuf {
        self.output_dir()
            .join(format!("{}_chunk_{index:03}.wav", self.output_stem()))
    }

    /// Sibling path for the concatenation manifest.
    pub fn manifest_path(&self) -> PathBuf {
        manifest_path_for(&self.output_path)
    }
}

fn has_audio_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            PROMPT_AUDIO_EXTENSIONS
                .iter()
                .any(|allowed| e.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

/// `<prefix>_<YYYYMMDD_HHMMSS>.wav`
pub fn timestamped_file_name(prefix: &str, at: OffsetDateTime) -> String {
    format!(
        "{prefix}_{:04}{:02}{:02}_{:02}{:02}{:02}.wav",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    )
}

/// Create `dir` if needed and return a fresh timestamped output path in it.
pub fn next_output_path(dir: &Path, prefix: &str) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(timestamped_file_name(prefix, now_local()));
    log::info!("Output path: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::{next_output_path, timestamped_file_name, SynthesisRequest, SynthesisRequestBuilder};
    use crate::error::ValidationError;
    use std::path::{Path, PathBuf};
    use time::macros::datetime;

    fn request(dir: &Path, prompt_file: &str) -> SynthesisRequest {
        SynthesisRequestBuilder::default()
            .text("今天天气晴朗。")
            .prompt_text("参考")
            .prompt_audio_path(dir.join(prompt_file))
            .output_path(dir.join("sparktts_simple_20250101_120000.wav"))
            .build()
            .unwrap()
    }

    #[test]
    fn accepts_existing_wav_and_mp3_prompts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["prompt.wav", "prompt.MP3"] {
            std::fs::write(dir.path().join(name), b"RIFF").unwrap();
            assert_eq!(request(dir.path(), name).validate(), Ok(()));
        }
    }

    #[test]
    fn rejects_missing_fields_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("prompt.wav"), b"RIFF").unwrap();

        let mut r = request(dir.path(), "prompt.wav");
        r.text = "  \n ".to_string();
        assert_eq!(r.validate(), Err(ValidationError::EmptyText));

        let mut r = request(dir.path(), "prompt.wav");
        r.prompt_audio_path = PathBuf::new();
        assert_eq!(r.validate(), Err(ValidationError::MissingPromptAudio));

        let mut r = request(dir.path(), "prompt.wav");
        r.prompt_text = String::new();
        assert_eq!(r.validate(), Err(ValidationError::EmptyPromptText));
    }

    #[test]
    fn rejects_absent_or_non_audio_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let missing = request(dir.path(), "nope.wav");
        assert!(matches!(
            missing.validate(),
            Err(ValidationError::PromptAudioNotFound(_))
        ));

        std::fs::write(dir.path().join("prompt.txt"), b"text").unwrap();
        let wrong = request(dir.path(), "prompt.txt");
        assert!(matches!(
            wrong.validate(),
            Err(ValidationError::UnsupportedPromptAudio(_))
        ));
    }

    #[test]
    fn artifact_paths_are_siblings_of_output() {
        let dir = tempfile::tempdir().unwrap();
        let r = request(dir.path(), "prompt.wav");
        assert_eq!(
            r.chunk_path(2),
            dir.path().join("sparktts_simple_20250101_120000_chunk_002.wav")
        );
        assert_eq!(
            r.manifest_path(),
            dir.path().join("sparktts_simple_20250101_120000_concat_list.txt")
        );
    }

    #[test]
    fn bare_output_name_uses_current_dir() {
        let r = SynthesisRequestBuilder::default()
            .text("t")
            .prompt_text("p")
            .prompt_audio_path("p.wav")
            .output_path("out.wav")
            .build()
            .unwrap();
        assert_eq!(r.output_dir(), Path::new("."));
        assert!(!r.chunked);
    }

    #[test]
    fn file_name_follows_convention() {
        let at = datetime!(2025-02-25 11:35:21 UTC);
        assert_eq!(
            timestamped_file_name("sparktts_simple", at),
            "sparktts_simple_20250225_113521.wav"
        );
    }

    #[test]
    fn next_output_path_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("Resources").join("output");
        let path = next_output_path(&nested, "sparktts_simple").unwrap();
        assert!(nested.is_dir());
        assert_eq!(path.parent(), Some(nested.as_path()));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("sparktts_simple_"));
        assert!(name.ends_with(".wav"));
        assert_eq!(name.len(), "sparktts_simple_".len() + 15 + 4);
    }
}
