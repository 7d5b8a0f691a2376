use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::chunker::DEFAULT_CHUNK_MAX_CHARS;
use crate::concat::BUNDLED_FFMPEG;
use crate::engines::spark::SparkModelParams;
use crate::error::ConfigError;
use crate::orchestrator::DEFAULT_LONG_TEXT_WARNING_CHARS;
use crate::sanitizer::LadderMode;

/// Application settings. Every field has a default, so a partial (or absent)
/// config file is fine.
///
/// ```json
/// {
///   "output_dir": "Resources/output",
///   "ladder": "full",
///   "engine": { "model_dir": "pretrained_models/Spark-TTS-0.5B", "device": 0 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where final audio files are written. Relative paths are resolved with
    /// [`resolve_resource_path`].
    pub output_dir: PathBuf,
    pub output_prefix: String,
    pub chunked_output_prefix: String,
    pub ffmpeg_path: PathBuf,
    pub chunk_max_chars: usize,
    pub long_text_warning_chars: usize,
    /// Remove a leading list number, a report title and trailing punctuation
    /// before the first simple-mode attempt.
    pub preclean_text: bool,
    pub ladder: LadderMode,
    pub engine: SparkModelParams,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("Resources").join("output"),
            output_prefix: "sparktts_simple".to_string(),
            chunked_output_prefix: "sparktts_chunked".to_string(),
            ffmpeg_path: PathBuf::from(BUNDLED_FFMPEG),
            chunk_max_chars: DEFAULT_CHUNK_MAX_CHARS,
            long_text_warning_chars: DEFAULT_LONG_TEXT_WARNING_CHARS,
            preclean_text: true,
            ladder: LadderMode::default(),
            engine: SparkModelParams::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, or use defaults when no path is given.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => load_config(path),
            None => Ok(Self::default()),
        }
    }

    pub fn resolved_output_dir(&self) -> PathBuf {
        resolve_resource_path(&self.output_dir)
    }

    pub fn resolved_ffmpeg_path(&self) -> PathBuf {
        resolve_resource_path(&self.ffmpeg_path)
    }

    /// File name prefix for a request in the given mode.
    pub fn prefix_for(&self, chunked: bool) -> &str {
        if chunked {
            &self.chunked_output_prefix
        } else {
            &self.output_prefix
        }
    }
}

/// Read an [`AppConfig`] from a JSON file.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let raw = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&raw)?;
    log::info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Resolve a resource path the way a bundled install expects.
///
/// Absolute paths are returned unchanged. Relative ones are looked up next to
/// the executable first, then under the working directory. When neither
/// exists the path is returned relative to the working directory.
pub fn resolve_resource_path(relative: &Path) -> PathBuf {
    if relative.is_absolute() {
        return relative.to_path_buf();
    }
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    let cwd = std::env::current_dir().ok();

    for base in exe_dir.iter().chain(cwd.iter()) {
        let candidate = base.join(relative);
        if candidate.exists() {
            log::debug!("Resolved {} to {}", relative.display(), candidate.display());
            return candidate;
        }
    }
    relative.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::{load_config, resolve_resource_path, AppConfig};
    use crate::error::ConfigError;
    use crate::sanitizer::LadderMode;
    use std::path::{Path, PathBuf};

    #[test]
    fn defaults_match_bundled_layout() {
        let config = AppConfig::default();
        assert_eq!(config.output_dir, Path::new("Resources").join("output"));
        assert_eq!(config.prefix_for(false), "sparktts_simple");
        assert_eq!(config.prefix_for(true), "sparktts_chunked");
        assert_eq!(config.chunk_max_chars, 200);
        assert_eq!(config.long_text_warning_chars, 500);
        assert_eq!(config.ladder, LadderMode::Simple);
        assert!(config.preclean_text);
        assert!(config.ffmpeg_path.starts_with("softwares"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "ladder": "full", "chunk_max_chars": 120, "preclean_text": false, "engine": { "device": 1 } }"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.ladder, LadderMode::Full);
        assert_eq!(config.chunk_max_chars, 120);
        assert!(!config.preclean_text);
        assert_eq!(config.engine.device, 1);
        assert_eq!(config.engine.script, "cli.inference");
        assert_eq!(config.output_prefix, "sparktts_simple");
    }

    #[test]
    fn missing_and_invalid_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_config(&dir.path().join("absent.json")),
            Err(ConfigError::NotFound(_))
        ));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(load_config(&bad), Err(ConfigError::Parse(_))));

        let unknown = dir.path().join("ladder.json");
        std::fs::write(&unknown, r#"{ "ladder": "sideways" }"#).unwrap();
        assert!(matches!(load_config(&unknown), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn serializes_back_to_loadable_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = AppConfig {
            chunk_max_chars: 80,
            ..AppConfig::default()
        };
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
        assert_eq!(load_config(&path).unwrap(), config);
    }

    #[test]
    fn absolute_paths_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let absolute = dir.path().join("ffmpeg");
        assert_eq!(resolve_resource_path(&absolute), absolute);
    }

    #[test]
    fn unresolvable_relative_path_is_returned_as_is() {
        let relative = PathBuf::from("no-such-dir-7c1e").join("ffmpeg");
        assert_eq!(resolve_resource_path(&relative), relative);
    }

    #[test]
    fn no_path_means_defaults() {
        assert_eq!(AppConfig::load_or_default(None).unwrap(), AppConfig::default());
    }
}
