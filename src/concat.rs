//! Audio concatenation through ffmpeg's concat demuxer.
//!
//! Inputs are listed in a manifest (`file '<absolute path>'` per line) and
//! merged with stream copy, so all inputs must share one format. The manifest
//! is a temporary artifact; deleting it is the caller's job.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::ConcatError;

/// Default location of the bundled ffmpeg, relative to the resource root.
#[cfg(windows)]
pub const BUNDLED_FFMPEG: &str = "softwares/ffmpeg/ffmpeg.exe";
#[cfg(not(windows))]
pub const BUNDLED_FFMPEG: &str = "softwares/ffmpeg/ffmpeg";

/// Wrapper around an external media concatenation tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcatenationEngine {
    tool_path: PathBuf,
}

impl ConcatenationEngine {
    pub fn new(tool_path: impl Into<PathBuf>) -> Self {
        Self {
            tool_path: tool_path.into(),
        }
    }

    /// Look for the tool at `configured`, then for its file name on `PATH`.
    ///
    /// Returns `None` (and logs that long-text merging is disabled) when
    /// neither exists.
    pub fn detect(configured: &Path) -> Option<Self> {
        if configured.is_file() {
            log::info!(
                "Found concatenation tool at {}, long-text synthesis enabled",
                configured.display()
            );
            return Some(Self::new(configured));
        }
        if let Some(found) = configured.file_name().and_then(find_on_path) {
            log::info!(
                "Found concatenation tool on PATH at {}, long-text synthesis enabled",
                found.display()
            );
            return Some(Self::new(found));
        }
        log::warn!(
            "Concatenation tool not found at {}, long-text merging unavailable",
            configured.display()
        );
        None
    }

    pub fn tool_path(&self) -> &Path {
        &self.tool_path
    }

    pub fn is_available(&self) -> bool {
        self.tool_path.is_file()
    }

    /// Merge `inputs`, in the given order, into `output`.
    ///
    /// The manifest is written to [`manifest_path_for`]`(output)`. Success
    /// means the tool exited with status zero *and* `output` exists.
    pub fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ConcatError> {
        if !self.is_available() {
            return Err(ConcatError::ToolUnavailable(self.tool_path.clone()));
        }
        if inputs.is_empty() {
            return Err(ConcatError::NoInputs);
        }

        let manifest = manifest_path_for(output);
        write_manifest(inputs, &manifest)?;
        log::info!("Wrote concatenation manifest {}", manifest.display());

        let mut command = Command::new(&self.tool_path);
        command
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "concat", "-safe", "0", "-i"])
            .arg(&manifest)
            .args(["-c", "copy"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        hide_console_window(&mut command);

        log::info!(
            "Running {} to merge {} files into {}",
            self.tool_path.display(),
            inputs.len(),
            output.display()
        );
        let result = command.output().map_err(ConcatError::Spawn)?;

        if result.status.success() && output.exists() {
            log::info!("Concatenation succeeded: {}", output.display());
            return Ok(());
        }

        let stdout = String::from_utf8_lossy(&result.stdout);
        let stderr = String::from_utf8_lossy(&result.stderr).into_owned();
        log::error!(
            "Concatenation failed with exit code {:?}\nstdout:\n{stdout}\nstderr:\n{stderr}",
            result.status.code()
        );
        let stderr = if result.status.success() {
            format!("tool reported success but {} was not created", output.display())
        } else {
            stderr
        };
        Err(ConcatError::ConcatFailed {
            exit_code: result.status.code(),
            stderr,
        })
    }
}

/// Manifest location for a given output: a sibling named after its stem.
pub fn manifest_path_for(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "synthesis".to_string());
    output.with_file_name(format!("{stem}_concat_list.txt"))
}

/// Write a concat-demuxer manifest listing `inputs` as absolute paths.
pub fn write_manifest(inputs: &[PathBuf], manifest: &Path) -> Result<(), ConcatError> {
    let mut file = std::fs::File::create(manifest).map_err(ConcatError::Manifest)?;
    for input in inputs {
        let absolute = std::path::absolute(input).map_err(ConcatError::Manifest)?;
        writeln!(file, "file '{}'", escape_manifest_path(&absolute))
            .map_err(ConcatError::Manifest)?;
    }
    file.flush().map_err(ConcatError::Manifest)
}

/// Single quotes end a quoted token in the demuxer syntax and must be written
/// as `'\''`.
fn escape_manifest_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', r"'\''")
}

fn find_on_path(name: &std::ffi::OsStr) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(windows)]
fn hide_console_window(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    command.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn hide_console_window(_command: &mut Command) {}
