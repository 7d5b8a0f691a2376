//! The state machine that drives one synthesis request end to end.
//!
//! ```text
//! Idle → Validating → Synthesizing(level) ─┬─ Waveform ────────────────┐
//!                        ▲                 └─ EmptyOutput/EngineError  │
//!                        └──── Retrying(next level) ◄──┘               │
//!                                                                      ▼
//!                              (chunked) Concatenating ──► Cleaning → Completed | Failed
//! ```
//!
//! Attempt-level failures never escape: they become transitions, and the one
//! that ends the run becomes the result's diagnostic. `Cleaning` runs on every
//! path, including a panic inside the engine, before the result is returned.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;

use crate::chunker::{split_into_chunks, DEFAULT_CHUNK_MAX_CHARS};
use crate::cleanup::{CleanupManager, CleanupReport, RunState, TempArtifact};
use crate::concat::{manifest_path_for, ConcatenationEngine, BUNDLED_FFMPEG};
use crate::config::AppConfig;
use crate::error::{ConcatError, SynthesisError, ValidationError};
use crate::progress::{ProgressReporter, Stage};
use crate::request::SynthesisRequest;
use crate::sanitizer::{sanitize, text_units, EscalationLadder, RetryLevel, MIN_TEXT_UNITS};
use crate::{InferenceGateway, InferenceOutcome, Waveform};

/// Texts longer than this get a "this may take a while" notice.
pub const DEFAULT_LONG_TEXT_WARNING_CHARS: usize = 500;

/// Characters of text shown in progress messages.
const PREVIEW_CHARS: usize = 100;

/// Where the orchestrator is in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Validating,
    Synthesizing(RetryLevel),
    Retrying(RetryLevel),
    Concatenating,
    Cleaning,
    Completed,
    Failed,
}

impl OrchestratorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrchestratorState::Completed | OrchestratorState::Failed)
    }
}

/// Terminal value of a request, emitted exactly once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisResult {
    pub success: bool,
    pub output_path: Option<PathBuf>,
    pub diagnostic: Option<String>,
    /// Inference calls made for this request.
    pub attempts: usize,
    pub cleanup: CleanupReport,
    pub elapsed_secs: f64,
}

impl SynthesisResult {
    pub fn completed(output_path: PathBuf, attempts: usize) -> Self {
        Self {
            success: true,
            output_path: Some(output_path),
            diagnostic: None,
            attempts,
            cleanup: CleanupReport::default(),
            elapsed_secs: 0.0,
        }
    }

    pub fn failed(diagnostic: impl Into<String>, attempts: usize) -> Self {
        Self {
            success: false,
            output_path: None,
            diagnostic: Some(diagnostic.into()),
            attempts,
            cleanup: CleanupReport::default(),
            elapsed_secs: 0.0,
        }
    }
}

/// Drives requests through validation, escalating synthesis, optional
/// concatenation and cleanup.
///
/// One orchestrator handles one request at a time; concurrent use is
/// prevented at the submission boundary ([`crate::TaskRunner`]).
pub struct Orchestrator<G> {
    gateway: G,
    ladder: EscalationLadder,
    concat: Option<ConcatenationEngine>,
    /// Where the concatenation tool was expected, for diagnostics.
    tool_path: PathBuf,
    preclean: bool,
    chunk_max_chars: usize,
    long_text_warning_chars: usize,
    cleanup: CleanupManager,
    state: OrchestratorState,
    run: RunState,
    attempts: usize,
}

impl<G: InferenceGateway> Orchestrator<G> {
    pub fn new(gateway: G) -> Self {
        Self {
            gateway,
            ladder: EscalationLadder::default(),
            concat: None,
            tool_path: PathBuf::from(BUNDLED_FFMPEG),
            preclean: false,
            chunk_max_chars: DEFAULT_CHUNK_MAX_CHARS,
            long_text_warning_chars: DEFAULT_LONG_TEXT_WARNING_CHARS,
            cleanup: CleanupManager::new(),
            state: OrchestratorState::Idle,
            run: RunState::default(),
            attempts: 0,
        }
    }

    /// Build an orchestrator from application configuration, detecting the
    /// concatenation tool at the configured location.
    pub fn from_config(gateway: G, config: &AppConfig) -> Self {
        let mut orchestrator = Self::new(gateway)
            .with_ladder(config.ladder.into())
            .with_chunk_max_chars(config.chunk_max_chars);
        orchestrator.long_text_warning_chars = config.long_text_warning_chars;
        orchestrator.preclean = config.preclean_text;
        orchestrator.tool_path = config.resolved_ffmpeg_path();
        orchestrator.concat = ConcatenationEngine::detect(&orchestrator.tool_path);
        orchestrator
    }

    pub fn with_ladder(mut self, ladder: EscalationLadder) -> Self {
        self.ladder = ladder;
        self
    }

    pub fn with_concatenation(mut self, engine: ConcatenationEngine) -> Self {
        self.tool_path = engine.tool_path().to_path_buf();
        self.concat = Some(engine);
        self
    }

    /// Strip a leading list number, a report title line and trailing
    /// punctuation once before the first simple-mode attempt.
    pub fn with_preclean(mut self, enabled: bool) -> Self {
        self.preclean = enabled;
        self
    }

    pub fn with_chunk_max_chars(mut self, max_chars: usize) -> Self {
        self.chunk_max_chars = max_chars.max(1);
        self
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn ladder(&self) -> &EscalationLadder {
        &self.ladder
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Whether chunked requests can be merged.
    pub fn can_concatenate(&self) -> bool {
        self.concat.as_ref().is_some_and(|c| c.is_available())
    }

    /// Run `request` to a terminal state and return its result.
    pub fn run(
        &mut self,
        request: &SynthesisRequest,
        progress: &mut ProgressReporter,
    ) -> SynthesisResult {
        let started = Instant::now();
        self.attempts = 0;

        progress.emit(Stage::Started, "---Synthesis task started---");
        progress.emit(
            Stage::Started,
            format!(
                "Text: {} chars, prompt text: {} chars, prompt audio: {}, output: {}",
                text_units(&request.text),
                text_units(&request.prompt_text),
                request.prompt_audio_path.display(),
                request.output_path.display()
            ),
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.drive(request, progress)))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                log::error!("Synthesis task panicked: {message}");
                Err(SynthesisError::Internal(message))
            });

        self.transition(OrchestratorState::Cleaning);
        let reason = if outcome.is_ok() {
            "synthesis completed"
        } else {
            "synthesis failed"
        };
        let report = self.cleanup.cleanup(&mut self.run, reason);
        progress.emit(
            Stage::Cleaning,
            format!(
                "Cleanup finished: {} temporary files deleted, {} failed",
                report.deleted, report.failed
            ),
        );

        let mut result = match outcome {
            Ok(path) => {
                self.transition(OrchestratorState::Completed);
                progress.emit(
                    Stage::Completed,
                    format!("Synthesis succeeded, audio saved to {}", path.display()),
                );
                SynthesisResult::completed(path, self.attempts)
            }
            Err(e) => {
                self.transition(OrchestratorState::Failed);
                log::error!("Synthesis failed: {e}");
                progress.emit(Stage::Failed, format!("Synthesis failed: {e}"));
                SynthesisResult::failed(e.to_string(), self.attempts)
            }
        };
        result.cleanup = report;
        result.elapsed_secs = started.elapsed().as_secs_f64();

        progress.emit(
            Stage::Finished,
            format!("Total task time: {:.2}s", result.elapsed_secs),
        );
        progress.emit(Stage::Finished, "---Synthesis task finished---");
        result
    }

    fn transition(&mut self, next: OrchestratorState) {
        log::debug!("Orchestrator state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn drive(
        &mut self,
        request: &SynthesisRequest,
        progress: &mut ProgressReporter,
    ) -> Result<PathBuf, SynthesisError> {
        self.transition(OrchestratorState::Validating);
        progress.emit(Stage::Validating, "Validating request");
        request.validate()?;

        let units = text_units(&request.text);
        if units > self.long_text_warning_chars {
            progress.emit(
                Stage::Warning,
                format!("Text is long ({units} chars), synthesis may take a while"),
            );
        }

        if request.chunked {
            self.drive_chunked(request, progress)
        } else {
            progress.emit(Stage::Started, "Using simple mode (no chunking)");
            let text = if self.preclean {
                preclean(&request.text, progress)
            } else {
                request.text.clone()
            };
            let waveform = self.synthesize_with_escalation(&text, request, progress)?;
            self.run
                .register(TempArtifact::pending_output(&request.output_path));
            self.write_audio(&waveform, &request.output_path, progress)?;
            self.run.commit_output(&request.output_path);
            Ok(request.output_path.clone())
        }
    }

    fn drive_chunked(
        &mut self,
        request: &SynthesisRequest,
        progress: &mut ProgressReporter,
    ) -> Result<PathBuf, SynthesisError> {
        let chunks = split_into_chunks(&request.text, self.chunk_max_chars);
        if chunks.is_empty() {
            return Err(ValidationError::EmptyText.into());
        }
        let total = chunks.len();
        progress.emit(
            Stage::Started,
            format!(
                "Using chunked mode: {total} chunks of at most {} chars",
                self.chunk_max_chars
            ),
        );
        self.run.chunks = chunks;
        self.run.final_output = Some(request.output_path.clone());

        for index in 0..total {
            self.run.chunk_index = index;
            let chunk = self.run.chunks[index].clone();
            let chunk_path = request.chunk_path(chunk.index);
            self.run.register(TempArtifact::chunk_audio(&chunk_path));

            progress.emit(
                Stage::Chunk { index, total },
                format!(
                    "Synthesizing chunk {}/{total} ({} chars)",
                    index + 1,
                    chunk.char_count()
                ),
            );
            let waveform = self
                .synthesize_with_escalation(&chunk.content, request, progress)
                .map_err(|e| in_chunk(e, index, total))?;
            self.write_audio(&waveform, &chunk_path, progress)?;
        }

        self.transition(OrchestratorState::Concatenating);
        let output = self
            .run
            .final_output
            .clone()
            .unwrap_or_else(|| request.output_path.clone());
        let inputs = self.run.chunk_audio_paths();
        self.run.register(TempArtifact::manifest(manifest_path_for(&output)));
        progress.emit(
            Stage::Concatenating,
            format!("Merging {} chunks into {}", inputs.len(), output.display()),
        );

        let engine = self
            .concat
            .as_ref()
            .ok_or_else(|| ConcatError::ToolUnavailable(self.tool_path.clone()))?;
        self.run.register(TempArtifact::pending_output(&output));
        engine.concatenate(&inputs, &output)?;
        self.run.commit_output(&output);
        Ok(output)
    }

    /// Walk the ladder for `text` until one level yields audio.
    fn synthesize_with_escalation(
        &mut self,
        text: &str,
        request: &SynthesisRequest,
        progress: &mut ProgressReporter,
    ) -> Result<Waveform, SynthesisError> {
        let levels = self.ladder.levels().to_vec();
        let total = levels.len();
        let mut last_error = None;

        for (step, level) in levels.into_iter().enumerate() {
            if step > 0 {
                self.transition(OrchestratorState::Retrying(level));
                progress.emit(
                    Stage::Retrying(level),
                    format!("Retrying with text repair level {level}"),
                );
            }
            self.transition(OrchestratorState::Synthesizing(level));

            let candidate = sanitize(text, level);
            let units = text_units(&candidate);
            self.attempts += 1;
            progress.emit(
                Stage::Attempt(level),
                format!(
                    "Attempt {}/{total} [{level}]: {units} chars 【{}】",
                    step + 1,
                    preview(&candidate)
                ),
            );
            if units < MIN_TEXT_UNITS {
                progress.emit(
                    Stage::Warning,
                    format!("Text is short ({units} chars), the engine may produce no output"),
                );
            }

            let started = Instant::now();
            let outcome = self.gateway.synthesize(
                &candidate,
                &request.prompt_text,
                &request.prompt_audio_path,
            );
            let secs = started.elapsed().as_secs_f64();

            let failure = match outcome {
                InferenceOutcome::Waveform(waveform) if !waveform.samples.is_empty() => {
                    progress.emit(
                        Stage::Synthesized(level),
                        format!(
                            "Inference finished in {secs:.2}s ({:.2}s of audio)",
                            waveform.duration_secs()
                        ),
                    );
                    return Ok(waveform);
                }
                InferenceOutcome::Waveform(_) | InferenceOutcome::EmptyOutput => {
                    SynthesisError::EmptyOutput(empty_output_diagnostic(&candidate))
                }
                InferenceOutcome::EngineError(detail) => {
                    SynthesisError::Engine(format!("Engine error at level {level}: {detail}"))
                }
            };
            progress.emit(Stage::Warning, failure.to_string());
            last_error = Some(failure);
        }

        Err(exhausted(last_error, total))
    }

    fn write_audio(
        &self,
        waveform: &Waveform,
        path: &Path,
        progress: &mut ProgressReporter,
    ) -> Result<(), SynthesisError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| SynthesisError::filesystem(parent, e))?;
        }
        let started = Instant::now();
        waveform
            .write_wav(path)
            .map_err(|source| SynthesisError::OutputWrite {
                path: path.to_path_buf(),
                source,
            })?;
        progress.emit(
            Stage::Writing,
            format!(
                "Wrote {} in {:.2}s",
                path.display(),
                started.elapsed().as_secs_f64()
            ),
        );
        Ok(())
    }
}

fn preclean(text: &str, progress: &mut ProgressReporter) -> String {
    let cleaned = sanitize(text, RetryLevel::StripLeadingMarkup);
    if cleaned != text {
        progress.emit(
            Stage::Started,
            format!(
                "Cleaned text format: {} chars before, {} chars after",
                text_units(text),
                text_units(&cleaned)
            ),
        );
        log::info!("Text before cleaning: 【{}】", preview(text));
        log::info!("Text after cleaning: 【{}】", preview(&cleaned));
    }
    cleaned
}

fn preview(text: &str) -> String {
    if text_units(text) <= PREVIEW_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(PREVIEW_CHARS).collect();
    format!("{head}...")
}

fn empty_output_diagnostic(text: &str) -> String {
    format!(
        "Semantic tokens are empty. Likely causes: \
         1. the text is too short or badly formatted ({} chars); \
         2. the prompt audio does not match the prompt text; \
         3. the text starts with list numbers or special symbols. \
         Text: '{}'",
        text_units(text),
        preview(text)
    )
}

fn exhausted(last_error: Option<SynthesisError>, total: usize) -> SynthesisError {
    match last_error {
        Some(SynthesisError::EmptyOutput(detail)) => SynthesisError::EmptyOutput(format!(
            "All {total} synthesis attempts failed. {detail}"
        )),
        Some(SynthesisError::Engine(detail)) => {
            SynthesisError::Engine(format!("All {total} synthesis attempts failed. {detail}"))
        }
        Some(other) => other,
        None => SynthesisError::Internal("escalation ladder has no levels".to_string()),
    }
}

fn in_chunk(error: SynthesisError, index: usize, total: usize) -> SynthesisError {
    let prefix = format!("Chunk {}/{total} failed:", index + 1);
    match error {
        SynthesisError::EmptyOutput(detail) => {
            SynthesisError::EmptyOutput(format!("{prefix} {detail}"))
        }
        SynthesisError::Engine(detail) => SynthesisError::Engine(format!("{prefix} {detail}")),
        other => other,
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
