use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::chunker::TextChunk;

/// Why a temporary file exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    ChunkAudio,
    ConcatManifest,
    /// The final output while it is still being produced.
    PendingOutput,
}

/// A file byproduct of a run that must be removed before the run finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempArtifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
}

impl TempArtifact {
    pub fn chunk_audio(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: ArtifactKind::ChunkAudio,
        }
    }

    pub fn manifest(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: ArtifactKind::ConcatManifest,
        }
    }

    pub fn pending_output(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: ArtifactKind::PendingOutput,
        }
    }
}

/// Orchestration-local state of the active run.
#[derive(Debug, Default)]
pub struct RunState {
    /// Chunks still belonging to the run (chunked mode only).
    pub chunks: Vec<TextChunk>,
    /// Index of the chunk being synthesized.
    pub chunk_index: usize,
    /// Where the merged output goes once concatenation succeeds.
    pub final_output: Option<PathBuf>,
    artifacts: Vec<TempArtifact>,
}

impl RunState {
    /// Track an artifact. Call this *before* the file is created so a crash
    /// half-way through writing still gets cleaned up.
    pub fn register(&mut self, artifact: TempArtifact) {
        if !self.artifacts.contains(&artifact) {
            log::debug!("Registered temporary artifact {}", artifact.path.display());
            self.artifacts.push(artifact);
        }
    }

    /// Stop tracking the pending output at `path`. Once committed, the file
    /// survives cleanup.
    pub fn commit_output(&mut self, path: &Path) {
        self.artifacts
            .retain(|a| !(a.kind == ArtifactKind::PendingOutput && a.path == path));
    }

    pub fn artifacts(&self) -> &[TempArtifact] {
        &self.artifacts
    }

    /// Chunk audio paths in registration order, which is chunk-index order.
    pub fn chunk_audio_paths(&self) -> Vec<PathBuf> {
        self.artifacts
            .iter()
            .filter(|a| a.kind == ArtifactKind::ChunkAudio)
            .map(|a| a.path.clone())
            .collect()
    }

    fn reset(&mut self) -> Vec<TempArtifact> {
        self.chunks.clear();
        self.chunk_index = 0;
        self.final_output = None;
        std::mem::take(&mut self.artifacts)
    }
}

/// Counts from one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub deleted: usize,
    pub failed: usize,
}

/// Deletes temporary artifacts and resets run state.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupManager;

impl CleanupManager {
    pub fn new() -> Self {
        Self
    }

    /// Remove every artifact of `run` and reset it for the next request.
    ///
    /// Never fails: each deletion is attempted independently and failures are
    /// logged and counted.
    pub fn cleanup(&self, run: &mut RunState, reason: &str) -> CleanupReport {
        log::info!("Cleaning up synthesis state ({reason})");
        let artifacts = run.reset();
        let paths: Vec<PathBuf> = artifacts.into_iter().map(|a| a.path).collect();
        self.remove_all(&paths)
    }

    /// Attempt to delete each path. Already-absent paths are not counted.
    pub fn remove_all(&self, paths: &[PathBuf]) -> CleanupReport {
        let mut report = CleanupReport::default();
        if paths.is_empty() {
            log::debug!("No temporary files to delete");
            return report;
        }

        log::debug!("Deleting {} temporary files", paths.len());
        for path in paths {
            match remove_file(path) {
                Ok(true) => report.deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    log::warn!("Failed to delete temporary file {}: {e}", path.display());
                }
            }
        }
        log::info!(
            "Temporary file cleanup finished: {} deleted, {} failed",
            report.deleted,
            report.failed
        );
        report
    }
}

fn remove_file(path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
