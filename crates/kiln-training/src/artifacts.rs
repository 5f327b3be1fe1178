//! Discovery of the model file a training run produced.
//!
//! The working directory is snapshotted before and after the run; files that
//! appeared or changed and look like serialized models are candidates, and a
//! fixed precedence picks one of them.

use crate::error::{TrainingError, TrainingResult};
use crate::layout::UploadLayout;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Serialized-model extensions across the common ML ecosystems.
pub const MODEL_EXTENSIONS: &[&str] = &[
    "pth", "pt", // PyTorch
    "h5", "keras", // Keras
    "ckpt", "pb", "tflite", // TensorFlow
    "pkl", "pickle", "joblib", // pickled Python objects / scikit-learn
    "onnx", "safetensors", "gguf", // interchange formats
    "model",
];

/// Filename keywords that mark a deliberate final checkpoint.
pub const PREFERRED_KEYWORDS: &[&str] = &["best", "final", "trained"];

/// Directory names scripts conventionally save models into.
pub const OUTPUT_DIR_SEGMENTS: &[&str] = &["saved_models", "outputs", "checkpoints", "models"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    pub path: PathBuf,
    pub modified: SystemTime,
    pub size: u64,
}

/// All regular files under a directory, keyed by absolute path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySnapshot {
    files: BTreeMap<PathBuf, FileSnapshot>,
}

impl DirectorySnapshot {
    /// Walks `root` recursively. Fails only if `root` itself cannot be read;
    /// unreadable entries below it are skipped.
    pub fn capture(root: &Path) -> TrainingResult<Self> {
        let mut files = BTreeMap::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(TrainingError::Snapshot(format!("cannot read {}: {e}", root.display())));
                }
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            let path = entry.into_path();
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            files.insert(path.clone(), FileSnapshot { path, modified, size: meta.len() });
        }
        debug!(root = %root.display(), files = files.len(), "Captured directory snapshot");
        Ok(Self { files })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&FileSnapshot> {
        self.files.get(path)
    }

    pub fn insert(&mut self, file: FileSnapshot) {
        self.files.insert(file.path.clone(), file);
    }
}

#[must_use]
pub fn is_model_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| MODEL_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)))
}

/// Model files that are new in `after`, or whose mtime advanced or size changed.
/// Ordered by path.
#[must_use]
pub fn changed_model_files(before: &DirectorySnapshot, after: &DirectorySnapshot) -> Vec<FileSnapshot> {
    after
        .files
        .values()
        .filter(|file| is_model_file(&file.path))
        .filter(|file| match before.get(&file.path) {
            None => true,
            Some(prev) => file.modified > prev.modified || file.size != prev.size,
        })
        .cloned()
        .collect()
}

/// Why a candidate was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    OnlyCandidate,
    Keyword,
    OutputDirectory,
    Largest,
    Newest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSelection {
    pub path: PathBuf,
    pub reason: SelectionReason,
}

/// Picks the canonical model among `candidates`.
///
/// Precedence: preferred keyword in the file name, then a conventional output
/// directory below `working_dir`, then the largest non-empty file, then the
/// most recently modified one.
#[must_use]
pub fn select_model(candidates: &[FileSnapshot], working_dir: &Path) -> Option<ArtifactSelection> {
    let pick = |file: &FileSnapshot, reason| Some(ArtifactSelection { path: file.path.clone(), reason });

    match candidates {
        [] => return None,
        [only] => return pick(only, SelectionReason::OnlyCandidate),
        _ => {}
    }

    if let Some(file) = candidates.iter().find(|f| has_preferred_keyword(&f.path)) {
        return pick(file, SelectionReason::Keyword);
    }

    if let Some(file) = candidates.iter().find(|f| in_output_directory(&f.path, working_dir)) {
        return pick(file, SelectionReason::OutputDirectory);
    }

    let largest = candidates
        .iter()
        .filter(|f| f.size > 0)
        .fold(None::<&FileSnapshot>, |best, f| match best {
            Some(b) if b.size >= f.size => Some(b),
            _ => Some(f),
        });
    if let Some(file) = largest {
        return pick(file, SelectionReason::Largest);
    }

    candidates
        .iter()
        .fold(None::<&FileSnapshot>, |best, f| match best {
            Some(b) if b.modified >= f.modified => Some(b),
            _ => Some(f),
        })
        .and_then(|file| pick(file, SelectionReason::Newest))
}

fn has_preferred_keyword(path: &Path) -> bool {
    let Some(name) = path.file_name() else { return false };
    let name = name.to_string_lossy().to_lowercase();
    PREFERRED_KEYWORDS.iter().any(|kw| name.contains(kw))
}

fn in_output_directory(path: &Path, working_dir: &Path) -> bool {
    let rel = path.strip_prefix(working_dir).unwrap_or(path);
    let Some(parent) = rel.parent() else { return false };
    parent.components().any(|c| {
        let segment = c.as_os_str().to_string_lossy();
        OUTPUT_DIR_SEGMENTS.iter().any(|known| known.eq_ignore_ascii_case(&segment))
    })
}

/// A resolved artifact: absolute path plus its upload-root-relative form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedArtifact {
    pub absolute_path: PathBuf,
    pub relative_path: String,
    pub reason: SelectionReason,
    pub candidates: usize,
}

/// Runs diffing and selection for one job's working directory.
#[derive(Debug, Clone)]
pub struct ArtifactDetector {
    layout: UploadLayout,
}

impl ArtifactDetector {
    #[must_use]
    pub fn new(layout: UploadLayout) -> Self {
        Self { layout }
    }

    /// Returns `None` when the run produced no model file. That is not an error.
    #[must_use]
    pub fn detect(
        &self,
        before: &DirectorySnapshot,
        after: &DirectorySnapshot,
        working_dir: &Path,
    ) -> Option<DetectedArtifact> {
        let candidates = changed_model_files(before, after);
        if candidates.is_empty() {
            info!(working_dir = %working_dir.display(), "No new or modified model files detected");
            return None;
        }

        let selection = select_model(&candidates, working_dir)?;
        let relative_path = self.layout.relative_to_root(&selection.path);
        info!(
            candidates = candidates.len(),
            reason = ?selection.reason,
            path = %relative_path,
            "Selected trained model artifact"
        );
        Some(DetectedArtifact {
            absolute_path: selection.path,
            relative_path,
            reason: selection.reason,
            candidates: candidates.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn file(path: &str, secs: u64, size: u64) -> FileSnapshot {
        FileSnapshot { path: PathBuf::from(path), modified: SystemTime::UNIX_EPOCH + Duration::from_secs(secs), size }
    }

    fn snapshot(files: &[FileSnapshot]) -> DirectorySnapshot {
        let mut snap = DirectorySnapshot::default();
        for f in files {
            snap.insert(f.clone());
        }
        snap
    }

    #[test]
    fn test_identical_snapshots_yield_nothing() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("model.pth"), b"weights").unwrap();
        std::fs::create_dir(temp.path().join("sub")).unwrap();
        std::fs::write(temp.path().join("sub/data.csv"), b"a,b").unwrap();

        let before = DirectorySnapshot::capture(temp.path()).unwrap();
        let after = DirectorySnapshot::capture(temp.path()).unwrap();
        assert_eq!(before.len(), 2);
        assert!(changed_model_files(&before, &after).is_empty());
    }

    #[test]
    fn test_capture_missing_root_fails() {
        let temp = TempDir::new().unwrap();
        assert!(DirectorySnapshot::capture(&temp.path().join("nope")).is_err());
    }

    #[test]
    fn test_changed_files_filters_by_extension_and_change() {
        let before = snapshot(&[file("/w/old.pth", 10, 5), file("/w/same.onnx", 10, 5), file("/w/grown.pkl", 10, 5)]);
        let after = snapshot(&[
            file("/w/old.pth", 20, 5),
            file("/w/same.onnx", 10, 5),
            file("/w/grown.pkl", 10, 9),
            file("/w/new.PT", 30, 1),
            file("/w/log.txt", 30, 1),
        ]);
        let changed: Vec<_> = changed_model_files(&before, &after).into_iter().map(|f| f.path).collect();
        assert_eq!(
            changed,
            vec![PathBuf::from("/w/grown.pkl"), PathBuf::from("/w/new.PT"), PathBuf::from("/w/old.pth")]
        );
    }

    #[test]
    fn test_keyword_beats_everything() {
        let candidates = [file("/w/checkpoint_epoch3.pth", 50, 900), file("/w/best_model.pth", 10, 10)];
        let sel = select_model(&candidates, Path::new("/w")).unwrap();
        assert_eq!(sel.path, PathBuf::from("/w/best_model.pth"));
        assert_eq!(sel.reason, SelectionReason::Keyword);
    }

    #[test]
    fn test_single_candidate_returned_directly() {
        let candidates = [file("/w/model.onnx", 0, 0)];
        let sel = select_model(&candidates, Path::new("/w")).unwrap();
        assert_eq!(sel.path, PathBuf::from("/w/model.onnx"));
        assert_eq!(sel.reason, SelectionReason::OnlyCandidate);
    }

    #[test]
    fn test_output_directory_then_size_then_time() {
        let candidates = [file("/w/a.pth", 10, 100), file("/w/checkpoints/b.pth", 10, 1)];
        let sel = select_model(&candidates, Path::new("/w")).unwrap();
        assert_eq!(sel.reason, SelectionReason::OutputDirectory);
        assert_eq!(sel.path, PathBuf::from("/w/checkpoints/b.pth"));

        let candidates = [file("/w/a.pth", 10, 100), file("/w/b.pth", 20, 300), file("/w/c.pth", 30, 300)];
        let sel = select_model(&candidates, Path::new("/w")).unwrap();
        assert_eq!(sel.reason, SelectionReason::Largest);
        assert_eq!(sel.path, PathBuf::from("/w/b.pth"));

        let candidates = [file("/w/a.pth", 10, 0), file("/w/b.pth", 30, 0)];
        let sel = select_model(&candidates, Path::new("/w")).unwrap();
        assert_eq!(sel.reason, SelectionReason::Newest);
        assert_eq!(sel.path, PathBuf::from("/w/b.pth"));
    }

    #[test]
    fn test_output_segment_must_be_below_working_dir() {
        // "models" in the working dir itself must not count.
        let candidates = [file("/srv/models/job/a.pth", 10, 5), file("/srv/models/job/b.pth", 10, 50)];
        let sel = select_model(&candidates, Path::new("/srv/models/job")).unwrap();
        assert_eq!(sel.reason, SelectionReason::Largest);
    }

    #[test]
    fn test_detector_returns_root_relative_path() {
        let temp = TempDir::new().unwrap();
        let layout = UploadLayout::new(temp.path(), "saved_models", Path::new(".kiln/registry")).unwrap();
        let work = layout.folder_dir("mnist");
        std::fs::create_dir_all(&work).unwrap();

        let before = DirectorySnapshot::capture(&work).unwrap();
        std::fs::write(work.join("final.pth"), b"weights").unwrap();
        let after = DirectorySnapshot::capture(&work).unwrap();

        let detected = ArtifactDetector::new(layout).detect(&before, &after, &work).unwrap();
        assert_eq!(detected.relative_path, "mnist/final.pth");
        assert_eq!(detected.reason, SelectionReason::OnlyCandidate);
        assert_eq!(detected.candidates, 1);
    }
}
