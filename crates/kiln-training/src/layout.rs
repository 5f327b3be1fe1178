use crate::error::{TrainingError, TrainingResult};
use std::path::{Path, PathBuf};

/// Filesystem layout of the shared upload root.
///
/// Every trainable entity lives in `<upload_root>/<folder>/`; scripts run with
/// that folder as their working directory.
#[derive(Debug, Clone)]
pub struct UploadLayout {
    root: PathBuf,
    output_dir_name: String,
    registry_dir: PathBuf,
}

impl UploadLayout {
    /// Creates a layout rooted at `root`, made absolute against the current dir.
    pub fn new(root: &Path, output_dir_name: impl Into<String>, registry_dir: &Path) -> TrainingResult<Self> {
        let root = std::path::absolute(root)
            .map_err(|e| TrainingError::Config(format!("cannot resolve upload root {}: {e}", root.display())))?;
        let registry_dir = if registry_dir.is_absolute() { registry_dir.to_path_buf() } else { root.join(registry_dir) };
        Ok(Self { root, output_dir_name: output_dir_name.into(), registry_dir })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn folder_dir(&self, folder_name: &str) -> PathBuf {
        self.root.join(folder_name)
    }

    #[must_use]
    pub fn script_path(&self, folder_name: &str, script_name: &str) -> PathBuf {
        self.folder_dir(folder_name).join(script_name)
    }

    /// Where scripts are advised (not required) to save their model.
    #[must_use]
    pub fn output_dir(&self, folder_name: &str) -> PathBuf {
        self.folder_dir(folder_name).join(&self.output_dir_name)
    }

    #[must_use]
    pub fn registry_dir(&self) -> &Path {
        &self.registry_dir
    }

    #[must_use]
    pub fn folder_exists(&self, folder_name: &str) -> bool {
        self.folder_dir(folder_name).is_dir()
    }

    #[must_use]
    pub fn script_exists(&self, folder_name: &str, script_name: &str) -> bool {
        self.script_path(folder_name, script_name).is_file()
    }

    /// `path` relative to the upload root, with `/` separators.
    ///
    /// Paths outside the root are returned unchanged.
    #[must_use]
    pub fn relative_to_root(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) => rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => path.to_string_lossy().into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout(root: &Path) -> UploadLayout {
        UploadLayout::new(root, "saved_models", Path::new(".kiln/registry")).unwrap()
    }

    #[test]
    fn test_layout_paths() {
        let temp = TempDir::new().unwrap();
        let layout = layout(temp.path());

        assert!(layout.folder_dir("mnist").ends_with("mnist"));
        assert!(layout.script_path("mnist", "train.py").ends_with("mnist/train.py"));
        assert!(layout.output_dir("mnist").ends_with("mnist/saved_models"));
        assert!(layout.registry_dir().starts_with(layout.root()));
    }

    #[test]
    fn test_folder_must_be_directory() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("notadir"), "x").unwrap();
        std::fs::create_dir(temp.path().join("mnist")).unwrap();
        std::fs::write(temp.path().join("mnist/train.py"), "print(1)").unwrap();

        let layout = layout(temp.path());
        assert!(!layout.folder_exists("notadir"));
        assert!(layout.folder_exists("mnist"));
        assert!(layout.script_exists("mnist", "train.py"));
        assert!(!layout.script_exists("mnist", "missing.py"));
    }

    #[test]
    fn test_relative_to_root() {
        let temp = TempDir::new().unwrap();
        let layout = layout(temp.path());
        let inside = layout.root().join("mnist").join("saved_models").join("best.pth");
        assert_eq!(layout.relative_to_root(&inside), "mnist/saved_models/best.pth");

        let outside = Path::new("/elsewhere/model.pt");
        assert_eq!(layout.relative_to_root(outside), "/elsewhere/model.pt");
    }
}
