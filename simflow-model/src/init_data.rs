use std::path::{Path, PathBuf};

use simflow_errors::SimResult;

/// The kind of an initial dataset file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileType {
    Json,
    Csv,
    Other,
}

/// A source of initial dataset files, keyed by dataset name.
pub trait InitDataHandler {
    /// Locate the file for one dataset, or `None` when the source has no
    /// data for it.
    fn get(&self, name: &str) -> SimResult<Option<(FileType, PathBuf)>>;
}

/// Initial datasets served from a directory of `<name>.json` files.
#[derive(Clone, Debug)]
pub struct DirInitData {
    root: PathBuf,
}

impl DirInitData {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl InitDataHandler for DirInitData {
    fn get(&self, name: &str) -> SimResult<Option<(FileType, PathBuf)>> {
        let path = self.root.join(format!("{name}.json"));
        if path.is_file() {
            Ok(Some((FileType::Json, path)))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serves_json_files_by_dataset_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("roads.json"), "{}").unwrap();
        let handler = DirInitData::new(dir.path());
        let (file_type, path) = handler.get("roads").unwrap().unwrap();
        assert_eq!(file_type, FileType::Json);
        assert!(path.ends_with("roads.json"));
        assert!(handler.get("water").unwrap().is_none());
    }
}
