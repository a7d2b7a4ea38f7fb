use std::fs::{self, File};
use std::io::{Read, Write};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;
use tracing::debug;

use crate::error::LabError;

/// An uploaded file parked on disk for the lifetime of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedUpload {
    pub path: Utf8PathBuf,
    /// Name the client sent, or the staged file name when it sent none.
    pub original_name: String,
}

pub trait TransientFiles: Send + Sync {
    fn stage(&self, original_name: Option<&str>, content: &[u8]) -> Result<StagedUpload, LabError>;
    fn open(&self, upload: &StagedUpload) -> Result<Box<dyn Read + Send>, LabError>;
    fn delete(&self, upload: &StagedUpload) -> Result<(), LabError>;
}

#[derive(Debug, Clone)]
pub struct UploadDir {
    root: Utf8PathBuf,
}

impl UploadDir {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), LabError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| LabError::Filesystem(err.to_string()))
    }
}

impl TransientFiles for UploadDir {
    fn stage(&self, original_name: Option<&str>, content: &[u8]) -> Result<StagedUpload, LabError> {
        self.ensure_root()?;
        let mut temp = Builder::new()
            .prefix("upload-")
            .suffix(".csv")
            .tempfile_in(self.root.as_std_path())
            .map_err(|err| LabError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| LabError::Filesystem(err.to_string()))?;
        let (_, path) = temp
            .keep()
            .map_err(|err| LabError::Filesystem(err.to_string()))?;
        let path = Utf8PathBuf::from_path_buf(path)
            .map_err(|_| LabError::Filesystem("invalid upload path".to_string()))?;
        let original_name = original_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .or_else(|| path.file_name().map(str::to_string))
            .unwrap_or_default();
        debug!(path = %path, bytes = content.len(), "staged upload");
        Ok(StagedUpload {
            path,
            original_name,
        })
    }

    fn open(&self, upload: &StagedUpload) -> Result<Box<dyn Read + Send>, LabError> {
        let file = File::open(upload.path.as_std_path()).map_err(|err| {
            LabError::MarkerStream(format!("open {}: {err}", upload.path))
        })?;
        Ok(Box::new(file))
    }

    fn delete(&self, upload: &StagedUpload) -> Result<(), LabError> {
        fs::remove_file(upload.path.as_std_path())
            .map_err(|err| LabError::Filesystem(format!("remove {}: {err}", upload.path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_then_delete() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("uploads")).unwrap();
        let dir = UploadDir::new(root);

        let upload = dir.stage(Some("markers.csv"), b"posicion\n").unwrap();
        assert_eq!(upload.original_name, "markers.csv");
        assert!(upload.path.starts_with(dir.root()));

        let mut content = String::new();
        dir.open(&upload)
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "posicion\n");

        dir.delete(&upload).unwrap();
        assert!(!upload.path.as_std_path().exists());
        assert!(dir.delete(&upload).is_err());
    }
}
