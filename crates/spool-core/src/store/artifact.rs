//! One artifact file per descriptor: `<name>_<id>.<extension>` under the store directory.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;

use crate::domain::{Descriptor, Payload, TaskId};
use crate::error::CodecError;

#[derive(Debug, Error)]
pub(crate) enum ArtifactError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// An artifact found on disk during a restore scan.
#[derive(Debug)]
pub(crate) struct ArtifactEntry {
    pub path: PathBuf,
    pub modified: SystemTime,
}

#[derive(Debug, Clone)]
pub(crate) struct ArtifactDir {
    dir: PathBuf,
    extension: String,
}

impl ArtifactDir {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        let extension: String = extension.into();
        Self {
            dir: dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    pub fn file_name(&self, name: &str, id: TaskId) -> String {
        format!("{}_{}.{}", sanitize(name), id.get(), self.extension)
    }

    pub fn path_for<P: Payload>(&self, task: &Descriptor<P>) -> PathBuf {
        self.dir.join(self.file_name(task.name(), task.id()))
    }

    /// Write the descriptor's artifact. The bytes go to `<file>.tmp` first and
    /// are renamed into place, so a crash never leaves a half-written artifact
    /// under the restore extension.
    pub fn write<P: Payload>(&self, task: &Descriptor<P>) -> Result<PathBuf, ArtifactError> {
        let bytes = task.to_durable_bytes()?;
        let path = self.path_for(task);
        let tmp = path.with_extension(format!("{}.tmp", self.extension));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// Delete an artifact. A missing file counts as deleted.
    pub fn delete(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    /// Every file with the store's extension, oldest first.
    pub fn list(&self) -> io::Result<Vec<ArtifactEntry>> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            entries.push(ArtifactEntry { path, modified });
        }
        entries.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
        Ok(entries)
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() { "task".to_string() } else { cleaned }
}
