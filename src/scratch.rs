//! Scoped temporary files for audio handed to or received from providers
//!
//! Every [`ScratchFile`] has a unique name and is removed when dropped. A
//! failed removal is logged and otherwise ignored.

use std::path::{Path, PathBuf};

use futures::Stream;
use tokio::io::AsyncReadExt;

use crate::{Error, Result};

const FILE_PREFIX: &str = "parley-";
const READ_CHUNK: usize = 16 * 1024;

/// Where scratch files are created
#[derive(Debug, Clone, Default)]
pub struct ScratchDir {
    dir: Option<PathBuf>,
}

impl ScratchDir {
    /// Use the system temp directory
    #[must_use]
    pub const fn system() -> Self {
        Self { dir: None }
    }

    /// Use an explicit directory (created on demand)
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    /// Directory files will be placed in
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Create an empty, uniquely named file with the given extension
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resource`] if the file cannot be created
    pub fn create(&self, extension: &str) -> Result<ScratchFile> {
        let dir = self.path();
        std::fs::create_dir_all(&dir).map_err(|e| {
            Error::Resource(format!("failed to create scratch dir {}: {e}", dir.display()))
        })?;

        let suffix = format!(".{}", extension.trim_start_matches('.'));
        let path = tempfile::Builder::new()
            .prefix(FILE_PREFIX)
            .suffix(&suffix)
            .tempfile_in(&dir)
            .and_then(|f| f.into_temp_path().keep().map_err(|e| e.error))
            .map_err(|e| Error::Resource(format!("failed to create scratch file: {e}")))?;

        tracing::trace!(path = %path.display(), "created scratch file");
        Ok(ScratchFile { path })
    }

    /// Create a scratch file holding `bytes`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resource`] if the file cannot be created or written
    pub async fn write(&self, extension: &str, bytes: &[u8]) -> Result<ScratchFile> {
        let file = self.create(extension)?;
        tokio::fs::write(file.path(), bytes).await.map_err(|e| {
            Error::Resource(format!(
                "failed to write scratch file {}: {e}",
                file.path().display()
            ))
        })?;
        Ok(file)
    }
}

/// A temporary file deleted on drop
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the file on disk
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file metadata cannot be read
    pub async fn size(&self) -> Result<u64> {
        Ok(tokio::fs::metadata(&self.path).await?.len())
    }

    /// Read the whole file into memory
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read
    pub async fn read(&self) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(&self.path).await?)
    }

    /// Turn the file into a byte stream that owns it
    ///
    /// The file is removed once the stream is dropped, whether it was read to
    /// the end or abandoned midway.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be opened
    pub async fn into_stream(
        self,
    ) -> Result<impl Stream<Item = std::io::Result<Vec<u8>>> + Send + 'static> {
        let file = tokio::fs::File::open(&self.path).await?;

        Ok(futures::stream::try_unfold(
            (file, self),
            |(mut file, guard)| async move {
                let mut buf = vec![0u8; READ_CHUNK];
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    tracing::trace!(path = %guard.path.display(), "scratch file fully streamed");
                    return Ok(None);
                }
                buf.truncate(n);
                Ok(Some((buf, (file, guard))))
            },
        ))
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::trace!(path = %self.path.display(), "removed scratch file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                let err = Error::Resource(format!("failed to remove {}: {e}", self.path.display()));
                tracing::warn!(error = %err, "scratch file cleanup failed");
            }
        }
    }
}
