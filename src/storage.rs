//! Persisted render outputs.
//!
//! Finished images are PNG files named from their session's start time, so
//! sorting names lexically sorts them chronologically.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use image::RgbaImage;

use crate::error::{FarmError, Result};
use crate::scheduler::session::FinishedImage;

const OUTPUT_PREFIX: &str = "render-";
const OUTPUT_EXT: &str = "png";

/// Name that resolves to the newest output.
pub const LATEST: &str = "latest";

/// Output name for a session started at `at`, e.g. `render-20261016-140322-123.png`.
pub fn output_name(at: DateTime<Utc>) -> String {
    format!(
        "{}{}.{}",
        OUTPUT_PREFIX,
        at.format("%Y%m%d-%H%M%S-%3f"),
        OUTPUT_EXT
    )
}

fn is_output_name(name: &str) -> bool {
    name.starts_with(OUTPUT_PREFIX) && name.ends_with(&format!(".{}", OUTPUT_EXT))
}

/// Reject anything that could escape the output directory.
fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(FarmError::InvalidArgument(
            "image name cannot be empty".to_string(),
        ));
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(FarmError::InvalidArgument(format!(
            "invalid image name {:?}",
            name
        )));
    }
    Ok(())
}

/// Directory of finished renders.
#[derive(Debug, Clone)]
pub struct OutputStore {
    dir: PathBuf,
}

impl OutputStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Encode and write a finished image. The file appears atomically.
    pub async fn persist(&self, image: FinishedImage) -> Result<PathBuf> {
        validate_name(&image.name)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.dir.join(&image.name);
        let partial = self.dir.join(format!(".{}.partial", image.name));

        let FinishedImage {
            name,
            width,
            height,
            pixels,
        } = image;
        let buffer = RgbaImage::from_raw(width, height, pixels).ok_or_else(|| {
            FarmError::Internal(format!("pixel buffer for {} does not match {}x{}", name, width, height))
        })?;

        let target = partial.clone();
        tokio::task::spawn_blocking(move || buffer.save_with_format(&target, image::ImageFormat::Png))
            .await
            .map_err(|e| FarmError::Internal(format!("encoder task failed: {}", e)))??;
        tokio::fs::rename(&partial, &path).await?;

        tracing::info!(path = %path.display(), width, height, "Render output saved");
        Ok(path)
    }

    /// Output names, most recent first. A missing directory lists as empty.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if is_output_name(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        names.reverse();
        Ok(names)
    }

    /// Read an output by name, or the newest one for [`LATEST`].
    ///
    /// Returns the resolved name alongside the encoded bytes.
    pub async fn read(&self, name: &str) -> Result<(String, Vec<u8>)> {
        validate_name(name)?;

        let resolved = if name == LATEST {
            self.list()
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| FarmError::NotFound("no rendered images yet".to_string()))?
        } else {
            name.to_string()
        };

        match tokio::fs::read(self.dir.join(&resolved)).await {
            Ok(bytes) => Ok((resolved, bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FarmError::NotFound(format!("image {} not found", resolved)))
            }
            Err(e) => Err(e.into()),
        }
    }
}
