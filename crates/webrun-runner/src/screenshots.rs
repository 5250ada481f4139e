//! Screenshot capture and discovery.
//!
//! Two channels feed the record's screenshot list: images pushed through the
//! per-step hook are decoded and written here, and files the engine dropped
//! into the screenshot directory on its own are discovered by a scan at the
//! end of the run. Both use the file name as the screenshot id.

use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, warn};
use webrun_core::layout::ResultsLayout;
use webrun_core::ScreenshotRef;

use crate::error::ArtifactError;
use crate::persist::write_atomic;

/// Image extensions picked up by a directory scan.
pub const DEFAULT_EXTENSIONS: &[&str] = &["jpeg", "jpg", "png"];

/// File stem of a pushed step screenshot.
pub fn step_file_stem(step_index: u32) -> String {
    format!("step_{:04}", step_index)
}

/// Decode an image payload into bytes plus a file extension.
///
/// Accepts `data:<mime>;base64,<payload>` URIs and bare base64. The
/// extension follows the mime type; bare payloads are assumed to be JPEG.
pub fn decode_image(raw: &str) -> Result<(Vec<u8>, &'static str), ArtifactError> {
    let raw = raw.trim();
    let (mime, payload) = match raw.strip_prefix("data:") {
        Some(rest) => match rest.split_once(',') {
            Some((header, payload)) => (header.split(';').next(), payload),
            None => (None, rest),
        },
        None => (None, raw),
    };

    let extension = match mime.map(str::to_ascii_lowercase).as_deref() {
        Some("image/png") => "png",
        _ => "jpeg",
    };

    let compact: String = payload.split_whitespace().collect();
    if compact.is_empty() {
        return Err(ArtifactError::Empty);
    }
    let bytes = STANDARD.decode(compact)?;
    if bytes.is_empty() {
        return Err(ArtifactError::Empty);
    }
    Ok((bytes, extension))
}

/// Reads and writes screenshots under one directory.
#[derive(Debug, Clone)]
pub struct ScreenshotCollector {
    dir: PathBuf,
    extensions: Vec<String>,
}

impl ScreenshotCollector {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Builder method to replace the accepted extensions.
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.into().to_ascii_lowercase())
            .collect();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn accepts(&self, name: &str) -> bool {
        if name.starts_with('.') {
            return false;
        }
        match Path::new(name).extension().and_then(|e| e.to_str()) {
            Some(ext) => {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            }
            None => false,
        }
    }

    /// Sorted names of image files directly inside `dir`.
    ///
    /// A missing or unreadable directory yields an empty list.
    pub async fn collect(&self, dir: &Path) -> Vec<String> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "Screenshot directory does not exist");
                return Vec::new();
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Error collecting screenshots");
                return Vec::new();
            }
        };

        let mut names = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Error collecting screenshots");
                    break;
                }
            };
            match entry.file_type().await {
                Ok(ft) if ft.is_file() => {}
                _ => continue,
            }
            if let Some(name) = entry.file_name().to_str() {
                if self.accepts(name) {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        names
    }

    /// References for every image in the screenshot directory, stamped with
    /// the file's modification time.
    pub async fn scan(&self) -> Vec<ScreenshotRef> {
        let mut refs = Vec::new();
        for name in self.collect(&self.dir).await {
            let captured_at = match fs::metadata(self.dir.join(&name)).await {
                Ok(meta) => meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now()),
                Err(e) => {
                    debug!(file = %name, error = %e, "Screenshot vanished during scan");
                    continue;
                }
            };
            let path = ResultsLayout::screenshot_rel_path(&name);
            refs.push(ScreenshotRef::new(name, path, captured_at));
        }
        refs
    }

    /// Persist a pushed step screenshot as `step_NNNN.<ext>`, stamped with
    /// the engine's capture time.
    ///
    /// Failures are logged and yield `None`.
    pub async fn capture(
        &self,
        step_index: u32,
        raw: &str,
        action: Option<&str>,
        captured_at: DateTime<Utc>,
    ) -> Option<ScreenshotRef> {
        self.capture_named(&step_file_stem(step_index), raw, action, captured_at)
            .await
    }

    /// Persist an image under `<stem>.<ext>`. Failures are logged and yield
    /// `None`.
    pub async fn capture_named(
        &self,
        stem: &str,
        raw: &str,
        action: Option<&str>,
        captured_at: DateTime<Utc>,
    ) -> Option<ScreenshotRef> {
        match self.try_capture(stem, raw, action, captured_at).await {
            Ok(screenshot) => {
                debug!(id = %screenshot.id, "Screenshot saved");
                Some(screenshot)
            }
            Err(e) => {
                warn!(stem, error = %e, "Failed to save screenshot");
                None
            }
        }
    }

    async fn try_capture(
        &self,
        stem: &str,
        raw: &str,
        action: Option<&str>,
        captured_at: DateTime<Utc>,
    ) -> Result<ScreenshotRef, ArtifactError> {
        let (bytes, extension) = decode_image(raw)?;
        let name = format!("{}.{}", stem, extension);
        let path = self.dir.join(&name);

        write_atomic(&path, &bytes)
            .await
            .map_err(|source| ArtifactError::Write { path, source })?;

        let rel = ResultsLayout::screenshot_rel_path(&name);
        Ok(ScreenshotRef::new(name, rel, captured_at).with_action(action.map(str::to_string)))
    }
}
