//! Atomic artifact writes.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("artifact");
    path.with_file_name(format!(".{}.tmp.{}", name, std::process::id()))
}

/// Write `bytes` to a sibling temp file, sync it, then rename it over `path`.
///
/// Readers see either the previous file or the complete new one. The temp
/// file is removed if any step fails.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = temp_path(path);

    let result = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, path).await
    }
    .await;

    if result.is_err() {
        if let Err(e) = fs::remove_file(&tmp).await {
            debug!(error = %e, path = %tmp.display(), "Temp file cleanup skipped");
        }
    }
    result
}

/// Pretty-print `value` as JSON and write it atomically.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes).await
}
