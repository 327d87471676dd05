//! Live preview: follows the session's latest snapshot without ever
//! blocking the capture loop.

use crate::engine::Snapshot;
use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const PREVIEW_REFRESH: Duration = Duration::from_millis(200);

/// Poll the snapshot cell once per `refresh` until the session ends.
///
/// Status changes are printed; when `output` is set the latest frame is
/// written there as JPEG. Returns the number of frames written.
pub async fn run_preview(
    mut view: watch::Receiver<Snapshot>,
    output: Option<PathBuf>,
    refresh: Duration,
) -> usize {
    let mut ticker = tokio::time::interval(refresh);
    let mut last_status = String::new();
    let mut written = 0;

    loop {
        ticker.tick().await;
        let closed = match view.has_changed() {
            Ok(false) => continue,
            Ok(true) => false,
            Err(_) => true,
        };
        let snapshot = view.borrow_and_update().clone();

        tracing::trace!(frames = snapshot.frames_read, "preview tick");
        if !snapshot.status.is_empty() && snapshot.status != last_status {
            println!("{}", snapshot.status);
            last_status = snapshot.status;
        }

        if let (Some(path), Some(frame)) = (&output, snapshot.frame) {
            let path = path.clone();
            match tokio::task::spawn_blocking(move || write_frame(&path, &frame)).await {
                Ok(Ok(())) => written += 1,
                Ok(Err(e)) => tracing::warn!(error = %e, "failed to write preview frame"),
                Err(e) => tracing::warn!(error = %e, "preview writer task failed"),
            }
        }

        if closed {
            break;
        }
    }

    tracing::debug!(written, "preview finished");
    written
}

/// Write via a temporary file so readers never see a partial JPEG.
fn write_frame(path: &Path, frame: &Arc<RgbImage>) -> image::ImageResult<()> {
    let tmp = path.with_extension("tmp");
    frame.save_with_format(&tmp, ImageFormat::Jpeg)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
