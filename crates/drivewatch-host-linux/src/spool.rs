//! Media hand-off through a spool directory
//!
//! Each event's media is copied to `<spool>/<event-id>/` and a `manifest.json`
//! describing the event is written last, so an external uploader only picks
//! up complete directories.

use async_trait::async_trait;
use drivewatch_api::{Event, EventRecord};
use drivewatch_host_api::{HostError, HostResult, MediaUploader};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const MANIFEST_FILENAME: &str = "manifest.json";

pub struct SpoolUploader {
    spool_dir: PathBuf,
}

impl SpoolUploader {
    pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            spool_dir: spool_dir.into(),
        }
    }

    pub fn event_dir(&self, event: &Event) -> PathBuf {
        self.spool_dir.join(event.id.to_string())
    }
}

#[async_trait]
impl MediaUploader for SpoolUploader {
    async fn upload(&self, event: &Event) -> HostResult<()> {
        let dir = self.event_dir(event);
        tokio::fs::create_dir_all(&dir).await?;

        let mut copied = Vec::new();
        for source in event.media.iter() {
            let Some(name) = source.file_name() else {
                return Err(HostError::Internal(format!(
                    "media path has no file name: {}",
                    source.display()
                )));
            };
            let target = dir.join(name);

            match tokio::fs::copy(source, &target).await {
                Ok(bytes) => {
                    debug!(event_id = %event.id, file = %target.display(), bytes, "Media spooled");
                    copied.push(name.to_string_lossy().to_string());
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!(event_id = %event.id, path = %source.display(), "Media file missing, skipping");
                }
                Err(e) => return Err(HostError::Io(e)),
            }
        }

        let manifest = serde_json::json!({
            "event": EventRecord::from(event),
            "files": copied,
        });
        let body = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| HostError::Internal(format!("manifest encoding failed: {}", e)))?;
        write_atomic(&dir.join(MANIFEST_FILENAME), &body).await?;

        info!(event_id = %event.id, files = copied.len(), "Event media handed off");
        Ok(())
    }
}

async fn write_atomic(path: &Path, body: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivewatch_api::{EventData, EventKind, MediaPaths};
    use drivewatch_util::VehicleId;
    use tempfile::TempDir;

    fn event_with(media: MediaPaths) -> Event {
        Event::from_data(
            VehicleId::new(),
            None,
            EventData::new(EventKind::DriverUnidentified),
            media,
            drivewatch_util::now(),
        )
    }

    #[tokio::test]
    async fn copies_media_and_writes_manifest() {
        let dir = TempDir::new().unwrap();
        let snapshot = dir.path().join("snap-1.jpg");
        std::fs::write(&snapshot, b"jpeg-bytes").unwrap();

        let uploader = SpoolUploader::new(dir.path().join("spool"));
        let event = event_with(MediaPaths {
            snapshot: Some(snapshot),
            video: Some(dir.path().join("missing.mp4")),
        });

        uploader.upload(&event).await.unwrap();

        let event_dir = uploader.event_dir(&event);
        assert_eq!(std::fs::read(event_dir.join("snap-1.jpg")).unwrap(), b"jpeg-bytes");
        assert!(!event_dir.join("missing.mp4").exists());

        let manifest: serde_json::Value =
            serde_json::from_slice(&std::fs::read(event_dir.join(MANIFEST_FILENAME)).unwrap())
                .unwrap();
        assert_eq!(manifest["event"]["id"], event.id.to_string());
        assert_eq!(manifest["files"], serde_json::json!(["snap-1.jpg"]));
        assert!(!event_dir.join("manifest.json.tmp").exists());
    }
}
