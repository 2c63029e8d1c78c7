use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use consult_flow::{AudioClip, AudioRecorder};
use tracing::{debug, warn};

/// Headless capture backend: waits out the recording window, then picks up
/// the newest clip an external capture process dropped into the configured
/// directory. Consumed clips are removed so they are not replayed.
pub struct ClipDropRecorder {
    dir: PathBuf,
}

impl ClipDropRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn newest_clip(&self) -> Option<PathBuf> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.ok()?;
        let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) else {
                continue;
            };
            if newest.as_ref().is_none_or(|(ts, _)| modified > *ts) {
                newest = Some((modified, path));
            }
        }
        newest.map(|(_, path)| path)
    }
}

#[async_trait]
impl AudioRecorder for ClipDropRecorder {
    async fn record(&self, duration_secs: u64) -> Option<AudioClip> {
        tokio::time::sleep(Duration::from_secs(duration_secs)).await;

        let path = self.newest_clip().await?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read audio clip");
                return None;
            }
        };
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!(path = %path.display(), error = %e, "failed to remove consumed clip");
        }
        debug!(path = %path.display(), bytes = bytes.len(), "audio clip picked up");
        if bytes.is_empty() {
            None
        } else {
            Some(AudioClip::new(bytes))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_directory_yields_no_clip() {
        let recorder = ClipDropRecorder::new("/nonexistent/clip-drop");
        assert!(recorder.record(0).await.is_none());
    }

    #[tokio::test]
    async fn picks_up_and_consumes_dropped_clip() {
        let dir = std::env::temp_dir().join(format!("clip-drop-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("answer_1.ogg"), b"opus-bytes")
            .await
            .unwrap();

        let recorder = ClipDropRecorder::new(&dir);
        let clip = recorder.record(0).await.expect("clip picked up");
        assert_eq!(clip.bytes, b"opus-bytes");

        // Consumed clips are gone on the next pass.
        assert!(recorder.record(0).await.is_none());
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
