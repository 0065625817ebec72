use async_trait::async_trait;
use chrono::Utc;
use log::info;
use std::sync::Mutex;
use uuid::Uuid;

use crate::incident::{CaptureKind, MediaCapture};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraSelector {
    Front,
    Back,
    /// Both physical streams at once, where the hardware supports it.
    Dual,
}

/// Camera/microphone seam. Failures are reported as explicit errors or
/// absence, never thrown into the session manager's control flow.
#[async_trait]
pub trait CaptureService: Send + Sync {
    async fn start_recording(&self, camera: CameraSelector) -> bool;
    /// Zero or more captures, one per physical stream when dual-stream
    /// capture was active.
    async fn stop_recording(&self) -> Vec<MediaCapture>;
    async fn capture_photo(&self) -> Option<MediaCapture>;
}

/// In-memory capture stub for tests and the demo binary.
#[derive(Default)]
pub struct MockCaptureService {
    recording: Mutex<Option<CameraSelector>>,
    fail_start: bool,
}

impl MockCaptureService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            recording: Mutex::new(None),
            fail_start: true,
        }
    }
}

#[async_trait]
impl CaptureService for MockCaptureService {
    async fn start_recording(&self, camera: CameraSelector) -> bool {
        if self.fail_start {
            return false;
        }
        info!("[capture] recording started ({camera:?})");
        *self.recording.lock().unwrap_or_else(|e| e.into_inner()) = Some(camera);
        true
    }

    async fn stop_recording(&self) -> Vec<MediaCapture> {
        let selector = self
            .recording
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match selector {
            None => Vec::new(),
            Some(CameraSelector::Dual) => vec![
                capture_stub(CaptureKind::Video, "front"),
                capture_stub(CaptureKind::Video, "back"),
            ],
            Some(_) => vec![capture_stub(CaptureKind::Video, "main")],
        }
    }

    async fn capture_photo(&self) -> Option<MediaCapture> {
        Some(capture_stub(CaptureKind::Photo, "photo"))
    }
}

fn capture_stub(kind: CaptureKind, tag: &str) -> MediaCapture {
    let id = Uuid::new_v4();
    MediaCapture {
        id,
        timestamp: Utc::now(),
        kind,
        uri: format!("mock://capture/{tag}/{id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dual_stream_yields_two_captures() {
        let service = MockCaptureService::new();
        assert!(service.start_recording(CameraSelector::Dual).await);
        let captures = service.stop_recording().await;
        assert_eq!(captures.len(), 2);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_empty() {
        let service = MockCaptureService::new();
        assert!(service.stop_recording().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_start_reports_false() {
        let service = MockCaptureService::failing();
        assert!(!service.start_recording(CameraSelector::Back).await);
        assert!(service.stop_recording().await.is_empty());
    }
}
